use crate::channels::compose::{MAX_LIST_ROWS, MAX_ROW_TITLE_CHARS};
use serde::Deserialize;
use std::collections::HashSet;

/// Catalog shipped with the binary.
const BUILTIN_CATALOG: &str = include_str!("../../catalog/plans.toml");

/// Network label stored on airtime plans.
pub const AIRTIME_NETWORK: &str = "airtime";

// ── TOML-parsed types ───────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogToml {
    #[serde(default)]
    pub networks: Vec<NetworkToml>,
    #[serde(default)]
    pub airtime: Vec<PlanToml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkToml {
    pub name: String,
    #[serde(default)]
    pub plans: Vec<PlanToml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanToml {
    pub id: String,
    pub amount: u64,
    pub description: String,
    #[serde(default)]
    pub validity: Option<String>,
}

// ── Validated runtime types ─────────────────────────────────────

/// A purchasable plan. `amount` is in naira.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub id: String,
    pub amount: u64,
    pub description: String,
    pub validity: Option<String>,
    /// Lowercase network name, or [`AIRTIME_NETWORK`].
    pub network: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPlans {
    /// Uppercase canonical name, e.g. `MTN`.
    pub name: String,
    pub plans: Vec<Plan>,
}

/// Static plan lookup, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    networks: Vec<NetworkPlans>,
    airtime: Vec<Plan>,
}

/// Validation problem in a catalog definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("plan catalog: {message}")]
pub struct CatalogError {
    pub message: String,
}

fn err(message: String) -> CatalogError {
    CatalogError { message }
}

impl PlanCatalog {
    /// The catalog compiled into the binary.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let parsed: CatalogToml = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("failed to parse plan catalog: {e}"))?;
        build_catalog(&parsed).map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!("invalid plan catalog:\n  {}", msgs.join("\n  "))
        })
    }

    pub fn networks(&self) -> &[NetworkPlans] {
        &self.networks
    }

    /// Case-insensitive network lookup.
    pub fn network(&self, name: &str) -> Option<&NetworkPlans> {
        let wanted = name.trim().to_uppercase();
        self.networks.iter().find(|n| n.name == wanted)
    }

    pub fn plans_for(&self, network: &str) -> &[Plan] {
        self.network(network)
            .map(|n| n.plans.as_slice())
            .unwrap_or(&[])
    }

    pub fn plan(&self, network: &str, plan_id: &str) -> Option<&Plan> {
        self.plans_for(network).iter().find(|p| p.id == plan_id)
    }

    pub fn airtime_options(&self) -> &[Plan] {
        &self.airtime
    }

    pub fn airtime(&self, plan_id: &str) -> Option<&Plan> {
        self.airtime.iter().find(|p| p.id == plan_id)
    }
}

/// Build a validated catalog, collecting every problem found.
pub fn build_catalog(toml: &CatalogToml) -> Result<PlanCatalog, Vec<CatalogError>> {
    let mut errors = Vec::new();

    if toml.networks.is_empty() {
        errors.push(err("at least one network is required".into()));
    }
    if toml.networks.len() > MAX_LIST_ROWS {
        errors.push(err(format!(
            "{} networks exceeds the list limit of {MAX_LIST_ROWS}",
            toml.networks.len()
        )));
    }

    let mut seen_networks = HashSet::new();
    let mut networks = Vec::with_capacity(toml.networks.len());
    for net in &toml.networks {
        let name = net.name.trim().to_uppercase();
        if name.is_empty() {
            errors.push(err("network name must not be empty".into()));
            continue;
        }
        if !seen_networks.insert(name.clone()) {
            errors.push(err(format!("duplicate network '{name}'")));
            continue;
        }
        if net.plans.is_empty() {
            errors.push(err(format!("network '{name}' has no plans")));
        }
        let plans = check_plans(&name, &net.plans, &name.to_lowercase(), &mut errors);
        networks.push(NetworkPlans { name, plans });
    }

    // The menu always offers airtime, so the section must list something.
    if toml.airtime.is_empty() {
        errors.push(err("at least one [[airtime]] option is required".into()));
    }
    let airtime = check_plans("airtime", &toml.airtime, AIRTIME_NETWORK, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(PlanCatalog { networks, airtime })
}

fn check_plans(
    section: &str,
    plans: &[PlanToml],
    network: &str,
    errors: &mut Vec<CatalogError>,
) -> Vec<Plan> {
    if plans.len() > MAX_LIST_ROWS {
        errors.push(err(format!(
            "'{section}' has {} plans, exceeds the list limit of {MAX_LIST_ROWS}",
            plans.len()
        )));
    }

    let mut seen_ids = HashSet::new();
    let mut out = Vec::with_capacity(plans.len());
    for p in plans {
        if p.id.trim().is_empty() {
            errors.push(err(format!("'{section}': plan id must not be empty")));
        } else if !seen_ids.insert(p.id.as_str()) {
            errors.push(err(format!("'{section}': duplicate plan id '{}'", p.id)));
        }
        let title_len = p.description.chars().count();
        if title_len == 0 || title_len > MAX_ROW_TITLE_CHARS {
            errors.push(err(format!(
                "'{section}': plan '{}' description must be 1-{MAX_ROW_TITLE_CHARS} characters",
                p.id
            )));
        }
        out.push(Plan {
            id: p.id.clone(),
            amount: p.amount,
            description: p.description.clone(),
            validity: p.validity.clone(),
            network: network.to_string(),
        });
    }
    out
}
