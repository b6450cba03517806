pub mod catalog;
pub mod db;
pub mod dispatch;
pub mod handlers;
pub mod state;
pub mod types;
pub mod validate;

use catalog::PlanCatalog;
use std::path::Path;

/// Load the plan catalog.
///
/// With no path the built-in catalog is used. A configured path that does
/// not exist is an error, as is any parse or validation failure.
pub fn load_catalog(path: Option<&Path>) -> anyhow::Result<PlanCatalog> {
    let Some(path) = path else {
        tracing::debug!("using built-in plan catalog");
        return PlanCatalog::builtin();
    };

    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let catalog = PlanCatalog::from_toml_str(&content)
        .map_err(|e| anyhow::anyhow!("{e} ({})", path.display()))?;

    tracing::info!(
        "loaded {} networks and {} airtime options from {}",
        catalog.networks().len(),
        catalog.airtime_options().len(),
        path.display()
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_catalog_without_path_is_builtin() {
        let catalog = load_catalog(None).unwrap();
        assert_eq!(catalog, PlanCatalog::builtin().unwrap());
    }

    #[test]
    fn load_catalog_valid_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plans.toml");
        std::fs::write(
            &path,
            r#"
[[networks]]
name = "mtn"

[[networks.plans]]
id = "plan_300"
amount = 300
description = "₦300 - 500MB"
validity = "7 days"

[[airtime]]
id = "airtime_50"
amount = 50
description = "₦50 Airtime"
"#,
        )
        .unwrap();

        let catalog = load_catalog(Some(&path)).unwrap();
        assert_eq!(catalog.networks().len(), 1);
        assert_eq!(catalog.networks()[0].name, "MTN");
        assert_eq!(catalog.plan("mtn", "plan_300").unwrap().amount, 300);
        assert_eq!(catalog.airtime("airtime_50").unwrap().amount, 50);
    }

    #[test]
    fn load_catalog_missing_file_errors() {
        let tmp = TempDir::new().unwrap();
        let err = load_catalog(Some(&tmp.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    #[test]
    fn load_catalog_invalid_file_names_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "[[networks]]\nname = \"MTN\"\n").unwrap();

        let err = load_catalog(Some(&path)).unwrap_err().to_string();
        assert!(err.contains("has no plans"));
        assert!(err.contains("bad.toml"));
    }
}
