//! Outbound message shapes and the builders that produce them.
//!
//! Everything here is pure data shaping; delivery lives behind
//! [`Gateway`](super::traits::Gateway).

use crate::flows::catalog::{Plan, PlanCatalog};
use serde::{Deserialize, Serialize};

/// Channel limits for interactive messages.
pub const MAX_BUTTONS: usize = 3;
pub const MAX_BUTTON_TITLE_CHARS: usize = 20;
pub const MAX_HEADER_CHARS: usize = 60;
pub const MAX_BODY_CHARS: usize = 1024;
pub const MAX_LIST_ROWS: usize = 10;
pub const MAX_ROW_TITLE_CHARS: usize = 24;
pub const MAX_ROW_DESCRIPTION_CHARS: usize = 72;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

/// One message addressed to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        body: String,
    },
    Buttons {
        body_text: String,
        buttons: Vec<Button>,
    },
    List {
        header: String,
        body_text: String,
        button_label: String,
        sections: Vec<ListSection>,
    },
}

impl OutboundMessage {
    /// Short kind label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Buttons { .. } => "buttons",
            Self::List { .. } => "list",
        }
    }

    /// The main text of the message.
    pub fn body(&self) -> &str {
        match self {
            Self::Text { body } => body,
            Self::Buttons { body_text, .. } | Self::List { body_text, .. } => body_text,
        }
    }

    /// Ids of every selectable choice, in display order.
    pub fn choice_ids(&self) -> Vec<&str> {
        match self {
            Self::Text { .. } => Vec::new(),
            Self::Buttons { buttons, .. } => buttons.iter().map(|b| b.id.as_str()).collect(),
            Self::List { sections, .. } => sections
                .iter()
                .flat_map(|s| s.rows.iter().map(|r| r.id.as_str()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComposeError {
    #[error("message body must be 1-{max} characters", max = MAX_BODY_CHARS)]
    BodyLength,
    #[error("button message needs 1-{max} buttons, got {0}", max = MAX_BUTTONS)]
    ButtonCount(usize),
    #[error("button '{0}' title must be 1-{max} characters", max = MAX_BUTTON_TITLE_CHARS)]
    ButtonTitle(String),
    #[error("list header must be at most {max} characters", max = MAX_HEADER_CHARS)]
    HeaderLength,
    #[error("list button label must be 1-{max} characters", max = MAX_BUTTON_TITLE_CHARS)]
    LabelLength,
    #[error("list needs 1-{max} rows, got {0}", max = MAX_LIST_ROWS)]
    RowCount(usize),
    #[error("row '{0}' title must be 1-{max} characters", max = MAX_ROW_TITLE_CHARS)]
    RowTitle(String),
    #[error("row '{0}' description must be at most {max} characters", max = MAX_ROW_DESCRIPTION_CHARS)]
    RowDescription(String),
}

fn within(s: &str, max: usize) -> bool {
    let n = s.chars().count();
    n > 0 && n <= max
}

// ── Generic builders ────────────────────────────────────────────

pub fn text(body: impl Into<String>) -> OutboundMessage {
    OutboundMessage::Text { body: body.into() }
}

/// Quick-reply buttons from `(id, title)` pairs.
pub fn buttons(body: &str, choices: &[(&str, &str)]) -> Result<OutboundMessage, ComposeError> {
    if !within(body, MAX_BODY_CHARS) {
        return Err(ComposeError::BodyLength);
    }
    if choices.is_empty() || choices.len() > MAX_BUTTONS {
        return Err(ComposeError::ButtonCount(choices.len()));
    }
    let mut out = Vec::with_capacity(choices.len());
    for (id, title) in choices {
        if !within(title, MAX_BUTTON_TITLE_CHARS) {
            return Err(ComposeError::ButtonTitle((*id).to_string()));
        }
        out.push(Button {
            id: (*id).to_string(),
            title: (*title).to_string(),
        });
    }
    Ok(OutboundMessage::Buttons {
        body_text: body.to_string(),
        buttons: out,
    })
}

/// Multi-section selectable list.
pub fn list(
    header: &str,
    body: &str,
    button_label: &str,
    sections: Vec<ListSection>,
) -> Result<OutboundMessage, ComposeError> {
    if header.chars().count() > MAX_HEADER_CHARS {
        return Err(ComposeError::HeaderLength);
    }
    if !within(body, MAX_BODY_CHARS) {
        return Err(ComposeError::BodyLength);
    }
    if !within(button_label, MAX_BUTTON_TITLE_CHARS) {
        return Err(ComposeError::LabelLength);
    }
    let total_rows: usize = sections.iter().map(|s| s.rows.len()).sum();
    if total_rows == 0 || total_rows > MAX_LIST_ROWS {
        return Err(ComposeError::RowCount(total_rows));
    }
    for row in sections.iter().flat_map(|s| &s.rows) {
        if !within(&row.title, MAX_ROW_TITLE_CHARS) {
            return Err(ComposeError::RowTitle(row.id.clone()));
        }
        if let Some(ref d) = row.description {
            if d.chars().count() > MAX_ROW_DESCRIPTION_CHARS {
                return Err(ComposeError::RowDescription(row.id.clone()));
            }
        }
    }
    Ok(OutboundMessage::List {
        header: header.to_string(),
        body_text: body.to_string(),
        button_label: button_label.to_string(),
        sections,
    })
}

// ── Conversation messages ───────────────────────────────────────

pub const BUY_DATA: &str = "buy_data";
pub const BUY_AIRTIME: &str = "buy_airtime";
pub const SUPPORT: &str = "support";

pub fn main_menu() -> Result<OutboundMessage, ComposeError> {
    buttons(
        "Welcome! What would you like to do today?",
        &[
            (BUY_DATA, "Buy Data"),
            (BUY_AIRTIME, "Buy Airtime"),
            (SUPPORT, "Support"),
        ],
    )
}

/// Network picker. Row ids are the lowercase network names.
pub fn network_list(catalog: &PlanCatalog) -> Result<OutboundMessage, ComposeError> {
    let rows = catalog
        .networks()
        .iter()
        .map(|n| ListRow {
            id: n.name.to_lowercase(),
            title: n.name.clone(),
            description: None,
        })
        .collect();
    list(
        "Buy Data",
        "Choose your network",
        "Networks",
        vec![ListSection {
            title: "Networks".into(),
            rows,
        }],
    )
}

fn plan_rows(plans: &[Plan]) -> Vec<ListRow> {
    plans
        .iter()
        .map(|p| ListRow {
            id: p.id.clone(),
            title: p.description.clone(),
            description: p.validity.as_ref().map(|v| format!("Valid for {v}")),
        })
        .collect()
}

/// Data plans for one network.
pub fn plan_list(catalog: &PlanCatalog, network: &str) -> Result<OutboundMessage, ComposeError> {
    let name = network.to_uppercase();
    list(
        &format!("{name} Data Plans"),
        "Choose a data plan",
        "Plans",
        vec![ListSection {
            title: name.clone(),
            rows: plan_rows(catalog.plans_for(network)),
        }],
    )
}

pub fn airtime_list(catalog: &PlanCatalog) -> Result<OutboundMessage, ComposeError> {
    list(
        "Buy Airtime",
        "How much airtime would you like?",
        "Amounts",
        vec![ListSection {
            title: "Amounts".into(),
            rows: plan_rows(catalog.airtime_options()),
        }],
    )
}

pub fn support(body: &str) -> OutboundMessage {
    text(body)
}

pub fn pick_from_list(what: &str) -> OutboundMessage {
    text(format!(
        "Please pick a {what} from the list above."
    ))
}

pub fn phone_prompt(plan_title: &str) -> OutboundMessage {
    text(format!(
        "You selected {plan_title}. Please enter the phone number to credit, e.g. 08012345678."
    ))
}

pub fn invalid_phone() -> OutboundMessage {
    text("That doesn't look like a valid phone number. Please enter 11 digits starting with 0, e.g. 08012345678.")
}

pub fn plan_unavailable() -> OutboundMessage {
    text("Sorry, we couldn't find the plan you picked. It may no longer be available. Let's start again.")
}

/// Details echoed back when a purchase is confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSummary {
    pub network: String,
    pub plan_title: String,
    pub amount: u64,
    pub phone: String,
}

pub fn confirmation(summary: &OrderSummary) -> OutboundMessage {
    text(format!(
        "Order summary\n\
         Network: {}\n\
         Plan: {}\n\
         Amount: ₦{}\n\
         Phone: {}\n\n\
         Thank you! You'll receive payment instructions shortly. Send *hi* to start a new purchase.",
        summary.network, summary.plan_title, summary.amount, summary.phone
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, title: &str) -> ListRow {
        ListRow {
            id: id.into(),
            title: title.into(),
            description: None,
        }
    }

    #[test]
    fn main_menu_has_three_buttons() {
        let msg = main_menu().unwrap();
        assert_eq!(msg.kind(), "buttons");
        assert_eq!(msg.choice_ids(), vec![BUY_DATA, BUY_AIRTIME, SUPPORT]);
    }

    #[test]
    fn buttons_rejects_a_fourth() {
        let err = buttons("Pick", &[("a", "A"), ("b", "B"), ("c", "C"), ("d", "D")]).unwrap_err();
        assert_eq!(err, ComposeError::ButtonCount(4));
        assert_eq!(
            buttons("Pick", &[]).unwrap_err(),
            ComposeError::ButtonCount(0)
        );
    }

    #[test]
    fn buttons_rejects_long_title() {
        let err = buttons("Pick", &[("a", "a title well over twenty chars")]).unwrap_err();
        assert_eq!(err, ComposeError::ButtonTitle("a".into()));
    }

    #[test]
    fn list_rejects_too_many_rows_across_sections() {
        let sections = vec![
            ListSection {
                title: "One".into(),
                rows: (0..6).map(|i| row(&format!("a{i}"), "A")).collect(),
            },
            ListSection {
                title: "Two".into(),
                rows: (0..5).map(|i| row(&format!("b{i}"), "B")).collect(),
            },
        ];
        assert_eq!(
            list("H", "Body", "Open", sections).unwrap_err(),
            ComposeError::RowCount(11)
        );
    }

    #[test]
    fn list_rejects_empty_body_and_label() {
        let sections = vec![ListSection {
            title: "S".into(),
            rows: vec![row("a", "A")],
        }];
        assert_eq!(
            list("H", "", "Open", sections.clone()).unwrap_err(),
            ComposeError::BodyLength
        );
        assert_eq!(
            list("H", "Body", "", sections).unwrap_err(),
            ComposeError::LabelLength
        );
    }

    #[test]
    fn errors_name_the_limit() {
        assert_eq!(
            ComposeError::ButtonCount(4).to_string(),
            "button message needs 1-3 buttons, got 4"
        );
        assert_eq!(
            ComposeError::RowCount(0).to_string(),
            "list needs 1-10 rows, got 0"
        );
        assert_eq!(
            ComposeError::RowTitle("plan_1".into()).to_string(),
            "row 'plan_1' title must be 1-24 characters"
        );
        assert_eq!(
            ComposeError::BodyLength.to_string(),
            "message body must be 1-1024 characters"
        );
    }

    #[test]
    fn pick_from_list_offers_no_escape_word() {
        let body = pick_from_list("plan").body().to_string();
        assert_eq!(body, "Please pick a plan from the list above.");
    }

    #[test]
    fn network_list_uses_lowercase_ids() {
        let catalog = PlanCatalog::builtin().unwrap();
        let msg = network_list(&catalog).unwrap();
        assert_eq!(msg.choice_ids(), vec!["mtn", "airtel", "glo", "9mobile"]);
    }

    #[test]
    fn plan_list_for_mtn() {
        let catalog = PlanCatalog::builtin().unwrap();
        let msg = plan_list(&catalog, "mtn").unwrap();
        let OutboundMessage::List {
            header, sections, ..
        } = &msg
        else {
            panic!("expected list, got {msg:?}");
        };
        assert_eq!(header, "MTN Data Plans");
        assert_eq!(sections[0].rows[0].id, "plan_500");
        assert_eq!(sections[0].rows[0].title, "₦500 - 1GB");
        assert_eq!(
            sections[0].rows[0].description.as_deref(),
            Some("Valid for 30 days")
        );
    }

    #[test]
    fn plan_list_for_unknown_network_fails() {
        let catalog = PlanCatalog::builtin().unwrap();
        assert_eq!(
            plan_list(&catalog, "etisalat").unwrap_err(),
            ComposeError::RowCount(0)
        );
    }

    #[test]
    fn airtime_list_rows() {
        let catalog = PlanCatalog::builtin().unwrap();
        let msg = airtime_list(&catalog).unwrap();
        assert_eq!(msg.choice_ids()[0], "airtime_100");
    }

    #[test]
    fn confirmation_mentions_every_detail() {
        let msg = confirmation(&OrderSummary {
            network: "mtn".into(),
            plan_title: "₦500 - 1GB".into(),
            amount: 500,
            phone: "08012345678".into(),
        });
        let body = msg.body();
        for needle in ["mtn", "₦500 - 1GB", "500", "08012345678"] {
            assert!(body.contains(needle), "missing {needle} in {body}");
        }
    }

    #[test]
    fn outbound_serde_tag() {
        let json = serde_json::to_value(text("hello")).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["body"], "hello");
    }
}
