use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── State catalog ───────────────────────────────────────────────

/// Named states of the purchase conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Start,
    MainMenu,
    SelectingNetwork,
    SelectingPlan,
    EnterPhone,
    AwaitingPayment,
    Done,
    Error,
}

impl State {
    pub const ALL: [State; 8] = [
        State::Start,
        State::MainMenu,
        State::SelectingNetwork,
        State::SelectingPlan,
        State::EnterPhone,
        State::AwaitingPayment,
        State::Done,
        State::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::MainMenu => "MAIN_MENU",
            Self::SelectingNetwork => "SELECTING_NETWORK",
            Self::SelectingPlan => "SELECTING_PLAN",
            Self::EnterPhone => "ENTER_PHONE",
            Self::AwaitingPayment => "AWAITING_PAYMENT",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        }
    }

    /// A terminal state ends a flow instance; the next message starts over at the menu.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl Default for State {
    fn default() -> Self {
        Self::MainMenu
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown state '{0}'")]
pub struct ParseStateError(pub String);

impl FromStr for State {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}

/// Actions that key the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Greet,
    BuyData,
    BuyAirtime,
    Support,
    SelectNetwork,
    SelectPlan,
    SubmitPhone,
    PaymentConfirmed,
    PaymentFailed,
    Cancel,
    Restart,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greet => "greet",
            Self::BuyData => "buy_data",
            Self::BuyAirtime => "buy_airtime",
            Self::Support => "support",
            Self::SelectNetwork => "select_network",
            Self::SelectPlan => "select_plan",
            Self::SubmitPhone => "submit_phone",
            Self::PaymentConfirmed => "payment_confirmed",
            Self::PaymentFailed => "payment_failed",
            Self::Cancel => "cancel",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Scratch ─────────────────────────────────────────────────────

/// A plan picked from a list reply: the row id and the title the user saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanChoice {
    pub id: String,
    pub title: String,
}

/// In-flight selections, one variant per flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum Scratch {
    #[default]
    Empty,
    Data {
        #[serde(default)]
        network: Option<String>,
        #[serde(default)]
        plan: Option<PlanChoice>,
        #[serde(default)]
        beneficiary_phone: Option<String>,
    },
    Airtime {
        #[serde(default)]
        plan: Option<PlanChoice>,
        #[serde(default)]
        beneficiary_phone: Option<String>,
    },
}

impl Scratch {
    pub fn data() -> Self {
        Self::Data {
            network: None,
            plan: None,
            beneficiary_phone: None,
        }
    }

    pub fn airtime() -> Self {
        Self::Airtime {
            plan: None,
            beneficiary_phone: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Flow name used in history rows.
    pub fn flow_name(&self) -> &'static str {
        match self {
            Self::Empty => "none",
            Self::Data { .. } => "data",
            Self::Airtime { .. } => "airtime",
        }
    }

    pub fn network(&self) -> Option<&str> {
        match self {
            Self::Data { network, .. } => network.as_deref(),
            _ => None,
        }
    }

    pub fn plan(&self) -> Option<&PlanChoice> {
        match self {
            Self::Data { plan, .. } | Self::Airtime { plan, .. } => plan.as_ref(),
            Self::Empty => None,
        }
    }

    pub fn beneficiary_phone(&self) -> Option<&str> {
        match self {
            Self::Data {
                beneficiary_phone, ..
            }
            | Self::Airtime {
                beneficiary_phone, ..
            } => beneficiary_phone.as_deref(),
            Self::Empty => None,
        }
    }

    /// Record the plan choice in the current flow. An empty scratch is treated
    /// as a data flow with no network, which fails to resolve later.
    pub fn set_plan(&mut self, choice: PlanChoice) {
        match self {
            Self::Data { plan, .. } | Self::Airtime { plan, .. } => *plan = Some(choice),
            Self::Empty => {
                *self = Self::Data {
                    network: None,
                    plan: Some(choice),
                    beneficiary_phone: None,
                }
            }
        }
    }

    pub fn set_beneficiary_phone(&mut self, phone: &str) {
        match self {
            Self::Data {
                beneficiary_phone, ..
            }
            | Self::Airtime {
                beneficiary_phone, ..
            } => *beneficiary_phone = Some(phone.to_string()),
            Self::Empty => {
                *self = Self::Data {
                    network: None,
                    plan: None,
                    beneficiary_phone: Some(phone.to_string()),
                }
            }
        }
    }
}

// ── Session ─────────────────────────────────────────────────────

/// Durable per-phone conversation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub phone: String,
    pub state: State,
    pub scratch: Scratch,
    pub created_at: String,
    pub updated_at: String,
}

impl Session {
    pub fn new(phone: &str) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            phone: phone.to_string(),
            state: State::default(),
            scratch: Scratch::Empty,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Back to the menu with nothing in flight.
    pub fn reset(&mut self) {
        self.state = State::MainMenu;
        self.scratch = Scratch::Empty;
    }
}

// ── Inbound ─────────────────────────────────────────────────────

/// A decoded inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text { body: String },
    ButtonReply { id: String },
    ListReply { id: String, title: String },
}

impl InboundMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    pub fn button(id: impl Into<String>) -> Self {
        Self::ButtonReply { id: id.into() }
    }

    pub fn list(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::ListReply {
            id: id.into(),
            title: title.into(),
        }
    }

    /// Short kind label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ButtonReply { .. } => "button_reply",
            Self::ListReply { .. } => "list_reply",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { body } => Some(body.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_parse_roundtrip() {
        for state in State::ALL {
            assert_eq!(state.as_str().parse::<State>().unwrap(), state);
        }
        let err = "CHECKOUT".parse::<State>().unwrap_err();
        assert_eq!(err.to_string(), "unknown state 'CHECKOUT'");
    }

    #[test]
    fn new_session_starts_at_menu() {
        let session = Session::new("2348012345678");
        assert_eq!(session.state, State::MainMenu);
        assert!(session.scratch.is_empty());
    }

    #[test]
    fn terminal_states() {
        assert!(State::Done.is_terminal());
        assert!(State::Error.is_terminal());
        assert!(!State::AwaitingPayment.is_terminal());
    }

    #[test]
    fn scratch_json_is_tagged() {
        let scratch = Scratch::Data {
            network: Some("mtn".into()),
            plan: Some(PlanChoice {
                id: "plan_500".into(),
                title: "₦500 - 1GB".into(),
            }),
            beneficiary_phone: None,
        };
        let json = serde_json::to_value(&scratch).unwrap();
        assert_eq!(json["flow"], "data");
        assert_eq!(json["network"], "mtn");
        assert_eq!(json["plan"]["id"], "plan_500");

        let empty: Scratch = serde_json::from_str(r#"{"flow":"empty"}"#).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn set_plan_on_empty_starts_unbound_data_flow() {
        let mut scratch = Scratch::Empty;
        scratch.set_plan(PlanChoice {
            id: "plan_500".into(),
            title: "₦500 - 1GB".into(),
        });
        assert_eq!(scratch.flow_name(), "data");
        assert_eq!(scratch.network(), None);
        assert_eq!(scratch.plan().unwrap().id, "plan_500");
    }

    #[test]
    fn airtime_keeps_its_variant() {
        let mut scratch = Scratch::airtime();
        scratch.set_plan(PlanChoice {
            id: "airtime_200".into(),
            title: "₦200 Airtime".into(),
        });
        scratch.set_beneficiary_phone("08012345678");
        assert_eq!(scratch.flow_name(), "airtime");
        assert_eq!(scratch.beneficiary_phone(), Some("08012345678"));
        assert!(scratch.network().is_none());
    }

    #[test]
    fn reset_clears_scratch() {
        let mut session = Session::new("p");
        session.state = State::EnterPhone;
        session.scratch = Scratch::data();
        session.reset();
        assert_eq!(session.state, State::MainMenu);
        assert!(session.scratch.is_empty());
    }
}
