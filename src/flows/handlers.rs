//! One handler per conversation state.
//!
//! Handlers are stateless unit structs. Everything a handler touches for the
//! current message arrives through [`FlowContext`]; effects are session
//! mutation, persistence and outbound sends, in that order.

use super::catalog::{PlanCatalog, AIRTIME_NETWORK};
use super::db::{FlowOutcome, NewHistoryEntry, SessionStore};
use super::state::transition;
use super::types::{Action, InboundMessage, PlanChoice, Scratch, Session, State};
use crate::channels::compose::{self, OrderSummary, OutboundMessage};
use crate::channels::traits::{Gateway, GatewayResponse};
use crate::observability::Metrics;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};

/// Eleven-digit local number with a leading zero.
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0[0-9]{10}$").expect("phone pattern compiles"));

const GREETINGS: &[&str] = &["hi", "hello"];

/// True iff `s` is exactly a leading `0` followed by ten ASCII digits.
pub fn is_valid_phone(s: &str) -> bool {
    PHONE_RE.is_match(s)
}

pub fn is_greeting(s: &str) -> bool {
    let s = s.trim().to_lowercase();
    GREETINGS.contains(&s.as_str())
}

/// Everything a handler may use while processing one inbound message.
pub struct FlowContext<'a> {
    pub session: &'a mut Session,
    pub message: &'a InboundMessage,
    pub catalog: &'a PlanCatalog,
    pub store: &'a dyn SessionStore,
    pub gateway: &'a dyn Gateway,
    pub metrics: &'a Metrics,
    pub support_text: &'a str,
}

impl FlowContext<'_> {
    /// Apply `action` through the transition table.
    pub fn advance(&mut self, action: Action) -> State {
        let from = self.session.state;
        let to = transition(from, action);
        if from != to {
            tracing::info!(
                "session {}: {from} --{action}--> {to}",
                self.session.phone
            );
            self.metrics.record_transition(from.as_str(), to.as_str());
        }
        self.session.state = to;
        to
    }

    /// Close out the flow in progress and go back to the menu.
    fn finish(&mut self, outcome: FlowOutcome, detail: Option<String>) -> anyhow::Result<()> {
        let flow = self.session.scratch.flow_name();
        self.store.record_history(&NewHistoryEntry {
            phone: self.session.phone.clone(),
            flow: flow.to_string(),
            outcome,
            detail,
        })?;
        self.metrics.record_outcome(flow, outcome.as_str());

        let from = self.session.state;
        self.session.reset();
        if from != self.session.state {
            self.metrics
                .record_transition(from.as_str(), self.session.state.as_str());
        }
        tracing::info!(
            "session {}: {flow} flow {} from {from}",
            self.session.phone,
            outcome.as_str()
        );
        Ok(())
    }

    pub fn persist(&self) -> anyhow::Result<()> {
        self.store.save(&*self.session)
    }

    /// Send one message to the session's phone.
    pub async fn reply(&self, message: OutboundMessage) -> anyhow::Result<GatewayResponse> {
        let kind = message.kind();
        match self.gateway.send(&self.session.phone, &message).await {
            Ok(resp) => {
                if resp.ok {
                    self.metrics.record_outbound(kind, "ok");
                } else {
                    self.metrics.record_outbound(kind, "rejected");
                    tracing::warn!(
                        "{} refused {kind} message for {}: {}",
                        self.gateway.name(),
                        self.session.phone,
                        resp.raw
                    );
                }
                Ok(resp)
            }
            Err(e) => {
                self.metrics.record_outbound(kind, "error");
                Err(e)
            }
        }
    }

    async fn reprompt(&self, message: OutboundMessage) -> anyhow::Result<()> {
        tracing::debug!(
            "session {}: unexpected {} in {}, re-prompting",
            self.session.phone,
            self.message.kind(),
            self.session.state
        );
        self.reply(message).await?;
        Ok(())
    }
}

/// Behavior bound to exactly one state.
#[async_trait]
pub trait StateHandler: Send + Sync {
    fn state(&self) -> State;

    async fn handle(&self, ctx: &mut FlowContext<'_>) -> anyhow::Result<()>;
}

/// The handler set registered at startup.
pub fn default_handlers() -> Vec<Arc<dyn StateHandler>> {
    vec![
        Arc::new(MainMenuHandler),
        Arc::new(NetworkSelectionHandler),
        Arc::new(PlanSelectionHandler),
        Arc::new(PhoneEntryHandler),
    ]
}

// ── MAIN_MENU ───────────────────────────────────────────────────

pub struct MainMenuHandler;

impl MainMenuHandler {
    /// Sessions routed here from another state (terminal, placeholder, or
    /// unregistered) start over at the menu.
    fn enter_menu(ctx: &mut FlowContext<'_>) -> anyhow::Result<()> {
        let entry = match ctx.session.state {
            State::MainMenu => return Ok(()),
            State::Start => Action::Greet,
            s if s.is_terminal() => Action::Restart,
            _ => Action::Cancel,
        };
        if ctx.advance(entry) != State::MainMenu {
            tracing::warn!(
                "session {}: no {entry} transition from {}, forcing menu",
                ctx.session.phone,
                ctx.session.state
            );
        }
        ctx.session.reset();
        ctx.persist()
    }
}

#[async_trait]
impl StateHandler for MainMenuHandler {
    fn state(&self) -> State {
        State::MainMenu
    }

    async fn handle(&self, ctx: &mut FlowContext<'_>) -> anyhow::Result<()> {
        Self::enter_menu(ctx)?;
        let catalog = ctx.catalog;
        let message = ctx.message;

        let InboundMessage::ButtonReply { id } = message else {
            if message.as_text().is_some_and(is_greeting) {
                tracing::debug!("session {}: greeting", ctx.session.phone);
            }
            ctx.reply(compose::main_menu()?).await?;
            return Ok(());
        };

        match id.as_str() {
            compose::BUY_DATA => {
                let list = compose::network_list(catalog)?;
                ctx.session.scratch = Scratch::data();
                ctx.advance(Action::BuyData);
                ctx.persist()?;
                ctx.reply(list).await?;
            }
            compose::BUY_AIRTIME => {
                let list = compose::airtime_list(catalog)?;
                ctx.session.scratch = Scratch::airtime();
                ctx.advance(Action::BuyAirtime);
                ctx.persist()?;
                ctx.reply(list).await?;
            }
            compose::SUPPORT => {
                ctx.reply(compose::support(ctx.support_text)).await?;
            }
            other => {
                tracing::debug!("session {}: unknown button '{other}'", ctx.session.phone);
                ctx.reply(compose::main_menu()?).await?;
            }
        }
        Ok(())
    }
}

// ── SELECTING_NETWORK ───────────────────────────────────────────

pub struct NetworkSelectionHandler;

#[async_trait]
impl StateHandler for NetworkSelectionHandler {
    fn state(&self) -> State {
        State::SelectingNetwork
    }

    async fn handle(&self, ctx: &mut FlowContext<'_>) -> anyhow::Result<()> {
        let catalog = ctx.catalog;
        let message = ctx.message;

        let InboundMessage::ListReply { id, .. } = message else {
            return ctx.reprompt(compose::pick_from_list("network")).await;
        };
        let Some(network) = catalog.network(id) else {
            tracing::warn!("session {}: unknown network '{id}'", ctx.session.phone);
            return ctx.reprompt(compose::pick_from_list("network")).await;
        };

        let network = network.name.to_lowercase();
        let plans = compose::plan_list(catalog, &network)?;
        ctx.session.scratch = Scratch::Data {
            network: Some(network),
            plan: None,
            beneficiary_phone: None,
        };
        ctx.advance(Action::SelectNetwork);
        ctx.persist()?;
        ctx.reply(plans).await?;
        Ok(())
    }
}

// ── SELECTING_PLAN ──────────────────────────────────────────────

pub struct PlanSelectionHandler;

#[async_trait]
impl StateHandler for PlanSelectionHandler {
    fn state(&self) -> State {
        State::SelectingPlan
    }

    async fn handle(&self, ctx: &mut FlowContext<'_>) -> anyhow::Result<()> {
        let message = ctx.message;
        let InboundMessage::ListReply { id, title } = message else {
            let what = match ctx.session.scratch {
                Scratch::Airtime { .. } => "top-up amount",
                _ => "plan",
            };
            return ctx.reprompt(compose::pick_from_list(what)).await;
        };

        ctx.session.scratch.set_plan(PlanChoice {
            id: id.clone(),
            title: title.clone(),
        });
        ctx.advance(Action::SelectPlan);
        ctx.persist()?;
        ctx.reply(compose::phone_prompt(title)).await?;
        Ok(())
    }
}

// ── ENTER_PHONE ─────────────────────────────────────────────────

pub struct PhoneEntryHandler;

impl PhoneEntryHandler {
    /// Look the chosen plan back up. `None` means the scratch is stale.
    fn resolve(catalog: &PlanCatalog, scratch: &Scratch) -> Option<OrderSummary> {
        let choice = scratch.plan()?;
        let phone = scratch.beneficiary_phone()?.to_string();
        match scratch {
            Scratch::Data { network, .. } => {
                let network = network.as_deref()?;
                let plan = catalog.plan(network, &choice.id)?;
                Some(OrderSummary {
                    network: plan.network.clone(),
                    plan_title: choice.title.clone(),
                    amount: plan.amount,
                    phone,
                })
            }
            Scratch::Airtime { .. } => {
                let plan = catalog.airtime(&choice.id)?;
                Some(OrderSummary {
                    network: AIRTIME_NETWORK.to_string(),
                    plan_title: choice.title.clone(),
                    amount: plan.amount,
                    phone,
                })
            }
            Scratch::Empty => None,
        }
    }
}

#[async_trait]
impl StateHandler for PhoneEntryHandler {
    fn state(&self) -> State {
        State::EnterPhone
    }

    async fn handle(&self, ctx: &mut FlowContext<'_>) -> anyhow::Result<()> {
        let message = ctx.message;
        let Some(phone) = message.as_text().filter(|t| is_valid_phone(t)) else {
            return ctx.reprompt(compose::invalid_phone()).await;
        };

        ctx.session.scratch.set_beneficiary_phone(phone);

        match Self::resolve(ctx.catalog, &ctx.session.scratch) {
            Some(summary) => {
                let detail = format!(
                    "{} {} ₦{} -> {}",
                    summary.network, summary.plan_title, summary.amount, summary.phone
                );
                ctx.finish(FlowOutcome::Confirmed, Some(detail))?;
                ctx.persist()?;
                ctx.reply(compose::confirmation(&summary)).await?;
            }
            None => {
                let detail = format!(
                    "plan '{}' not resolvable for network '{}'",
                    ctx.session.scratch.plan().map_or("-", |p| p.id.as_str()),
                    ctx.session.scratch.network().unwrap_or("-")
                );
                tracing::warn!("session {}: {detail}; resetting", ctx.session.phone);
                ctx.finish(FlowOutcome::Failed, Some(detail))?;
                ctx.persist()?;
                ctx.reply(compose::plan_unavailable()).await?;
            }
        }
        Ok(())
    }
}
