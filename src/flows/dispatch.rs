use super::catalog::PlanCatalog;
use super::db::SessionStore;
use super::handlers::{default_handlers, FlowContext, MainMenuHandler, StateHandler};
use super::types::{InboundMessage, Session, State};
use crate::channels::traits::Gateway;
use crate::observability::Metrics;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_SUPPORT_TEXT: &str = "Need help? Reply here and an agent will get back to you.";

/// Routes each inbound message to the handler for the sender's current state.
///
/// The registry is built once and never changes. States without a handler
/// are served by the main-menu handler, which restarts the conversation.
pub struct Dispatcher {
    handlers: HashMap<State, Arc<dyn StateHandler>>,
    fallback: Arc<dyn StateHandler>,
    catalog: Arc<PlanCatalog>,
    store: Arc<dyn SessionStore>,
    gateway: Arc<dyn Gateway>,
    metrics: Arc<Metrics>,
    support_text: String,
}

impl Dispatcher {
    pub fn new(
        catalog: Arc<PlanCatalog>,
        store: Arc<dyn SessionStore>,
        gateway: Arc<dyn Gateway>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self::with_handlers(catalog, store, gateway, metrics, default_handlers())
    }

    pub fn with_handlers(
        catalog: Arc<PlanCatalog>,
        store: Arc<dyn SessionStore>,
        gateway: Arc<dyn Gateway>,
        metrics: Arc<Metrics>,
        handlers: Vec<Arc<dyn StateHandler>>,
    ) -> Self {
        let mut registry = HashMap::new();
        for handler in handlers {
            let state = handler.state();
            if registry.insert(state, handler).is_some() {
                tracing::warn!("handler for {state} registered twice; keeping the last one");
            }
        }
        let fallback = registry
            .get(&State::MainMenu)
            .cloned()
            .unwrap_or_else(|| Arc::new(MainMenuHandler) as Arc<dyn StateHandler>);
        Self {
            handlers: registry,
            fallback,
            catalog,
            store,
            gateway,
            metrics,
            support_text: DEFAULT_SUPPORT_TEXT.to_string(),
        }
    }

    pub fn with_support_text(mut self, text: impl Into<String>) -> Self {
        self.support_text = text.into();
        self
    }

    /// The handler that serves `state`. Total over every state.
    pub fn handler_for(&self, state: State) -> &dyn StateHandler {
        self.handlers
            .get(&state)
            .unwrap_or(&self.fallback)
            .as_ref()
    }

    pub fn is_registered(&self, state: State) -> bool {
        self.handlers.contains_key(&state)
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn gateway(&self) -> &dyn Gateway {
        self.gateway.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Process one message from `phone`.
    ///
    /// Messages from the same phone are handled one at a time; different
    /// phones proceed concurrently.
    pub async fn dispatch(&self, phone: &str, message: &InboundMessage) -> anyhow::Result<Session> {
        let lock = self.store.phone_lock(phone);
        let _guard = lock.lock().await;

        let mut session = self.store.get_or_create(phone)?;
        let correlation_id = uuid::Uuid::new_v4();
        let state = session.state;
        self.metrics.record_inbound(state.as_str(), message.kind());

        let handler = self.handler_for(state);
        tracing::debug!(
            %correlation_id,
            "dispatch {} from {phone} in {state} to {} handler",
            message.kind(),
            handler.state()
        );

        let mut ctx = FlowContext {
            session: &mut session,
            message,
            catalog: &self.catalog,
            store: self.store.as_ref(),
            gateway: self.gateway.as_ref(),
            metrics: &self.metrics,
            support_text: &self.support_text,
        };
        if let Err(e) = handler.handle(&mut ctx).await {
            tracing::error!(%correlation_id, "handling message from {phone} in {state} failed: {e:#}");
            return Err(e);
        }
        Ok(session)
    }
}
