use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus counters for the conversation engine.
pub struct Metrics {
    registry: Registry,
    inbound: IntCounterVec,
    transitions: IntCounterVec,
    outbound: IntCounterVec,
    outcomes: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let inbound = IntCounterVec::new(
            Opts::new(
                "vendbot_inbound_messages_total",
                "Inbound messages by session state at arrival",
            ),
            &["state", "kind"],
        )?;
        let transitions = IntCounterVec::new(
            Opts::new(
                "vendbot_state_transitions_total",
                "Session state changes",
            ),
            &["from", "to"],
        )?;
        let outbound = IntCounterVec::new(
            Opts::new(
                "vendbot_outbound_messages_total",
                "Outbound messages by shape and delivery status",
            ),
            &["kind", "status"],
        )?;
        let outcomes = IntCounterVec::new(
            Opts::new("vendbot_flow_outcomes_total", "Finished flows by outcome"),
            &["flow", "outcome"],
        )?;

        registry.register(Box::new(inbound.clone()))?;
        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(outbound.clone()))?;
        registry.register(Box::new(outcomes.clone()))?;

        Ok(Self {
            registry,
            inbound,
            transitions,
            outbound,
            outcomes,
        })
    }

    pub fn record_inbound(&self, state: &str, kind: &str) {
        self.inbound.with_label_values(&[state, kind]).inc();
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        self.transitions.with_label_values(&[from, to]).inc();
    }

    /// `status` is `ok`, `rejected` or `error`.
    pub fn record_outbound(&self, kind: &str, status: &str) {
        self.outbound.with_label_values(&[kind, status]).inc();
    }

    pub fn record_outcome(&self, flow: &str, outcome: &str) {
        self.outcomes.with_label_values(&[flow, outcome]).inc();
    }

    /// Text exposition format for `/metrics`.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_inbound("MAIN_MENU", "text");
        metrics.record_transition("MAIN_MENU", "SELECTING_NETWORK");
        metrics.record_outbound("list", "ok");
        metrics.record_outcome("data", "confirmed");

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"vendbot_inbound_messages_total{kind="text",state="MAIN_MENU"} 1"#));
        assert!(text.contains("vendbot_state_transitions_total"));
        assert!(text.contains(r#"vendbot_outbound_messages_total{kind="list",status="ok"} 1"#));
        assert!(text.contains(r#"vendbot_flow_outcomes_total{flow="data",outcome="confirmed"} 1"#));
    }

    #[test]
    fn separate_instances_do_not_share_counts() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_outbound("text", "ok");
        assert!(!b.render().unwrap().contains("vendbot_outbound_messages_total{"));
    }
}
