use super::compose::OutboundMessage;
use super::traits::{Gateway, GatewayResponse};
use crate::flows::types::InboundMessage;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// Render a message as plain text for a terminal.
pub fn render(message: &OutboundMessage) -> String {
    let mut out = String::new();
    match message {
        OutboundMessage::Text { body } => out.push_str(body),
        OutboundMessage::Buttons { body_text, buttons } => {
            out.push_str(body_text);
            for b in buttons {
                out.push_str(&format!("\n  [{}] {}", b.id, b.title));
            }
        }
        OutboundMessage::List {
            header,
            body_text,
            button_label,
            sections,
        } => {
            if !header.is_empty() {
                out.push_str(&format!("== {header} ==\n"));
            }
            out.push_str(body_text);
            out.push_str(&format!("\n({button_label})"));
            for s in sections {
                out.push_str(&format!("\n-- {} --", s.title));
                for r in &s.rows {
                    out.push_str(&format!("\n  [{}] {}", r.id, r.title));
                    if let Some(ref d) = r.description {
                        out.push_str(&format!(" ({d})"));
                    }
                }
            }
        }
    }
    out
}

/// One typed line in the local chat REPL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Message(InboundMessage),
    Quit,
    /// Blank line or a malformed command; carries a usage hint when there is one.
    Skip(Option<&'static str>),
}

/// `/button <id>` and `/list <id> [title]` stand in for interactive replies;
/// anything else is free text.
pub fn parse_console_line(line: &str) -> ConsoleInput {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return ConsoleInput::Skip(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return ConsoleInput::Message(InboundMessage::text(line));
    };
    let mut parts = command.splitn(3, ' ');
    match parts.next().unwrap_or_default() {
        "quit" | "exit" => ConsoleInput::Quit,
        "button" => match parts.next().filter(|id| !id.is_empty()) {
            Some(id) => ConsoleInput::Message(InboundMessage::button(id)),
            None => ConsoleInput::Skip(Some("usage: /button <id>")),
        },
        "list" => match parts.next().filter(|id| !id.is_empty()) {
            Some(id) => {
                let title = parts.next().map(str::trim).unwrap_or(id);
                ConsoleInput::Message(InboundMessage::list(id, title))
            }
            None => ConsoleInput::Skip(Some("usage: /list <id> [title]")),
        },
        _ => ConsoleInput::Message(InboundMessage::text(line)),
    }
}

/// Writes every outbound message to stdout. Used by `vendbot chat`.
pub struct ConsoleGateway;

#[async_trait]
impl Gateway for ConsoleGateway {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(
        &self,
        phone: &str,
        message: &OutboundMessage,
    ) -> anyhow::Result<GatewayResponse> {
        let text = format!("\n[bot -> {phone}]\n{}\n", render(message));
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
        Ok(GatewayResponse {
            ok: true,
            raw: serde_json::to_value(message)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum SendOutcome {
    #[default]
    Accept,
    Reject,
    Fail,
}

/// Keeps every message in memory instead of delivering it.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(String, OutboundMessage)>>,
    outcome: SendOutcome,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_outcome(outcome: SendOutcome) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            outcome,
        }
    }

    /// A gateway whose sends are all refused by the "platform".
    pub fn rejecting() -> Self {
        Self::with_outcome(SendOutcome::Reject)
    }

    /// A gateway whose transport fails on every send. Nothing is recorded.
    pub fn erroring() -> Self {
        Self::with_outcome(SendOutcome::Fail)
    }

    pub fn sent(&self) -> Vec<(String, OutboundMessage)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<(String, OutboundMessage)> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(
        &self,
        phone: &str,
        message: &OutboundMessage,
    ) -> anyhow::Result<GatewayResponse> {
        if self.outcome == SendOutcome::Fail {
            anyhow::bail!("connection to gateway refused while sending to {phone}");
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((phone.to_string(), message.clone()));
        Ok(GatewayResponse {
            ok: self.outcome == SendOutcome::Accept,
            raw: serde_json::json!({ "recorded": true }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::compose;

    #[test]
    fn render_buttons() {
        let out = render(&compose::main_menu().unwrap());
        assert!(out.starts_with("Welcome!"));
        assert!(out.contains("[buy_data] Buy Data"));
        assert!(out.contains("[support] Support"));
    }

    #[test]
    fn render_list() {
        let catalog = crate::flows::catalog::PlanCatalog::builtin().unwrap();
        let out = render(&compose::plan_list(&catalog, "airtel").unwrap());
        assert!(out.starts_with("== AIRTEL Data Plans =="));
        assert!(out.contains("[plan_1000] ₦1000 - 3GB (Valid for 30 days)"));
    }

    #[test]
    fn console_lines() {
        assert_eq!(
            parse_console_line("hi\n"),
            ConsoleInput::Message(InboundMessage::text("hi"))
        );
        assert_eq!(
            parse_console_line("/button buy_data"),
            ConsoleInput::Message(InboundMessage::button("buy_data"))
        );
        assert_eq!(
            parse_console_line("/list plan_500 ₦500 - 1GB"),
            ConsoleInput::Message(InboundMessage::list("plan_500", "₦500 - 1GB"))
        );
        assert_eq!(
            parse_console_line("/list mtn"),
            ConsoleInput::Message(InboundMessage::list("mtn", "mtn"))
        );
        assert_eq!(parse_console_line("/quit"), ConsoleInput::Quit);
        assert_eq!(parse_console_line("   "), ConsoleInput::Skip(None));
        assert!(matches!(parse_console_line("/button"), ConsoleInput::Skip(Some(_))));
        // Unknown slash commands go through as text.
        assert_eq!(
            parse_console_line("/help"),
            ConsoleInput::Message(InboundMessage::text("/help"))
        );
    }

    #[tokio::test]
    async fn recording_gateway_take_drains() {
        let gw = RecordingGateway::new();
        let resp = gw.send("p1", &compose::text("one")).await.unwrap();
        assert!(resp.ok);
        gw.send("p1", &compose::text("two")).await.unwrap();
        assert_eq!(gw.take().len(), 2);
        assert!(gw.sent().is_empty());
    }

    #[tokio::test]
    async fn rejecting_gateway_reports_not_ok() {
        let gw = RecordingGateway::rejecting();
        let resp = gw.send("p1", &compose::text("one")).await.unwrap();
        assert!(!resp.ok);
        assert_eq!(gw.sent().len(), 1);
    }

    #[tokio::test]
    async fn erroring_gateway_fails_the_send() {
        let gw = RecordingGateway::erroring();
        let err = gw.send("p1", &compose::text("one")).await.unwrap_err();
        assert!(err.to_string().contains("p1"));
        assert!(gw.sent().is_empty());
    }
}
