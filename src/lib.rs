//! WhatsApp data and airtime vending bot.
//!
//! Each phone number owns a session in one of a fixed set of states. Inbound
//! webhook messages are routed to the handler for that state, which updates
//! the session, persists it, and replies through the gateway.

pub mod channels;
pub mod config;
pub mod flows;
pub mod observability;
pub mod webhook;
