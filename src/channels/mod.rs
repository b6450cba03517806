pub mod compose;
pub mod console;
pub mod traits;
pub mod whatsapp;

pub use compose::OutboundMessage;
pub use traits::{Gateway, GatewayResponse};
