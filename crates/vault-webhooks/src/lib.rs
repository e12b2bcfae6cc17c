pub mod inbound;
pub mod outbound;

pub use inbound::handle_inbound;
pub use outbound::{spawn_dispatcher_pool, OutboundEngine, OutboundEvent, OutboundQueue, WebhookConfig};
