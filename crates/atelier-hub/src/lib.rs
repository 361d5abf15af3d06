pub mod hub;
pub mod ws;

pub use hub::{EventKind, Hub, HubMessage};
pub use ws::hub_routes;
