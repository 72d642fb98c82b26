pub mod alarm;
pub mod host;
pub mod node;
pub mod role;
pub mod rpc;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use alarm::ElectionAlarm;
pub use host::Host;
pub use node::{Node, Peer};
pub use role::RoleKind;
pub use state::{LogEntry, StateController};
