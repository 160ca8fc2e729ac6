//! Primary/standby switchover

mod coordinator;
mod state;

pub use coordinator::{SwitchoverCoordinator, SwitchoverReport, SwitchoverRequest, SwitchoverTimeouts};
pub use state::SwitchoverState;
