//! Campaign lifecycle: state transitions, simulated delivery and deferred sends.

mod dispatcher;
pub mod lifecycle;
mod scheduler;

pub use dispatcher::*;
pub use lifecycle::{check_transition, simulate_delivery, CampaignAction, TransitionError};
pub use scheduler::*;
