//! Application layer: the trading orchestrator and the order/position
//! plumbing around it.

pub mod events;
pub mod fill;
pub mod orchestrator;
pub mod reconciler;

pub use events::EngineEvent;
pub use fill::{confirm_fill, FillOutcome};
pub use orchestrator::{Engine, EngineStatus};
pub use reconciler::reconcile;
