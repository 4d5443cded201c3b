//! Position lifecycle: multi-position management with compound exits.

pub mod costs;
pub mod exits;
pub mod manager;
pub mod position;

pub use costs::{CostModel, RMultipleBasis};
pub use manager::PositionManager;
pub use position::{ExitTrigger, OpenPosition};
