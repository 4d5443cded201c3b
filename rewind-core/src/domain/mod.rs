//! Domain types shared across the engine.

pub mod bar;
pub mod candidate;
pub mod events;
pub mod ids;
pub mod position;

pub use bar::{Bar, BarError};
pub use candidate::{Candidate, Direction, ExitSpec, ExitSpecError};
pub use events::{DecisionEvent, OutcomeLabel};
pub use ids::{feature_fingerprint, CandidateId, PositionId, RunId};
pub use position::{ClosureEvent, ExitReason, PositionRow};
