//! Feature computation: incremental pipeline, snapshots, bucketing.

pub mod bucketing;
pub mod pipeline;
pub mod snapshot;

pub use pipeline::FeaturePipeline;
pub use snapshot::{FeatureSnapshot, SENTINEL};
