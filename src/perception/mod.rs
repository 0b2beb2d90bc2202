//! Perception loop
//!
//! Pulls frames from a `FrameSource`, classifies each into at most one
//! gesture label, stabilises labels through the vote aggregator and turns
//! decisions into gateway commands.

mod pipeline;
mod source;

pub use pipeline::{PerceptionLoop, PerceptionStats};
pub use source::{LabelClassifier, LineSource};
