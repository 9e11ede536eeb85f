//! Multi-armed bandit strategy selection.

pub mod arm;
pub mod selector;

pub use arm::DecisionArm;
pub use selector::{
    AlgorithmStats, FeedbackSource, MabConfig, MabSelector, Selection, SelectionAlgorithm,
    SelectionMethod, SelectionRecord, SourceStats,
};
