//! Reasoning paths: the strategy model and the candidate generator.

pub mod generator;
pub mod types;

pub use generator::{PathGenerator, DEFAULT_MAX_PATHS};
pub use types::{
    normalize_path_type, LearningSource, PathProvenance, ReasoningPath, SourceRecord,
    UpdateRecord, ValidationRecord, ValidationStatus, CREATIVE_DETOUR, STRATEGY_VOCABULARY,
};
