//! Placement-aware conversion passes.

pub mod analysis;
mod eliminate_conversion;
mod insert_conversion;

pub use analysis::{EdgeSink, Mismatch, MismatchAnalyzer, MismatchPlan, Retype};
pub use eliminate_conversion::EliminateRedundantConversionPass;
pub use insert_conversion::InsertConversionPass;
