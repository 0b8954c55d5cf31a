// Analyzer: keyword matching and the price dedup engine.

pub mod dedup;
pub mod matcher;

pub use dedup::{RecordOutcome, qualify, record};
pub use matcher::KeywordFilter;
