//! Run History: an immutable, timestamp-ordered ledger of suite runs, plus
//! pure comparison/trend/stability analyses over the stored records.

pub mod analysis;
pub mod record;
pub mod store;

pub use analysis::{compare, stability_scores, trends, RunComparison, SeriesPoint, StabilityClass, StabilityScore, Trends};
pub use record::{
    generate_run_id, EnvironmentDescriptor, PerTestRecord, RunHistoryEntry, RunSummary,
    SourceRevisionInfo, ValidatorSummary,
};
pub use store::{IndexEntry, RunBuilder, RunHistory};
