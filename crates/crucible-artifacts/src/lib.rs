//! Artifact Repository: a durable, indexed store of per-run artifact
//! collections backed by an embedded SurrealDB instance, with search,
//! tagging, comparison, and export/import.

mod error;
mod migrations;
mod model;
mod repository;

pub use error::{db_err, io_err};
pub use model::{
    Artifact, ArtifactCollection, ArtifactDiff, ArtifactType, ArtifactView, Comparison,
    ComparisonSummary, ContentDiffSummary, RepositoryConfig, RepositoryStatistics, SearchFilters,
    SearchResultRow, Significance,
};
pub use repository::{ArtifactInput, ArtifactRepository, CollectionMetadata};
