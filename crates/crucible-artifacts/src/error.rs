//! Error mapping helpers from SurrealDB into the shared error taxonomy.

use crucible_core::CrucibleError;

pub fn db_err(err: surrealdb::Error) -> CrucibleError {
    CrucibleError::resource(format!("artifact repository query failed: {err}"), true)
}

pub fn io_err(err: std::io::Error) -> CrucibleError {
    CrucibleError::resource(format!("artifact repository I/O failed: {err}"), true)
}
