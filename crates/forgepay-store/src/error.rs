use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// A compare-and-set status update found a different current status.
    #[error("{entity} {id} is no longer {expected}")]
    StaleStatus {
        entity: &'static str,
        id: String,
        expected: String,
    },

    #[error("corrupt {entity} row: {detail}")]
    Corrupt { entity: &'static str, detail: String },

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("{0}")]
    Other(String),
}
