use thiserror::Error;

use crate::access::{Capability, Role};

#[derive(Error, Debug)]
pub enum RdpError {
    #[error("candidate {0} already exists")]
    DuplicateKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("role {role} is not allowed to {capability}")]
    Forbidden { role: Role, capability: Capability },

    #[error("import aborted after {inserted} rows: {source}")]
    ImportAborted {
        inserted: usize,
        #[source]
        source: Box<RdpError>,
    },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("schema error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RdpError>;
