//! Error types for meilisync-pg.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for meilisync-pg operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
        /// Source error if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Source or sink unreachable at startup
    #[error("{service} connectivity error: {message}")]
    Connectivity {
        /// Service name ("PostgreSQL" or "Meilisearch")
        service: &'static str,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// PostgreSQL query error
    #[error("PostgreSQL query error on table '{table}': {message}")]
    PostgresQuery {
        /// Table name
        table: String,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<tokio_postgres::Error>,
    },

    /// Meilisearch request error (transport or API response)
    #[error("Meilisearch error{}: {message}", .code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Meilisearch {
        /// Meilisearch error code (e.g. `index_not_found`), when the API returned one
        code: Option<String>,
        /// HTTP status, when a response was received
        status: Option<u16>,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Meilisearch task finished unsuccessfully or did not finish in time
    #[error("Meilisearch task {task_uid} {status}: {message}")]
    Task {
        /// Task uid
        task_uid: u64,
        /// Final (or last observed) status
        status: String,
        /// Meilisearch error code, if the task failed
        code: Option<String>,
        /// Error message
        message: String,
    },

    /// Index provisioning error (create/delete/metadata)
    #[error("Failed to provision index '{index}': {source}")]
    Provision {
        /// Destination index
        index: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Extraction error while paging the source table
    #[error("Extraction failed for index '{index}' after {records_synced} records: {source}")]
    Extraction {
        /// Destination index
        index: String,
        /// Records extracted before the failure
        records_synced: usize,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// A batch failed to reach the sink
    #[error("Failed to dispatch batch of {batch_size} documents to '{index}': {source}")]
    Dispatch {
        /// Destination index
        index: String,
        /// Number of documents in the batch
        batch_size: usize,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source.
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a PostgreSQL connectivity error.
    pub fn postgres_connection(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connectivity {
            service: "PostgreSQL",
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a Meilisearch connectivity error.
    pub fn meilisearch_connection(message: impl Into<String>) -> Self {
        Self::Connectivity {
            service: "Meilisearch",
            message: message.into(),
            source: None,
        }
    }

    /// Create a PostgreSQL query error.
    pub fn postgres_query(
        table: impl Into<String>,
        message: impl Into<String>,
        source: tokio_postgres::Error,
    ) -> Self {
        Self::PostgresQuery {
            table: table.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a Meilisearch transport error.
    pub fn meilisearch_request(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Meilisearch {
            code: None,
            status: source.status().map(|s| s.as_u16()),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a Meilisearch API error from a decoded error response.
    pub fn meilisearch_api(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self::Meilisearch {
            code,
            status: Some(status),
            message: message.into(),
            source: None,
        }
    }

    /// Create a serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap an error as a provisioning failure for `index`.
    pub fn provision(index: impl Into<String>, source: Error) -> Self {
        Self::Provision {
            index: index.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an error as an extraction failure for `index`.
    pub fn extraction(index: impl Into<String>, records_synced: usize, source: Error) -> Self {
        Self::Extraction {
            index: index.into(),
            records_synced,
            source: Box::new(source),
        }
    }

    /// Wrap an error as a batch dispatch failure for `index`.
    pub fn dispatch(index: impl Into<String>, batch_size: usize, source: Error) -> Self {
        Self::Dispatch {
            index: index.into(),
            batch_size,
            source: Box::new(source),
        }
    }

    /// Meilisearch error code carried by this error, looking through wrappers.
    pub fn meilisearch_code(&self) -> Option<&str> {
        match self {
            Error::Meilisearch { code, .. } | Error::Task { code, .. } => code.as_deref(),
            Error::Provision { source, .. }
            | Error::Extraction { source, .. }
            | Error::Dispatch { source, .. } => source.meilisearch_code(),
            _ => None,
        }
    }

    /// Check if this error means the index does not exist.
    pub fn is_index_not_found(&self) -> bool {
        self.meilisearch_code() == Some("index_not_found")
    }

    /// Check if this error means the index already exists.
    pub fn is_index_already_exists(&self) -> bool {
        self.meilisearch_code() == Some("index_already_exists")
    }

    /// Check if this error stops the whole process rather than a single index.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config { .. } | Error::Validation(_) | Error::Connectivity { .. }
        )
    }

    /// Records extracted before the failure, for extraction errors.
    pub fn records_synced(&self) -> Option<usize> {
        match self {
            Error::Extraction { records_synced, .. } => Some(*records_synced),
            _ => None,
        }
    }

    /// Get the error code for metrics/logging.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "CONFIG_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Connectivity { .. } => "CONNECTIVITY_ERROR",
            Error::PostgresQuery { .. } => "PG_QUERY_ERROR",
            Error::Meilisearch { .. } => "MEILI_ERROR",
            Error::Task { .. } => "MEILI_TASK_ERROR",
            Error::Provision { .. } => "PROVISION_ERROR",
            Error::Extraction { .. } => "EXTRACTION_ERROR",
            Error::Dispatch { .. } => "DISPATCH_ERROR",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}
