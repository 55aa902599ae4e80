//! Configuration types, builders and persistence for meilisync-pg.
//!
//! The configuration document is loaded once per process and written back once
//! the run is over (or after every index, see [`PersistPolicy`]) so that cursor
//! advancement survives to the next run. YAML is the default format; a path
//! ending in `.toml` is read and written as TOML instead.

use crate::dispatch::DispatchMode;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use url::Url;
use validator::{Validate, ValidationError};

/// Default configuration path used by the CLI.
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

/// Environment variable overriding [`SyncConfig::meili_host`].
pub const ENV_MEILI_HOST: &str = "MEILISEARCH_DSN";
/// Environment variable overriding [`SyncConfig::meili_key`].
pub const ENV_MEILI_KEY: &str = "MEILISEARCH_API_KEY";
/// Environment variable overriding [`SyncConfig::postgres_dsn`].
pub const ENV_POSTGRES_DSN: &str = "DATABASE_URL";

/// Main configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_unique_destinations"))]
pub struct SyncConfig {
    /// Meilisearch base URL
    #[serde(default)]
    pub meili_host: String,

    /// Meilisearch API key
    #[serde(default)]
    pub meili_key: String,

    /// PostgreSQL connection string
    #[serde(default)]
    pub postgres_dsn: String,

    /// Indexes to synchronize, in order
    #[validate(nested)]
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,

    /// Rows per page (and per batch sent to Meilisearch)
    #[validate(range(min = 1, max = 100000))]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Dispatch batches without waiting for the previous one
    #[serde(default)]
    pub enable_async: bool,

    /// Delay between batches in sequential mode, in milliseconds
    #[serde(default)]
    pub wait_time: u64,

    /// Upper bound on in-flight batches in async mode (unbounded when unset)
    #[validate(range(min = 1))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,

    /// How long to wait for an index/settings task to finish
    #[serde(default = "default_task_timeout", with = "humantime_duration")]
    pub task_timeout: Duration,

    /// Whether failed indexes change the process exit status
    #[serde(default)]
    pub exit_policy: ExitPolicy,

    /// When updated cursors are written back
    #[serde(default)]
    pub persist: PersistPolicy,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Load configuration from a YAML or TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;

        let config = Self::parse(&content, ConfigFormat::from_path(path))
            .map_err(|e| Error::config(format!("Failed to parse {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration text in the given format without validating it.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| Error::serialization("Invalid YAML configuration", e)),
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| Error::serialization("Invalid TOML configuration", e)),
        }
    }

    /// Render configuration text in the given format.
    pub fn render(&self, format: ConfigFormat) -> Result<String> {
        match format {
            ConfigFormat::Yaml => serde_yaml::to_string(self)
                .map_err(|e| Error::serialization("Failed to render YAML configuration", e)),
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| Error::serialization("Failed to render TOML configuration", e)),
        }
    }

    /// Write the configuration back to `path`.
    ///
    /// The document is written to a temporary file in the same directory and
    /// renamed over the target, so readers never observe a half-written file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let rendered = self.render(ConfigFormat::from_path(path))?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(rendered.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)
            .map_err(|e| Error::validation(format!("Config validation failed: {}", e)))
    }

    /// Resolve endpoints, preferring process environment over the file.
    pub fn endpoints(&self) -> Result<Endpoints> {
        self.endpoints_from(|key| std::env::var(key).ok())
    }

    /// Resolve endpoints using `lookup` for environment overrides.
    ///
    /// Overrides are never copied into the configuration itself, so they are
    /// not persisted by [`SyncConfig::save`].
    pub fn endpoints_from<F>(&self, lookup: F) -> Result<Endpoints>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |key: &str, fallback: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };

        let meili_host = pick(ENV_MEILI_HOST, &self.meili_host);
        let meili_key = pick(ENV_MEILI_KEY, &self.meili_key);
        let postgres_dsn = pick(ENV_POSTGRES_DSN, &self.postgres_dsn);

        if meili_host.is_empty() {
            return Err(Error::config(format!(
                "meili_host not configured and {} not set",
                ENV_MEILI_HOST
            )));
        }
        Url::parse(&meili_host)
            .map_err(|e| Error::config(format!("Invalid Meilisearch URL: {}", e)))?;

        if postgres_dsn.is_empty() {
            return Err(Error::config(format!(
                "postgres_dsn not configured and {} not set",
                ENV_POSTGRES_DSN
            )));
        }

        Ok(Endpoints {
            meili_host,
            meili_key: (!meili_key.is_empty()).then_some(meili_key),
            postgres_dsn,
        })
    }

    /// Dispatch mode derived from `enable_async`, `wait_time` and `max_in_flight`.
    pub fn dispatch_mode(&self) -> DispatchMode {
        if self.enable_async {
            DispatchMode::Concurrent {
                max_in_flight: self.max_in_flight,
            }
        } else {
            DispatchMode::Sequential {
                delay: Duration::from_millis(self.wait_time),
            }
        }
    }

    /// Find an index by destination name.
    pub fn index(&self, destination: &str) -> Option<&IndexConfig> {
        self.indexes.iter().find(|i| i.destination == destination)
    }
}

/// Connection settings resolved from the configuration and environment.
#[derive(Clone)]
pub struct Endpoints {
    /// Meilisearch base URL
    pub meili_host: String,
    /// Meilisearch API key, if any
    pub meili_key: Option<String>,
    /// PostgreSQL connection string
    pub postgres_dsn: String,
}

impl std::fmt::Debug for Endpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoints")
            .field("meili_host", &self.meili_host)
            .field("meili_key", &self.meili_key.as_ref().map(|_| "***"))
            .field("postgres_dsn", &crate::postgres::mask_url(&self.postgres_dsn))
            .finish()
    }
}

/// On-disk configuration format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML (default)
    Yaml,
    /// TOML
    Toml,
}

impl ConfigFormat {
    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// Per-index configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct IndexConfig {
    /// Source table in PostgreSQL
    #[validate(length(min = 1, max = 128), custom(function = "validate_identifier"))]
    pub source: String,

    /// Destination index uid in Meilisearch
    #[validate(length(min = 1, max = 400), custom(function = "validate_index_uid"))]
    pub destination: String,

    /// Primary key column; also the pagination order
    #[validate(length(min = 1, max = 128), custom(function = "validate_identifier"))]
    pub primary: String,

    /// Searchable attributes, in ranking order
    #[serde(default)]
    pub searchable: Vec<String>,

    /// Filterable attributes
    #[serde(default)]
    pub filterable: Vec<String>,

    /// Sortable attributes
    #[serde(default)]
    pub sortable: Vec<String>,

    /// Incremental cursor
    #[validate(nested)]
    #[serde(default)]
    pub cursor: Cursor,
}

impl IndexConfig {
    /// Create a builder.
    pub fn builder() -> IndexConfigBuilder {
        IndexConfigBuilder::default()
    }

    /// Primary key as it appears in documents: the column name with any SQL
    /// quoting removed.
    pub fn document_key(&self) -> String {
        unquote_identifier(&self.primary)
    }
}

/// Watermark for incremental synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Cursor {
    /// Watermark column; empty disables incremental tracking
    #[validate(custom(function = "validate_cursor_column"))]
    #[serde(default)]
    pub column: String,

    /// Completion time of the last successful sync; `None` is the zero time
    #[serde(
        default,
        with = "last_sync_format",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_sync: Option<DateTime<Utc>>,
}

impl Cursor {
    /// Cursor tracking `column`, starting from the zero time.
    pub fn on(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            last_sync: None,
        }
    }

    /// Whether incremental tracking is configured.
    pub fn is_enabled(&self) -> bool {
        !self.column.is_empty()
    }
}

/// Exit status policy for per-index failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExitPolicy {
    /// Failed indexes are logged; the process still exits successfully
    #[default]
    Lenient,
    /// Any failed index makes the process exit non-zero
    Strict,
}

/// When updated cursors are written back to the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersistPolicy {
    /// Once, after every index has been attempted
    #[default]
    EndOfRun,
    /// After each index that completes successfully
    PerIndex,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format (default)
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Builder for IndexConfig.
#[derive(Debug, Default)]
pub struct IndexConfigBuilder {
    source: Option<String>,
    destination: Option<String>,
    primary: Option<String>,
    searchable: Vec<String>,
    filterable: Vec<String>,
    sortable: Vec<String>,
    cursor: Cursor,
}

impl IndexConfigBuilder {
    /// Set source table name.
    pub fn source(mut self, name: impl Into<String>) -> Self {
        self.source = Some(name.into());
        self
    }

    /// Set destination index uid.
    pub fn destination(mut self, name: impl Into<String>) -> Self {
        self.destination = Some(name.into());
        self
    }

    /// Set primary key column.
    pub fn primary(mut self, col: impl Into<String>) -> Self {
        self.primary = Some(col.into());
        self
    }

    /// Set searchable attributes.
    pub fn searchable(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.searchable = cols.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Set filterable attributes.
    pub fn filterable(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filterable = cols.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Set sortable attributes.
    pub fn sortable(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sortable = cols.into_iter().map(|c| c.into()).collect();
        self
    }

    /// Set cursor column.
    pub fn cursor_column(mut self, col: impl Into<String>) -> Self {
        self.cursor.column = col.into();
        self
    }

    /// Set last sync time.
    pub fn last_sync(mut self, ts: DateTime<Utc>) -> Self {
        self.cursor.last_sync = Some(ts);
        self
    }

    /// Build the IndexConfig.
    pub fn build(self) -> Result<IndexConfig> {
        let source = self
            .source
            .ok_or_else(|| Error::config("source required"))?;
        let destination = self.destination.unwrap_or_else(|| source.clone());
        let primary = self.primary.unwrap_or_else(default_primary);

        let index = IndexConfig {
            source,
            destination,
            primary,
            searchable: self.searchable,
            filterable: self.filterable,
            sortable: self.sortable,
            cursor: self.cursor,
        };

        Validate::validate(&index)
            .map_err(|e| Error::validation(format!("Index validation failed: {}", e)))?;
        Ok(index)
    }
}

/// Builder for SyncConfig.
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    meili_host: Option<String>,
    meili_key: Option<String>,
    postgres_dsn: Option<String>,
    batch_size: Option<usize>,
    enable_async: bool,
    wait_time: u64,
    max_in_flight: Option<usize>,
    task_timeout: Option<Duration>,
    exit_policy: ExitPolicy,
    persist: PersistPolicy,
    indexes: Vec<IndexConfig>,
}

impl SyncConfigBuilder {
    /// Set Meilisearch URL.
    pub fn meili_host(mut self, url: impl Into<String>) -> Self {
        self.meili_host = Some(url.into());
        self
    }

    /// Set Meilisearch API key.
    pub fn meili_key(mut self, key: impl Into<String>) -> Self {
        self.meili_key = Some(key.into());
        self
    }

    /// Set PostgreSQL connection string.
    pub fn postgres_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.postgres_dsn = Some(dsn.into());
        self
    }

    /// Set page/batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Dispatch batches concurrently.
    pub fn enable_async(mut self, enabled: bool) -> Self {
        self.enable_async = enabled;
        self
    }

    /// Set the sequential inter-batch delay in milliseconds.
    pub fn wait_time(mut self, ms: u64) -> Self {
        self.wait_time = ms;
        self
    }

    /// Bound in-flight batches in async mode.
    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    /// Set the Meilisearch task timeout.
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Set the exit policy.
    pub fn exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.exit_policy = policy;
        self
    }

    /// Set the persistence policy.
    pub fn persist(mut self, policy: PersistPolicy) -> Self {
        self.persist = policy;
        self
    }

    /// Add an index.
    pub fn index(mut self, index: IndexConfig) -> Self {
        self.indexes.push(index);
        self
    }

    /// Build the SyncConfig.
    pub fn build(self) -> Result<SyncConfig> {
        let config = SyncConfig {
            meili_host: self.meili_host.unwrap_or_default(),
            meili_key: self.meili_key.unwrap_or_default(),
            postgres_dsn: self.postgres_dsn.unwrap_or_default(),
            indexes: self.indexes,
            batch_size: self.batch_size.unwrap_or_else(default_batch_size),
            enable_async: self.enable_async,
            wait_time: self.wait_time,
            max_in_flight: self.max_in_flight,
            task_timeout: self.task_timeout.unwrap_or_else(default_task_timeout),
            exit_policy: self.exit_policy,
            persist: self.persist,
            logging: LoggingConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }
}

// Defaults
fn default_batch_size() -> usize {
    1000
}
fn default_primary() -> String {
    "id".into()
}
fn default_task_timeout() -> Duration {
    Duration::from_secs(120)
}
fn default_log_level() -> String {
    "info".into()
}

// Validators

/// Accepts `name`, `schema.name` and double-quoted segments such as
/// `"User"."updatedAt"`. Unquoted segments are `[A-Za-z_][A-Za-z0-9_]*`;
/// quoted ones are non-empty with embedded quotes doubled.
fn validate_identifier(value: &str) -> std::result::Result<(), ValidationError> {
    if is_identifier(value) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_identifier"))
    }
}

fn is_identifier(value: &str) -> bool {
    let mut rest = value;
    loop {
        let len = match rest.strip_prefix('"') {
            Some(quoted) => match quoted_segment_len(quoted) {
                Some(len) => len + 1,
                None => return false,
            },
            None => match plain_segment_len(rest) {
                Some(len) => len,
                None => return false,
            },
        };
        rest = &rest[len..];
        if rest.is_empty() {
            return true;
        }
        match rest.strip_prefix('.') {
            Some(next) => rest = next,
            None => return false,
        }
    }
}

/// Length of a quoted segment body including its closing quote.
fn quoted_segment_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' if bytes.get(i + 1) == Some(&b'"') => i += 2,
            b'"' if i > 0 => return Some(i + 1),
            b'"' | b'\0' => return None,
            _ => i += 1,
        }
    }
    None
}

fn plain_segment_len(s: &str) -> Option<usize> {
    let len = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    match s.chars().next() {
        Some(c) if len > 0 && (c.is_ascii_alphabetic() || c == '_') => Some(len),
        _ => None,
    }
}

/// Strip SQL quoting from a single identifier: `"userId"` becomes `userId`.
fn unquote_identifier(value: &str) -> String {
    match value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        Some(inner) if !inner.is_empty() => inner.replace("\"\"", "\""),
        _ => value.to_string(),
    }
}

fn validate_cursor_column(value: &str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(());
    }
    validate_identifier(value)
}

fn validate_index_uid(value: &str) -> std::result::Result<(), ValidationError> {
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_index_uid"))
    }
}

fn validate_unique_destinations(config: &SyncConfig) -> std::result::Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for index in &config.indexes {
        if !seen.insert(index.destination.as_str()) {
            return Err(ValidationError::new("duplicate_destination"));
        }
    }
    Ok(())
}

/// Serde adapter for `last_sync`.
///
/// Timestamps at or before `0001-01-01T00:00:00Z` are the zero time and load
/// as `None`.
mod last_sync_format {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    const ZERO_TIME_UNIX: i64 = -62_135_596_800;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        let Some(raw) = raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };

        let ts = DateTime::parse_from_rfc3339(&raw)
            .map_err(de::Error::custom)?
            .with_timezone(&Utc);

        Ok((ts.timestamp() > ZERO_TIME_UNIX).then_some(ts))
    }
}

/// Serde adapter for humantime durations such as `"90s"` or `"2m"`.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(de::Error::custom)
    }
}
