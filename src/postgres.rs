//! PostgreSQL client and row source for meilisync-pg.

use crate::document::{Batch, Document};
use crate::error::{Error, Result};
use crate::source::{PageQuery, RowSource};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value as JsonValue;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, Error as PgError, Row, Statement};
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[cfg(feature = "tls-native")]
use native_tls::TlsConnector;
#[cfg(feature = "tls-native")]
use postgres_native_tls::MakeTlsConnector;

/// PostgreSQL client wrapper.
pub struct PostgresClient {
    client: Client,
}

impl PostgresClient {
    /// Connect to PostgreSQL.
    #[instrument(skip(dsn), fields(url = %mask_url(dsn)))]
    pub async fn connect(dsn: &str) -> Result<Self> {
        info!("Connecting to PostgreSQL...");

        #[cfg(feature = "tls-native")]
        let (client, connection) = {
            let connector = TlsConnector::builder()
                .build()
                .map_err(|e| Error::postgres_connection("TLS setup failed", e))?;
            let connector = MakeTlsConnector::new(connector);
            tokio_postgres::connect(dsn, connector)
                .await
                .map_err(|e| Error::postgres_connection("Failed to connect", e))?
        };

        #[cfg(not(feature = "tls-native"))]
        let (client, connection) = {
            tokio_postgres::connect(dsn, tokio_postgres::NoTls)
                .await
                .map_err(|e| Error::postgres_connection("Failed to connect", e))?
        };

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        info!("Connected to PostgreSQL");
        Ok(Self { client })
    }

    /// Test connectivity.
    pub async fn ping(&self) -> Result<()> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| Error::postgres_connection("Ping failed", e))?;
        Ok(())
    }

    async fn prepare(&self, table: &str, sql: &str) -> Result<Statement> {
        self.client
            .prepare(sql)
            .await
            .map_err(|e| Error::postgres_query(table, "Failed to prepare page query", e))
    }
}

#[async_trait]
impl RowSource for PostgresClient {
    #[instrument(skip(self), fields(table = %query.table, offset = query.offset))]
    async fn fetch_page(&self, query: &PageQuery) -> Result<Batch> {
        let sql = query.to_sql();
        debug!("Executing query: {}", sql);

        let mut statement = self.prepare(&query.table, &sql).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| (c.name(), c.type_()));
        if let Some(select) = projection(columns) {
            let sql = query.to_sql_selecting(&select);
            debug!("Re-preparing with JSON casts: {}", sql);
            statement = self.prepare(&query.table, &sql).await?;
        }

        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(ref w) = query.watermark {
            params.push(&w.after);
        }

        let rows = self
            .client
            .query(&statement, &params)
            .await
            .map_err(|e| Error::postgres_query(&query.table, "Page query failed", e))?;

        let batch = rows
            .iter()
            .map(row_to_document)
            .collect::<std::result::Result<Batch, _>>()
            .map_err(|e| Error::postgres_query(&query.table, "Failed to convert row", e))?;
        debug!("Fetched {} rows from {}", batch.len(), query.table);
        Ok(batch)
    }
}

/// Built-in types converted directly from the wire format.
const NATIVE_TYPES: &[&str] = &[
    "bool", "int2", "int4", "int8", "oid", "float4", "float8", "numeric", "text", "varchar",
    "name", "bpchar", "date", "time", "timestamp", "timestamptz", "uuid", "json", "jsonb",
    "bytea", "_bool", "_int2", "_int4", "_int8", "_float4", "_float8", "_numeric", "_text",
    "_varchar", "_bpchar", "_uuid", "_date", "_timestamp", "_timestamptz", "_jsonb",
];

fn is_native(ty: &Type) -> bool {
    ty.schema() == "pg_catalog" && NATIVE_TYPES.contains(&ty.name())
}

/// Select list that routes every non-native column (enums, domains,
/// intervals, network types, composites, ...) through `to_jsonb`. `None` when
/// `SELECT *` already yields only native columns.
fn projection<'c>(columns: impl IntoIterator<Item = (&'c str, &'c Type)>) -> Option<String> {
    let mut cast = false;
    let select: Vec<String> = columns
        .into_iter()
        .map(|(name, ty)| {
            let quoted = quote_ident(name);
            if is_native(ty) {
                quoted
            } else {
                cast = true;
                format!("to_jsonb({q}) AS {q}", q = quoted)
            }
        })
        .collect();

    cast.then(|| select.join(", "))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Convert a PostgreSQL row to a document.
fn row_to_document(row: &Row) -> std::result::Result<Document, PgError> {
    let mut map = Document::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = column_value(row, i, column.type_())?;
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

fn column_value(row: &Row, i: usize, ty: &Type) -> std::result::Result<JsonValue, PgError> {
    let value = match ty.name() {
        "bool" => scalar(row, i, JsonValue::Bool)?,
        "int2" => scalar(row, i, |v: i16| JsonValue::from(v))?,
        "int4" => scalar(row, i, |v: i32| JsonValue::from(v))?,
        "int8" => scalar(row, i, |v: i64| JsonValue::from(v))?,
        "oid" => scalar(row, i, |v: u32| JsonValue::from(v))?,
        "float4" => scalar(row, i, |v: f32| float_to_json(v as f64))?,
        "float8" => scalar(row, i, float_to_json)?,
        "numeric" => scalar(row, i, decimal_to_json)?,
        "date" => scalar(row, i, |d: NaiveDate| JsonValue::String(d.to_string()))?,
        "time" => scalar(row, i, |t: NaiveTime| JsonValue::String(t.to_string()))?,
        "timestamp" => scalar(row, i, naive_timestamp_to_json)?,
        "timestamptz" => scalar(row, i, timestamp_to_json)?,
        "uuid" => scalar(row, i, |u: Uuid| JsonValue::String(u.to_string()))?,
        "json" | "jsonb" => scalar(row, i, |v: JsonValue| v)?,
        "bytea" => scalar(row, i, |b: Vec<u8>| JsonValue::String(bytea_to_hex(&b)))?,
        "_bool" => array(row, i, JsonValue::Bool)?,
        "_int2" => array(row, i, |v: i16| JsonValue::from(v))?,
        "_int4" => array(row, i, |v: i32| JsonValue::from(v))?,
        "_int8" => array(row, i, |v: i64| JsonValue::from(v))?,
        "_float4" => array(row, i, |v: f32| float_to_json(v as f64))?,
        "_float8" => array(row, i, float_to_json)?,
        "_numeric" => array(row, i, decimal_to_json)?,
        "_text" | "_varchar" | "_bpchar" => array(row, i, JsonValue::String)?,
        "_uuid" => array(row, i, |u: Uuid| JsonValue::String(u.to_string()))?,
        "_date" => array(row, i, |d: NaiveDate| JsonValue::String(d.to_string()))?,
        "_timestamp" => array(row, i, naive_timestamp_to_json)?,
        "_timestamptz" => array(row, i, timestamp_to_json)?,
        "_jsonb" => array(row, i, |v: JsonValue| v)?,
        // text-like types; anything else fails the conversion
        _ => scalar(row, i, JsonValue::String)?,
    };
    Ok(value.unwrap_or(JsonValue::Null))
}

fn scalar<'a, T, F>(row: &'a Row, i: usize, convert: F) -> std::result::Result<Option<JsonValue>, PgError>
where
    T: FromSql<'a>,
    F: Fn(T) -> JsonValue,
{
    Ok(row.try_get::<_, Option<T>>(i)?.map(convert))
}

fn array<'a, T, F>(row: &'a Row, i: usize, convert: F) -> std::result::Result<Option<JsonValue>, PgError>
where
    T: FromSql<'a>,
    F: Fn(T) -> JsonValue,
{
    Ok(row.try_get::<_, Option<Vec<Option<T>>>>(i)?.map(|items| {
        JsonValue::Array(
            items
                .into_iter()
                .map(|v| v.map(&convert).unwrap_or(JsonValue::Null))
                .collect(),
        )
    }))
}

fn float_to_json(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

fn naive_timestamp_to_json(value: NaiveDateTime) -> JsonValue {
    JsonValue::String(value.and_utc().to_rfc3339())
}

fn timestamp_to_json(value: DateTime<Utc>) -> JsonValue {
    JsonValue::String(value.to_rfc3339())
}

/// `bytea` in PostgreSQL's hex output format.
fn bytea_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// NUMERIC values become JSON numbers when an `f64` holds them exactly,
/// strings otherwise.
fn decimal_to_json(value: Decimal) -> JsonValue {
    let normalized = value.normalize();
    let text = normalized.to_string();
    normalized
        .to_f64()
        .filter(|f| f.to_string() == text)
        .and_then(serde_json::Number::from_f64)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::String(text))
}

/// Mask sensitive parts of URL for logging.
pub fn mask_url(url: &str) -> String {
    if let Ok(mut parsed) = url::Url::parse(url) {
        if parsed.password().is_some() {
            let _ = parsed.set_password(Some("***"));
        }
        parsed.to_string()
    } else {
        "[invalid url]".to_string()
    }
}
