//! SQLite database adapters for the rulesmith control loop.

pub mod applied_change_repository;
pub mod batch_repository;
pub mod benchmark_repository;
pub mod connection;
pub mod migrations;
pub mod proposal_repository;
pub mod run_attempt_repository;
pub mod run_stats_repository;

pub use applied_change_repository::SqliteAppliedChangeRepository;
pub use batch_repository::SqliteBatchRepository;
pub use benchmark_repository::SqliteBenchmarkRepository;
pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use proposal_repository::SqliteProposalRepository;
pub use run_attempt_repository::SqliteRunAttemptRepository;
pub use run_stats_repository::SqliteRunStatsRepository;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Format a timestamp for storage.
///
/// Fixed-width microsecond RFC 3339 in UTC, so text comparison and
/// `ORDER BY` agree with chronological order.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn column_error(e: impl std::fmt::Display) -> DomainError {
    DomainError::SerializationError(e.to_string())
}

pub fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(column_error)
}

pub fn parse_optional_uuid(s: Option<String>) -> DomainResult<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).map_err(column_error)
}

pub fn parse_optional_datetime(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_datetime).transpose()
}

/// Decode a nullable JSON column.
pub fn parse_optional_json<T: serde::de::DeserializeOwned>(
    s: Option<String>,
) -> DomainResult<Option<T>> {
    s.as_deref().map(serde_json::from_str).transpose().map_err(column_error)
}

/// Encode a value for a nullable JSON column.
pub fn to_optional_json<T: serde::Serialize>(value: Option<&T>) -> DomainResult<Option<String>> {
    value.map(serde_json::to_string).transpose().map_err(DomainError::from)
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Open the pool and bring the schema up to date.
pub async fn initialize_database(
    database_url: &str,
    config: Option<PoolConfig>,
) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(database_url, config).await?;
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_datetime_is_fixed_width() {
        let a = parse_datetime("2026-01-01T00:00:00Z").unwrap();
        let b = parse_datetime("2026-01-01T00:00:00.5Z").unwrap();
        let (fa, fb) = (format_datetime(a), format_datetime(b));
        assert_eq!(fa.len(), fb.len());
        assert!(fa < fb);
        assert_eq!(parse_datetime(&fb).unwrap(), b);
    }
}
