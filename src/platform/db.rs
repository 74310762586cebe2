use anyhow::{Context, Result, anyhow};
use diesel::{Connection, PgConnection, sql_types::BigInt};
use diesel_async::{
    AsyncPgConnection, RunQueryDsl,
    pooled_connection::{AsyncDieselConnectionManager, bb8::Pool},
};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};

use crate::platform::config::DatabaseConfig;

pub type DieselError = diesel::result::Error;
pub type DbPool = Pool<AsyncPgConnection>;

pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.url);
    Pool::builder()
        .max_size(config.max_connections)
        .build(manager)
        .await
        .context("Failed to build the DB connection pool")
}

/// Runs pending migrations on a dedicated blocking connection.
pub async fn run_migrations_blocking(migrations: EmbeddedMigrations, url: &str) -> Result<usize> {
    let url = url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn =
            PgConnection::establish(&url).context("Failed to connect for migrations")?;
        let applied = conn
            .run_pending_migrations(migrations)
            .map_err(|err| anyhow!("Failed to run migrations: {}", err))?;
        Ok(applied.len())
    })
    .await
    .context("Migration task panicked")?
}

/// Namespaces for advisory lock keys. Stored in the top byte of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    QueueDate = 1,
    TimeSlot = 2,
    Pet = 3,
}

const LOCK_KEY_BITS: u32 = 56;

/// Packs a scope and a non-negative key into one `bigint` lock key.
///
/// Keys must fit in 56 bits; higher bits are masked off.
pub fn lock_key(scope: LockScope, key: i64) -> i64 {
    ((scope as i64) << LOCK_KEY_BITS) | (key & ((1 << LOCK_KEY_BITS) - 1))
}

/// Takes a transaction-scoped advisory lock. Released on commit or rollback.
pub async fn advisory_xact_lock(
    conn: &mut AsyncPgConnection,
    scope: LockScope,
    key: i64,
) -> Result<(), DieselError> {
    diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
        .bind::<BigInt, _>(lock_key(scope, key))
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_never_share_a_key() {
        assert_ne!(lock_key(LockScope::Pet, 42), lock_key(LockScope::QueueDate, 42));
        assert_eq!(lock_key(LockScope::TimeSlot, 0), 2 << 56);
        assert_eq!(lock_key(LockScope::Pet, 7) & 0xff, 7);
    }
}
