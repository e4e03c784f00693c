use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::storage::migrations::run_migrations;
use crate::storage::StoreError;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Initializes a connection pool with up to 10 connections, enables foreign
/// keys on every connection, and applies schema migrations.
///
/// # Example
///
/// ```no_run
/// use cogito_ingest::storage::db;
///
/// let pool = db::create_pool("cogito.sqlite")?;
/// # Ok::<(), cogito_ingest::storage::StoreError>(())
/// ```
pub fn create_pool(database_path: &str) -> Result<DbPool, StoreError> {
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder()
        .max_size(10) // Maximum 10 connections in the pool
        .build(manager)?;

    // Ensure schema is up to date on first connection
    let mut conn = pool.get()?;
    run_migrations(&mut conn).map_err(|e| StoreError::Migration(format!("{:#}", e)))?;

    log::info!("Database pool ready at {}", database_path);
    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection is automatically returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, StoreError> {
    Ok(pool.get()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_pool_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let pool = create_pool(path.to_str().unwrap()).unwrap();

        let conn = get_connection(&pool).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
