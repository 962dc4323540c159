use crate::config::LedgerConfig;
use crate::errors::LedgerError;
use metrics::{counter, gauge, histogram};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend,
    Statement, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&LedgerConfig> for DbConfig {
    fn from(cfg: &LedgerConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Establishes a connection pool to the database
///
/// # Errors
/// Returns a `LedgerError` if the connection cannot be established
pub async fn establish_connection(database_url: &str) -> Result<DbPool, LedgerError> {
    let config = DbConfig {
        url: database_url.to_string(),
        ..Default::default()
    };

    establish_connection_with_config(&config).await
}

/// Establishes a connection pool to the database with custom configuration
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, LedgerError> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());

    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(true);

    gauge!("inventory_ledger.db.max_connections", config.max_connections as f64);

    info!(
        "Connecting to database with max_connections={}",
        config.max_connections
    );

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!("Database connection establishment failed: {}", e);
        counter!("inventory_ledger.db.connection_failures", 1);
        LedgerError::db_error(e)
    })?;

    info!("Database connection pool established successfully");

    Ok(db_pool)
}

/// Establish DB pool using the ledger configuration's pool tuning
pub async fn establish_connection_from_config(cfg: &LedgerConfig) -> Result<DbPool, LedgerError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<(), LedgerError> {
    info!("Running database migrations");
    let start = Instant::now();

    let result = crate::migrator::Migrator::up(pool, None)
        .await
        .map_err(LedgerError::db_error);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!(
            "Database migrations completed successfully in {:?}",
            elapsed
        ),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), LedgerError> {
    debug!("Checking database connection");
    let start = Instant::now();

    let result = pool.ping().await.map_err(LedgerError::db_error);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => {
            debug!("Database connection check successful in {:?}", elapsed);
            gauge!(
                "inventory_ledger.db.connection_latency",
                elapsed.as_millis() as f64
            );
        }
        Err(e) => {
            error!(
                "Database connection check failed after {:?}: {}",
                elapsed, e
            );
            counter!("inventory_ledger.db.connection_failures", 1);
        }
    }

    result
}

/// Closes the database connection pool
pub async fn close_pool(pool: DbPool) -> Result<(), LedgerError> {
    info!("Closing database connection pool");

    pool.close().await.map_err(LedgerError::db_error)
}

/// Opens the transaction every mutating ledger operation runs in.
///
/// On Postgres, row-lock waits inside the transaction are bounded by `lock_timeout`
/// so a stuck writer cannot hold the caller past its deadline.
pub async fn begin_ledger_txn(
    db: &DbPool,
    lock_timeout: Duration,
) -> Result<DatabaseTransaction, LedgerError> {
    let txn = db.begin().await?;

    if txn.get_database_backend() == DbBackend::Postgres {
        let millis = lock_timeout.as_millis().max(1);
        txn.execute(Statement::from_string(
            DbBackend::Postgres,
            format!("SET LOCAL lock_timeout = '{}ms'", millis),
        ))
        .await?;
    }

    counter!("inventory_ledger.db.transaction.started", 1);
    Ok(txn)
}

/// Drives `fut` to completion or fails with `LedgerError::Timeout`.
///
/// A future cut off by the deadline drops its open transaction, which rolls it back.
pub async fn with_deadline<T, F>(
    operation: &'static str,
    deadline: Duration,
    fut: F,
) -> Result<T, LedgerError>
where
    F: Future<Output = Result<T, LedgerError>>,
{
    let start = Instant::now();

    let result = match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, ?deadline, "Ledger operation exceeded its deadline");
            Err(LedgerError::Timeout {
                timeout_ms: deadline.as_millis() as u64,
            })
        }
    };

    let elapsed = start.elapsed();
    histogram!("inventory_ledger.transaction.duration", elapsed, "operation" => operation);

    match &result {
        Ok(_) => {
            counter!("inventory_ledger.transaction.committed", 1, "operation" => operation);
            debug!(operation, ?elapsed, "Ledger transaction committed");
        }
        Err(e) => {
            counter!(
                "inventory_ledger.transaction.rolled_back",
                1,
                "operation" => operation,
                "code" => e.error_code()
            );
            debug!(operation, ?elapsed, error = %e, "Ledger transaction rolled back");
        }
    }

    result
}
