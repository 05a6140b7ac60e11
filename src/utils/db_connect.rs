//! Database connection pool setup from environment variables.

use anyhow::{Context, Result};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use log::info;
use tokio_postgres::NoTls;

use crate::utils::env::var_or;

pub type PgPool = Pool;

/// Build the connection pool from `POSTGRES_*` environment variables and
/// verify connectivity with one round trip.
pub async fn connect() -> Result<PgPool> {
    connect_to(var_or("POSTGRES_DB", "roundup")).await
}

/// Pool for the county origin-destination distance tables, which live in
/// their own database on the same server.
pub async fn connect_ctyod() -> Result<PgPool> {
    connect_to(var_or("CTYOD_DB", "ctyod")).await
}

async fn connect_to(dbname: String) -> Result<PgPool> {
    let mut config = Config::new();
    config.host = Some(var_or("POSTGRES_HOST", "localhost"));
    config.port = Some(
        var_or("POSTGRES_PORT", "5432")
            .parse()
            .context("POSTGRES_PORT is not a valid port number")?,
    );
    config.user = Some(var_or("POSTGRES_USER", "postgres"));
    config.password = std::env::var("POSTGRES_PASSWORD").ok();
    config.dbname = Some(dbname);
    config.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = config
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .context("Failed to create database connection pool")?;

    let conn = pool
        .get()
        .await
        .context("Failed to get initial DB connection")?;
    conn.simple_query("SELECT 1")
        .await
        .context("Initial database round trip failed")?;

    info!(
        "Connected to database {} at {}:{}",
        config.dbname.as_deref().unwrap_or_default(),
        config.host.as_deref().unwrap_or_default(),
        config.port.unwrap_or_default()
    );

    Ok(pool)
}

/// (total, available, in use) for log lines.
pub fn get_pool_status(pool: &PgPool) -> (usize, usize, usize) {
    let status = pool.status();
    (
        status.max_size,
        status.available as usize,
        status.size.saturating_sub(status.available as usize),
    )
}
