//! Durable storage for targets and check outcomes
//!
//! One local libsql database behind a deadpool pool. [`SqlStore`] implements
//! both engine collaborators, so the scheduler reads targets from and writes
//! outcomes to the same file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use deadpool::managed::Pool;
use tracing::info;

use crate::pool::{LibsqlManager, LibsqlPool};

pub mod migrations;
pub mod repository;
pub mod seed;

pub use repository::SqlStore;
pub use seed::seed_demo_target;

const POOL_SIZE: usize = 8;

/// Open (creating if needed) the database at `path` and bring its schema up to date
pub async fn open(path: &Path) -> Result<LibsqlPool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let database = libsql::Builder::new_local(path)
        .build()
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    let pool: LibsqlPool = Pool::builder(LibsqlManager::new(database)).max_size(POOL_SIZE).build()?;

    let conn = pool.get().await?;
    migrations::run_migrations(&conn).await?;

    info!(path = %path.display(), "database ready");
    Ok(pool)
}
