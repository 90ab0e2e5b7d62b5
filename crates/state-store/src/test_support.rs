//! Test utilities for fast, isolated SQLite databases.
//!
//! A migrated template DB is created once per factory and copied for each test,
//! so tests can run in parallel without sharing state or env vars.
//!
//! Files live in a temporary directory removed when the factory is dropped. Set
//! `TB_TEST_DB_PERSIST=1` to keep them for debugging.

use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use sqlx::sqlite::SqlitePoolOptions;
use tb_types::state::DbHandle;
use tempfile::TempDir;
use tokio::sync::OnceCell;

use crate::{DbError, DbResult, db::sqlite_url_from_path, migrate};

fn unique_suffix() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    format!("{}-{}-{}", std::process::id(), now, uuid::Uuid::now_v7())
}

async fn connect_file_db(path: &Path) -> DbResult<DbHandle> {
    let existed = tokio::fs::try_exists(path).await.unwrap_or(false);
    if !existed {
        tokio::fs::File::create(path).await?;
    }

    let url = sqlite_url_from_path(path)?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .map_err(|e| DbError::ConnectionFailed {
            path: url.clone(),
            source: e,
        })?;

    // Speed over durability for throwaway databases.
    let _ = sqlx::query("PRAGMA journal_mode = MEMORY").execute(&pool).await;
    let _ = sqlx::query("PRAGMA synchronous = OFF").execute(&pool).await;

    Ok(DbHandle {
        pool,
        url,
        path: Some(path.to_path_buf()),
        freshly_created: !existed,
    })
}

/// Creates a migrated template DB once and clones it per test.
#[derive(Debug)]
pub struct SqliteTestDbFactory {
    root: PathBuf,
    _tempdir: Option<TempDir>,
    template: OnceCell<PathBuf>,
}

impl SqliteTestDbFactory {
    pub fn new() -> Self {
        let persist = std::env::var_os("TB_TEST_DB_PERSIST").is_some_and(|v| v != "0");

        let tempdir = tempfile::Builder::new()
            .prefix("tunnelbridge-testdb-")
            .tempdir()
            .expect("failed to create temporary directory for test DBs");

        let (root, tempdir) = if persist {
            (tempdir.keep(), None)
        } else {
            (tempdir.path().to_path_buf(), Some(tempdir))
        };
        Self {
            root,
            _tempdir: tempdir,
            template: OnceCell::const_new(),
        }
    }

    async fn template_path(&self) -> DbResult<PathBuf> {
        let path = self
            .template
            .get_or_try_init(|| async {
                let template_path = self.root.join("template.db");
                let handle = connect_file_db(&template_path).await?;
                migrate(&handle).await?;
                handle.pool.close().await;
                Ok::<_, DbError>(template_path)
            })
            .await?;
        Ok(path.clone())
    }

    /// Create a migrated DB for a single test case.
    pub async fn db(&self) -> DbResult<DbHandle> {
        let template = self.template_path().await?;
        let target = self.root.join(format!("state_{}.db", unique_suffix()));
        tokio::fs::copy(&template, &target).await?;
        connect_file_db(&target).await
    }
}

impl Default for SqliteTestDbFactory {
    fn default() -> Self {
        Self::new()
    }
}
