//! Database initialization, migration, and connection management.

use std::{
    env,
    fs::OpenOptions,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use sqlx::{migrate::Migrator, sqlite::SqlitePoolOptions};
use tb_types::state::{DbHandle, DbLocation};
use tracing::warn;
use url::Url;

use crate::{DbError, DbResult};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Environment variable overriding the database location (URL or file path).
pub const DB_ENV: &str = "TB_DB_URL";

/// Return a human-friendly string describing where the database will live.
pub fn display_db_path(explicit: Option<&str>) -> String {
    if let Some(value) = explicit {
        return value.to_string();
    }
    if let Ok(value) = env::var(DB_ENV) {
        return value;
    }
    default_db_path().display().to_string()
}

/// Open a pooled SQLite connection.
///
/// `explicit` takes precedence over `TB_DB_URL`, which takes precedence over the
/// per-user state directory.
pub async fn open_db(explicit: Option<&str>) -> DbResult<DbHandle> {
    let location = match explicit.map(str::to_string).or_else(|| env::var(DB_ENV).ok()) {
        Some(value) => build_location_from_value(value).await?,
        None => build_location_from_path(default_db_path()).await?,
    };
    init_pool(location).await
}

/// Apply the embedded migrations to the provided pool.
pub async fn migrate(handle: &DbHandle) -> DbResult<()> {
    MIGRATOR.run(&handle.pool).await?;
    if handle.freshly_created {
        warn!(db = %display_path(handle), "initialized database and applied migrations");
    }
    Ok(())
}

async fn build_location_from_value(value: String) -> DbResult<DbLocation> {
    if value.starts_with("sqlite:") {
        Ok(DbLocation {
            url: value,
            path: None,
            freshly_created: false,
        })
    } else {
        build_location_from_path(PathBuf::from(value)).await
    }
}

async fn build_location_from_path(path: PathBuf) -> DbResult<DbLocation> {
    let existed = tokio::fs::try_exists(&path).await.unwrap_or(false);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DbError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    if !existed {
        let path_clone = path.clone();
        tokio::task::spawn_blocking(move || create_private_file(&path_clone))
            .await
            .map_err(|e| DbError::TaskPanicked(e.to_string()))??;
    }
    let url = sqlite_url_from_path(&path)?;
    Ok(DbLocation {
        url,
        path: Some(path),
        freshly_created: !existed,
    })
}

fn create_private_file(path: &Path) -> DbResult<()> {
    let mut options = OpenOptions::new();
    options.create_new(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    match options.open(path) {
        Ok(_) => {
            warn!(path = %path.display(), "creating database file with 600 permissions");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(DbError::FileCreationFailed {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

pub(crate) fn sqlite_url_from_path(path: &Path) -> DbResult<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };
    let url = Url::from_file_path(&absolute).map_err(|_| DbError::InvalidPath(path.to_path_buf()))?;
    let mut url_string: String = url.into();
    url_string.replace_range(..4, "sqlite");
    Ok(url_string)
}

async fn init_pool(location: DbLocation) -> DbResult<DbHandle> {
    let max_connections = env::var("TB_DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(8);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&location.url)
        .await
        .map_err(|e| DbError::ConnectionFailed {
            path: location.url.clone(),
            source: e,
        })?;

    if let Some(ref path) = location.path
        && !location.freshly_created
        && let Ok(changed) = ensure_secure_permissions(path)
        && changed
    {
        warn!(db = %path.display(), "fixed insecure database file permissions to 0600");
    }

    Ok(DbHandle {
        pool,
        url: location.url,
        path: location.path,
        freshly_created: location.freshly_created,
    })
}

/// Ensure a file has 0600 permissions on Unix. Returns true if permissions were changed.
fn ensure_secure_permissions(path: &Path) -> DbResult<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(path)?;
        let current_mode = metadata.permissions().mode() & 0o777;
        if current_mode != 0o600 {
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
            return Ok(true);
        }
        Ok(false)
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(false)
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".local/state"))
        .join("tunnelbridge")
        .join("state.db")
}

pub fn display_path(handle: &DbHandle) -> String {
    handle
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| handle.url.clone())
}
