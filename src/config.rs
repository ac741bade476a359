use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// File name of the database inside a shared location
pub const DATABASE_FILE_NAME: &str = "graphcache.db";

static SHARED_LOCATION: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Settings for one store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; defaults to `.graphcache/graphcache.db`
    pub path: Option<PathBuf>,
    /// Keep everything in memory, ignoring all paths
    pub in_memory: bool,
    /// Directory shared between processes; overrides `path`
    pub shared_location: Option<PathBuf>,
    pub read_only: bool,
    /// Use write-ahead logging (recommended for shared locations)
    pub wal: bool,
    pub busy_timeout_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            in_memory: false,
            shared_location: None,
            read_only: false,
            wal: true,
            busy_timeout_ms: Some(5_000),
        }
    }
}

impl StoreConfig {
    /// Configuration for a private in-memory database
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Self::default()
        }
    }

    /// Configuration for a database file
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_shared_location(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shared_location = Some(dir.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Resolve the database file, `None` for in-memory.
    ///
    /// Precedence: `in_memory`, `shared_location`, `path`, the process-wide
    /// shared location, then the default path under the working directory.
    pub fn database_path(&self) -> Option<PathBuf> {
        if self.in_memory {
            return None;
        }
        if let Some(dir) = &self.shared_location {
            return Some(dir.join(DATABASE_FILE_NAME));
        }
        if let Some(path) = &self.path {
            return Some(path.clone());
        }
        if let Some(dir) = shared_location() {
            return Some(dir.join(DATABASE_FILE_NAME));
        }
        Some(default_database_path_in(Path::new(".")))
    }

    /// Name of the executor thread serving this configuration
    pub fn thread_name(&self) -> String {
        match self.database_path() {
            Some(path) => format!("graphcache:{}", path.display()),
            None => "graphcache:memory".to_string(),
        }
    }
}

/// Share the default database between processes through `dir`.
///
/// Affects configurations that name neither a path nor a shared location.
pub fn enable_data_sharing(dir: impl Into<PathBuf>) {
    let dir = dir.into();
    tracing::info!("Data sharing enabled at {}", dir.display());
    *SHARED_LOCATION.lock().unwrap_or_else(PoisonError::into_inner) = Some(dir);
}

pub fn disable_data_sharing() {
    *SHARED_LOCATION.lock().unwrap_or_else(PoisonError::into_inner) = None;
}

/// The process-wide shared location, if data sharing is enabled
pub fn shared_location() -> Option<PathBuf> {
    SHARED_LOCATION.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("graphcache.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".graphcache").join(DATABASE_FILE_NAME)
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<StoreConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: StoreConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &StoreConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_gitignore(project_root: &Path) -> anyhow::Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let entry = ".graphcache/";

    let mut content = String::new();
    if gitignore_path.exists() {
        content = std::fs::read_to_string(&gitignore_path)?;
        if content.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
    }
    content.push_str(entry);
    content.push('\n');
    std::fs::write(&gitignore_path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_path_resolution() {
        assert_eq!(StoreConfig::in_memory().database_path(), None);
        assert_eq!(
            StoreConfig::at("/tmp/a.db").database_path(),
            Some(PathBuf::from("/tmp/a.db"))
        );
        assert_eq!(
            StoreConfig::at("/tmp/a.db")
                .with_shared_location("/srv/group")
                .database_path(),
            Some(PathBuf::from("/srv/group").join(DATABASE_FILE_NAME))
        );
    }

    #[test]
    fn test_process_wide_sharing_applies_to_defaults_only() {
        enable_data_sharing("/srv/shared");
        let default_path = StoreConfig::default().database_path();
        let explicit_path = StoreConfig::at("/tmp/own.db").database_path();
        disable_data_sharing();

        assert_eq!(default_path, Some(PathBuf::from("/srv/shared").join(DATABASE_FILE_NAME)));
        assert_eq!(explicit_path, Some(PathBuf::from("/tmp/own.db")));
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphcache.toml");

        assert!(load_config(Some(&path)).unwrap().is_none());

        let config = StoreConfig {
            busy_timeout_ms: Some(250),
            ..StoreConfig::at("data/objects.db")
        };
        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &config, true).unwrap();

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: StoreConfig = toml::from_str("read_only = true").unwrap();
        assert!(config.read_only);
        assert!(config.wal);
        assert_eq!(config.busy_timeout_ms, Some(5_000));
    }

    #[test]
    fn test_ensure_gitignore_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target").unwrap();

        ensure_gitignore(dir.path()).unwrap();
        ensure_gitignore(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, "target\n.graphcache/\n");
    }
}
