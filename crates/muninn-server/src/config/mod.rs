// crates/muninn-server/src/config/mod.rs
// Configuration: environment variables and on-disk data layout

mod env;

pub use env::{EnvConfig, StoreMode, parse_bool_env};

use std::path::{Path, PathBuf};

/// Directory name for per-project data, relative to the project root.
pub const PROJECT_DATA_DIR: &str = ".muninn";

/// Per-project database path: `<project>/.muninn/memory.db`
pub fn project_db_path(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_DATA_DIR).join("memory.db")
}

/// Global home directory: `~/.muninn`
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(PROJECT_DATA_DIR))
}

/// Global database path: `~/.muninn/global.db`
pub fn global_db_path() -> Option<PathBuf> {
    home_dir().map(|h| h.join("global.db"))
}

/// Append-only migration log: `~/.muninn/migrations.log`
pub fn migration_log_path() -> Option<PathBuf> {
    home_dir().map(|h| h.join("migrations.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_db_path_layout() {
        let path = project_db_path(Path::new("/work/repo"));
        assert_eq!(path, PathBuf::from("/work/repo/.muninn/memory.db"));
    }

    #[test]
    fn test_global_paths_share_home() {
        if let (Some(db), Some(log)) = (global_db_path(), migration_log_path()) {
            assert_eq!(db.parent(), log.parent());
            assert!(db.ends_with("global.db"));
            assert!(log.ends_with("migrations.log"));
        }
    }
}
