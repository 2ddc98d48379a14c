use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoverError;
use crate::files::{read_json, write_json};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 1_000;
pub const DEFAULT_STACK_SIZE_MB: usize = 64;

/// Interpreter configuration, stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Directories searched by `#include`.
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    /// Nested script calls allowed before a run fails with a stack overflow.
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    /// Native stack of the evaluation thread, in MiB.
    #[serde(default = "default_stack_size_mb")]
    pub stack_size_mb: usize,
    /// Print "Program exited with code: N" after `main` returns a value.
    #[serde(default = "default_true")]
    pub report_exit_code: bool,
}

fn default_max_call_depth() -> usize {
    DEFAULT_MAX_CALL_DEPTH
}

fn default_stack_size_mb() -> usize {
    DEFAULT_STACK_SIZE_MB
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            include_dirs: Vec::new(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            stack_size_mb: DEFAULT_STACK_SIZE_MB,
            report_exit_code: true,
        }
    }
}

/// Load settings from a JSON file. Missing fields take their defaults.
pub fn load_settings(path: &Path) -> Result<Settings, CoverError> {
    read_json(path)
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<(), CoverError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    write_json(path, settings)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_round_trip() {
        let dir = std::env::temp_dir().join("cover_test_settings");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("settings.json");

        let settings = Settings {
            include_dirs: vec![PathBuf::from("/opt/cover/include")],
            max_call_depth: 64,
            ..Settings::default()
        };
        save_settings(&path, &settings).unwrap();

        let loaded = load_settings(&path).expect("should load");
        assert_eq!(loaded, settings);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = std::env::temp_dir().join("cover_test_settings_partial");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        std::fs::write(&path, r#"{ "report_exit_code": false }"#).unwrap();

        let loaded = load_settings(&path).unwrap();
        assert!(!loaded.report_exit_code);
        assert_eq!(loaded.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert!(loaded.include_dirs.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("cover_test_settings_missing/none.json");
        assert!(matches!(load_settings(&path), Err(CoverError::Io(_))));
    }
}
