//! Cross-platform application paths using the `dirs` crate.
//!
//! Config dir:
//!   Windows: %APPDATA%\speech-pipeline\
//!   macOS:   ~/Library/Application Support/speech-pipeline/
//!   Linux:   ~/.config/speech-pipeline/

use std::path::{Path, PathBuf};

/// Resolved configuration paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory holding `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "speech-pipeline";

    /// Resolves paths using the `dirs` crate, falling back to the current
    /// directory when the platform has no config dir.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);
        Self::rooted_at(&config_dir)
    }

    /// Paths under an explicit config directory.
    pub fn rooted_at(config_dir: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            settings_file: config_dir.join("settings.toml"),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_non_empty() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
    }

    #[test]
    fn rooted_paths_stay_under_root() {
        let paths = AppPaths::rooted_at(Path::new("/tmp/speech"));
        assert_eq!(paths.settings_file, PathBuf::from("/tmp/speech/settings.toml"));
    }
}
