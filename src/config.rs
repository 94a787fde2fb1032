/// User settings loaded from a TOML file
///
/// Lookup order: an explicit path, then `<config dir>/sanimal/config.toml`,
/// then built-in defaults. A missing file is not an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::{EventInterval, DEFAULT_EVENT_INTERVAL_MINUTES};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Event interval used when none is given on the command line
    pub event_interval_minutes: i64,
    /// File extensions picked up by a folder scan (case-insensitive)
    pub extensions: Vec<String>,
    /// Follow symbolic links while scanning folders
    pub follow_symlinks: bool,
    /// Project catalog loaded before and saved after a session
    pub catalog: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            event_interval_minutes: DEFAULT_EVENT_INTERVAL_MINUTES,
            extensions: ["jpg", "jpeg", "tif", "tiff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            follow_symlinks: true,
            catalog: None,
        }
    }
}

impl Settings {
    /// Where settings live when no path is given:
    /// - Linux: ~/.config/sanimal/config.toml
    /// - macOS: ~/Library/Application Support/sanimal/config.toml
    /// - Windows: %APPDATA%\sanimal\config.toml
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sanimal").join("config.toml"))
    }

    /// Load settings from `explicit`, else from the default location
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let Some(path) = explicit.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Ok(Self::default());
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let settings = Self::from_toml(&text)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
                info!("Loaded settings from {}", path.display());
                Ok(settings)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if explicit.is_some() {
                    warn!("Settings file {} not found, using defaults", path.display());
                }
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn event_interval(&self) -> EventInterval {
        EventInterval::new(self.event_interval_minutes)
    }

    /// Whether a scan should pick up this file
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .map_or(false, |ext| {
                self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.event_interval().minutes(), 30);
        assert!(settings.accepts(Path::new("/cam/IMG_0001.JPG")));
        assert!(settings.accepts(Path::new("scan.tiff")));
        assert!(!settings.accepts(Path::new("notes.txt")));
        assert!(!settings.accepts(Path::new("README")));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let settings = Settings::from_toml("event_interval_minutes = 60\n").unwrap();
        assert_eq!(settings.event_interval_minutes, 60);
        assert_eq!(settings.extensions, Settings::default().extensions);
    }

    #[test]
    fn test_non_positive_interval_falls_back() {
        let settings = Settings::from_toml("event_interval_minutes = 0\n").unwrap();
        assert_eq!(settings.event_interval().minutes(), 30);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "extensions = [\"jpg\"]\nfollow_symlinks = false\ncatalog = \"/data/survey.json\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(path.as_path())).unwrap();
        assert_eq!(settings.extensions, vec!["jpg"]);
        assert!(!settings.follow_symlinks);
        assert_eq!(settings.catalog, Some(PathBuf::from("/data/survey.json")));
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "event_interval_minutes = \"soon\"\n").unwrap();
        assert!(matches!(Settings::load(Some(path.as_path())), Err(Error::Config(_))));
    }
}
