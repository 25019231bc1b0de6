use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::output::OutputFormat;

const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default, rename = "user-id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub channels: ChannelSettings,
    #[serde(default)]
    pub extract: ExtractSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelSettings {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractSettings {
    #[serde(default = "default_context_messages", rename = "context-messages")]
    pub context_messages: usize,
    #[serde(default = "default_days", rename = "default-days")]
    pub default_days: u32,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            context_messages: default_context_messages(),
            default_days: default_days(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OutputSettings {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default, rename = "file-name")]
    pub file_name: Option<String>,
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            format: default_format(),
            file_name: None,
            dir: default_output_dir(),
        }
    }
}

fn default_context_messages() -> usize {
    3
}

fn default_days() -> u32 {
    30
}

fn default_format() -> String {
    "json".to_string()
}

fn default_output_dir() -> String {
    DEFAULT_DIR.to_string()
}

const DEFAULT_DIR: &str = "outputs";

impl Settings {
    /// Load settings from the given path, or from ./settings.toml when no
    /// path is passed. A missing default file yields the defaults; an
    /// explicitly passed path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let path = Path::new(SETTINGS_FILE);
                if path.exists() {
                    Self::read(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| AppError::ReadFile {
            path: path.display().to_string(),
            source: e,
        })?;

        let settings: Settings =
            toml::from_str(&content).map_err(|e| AppError::TomlParse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.extract.default_days == 0 {
            return Err(AppError::InvalidSettings(
                "default-days must be at least 1".to_string(),
            ));
        }
        OutputFormat::parse(&self.output.format)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_file_constant() {
        assert_eq!(SETTINGS_FILE, "settings.toml");
    }

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();

        assert!(settings.user_id.is_none());
        assert!(settings.channels.include.is_empty());
        assert!(settings.channels.exclude.is_empty());
        assert_eq!(settings.extract.context_messages, 3);
        assert_eq!(settings.extract.default_days, 30);
        assert_eq!(settings.output.format, "json");
        assert!(settings.output.file_name.is_none());
        assert_eq!(settings.output.dir, "outputs");
    }

    #[test]
    fn test_settings_deserialization() {
        let toml_content = r#"
user-id = "U024BE7LH"

[channels]
include = ["general", "C024BE91L"]
exclude = ["noisy"]

[extract]
context-messages = 5
default-days = 7

[output]
format = "markdown"
file-name = "activity-{datetime}.md"
dir = "reports"
"#;

        let settings: Settings = toml::from_str(toml_content).unwrap();

        assert_eq!(settings.user_id.as_deref(), Some("U024BE7LH"));
        assert_eq!(settings.channels.include, vec!["general", "C024BE91L"]);
        assert_eq!(settings.channels.exclude, vec!["noisy"]);
        assert_eq!(settings.extract.context_messages, 5);
        assert_eq!(settings.extract.default_days, 7);
        assert_eq!(settings.output.format, "markdown");
        assert_eq!(
            settings.output.file_name.as_deref(),
            Some("activity-{datetime}.md")
        );
        assert_eq!(settings.output.dir, "reports");
    }

    #[test]
    fn test_settings_deserialization_empty() {
        let settings: Settings = toml::from_str("").unwrap();

        assert_eq!(settings.extract.context_messages, 3);
        assert_eq!(settings.output.format, "json");
    }

    #[test]
    fn test_settings_deserialization_partial_section() {
        let toml_content = r#"
[extract]
context-messages = 0
"#;

        let settings: Settings = toml::from_str(toml_content).unwrap();

        assert_eq!(settings.extract.context_messages, 0);
        assert_eq!(settings.extract.default_days, 30);
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_default_days() {
        let mut settings = Settings::default();
        settings.extract.default_days = 0;

        assert!(matches!(
            settings.validate(),
            Err(AppError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_format() {
        let mut settings = Settings::default();
        settings.output.format = "yaml".to_string();

        assert!(matches!(
            settings.validate(),
            Err(AppError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[extract]\ndefault-days = 14\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.extract.default_days, 14);
    }

    #[test]
    fn test_load_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        assert!(matches!(
            Settings::load(Some(&path)),
            Err(AppError::ReadFile { .. })
        ));
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "not toml at all [").unwrap();

        assert!(matches!(
            Settings::load(Some(&path)),
            Err(AppError::TomlParse(_))
        ));
    }
}
