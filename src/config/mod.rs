#![forbid(unsafe_code)]

//! User configuration: `~/.config/wtpr/config.toml`.
//!
//! Every key has a default, so a missing file is a valid configuration.
//! Edits go through `toml_edit` to keep the user's comments and layout.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};

use crate::error::WtprError;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "WTPR_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub review: ReviewConfig,
    pub cache: CacheConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Look up review status at all.
    pub enabled: bool,
    /// Review CLI executable.
    pub command: String,
    /// Hosting service the `origin` remote must point at.
    pub host: String,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "gh".to_owned(),
            host: "github.com".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Created next to the main checkout.
    pub file_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_name: ".wtpr-status.json".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub icons: bool,
    pub tilde_home: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            icons: true,
            tilde_home: true,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), WtprError> {
        let required = [
            ("review.command", &self.review.command),
            ("review.host", &self.review.host),
            ("cache.file_name", &self.cache.file_name),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(WtprError::Config(format!("{key} must not be empty")));
            }
        }

        let file_name = self.cache.file_name.trim();
        if file_name.contains(['/', '\\']) || file_name == "." || file_name == ".." {
            return Err(WtprError::InvalidConfigValue {
                key: "cache.file_name".to_owned(),
                msg: format!("'{file_name}' is not a plain file name"),
            });
        }
        Ok(())
    }
}

/// Location of the config file.
///
/// `WTPR_CONFIG` wins. Otherwise `~/.config/wtpr/config.toml`, except on
/// Windows where the platform config dir is used unless that Unix-style
/// file already exists.
pub fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(p) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(p));
    }

    let home = home_dir().context("failed to determine home directory")?;
    let unix = home.join(".config").join("wtpr").join("config.toml");
    if !cfg!(windows) || unix.exists() {
        return Ok(unix);
    }

    let proj = ProjectDirs::from("com", "wtpr", "wtpr")
        .context("failed to determine platform config directory")?;
    Ok(proj.config_dir().join("config.toml"))
}

fn home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// Abbreviates a leading home directory as `~`.
#[must_use]
pub fn tilde_path(input: &str) -> String {
    match home_dir() {
        Some(home) => abbreviate_home(input, &home),
        None => input.to_owned(),
    }
}

fn abbreviate_home(input: &str, home: &Path) -> String {
    let home = home.to_string_lossy();
    match input.strip_prefix(home.as_ref()) {
        Some("") => "~".to_owned(),
        Some(rest) if rest.starts_with(std::path::MAIN_SEPARATOR) => format!("~{rest}"),
        _ => input.to_owned(),
    }
}

/// Validated configuration from the default location.
pub fn load() -> anyhow::Result<Config> {
    Ok(ConfigFile::open(&config_path()?)?.config)
}

/// A config file on disk together with its editable TOML document.
#[derive(Debug)]
pub struct ConfigFile {
    path: PathBuf,
    doc: toml_edit::DocumentMut,
    config: Config,
}

impl ConfigFile {
    /// Reads and validates `path`; a missing file yields the defaults.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let (doc, config) =
            parse_document(&raw).with_context(|| format!("invalid config {}", path.display()))?;
        config.validate()?;
        Ok(Self {
            path: path.to_path_buf(),
            doc,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Every setting, defaults included, as TOML.
    pub fn render_resolved(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(&self.config)?)
    }

    /// Value of a dotted key; a section name prints the whole section.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let mut value = serde_json::to_value(&self.config).ok()?;
        for seg in key.trim().split('.') {
            value = value.as_object_mut()?.remove(seg)?;
        }
        Some(match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Object(_) => toml::to_string_pretty(&value).ok()?,
            other => other.to_string(),
        })
    }

    /// Sets a dotted key and writes the file, keeping unrelated content.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let key = key.trim();
        let kind = key_kind(key).ok_or_else(|| WtprError::InvalidConfigKey(key.to_owned()))?;
        let (section, leaf) = key
            .split_once('.')
            .ok_or_else(|| WtprError::InvalidConfigKey(key.to_owned()))?;

        let mut doc = self.doc.clone();
        let table = doc
            .entry(section)
            .or_insert(implicit_table())
            .as_table_mut()
            .ok_or_else(|| WtprError::Config(format!("'{section}' is not a table")))?;
        table.insert(leaf, kind.parse(key, value)?);

        let raw = doc.to_string();
        let (_, config) = parse_document(&raw)
            .with_context(|| format!("setting {key} produced an invalid config"))?;
        config.validate()?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        self.doc = doc;
        self.config = config;
        Ok(())
    }
}

fn implicit_table() -> toml_edit::Item {
    let mut t = toml_edit::Table::new();
    t.set_implicit(true);
    toml_edit::Item::Table(t)
}

fn parse_document(raw: &str) -> anyhow::Result<(toml_edit::DocumentMut, Config)> {
    let doc = raw.parse::<toml_edit::DocumentMut>()?;
    let config = toml::from_str(raw)?;
    Ok((doc, config))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Bool,
    Text,
}

const KEYS: &[(&str, KeyKind)] = &[
    ("review.enabled", KeyKind::Bool),
    ("review.command", KeyKind::Text),
    ("review.host", KeyKind::Text),
    ("cache.enabled", KeyKind::Bool),
    ("cache.file_name", KeyKind::Text),
    ("ui.icons", KeyKind::Bool),
    ("ui.tilde_home", KeyKind::Bool),
];

fn key_kind(key: &str) -> Option<KeyKind> {
    KEYS.iter().find(|(k, _)| *k == key).map(|(_, kind)| *kind)
}

impl KeyKind {
    fn parse(self, key: &str, value: &str) -> Result<toml_edit::Item, WtprError> {
        match self {
            Self::Text => Ok(toml_edit::value(value)),
            Self::Bool => match value.trim() {
                "true" => Ok(toml_edit::value(true)),
                "false" => Ok(toml_edit::value(false)),
                other => Err(WtprError::InvalidConfigValue {
                    key: key.to_owned(),
                    msg: format!("expected true|false, got '{other}'"),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn config_validation_catches_invalid_values() {
        let mut cfg = Config::default();
        cfg.cache.file_name = "../escape.json".to_owned();
        assert!(matches!(
            cfg.validate(),
            Err(WtprError::InvalidConfigValue { .. })
        ));

        let mut cfg = Config::default();
        cfg.review.command = "  ".to_owned();
        assert!(matches!(cfg.validate(), Err(WtprError::Config(_))));
    }

    #[test]
    fn missing_file_reads_as_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = ConfigFile::open(&dir.path().join("config.toml")).unwrap();
        assert_eq!(file.config(), &Config::default());
        assert_eq!(file.get("review.command").as_deref(), Some("gh"));
        assert_eq!(file.get("ui.icons").as_deref(), Some("true"));
        assert_eq!(file.get("review.nope"), None);
    }

    #[test]
    fn set_and_get_dot_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let mut file = ConfigFile::open(&path).unwrap();
        file.set("review.enabled", "false").unwrap();
        file.set("review.host", "github.example.com").unwrap();
        file.set("cache.file_name", "prs.json").unwrap();

        let file = ConfigFile::open(&path).unwrap();
        assert!(!file.config().review.enabled);
        assert_eq!(file.config().cache.file_name, "prs.json");
        assert!(file.config().ui.icons);
        assert_eq!(file.get("review.enabled").as_deref(), Some("false"));
        assert!(
            file.get("review")
                .is_some_and(|s| s.contains("github.example.com"))
        );
    }

    #[test]
    fn set_rejects_unknown_keys_and_bad_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let mut file = ConfigFile::open(&path).unwrap();

        assert!(file.set("review.nope", "x").is_err());
        assert!(file.set("review", "x").is_err());
        assert!(file.set("ui.icons", "yes").is_err());
        assert!(file.set("cache.file_name", "a/b").is_err());
        assert!(!path.exists());
        assert_eq!(file.config(), &Config::default());
    }

    #[test]
    fn set_preserves_existing_comments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# my settings\n[ui]\nicons = true\n").unwrap();

        ConfigFile::open(&path)
            .unwrap()
            .set("ui.icons", "false")
            .unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("# my settings"));
        assert!(raw.contains("icons = false"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[review\n").unwrap();
        assert!(ConfigFile::open(&path).is_err());

        std::fs::write(&path, "[review]\nenabled = \"maybe\"\n").unwrap();
        assert!(ConfigFile::open(&path).is_err());
    }

    #[test]
    fn home_prefix_is_abbreviated() {
        let home = Path::new("/home/me");
        let sep = std::path::MAIN_SEPARATOR;
        assert_eq!(abbreviate_home("/home/me", home), "~");
        assert_eq!(
            abbreviate_home(&format!("/home/me{sep}src"), home),
            format!("~{sep}src")
        );
        assert_eq!(abbreviate_home("/home/meow", home), "/home/meow");
        assert_eq!(abbreviate_home("/elsewhere", home), "/elsewhere");
    }
}
