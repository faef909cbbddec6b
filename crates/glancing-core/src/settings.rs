use crate::CoreError;
use glancing_registry::GlanceCli;
use glancing_remote::{MarketplaceConfig, DEFAULT_MARKETPLACE_URL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/glancing/glancing.toml";
pub const DEFAULT_BACKUP_DIR: &str = "/tmp/glancing";
pub const DEFAULT_VMLIST: &str = "/etc/glancing/vmlist";

/// Environment variable naming an alternative settings file.
pub const CONFIG_ENV: &str = "GLANCING_CONFIG";
/// Environment variable overriding the backup directory.
pub const BACKUP_DIR_ENV: &str = "GLANCING_BACKUP_DIR";

/// Site settings, read from a TOML file. Every field is optional in the file.
///
/// ```toml
/// marketplace_url = "https://marketplace.example.org/metadata"
/// backup_dir = "/var/backups/glancing"
/// vmlists = ["/etc/glancing/vmlist", "/etc/glancing/vmlist.local"]
/// glance_command = ["glance"]
/// keep_temps = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub marketplace_url: String,
    pub marketplace_token: Option<String>,
    pub backup_dir: PathBuf,
    pub vmlists: Vec<PathBuf>,
    pub glance_command: Vec<String>,
    pub keep_temps: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            marketplace_url: DEFAULT_MARKETPLACE_URL.to_owned(),
            marketplace_token: None,
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            vmlists: vec![PathBuf::from(DEFAULT_VMLIST)],
            glance_command: vec!["glance".to_owned()],
            keep_temps: false,
        }
    }
}

impl Settings {
    pub fn parse_str(content: &str, origin: &Path) -> Result<Self, CoreError> {
        toml::from_str(content).map_err(|e| CoreError::Settings {
            path: origin.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::Settings {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse_str(&content, path)
    }

    /// Load the settings in effect: `explicit` if given, else the file named
    /// by `$GLANCING_CONFIG`, else the default path. Only a missing default
    /// file falls back to built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, CoreError> {
        let mut settings = match explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        {
            Some(path) => Self::load(&path)?,
            None => {
                let path = Path::new(DEFAULT_SETTINGS_PATH);
                if path.exists() {
                    Self::load(path)?
                } else {
                    debug!("no settings file at {DEFAULT_SETTINGS_PATH}, using defaults");
                    Self::default()
                }
            }
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Apply environment overrides, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(BACKUP_DIR_ENV).filter(|d| !d.trim().is_empty()) {
            debug!("backup directory from ${BACKUP_DIR_ENV}: {dir}");
            self.backup_dir = PathBuf::from(dir);
        }
    }

    pub fn marketplace(&self) -> Result<MarketplaceConfig, CoreError> {
        let mut config = MarketplaceConfig::new(&self.marketplace_url);
        if let Some(ref token) = self.marketplace_token {
            config = config.with_token(token);
        }
        config.validate()?;
        Ok(config)
    }

    /// Registry client for these settings; site options and owner scoping
    /// come from the `OS_*` environment.
    pub fn registry(&self) -> GlanceCli {
        GlanceCli::from_env(self.glance_command.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.backup_dir, PathBuf::from("/tmp/glancing"));
        assert_eq!(s.vmlists, vec![PathBuf::from("/etc/glancing/vmlist")]);
        assert_eq!(s.glance_command, vec!["glance"]);
        assert!(!s.keep_temps);
        assert_eq!(s.marketplace_url, DEFAULT_MARKETPLACE_URL);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let s = Settings::parse_str(
            "backup_dir = \"/var/backups/glancing\"\nkeep_temps = true\n",
            Path::new("test.toml"),
        )
        .unwrap();
        assert_eq!(s.backup_dir, PathBuf::from("/var/backups/glancing"));
        assert!(s.keep_temps);
        assert_eq!(s.glance_command, vec!["glance"]);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = Settings::parse_str("backupdir = \"/x\"\n", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glancing.toml");
        std::fs::write(
            &path,
            "marketplace_url = \"https://mp.example.org/metadata/\"\n\
             vmlists = [\"/a\", \"/b\"]\n\
             glance_command = [\"sudo\", \"glance\"]\n",
        )
        .unwrap();
        let s = Settings::load(&path).unwrap();
        assert_eq!(s.vmlists.len(), 2);
        assert_eq!(
            s.marketplace().unwrap().url,
            "https://mp.example.org/metadata"
        );
        assert_eq!(s.glance_command, vec!["sudo", "glance"]);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::resolve(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let mut s = Settings::parse_str("backup_dir = \"/from/file\"\n", Path::new("t")).unwrap();
        s.apply_env(|key| (key == BACKUP_DIR_ENV).then(|| "/from/env".to_owned()));
        assert_eq!(s.backup_dir, PathBuf::from("/from/env"));

        s.apply_env(|_| Some("  ".to_owned()));
        assert_eq!(s.backup_dir, PathBuf::from("/from/env"));
    }

    #[test]
    fn bad_marketplace_url() {
        let s = Settings {
            marketplace_url: "ftp://mp.example.org".to_owned(),
            ..Settings::default()
        };
        assert!(s.marketplace().is_err());
    }

    #[test]
    fn token_is_carried() {
        let s = Settings {
            marketplace_token: Some("secret".to_owned()),
            ..Settings::default()
        };
        assert_eq!(s.marketplace().unwrap().auth_token.as_deref(), Some("secret"));
    }
}
