use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WebUiError};
use crate::upgrade::{SystemActionConfig, UpgradeConfig};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/appliance-webui/config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Debug mode: verbose logging and simulated system actions.
    #[serde(default)]
    pub debug: bool,
    /// Token required in the X-Webui-Token header.
    /// When unset, the API is open (development mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub upgrade: UpgradeSettings,
    #[serde(default = "ActionSettings::reboot")]
    pub reboot: ActionSettings,
    #[serde(default = "ActionSettings::factory_reset")]
    pub factory_reset: ActionSettings,
}

/// Firmware upgrade settings as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeSettings {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Installer binary, looked up in PATH unless absolute.
    #[serde(default = "default_installer")]
    pub installer: String,
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,
    #[serde(default = "default_validate_delay")]
    pub validate_delay: String,
    #[serde(default = "default_configure_delay")]
    pub configure_delay: String,
    /// Watchdog for the installer process. "0" disables it.
    #[serde(default = "default_install_timeout")]
    pub install_timeout: String,
    /// Where an uploaded configuration bundle is copied when applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_target: Option<String>,
}

/// A delayed system action (reboot, factory reset).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSettings {
    pub delay: String,
    #[serde(default)]
    pub command: Vec<String>,
    /// Log the action instead of running the command.
    #[serde(default)]
    pub simulate: bool,
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_upload_dir() -> String {
    "/tmp/upgrade".to_string()
}

fn default_max_upload_bytes() -> u64 {
    500 << 20
}

fn default_installer() -> String {
    "rauc".to_string()
}

fn default_tick_interval() -> String {
    "1s".to_string()
}

fn default_validate_delay() -> String {
    "2s".to_string()
}

fn default_configure_delay() -> String {
    "2s".to_string()
}

fn default_install_timeout() -> String {
    "30m".to_string()
}

impl Default for UpgradeSettings {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            installer: default_installer(),
            tick_interval: default_tick_interval(),
            validate_delay: default_validate_delay(),
            configure_delay: default_configure_delay(),
            install_timeout: default_install_timeout(),
            config_target: None,
        }
    }
}

impl ActionSettings {
    fn reboot() -> Self {
        Self {
            delay: "2s".to_string(),
            command: vec!["reboot".to_string()],
            simulate: false,
        }
    }

    // No factory reset backend exists on the host side yet, so the default only logs.
    fn factory_reset() -> Self {
        Self {
            delay: "5s".to_string(),
            command: Vec::new(),
            simulate: true,
        }
    }

    pub fn to_runtime(
        &self,
        name: &'static str,
        force_simulate: bool,
    ) -> Result<SystemActionConfig> {
        Ok(SystemActionConfig {
            name,
            delay: require_duration(name, "delay", &self.delay)?,
            command: self.command.clone(),
            simulate: self.simulate || force_simulate,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            debug: false,
            auth_token: None,
            upgrade: UpgradeSettings::default(),
            reboot: ActionSettings::reboot(),
            factory_reset: ActionSettings::factory_reset(),
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicitly given path must exist. When no path is given the default
    /// location is tried and defaults are used if it is missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_yaml::from_str::<AppConfig>(&content)
                .map_err(|e| WebUiError::Config(format!("Invalid config: {}", e)))?
        } else if required {
            return Err(WebUiError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            AppConfig::default()
        };

        // Environment overrides
        if let Ok(token) = std::env::var("WEBUI_AUTH_TOKEN") {
            if !token.is_empty() {
                config.auth_token = Some(token);
            }
        }
        if let Some(port) = std::env::var("WEBUI_PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.upgrade.max_upload_bytes == 0 {
            return Err(WebUiError::Config(
                "upgrade.max_upload_bytes must be greater than zero".to_string(),
            ));
        }

        if self.upgrade.installer.trim().is_empty() {
            return Err(WebUiError::Config("upgrade.installer must not be empty".to_string()));
        }

        for (field, value) in [
            ("tick_interval", &self.upgrade.tick_interval),
            ("validate_delay", &self.upgrade.validate_delay),
            ("configure_delay", &self.upgrade.configure_delay),
            ("install_timeout", &self.upgrade.install_timeout),
        ] {
            require_duration("upgrade", field, value)?;
        }

        if parse_duration(&self.upgrade.tick_interval) == Some(Duration::ZERO) {
            return Err(WebUiError::Config(
                "upgrade.tick_interval must be greater than zero".to_string(),
            ));
        }

        for (name, action) in [("reboot", &self.reboot), ("factory_reset", &self.factory_reset)] {
            require_duration(name, "delay", &action.delay)?;
            if !action.simulate && action.command.is_empty() {
                return Err(WebUiError::Config(format!(
                    "{}.command must not be empty unless {}.simulate is set",
                    name, name
                )));
            }
        }

        Ok(())
    }

    /// Runtime settings for the upgrade subsystem.
    pub fn upgrade_config(&self) -> Result<UpgradeConfig> {
        let u = &self.upgrade;
        let install_timeout = require_duration("upgrade", "install_timeout", &u.install_timeout)?;

        Ok(UpgradeConfig {
            upload_dir: expand_path(&u.upload_dir),
            max_upload_bytes: u.max_upload_bytes,
            installer: u.installer.clone(),
            tick_interval: require_duration("upgrade", "tick_interval", &u.tick_interval)?,
            validate_delay: require_duration("upgrade", "validate_delay", &u.validate_delay)?,
            configure_delay: require_duration("upgrade", "configure_delay", &u.configure_delay)?,
            install_timeout: (!install_timeout.is_zero()).then_some(install_timeout),
            config_target: u.config_target.as_deref().map(expand_path),
        })
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

fn require_duration(section: &str, field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).ok_or_else(|| {
        WebUiError::Config(format!(
            "Invalid {}.{} '{}'. Use format like '500ms', '2s', '30m', or '3600'",
            section, field, value
        ))
    })
}

fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(millis) = s.strip_suffix("ms") {
        millis.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours = hours.parse::<u64>().ok()?;
        hours.checked_mul(3600).map(Duration::from_secs)
    } else if let Some(minutes) = s.strip_suffix('m') {
        let minutes = minutes.parse::<u64>().ok()?;
        minutes.checked_mul(60).map(Duration::from_secs)
    } else if let Some(seconds) = s.strip_suffix('s') {
        seconds.parse::<u64>().ok().map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("60S"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("7200"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("  2s  "), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert_eq!(parse_duration("invalid"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("2x"), None);
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert_eq!(parse_duration("18446744073709551615h"), None);
        assert_eq!(parse_duration("18446744073709551615m"), None);
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Some(Duration::from_secs(u64::MAX))
        );

        let mut config = AppConfig::default();
        config.upgrade.install_timeout = "99999999999999999h".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("install_timeout"));
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.listen, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert!(!config.debug);
        assert!(config.auth_token.is_none());
        assert_eq!(config.upgrade.upload_dir, "/tmp/upgrade");
        assert_eq!(config.upgrade.max_upload_bytes, 500 * 1024 * 1024);
        assert_eq!(config.upgrade.installer, "rauc");
        assert_eq!(config.reboot.command, vec!["reboot".to_string()]);
        assert!(config.factory_reset.simulate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialization_partial() {
        let yaml = r#"
port: 9090
auth_token: secret
upgrade:
  upload_dir: /var/tmp/fw
  tick_interval: 500ms
  install_timeout: "0"
reboot:
  delay: 1s
  simulate: true
"#;

        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.listen, "127.0.0.1");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.upgrade.installer, "rauc");
        assert!(config.reboot.simulate);
        assert!(config.reboot.command.is_empty());
        assert!(config.validate().is_ok());

        let upgrade = config.upgrade_config().unwrap();
        assert_eq!(upgrade.upload_dir, PathBuf::from("/var/tmp/fw"));
        assert_eq!(upgrade.tick_interval, Duration::from_millis(500));
        assert_eq!(upgrade.install_timeout, None);
        assert_eq!(upgrade.validate_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_config_serialization_skips_empty_token() {
        let yaml = serde_yaml::to_string(&AppConfig::default()).unwrap();
        assert!(yaml.contains("port: 8080"));
        assert!(!yaml.contains("auth_token"));
        assert!(!yaml.contains("config_target"));
    }

    #[test]
    fn test_validate_rejects_zero_upload_limit() {
        let mut config = AppConfig::default();
        config.upgrade.max_upload_bytes = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_upload_bytes"));
    }

    #[test]
    fn test_validate_rejects_bad_duration() {
        let mut config = AppConfig::default();
        config.upgrade.tick_interval = "soon".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tick_interval"));
    }

    #[test]
    fn test_validate_rejects_zero_tick() {
        let mut config = AppConfig::default();
        config.upgrade.tick_interval = "0ms".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_reboot_command() {
        let mut config = AppConfig::default();
        config.reboot.command.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reboot.command"));

        config.reboot.simulate = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        let err = AppConfig::load(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "listen: 0.0.0.0\nupgrade:\n  installer: /usr/bin/rauc\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.listen, "0.0.0.0");
        assert_eq!(config.upgrade.installer, "/usr/bin/rauc");
    }

    #[test]
    fn test_load_invalid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "port: [not a port").unwrap();

        let err = AppConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Invalid config"));
    }

    #[test]
    fn test_action_settings_force_simulate() {
        let settings = ActionSettings::reboot();
        let runtime = settings.to_runtime("reboot", true).unwrap();
        assert!(runtime.simulate);
        assert_eq!(runtime.delay, Duration::from_secs(2));
        assert_eq!(runtime.command, vec!["reboot".to_string()]);
    }
}
