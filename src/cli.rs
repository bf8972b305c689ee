use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;
use crate::error::Result;

#[derive(Parser, Debug)]
#[command(name = "appliance-webui")]
#[command(version)]
#[command(about = "Web management interface for network appliances")]
#[command(long_about = "Serves the appliance management API: firmware upload and installation \
with live progress, reboot, configuration backup and factory reset.")]
pub struct Cli {
    /// Config file (default: /etc/appliance-webui/config.yaml, optional)
    #[arg(short, long, env = "WEBUI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Debug mode: verbose logs, reboot and factory reset are only simulated
    #[arg(short, long)]
    pub debug: bool,

    /// Staging directory for uploaded firmware
    #[arg(long)]
    pub upload_dir: Option<String>,
}

impl Cli {
    /// Load the config file and apply command-line overrides on top.
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(dir) = &self.upload_dir {
            config.upgrade.upload_dir = dir.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "appliance-webui",
            "-p",
            "9090",
            "--debug",
            "--upload-dir",
            "/var/tmp/fw",
        ])
        .unwrap();

        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.port, 9090);
        assert!(config.debug);
        assert_eq!(config.upgrade.upload_dir, "/var/tmp/fw");
    }

    #[test]
    fn test_cli_without_flags_keeps_config() {
        let cli = Cli::try_parse_from(["appliance-webui"]).unwrap();
        let mut config = AppConfig {
            port: 8181,
            ..Default::default()
        };
        cli.apply(&mut config);
        assert_eq!(config.port, 8181);
        assert!(!config.debug);
        assert_eq!(config.upgrade.upload_dir, "/tmp/upgrade");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "port: 7000\nupgrade:\n  installer: swupdate\n").unwrap();

        let cli = Cli::try_parse_from([
            "appliance-webui",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "7001",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.upgrade.installer, "swupdate");
    }
}
