//! Gateway configuration
//!
//! Settings are read from an optional JSON file and then overlaid with the
//! command line. Every value has a usable default so the gateway can start
//! without any configuration at all.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Which line-style listeners to start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LineMode {
    /// Only the serial (3215) CONS-style port
    Cons,
    /// Only the 3270 GRAF-style port
    Graf,
    /// Both ports
    Both,
}

impl LineMode {
    pub fn graf(&self) -> bool {
        matches!(self, LineMode::Graf | LineMode::Both)
    }

    pub fn cons(&self) -> bool {
        matches!(self, LineMode::Cons | LineMode::Both)
    }
}

/// Effective gateway settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host name of the VM/370 (Hercules) machine
    pub vm_host_name: String,
    /// Hercules console port
    pub vm_host_port: u16,
    /// LU name passed to Hercules with the terminal type
    pub vm_lu_name: Option<String>,
    /// Listen port for 3270 (GRAF) connections
    pub port_graf: u16,
    /// Listen port for line-mode (CONS) connections
    pub port_cons: u16,
    pub listen: LineMode,
    /// Only accept predefined terminal types, never send a WSF query
    pub no_dynamic: bool,
    /// Pause in ms before each console screen update (0..9)
    pub send_delay_ms: u8,
    /// Minimal number of colors a terminal must report to be used in color (3..8)
    pub min_color_count: u8,
    pub dump_parms: bool,
    /// Default log filter, overridden by RUST_LOG
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            vm_host_name: "localhost".to_string(),
            vm_host_port: 3270,
            vm_lu_name: None,
            port_graf: 3277,
            port_cons: 3215,
            listen: LineMode::Both,
            no_dynamic: false,
            send_delay_ms: 0,
            min_color_count: 4,
            dump_parms: false,
            log_level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Read the configuration from `path`.
    ///
    /// A missing file yields the defaults silently, an unreadable or
    /// malformed file yields the defaults with a warning.
    pub fn load_or_default(path: &Path) -> Self {
        let (cfg, problem) = Self::load_lenient(path);
        if let Some(e) = problem {
            warn!("{e}, using defaults");
        }
        cfg
    }

    /// Like [`GatewayConfig::load_or_default`], but hands the load error back
    /// to the caller instead of logging it.
    pub fn load_lenient(path: &Path) -> (Self, Option<ConfigError>) {
        if !path.exists() {
            debug!("No configuration file at {}, using defaults", path.display());
            return (Self::default(), None);
        }
        match Self::load(path) {
            Ok(cfg) => (cfg, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    /// Read the configuration from `path`, failing on any problem.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::FileError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::FileError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Write the configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let file_error = |e: String| ConfigError::FileError {
            path: path.display().to_string(),
            error: e,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| file_error(e.to_string()))?;
            }
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| file_error(e.to_string()))?;
        fs::write(path, json).map_err(|e| file_error(e.to_string()))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.vm_host_name.trim().is_empty() {
            return Err(invalid("vm_host_name", &self.vm_host_name, "must not be empty"));
        }
        if self.vm_host_port == 0 {
            return Err(invalid("vm_host_port", &self.vm_host_port, "must be at least 1"));
        }
        if self.listen.graf() && self.port_graf < 1024 {
            return Err(invalid("port_graf", &self.port_graf, "listen port must be at least 1024"));
        }
        if self.listen.cons() && self.port_cons < 1024 {
            return Err(invalid("port_cons", &self.port_cons, "listen port must be at least 1024"));
        }
        if self.send_delay_ms > 9 {
            return Err(invalid("send_delay_ms", &self.send_delay_ms, "must be in 0..9"));
        }
        if !(3..=8).contains(&self.min_color_count) {
            return Err(invalid("min_color_count", &self.min_color_count, "must be in 3..8"));
        }
        if let Some(lu) = &self.vm_lu_name {
            if lu.len() > 32 {
                return Err(invalid("vm_lu_name", lu, "must not exceed 32 characters"));
            }
        }
        Ok(())
    }

    /// Parameter table as printed with `--dump-parms`
    pub fn describe(&self) -> String {
        format!(
            "MECAFF parameters:\n  vmHostName      : {}\n  vmHostPort      : {}\n  vmLUName        : {}\n  portGRAF        : {}\n  portCONS        : {}\n  listen for GRAF : {}\n  listen for CONS : {}\n  noDYNAMIC       : {}\n  sendDelay       : {}\n  minColorCount   : {}\n",
            self.vm_host_name,
            self.vm_host_port,
            self.vm_lu_name.as_deref().unwrap_or("-   (no LU name)"),
            self.port_graf,
            self.port_cons,
            self.listen.graf(),
            self.listen.cons(),
            self.no_dynamic,
            self.send_delay_ms,
            self.min_color_count,
        )
    }
}

fn invalid(parameter: &str, value: &dyn fmt::Display, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Determine the default config file path.
/// Priority:
/// 1) MECAFF_CONFIG env var
/// 2) $XDG_CONFIG_HOME/mecaff/config.json
/// 3) $HOME/.config/mecaff/config.json
/// 4) the platform config dir, else ./config.json
pub fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var("MECAFF_CONFIG") {
        return PathBuf::from(p);
    }

    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
        .or_else(dirs::config_dir);
    match base {
        Some(base) => base.join("mecaff").join("config.json"),
        None => PathBuf::from("config.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = GatewayConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.vm_host_port, 3270);
        assert_eq!(cfg.port_graf, 3277);
        assert_eq!(cfg.port_cons, 3215);
        assert_eq!(cfg.min_color_count, 4);
    }

    #[test]
    fn test_validation_ranges() {
        let mut cfg = GatewayConfig::default();
        cfg.send_delay_ms = 10;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidParameter { .. })));

        let mut cfg = GatewayConfig::default();
        cfg.min_color_count = 2;
        assert!(cfg.validate().is_err());

        let mut cfg = GatewayConfig::default();
        cfg.port_cons = 23;
        assert!(cfg.validate().is_err());
        cfg.listen = LineMode::Graf;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = GatewayConfig::load_or_default(&dir.path().join("absent.json"));
        assert_eq!(cfg, GatewayConfig::default());
    }

    #[test]
    fn test_partial_file_and_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "vm_host_name": "hercules", "listen": "cons" }"#).unwrap();

        let cfg = GatewayConfig::load_or_default(&path);
        assert_eq!(cfg.vm_host_name, "hercules");
        assert_eq!(cfg.listen, LineMode::Cons);
        assert_eq!(cfg.vm_host_port, 3270);

        let out = dir.path().join("sub").join("saved.json");
        cfg.save(&out).unwrap();
        assert_eq!(GatewayConfig::load(&out).unwrap(), cfg);
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(GatewayConfig::load(&path).is_err());
        assert_eq!(GatewayConfig::load_or_default(&path), GatewayConfig::default());

        let (cfg, problem) = GatewayConfig::load_lenient(&path);
        assert_eq!(cfg, GatewayConfig::default());
        match problem {
            Some(ConfigError::FileError { path: p, .. }) => assert_eq!(p, path.display().to_string()),
            other => panic!("unexpected load result {other:?}"),
        }
        assert!(GatewayConfig::load_lenient(&dir.path().join("absent.json")).1.is_none());
    }

    #[test]
    fn test_describe_without_lu() {
        let text = GatewayConfig::default().describe();
        assert!(text.contains("vmLUName        : -   (no LU name)"));
        assert!(text.contains("listen for CONS : true"));
    }
}
