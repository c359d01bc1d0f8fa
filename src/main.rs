//! MECAFF gateway entry point
//!
//! Reads the configuration file, overlays the command line, initializes
//! logging and serves GRAF and/or CONS connections until killed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use mecaff::config::{default_config_path, GatewayConfig, LineMode};
use mecaff::network::Gateway;

/// Multiline External Console And Fullscreen Facility for VM/370
#[derive(Debug, Parser)]
#[command(name = "mecaff", version, about)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host name of the VM/370 (Hercules) machine
    #[arg(long)]
    vm_host_name: Option<String>,

    /// Hercules 3270 port
    #[arg(long)]
    vm_host_port: Option<u16>,

    /// LU name to request from Hercules
    #[arg(long)]
    vm_lu_name: Option<String>,

    /// Listen port for 3270 (GRAF) connections
    #[arg(long)]
    port_graf: Option<u16>,

    /// Listen port for line-mode (CONS) connections
    #[arg(long)]
    port_cons: Option<u16>,

    /// Which listeners to start
    #[arg(long = "do", value_enum)]
    listen: Option<LineMode>,

    /// Use predefined terminal types only, never query the terminal
    #[arg(long)]
    no_dynamic: bool,

    /// Pause in ms before each screen update (0..9)
    #[arg(long)]
    send_delay: Option<u8>,

    /// Colors a terminal must report to be used in color (3..8)
    #[arg(long)]
    min_color_count: Option<u8>,

    /// Print the effective parameters at startup
    #[arg(long)]
    dump_parms: bool,

    /// Default log filter, RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply_to(self, config: &mut GatewayConfig) {
        if let Some(v) = self.vm_host_name {
            config.vm_host_name = v;
        }
        if let Some(v) = self.vm_host_port {
            config.vm_host_port = v;
        }
        if let Some(v) = self.vm_lu_name {
            config.vm_lu_name = Some(v);
        }
        if let Some(v) = self.port_graf {
            config.port_graf = v;
        }
        if let Some(v) = self.port_cons {
            config.port_cons = v;
        }
        if let Some(v) = self.listen {
            config.listen = v;
        }
        if let Some(v) = self.send_delay {
            config.send_delay_ms = v;
        }
        if let Some(v) = self.min_color_count {
            config.min_color_count = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
        config.no_dynamic |= self.no_dynamic;
        config.dump_parms |= self.dump_parms;
    }
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();
    let config_path = cli.config.take().unwrap_or_else(default_config_path);
    let (mut config, load_problem) = GatewayConfig::load_lenient(&config_path);
    cli.apply_to(&mut config);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str())).init();
    if let Some(e) = load_problem {
        warn!("{e}, using defaults");
    }

    config.validate().context("invalid MECAFF parameters")?;
    if config.dump_parms {
        print!("{}", config.describe());
    }
    info!("MECAFF {} starting", env!("CARGO_PKG_VERSION"));

    let gateway = Gateway::new(config);
    gateway.run().context("MECAFF gateway failed")?;
    Ok(())
}
