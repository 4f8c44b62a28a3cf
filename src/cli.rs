//! Command-line flags (§6.3).

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "ble-proxyd", about = "Bluetooth-LE proxy daemon")]
pub struct Cli {
    /// Address to bind the control socket to.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the control socket to.
    #[arg(long, default_value_t = 6053)]
    pub port: u16,

    /// Name reported in DeviceInfoResponse.
    #[arg(long, default_value = "ble-proxyd")]
    pub name: String,

    /// Friendly name reported in DeviceInfoResponse.
    #[arg(long, default_value = "BLE Proxy")]
    pub friendly_name: String,

    /// Control-client password. Omit or leave empty to run unauthenticated.
    #[arg(long)]
    pub password: Option<String>,

    #[arg(long, default_value_t = 3)]
    pub max_connections: usize,

    #[arg(long, default_value_t = 16, visible_alias = "batch-size")]
    pub advertisement_batch_size: usize,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub active_connections: bool,

    /// Directory for the persisted service-tree and bonding cache (§6.4).
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Disable the on-disk cache entirely.
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn into_config(self) -> Config {
        let defaults = Config::default();
        Config {
            host: self.host,
            port: self.port,
            name: self.name,
            friendly_name: self.friendly_name,
            password: self.password.filter(|p| !p.is_empty()),
            max_connections: self.max_connections,
            advertisement_batch_size: self.advertisement_batch_size,
            active_connections: self.active_connections,
            cache_dir: if self.no_cache { None } else { self.cache_dir.or(defaults.cache_dir) },
            ..defaults
        }
    }
}
