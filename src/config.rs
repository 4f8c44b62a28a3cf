//! Runtime configuration: CLI flags plus the timeouts §5 pins as defaults.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub friendly_name: String,
    pub password: Option<String>,
    pub max_connections: usize,
    pub advertisement_batch_size: usize,
    pub active_connections: bool,
    pub cache_dir: Option<std::path::PathBuf>,

    pub connect_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub gatt_op_timeout: Duration,
    pub ping_timeout: Duration,
    pub flush_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 6053,
            name: "ble-proxyd".to_string(),
            friendly_name: "BLE Proxy".to_string(),
            password: None,
            max_connections: 3,
            advertisement_batch_size: 16,
            active_connections: true,
            cache_dir: default_cache_dir(),

            connect_timeout: Duration::from_secs(20),
            disconnect_timeout: Duration::from_secs(5),
            gatt_op_timeout: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(90),
            flush_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn requires_password(&self) -> bool {
        self.password.as_ref().is_some_and(|p| !p.is_empty())
    }
}

fn default_cache_dir() -> Option<std::path::PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        if !xdg.is_empty() {
            return Some(std::path::PathBuf::from(xdg).join("ble-proxyd"));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| std::path::PathBuf::from(home).join(".cache").join("ble-proxyd"))
}
