//! Persisted service-tree and bonding-record cache (§6.4).
//!
//! One JSON file per peripheral under `<cache_dir>/services/<hex>.json` and
//! `<cache_dir>/bonds/<hex>.json`. Service-tree entries expire after 30
//! days; bonding records never expire automatically.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ble_proto::{AddressType, PeripheralAddress};

const SERVICE_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDescriptor {
    pub uuid_hi: u64,
    pub uuid_lo: u64,
    pub handle: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedCharacteristic {
    pub uuid_hi: u64,
    pub uuid_lo: u64,
    pub handle: u16,
    pub properties: u32,
    pub descriptors: Vec<CachedDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedService {
    pub uuid_hi: u64,
    pub uuid_lo: u64,
    pub handle: u16,
    pub characteristics: Vec<CachedCharacteristic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServiceCacheFile {
    address: u64,
    address_type: u32,
    created_at: u64,
    services: Vec<CachedService>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondingRecord {
    pub address: u64,
    pub address_type: u32,
    pub created_at: u64,
}

/// Service-tree and bonding-record storage rooted at one directory.
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn services_dir(&self) -> PathBuf {
        self.root.join("services")
    }

    fn bonds_dir(&self) -> PathBuf {
        self.root.join("bonds")
    }

    fn entry_path(dir: &Path, address: PeripheralAddress) -> PathBuf {
        dir.join(format!("{}.json", address.to_hex().replace(':', "")))
    }

    pub fn save_services(
        &self,
        address: PeripheralAddress,
        services: Vec<CachedService>,
    ) -> Result<(), CacheError> {
        let dir = self.services_dir();
        std::fs::create_dir_all(&dir)?;
        let file = ServiceCacheFile {
            address: address.to_wire_u64(),
            address_type: address.address_type.to_wire(),
            created_at: unix_now(),
            services,
        };
        let path = Self::entry_path(&dir, address);
        std::fs::write(path, serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }

    /// Returns `None` if there is no entry, or the entry is older than
    /// [`SERVICE_CACHE_TTL`].
    pub fn load_services(
        &self,
        address: PeripheralAddress,
    ) -> Result<Option<Vec<CachedService>>, CacheError> {
        let path = Self::entry_path(&self.services_dir(), address);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: ServiceCacheFile = serde_json::from_slice(&bytes)?;
        let age = unix_now().saturating_sub(file.created_at);
        if age > SERVICE_CACHE_TTL.as_secs() {
            return Ok(None);
        }
        Ok(Some(file.services))
    }

    pub fn save_bonding(&self, address: PeripheralAddress) -> Result<(), CacheError> {
        let dir = self.bonds_dir();
        std::fs::create_dir_all(&dir)?;
        let record = BondingRecord {
            address: address.to_wire_u64(),
            address_type: address.address_type.to_wire(),
            created_at: unix_now(),
        };
        let path = Self::entry_path(&dir, address);
        std::fs::write(path, serde_json::to_vec_pretty(&record)?)?;
        Ok(())
    }

    pub fn load_bonding(
        &self,
        address: PeripheralAddress,
    ) -> Result<Option<BondingRecord>, CacheError> {
        let path = Self::entry_path(&self.bonds_dir(), address);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn clear(&self, address: PeripheralAddress) -> Result<(), CacheError> {
        for path in [
            Self::entry_path(&self.services_dir(), address),
            Self::entry_path(&self.bonds_dir(), address),
        ] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn from_adapter_services(services: &[ble_adapter::Service]) -> Vec<CachedService> {
    services
        .iter()
        .map(|svc| CachedService {
            uuid_hi: (svc.uuid.0 >> 64) as u64,
            uuid_lo: svc.uuid.0 as u64,
            handle: svc.handle,
            characteristics: svc
                .characteristics
                .iter()
                .map(|chr| CachedCharacteristic {
                    uuid_hi: (chr.uuid.0 >> 64) as u64,
                    uuid_lo: chr.uuid.0 as u64,
                    handle: chr.handle,
                    properties: properties_bitfield(&chr.properties),
                    descriptors: chr
                        .descriptors
                        .iter()
                        .map(|desc| CachedDescriptor {
                            uuid_hi: (desc.uuid.0 >> 64) as u64,
                            uuid_lo: desc.uuid.0 as u64,
                            handle: desc.handle,
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect()
}

fn properties_bitfield(props: &ble_adapter::CharacteristicProperties) -> u32 {
    let mut bits = 0;
    if props.read {
        bits |= 0x01;
    }
    if props.write_without_response {
        bits |= 0x02;
    }
    if props.write {
        bits |= 0x04;
    }
    if props.notify {
        bits |= 0x08;
    }
    if props.indicate {
        bits |= 0x10;
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(v: u64) -> PeripheralAddress {
        PeripheralAddress::from_wire_u64(v, AddressType::Public)
    }

    #[test]
    fn services_round_trip_through_disk() {
        let dir = std::env::temp_dir().join(format!("ble-proxyd-cache-test-{}", std::process::id()));
        let cache = Cache::new(dir.clone());
        let services = vec![CachedService {
            uuid_hi: 1,
            uuid_lo: 2,
            handle: 10,
            characteristics: vec![],
        }];
        cache.save_services(addr(1), services.clone()).unwrap();
        let loaded = cache.load_services(addr(1)).unwrap().unwrap();
        assert_eq!(loaded.len(), services.len());
        assert_eq!(loaded[0].handle, 10);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_entry_is_none() {
        let dir = std::env::temp_dir().join(format!("ble-proxyd-cache-test-missing-{}", std::process::id()));
        let cache = Cache::new(dir.clone());
        assert!(cache.load_services(addr(2)).unwrap().is_none());
        assert!(cache.load_bonding(addr(2)).unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn bonding_round_trips_and_never_expires_by_read_logic() {
        let dir = std::env::temp_dir().join(format!("ble-proxyd-cache-test-bond-{}", std::process::id()));
        let cache = Cache::new(dir.clone());
        cache.save_bonding(addr(3)).unwrap();
        let record = cache.load_bonding(addr(3)).unwrap().unwrap();
        assert_eq!(record.address, 3);
        std::fs::remove_dir_all(&dir).ok();
    }
}
