//! NAS drivers and the registry that picks one
//!
//! A driver turns one appliance family into the seven resource ports. The
//! [`Nas`] handle groups them once every port is present.

pub mod unity;
pub mod veritas;

use crate::config::NasConfig;
use crate::domain::objects::{Disk, NasObject, NasServer, Pool};
use crate::domain::ports::{
    CacheResourceRef, CommandRunnerRef, DiskResource, DiskResourceRef, FileSystemResourceRef,
    NasServerResource, NasServerResourceRef, PoolResource, PoolResourceRef, Resource,
    ShareResourceRef, SnapshotResourceRef,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};
use veritas::{Flavor, Veritas};

// =============================================================================
// Driver Port
// =============================================================================

/// One appliance family bound to a transport
#[async_trait]
pub trait NasDriver: Send + Sync {
    /// Name used in messages (`SFS`, `VA`, `UnityXT`)
    fn name(&self) -> &'static str;

    /// Whether the connected appliance belongs to this driver
    async fn verify_discovery(&self) -> Result<bool>;

    /// Resource handles of the appliance
    fn nas(&self) -> Result<Nas>;
}

pub type NasDriverRef = Arc<dyn NasDriver>;

impl std::fmt::Debug for dyn NasDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NasDriver").field("name", &self.name()).finish()
    }
}

// =============================================================================
// Resource Set
// =============================================================================

/// Resources registered by a driver, validated into a [`Nas`]
#[derive(Default)]
pub struct ResourceSet {
    pub filesystem: Option<FileSystemResourceRef>,
    pub share: Option<ShareResourceRef>,
    pub disk: Option<DiskResourceRef>,
    pub pool: Option<PoolResourceRef>,
    pub cache: Option<CacheResourceRef>,
    pub snapshot: Option<SnapshotResourceRef>,
    pub nasserver: Option<NasServerResourceRef>,
}

impl ResourceSet {
    /// Fails with [`Error::Implementation`] naming every missing resource
    pub fn build(self, name: &'static str) -> Result<Nas> {
        let missing: Vec<&str> = [
            ("filesystem", self.filesystem.is_none()),
            ("share", self.share.is_none()),
            ("disk", self.disk.is_none()),
            ("pool", self.pool.is_none()),
            ("cache", self.cache.is_none()),
            ("snapshot", self.snapshot.is_none()),
            ("nasserver", self.nasserver.is_none()),
        ]
        .into_iter()
        .filter_map(|(kind, absent)| absent.then_some(kind))
        .collect();

        match self {
            ResourceSet {
                filesystem: Some(filesystem),
                share: Some(share),
                disk: Some(disk),
                pool: Some(pool),
                cache: Some(cache),
                snapshot: Some(snapshot),
                nasserver: Some(nasserver),
            } => Ok(Nas {
                name,
                filesystem,
                share,
                disk,
                pool,
                cache,
                snapshot,
                nasserver,
            }),
            _ => Err(Error::Implementation(format!(
                "The {} driver does not register the following resources: {}",
                name,
                missing.join(", ")
            ))),
        }
    }
}

// =============================================================================
// Nas Handle
// =============================================================================

/// Every resource of one appliance
#[derive(Clone)]
pub struct Nas {
    name: &'static str,
    filesystem: FileSystemResourceRef,
    share: ShareResourceRef,
    disk: DiskResourceRef,
    pool: PoolResourceRef,
    cache: CacheResourceRef,
    snapshot: SnapshotResourceRef,
    nasserver: NasServerResourceRef,
}

impl Nas {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn filesystem(&self) -> &FileSystemResourceRef {
        &self.filesystem
    }

    pub fn share(&self) -> &ShareResourceRef {
        &self.share
    }

    pub fn disk(&self) -> &DiskResourceRef {
        &self.disk
    }

    pub fn pool(&self) -> &PoolResourceRef {
        &self.pool
    }

    pub fn cache(&self) -> &CacheResourceRef {
        &self.cache
    }

    pub fn snapshot(&self) -> &SnapshotResourceRef {
        &self.snapshot
    }

    pub fn nasserver(&self) -> &NasServerResourceRef {
        &self.nasserver
    }
}

impl std::fmt::Debug for Nas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nas").field("name", &self.name).finish()
    }
}

// =============================================================================
// Unsupported Resource
// =============================================================================

/// Resource a family does not have; every operation is unsupported
pub struct UnsupportedResource<O> {
    nas: &'static str,
    _object: PhantomData<fn() -> O>,
}

impl<O> UnsupportedResource<O> {
    pub fn new(nas: &'static str) -> Self {
        Self {
            nas,
            _object: PhantomData,
        }
    }
}

#[async_trait]
impl<O: NasObject> Resource for UnsupportedResource<O> {
    type Object = O;

    fn nas_name(&self) -> &str {
        self.nas
    }

    async fn list(&self) -> Result<Vec<O>> {
        Err(Error::unsupported(O::KIND, "list"))
    }
}

impl DiskResource for UnsupportedResource<Disk> {}

impl PoolResource for UnsupportedResource<Pool> {}

impl NasServerResource for UnsupportedResource<NasServer> {}

// =============================================================================
// Driver Registry
// =============================================================================

/// Builds a driver over an SSH runner
pub type DriverFactory = fn(CommandRunnerRef, &NasConfig) -> Result<NasDriverRef>;

fn sfs(runner: CommandRunnerRef, config: &NasConfig) -> Result<NasDriverRef> {
    Ok(Arc::new(Veritas::new(Flavor::Sfs, runner, config)?))
}

fn va(runner: CommandRunnerRef, config: &NasConfig) -> Result<NasDriverRef> {
    Ok(Arc::new(Veritas::new(Flavor::Va, runner, config)?))
}

fn va74(runner: CommandRunnerRef, config: &NasConfig) -> Result<NasDriverRef> {
    Ok(Arc::new(Veritas::new(Flavor::Va74, runner, config)?))
}

/// SSH drivers in discovery order
pub struct DriverRegistry {
    factories: IndexMap<&'static str, DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// SFS, VA and VA74, tried in that order
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("SFS", sfs);
        registry.register("VA", va);
        registry.register("VA74", va74);
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: DriverFactory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Driver registered under `name`, ignoring case
    pub fn get(&self, name: &str, runner: CommandRunnerRef, config: &NasConfig) -> Result<NasDriverRef> {
        let factory = self
            .factories
            .iter()
            .find(|(registered, _)| registered.eq_ignore_ascii_case(name))
            .map(|(_, factory)| factory)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "Unknown driver \"{}\", expected one of: {}",
                    name,
                    self.names().join(", ")
                ))
            })?;
        factory(runner, config)
    }

    /// First driver whose discovery check passes on the connected appliance
    pub async fn discover(&self, runner: CommandRunnerRef, config: &NasConfig) -> Result<NasDriverRef> {
        for (name, factory) in &self.factories {
            let driver = factory(runner.clone(), config)?;
            debug!("Checking whether {} is a {} appliance", runner.host(), name);
            if driver.verify_discovery().await? {
                info!("Discovered the {} driver for {}", name, runner.host());
                return Ok(driver);
            }
        }
        Err(Error::UnableToDiscoverDriver(
            "Unable to discover a driver for the current NAS server".to_string(),
        ))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
