//! Veritas CLI family: Storage Foundation FileStore (SFS) and Access (VA)
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Resources  │──▶│ ClishSession │──▶│ SSH runner  │
//! │ fs, share, │   └──────────────┘   └─────────────┘
//! │ cache, ... │   ┌──────────────┐          ▲
//! │            │──▶│   VxTools    │──────────┘
//! └────────────┘   └──────────────┘
//! ```
//!
//! The flavours share every resource; they differ in the console path, the
//! output markers and a handful of display formats.

pub mod cache;
pub mod clish;
pub mod filesystem;
pub mod share;
pub mod snapshot;
pub mod storage;
pub mod vx;

pub use cache::Caches;
pub use clish::ClishSession;
pub use filesystem::FileSystems;
pub use share::Shares;
pub use snapshot::Snapshots;
pub use storage::{Disks, Pools};
pub use vx::VxTools;

use crate::config::{NasConfig, RetryConfig, TimeoutConfig};
use crate::domain::objects::NasServer;
use crate::domain::ports::CommandRunnerRef;
use crate::drivers::{Nas, NasDriver, ResourceSet, UnsupportedResource};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Flavours
// =============================================================================

/// Appliance generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavor {
    /// Storage Foundation FileStore
    Sfs,
    /// InfoScale Access up to 7.3
    Va,
    /// Access 7.4 and later
    Va74,
}

impl Flavor {
    /// Name used in messages
    pub fn name(self) -> &'static str {
        match self {
            Flavor::Sfs => "SFS",
            Flavor::Va | Flavor::Va74 => "VA",
        }
    }

    pub fn clish_path(self) -> &'static str {
        match self {
            Flavor::Sfs => "/opt/VRTSnasgw/clish/bin/clish",
            Flavor::Va => "/opt/SYMCsnas/clish/bin/clish",
            Flavor::Va74 => "/opt/VRTSnas/clish/bin/clish",
        }
    }

    /// Word opening console ERROR and INFO messages
    pub fn marker(self) -> &'static str {
        match self {
            Flavor::Sfs => "SFS",
            Flavor::Va | Flavor::Va74 => "ACCESS",
        }
    }

    pub fn is_access(self) -> bool {
        !matches!(self, Flavor::Sfs)
    }
}

// =============================================================================
// Driver Context
// =============================================================================

/// State shared by the resources of one driver
pub struct Context {
    pub flavor: Flavor,
    pub session: ClishSession,
    pub vx: VxTools,
    pub timeouts: TimeoutConfig,
    pub fs_get_retry: RetryConfig,
    pub(crate) patterns: Patterns,
}

/// Regex tables of every resource, compiled once per driver
pub(crate) struct Patterns {
    pub filesystem: filesystem::FsPatterns,
    pub share: share::SharePatterns,
    pub storage: storage::StoragePatterns,
    pub cache: cache::CachePatterns,
    pub snapshot: snapshot::SnapshotPatterns,
}

impl Context {
    pub fn new(flavor: Flavor, runner: CommandRunnerRef, config: &NasConfig) -> Result<Self> {
        Ok(Self {
            flavor,
            session: ClishSession::new(flavor, runner.clone(), config)?,
            vx: VxTools::new(runner, flavor.name())?,
            timeouts: config.timeouts.clone(),
            fs_get_retry: config.fs_get_retry.clone(),
            patterns: Patterns {
                filesystem: filesystem::FsPatterns::new(flavor)?,
                share: share::SharePatterns::new()?,
                storage: storage::StoragePatterns::new()?,
                cache: cache::CachePatterns::new(flavor)?,
                snapshot: snapshot::SnapshotPatterns::new(flavor)?,
            },
        })
    }

    pub fn nas(&self) -> &'static str {
        self.flavor.name()
    }

    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<Vec<String>> {
        self.session.execute(command, Some(timeout)).await
    }

    pub async fn listing(&self, command: &str) -> Result<Vec<String>> {
        self.execute(command, self.timeouts.listing()).await
    }
}

// =============================================================================
// Driver
// =============================================================================

/// A Veritas appliance behind one SSH runner
pub struct Veritas {
    ctx: Arc<Context>,
}

impl Veritas {
    pub fn new(flavor: Flavor, runner: CommandRunnerRef, config: &NasConfig) -> Result<Self> {
        Ok(Self {
            ctx: Arc::new(Context::new(flavor, runner, config)?),
        })
    }

    pub fn flavor(&self) -> Flavor {
        self.ctx.flavor
    }

    pub fn resources(&self) -> ResourceSet {
        let ctx = &self.ctx;
        ResourceSet {
            filesystem: Some(Arc::new(FileSystems::new(ctx.clone()))),
            share: Some(Arc::new(Shares::new(ctx.clone()))),
            disk: Some(Arc::new(Disks::new(ctx.clone()))),
            pool: Some(Arc::new(Pools::new(ctx.clone()))),
            cache: Some(Arc::new(Caches::new(ctx.clone()))),
            snapshot: Some(Arc::new(Snapshots::new(ctx.clone()))),
            nasserver: Some(Arc::new(UnsupportedResource::<NasServer>::new(ctx.nas()))),
        }
    }
}

#[async_trait]
impl NasDriver for Veritas {
    fn name(&self) -> &'static str {
        self.ctx.nas()
    }

    async fn verify_discovery(&self) -> Result<bool> {
        self.ctx.session.verify_discovery().await
    }

    fn nas(&self) -> Result<Nas> {
        self.resources().build(self.ctx.nas())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ResourceKind};
    use crate::testing::FakeRunner;
    use assert_matches::assert_matches;

    #[test]
    fn test_flavors() {
        assert_eq!(Flavor::Va74.name(), "VA");
        assert_eq!(Flavor::Va74.clish_path(), "/opt/VRTSnas/clish/bin/clish");
        assert_eq!(Flavor::Va.marker(), "ACCESS");
        assert!(!Flavor::Sfs.is_access());
    }

    #[tokio::test]
    async fn test_nas_servers_unsupported() {
        let runner = FakeRunner::new();
        let driver = Veritas::new(Flavor::Sfs, runner, &NasConfig::without_delays()).unwrap();
        let nas = driver.nas().unwrap();
        assert_eq!(nas.name(), "SFS");

        let err = nas.nasserver().list().await.unwrap_err();
        assert_matches!(
            err,
            Error::Unsupported {
                kind: ResourceKind::NasServer,
                operation: "list"
            }
        );
    }
}
