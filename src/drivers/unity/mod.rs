//! UnityXT REST family
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌─────────────────┐
//! │ Resources  │──▶│ UnityApi │──▶│ RestTransport   │──▶ https://<host>/api
//! └────────────┘   └──────────┘   └─────────────────┘
//! ```
//!
//! Unity has no snapshot caches, and disks and pools are not managed here.

pub mod filesystem;
pub mod nasserver;
pub mod rest;
pub mod share;
pub mod snapshot;

pub use filesystem::UnityFileSystems;
pub use nasserver::UnityNasServers;
pub use rest::{ReqwestTransport, UnityApi};
pub use share::UnityShares;
pub use snapshot::UnitySnapshots;

use crate::config::{NasConfig, RestConfig};
use crate::domain::objects::{Cache, Disk, Pool};
use crate::domain::ports::{CacheResource, Method, Resource, RestTransportRef};
use crate::drivers::{Nas, NasDriver, ResourceSet, UnsupportedResource};
use crate::error::{Error, ResourceKind, Result};
use async_trait::async_trait;
use rest::LOGIN_SESSION;
use std::sync::Arc;
use tracing::debug;

/// Appliance name used in messages
pub const UNITY: &str = "UnityXT";

// =============================================================================
// Caches
// =============================================================================

/// Unity snapshots need no cache: the listing is empty and nothing else
/// applies
pub struct UnityCaches;

#[async_trait]
impl Resource for UnityCaches {
    type Object = Cache;

    fn nas_name(&self) -> &str {
        UNITY
    }

    async fn list(&self) -> Result<Vec<Cache>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl CacheResource for UnityCaches {
    async fn create(&self, _name: &str, _size: &str, _pool: &str) -> Result<Cache> {
        Err(Error::unsupported(ResourceKind::Cache, "create"))
    }

    async fn delete(&self, _name: &str) -> Result<()> {
        Err(Error::unsupported(ResourceKind::Cache, "delete"))
    }

    async fn resize(&self, _name: &str, _size: &str, _pool: Option<&str>) -> Result<()> {
        Err(Error::unsupported(ResourceKind::Cache, "resize"))
    }

    async fn related_snapshots(&self, _name: &str) -> Result<Vec<String>> {
        Err(Error::unsupported(ResourceKind::Cache, "related_snapshots"))
    }
}

// =============================================================================
// Driver
// =============================================================================

/// UnityXT appliance reached over its REST API
pub struct UnityXt {
    api: Arc<UnityApi>,
    rest: RestConfig,
}

impl UnityXt {
    pub fn new(transport: RestTransportRef, config: &NasConfig) -> Self {
        Self {
            api: Arc::new(UnityApi::new(transport)),
            rest: config.rest.clone(),
        }
    }

    /// Driver over HTTPS to the configured host
    pub fn connect(config: &NasConfig) -> Result<Self> {
        let connection = &config.connection;
        let password = connection.password.as_deref().ok_or_else(|| {
            Error::Configuration("A password is required to log in to a UnityXT appliance".to_string())
        })?;
        let transport = ReqwestTransport::new(
            &connection.host,
            connection.port,
            &connection.user,
            password,
            &config.rest,
        )?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn api(&self) -> &Arc<UnityApi> {
        &self.api
    }

    pub async fn login(&self) -> Result<()> {
        debug!("UnityXT.login");
        self.api.login().await
    }

    pub async fn logout(&self) -> Result<()> {
        debug!("UnityXT.logout");
        self.api.logout().await
    }

    pub fn resources(&self) -> ResourceSet {
        let api = &self.api;
        ResourceSet {
            filesystem: Some(Arc::new(UnityFileSystems::new(api.clone()))),
            share: Some(Arc::new(UnityShares::new(api.clone()))),
            disk: Some(Arc::new(UnsupportedResource::<Disk>::new(UNITY))),
            pool: Some(Arc::new(UnsupportedResource::<Pool>::new(UNITY))),
            cache: Some(Arc::new(UnityCaches)),
            snapshot: Some(Arc::new(UnitySnapshots::new(api.clone()))),
            nasserver: Some(Arc::new(UnityNasServers::new(api.clone(), &self.rest))),
        }
    }
}

#[async_trait]
impl NasDriver for UnityXt {
    fn name(&self) -> &'static str {
        UNITY
    }

    /// A session listing answers only on Unity
    async fn verify_discovery(&self) -> Result<bool> {
        let response = self
            .api
            .request(Method::Get, LOGIN_SESSION, None)
            .await?;
        Ok(response.status == 200)
    }

    fn nas(&self) -> Result<Nas> {
        self.resources().build(UNITY)
    }
}
