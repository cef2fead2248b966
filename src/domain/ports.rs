//! Domain Ports - Transport and resource traits
//!
//! These traits define the boundaries between the resource logic and the
//! appliances. Transports move bytes (an SSH command runner, an HTTP client);
//! resources implement the uniform list/get/exists/create/delete/resize
//! contract for one kind of object on one vendor.

use crate::domain::objects::{
    Cache, Disk, FileSystem, FileSystemUsage, NasObject, NasServer, Pool, Share, Snapshot,
};
use crate::error::{Error, ResourceKind, Result};
use crate::resources::{get_from_listing, Identifier};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Command Transport Port
// =============================================================================

/// Raw result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Port for running shell commands on an appliance
///
/// Implementations must fail with [`Error::ExecutionTimeout`] when `timeout`
/// elapses; the outcome of the command is then unknown.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one command line
    async fn run(&self, command: &str, timeout: Option<Duration>) -> Result<CommandOutput>;

    /// Open the session
    async fn connect(&self) -> Result<()>;

    /// Close the session
    async fn close(&self) -> Result<()>;

    /// Whether the session is currently usable
    fn is_connected(&self) -> bool;

    /// Host name, for messages
    fn host(&self) -> &str;
}

// =============================================================================
// REST Transport Port
// =============================================================================

/// HTTP methods used by REST appliances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// Response of a REST request; any status code is a response
#[derive(Debug, Clone, Default)]
pub struct RestResponse {
    pub status: u16,
    pub body: serde_json::Value,
    pub headers: IndexMap<String, String>,
}

impl RestResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body,
            headers: IndexMap::new(),
        }
    }
}

/// Port for issuing HTTP requests to a REST appliance
///
/// Only connection-level failures are errors; HTTP error statuses come back
/// as a [`RestResponse`].
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<RestResponse>;

    /// Host name, for messages
    fn host(&self) -> &str;
}

// =============================================================================
// Generic Resource Port
// =============================================================================

/// The list/get/exists contract shared by every resource
#[async_trait]
pub trait Resource: Send + Sync {
    type Object: NasObject;

    /// Appliance name used in messages (`SFS`, `VA`, `UnityXT`)
    fn nas_name(&self) -> &str;

    /// List every object of this kind
    ///
    /// Fails with [`Error::IncompleteParsedInformation`] carrying all parsed
    /// objects when one of them has an unresolved plain field.
    async fn list(&self) -> Result<Vec<Self::Object>>;

    /// Find one object by its identifier fields
    async fn get(&self, identifier: Identifier) -> Result<Self::Object> {
        get_from_listing(self, &identifier).await
    }

    async fn exists(&self, identifier: Identifier) -> Result<bool> {
        match self.get(identifier).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found(<Self::Object as NasObject>::KIND) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Per-kind Resource Ports
// =============================================================================

/// Parameters of a file system creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileSystem {
    pub name: String,
    /// Size string such as `10G`
    pub size: String,
    pub pool: String,
    /// Volume layout on CLI appliances, NAS server name on REST appliances
    pub layout: String,
    /// `"true"` or `"false"`, REST appliances only
    pub data_reduction: Option<String>,
}

impl CreateFileSystem {
    pub fn new(name: impl Into<String>, size: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: size.into(),
            pool: pool.into(),
            layout: "simple".to_string(),
            data_reduction: None,
        }
    }

    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = layout.into();
        self
    }
}

#[async_trait]
pub trait FileSystemResource: Resource<Object = FileSystem> {
    async fn create(&self, request: &CreateFileSystem) -> Result<FileSystem>;

    async fn delete(&self, name: &str) -> Result<()>;

    /// Grow a file system; shrinking is never supported
    async fn resize(&self, name: &str, size: &str, pool: Option<&str>) -> Result<()>;

    /// Bring a file system online, or offline with `online = false`
    async fn online(&self, name: &str, online: bool) -> Result<()>;

    /// Whether a snapshot restore is in progress on the file system
    async fn is_restore_running(&self, name: &str) -> Result<bool>;

    async fn usage(&self) -> Result<Vec<FileSystemUsage>> {
        Err(Error::unsupported(ResourceKind::FileSystem, "usage"))
    }

    async fn change_data_reduction(&self, _name: &str, _enabled: &str) -> Result<()> {
        Err(Error::unsupported(
            ResourceKind::FileSystem,
            "change_data_reduction",
        ))
    }
}

#[async_trait]
pub trait ShareResource: Resource<Object = Share> {
    async fn create(&self, name: &str, client: &str, options: &str) -> Result<Share>;

    async fn delete(&self, name: &str, client: &str) -> Result<()>;
}

#[async_trait]
pub trait DiskResource: Resource<Object = Disk> {
    async fn create(&self, _name: &str) -> Result<Disk> {
        Err(Error::unsupported(ResourceKind::Disk, "create"))
    }

    async fn delete(&self, _name: &str) -> Result<()> {
        Err(Error::unsupported(ResourceKind::Disk, "delete"))
    }
}

#[async_trait]
pub trait PoolResource: Resource<Object = Pool> {
    async fn create(&self, _name: &str) -> Result<Pool> {
        Err(Error::unsupported(ResourceKind::Pool, "create"))
    }

    async fn delete(&self, _name: &str) -> Result<()> {
        Err(Error::unsupported(ResourceKind::Pool, "delete"))
    }
}

#[async_trait]
pub trait CacheResource: Resource<Object = Cache> {
    async fn create(&self, name: &str, size: &str, pool: &str) -> Result<Cache>;

    async fn delete(&self, name: &str) -> Result<()>;

    async fn resize(&self, name: &str, size: &str, pool: Option<&str>) -> Result<()>;

    /// Names of the snapshots stored in a cache
    async fn related_snapshots(&self, name: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait SnapshotResource: Resource<Object = Snapshot> {
    async fn create(&self, name: &str, filesystem: &str, cache: &str) -> Result<Snapshot>;

    async fn delete(&self, name: &str, filesystem: &str) -> Result<()>;

    /// Roll a file system back to a snapshot
    async fn restore(&self, name: &str, filesystem: &str) -> Result<()>;

    /// Raw description lines of a snapshot
    async fn rollback_info(&self, name: &str) -> Result<Vec<String>>;
}

/// Parameters of a NAS server creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNasServer {
    pub name: String,
    pub pool: String,
    /// Comma separated port numbers, e.g. `"0,2"`
    pub ports: String,
    /// `"sp,ip,netmask,gateway"`
    pub network: String,
    /// Comma separated, e.g. `"nfsv3,nfsv4"`
    pub protocols: String,
    pub ndmp_password: String,
}

#[async_trait]
pub trait NasServerResource: Resource<Object = NasServer> {
    async fn create(&self, _request: &CreateNasServer) -> Result<NasServer> {
        Err(Error::unsupported(ResourceKind::NasServer, "create"))
    }

    async fn delete(&self, _name: &str) -> Result<()> {
        Err(Error::unsupported(ResourceKind::NasServer, "delete"))
    }

    /// Full appliance description of a NAS server
    async fn details(&self, _name: &str) -> Result<serde_json::Value> {
        Err(Error::unsupported(ResourceKind::NasServer, "details"))
    }

    /// Enable exactly the given NFS protocols on every NFS server
    async fn change_sharing_protocol(&self, _protocols: &str) -> Result<()> {
        Err(Error::unsupported(
            ResourceKind::NasServer,
            "change_sharing_protocol",
        ))
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type CommandRunnerRef = Arc<dyn CommandRunner>;
pub type RestTransportRef = Arc<dyn RestTransport>;
pub type FileSystemResourceRef = Arc<dyn FileSystemResource>;
pub type ShareResourceRef = Arc<dyn ShareResource>;
pub type DiskResourceRef = Arc<dyn DiskResource>;
pub type PoolResourceRef = Arc<dyn PoolResource>;
pub type CacheResourceRef = Arc<dyn CacheResource>;
pub type SnapshotResourceRef = Arc<dyn SnapshotResource>;
pub type NasServerResourceRef = Arc<dyn NasServerResource>;
