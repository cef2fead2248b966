//! Unified NAS - one resource model over heterogeneous NAS appliances
//!
//! Drives Veritas FileStore / Access appliances through their clish console
//! over SSH and Dell EMC UnityXT appliances through their REST API, behind
//! the same file system, share, disk, pool, cache, snapshot and NAS server
//! resources.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                        NasConnection / nasctl                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                              Nas façade                                     │
//! │   filesystem · share · disk · pool · cache · snapshot · nasserver          │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────────────────────────┐  ┌─────────────────────────────────┐ │
//! │  │   Veritas drivers (SFS, VA, VA74) │  │        UnityXT driver           │ │
//! │  │   ClishSession · VxTools          │  │        UnityApi                 │ │
//! │  │   output parsers                  │  │                                 │ │
//! │  └─────────────────┬─────────────────┘  └────────────────┬────────────────┘ │
//! ├────────────────────┼─────────────────────────────────────┼──────────────────┤
//! │           CommandRunner (SSH)                   RestTransport (HTTPS)       │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`domain`]: Size arithmetic, domain objects and the resource ports
//! - [`parsers`]: Appliance console output parsers
//! - [`resources`]: Identifier matching and the generic get/exists protocol
//! - [`drivers`]: Vendor drivers and the driver registry
//! - [`transport`]: SSH command runner
//! - [`connection`]: Session lifecycle
//! - [`config`]: Connection and timing configuration
//! - [`error`]: Error types and handling

pub mod config;
pub mod connection;
pub mod domain;
pub mod drivers;
pub mod error;
pub mod parsers;
pub mod resources;
pub mod retry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{NasConfig, NasKind};

pub use connection::NasConnection;

pub use domain::{
    AlignedSize, Attr, Cache, Disk, FileSystem, FileSystemUsage, NasObject, NasServer, ParsedData,
    Pool, Share, Size, Snapshot, StringOptions, Unit,
};

pub use domain::ports::{
    CacheResource, CommandOutput, CommandRunner, CreateFileSystem, CreateNasServer, DiskResource,
    FileSystemResource, NasServerResource, PoolResource, Resource, RestTransport, ShareResource,
    SnapshotResource,
};

pub use drivers::{DriverRegistry, Nas, NasDriver, NasDriverRef};

pub use error::{Error, ErrorAction, ErrorCategory, ResourceKind, Result};

pub use resources::Identifier;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
