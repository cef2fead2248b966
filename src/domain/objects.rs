//! NAS domain objects
//!
//! Objects are plain records built by a resource's `list`, `get` or `create`.
//! Operations on them go back through the resource that produced them (see
//! [`crate::drivers::Nas`]). Identity is a subset of fields: `name` for most
//! kinds, `(name, client)` for shares.

use crate::domain::attr::Attr;
use crate::domain::options::StringOptions;
use crate::domain::size::{AlignedSize, Size, Unit};
use crate::error::ResourceKind;
use crate::parsers::VxBlock;
use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use std::fmt;
use tracing::warn;

// =============================================================================
// Object Trait
// =============================================================================

/// Common behaviour of every NAS object
pub trait NasObject: Clone + fmt::Debug + Send + Sync + 'static {
    /// Kind reported in errors
    const KIND: ResourceKind;

    /// Fields that identify one object of this kind
    const IDENTIFIER_KEYS: &'static [&'static str] = &["name"];

    fn name(&self) -> &str;

    /// Value of an identifier field
    fn identifier_value(&self, key: &str) -> Option<String> {
        match key {
            "name" => Some(self.name().to_string()),
            _ => None,
        }
    }

    /// Plain fields the appliance left empty
    fn missing_fields(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Displayable fields, used by [`NasObject::diff`]
    fn fields(&self) -> Vec<(&'static str, String)>;

    /// Fields that differ from `other`, as `(field, ours, theirs)`
    fn diff(&self, other: &Self) -> Vec<(&'static str, String, String)> {
        let theirs = other.fields();
        self.fields()
            .into_iter()
            .zip(theirs)
            .filter(|((_, a), (_, b))| a != b)
            .map(|((field, a), (_, b))| (field, a, b))
            .collect()
    }

    /// Human readable form of [`NasObject::diff`]
    fn diff_display(&self, other: &Self) -> String {
        self.diff(other)
            .into_iter()
            .map(|(field, a, b)| format!("{}: \"{}\" != \"{}\"", field, a, b))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn into_parsed(items: Vec<Self>) -> ParsedData;

    /// Objects carried by a parsed payload, if it holds this kind
    fn from_parsed(data: &ParsedData) -> Option<Vec<Self>>;
}

fn optional<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "None".to_string())
}

// =============================================================================
// Pool / Disk
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pool {
    pub name: String,
}

impl Pool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disk {
    pub name: String,
}

impl Disk {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

// =============================================================================
// File System
// =============================================================================

/// A file system exported by the appliance
#[derive(Debug, Clone, Serialize)]
pub struct FileSystem {
    pub name: String,
    pub size: AlignedSize,
    pub layout: Option<String>,
    pub pool: Attr<Pool>,
    pub online: bool,
    /// Disk group alignment in bytes
    #[serde(skip)]
    pub alignment: Attr<u64>,
    /// Topology block from `vxprint`, empty on REST appliances
    #[serde(skip)]
    pub properties: Attr<VxBlock>,
}

impl FileSystem {
    pub fn new(name: impl Into<String>, size: AlignedSize, layout: Option<String>, pool: Attr<Pool>) -> Self {
        Self {
            name: name.into(),
            size,
            layout,
            pool,
            online: true,
            alignment: Attr::value(AlignedSize::BLOCK_SIZE),
            properties: Attr::value(VxBlock::default()),
        }
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn with_alignment(mut self, alignment: Attr<u64>) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_properties(mut self, properties: VxBlock) -> Self {
        self.properties = Attr::value(properties);
        self
    }

    pub fn pool_name(&self) -> Option<&str> {
        self.pool.peek().map(|p| p.name.as_str())
    }

    /// Disk group alignment, 512 bytes when it cannot be determined
    pub async fn disk_alignment(&self) -> u64 {
        match self.alignment.resolve().await {
            Ok(Some(alignment)) => *alignment,
            Ok(None) => AlignedSize::BLOCK_SIZE,
            Err(e) => {
                warn!("Could not get the disk alignment of {}: {}", self.name, e);
                AlignedSize::BLOCK_SIZE
            }
        }
    }

    /// Size compared with the disk group alignment
    pub async fn aligned_size(&self) -> AlignedSize {
        let alignment = self.disk_alignment().await;
        self.size.clone().with_alignment(alignment)
    }

    /// Whether `size` lands on this file system's size once aligned
    pub async fn size_matches(&self, size: &Size) -> bool {
        self.aligned_size().await == *size
    }
}

impl PartialEq for FileSystem {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.size == other.size
            && self.layout == other.layout
            && self.pool_name() == other.pool_name()
    }
}

impl NasObject for FileSystem {
    const KIND: ResourceKind = ResourceKind::FileSystem;

    fn name(&self) -> &str {
        &self.name
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.layout.is_none() {
            missing.push("layout");
        }
        if self.pool.is_missing() {
            missing.push("pool");
        }
        missing
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("size", self.size.to_string()),
            ("layout", optional(self.layout.as_deref())),
            ("pool", optional(self.pool_name())),
            ("online", self.online.to_string()),
        ]
    }

    fn into_parsed(items: Vec<Self>) -> ParsedData {
        ParsedData::FileSystems(items)
    }

    fn from_parsed(data: &ParsedData) -> Option<Vec<Self>> {
        match data {
            ParsedData::FileSystems(items) => Some(items.clone()),
            _ => None,
        }
    }
}

/// Space usage of a file system
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSystemUsage {
    #[serde(rename = "FileSystem")]
    pub filesystem: String,
    /// Percentage with one decimal, e.g. `42.5%`
    #[serde(rename = "Use%")]
    pub use_percent: String,
}

// =============================================================================
// Share
// =============================================================================

/// An NFS export of a path to one client
#[derive(Debug, Clone, Serialize)]
pub struct Share {
    pub name: String,
    /// Client host, network or empty for everyone
    pub client: String,
    pub options: StringOptions,
    pub faulted: bool,
}

impl Share {
    pub fn new(name: impl Into<String>, client: impl Into<String>, options: StringOptions) -> Self {
        Self {
            name: name.into(),
            client: client.into(),
            options,
            faulted: false,
        }
    }
}

impl PartialEq for Share {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.client == other.client && self.options == other.options
    }
}

impl NasObject for Share {
    const KIND: ResourceKind = ResourceKind::Share;
    const IDENTIFIER_KEYS: &'static [&'static str] = &["name", "client"];

    fn name(&self) -> &str {
        &self.name
    }

    fn identifier_value(&self, key: &str) -> Option<String> {
        match key {
            "name" => Some(self.name.clone()),
            "client" => Some(self.client.clone()),
            _ => None,
        }
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("client", self.client.clone()),
            ("options", self.options.to_string()),
            ("faulted", self.faulted.to_string()),
        ]
    }

    fn into_parsed(items: Vec<Self>) -> ParsedData {
        ParsedData::Shares(items)
    }

    fn from_parsed(data: &ParsedData) -> Option<Vec<Self>> {
        match data {
            ParsedData::Shares(items) => Some(items.clone()),
            _ => None,
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Cache object holding the changed blocks of space-optimised snapshots
#[derive(Debug, Clone, Serialize)]
pub struct Cache {
    pub name: String,
    pub size: Option<Size>,
    pub pool: Attr<Pool>,
    pub used: Option<Size>,
    pub available: Option<Size>,
    pub snapshot_count: Option<u32>,
}

impl Cache {
    pub fn new(name: impl Into<String>, size: Option<Size>, pool: Attr<Pool>) -> Self {
        Self {
            name: name.into(),
            size,
            pool,
            used: Some(Size::zero()),
            available: Some(Size::zero()),
            snapshot_count: None,
        }
    }

    pub fn pool_name(&self) -> Option<&str> {
        self.pool.peek().map(|p| p.name.as_str())
    }

    /// Used space as a percentage of the size
    pub fn used_percentage(&self) -> Option<f64> {
        percentage(self.used?, self.size?)
    }

    /// Available space as a percentage of the size
    pub fn available_percentage(&self) -> Option<f64> {
        percentage(self.available?, self.size?)
    }

    /// True when the appliance reports no space left
    pub fn is_full(&self) -> bool {
        self.available.map_or(true, |a| a.bytes() == 0)
    }
}

fn percentage(part: Size, total: Size) -> Option<f64> {
    let total = total.number_in_unit(Unit::M);
    if total == 0.0 {
        return None;
    }
    Some(part.number_in_unit(Unit::M) / total * 100.0)
}

impl PartialEq for Cache {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.size == other.size && self.pool_name() == other.pool_name()
    }
}

impl NasObject for Cache {
    const KIND: ResourceKind = ResourceKind::Cache;

    fn name(&self) -> &str {
        &self.name
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.size.is_none() {
            missing.push("size");
        }
        if self.pool.is_missing() {
            missing.push("pool");
        }
        if self.used.is_none() {
            missing.push("used");
        }
        if self.available.is_none() {
            missing.push("available");
        }
        missing
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("size", optional(self.size)),
            ("pool", optional(self.pool_name())),
            ("used", optional(self.used)),
            ("available", optional(self.available)),
            ("snapshot_count", optional(self.snapshot_count)),
        ]
    }

    fn into_parsed(items: Vec<Self>) -> ParsedData {
        ParsedData::Caches(items)
    }

    fn from_parsed(data: &ParsedData) -> Option<Vec<Self>> {
        match data {
            ParsedData::Caches(items) => Some(items.clone()),
            _ => None,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time copy of a file system
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub name: String,
    pub filesystem: String,
    /// Cache backing the snapshot, `None` on appliances without caches
    pub cache: Attr<Option<Cache>>,
    pub snaptype: String,
    pub date: String,
}

impl Snapshot {
    pub fn new(
        name: impl Into<String>,
        filesystem: impl Into<String>,
        cache: Attr<Option<Cache>>,
        snaptype: impl Into<String>,
        date: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            filesystem: filesystem.into(),
            cache,
            snaptype: snaptype.into(),
            date: date.into(),
        }
    }

    fn cache_name(&self) -> Option<&str> {
        self.cache.peek().and_then(|c| c.as_ref()).map(|c| c.name.as_str())
    }

    /// Creation time, from `2015/07/15 11:33` or RFC 3339
    pub fn created_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.date, "%Y/%m/%d %H:%M")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(&self.date).ok().map(|d| d.naive_utc()))
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.filesystem == other.filesystem && self.cache_name() == other.cache_name()
    }
}

impl NasObject for Snapshot {
    const KIND: ResourceKind = ResourceKind::Snapshot;

    fn name(&self) -> &str {
        &self.name
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        if self.cache.is_missing() {
            vec!["cache"]
        } else {
            Vec::new()
        }
    }

    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("filesystem", self.filesystem.clone()),
            ("cache", optional(self.cache_name())),
            ("snaptype", self.snaptype.clone()),
            ("date", self.date.clone()),
        ]
    }

    fn into_parsed(items: Vec<Self>) -> ParsedData {
        ParsedData::Snapshots(items)
    }

    fn from_parsed(data: &ParsedData) -> Option<Vec<Self>> {
        match data {
            ParsedData::Snapshots(items) => Some(items.clone()),
            _ => None,
        }
    }
}

// =============================================================================
// NAS Server
// =============================================================================

/// Virtual NAS server hosted on a storage processor
#[derive(Debug, Clone, Serialize)]
pub struct NasServer {
    pub name: String,
    pub pool: Pool,
    pub homesp: String,
}

impl NasServer {
    pub fn new(name: impl Into<String>, pool: impl Into<String>, homesp: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool: Pool::new(pool),
            homesp: homesp.into(),
        }
    }
}

impl PartialEq for NasServer {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Objects identified by name alone and compared by name
macro_rules! named_object {
    ($ty:ident, $kind:expr, $variant:ident) => {
        impl NasObject for $ty {
            const KIND: ResourceKind = $kind;

            fn name(&self) -> &str {
                &self.name
            }

            fn fields(&self) -> Vec<(&'static str, String)> {
                vec![("name", self.name.clone())]
            }

            fn into_parsed(items: Vec<Self>) -> ParsedData {
                ParsedData::$variant(items)
            }

            fn from_parsed(data: &ParsedData) -> Option<Vec<Self>> {
                match data {
                    ParsedData::$variant(items) => Some(items.clone()),
                    _ => None,
                }
            }
        }
    };
}

named_object!(Pool, ResourceKind::Pool, Pools);
named_object!(Disk, ResourceKind::Disk, Disks);
named_object!(NasServer, ResourceKind::NasServer, NasServers);

// =============================================================================
// Partial Parse Payload
// =============================================================================

/// Data parsed before an incomplete-information error was detected
#[derive(Debug, Clone)]
pub enum ParsedData {
    /// Name of the object whose lookup came back empty
    Name(String),
    FileSystems(Vec<FileSystem>),
    Shares(Vec<Share>),
    Disks(Vec<Disk>),
    Pools(Vec<Pool>),
    Caches(Vec<Cache>),
    Snapshots(Vec<Snapshot>),
    NasServers(Vec<NasServer>),
}

impl ParsedData {
    pub fn len(&self) -> usize {
        match self {
            ParsedData::Name(_) => 1,
            ParsedData::FileSystems(v) => v.len(),
            ParsedData::Shares(v) => v.len(),
            ParsedData::Disks(v) => v.len(),
            ParsedData::Pools(v) => v.len(),
            ParsedData::Caches(v) => v.len(),
            ParsedData::Snapshots(v) => v.len(),
            ParsedData::NasServers(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: NasObject> From<Vec<T>> for ParsedData {
    fn from(items: Vec<T>) -> Self {
        T::into_parsed(items)
    }
}

macro_rules! parsed_from_single {
    ($($ty:ident),*) => {
        $(
            impl From<$ty> for ParsedData {
                fn from(item: $ty) -> Self {
                    <$ty as NasObject>::into_parsed(vec![item])
                }
            }
        )*
    };
}

parsed_from_single!(FileSystem, Share, Disk, Pool, Cache, Snapshot, NasServer);

#[cfg(test)]
mod tests {
    use super::*;

    fn fs(name: &str, blocks: u64, display: &str, pool: Option<&str>) -> FileSystem {
        FileSystem::new(
            name,
            AlignedSize::from_blocks(blocks, display),
            Some("simple".to_string()),
            pool.map(Pool::new).into(),
        )
    }

    #[test]
    fn test_share_identity() {
        let a = Share::new("/vx/fs1", "10.0.0.1", "rw,no_root_squash".into());
        let b = Share::new("/vx/fs1", "10.0.0.1", "no_root_squash,rw".into());
        let c = Share::new("/vx/fs1", "10.0.0.2", "rw,no_root_squash".into());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.identifier_value("client"), Some("10.0.0.1".into()));
        assert_eq!(Share::IDENTIFIER_KEYS, &["name", "client"]);
    }

    #[test]
    fn test_filesystem_missing_pool() {
        let complete = fs("fs1", 2048, "1M", Some("P1"));
        assert!(complete.missing_fields().is_empty());

        let partial = fs("fs1", 2048, "1M", None);
        assert_eq!(partial.missing_fields(), vec!["pool"]);
        assert_ne!(complete, partial);
        assert_eq!(complete.diff_display(&partial), "pool: \"P1\" != \"None\"");
    }

    #[tokio::test]
    async fn test_filesystem_alignment() {
        let fs = fs("fs1", 22016, "10.75M", Some("P1")).with_alignment(Attr::value(8192));
        assert_eq!(fs.disk_alignment().await, 8192);
        assert!(fs.size_matches(&Size::parse("11005k").unwrap()).await);
        assert!(!fs.size_matches(&Size::parse("11009k").unwrap()).await);
    }

    #[test]
    fn test_cache_percentages() {
        let mut cache = Cache::new("c1", Some(Size::new(20, Unit::M)), Attr::value(Pool::new("P1")));
        cache.used = Some(Size::new(5, Unit::M));
        cache.available = Some(Size::new(15, Unit::M));
        assert_eq!(cache.used_percentage(), Some(25.0));
        assert_eq!(cache.available_percentage(), Some(75.0));
        assert!(!cache.is_full());

        cache.available = None;
        assert_eq!(cache.missing_fields(), vec!["available"]);
    }

    #[test]
    fn test_snapshot_created_at() {
        let snap = Snapshot::new("s1", "fs1", Attr::value(None), "spaceopt", "2015/07/15 11:33");
        assert_eq!(snap.created_at().unwrap().to_string(), "2015-07-15 11:33:00");

        let snap = Snapshot::new("s1", "fs1", Attr::value(None), "", "2021-03-01T10:00:00.000Z");
        assert_eq!(snap.created_at().unwrap().to_string(), "2021-03-01 10:00:00");
    }

    #[test]
    fn test_parsed_data_from_objects() {
        let data: ParsedData = vec![Pool::new("P1"), Pool::new("P2")].into();
        assert_eq!(data.len(), 2);
        assert_eq!(Pool::from_parsed(&data).unwrap()[1].name, "P2");
        assert!(Disk::from_parsed(&data).is_none());

        let data: ParsedData = Disk::new("d1").into();
        assert_eq!(Disk::from_parsed(&data).unwrap().len(), 1);
    }
}
