//! File systems on the Veritas family
//!
//! `storage fs list` shows sizes rounded for display. The exact length comes
//! from `vxprint`, and the appliance rounds allocations up to the disk group
//! alignment, so sizes are kept as [`AlignedSize`] and compared with that
//! alignment.

use super::{Context, Flavor};
use crate::domain::attr::Attr;
use crate::domain::objects::{FileSystem, ParsedData, Pool};
use crate::domain::ports::{CreateFileSystem, FileSystemResource, Resource};
use crate::domain::size::{AlignedSize, Size};
use crate::error::{Error, ResourceKind, Result};
use crate::parsers::{group, match_display_line, parse_simple, Properties, PropertyValue, VxTopology};
use crate::resources::{get_from_listing, resolve_timeout, Identifier};
use crate::retry::FixedRetries;
use async_trait::async_trait;
use futures::FutureExt;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Volume layouts accepted by `storage fs create`
pub const LAYOUTS: &[&str] = &["mirrored", "mirrored-stripe", "simple", "striped", "striped-mirror"];

/// Whole numbers only, the console rejects decimals
pub(crate) const SIZE_PATTERN: &str = r"^\s*(\d+)\s*([bkmgtBKMGT])\s*$";

const DEFAULT_TIER: &str = "primary";

pub(crate) struct FsPatterns {
    display: Vec<Regex>,
    pub(crate) size: Regex,
    invalid_pool: Regex,
    already_exists: Vec<Regex>,
    insufficient_space: Regex,
    cannot_allocate: Regex,
    usage_over_limit: Regex,
    rollsync_status: Regex,
    already_online: Regex,
    already_offline: Regex,
    not_exist: Regex,
}

impl FsPatterns {
    pub(crate) fn new(flavor: Flavor) -> Result<Self> {
        let display = if flavor.is_access() {
            // Access listings carry no pool column
            vec![Regex::new(
                r"^(?P<name>[-\w]+)\s+(?P<online>[-\w]+)\s+(?P<size>[\d\.]+[kmgtKGMT])\s+(?P<layout>[-\w]+)\s+[-\w]+\s+[-\w]+\s+[-\w\.%]+\s+[\.\w]*\s*[-\w]+\s+[-\w]+\s+[-\w]+\s+[-\w]+\s*[-\w]*\s*$",
            )?]
        } else {
            vec![
                Regex::new(
                    r"^(?P<name>[-\w]+)\s+(?P<online>[-\w]+)\s+(?P<size>[\d\.]+[kmgtKGMT])\s+(?P<layout>[-\w]+)\s+[-\w]+\s+[-\w]+\s+[-\w\.%]+\s+[-\w]+\s+[-\w]+\s+[-\w]+\s*(?P<pool>[-\w]+)?$",
                )?,
                Regex::new(
                    r"^(?P<name>[-\w]+)\s+(?P<online>[-\w]+)\s+(?P<size>[\d\.]+[kmgtKGMT])\s+(?P<layout>[-\w]+)\s+[-\w]+\s+[-\w]+\s+[-\w\.%]+\s+[-\w]+\s+[-\w]+\s+[-\w]+\s+[-\w]+\s*(?P<pool>[-\w]+)?$",
                )?,
            ]
        };
        let already_exists = if flavor.is_access() {
            vec![Regex::new(r"File\s+system\s+already\s+exists")?]
        } else {
            vec![
                Regex::new(r"File\s+system\s+[-\w]+\s+already\s+exists")?,
                Regex::new(r"File\s+system/Rollback\s+[-\w]+\s+already\s+exists")?,
            ]
        };
        let already_offline = if flavor.is_access() {
            Regex::new(r"Filesystem\s+[-\w]+\s+is\s+already\s+offline")?
        } else {
            Regex::new(r"Filesystem\s+is\s+already\s+offline")?
        };

        Ok(Self {
            display,
            size: Regex::new(SIZE_PATTERN)?,
            invalid_pool: Regex::new(r"Pool\(s\)\s+or\s+disk\(s\)\s+[-\w]+\s+does\s+not\s+exist")?,
            already_exists,
            insufficient_space: Regex::new(
                r"Unable\s+to\s+create\s+fs\s+[-\w]+\s+due\s+to\s+either\s+insufficient\s+space/unavailable\s+disk\.\s+Please\s+run\s+scanbus",
            )?,
            cannot_allocate: Regex::new(
                r"Unable\sto\s+allocate\s+space\s+to\s+grow\s+fs\s+[-\w]+\s+due\s+to\s+either\s+insufficient\s+space/unavailable\s+disk",
            )?,
            usage_over_limit: Regex::new(
                r"Filesystem\s+[-\w]+\s+usage\s+is\s+over\s+\d+%\.\s+If\s+the\s+grow\s+did\s+not\s+succeed,\s+remove\s+some\s+files\s+and\s+try\s+again",
            )?,
            rollsync_status: Regex::new(
                r"[\d\.]+%\s+Start_time:\s+[\w/:]+\s+\w+:\s+[\d:]+\s+Remaining_time:\s+[\d:]+",
            )?,
            already_online: Regex::new(r"Filesystem\s+is\s+already\s+online")?,
            already_offline,
            not_exist: Regex::new(r"File\s+system\s+[-\w]+\s+does\s+not\s+exist")?,
        })
    }
}

/// `storage fs` resource
#[derive(Clone)]
pub struct FileSystems {
    ctx: Arc<Context>,
}

impl FileSystems {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    fn patterns(&self) -> &FsPatterns {
        &self.ctx.patterns.filesystem
    }

    fn check_size(&self, size: &str, action: &str) -> Result<Size> {
        if !self.patterns().size.is_match(size) {
            return Err(Error::size(
                ResourceKind::FileSystem,
                format!("Can't {} fs, wrong size format {}.", action, size),
            ));
        }
        Size::parse(size.trim())
    }

    /// Property listing of `storage fs list <name>`
    pub async fn properties(&self, name: &str) -> Result<Properties> {
        let cmd = format!("storage fs list {}", name);
        let lines = match self.ctx.listing(&cmd).await {
            Ok(lines) => lines,
            Err(Error::ExecCommand(err)) => {
                let msg = format!("{}. Command: {}", err, cmd);
                if self.patterns().not_exist.is_match(&err) {
                    return Err(Error::does_not_exist(ResourceKind::FileSystem, msg));
                }
                debug!("Ignoring failed property listing: {}", msg);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        Ok(parse_simple(&lines.join("\n")))
    }

    async fn topology(&self) -> VxTopology {
        match self.ctx.vx.vxprint().await {
            Ok(topology) => topology,
            Err(e) => {
                debug!("Sizes will come from the {} display: {}", self.ctx.nas(), e);
                VxTopology::new()
            }
        }
    }

    /// Build a file system, taking its exact length from the topology
    fn build(
        &self,
        name: &str,
        display: &str,
        layout: &str,
        pool: Attr<Pool>,
        topology: &VxTopology,
    ) -> Result<FileSystem> {
        let block = topology.get(name).cloned().unwrap_or_default();
        let blocks = match block.length_in_blocks().filter(|b| *b > 0) {
            Some(blocks) => blocks,
            None => {
                let blocks = Size::parse(display)?.half_k_blocks().max(0) as u64;
                let display_size = display;
                debug!(
                    "No vxprint length for fs {}. Using {}={} rounded blocks from {} display.",
                    name,
                    display_size,
                    blocks,
                    self.ctx.nas()
                );
                blocks
            }
        };

        let vx = self.ctx.vx.clone();
        let fs_name = name.to_string();
        let alignment_block = block.clone();
        let alignment = Attr::deferred(move || {
            let vx = vx.clone();
            let name = fs_name.clone();
            let block = alignment_block.clone();
            async move { Ok(vx.disk_alignment(&name, &block).await) }.boxed()
        });

        Ok(FileSystem::new(
            name,
            AlignedSize::from_blocks(blocks, display),
            Some(layout.to_string()),
            pool,
        )
        .with_alignment(alignment)
        .with_properties(block))
    }

    /// Pool looked up through the volume manager, for listings without one
    fn deferred_pool(&self, name: &str) -> Attr<Pool> {
        let vx = self.ctx.vx.clone();
        let nas = self.ctx.nas();
        let name = name.to_string();
        Attr::deferred(move || {
            let vx = vx.clone();
            let name = name.clone();
            async move {
                let (_, pools) = vx.pools_and_disks(&name).await?;
                pools.into_iter().next().map(Pool::new).ok_or_else(|| {
                    Error::incomplete(
                        format!(
                            "The output information returned from {} was incomplete, having empty values for the pool name.",
                            nas
                        ),
                        ParsedData::Name(name.clone()),
                    )
                })
            }
            .boxed()
        })
    }

    fn creation_error(&self, err: &str, cmd: &str) -> Error {
        let p = self.patterns();
        let msg = format!("FS creation failed: {}. Command: {}", err, cmd);
        if p.invalid_pool.is_match(err) {
            Error::does_not_exist(ResourceKind::Pool, msg)
        } else if p.already_exists.iter().any(|r| r.is_match(err)) {
            Error::already_exists(ResourceKind::FileSystem, msg)
        } else if p.insufficient_space.is_match(err) {
            Error::insufficient_space(ResourceKind::FileSystem, msg)
        } else {
            Error::creation(ResourceKind::FileSystem, msg)
        }
    }
}

#[async_trait]
impl Resource for FileSystems {
    type Object = FileSystem;

    fn nas_name(&self) -> &str {
        self.ctx.nas()
    }

    async fn list(&self) -> Result<Vec<FileSystem>> {
        let lines = self.ctx.listing("storage fs list").await?;
        let topology = self.topology().await;

        let mut filesystems = Vec::new();
        for line in lines.iter().skip(2) {
            let line = line.trim();
            let caps = match_display_line(&self.patterns().display, line, self.ctx.nas())?;
            let name = &caps["name"];

            let pool = if self.ctx.flavor.is_access() {
                self.deferred_pool(name)
            } else {
                let pool = group(&caps, "pool");
                if pool.is_none() {
                    // the listing races with a file system being destroyed
                    debug!(
                        "The line output parsed from {} is incomplete, with an empty pool value. Line output: {}",
                        self.ctx.nas(),
                        line
                    );
                }
                pool.map(Pool::new).into()
            };

            let fs = self.build(name, &caps["size"], &caps["layout"], pool, &topology)?;
            filesystems.push(fs.with_online(&caps["online"] == "online"));
        }

        if filesystems.iter().any(|fs| fs.pool.is_missing()) {
            return Err(Error::incomplete(
                format!(
                    "The output information returned from {} was incomplete, having empty values for the pool name.",
                    self.ctx.nas()
                ),
                filesystems,
            ));
        }
        Ok(filesystems)
    }

    /// Lookup retried while the listing comes back incomplete
    async fn get(&self, identifier: Identifier) -> Result<FileSystem> {
        let retry = &self.ctx.fs_get_retry;
        backoff::future::retry_notify(
            FixedRetries::new(retry.retries, retry.delay()),
            || async {
                get_from_listing(self, &identifier).await.map_err(|e| match e {
                    Error::IncompleteParsedInformation { .. } => backoff::Error::transient(e),
                    e => backoff::Error::permanent(e),
                })
            },
            |e: Error, _: Duration| {
                debug!(
                    "Re-attempting to retrieve file system information from {}: {}",
                    self.ctx.nas(),
                    e
                );
            },
        )
        .await
    }
}

#[async_trait]
impl FileSystemResource for FileSystems {
    async fn create(&self, request: &CreateFileSystem) -> Result<FileSystem> {
        let CreateFileSystem {
            name,
            size,
            pool,
            layout,
            ..
        } = request;
        self.check_size(size, "create")?;
        if !LAYOUTS.contains(&layout.as_str()) {
            return Err(Error::InvalidArguments(format!(
                "Can't create fs, wrong '{}' layout. Available layouts are: {}",
                layout,
                LAYOUTS.join(", ")
            )));
        }

        let cmd = format!("storage fs create {} {} {} {}", layout, name, size, pool);
        match self.ctx.execute(&cmd, self.ctx.timeouts.create()).await {
            Ok(_) => {}
            Err(Error::ExecCommand(err)) => return Err(self.creation_error(&err, &cmd)),
            Err(e) => resolve_timeout(e, true, || self.exists(name.as_str().into())).await?,
        }

        let topology = self.topology().await;
        self.build(name, size.trim(), layout, Attr::value(Pool::new(pool.as_str())), &topology)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let cmd = format!("storage fs destroy {}", name);
        match self.ctx.execute(&cmd, self.ctx.timeouts.delete()).await {
            Ok(_) => Ok(()),
            Err(Error::ExecCommand(err)) => {
                let msg = format!("{}. Command: {}", err, cmd);
                if self.patterns().not_exist.is_match(&err) {
                    Err(Error::does_not_exist(ResourceKind::FileSystem, msg))
                } else {
                    Err(Error::deletion(ResourceKind::FileSystem, msg))
                }
            }
            Err(e) => resolve_timeout(e, false, || self.exists(name.into())).await,
        }
    }

    async fn resize(&self, name: &str, size: &str, pool: Option<&str>) -> Result<()> {
        let target = self.check_size(size, "resize")?;
        let fs = self.get(name.into()).await?;
        let current = fs.aligned_size().await;

        match current.compare(&target) {
            Ordering::Equal => {
                return Err(Error::SameSize {
                    kind: ResourceKind::FileSystem,
                    message: format!(
                        "The size of the file system \"{}\" is already equal to the target size \"{}\".",
                        name, target
                    ),
                })
            }
            Ordering::Greater => {
                return Err(Error::CannotShrink {
                    kind: ResourceKind::FileSystem,
                    message: format!(
                        "Size of the existing file system \"{}\" on {} is \"{}\" which is greater than the requested size \"{}\". Shrinking the existing file system is not supported.",
                        name,
                        self.ctx.nas(),
                        current,
                        target
                    ),
                })
            }
            Ordering::Less => {}
        }

        let pool = match pool {
            Some(pool) => pool.to_string(),
            None => match fs.pool.resolve().await? {
                Some(pool) => pool.name.clone(),
                None => {
                    return Err(Error::incomplete(
                        format!("The pool of the file system \"{}\" is unknown.", name),
                        fs.clone(),
                    ))
                }
            },
        };
        let tier = self
            .properties(name)
            .await?
            .get("Tier Info")
            .map(PropertyValue::to_text)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TIER.to_string());

        let cmd = format!("storage fs growto {} {} {} {}", tier, name, target, pool);
        match self.ctx.execute(&cmd, self.ctx.timeouts.create()).await {
            Ok(lines) => {
                let warnings: Vec<&str> = lines
                    .iter()
                    .map(String::as_str)
                    .filter(|l| self.patterns().usage_over_limit.is_match(l))
                    .collect();
                if !warnings.is_empty() {
                    warn!("{}", warnings.join("\n"));
                }
                Ok(())
            }
            Err(Error::ExecCommand(err)) => {
                let msg = format!("{}. Command: {}", err, cmd);
                if self.patterns().cannot_allocate.is_match(&err) {
                    Err(Error::insufficient_space(ResourceKind::FileSystem, msg))
                } else {
                    Err(Error::resize(ResourceKind::FileSystem, msg))
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn online(&self, name: &str, online: bool) -> Result<()> {
        let option = if online { "online" } else { "offline" };
        let cmd = format!("storage fs {} {}", option, name);
        match self.ctx.execute(&cmd, self.ctx.timeouts.online()).await {
            Ok(_) => Ok(()),
            Err(Error::ExecCommand(err)) => {
                let p = self.patterns();
                let already = if online { &p.already_online } else { &p.already_offline };
                if already.is_match(&err) {
                    debug!("File system \"{}\" is already {}. {}", name, option, err);
                    return Ok(());
                }
                let msg = format!(
                    "Failed to {} the file system \"{}\": {}. Command: {}",
                    option, name, err, cmd
                );
                Err(if online { Error::Online(msg) } else { Error::Offline(msg) })
            }
            Err(e) => Err(e),
        }
    }

    async fn is_restore_running(&self, name: &str) -> Result<bool> {
        let properties = self.properties(name).await?;
        if let Some(status) = properties.get("Rollsync Status").and_then(PropertyValue::as_map) {
            let text = status.values().next().map(PropertyValue::to_text).unwrap_or_default();
            return Ok(self.patterns().rollsync_status.is_match(&text));
        }
        if !self.ctx.flavor.is_access() {
            return Ok(false);
        }

        match self.ctx.vx.task_list().await {
            Ok(tasks) => Ok(tasks.values().any(|t| t.to_text().contains("SNAPSYNC"))),
            Err(e) => {
                debug!("Could not list volume manager tasks: {}", e);
                Ok(false)
            }
        }
    }
}
