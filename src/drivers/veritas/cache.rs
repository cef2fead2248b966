//! Cache objects backing space-optimised snapshots
//!
//! The console lists caches with sizes in megabytes and without their pool;
//! the pool comes from the volume manager on first read.

use super::filesystem::SIZE_PATTERN;
use super::{Context, Flavor};
use crate::domain::attr::Attr;
use crate::domain::objects::{Cache, NasObject, Pool};
use crate::domain::ports::{CacheResource, Resource};
use crate::domain::size::{Size, Unit};
use crate::error::{Error, ResourceKind, Result};
use crate::parsers::match_display_line;
use crate::resources::resolve_timeout;
use async_trait::async_trait;
use futures::FutureExt;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Smallest cache the console accepts, in megabytes
const MINIMUM_SIZE_MB: i64 = 5;

pub(crate) struct CachePatterns {
    display: Vec<Regex>,
    header_lines: usize,
    /// Line after which `storage rollback cache list <name>` lists snapshots
    snapshots_marker: &'static str,
    size: Regex,
    already_exists: Regex,
    not_exist: Regex,
    invalid_pool: Regex,
    insufficient_space: Regex,
    cannot_allocate: Regex,
}

impl CachePatterns {
    pub(crate) fn new(flavor: Flavor) -> Result<Self> {
        let (display, header_lines, snapshots_marker) = if flavor.is_access() {
            (
                r"^(?P<name>[-\w]+)\s+(?P<size>[\-\d]+)\s+(?P<used>[\-\d]+)\s+\([\d\.\-]+\)\s+(?P<available>[\-\d]+)\s+\([\d\.\-]+\)\s+(?P<snapshot_count>[\-\d]+)$",
                2,
                "============",
            )
        } else {
            (
                r"^(?P<name>[-\w]+)\s+(?P<size>[\-\d]+)\s+(?P<used>[\-\d]+)\s+(\(\d+\)|\-)\s+(?P<available>[\-\d]+)\s+(\(\d+\)|\-)\s+(?P<snapshot_count>[\-\d]+)$",
                1,
                "rollbacks located on cache",
            )
        };

        Ok(Self {
            display: vec![Regex::new(display)?],
            header_lines,
            snapshots_marker,
            size: Regex::new(SIZE_PATTERN)?,
            already_exists: Regex::new(r"Cache\s+object\s+[-\w]+\s+already\s+exists")?,
            not_exist: Regex::new(r"cache\s+object\s+[-\w]+\sdoes\s+not\s+exist")?,
            invalid_pool: Regex::new(r"Pool\(s\)\s+or\s+disk\(s\)\s+[-\w]+\s+does\s+not\s+exist")?,
            insufficient_space: Regex::new(
                r"Unable\s+to\s+create\s+fs\s+[-\w]+\s+due\s+to\s+either\s+insufficient\s+space/unavailable\s+disk\.\s+Please\s+run\s+scanbus",
            )?,
            cannot_allocate: Regex::new(r"Cannot\s+allocate\s+space\s+to\s+grow\s+volume\s+to\s+(\d+)\s+blocks")?,
        })
    }
}

/// A listing column in megabytes; `-` while the cache is changing
fn megabytes(value: &str) -> Option<Size> {
    value.parse::<i64>().ok().map(|mb| Size::new(mb, Unit::M))
}

/// `storage rollback cache` resource
#[derive(Clone)]
pub struct Caches {
    ctx: Arc<Context>,
}

impl Caches {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    fn patterns(&self) -> &CachePatterns {
        &self.ctx.patterns.cache
    }

    fn check_size(&self, size: &str) -> Result<Size> {
        if !self.patterns().size.is_match(size) {
            return Err(Error::size(
                ResourceKind::Cache,
                format!("Can't create cache object, wrong size format {}.", size),
            ));
        }
        let size = Size::parse(size.trim())?;
        let minimum = Size::new(MINIMUM_SIZE_MB, Unit::M);
        if size < minimum {
            return Err(Error::size(
                ResourceKind::Cache,
                format!("Can't create cache object, size cannot be less than {}.", minimum),
            ));
        }
        Ok(size)
    }

    fn deferred_pool(&self, name: &str) -> Attr<Pool> {
        let vx = self.ctx.vx.clone();
        let name = name.to_string();
        Attr::deferred(move || {
            let vx = vx.clone();
            let name = name.clone();
            async move { Ok(Pool::new(vx.pool_by_cache(&name).await?)) }.boxed()
        })
    }

    fn build(&self, line: &str) -> Result<Cache> {
        let caps = match_display_line(&self.patterns().display, line, self.ctx.nas())?;
        let name = &caps["name"];
        let mut cache = Cache::new(name, megabytes(&caps["size"]), self.deferred_pool(name));
        cache.used = megabytes(&caps["used"]);
        cache.available = megabytes(&caps["available"]);
        cache.snapshot_count = caps["snapshot_count"].parse().ok();
        Ok(cache)
    }

    async fn listed(&self, name: &str) -> Result<bool> {
        let lines = self.ctx.listing("storage rollback cache list").await?;
        Ok(lines
            .iter()
            .any(|l| l.split_whitespace().next() == Some(name)))
    }

    /// Creation refused because of a volume an earlier attempt left behind
    async fn recreate_over_leftover(&self, name: &str, cmd: &str, err: &str) -> Result<()> {
        debug!(
            "Cache creation failed due to left over underlying volumes of cache. {} error message: {}",
            self.ctx.nas(),
            err
        );
        self.ctx.vx.remove_cache_volume(name).await?;
        self.ctx.execute(cmd, self.ctx.timeouts.create()).await?;
        debug!("Underlying cache volume deleted and the cache {} created", name);
        Ok(())
    }

    async fn remove_leftover_volume(&self, name: &str) {
        let tier = format!("{}_tier1", name);
        match self.ctx.vx.volume_names().await {
            Ok(names) if names.iter().any(|n| n == name || *n == tier) => {
                match self.ctx.vx.remove_cache_volume(name).await {
                    Ok(()) => debug!("Identified the underlying cache volumes of {} left over and deleted.", name),
                    Err(e) => warn!("Could not remove the volumes left by cache {}: {}", name, e),
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Could not check the volumes left by cache {}: {}", name, e),
        }
    }
}

#[async_trait]
impl Resource for Caches {
    type Object = Cache;

    fn nas_name(&self) -> &str {
        self.ctx.nas()
    }

    async fn list(&self) -> Result<Vec<Cache>> {
        let lines = self.ctx.listing("storage rollback cache list").await?;
        let caches = lines
            .iter()
            .skip(self.patterns().header_lines)
            .map(|line| self.build(line.trim()))
            .collect::<Result<Vec<_>>>()?;

        if caches
            .iter()
            .any(|c| !c.missing_fields().is_empty() || c.snapshot_count.is_none())
        {
            return Err(Error::incomplete(
                format!(
                    "The output information returned from {} was incomplete, having some empty values for cache object information.",
                    self.ctx.nas()
                ),
                caches,
            ));
        }
        Ok(caches)
    }
}

#[async_trait]
impl CacheResource for Caches {
    async fn create(&self, name: &str, size: &str, pool: &str) -> Result<Cache> {
        self.check_size(size)?;
        let cmd = format!("storage rollback cache create {} {} {}", name, size.trim(), pool);
        match self.ctx.execute(&cmd, self.ctx.timeouts.create()).await {
            Ok(_) => {}
            Err(Error::ExecCommand(err)) => {
                let p = self.patterns();
                let msg = format!("Cache object creation failed: {}. Command: {}", err, cmd);
                if p.invalid_pool.is_match(&err) {
                    return Err(Error::does_not_exist(ResourceKind::Pool, msg));
                }
                if p.insufficient_space.is_match(&err) {
                    return Err(Error::insufficient_space(ResourceKind::Cache, msg));
                }
                if !p.already_exists.is_match(&err) {
                    return Err(Error::creation(ResourceKind::Cache, msg));
                }
                if self.listed(name).await? {
                    return Err(Error::already_exists(ResourceKind::Cache, msg));
                }
                self.recreate_over_leftover(name, &cmd, &err).await?;
            }
            Err(e) => resolve_timeout(e, true, || self.exists(name.into())).await?,
        }
        self.get(name.into()).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let cmd = format!("storage rollback cache destroy {}", name);
        match self.ctx.execute(&cmd, self.ctx.timeouts.delete()).await {
            Ok(_) => {
                self.remove_leftover_volume(name).await;
                Ok(())
            }
            Err(Error::ExecCommand(err)) => {
                let msg = format!("{}. Command: {}", err, cmd);
                if self.patterns().not_exist.is_match(&err) {
                    Err(Error::does_not_exist(ResourceKind::Cache, msg))
                } else {
                    Err(Error::deletion(ResourceKind::Cache, msg))
                }
            }
            Err(e) => resolve_timeout(e, false, || self.exists(name.into())).await,
        }
    }

    async fn resize(&self, name: &str, size: &str, _pool: Option<&str>) -> Result<()> {
        let target = self.check_size(size)?;
        let cache = self.get(name.into()).await?;
        let current = cache.size.ok_or_else(|| {
            Error::incomplete(
                format!("The size of the cache object \"{}\" is unknown.", name),
                cache.clone(),
            )
        })?;

        match target.cmp(&current) {
            Ordering::Greater => match self.ctx.vx.grow_cache(name, &target).await {
                Ok(()) => Ok(()),
                Err(Error::VxCommand(err)) => match self.patterns().cannot_allocate.captures(&err) {
                    Some(caps) => {
                        let suggested = caps[1].parse::<i64>().ok().map(|blocks| Size::new(blocks * 2, Unit::K));
                        Err(Error::InsufficientSpace {
                            kind: ResourceKind::Cache,
                            message: err,
                            suggested,
                        })
                    }
                    None => Err(Error::resize(ResourceKind::Cache, err)),
                },
                Err(e) => Err(e),
            },
            Ordering::Equal => Err(Error::SameSize {
                kind: ResourceKind::Cache,
                message: format!(
                    "The size of the cache object \"{}\" is already equal to the target size \"{}\".",
                    name, target
                ),
            }),
            Ordering::Less => Err(Error::CannotShrink {
                kind: ResourceKind::Cache,
                message: "Shrinking cache objects is not supported.".to_string(),
            }),
        }
    }

    async fn related_snapshots(&self, name: &str) -> Result<Vec<String>> {
        let cmd = format!("storage rollback cache list {}", name);
        let lines = self.ctx.listing(&cmd).await?;
        let marker = self.patterns().snapshots_marker;
        Ok(lines
            .iter()
            .skip_while(|l| !l.trim_start().starts_with(marker))
            .skip(1)
            .map(|l| l.trim().to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CommandOutput;
    use crate::testing::{veritas, FakeRunner, SFS_CACHE_LIST};
    use assert_matches::assert_matches;

    const VA_CACHE_LIST: &str = "\
CACHE NAME   TOTAL(Mb)   USED(Mb) (%)     AVAIL(Mb) (%)     SDCNT
==========   =========   ============     =============     =====
cache1       100         10 (10.00)       90 (90.00)        1
";

    const LISTTAG: &str = "DEVICE NAME VALUE\ndisk_1 vxfs_pool P1\n";

    const VXPRINT_CACHE1: &str = "\
TY NAME ASSOC KSTATE LENGTH PLOFFS STATE TUTIL0 PUTIL0
co cache1 - ENABLED - - ACTIVE - -
v  cache1_tier1 cache1 ENABLED 204800 - ACTIVE - -
sd disk_1-07 cache1_tier1-01 ENABLED 204800 0 - - - disk_1
";

    fn caches(runner: &Arc<FakeRunner>, flavor: Flavor) -> Caches {
        Caches::new(veritas(runner, flavor))
    }

    #[tokio::test]
    async fn test_list_in_megabytes_with_deferred_pool() {
        let runner = FakeRunner::new();
        runner.on("storage rollback cache list", CommandOutput::ok(SFS_CACHE_LIST));
        runner.on("vxprint -hrAF", CommandOutput::ok(VXPRINT_CACHE1));
        runner.on("vxdisk listtag", CommandOutput::ok(LISTTAG));
        let list = caches(&runner, Flavor::Sfs).list().await.unwrap();

        let cache = &list[0];
        assert_eq!(cache.size, Some(Size::parse("100M").unwrap()));
        assert_eq!(cache.used, Some(Size::parse("10M").unwrap()));
        assert_eq!(cache.snapshot_count, Some(1));
        assert_eq!(cache.pool_name(), None);
        assert_eq!(cache.pool.resolve().await.unwrap().unwrap().name, "P1");
    }

    #[tokio::test]
    async fn test_va_layout() {
        let runner = FakeRunner::new();
        runner.on("storage rollback cache list", CommandOutput::ok(VA_CACHE_LIST));
        let list = caches(&runner, Flavor::Va).list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].available_percentage(), Some(90.0));
    }

    #[tokio::test]
    async fn test_dashes_are_incomplete() {
        let runner = FakeRunner::new();
        runner.on(
            "storage rollback cache list",
            CommandOutput::ok(format!("{}cache2  -  -  -  -  -  -\n", SFS_CACHE_LIST)),
        );
        let caches = caches(&runner, Flavor::Sfs);

        let err = caches.list().await.unwrap_err();
        assert_matches!(err, Error::IncompleteParsedInformation { .. });
        assert!(caches.get("cache1".into()).await.is_ok());
        assert_matches!(
            caches.get("cache2".into()).await,
            Err(Error::IncompleteParsedInformation { .. })
        );
    }

    #[tokio::test]
    async fn test_create_size_checks() {
        let runner = FakeRunner::new();
        let caches = caches(&runner, Flavor::Sfs);

        let err = caches.create("cache1", "4M", "P1").await.unwrap_err();
        assert_eq!(err.to_string(), "Can't create cache object, size cannot be less than 5M.");
        let err = caches.create("cache1", "5.5M", "P1").await.unwrap_err();
        assert_matches!(err, Error::Size { kind: ResourceKind::Cache, .. });
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_create_resize_scenario() {
        let runner = FakeRunner::new();
        runner.on("storage rollback cache create cache1 100M P1", CommandOutput::ok(""));
        runner.on("storage rollback cache list", CommandOutput::ok(SFS_CACHE_LIST));
        runner.on("vxcache growcacheto cache1 200M", CommandOutput::ok(""));
        runner.on(
            "vxcache growcacheto cache1 9000G",
            CommandOutput::failed(
                1,
                "VxVM vxcache ERROR V-5-1-10128 Cannot allocate space to grow volume to 20971520 blocks",
            ),
        );
        let caches = caches(&runner, Flavor::Sfs);

        let cache = caches.create("cache1", "100M", "P1").await.unwrap();
        assert_eq!(cache.size, Some(Size::parse("100M").unwrap()));

        caches.resize("cache1", "200M", None).await.unwrap();
        assert_matches!(caches.resize("cache1", "100M", None).await, Err(Error::SameSize { .. }));
        assert_matches!(
            caches.resize("cache1", "50M", None).await,
            Err(Error::CannotShrink { kind: ResourceKind::Cache, .. })
        );

        let err = caches.resize("cache1", "9000G", None).await.unwrap_err();
        assert_matches!(
            err,
            Error::InsufficientSpace { kind: ResourceKind::Cache, suggested: Some(size), .. }
                if size == Size::parse("41943040K").unwrap()
        );
    }

    #[tokio::test]
    async fn test_create_errors() {
        let runner = FakeRunner::new();
        runner.on(
            "storage rollback cache create cache1",
            CommandOutput::ok("SFS rollback ERROR V-288-0 Cache object cache1 already exists.\n"),
        );
        runner.on(
            "storage rollback cache create cache2",
            CommandOutput::ok("SFS rollback ERROR V-288-0 Pool(s) or disk(s) P9 does not exist.\n"),
        );
        runner.on("storage rollback cache list", CommandOutput::ok(SFS_CACHE_LIST));
        let caches = caches(&runner, Flavor::Sfs);

        assert_matches!(
            caches.create("cache1", "100M", "P1").await,
            Err(Error::AlreadyExists { kind: ResourceKind::Cache, .. })
        );
        assert_matches!(
            caches.create("cache2", "100M", "P9").await,
            Err(Error::DoesNotExist { kind: ResourceKind::Pool, .. })
        );
    }

    #[tokio::test]
    async fn test_create_over_leftover_volume() {
        let runner = FakeRunner::new();
        runner.once(
            "storage rollback cache create cache1 100M P1",
            CommandOutput::ok("SFS rollback ERROR V-288-0 Cache object cache1 already exists.\n"),
        );
        runner.on("storage rollback cache create cache1 100M P1", CommandOutput::ok(""));
        runner.once("storage rollback cache list", CommandOutput::ok("CACHE NAME TOTAL(Mb)\n"));
        runner.on("storage rollback cache list", CommandOutput::ok(SFS_CACHE_LIST));
        runner.on("vxedit -rf rm cache1_tier1", CommandOutput::ok(""));

        let cache = caches(&runner, Flavor::Sfs).create("cache1", "100M", "P1").await.unwrap();
        assert_eq!(cache.name, "cache1");
        assert_eq!(runner.count("vxedit -rf rm cache1_tier1"), 1);
        assert_eq!(runner.count("storage rollback cache create"), 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let runner = FakeRunner::new();
        runner.on("storage rollback cache destroy cache1", CommandOutput::ok(""));
        runner.on("vxprint", CommandOutput::ok(VXPRINT_CACHE1));
        runner.on("vxedit -rf rm cache1_tier1", CommandOutput::failed(1, "busy"));
        runner.on(
            "storage rollback cache destroy cache9",
            CommandOutput::ok("SFS rollback ERROR V-288-0 cache object cache9 does not exist.\n"),
        );
        let caches = caches(&runner, Flavor::Sfs);

        caches.delete("cache1").await.unwrap();
        assert_eq!(runner.count("vxedit"), 1);
        assert_matches!(
            caches.delete("cache9").await,
            Err(Error::DoesNotExist { kind: ResourceKind::Cache, .. })
        );
    }

    #[tokio::test]
    async fn test_related_snapshots() {
        let runner = FakeRunner::new();
        runner.on(
            "storage rollback cache list cache1",
            CommandOutput::ok("CACHE NAME TOTAL(Mb) USED(Mb)\ncache1 100 10\nrollbacks located on cache cache1:\n  snap1\n  snap2\n"),
        );
        assert_eq!(
            caches(&runner, Flavor::Sfs).related_snapshots("cache1").await.unwrap(),
            vec!["snap1", "snap2"]
        );

        runner.on(
            "storage rollback cache list cache1",
            CommandOutput::ok("ROLLBACK NAME\n============\nsnap3\n"),
        );
        assert_eq!(
            caches(&runner, Flavor::Va).related_snapshots("cache1").await.unwrap(),
            vec!["snap3"]
        );
    }
}
