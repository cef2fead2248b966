//! Space-optimised snapshots ("rollbacks")
//!
//! A restore runs in three steps: take the file system offline, roll it
//! back, bring it online again. A failed restore still tries to bring the
//! file system back online before reporting.

use super::{Caches, Context, FileSystems, Flavor};
use crate::domain::attr::Attr;
use crate::domain::objects::{Cache, Snapshot};
use crate::domain::ports::{CacheResource, FileSystemResource, Resource, SnapshotResource};
use crate::error::{Error, ResourceKind, Result};
use crate::parsers::match_display_line;
use crate::resources::resolve_timeout;
use async_trait::async_trait;
use futures::FutureExt;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

const SNAPTYPE: &str = "space-optimized";

/// Console error left by a rollback whose volume outlived it
const STALE_ROLLBACK: &str = "ERROR V-288-2027";

const RESTORE_CONFIRM: (&str, &str) = ("SNAPSHOT_RESTORE_CONFIRM", "YES");

pub(crate) struct SnapshotPatterns {
    display: Vec<Regex>,
    header_lines: usize,
    already_exists: Regex,
    not_exist: Vec<Regex>,
    fs_not_exist: Regex,
    cache_not_exist: Regex,
    fsck_failed: Regex,
    restore_failed: Vec<Regex>,
    restore_ongoing: Regex,
    destroy_failed_online: Regex,
    dissociate_failed: Regex,
}

impl SnapshotPatterns {
    pub(crate) fn new(flavor: Flavor) -> Result<Self> {
        let (header_lines, ongoing) = if flavor.is_access() {
            (2, "in")
        } else {
            (1, "already\\s+in")
        };
        Ok(Self {
            display: vec![Regex::new(
                r"^(?P<name>[-\w]+)\s+(?P<snaptype>\w+)\s+(?P<filesystem>[-\w]+)\s+(?P<date>\d+/\d+/\d+\s\d+:\d+)$",
            )?],
            header_lines,
            already_exists: Regex::new(r"Rollback\s+[-\w]+\s+already\s+exist\s+for\s+file\s+system\s+[-\w]+\.")?,
            not_exist: vec![
                Regex::new(r"Rollback\s+[-\w]+\s+does not exist for file system\s+[-\w]+\.")?,
                Regex::new(r"Specified rollback\s+[-\w]+\s+does not exist.")?,
            ],
            fs_not_exist: Regex::new(r"File\s+system\s+[-\w]+\s+does\s+not\s+exist")?,
            cache_not_exist: Regex::new(r"cache\s+object\s+[-\w]+\s+does\s+not\s+exist")?,
            fsck_failed: Regex::new(r"fsck\s+failed\s+for\s+[-\w]+")?,
            restore_failed: vec![
                Regex::new(r"restore\s+from\s+rollback\s+(?P<name>[-\w]+)\s+failed")?,
                Regex::new(
                    r"Unable\s+to\s+restore\s+file\s+system\s+(?P<filesystem>[-\w]+)\s+with\s+rollback\s+(?P<name>[-\w]+)",
                )?,
            ],
            restore_ongoing: Regex::new(&format!(
                r"Rollback\s+restore\s+operation\s+failed\s+as\s+rollback\s+sync\s+is\s+{}\s+progress\s+for\s+[-\w]+",
                ongoing
            ))?,
            destroy_failed_online: Regex::new(
                r"Rollback\s+destroy\s+operation\s+failed\s+as\s+[-\w]+\s+is\s+in\s+online\s+state,\s+run\s+offline\s+first",
            )?,
            dissociate_failed: Regex::new(r"Rollback\s+[-\w]+\sdissociate\s+failed")?,
        })
    }
}

/// `storage rollback` resource
#[derive(Clone)]
pub struct Snapshots {
    ctx: Arc<Context>,
}

impl Snapshots {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    fn patterns(&self) -> &SnapshotPatterns {
        &self.ctx.patterns.snapshot
    }

    fn filesystems(&self) -> FileSystems {
        FileSystems::new(self.ctx.clone())
    }

    fn caches(&self) -> Caches {
        Caches::new(self.ctx.clone())
    }

    /// Whether `name` is listed as a snapshot of `filesystem`
    async fn exists_on(&self, name: &str, filesystem: &str) -> Result<bool> {
        Ok(self
            .list()
            .await?
            .iter()
            .any(|snapshot| snapshot.name == name && snapshot.filesystem == filesystem))
    }

    /// Cache found by searching every cache's snapshot list
    fn searched_cache(&self, name: &str) -> Attr<Option<Cache>> {
        let caches = self.caches();
        let name = name.to_string();
        Attr::deferred(move || {
            let caches = caches.clone();
            let name = name.clone();
            async move {
                for cache in caches.list().await? {
                    if caches.related_snapshots(&cache.name).await?.contains(&name) {
                        return Ok(Some(cache));
                    }
                }
                Ok(None)
            }
            .boxed()
        })
    }

    fn named_cache(&self, cache: &str) -> Attr<Option<Cache>> {
        let caches = self.caches();
        let cache = cache.to_string();
        Attr::deferred(move || {
            let caches = caches.clone();
            let cache = cache.clone();
            async move { Ok(Some(caches.get(cache.as_str().into()).await?)) }.boxed()
        })
    }

    fn is_not_found(&self, err: &str) -> bool {
        self.patterns().not_exist.iter().any(|r| r.is_match(err))
    }

    async fn creation_error(&self, err: &str, cmd: &str, name: &str, filesystem: &str, cache: &str) -> Error {
        let p = self.patterns();
        let msg = format!("Snapshot creation failed: {} Command: {}", err, cmd);
        if p.already_exists.is_match(err) {
            return Error::already_exists(ResourceKind::Snapshot, msg);
        }
        if p.fs_not_exist.is_match(err) {
            return Error::does_not_exist(ResourceKind::FileSystem, msg);
        }
        if p.cache_not_exist.is_match(err) {
            return Error::does_not_exist(ResourceKind::Cache, msg);
        }
        if p.fsck_failed.is_match(err) {
            if let Ok(found) = self.caches().get(cache.into()).await {
                if found.is_full() {
                    return Error::creation(
                        ResourceKind::Snapshot,
                        format!(
                            "Failed to create the snapshot \"{}\" for the file system \"{}\" because the cache \"{}\" is full. {}",
                            name, filesystem, cache, msg
                        ),
                    );
                }
            }
        }
        Error::creation(ResourceKind::Snapshot, msg)
    }

    /// Bring a file system back online after a failed restore, logging failures
    async fn try_online(&self, filesystem: &str) {
        debug!("Restore failed, trying to online the file system \"{}\"", filesystem);
        if let Err(e) = self.filesystems().online(filesystem, true).await {
            warn!(
                "Failed to online the file system \"{}\" after a failed restore. {}",
                filesystem, e
            );
        }
    }

    async fn restore_error(&self, err: &str, cmd: &str, filesystem: &str) -> Error {
        let p = self.patterns();
        let msg = format!("File system failed to restore: {}. Command: {}", err, cmd);

        if p.restore_failed.iter().any(|r| r.is_match(err)) {
            // check the sync before onlining, which may outlast it
            let running = p.restore_ongoing.is_match(err)
                || self
                    .filesystems()
                    .is_restore_running(filesystem)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Could not check the rollsync status of \"{}\": {}", filesystem, e);
                        false
                    });
            if running {
                self.try_online(filesystem).await;
                return Error::RollsyncRunning(msg);
            }
        }

        self.try_online(filesystem).await;
        if p.fs_not_exist.is_match(err) {
            Error::does_not_exist(ResourceKind::FileSystem, msg)
        } else if self.is_not_found(err) {
            Error::does_not_exist(ResourceKind::Snapshot, msg)
        } else {
            Error::Restore(msg)
        }
    }
}

#[async_trait]
impl Resource for Snapshots {
    type Object = Snapshot;

    fn nas_name(&self) -> &str {
        self.ctx.nas()
    }

    async fn list(&self) -> Result<Vec<Snapshot>> {
        let lines = self.ctx.listing("storage rollback list").await?;
        lines
            .iter()
            .skip(self.patterns().header_lines)
            .map(|line| {
                let line = line.trim();
                let caps = match_display_line(&self.patterns().display, line, self.ctx.nas())?;
                Ok(Snapshot::new(
                    &caps["name"],
                    &caps["filesystem"],
                    self.searched_cache(&caps["name"]),
                    &caps["snaptype"],
                    &caps["date"],
                ))
            })
            .collect()
    }
}

#[async_trait]
impl SnapshotResource for Snapshots {
    async fn create(&self, name: &str, filesystem: &str, cache: &str) -> Result<Snapshot> {
        let cmd = format!("storage rollback create {} {} {} {}", SNAPTYPE, name, filesystem, cache);
        match self.ctx.execute(&cmd, self.ctx.timeouts.create()).await {
            Ok(_) => {}
            Err(Error::ExecCommand(err)) => {
                return Err(self.creation_error(&err, &cmd, name, filesystem, cache).await)
            }
            Err(e) => resolve_timeout(e, true, || self.exists_on(name, filesystem)).await?,
        }
        Ok(Snapshot::new(name, filesystem, self.named_cache(cache), SNAPTYPE, ""))
    }

    async fn delete(&self, name: &str, filesystem: &str) -> Result<()> {
        let cmd = format!("storage rollback destroy {} {}", name, filesystem);
        let mut err = match self.ctx.execute(&cmd, self.ctx.timeouts.delete()).await {
            Ok(_) => return Ok(()),
            Err(Error::ExecCommand(err)) => err,
            Err(e) => return resolve_timeout(e, false, || self.exists_on(name, filesystem)).await,
        };

        if err.contains(STALE_ROLLBACK) {
            debug!("Rollback not deleted, removing its volume. {} error message: {}", self.ctx.nas(), err);
            self.ctx
                .execute(&format!("storage fs destroy {}", name), self.ctx.timeouts.delete())
                .await?;
            debug!("Rollback {} deleted successfully", name);
            return Ok(());
        }

        let p = self.patterns();
        if p.dissociate_failed.is_match(&err) {
            return Err(Error::RollsyncRunning(format!(
                "Snapshot deletion failed: {}. Unable to destroy snapshot while restore snapshot process is in progress. Command: {}",
                err, cmd
            )));
        }

        if p.destroy_failed_online.is_match(&err) {
            let msg = format!("Snapshot deletion failed: {}. Command: {}", err, cmd);
            warn!(
                "Attempting to offline the snapshot \"{}\" before deleting it. {} error message: {}",
                name,
                self.ctx.nas(),
                msg
            );
            let cmd_offline = format!("storage rollback offline {}", name);
            match self.ctx.execute(&cmd_offline, self.ctx.timeouts.online()).await {
                Ok(_) => {}
                Err(Error::ExecCommand(offline_err)) => {
                    return Err(Error::deletion(
                        ResourceKind::Snapshot,
                        format!("{}. Offline action: {}. Command: {}", msg, offline_err, cmd_offline),
                    ))
                }
                Err(e) => return Err(e),
            }
            match self.ctx.execute(&cmd, self.ctx.timeouts.delete()).await {
                Ok(_) => return Ok(()),
                Err(Error::ExecCommand(retry_err)) => err = retry_err,
                Err(e) => return Err(e),
            }
        }

        let msg = format!("Snapshot deletion failed: {}. Command: {}", err, cmd);
        if p.fs_not_exist.is_match(&err) {
            Err(Error::does_not_exist(ResourceKind::FileSystem, msg))
        } else if self.is_not_found(&err) {
            Err(Error::does_not_exist(ResourceKind::Snapshot, msg))
        } else {
            Err(Error::deletion(ResourceKind::Snapshot, msg))
        }
    }

    async fn restore(&self, name: &str, filesystem: &str) -> Result<()> {
        let failed = |e: Error| match e {
            Error::Offline(m) => Error::Offline(format!("File system failed to restore: {}", m)),
            Error::Online(m) => Error::Online(format!("File system failed to restore: {}", m)),
            e => e,
        };
        let filesystems = self.filesystems();
        filesystems.online(filesystem, false).await.map_err(failed)?;

        let cmd = format!("storage rollback restore {} {}", filesystem, name);
        match self
            .ctx
            .session
            .execute_with_env(&cmd, Some(self.ctx.timeouts.create()), &[RESTORE_CONFIRM])
            .await
        {
            Ok(_) => {}
            Err(Error::ExecCommand(err)) => return Err(self.restore_error(&err, &cmd, filesystem).await),
            Err(e) => {
                self.try_online(filesystem).await;
                return Err(e);
            }
        }

        filesystems.online(filesystem, true).await.map_err(failed)
    }

    async fn rollback_info(&self, name: &str) -> Result<Vec<String>> {
        self.ctx.listing(&format!("storage rollback list {}", name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CommandOutput;
    use crate::testing::{fs_properties, veritas, FakeRunner, SFS_CACHE_LIST};
    use assert_matches::assert_matches;

    const SNAPSHOTS: &str = "\
NAME     TYPE      FILESYSTEM   SNAPDATE
snap1    spaceopt  fs1          2015/07/15 11:33
snap2    spaceopt  fs2          2015/07/16 09:00
";

    const ROLLSYNC: &str = "\n    Rollback snap1, Tier 1: 83.59%  Start_time: Jul/15/2015/11:33:19   Work_time: 0:0:46     Remaining_time: 0:09";

    fn snapshots(runner: &Arc<FakeRunner>, flavor: Flavor) -> Snapshots {
        Snapshots::new(veritas(runner, flavor))
    }

    #[tokio::test]
    async fn test_list_with_searched_cache() {
        let runner = FakeRunner::new();
        runner.on("storage rollback list", CommandOutput::ok(SNAPSHOTS));
        runner.on("storage rollback cache list", CommandOutput::ok(SFS_CACHE_LIST));
        runner.on(
            "storage rollback cache list cache1",
            CommandOutput::ok("rollbacks located on cache cache1:\nsnap1\n"),
        );
        let list = snapshots(&runner, Flavor::Sfs).list().await.unwrap();

        assert_eq!(list.len(), 2);
        assert_eq!(list[0].filesystem, "fs1");
        assert_eq!(list[0].date, "2015/07/15 11:33");
        let cache = list[0].cache.resolve().await.unwrap().unwrap();
        assert_eq!(cache.as_ref().map(|c| c.name.as_str()), Some("cache1"));
        assert_eq!(list[1].cache.resolve().await.unwrap().unwrap().as_ref().map(|c| c.name.clone()), None);
    }

    #[tokio::test]
    async fn test_timeouts_check_name_and_filesystem() {
        let runner = FakeRunner::new();
        runner.on("storage rollback list", CommandOutput::ok(SNAPSHOTS));
        runner.timeout("storage rollback destroy");
        runner.timeout("storage rollback create");
        let snapshots = snapshots(&runner, Flavor::Sfs);

        snapshots.delete("snap1", "fs2").await.unwrap();
        assert_matches!(snapshots.delete("snap1", "fs1").await, Err(Error::ExecutionTimeout(_)));

        let created = snapshots.create("snap2", "fs2", "cache1").await.unwrap();
        assert_eq!(created.filesystem, "fs2");
        assert_matches!(
            snapshots.create("snap2", "fs1", "cache1").await,
            Err(Error::ExecutionTimeout(_))
        );
    }

    #[tokio::test]
    async fn test_create() {
        let runner = FakeRunner::new();
        runner.on("storage rollback create space-optimized snap1 fs1 cache1", CommandOutput::ok(""));
        runner.on(
            "storage rollback create space-optimized snap2 fs1 cache1",
            CommandOutput::ok("SFS rollback ERROR V-288-0 Rollback snap2 already exist for file system fs1.\n"),
        );
        runner.on(
            "storage rollback create space-optimized snap3 fs9 cache1",
            CommandOutput::ok("SFS rollback ERROR V-288-0 File system fs9 does not exist\n"),
        );
        runner.on(
            "storage rollback create space-optimized snap4 fs1 cache9",
            CommandOutput::ok("SFS rollback ERROR V-288-0 cache object cache9 does not exist\n"),
        );
        let snapshots = snapshots(&runner, Flavor::Sfs);

        let snap = snapshots.create("snap1", "fs1", "cache1").await.unwrap();
        assert_eq!(snap.snaptype, "space-optimized");
        assert!(snap.cache.is_deferred());
        assert_matches!(
            snapshots.create("snap2", "fs1", "cache1").await,
            Err(Error::AlreadyExists { kind: ResourceKind::Snapshot, .. })
        );
        assert_matches!(
            snapshots.create("snap3", "fs9", "cache1").await,
            Err(Error::DoesNotExist { kind: ResourceKind::FileSystem, .. })
        );
        assert_matches!(
            snapshots.create("snap4", "fs1", "cache9").await,
            Err(Error::DoesNotExist { kind: ResourceKind::Cache, .. })
        );
    }

    #[tokio::test]
    async fn test_create_on_full_cache() {
        let runner = FakeRunner::new();
        runner.on(
            "storage rollback create",
            CommandOutput::ok("SFS rollback ERROR V-288-0 fsck failed for snap1\n"),
        );
        runner.on(
            "storage rollback cache list",
            CommandOutput::ok("CACHE NAME TOTAL(Mb) USED(Mb) (%) AVAIL(Mb) (%) SDCNT\ncache1 100 100 (100) 0 (0) 3\n"),
        );
        let err = snapshots(&runner, Flavor::Sfs)
            .create("snap1", "fs1", "cache1")
            .await
            .unwrap_err();
        assert_matches!(err, Error::Creation { kind: ResourceKind::Snapshot, .. });
        assert!(err
            .to_string()
            .starts_with("Failed to create the snapshot \"snap1\" for the file system \"fs1\" because the cache \"cache1\" is full."));
    }

    #[tokio::test]
    async fn test_delete_offlines_online_rollback() {
        let runner = FakeRunner::new();
        runner.once(
            "storage rollback destroy snap1 fs1",
            CommandOutput::ok("SFS rollback ERROR V-288-0 Rollback destroy operation failed as snap1 is in online state, run offline first.\n"),
        );
        runner.on("storage rollback offline snap1", CommandOutput::ok(""));
        runner.on("storage rollback destroy snap1 fs1", CommandOutput::ok(""));
        snapshots(&runner, Flavor::Sfs).delete("snap1", "fs1").await.unwrap();
        assert_eq!(runner.count("storage rollback destroy"), 2);
    }

    #[tokio::test]
    async fn test_delete_errors() {
        let runner = FakeRunner::new();
        runner.on(
            "storage rollback destroy snap1 fs1",
            CommandOutput::ok("SFS rollback ERROR V-288-0 Rollback snap1 dissociate failed.\n"),
        );
        runner.on(
            "storage rollback destroy snap9 fs1",
            CommandOutput::ok("SFS rollback ERROR V-288-3075 Specified rollback snap9 does not exist.\n"),
        );
        runner.on(
            "storage rollback destroy snap2 fs1",
            CommandOutput::ok("SFS rollback ERROR V-288-2027 rollback snap2 volume busy\n"),
        );
        runner.on("storage fs destroy snap2", CommandOutput::ok(""));
        let snapshots = snapshots(&runner, Flavor::Sfs);

        assert_matches!(snapshots.delete("snap1", "fs1").await, Err(Error::RollsyncRunning(_)));
        assert_matches!(
            snapshots.delete("snap9", "fs1").await,
            Err(Error::DoesNotExist { kind: ResourceKind::Snapshot, .. })
        );
        snapshots.delete("snap2", "fs1").await.unwrap();
        assert_eq!(runner.count("storage fs destroy snap2"), 1);
    }

    #[tokio::test]
    async fn test_restore() {
        let runner = FakeRunner::new();
        runner.on("storage fs offline fs1", CommandOutput::ok(""));
        runner.on("storage rollback restore fs1 snap1", CommandOutput::ok(""));
        runner.on("storage fs online fs1", CommandOutput::ok(""));
        snapshots(&runner, Flavor::Sfs).restore("snap1", "fs1").await.unwrap();

        let commands = runner.commands();
        let position = |needle: &str| commands.iter().position(|c| c.contains(needle)).unwrap();
        assert!(position("storage fs offline fs1") < position("storage rollback restore fs1 snap1"));
        assert!(position("storage rollback restore fs1 snap1") < position("storage fs online fs1"));
        assert!(commands[position("storage rollback restore")].starts_with("SNAPSHOT_RESTORE_CONFIRM=YES "));
    }

    #[tokio::test]
    async fn test_restore_while_rollsync_running() {
        let runner = FakeRunner::new();
        runner.on("storage fs offline fs1", CommandOutput::ok(""));
        runner.on(
            "storage rollback restore fs1 snap2",
            CommandOutput::ok("SFS rollback ERROR V-288-0 restore from rollback snap2 failed.\n"),
        );
        runner.on("storage fs list fs1", CommandOutput::ok(fs_properties(ROLLSYNC)));
        runner.on("storage fs online fs1", CommandOutput::ok(""));
        let err = snapshots(&runner, Flavor::Sfs).restore("snap2", "fs1").await.unwrap_err();

        assert_matches!(err, Error::RollsyncRunning(msg) if msg.starts_with("File system failed to restore: "));
        assert_eq!(runner.count("storage fs online fs1"), 1);
        let commands = runner.commands();
        assert!(commands.last().unwrap().contains("storage fs online fs1"));
    }

    #[tokio::test]
    async fn test_restore_ongoing_message() {
        let runner = FakeRunner::new();
        runner.on("storage fs offline fs1", CommandOutput::ok(""));
        runner.on(
            "storage rollback restore fs1 snap2",
            CommandOutput::ok("ACCESS rollback ERROR V-288-0 Unable to restore file system fs1 with rollback snap2. Rollback restore operation failed as rollback sync is in progress for fs1.\n"),
        );
        runner.on("storage fs online fs1", CommandOutput::ok("ACCESS fs ERROR V-288-0 Filesystem is already online.\n"));
        let err = snapshots(&runner, Flavor::Va).restore("snap2", "fs1").await.unwrap_err();
        assert_matches!(err, Error::RollsyncRunning(_));
        assert_eq!(runner.count("storage fs list fs1"), 0);
    }

    #[tokio::test]
    async fn test_restore_failures() {
        let runner = FakeRunner::new();
        runner.on("storage fs offline fs1", CommandOutput::ok("SFS fs ERROR V-288-0 fs1 is busy\n"));
        let err = snapshots(&runner, Flavor::Sfs).restore("snap1", "fs1").await.unwrap_err();
        assert_matches!(err, Error::Offline(msg) if msg.starts_with("File system failed to restore: Failed to offline"));
        assert_eq!(runner.count("storage rollback restore"), 0);

        let runner = FakeRunner::new();
        runner.on("storage fs offline fs1", CommandOutput::ok(""));
        runner.on(
            "storage rollback restore fs1 snap9",
            CommandOutput::ok("SFS rollback ERROR V-288-3075 Specified rollback snap9 does not exist.\n"),
        );
        runner.on("storage fs online fs1", CommandOutput::ok(""));
        let err = snapshots(&runner, Flavor::Sfs).restore("snap9", "fs1").await.unwrap_err();
        assert!(err.is_not_found(ResourceKind::Snapshot));
        assert_eq!(runner.count("storage fs online fs1"), 1);
    }

    #[tokio::test]
    async fn test_restore_timeout_onlines() {
        let runner = FakeRunner::new();
        runner.on("storage fs offline fs1", CommandOutput::ok(""));
        runner.timeout("storage rollback restore fs1 snap1");
        runner.on("storage fs online fs1", CommandOutput::ok(""));
        let err = snapshots(&runner, Flavor::Sfs).restore("snap1", "fs1").await.unwrap_err();
        assert_matches!(err, Error::ExecutionTimeout(_));
        assert_eq!(runner.count("storage fs online fs1"), 1);
    }

    #[tokio::test]
    async fn test_rollback_info() {
        let runner = FakeRunner::new();
        runner.on("storage rollback list snap1", CommandOutput::ok("NAME TYPE\nsnap1 spaceopt\n"));
        let lines = snapshots(&runner, Flavor::Sfs).rollback_info("snap1").await.unwrap();
        assert_eq!(lines, vec!["NAME TYPE", "snap1 spaceopt"]);
    }
}
