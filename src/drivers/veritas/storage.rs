//! Disks and pools on the Veritas family; both are read-only

use super::Context;
use crate::domain::objects::{Disk, Pool};
use crate::domain::ports::{DiskResource, PoolResource, Resource};
use crate::error::Result;
use crate::parsers::match_display_line;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

pub(crate) struct StoragePatterns {
    display: Vec<Regex>,
}

impl StoragePatterns {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            display: vec![Regex::new(r"^(?P<name>[-\w]+)\s+[-\w\s]+$")?],
        })
    }
}

/// Names in the first column of a listing with a two-line header
async fn list_names(ctx: &Context, command: &str) -> Result<Vec<String>> {
    let lines = ctx.listing(command).await?;
    lines
        .iter()
        .skip(2)
        .map(|line| {
            let line = line.trim();
            let caps = match_display_line(&ctx.patterns.storage.display, line, ctx.nas())?;
            Ok(caps["name"].to_string())
        })
        .collect()
}

/// `storage disk` resource
#[derive(Clone)]
pub struct Disks {
    ctx: Arc<Context>,
}

impl Disks {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Resource for Disks {
    type Object = Disk;

    fn nas_name(&self) -> &str {
        self.ctx.nas()
    }

    async fn list(&self) -> Result<Vec<Disk>> {
        let names = list_names(&self.ctx, "storage disk list").await?;
        Ok(names.into_iter().map(Disk::new).collect())
    }
}

impl DiskResource for Disks {}

/// `storage pool` resource
#[derive(Clone)]
pub struct Pools {
    ctx: Arc<Context>,
}

impl Pools {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Resource for Pools {
    type Object = Pool;

    fn nas_name(&self) -> &str {
        self.ctx.nas()
    }

    async fn list(&self) -> Result<Vec<Pool>> {
        let names = list_names(&self.ctx, "storage pool list").await?;
        Ok(names.into_iter().map(Pool::new).collect())
    }
}

impl PoolResource for Pools {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CommandOutput;
    use crate::drivers::veritas::Flavor;
    use crate::error::{Error, ResourceKind};
    use crate::testing::{veritas, FakeRunner};
    use assert_matches::assert_matches;

    const POOLS: &str = "\
Pool                  List of disks
====================  ==================
P1                    emc_clariion0_110 emc_clariion0_111
SFS_Pool-2            emc_clariion0_112
";

    #[tokio::test]
    async fn test_pool_list_and_get() {
        let runner = FakeRunner::new();
        runner.on("storage pool list", CommandOutput::ok(POOLS));
        let pools = Pools::new(veritas(&runner, Flavor::Sfs));

        let names: Vec<String> = pools.list().await.unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["P1", "SFS_Pool-2"]);
        assert!(pools.exists("SFS_Pool-2".into()).await.unwrap());
        assert!(!pools.exists("P9".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_disks_are_read_only() {
        let runner = FakeRunner::new();
        runner.on(
            "storage disk list",
            CommandOutput::ok("Disk  sfs_01\n====  ======\ndisk_1  OK\ndisk_2  OK\n"),
        );
        let disks = Disks::new(veritas(&runner, Flavor::Va));

        assert_eq!(disks.list().await.unwrap().len(), 2);
        assert_matches!(
            disks.create("disk_3").await,
            Err(Error::Unsupported { kind: ResourceKind::Disk, operation: "create" })
        );
        assert_matches!(
            Pools::new(veritas(&runner, Flavor::Va)).delete("P1").await,
            Err(Error::Unsupported { kind: ResourceKind::Pool, operation: "delete" })
        );
    }
}
