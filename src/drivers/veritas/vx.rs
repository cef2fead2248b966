//! Volume manager tools
//!
//! The `vx*` commands run straight from bash, outside the console. They
//! report more precise data than clish: exact volume lengths, the disks
//! behind a volume and the disk group alignment.

use crate::domain::objects::ParsedData;
use crate::domain::ports::CommandRunnerRef;
use crate::domain::size::{AlignedSize, Size};
use crate::error::{Error, Result};
use crate::parsers::{parse_table, parse_typed, parse_vxprint, Properties, Table, VxBlock, VxTopology};
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

const VXPRINT_FORMAT: &str =
    "vxprint -hrAF sd:'%type %name %assoc %kstate %len %column_pl_offset %state %tutil0 %putil0 %device'";

/// Runner for the `vx*` tools of one appliance
#[derive(Clone)]
pub struct VxTools {
    runner: CommandRunnerRef,
    nas: &'static str,
    alignment: Arc<Regex>,
}

impl VxTools {
    pub fn new(runner: CommandRunnerRef, nas: &'static str) -> Result<Self> {
        Ok(Self {
            runner,
            nas,
            alignment: Arc::new(Regex::new(r"(\d+)\s+\(bytes\)")?),
        })
    }

    /// Run a tool; anything on stderr is a failure
    pub async fn execute(&self, command: &str) -> Result<String> {
        let output = self.runner.run(command, None).await?;
        if !output.stderr.is_empty() {
            let msg = format!(
                "ERROR while trying to execute command \"{}\": {}",
                command, output.stderr
            );
            debug!("VxTools: {}", msg);
            return Err(Error::VxCommand(msg));
        }
        debug!("VxTools: executed {} command successfully", command);
        Ok(output.stdout)
    }

    /// Topology of every volume
    pub async fn vxprint(&self) -> Result<VxTopology> {
        Ok(parse_vxprint(&self.execute(VXPRINT_FORMAT).await?))
    }

    /// Topology block of one volume, `None` when the dump does not show it
    pub async fn vxprint_object(&self, name: &str) -> Result<Option<VxBlock>> {
        let out = self.execute(&format!("{} {}", VXPRINT_FORMAT, name)).await?;
        Ok(parse_vxprint(&out).shift_remove(name))
    }

    /// Names known to the volume manager, from plain `vxprint`
    pub async fn volume_names(&self) -> Result<Vec<String>> {
        let out = self.execute("vxprint").await?;
        Ok(parse_vxprint(&out).into_keys().collect())
    }

    pub async fn disk_list(&self, disk: &str) -> Result<Properties> {
        Ok(parse_typed(&self.execute(&format!("vxdisk list {}", disk)).await?))
    }

    pub async fn group_properties(&self, group_id: &str) -> Result<Properties> {
        Ok(parse_typed(&self.execute(&format!("vxdg -q list {}", group_id)).await?))
    }

    /// Disk to tag table; the `value` column is the pool
    pub async fn disk_tags(&self) -> Result<Table> {
        Ok(parse_table(&self.execute("vxdisk listtag").await?, "device"))
    }

    pub async fn task_list(&self) -> Result<Properties> {
        Ok(parse_typed(&self.execute("vxtask list").await?))
    }

    /// Remove the volume a failed cache operation left behind
    pub async fn remove_cache_volume(&self, cache: &str) -> Result<()> {
        self.execute(&format!("vxedit -rf rm {}_tier1", cache)).await?;
        Ok(())
    }

    pub async fn grow_cache(&self, name: &str, size: &Size) -> Result<()> {
        self.execute(&format!("vxcache growcacheto {} {}", name, size)).await?;
        Ok(())
    }

    pub async fn disk_group_id(&self, disk: &str) -> Result<String> {
        let properties = self.disk_list(disk).await?;
        properties
            .get("group")
            .and_then(|group| group.get("id"))
            .map(|id| id.to_text())
            .ok_or_else(|| {
                let msg = format!("Could not get the group id from disk {}", disk);
                debug!("VxTools: {}", msg);
                Error::VxCommand(msg)
            })
    }

    /// Disks and pools backing a file system, cache or snapshot volume
    ///
    /// Missing topology or tags mean the object is changing under us; that
    /// is reported as incomplete information carrying the object name.
    pub async fn pools_and_disks(&self, name: &str) -> Result<(Vec<String>, Vec<String>)> {
        debug!("VxTools: getting pools and disks of \"{}\"", name);
        let incomplete = || {
            Error::incomplete(
                format!(
                    "The output information returned from {} was incomplete, having empty values for the pool name.",
                    self.nas
                ),
                ParsedData::Name(name.to_string()),
            )
        };

        let block = self.vxprint_object(name).await?.ok_or_else(incomplete)?;
        let disks: Vec<String> = block.subdisk_devices().into_iter().map(str::to_string).collect();
        debug!("VxTools: disks of \"{}\": {:?}", name, disks);

        let tags = self.disk_tags().await?;
        let mut pools: Vec<String> = Vec::new();
        for disk in &disks {
            let pool = tags.get(disk).and_then(|row| row.get("value")).ok_or_else(incomplete)?;
            if !pools.contains(pool) {
                pools.push(pool.clone());
            }
        }
        debug!("VxTools: pools of \"{}\": {:?}", name, pools);
        Ok((disks, pools))
    }

    /// Pool of a cache volume; caches are created on a single pool
    pub async fn pool_by_cache(&self, name: &str) -> Result<String> {
        let (_, pools) = self.pools_and_disks(name).await?;
        pools.into_iter().next().ok_or_else(|| {
            Error::VxCommand(format!("No pool found for the cache object {}", name))
        })
    }

    /// Alignment in bytes of the disk group behind a volume
    ///
    /// Any failure along the way falls back to the 512-byte block size.
    pub async fn disk_alignment(&self, name: &str, block: &VxBlock) -> u64 {
        let default = AlignedSize::BLOCK_SIZE;
        let Some(disk) = block.first_disk() else {
            debug!(
                "VxTools: no subdisk information for {}. Using {} bytes as default size alignment.",
                name, default
            );
            return default;
        };

        let group_id = match self.disk_group_id(disk).await {
            Ok(id) => id,
            Err(e) => {
                debug!("VxTools: {}. Using {} bytes as default.", e, default);
                return default;
            }
        };
        let properties = match self.group_properties(&group_id).await {
            Ok(properties) => properties,
            Err(e) => {
                debug!("VxTools: {}. Using {} bytes as default.", e, default);
                return default;
            }
        };
        let Some(alignment) = properties.get("alignment") else {
            debug!(
                "VxTools: no alignment in the disk group properties of {}. Using {} bytes as default.",
                name, default
            );
            return default;
        };

        let text = alignment.to_text();
        match self
            .alignment
            .captures(&text)
            .and_then(|caps| caps[1].parse::<u64>().ok())
        {
            Some(bytes) => bytes,
            None => {
                debug!(
                    "VxTools: could not parse the alignment \"{}\" of {}. Using {} bytes as default.",
                    text, name, default
                );
                default
            }
        }
    }
}
