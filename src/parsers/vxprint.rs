//! Parser for the `vxprint` topology dump
//!
//! ```text
//! TY NAME         ASSOC        KSTATE  LENGTH PLOFFS STATE  TUTIL0 PUTIL0
//! v  fs1_tier1    fs1          ENABLED 204800 -      ACTIVE -      -
//! pl fs1_tier1-01 fs1_tier1    ENABLED 204800 -      ACTIVE -      -
//! sd disk_1-88    fs1_tier1-01 ENABLED 32240  0      -      -      -      disk_1
//! dc fs1_tier1_dco fs1_tier1   -       -      -      -      -      -
//! v  fs1_tier1_dcl gen         ENABLED 544    -      ACTIVE -      -
//! ```
//!
//! Blocks are separated by blank lines and named after their first row.
//! `sd` rows accumulate in a list and carry an extra `device` column. A `dc`
//! row switches every following row of the block into the data change
//! sub-block.

use indexmap::IndexMap;
use serde::Serialize;

/// One row, keyed by lower-case header column
pub type VxRecord = IndexMap<String, String>;

/// All blocks of a dump, keyed by object name
pub type VxTopology = IndexMap<String, VxBlock>;

/// Rows describing one storage object
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VxBlock {
    records: IndexMap<String, VxRecord>,
    subdisks: Vec<VxRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dc: Option<Box<VxBlock>>,
}

impl VxBlock {
    /// Row of the given type tag (`v`, `pl`, `vt`, ...)
    pub fn record(&self, tag: &str) -> Option<&VxRecord> {
        self.records.get(tag)
    }

    pub fn subdisks(&self) -> &[VxRecord] {
        &self.subdisks
    }

    /// Data change sub-block
    pub fn dc(&self) -> Option<&VxBlock> {
        self.dc.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.subdisks.is_empty() && self.dc.is_none()
    }

    /// Volume length in 512-byte blocks
    pub fn length_in_blocks(&self) -> Option<u64> {
        self.record("v")?.get("length")?.parse().ok()
    }

    /// Devices backing the volume, or its data change log for snapshots
    pub fn subdisk_devices(&self) -> Vec<&str> {
        let subdisks = if !self.subdisks.is_empty() {
            &self.subdisks
        } else {
            match &self.dc {
                Some(dc) => &dc.subdisks,
                None => return Vec::new(),
            }
        };
        subdisks
            .iter()
            .filter_map(|sd| sd.get("device").map(String::as_str))
            .collect()
    }

    /// Disk name of the first subdisk (`disk_1-88` gives `disk_1`)
    pub fn first_disk(&self) -> Option<&str> {
        let name = self.subdisks.first()?.get("name")?;
        name.split('-').next()
    }
}

/// Which map rows of a block are written to
enum Target {
    Volume,
    DataChange,
}

struct BlockBuilder {
    block: VxBlock,
    target: Target,
}

impl BlockBuilder {
    fn new() -> Self {
        Self {
            block: VxBlock::default(),
            target: Target::Volume,
        }
    }

    fn current(&mut self) -> &mut VxBlock {
        match self.target {
            Target::Volume => &mut self.block,
            Target::DataChange => self.block.dc.get_or_insert_with(Box::default).as_mut(),
        }
    }

    fn push(&mut self, header: &[String], values: &[&str]) {
        let tag = values[0];
        if tag == "sd" {
            let mut record = zip(header, values);
            if let Some(device) = values.get(header.len()) {
                record.insert("device".to_string(), device.to_string());
            }
            self.current().subdisks.push(record);
            return;
        }
        if tag == "dc" {
            self.block.dc = Some(Box::default());
            self.target = Target::DataChange;
        }
        let record = zip(header, values);
        self.current().records.insert(tag.to_string(), record);
    }
}

fn zip(header: &[String], values: &[&str]) -> VxRecord {
    header
        .iter()
        .cloned()
        .zip(values.iter().map(|v| v.to_string()))
        .collect()
}

/// Parse a `vxprint` dump into blocks keyed by object name
///
/// Output without a `TY` header yields an empty topology.
pub fn parse_vxprint(text: &str) -> VxTopology {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let Some(header_idx) = lines.iter().position(|l| l.starts_with("TY")) else {
        return VxTopology::new();
    };
    let header: Vec<String> = lines[header_idx]
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();

    let mut topology = VxTopology::new();
    for block in lines[header_idx + 1..].split(|l| l.is_empty()) {
        let rows: Vec<Vec<&str>> = block
            .iter()
            .map(|l| l.split_whitespace().collect::<Vec<_>>())
            .filter(|v| !v.is_empty())
            .collect();
        let Some(name) = rows.first().and_then(|r| r.get(1)) else {
            continue;
        };

        let mut builder = BlockBuilder::new();
        for row in &rows {
            builder.push(&header, row);
        }
        topology.insert(name.to_string(), builder.block);
    }
    topology
}

#[cfg(test)]
mod tests {
    use super::*;

    const VXPRINT: &str = "
Disk group: sfsdg

TY NAME       ASSOC      KSTATE   LENGTH  PLOFFS  STATE  TUTIL0  PUTIL0
dg nbuapp     nbuapp     -        -        -        -      -       -

dm disk_1     disk_1     -        9755774656 -      -      -       -

v  catvol     fsgen      ENABLED  1951154176 -      ACTIVE -       -
pl catvol-01  catvol     ENABLED  1951154176 -      ACTIVE -       -
sd disk_1-01  catvol-01  ENABLED  2097152  0        -      -       -    disk_1
sd disk_1-03  catvol-01  ENABLED  1949057024 2097152 -     -       -    disk_2

vt SFS_s -   ENABLED  -        -        ACTIVE   -       -
v  SFS_s_tier1 SFS_s ENABLED 204800 - ACTIVE -   -
pl SFS_s_tier1-01 SFS_s_tier1 ENABLED 204800 - ACTIVE - -
sd emc_clariion0_110-88 SFS_s_tier1-01 ENABLED 32240 0 - - - emc_clariion0_110
dc SFS_s_tier1_dco SFS_s_tier1 - - - -       -       -
v  SFS_s_tier1_dcl gen ENABLED 544   -        ACTIVE   -       -
pl SFS_s_tier1_dcl-01 SFS_s_tier1_dcl ENABLED 544 - ACTIVE - -
sd emc_clariion0_121-05 SFS_s_tier1_dcl-01 ENABLED 544 0 - - - emc_clariion0_121
";

    #[test]
    fn test_blocks_by_name() {
        let topology = parse_vxprint(VXPRINT);
        assert_eq!(
            topology.keys().collect::<Vec<_>>(),
            vec!["nbuapp", "disk_1", "catvol", "SFS_s"]
        );

        let catvol = &topology["catvol"];
        assert_eq!(catvol.length_in_blocks(), Some(1951154176));
        assert_eq!(catvol.record("pl").unwrap()["assoc"], "catvol");
        assert_eq!(catvol.subdisks().len(), 2);
        assert_eq!(catvol.subdisk_devices(), vec!["disk_1", "disk_2"]);
        assert_eq!(catvol.first_disk(), Some("disk_1"));
        assert!(catvol.dc().is_none());
    }

    #[test]
    fn test_data_change_sub_block() {
        let topology = parse_vxprint(VXPRINT);
        let block = &topology["SFS_s"];
        assert_eq!(block.record("vt").unwrap()["state"], "ACTIVE");
        assert_eq!(block.length_in_blocks(), Some(204800));
        assert_eq!(block.subdisks().len(), 1);

        let dc = block.dc().unwrap();
        assert_eq!(dc.record("dc").unwrap()["name"], "SFS_s_tier1_dco");
        assert_eq!(dc.record("v").unwrap()["length"], "544");
        assert_eq!(dc.subdisk_devices(), vec!["emc_clariion0_121"]);
    }

    #[test]
    fn test_snapshot_devices_come_from_dc() {
        let output = "TY NAME ASSOC KSTATE LENGTH PLOFFS STATE TUTIL0 PUTIL0
vt snap1 - ENABLED - - ACTIVE - -
dc snap1_dco snap1 - - - - - -
sd disk_9-01 snap1_dcl-01 ENABLED 544 0 - - - disk_9
";
        let topology = parse_vxprint(output);
        assert_eq!(topology["snap1"].subdisk_devices(), vec!["disk_9"]);
    }

    #[test]
    fn test_no_header() {
        assert!(parse_vxprint("VxVM vxprint ERROR V-5-1-924 Record fs9 not found").is_empty());
    }
}
