//! UnityXT file system snapshots
//!
//! Unity snapshots need no cache, so listed snapshots carry `None`.

use super::rest::{text, UnityApi};
use super::UNITY;
use crate::domain::attr::Attr;
use crate::domain::objects::Snapshot;
use crate::domain::ports::{Resource, SnapshotResource};
use crate::error::{Error, ResourceKind, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Snapshots of file systems; type 2 and up are LUNs and consistency groups
const FILESYSTEM_SNAPS: &str = "storageResource.type==1";

const ROLLBACK_HEADER: &str = "NAME CREATIONTIME             SIZE";

#[derive(Clone)]
pub struct UnitySnapshots {
    api: Arc<UnityApi>,
}

impl UnitySnapshots {
    pub fn new(api: Arc<UnityApi>) -> Self {
        Self { api }
    }

    async fn storage_resource(&self, filesystem: &str) -> Result<Option<String>> {
        match self
            .api
            .get_instance_by_name("filesystem", filesystem, &["storageResource"])
            .await?
        {
            Some(fs) => Ok(Some(text(&fs, "/storageResource/id")?)),
            None => Ok(None),
        }
    }

    fn fs_not_found(filesystem: &str) -> Error {
        Error::does_not_exist(
            ResourceKind::FileSystem,
            format!("Cannot find file system called {}", filesystem),
        )
    }
}

#[async_trait]
impl Resource for UnitySnapshots {
    type Object = Snapshot;

    fn nas_name(&self) -> &str {
        UNITY
    }

    async fn list(&self) -> Result<Vec<Snapshot>> {
        let entries = self
            .api
            .get_instances(
                "snap",
                &["name", "storageResource.name", "creationTime"],
                &[FILESYSTEM_SNAPS],
            )
            .await?;
        entries
            .iter()
            .map(|entry| {
                Ok(Snapshot::new(
                    text(entry, "/name")?,
                    text(entry, "/storageResource/name")?,
                    Attr::value(None),
                    "",
                    text(entry, "/creationTime")?,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl SnapshotResource for UnitySnapshots {
    async fn create(&self, name: &str, filesystem: &str, _cache: &str) -> Result<Snapshot> {
        info!("unityxt.SS.create name={} filesystem={}", name, filesystem);
        let resource = self
            .storage_resource(filesystem)
            .await?
            .ok_or_else(|| Self::fs_not_found(filesystem))?;

        let body = json!({
            "storageResource": UnityApi::reference(&resource),
            "name": name,
        });
        self.api
            .create_instance("snap", &body)
            .await
            .map_err(|e| match e {
                Error::ExecCommand(msg) => Error::creation(ResourceKind::Snapshot, msg),
                e => e,
            })?;
        Ok(Snapshot::new(name, filesystem, Attr::value(None), "", ""))
    }

    async fn delete(&self, name: &str, filesystem: &str) -> Result<()> {
        info!("unityxt.SS.delete name={} filesystem={}", name, filesystem);
        if self.storage_resource(filesystem).await?.is_none() {
            warn!("Cannot find file system called {}", filesystem);
        }
        match self.api.id_for_name("snap", name).await? {
            Some(id) => self.api.delete_instance("snap", &id).await.map_err(|e| match e {
                Error::ExecCommand(msg) => Error::deletion(ResourceKind::Snapshot, msg),
                e => e,
            }),
            None => {
                warn!("Cannot find snap called {}", name);
                Ok(())
            }
        }
    }

    /// Restores in place; the appliance keeps a backup snapshot of the
    /// replaced state, which is removed afterwards
    async fn restore(&self, name: &str, filesystem: &str) -> Result<()> {
        info!("unityxt.SS.restore name={} filesystem={}", name, filesystem);
        if self.storage_resource(filesystem).await?.is_none() {
            return Err(Self::fs_not_found(filesystem));
        }
        let id = self.api.id_for_name("snap", name).await?.ok_or_else(|| {
            Error::does_not_exist(ResourceKind::Snapshot, format!("Cannot find snap called {}", name))
        })?;

        let response = self
            .api
            .action("snap", &id, "restore", None)
            .await
            .map_err(|e| match e {
                Error::ExecCommand(msg) => Error::Restore(msg),
                e => e,
            })?;
        let backup = text(&response, "/content/backup/id")?;
        info!("unityxt.SS.restore deleting backup id={}", backup);
        self.api.delete_instance("snap", &backup).await
    }

    async fn rollback_info(&self, name: &str) -> Result<Vec<String>> {
        info!("unityxt.SS.rollbackinfo name={}", name);
        let snap = self
            .api
            .get_instance_by_name("snap", name, &["name", "creationTime", "size"])
            .await?
            .ok_or_else(|| {
                Error::does_not_exist(
                    ResourceKind::Snapshot,
                    format!("Cannot find rollback info on snap called {}", name),
                )
            })?;
        Ok(vec![
            ROLLBACK_HEADER.to_string(),
            format!(
                "{} {} {}",
                text(&snap, "/name")?,
                text(&snap, "/creationTime")?,
                text(&snap, "/size")?
            ),
        ])
    }
}
