//! UnityXT file systems
//!
//! The layout column carries the NAS server a file system is exported from.
//! File systems are always online; `online` is accepted and ignored.

use super::rest::{integer, text, UnityApi};
use super::UNITY;
use crate::domain::attr::Attr;
use crate::domain::objects::{FileSystem, FileSystemUsage, Pool};
use crate::domain::ports::{CreateFileSystem, FileSystemResource, Resource};
use crate::domain::size::{AlignedSize, Size};
use crate::error::{Error, ResourceKind, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

const RESTORE_JOB_FILTER: &str = "description lk \"restore snapshot\" and ( state le 3 OR state eq 6 )";

/// `"true"` / `"false"` flag of data reduction requests
fn data_reduction(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn size_in_bytes(size: &str) -> Result<i64> {
    Size::parse(size)
        .ok()
        .and_then(|s| i64::try_from(s.bytes()).ok())
        .ok_or_else(|| {
            Error::size(
                ResourceKind::FileSystem,
                format!("Invalid file system size {}", size),
            )
        })
}

#[derive(Clone)]
pub struct UnityFileSystems {
    api: Arc<UnityApi>,
}

impl UnityFileSystems {
    pub fn new(api: Arc<UnityApi>) -> Self {
        Self { api }
    }

    /// Storage resource id behind a file system
    async fn storage_resource(&self, name: &str, fields: &[&str]) -> Result<Option<Value>> {
        self.api.get_instance_by_name("filesystem", name, fields).await
    }

    fn not_found(name: &str) -> Error {
        Error::does_not_exist(
            ResourceKind::FileSystem,
            format!("Cannot find file system called {}", name),
        )
    }
}

#[async_trait]
impl Resource for UnityFileSystems {
    type Object = FileSystem;

    fn nas_name(&self) -> &str {
        UNITY
    }

    async fn list(&self) -> Result<Vec<FileSystem>> {
        let entries = self
            .api
            .get_instances("filesystem", &["name", "sizeTotal", "pool.name", "nasServer.name"], &[])
            .await?;
        entries
            .iter()
            .map(|entry| {
                let size = Size::from_bytes(i128::from(integer(entry, "/sizeTotal")?));
                Ok(FileSystem::new(
                    text(entry, "/name")?,
                    AlignedSize::exact(size),
                    Some(text(entry, "/nasServer/name")?),
                    Attr::value(Pool::new(text(entry, "/pool/name")?)),
                )
                .with_online(true))
            })
            .collect()
    }
}

#[async_trait]
impl FileSystemResource for UnityFileSystems {
    async fn create(&self, request: &CreateFileSystem) -> Result<FileSystem> {
        let CreateFileSystem {
            name,
            size,
            pool,
            layout,
            data_reduction: reduction,
        } = request;
        let reduction = reduction.as_deref().unwrap_or("true");
        info!(
            "unityxt.FS.create name={}, size={}, pool={}, layout={}, data_reduction_enabled={}",
            name, size, pool, layout, reduction
        );

        let enabled = data_reduction(reduction).ok_or_else(|| {
            Error::creation(
                ResourceKind::FileSystem,
                "Data reduction must be set to \"true\" or \"false\"",
            )
        })?;
        let bytes = size_in_bytes(size)?;

        if self.api.id_for_name("filesystem", name).await?.is_some() {
            return Err(Error::already_exists(
                ResourceKind::FileSystem,
                format!("Filesystem {} already exists", name),
            ));
        }
        let pool_id = self.api.id_for_name("pool", pool).await?.ok_or_else(|| {
            Error::does_not_exist(ResourceKind::Pool, format!("Cannot find pool called {}", pool))
        })?;
        let nas_id = self.api.id_for_name("nasServer", layout).await?.ok_or_else(|| {
            Error::creation(
                ResourceKind::FileSystem,
                format!("Cannot find nasServer called {}", layout),
            )
        })?;

        let body = json!({
            "name": name,
            "fsParameters": {
                "pool": UnityApi::reference(&pool_id),
                "nasServer": UnityApi::reference(&nas_id),
                "supportedProtocols": 0,
                "flrVersion": 0,
                "isThinEnabled": true,
                "isDataReductionEnabled": enabled,
                "size": bytes,
            }
        });
        let response = self
            .api
            .post("/api/types/storageResource/action/createFilesystem", Some(&body))
            .await
            .map_err(|e| match e {
                Error::ExecCommand(msg) => Error::creation(ResourceKind::FileSystem, msg),
                e => e,
            })?;
        debug!(
            "unityxt.FS.create: fs_id={}",
            text(&response, "/content/storageResource/id").unwrap_or_default()
        );

        Ok(FileSystem::new(
            name.as_str(),
            AlignedSize::exact(Size::from_bytes(i128::from(bytes))),
            Some(layout.clone()),
            Attr::value(Pool::new(pool.as_str())),
        )
        .with_online(true))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        info!("unityxt.FS.delete name={}", name);
        let instance = self
            .storage_resource(name, &["storageResource"])
            .await?
            .ok_or_else(|| Self::not_found(name))?;
        self.api
            .delete_instance("storageResource", &text(&instance, "/storageResource/id")?)
            .await
            .map_err(|e| match e {
                Error::ExecCommand(msg) => Error::deletion(ResourceKind::FileSystem, msg),
                e => e,
            })?;
        debug!("unityxt.FS.delete completed for {}", name);
        Ok(())
    }

    async fn resize(&self, name: &str, size: &str, _pool: Option<&str>) -> Result<()> {
        info!("unityxt.FS.resize name={} size={}", name, size);
        let bytes = size_in_bytes(size)?;
        let instance = self
            .storage_resource(name, &["storageResource", "sizeTotal"])
            .await?
            .ok_or_else(|| Self::not_found(name))?;

        let current = integer(&instance, "/sizeTotal")?;
        match current.cmp(&bytes) {
            Ordering::Equal => {
                return Err(Error::SameSize {
                    kind: ResourceKind::FileSystem,
                    message: format!(
                        "The size of the file system \"{}\" is already equal to the target size \"{}\".",
                        name, size
                    ),
                })
            }
            Ordering::Greater => {
                return Err(Error::CannotShrink {
                    kind: ResourceKind::FileSystem,
                    message: format!(
                        "Size of the existing file system \"{}\" on {} is \"{}\" which is greater than the requested size \"{}\". Shrinking the existing file system is not supported.",
                        name,
                        UNITY,
                        Size::from_bytes(i128::from(current)).normalized(),
                        size
                    ),
                })
            }
            Ordering::Less => {}
        }

        let body = json!({ "fsParameters": { "size": bytes } });
        self.api
            .action(
                "storageResource",
                &text(&instance, "/storageResource/id")?,
                "modifyFilesystem",
                Some(&body),
            )
            .await
            .map_err(|e| match e {
                Error::ExecCommand(msg) => Error::resize(ResourceKind::FileSystem, msg),
                e => e,
            })?;
        Ok(())
    }

    async fn online(&self, name: &str, online: bool) -> Result<()> {
        info!("online name={} online={}", name, online);
        Ok(())
    }

    /// Any running snapshot restore job counts
    ///
    /// Jobs do not name the file system they restore, so a restore of
    /// another file system (or LUN) on the array also reports `true`.
    async fn is_restore_running(&self, name: &str) -> Result<bool> {
        info!("unityxt.FS.is_restore_running: filesystem={}", name);
        let jobs = self
            .api
            .get_instances("job", &["description", "state"], &[RESTORE_JOB_FILTER])
            .await?;
        for job in &jobs {
            info!(
                "unityxt.FS.is_restore_running: A restore snapshot job is running with job id={}",
                text(job, "/id").unwrap_or_default()
            );
        }
        if jobs.is_empty() {
            info!("unityxt.FS.is_restore_running: No running restore snapshot jobs were detected.");
        }
        Ok(!jobs.is_empty())
    }

    async fn usage(&self) -> Result<Vec<FileSystemUsage>> {
        let entries = self
            .api
            .get_instances("filesystem", &["name", "sizeTotal", "sizeUsed"], &[])
            .await?;
        entries
            .iter()
            .map(|entry| {
                let total = integer(entry, "/sizeTotal")? as f64;
                let used = integer(entry, "/sizeUsed")? as f64;
                let percent = if total > 0.0 { used / total * 100.0 } else { 0.0 };
                Ok(FileSystemUsage {
                    filesystem: text(entry, "/name")?,
                    use_percent: format!("{:.1}%", percent),
                })
            })
            .collect()
    }

    async fn change_data_reduction(&self, name: &str, enabled: &str) -> Result<()> {
        info!("unityxt.FS.change_data_reduction change to: {}", enabled);
        let wanted = data_reduction(enabled).ok_or_else(|| {
            Error::resize(ResourceKind::FileSystem, "Data reduction must be \"true\" or \"false\"")
        })?;
        let instance = self
            .storage_resource(name, &["storageResource", "isDataReductionEnabled"])
            .await?
            .ok_or_else(|| Self::not_found(name))?;

        let current = instance.get("isDataReductionEnabled").and_then(Value::as_bool);
        if current == Some(wanted) {
            debug!("Data reduction of {} is already {}", name, enabled);
            return Ok(());
        }
        let body = json!({ "fsParameters": { "isDataReductionEnabled": wanted } });
        self.api
            .action(
                "storageResource",
                &text(&instance, "/storageResource/id")?,
                "modifyFilesystem",
                Some(&body),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Method;
    use crate::testing::FakeRest;
    use assert_matches::assert_matches;

    fn filesystems(rest: &Arc<FakeRest>) -> UnityFileSystems {
        UnityFileSystems::new(Arc::new(UnityApi::new(rest.clone())))
    }

    fn listing() -> Value {
        json!({ "entries": [
            { "content": { "id": "fs_1", "name": "fs1", "sizeTotal": 10737418240i64, "sizeUsed": 5368709120i64,
                           "pool": { "id": "pool_1", "name": "P1" }, "nasServer": { "id": "nas_1", "name": "ns1" } } },
            { "content": { "id": "fs_2", "name": "fs2", "sizeTotal": 3000, "sizeUsed": 1000,
                           "pool": { "id": "pool_1", "name": "P1" }, "nasServer": { "id": "nas_1", "name": "ns1" } } }
        ] })
    }

    #[tokio::test]
    async fn test_list_and_usage() {
        let rest = FakeRest::new();
        rest.on(Method::Get, "/api/types/filesystem/instances", 200, listing());
        let fs = filesystems(&rest);

        let list = fs.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].size.actual(), Size::parse("10G").unwrap());
        assert_eq!(list[0].layout.as_deref(), Some("ns1"));
        assert_eq!(list[0].pool_name(), Some("P1"));
        assert!(list[0].online);

        let usage = fs.usage().await.unwrap();
        assert_eq!(usage[0].use_percent, "50.0%");
        assert_eq!(usage[1].use_percent, "33.3%");
    }

    #[tokio::test]
    async fn test_create() {
        let rest = FakeRest::new();
        rest.on(Method::Get, "/api/instances/filesystem/name:fs3", 404, Value::Null);
        rest.on(Method::Get, "/api/instances/filesystem/name:fs1", 200, json!({ "content": { "id": "fs_1" } }));
        rest.on(Method::Get, "/api/instances/pool/name:P1", 200, json!({ "content": { "id": "pool_1" } }));
        rest.on(Method::Get, "/api/instances/pool/name:P9", 404, Value::Null);
        rest.on(Method::Get, "/api/instances/nasServer/name:ns1", 200, json!({ "content": { "id": "nas_1" } }));
        rest.on(
            Method::Post,
            "/api/types/storageResource/action/createFilesystem",
            200,
            json!({ "content": { "storageResource": { "id": "res_3" } } }),
        );
        let fs = filesystems(&rest);

        let request = CreateFileSystem::new("fs3", "1G", "P1").with_layout("ns1");
        let created = fs.create(&request).await.unwrap();
        assert_eq!(created.layout.as_deref(), Some("ns1"));
        let (_, _, body) = rest.requests().pop().unwrap();
        let body = body.unwrap();
        assert_eq!(body["fsParameters"]["size"], 1073741824i64);
        assert_eq!(body["fsParameters"]["isDataReductionEnabled"], true);
        assert_eq!(body["fsParameters"]["pool"]["id"], "pool_1");

        let request = CreateFileSystem::new("fs1", "1G", "P1").with_layout("ns1");
        assert_matches!(fs.create(&request).await, Err(Error::AlreadyExists { kind: ResourceKind::FileSystem, .. }));

        let request = CreateFileSystem::new("fs3", "1G", "P9").with_layout("ns1");
        assert_matches!(fs.create(&request).await, Err(Error::DoesNotExist { kind: ResourceKind::Pool, .. }));

        let mut request = CreateFileSystem::new("fs3", "1G", "P1").with_layout("ns1");
        request.data_reduction = Some("maybe".into());
        let err = fs.create(&request).await.unwrap_err();
        assert_eq!(err.to_string(), "Data reduction must be set to \"true\" or \"false\"");
    }

    #[tokio::test]
    async fn test_delete_and_resize() {
        let rest = FakeRest::new();
        rest.on(
            Method::Get,
            "/api/instances/filesystem/name:fs1",
            200,
            json!({ "content": { "id": "fs_1", "storageResource": { "id": "res_1" }, "sizeTotal": 1073741824i64 } }),
        );
        rest.on(Method::Get, "/api/instances/filesystem/name:fs9", 404, Value::Null);
        rest.on(Method::Delete, "/api/instances/storageResource/res_1", 204, Value::Null);
        rest.on(Method::Post, "/api/instances/storageResource/res_1/action/modifyFilesystem", 204, Value::Null);
        let fs = filesystems(&rest);

        fs.delete("fs1").await.unwrap();
        assert!(fs.delete("fs9").await.unwrap_err().is_not_found(ResourceKind::FileSystem));

        fs.resize("fs1", "2G", None).await.unwrap();
        let (_, endpoint, body) = rest.requests().pop().unwrap();
        assert_eq!(endpoint, "/api/instances/storageResource/res_1/action/modifyFilesystem");
        assert_eq!(body.unwrap()["fsParameters"]["size"], 2147483648i64);
    }

    #[tokio::test]
    async fn test_resize_rejects_same_and_smaller_sizes() {
        let rest = FakeRest::new();
        rest.on(
            Method::Get,
            "/api/instances/filesystem/name:fs1",
            200,
            json!({ "content": { "storageResource": { "id": "res_1" }, "sizeTotal": 10737418240i64 } }),
        );
        rest.on(Method::Post, "/api/instances/storageResource/res_1/action/modifyFilesystem", 204, Value::Null);
        let fs = filesystems(&rest);

        assert_matches!(
            fs.resize("fs1", "10G", None).await,
            Err(Error::SameSize { kind: ResourceKind::FileSystem, .. })
        );
        assert_matches!(
            fs.resize("fs1", "1G", None).await,
            Err(Error::CannotShrink { kind: ResourceKind::FileSystem, message }) if message.contains("\"10G\"")
        );
        assert_eq!(rest.count(Method::Post, "/api/instances/storageResource"), 0);

        fs.resize("fs1", "11G", None).await.unwrap();
        assert_eq!(rest.count(Method::Post, "/api/instances/storageResource"), 1);
    }

    #[tokio::test]
    async fn test_change_data_reduction_only_when_different() {
        let rest = FakeRest::new();
        rest.on(
            Method::Get,
            "/api/instances/filesystem/name:fs1",
            200,
            json!({ "content": { "storageResource": { "id": "res_1" }, "isDataReductionEnabled": true } }),
        );
        rest.on(Method::Post, "/api/instances/storageResource/res_1/action/modifyFilesystem", 204, Value::Null);
        let fs = filesystems(&rest);

        fs.change_data_reduction("fs1", "true").await.unwrap();
        assert_eq!(rest.count(Method::Post, "/api/instances/storageResource"), 0);
        fs.change_data_reduction("fs1", "false").await.unwrap();
        assert_eq!(rest.count(Method::Post, "/api/instances/storageResource"), 1);
        assert_matches!(fs.change_data_reduction("fs1", "yes").await, Err(Error::Resize { .. }));
    }

    #[tokio::test]
    async fn test_restore_jobs() {
        let rest = FakeRest::new();
        rest.on(Method::Get, "/api/types/job/instances", 200, json!({ "entries": [{ "content": { "id": "N-12" } }] }));
        rest.on(Method::Get, "/api/types/job/instances", 200, json!({ "entries": [] }));
        let fs = filesystems(&rest);

        assert!(fs.is_restore_running("fs1").await.unwrap());
        assert!(!fs.is_restore_running("fs1").await.unwrap());
        fs.online("fs1", false).await.unwrap();
    }
}
