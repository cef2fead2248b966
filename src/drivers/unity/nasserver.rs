//! UnityXT NAS servers
//!
//! Creating a NAS server builds, in order: a fail-safe network (FSN) over
//! the given ports of the home storage processor (SP), the NAS server, its
//! file interface, its NFS server and finally NDMP. Every step reuses an
//! existing object when it matches the request and fails when it does not,
//! so a failed creation can simply be run again.

use super::rest::{text, UnityApi};
use super::UNITY;
use crate::config::RestConfig;
use crate::domain::objects::NasServer;
use crate::domain::ports::{CreateNasServer, NasServerResource, Resource};
use crate::error::{Error, ResourceKind, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const FAILBACK: &str = "/api/instances/system/0/action/failback?timeout=2";

const DETAIL_FIELDS: [&str; 15] = [
    "id",
    "name",
    "health",
    "homeSP",
    "currentSP",
    "pool.name",
    "sizeAllocated",
    "fileSpaceUsed",
    "fileInterface.ipPort",
    "fileInterface.ipAddress",
    "fileInterface.netmask",
    "fileInterface.gateway",
    "filesystems",
    "nfsServer.nfsv3Enabled",
    "nfsServer.nfsv4Enabled",
];

fn creation(message: impl Into<String>) -> Error {
    Error::creation(ResourceKind::NasServer, message)
}

fn does_not_exist(message: impl Into<String>) -> Error {
    Error::does_not_exist(ResourceKind::NasServer, message)
}

/// Interface addressing of a new NAS server, from `"sp,ip,netmask,gateway"`
#[derive(Debug, Clone, PartialEq)]
struct Network {
    sp: String,
    ip: String,
    netmask: String,
    gateway: String,
}

impl Network {
    fn parse(network: &str) -> Result<Self> {
        match network.split(',').collect::<Vec<_>>().as_slice() {
            [sp, ip, netmask, gateway] => Ok(Self {
                sp: sp.to_string(),
                ip: ip.to_string(),
                netmask: netmask.to_string(),
                gateway: gateway.to_string(),
            }),
            _ => Err(creation(format!(
                "Missing network parameter entries. Required: \"sp,ip,netmask,gateway\" Supplied: {}",
                network
            ))),
        }
    }
}

/// NFSv3 / NFSv4 switches
#[derive(Debug, Clone, Copy, PartialEq)]
struct NfsProtocols {
    v3: bool,
    v4: bool,
}

impl NfsProtocols {
    /// Unknown protocols fail when `strict`, and are ignored otherwise
    fn parse(protocols: &str, strict: bool) -> Result<Self> {
        let mut parsed = Self { v3: false, v4: false };
        for protocol in protocols.split(',') {
            match protocol {
                "nfsv3" => parsed.v3 = true,
                "nfsv4" => parsed.v4 = true,
                other if strict => return Err(creation(format!("Protocol {} not supported", other))),
                _ => {}
            }
        }
        Ok(parsed)
    }

    fn of(nfs: &Value) -> Self {
        Self {
            v3: nfs.get("nfsv3Enabled").and_then(Value::as_bool).unwrap_or(false),
            v4: nfs.get("nfsv4Enabled").and_then(Value::as_bool).unwrap_or(false),
        }
    }
}

fn port_id(sp: &str, port: &str) -> String {
    format!("{}_ocp_0_eth{}", sp.to_lowercase(), port)
}

fn id_at(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn secondary_ids(fsn: &Value) -> HashSet<String> {
    fsn.get("secondaryPorts")
        .and_then(Value::as_array)
        .map(|ports| ports.iter().filter_map(|p| id_at(p, "/id")).collect())
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct UnityNasServers {
    api: Arc<UnityApi>,
    failback_checks: u32,
    failback_interval: Duration,
}

impl UnityNasServers {
    pub fn new(api: Arc<UnityApi>, config: &RestConfig) -> Self {
        Self {
            api,
            failback_checks: config.failback_checks,
            failback_interval: config.failback_interval(),
        }
    }

    // =========================================================================
    // Fail-safe network
    // =========================================================================

    async fn validate_ports(&self, sp: &str, ports: &str) -> Result<()> {
        for port in ports.split(',') {
            if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
                return Err(creation(format!("Port {} is not numeric", port)));
            }
            let id = port_id(sp, port);
            let instance = self
                .api
                .get_instance_by_id("ipPort", &id, &["isLinkUp"])
                .await?
                .ok_or_else(|| does_not_exist(format!("Cannot find port called {}", id)))?;
            if instance.get("isLinkUp").and_then(Value::as_bool) != Some(true) {
                return Err(creation(format!("Port {} is not in \"Up\" state", id)));
            }
        }
        Ok(())
    }

    async fn check_ports_free(&self, sp: &str, ports: &[String]) -> Result<()> {
        let fsns = self
            .api
            .get_instances("fsnPort", &["id", "primaryPort", "secondaryPorts", "storageProcessor"], &[])
            .await?;
        for fsn in fsns.iter().filter(|f| id_at(f, "/storageProcessor/id").as_deref() == Some(sp)) {
            let fsn_id = id_at(fsn, "/id").unwrap_or_default();
            let used = id_at(fsn, "/primaryPort/id").into_iter().chain(secondary_ids(fsn));
            for port in used {
                if ports.contains(&port) {
                    return Err(creation(format!("Port {} is already in FSN {}", port, fsn_id)));
                }
            }
        }
        Ok(())
    }

    /// FSN over `ports`, the first one primary; an existing one is reused
    /// when its ports match
    async fn create_fsn(&self, sp: &str, ports: &str) -> Result<String> {
        info!("unityxt.NS.FSN.create sp={}, ports={}", sp, ports);
        self.validate_ports(sp, ports).await?;

        let port_ids: Vec<String> = ports.split(',').map(|p| port_id(sp, p)).collect();
        let first = ports.split(',').next().unwrap_or_default();
        let fsn_id = format!("{}_fsn_ocp_0_{}", sp, first);
        let primary = &port_ids[0];
        let secondary: HashSet<String> = port_ids[1..].iter().cloned().collect();

        let existing = self
            .api
            .get_instance_by_id("fsnPort", &fsn_id, &["id", "primaryPort", "secondaryPorts"])
            .await?;
        if let Some(fsn) = existing {
            info!("unityxt.NS.FSN.create FSN {} already exists", fsn_id);
            if id_at(&fsn, "/primaryPort/id").as_ref() != Some(primary) || secondary_ids(&fsn) != secondary {
                return Err(creation(format!("FSN {} exists but ports are incorrect", fsn_id)));
            }
            debug!("unityxt.NS.FSN.create Skipping creation of FSN {}", fsn_id);
            return Ok(fsn_id);
        }
        self.check_ports_free(sp, &port_ids).await?;

        let body = json!({
            "primaryPort": UnityApi::reference(primary),
            "secondaryPorts": port_ids[1..].iter().map(|id| UnityApi::reference(id)).collect::<Vec<_>>(),
        });
        let response = self.api.create_instance("fsnPort", &body).await?;
        let fsn_id = text(&response, "/content/id")?;
        debug!("unityxt.NS.FSN.create: fsn_id={}", fsn_id);
        Ok(fsn_id)
    }

    // =========================================================================
    // NAS server services
    // =========================================================================

    async fn create_file_interface(&self, ns: &str, fsn: &str, network: &Network) -> Result<String> {
        info!(
            "unityxt.NS.FI.create ns={}, fsn={}, ip={}, netmask={}, gateway={}",
            ns, fsn, network.ip, network.netmask, network.gateway
        );
        let interfaces = self
            .api
            .get_instances(
                "fileInterface",
                &["id", "nasServer", "ipPort", "ipAddress", "netmask", "gateway"],
                &[],
            )
            .await?;
        for fi in &interfaces {
            let fi_id = id_at(fi, "/id").unwrap_or_default();
            let port = id_at(fi, "/ipPort/id");
            let ip = id_at(fi, "/ipAddress");
            let owner = id_at(fi, "/nasServer/id").unwrap_or_default();
            if owner == ns {
                info!("unityxt.NS.FI.create File interface {} already exists", fi_id);
                let matches = port.as_deref() == Some(fsn)
                    && ip.as_deref() == Some(network.ip.as_str())
                    && id_at(fi, "/netmask").as_deref() == Some(network.netmask.as_str())
                    && id_at(fi, "/gateway").as_deref() == Some(network.gateway.as_str());
                if !matches {
                    return Err(creation(format!(
                        "File interface {} already exists but attributes do not match requested",
                        fi_id
                    )));
                }
                return Ok(fi_id);
            }
            if port.as_deref() == Some(fsn) || ip.as_deref() == Some(network.ip.as_str()) {
                return Err(creation(format!(
                    "File interface {} using FSN {} and/or IP {} already exists but is assigned to NAS server {}",
                    fi_id, fsn, network.ip, owner
                )));
            }
        }

        let body = json!({
            "nasServer": UnityApi::reference(ns),
            "ipPort": UnityApi::reference(fsn),
            "ipAddress": network.ip,
            "netmask": network.netmask,
            "gateway": network.gateway,
        });
        let response = self.api.create_instance("fileInterface", &body).await?;
        let fi_id = text(&response, "/content/id")?;
        debug!("unityxt.NS.FI.create: fi_id={}", fi_id);
        Ok(fi_id)
    }

    async fn nfs_servers(&self) -> Result<Vec<Value>> {
        self.api
            .get_instances("nfsServer", &["id", "nasServer", "nfsv3Enabled", "nfsv4Enabled"], &[])
            .await
    }

    async fn create_nfs_server(&self, ns: &str, protocols: &str) -> Result<String> {
        info!("unityxt.NS.NFS.create ns={}, protocols={}", ns, protocols);
        let wanted = NfsProtocols::parse(protocols, true)?;

        let servers = self.nfs_servers().await?;
        if let Some(nfs) = servers.iter().find(|n| id_at(n, "/nasServer/id").as_deref() == Some(ns)) {
            let nfs_id = text(nfs, "/id")?;
            info!("unityxt.NS.NFS.create NFS {} already enabled", nfs_id);
            if NfsProtocols::of(nfs) != wanted {
                return Err(creation(format!(
                    "Error NFS {} already enabled but protocols do not match requested",
                    nfs_id
                )));
            }
            return Ok(nfs_id);
        }

        let body = json!({
            "nasServer": UnityApi::reference(ns),
            "nfsv3Enabled": wanted.v3,
            "nfsv4Enabled": wanted.v4,
        });
        let response = self.api.create_instance("nfsServer", &body).await?;
        let nfs_id = text(&response, "/content/id")?;
        debug!("unityxt.NS.NFS.create: nfs_id={}", nfs_id);
        Ok(nfs_id)
    }

    /// Enables NDMP, or resets its password when already enabled
    async fn create_ndmp_server(&self, ns: &str, password: &str) -> Result<String> {
        info!("unityxt.NS.NDMP.create ns={}", ns);
        let servers = self
            .api
            .get_instances("fileNDMPServer", &["id", "nasServer", "username"], &[])
            .await?;
        if let Some(ndmp) = servers.iter().find(|n| id_at(n, "/nasServer/id").as_deref() == Some(ns)) {
            let ndmp_id = text(ndmp, "/id")?;
            info!("unityxt.NS.NDMP.create NDMP {} already enabled, setting its password", ndmp_id);
            self.api
                .action("fileNDMPServer", &ndmp_id, "modify", Some(&json!({ "password": password })))
                .await?;
            return Ok(ndmp_id);
        }

        let body = json!({ "nasServer": UnityApi::reference(ns), "password": password });
        let response = self.api.create_instance("fileNDMPServer", &body).await?;
        let ndmp_id = text(&response, "/content/id")?;
        debug!("unityxt.NS.NDMP.create: ndmp_id={}", ndmp_id);
        Ok(ndmp_id)
    }

    // =========================================================================
    // SP failback
    // =========================================================================

    /// Whether the NAS server runs on its home SP, checked up to `checks`
    /// times
    async fn runs_on_home_sp(&self, name: &str, checks: u32) -> Result<bool> {
        for check in 1..=checks {
            let sp = self
                .api
                .get_instance_by_name("nasServer", name, &["currentSP", "homeSP"])
                .await?
                .ok_or_else(|| does_not_exist(format!("Cannot find NAS Server called {}", name)))?;
            let current = sp.get("currentSP");
            let home = sp.get("homeSP");
            if current == home {
                info!("unityXT.NS.failback: SP is correct for server {}", name);
                return Ok(true);
            }
            info!(
                "unityXT.NS.failback: SP incorrect for server {}, running on {} instead of {}",
                name,
                current.cloned().unwrap_or_default(),
                home.cloned().unwrap_or_default()
            );
            if check < checks {
                info!(
                    "unityXT.NS.failback: Pause for {:?} to check failback",
                    self.failback_interval
                );
                tokio::time::sleep(self.failback_interval).await;
            }
        }
        Ok(false)
    }

    async fn ensure_home_sp(&self, name: &str) -> Result<()> {
        if self.runs_on_home_sp(name, 1).await? {
            return Ok(());
        }
        info!("unityxt.NS.create: NAS Server {} running on incorrect SP", name);
        let response = self.api.post(FAILBACK, None).await?;
        debug!("unityxt.NS.failback response is {}", response);
        if !self.runs_on_home_sp(name, self.failback_checks).await? {
            return Err(creation(format!("Unable to failback NAS Server {}", name)));
        }
        Ok(())
    }
}

#[async_trait]
impl Resource for UnityNasServers {
    type Object = NasServer;

    fn nas_name(&self) -> &str {
        UNITY
    }

    async fn list(&self) -> Result<Vec<NasServer>> {
        let entries = self
            .api
            .get_instances("nasServer", &["name", "pool.name", "homeSP.id"], &[])
            .await?;
        entries
            .iter()
            .map(|entry| {
                Ok(NasServer::new(
                    text(entry, "/name")?,
                    text(entry, "/pool/name")?,
                    text(entry, "/homeSP/id")?,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl NasServerResource for UnityNasServers {
    async fn create(&self, request: &CreateNasServer) -> Result<NasServer> {
        let network = Network::parse(&request.network)?;
        info!(
            "unityxt.NS.create name={}, pool={}, sp={}, ports={}, ip={}, netmask={}, gateway={}, protocols={}",
            request.name,
            request.pool,
            network.sp,
            request.ports,
            network.ip,
            network.netmask,
            network.gateway,
            request.protocols
        );

        let fsn = self.create_fsn(&network.sp, &request.ports).await?;

        let pool_id = self.api.id_for_name("pool", &request.pool).await?.ok_or_else(|| {
            Error::does_not_exist(ResourceKind::Pool, format!("Cannot find pool called {}", request.pool))
        })?;
        if self
            .api
            .get_instance_by_id("storageProcessor", &network.sp, &[])
            .await?
            .is_none()
        {
            return Err(does_not_exist(format!("Cannot find SP called {}", network.sp)));
        }

        let servers = self
            .api
            .get_instances("nasServer", &["id", "pool", "homeSP", "name"], &[])
            .await?;
        let existing = servers
            .iter()
            .find(|ns| id_at(ns, "/name").as_deref() == Some(request.name.as_str()));
        let ns_id = match existing {
            Some(ns) => {
                let home = id_at(ns, "/homeSP/id").unwrap_or_default();
                if home != network.sp {
                    return Err(creation(format!("NAS server exists on incorrect SP {}", home)));
                }
                let pool = id_at(ns, "/pool/id").unwrap_or_default();
                if pool != pool_id {
                    return Err(creation(format!("NAS server exists on incorrect pool {}", pool)));
                }
                info!("unityxt.NS.create NAS server already exists, skipping creation");
                text(ns, "/id")?
            }
            None => {
                let body = json!({
                    "name": request.name,
                    "pool": UnityApi::reference(&pool_id),
                    "homeSP": UnityApi::reference(&network.sp),
                });
                let response = self.api.create_instance("nasServer", &body).await?;
                let id = text(&response, "/content/id")?;
                debug!("unityxt.NS.create: ns_id={}", id);
                id
            }
        };

        self.create_file_interface(&ns_id, &fsn, &network).await?;
        self.create_nfs_server(&ns_id, &request.protocols).await?;
        self.ensure_home_sp(&request.name).await?;
        self.create_ndmp_server(&ns_id, &request.ndmp_password).await?;

        Ok(NasServer::new(request.name.as_str(), request.pool.as_str(), network.sp))
    }

    /// Missing NAS servers are skipped; the FSN of the interface goes too
    async fn delete(&self, name: &str) -> Result<()> {
        info!("unityxt.NS.delete name={}", name);
        let Some(ns) = self
            .api
            .get_instance_by_name("nasServer", name, &["id", "fileInterface.ipPort"])
            .await?
        else {
            info!("unityxt.NS.delete NAS server {} does not exist, skipping deletion", name);
            return Ok(());
        };

        let fsn = id_at(&ns, "/fileInterface/0/ipPort/id");
        self.api.delete_instance("nasServer", &text(&ns, "/id")?).await?;
        debug!("unityxt.NS.delete completed for {}", name);

        if let Some(fsn) = fsn.filter(|id| id.contains("fsn")) {
            info!("unityxt.NS.FSN.delete fsn_id={}", fsn);
            self.api.delete_instance("fsnPort", &fsn).await?;
        }
        Ok(())
    }

    async fn details(&self, name: &str) -> Result<Value> {
        self.api
            .get_instance_by_name("nasServer", name, &DETAIL_FIELDS)
            .await?
            .ok_or_else(|| does_not_exist(format!("Cannot find NAS Server called {}", name)))
    }

    async fn change_sharing_protocol(&self, protocols: &str) -> Result<()> {
        info!("unityxt.NS.NFS.modify protocols={}", protocols);
        let wanted = NfsProtocols::parse(protocols, false)?;
        for nfs in self.nfs_servers().await? {
            if NfsProtocols::of(&nfs) == wanted {
                continue;
            }
            let nfs_id = text(&nfs, "/id")?;
            info!(
                "unityxt.NS.NFS.modify ns={}, protocols={}",
                id_at(&nfs, "/nasServer/id").unwrap_or_default(),
                protocols
            );
            let body = json!({ "nfsv3Enabled": wanted.v3, "nfsv4Enabled": wanted.v4 });
            self.api.action("nfsServer", &nfs_id, "modify", Some(&body)).await?;
        }
        Ok(())
    }
}
