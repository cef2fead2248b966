//! UnityXT NFS shares
//!
//! A Unity NFS share holds one default access level (the `*` client) plus
//! four host lists, one per access level. Each (share, host) pair is listed
//! as its own [`Share`]. Shares are changed through the `modifyFilesystem`
//! action of the owning storage resource.

use super::rest::{text, UnityApi};
use super::UNITY;
use crate::domain::objects::Share;
use crate::domain::options::StringOptions;
use crate::domain::ports::{Resource, ShareResource};
use crate::error::{Error, ResourceKind, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};

/// `defaultAccess` values and the options they stand for
const DEFAULT_ACCESS: [(i64, &str); 4] = [
    (1, "ro"),
    (2, "rw"),
    (3, "no_root_squash,ro"),
    (4, "no_root_squash,rw"),
];

/// Host list attributes and the options they stand for
const HOST_LISTS: [(&str, &str); 4] = [
    ("readOnlyHostsString", "ro"),
    ("readWriteHostsString", "rw"),
    ("readOnlyRootHostsString", "no_root_squash,ro"),
    ("readWriteRootHostsString", "no_root_squash,rw"),
];

const LISTED_SUFFIX: &str = "nordirplus,sync";

fn share_fields() -> Vec<&'static str> {
    let mut fields = vec!["defaultAccess"];
    fields.extend(HOST_LISTS.iter().map(|(attrib, _)| *attrib));
    fields
}

/// Access level an option string maps to: root squashing and read/write only
fn access_level(options: &str) -> String {
    let options: Vec<&str> = options.split(',').map(str::trim).collect();
    let mut level = Vec::new();
    if options.contains(&"no_root_squash") {
        level.push("no_root_squash");
    }
    level.push(if options.contains(&"rw") { "rw" } else { "ro" });
    level.join(",")
}

/// Where a client with the given options goes
#[derive(Debug, PartialEq)]
enum Access {
    Default(i64),
    HostList(&'static str),
}

fn parse_access(client: &str, options: &str) -> Access {
    let level = access_level(options);
    if client == "*" {
        let value = DEFAULT_ACCESS
            .iter()
            .find(|(_, opts)| *opts == level)
            .map(|(value, _)| *value)
            .unwrap_or(1);
        Access::Default(value)
    } else {
        let attrib = HOST_LISTS
            .iter()
            .find(|(_, opts)| *opts == level)
            .map(|(attrib, _)| *attrib)
            .unwrap_or("readOnlyHostsString");
        Access::HostList(attrib)
    }
}

/// Unity stores networks as `network/netmask`, so `10.0.0.7/24` becomes
/// `10.0.0.0/255.255.255.0`
pub(crate) fn normalize_client(client: &str) -> String {
    let Some((address, prefix)) = client.split_once('/') else {
        return client.to_string();
    };
    let (Ok(address), Ok(prefix)) = (address.parse::<Ipv4Addr>(), prefix.parse::<u32>()) else {
        return client.to_string();
    };
    if prefix > 32 {
        return client.to_string();
    }
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let network = Ipv4Addr::from(u32::from(address) & mask);
    format!("{}/{}", network, Ipv4Addr::from(mask))
}

fn host_list<'a>(share: &'a Value, attrib: &str) -> &'a str {
    share.get(attrib).and_then(Value::as_str).unwrap_or("")
}

fn contains_client(list: &str, client: &str) -> bool {
    list.split(',').any(|c| c == client)
}

fn remove_client(list: &str, client: &str) -> String {
    list.split(',')
        .filter(|c| *c != client && !c.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// Current access state of a share: `defaultAccess` and the host lists
fn access_state(share: &Value) -> Map<String, Value> {
    let mut state = Map::new();
    state.insert(
        "defaultAccess".to_string(),
        json!(share.get("defaultAccess").and_then(Value::as_i64).unwrap_or(0)),
    );
    for (attrib, _) in HOST_LISTS {
        state.insert(attrib.to_string(), json!(host_list(share, attrib)));
    }
    state
}

fn without_client(client: &str, from: &Map<String, Value>) -> Map<String, Value> {
    let mut to = from.clone();
    let default = from.get("defaultAccess").and_then(Value::as_i64).unwrap_or(0);
    if client == "*" && default != 0 {
        to.insert("defaultAccess".to_string(), json!(0));
        return to;
    }
    let client = normalize_client(client);
    for (attrib, _) in HOST_LISTS {
        let list = from.get(attrib).and_then(Value::as_str).unwrap_or("");
        to.insert(attrib.to_string(), json!(remove_client(list, &client)));
    }
    to
}

/// Any access left once the change applies
fn still_shared(state: &Map<String, Value>) -> bool {
    state.iter().any(|(attrib, value)| match attrib.as_str() {
        "defaultAccess" => value.as_i64().unwrap_or(0) != 0,
        _ => value.as_str().is_some_and(|v| !v.is_empty()),
    })
}

#[derive(Clone)]
pub struct UnityShares {
    api: Arc<UnityApi>,
}

impl UnityShares {
    pub fn new(api: Arc<UnityApi>) -> Self {
        Self { api }
    }

    fn listed(name: &str, client: &str, options: &str) -> Share {
        Share::new(
            name,
            client,
            StringOptions::parse(&format!("{},{}", options, LISTED_SUFFIX)),
        )
    }

    fn already_exists(path: &str, client: &str) -> Error {
        Error::already_exists(
            ResourceKind::Share,
            format!("Share already exists for {} for client {}", path, client),
        )
    }

    fn create_request(path: &str, client: &str, options: &str) -> Value {
        let mut parameters = json!({
            "isReadOnly": false,
            "defaultAccess": 0,
            "exportOption": 1,
        });
        match parse_access(client, options) {
            Access::Default(value) => parameters["defaultAccess"] = json!(value),
            Access::HostList(attrib) => parameters[attrib] = json!(client),
        }
        json!({
            "nfsShareCreate": [{
                "name": path.trim_matches('/'),
                "path": "/",
                "nfsShareParameters": parameters,
            }]
        })
    }

    async fn modify_request(&self, path: &str, client: &str, options: &str, share_id: &str) -> Result<Value> {
        let fields = share_fields();
        let share = self
            .api
            .get_instance_by_id("nfsShare", share_id, &fields)
            .await?
            .ok_or_else(|| {
                Error::creation(ResourceKind::Share, format!("Cannot find share {} for path {}", share_id, path))
            })?;

        let parameters = match parse_access(client, options) {
            Access::Default(value) => {
                if share.get("defaultAccess").and_then(Value::as_i64).unwrap_or(0) != 0 {
                    return Err(Self::already_exists(path, client));
                }
                json!({ "defaultAccess": value })
            }
            Access::HostList(attrib) => {
                let normalized = normalize_client(client);
                let found = HOST_LISTS
                    .iter()
                    .any(|(list, _)| contains_client(host_list(&share, list), &normalized));
                debug!("UnityShares.modify_request client={} found={}", normalized, found);
                if found {
                    return Err(Self::already_exists(path, client));
                }
                let current = host_list(&share, attrib);
                let hosts = if current.is_empty() {
                    client.to_string()
                } else {
                    format!("{},{}", current, client)
                };
                json!({ attrib: hosts })
            }
        };

        Ok(json!({
            "nfsShareModify": [{
                "nfsShare": UnityApi::reference(share_id),
                "nfsShareParameters": parameters,
            }]
        }))
    }
}

#[async_trait]
impl Resource for UnityShares {
    type Object = Share;

    fn nas_name(&self) -> &str {
        UNITY
    }

    async fn list(&self) -> Result<Vec<Share>> {
        let mut fields = vec!["name"];
        fields.extend(share_fields());
        let entries = self.api.get_instances("nfsShare", &fields, &[]).await?;

        let mut shares = Vec::new();
        for entry in &entries {
            let name = text(entry, "/name")?;
            let default = entry.get("defaultAccess").and_then(Value::as_i64).unwrap_or(0);
            if let Some((_, options)) = DEFAULT_ACCESS.iter().find(|(value, _)| *value == default) {
                shares.push(Self::listed(&name, "*", options));
            }
            for (attrib, options) in HOST_LISTS {
                let hosts = host_list(entry, attrib);
                shares.extend(
                    hosts
                        .split(',')
                        .filter(|c| !c.is_empty())
                        .map(|client| Self::listed(&name, client, options)),
                );
            }
        }
        debug!("unityxt.Share.list: {} shares", shares.len());
        Ok(shares)
    }
}

#[async_trait]
impl ShareResource for UnityShares {
    async fn create(&self, path: &str, client: &str, options: &str) -> Result<Share> {
        info!(
            "unityxt.Share.create path={}, client={}, options={}",
            path, client, options
        );
        let fs_name = path.rsplit('/').next().unwrap_or(path);
        let fs = self
            .api
            .get_instance_by_name("filesystem", fs_name, &["nfsShare", "storageResource"])
            .await?
            .ok_or_else(|| {
                Error::creation(ResourceKind::Share, format!("Cannot find filesystem called {}", fs_name))
            })?;

        let existing = fs.pointer("/nfsShare/0/id").and_then(Value::as_str);
        let request = match existing {
            Some(share_id) => self.modify_request(path, client, options, share_id).await?,
            None => Self::create_request(path, client, options),
        };

        self.api
            .action(
                "storageResource",
                &text(&fs, "/storageResource/id")?,
                "modifyFilesystem",
                Some(&request),
            )
            .await
            .map_err(|e| match e {
                Error::ExecCommand(msg) => Error::creation(ResourceKind::Share, msg),
                e => e,
            })?;
        Ok(Share::new(fs_name, client, StringOptions::parse(options)))
    }

    async fn delete(&self, path: &str, client: &str) -> Result<()> {
        info!("unityxt.Share.delete path={}, client={}", path, client);
        let share_name = path.trim_matches('/');
        let mut fields = vec!["filesystem.storageResource"];
        fields.extend(share_fields());
        let share = self
            .api
            .get_instance_by_name("nfsShare", share_name, &fields)
            .await?
            .ok_or_else(|| {
                Error::does_not_exist(ResourceKind::Share, format!("Cannot find share for path {}", path))
            })?;

        let from = access_state(&share);
        let to = without_client(client, &from);
        if from == to {
            return Err(Error::does_not_exist(
                ResourceKind::Share,
                format!("Cannot find client matching {} for path {}", client, path),
            ));
        }

        let share_id = text(&share, "/id")?;
        let request = if still_shared(&to) {
            let changed: Map<String, Value> = to
                .into_iter()
                .filter(|(attrib, value)| from.get(attrib) != Some(value))
                .collect();
            info!("unityxt.Share.delete keeps share {} with changes {:?}", share_name, changed);
            json!({
                "nfsShareModify": [{
                    "nfsShare": UnityApi::reference(&share_id),
                    "nfsShareParameters": changed,
                }]
            })
        } else {
            info!("unityxt.Share.delete removes share {}, no clients left", share_name);
            json!({ "nfsShareDelete": [{ "nfsShare": UnityApi::reference(&share_id) }] })
        };

        self.api
            .action(
                "storageResource",
                &text(&share, "/filesystem/storageResource/id")?,
                "modifyFilesystem",
                Some(&request),
            )
            .await
            .map_err(|e| match e {
                Error::ExecCommand(msg) => Error::deletion(ResourceKind::Share, msg),
                e => e,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Method;
    use crate::testing::FakeRest;
    use assert_matches::assert_matches;

    const MODIFY: &str = "/api/instances/storageResource/res_1/action/modifyFilesystem";

    fn shares(rest: &Arc<FakeRest>) -> UnityShares {
        UnityShares::new(Arc::new(UnityApi::new(rest.clone())))
    }

    fn last_body(rest: &FakeRest) -> Value {
        rest.requests().pop().and_then(|(_, _, body)| body).unwrap()
    }

    #[test]
    fn test_normalize_client() {
        assert_eq!(normalize_client("10.0.0.7/24"), "10.0.0.0/255.255.255.0");
        assert_eq!(normalize_client("192.168.1.0/255.255.255.0"), "192.168.1.0/255.255.255.0");
        assert_eq!(normalize_client("10.1.2.3"), "10.1.2.3");
        assert_eq!(normalize_client("host.example"), "host.example");
    }

    #[test]
    fn test_parse_access() {
        assert_eq!(parse_access("*", "rw,sync,no_root_squash"), Access::Default(4));
        assert_eq!(parse_access("*", "secure"), Access::Default(1));
        assert_eq!(parse_access("10.0.0.1", "rw,sync"), Access::HostList("readWriteHostsString"));
        assert_eq!(
            parse_access("10.0.0.1", "no_root_squash"),
            Access::HostList("readOnlyRootHostsString")
        );
    }

    #[tokio::test]
    async fn test_list() {
        let rest = FakeRest::new();
        rest.on(
            Method::Get,
            "/api/types/nfsShare/instances",
            200,
            json!({ "entries": [{ "content": {
                "name": "fs1", "defaultAccess": 2,
                "readOnlyHostsString": "", "readWriteHostsString": "10.0.0.1,10.0.0.2",
                "readWriteRootHostsString": "10.0.1.0/255.255.255.0"
            } }] }),
        );
        let list = shares(&rest).list().await.unwrap();
        assert_eq!(list.len(), 4);
        assert_eq!(list[0], Share::new("fs1", "*", StringOptions::parse("rw,nordirplus,sync")));
        assert_eq!(list[2].client, "10.0.0.2");
        assert_eq!(
            list[3],
            Share::new("fs1", "10.0.1.0/255.255.255.0", StringOptions::parse("no_root_squash,rw,nordirplus,sync"))
        );
    }

    #[tokio::test]
    async fn test_create_new_share() {
        let rest = FakeRest::new();
        rest.on(
            Method::Get,
            "/api/instances/filesystem/name:fs1",
            200,
            json!({ "content": { "id": "fs_1", "storageResource": { "id": "res_1" } } }),
        );
        rest.on(Method::Post, MODIFY, 204, Value::Null);

        let share = shares(&rest).create("/fs1", "10.0.0.1", "rw,sync").await.unwrap();
        assert_eq!(share.name, "fs1");
        let body = last_body(&rest);
        let created = &body["nfsShareCreate"][0];
        assert_eq!(created["name"], "fs1");
        assert_eq!(created["nfsShareParameters"]["readWriteHostsString"], "10.0.0.1");
        assert_eq!(created["nfsShareParameters"]["defaultAccess"], 0);
    }

    #[tokio::test]
    async fn test_create_adds_client() {
        let rest = FakeRest::new();
        rest.on(
            Method::Get,
            "/api/instances/filesystem/name:fs1",
            200,
            json!({ "content": { "nfsShare": [{ "id": "NFSShare_1" }], "storageResource": { "id": "res_1" } } }),
        );
        rest.on(
            Method::Get,
            "/api/instances/nfsShare/NFSShare_1",
            200,
            json!({ "content": { "id": "NFSShare_1", "defaultAccess": 1,
                                 "readWriteHostsString": "10.0.0.1,10.0.2.0/255.255.255.0" } }),
        );
        rest.on(Method::Post, MODIFY, 204, Value::Null);
        let shares = shares(&rest);

        shares.create("/fs1", "10.0.0.2", "rw").await.unwrap();
        let body = last_body(&rest);
        assert_eq!(
            body["nfsShareModify"][0]["nfsShareParameters"]["readWriteHostsString"],
            "10.0.0.1,10.0.2.0/255.255.255.0,10.0.0.2"
        );
        assert_eq!(body["nfsShareModify"][0]["nfsShare"]["id"], "NFSShare_1");

        assert_matches!(
            shares.create("/fs1", "10.0.2.9/24", "ro").await,
            Err(Error::AlreadyExists { kind: ResourceKind::Share, .. })
        );
        let err = shares.create("/fs1", "*", "ro").await.unwrap_err();
        assert_eq!(err.to_string(), "Share already exists for /fs1 for client *");
        assert_eq!(rest.count(Method::Post, MODIFY), 1);
    }

    #[tokio::test]
    async fn test_create_without_filesystem() {
        let rest = FakeRest::new();
        rest.on(Method::Get, "/api/instances/filesystem/name:fs9", 404, Value::Null);
        assert_matches!(
            shares(&rest).create("/fs9", "*", "rw").await,
            Err(Error::Creation { kind: ResourceKind::Share, .. })
        );
    }

    fn share_instance(default: i64, rw: &str) -> Value {
        json!({ "content": {
            "id": "NFSShare_1", "filesystem": { "storageResource": { "id": "res_1" } },
            "defaultAccess": default, "readOnlyHostsString": "", "readWriteHostsString": rw,
            "readOnlyRootHostsString": "", "readWriteRootHostsString": ""
        } })
    }

    #[tokio::test]
    async fn test_delete_keeps_share_with_clients() {
        let rest = FakeRest::new();
        rest.on(Method::Get, "/api/instances/nfsShare/name:fs1", 200, share_instance(0, "10.0.0.1,10.0.3.0/255.255.255.0"));
        rest.on(Method::Post, MODIFY, 204, Value::Null);

        shares(&rest).delete("/fs1", "10.0.3.4/24").await.unwrap();
        let body = last_body(&rest);
        let parameters = &body["nfsShareModify"][0]["nfsShareParameters"];
        assert_eq!(parameters, &json!({ "readWriteHostsString": "10.0.0.1" }));
    }

    #[tokio::test]
    async fn test_delete_last_client_removes_share() {
        let rest = FakeRest::new();
        rest.on(Method::Get, "/api/instances/nfsShare/name:fs1", 200, share_instance(2, ""));
        rest.on(Method::Post, MODIFY, 204, Value::Null);
        let shares = shares(&rest);

        shares.delete("/fs1", "*").await.unwrap();
        let body = last_body(&rest);
        assert_eq!(body["nfsShareDelete"][0]["nfsShare"]["id"], "NFSShare_1");

        let err = shares.delete("/fs1", "10.9.9.9").await.unwrap_err();
        assert!(err.is_not_found(ResourceKind::Share));
        assert_eq!(err.to_string(), "Cannot find client matching 10.9.9.9 for path /fs1");
    }
}
