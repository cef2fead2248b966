//! UnityXT REST plumbing
//!
//! [`ReqwestTransport`] speaks HTTPS to the appliance. [`UnityApi`] wraps it
//! with the instance/type/action conventions of the Unity API.

use crate::config::RestConfig;
use crate::domain::ports::{Method, RestResponse, RestTransport, RestTransportRef};
use crate::error::{Error, Result};
use crate::retry::FixedRetries;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const CSRF_HEADER: &str = "EMC-CSRF-TOKEN";
pub(crate) const LOGIN_SESSION: &str = "/api/types/loginSessionInfo/instances";
const LOGOUT: &str = "/api/types/loginSessionInfo/action/logout";

// =============================================================================
// HTTP Transport
// =============================================================================

/// [`RestTransport`] over `reqwest`
///
/// Requests are retried on connection failures only. The CSRF token handed
/// out with the login session is replayed on every later request.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    host: String,
    user: String,
    password: String,
    csrf: Mutex<Option<String>>,
    attempts: u32,
    retry_delay: Duration,
}

impl ReqwestTransport {
    pub fn new(
        host: impl Into<String>,
        port: Option<u16>,
        user: impl Into<String>,
        password: impl Into<String>,
        config: &RestConfig,
    ) -> Result<Self> {
        let host = host.into();
        let mut headers = HeaderMap::new();
        headers.insert("X-EMC-REST-CLIENT", HeaderValue::from_static("true"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.request_timeout())
            .build()?;

        let base_url = match port {
            Some(port) => format!("https://{}:{}", host, port),
            None => format!("https://{}", host),
        };
        Ok(Self {
            client,
            base_url,
            host,
            user: user.into(),
            password: password.into(),
            csrf: Mutex::new(None),
            attempts: config.attempts,
            retry_delay: config.retry_delay(),
        })
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> reqwest::Result<reqwest::Response> {
        let mut request = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        }
        .basic_auth(&self.user, Some(&self.password));

        let csrf = self.csrf.lock().clone();
        if let Some(token) = csrf {
            request = request.header(CSRF_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await
    }
}

#[async_trait]
impl RestTransport for ReqwestTransport {
    async fn request(&self, method: Method, endpoint: &str, body: Option<&Value>) -> Result<RestResponse> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut attempt = 0u32;
        let response = backoff::future::retry_notify(
            FixedRetries::attempts(self.attempts, self.retry_delay),
            || {
                attempt += 1;
                info!("request: attempt {} of {} to {}", attempt, self.attempts, endpoint);
                let url = url.as_str();
                async move {
                    self.send(method, url, body).await.map_err(|e| {
                        if e.is_connect() {
                            backoff::Error::transient(Error::Connection(format!(
                                "request: request attempts exceeded: {}",
                                e
                            )))
                        } else {
                            backoff::Error::permanent(Error::Http(e))
                        }
                    })
                }
            },
            |e: Error, delay: Duration| {
                info!("request: {} endpoint={}, retrying in {:?}", e, endpoint, delay);
            },
        )
        .await?;

        let status = response.status().as_u16();
        let mut headers = IndexMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_lowercase(), value.to_string());
            }
        }
        if let Some(token) = headers.get(&CSRF_HEADER.to_lowercase()) {
            *self.csrf.lock() = Some(token.clone());
        }

        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        Ok(RestResponse { status, body, headers })
    }

    fn host(&self) -> &str {
        &self.host
    }
}

// =============================================================================
// Unity API Conventions
// =============================================================================

/// First message of a Unity error body, `"Unknown error"` otherwise
pub fn response_error(response: &RestResponse) -> String {
    response
        .body
        .pointer("/error/messages/0")
        .and_then(|message| match message {
            Value::Object(map) => map.values().next().and_then(Value::as_str),
            Value::String(text) => Some(text.as_str()),
            _ => None,
        })
        .unwrap_or("Unknown error")
        .to_string()
}

/// Required string field of a JSON document
pub fn text(value: &Value, pointer: &str) -> Result<String> {
    match value.pointer(pointer) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(Error::UnexpectedOutput(format!(
            "The UnityXT response has no \"{}\" field: {}",
            pointer, value
        ))),
    }
}

/// Required integer field of a JSON document
pub fn integer(value: &Value, pointer: &str) -> Result<i64> {
    value.pointer(pointer).and_then(Value::as_i64).ok_or_else(|| {
        Error::UnexpectedOutput(format!(
            "The UnityXT response has no integer \"{}\" field: {}",
            pointer, value
        ))
    })
}

/// Unity object model over a [`RestTransport`]
pub struct UnityApi {
    transport: RestTransportRef,
}

impl UnityApi {
    pub fn new(transport: RestTransportRef) -> Self {
        Self { transport }
    }

    pub fn host(&self) -> &str {
        self.transport.host()
    }

    /// Send a request; changes are logged at info, reads at debug
    pub async fn request(&self, method: Method, endpoint: &str, body: Option<&Value>) -> Result<RestResponse> {
        let logged = body.map(|b| {
            let mut b = b.clone();
            if let Some(map) = b.as_object_mut() {
                map.remove("password");
            }
            b
        });
        let mutating = method != Method::Get;
        if mutating {
            info!("request: endpoint={} method={} data={:?}", endpoint, method, logged);
        } else {
            debug!("request: endpoint={} method={} data={:?}", endpoint, method, logged);
        }

        let response = self.transport.request(method, endpoint, body).await?;
        if mutating {
            info!("request: response status_code {}", response.status);
        } else {
            debug!("request: response status_code {}", response.status);
        }
        debug!("request: content {}", response.body);
        Ok(response)
    }

    /// Open a session; the appliance hands out its CSRF token here
    pub async fn login(&self) -> Result<()> {
        let response = self.request(Method::Get, LOGIN_SESSION, None).await?;
        if response.status == 401 {
            return Err(Error::Connection("Login failed".to_string()));
        }
        if response.status != 200 {
            return Err(Error::Connection(format!(
                "Login to {} failed with http_error={}",
                self.host(),
                response.status
            )));
        }
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.request(Method::Post, LOGOUT, None).await?;
        Ok(())
    }

    /// `content` of every instance of a type
    pub async fn get_instances(&self, typename: &str, fields: &[&str], filter: &[&str]) -> Result<Vec<Value>> {
        let mut query = Vec::new();
        if !filter.is_empty() {
            query.push(format!("filter={}", urlencoding::encode(&filter.join(" and "))));
        }
        if !fields.is_empty() {
            query.push(format!("fields={}", fields.join(",")));
        }
        let mut endpoint = format!("/api/types/{}/instances", typename);
        if !query.is_empty() {
            endpoint = format!("{}?{}", endpoint, query.join("&"));
        }

        let response = self.request(Method::Get, &endpoint, None).await?;
        if response.status != 200 {
            return Err(Error::ExecCommand(format!(
                "Listing of {} failed with http_error={}",
                typename, response.status
            )));
        }
        Ok(response
            .body
            .get("entries")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("content").cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_instance(&self, typename: &str, key: &str, fields: &[&str]) -> Result<Option<Value>> {
        let endpoint = format!("/api/instances/{}/{}?fields={}", typename, key, fields.join(","));
        let response = self.request(Method::Get, &endpoint, None).await?;
        match response.status {
            200 => Ok(response.body.get("content").cloned()),
            404 => Ok(None),
            status => Err(Error::ExecCommand(format!(
                "Search for {}/{} failed with http_error={}",
                typename, key, status
            ))),
        }
    }

    pub async fn get_instance_by_id(&self, typename: &str, id: &str, fields: &[&str]) -> Result<Option<Value>> {
        self.get_instance(typename, id, fields).await
    }

    pub async fn get_instance_by_name(&self, typename: &str, name: &str, fields: &[&str]) -> Result<Option<Value>> {
        self.get_instance(typename, &format!("name:{}", name), fields).await
    }

    pub async fn id_for_name(&self, typename: &str, name: &str) -> Result<Option<String>> {
        match self.get_instance_by_name(typename, name, &["id"]).await? {
            Some(content) => Ok(Some(text(&content, "/id")?)),
            None => Ok(None),
        }
    }

    pub async fn delete_instance(&self, typename: &str, id: &str) -> Result<()> {
        let endpoint = format!("/api/instances/{}/{}", typename, id);
        let response = self.request(Method::Delete, &endpoint, None).await?;
        if response.status != 204 {
            return Err(Error::ExecCommand(format!(
                "Delete of {}/{} failed: {}",
                typename,
                id,
                response_error(&response)
            )));
        }
        Ok(())
    }

    /// POST accepting 200, 201 and 204; returns the response body
    pub async fn post(&self, endpoint: &str, body: Option<&Value>) -> Result<Value> {
        let response = self.request(Method::Post, endpoint, body).await?;
        if !matches!(response.status, 200 | 201 | 204) {
            return Err(Error::ExecCommand(format!(
                "Create using {} failed: {}",
                endpoint,
                response_error(&response)
            )));
        }
        Ok(response.body)
    }

    pub async fn create_instance(&self, typename: &str, body: &Value) -> Result<Value> {
        self.post(&format!("/api/types/{}/instances", typename), Some(body)).await
    }

    /// Run an instance action such as `modifyFilesystem` or `restore`
    pub async fn action(&self, typename: &str, id: &str, action: &str, body: Option<&Value>) -> Result<Value> {
        let endpoint = format!("/api/instances/{}/{}/action/{}", typename, id, action);
        let response = self.request(Method::Post, &endpoint, body).await?;
        if !matches!(response.status, 200 | 204) {
            return Err(Error::ExecCommand(format!(
                "action {} failed for {}/{}: {}",
                action,
                typename,
                id,
                response_error(&response)
            )));
        }
        Ok(response.body)
    }

    /// `{"id": id}` reference used in request bodies
    pub fn reference(id: &str) -> Value {
        json!({ "id": id })
    }
}
