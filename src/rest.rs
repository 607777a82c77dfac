use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use colored::Colorize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use crate::config::RestConfig;
use crate::error::{Result, ToolkitError};

/* ============================= WIRE TYPES ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct RestResponse {
    pub status: u16,
    pub reason: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl RestResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parsed JSON body; an empty body reads as `null`.
    pub fn json(&self) -> Result<Value> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The HTTP layer the REST client is built on.
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn send(&self, request: &RestRequest) -> Result<RestResponse>;

    /// Stream the response body into `dir`, naming the file from
    /// `Content-Disposition` when present.
    async fn download(&self, request: &RestRequest, dir: &Path) -> Result<(RestResponse, PathBuf)>;
}

/* ============================= MEDIA TYPES ============================= */

/// Per-kind content type `application/astra-{kind}+json` and body version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaType {
    pub kind: &'static str,
    pub version: &'static str,
}

impl MediaType {
    pub const fn new(kind: &'static str, version: &'static str) -> Self {
        Self { kind, version }
    }

    pub fn content_type(&self) -> String {
        format!("application/astra-{}+json", self.kind)
    }

    /// The `type` string carried inside request bodies.
    pub fn type_name(&self) -> String {
        format!("application/astra-{}", self.kind)
    }

    /// Insert `type` and `version` into an object body.
    pub fn stamp(&self, mut body: Value) -> Value {
        if let Some(map) = body.as_object_mut() {
            map.insert("type".into(), Value::String(self.type_name()));
            map.insert("version".into(), Value::String(self.version.to_string()));
        }
        body
    }
}

pub mod media {
    use super::MediaType;

    pub const APP: MediaType = MediaType::new("app", "2.0");
    pub const APP_MANAGE: MediaType = MediaType::new("app", "2.1");
    pub const APP_BACKUP: MediaType = MediaType::new("appBackup", "1.1");
    pub const APP_SNAP: MediaType = MediaType::new("appSnap", "1.1");
    pub const APP_MIRROR: MediaType = MediaType::new("appMirror", "1.0");
    pub const ASUP: MediaType = MediaType::new("asup", "1.0");
    pub const BUCKET: MediaType = MediaType::new("bucket", "1.1");
    pub const CLOUD: MediaType = MediaType::new("cloud", "1.0");
    pub const CLUSTER: MediaType = MediaType::new("cluster", "1.1");
    pub const CREDENTIAL: MediaType = MediaType::new("credential", "1.1");
    pub const EXECUTION_HOOK: MediaType = MediaType::new("executionHook", "1.2");
    pub const GROUP: MediaType = MediaType::new("group", "1.1");
    pub const HOOK_SOURCE: MediaType = MediaType::new("hookSource", "1.0");
    pub const MANAGED_CLUSTER: MediaType = MediaType::new("managedCluster", "1.2");
    pub const ROLE_BINDING: MediaType = MediaType::new("roleBinding", "1.1");
    pub const SCHEDULE: MediaType = MediaType::new("schedule", "1.2");
    pub const SETTING: MediaType = MediaType::new("setting", "1.1");
    pub const USER: MediaType = MediaType::new("user", "1.2");
}

/// Endpoint paths, relative to the account base URL.
pub mod endpoints {
    pub const CLOUDS: &str = "topology/v1/clouds";
    pub const MANAGED_CLUSTERS: &str = "topology/v1/managedClusters";
    pub const BUCKETS: &str = "topology/v1/buckets";
    pub const STORAGE_BACKENDS: &str = "topology/v1/storageBackends";
    pub const NAMESPACES: &str = "topology/v1/namespaces";
    pub const APPS: &str = "k8s/v2/apps";
    pub const APP_MIRRORS: &str = "k8s/v1/appMirrors";
    pub const USERS: &str = "core/v1/users";
    pub const LDAP_USERS: &str = "core/v1/ldapUsers";
    pub const GROUPS: &str = "core/v1/groups";
    pub const LDAP_GROUPS: &str = "core/v1/ldapGroups";
    pub const ROLE_BINDINGS: &str = "core/v1/roleBindings";
    pub const CREDENTIALS: &str = "core/v1/credentials";
    pub const HOOK_SOURCES: &str = "core/v1/hookSources";
    pub const EXECUTION_HOOKS: &str = "core/v1/executionHooks";
    pub const NOTIFICATIONS: &str = "core/v1/notifications";
    pub const SETTINGS: &str = "core/v1/settings";
    pub const ASUPS: &str = "core/v1/asups";

    pub fn cloud_clusters(cloud_id: &str) -> String {
        format!("{CLOUDS}/{cloud_id}/clusters")
    }

    pub fn cloud_cluster(cloud_id: &str, cluster_id: &str) -> String {
        format!("{CLOUDS}/{cloud_id}/clusters/{cluster_id}")
    }

    pub fn storage_classes(cloud_id: &str, cluster_id: &str) -> String {
        format!("{CLOUDS}/{cloud_id}/clusters/{cluster_id}/storageClasses")
    }

    pub fn cluster_namespaces(cluster_id: &str) -> String {
        format!("topology/v1/clusters/{cluster_id}/namespaces")
    }

    pub fn cluster_api_resources(cluster_id: &str) -> String {
        format!("{MANAGED_CLUSTERS}/{cluster_id}/apiResources")
    }

    pub fn app(app_id: &str) -> String {
        format!("{APPS}/{app_id}")
    }

    /// `k8s/v1/apps/{id}/{child}` for backups, snapshots, schedules, hooks, assets.
    pub fn app_child(app_id: &str, child: &str) -> String {
        format!("k8s/v1/apps/{app_id}/{child}")
    }
}

/* ============================= CLIENT ============================= */

const AUTH_UID_MARKER: &str = "x-pcloud-accountid";

/// REST surface bound to one account.
///
/// Headers are fixed at construction and extended per call; nothing is
/// mutated between calls.
#[derive(Clone)]
pub struct RestClient {
    transport: Arc<dyn RestTransport>,
    base: String,
    account_id: String,
    headers: BTreeMap<String, String>,
    verbose: bool,
    quiet: bool,
}

impl RestClient {
    pub fn new(config: &RestConfig, transport: Arc<dyn RestTransport>) -> Self {
        Self {
            transport,
            base: config.base.clone(),
            account_id: config.account_id.clone(),
            headers: config.headers.clone(),
            verbose: false,
            quiet: false,
        }
    }

    pub fn with_flags(mut self, verbose: bool, quiet: bool) -> Self {
        self.verbose = verbose;
        self.quiet = quiet;
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base, endpoint.trim_start_matches('/'))
    }

    fn request(
        &self,
        method: Method,
        endpoint: &str,
        media: Option<&MediaType>,
        params: &[(String, String)],
        body: Option<Value>,
    ) -> RestRequest {
        let mut headers = self.headers.clone();
        let content_type = media
            .map(MediaType::content_type)
            .unwrap_or_else(|| "application/json".to_string());
        headers.insert("accept".into(), content_type.clone());
        if body.is_some() {
            headers.insert("content-type".into(), content_type);
        }
        RestRequest {
            method,
            url: self.url(endpoint),
            headers,
            params: params.to_vec(),
            body,
        }
    }

    /// Issue one call; non-2xx responses become typed errors.
    pub async fn call(
        &self,
        method: Method,
        endpoint: &str,
        media: Option<&MediaType>,
        params: &[(String, String)],
        body: Option<Value>,
    ) -> Result<RestResponse> {
        let request = self.request(method, endpoint, media, params, body);
        if self.verbose {
            print_verbose(&request);
        }
        debug!(method = %request.method, url = %request.url, "rest_request");
        let response = self.transport.send(&request).await?;
        debug!(status = response.status, url = %request.url, "rest_response");
        if response.is_success() {
            Ok(response)
        } else {
            Err(self.failure(&request, response).await)
        }
    }

    async fn failure(&self, request: &RestRequest, response: RestResponse) -> ToolkitError {
        let probe = if self.quiet {
            None
        } else {
            let probe_req = self.request(Method::Get, endpoints::CLOUDS, None, &[], None);
            match self.transport.send(&probe_req).await {
                Ok(r) => Some((r.status, r.text())),
                Err(e) => {
                    debug!(error = %e, "rest_probe_failed");
                    None
                }
            }
        };
        let err = classify_failure(response.status, &response.reason, &response.text(), probe);
        if !self.quiet {
            eprintln!(
                "{}",
                format!("{} {} failed: {err}", request.method, request.url).red()
            );
        }
        error!(
            method = %request.method,
            url = %request.url,
            status = response.status,
            "rest_failure"
        );
        err
    }

    pub async fn get(&self, endpoint: &str, params: &[(String, String)]) -> Result<Value> {
        self.call(Method::Get, endpoint, None, params, None)
            .await?
            .json()
    }

    /// GET a collection, following `metadata.continue` until exhausted.
    pub async fn list(&self, endpoint: &str, params: &[(String, String)]) -> Result<Value> {
        let mut page = self.get(endpoint, params).await?;
        let mut token = continue_token(&page);
        while let Some(cont) = token {
            if self.verbose {
                eprintln!("{}", format!("continue: {cont}").yellow());
            }
            let mut next_params = params.to_vec();
            next_params.push(("continue".into(), cont));
            let next = self.get(endpoint, &next_params).await?;
            token = continue_token(&next);
            let extra = next
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if let Some(items) = page.get_mut("items").and_then(Value::as_array_mut) {
                items.extend(extra);
            }
        }
        if let Some(meta) = page.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("continue");
        }
        Ok(page)
    }

    pub async fn post(&self, endpoint: &str, media: &MediaType, body: Value) -> Result<Value> {
        let body = media.stamp(body);
        self.call(Method::Post, endpoint, Some(media), &[], Some(body))
            .await?
            .json()
    }

    pub async fn put(&self, endpoint: &str, media: &MediaType, body: Value) -> Result<Value> {
        self.put_with_headers(endpoint, media, body, &[]).await
    }

    /// PUT with extra per-call headers (for example `ForceUpdate`).
    pub async fn put_with_headers(
        &self,
        endpoint: &str,
        media: &MediaType,
        body: Value,
        extra: &[(&str, &str)],
    ) -> Result<Value> {
        let mut request = self.request(
            Method::Put,
            endpoint,
            Some(media),
            &[],
            Some(media.stamp(body)),
        );
        for (k, v) in extra {
            request.headers.insert((*k).to_string(), (*v).to_string());
        }
        if self.verbose {
            print_verbose(&request);
        }
        let response = self.transport.send(&request).await?;
        if response.is_success() {
            response.json()
        } else {
            Err(self.failure(&request, response).await)
        }
    }

    pub async fn delete(&self, endpoint: &str, media: Option<&MediaType>) -> Result<()> {
        self.call(Method::Delete, endpoint, media, &[], None).await?;
        Ok(())
    }

    /// Stream a binary download (ASUP bundles) into `dir`.
    pub async fn download_file(
        &self,
        endpoint: &str,
        accept: &str,
        dir: &Path,
    ) -> Result<(RestResponse, PathBuf)> {
        let mut request = self.request(Method::Get, endpoint, None, &[], None);
        request.headers.insert("accept".into(), accept.to_string());
        if self.verbose {
            print_verbose(&request);
        }
        let (response, path) = self.transport.download(&request, dir).await?;
        if !response.is_success() {
            return Err(self.failure(&request, response).await);
        }
        info!(path = %path.display(), "download_complete");
        Ok((response, path))
    }
}

fn continue_token(page: &Value) -> Option<String> {
    page.pointer("/metadata/continue")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Map a failed response (and the optional clouds probe) to an error.
pub fn classify_failure(
    status: u16,
    reason: &str,
    body: &str,
    probe: Option<(u16, String)>,
) -> ToolkitError {
    let message = format!("{status} {reason}");
    let probe_body = probe.as_ref().map(|(_, b)| b.as_str()).unwrap_or_default();
    let probe_status = probe.as_ref().map(|(s, _)| *s);

    if body.contains(AUTH_UID_MARKER) || probe_body.contains(AUTH_UID_MARKER) {
        return ToolkitError::AuthRejected {
            message,
            hint: "the account id was rejected, check 'uid' in config.yaml".into(),
        };
    }
    if status == 401 || probe_status == Some(401) {
        return ToolkitError::AuthRejected {
            message,
            hint: "the token was rejected, check 'Authorization' under 'headers' in config.yaml"
                .into(),
        };
    }
    if status >= 500 {
        return ToolkitError::RemoteFailure {
            status,
            reason: "Internal Server Error".into(),
            body: body.to_string(),
        };
    }
    ToolkitError::RemoteFailure {
        status,
        reason: reason.to_string(),
        body: body.to_string(),
    }
}

fn print_verbose(request: &RestRequest) {
    let headers: BTreeMap<&str, String> = request
        .headers
        .iter()
        .map(|(k, v)| {
            let shown = if k.eq_ignore_ascii_case("authorization") {
                redact(v)
            } else {
                v.clone()
            };
            (k.as_str(), shown)
        })
        .collect();
    let body = request
        .body
        .as_ref()
        .map(Value::to_string)
        .unwrap_or_else(|| "{}".into());
    eprintln!("{}", format!("API URL: {}", request.url).green());
    eprintln!("{}", format!("API Method: {}", request.method).green());
    eprintln!("{}", format!("API Headers: {headers:?}").green());
    eprintln!("{}", format!("API data: {body}").green());
    eprintln!("{}", format!("API params: {:?}", request.params).green());
}

fn redact(value: &str) -> String {
    let Some((scheme, token)) = value.split_once(' ') else {
        return "***".to_string();
    };
    match token.char_indices().rev().nth(3) {
        Some((start, _)) if start > 0 => format!("{scheme} ...{}", &token[start..]),
        _ => "***".to_string(),
    }
}

/// `attachment; filename="asup.tar.gz"` → `asup.tar.gz`.
pub fn filename_from_disposition(header: Option<&str>) -> Option<String> {
    let header = header?;
    header.split(';').map(str::trim).find_map(|part| {
        part.strip_prefix("filename=")
            .map(|f| f.trim_matches('"').to_string())
            .filter(|f| !f.is_empty() && !f.contains('/'))
    })
}

/* ============================= REQWEST TRANSPORT ============================= */

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(verify_ssl: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_ssl)
            .build()?;
        Ok(Self { client })
    }

    fn builder(&self, request: &RestRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url);
        for (k, v) in &request.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }

    fn head(response: &reqwest::Response) -> RestResponse {
        RestResponse {
            status: response.status().as_u16(),
            reason: response
                .status()
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
            headers: response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect(),
            body: Vec::new(),
        }
    }
}

#[async_trait]
impl RestTransport for ReqwestTransport {
    async fn send(&self, request: &RestRequest) -> Result<RestResponse> {
        let response = self.builder(request).send().await?;
        let mut out = Self::head(&response);
        out.body = response.bytes().await?.to_vec();
        Ok(out)
    }

    async fn download(&self, request: &RestRequest, dir: &Path) -> Result<(RestResponse, PathBuf)> {
        let mut response = self.builder(request).send().await?;
        let mut out = Self::head(&response);
        if !response.status().is_success() {
            out.body = response.bytes().await?.to_vec();
            return Ok((out, PathBuf::new()));
        }
        let name = filename_from_disposition(out.header("content-disposition"))
            .unwrap_or_else(|| "download.bin".to_string());
        let path = dir.join(name);
        let mut file = tokio::fs::File::create(&path).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok((out, path))
    }
}

/* ============================= TESTS ============================= */
