use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use actoolkit::config::{KubeTarget, RestConfig};
use actoolkit::error::{Result, ToolkitError};
use actoolkit::external::{ExternalTools, HelmRelease};
use actoolkit::kube_client::{DryRun, Gvr, KubeApi, KubeClient, KubeConnector};
use actoolkit::output::Output;
use actoolkit::rest::{Method, RestClient, RestRequest, RestResponse, RestTransport};
use actoolkit::session::{Session, SessionOptions};
use actoolkit::surface::Surface;

pub const ACCOUNT: &str = "acct-1";

/// A config pointing at a host nothing listens on; requests never leave
/// the fake transport.
#[allow(dead_code)]
pub fn rest_config() -> RestConfig {
    RestConfig::from_yaml(
        &format!(
            "astra_project: test\nuid: {ACCOUNT}\nheaders:\n  Authorization: Bearer tok\n"
        ),
        "test",
    )
    .unwrap()
}

/// Shared clock so calls recorded by different fakes can be ordered.
static CLOCK: AtomicU64 = AtomicU64::new(0);

fn tick() -> u64 {
    CLOCK.fetch_add(1, Ordering::SeqCst)
}

/* ============================= FAKE REST ============================= */

struct Route {
    method: Method,
    endpoint: String,
    /// Served in order; the last response repeats.
    responses: VecDeque<(u16, Value)>,
}

/// Scripted REST transport that records every request it receives.
#[derive(Default)]
pub struct FakeRest {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<RestRequest>>,
    ticks: Mutex<Vec<u64>>,
}

#[allow(dead_code)]
impl FakeRest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer `method endpoint` (relative to the account base) with the
    /// given responses in turn.
    pub fn route(&self, method: Method, endpoint: &str, responses: Vec<(u16, Value)>) {
        self.routes.lock().unwrap().push(Route {
            method,
            endpoint: endpoint.to_string(),
            responses: responses.into(),
        });
    }

    pub fn ok(&self, method: Method, endpoint: &str, body: Value) {
        self.route(method, endpoint, vec![(200, body)]);
    }

    pub fn calls(&self) -> Vec<RestRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// `(method, endpoint)` of every mutating call, in order.
    pub fn mutations(&self) -> Vec<(Method, String)> {
        self.calls()
            .into_iter()
            .filter(|c| c.method != Method::Get)
            .map(|c| (c.method, endpoint_of(&c.url)))
            .collect()
    }

    /// When `method endpoint` was first called.
    pub fn tick_of(&self, method: Method, endpoint: &str) -> Option<u64> {
        let calls = self.calls();
        let ticks = self.ticks.lock().unwrap();
        calls
            .iter()
            .zip(ticks.iter())
            .find(|(c, _)| c.method == method && endpoint_of(&c.url) == endpoint)
            .map(|(_, t)| *t)
    }

    pub fn last_body(&self, method: Method, endpoint: &str) -> Option<Value> {
        self.calls()
            .into_iter()
            .rev()
            .find(|c| c.method == method && endpoint_of(&c.url) == endpoint)
            .and_then(|c| c.body)
    }
}

pub fn endpoint_of(url: &str) -> String {
    let marker = format!("/accounts/{ACCOUNT}/");
    url.split_once(&marker)
        .map(|(_, rest)| rest.to_string())
        .unwrap_or_else(|| url.to_string())
}

#[async_trait]
impl RestTransport for FakeRest {
    async fn send(&self, request: &RestRequest) -> Result<RestResponse> {
        self.calls.lock().unwrap().push(request.clone());
        self.ticks.lock().unwrap().push(tick());
        let endpoint = endpoint_of(&request.url);
        let mut routes = self.routes.lock().unwrap();
        let route = routes
            .iter_mut()
            .find(|r| r.method == request.method && r.endpoint == endpoint);
        let (status, body) = match route {
            Some(r) if r.responses.len() > 1 => r.responses.pop_front().unwrap(),
            Some(r) => r.responses.front().cloned().unwrap_or((200, Value::Null)),
            None => (404, json!({"detail": format!("no route for {endpoint}")})),
        };
        Ok(RestResponse {
            status,
            reason: if status < 300 { "OK".into() } else { "Error".into() },
            headers: BTreeMap::new(),
            body: serde_json::to_vec(&body).unwrap(),
        })
    }

    async fn download(&self, request: &RestRequest, dir: &Path) -> Result<(RestResponse, PathBuf)> {
        let response = self.send(request).await?;
        let path = dir.join("download.bin");
        std::fs::write(&path, &response.body)?;
        Ok((response, path))
    }
}

/* ============================= FAKE KUBE ============================= */

#[derive(Debug, Clone, PartialEq)]
pub enum KubeCall {
    Create { kind: String, name: String, dry_run: bool },
    Patch { kind: String, name: String, patch: Value },
    Delete { kind: String, name: String },
    Apply { kind: String },
}

/// In-memory kube API keyed by plural, namespace and name.
#[derive(Default)]
pub struct FakeKube {
    objects: Mutex<BTreeMap<(String, String, String), Value>>,
    status_on_create: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<KubeCall>>,
    lists: Mutex<Vec<String>>,
    created_at: Mutex<Vec<(String, u64)>>,
    generated: Mutex<u32>,
}

#[allow(dead_code)]
impl FakeKube {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A cluster identified by the uid of its `kube-system` namespace.
    pub fn cluster(uid: &str) -> Arc<Self> {
        let kube = Self::new();
        kube.seed(
            "namespaces",
            None,
            json!({"metadata": {"name": "kube-system", "uid": uid}}),
        );
        kube
    }

    pub fn seed(&self, plural: &str, namespace: Option<&str>, doc: Value) {
        let name = doc["metadata"]["name"].as_str().unwrap_or_default().to_string();
        self.objects.lock().unwrap().insert(
            (plural.to_string(), namespace.unwrap_or_default().to_string(), name),
            doc,
        );
    }

    /// Objects of `plural` created from now on come back with this status.
    pub fn status_on_create(&self, plural: &str, status: Value) {
        self.status_on_create
            .lock()
            .unwrap()
            .insert(plural.to_string(), status);
    }

    pub fn calls(&self) -> Vec<KubeCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Plurals listed so far, in order.
    pub fn lists(&self) -> Vec<String> {
        self.lists.lock().unwrap().clone()
    }

    /// When the first object of `kind` was created.
    pub fn tick_of_create(&self, kind: &str) -> Option<u64> {
        self.created_at
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, t)| *t)
    }

    pub fn objects(&self, plural: &str) -> Vec<Value> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((p, _, _), _)| p == plural)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

fn not_found(gvr: &Gvr, name: &str) -> ToolkitError {
    ToolkitError::not_found(format!("{} {name} not found", gvr.plural))
}

#[async_trait]
impl KubeApi for FakeKube {
    async fn list(&self, gvr: &Gvr, namespace: Option<&str>) -> Result<Value> {
        self.lists.lock().unwrap().push(gvr.plural.clone());
        let items: Vec<Value> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((p, ns, _), _)| p == &gvr.plural && namespace.is_none_or(|n| n == ns))
            .map(|(_, v)| v.clone())
            .collect();
        Ok(json!({ "items": items }))
    }

    async fn get(&self, gvr: &Gvr, name: &str, namespace: Option<&str>) -> Result<Value> {
        self.objects
            .lock()
            .unwrap()
            .get(&(
                gvr.plural.clone(),
                namespace.unwrap_or_default().to_string(),
                name.to_string(),
            ))
            .cloned()
            .ok_or_else(|| not_found(gvr, name))
    }

    async fn create(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        body: &Value,
        dry_run: bool,
    ) -> Result<Value> {
        let mut doc = body.clone();
        if doc["metadata"]["name"].is_null() {
            let prefix = doc["metadata"]["generateName"].as_str().unwrap_or_default().to_string();
            let mut n = self.generated.lock().unwrap();
            *n += 1;
            doc["metadata"]["name"] = json!(format!("{prefix}{n:05}"));
        }
        if let Some(status) = self.status_on_create.lock().unwrap().get(&gvr.plural) {
            doc["status"] = status.clone();
        }
        let name = doc["metadata"]["name"].as_str().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(KubeCall::Create {
            kind: gvr.kind.clone(),
            name: name.clone(),
            dry_run,
        });
        self.created_at.lock().unwrap().push((gvr.kind.clone(), tick()));
        if !dry_run {
            self.seed(&gvr.plural, namespace, doc.clone());
        }
        Ok(doc)
    }

    async fn patch(
        &self,
        gvr: &Gvr,
        name: &str,
        namespace: Option<&str>,
        patch: &Value,
        _dry_run: bool,
    ) -> Result<Value> {
        self.calls.lock().unwrap().push(KubeCall::Patch {
            kind: gvr.kind.clone(),
            name: name.to_string(),
            patch: patch.clone(),
        });
        self.get(gvr, name, namespace).await
    }

    async fn delete(
        &self,
        gvr: &Gvr,
        name: &str,
        namespace: Option<&str>,
        dry_run: bool,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(KubeCall::Delete {
            kind: gvr.kind.clone(),
            name: name.to_string(),
        });
        if dry_run {
            return Ok(());
        }
        self.objects
            .lock()
            .unwrap()
            .remove(&(
                gvr.plural.clone(),
                namespace.unwrap_or_default().to_string(),
                name.to_string(),
            ))
            .map(|_| ())
            .ok_or_else(|| not_found(gvr, name))
    }

    async fn apply(&self, doc: &Value, _dry_run: bool) -> Result<Value> {
        self.calls.lock().unwrap().push(KubeCall::Apply {
            kind: doc["kind"].as_str().unwrap_or_default().to_string(),
        });
        Ok(doc.clone())
    }
}

/// Hands out pre-built fake clusters by canonical target.
#[derive(Default)]
pub struct FakeConnector {
    clusters: Mutex<HashMap<String, Arc<FakeKube>>>,
    contexts: Vec<String>,
}

#[allow(dead_code)]
impl FakeConnector {
    pub fn with(entries: Vec<(KubeTarget, Arc<FakeKube>)>) -> Arc<Self> {
        let contexts = entries
            .iter()
            .filter_map(|(t, _)| t.context().map(str::to_string))
            .collect();
        let clusters = entries
            .into_iter()
            .map(|(t, k)| (t.canonical(), k))
            .collect();
        Arc::new(Self {
            clusters: Mutex::new(clusters),
            contexts,
        })
    }
}

#[async_trait]
impl KubeConnector for FakeConnector {
    async fn connect(&self, target: &KubeTarget, _insecure: bool) -> Result<Arc<dyn KubeApi>> {
        let found = self.clusters.lock().unwrap().get(&target.canonical()).cloned();
        match found {
            Some(kube) => Ok(kube as Arc<dyn KubeApi>),
            None => Err(ToolkitError::not_found(format!(
                "no cluster for {}",
                target.canonical()
            ))),
        }
    }

    fn contexts(&self) -> Result<Vec<String>> {
        Ok(self.contexts.clone())
    }
}

/* ============================= FAKE TOOLS ============================= */

#[derive(Default)]
pub struct FakeTools {
    pub helm: Mutex<Vec<HelmRelease>>,
    pub copies: Mutex<Vec<(String, Option<String>)>>,
    pub manifest: String,
}

#[async_trait]
impl ExternalTools for FakeTools {
    async fn helm_install(&self, release: &HelmRelease) -> Result<()> {
        self.helm.lock().unwrap().push(release.clone());
        Ok(())
    }

    async fn kubectl_cp(
        &self,
        command_line: &str,
        _kubeconfig: Option<&Path>,
        context: Option<&str>,
    ) -> Result<()> {
        self.copies
            .lock()
            .unwrap()
            .push((command_line.to_string(), context.map(str::to_string)));
        Ok(())
    }

    async fn fetch_manifest(&self, _url: &str) -> Result<String> {
        Ok(self.manifest.clone())
    }
}

/* ============================= SESSIONS ============================= */

#[allow(dead_code)]
pub fn options(fast: bool) -> SessionOptions {
    SessionOptions {
        fast,
        ..Default::default()
    }
}

/// A v1 session over the fake transport, writing into a capture buffer.
#[allow(dead_code)]
pub fn rest_session(rest: Arc<FakeRest>, opts: SessionOptions) -> Session {
    rest_session_with(rest, opts, Arc::new(FakeConnector::default()))
}

/// A v1 session that reaches managed clusters through `connector`.
#[allow(dead_code)]
pub fn rest_session_with(
    rest: Arc<FakeRest>,
    opts: SessionOptions,
    connector: Arc<FakeConnector>,
) -> Session {
    let config = rest_config();
    let client = RestClient::new(&config, rest).with_flags(false, true);
    Session::new(
        Surface::V1(client),
        Output::capture(),
        opts,
        connector,
        Arc::new(FakeTools::default()),
    )
    .with_rest_config(config)
}

/// A v3 session against `kube`, reaching other clusters through `connector`.
#[allow(dead_code)]
pub fn kube_session(
    kube: Arc<FakeKube>,
    dry_run: DryRun,
    connector: Arc<FakeConnector>,
    tools: Arc<FakeTools>,
) -> Session {
    let out = Output::capture();
    let target = KubeTarget::Context("source".into());
    let client = KubeClient::new(kube, dry_run, out.clone(), target.canonical());
    let opts = SessionOptions {
        dry_run,
        fast: true,
        ..Default::default()
    };
    Session::new(Surface::V3(client), out, opts, connector, tools).with_kube_target(target)
}
