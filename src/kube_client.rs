use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams, PostParams,
};
use kube::discovery::Scope;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::{KubeTarget, list_contexts};
use crate::error::{Result, ToolkitError};
use crate::output::Output;
use crate::path::{Filter, apply_filters, lookup};

pub const ASTRA_GROUP: &str = "astra.netapp.io";
pub const ASTRA_VERSION: &str = "v1";
/// Namespace the custom resources live in.
pub const CONNECTOR_NAMESPACE: &str = "astra-connector";
pub const FIELD_MANAGER: &str = "actoolkit";

pub const SYSTEM_NAMESPACES: [&str; 6] = [
    "astra-connector-operator",
    "astra-connector",
    "kube-node-lease",
    "kube-public",
    "kube-system",
    "trident",
];

/* ============================= RESOURCE IDENTITY ============================= */

/// Group / version / plural (plus kind, needed to build documents and
/// dynamic API handles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    pub plural: String,
    pub kind: String,
}

impl Gvr {
    pub fn new(group: &str, version: &str, plural: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            plural: plural.to_string(),
            kind: kind.to_string(),
        }
    }

    /// An `astra.netapp.io/v1` kind.
    pub fn astra(plural: &str, kind: &str) -> Self {
        Self::new(ASTRA_GROUP, ASTRA_VERSION, plural, kind)
    }

    /// Identity of a typed resource such as a derived custom resource.
    pub fn of<K: kube::Resource<DynamicType = ()>>() -> Self {
        Self::new(
            &K::group(&()),
            &K::version(&()),
            &K::plural(&()),
            &K::kind(&()),
        )
    }

    pub fn namespaces() -> Self {
        Self::new("", "v1", "namespaces", "Namespace")
    }

    pub fn secrets() -> Self {
        Self::new("", "v1", "secrets", "Secret")
    }

    pub fn pods() -> Self {
        Self::new("", "v1", "pods", "Pod")
    }

    pub fn storage_classes() -> Self {
        Self::new("storage.k8s.io", "v1", "storageclasses", "StorageClass")
    }

    pub fn ingress_classes() -> Self {
        Self::new("networking.k8s.io", "v1", "ingressclasses", "IngressClass")
    }

    pub fn trident_orchestrators() -> Self {
        Self::new("trident.netapp.io", "v1", "tridentorchestrators", "TridentOrchestrator")
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(&self.group, &self.version, &self.kind),
            &self.plural,
        )
    }
}

/* ============================= DRY RUN ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DryRun {
    #[default]
    #[value(skip)]
    Off,
    /// Print the documents instead of submitting them.
    Client,
    /// Submit with `dryRun=All`.
    Server,
}

/* ============================= KUBE API ============================= */

/// Raw kube API operations the toolkit needs, on JSON documents.
///
/// `namespace: None` addresses cluster-scoped resources (or all namespaces
/// for `list`).
#[async_trait]
pub trait KubeApi: Send + Sync {
    async fn list(&self, gvr: &Gvr, namespace: Option<&str>) -> Result<Value>;
    async fn get(&self, gvr: &Gvr, name: &str, namespace: Option<&str>) -> Result<Value>;
    async fn create(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        body: &Value,
        dry_run: bool,
    ) -> Result<Value>;
    async fn patch(
        &self,
        gvr: &Gvr,
        name: &str,
        namespace: Option<&str>,
        patch: &Value,
        dry_run: bool,
    ) -> Result<Value>;
    async fn delete(
        &self,
        gvr: &Gvr,
        name: &str,
        namespace: Option<&str>,
        dry_run: bool,
    ) -> Result<()>;
    /// Server-side apply an arbitrary document, discovering its resource.
    async fn apply(&self, doc: &Value, dry_run: bool) -> Result<Value>;
}

/// Opens kube connections for contexts other than the session's own.
#[async_trait]
pub trait KubeConnector: Send + Sync {
    async fn connect(&self, target: &KubeTarget, insecure: bool) -> Result<Arc<dyn KubeApi>>;

    /// Names of the contexts `connect` can reach.
    fn contexts(&self) -> Result<Vec<String>>;
}

/* ============================= LIVE IMPLEMENTATION ============================= */

pub struct LiveKube {
    client: kube::Client,
}

impl LiveKube {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    pub async fn connect(target: &KubeTarget, insecure: bool) -> Result<Self> {
        let config = target.kube_config(insecure).await?;
        let client = kube::Client::try_from(config)?;
        info!(target = %target.canonical(), "kube_connected");
        Ok(Self { client })
    }

    fn api(&self, gvr: &Gvr, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = gvr.api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

/// Map kube API status errors onto the toolkit taxonomy.
fn map_kube_error(err: kube::Error, what: &str) -> ToolkitError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => {
            ToolkitError::not_found(format!("{what}: {}", resp.message))
        }
        kube::Error::Api(resp) if resp.code == 409 => ToolkitError::Conflict(what.to_string()),
        kube::Error::Api(resp) => ToolkitError::RemoteFailure {
            status: resp.code,
            reason: resp.reason,
            body: resp.message,
        },
        other => ToolkitError::Kube(other),
    }
}

fn describe(gvr: &Gvr, name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{}/{name} in namespace {ns}", gvr.plural),
        None => format!("{}/{name}", gvr.plural),
    }
}

#[async_trait]
impl KubeApi for LiveKube {
    async fn list(&self, gvr: &Gvr, namespace: Option<&str>) -> Result<Value> {
        let list = self
            .api(gvr, namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error(e, &gvr.plural))?;
        let mut items = Vec::with_capacity(list.items.len());
        for mut obj in list.items {
            // list responses omit per-item type meta
            if obj.types.is_none() {
                obj.types = Some(kube::api::TypeMeta {
                    api_version: gvr.api_version(),
                    kind: gvr.kind.clone(),
                });
            }
            items.push(serde_json::to_value(&obj)?);
        }
        Ok(json!({
            "apiVersion": gvr.api_version(),
            "kind": format!("{}List", gvr.kind),
            "items": items,
        }))
    }

    async fn get(&self, gvr: &Gvr, name: &str, namespace: Option<&str>) -> Result<Value> {
        let obj = self
            .api(gvr, namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, &describe(gvr, name, namespace)))?;
        Ok(serde_json::to_value(&obj)?)
    }

    async fn create(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        body: &Value,
        dry_run: bool,
    ) -> Result<Value> {
        let obj: DynamicObject = serde_json::from_value(body.clone())?;
        let name = obj
            .metadata
            .name
            .clone()
            .or_else(|| obj.metadata.generate_name.clone())
            .unwrap_or_default();
        let params = PostParams {
            dry_run,
            field_manager: Some(FIELD_MANAGER.to_string()),
        };
        let created = self
            .api(gvr, namespace)
            .create(&params, &obj)
            .await
            .map_err(|e| map_kube_error(e, &describe(gvr, &name, namespace)))?;
        Ok(serde_json::to_value(&created)?)
    }

    async fn patch(
        &self,
        gvr: &Gvr,
        name: &str,
        namespace: Option<&str>,
        patch: &Value,
        dry_run: bool,
    ) -> Result<Value> {
        let mut params = PatchParams::default();
        params.dry_run = dry_run;
        params.field_manager = Some(FIELD_MANAGER.to_string());
        let patched = self
            .api(gvr, namespace)
            .patch(name, &params, &Patch::Merge(patch))
            .await
            .map_err(|e| map_kube_error(e, &describe(gvr, name, namespace)))?;
        Ok(serde_json::to_value(&patched)?)
    }

    async fn delete(
        &self,
        gvr: &Gvr,
        name: &str,
        namespace: Option<&str>,
        dry_run: bool,
    ) -> Result<()> {
        let params = DeleteParams {
            dry_run,
            ..Default::default()
        };
        self.api(gvr, namespace)
            .delete(name, &params)
            .await
            .map_err(|e| map_kube_error(e, &describe(gvr, name, namespace)))?;
        Ok(())
    }

    async fn apply(&self, doc: &Value, dry_run: bool) -> Result<Value> {
        let obj: DynamicObject = serde_json::from_value(doc.clone())?;
        let types = obj.types.as_ref().ok_or_else(|| {
            ToolkitError::validation("cannot apply a document without apiVersion/kind")
        })?;
        let gvk = GroupVersionKind::try_from(types)
            .map_err(|e| ToolkitError::validation(format!("invalid apiVersion: {e}")))?;
        let (ar, caps) = kube::discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| map_kube_error(e, &gvk.kind))?;
        let name = obj.metadata.name.clone().unwrap_or_default();
        let api: Api<DynamicObject> = match (caps.scope, obj.metadata.namespace.as_deref()) {
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &ar),
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (Scope::Namespaced, None) => Api::default_namespaced_with(self.client.clone(), &ar),
        };
        let mut params = PatchParams::apply(FIELD_MANAGER).force();
        params.dry_run = dry_run;
        let applied = api
            .patch(&name, &params, &Patch::Apply(doc))
            .await
            .map_err(|e| map_kube_error(e, &format!("{}/{name}", gvk.kind)))?;
        Ok(serde_json::to_value(&applied)?)
    }
}

pub struct LiveConnector;

#[async_trait]
impl KubeConnector for LiveConnector {
    async fn connect(&self, target: &KubeTarget, insecure: bool) -> Result<Arc<dyn KubeApi>> {
        Ok(Arc::new(LiveKube::connect(target, insecure).await?))
    }

    fn contexts(&self) -> Result<Vec<String>> {
        list_contexts(None)
    }
}

/* ============================= KUBE CLIENT ============================= */

/// The v3 surface: kube API access with dry-run semantics, list filters and
/// the system-namespace policy applied.
#[derive(Clone)]
pub struct KubeClient {
    api: Arc<dyn KubeApi>,
    dry_run: DryRun,
    out: Output,
    context: String,
    system_namespaces: Vec<String>,
}

impl KubeClient {
    pub fn new(
        api: Arc<dyn KubeApi>,
        dry_run: DryRun,
        out: Output,
        context: impl Into<String>,
    ) -> Self {
        Self {
            api,
            dry_run,
            out,
            context: context.into(),
            system_namespaces: SYSTEM_NAMESPACES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_system_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.system_namespaces = namespaces;
        self
    }

    pub fn dry_run(&self) -> DryRun {
        self.dry_run
    }

    /// The canonical `context@kubeconfig` this client talks to.
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn raw(&self) -> &Arc<dyn KubeApi> {
        &self.api
    }

    pub async fn list(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        filters: &[Filter],
    ) -> Result<Value> {
        let mut listing = self.api.list(gvr, namespace).await?;
        apply_filters(&mut listing, filters);
        debug!(plural = %gvr.plural, "kube_list");
        Ok(listing)
    }

    pub async fn get(&self, gvr: &Gvr, name: &str, namespace: Option<&str>) -> Result<Value> {
        self.api.get(gvr, name, namespace).await
    }

    /// Create a resource. AlreadyExists counts as success.
    pub async fn create(&self, gvr: &Gvr, namespace: Option<&str>, body: Value) -> Result<Value> {
        match self.dry_run {
            DryRun::Client => {
                self.out.document(&body)?;
                Ok(body)
            }
            DryRun::Server | DryRun::Off => {
                let server_dry = self.dry_run == DryRun::Server;
                match self.api.create(gvr, namespace, &body, server_dry).await {
                    Ok(created) => {
                        info!(
                            kind = %gvr.kind,
                            name = lookup(&created, "metadata.name").unwrap_or_default(),
                            dry_run = server_dry,
                            "kube_created"
                        );
                        Ok(created)
                    }
                    Err(e) if e.is_conflict() => {
                        info!(kind = %gvr.kind, "kube_already_exists");
                        Ok(body)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    pub async fn patch(
        &self,
        gvr: &Gvr,
        name: &str,
        namespace: Option<&str>,
        patch: Value,
    ) -> Result<Value> {
        match self.dry_run {
            DryRun::Client => {
                let mut doc = json!({
                    "apiVersion": gvr.api_version(),
                    "kind": gvr.kind,
                    "metadata": {"name": name},
                });
                if let Some(ns) = namespace {
                    doc["metadata"]["namespace"] = json!(ns);
                }
                merge(&mut doc, patch);
                self.out.document(&doc)?;
                Ok(doc)
            }
            mode => {
                self.api
                    .patch(gvr, name, namespace, &patch, mode == DryRun::Server)
                    .await
            }
        }
    }

    pub async fn destroy(&self, gvr: &Gvr, name: &str, namespace: Option<&str>) -> Result<()> {
        match self.dry_run {
            DryRun::Client => {
                let mut doc = json!({
                    "apiVersion": gvr.api_version(),
                    "kind": gvr.kind,
                    "metadata": {"name": name},
                });
                if let Some(ns) = namespace {
                    doc["metadata"]["namespace"] = json!(ns);
                }
                self.out.comment(format!("delete {}/{name}", gvr.plural));
                self.out.document(&doc)
            }
            mode => {
                self.api
                    .delete(gvr, name, namespace, mode == DryRun::Server)
                    .await?;
                info!(kind = %gvr.kind, name, "kube_deleted");
                Ok(())
            }
        }
    }

    /// Server-side apply a sequence of documents in order.
    pub async fn apply_all(&self, docs: &[Value]) -> Result<()> {
        for doc in docs {
            match self.dry_run {
                DryRun::Client => self.out.document(doc)?,
                mode => {
                    self.api.apply(doc, mode == DryRun::Server).await?;
                    self.out.line(format!(
                        "{}/{} applied",
                        lookup(doc, "kind").unwrap_or_default().to_lowercase(),
                        lookup(doc, "metadata.name").unwrap_or_default()
                    ));
                }
            }
        }
        Ok(())
    }

    /// Namespaces, minus the system ones unless `show_system` is set.
    pub async fn namespaces(&self, show_system: bool) -> Result<Value> {
        let mut listing = self.api.list(&Gvr::namespaces(), None).await?;
        if !show_system {
            let system = &self.system_namespaces;
            if let Some(items) = listing.get_mut("items").and_then(Value::as_array_mut) {
                items.retain(|ns| {
                    lookup(ns, "metadata.name").is_none_or(|name| !system.contains(&name))
                });
            }
        }
        Ok(listing)
    }

    pub async fn storage_classes(&self) -> Result<Value> {
        self.api.list(&Gvr::storage_classes(), None).await
    }

    pub async fn secrets(&self, namespace: &str) -> Result<Value> {
        self.api.list(&Gvr::secrets(), Some(namespace)).await
    }

    pub async fn create_secret(&self, namespace: &str, body: Value) -> Result<Value> {
        self.create(&Gvr::secrets(), Some(namespace), body).await
    }

    pub async fn destroy_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.destroy(&Gvr::secrets(), name, Some(namespace)).await
    }

    /// The uid of `kube-system`, a stable identity for the cluster.
    pub async fn cluster_uid(&self) -> Result<String> {
        let ns = self.api.get(&Gvr::namespaces(), "kube-system", None).await?;
        lookup(&ns, "metadata.uid")
            .ok_or_else(|| ToolkitError::not_found("kube-system namespace has no uid"))
    }
}

/// Shallow-recursive JSON merge used to preview merge patches.
fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(t), Value::Object(p)) => {
            for (k, v) in p {
                if v.is_null() {
                    t.remove(&k);
                } else {
                    merge(t.entry(k).or_insert(Value::Null), v);
                }
            }
        }
        (t, p) => *t = p,
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvr_api_version() {
        assert_eq!(Gvr::namespaces().api_version(), "v1");
        assert_eq!(
            Gvr::astra("snapshots", "Snapshot").api_version(),
            "astra.netapp.io/v1"
        );
        assert_eq!(Gvr::storage_classes().api_version(), "storage.k8s.io/v1");
    }

    #[test]
    fn test_api_resource_plural() {
        let ar = Gvr::astra("appvaults", "AppVault").api_resource();
        assert_eq!(ar.plural, "appvaults");
        assert_eq!(ar.kind, "AppVault");
        assert_eq!(ar.group, "astra.netapp.io");
    }

    #[test]
    fn test_merge_patch_preview() {
        let mut doc = json!({"spec": {"a": 1, "b": {"c": 2}}, "metadata": {"name": "x"}});
        merge(&mut doc, json!({"spec": {"b": {"d": 3}, "a": null}}));
        assert_eq!(doc, json!({"spec": {"b": {"c": 2, "d": 3}}, "metadata": {"name": "x"}}));
    }

    #[test]
    fn test_system_namespaces_constant() {
        assert!(SYSTEM_NAMESPACES.contains(&"kube-system"));
        assert!(SYSTEM_NAMESPACES.contains(&"trident"));
        assert_eq!(SYSTEM_NAMESPACES.len(), 6);
    }
}
