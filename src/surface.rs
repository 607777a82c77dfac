use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::cache::Collection;
use crate::crd::{
    AppVault, Application, AstraConnector, AutoSupportBundle, Backup, BackupInplaceRestore,
    BackupRestore, ExecHook, Schedule, Snapshot, SnapshotInplaceRestore, SnapshotRestore,
};
use crate::error::{Result, ToolkitError};
use crate::helpers::combine_resources;
use crate::kube_client::{CONNECTOR_NAMESPACE, Gvr, KubeClient};
use crate::path::{Filter, lookup};
use crate::rest::{RestClient, endpoints};

/* ============================= SCOPE ============================= */

/// Narrowing applied while listing a collection.
#[derive(Debug, Clone, Default)]
pub struct ListScope {
    /// App id (v1) or Application name (v3) for per-app collections.
    pub app: Option<String>,
    /// Cluster id, for cluster-scoped REST listings.
    pub cluster: Option<String>,
    /// v3 namespaces: keep the system namespaces.
    pub show_system: bool,
    /// Extra query parameters passed through to REST listings.
    pub params: Vec<(String, String)>,
}

impl ListScope {
    pub fn app(app: impl Into<String>) -> Self {
        Self {
            app: Some(app.into()),
            ..Default::default()
        }
    }

    pub fn cluster(cluster: impl Into<String>) -> Self {
        Self {
            cluster: Some(cluster.into()),
            ..Default::default()
        }
    }
}

/* ============================= CAPABILITY ============================= */

/// Listing capability shared by both management surfaces. Every listing is
/// returned as an object with an `items` array.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn list_collection(&self, collection: Collection, scope: &ListScope) -> Result<Value>;
}

fn items_of(listing: Value) -> Vec<Value> {
    match listing {
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn v3_only(collection: Collection) -> ToolkitError {
    ToolkitError::validation(format!("'{collection}' can only be listed with --v3"))
}

/* ============================= V1 ============================= */

impl RestClient {
    /// List a per-app child collection, stamping each item with its `appID`.
    ///
    /// Without an app in scope every app is visited; apps whose listing
    /// fails are skipped.
    async fn per_app(&self, child: &str, scope: &ListScope) -> Result<Value> {
        if let Some(app_id) = &scope.app {
            let mut items = items_of(self.list(&endpoints::app_child(app_id, child), &[]).await?);
            for item in &mut items {
                item["appID"] = json!(app_id);
            }
            return Ok(json!({ "items": items }));
        }

        let apps = self.list(endpoints::APPS, &[]).await?;
        let mut items = Vec::new();
        for app_id in items_of(apps).iter().filter_map(|a| lookup(a, "id")) {
            match self.list(&endpoints::app_child(&app_id, child), &[]).await {
                Ok(listing) => {
                    for mut item in items_of(listing) {
                        item["appID"] = json!(app_id);
                        items.push(item);
                    }
                }
                Err(e) => warn!(app_id = %app_id, child, error = %e, "app_child_list_skipped"),
            }
        }
        Ok(json!({ "items": items }))
    }

    /// Clusters across every cloud.
    async fn all_clusters(&self) -> Result<Value> {
        let clouds = self.list(endpoints::CLOUDS, &[]).await?;
        let mut items = Vec::new();
        for cloud_id in items_of(clouds).iter().filter_map(|c| lookup(c, "id")) {
            match self.list(&endpoints::cloud_clusters(&cloud_id), &[]).await {
                Ok(listing) => items.extend(items_of(listing)),
                Err(e) => warn!(cloud_id = %cloud_id, error = %e, "cloud_cluster_list_skipped"),
            }
        }
        Ok(json!({ "items": items }))
    }

    /// Storage classes of every eligible cluster, annotated with where they
    /// came from.
    async fn all_storage_classes(&self, scope: &ListScope) -> Result<Value> {
        let clouds = self.list(endpoints::CLOUDS, &[]).await?;
        let mut items = Vec::new();
        for cloud in items_of(clouds) {
            let Some(cloud_id) = lookup(&cloud, "id") else {
                continue;
            };
            let cloud_type = lookup(&cloud, "cloudType").unwrap_or_default();
            let clusters = match self.list(&endpoints::cloud_clusters(&cloud_id), &[]).await {
                Ok(listing) => items_of(listing),
                Err(e) => {
                    warn!(cloud_id = %cloud_id, error = %e, "cloud_cluster_list_skipped");
                    continue;
                }
            };
            for cluster in clusters {
                let Some(cluster_id) = lookup(&cluster, "id") else {
                    continue;
                };
                if scope.cluster.as_ref().is_some_and(|c| *c != cluster_id) {
                    continue;
                }
                if lookup(&cluster, "managedState").as_deref() == Some("ineligible") {
                    continue;
                }
                let cluster_name = lookup(&cluster, "name").unwrap_or_default();
                let endpoint = endpoints::storage_classes(&cloud_id, &cluster_id);
                match self.list(&endpoint, &[]).await {
                    Ok(listing) => {
                        for mut sc in items_of(listing) {
                            sc["cloudID"] = json!(cloud_id);
                            sc["cloudType"] = json!(cloud_type);
                            sc["clusterID"] = json!(cluster_id);
                            sc["clusterName"] = json!(cluster_name);
                            items.push(sc);
                        }
                    }
                    Err(e) => {
                        warn!(cluster_id = %cluster_id, error = %e, "storage_class_list_skipped")
                    }
                }
            }
        }
        Ok(json!({ "items": items }))
    }

    async fn api_resources(&self, scope: &ListScope) -> Result<Value> {
        let cluster_ids = match &scope.cluster {
            Some(id) => vec![id.clone()],
            None => items_of(self.list(endpoints::MANAGED_CLUSTERS, &[]).await?)
                .iter()
                .filter(|c| lookup(c, "managedState").as_deref() == Some("managed"))
                .filter_map(|c| lookup(c, "id"))
                .collect(),
        };
        let mut items = Vec::new();
        for cluster_id in cluster_ids {
            let listing = self
                .list(&endpoints::cluster_api_resources(&cluster_id), &[])
                .await?;
            for mut item in items_of(listing) {
                item["clusterID"] = json!(cluster_id);
                items.push(item);
            }
        }
        Ok(json!({ "items": items }))
    }
}

#[async_trait]
impl ResourceClient for RestClient {
    async fn list_collection(&self, collection: Collection, scope: &ListScope) -> Result<Value> {
        debug!(collection = %collection, "v1_list");
        let params = scope.params.as_slice();
        match collection {
            Collection::ApiResources => self.api_resources(scope).await,
            Collection::Apps => self.list(endpoints::APPS, params).await,
            Collection::Assets => {
                let app = scope.app.as_deref().ok_or_else(|| {
                    ToolkitError::validation("listing assets requires an app")
                })?;
                self.list(&endpoints::app_child(app, "appAssets"), params).await
            }
            Collection::Asups => self.list(endpoints::ASUPS, params).await,
            Collection::Backups => self.per_app("appBackups", scope).await,
            Collection::Buckets => self.list(endpoints::BUCKETS, params).await,
            Collection::Clouds => self.list(endpoints::CLOUDS, params).await,
            Collection::Clusters => self.all_clusters().await,
            Collection::Credentials => self.list(endpoints::CREDENTIALS, params).await,
            Collection::Groups => self.list(endpoints::GROUPS, params).await,
            Collection::Hooks => self.per_app("executionHooks", scope).await,
            Collection::LdapGroups => self.list(endpoints::LDAP_GROUPS, params).await,
            Collection::LdapUsers => self.list(endpoints::LDAP_USERS, params).await,
            Collection::Namespaces => match &scope.cluster {
                Some(cluster) => {
                    self.list(&endpoints::cluster_namespaces(cluster), params)
                        .await
                }
                None => self.list(endpoints::NAMESPACES, params).await,
            },
            Collection::Notifications => self.list(endpoints::NOTIFICATIONS, params).await,
            Collection::Protections => self.per_app("schedules", scope).await,
            Collection::Replications => self.list(endpoints::APP_MIRRORS, params).await,
            Collection::RoleBindings => self.list(endpoints::ROLE_BINDINGS, params).await,
            Collection::Scripts => self.list(endpoints::HOOK_SOURCES, params).await,
            Collection::Settings => self.list(endpoints::SETTINGS, params).await,
            Collection::Snapshots => self.per_app("appSnaps", scope).await,
            Collection::StorageBackends => self.list(endpoints::STORAGE_BACKENDS, params).await,
            Collection::StorageClasses => self.all_storage_classes(scope).await,
            Collection::Users => self.list(endpoints::USERS, params).await,
            Collection::Connectors
            | Collection::HooksRuns
            | Collection::InplaceRestores
            | Collection::Restores => Err(v3_only(collection)),
        }
    }
}

/* ============================= V3 ============================= */

/// The custom-resource kinds backing a collection in v3 mode.
///
/// Restores and in-place restores each span a Backup and a Snapshot kind.
pub fn custom_resource_gvrs(collection: Collection) -> Vec<Gvr> {
    match collection {
        Collection::Apps => vec![Gvr::of::<Application>()],
        Collection::Asups => vec![Gvr::of::<AutoSupportBundle>()],
        Collection::Backups => vec![Gvr::of::<Backup>()],
        Collection::Buckets => vec![Gvr::of::<AppVault>()],
        Collection::Connectors => vec![Gvr::of::<AstraConnector>()],
        Collection::Hooks => vec![Gvr::of::<ExecHook>()],
        Collection::HooksRuns => vec![Gvr::astra("exechooksruns", "ExecHooksRun")],
        Collection::InplaceRestores => vec![
            Gvr::of::<BackupInplaceRestore>(),
            Gvr::of::<SnapshotInplaceRestore>(),
        ],
        Collection::Protections => vec![Gvr::of::<Schedule>()],
        Collection::Restores => vec![Gvr::of::<BackupRestore>(), Gvr::of::<SnapshotRestore>()],
        Collection::Snapshots => vec![Gvr::of::<Snapshot>()],
        _ => Vec::new(),
    }
}

/// The single custom-resource kind of a collection, for create and destroy.
pub fn custom_resource_gvr(collection: Collection) -> Result<Gvr> {
    match custom_resource_gvrs(collection).as_slice() {
        [one] => Ok(one.clone()),
        _ => Err(ToolkitError::validation(format!(
            "'{collection}' is not a single custom resource kind"
        ))),
    }
}

const SERVICE_ACCOUNT_TOKEN: &str = "kubernetes.io/service-account-token";

#[async_trait]
impl ResourceClient for KubeClient {
    async fn list_collection(&self, collection: Collection, scope: &ListScope) -> Result<Value> {
        debug!(collection = %collection, "v3_list");
        match collection {
            Collection::Namespaces => return self.namespaces(scope.show_system).await,
            Collection::StorageClasses => return self.storage_classes().await,
            Collection::Credentials => {
                let mut listing = self.secrets(CONNECTOR_NAMESPACE).await?;
                if let Some(items) = listing.get_mut("items").and_then(Value::as_array_mut) {
                    items.retain(|s| lookup(s, "type").as_deref() != Some(SERVICE_ACCOUNT_TOKEN));
                }
                return Ok(listing);
            }
            _ => {}
        }

        let gvrs = custom_resource_gvrs(collection);
        if gvrs.is_empty() {
            return Err(ToolkitError::validation(format!(
                "'{collection}' is not available with --v3"
            )));
        }
        let mut filters = Vec::new();
        if let Some(app) = &scope.app {
            let key = match collection {
                Collection::Apps => "metadata.name",
                _ => "spec.applicationRef",
            };
            filters.push(Filter::equals(key, app.as_str())?);
        }

        if let [gvr] = gvrs.as_slice() {
            return self.list(gvr, Some(CONNECTOR_NAMESPACE), &filters).await;
        }
        let mut listings = Vec::with_capacity(gvrs.len());
        for gvr in &gvrs {
            listings.push(self.list(gvr, Some(CONNECTOR_NAMESPACE), &filters).await?);
        }
        Ok(combine_resources(&listings))
    }
}

/* ============================= SURFACE ============================= */

/// The management surface one invocation talks to.
#[derive(Clone)]
pub enum Surface {
    /// Hosted REST API.
    V1(RestClient),
    /// Custom resources on a cluster.
    V3(KubeClient),
}

impl Surface {
    pub fn is_v3(&self) -> bool {
        matches!(self, Self::V3(_))
    }

    pub fn client(&self) -> &dyn ResourceClient {
        match self {
            Self::V1(rest) => rest,
            Self::V3(kube) => kube,
        }
    }

    pub async fn list(&self, collection: Collection, scope: &ListScope) -> Result<Value> {
        self.client().list_collection(collection, scope).await
    }

    pub fn rest(&self) -> Result<&RestClient> {
        match self {
            Self::V1(rest) => Ok(rest),
            Self::V3(_) => Err(ToolkitError::validation(
                "this command is not currently supported with --v3",
            )),
        }
    }

    pub fn kube(&self) -> Result<&KubeClient> {
        match self {
            Self::V3(kube) => Ok(kube),
            Self::V1(_) => Err(ToolkitError::validation("this command requires --v3")),
        }
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restores_span_two_kinds() {
        let kinds: Vec<String> = custom_resource_gvrs(Collection::Restores)
            .into_iter()
            .map(|g| g.kind)
            .collect();
        assert_eq!(kinds, vec!["BackupRestore", "SnapshotRestore"]);
    }

    #[test]
    fn test_single_kind_lookup() {
        let gvr = custom_resource_gvr(Collection::Protections).unwrap();
        assert_eq!(gvr.plural, "schedules");
        assert_eq!(gvr.api_version(), "astra.netapp.io/v1");
        assert!(custom_resource_gvr(Collection::InplaceRestores).is_err());
        assert!(custom_resource_gvr(Collection::Users).is_err());
    }

    #[test]
    fn test_items_of_tolerates_missing_items() {
        assert!(items_of(json!({"metadata": {}})).is_empty());
        assert!(items_of(Value::Null).is_empty());
        assert_eq!(items_of(json!({"items": [1, 2]})).len(), 2);
    }

    #[test]
    fn test_scope_builders() {
        assert_eq!(ListScope::app("a1").app.as_deref(), Some("a1"));
        assert_eq!(ListScope::cluster("c1").cluster.as_deref(), Some("c1"));
    }
}
