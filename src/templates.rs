use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::{IngressClass, IngressClassSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use serde::Serialize;
use serde_json::{Value, json};

use crate::crd::*;
use crate::error::{Result, ToolkitError};
use crate::kube_client::CONNECTOR_NAMESPACE;
use crate::path::lookup;

/* ============================= METADATA ============================= */

/// How a rendered object is named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectName {
    Fixed(String),
    /// `metadata.generateName`, completed by the API server.
    Generated(String),
}

impl ObjectName {
    pub fn fixed(name: impl Into<String>) -> Self {
        Self::Fixed(name.into())
    }

    pub fn generated(prefix: impl Into<String>) -> Self {
        Self::Generated(prefix.into())
    }
}

fn connector_meta(name: &ObjectName) -> ObjectMeta {
    let mut meta = ObjectMeta {
        namespace: Some(CONNECTOR_NAMESPACE.to_string()),
        ..Default::default()
    };
    match name {
        ObjectName::Fixed(n) => meta.name = Some(n.clone()),
        ObjectName::Generated(p) => meta.generate_name = Some(p.clone()),
    }
    meta
}

/// Serialise a typed custom resource into the document that gets submitted.
fn render<K>(name: &ObjectName, spec: <K as HasSpecCtor>::Spec) -> Result<Value>
where
    K: Resource<DynamicType = ()> + Serialize + HasSpecCtor,
{
    let mut obj = K::with_spec(spec);
    *obj.meta_mut() = connector_meta(name);
    Ok(serde_json::to_value(&obj)?)
}

/// Uniform constructor over the derived `Kind::new(name, spec)`.
pub trait HasSpecCtor: Sized {
    type Spec;
    fn with_spec(spec: Self::Spec) -> Self;
}

macro_rules! spec_ctor {
    ($($kind:ident => $spec:ident),* $(,)?) => {
        $(impl HasSpecCtor for $kind {
            type Spec = $spec;
            fn with_spec(spec: $spec) -> Self {
                $kind::new("", spec)
            }
        })*
    };
}

spec_ctor! {
    Application => ApplicationSpec,
    AppVault => AppVaultSpec,
    Snapshot => SnapshotSpec,
    Backup => BackupSpec,
    Schedule => ScheduleSpec,
    ExecHook => ExecHookSpec,
    BackupRestore => BackupRestoreSpec,
    SnapshotRestore => SnapshotRestoreSpec,
    BackupInplaceRestore => BackupInplaceRestoreSpec,
    SnapshotInplaceRestore => SnapshotInplaceRestoreSpec,
    AstraConnector => AstraConnectorSpec,
    AutoSupportBundle => AutoSupportBundleSpec,
}

/* ============================= CUSTOM RESOURCES ============================= */

pub fn application(name: &str, spec: ApplicationSpec) -> Result<Value> {
    render::<Application>(&ObjectName::fixed(name), spec)
}

pub fn app_vault(name: &str, spec: AppVaultSpec) -> Result<Value> {
    render::<AppVault>(&ObjectName::fixed(name), spec)
}

pub fn snapshot(name: &ObjectName, spec: SnapshotSpec) -> Result<Value> {
    render::<Snapshot>(name, spec)
}

pub fn backup(name: &ObjectName, spec: BackupSpec) -> Result<Value> {
    render::<Backup>(name, spec)
}

pub fn schedule(name: &str, spec: ScheduleSpec) -> Result<Value> {
    render::<Schedule>(&ObjectName::fixed(name), spec)
}

pub fn exec_hook(name: &str, spec: ExecHookSpec) -> Result<Value> {
    render::<ExecHook>(&ObjectName::fixed(name), spec)
}

pub fn auto_support_bundle(name: &ObjectName, spec: AutoSupportBundleSpec) -> Result<Value> {
    render::<AutoSupportBundle>(name, spec)
}

pub fn astra_connector(name: &str, spec: AstraConnectorSpec) -> Result<Value> {
    render::<AstraConnector>(&ObjectName::fixed(name), spec)
}

/// Where a restore reads its data from: the archive of a finished
/// snapshot or backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSource {
    /// `Backup` or `Snapshot`.
    pub kind: String,
    pub app_archive_path: String,
    pub app_vault_ref: String,
}

impl RestoreSource {
    /// Lift kind, archive path and appVault off a snapshot/backup document.
    pub fn from_document(doc: &Value) -> Result<Self> {
        let field = |path: &str| {
            lookup(doc, path).ok_or_else(|| {
                ToolkitError::validation(format!(
                    "'{path}' key not found in '{}', please ensure it is a valid backup/snapshot",
                    lookup(doc, "metadata.name").unwrap_or_default()
                ))
            })
        };
        let kind = field("kind")?;
        if kind != "Backup" && kind != "Snapshot" {
            return Err(ToolkitError::validation(format!(
                "'{kind}' is not a valid restore source kind"
            )));
        }
        Ok(Self {
            kind,
            app_archive_path: field("status.appArchivePath")?,
            app_vault_ref: field("spec.appVaultRef")?,
        })
    }
}

/// A `{Backup,Snapshot}Restore` document restoring into new namespaces.
pub fn restore(
    prefix: &str,
    source: &RestoreSource,
    namespace_mapping: Vec<NamespaceMapping>,
    storage_class: Option<&str>,
    resource_filter: Option<Value>,
) -> Result<Value> {
    let name = ObjectName::generated(prefix);
    let storage_class_mapping: Vec<StorageClassMapping> = storage_class
        .map(|sc| {
            vec![StorageClassMapping {
                source: "*".to_string(),
                destination: sc.to_string(),
            }]
        })
        .unwrap_or_default();
    if source.kind == "Backup" {
        render::<BackupRestore>(
            &name,
            BackupRestoreSpec {
                app_archive_path: source.app_archive_path.clone(),
                app_vault_ref: source.app_vault_ref.clone(),
                namespace_mapping,
                storage_class_mapping,
                resource_filter,
            },
        )
    } else {
        render::<SnapshotRestore>(
            &name,
            SnapshotRestoreSpec {
                app_archive_path: source.app_archive_path.clone(),
                app_vault_ref: source.app_vault_ref.clone(),
                namespace_mapping,
                storage_class_mapping,
                resource_filter,
            },
        )
    }
}

/// A `{Backup,Snapshot}InplaceRestore` document.
pub fn inplace_restore(
    prefix: &str,
    source: &RestoreSource,
    resource_filter: Option<Value>,
) -> Result<Value> {
    let name = ObjectName::generated(prefix);
    if source.kind == "Backup" {
        render::<BackupInplaceRestore>(
            &name,
            BackupInplaceRestoreSpec {
                app_archive_path: source.app_archive_path.clone(),
                app_vault_ref: source.app_vault_ref.clone(),
                resource_filter,
            },
        )
    } else {
        render::<SnapshotInplaceRestore>(
            &name,
            SnapshotInplaceRestoreSpec {
                app_archive_path: source.app_archive_path.clone(),
                app_vault_ref: source.app_vault_ref.clone(),
                resource_filter,
            },
        )
    }
}

/// Pick the first appVault reporting `status.state == available`.
pub fn first_available_app_vault(listing: &Value) -> Result<Value> {
    listing
        .get("items")
        .and_then(Value::as_array)
        .and_then(|items| {
            items
                .iter()
                .find(|v| lookup(v, "status.state").as_deref() == Some("available"))
        })
        .cloned()
        .ok_or_else(ToolkitError::no_available_app_vault)
}

/* ============================= SECRETS ============================= */

fn secret(
    name: &ObjectName,
    namespace: &str,
    secret_type: &str,
    data: BTreeMap<String, Vec<u8>>,
) -> Result<Value> {
    let mut metadata = ObjectMeta {
        namespace: Some(namespace.to_string()),
        ..Default::default()
    };
    match name {
        ObjectName::Fixed(n) => metadata.name = Some(n.clone()),
        ObjectName::Generated(p) => metadata.generate_name = Some(p.clone()),
    }
    let secret = Secret {
        metadata,
        type_: Some(secret_type.to_string()),
        data: Some(data.into_iter().map(|(k, v)| (k, ByteString(v))).collect()),
        ..Default::default()
    };
    let mut value = serde_json::to_value(&secret)?;
    value["apiVersion"] = json!("v1");
    value["kind"] = json!("Secret");
    Ok(value)
}

/// `kubernetes.io/dockerconfigjson` pull secret for the connector images.
pub fn registry_secret(
    name: &ObjectName,
    namespace: &str,
    registry: &str,
    username: &str,
    password: &str,
) -> Result<Value> {
    let auth = STANDARD.encode(format!("{username}:{password}"));
    let config = json!({
        "auths": {
            registry: {"username": username, "password": password, "auth": auth}
        }
    });
    secret(
        name,
        namespace,
        "kubernetes.io/dockerconfigjson",
        BTreeMap::from([(
            ".dockerconfigjson".to_string(),
            serde_json::to_vec(&config)?,
        )]),
    )
}

/// Opaque secret carrying the control-plane API token under `apiToken`.
pub fn api_token_secret(name: &str, namespace: &str, token: &str) -> Result<Value> {
    secret(
        &ObjectName::fixed(name),
        namespace,
        "Opaque",
        BTreeMap::from([("apiToken".to_string(), token.as_bytes().to_vec())]),
    )
}

pub const S3_ACCESS_KEY: &str = "accessKeyID";
pub const S3_SECRET_KEY: &str = "secretAccessKey";

/// Opaque secret with an S3 key pair, referenced from an appVault spec.
pub fn s3_secret(name: &str, namespace: &str, access_key: &str, secret_key: &str) -> Result<Value> {
    secret(
        &ObjectName::fixed(name),
        namespace,
        "Opaque",
        BTreeMap::from([
            (S3_ACCESS_KEY.to_string(), access_key.as_bytes().to_vec()),
            (S3_SECRET_KEY.to_string(), secret_key.as_bytes().to_vec()),
        ]),
    )
}

/// Opaque secret wrapping an arbitrary credential file (azure / gcp JSON).
pub fn file_secret(name: &str, namespace: &str, key: &str, contents: &[u8]) -> Result<Value> {
    secret(
        &ObjectName::fixed(name),
        namespace,
        "Opaque",
        BTreeMap::from([(key.to_string(), contents.to_vec())]),
    )
}

/* ============================= INGRESS CLASS ============================= */

const INGRESS_INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
const HELM_RELEASE_NAME: &str = "meta.helm.sh/release-name";
const HELM_RELEASE_NAMESPACE: &str = "meta.helm.sh/release-namespace";

/// Built-in IngressClass used when the source cluster cannot be read.
///
/// Controller pods whose name mentions gitlab get the GitLab chart's
/// naming and labels.
pub fn fallback_ingress_class(controller_pod: &str, namespace: &str) -> Result<Value> {
    let gitlab = controller_pod.contains("gitlab");
    let mut labels = BTreeMap::from([
        ("app.kubernetes.io/component".to_string(), "controller".to_string()),
        (INGRESS_INSTANCE_LABEL.to_string(), namespace.to_string()),
        ("app.kubernetes.io/managed-by".to_string(), "Helm".to_string()),
        ("app.kubernetes.io/name".to_string(), "ingress-nginx".to_string()),
        ("app.kubernetes.io/version".to_string(), "1.1.0".to_string()),
        ("helm.sh/chart".to_string(), "ingress-nginx-4.0.13".to_string()),
    ]);
    if gitlab {
        labels.insert("release".to_string(), namespace.to_string());
        labels.insert("app".to_string(), "nginx-ingress".to_string());
    }
    let class = IngressClass {
        metadata: ObjectMeta {
            name: Some(if gitlab { "gitlab-nginx" } else { "nginx" }.to_string()),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([
                (HELM_RELEASE_NAME.to_string(), namespace.to_string()),
                (HELM_RELEASE_NAMESPACE.to_string(), namespace.to_string()),
            ])),
            ..Default::default()
        },
        spec: Some(IngressClassSpec {
            controller: Some("k8s.io/ingress-nginx".to_string()),
            ..Default::default()
        }),
    };
    let mut value = serde_json::to_value(&class)?;
    value["apiVersion"] = json!("networking.k8s.io/v1");
    value["kind"] = json!("IngressClass");
    Ok(value)
}

/// Turn an IngressClass read from the source cluster into one that can be
/// created on the destination, owned by the clone's namespace.
pub fn retarget_ingress_class(mut class: Value, namespace: &str) -> Value {
    if let Some(meta) = class.get_mut("metadata").and_then(Value::as_object_mut) {
        for key in ["resourceVersion", "creationTimestamp", "uid", "managedFields"] {
            meta.remove(key);
        }
        let labels = meta.entry("labels").or_insert_with(|| json!({}));
        labels[INGRESS_INSTANCE_LABEL] = json!(namespace);
        let annotations = meta.entry("annotations").or_insert_with(|| json!({}));
        annotations[HELM_RELEASE_NAME] = json!(namespace);
        annotations[HELM_RELEASE_NAMESPACE] = json!(namespace);
    }
    class
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> RestoreSource {
        RestoreSource {
            kind: "Backup".into(),
            app_archive_path: "wp_1234/backups/b1".into(),
            app_vault_ref: "vault-a".into(),
        }
    }

    #[test]
    fn test_snapshot_document_lives_in_connector_namespace() {
        let doc = snapshot(
            &ObjectName::fixed("snap-1"),
            SnapshotSpec {
                application_ref: "wp".into(),
                app_vault_ref: "vault-a".into(),
                reclaim_policy: Some("Retain".into()),
                created_timeout: Some("5m".into()),
                ready_to_use_timeout: None,
            },
        )
        .unwrap();
        assert_eq!(doc["metadata"]["name"], "snap-1");
        assert_eq!(doc["metadata"]["namespace"], CONNECTOR_NAMESPACE);
        assert_eq!(doc["spec"]["reclaimPolicy"], "Retain");
        assert_eq!(doc["spec"]["createdTimeout"], "5m");
        assert!(doc["spec"].get("readyToUseTimeout").is_none());
    }

    #[test]
    fn test_generated_name() {
        let doc = restore("wp2-restore-", &source(), vec![], None, None).unwrap();
        assert_eq!(doc["metadata"]["generateName"], "wp2-restore-");
        assert!(doc["metadata"].get("name").is_none());
        assert_eq!(doc["kind"], "BackupRestore");
    }

    #[test]
    fn test_restore_carries_mapping_and_storage_class() {
        let doc = restore(
            "wp2-restore-",
            &RestoreSource {
                kind: "Snapshot".into(),
                ..source()
            },
            vec![NamespaceMapping {
                source: "wp".into(),
                destination: "wp2".into(),
            }],
            Some("gold"),
            None,
        )
        .unwrap();
        assert_eq!(doc["kind"], "SnapshotRestore");
        assert_eq!(doc["spec"]["namespaceMapping"][0]["destination"], "wp2");
        assert_eq!(doc["spec"]["storageClassMapping"][0]["destination"], "gold");
        assert_eq!(doc["spec"]["appArchivePath"], "wp_1234/backups/b1");
    }

    #[test]
    fn test_restore_source_requires_archive_path() {
        let doc = json!({
            "kind": "Snapshot",
            "metadata": {"name": "s1"},
            "spec": {"appVaultRef": "vault-a"},
            "status": {},
        });
        let err = RestoreSource::from_document(&doc).unwrap_err();
        assert!(err.to_string().contains("status.appArchivePath"));
    }

    #[test]
    fn test_inplace_restore_kind() {
        let doc = inplace_restore("wp-ipr-", &source(), None).unwrap();
        assert_eq!(doc["kind"], "BackupInplaceRestore");
        assert_eq!(doc["spec"]["appVaultRef"], "vault-a");
    }

    #[test]
    fn test_first_available_app_vault() {
        let listing = json!({"items": [
            {"metadata": {"name": "a"}, "status": {"state": "pending"}},
            {"metadata": {"name": "b"}, "status": {"state": "available"}},
        ]});
        let vault = first_available_app_vault(&listing).unwrap();
        assert_eq!(vault["metadata"]["name"], "b");
        let none = first_available_app_vault(&json!({"items": []})).unwrap_err();
        assert!(none.to_string().contains("NoAvailableAppVault"));
    }

    #[test]
    fn test_registry_secret_encodes_auth() {
        let doc = registry_secret(
            &ObjectName::fixed("regcred"),
            "astra-connector",
            "cr.astra.netapp.io",
            "u",
            "p",
        )
        .unwrap();
        assert_eq!(doc["type"], "kubernetes.io/dockerconfigjson");
        let encoded = doc["data"][".dockerconfigjson"].as_str().unwrap();
        let decoded = STANDARD.decode(encoded).unwrap();
        let config: Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(
            config["auths"]["cr.astra.netapp.io"]["auth"],
            STANDARD.encode("u:p")
        );
    }

    #[test]
    fn test_fallback_ingress_class_gitlab_variant() {
        let plain = fallback_ingress_class("ingress-nginx-controller-abc", "wp2").unwrap();
        assert_eq!(plain["metadata"]["name"], "nginx");
        assert_eq!(plain["metadata"]["labels"][INGRESS_INSTANCE_LABEL], "wp2");
        let gitlab = fallback_ingress_class("gitlab-nginx-ingress-controller-x", "gl2").unwrap();
        assert_eq!(gitlab["metadata"]["name"], "gitlab-nginx");
        assert_eq!(gitlab["metadata"]["labels"]["release"], "gl2");
        assert_eq!(gitlab["spec"]["controller"], "k8s.io/ingress-nginx");
    }

    #[test]
    fn test_retarget_ingress_class_strips_server_fields() {
        let class = json!({
            "kind": "IngressClass",
            "metadata": {
                "name": "nginx",
                "uid": "abc",
                "resourceVersion": "42",
                "creationTimestamp": "2023-01-01T00:00:00Z",
                "managedFields": [{"manager": "helm"}],
                "labels": {INGRESS_INSTANCE_LABEL: "wp"},
            },
        });
        let out = retarget_ingress_class(class, "wp2");
        let meta = &out["metadata"];
        assert!(meta.get("uid").is_none());
        assert!(meta.get("managedFields").is_none());
        assert_eq!(meta["labels"][INGRESS_INSTANCE_LABEL], "wp2");
        assert_eq!(meta["annotations"][HELM_RELEASE_NAMESPACE], "wp2");
    }
}
