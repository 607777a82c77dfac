use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/* ============================= SHARED SHAPES ============================= */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Parse a single `key=value` selector.
    pub fn from_pair(selector: &str) -> Option<Self> {
        let (key, value) = selector.split_once('=')?;
        Some(Self {
            match_labels: BTreeMap::from([(key.to_string(), value.to_string())]),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IncludedNamespace {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterScopedSelector {
    pub group_version_kind: GroupVersionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NamespaceMapping {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StorageClassMapping {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// A provider credential resolved from a key of an existing Secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretValue {
    pub value_from_secret: SecretKeyRef,
}

/// Observed state shared by the data-protection kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_archive_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<String>,
}

/* ============================= APPLICATION ============================= */

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "astra.netapp.io",
    version = "v1",
    kind = "Application",
    plural = "applications",
    status = "ApplicationStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub included_namespaces: Vec<IncludedNamespace>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_cluster_scoped_resources: Vec<ClusterScopedSelector>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protection_state: Option<String>,
}

/* ============================= APP VAULT ============================= */

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "astra.netapp.io",
    version = "v1",
    kind = "AppVault",
    plural = "appvaults",
    status = "AppVaultStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AppVaultSpec {
    pub provider_type: String,
    pub provider_config: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_credentials: BTreeMap<String, SecretValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppVaultStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Shared by every cluster that registered the same bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/* ============================= SNAPSHOT / BACKUP ============================= */

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "astra.netapp.io",
    version = "v1",
    kind = "Snapshot",
    plural = "snapshots",
    status = "ProtectionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSpec {
    pub application_ref: String,
    pub app_vault_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reclaim_policy: Option<String>,
    /// Go duration, e.g. `5m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_to_use_timeout: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "astra.netapp.io",
    version = "v1",
    kind = "Backup",
    plural = "backups",
    status = "ProtectionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    pub application_ref: String,
    pub app_vault_ref: String,
    /// Promote an existing snapshot instead of taking a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reclaim_policy: Option<String>,
}

/* ============================= SCHEDULE ============================= */

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "astra.netapp.io",
    version = "v1",
    kind = "Schedule",
    plural = "schedules",
    status = "ProtectionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    pub application_ref: String,
    pub app_vault_ref: String,
    pub granularity: String,
    pub backup_retention: String,
    pub snapshot_retention: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_rule: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

/* ============================= EXEC HOOK ============================= */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MatchingCriterion {
    #[serde(rename = "type")]
    pub criterion_type: String,
    pub value: String,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "astra.netapp.io",
    version = "v1",
    kind = "ExecHook",
    plural = "exechooks",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ExecHookSpec {
    pub application_ref: String,
    pub stage: String,
    pub action: String,
    /// Base64 script body.
    pub hook_source: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matching_criteria: Vec<MatchingCriterion>,
    #[serde(default)]
    pub enabled: bool,
}

/* ============================= RESTORES ============================= */

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "astra.netapp.io",
    version = "v1",
    kind = "BackupRestore",
    plural = "backuprestores",
    status = "ProtectionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BackupRestoreSpec {
    pub app_archive_path: String,
    pub app_vault_ref: String,
    pub namespace_mapping: Vec<NamespaceMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_class_mapping: Vec<StorageClassMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_filter: Option<Value>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "astra.netapp.io",
    version = "v1",
    kind = "SnapshotRestore",
    plural = "snapshotrestores",
    status = "ProtectionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRestoreSpec {
    pub app_archive_path: String,
    pub app_vault_ref: String,
    pub namespace_mapping: Vec<NamespaceMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_class_mapping: Vec<StorageClassMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_filter: Option<Value>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "astra.netapp.io",
    version = "v1",
    kind = "BackupInplaceRestore",
    plural = "backupinplacerestores",
    status = "ProtectionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BackupInplaceRestoreSpec {
    pub app_archive_path: String,
    pub app_vault_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_filter: Option<Value>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "astra.netapp.io",
    version = "v1",
    kind = "SnapshotInplaceRestore",
    plural = "snapshotinplacerestores",
    status = "ProtectionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInplaceRestoreSpec {
    pub app_archive_path: String,
    pub app_vault_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_filter: Option<Value>,
}

/* ============================= CONNECTOR ============================= */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorAstra {
    pub account_id: String,
    pub cluster_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_ref: Option<String>,
    #[serde(default)]
    pub skip_tls_validation: bool,
    #[serde(default)]
    pub unregister: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NatsSyncClient {
    #[serde(rename = "cloudBridgeURL")]
    pub cloud_bridge_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImageRegistry {
    pub name: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AutoSupport {
    pub enrolled: bool,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "astra.netapp.io",
    version = "v1",
    kind = "AstraConnector",
    plural = "astraconnectors",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AstraConnectorSpec {
    pub astra: ConnectorAstra,
    /// Absent for headless connectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nats_sync_client: Option<NatsSyncClient>,
    pub image_registry: ImageRegistry,
    pub auto_support: AutoSupport,
}

/* ============================= AUTO SUPPORT ============================= */

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "astra.netapp.io",
    version = "v1",
    kind = "AutoSupportBundle",
    plural = "autosupportbundles",
    status = "AutoSupportBundleStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AutoSupportBundleSpec {
    pub trigger_type: String,
    pub upload_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_window_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_window_end: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoSupportBundleStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_state: Option<String>,
    /// Ready-made `kubectl cp` invocation that fetches the bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_kubectl_cp_command: Option<String>,
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;
    use serde_json::json;

    #[test]
    fn test_snapshot_serialises_camel_case() {
        let snap = Snapshot::new(
            "snap-1",
            SnapshotSpec {
                application_ref: "wordpress".into(),
                app_vault_ref: "vault-a".into(),
                reclaim_policy: None,
                created_timeout: None,
                ready_to_use_timeout: None,
            },
        );
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["apiVersion"], "astra.netapp.io/v1");
        assert_eq!(value["kind"], "Snapshot");
        assert_eq!(value["spec"]["applicationRef"], "wordpress");
        assert_eq!(value["spec"]["appVaultRef"], "vault-a");
        assert!(value["spec"].get("reclaimPolicy").is_none());
        assert!(value.get("status").is_none());
    }

    #[test]
    fn test_plurals() {
        assert_eq!(Application::plural(&()), "applications");
        assert_eq!(AppVault::plural(&()), "appvaults");
        assert_eq!(ExecHook::plural(&()), "exechooks");
        assert_eq!(BackupInplaceRestore::plural(&()), "backupinplacerestores");
        assert_eq!(AutoSupportBundle::plural(&()), "autosupportbundles");
    }

    #[test]
    fn test_app_vault_status_reads_uid() {
        let vault: AppVault = serde_json::from_value(json!({
            "apiVersion": "astra.netapp.io/v1",
            "kind": "AppVault",
            "metadata": {"name": "vault-a", "namespace": "astra-connector"},
            "spec": {"providerType": "aws", "providerConfig": {"bucketName": "b"}},
            "status": {"state": "available", "uid": "1234"},
        }))
        .unwrap();
        let status = vault.status.unwrap();
        assert_eq!(status.uid.as_deref(), Some("1234"));
        assert_eq!(status.state.as_deref(), Some("available"));
    }

    #[test]
    fn test_connector_headless_omits_nats() {
        let spec = AstraConnectorSpec {
            astra: ConnectorAstra {
                account_id: "acct".into(),
                cluster_name: "prod".into(),
                cloud_id: None,
                token_ref: None,
                skip_tls_validation: false,
                unregister: false,
            },
            nats_sync_client: None,
            image_registry: ImageRegistry {
                name: "cr.astra.netapp.io".into(),
                secret: "astra-regcred".into(),
            },
            auto_support: AutoSupport { enrolled: true },
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert!(value.get("natsSyncClient").is_none());
        assert_eq!(value["imageRegistry"]["secret"], "astra-regcred");
    }

    #[test]
    fn test_label_selector_from_pair() {
        let sel = LabelSelector::from_pair("app=wordpress").unwrap();
        assert_eq!(sel.match_labels["app"], "wordpress");
        assert!(LabelSelector::from_pair("bare").is_none());
    }
}
