use std::collections::BTreeSet;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::crd::{LabelSelector, MatchingCriterion, NamespaceMapping};
use crate::error::{Result, ToolkitError};
use crate::kube_client::KubeClient;
use crate::path::lookup;

/* ============================= NAMES ============================= */

static RFC1123: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static RFC 1123 pattern")
});

/// Accept `name` when it is a valid RFC 1123 label.
pub fn is_rfc1123(name: &str) -> Result<String> {
    if name.len() <= 63 && RFC1123.is_match(name) {
        Ok(name.to_string())
    } else {
        Err(ToolkitError::validation(format!(
            "'{name}' must consist of lower case alphanumeric characters or '-', must start \
             and end with an alphanumeric character, and must be at most 63 characters \
             (for example 'my-name' or '123-abc')"
        )))
    }
}

/* ============================= NAMESPACE MAPPING ============================= */

/// Build the source→destination namespace mapping for a clone or restore.
///
/// `multi` entries may each hold several comma-joined `src=dst` pairs.
pub fn create_namespace_mapping(
    app_namespaces: &[String],
    single: Option<&str>,
    multi: &[String],
) -> Result<Option<Vec<NamespaceMapping>>> {
    if multi.is_empty() && app_namespaces.len() > 1 {
        return Err(ToolkitError::validation(
            "for multi-namespace apps, --multiNsMapping must be used",
        ));
    }
    if let Some(dest) = single {
        let source = app_namespaces
            .first()
            .ok_or_else(|| ToolkitError::validation("the source app has no namespaces"))?;
        return Ok(Some(vec![NamespaceMapping {
            source: source.clone(),
            destination: is_rfc1123(dest)?,
        }]));
    }
    if multi.is_empty() {
        return Ok(None);
    }

    let mut pairs = Vec::new();
    for entry in multi.iter().flat_map(|m| m.split(',')).filter(|m| !m.is_empty()) {
        match entry.split('=').collect::<Vec<_>>().as_slice() {
            [src, dst] => pairs.push((src.to_string(), dst.to_string())),
            _ => {
                return Err(ToolkitError::validation(format!(
                    "'{entry}' does not conform to 'sourcens=destns' format"
                )));
            }
        }
    }
    let mut mapped: Vec<&str> = pairs.iter().map(|(s, _)| s.as_str()).collect();
    mapped.sort_unstable();
    let mut owned: Vec<&str> = app_namespaces.iter().map(String::as_str).collect();
    owned.sort_unstable();
    if mapped != owned {
        return Err(ToolkitError::validation(format!(
            "the source namespaces provided by --multiNsMapping do not match the namespaces \
             in the source app: sourceApp {owned:?}, multiNsMapping {mapped:?}"
        )));
    }
    pairs
        .into_iter()
        .map(|(source, dst)| {
            Ok(NamespaceMapping {
                source,
                destination: is_rfc1123(&dst)?,
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Rewrite `includedNamespaces[].namespace` of an application spec through a mapping.
pub fn update_namespace_spec(mapping: &[NamespaceMapping], spec: &mut Value) {
    let Some(namespaces) = spec
        .get_mut("includedNamespaces")
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for ns in namespaces {
        let current = ns.get("namespace").and_then(Value::as_str).map(str::to_string);
        if let Some(m) = mapping.iter().find(|m| Some(&m.source) == current.as_ref()) {
            ns["namespace"] = json!(m.destination);
        }
    }
}

/* ============================= RESOURCE FILTERS ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FilterSelection {
    Include,
    Exclude,
}

impl FilterSelection {
    fn rest_value(&self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::Exclude => "exclude",
        }
    }

    fn custom_resource_value(&self) -> &'static str {
        match self {
            Self::Include => "Include",
            Self::Exclude => "Exclude",
        }
    }
}

const GVK_KEYS: [&str; 3] = ["group", "version", "kind"];

/// One `--filterSet` argument parsed into its selector fields.
#[derive(Debug, Clone, Default, PartialEq)]
struct FilterSet {
    namespaces: Vec<String>,
    names: Vec<String>,
    label_selectors: Vec<String>,
    group: Option<String>,
    version: Option<String>,
    kind: Option<String>,
}

impl FilterSet {
    fn gvk(&self, key: &str) -> Option<&String> {
        match key {
            "group" => self.group.as_ref(),
            "version" => self.version.as_ref(),
            _ => self.kind.as_ref(),
        }
    }

    fn gvk_slot(&mut self, key: &str) -> &mut Option<String> {
        match key {
            "group" => &mut self.group,
            "version" => &mut self.version,
            _ => &mut self.kind,
        }
    }

    /// `label=app=x,name=mysql,kind=Deployment`
    fn parse(input: &str) -> Result<Self> {
        let mut set = Self::default();
        for part in input.split(',').filter(|p| !p.is_empty()) {
            let (key, val) = part.split_once('=').ok_or_else(|| {
                ToolkitError::validation(format!("'{part}' does not conform to 'key=value' format"))
            })?;
            let key = key.to_lowercase();
            // substring match, checked in this order ("namespace" contains "name")
            if key.contains("namespace") {
                set.namespaces.push(is_rfc1123(val)?);
            } else if key.contains("name") {
                set.names.push(is_rfc1123(val)?);
            } else if key.contains("label") {
                set.label_selectors.push(val.to_string());
            } else if let Some(gvk) = GVK_KEYS.iter().find(|k| key.contains(*k)) {
                let slot = set.gvk_slot(gvk);
                if slot.is_some() {
                    return Err(ToolkitError::validation(format!(
                        "'{gvk}' should not be specified multiple times within a single --filterSet arg"
                    )));
                }
                *slot = Some(val.to_string());
            } else {
                return Err(ToolkitError::validation(format!(
                    "'{key}' not one of ['namespace', 'name', 'label', 'group', 'version', 'kind']"
                )));
            }
        }
        Ok(set)
    }

    /// Every GVK value, and every GVK pair, must occur among the app's assets.
    fn validate(&self, assets: &Value) -> Result<()> {
        let items = assets
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let asset_field = |a: &Value, key: &str| lookup(a, &format!("GVK.{key}"));
        for key in GVK_KEYS {
            if let Some(val) = self.gvk(key) {
                if !items.iter().any(|a| asset_field(a, key).as_ref() == Some(val)) {
                    return Err(ToolkitError::validation(format!(
                        "'{val}' is not a valid '{key}' for this application, run 'list assets' \
                         to view possible '{key}' choices"
                    )));
                }
            }
        }
        for key1 in GVK_KEYS {
            for key2 in GVK_KEYS {
                if key1 == key2 {
                    continue;
                }
                if let (Some(v1), Some(v2)) = (self.gvk(key1), self.gvk(key2)) {
                    let paired = items.iter().any(|a| {
                        asset_field(a, key1).as_ref() == Some(v1)
                            && asset_field(a, key2).as_ref() == Some(v2)
                    });
                    if !paired {
                        return Err(ToolkitError::validation(format!(
                            "'{key1}={v1}' does not match with '{key2}={v2}', run 'list assets' \
                             to view valid GVK combinations"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        let mut list = |k: &str, v: &Vec<String>| {
            if !v.is_empty() {
                map.insert(k.to_string(), json!(v));
            }
        };
        list("namespaces", &self.namespaces);
        list("names", &self.names);
        list("labelSelectors", &self.label_selectors);
        for key in GVK_KEYS {
            if let Some(v) = self.gvk(key) {
                map.insert(key.to_string(), json!(v));
            }
        }
        Value::Object(map)
    }
}

/// Build a restore resource filter from `--filterSelection` and `--filterSet`.
///
/// `assets` (the app's asset listing) enables GVK validation when present.
pub fn create_filter_set(
    selection: Option<FilterSelection>,
    filters: &[String],
    assets: Option<&Value>,
    custom_resource: bool,
) -> Result<Option<Value>> {
    let Some(selection) = selection else {
        if !filters.is_empty() {
            return Err(ToolkitError::validation(
                "either both or none of --filterSelection and --filterSet should be specified",
            ));
        }
        return Ok(None);
    };
    if filters.is_empty() {
        return Err(ToolkitError::validation(
            "either both or none of --filterSelection and --filterSet should be specified",
        ));
    }
    let mut sets = Vec::with_capacity(filters.len());
    for f in filters {
        let set = FilterSet::parse(f)?;
        if let Some(assets) = assets {
            set.validate(assets)?;
        }
        sets.push(set.to_value());
    }
    debug!(sets = sets.len(), "filter_set_built");
    Ok(Some(if custom_resource {
        json!({
            "resourceSelectionCriteria": selection.custom_resource_value(),
            "resourceMatchers": sets,
        })
    } else {
        json!({
            "GVKN": sets,
            "resourceSelectionCriteria": selection.rest_value(),
        })
    }))
}

/* ============================= HOOKS ============================= */

/// Matching criteria for an execution hook, in a fixed type order.
pub fn create_criteria_list(
    images: &[String],
    namespaces: &[String],
    pods: &[String],
    labels: &[String],
    names: &[String],
) -> Vec<MatchingCriterion> {
    [
        ("containerImage", images),
        ("namespaceName", namespaces),
        ("podName", pods),
        ("podLabel", labels),
        ("containerName", names),
    ]
    .into_iter()
    .flat_map(|(t, values)| {
        values.iter().map(move |v| MatchingCriterion {
            criterion_type: t.to_string(),
            value: v.clone(),
        })
    })
    .collect()
}

/// Flatten repeated multi-value `-a` flags into one ordered argument list.
pub fn create_hook_list(arguments: &[Vec<String>]) -> Vec<String> {
    arguments.iter().flatten().cloned().collect()
}

/* ============================= ROLE CONSTRAINTS ============================= */

pub fn create_constraint_list(namespace_ids: &[String], labels: &[String]) -> Vec<String> {
    let constraints: Vec<String> = namespace_ids
        .iter()
        .map(|id| format!("namespaces:id='{id}'.*"))
        .chain(
            labels
                .iter()
                .map(|l| format!("namespaces:kubernetesLabels='{l}'.*")),
        )
        .collect();
    if constraints.is_empty() {
        vec!["*".to_string()]
    } else {
        constraints
    }
}

/* ============================= APP SCOPE ============================= */

/// `-a ns [label]` groups into namespace selectors.
pub fn create_namespace_list(
    arguments: &[Vec<String>],
    custom_resource: bool,
) -> Result<Vec<Value>> {
    arguments
        .iter()
        .map(|group| match group.as_slice() {
            [ns] => Ok(json!({"namespace": ns})),
            [ns, label] => {
                if custom_resource {
                    let selector = LabelSelector::from_pair(label).ok_or_else(|| {
                        ToolkitError::validation(format!("'{label}' is not a 'key=value' label"))
                    })?;
                    Ok(json!({"namespace": ns, "labelSelector": selector}))
                } else {
                    Ok(json!({"namespace": ns, "labelSelectors": [label]}))
                }
            }
            _ => Err(ToolkitError::validation(
                "--additionalNamespace takes at most two arguments per flag: \
                 '-a namespace1' or '-a namespace1 app=appname'",
            )),
        })
        .collect()
}

/// Cluster-scoped kinds an Application CR may select.
pub const CLUSTER_SCOPED_ALLOW_LIST: [(&str, &str); 6] = [
    ("rbac.authorization.k8s.io/v1", "ClusterRole"),
    ("rbac.authorization.k8s.io/v1", "ClusterRoleBinding"),
    ("apiextensions.k8s.io/v1", "CustomResource"),
    ("apiextensions.k8s.io/v1", "CustomResourceDefinition"),
    ("admissionregistration.k8s.io/v1", "MutatingWebhookConfiguration"),
    ("admissionregistration.k8s.io/v1", "ValidatingWebhookConfiguration"),
];

/// The allow-list shaped like an `apiresources` listing.
pub fn allowed_cluster_scoped_resources() -> Value {
    let items: Vec<Value> = CLUSTER_SCOPED_ALLOW_LIST
        .iter()
        .map(|(api_version, kind)| json!({"apiVersion": api_version, "kind": kind}))
        .collect();
    json!({ "items": items })
}

/// `-c kind [label]` groups resolved against an `apiresources` listing.
pub fn create_csr_list(
    arguments: &[Vec<String>],
    api_resources: &Value,
    custom_resource: bool,
) -> Result<Vec<Value>> {
    let resources = api_resources
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut out = Vec::new();
    for group in arguments {
        let (kind, label) = match group.as_slice() {
            [kind] => (kind, None),
            [kind, label] => (kind, Some(label)),
            _ => {
                return Err(ToolkitError::validation(
                    "--clusterScopedResource takes at most two arguments per flag: \
                     '-c csr-kind1' or '-c csr-kind1 app=appname'",
                ));
            }
        };
        for resource in resources {
            if lookup(resource, "kind").as_ref() != Some(kind) {
                continue;
            }
            let api_version = lookup(resource, "apiVersion").unwrap_or_default();
            let (group_name, version) = api_version
                .split_once('/')
                .unwrap_or(("", api_version.as_str()));
            let gvk = json!({"group": group_name, "kind": kind, "version": version});
            let entry = match (custom_resource, label) {
                (true, None) => json!({"groupVersionKind": gvk}),
                (true, Some(l)) => {
                    let selector = LabelSelector::from_pair(l).ok_or_else(|| {
                        ToolkitError::validation(format!("'{l}' is not a 'key=value' label"))
                    })?;
                    json!({"groupVersionKind": gvk, "labelSelector": selector})
                }
                (false, None) => json!({"GVK": gvk}),
                (false, Some(l)) => json!({"GVK": gvk, "labelSelectors": [l]}),
            };
            out.push(entry);
        }
    }
    if out.is_empty() && !arguments.is_empty() {
        return Err(ToolkitError::validation(
            "matching clusterScopedResource kind not found, please ensure the kind is correct \
             via 'list apiresources'",
        ));
    }
    Ok(out)
}

/* ============================= YAML ============================= */

/// Dump `value` as YAML with every line indented by `prepend` spaces.
pub fn prepend_dump(value: &Value, prepend: usize) -> Result<String> {
    let yaml = serde_yaml::to_string(value)?;
    let pad = " ".repeat(prepend);
    Ok(yaml
        .lines()
        .map(|l| format!("{pad}{l}"))
        .collect::<Vec<_>>()
        .join("\n"))
}

/* ============================= CREDENTIALS ============================= */

fn normalise_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

fn find_key(value: &Value, wanted: &str) -> Option<String> {
    match value {
        Value::Object(map) => map.iter().find_map(|(k, v)| {
            if normalise_key(k) == wanted {
                v.as_str().map(str::to_string)
            } else {
                find_key(v, wanted)
            }
        }),
        Value::Array(items) => items.iter().find_map(|v| find_key(v, wanted)),
        _ => None,
    }
}

/// Pull `AccessKeyId` / `SecretAccessKey` out of a cloud credential document,
/// wherever they are nested.
pub fn extract_aws_keys(credential: &Value) -> Option<(String, String)> {
    Some((
        find_key(credential, "accesskeyid")?,
        find_key(credential, "secretaccesskey")?,
    ))
}

/* ============================= CROSS CLUSTER ============================= */

/// Two clients point at the same cluster when their `kube-system` uids agree.
pub async fn same_k8s_cluster(a: &KubeClient, b: &KubeClient) -> Result<bool> {
    Ok(a.cluster_uid().await? == b.cluster_uid().await?)
}

fn items(listing: &Value) -> &[Value] {
    listing
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Find an appVault present on both clusters (same `status.uid`).
///
/// With `source_name`, only that source appVault is considered.
pub fn get_common_app_vault(
    source: &Value,
    destination: &Value,
    source_name: Option<&str>,
) -> Result<(Value, Value)> {
    for src in items(source) {
        if let Some(name) = source_name {
            if lookup(src, "metadata.name").as_deref() != Some(name) {
                continue;
            }
        }
        let Some(uid) = lookup(src, "status.uid") else {
            continue;
        };
        if let Some(dst) = items(destination)
            .iter()
            .find(|d| lookup(d, "status.uid").as_deref() == Some(uid.as_str()))
        {
            return Ok((src.clone(), dst.clone()));
        }
    }
    Err(ToolkitError::validation(match source_name {
        Some(name) => format!("appVault '{name}' is not present on the destination cluster"),
        None => "no appVault is shared by the source and destination clusters".to_string(),
    }))
}

/// Destination-cluster name of the appVault known as `source_name` on the source.
pub fn swap_app_vault_ref(
    source_name: &str,
    source: &Value,
    destination: &Value,
) -> Result<String> {
    let (_, dst) = get_common_app_vault(source, destination, Some(source_name))?;
    lookup(&dst, "metadata.name")
        .ok_or_else(|| ToolkitError::validation("destination appVault has no name"))
}

/// Concatenate the items of several listings, dropping exact duplicates.
pub fn combine_resources(listings: &[Value]) -> Value {
    let mut seen = BTreeSet::new();
    let mut combined = Vec::new();
    for item in listings.iter().flat_map(items) {
        if seen.insert(item.to_string()) {
            combined.push(item.clone());
        }
    }
    json!({ "items": combined })
}

/* ============================= CONNECTOR ============================= */

const OPERATOR_RELEASES: &str = "https://github.com/NetApp/astra-connector-operator/releases";
const OPERATOR_FILE: &str = "astraconnector_operator.yaml";

/// Release URL of the connector operator manifest for `version`.
pub fn operator_url(version: &str) -> String {
    if version == "latest" {
        format!("{OPERATOR_RELEASES}/latest/download/{OPERATOR_FILE}")
    } else if version.contains("-main") {
        format!("{OPERATOR_RELEASES}/download/{version}/{OPERATOR_FILE}")
    } else {
        format!("{OPERATOR_RELEASES}/download/{version}-main/{OPERATOR_FILE}")
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rfc1123() {
        assert!(is_rfc1123("my-name").is_ok());
        assert!(is_rfc1123("123-abc").is_ok());
        assert!(is_rfc1123("a").is_ok());
        assert!(is_rfc1123("-abc").is_err());
        assert!(is_rfc1123("abc-").is_err());
        assert!(is_rfc1123("Abc").is_err());
        assert!(is_rfc1123("a.b").is_err());
        assert!(is_rfc1123("").is_err());
        assert!(is_rfc1123(&"a".repeat(63)).is_ok());
        assert!(is_rfc1123(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_rfc1123_idempotent() {
        let once = is_rfc1123("wp-clone").unwrap();
        assert_eq!(is_rfc1123(&once).unwrap(), once);
    }

    #[test]
    fn test_single_namespace_mapping() {
        let m = create_namespace_mapping(&ns(&["wp"]), Some("wp2"), &[]).unwrap().unwrap();
        assert_eq!(
            m,
            vec![NamespaceMapping {
                source: "wp".into(),
                destination: "wp2".into()
            }]
        );
        assert!(create_namespace_mapping(&ns(&["wp"]), None, &[]).unwrap().is_none());
    }

    #[test]
    fn test_multi_namespace_requires_mapping() {
        let err = create_namespace_mapping(&ns(&["a", "b"]), Some("x"), &[]).unwrap_err();
        assert!(err.to_string().contains("--multiNsMapping"));
    }

    #[test]
    fn test_multi_namespace_mapping() {
        let m = create_namespace_mapping(
            &ns(&["ns1", "ns2"]),
            None,
            &["ns1=ns1r,ns2=ns2r".to_string()],
        )
        .unwrap()
        .unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m[1].destination, "ns2r");
    }

    #[test]
    fn test_multi_namespace_mismatch() {
        let err = create_namespace_mapping(
            &ns(&["ns1", "ns3"]),
            None,
            &["ns1=ns1r".to_string(), "ns2=ns2r".to_string()],
        )
        .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("source namespaces"));
        assert!(err.to_string().contains("do not match"));
    }

    #[test]
    fn test_update_namespace_spec() {
        let mut spec = json!({"includedNamespaces": [
            {"namespace": "ns1", "labelSelector": {}},
            {"namespace": "ns2"},
        ]});
        let mapping = vec![NamespaceMapping {
            source: "ns2".into(),
            destination: "ns2-clone".into(),
        }];
        update_namespace_spec(&mapping, &mut spec);
        assert_eq!(spec["includedNamespaces"][0]["namespace"], "ns1");
        assert_eq!(spec["includedNamespaces"][1]["namespace"], "ns2-clone");
    }

    fn assets() -> Value {
        json!({"items": [
            {"GVK": {"group": "apps", "version": "v1", "kind": "Deployment"}},
            {"GVK": {"group": "", "version": "v1", "kind": "Service"}},
        ]})
    }

    #[test]
    fn test_filter_set_rest_shape() {
        let f = create_filter_set(
            Some(FilterSelection::Include),
            &[
                "group=apps,version=v1,kind=Deployment".to_string(),
                "label=app.kubernetes.io/tier=backend,name=mysql,namespace=wordpress".to_string(),
            ],
            Some(&assets()),
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(f["resourceSelectionCriteria"], "include");
        assert_eq!(f["GVKN"][0]["kind"], "Deployment");
        assert_eq!(f["GVKN"][1]["labelSelectors"][0], "app.kubernetes.io/tier=backend");
        assert_eq!(f["GVKN"][1]["names"][0], "mysql");
        assert_eq!(f["GVKN"][1]["namespaces"][0], "wordpress");
    }

    #[test]
    fn test_filter_set_custom_resource_shape() {
        let f = create_filter_set(
            Some(FilterSelection::Exclude),
            &["kind=Service".to_string()],
            None,
            true,
        )
        .unwrap()
        .unwrap();
        assert_eq!(f["resourceSelectionCriteria"], "Exclude");
        assert_eq!(f["resourceMatchers"][0]["kind"], "Service");
    }

    #[test]
    fn test_filter_set_duplicate_key() {
        let err = create_filter_set(
            Some(FilterSelection::Include),
            &["kind=Deployment,kind=Service".to_string()],
            None,
            false,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "'kind' should not be specified multiple times within a single --filterSet arg"
        );
    }

    #[test]
    fn test_filter_set_gvk_validation() {
        let bad_kind = create_filter_set(
            Some(FilterSelection::Include),
            &["kind=StatefulSet".to_string()],
            Some(&assets()),
            false,
        );
        assert!(bad_kind.is_err());
        let bad_pair = create_filter_set(
            Some(FilterSelection::Include),
            &["group=apps,kind=Service".to_string()],
            Some(&assets()),
            false,
        )
        .unwrap_err();
        assert!(bad_pair.to_string().contains("does not match with"));
    }

    #[test]
    fn test_filter_set_requires_both_flags() {
        assert!(create_filter_set(None, &[], None, false).unwrap().is_none());
        assert!(create_filter_set(None, &["kind=x".to_string()], None, false).is_err());
        assert!(create_filter_set(Some(FilterSelection::Include), &[], None, false).is_err());
    }

    #[test]
    fn test_criteria_list_order() {
        let list = create_criteria_list(
            &["mariadb".to_string()],
            &[],
            &["web-0".to_string()],
            &[],
            &["db".to_string()],
        );
        let types: Vec<_> = list.iter().map(|c| c.criterion_type.as_str()).collect();
        assert_eq!(types, vec!["containerImage", "podName", "containerName"]);
    }

    #[test]
    fn test_hook_list_flattens() {
        let args = vec![
            vec!["arg1 s_arg".to_string(), "arg2".to_string()],
            vec!["arg3".to_string()],
        ];
        assert_eq!(create_hook_list(&args), vec!["arg1 s_arg", "arg2", "arg3"]);
    }

    #[test]
    fn test_constraint_list() {
        assert_eq!(create_constraint_list(&[], &[]), vec!["*"]);
        assert_eq!(
            create_constraint_list(&["n1".to_string()], &["app=x".to_string()]),
            vec!["namespaces:id='n1'.*", "namespaces:kubernetesLabels='app=x'.*"]
        );
    }

    #[test]
    fn test_namespace_list_shapes() {
        let args = vec![vec!["ns2".to_string()], vec!["ns3".to_string(), "app=x".to_string()]];
        let v1 = create_namespace_list(&args, false).unwrap();
        assert_eq!(v1[1]["labelSelectors"][0], "app=x");
        let v3 = create_namespace_list(&args, true).unwrap();
        assert_eq!(v3[1]["labelSelector"]["matchLabels"]["app"], "x");
        assert!(create_namespace_list(&[ns(&["a", "b", "c"])], false).is_err());
    }

    #[test]
    fn test_csr_list() {
        let args = vec![vec!["ClusterRole".to_string(), "app=x".to_string()]];
        let v3 = create_csr_list(&args, &allowed_cluster_scoped_resources(), true).unwrap();
        assert_eq!(v3[0]["groupVersionKind"]["group"], "rbac.authorization.k8s.io");
        assert_eq!(v3[0]["labelSelector"]["matchLabels"]["app"], "x");
        let v1 = create_csr_list(&args, &allowed_cluster_scoped_resources(), false).unwrap();
        assert_eq!(v1[0]["GVK"]["version"], "v1");
        let err = create_csr_list(
            &[vec!["Pod".to_string()]],
            &allowed_cluster_scoped_resources(),
            true,
        )
        .unwrap_err();
        assert!(err.to_string().contains("matching clusterScopedResource kind not found"));
    }

    #[test]
    fn test_prepend_dump_preserves_yaml() {
        let value = json!({"a": {"b": [1, 2]}});
        let dumped = prepend_dump(&value, 4).unwrap();
        assert!(dumped.lines().all(|l| l.starts_with("    ")));
        let reparsed: Value = serde_yaml::from_str(&dumped).unwrap();
        assert_eq!(reparsed, value);
    }

    #[test]
    fn test_extract_aws_keys_nested() {
        let cred = json!({"Credentials": {"profile": {
            "AccessKeyId": "AKIA", "SecretAccessKey": "s3cr3t"
        }}});
        assert_eq!(
            extract_aws_keys(&cred),
            Some(("AKIA".to_string(), "s3cr3t".to_string()))
        );
        assert_eq!(extract_aws_keys(&json!({"other": 1})), None);
    }

    #[test]
    fn test_common_app_vault_by_uid() {
        let src = json!({"items": [
            {"metadata": {"name": "vault-a"}, "status": {"uid": "u1"}},
            {"metadata": {"name": "vault-b"}, "status": {"uid": "u2"}},
        ]});
        let dst = json!({"items": [
            {"metadata": {"name": "dest-vault"}, "status": {"uid": "u2"}},
        ]});
        let (s, d) = get_common_app_vault(&src, &dst, None).unwrap();
        assert_eq!(s["status"]["uid"], d["status"]["uid"]);
        assert_eq!(swap_app_vault_ref("vault-b", &src, &dst).unwrap(), "dest-vault");
        assert!(swap_app_vault_ref("vault-a", &src, &dst).is_err());
    }

    #[test]
    fn test_combine_resources() {
        let a = json!({"items": [{"id": 1}, {"id": 2}]});
        let b = json!({"items": [{"id": 2}, {"id": 3}]});
        assert_eq!(combine_resources(&[a, b])["items"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_operator_url() {
        assert_eq!(
            operator_url("latest"),
            "https://github.com/NetApp/astra-connector-operator/releases/latest/download/astraconnector_operator.yaml"
        );
        let pinned = "/download/202403-main/astraconnector_operator.yaml";
        assert!(operator_url("202403-main").ends_with(pinned));
        assert!(operator_url("202403").ends_with(pinned));
    }
}
