use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};

use super::CRED_TYPE_LABEL;
use crate::cache::Collection;
use crate::choices::list_collection;
use crate::cli::ListTarget;
use crate::error::{Result, ToolkitError};
use crate::output::TableSpec;
use crate::path::{Filter, apply_filters, lookup};
use crate::session::Session;
use crate::surface::ListScope;

/* ============================= TABLES ============================= */

/// Columns printed for `collection` in table mode.
pub fn table_for(collection: Collection, v3: bool) -> TableSpec {
    if v3 {
        return custom_resource_table(collection);
    }
    TableSpec::new(match collection {
        Collection::ApiResources => &[
            ("apiVersion", "apiVersion"),
            ("kind", "kind"),
            ("clusterID", "clusterID"),
        ],
        Collection::Apps => &[
            ("appName", "name"),
            ("appID", "id"),
            ("clusterName", "clusterName"),
            ("namespace", "namespaceScopedResources[].namespace"),
            ("state", "state"),
        ],
        Collection::Assets => &[
            ("assetName", "assetName"),
            ("assetType", "assetType"),
            ("group", "GVK.group"),
            ("version", "GVK.version"),
            ("kind", "GVK.kind"),
        ],
        Collection::Asups => &[
            ("asupID", "id"),
            ("upload", "upload"),
            ("uploadState", "uploadState"),
            ("dataWindowStart", "dataWindowStart"),
            ("dataWindowEnd", "dataWindowEnd"),
        ],
        Collection::Backups => &[
            ("appID", "appID"),
            ("backupName", "name"),
            ("backupID", "id"),
            ("backupState", "state"),
            ("creationTimestamp", "metadata.creationTimestamp"),
        ],
        Collection::Buckets => &[
            ("bucketID", "id"),
            ("name", "name"),
            ("credentialID", "credentialID"),
            ("provider", "provider"),
            ("state", "state"),
        ],
        Collection::Clouds => &[
            ("cloudName", "name"),
            ("cloudID", "id"),
            ("cloudType", "cloudType"),
        ],
        Collection::Clusters => &[
            ("clusterName", "name"),
            ("clusterID", "id"),
            ("clusterType", "clusterType"),
            ("location", "location"),
            ("managedState", "managedState"),
            ("tridentState", "tridentManagedStateAllowed"),
            ("tridentVersion", "tridentVersion"),
        ],
        Collection::Credentials => &[
            ("credentialID", "id"),
            ("credentialName", "name"),
            ("keyType", "keyType"),
        ],
        Collection::Groups => &[
            ("groupID", "id"),
            ("authID", "authID"),
            ("authProvider", "authProvider"),
        ],
        Collection::Hooks => &[
            ("appID", "appID"),
            ("hookID", "id"),
            ("name", "name"),
            ("stage", "stage"),
            ("action", "action"),
            ("enabled", "enabled"),
        ],
        Collection::LdapGroups => &[("dn", "dn"), ("cn", "cn")],
        Collection::LdapUsers => &[
            ("email", "email"),
            ("firstName", "firstName"),
            ("lastName", "lastName"),
            ("dn", "dn"),
        ],
        Collection::Namespaces => &[
            ("namespaceName", "name"),
            ("namespaceID", "id"),
            ("namespaceState", "namespaceState"),
            ("associatedApps", "associatedApps[]"),
            ("clusterID", "clusterID"),
        ],
        Collection::Notifications => &[
            ("notificationID", "id"),
            ("summary", "summary"),
            ("severity", "severity"),
            ("eventTime", "eventTime"),
        ],
        Collection::Protections => &[
            ("appID", "appID"),
            ("protectionID", "id"),
            ("granularity", "granularity"),
            ("minute", "minute"),
            ("hour", "hour"),
            ("dayOfWeek", "dayOfWeek"),
            ("dayOfMonth", "dayOfMonth"),
            ("snapRetention", "snapshotRetention"),
            ("backupRetention", "backupRetention"),
        ],
        Collection::Replications => &[
            ("replicationID", "id"),
            ("sourceAppID", "sourceAppID"),
            ("state", "state"),
            ("sourceClusterID", "sourceClusterID"),
            ("destinationClusterID", "destinationClusterID"),
            ("destinationAppID", "destinationAppID"),
        ],
        Collection::RoleBindings => &[
            ("roleBindingID", "id"),
            ("principalType", "principalType"),
            ("userID", "userID"),
            ("role", "role"),
            ("roleConstraints", "roleConstraints"),
        ],
        Collection::Scripts => &[
            ("scriptName", "name"),
            ("scriptID", "id"),
            ("description", "description"),
        ],
        Collection::Settings => &[
            ("settingID", "id"),
            ("name", "name"),
            ("isEnabled", "currentConfig.isEnabled"),
            ("state", "state"),
        ],
        Collection::Snapshots => &[
            ("appID", "appID"),
            ("snapshotName", "name"),
            ("snapshotID", "id"),
            ("snapshotState", "state"),
            ("creationTimestamp", "metadata.creationTimestamp"),
        ],
        Collection::StorageBackends => &[
            ("backendName", "backendName"),
            ("backendID", "id"),
            ("backendType", "backendType"),
            ("backendState", "backendState"),
        ],
        Collection::StorageClasses => &[
            ("cloud", "cloudType"),
            ("cluster", "clusterName"),
            ("storageclassID", "id"),
            ("storageclassName", "name"),
        ],
        Collection::Users => &[
            ("userID", "id"),
            ("email", "email"),
            ("firstName", "firstName"),
            ("lastName", "lastName"),
            ("authProvider", "authProvider"),
        ],
        Collection::Connectors
        | Collection::HooksRuns
        | Collection::InplaceRestores
        | Collection::Restores => return custom_resource_table(collection),
    })
}

fn custom_resource_table(collection: Collection) -> TableSpec {
    TableSpec::new(match collection {
        Collection::Apps => &[
            ("name", "metadata.name"),
            ("namespaces", "spec.includedNamespaces[].namespace"),
            ("state", "status.state"),
            ("created", "metadata.creationTimestamp"),
        ],
        Collection::Asups => &[
            ("name", "metadata.name"),
            ("trigger", "spec.triggerType"),
            ("upload", "spec.uploadEnabled"),
            ("state", "status.state"),
            ("created", "metadata.creationTimestamp"),
        ],
        Collection::Backups | Collection::Snapshots => &[
            ("name", "metadata.name"),
            ("app", "spec.applicationRef"),
            ("appVault", "spec.appVaultRef"),
            ("state", "status.state"),
            ("created", "metadata.creationTimestamp"),
        ],
        Collection::Buckets => &[
            ("name", "metadata.name"),
            ("provider", "spec.providerType"),
            ("state", "status.state"),
            ("uid", "status.uid"),
        ],
        Collection::Connectors => &[
            ("name", "metadata.name"),
            ("clusterName", "spec.astra.clusterName"),
            ("accountID", "spec.astra.accountId"),
            ("created", "metadata.creationTimestamp"),
        ],
        Collection::Credentials => &[
            ("name", "metadata.name"),
            ("type", "type"),
            ("keys", "data.KEYS"),
            ("created", "metadata.creationTimestamp"),
        ],
        Collection::Hooks => &[
            ("name", "metadata.name"),
            ("app", "spec.applicationRef"),
            ("stage", "spec.stage"),
            ("action", "spec.action"),
            ("enabled", "spec.enabled"),
        ],
        Collection::HooksRuns => &[
            ("name", "metadata.name"),
            ("app", "spec.applicationRef"),
            ("stage", "spec.stage"),
            ("action", "spec.action"),
            ("state", "status.state"),
        ],
        Collection::Namespaces => &[
            ("name", "metadata.name"),
            ("phase", "status.phase"),
            ("created", "metadata.creationTimestamp"),
        ],
        Collection::Protections => &[
            ("name", "metadata.name"),
            ("app", "spec.applicationRef"),
            ("granularity", "spec.granularity"),
            ("minute", "spec.minute"),
            ("hour", "spec.hour"),
            ("dayOfWeek", "spec.dayOfWeek"),
            ("dayOfMonth", "spec.dayOfMonth"),
            ("snapshotRetention", "spec.snapshotRetention"),
            ("backupRetention", "spec.backupRetention"),
        ],
        Collection::Restores | Collection::InplaceRestores => &[
            ("name", "metadata.name"),
            ("kind", "kind"),
            ("appVault", "spec.appVaultRef"),
            ("state", "status.state"),
            ("created", "metadata.creationTimestamp"),
        ],
        Collection::StorageClasses => &[
            ("name", "metadata.name"),
            ("provisioner", "provisioner"),
            ("reclaimPolicy", "reclaimPolicy"),
            ("volumeBindingMode", "volumeBindingMode"),
        ],
        _ => &[("name", "metadata.name"), ("created", "metadata.creationTimestamp")],
    })
}

/* ============================= FILTER HELPERS ============================= */

fn items_mut(listing: &mut Value) -> Option<&mut Vec<Value>> {
    listing.get_mut("items").and_then(Value::as_array_mut)
}

/// True when the timestamp at `path` lies within the last `minutes`.
/// Items without a parseable timestamp are dropped.
pub fn within_minutes(item: &Value, path: &str, minutes: i64, now: DateTime<Utc>) -> bool {
    lookup(item, path)
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .is_some_and(|t| {
            now.signed_duration_since(t.with_timezone(&Utc)) <= Duration::minutes(minutes)
        })
}

fn retain(listing: &mut Value, keep: impl FnMut(&Value) -> bool) {
    if let Some(items) = items_mut(listing) {
        items.retain(keep);
    }
}

fn has_label(item: &Value, name: &str, value: &str) -> bool {
    item.pointer("/metadata/labels")
        .and_then(Value::as_array)
        .is_some_and(|labels| {
            labels.iter().any(|l| {
                l.get("name").and_then(Value::as_str) == Some(name)
                    && l.get("value").and_then(Value::as_str) == Some(value)
            })
        })
}

/// Namespaces every node cluster ships with; hidden from v1 listings.
const V1_SYSTEM_NAMESPACES: [&str; 4] =
    ["kube-node-lease", "kube-public", "kube-system", "trident"];

/// Stamp `associatedApps` onto each namespace from the apps listing.
pub fn associate_apps(namespaces: &mut Value, apps: &[Value]) {
    let Some(items) = items_mut(namespaces) else {
        return;
    };
    for ns in items.iter_mut() {
        let name = lookup(ns, "name").unwrap_or_default();
        let cluster = lookup(ns, "clusterID").unwrap_or_default();
        let associated: Vec<String> = apps
            .iter()
            .filter(|app| lookup(app, "clusterID").as_deref() == Some(cluster.as_str()))
            .filter(|app| {
                app.get("namespaceScopedResources")
                    .and_then(Value::as_array)
                    .is_some_and(|r| {
                        r.iter()
                            .any(|n| lookup(n, "namespace").as_deref() == Some(&name))
                    })
            })
            .filter_map(|app| lookup(app, "name"))
            .collect();
        ns["associatedApps"] = json!(associated);
    }
}

/* ============================= RUN ============================= */

pub async fn run(session: &mut Session, target: &ListTarget) -> Result<()> {
    let collection = list_collection(target);
    let v3 = session.is_v3();
    let mut scope = ListScope::default();
    let mut filters = Vec::new();

    match target {
        ListTarget::ApiResources { cluster } => {
            if let Some(c) = cluster {
                scope.cluster = Some(session.resolve_id(Collection::Clusters, c).await?);
            }
        }
        ListTarget::Apps { namespace, name_filter, cluster } => {
            let (ns_key, name_key) = if v3 {
                ("spec.includedNamespaces[].namespace", "metadata.name")
            } else {
                ("namespaceScopedResources[].namespace", "name")
            };
            if let Some(ns) = namespace {
                filters.push(Filter::equals(ns_key, ns.as_str())?);
            }
            if let Some(name) = name_filter {
                filters.push(Filter::substring(name_key, name.as_str())?);
            }
            if let (Some(c), false) = (cluster, v3) {
                let id = session.resolve_id(Collection::Clusters, c).await?;
                filters.push(Filter::equals("clusterID", id)?);
            }
        }
        ListTarget::Assets { app } => {
            scope.app = Some(session.resolve_id(Collection::Apps, app).await?);
        }
        ListTarget::Backups(f)
        | ListTarget::Snapshots(f)
        | ListTarget::Hooks(f)
        | ListTarget::HooksRuns(f)
        | ListTarget::Protections(f)
        | ListTarget::Restores(f)
        | ListTarget::InplaceRestores(f) => {
            if let Some(app) = &f.app {
                scope.app = Some(session.resolve_id(Collection::Apps, app).await?);
            }
        }
        ListTarget::Replications(f) => {
            if let Some(app) = &f.app {
                let id = session.resolve_id(Collection::Apps, app).await?;
                filters.push(Filter::equals("sourceAppID", id)?);
            }
        }
        ListTarget::Clouds { cloud_type } => {
            if let Some(t) = cloud_type {
                filters.push(Filter::equals("cloudType", t.as_str())?);
            }
        }
        ListTarget::Notifications { limit, offset, severity, .. } => {
            scope.params = vec![
                ("orderBy".into(), "eventTime desc".into()),
                ("count".into(), "true".into()),
            ];
            if let Some(l) = limit.filter(|l| *l > 0) {
                scope.params.push(("limit".into(), l.to_string()));
            }
            if let Some(o) = offset {
                scope.params.push(("skip".into(), o.to_string()));
            }
            if let Some(s) = severity {
                filters.push(Filter::equals("severity", s.as_str())?);
            }
        }
        ListTarget::Namespaces { cluster_id, show_system, .. } => {
            scope.show_system = *show_system;
            if let (Some(c), false) = (cluster_id, v3) {
                let id = session.resolve_id(Collection::Clusters, c).await?;
                filters.push(Filter::equals("clusterID", id)?);
            }
        }
        ListTarget::Scripts { name_filter, get_script_source } => {
            if let Some(script) = get_script_source {
                return print_script_source(session, script).await;
            }
            if let Some(name) = name_filter {
                filters.push(Filter::substring("name", name.as_str())?);
            }
        }
        ListTarget::StorageClasses { cloud_type, cluster } => {
            if !v3 {
                if let Some(c) = cluster {
                    scope.cluster = Some(session.resolve_id(Collection::Clusters, c).await?);
                }
                if let Some(t) = cloud_type {
                    filters.push(Filter::equals("cloudType", t.as_str())?);
                }
            }
        }
        _ => {}
    }

    let mut listing = session.surface.list(collection, &scope).await?;
    apply_filters(&mut listing, &filters);
    post_filter(session, target, &mut listing, v3).await?;
    session.emit(&listing, Some(&table_for(collection, v3)))
}

/// Filters that need more than a single path comparison.
async fn post_filter(
    session: &mut Session,
    target: &ListTarget,
    listing: &mut Value,
    v3: bool,
) -> Result<()> {
    let now = Utc::now();
    match target {
        ListTarget::Buckets { name_filter, provider } => {
            let (name_key, provider_key) = if v3 {
                ("metadata.name", "spec.providerType")
            } else {
                ("name", "provider")
            };
            if let Some(name) = name_filter.as_ref().map(|n| n.to_lowercase()) {
                retain(listing, |b| {
                    lookup(b, name_key).is_some_and(|n| n.to_lowercase().contains(&name))
                });
            }
            if let Some(p) = provider {
                retain(listing, |b| lookup(b, provider_key).as_deref() == Some(p.as_str()));
            }
        }
        ListTarget::Clusters { hide_managed, hide_unmanaged, name_filter } => {
            retain(listing, |c| {
                let managed = lookup(c, "managedState").as_deref() == Some("managed");
                let named = name_filter
                    .as_ref()
                    .is_none_or(|f| lookup(c, "name").is_some_and(|n| n.contains(f.as_str())));
                named && !(*hide_managed && managed) && !(*hide_unmanaged && !managed)
            });
        }
        ListTarget::Credentials { kubeconfig_only } => {
            if *kubeconfig_only && !v3 {
                retain(listing, |c| has_label(c, CRED_TYPE_LABEL, "kubeconfig"));
            }
        }
        ListTarget::Namespaces {
            name_filter,
            show_removed,
            unassociated,
            minutes,
            ..
        } => {
            if v3 {
                if let Some(name) = name_filter {
                    retain(listing, |n| {
                        lookup(n, "metadata.name").is_some_and(|x| x.contains(name.as_str()))
                    });
                }
                if let Some(m) = minutes {
                    retain(listing, |n| within_minutes(n, "metadata.creationTimestamp", *m, now));
                }
                return Ok(());
            }
            session.fetch(Collection::Apps).await?;
            associate_apps(listing, session.cache.items(Collection::Apps));
            session.fetch(Collection::Clusters).await?;
            let managed = session
                .cache
                .build_list(Collection::Clusters, "id", Some(("managedState", "managed")));
            retain(listing, |ns| {
                let name = lookup(ns, "name").unwrap_or_default();
                let system = lookup(ns, "systemType").is_some_and(|s| !s.is_empty() && s != "false")
                    || V1_SYSTEM_NAMESPACES.contains(&name.as_str());
                let removed = lookup(ns, "namespaceState").as_deref() == Some("removed");
                let has_apps = ns
                    .get("associatedApps")
                    .and_then(Value::as_array)
                    .is_some_and(|a| !a.is_empty());
                !system
                    && name_filter.as_ref().is_none_or(|f| name.contains(f.as_str()))
                    && (*show_removed || !removed)
                    && lookup(ns, "clusterID").is_some_and(|c| managed.contains(&c))
                    && !(*unassociated && has_apps)
                    && minutes
                        .is_none_or(|m| within_minutes(ns, "metadata.creationTimestamp", m, now))
            });
        }
        ListTarget::Notifications { minutes: Some(m), .. } => {
            retain(listing, |n| within_minutes(n, "eventTime", *m, now));
        }
        ListTarget::RoleBindings { id_filter: Some(id) } => {
            retain(listing, |rb| {
                lookup(rb, "userID").as_deref() == Some(id.as_str())
                    || lookup(rb, "groupID").as_deref() == Some(id.as_str())
            });
        }
        ListTarget::Users { name_filter: Some(f) } => {
            let f = f.to_lowercase();
            retain(listing, |u| {
                ["email", "firstName", "lastName"]
                    .iter()
                    .filter_map(|k| lookup(u, k))
                    .any(|v| v.to_lowercase().contains(&f))
            });
        }
        _ => {}
    }
    Ok(())
}

/// `list scripts --getScriptSource NAME`: print the decoded script body.
async fn print_script_source(session: &mut Session, script: &str) -> Result<()> {
    let record = session.find(Collection::Scripts, script).await?;
    let encoded = lookup(&record, "source").unwrap_or_default();
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| {
            ToolkitError::validation(format!("script '{script}' source is not base64: {e}"))
        })?;
    session.out.line(String::from_utf8_lossy(&decoded));
    Ok(())
}

/* ============================= TESTS ============================= */
