use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::cache::Collection;
use crate::cli::{CloneArgs, FilterArgs, NamespaceArgs, PollArgs, RestoreArgs};
use crate::config::KubeTarget;
use crate::crd::{
    ApplicationSpec, Backup, BackupRestore, BackupSpec, NamespaceMapping, Snapshot,
    SnapshotRestore, SnapshotSpec,
};
use crate::error::{Result, ToolkitError};
use crate::helpers::{
    create_filter_set, create_namespace_mapping, get_common_app_vault, is_rfc1123,
    same_k8s_cluster, swap_app_vault_ref, update_namespace_spec,
};
use crate::kube_client::{CONNECTOR_NAMESPACE, DryRun, Gvr, KubeClient};
use crate::path::{KeyPath, lookup, scalar_string};
use crate::rest::{endpoints, media};
use crate::session::Session;
use crate::surface::{ListScope, ResourceClient, custom_resource_gvr};
use crate::templates::{
    self, ObjectName, RestoreSource, fallback_ingress_class, first_available_app_vault,
    retarget_ingress_class,
};
use crate::waiter::TerminalStates;

const INGRESS_CONTROLLERS: [&str; 2] = ["nginx-ingress-controller", "ingress-nginx-controller"];
const ARCHIVE_POLLS: u32 = 20;

/// A data protection is usable as a restore source once its archive path is set.
const ARCHIVED: TerminalStates = TerminalStates {
    success: &["archived"],
    failure: &["Failed", "Error"],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Clone,
    Restore,
}

impl Verb {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::Restore => "restore",
        }
    }
}

/// What every clone or restore needs, whichever surface carries it.
struct Job<'a> {
    verb: Verb,
    app_name: &'a str,
    cluster: Option<&'a str>,
    namespaces: &'a NamespaceArgs,
    storage_class: Option<&'a str>,
    filters: Option<&'a FilterArgs>,
    poll: &'a PollArgs,
}

pub async fn clone(session: &mut Session, args: &CloneArgs) -> Result<()> {
    let job = Job {
        verb: Verb::Clone,
        app_name: &args.app_name,
        cluster: args.cluster.as_deref(),
        namespaces: &args.namespaces,
        storage_class: args.new_storage_class.as_deref(),
        filters: None,
        poll: &args.poll,
    };
    if session.is_v3() {
        clone_v3(session, &args.source_app, &job).await
    } else {
        let source = session.resolve(Collection::Apps, &["id"], &args.source_app).await?;
        let origin = Origin::App(lookup(&source, "id").unwrap_or_default());
        submit_v1(session, &source, origin, &job).await
    }
}

pub async fn restore(session: &mut Session, args: &RestoreArgs) -> Result<()> {
    let job = Job {
        verb: Verb::Restore,
        app_name: &args.app_name,
        cluster: args.cluster.as_deref(),
        namespaces: &args.namespaces,
        storage_class: args.new_storage_class.as_deref(),
        filters: Some(&args.filters),
        poll: &args.poll,
    };
    // validated up front so a bad pairing fails before any lookups
    resource_filter(&args.filters, None, session.is_v3())?;
    if session.is_v3() {
        return restore_v3(session, &args.restore_source, &job).await;
    }

    let (origin, app_id) = find_protection_v1(session, &args.restore_source).await?;
    let source = session
        .resolve(Collection::Apps, &["id"], &app_id)
        .await
        .map_err(|_| {
            ToolkitError::validation(
                "the corresponding app was not found in the system, please check your inputs and try again",
            )
        })?;
    submit_v1(session, &source, origin, &job).await
}

/// Join each `--filterSet` occurrence into one `key=value,...` set and build
/// the resource filter.
pub(crate) fn resource_filter(
    filters: &FilterArgs,
    assets: Option<&Value>,
    custom_resource: bool,
) -> Result<Option<Value>> {
    let sets: Vec<String> = filters
        .filter_set
        .iter()
        .map(|parts| parts.join(","))
        .filter(|s| !s.is_empty())
        .collect();
    create_filter_set(filters.filter_selection, &sets, assets, custom_resource)
}

fn mapping(
    app_namespaces: &[String],
    namespaces: &NamespaceArgs,
) -> Result<Option<Vec<NamespaceMapping>>> {
    create_namespace_mapping(
        app_namespaces,
        namespaces.new_namespace.as_deref(),
        &namespaces.multi_ns_mapping,
    )
}

fn strings_at(doc: &Value, path: &str) -> Result<Vec<String>> {
    Ok(path
        .parse::<KeyPath>()?
        .resolve(doc)
        .iter()
        .filter_map(scalar_string)
        .collect())
}

/* ============================= V1 ============================= */

/// Where a v1 clone or restore reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    App(String),
    Backup(String),
    Snapshot(String),
}

/// Body for `POST k8s/v2/apps` creating an app from a live app, backup or snapshot.
fn clone_body(
    name: &str,
    cluster: &str,
    source_cluster: &str,
    origin: &Origin,
    namespace_mapping: Option<&[NamespaceMapping]>,
    storage_class: Option<&str>,
    restore_filter: Option<Value>,
) -> Result<Value> {
    let mut body = json!({
        "name": name,
        "clusterID": cluster,
        "sourceClusterID": source_cluster,
    });
    match origin {
        Origin::App(id) => body["sourceAppID"] = json!(id),
        Origin::Backup(id) => body["backupID"] = json!(id),
        Origin::Snapshot(id) => body["snapshotID"] = json!(id),
    }
    if let Some(m) = namespace_mapping {
        body["namespaceMapping"] = serde_json::to_value(m)?;
    }
    if let Some(sc) = storage_class {
        body["storageClass"] = json!(sc);
    }
    if let Some(filter) = restore_filter {
        body["restoreFilter"] = filter;
    }
    Ok(body)
}

/// Locate a backup or snapshot by id and return it with its owning app.
async fn find_protection_v1(session: &mut Session, id: &str) -> Result<(Origin, String)> {
    let mut found = Vec::new();
    for (collection, origin) in [
        (Collection::Backups, Origin::Backup(id.to_string())),
        (Collection::Snapshots, Origin::Snapshot(id.to_string())),
    ] {
        session.fetch(collection).await?;
        for record in session.cache.items(collection) {
            if lookup(record, "id").as_deref() == Some(id) {
                found.push((origin.clone(), lookup(record, "appID").unwrap_or_default()));
            }
        }
    }
    match found.as_slice() {
        [one] => Ok(one.clone()),
        _ => Err(ToolkitError::validation(format!(
            "the restoreSource '{id}' is not a valid backup or snapshot"
        ))),
    }
}

async fn submit_v1(
    session: &mut Session,
    source: &Value,
    origin: Origin,
    job: &Job<'_>,
) -> Result<()> {
    let name = is_rfc1123(job.app_name)?;
    let source_id = lookup(source, "id").unwrap_or_default();
    let source_cluster = lookup(source, "clusterID")
        .ok_or_else(|| ToolkitError::validation("the source app has no clusterID"))?;
    let cluster = job.cluster.map(str::to_string).unwrap_or_else(|| source_cluster.clone());
    let namespace_mapping = mapping(
        &strings_at(source, "namespaceScopedResources[].namespace")?,
        job.namespaces,
    )?;

    let assets = session
        .surface
        .list(Collection::Assets, &ListScope::app(&source_id))
        .await?;
    let restore_filter = match job.filters {
        Some(f) => resource_filter(f, Some(&assets), false)?,
        None => None,
    };
    if cluster != source_cluster {
        if let Some(controller) = ingress_controller(&assets, namespace_mapping.as_deref()) {
            copy_ingress_class(session, &controller, &source_cluster, &cluster).await?;
        }
    }

    let body = clone_body(
        &name,
        &cluster,
        &source_cluster,
        &origin,
        namespace_mapping.as_deref(),
        job.storage_class,
        restore_filter,
    )?;
    let rest = session.rest()?;
    let created = rest.post(endpoints::APPS, &media::APP, body).await?;
    let verb = job.verb.as_str();
    let app_id = lookup(&created, "id").unwrap_or_default();
    info!(verb, app = %app_id, cluster = %cluster, "app_restore_submitted");
    session.out.line(format!("Submitting {verb} succeeded."));
    if job.poll.background {
        session.out.line(format!(
            "Background {verb} flag selected, run 'list apps' to get status."
        ));
        return Ok(());
    }

    session
        .out
        .inline(format!("Waiting for {verb} to become available"));
    let endpoint = endpoints::app(&app_id);
    session
        .waiter(job.poll.poll_timer)
        .wait(&name, TerminalStates::APP, || {
            let endpoint = endpoint.clone();
            async move {
                let current = rest.get(&endpoint, &[]).await?;
                Ok(lookup(&current, "state"))
            }
        })
        .await?;
    session.cache.invalidate(Collection::Apps);
    Ok(())
}

/* ============================= INGRESS ============================= */

/// An nginx ingress controller pod found among an app's assets.
#[derive(Debug, Clone, PartialEq)]
struct IngressController {
    pod: String,
    /// Namespace the controller lands in on the destination.
    namespace: String,
    labels: Vec<(String, String)>,
}

fn ingress_controller(
    assets: &Value,
    mapping: Option<&[NamespaceMapping]>,
) -> Option<IngressController> {
    let items = assets.get("items").and_then(Value::as_array)?;
    let asset = items.iter().find(|a| {
        lookup(a, "assetType").as_deref() == Some("Pod")
            && lookup(a, "assetName")
                .is_some_and(|n| INGRESS_CONTROLLERS.iter().any(|c| n.contains(c)))
    })?;
    let namespace = lookup(asset, "namespace").unwrap_or_default();
    let namespace = match mapping {
        Some(m) => m
            .iter()
            .find(|m| m.source == namespace)
            .map(|m| m.destination.clone())
            .unwrap_or(namespace),
        None => namespace,
    };
    let labels = asset
        .get("labels")
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| Some((lookup(l, "name")?, lookup(l, "value")?)))
                .collect()
        })
        .unwrap_or_default();
    Some(IngressController {
        pod: lookup(asset, "assetName").unwrap_or_default(),
        namespace,
        labels,
    })
}

/// The source IngressClass whose labels the controller pod shares.
fn matching_ingress_class(classes: &Value, controller: &IngressController) -> Option<Value> {
    classes
        .get("items")
        .and_then(Value::as_array)?
        .iter()
        .find(|class| {
            lookup(class, "metadata.name").is_some_and(|n| n.contains("nginx"))
                && class
                    .pointer("/metadata/labels")
                    .and_then(Value::as_object)
                    .is_some_and(|labels| {
                        labels.iter().any(|(k, v)| {
                            controller
                                .labels
                                .iter()
                                .any(|(lk, lv)| lk == k && v.as_str() == Some(lv.as_str()))
                        })
                    })
        })
        .cloned()
}

/// Kube client for the context whose name contains the managed cluster's name.
async fn cluster_client(
    session: &mut Session,
    contexts: &[String],
    cluster_id: &str,
) -> Result<KubeClient> {
    let cluster = session.resolve(Collection::Clusters, &["id"], cluster_id).await?;
    let name = lookup(&cluster, "name").unwrap_or_default();
    let context = contexts
        .iter()
        .find(|c| !name.is_empty() && c.contains(&name))
        .ok_or_else(|| ToolkitError::not_found(format!("{cluster_id} not found in kubeconfig")))?;
    session.connect(&KubeTarget::Context(context.clone())).await
}

/// IngressClasses are cluster scoped and not part of the app, so a
/// cross-cluster clone of an nginx-fronted app needs one created first.
async fn copy_ingress_class(
    session: &mut Session,
    controller: &IngressController,
    source_cluster: &str,
    destination_cluster: &str,
) -> Result<()> {
    let contexts = session.connector.contexts().unwrap_or_default();
    let destination = cluster_client(session, &contexts, destination_cluster).await?;

    let copied = match cluster_client(session, &contexts, source_cluster).await {
        Ok(source) => source
            .list(&Gvr::ingress_classes(), None, &[])
            .await
            .ok()
            .and_then(|classes| matching_ingress_class(&classes, controller)),
        Err(e) => {
            debug!(error = %e, "ingress_source_unreachable");
            None
        }
    };
    let class = match copied {
        Some(class) => retarget_ingress_class(class, &controller.namespace),
        None => {
            warn!(pod = %controller.pod, "ingress_class_fallback");
            fallback_ingress_class(&controller.pod, &controller.namespace)?
        }
    };
    destination
        .create(&Gvr::ingress_classes(), None, class)
        .await?;
    info!(cluster = destination_cluster, namespace = %controller.namespace, "ingress_class_copied");
    Ok(())
}

/* ============================= V3 ============================= */

/// The destination of a v3 clone or restore: the session's own cluster or
/// another kube context.
struct Destination {
    kube: KubeClient,
    cross_cluster: bool,
}

async fn destination(session: &Session, cluster: Option<&str>) -> Result<Destination> {
    let source = session.kube()?;
    let Some(cluster) = cluster else {
        return Ok(Destination {
            kube: source.clone(),
            cross_cluster: false,
        });
    };
    let kube = session.connect(&KubeTarget::parse(Some(cluster))).await?;
    let cross_cluster = !same_k8s_cluster(source, &kube).await?;
    debug!(destination = kube.context(), cross_cluster, "clone_destination");
    Ok(Destination { kube, cross_cluster })
}

async fn app_vaults(kube: &KubeClient) -> Result<Value> {
    kube.list_collection(Collection::Buckets, &ListScope::default()).await
}

/// A live clone snapshots the app (backs it up when crossing clusters) and
/// then restores from that archive.
async fn clone_v3(session: &mut Session, source_app: &str, job: &Job<'_>) -> Result<()> {
    let dest = destination(session, job.cluster).await?;
    let kube = session.kube()?.clone();
    let source_vaults = session.fetch(Collection::Buckets).await?.clone();

    let (vault, dest_vault) = if dest.cross_cluster {
        let dest_vaults = app_vaults(&dest.kube).await?;
        let (src, dst) = get_common_app_vault(&source_vaults, &dest_vaults, None)?;
        (
            lookup(&src, "metadata.name").unwrap_or_default(),
            Some(lookup(&dst, "metadata.name").unwrap_or_default()),
        )
    } else {
        let src = first_available_app_vault(&source_vaults)?;
        (
            lookup(&src, "metadata.name").ok_or_else(ToolkitError::no_available_app_vault)?,
            None,
        )
    };

    let prefix = if dest.cross_cluster {
        format!("{source_app}-clone-backup-")
    } else {
        format!("{source_app}-clone-snapshot-")
    };
    let name = ObjectName::generated(prefix);
    let (gvr, doc) = if dest.cross_cluster {
        let spec = BackupSpec {
            application_ref: source_app.to_string(),
            app_vault_ref: vault,
            snapshot_ref: None,
            reclaim_policy: None,
        };
        (Gvr::of::<Backup>(), templates::backup(&name, spec)?)
    } else {
        let spec = SnapshotSpec {
            application_ref: source_app.to_string(),
            app_vault_ref: vault,
            reclaim_policy: None,
            created_timeout: None,
            ready_to_use_timeout: None,
        };
        (Gvr::of::<Snapshot>(), templates::snapshot(&name, spec)?)
    };

    if dest.cross_cluster && kube.dry_run() == DryRun::Client {
        session.out.comment(format!(
            "This must be applied on the source cluster specified by '{}'",
            kube.context()
        ));
    }
    let created = kube.create(&gvr, Some(CONNECTOR_NAMESPACE), doc).await?;
    let mut protection = match kube.dry_run() {
        DryRun::Off => wait_for_archive(session, &kube, &gvr, &created).await?,
        _ => with_placeholder_archive(created, &gvr.kind),
    };
    if let Some(dst) = dest_vault {
        protection["spec"]["appVaultRef"] = json!(dst);
    }
    submit_v3(session, &dest, &protection, job).await
}

async fn restore_v3(session: &mut Session, restore_source: &str, job: &Job<'_>) -> Result<()> {
    let mut protection = None;
    for collection in [Collection::Backups, Collection::Snapshots] {
        session.fetch(collection).await?;
        if let Some(doc) = session
            .cache
            .items(collection)
            .iter()
            .find(|d| lookup(d, "metadata.name").as_deref() == Some(restore_source))
        {
            protection = Some(doc.clone());
            break;
        }
    }
    let mut protection = protection.ok_or_else(|| {
        ToolkitError::validation(format!(
            "the restoreSource '{restore_source}' is not a valid backup or snapshot"
        ))
    })?;
    let dest = destination(session, job.cluster).await?;
    if dest.cross_cluster {
        if lookup(&protection, "kind").as_deref() != Some("Backup") {
            return Err(ToolkitError::validation(format!(
                "'{restore_source}' is a snapshot, only backups can be restored to a different cluster"
            )));
        }
        let vault = lookup(&protection, "spec.appVaultRef").unwrap_or_default();
        let source_vaults = session.fetch(Collection::Buckets).await?.clone();
        let swapped = swap_app_vault_ref(&vault, &source_vaults, &app_vaults(&dest.kube).await?)?;
        protection["spec"]["appVaultRef"] = json!(swapped);
    }
    submit_v3(session, &dest, &protection, job).await
}

/// Poll the new snapshot/backup until its archive path is published.
async fn wait_for_archive(
    session: &Session,
    kube: &KubeClient,
    gvr: &Gvr,
    created: &Value,
) -> Result<Value> {
    let name = lookup(created, "metadata.name")
        .ok_or_else(|| ToolkitError::not_found("created data protection has no name"))?;
    let object = name.as_str();
    session
        .waiter(1)
        .with_max_polls(ARCHIVE_POLLS)
        .wait(object, ARCHIVED, move || async move {
            let current = kube.get(gvr, object, Some(CONNECTOR_NAMESPACE)).await?;
            Ok(match lookup(&current, "status.appArchivePath") {
                Some(_) => Some("archived".to_string()),
                None => lookup(&current, "status.state"),
            })
        })
        .await?;
    kube.get(gvr, &name, Some(CONNECTOR_NAMESPACE)).await
}

/// Dry runs never produce an archive; stand in a path that must be replaced.
fn with_placeholder_archive(mut doc: Value, kind: &str) -> Value {
    doc["status"] = json!({
        "appArchivePath": format!(
            "placeholder/this-is-a-placeholder-field-which-must-be-replaced-with/{kind}.status.appArchivePath"
        ),
    });
    if doc.get("kind").is_none() {
        doc["kind"] = json!(kind);
    }
    doc
}

/// Render and submit the `{Kind}Restore` and `Application` documents.
async fn submit_v3(
    session: &mut Session,
    dest: &Destination,
    protection: &Value,
    job: &Job<'_>,
) -> Result<()> {
    let app_ref = lookup(protection, "spec.applicationRef").ok_or_else(|| {
        ToolkitError::validation("the restore source has no spec.applicationRef")
    })?;
    session.fetch(Collection::Apps).await?;
    let app = session.cache.get_single(Collection::Apps, "metadata.name", &app_ref)?.clone();

    let app_name = is_rfc1123(job.app_name)?;
    let namespaces = match (
        &job.namespaces.new_namespace,
        job.namespaces.multi_ns_mapping.is_empty(),
    ) {
        (None, true) => NamespaceArgs {
            new_namespace: Some(app_name.clone()),
            multi_ns_mapping: Vec::new(),
        },
        _ => job.namespaces.clone(),
    };
    let namespace_mapping = mapping(
        &strings_at(&app, "spec.includedNamespaces[].namespace")?,
        &namespaces,
    )?
    .unwrap_or_default();
    let filter = match job.filters {
        Some(f) => resource_filter(f, None, true)?,
        None => None,
    };

    let source = RestoreSource::from_document(protection)?;
    let restore_doc = templates::restore(
        &format!("{app_name}-restore-"),
        &source,
        namespace_mapping.clone(),
        job.storage_class,
        filter,
    )?;
    let mut spec = app.get("spec").cloned().unwrap_or_else(|| json!({}));
    update_namespace_spec(&namespace_mapping, &mut spec);
    let spec: ApplicationSpec = serde_json::from_value(spec)?;
    let app_doc = templates::application(&app_name, spec)?;

    if dest.cross_cluster && dest.kube.dry_run() == DryRun::Client {
        session.out.comment(format!(
            "This must be applied on the destination cluster specified by '{}'",
            dest.kube.context()
        ));
    }
    let restore_gvr = restore_gvr(&source.kind);
    dest.kube
        .create(&restore_gvr, Some(CONNECTOR_NAMESPACE), restore_doc)
        .await?;
    dest.kube
        .create(&custom_resource_gvr(Collection::Apps)?, Some(CONNECTOR_NAMESPACE), app_doc)
        .await?;
    if dest.kube.dry_run() == DryRun::Client {
        return Ok(());
    }
    let verb = job.verb.as_str();
    info!(verb, app = %app_name, destination = dest.kube.context(), "restore_submitted");
    session.out.line(format!("Submitting {verb} succeeded."));
    Ok(())
}

fn restore_gvr(kind: &str) -> Gvr {
    match kind {
        "Backup" => Gvr::of::<BackupRestore>(),
        _ => Gvr::of::<SnapshotRestore>(),
    }
}
