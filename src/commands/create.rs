use serde_json::{Value, json};
use tracing::{info, warn};

use super::{create_credential, credential_body, encode, id_of, read_file, read_kubeconfig, report};
use crate::cache::Collection;
use crate::cli::{
    CreateProtectionArgs, CreateTarget, HookCriteriaArgs, HookOperation, PollArgs, ReclaimPolicy,
    UserRole,
};
use crate::crd::{
    AutoSupportBundleSpec, Backup, BackupSpec, ExecHook, ExecHookSpec, Schedule, Snapshot,
    SnapshotSpec,
};
use crate::error::{Result, ToolkitError};
use crate::helpers::{create_constraint_list, create_criteria_list, create_hook_list, is_rfc1123};
use crate::kube_client::{CONNECTOR_NAMESPACE, DryRun, Gvr};
use crate::path::{KeyPath, lookup, scalar_string};
use crate::rest::{endpoints, media};
use crate::schedule::{ProtectionPlan, ScheduleFields, recurrence_rule, validate_create};
use crate::session::Session;
use crate::templates::{self, ObjectName, first_available_app_vault};
use crate::waiter::TerminalStates;

pub async fn run(session: &mut Session, target: &CreateTarget) -> Result<()> {
    match target {
        CreateTarget::Asup {
            upload,
            data_window_start,
            data_window_end,
        } => asup(session, *upload, data_window_start.as_deref(), data_window_end.as_deref()).await,
        CreateTarget::Backup {
            app,
            name,
            bucket,
            snapshot,
            reclaim_policy,
            poll,
        } => {
            let task = ProtectionTask {
                kind: TaskKind::Backup,
                app,
                name,
                app_vault: bucket.as_deref(),
                snapshot: snapshot.as_deref(),
                reclaim_policy: *reclaim_policy,
                timeouts: (None, None),
            };
            protection_task(session, task, poll).await
        }
        CreateTarget::Snapshot {
            app,
            name,
            app_vault,
            reclaim_policy,
            created_timeout,
            ready_to_use_timeout,
            poll,
        } => {
            let task = ProtectionTask {
                kind: TaskKind::Snapshot,
                app,
                name,
                app_vault: app_vault.as_deref(),
                snapshot: None,
                reclaim_policy: *reclaim_policy,
                timeouts: (*created_timeout, *ready_to_use_timeout),
            };
            protection_task(session, task, poll).await
        }
        CreateTarget::Cluster {
            file_path,
            cloud_id,
            private_route_id,
        } => cluster(session, file_path, cloud_id.as_deref(), private_route_id.as_deref()).await,
        CreateTarget::Hook {
            app,
            name,
            script,
            operation,
            hook_arguments,
            criteria,
        } => hook(session, app, name, script, *operation, hook_arguments, criteria).await,
        CreateTarget::Protection(args) => protection(session, args).await,
        CreateTarget::Replication {
            app_id,
            dest_cluster_id,
            dest_namespace,
            dest_storage_class,
            replication_frequency,
            offset,
        } => {
            let request = ReplicationRequest {
                app: app_id,
                dest_cluster: dest_cluster_id,
                dest_namespace,
                dest_storage_class: dest_storage_class.as_deref(),
                frequency: replication_frequency,
                offset,
            };
            replication(session, request).await
        }
        CreateTarget::Script {
            name,
            file_path,
            description,
        } => {
            let source = read_file(file_path)?;
            let mut body = json!({
                "name": name,
                "source": encode(source.trim_end()),
                "sourceType": "script",
            });
            if let Some(d) = description {
                body["description"] = json!(d);
            }
            let created = session
                .rest()?
                .post(endpoints::HOOK_SOURCES, &media::HOOK_SOURCE, body)
                .await?;
            report(session, &created)
        }
        CreateTarget::User {
            email,
            role,
            temp_password,
            first_name,
            last_name,
            label_constraint,
            namespace_constraint,
        } => {
            let request = UserRequest {
                email,
                role: *role,
                temp_password: temp_password.as_deref(),
                first_name: first_name.as_deref(),
                last_name: last_name.as_deref(),
                labels: label_constraint,
                namespaces: namespace_constraint,
            };
            user(session, request).await
        }
    }
}

/* ============================= SNAPSHOT / BACKUP ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Backup,
    Snapshot,
}

impl TaskKind {
    fn noun(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Snapshot => "snapshot",
        }
    }

    fn app_child(&self) -> &'static str {
        match self {
            Self::Backup => "appBackups",
            Self::Snapshot => "appSnaps",
        }
    }

    fn states(&self) -> TerminalStates {
        match self {
            Self::Backup => TerminalStates::BACKUP,
            Self::Snapshot => TerminalStates::SNAPSHOT,
        }
    }
}

struct ProtectionTask<'a> {
    kind: TaskKind,
    app: &'a str,
    name: &'a str,
    app_vault: Option<&'a str>,
    snapshot: Option<&'a str>,
    reclaim_policy: Option<ReclaimPolicy>,
    /// Created / ready-to-use timeouts in minutes (snapshots only).
    timeouts: (Option<u32>, Option<u32>),
}

async fn protection_task(
    session: &mut Session,
    task: ProtectionTask<'_>,
    poll: &PollArgs,
) -> Result<()> {
    let name = is_rfc1123(task.name)?;
    let app = session.resolve_id(Collection::Apps, task.app).await?;
    if session.is_v3() {
        custom_resource_task(session, &task, &app, &name, poll).await
    } else {
        rest_task(session, &task, &app, &name, poll).await
    }
}

async fn rest_task(
    session: &mut Session,
    task: &ProtectionTask<'_>,
    app: &str,
    name: &str,
    poll: &PollArgs,
) -> Result<()> {
    let mut body = json!({ "name": name });
    if let Some(bucket) = task.app_vault {
        body["bucketID"] = json!(session.resolve_id(Collection::Buckets, bucket).await?);
    }
    if let Some(snap) = task.snapshot {
        body["snapshotID"] = json!(snap);
    }
    let media = match task.kind {
        TaskKind::Backup => media::APP_BACKUP,
        TaskKind::Snapshot => media::APP_SNAP,
    };
    let rest = session.rest()?;
    let created = rest
        .post(&endpoints::app_child(app, task.kind.app_child()), &media, body)
        .await?;
    let id = id_of(&created)?;
    let noun = task.kind.noun();
    info!(app, id = %id, kind = noun, "protection_started");
    session.out.line(format!("Starting {noun} of {app}"));
    if poll.background {
        session.out.line(format!(
            "Background {noun} flag selected, run 'list {noun}s' to get status"
        ));
        return Ok(());
    }

    session.out.inline(format!("Waiting for {noun} to complete."));
    let endpoint = endpoints::app_child(app, &format!("{}/{id}", task.kind.app_child()));
    session
        .waiter(poll.poll_timer)
        .wait(noun, task.kind.states(), || {
            let endpoint = endpoint.clone();
            async move {
                let current = rest.get(&endpoint, &[]).await?;
                Ok(lookup(&current, "state"))
            }
        })
        .await?;
    session.out.line(id);
    Ok(())
}

/// The appVault named by the user, or the first `available` one.
pub(crate) async fn resolve_app_vault(
    session: &mut Session,
    given: Option<&str>,
) -> Result<String> {
    match given {
        Some(v) => session.resolve_id(Collection::Buckets, v).await,
        None => {
            let listing = session.fetch(Collection::Buckets).await?;
            let vault = first_available_app_vault(listing)?;
            lookup(&vault, "metadata.name").ok_or_else(ToolkitError::no_available_app_vault)
        }
    }
}

async fn custom_resource_task(
    session: &mut Session,
    task: &ProtectionTask<'_>,
    app: &str,
    name: &str,
    poll: &PollArgs,
) -> Result<()> {
    let vault = resolve_app_vault(session, task.app_vault).await?;
    let reclaim_policy = task.reclaim_policy.map(|r| r.as_str().to_string());
    let minutes = |m: Option<u32>| m.map(|n| format!("{n}m"));
    let object_name = ObjectName::fixed(name);
    let (gvr, doc) = match task.kind {
        TaskKind::Snapshot => (
            Gvr::of::<Snapshot>(),
            templates::snapshot(
                &object_name,
                SnapshotSpec {
                    application_ref: app.to_string(),
                    app_vault_ref: vault,
                    reclaim_policy,
                    created_timeout: minutes(task.timeouts.0),
                    ready_to_use_timeout: minutes(task.timeouts.1),
                },
            )?,
        ),
        TaskKind::Backup => (
            Gvr::of::<Backup>(),
            templates::backup(
                &object_name,
                BackupSpec {
                    application_ref: app.to_string(),
                    app_vault_ref: vault,
                    snapshot_ref: task.snapshot.map(str::to_string),
                    reclaim_policy,
                },
            )?,
        ),
    };
    let kube = session.kube()?;
    kube.create(&gvr, Some(CONNECTOR_NAMESPACE), doc).await?;
    if kube.dry_run() == DryRun::Client {
        return Ok(());
    }
    let noun = task.kind.noun();
    session.out.line(format!("Starting {noun} of {app}"));
    if poll.background || kube.dry_run() == DryRun::Server {
        session.out.line(format!(
            "Background {noun} flag selected, run 'list {noun}s' to get status"
        ));
        return Ok(());
    }
    session.out.inline(format!("Waiting for {noun} to complete."));
    session
        .waiter(poll.poll_timer)
        .wait(noun, TerminalStates::CUSTOM_RESOURCE, || {
            let gvr = gvr.clone();
            async move {
                let current = kube.get(&gvr, name, Some(CONNECTOR_NAMESPACE)).await?;
                Ok(lookup(&current, "status.state"))
            }
        })
        .await?;
    Ok(())
}

/* ============================= PROTECTION ============================= */

async fn protection(session: &mut Session, args: &CreateProtectionArgs) -> Result<()> {
    let fields = ScheduleFields {
        minute: Some(args.minute),
        hour: args.hour,
        day_of_week: args.day_of_week,
        day_of_month: args.day_of_month,
    };
    let plan = ProtectionPlan {
        granularity: args.granularity,
        cron: validate_create(args.granularity, &fields)?,
        backup_retention: args.backup_retention.to_string(),
        snapshot_retention: args.snapshot_retention.to_string(),
        recurrence_rule: None,
    };
    let app = session.resolve_id(Collection::Apps, &args.app).await?;

    if session.is_v3() {
        let vault = resolve_app_vault(session, args.app_vault.as_deref()).await?;
        let name = format!("{app}-{}", args.granularity);
        let doc = templates::schedule(&name, plan.custom_resource_spec(&app, &vault))?;
        session
            .kube()?
            .create(&Gvr::of::<Schedule>(), Some(CONNECTOR_NAMESPACE), doc)
            .await?;
        return Ok(());
    }

    let mut body = plan.rest_body();
    if let Some(bucket) = &args.app_vault {
        body["bucketID"] = json!(session.resolve_id(Collection::Buckets, bucket).await?);
    }
    let created = post_schedule(session, &app, body).await?;
    report(session, &created)
}

/// `POST k8s/v1/apps/{app}/schedules`.
pub(crate) async fn post_schedule(session: &Session, app: &str, body: Value) -> Result<Value> {
    let created = session
        .rest()?
        .post(&endpoints::app_child(app, "schedules"), &media::SCHEDULE, body)
        .await?;
    info!(app, "schedule_created");
    Ok(created)
}

/* ============================= REPLICATION ============================= */

struct ReplicationRequest<'a> {
    app: &'a str,
    dest_cluster: &'a str,
    dest_namespace: &'a str,
    dest_storage_class: Option<&'a str>,
    frequency: &'a str,
    offset: &'a str,
}

/// Body for `POST k8s/v1/appMirrors`.
pub fn mirror_body(
    source_app: &Value,
    dest_cluster: &str,
    dest_namespace: &str,
    dest_storage_class: Option<&str>,
) -> Result<Value> {
    let source_cluster = lookup(source_app, "clusterID")
        .ok_or_else(|| ToolkitError::validation("the source app has no clusterID"))?;
    let namespaces: Vec<String> = "namespaceScopedResources[].namespace"
        .parse::<KeyPath>()?
        .resolve(source_app)
        .iter()
        .filter_map(scalar_string)
        .collect();
    let mut body = json!({
        "sourceAppID": lookup(source_app, "id").unwrap_or_default(),
        "destinationClusterID": dest_cluster,
        "namespaceMapping": [
            {"clusterID": source_cluster, "namespaces": namespaces},
            {"clusterID": dest_cluster, "namespaces": [dest_namespace]},
        ],
        "stateDesired": "established",
    });
    if let Some(sc) = dest_storage_class {
        body["storageClasses"] = json!([{"storageClassName": sc, "clusterID": dest_cluster}]);
    }
    Ok(body)
}

async fn replication(session: &mut Session, request: ReplicationRequest<'_>) -> Result<()> {
    // both calls are validated before the first is made
    let rule = recurrence_rule(request.offset, request.frequency)?;
    let source = session.resolve(Collection::Apps, &["id"], request.app).await?;
    let body = mirror_body(
        &source,
        request.dest_cluster,
        request.dest_namespace,
        request.dest_storage_class,
    )?;
    let mirror = session
        .rest()?
        .post(endpoints::APP_MIRRORS, &media::APP_MIRROR, body)
        .await?;
    let mirror_id = lookup(&mirror, "id").unwrap_or_default();
    info!(mirror = %mirror_id, app = request.app, "replication_created");

    let schedule = ProtectionPlan::replication(rule).rest_body();
    match post_schedule(session, request.app, schedule).await {
        Ok(_) => report(session, &mirror),
        Err(e) => {
            warn!(mirror = %mirror_id, error = %e, "replication_schedule_failed");
            Err(ToolkitError::PartialFailure {
                completed: format!("replication {mirror_id}"),
                failed: "its replication schedule".to_string(),
                source: Box::new(e),
            })
        }
    }
}

/* ============================= HOOKS ============================= */

/// Body for `POST k8s/v1/apps/{app}/executionHooks`.
pub fn hook_body(
    app: &str,
    name: &str,
    source_id: &str,
    stage: &str,
    action: &str,
    arguments: Value,
    matching_criteria: Value,
) -> Value {
    json!({
        "name": name,
        "hookType": "custom",
        "action": action,
        "stage": stage,
        "hookSourceID": source_id,
        "arguments": arguments,
        "appID": app,
        "matchingCriteria": matching_criteria,
        "enabled": "true",
    })
}

fn capitalise(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

async fn hook(
    session: &mut Session,
    app: &str,
    name: &str,
    script: &str,
    operation: HookOperation,
    arguments: &[Vec<String>],
    criteria: &HookCriteriaArgs,
) -> Result<()> {
    let app = session.resolve_id(Collection::Apps, app).await?;
    let (stage, action) = operation.split();
    let arguments = create_hook_list(arguments);
    let matching = create_criteria_list(
        &criteria.container_image,
        &criteria.namespace,
        &criteria.pod_name,
        &criteria.label,
        &criteria.container_name,
    );

    if session.is_v3() {
        let source = read_file(std::path::Path::new(script))?;
        let doc = templates::exec_hook(
            &is_rfc1123(name)?,
            ExecHookSpec {
                application_ref: app,
                stage: capitalise(stage),
                action: capitalise(action),
                hook_source: encode(source.trim_end()),
                arguments,
                matching_criteria: matching,
                enabled: true,
            },
        )?;
        session
            .kube()?
            .create(&Gvr::of::<ExecHook>(), Some(CONNECTOR_NAMESPACE), doc)
            .await?;
        return Ok(());
    }

    let source_id = session.resolve_id(Collection::Scripts, script).await?;
    let body = hook_body(
        &app,
        name,
        &source_id,
        stage,
        action,
        json!(arguments),
        serde_json::to_value(&matching)?,
    );
    let created = session
        .rest()?
        .post(&endpoints::app_child(&app, "executionHooks"), &media::EXECUTION_HOOK, body)
        .await?;
    report(session, &created)
}

/* ============================= CLUSTER ============================= */

async fn cluster(
    session: &mut Session,
    file_path: &std::path::Path,
    cloud: Option<&str>,
    private_route: Option<&str>,
) -> Result<()> {
    let (kubeconfig, name) = read_kubeconfig(file_path)?;
    let cloud_id = match cloud {
        Some(c) => session.resolve_id(Collection::Clouds, c).await?,
        None => {
            session.fetch(Collection::Clouds).await?;
            session
                .cache
                .get_single(Collection::Clouds, "cloudType", "private")
                .ok()
                .and_then(|c| lookup(c, "id"))
                .ok_or_else(|| {
                    ToolkitError::validation("no private cloud found, specify -c/--cloudID")
                })?
        }
    };
    let body = credential_body(
        &name,
        "kubeconfig",
        json!({ "base64": encode(serde_json::to_string(&kubeconfig)?) }),
        Some("private"),
    );
    let credential = create_credential(session, body).await?;
    let mut cluster = json!({ "credentialID": credential });
    if let Some(route) = private_route {
        cluster["privateRouteID"] = json!(route);
    }
    let created = session
        .rest()?
        .post(&endpoints::cloud_clusters(&cloud_id), &media::CLUSTER, cluster)
        .await?;
    report(session, &created)
}

/* ============================= USER ============================= */

struct UserRequest<'a> {
    email: &'a str,
    role: UserRole,
    temp_password: Option<&'a str>,
    first_name: Option<&'a str>,
    last_name: Option<&'a str>,
    labels: &'a [String],
    namespaces: &'a [String],
}

async fn user(session: &mut Session, request: UserRequest<'_>) -> Result<()> {
    let rest = session.rest()?;
    let mut body = json!({ "email": request.email });
    if let Some(first) = request.first_name {
        body["firstName"] = json!(first);
    }
    if let Some(last) = request.last_name {
        body["lastName"] = json!(last);
    }
    let user = rest.post(endpoints::USERS, &media::USER, body).await?;
    let user_id = id_of(&user)?;

    let binding = json!({
        "accountID": rest.account_id(),
        "role": request.role.as_str(),
        "userID": user_id,
        "roleConstraints": create_constraint_list(request.namespaces, request.labels),
    });
    let binding = rest
        .post(endpoints::ROLE_BINDINGS, &media::ROLE_BINDING, binding)
        .await?;

    if lookup(&user, "authProvider").as_deref() == Some("local") {
        let Some(password) = request.temp_password else {
            let binding_id = id_of(&binding)?;
            rest.delete(
                &format!("{}/{binding_id}", endpoints::ROLE_BINDINGS),
                Some(&media::ROLE_BINDING),
            )
            .await?;
            return Err(ToolkitError::validation(
                "--tempPassword is required for ACC+localAuth",
            ));
        };
        let credential = credential_body(
            &user_id,
            "passwordHash",
            json!({"cleartext": encode(password), "change": encode("true")}),
            None,
        );
        create_credential(session, credential).await?;
    }
    report(session, &user)
}

/* ============================= ASUP ============================= */

async fn asup(
    session: &mut Session,
    upload: bool,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<()> {
    if session.is_v3() {
        let doc = templates::auto_support_bundle(
            &ObjectName::generated("asup-"),
            AutoSupportBundleSpec {
                trigger_type: "manual".to_string(),
                upload_enabled: upload,
                data_window_start: start.map(str::to_string),
                data_window_end: end.map(str::to_string),
            },
        )?;
        let gvr = crate::surface::custom_resource_gvr(Collection::Asups)?;
        session.kube()?.create(&gvr, Some(CONNECTOR_NAMESPACE), doc).await?;
        return Ok(());
    }
    let mut body = json!({ "upload": if upload { "true" } else { "false" } });
    if let Some(s) = start {
        body["dataWindowStart"] = json!(s);
    }
    if let Some(e) = end {
        body["dataWindowEnd"] = json!(e);
    }
    let created = session.rest()?.post(endpoints::ASUPS, &media::ASUP, body).await?;
    report(session, &created)
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_body_maps_both_clusters() {
        let app = json!({
            "id": "a1",
            "clusterID": "c1",
            "namespaceScopedResources": [{"namespace": "wp"}, {"namespace": "db"}],
        });
        let body = mirror_body(&app, "c2", "wp-dr", Some("gold")).unwrap();
        assert_eq!(body["sourceAppID"], "a1");
        assert_eq!(
            body["namespaceMapping"][0],
            json!({"clusterID": "c1", "namespaces": ["wp", "db"]})
        );
        assert_eq!(
            body["namespaceMapping"][1],
            json!({"clusterID": "c2", "namespaces": ["wp-dr"]})
        );
        assert_eq!(body["storageClasses"][0]["storageClassName"], "gold");
        assert_eq!(body["stateDesired"], "established");
    }

    #[test]
    fn test_mirror_body_without_storage_class() {
        let app = json!({"id": "a1", "clusterID": "c1", "namespaceScopedResources": []});
        let body = mirror_body(&app, "c2", "wp", None).unwrap();
        assert!(body.get("storageClasses").is_none());
        assert!(mirror_body(&json!({"id": "a1"}), "c2", "wp", None).is_err());
    }

    #[test]
    fn test_hook_body_fields() {
        let body = hook_body("a1", "h1", "s1", "pre", "snapshot", json!(["-v"]), json!([]));
        assert_eq!(body["hookType"], "custom");
        assert_eq!(body["hookSourceID"], "s1");
        assert_eq!(body["enabled"], "true");
        assert_eq!(body["arguments"], json!(["-v"]));
    }

    #[test]
    fn test_capitalise() {
        assert_eq!(capitalise("pre"), "Pre");
        assert_eq!(capitalise("snapshot"), "Snapshot");
        assert_eq!(capitalise(""), "");
    }

    #[test]
    fn test_task_kind_endpoints() {
        assert_eq!(TaskKind::Backup.app_child(), "appBackups");
        assert_eq!(TaskKind::Snapshot.app_child(), "appSnaps");
        assert_eq!(TaskKind::Snapshot.noun(), "snapshot");
    }
}
