use serde_json::Value;
use tracing::{info, warn};

use crate::cache::Collection;
use crate::cli::DestroyTarget;
use crate::error::{Result, ToolkitError};
use crate::kube_client::{CONNECTOR_NAMESPACE, DryRun};
use crate::path::lookup;
use crate::rest::endpoints;
use crate::session::Session;
use crate::surface::{ListScope, custom_resource_gvr};

pub async fn run(session: &mut Session, target: &DestroyTarget) -> Result<()> {
    match target {
        DestroyTarget::Backup { app, backup } => {
            app_child(session, Collection::Backups, app.as_deref(), backup).await
        }
        DestroyTarget::Snapshot { app, snapshot } => {
            app_child(session, Collection::Snapshots, app.as_deref(), snapshot).await
        }
        DestroyTarget::Hook { app, hook } => {
            app_child(session, Collection::Hooks, app.as_deref(), hook).await
        }
        DestroyTarget::Protection { app, protection } => {
            app_child(session, Collection::Protections, app.as_deref(), protection).await
        }
        DestroyTarget::Credential { credential } => {
            if session.is_v3() {
                let kube = session.kube()?;
                kube.destroy_secret(CONNECTOR_NAMESPACE, credential).await?;
                if kube.dry_run() != DryRun::Client {
                    session.out.line(format!("Secret {credential} destroyed"));
                }
                return Ok(());
            }
            let id = session.resolve_id(Collection::Credentials, credential).await?;
            delete(session, &format!("{}/{id}", endpoints::CREDENTIALS)).await?;
            session.out.line(format!("Credential {id} destroyed"));
            Ok(())
        }
        DestroyTarget::Cluster { cluster } => {
            let record = session.find(Collection::Clusters, cluster).await?;
            let id = required(&record, "id")?;
            let cloud = required(&record, "cloudID")?;
            delete(session, &endpoints::cloud_cluster(&cloud, &id)).await?;
            session.out.line(format!("Cluster {id} destroyed"));
            Ok(())
        }
        DestroyTarget::Group { group } => {
            let id = session.resolve_id(Collection::Groups, group).await?;
            delete(session, &format!("{}/{id}", endpoints::GROUPS)).await?;
            session.out.line(format!("Group {id} destroyed"));
            Ok(())
        }
        DestroyTarget::Script { script_id } => {
            let id = session.resolve_id(Collection::Scripts, script_id).await?;
            delete(session, &format!("{}/{id}", endpoints::HOOK_SOURCES)).await?;
            session.out.line(format!("Script {id} destroyed"));
            Ok(())
        }
        DestroyTarget::Replication { replication_id } => replication(session, replication_id).await,
        DestroyTarget::User { user_id } => user(session, user_id).await,
    }
}

async fn delete(session: &Session, endpoint: &str) -> Result<()> {
    session.rest()?.delete(endpoint, None).await?;
    info!(endpoint, "destroyed");
    Ok(())
}

fn required(record: &Value, key: &str) -> Result<String> {
    lookup(record, key).ok_or_else(|| ToolkitError::not_found(format!("record has no {key}")))
}

/* ============================= APP CHILDREN ============================= */

struct ChildKind {
    path: &'static str,
    label: &'static str,
}

fn child_kind(collection: Collection) -> ChildKind {
    let (path, label) = match collection {
        Collection::Backups => ("appBackups", "Backup"),
        Collection::Snapshots => ("appSnaps", "Snapshot"),
        Collection::Hooks => ("executionHooks", "Hook"),
        _ => ("schedules", "Protection policy"),
    };
    ChildKind { path, label }
}

/// Destroy a backup, snapshot, hook or protection policy.
///
/// In v1 mode the owning app may be omitted, in which case the record is
/// looked up across every app.
async fn app_child(
    session: &mut Session,
    collection: Collection,
    app: Option<&str>,
    object: &str,
) -> Result<()> {
    let kind = child_kind(collection);

    if session.is_v3() {
        let gvr = custom_resource_gvr(collection)?;
        let kube = session.kube()?;
        kube.destroy(&gvr, object, Some(CONNECTOR_NAMESPACE)).await?;
        if kube.dry_run() != DryRun::Client {
            session.out.line(format!("{} {object} destroyed", kind.label));
        }
        return Ok(());
    }

    let (app_id, object_id) = match app {
        Some(app) => (
            session.resolve_id(Collection::Apps, app).await?,
            object.to_string(),
        ),
        None if session.opts.fast => {
            return Err(ToolkitError::validation(format!(
                "the owning app is required to destroy a {} with --fast",
                kind.label.to_lowercase()
            )));
        }
        None => {
            let record = session.find(collection, object).await?;
            (required(&record, "appID")?, required(&record, "id")?)
        }
    };
    let endpoint = endpoints::app_child(&app_id, &format!("{}/{object_id}", kind.path));
    delete(session, &endpoint).await?;
    session.out.line(format!("{} {object_id} destroyed", kind.label));
    Ok(())
}

/* ============================= REPLICATION ============================= */

/// The replication schedules on `app_id`, warning when more than one exists.
pub fn replication_schedules<'a>(protections: &'a [Value], app_id: &str) -> Vec<&'a Value> {
    let found: Vec<&Value> = protections
        .iter()
        .filter(|p| lookup(p, "replicate").as_deref() == Some("true"))
        .filter(|p| lookup(p, "appID").as_deref() == Some(app_id))
        .collect();
    if found.len() > 1 {
        warn!(app_id, count = found.len(), "multiple_replication_schedules");
    }
    found
}

async fn replication(session: &mut Session, replication: &str) -> Result<()> {
    let mirror = session.find(Collection::Replications, replication).await?;
    let id = required(&mirror, "id")?;
    let apps: Vec<String> = ["sourceAppID", "destinationAppID"]
        .iter()
        .filter_map(|k| lookup(&mirror, k))
        .collect();

    delete(session, &format!("{}/{id}", endpoints::APP_MIRRORS)).await?;
    session.out.line(format!("Replication policy {id} destroyed"));

    for app_id in apps {
        let listing = session
            .surface
            .list(Collection::Protections, &ListScope::app(&app_id))
            .await?;
        let protections = listing
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for schedule in replication_schedules(&protections, &app_id) {
            let schedule_id = required(schedule, "id")?;
            delete(
                session,
                &endpoints::app_child(&app_id, &format!("schedules/{schedule_id}")),
            )
            .await?;
            session
                .out
                .line(format!("Underlying replication schedule {schedule_id} destroyed"));
        }
    }
    Ok(())
}

/* ============================= USER ============================= */

/// A user is removed by deleting every role binding it holds.
async fn user(session: &mut Session, user: &str) -> Result<()> {
    let user_id = session.resolve_id(Collection::Users, user).await?;
    let bindings: Vec<String> = session
        .fetch(Collection::RoleBindings)
        .await?
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|rb| lookup(rb, "userID").as_deref() == Some(user_id.as_str()))
                .filter_map(|rb| lookup(rb, "id"))
                .collect()
        })
        .unwrap_or_default();
    if bindings.is_empty() {
        return Err(ToolkitError::not_found(format!("userID {user_id} not found")));
    }
    for binding in bindings {
        delete(session, &format!("{}/{binding}", endpoints::ROLE_BINDINGS)).await?;
        session
            .out
            .line(format!("User {user_id} / roleBinding {binding} destroyed"));
    }
    session.cache.invalidate(Collection::RoleBindings);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_replication_schedules_filters_by_app_and_flag() {
        let protections = vec![
            json!({"id": "s1", "appID": "a1", "replicate": "true"}),
            json!({"id": "s2", "appID": "a1", "replicate": "false"}),
            json!({"id": "s3", "appID": "a2", "replicate": "true"}),
        ];
        let found = replication_schedules(&protections, "a1");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], "s1");
        assert!(replication_schedules(&protections, "a3").is_empty());
    }

    #[test]
    fn test_child_kind_paths() {
        assert_eq!(child_kind(Collection::Backups).path, "appBackups");
        assert_eq!(child_kind(Collection::Protections).label, "Protection policy");
        assert_eq!(child_kind(Collection::Hooks).path, "executionHooks");
    }
}
