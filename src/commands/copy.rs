use std::path::Path;

use serde_json::{Map, Value, json};
use tracing::info;

use super::create::{hook_body, post_schedule};
use crate::cache::Collection;
use crate::cli::CopyTarget;
use crate::error::{Result, ToolkitError};
use crate::kube_client::{CONNECTOR_NAMESPACE, DryRun};
use crate::path::lookup;
use crate::rest::endpoints;
use crate::session::Session;
use crate::surface::{ListScope, custom_resource_gvr};

/// Schedule attributes carried over when copying a protection policy.
const SCHEDULE_FIELDS: [&str; 7] = [
    "granularity",
    "backupRetention",
    "snapshotRetention",
    "dayOfWeek",
    "dayOfMonth",
    "hour",
    "minute",
];

pub async fn run(session: &mut Session, target: &CopyTarget) -> Result<()> {
    match target {
        CopyTarget::Asup { asup, download_dir } => {
            if session.is_v3() {
                copy_asup_v3(session, asup, download_dir).await
            } else {
                copy_asup_v1(session, asup, download_dir).await
            }
        }
        CopyTarget::Hooks {
            source_app,
            destination_app,
        } => {
            let (source, destination) = app_pair(session, source_app, destination_app).await?;
            let hooks = session
                .surface
                .list(Collection::Hooks, &ListScope::app(&source))
                .await?;
            for hook in items(&hooks) {
                let body = hook_body(
                    &destination,
                    &field(hook, "name"),
                    &field(hook, "hookSourceID"),
                    &field(hook, "stage"),
                    &field(hook, "action"),
                    hook.get("arguments").cloned().unwrap_or_else(|| json!([])),
                    hook.get("matchingCriteria").cloned().unwrap_or_else(|| json!([])),
                );
                session
                    .rest()?
                    .post(
                        &endpoints::app_child(&destination, "executionHooks"),
                        &crate::rest::media::EXECUTION_HOOK,
                        body,
                    )
                    .await?;
                info!(hook = %field(hook, "name"), app = %destination, "hook_copied");
            }
            Ok(())
        }
        CopyTarget::Protections {
            source_app,
            destination_app,
        } => {
            let (source, destination) = app_pair(session, source_app, destination_app).await?;
            let protections = session
                .surface
                .list(Collection::Protections, &ListScope::app(&source))
                .await?;
            for protection in items(&protections) {
                post_schedule(session, &destination, schedule_copy(protection)).await?;
            }
            Ok(())
        }
    }
}

async fn app_pair(
    session: &mut Session,
    source: &str,
    destination: &str,
) -> Result<(String, String)> {
    Ok((
        session.resolve_id(Collection::Apps, source).await?,
        session.resolve_id(Collection::Apps, destination).await?,
    ))
}

fn items(listing: &Value) -> &[Value] {
    listing
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn field(record: &Value, key: &str) -> String {
    lookup(record, key).unwrap_or_default()
}

/// The schedule body re-created on the destination app.
pub fn schedule_copy(protection: &Value) -> Value {
    let fields: Map<String, Value> = SCHEDULE_FIELDS
        .iter()
        .filter_map(|k| protection.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect();
    Value::Object(fields)
}

/* ============================= ASUP ============================= */

async fn copy_asup_v1(session: &mut Session, asup: &str, dir: &Path) -> Result<()> {
    let id = session.resolve_id(Collection::Asups, asup).await?;
    let endpoint = format!("{}/{id}", endpoints::ASUPS);
    let (_, path) = session
        .rest()?
        .download_file(&endpoint, "application/gzip", dir)
        .await
        .map_err(|e| match e {
            ToolkitError::RemoteFailure { status: 500, .. } => ToolkitError::validation(
                "downloading auto-support bundles is only supported by Astra Control Center",
            ),
            other => other,
        })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    session
        .out
        .line(format!("'{name}' downloaded to {} successfully.", describe_dir(dir)));
    Ok(())
}

fn describe_dir(dir: &Path) -> String {
    if dir == Path::new(".") {
        "current directory".to_string()
    } else {
        dir.display().to_string()
    }
}

/// Point the local destination of a `kubectl cp` line into `dir`; absolute
/// destinations are left alone.
pub fn relocate_copy_destination(command_line: &str, dir: &Path) -> String {
    let mut words: Vec<&str> = command_line.split_whitespace().collect();
    let Some(last) = words.pop() else {
        return command_line.to_string();
    };
    let destination = Path::new(last);
    if words.len() < 3 || destination.is_absolute() || dir == Path::new(".") {
        return command_line.to_string();
    }
    let relocated = dir.join(destination);
    let mut line = words.join(" ");
    line.push(' ');
    line.push_str(&relocated.to_string_lossy());
    line
}

async fn copy_asup_v3(session: &mut Session, asup: &str, dir: &Path) -> Result<()> {
    let kube = session.kube()?;
    if kube.dry_run() != DryRun::Off {
        return Err(ToolkitError::validation(
            "--dry-run is not supported for 'copy asup'",
        ));
    }
    let gvr = custom_resource_gvr(Collection::Asups)?;
    let bundle = kube.get(&gvr, asup, Some(CONNECTOR_NAMESPACE)).await?;
    let command = lookup(&bundle, "status.bundleKubectlCpCommand").ok_or_else(|| {
        ToolkitError::validation(format!(
            "auto-support bundle {asup} does not have a bundle ready to copy"
        ))
    })?;
    let command = relocate_copy_destination(&command, dir);
    let target = session.kube_target.as_ref();
    session
        .tools
        .kubectl_cp(
            &command,
            target.and_then(|t| t.kubeconfig()),
            target.and_then(|t| t.context()),
        )
        .await?;
    info!(bundle = asup, dir = %dir.display(), "asup_copied");
    session.out.line(format!("'{asup}' copied to {} successfully.", describe_dir(dir)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_copy_keeps_timing_fields_only() {
        let protection = json!({
            "id": "p1",
            "appID": "a1",
            "granularity": "weekly",
            "backupRetention": "2",
            "snapshotRetention": "3",
            "dayOfWeek": "1",
            "hour": "4",
            "minute": "5",
            "metadata": {},
        });
        let body = schedule_copy(&protection);
        assert_eq!(
            body,
            json!({
                "granularity": "weekly",
                "backupRetention": "2",
                "snapshotRetention": "3",
                "dayOfWeek": "1",
                "hour": "4",
                "minute": "5",
            })
        );
    }

    #[test]
    fn test_copy_destination_follows_download_dir() {
        let line = "kubectl cp -n astra-connector pod-0:/data/asup.7z asup.7z";
        assert_eq!(
            relocate_copy_destination(line, Path::new("/tmp/bundles")),
            "kubectl cp -n astra-connector pod-0:/data/asup.7z /tmp/bundles/asup.7z"
        );
        assert_eq!(relocate_copy_destination(line, Path::new(".")), line);
        let absolute = "kubectl cp pod-0:/data/asup.7z /var/asup.7z";
        assert_eq!(relocate_copy_destination(absolute, Path::new("/tmp")), absolute);
    }

    #[test]
    fn test_items_of_missing_listing_is_empty() {
        assert!(items(&json!({})).is_empty());
        assert_eq!(items(&json!({"items": [1, 2]})).len(), 2);
    }
}
