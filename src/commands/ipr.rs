use serde_json::{Value, json};
use tracing::info;

use super::clone::resource_filter;
use crate::cache::Collection;
use crate::cli::IprArgs;
use crate::crd::{BackupInplaceRestore, SnapshotInplaceRestore};
use crate::error::{Result, ToolkitError};
use crate::kube_client::{CONNECTOR_NAMESPACE, DryRun, Gvr};
use crate::path::lookup;
use crate::rest::{endpoints, media};
use crate::session::Session;
use crate::surface::ListScope;
use crate::templates::{RestoreSource, inplace_restore};
use crate::waiter::TerminalStates;

/// An app being restored in place reports `restoring` until it settles.
const IN_PLACE: TerminalStates = TerminalStates {
    success: &["ready"],
    failure: &["failed"],
};

/// Restore an app on top of itself from one of its backups or snapshots.
pub async fn run(session: &mut Session, args: &IprArgs) -> Result<()> {
    resource_filter(&args.filters, None, session.is_v3())?;
    if session.is_v3() {
        ipr_v3(session, args).await
    } else {
        ipr_v1(session, args).await
    }
}

/// Body for `PUT k8s/v2/apps/{id}` (sent with `ForceUpdate: true`).
pub fn ipr_body(
    backup: Option<&str>,
    snapshot: Option<&str>,
    filter: Option<Value>,
) -> Result<Value> {
    let mut body = match (backup, snapshot) {
        (Some(b), None) => json!({ "backupID": b }),
        (None, Some(s)) => json!({ "snapshotID": s }),
        _ => {
            return Err(ToolkitError::validation(
                "exactly one of --backup or --snapshot must be specified",
            ));
        }
    };
    if let Some(filter) = filter {
        body["restoreFilter"] = filter;
    }
    Ok(body)
}

async fn ipr_v1(session: &mut Session, args: &IprArgs) -> Result<()> {
    let app = session.resolve_id(Collection::Apps, &args.app).await?;
    let assets = session
        .surface
        .list(Collection::Assets, &ListScope::app(&app))
        .await?;
    let filter = resource_filter(&args.filters, Some(&assets), false)?;
    let body = ipr_body(args.backup.as_deref(), args.snapshot.as_deref(), filter)?;

    let rest = session.rest()?;
    let endpoint = endpoints::app(&app);
    rest.put_with_headers(&endpoint, &media::APP, body, &[("ForceUpdate", "true")])
        .await?;
    info!(app = %app, "in_place_restore_submitted");
    if args.poll.background {
        session.out.line("In-Place-Restore job submitted successfully");
        session
            .out
            .line("Background flag selected, run 'list apps' to get status");
        return Ok(());
    }

    session.out.inline("In-Place-Restore job in progress");
    session
        .waiter(args.poll.poll_timer)
        .wait(&app, IN_PLACE, || {
            let endpoint = endpoint.clone();
            async move {
                let current = rest.get(&endpoint, &[]).await?;
                Ok(lookup(&current, "state"))
            }
        })
        .await?;
    session.out.line("Success!");
    Ok(())
}

async fn ipr_v3(session: &mut Session, args: &IprArgs) -> Result<()> {
    let (collection, name) = match (&args.backup, &args.snapshot) {
        (Some(b), None) => (Collection::Backups, b),
        (None, Some(s)) => (Collection::Snapshots, s),
        _ => {
            return Err(ToolkitError::validation(
                "exactly one of --backup or --snapshot must be specified",
            ));
        }
    };
    let source_doc = session.find(collection, name).await?;
    if let Some(owner) = lookup(&source_doc, "spec.applicationRef") {
        if owner != args.app {
            return Err(ToolkitError::validation(format!(
                "'{name}' belongs to app '{owner}', not '{}'",
                args.app
            )));
        }
    }
    let source = RestoreSource::from_document(&source_doc)?;
    let filter = resource_filter(&args.filters, None, true)?;
    let prefix = format!("{}ipr-", source.kind.to_lowercase());
    let doc = inplace_restore(&prefix, &source, filter)?;
    let gvr = match source.kind.as_str() {
        "Backup" => Gvr::of::<BackupInplaceRestore>(),
        _ => Gvr::of::<SnapshotInplaceRestore>(),
    };
    let kube = session.kube()?;
    kube.create(&gvr, Some(CONNECTOR_NAMESPACE), doc).await?;
    if kube.dry_run() != DryRun::Client {
        session.out.line("In-Place-Restore job submitted successfully");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipr_body_backup() {
        let body = ipr_body(Some("b1"), None, None).unwrap();
        assert_eq!(body, json!({"backupID": "b1"}));
    }

    #[test]
    fn test_ipr_body_snapshot_with_filter() {
        let body = ipr_body(None, Some("s1"), Some(json!({"GVKN": []}))).unwrap();
        assert_eq!(body["snapshotID"], "s1");
        assert_eq!(body["restoreFilter"], json!({"GVKN": []}));
    }

    #[test]
    fn test_ipr_body_requires_exactly_one_source() {
        assert!(ipr_body(None, None, None).unwrap_err().is_validation());
        assert!(ipr_body(Some("b"), Some("s"), None).unwrap_err().is_validation());
    }
}
