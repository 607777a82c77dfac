use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::create::post_schedule;
use super::manage::{ensure_registry_secret, manage_app_body};
use crate::cache::Collection;
use crate::cli::DeployTarget;
use crate::config::KubeTarget;
use crate::error::{Result, ToolkitError};
use crate::external::HelmRelease;
use crate::helpers::is_rfc1123;
use crate::kube_client::{DryRun, Gvr, KubeClient};
use crate::path::lookup;
use crate::rest::{endpoints, media};
use crate::schedule::{Granularity, ProtectionPlan, ScheduleFields, validate_create};
use crate::session::Session;
use crate::surface::ListScope;
use crate::waiter::TerminalStates;

/* ============================= CONSTANTS ============================= */

const TRIDENT_NAMESPACE: &str = "trident";
const DISCOVERY_POLL_SECS: u64 = 3;
/// A namespace older than this was not created by the install.
const DISCOVERY_WINDOW_MINUTES: i64 = 10;

const DISCOVERED: TerminalStates = TerminalStates {
    success: &["discovered"],
    failure: &[],
};

pub async fn run(session: &mut Session, target: &DeployTarget) -> Result<()> {
    match target {
        DeployTarget::Acp { reg_cred, registry } => {
            acp(session, reg_cred.as_deref(), registry.as_deref()).await
        }
        DeployTarget::Chart {
            app,
            chart,
            namespace,
            values,
            set,
        } => {
            let release = HelmRelease {
                name: is_rfc1123(app)?,
                chart: chart.clone(),
                namespace: namespace.clone(),
                values_files: values.clone(),
                set_values: set.clone(),
            };
            chart_app(session, &release).await
        }
    }
}

/// The session's cluster in v3 mode, the current kube context otherwise.
async fn current_cluster(session: &Session) -> Result<KubeClient> {
    match session.kube() {
        Ok(kube) => Ok(kube.clone()),
        Err(_) => session.connect(&KubeTarget::Default).await,
    }
}

/* ============================= ACP ============================= */

/// Merge patch turning on ACP for a trident orchestrator.
pub fn acp_patch(orchestrator: &Value, registry: &str, pull_secret: &str) -> Result<Value> {
    let version = lookup(orchestrator, "status.version").ok_or_else(|| {
        ToolkitError::validation("the trident orchestrator does not report a status.version")
    })?;
    let version = version.strip_prefix('v').unwrap_or(&version);
    Ok(json!({
        "spec": {
            "enableACP": true,
            "acpImage": format!("{registry}/astra/trident-acp:{version}"),
            "imagePullSecrets": [pull_secret],
        }
    }))
}

fn single_orchestrator(listing: &Value) -> Result<&Value> {
    match listing.get("items").and_then(Value::as_array).map(Vec::as_slice) {
        Some([one]) => Ok(one),
        Some([_, _, ..]) => Err(ToolkitError::validation(
            "multiple trident operators found on current Kubernetes context",
        )),
        _ => Err(ToolkitError::validation(
            "trident operator not found on current Kubernetes context",
        )),
    }
}

async fn acp(session: &Session, reg_cred: Option<&str>, registry: Option<&str>) -> Result<()> {
    let kube = current_cluster(session).await?;
    let gvr = Gvr::trident_orchestrators();
    let listing = kube.list(&gvr, None, &[]).await?;
    let orchestrator = single_orchestrator(&listing)?;
    let name = lookup(orchestrator, "metadata.name")
        .ok_or_else(|| ToolkitError::validation("the trident orchestrator has no name"))?;

    let secret = ensure_registry_secret(
        &kube,
        TRIDENT_NAMESPACE,
        reg_cred,
        registry,
        session.rest_config.as_ref(),
    )
    .await?;
    let patch = acp_patch(orchestrator, &secret.registry, &secret.name)?;
    kube.patch(&gvr, &name, None, patch).await?;
    info!(orchestrator = %name, registry = %secret.registry, "acp_enabled");
    if kube.dry_run() != DryRun::Client {
        session
            .out
            .line(format!("tridentorchestrator.trident.netapp.io/{name} edited"));
    }
    Ok(())
}

/* ============================= CHART ============================= */

/// The freshly discovered control-plane namespace called `name`.
pub fn discovered_namespace(listing: &Value, name: &str, now: DateTime<Utc>) -> Option<Value> {
    listing
        .get("items")
        .and_then(Value::as_array)?
        .iter()
        .find(|ns| {
            lookup(ns, "name").as_deref() == Some(name)
                && lookup(ns, "namespaceState").as_deref() == Some("discovered")
                && lookup(ns, "metadata.creationTimestamp")
                    .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
                    .is_some_and(|created| {
                        now.signed_duration_since(created.with_timezone(&Utc))
                            < Duration::minutes(DISCOVERY_WINDOW_MINUTES)
                    })
        })
        .cloned()
}

/// The four default protection policies applied to a deployed chart.
pub fn default_protections() -> Result<Vec<ProtectionPlan>> {
    let periods = [
        (Granularity::Hourly, None, None, None),
        (Granularity::Daily, Some(2), None, None),
        (Granularity::Weekly, Some(2), Some(0), None),
        (Granularity::Monthly, Some(2), None, Some(1)),
    ];
    periods
        .into_iter()
        .map(|(granularity, hour, day_of_week, day_of_month)| {
            let fields = ScheduleFields {
                minute: Some(0),
                hour,
                day_of_week,
                day_of_month,
            };
            Ok(ProtectionPlan {
                granularity,
                cron: validate_create(granularity, &fields)?,
                backup_retention: "1".to_string(),
                snapshot_retention: "1".to_string(),
                recurrence_rule: None,
            })
        })
        .collect()
}

async fn chart_app(session: &mut Session, release: &HelmRelease) -> Result<()> {
    let kube = current_cluster(session).await?;
    let existing = kube.namespaces(true).await?;
    let wanted = Some(release.namespace.as_str());
    let taken = existing
        .get("items")
        .and_then(Value::as_array)
        .is_some_and(|items| {
            items
                .iter()
                .any(|ns| lookup(ns, "metadata.name").as_deref() == wanted)
        });
    if taken {
        return Err(ToolkitError::validation(format!(
            "Namespace {} already exists!",
            release.namespace
        )));
    }

    session.tools.helm_install(release).await?;
    info!(release = %release.name, namespace = %release.namespace, "helm_installed");

    session
        .out
        .inline("Waiting for Astra to discover the namespace");
    let namespace = release.namespace.as_str();
    let surface = &session.surface;
    session
        .waiter(DISCOVERY_POLL_SECS)
        .wait(namespace, DISCOVERED, move || async move {
            let listing = surface
                .list(Collection::Namespaces, &ListScope::default())
                .await?;
            Ok(discovered_namespace(&listing, namespace, Utc::now())
                .map(|_| "discovered".to_string()))
        })
        .await?;
    let listing = session
        .surface
        .list(Collection::Namespaces, &ListScope::default())
        .await?;
    let discovered = discovered_namespace(&listing, namespace, Utc::now()).ok_or_else(|| {
        ToolkitError::not_found(format!("namespace {namespace} was not discovered"))
    })?;
    let cluster = lookup(&discovered, "clusterID")
        .ok_or_else(|| ToolkitError::not_found(format!("namespace {namespace} has no clusterID")))?;

    session.out.inline(format!("Managing app: {namespace}."));
    let app_id = manage_with_retry(session, &release.name, namespace, &cluster).await?;
    session.out.line(" Success!");

    for plan in default_protections()? {
        session.out.line(format!(
            "Setting {} protection policy on {app_id}",
            plan.granularity
        ));
        post_schedule(session, &app_id, plan.rest_body()).await?;
    }
    Ok(())
}

/// Managing races discovery on the control plane, so one failure is retried.
async fn manage_with_retry(
    session: &Session,
    name: &str,
    namespace: &str,
    cluster: &str,
) -> Result<String> {
    let rest = session.rest()?;
    let body = manage_app_body(name, namespace, cluster, None, Vec::new(), Vec::new());
    let created = match rest.post(endpoints::APPS, &media::APP_MANAGE, body.clone()).await {
        Ok(created) => created,
        Err(e) => {
            warn!(error = %e, namespace, "manage_app_retry");
            session.out.line("");
            session.out.line("ERROR managing app, trying one more time:");
            rest.post(endpoints::APPS, &media::APP_MANAGE, body).await?
        }
    };
    super::id_of(&created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acp_patch_strips_version_prefix() {
        let torc = json!({"metadata": {"name": "trident"}, "status": {"version": "v23.10.0"}});
        let patch = acp_patch(&torc, "cr.astra.netapp.io", "reg-1").unwrap();
        assert_eq!(patch["spec"]["enableACP"], true);
        assert_eq!(
            patch["spec"]["acpImage"],
            "cr.astra.netapp.io/astra/trident-acp:23.10.0"
        );
        assert_eq!(patch["spec"]["imagePullSecrets"], json!(["reg-1"]));
    }

    #[test]
    fn test_acp_patch_requires_version() {
        let err = acp_patch(&json!({"status": {}}), "r", "s").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_single_orchestrator_counts() {
        assert!(single_orchestrator(&json!({"items": []})).is_err());
        let two = json!({"items": [{}, {}]});
        assert!(
            single_orchestrator(&two)
                .unwrap_err()
                .to_string()
                .contains("multiple")
        );
        let one = json!({"items": [{"metadata": {"name": "trident"}}]});
        assert_eq!(single_orchestrator(&one).unwrap()["metadata"]["name"], "trident");
    }

    #[test]
    fn test_discovered_namespace_window() {
        let now = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let listing = json!({"items": [
            {"name": "wp", "namespaceState": "discovered", "clusterID": "old",
             "metadata": {"creationTimestamp": "2024-03-01T11:00:00Z"}},
            {"name": "wp", "namespaceState": "discovering", "clusterID": "c0",
             "metadata": {"creationTimestamp": "2024-03-01T11:58:00Z"}},
            {"name": "wp", "namespaceState": "discovered", "clusterID": "c1",
             "metadata": {"creationTimestamp": "2024-03-01T11:55:00Z"}},
        ]});
        let found = discovered_namespace(&listing, "wp", now).unwrap();
        assert_eq!(found["clusterID"], "c1");
        assert!(discovered_namespace(&listing, "other", now).is_none());
    }

    #[test]
    fn test_default_protections_cover_four_periods() {
        let plans = default_protections().unwrap();
        let names: Vec<&str> = plans.iter().map(|p| p.granularity.as_str()).collect();
        assert_eq!(names, ["hourly", "daily", "weekly", "monthly"]);
        let weekly = plans[2].rest_body();
        assert_eq!(weekly["dayOfWeek"], "0");
        assert_eq!(weekly["hour"], "2");
        assert_eq!(weekly["minute"], "0");
        assert_eq!(weekly["backupRetention"], "1");
        let monthly = plans[3].rest_body();
        assert_eq!(monthly["dayOfMonth"], "1");
        assert_eq!(monthly["dayOfWeek"], "*");
    }
}
