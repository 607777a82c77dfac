use serde_json::{Value, json};
use tracing::info;

use super::manage::LDAP_SETTING;
use super::{CLOUD_NAME_LABEL, report};
use crate::cache::Collection;
use crate::cli::UnmanageTarget;
use crate::crd::{AppVault, Application, AstraConnector};
use crate::error::{Result, ToolkitError};
use crate::kube_client::{CONNECTOR_NAMESPACE, DryRun, Gvr};
use crate::path::lookup;
use crate::rest::{endpoints, media};
use crate::session::Session;

pub async fn run(session: &mut Session, target: &UnmanageTarget) -> Result<()> {
    match target {
        UnmanageTarget::App { app } => {
            if session.is_v3() {
                return destroy_custom_resource(session, Gvr::of::<Application>(), "App", app).await;
            }
            let id = session.resolve_id(Collection::Apps, app).await?;
            delete(session, &endpoints::app(&id)).await?;
            session.out.line(format!("App {id} unmanaged"));
            Ok(())
        }
        UnmanageTarget::Bucket { bucket } => {
            if session.is_v3() {
                return destroy_custom_resource(session, Gvr::of::<AppVault>(), "AppVault", bucket)
                    .await;
            }
            let id = session.resolve_id(Collection::Buckets, bucket).await?;
            delete(session, &format!("{}/{id}", endpoints::BUCKETS)).await?;
            session.out.line(format!("Bucket {id} unmanaged"));
            Ok(())
        }
        UnmanageTarget::Cloud { cloud_id } => {
            let cloud = session.find(Collection::Clouds, cloud_id).await?;
            let id = lookup(&cloud, "id").unwrap_or_else(|| cloud_id.clone());
            delete(session, &format!("{}/{id}", endpoints::CLOUDS)).await?;
            session.out.line(format!("Cloud {id} unmanaged"));
            if let Some(credential) = lookup(&cloud, "credentialID") {
                delete(session, &format!("{}/{credential}", endpoints::CREDENTIALS)).await?;
                session.out.line("Credential deleted");
            }
            Ok(())
        }
        UnmanageTarget::Cluster { cluster } => {
            if session.is_v3() {
                return connector(session, cluster).await;
            }
            let record = session.find(Collection::Clusters, cluster).await?;
            let id = lookup(&record, "id").unwrap_or_else(|| cluster.clone());
            delete(session, &format!("{}/{id}", endpoints::MANAGED_CLUSTERS)).await?;
            session.out.line(format!("Cluster {id} unmanaged"));
            if is_private(&record) {
                let cloud = lookup(&record, "cloudID").ok_or_else(|| {
                    ToolkitError::not_found(format!("cluster {id} has no cloudID"))
                })?;
                delete(session, &endpoints::cloud_cluster(&cloud, &id)).await?;
                if let Some(credential) = lookup(&record, "credentialID") {
                    delete(session, &format!("{}/{credential}", endpoints::CREDENTIALS)).await?;
                    session.out.line("Credential deleted");
                }
            }
            Ok(())
        }
        UnmanageTarget::Ldap => {
            session.fetch(Collection::Settings).await?;
            let setting = session
                .cache
                .get_single(Collection::Settings, "name", LDAP_SETTING)?
                .clone();
            let id = lookup(&setting, "id")
                .ok_or_else(|| ToolkitError::not_found("the LDAP setting has no id"))?;
            let body = json!({ "desiredConfig": disabled_config(&setting) });
            let updated = session
                .rest()?
                .put(&format!("{}/{id}", endpoints::SETTINGS), &media::SETTING, body)
                .await?;
            report(session, &updated)
        }
    }
}

async fn delete(session: &Session, endpoint: &str) -> Result<()> {
    session.rest()?.delete(endpoint, None).await?;
    info!(endpoint, "unmanaged");
    Ok(())
}

/// Clusters added to the private cloud carry a `cloudName=private` label.
pub fn is_private(cluster: &Value) -> bool {
    cluster
        .pointer("/metadata/labels")
        .and_then(Value::as_array)
        .is_some_and(|labels| {
            labels.iter().any(|l| {
                lookup(l, "name").as_deref() == Some(CLOUD_NAME_LABEL)
                    && lookup(l, "value").as_deref() == Some("private")
            })
        })
}

/// The setting's desired config with LDAP switched off.
pub fn disabled_config(setting: &Value) -> Value {
    let mut config = setting
        .get("desiredConfig")
        .or_else(|| setting.get("currentConfig"))
        .filter(|c| c.is_object())
        .cloned()
        .unwrap_or_else(|| json!({}));
    config["isEnabled"] = json!("false");
    config
}

async fn destroy_custom_resource(
    session: &Session,
    gvr: Gvr,
    label: &str,
    name: &str,
) -> Result<()> {
    let kube = session.kube()?;
    kube.destroy(&gvr, name, Some(CONNECTOR_NAMESPACE)).await?;
    if kube.dry_run() != DryRun::Client {
        session.out.line(format!("{label} {name} unmanaged"));
    }
    Ok(())
}

/// Remove the connector and the API token secret it referenced.
async fn connector(session: &Session, name: &str) -> Result<()> {
    let kube = session.kube()?;
    let gvr = Gvr::of::<AstraConnector>();
    let current = kube.get(&gvr, name, Some(CONNECTOR_NAMESPACE)).await?;
    kube.destroy(&gvr, name, Some(CONNECTOR_NAMESPACE)).await?;
    if let Some(token) = lookup(&current, "spec.astra.tokenRef") {
        kube.destroy_secret(CONNECTOR_NAMESPACE, &token).await?;
    }
    if kube.dry_run() != DryRun::Client {
        session.out.line(format!("Connector {name} removed"));
    }
    Ok(())
}
