use serde_json::{Map, Value, json};
use tracing::info;

use super::{create_credential, credential_body, encode, read_file, read_json, read_kubeconfig};
use crate::cache::Collection;
use crate::cli::{ReplicationOperation, UpdateTarget};
use crate::error::{Result, ToolkitError};
use crate::path::lookup;
use crate::rest::{endpoints, media};
use crate::schedule::{Granularity, ScheduleFields, validate_update};
use crate::session::Session;

pub async fn run(session: &mut Session, target: &UpdateTarget) -> Result<()> {
    match target {
        UpdateTarget::Bucket {
            bucket_id,
            credential_id,
            access_key,
            access_secret,
        } => {
            let bucket = session.find(Collection::Buckets, bucket_id).await?;
            let id = field(&bucket, "id")?;
            let credential = match (credential_id, access_key, access_secret) {
                (Some(c), None, None) => c.clone(),
                (None, Some(key), Some(secret)) => {
                    let body = credential_body(
                        &field(&bucket, "name")?,
                        "s3",
                        json!({"accessKey": encode(key), "accessSecret": encode(secret)}),
                        Some("s3"),
                    );
                    create_credential(session, body).await?
                }
                (Some(_), _, _) => {
                    return Err(ToolkitError::validation(
                        "if a credentialID is specified, neither accessKey nor accessSecret should be specified",
                    ));
                }
                _ => {
                    return Err(ToolkitError::validation(
                        "if a credentialID is not specified, both accessKey and accessSecret must be provided",
                    ));
                }
            };
            session
                .rest()?
                .put(
                    &format!("{}/{id}", endpoints::BUCKETS),
                    &media::BUCKET,
                    json!({ "credentialID": credential }),
                )
                .await?;
            info!(bucket = %id, "bucket_updated");
            Ok(())
        }
        UpdateTarget::Cloud {
            cloud_id,
            credential_id,
            credential_path,
            default_bucket_id,
        } => {
            let cloud = session.find(Collection::Clouds, cloud_id).await?;
            let id = field(&cloud, "id")?;
            let credential = match credential_path {
                Some(path) => {
                    let service_account = read_json(path)?;
                    let body = credential_body(
                        &format!("astra-sa@{}", field(&cloud, "name")?),
                        "service-account",
                        json!({ "base64": encode(serde_json::to_string(&service_account)?) }),
                        Some(&field(&cloud, "cloudType")?),
                    );
                    Some(create_credential(session, body).await?)
                }
                None => credential_id.clone(),
            };
            let mut body = Map::new();
            if let Some(c) = credential {
                body.insert("credentialID".into(), json!(c));
            }
            if let Some(b) = default_bucket_id {
                body.insert("defaultBucketID".into(), json!(b));
            }
            session
                .rest()?
                .put(&format!("{}/{id}", endpoints::CLOUDS), &media::CLOUD, Value::Object(body))
                .await?;
            info!(cloud = %id, "cloud_updated");
            Ok(())
        }
        UpdateTarget::Cluster {
            cluster_id,
            credential_path,
            default_bucket_id,
        } => {
            let cluster = session.find(Collection::Clusters, cluster_id).await?;
            let id = field(&cluster, "id")?;
            let rest = session.rest()?;
            if let Some(path) = credential_path {
                let (kubeconfig, name) = read_kubeconfig(path)?;
                let credential = field(&cluster, "credentialID")?;
                rest.put(
                    &format!("{}/{credential}", endpoints::CREDENTIALS),
                    &media::CREDENTIAL,
                    json!({
                        "name": name,
                        "keyStore": {"base64": encode(serde_json::to_string(&kubeconfig)?)},
                    }),
                )
                .await?;
                info!(cluster = %id, credential = %credential, "cluster_credential_updated");
            }
            if let Some(bucket) = default_bucket_id {
                rest.put(
                    &format!("{}/{id}", endpoints::MANAGED_CLUSTERS),
                    &media::MANAGED_CLUSTER,
                    json!({ "defaultBucketID": bucket }),
                )
                .await?;
                info!(cluster = %id, bucket = %bucket, "cluster_default_bucket_updated");
            }
            Ok(())
        }
        UpdateTarget::Protection {
            protection,
            bucket,
            backup_retention,
            snapshot_retention,
            day_of_month,
            day_of_week,
            hour,
            minute,
        } => {
            let existing = session.find(Collection::Protections, protection).await?;
            let changes = ProtectionChanges {
                fields: ScheduleFields {
                    minute: *minute,
                    hour: *hour,
                    day_of_week: *day_of_week,
                    day_of_month: *day_of_month,
                },
                backup_retention: *backup_retention,
                snapshot_retention: *snapshot_retention,
                bucket: bucket.clone(),
            };
            let body = protection_update_body(&existing, &changes)?;
            let endpoint = endpoints::app_child(
                &field(&existing, "appID")?,
                &format!("schedules/{}", field(&existing, "id")?),
            );
            session.rest()?.put(&endpoint, &media::SCHEDULE, body).await?;
            Ok(())
        }
        UpdateTarget::Replication {
            replication_id,
            operation,
            data_source,
        } => {
            let mirror = session
                .find(Collection::Replications, replication_id)
                .await
                .map_err(|_| {
                    ToolkitError::validation(format!("replicationID {replication_id} not found"))
                })?;
            let body = replication_body(*operation, &mirror, data_source.as_deref())?;
            session
                .rest()?
                .put(
                    &format!("{}/{}", endpoints::APP_MIRRORS, field(&mirror, "id")?),
                    &media::APP_MIRROR,
                    body,
                )
                .await?;
            session
                .out
                .line(format!("Replication {} initiated", operation_name(*operation)));
            Ok(())
        }
        UpdateTarget::Script {
            script_id,
            file_path,
        } => {
            let id = session.resolve_id(Collection::Scripts, script_id).await?;
            let source = read_file(file_path)?;
            session
                .rest()?
                .put(
                    &format!("{}/{id}", endpoints::HOOK_SOURCES),
                    &media::HOOK_SOURCE,
                    json!({ "source": encode(source.trim_end()) }),
                )
                .await?;
            info!(script = %id, "script_updated");
            Ok(())
        }
    }
}

fn field(record: &Value, key: &str) -> Result<String> {
    lookup(record, key).ok_or_else(|| ToolkitError::not_found(format!("record has no {key}")))
}

/* ============================= PROTECTION ============================= */

pub struct ProtectionChanges {
    pub fields: ScheduleFields,
    pub backup_retention: Option<u32>,
    pub snapshot_retention: Option<u32>,
    pub bucket: Option<String>,
}

/// Merge `changes` over an existing schedule. The granularity cannot
/// change, and decides which fields may be set.
pub fn protection_update_body(existing: &Value, changes: &ProtectionChanges) -> Result<Value> {
    let granularity = Granularity::parse(&field(existing, "granularity")?)?;
    validate_update(granularity, &changes.fields)?;

    let mut body = Map::new();
    body.insert("granularity".into(), json!(granularity.as_str()));
    let mut merge = |key: &str, new: Option<String>| {
        if let Some(v) = new.or_else(|| lookup(existing, key)) {
            body.insert(key.to_string(), json!(v));
        }
    };
    let text = |n: Option<u8>| n.map(|n| n.to_string());
    merge("backupRetention", changes.backup_retention.map(|n| n.to_string()));
    merge("snapshotRetention", changes.snapshot_retention.map(|n| n.to_string()));
    merge("minute", text(changes.fields.minute));
    merge("hour", text(changes.fields.hour));
    merge("dayOfWeek", text(changes.fields.day_of_week));
    merge("dayOfMonth", text(changes.fields.day_of_month));
    merge("bucketID", changes.bucket.clone());
    Ok(Value::Object(body))
}

/* ============================= REPLICATION ============================= */

fn operation_name(op: ReplicationOperation) -> &'static str {
    match op {
        ReplicationOperation::Failover => "failover",
        ReplicationOperation::Reverse => "reverse",
        ReplicationOperation::Resync => "resync",
    }
}

fn direction(mirror: &Value, swapped: bool) -> Value {
    let (src, dst) = if swapped {
        ("destination", "source")
    } else {
        ("source", "destination")
    };
    let get = |k: String| lookup(mirror, &k).unwrap_or_default();
    json!({
        "stateDesired": "established",
        "sourceAppID": get(format!("{src}AppID")),
        "sourceClusterID": get(format!("{src}ClusterID")),
        "destinationAppID": get(format!("{dst}AppID")),
        "destinationClusterID": get(format!("{dst}ClusterID")),
    })
}

/// The body that moves `mirror` through `op`, after checking the
/// replication is in a state the operation can start from.
pub fn replication_body(
    op: ReplicationOperation,
    mirror: &Value,
    data_source: Option<&str>,
) -> Result<Value> {
    let state = lookup(mirror, "state").unwrap_or_default();
    match op {
        ReplicationOperation::Failover => {
            if state != "established" {
                return Err(ToolkitError::validation(format!(
                    "to failover a replication, it must be in an 'established' state, not a(n) '{state}' state"
                )));
            }
            Ok(json!({ "stateDesired": "failedOver" }))
        }
        ReplicationOperation::Reverse => {
            if state != "established" && state != "failedOver" {
                return Err(ToolkitError::validation(format!(
                    "to reverse a replication, it must be in an 'established' or 'failedOver' state, not a(n) '{state}' state"
                )));
            }
            Ok(direction(mirror, true))
        }
        ReplicationOperation::Resync => {
            let source = data_source.ok_or_else(|| {
                ToolkitError::validation("--dataSource must be provided for 'resync' operations")
            })?;
            if state != "failedOver" {
                return Err(ToolkitError::validation(format!(
                    "to resync a replication, it must be in a 'failedOver' state, not a(n) '{state}' state"
                )));
            }
            let ids = |keys: [&str; 2]| keys.map(|k| lookup(mirror, k).unwrap_or_default());
            if ids(["sourceAppID", "sourceClusterID"]).contains(&source.to_string()) {
                Ok(direction(mirror, false))
            } else if ids(["destinationAppID", "destinationClusterID"])
                .contains(&source.to_string())
            {
                Ok(direction(mirror, true))
            } else {
                let [sa, sc] = ids(["sourceAppID", "sourceClusterID"]);
                let [da, dc] = ids(["destinationAppID", "destinationClusterID"]);
                Err(ToolkitError::validation(format!(
                    "dataSource '{source}' not one of:\n\t{sa}\t(original sourceAppID)\n\t{sc}\t(original sourceClusterID)\n\t{da}\t(original destinationAppID)\n\t{dc}\t(original destinationClusterID)"
                )))
            }
        }
    }
}
