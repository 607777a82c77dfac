use tracing::debug;

use crate::cache::Collection;
use crate::cli::{
    Cli, Commands, CopyTarget, CreateTarget, DeployTarget, DestroyTarget, ListTarget,
    ManageTarget, UnmanageTarget, UpdateTarget,
};
use crate::error::{Result, ToolkitError};
use crate::session::Session;

/* ============================= FAN OUT ============================= */

/// Root flags that consume the following token.
const VALUE_FLAGS: [&str; 3] = ["-o", "--output", "--dry-run"];

/// Split `list a,b,c ...` into one argv per object type; any other argv is
/// returned unchanged.
pub fn fan_out(argv: Vec<String>) -> Vec<Vec<String>> {
    let mut i = 1;
    while i < argv.len() {
        let token = argv[i].as_str();
        if VALUE_FLAGS.contains(&token) {
            i += 2;
            continue;
        }
        if token.starts_with('-') {
            i += 1;
            continue;
        }
        break;
    }
    let verb = argv.get(i).map(String::as_str);
    if !matches!(verb, Some("list" | "get")) {
        return vec![argv];
    }
    let Some(objects) = argv.get(i + 1).filter(|o| o.contains(',')) else {
        return vec![argv];
    };
    objects
        .split(',')
        .filter(|o| !o.is_empty())
        .map(|object| {
            let mut one = argv.clone();
            one[i + 1] = object.to_string();
            one
        })
        .collect()
}

/* ============================= V3 GATING ============================= */

/// `(verb, object)` as typed on the command line; verbs without an object
/// type report an empty object.
pub fn verb_object(command: &Commands) -> (&'static str, &'static str) {
    match command {
        Commands::Deploy { target } => (
            "deploy",
            match target {
                DeployTarget::Acp { .. } => "acp",
                DeployTarget::Chart { .. } => "chart",
            },
        ),
        Commands::List { target } => ("list", list_collection(target).as_str()),
        Commands::Create { target } => (
            "create",
            match target {
                CreateTarget::Asup { .. } => "asup",
                CreateTarget::Backup { .. } => "backup",
                CreateTarget::Cluster { .. } => "cluster",
                CreateTarget::Hook { .. } => "hook",
                CreateTarget::Protection(_) => "protection",
                CreateTarget::Replication { .. } => "replication",
                CreateTarget::Script { .. } => "script",
                CreateTarget::Snapshot { .. } => "snapshot",
                CreateTarget::User { .. } => "user",
            },
        ),
        Commands::Copy { target } => (
            "copy",
            match target {
                CopyTarget::Asup { .. } => "asup",
                CopyTarget::Hooks { .. } => "hooks",
                CopyTarget::Protections { .. } => "protections",
            },
        ),
        Commands::Manage { target } => (
            "manage",
            match target {
                ManageTarget::App { .. } => "app",
                ManageTarget::Bucket(_) => "bucket",
                ManageTarget::Cloud { .. } => "cloud",
                ManageTarget::Cluster { .. } => "cluster",
                ManageTarget::Ldap(_) => "ldap",
            },
        ),
        Commands::Destroy { target } => (
            "destroy",
            match target {
                DestroyTarget::Backup { .. } => "backup",
                DestroyTarget::Cluster { .. } => "cluster",
                DestroyTarget::Credential { .. } => "credential",
                DestroyTarget::Group { .. } => "group",
                DestroyTarget::Hook { .. } => "hook",
                DestroyTarget::Protection { .. } => "protection",
                DestroyTarget::Replication { .. } => "replication",
                DestroyTarget::Script { .. } => "script",
                DestroyTarget::Snapshot { .. } => "snapshot",
                DestroyTarget::User { .. } => "user",
            },
        ),
        Commands::Unmanage { target } => (
            "unmanage",
            match target {
                UnmanageTarget::App { .. } => "app",
                UnmanageTarget::Bucket { .. } => "bucket",
                UnmanageTarget::Cloud { .. } => "cloud",
                UnmanageTarget::Cluster { .. } => "cluster",
                UnmanageTarget::Ldap => "ldap",
            },
        ),
        Commands::Clone(_) => ("clone", ""),
        Commands::Restore(_) => ("restore", ""),
        Commands::Ipr(_) => ("ipr", ""),
        Commands::Update { target } => (
            "update",
            match target {
                UpdateTarget::Bucket { .. } => "bucket",
                UpdateTarget::Cloud { .. } => "cloud",
                UpdateTarget::Cluster { .. } => "cluster",
                UpdateTarget::Protection { .. } => "protection",
                UpdateTarget::Replication { .. } => "replication",
                UpdateTarget::Script { .. } => "script",
            },
        ),
    }
}

/// The collection a `list` target reads.
pub fn list_collection(target: &ListTarget) -> Collection {
    match target {
        ListTarget::ApiResources { .. } => Collection::ApiResources,
        ListTarget::Apps { .. } => Collection::Apps,
        ListTarget::Assets { .. } => Collection::Assets,
        ListTarget::Asups => Collection::Asups,
        ListTarget::Backups(_) => Collection::Backups,
        ListTarget::Buckets { .. } => Collection::Buckets,
        ListTarget::Clouds { .. } => Collection::Clouds,
        ListTarget::Clusters { .. } => Collection::Clusters,
        ListTarget::Connectors => Collection::Connectors,
        ListTarget::Credentials { .. } => Collection::Credentials,
        ListTarget::Groups => Collection::Groups,
        ListTarget::Hooks(_) => Collection::Hooks,
        ListTarget::HooksRuns(_) => Collection::HooksRuns,
        ListTarget::InplaceRestores(_) => Collection::InplaceRestores,
        ListTarget::LdapGroups => Collection::LdapGroups,
        ListTarget::LdapUsers => Collection::LdapUsers,
        ListTarget::Namespaces { .. } => Collection::Namespaces,
        ListTarget::Notifications { .. } => Collection::Notifications,
        ListTarget::Protections(_) => Collection::Protections,
        ListTarget::Replications(_) => Collection::Replications,
        ListTarget::Restores(_) => Collection::Restores,
        ListTarget::RoleBindings { .. } => Collection::RoleBindings,
        ListTarget::Scripts { .. } => Collection::Scripts,
        ListTarget::Ldap => Collection::Settings,
        ListTarget::Snapshots(_) => Collection::Snapshots,
        ListTarget::StorageBackends => Collection::StorageBackends,
        ListTarget::StorageClasses { .. } => Collection::StorageClasses,
        ListTarget::Users { .. } => Collection::Users,
    }
}

/// Verb → object types available on the custom-resource surface.
/// `None` admits every object type of the verb.
const V3_SUPPORT: [(&str, Option<&[&str]>); 10] = [
    ("clone", None),
    ("restore", None),
    ("ipr", None),
    (
        "list",
        Some(&[
            "apps",
            "asups",
            "astraconnectors",
            "backups",
            "buckets",
            "credentials",
            "hooks",
            "hooksruns",
            "inplacerestores",
            "namespaces",
            "protections",
            "restores",
            "snapshots",
            "storageclasses",
        ]),
    ),
    ("create", Some(&["asup", "backup", "hook", "protection", "snapshot"])),
    ("copy", Some(&["asup"])),
    ("deploy", Some(&["acp"])),
    ("manage", Some(&["app", "bucket", "cluster"])),
    ("destroy", Some(&["backup", "credential", "hook", "protection", "snapshot"])),
    ("unmanage", Some(&["app", "bucket", "cluster"])),
];

/// Reject flag combinations that only make sense on one surface.
pub fn check_surface(cli: &Cli) -> Result<()> {
    if cli.v3.is_none() {
        if cli.dry_run.is_some() {
            return Err(ToolkitError::validation("--dry-run can only be used with --v3"));
        }
        if cli.insecure_skip_tls_verify {
            return Err(ToolkitError::validation(
                "--insecure-skip-tls-verify can only be used with --v3",
            ));
        }
        return Ok(());
    }
    let (verb, object) = verb_object(&cli.command);
    let supported = V3_SUPPORT.iter().any(|(v, objects)| {
        *v == verb && objects.is_none_or(|objects| objects.contains(&object))
    });
    if supported {
        Ok(())
    } else {
        Err(ToolkitError::validation(format!(
            "'{verb} {object}' is not currently a supported --v3 command"
        )))
    }
}

/* ============================= CHOICES ============================= */

/// One argument whose value must name an existing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub arg: &'static str,
    /// Any of these collections may hold the record.
    pub collections: Vec<Collection>,
    pub value: String,
}

impl Choice {
    fn new(arg: &'static str, collection: Collection, value: &str) -> Self {
        Self {
            arg,
            collections: vec![collection],
            value: value.to_string(),
        }
    }
}

fn push(out: &mut Vec<Choice>, arg: &'static str, collection: Collection, value: Option<&String>) {
    if let Some(v) = value {
        out.push(Choice::new(arg, collection, v));
    }
}

/// The identifiers `command` refers to, with the collections they must be
/// found in. Per-app collections are only checked on the custom-resource
/// surface, where listing them is a single call.
pub fn required_choices(command: &Commands, v3: bool) -> Vec<Choice> {
    let mut out = Vec::new();
    let app = Collection::Apps;
    match command {
        Commands::List { target } => match target {
            ListTarget::Backups(f)
            | ListTarget::Snapshots(f)
            | ListTarget::Hooks(f)
            | ListTarget::HooksRuns(f)
            | ListTarget::Protections(f)
            | ListTarget::Restores(f)
            | ListTarget::InplaceRestores(f)
            | ListTarget::Replications(f) => push(&mut out, "-a/--app", app, f.app.as_ref()),
            ListTarget::Assets { app: a } => push(&mut out, "app", app, Some(a)),
            _ => {}
        },
        Commands::Create { target } => match target {
            CreateTarget::Backup { app: a, bucket, snapshot, .. } => {
                push(&mut out, "app", app, Some(a));
                push(&mut out, "-u/--bucket", Collection::Buckets, bucket.as_ref());
                if v3 {
                    push(&mut out, "-s/--snapshot", Collection::Snapshots, snapshot.as_ref());
                }
            }
            CreateTarget::Snapshot { app: a, app_vault, .. } => {
                push(&mut out, "app", app, Some(a));
                push(&mut out, "-u/--appVault", Collection::Buckets, app_vault.as_ref());
            }
            CreateTarget::Protection(p) => {
                push(&mut out, "app", app, Some(&p.app));
                push(&mut out, "-u/--appVault", Collection::Buckets, p.app_vault.as_ref());
            }
            CreateTarget::Hook { app: a, script, .. } => {
                push(&mut out, "app", app, Some(a));
                if !v3 {
                    push(&mut out, "script", Collection::Scripts, Some(script));
                }
            }
            CreateTarget::Replication { app_id, dest_cluster_id, .. } => {
                push(&mut out, "appID", app, Some(app_id));
                push(&mut out, "-c/--destClusterID", Collection::Clusters, Some(dest_cluster_id));
            }
            CreateTarget::Cluster { cloud_id, .. } => {
                push(&mut out, "-c/--cloudID", Collection::Clouds, cloud_id.as_ref())
            }
            _ => {}
        },
        Commands::Copy { target } => match target {
            CopyTarget::Asup { asup, .. } => push(&mut out, "asup", Collection::Asups, Some(asup)),
            CopyTarget::Hooks { source_app, destination_app }
            | CopyTarget::Protections { source_app, destination_app } => {
                push(&mut out, "sourceApp", app, Some(source_app));
                push(&mut out, "destinationApp", app, Some(destination_app));
            }
        },
        Commands::Manage { target } => match target {
            ManageTarget::App { cluster_id, .. } if !v3 => {
                push(&mut out, "clusterID", Collection::Clusters, cluster_id.as_ref())
            }
            ManageTarget::Cloud { default_bucket_id, .. } => push(
                &mut out,
                "-b/--defaultBucketID",
                Collection::Buckets,
                default_bucket_id.as_ref(),
            ),
            ManageTarget::Cluster { cluster, .. } if !v3 => {
                push(&mut out, "cluster", Collection::Clusters, Some(cluster))
            }
            ManageTarget::Bucket(b) if !v3 => push(
                &mut out,
                "-c/--credentialID",
                Collection::Credentials,
                b.credential_id.as_ref(),
            ),
            _ => {}
        },
        Commands::Destroy { target } => match target {
            DestroyTarget::Backup { app: a, backup: item }
            | DestroyTarget::Snapshot { app: a, snapshot: item }
            | DestroyTarget::Hook { app: a, hook: item }
            | DestroyTarget::Protection { app: a, protection: item } => {
                let collection = match target {
                    DestroyTarget::Backup { .. } => Collection::Backups,
                    DestroyTarget::Snapshot { .. } => Collection::Snapshots,
                    DestroyTarget::Hook { .. } => Collection::Hooks,
                    _ => Collection::Protections,
                };
                if v3 {
                    push(&mut out, "name", collection, Some(item));
                } else {
                    push(&mut out, "app", app, a.as_ref());
                }
            }
            DestroyTarget::Cluster { cluster } => {
                push(&mut out, "cluster", Collection::Clusters, Some(cluster))
            }
            DestroyTarget::Credential { credential } => {
                push(&mut out, "credential", Collection::Credentials, Some(credential))
            }
            DestroyTarget::Group { group } => {
                push(&mut out, "group", Collection::Groups, Some(group))
            }
            DestroyTarget::Replication { replication_id } => push(
                &mut out,
                "replicationID",
                Collection::Replications,
                Some(replication_id),
            ),
            DestroyTarget::Script { script_id } => {
                push(&mut out, "scriptID", Collection::Scripts, Some(script_id))
            }
            DestroyTarget::User { user_id } => {
                push(&mut out, "userID", Collection::Users, Some(user_id))
            }
        },
        Commands::Unmanage { target } => match target {
            UnmanageTarget::App { app: a } => push(&mut out, "app", app, Some(a)),
            UnmanageTarget::Bucket { bucket } => {
                push(&mut out, "bucket", Collection::Buckets, Some(bucket))
            }
            UnmanageTarget::Cloud { cloud_id } => {
                push(&mut out, "cloudID", Collection::Clouds, Some(cloud_id))
            }
            UnmanageTarget::Cluster { cluster } => {
                let collection = if v3 { Collection::Connectors } else { Collection::Clusters };
                push(&mut out, "cluster", collection, Some(cluster))
            }
            UnmanageTarget::Ldap => {}
        },
        Commands::Clone(c) => {
            push(&mut out, "sourceApp", app, Some(&c.source_app));
            if !v3 {
                push(&mut out, "cluster", Collection::Clusters, c.cluster.as_ref());
            }
        }
        Commands::Restore(r) => {
            if v3 {
                out.push(Choice {
                    arg: "restoreSource",
                    collections: vec![Collection::Backups, Collection::Snapshots],
                    value: r.restore_source.clone(),
                });
            } else {
                push(&mut out, "cluster", Collection::Clusters, r.cluster.as_ref());
            }
        }
        Commands::Ipr(i) => {
            push(&mut out, "app", app, Some(&i.app));
            if v3 {
                push(&mut out, "--backup", Collection::Backups, i.backup.as_ref());
                push(&mut out, "--snapshot", Collection::Snapshots, i.snapshot.as_ref());
            }
        }
        Commands::Update { target } => match target {
            UpdateTarget::Bucket { bucket_id, credential_id, .. } => {
                push(&mut out, "bucketID", Collection::Buckets, Some(bucket_id));
                push(
                    &mut out,
                    "-c/--credentialID",
                    Collection::Credentials,
                    credential_id.as_ref(),
                );
            }
            UpdateTarget::Cloud { cloud_id, credential_id, default_bucket_id, .. } => {
                push(&mut out, "cloudID", Collection::Clouds, Some(cloud_id));
                push(
                    &mut out,
                    "-c/--credentialID",
                    Collection::Credentials,
                    credential_id.as_ref(),
                );
                push(
                    &mut out,
                    "-b/--defaultBucketID",
                    Collection::Buckets,
                    default_bucket_id.as_ref(),
                );
            }
            UpdateTarget::Cluster { cluster_id, default_bucket_id, .. } => {
                push(&mut out, "clusterID", Collection::Clusters, Some(cluster_id));
                push(
                    &mut out,
                    "-b/--defaultBucketID",
                    Collection::Buckets,
                    default_bucket_id.as_ref(),
                );
            }
            UpdateTarget::Replication { replication_id, .. } => push(
                &mut out,
                "replicationID",
                Collection::Replications,
                Some(replication_id),
            ),
            UpdateTarget::Script { script_id, .. } => {
                push(&mut out, "scriptID", Collection::Scripts, Some(script_id))
            }
            UpdateTarget::Protection { bucket, .. } => {
                push(&mut out, "-u/--bucket", Collection::Buckets, bucket.as_ref())
            }
        },
        Commands::Deploy { .. } => {}
    }
    out
}

/// Prefetch the collections `command` names and check each identifier
/// against them. A collection that cannot be listed is not checked; the
/// dispatcher surfaces the underlying error when it needs the record.
pub async fn validate(session: &mut Session, command: &Commands) -> Result<()> {
    if session.opts.fast {
        return Ok(());
    }
    let v3 = session.is_v3();
    for choice in required_choices(command, v3) {
        let mut offered = Vec::new();
        let mut checked = false;
        for collection in &choice.collections {
            if session.fetch(*collection).await.is_err() {
                debug!(collection = %collection, arg = choice.arg, "choice_check_skipped");
                continue;
            }
            checked = true;
            for key in collection.identity_keys(v3) {
                offered.extend(session.cache.build_list(*collection, key, None));
            }
        }
        if checked && !offered.contains(&choice.value) {
            offered.dedup();
            return Err(ToolkitError::validation(format!(
                "argument {}: invalid choice: '{}' (choose from {})",
                choice.arg,
                choice.value,
                offered.join(", ")
            )));
        }
    }
    Ok(())
}

/* ============================= TESTS ============================= */
