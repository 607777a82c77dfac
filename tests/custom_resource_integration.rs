mod common;

use std::sync::Arc;

use serde_json::json;

use actoolkit::cli::{
    CloneArgs, Commands, CopyTarget, CreateTarget, DeployTarget, FilterArgs, IprArgs, ListTarget,
    NamespaceArgs, PollArgs,
};
use actoolkit::commands::execute;
use actoolkit::config::KubeTarget;
use actoolkit::kube_client::{CONNECTOR_NAMESPACE, DryRun};
use actoolkit::output::{OutputFormat, parse_documents};
use common::{FakeConnector, FakeKube, FakeTools, KubeCall, kube_session};

// ══════════════════════════════════════════════════════════════════
// v3 command flows against in-memory clusters
//
// Sources and destinations are separate fake clusters told apart by
// the uid of their kube-system namespace.
// ══════════════════════════════════════════════════════════════════

fn no_poll() -> PollArgs {
    PollArgs {
        background: false,
        poll_timer: 0,
    }
}

fn seed_app(kube: &FakeKube, name: &str) {
    kube.seed(
        "applications",
        Some(CONNECTOR_NAMESPACE),
        json!({
            "apiVersion": "astra.netapp.io/v1",
            "kind": "Application",
            "metadata": {"name": name, "namespace": CONNECTOR_NAMESPACE},
            "spec": {"includedNamespaces": [{"namespace": name}]},
        }),
    );
}

fn seed_vault(kube: &FakeKube, name: &str, uid: &str) {
    kube.seed(
        "appvaults",
        Some(CONNECTOR_NAMESPACE),
        json!({
            "metadata": {"name": name, "namespace": CONNECTOR_NAMESPACE},
            "status": {"state": "available", "uid": uid},
        }),
    );
}

fn creates(kube: &FakeKube) -> Vec<String> {
    kube.calls()
        .into_iter()
        .filter_map(|c| match c {
            KubeCall::Create { kind, .. } => Some(kind),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_client_dry_run_prints_snapshot_without_creating() {
    let kube = FakeKube::cluster("uid-1");
    seed_app(&kube, "wordpress");
    seed_vault(&kube, "ontap-s3", "v-1");
    let mut session = kube_session(
        kube.clone(),
        DryRun::Client,
        Arc::new(FakeConnector::default()),
        Arc::new(FakeTools::default()),
    );

    let command = Commands::Create {
        target: CreateTarget::Snapshot {
            app: "wordpress".into(),
            name: "before-upgrade".into(),
            app_vault: Some("ontap-s3".into()),
            reclaim_policy: None,
            created_timeout: Some(5),
            ready_to_use_timeout: None,
            poll: no_poll(),
        },
    };
    execute(&mut session, &command).await.unwrap();

    assert!(creates(&kube).is_empty());
    let docs = parse_documents(&session.out.captured()).unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["kind"], "Snapshot");
    assert_eq!(docs[0]["metadata"]["name"], "before-upgrade");
    assert_eq!(docs[0]["metadata"]["namespace"], CONNECTOR_NAMESPACE);
    assert_eq!(docs[0]["spec"]["applicationRef"], "wordpress");
    assert_eq!(docs[0]["spec"]["appVaultRef"], "ontap-s3");
    assert_eq!(docs[0]["spec"]["createdTimeout"], "5m");
}

#[tokio::test]
async fn test_cross_cluster_clone_uses_common_app_vault() {
    let source = FakeKube::cluster("uid-src");
    seed_app(&source, "wordpress");
    seed_vault(&source, "local-only", "v-9");
    seed_vault(&source, "shared-src", "v-1");
    source.status_on_create(
        "backups",
        json!({"state": "Completed", "appArchivePath": "wordpress/backups/b-1"}),
    );
    let dest = FakeKube::cluster("uid-dst");
    seed_vault(&dest, "shared-dst", "v-1");
    let connector = FakeConnector::with(vec![(KubeTarget::Context("dr".into()), dest.clone())]);
    let mut session = kube_session(
        source.clone(),
        DryRun::Off,
        connector,
        Arc::new(FakeTools::default()),
    );

    let command = Commands::Clone(CloneArgs {
        source_app: "wordpress".into(),
        app_name: "wordpress-dr".into(),
        cluster: Some("dr".into()),
        namespaces: NamespaceArgs::default(),
        new_storage_class: None,
        poll: no_poll(),
    });
    execute(&mut session, &command).await.unwrap();

    assert_eq!(creates(&source), ["Backup"]);
    let backup = &source.objects("backups")[0];
    assert!(
        backup["metadata"]["name"]
            .as_str()
            .unwrap()
            .starts_with("wordpress-clone-backup-")
    );
    assert_eq!(backup["spec"]["appVaultRef"], "shared-src");

    assert_eq!(creates(&dest), ["BackupRestore", "Application"]);
    let restore = &dest.objects("backuprestores")[0];
    assert_eq!(restore["spec"]["appVaultRef"], "shared-dst");
    assert_eq!(restore["spec"]["appArchivePath"], "wordpress/backups/b-1");
    assert_eq!(
        restore["spec"]["namespaceMapping"],
        json!([{"source": "wordpress", "destination": "wordpress-dr"}])
    );
    let app = &dest.objects("applications")[0];
    assert_eq!(app["metadata"]["name"], "wordpress-dr");
    assert_eq!(app["spec"]["includedNamespaces"][0]["namespace"], "wordpress-dr");
    assert!(session.out.captured().contains("Submitting clone succeeded."));
}

#[tokio::test]
async fn test_same_cluster_clone_snapshots_first_available_vault() {
    let kube = FakeKube::cluster("uid-1");
    seed_app(&kube, "wordpress");
    seed_vault(&kube, "ontap-s3", "v-1");
    kube.status_on_create(
        "snapshots",
        json!({"state": "Completed", "appArchivePath": "wordpress/snapshots/s-1"}),
    );
    let mut session = kube_session(
        kube.clone(),
        DryRun::Off,
        Arc::new(FakeConnector::default()),
        Arc::new(FakeTools::default()),
    );

    let command = Commands::Clone(CloneArgs {
        source_app: "wordpress".into(),
        app_name: "wordpress-copy".into(),
        cluster: None,
        namespaces: NamespaceArgs::default(),
        new_storage_class: Some("gold".into()),
        poll: no_poll(),
    });
    execute(&mut session, &command).await.unwrap();

    assert_eq!(creates(&kube), ["Snapshot", "SnapshotRestore", "Application"]);
    let restore = &kube.objects("snapshotrestores")[0];
    assert_eq!(restore["spec"]["appVaultRef"], "ontap-s3");
    assert_eq!(
        restore["spec"]["storageClassMapping"],
        json!([{"source": "*", "destination": "gold"}])
    );
}

#[tokio::test]
async fn test_ipr_creates_backup_inplace_restore() {
    let kube = FakeKube::cluster("uid-1");
    kube.seed(
        "backups",
        Some(CONNECTOR_NAMESPACE),
        json!({
            "kind": "Backup",
            "metadata": {"name": "nightly", "namespace": CONNECTOR_NAMESPACE},
            "spec": {"applicationRef": "wordpress", "appVaultRef": "ontap-s3"},
            "status": {"state": "Completed", "appArchivePath": "wordpress/backups/nightly"},
        }),
    );
    let mut session = kube_session(
        kube.clone(),
        DryRun::Off,
        Arc::new(FakeConnector::default()),
        Arc::new(FakeTools::default()),
    );

    let command = Commands::Ipr(IprArgs {
        app: "wordpress".into(),
        backup: Some("nightly".into()),
        snapshot: None,
        filters: FilterArgs::default(),
        poll: no_poll(),
    });
    execute(&mut session, &command).await.unwrap();

    assert_eq!(creates(&kube), ["BackupInplaceRestore"]);
    let ipr = &kube.objects("backupinplacerestores")[0];
    assert!(ipr["metadata"]["name"].as_str().unwrap().starts_with("backupipr-"));
    assert_eq!(ipr["spec"]["appArchivePath"], "wordpress/backups/nightly");
    assert_eq!(ipr["spec"]["appVaultRef"], "ontap-s3");
}

#[tokio::test]
async fn test_ipr_rejects_backup_of_another_app() {
    let kube = FakeKube::cluster("uid-1");
    kube.seed(
        "backups",
        Some(CONNECTOR_NAMESPACE),
        json!({
            "kind": "Backup",
            "metadata": {"name": "nightly"},
            "spec": {"applicationRef": "mysql", "appVaultRef": "ontap-s3"},
            "status": {"appArchivePath": "mysql/backups/nightly"},
        }),
    );
    let mut session = kube_session(
        kube.clone(),
        DryRun::Off,
        Arc::new(FakeConnector::default()),
        Arc::new(FakeTools::default()),
    );

    let command = Commands::Ipr(IprArgs {
        app: "wordpress".into(),
        backup: Some("nightly".into()),
        snapshot: None,
        filters: FilterArgs::default(),
        poll: no_poll(),
    });
    let err = execute(&mut session, &command).await.unwrap_err();
    assert!(err.is_validation());
    assert!(creates(&kube).is_empty());
}

#[tokio::test]
async fn test_deploy_acp_patches_the_orchestrator() {
    let kube = FakeKube::cluster("uid-1");
    kube.seed(
        "tridentorchestrators",
        None,
        json!({"metadata": {"name": "trident"}, "status": {"version": "v24.02.0"}}),
    );
    kube.seed(
        "secrets",
        Some("trident"),
        json!({"metadata": {"name": "regcred", "namespace": "trident"}}),
    );
    let mut session = kube_session(
        kube.clone(),
        DryRun::Off,
        Arc::new(FakeConnector::default()),
        Arc::new(FakeTools::default()),
    );

    let command = Commands::Deploy {
        target: DeployTarget::Acp {
            reg_cred: Some("regcred".into()),
            registry: Some("cr.example.com".into()),
        },
    };
    execute(&mut session, &command).await.unwrap();

    let patch = kube
        .calls()
        .into_iter()
        .find_map(|c| match c {
            KubeCall::Patch { kind, name, patch } if kind == "TridentOrchestrator" => {
                assert_eq!(name, "trident");
                Some(patch)
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(patch["spec"]["acpImage"], "cr.example.com/astra/trident-acp:24.02.0");
    assert_eq!(patch["spec"]["imagePullSecrets"], json!(["regcred"]));
    assert!(
        session
            .out
            .captured()
            .contains("tridentorchestrator.trident.netapp.io/trident edited")
    );
}

#[tokio::test]
async fn test_deploy_acp_without_orchestrator_fails() {
    let kube = FakeKube::cluster("uid-1");
    let mut session = kube_session(
        kube.clone(),
        DryRun::Off,
        Arc::new(FakeConnector::default()),
        Arc::new(FakeTools::default()),
    );

    let command = Commands::Deploy {
        target: DeployTarget::Acp {
            reg_cred: Some("regcred".into()),
            registry: None,
        },
    };
    let err = execute(&mut session, &command).await.unwrap_err();
    assert!(err.to_string().contains("trident operator not found"));
}

#[tokio::test]
async fn test_fast_json_list_apps_prints_the_kube_listing() {
    let kube = FakeKube::cluster("uid-1");
    seed_app(&kube, "wordpress");
    seed_app(&kube, "mysql");
    let mut session = kube_session(
        kube.clone(),
        DryRun::Off,
        Arc::new(FakeConnector::default()),
        Arc::new(FakeTools::default()),
    );
    session.opts.output = OutputFormat::Json;

    let command = Commands::List {
        target: ListTarget::Apps {
            namespace: None,
            name_filter: None,
            cluster: None,
        },
    };
    execute(&mut session, &command).await.unwrap();

    let printed: serde_json::Value = serde_json::from_str(session.out.captured().trim()).unwrap();
    assert_eq!(printed, json!({ "items": kube.objects("applications") }));
    assert_eq!(printed["items"].as_array().unwrap().len(), 2);
    assert_eq!(kube.lists(), ["applications"]);
    assert!(kube.calls().is_empty());
    assert!(session.rest().is_err());
}

#[tokio::test]
async fn test_copy_asup_writes_into_download_dir() {
    let kube = FakeKube::cluster("uid-1");
    kube.seed(
        "autosupportbundles",
        Some(CONNECTOR_NAMESPACE),
        json!({
            "metadata": {"name": "asup-1", "namespace": CONNECTOR_NAMESPACE},
            "status": {
                "bundleKubectlCpCommand":
                    "kubectl cp -n astra-connector asup-pod:/bundles/asup-1.tgz asup-1.tgz",
            },
        }),
    );
    let tools = Arc::new(FakeTools::default());
    let mut session = kube_session(
        kube.clone(),
        DryRun::Off,
        Arc::new(FakeConnector::default()),
        tools.clone(),
    );

    let command = Commands::Copy {
        target: CopyTarget::Asup {
            asup: "asup-1".into(),
            download_dir: "/tmp/bundles".into(),
        },
    };
    execute(&mut session, &command).await.unwrap();

    let copies = tools.copies.lock().unwrap().clone();
    assert_eq!(
        copies,
        [(
            "kubectl cp -n astra-connector asup-pod:/bundles/asup-1.tgz /tmp/bundles/asup-1.tgz"
                .to_string(),
            Some("source".to_string()),
        )]
    );
    assert!(session.out.captured().contains("'asup-1' copied to /tmp/bundles successfully."));
}
