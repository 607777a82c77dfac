use std::path::PathBuf;

use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand, ValueEnum};

use crate::helpers::FilterSelection;
use crate::kube_client::DryRun;
use crate::output::OutputFormat;
use crate::schedule::Granularity;

/* ============================= ROOT ============================= */

/// Root flags come before the verb; subcommands reuse several of the same
/// short letters for their own options.
#[derive(Parser, Debug, Clone)]
#[command(name = "actoolkit")]
#[command(
    about = "Manage Astra Control application protection through the REST API or astra.netapp.io custom resources"
)]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Print all REST call information (URL, method, headers, body, params)
    #[arg(short, long)]
    pub verbose: bool,

    /// Output format for results
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    /// Suppress all non-essential output
    #[arg(short, long)]
    pub quiet: bool,

    /// Skip fetching choice lists; identifiers are validated by the server instead
    #[arg(short, long)]
    pub fast: bool,

    /// Use the custom resource surface; optionally `--v3=CONTEXT@KUBECONFIG`
    #[arg(
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "",
        value_name = "CONTEXT@KUBECONFIG"
    )]
    pub v3: Option<String>,

    /// Print (client) or server-validate (server) instead of persisting; requires --v3
    #[arg(long, value_enum)]
    pub dry_run: Option<DryRun>,

    /// Skip TLS verification of the kube API server; requires --v3
    #[arg(long)]
    pub insecure_skip_tls_verify: bool,

    /// Emit logs as JSON lines
    #[arg(long, hide = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Deploy a helm chart, or enable ACP on Trident
    Deploy {
        #[command(subcommand)]
        target: DeployTarget,
    },

    /// List all items of an object type (comma-join types to list several)
    #[command(visible_alias = "get")]
    List {
        #[command(subcommand)]
        target: ListTarget,
    },

    /// Create an object
    Create {
        #[command(subcommand)]
        target: CreateTarget,
    },

    /// Copy resources from one app to another app
    Copy {
        #[command(subcommand)]
        target: CopyTarget,
    },

    /// Manage an object
    #[command(visible_alias = "define")]
    Manage {
        #[command(subcommand)]
        target: ManageTarget,
    },

    /// Destroy an object
    Destroy {
        #[command(subcommand)]
        target: DestroyTarget,
    },

    /// Unmanage an object
    Unmanage {
        #[command(subcommand)]
        target: UnmanageTarget,
    },

    /// Clone an app into a new app
    Clone(CloneArgs),

    /// Restore an app from a backup or snapshot into a new app
    Restore(RestoreArgs),

    /// In-place restore an app (destructive) from a backup or snapshot
    Ipr(IprArgs),

    /// Update an object
    Update {
        #[command(subcommand)]
        target: UpdateTarget,
    },
}

/* ============================= SHARED ============================= */

#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    /// Return after submitting instead of waiting for completion
    #[arg(short, long)]
    pub background: bool,

    /// Seconds between status polls
    #[arg(short = 't', long = "pollTimer", default_value_t = 5)]
    pub poll_timer: u64,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Whether the filter sets include or exclude resources
    #[arg(long = "filterSelection", value_enum)]
    pub filter_selection: Option<FilterSelection>,

    /// `key=value[,key=value]` resource selector (namespace, name, label, group, version, kind)
    #[arg(long = "filterSet", num_args = 1.., action = ArgAction::Append)]
    pub filter_set: Vec<Vec<String>>,
}

#[derive(Args, Debug, Clone, Default)]
#[group(multiple = false)]
pub struct NamespaceArgs {
    /// Namespace to restore a single-namespace app into
    #[arg(long = "newNamespace")]
    pub new_namespace: Option<String>,

    /// `sourcens=destns` mappings for multi-namespace apps
    #[arg(long = "multiNsMapping", num_args = 1.., action = ArgAction::Append)]
    pub multi_ns_mapping: Vec<String>,
}

/// `-a` / `--app` narrowing for per-app listings.
#[derive(Args, Debug, Clone, Default)]
pub struct AppFilter {
    /// Only list objects of this app
    #[arg(short, long)]
    pub app: Option<String>,
}

/* ============================= CLONE / RESTORE / IPR ============================= */

#[derive(Args, Debug, Clone)]
pub struct CloneArgs {
    /// Source app to clone
    #[arg(value_name = "sourceApp")]
    pub source_app: String,

    /// Name of the new app
    #[arg(value_name = "appName")]
    pub app_name: String,

    /// Destination cluster id (v1), or destination CONTEXT@KUBECONFIG (v3)
    pub cluster: Option<String>,

    #[command(flatten)]
    pub namespaces: NamespaceArgs,

    /// Storage class for the new app's volumes
    #[arg(long = "newStorageClass")]
    pub new_storage_class: Option<String>,

    #[command(flatten)]
    pub poll: PollArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    /// Backup or snapshot to restore from
    #[arg(value_name = "restoreSource")]
    pub restore_source: String,

    /// Name of the new app
    #[arg(value_name = "appName")]
    pub app_name: String,

    /// Destination cluster id (v1), or destination CONTEXT@KUBECONFIG (v3)
    pub cluster: Option<String>,

    #[command(flatten)]
    pub namespaces: NamespaceArgs,

    /// Storage class for the new app's volumes
    #[arg(long = "newStorageClass")]
    pub new_storage_class: Option<String>,

    #[command(flatten)]
    pub filters: FilterArgs,

    #[command(flatten)]
    pub poll: PollArgs,
}

#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("source").required(true).args(["backup", "snapshot"])))]
pub struct IprArgs {
    /// App to restore in place
    pub app: String,

    /// Backup to restore from
    #[arg(long)]
    pub backup: Option<String>,

    /// Snapshot to restore from
    #[arg(long)]
    pub snapshot: Option<String>,

    #[command(flatten)]
    pub filters: FilterArgs,

    #[command(flatten)]
    pub poll: PollArgs,
}

/* ============================= DEPLOY ============================= */

#[derive(Subcommand, Debug, Clone)]
pub enum DeployTarget {
    /// Enable ACP (Astra Control Provisioner) on the current context's Trident
    Acp {
        /// Existing registry secret in the trident namespace
        #[arg(long = "regCred")]
        reg_cred: Option<String>,

        /// Registry hosting the ACP image
        #[arg(long)]
        registry: Option<String>,
    },

    /// Install a helm chart, manage it as an app and protect it
    Chart {
        /// Helm release and app name
        app: String,

        /// Chart reference, e.g. `bitnami/wordpress`
        chart: String,

        /// Namespace to install into (must not exist)
        #[arg(short, long)]
        namespace: String,

        /// Helm values file; repeatable
        #[arg(short = 'f', long = "values", action = ArgAction::Append)]
        values: Vec<PathBuf>,

        /// Helm `key=value` override; repeatable
        #[arg(long = "set", action = ArgAction::Append)]
        set: Vec<String>,
    },
}

/* ============================= LIST ============================= */

#[derive(Subcommand, Debug, Clone)]
pub enum ListTarget {
    /// List api resources
    #[command(name = "apiresources")]
    ApiResources {
        /// Only list resources of this cluster
        #[arg(short, long)]
        cluster: Option<String>,
    },

    /// List apps
    #[command(alias = "applications")]
    Apps {
        /// Only list apps in this namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Substring match on the app name
        #[arg(short = 'f', long = "nameFilter")]
        name_filter: Option<String>,

        /// Only list apps of this cluster (id or name)
        #[arg(short, long)]
        cluster: Option<String>,
    },

    /// List app assets
    Assets {
        /// App whose assets to list
        app: String,
    },

    /// List auto-support bundles
    Asups,

    /// List backups
    Backups(AppFilter),

    /// List buckets (appVaults with --v3)
    #[command(alias = "appvaults")]
    Buckets {
        /// Case-insensitive substring match on the bucket name
        #[arg(short = 'f', long = "nameFilter")]
        name_filter: Option<String>,

        /// Only list buckets of this provider
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// List clouds
    Clouds {
        /// Only list clouds of this type
        #[arg(short = 't', long = "cloudType")]
        cloud_type: Option<String>,
    },

    /// List clusters
    Clusters {
        /// Hide managed clusters
        #[arg(short = 'm', long = "hideManaged")]
        hide_managed: bool,

        /// Hide unmanaged clusters
        #[arg(short = 'u', long = "hideUnmanaged")]
        hide_unmanaged: bool,

        /// Substring match on the cluster name
        #[arg(short = 'f', long = "nameFilter")]
        name_filter: Option<String>,
    },

    /// List astra connectors (--v3 only)
    #[command(name = "astraconnectors", alias = "connectors")]
    Connectors,

    /// List credentials (secrets with --v3)
    #[command(alias = "secrets")]
    Credentials {
        /// Only list kubeconfig credentials
        #[arg(short = 'k', long = "kubeconfigOnly")]
        kubeconfig_only: bool,
    },

    /// List groups
    Groups,

    /// List execution hooks
    #[command(alias = "exechooks")]
    Hooks(AppFilter),

    /// List execution hook runs (--v3 only)
    #[command(name = "hooksruns", alias = "exechooksruns")]
    HooksRuns(AppFilter),

    /// List in-place restores (--v3 only)
    #[command(name = "inplacerestores")]
    InplaceRestores(AppFilter),

    /// List LDAP groups
    #[command(name = "ldapgroups")]
    LdapGroups,

    /// List LDAP users
    #[command(name = "ldapusers")]
    LdapUsers,

    /// List namespaces
    Namespaces {
        /// Only list namespaces of this cluster
        #[arg(short = 'c', long = "clusterID")]
        cluster_id: Option<String>,

        /// Substring match on the namespace name
        #[arg(short = 'f', long = "nameFilter")]
        name_filter: Option<String>,

        /// Include removed namespaces
        #[arg(short = 'r', long = "showRemoved")]
        show_removed: bool,

        /// Only list namespaces not associated with any app
        #[arg(short = 'u', long)]
        unassociated: bool,

        /// Only list namespaces created within the last N minutes
        #[arg(short = 'm', long)]
        minutes: Option<i64>,

        /// Keep system namespaces (--v3)
        #[arg(long = "showSystem")]
        show_system: bool,
    },

    /// List notifications
    Notifications {
        /// Maximum number of notifications to fetch
        #[arg(short, long)]
        limit: Option<u32>,

        /// Number of notifications to skip
        #[arg(short, long)]
        offset: Option<u32>,

        /// Only list notifications from the last N minutes
        #[arg(short, long)]
        minutes: Option<i64>,

        /// Only list notifications of this severity
        #[arg(short, long)]
        severity: Option<String>,
    },

    /// List protection policies (schedules with --v3)
    #[command(alias = "schedules")]
    Protections(AppFilter),

    /// List replication policies
    Replications(AppFilter),

    /// List restores (--v3 only)
    Restores(AppFilter),

    /// List role bindings
    #[command(name = "rolebindings")]
    RoleBindings {
        /// Only list bindings of this user or group id
        #[arg(short = 'i', long = "idFilter")]
        id_filter: Option<String>,
    },

    /// List scripts (hook sources)
    Scripts {
        /// Substring match on the script name
        #[arg(short = 'f', long = "nameFilter")]
        name_filter: Option<String>,

        /// Print the decoded source of the named script instead of a listing
        #[arg(short = 's', long = "getScriptSource")]
        get_script_source: Option<String>,
    },

    /// List LDAP settings
    #[command(alias = "settings")]
    Ldap,

    /// List snapshots
    Snapshots(AppFilter),

    /// List storage backends
    #[command(name = "storagebackends")]
    StorageBackends,

    /// List storage classes
    #[command(name = "storageclasses")]
    StorageClasses {
        /// Only list storage classes of this cloud type
        #[arg(short = 't', long = "cloudType")]
        cloud_type: Option<String>,

        /// Only list storage classes of this cluster (id or name)
        #[arg(short, long)]
        cluster: Option<String>,
    },

    /// List users
    Users {
        /// Substring match on the user's name or email
        #[arg(short = 'f', long = "nameFilter")]
        name_filter: Option<String>,
    },
}

/* ============================= COPY ============================= */

#[derive(Subcommand, Debug, Clone)]
pub enum CopyTarget {
    /// Download an auto-support bundle
    Asup {
        /// Bundle id (v1) or AutoSupportBundle name (v3)
        asup: String,

        /// Directory the bundle is written to
        #[arg(short = 'd', long = "downloadDir", default_value = ".")]
        download_dir: PathBuf,
    },

    /// Copy execution hooks from one app to another
    Hooks {
        #[arg(value_name = "sourceApp")]
        source_app: String,
        #[arg(value_name = "destinationApp")]
        destination_app: String,
    },

    /// Copy protection policies from one app to another
    Protections {
        #[arg(value_name = "sourceApp")]
        source_app: String,
        #[arg(value_name = "destinationApp")]
        destination_app: String,
    },
}

/* ============================= CREATE ============================= */

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReclaimPolicy {
    Delete,
    Retain,
}

impl ReclaimPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "Delete",
            Self::Retain => "Retain",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum HookOperation {
    PreSnapshot,
    PostSnapshot,
    PreBackup,
    PostBackup,
    PreRestore,
    PostRestore,
    PostFailover,
}

impl HookOperation {
    /// `(stage, action)`, e.g. `("pre", "snapshot")`.
    pub fn split(&self) -> (&'static str, &'static str) {
        match self {
            Self::PreSnapshot => ("pre", "snapshot"),
            Self::PostSnapshot => ("post", "snapshot"),
            Self::PreBackup => ("pre", "backup"),
            Self::PostBackup => ("post", "backup"),
            Self::PreRestore => ("pre", "restore"),
            Self::PostRestore => ("post", "restore"),
            Self::PostFailover => ("post", "failover"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum UserRole {
    Viewer,
    Member,
    Admin,
    Owner,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Member => "member",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CreateProtectionArgs {
    /// App to protect
    pub app: String,

    /// appVault (v3) or bucket (v1); defaults to the first available one
    #[arg(short = 'u', long = "appVault", visible_aliases = ["bucket", "bucketID"])]
    pub app_vault: Option<String>,

    #[arg(short, long, value_enum)]
    pub granularity: Granularity,

    /// Number of backups to retain
    #[arg(short, long = "backupRetention")]
    pub backup_retention: u32,

    /// Number of snapshots to retain
    #[arg(short, long = "snapshotRetention")]
    pub snapshot_retention: u32,

    /// Day of the month (monthly)
    #[arg(short = 'M', long = "dayOfMonth", value_parser = clap::value_parser!(u8).range(1..=31))]
    pub day_of_month: Option<u8>,

    /// Day of the week, 0 is Sunday (weekly)
    #[arg(short = 'W', long = "dayOfWeek", value_parser = clap::value_parser!(u8).range(0..=6))]
    pub day_of_week: Option<u8>,

    /// Hour of the day (daily, weekly, monthly)
    #[arg(short = 'H', long, value_parser = clap::value_parser!(u8).range(0..=23))]
    pub hour: Option<u8>,

    /// Minute of the hour
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=59))]
    pub minute: u8,
}

#[derive(Args, Debug, Clone)]
pub struct HookCriteriaArgs {
    /// Container image regex; repeatable
    #[arg(short = 'i', long = "containerImage", action = ArgAction::Append)]
    pub container_image: Vec<String>,

    /// Namespace name regex; repeatable
    #[arg(short = 'n', long = "namespace", action = ArgAction::Append)]
    pub namespace: Vec<String>,

    /// Pod name regex; repeatable
    #[arg(short = 'p', long = "podName", action = ArgAction::Append)]
    pub pod_name: Vec<String>,

    /// Pod label regex; repeatable
    #[arg(short = 'l', long = "label", action = ArgAction::Append)]
    pub label: Vec<String>,

    /// Container name regex; repeatable
    #[arg(short = 'c', long = "containerName", action = ArgAction::Append)]
    pub container_name: Vec<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CreateTarget {
    /// Create an auto-support bundle
    Asup {
        /// Upload the bundle once generated
        #[arg(short, long)]
        upload: bool,

        /// Start of the data window (RFC 3339)
        #[arg(short = 's', long = "dataWindowStart")]
        data_window_start: Option<String>,

        /// End of the data window (RFC 3339)
        #[arg(short = 'e', long = "dataWindowEnd")]
        data_window_end: Option<String>,
    },

    /// Create a backup
    Backup {
        /// App to back up
        app: String,

        /// Name of the backup
        name: String,

        /// appVault (v3) or bucket (v1); defaults to the first available one
        #[arg(short = 'u', long = "bucket", visible_aliases = ["appVault", "bucketID"])]
        bucket: Option<String>,

        /// Promote this existing snapshot instead of taking a new one
        #[arg(short, long, visible_alias = "snapshotID")]
        snapshot: Option<String>,

        /// Reclaim policy (--v3)
        #[arg(short, long = "reclaimPolicy", value_enum)]
        reclaim_policy: Option<ReclaimPolicy>,

        #[command(flatten)]
        poll: PollArgs,
    },

    /// Upload a kubeconfig and add the cluster to a cloud
    Cluster {
        /// Path to the cluster's kubeconfig
        #[arg(value_name = "filePath")]
        file_path: PathBuf,

        /// Cloud to add the cluster to; defaults to the private cloud
        #[arg(short = 'c', long = "cloudID")]
        cloud_id: Option<String>,

        /// Private route identifier
        #[arg(long = "privateRouteID")]
        private_route_id: Option<String>,
    },

    /// Create an execution hook
    #[command(alias = "exechook")]
    Hook {
        /// App the hook runs against
        app: String,

        /// Name of the hook
        name: String,

        /// Script id (v1) or path to the script file (v3)
        script: String,

        /// When the hook runs
        #[arg(short, long, value_enum)]
        operation: HookOperation,

        /// Arguments passed to the script; repeatable, each taking several values
        #[arg(short = 'a', long = "hookArguments", num_args = 1.., action = ArgAction::Append)]
        hook_arguments: Vec<Vec<String>>,

        #[command(flatten)]
        criteria: HookCriteriaArgs,
    },

    /// Create a protection policy
    #[command(alias = "schedule")]
    Protection(CreateProtectionArgs),

    /// Create a replication policy
    Replication {
        /// Source app id
        #[arg(value_name = "appID")]
        app_id: String,

        /// Destination cluster id
        #[arg(short = 'c', long = "destClusterID")]
        dest_cluster_id: String,

        /// Destination namespace
        #[arg(short = 'n', long = "destNamespace")]
        dest_namespace: String,

        /// Destination storage class
        #[arg(short = 's', long = "destStorageClass")]
        dest_storage_class: Option<String>,

        /// How often to replicate
        #[arg(
            short = 'f',
            long = "replicationFrequency",
            value_parser = [
                "5m", "10m", "15m", "20m", "30m", "1h", "2h", "3h", "4h", "6h", "8h", "12h", "24h",
            ]
        )]
        replication_frequency: String,

        /// Offset of the schedule, `hh:mm` or `mm`
        #[arg(short, long, default_value = "00:00")]
        offset: String,
    },

    /// Create a script (hook source)
    Script {
        /// Name of the script
        name: String,

        /// Path to the script file
        #[arg(value_name = "filePath")]
        file_path: PathBuf,

        /// Description of the script
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Create a snapshot
    Snapshot {
        /// App to snapshot
        app: String,

        /// Name of the snapshot
        name: String,

        /// appVault (v3) or bucket (v1); defaults to the first available one
        #[arg(short = 'u', long = "appVault", visible_aliases = ["bucket", "bucketID"])]
        app_vault: Option<String>,

        /// Reclaim policy (--v3)
        #[arg(short, long = "reclaimPolicy", value_enum)]
        reclaim_policy: Option<ReclaimPolicy>,

        /// Minutes to wait for the snapshot to be created (--v3)
        #[arg(short = 'c', long = "createdTimeout")]
        created_timeout: Option<u32>,

        /// Minutes to wait for the snapshot to be ready to use (--v3)
        #[arg(short = 'e', long = "readyToUseTimeout")]
        ready_to_use_timeout: Option<u32>,

        #[command(flatten)]
        poll: PollArgs,
    },

    /// Create a user and bind it to a role
    User {
        /// Email of the user
        email: String,

        #[arg(value_enum)]
        role: UserRole,

        /// Temporary password (required for local users)
        #[arg(short = 'p', long = "tempPassword")]
        temp_password: Option<String>,

        #[arg(short = 'f', long = "firstName")]
        first_name: Option<String>,

        #[arg(short = 'l', long = "lastName")]
        last_name: Option<String>,

        /// Restrict the role to namespaces with this label; repeatable
        #[arg(short = 'a', long = "labelConstraint", action = ArgAction::Append)]
        label_constraint: Vec<String>,

        /// Restrict the role to this namespace id; repeatable
        #[arg(short = 'n', long = "namespaceConstraint", action = ArgAction::Append)]
        namespace_constraint: Vec<String>,
    },
}

/* ============================= MANAGE ============================= */

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BucketProvider {
    Aws,
    Azure,
    Gcp,
    #[value(name = "generic-s3")]
    GenericS3,
    #[value(name = "ontap-s3")]
    OntapS3,
    #[value(name = "storagegrid-s3")]
    StoragegridS3,
}

impl BucketProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
            Self::GenericS3 => "generic-s3",
            Self::OntapS3 => "ontap-s3",
            Self::StoragegridS3 => "storagegrid-s3",
        }
    }

    pub fn needs_server_url(&self) -> bool {
        !matches!(self, Self::Azure | Self::Gcp)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CloudType {
    #[value(name = "AWS")]
    Aws,
    #[value(name = "Azure")]
    Azure,
    #[value(name = "GCP")]
    Gcp,
    #[value(name = "private")]
    Private,
}

impl CloudType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "AWS",
            Self::Azure => "Azure",
            Self::Gcp => "GCP",
            Self::Private => "private",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ManageBucketArgs {
    #[arg(value_enum)]
    pub provider: BucketProvider,

    /// Name of the object storage bucket
    #[arg(value_name = "bucketName")]
    pub bucket_name: String,

    /// Name of the appVault (--v3); defaults to the bucket name
    #[arg(long = "appVaultName")]
    pub app_vault_name: Option<String>,

    /// Existing credential id (v1)
    #[arg(short = 'c', long = "credentialID")]
    pub credential_id: Option<String>,

    /// Existing secret and the key holding the credential (--v3); repeatable
    #[arg(long = "secret", num_args = 2, value_names = ["NAME", "KEY"], action = ArgAction::Append)]
    pub secret: Vec<Vec<String>>,

    /// Object storage access key
    #[arg(long = "accessKey")]
    pub access_key: Option<String>,

    /// Object storage access secret
    #[arg(long = "accessSecret")]
    pub access_secret: Option<String>,

    /// Cloud credential JSON to extract the access key pair from
    #[arg(long = "credentialPath")]
    pub credential_path: Option<PathBuf>,

    /// Server URL (aws and the s3 providers)
    #[arg(short = 'u', long = "serverURL")]
    pub server_url: Option<String>,

    /// Storage account (azure)
    #[arg(short = 'a', long = "storageAccount")]
    pub storage_account: Option<String>,

    /// Use http instead of https (--v3)
    #[arg(long)]
    pub http: bool,

    /// Skip TLS verification of the object store (--v3)
    #[arg(long = "skipCertValidation")]
    pub skip_cert_validation: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ManageLdapArgs {
    /// LDAP(S) server host name or IP
    #[arg(short = 'u', long)]
    pub url: String,

    /// LDAP(S) server port
    #[arg(long, default_value_t = 636)]
    pub port: u16,

    /// Bind username
    #[arg(short = 'c', long = "credUsername")]
    pub cred_username: String,

    /// Bind password
    #[arg(short = 'p', long = "credPassword")]
    pub cred_password: String,

    /// Base DN for user searches
    #[arg(short = 'b', long = "userBaseDN", default_value = "ou=users,dc=example,dc=com")]
    pub user_base_dn: String,

    /// Filter for user searches
    #[arg(short = 's', long = "userSearchFilter", default_value = "(objectClass=Person)")]
    pub user_search_filter: String,

    /// Attribute users log in with
    #[arg(short = 'r', long = "userLoginAttribute", default_value = "mail")]
    pub user_login_attribute: String,

    /// Base DN for group searches
    #[arg(short = 'g', long = "groupBaseDN", default_value = "ou=groups,dc=example,dc=com")]
    pub group_base_dn: String,

    /// Custom filter for group searches
    #[arg(short = 'f', long = "groupSearchFilter")]
    pub group_search_filter: Option<String>,

    /// Use plain LDAP instead of LDAPS
    #[arg(long)]
    pub insecure: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ManageTarget {
    /// Manage an app
    #[command(alias = "application")]
    App {
        /// Name of the new app
        #[arg(value_name = "appName")]
        app_name: String,

        /// Primary namespace of the app
        namespace: String,

        /// Cluster the namespace lives in (v1)
        #[arg(value_name = "clusterID")]
        cluster_id: Option<String>,

        /// `key=value` label selector for the primary namespace
        #[arg(short = 'l', long = "labelSelectors")]
        label_selectors: Option<String>,

        /// Additional namespace and optional label selector; repeatable
        #[arg(
            short = 'a',
            long = "additionalNamespace",
            num_args = 1..=2,
            action = ArgAction::Append
        )]
        additional_namespace: Vec<Vec<String>>,

        /// Cluster-scoped kind and optional label selector; repeatable
        #[arg(
            short = 'c',
            long = "clusterScopedResource",
            num_args = 1..=2,
            action = ArgAction::Append
        )]
        cluster_scoped_resource: Vec<Vec<String>>,
    },

    /// Manage a bucket (appVault with --v3)
    #[command(alias = "appvault")]
    Bucket(ManageBucketArgs),

    /// Manage a cloud
    Cloud {
        #[arg(value_enum, value_name = "cloudType")]
        cloud_type: CloudType,

        #[arg(value_name = "cloudName")]
        cloud_name: String,

        /// Cloud service-account JSON (required except for private clouds)
        #[arg(short = 'p', long = "credentialPath")]
        credential_path: Option<PathBuf>,

        /// Default bucket for the cloud
        #[arg(short = 'b', long = "defaultBucketID")]
        default_bucket_id: Option<String>,
    },

    /// Manage a cluster (with --v3, install the connector)
    Cluster {
        /// Cluster id (v1) or the name the cluster registers as (v3)
        cluster: String,

        /// Default storage class (v1)
        #[arg(short = 's', long = "defaultStorageClassID")]
        default_storage_class_id: Option<String>,

        /// Cloud to register the cluster in (--v3)
        #[arg(short = 'c', long = "cloudID")]
        cloud_id: Option<String>,

        /// Connector operator version (--v3)
        #[arg(short = 'v', long = "operator-version", default_value = "latest")]
        operator_version: String,

        /// Existing registry secret (--v3)
        #[arg(long = "regCred")]
        reg_cred: Option<String>,

        /// Registry hosting the connector images (--v3)
        #[arg(long)]
        registry: Option<String>,

        /// Install a connector that does not talk to the control plane (--v3)
        #[arg(long)]
        headless: bool,
    },

    /// Enable LDAP authentication
    Ldap(ManageLdapArgs),
}

/* ============================= DESTROY ============================= */

#[derive(Subcommand, Debug, Clone)]
pub enum DestroyTarget {
    /// Destroy a backup
    Backup {
        /// Owning app (v1)
        #[arg(short, long)]
        app: Option<String>,
        backup: String,
    },

    /// Destroy an (unmanaged) cluster
    Cluster { cluster: String },

    /// Destroy a credential (secret with --v3)
    #[command(alias = "secret")]
    Credential { credential: String },

    /// Destroy a group
    Group { group: String },

    /// Destroy an execution hook
    #[command(alias = "exechook")]
    Hook {
        /// Owning app (v1)
        #[arg(short, long)]
        app: Option<String>,
        hook: String,
    },

    /// Destroy a protection policy
    #[command(alias = "schedule")]
    Protection {
        /// Owning app (v1)
        #[arg(short, long)]
        app: Option<String>,
        protection: String,
    },

    /// Destroy a replication policy and its schedules
    Replication {
        #[arg(value_name = "replicationID")]
        replication_id: String,
    },

    /// Destroy a script (hook source)
    Script {
        #[arg(value_name = "scriptID")]
        script_id: String,
    },

    /// Destroy a snapshot
    Snapshot {
        /// Owning app (v1)
        #[arg(short, long)]
        app: Option<String>,
        snapshot: String,
    },

    /// Destroy a user's role bindings
    User {
        #[arg(value_name = "userID")]
        user_id: String,
    },
}

/* ============================= UNMANAGE ============================= */

#[derive(Subcommand, Debug, Clone)]
pub enum UnmanageTarget {
    /// Unmanage an app
    #[command(alias = "application")]
    App { app: String },

    /// Unmanage a bucket (appVault with --v3)
    #[command(alias = "appvault")]
    Bucket { bucket: String },

    /// Unmanage a cloud and destroy its credential
    Cloud {
        #[arg(value_name = "cloudID")]
        cloud_id: String,
    },

    /// Unmanage a cluster (with --v3, remove the connector)
    Cluster { cluster: String },

    /// Disable LDAP authentication
    Ldap,
}

/* ============================= UPDATE ============================= */

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReplicationOperation {
    Failover,
    Reverse,
    Resync,
}

#[derive(Subcommand, Debug, Clone)]
pub enum UpdateTarget {
    /// Update a bucket's credential
    #[command(group(
        ArgGroup::new("credential")
            .required(true)
            .args(["credential_id", "access_key"])
    ))]
    Bucket {
        #[arg(value_name = "bucketID")]
        bucket_id: String,

        /// Existing credential id
        #[arg(short = 'c', long = "credentialID")]
        credential_id: Option<String>,

        #[arg(long = "accessKey", requires = "access_secret")]
        access_key: Option<String>,

        #[arg(long = "accessSecret", requires = "access_key")]
        access_secret: Option<String>,
    },

    /// Update a cloud's credential or default bucket
    Cloud {
        #[arg(value_name = "cloudID")]
        cloud_id: String,

        /// Existing credential id
        #[arg(short = 'c', long = "credentialID", conflicts_with = "credential_path")]
        credential_id: Option<String>,

        /// Cloud service-account JSON
        #[arg(short = 'p', long = "credentialPath")]
        credential_path: Option<PathBuf>,

        #[arg(short = 'b', long = "defaultBucketID")]
        default_bucket_id: Option<String>,
    },

    /// Update a cluster's kubeconfig or default bucket
    Cluster {
        #[arg(value_name = "clusterID")]
        cluster_id: String,

        /// New kubeconfig for the cluster
        #[arg(short = 'p', long = "credentialPath")]
        credential_path: Option<PathBuf>,

        #[arg(short = 'b', long = "defaultBucketID")]
        default_bucket_id: Option<String>,
    },

    /// Update a protection policy
    #[command(alias = "schedule")]
    Protection {
        protection: String,

        #[arg(short = 'u', long = "bucket", visible_aliases = ["appVault", "bucketID"])]
        bucket: Option<String>,

        #[arg(short, long = "backupRetention")]
        backup_retention: Option<u32>,

        #[arg(short, long = "snapshotRetention")]
        snapshot_retention: Option<u32>,

        #[arg(
            short = 'M',
            long = "dayOfMonth",
            value_parser = clap::value_parser!(u8).range(1..=31)
        )]
        day_of_month: Option<u8>,

        #[arg(short = 'W', long = "dayOfWeek", value_parser = clap::value_parser!(u8).range(0..=6))]
        day_of_week: Option<u8>,

        #[arg(short = 'H', long, value_parser = clap::value_parser!(u8).range(0..=23))]
        hour: Option<u8>,

        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=59))]
        minute: Option<u8>,
    },

    /// Fail over, reverse or resync a replication
    Replication {
        #[arg(value_name = "replicationID")]
        replication_id: String,

        #[arg(value_enum)]
        operation: ReplicationOperation,

        /// App or cluster id whose data wins a resync
        #[arg(short = 's', long = "dataSource")]
        data_source: Option<String>,
    },

    /// Replace a script's source
    Script {
        #[arg(value_name = "scriptID")]
        script_id: String,

        #[arg(value_name = "filePath")]
        file_path: PathBuf,
    },
}

/* ============================= TESTS ============================= */
