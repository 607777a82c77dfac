pub mod clone;
pub mod copy;
pub mod create;
pub mod deploy;
pub mod destroy;
pub mod ipr;
pub mod list;
pub mod manage;
pub mod unmanage;
pub mod update;

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::choices;
use crate::cli::{Cli, Commands};
use crate::config::{KubeTarget, RestConfig};
use crate::error::{Result, ToolkitError};
use crate::external::SystemTools;
use crate::kube_client::{KubeClient, LiveConnector};
use crate::output::{Output, OutputFormat};
use crate::path::lookup;
use crate::rest::{ReqwestTransport, RestClient, endpoints, media};
use crate::session::{Session, SessionOptions};
use crate::surface::Surface;

/* ============================= SESSION ============================= */

pub fn session_options(cli: &Cli) -> SessionOptions {
    SessionOptions {
        verbose: cli.verbose,
        quiet: cli.quiet,
        fast: cli.fast,
        output: cli.output,
        dry_run: cli.dry_run.unwrap_or_default(),
        insecure: cli.insecure_skip_tls_verify,
    }
}

/// Build the live session for one invocation.
///
/// REST mode requires a `config.yaml`; v3 mode loads it when present so the
/// connector commands can reach the control plane.
pub async fn build_session(cli: &Cli) -> Result<Session> {
    let opts = session_options(cli);
    let out = Output::stdout(opts.quiet);
    let tools = Arc::new(SystemTools::new()?);
    let connector = Arc::new(LiveConnector);

    match &cli.v3 {
        None => {
            let config = RestConfig::load()?;
            let transport = Arc::new(ReqwestTransport::new(config.verify_ssl)?);
            let rest = RestClient::new(&config, transport).with_flags(opts.verbose, opts.quiet);
            info!(host = %config.host(), "session_v1");
            Ok(Session::new(Surface::V1(rest), out, opts, connector.clone(), tools)
                .with_rest_config(config))
        }
        Some(target) => {
            let target = KubeTarget::parse(Some(target.as_str()));
            let api = crate::kube_client::KubeConnector::connect(
                connector.as_ref(),
                &target,
                opts.insecure,
            )
            .await?;
            let kube = KubeClient::new(api, opts.dry_run, out.clone(), target.canonical());
            info!(target = %target.canonical(), dry_run = ?opts.dry_run, "session_v3");
            let session = Session::new(Surface::V3(kube), out, opts, connector, tools)
                .with_kube_target(target);
            Ok(match RestConfig::load() {
                Ok(config) => session.with_rest_config(config),
                Err(e) => {
                    debug!(error = %e, "rest_config_not_loaded");
                    session
                }
            })
        }
    }
}

/* ============================= DISPATCH ============================= */

/// Parse-time checks, session setup, then the command itself.
pub async fn run(cli: &Cli) -> Result<()> {
    choices::check_surface(cli)?;
    let mut session = build_session(cli).await?;
    execute(&mut session, &cli.command).await
}

/// Validate identifiers (unless fast) and run `command` against `session`.
pub async fn execute(session: &mut Session, command: &Commands) -> Result<()> {
    choices::validate(session, command).await?;
    let (verb, object) = choices::verb_object(command);
    debug!(verb, object, v3 = session.is_v3(), "dispatch");
    match command {
        Commands::Deploy { target } => deploy::run(session, target).await,
        Commands::List { target } => list::run(session, target).await,
        Commands::Create { target } => create::run(session, target).await,
        Commands::Copy { target } => copy::run(session, target).await,
        Commands::Manage { target } => manage::run(session, target).await,
        Commands::Destroy { target } => destroy::run(session, target).await,
        Commands::Unmanage { target } => unmanage::run(session, target).await,
        Commands::Clone(args) => clone::clone(session, args).await,
        Commands::Restore(args) => clone::restore(session, args).await,
        Commands::Ipr(args) => ipr::run(session, args).await,
        Commands::Update { target } => update::run(session, target).await,
    }
}

/* ============================= SHARED ============================= */

pub(crate) const CRED_TYPE_LABEL: &str = "astra.netapp.io/labels/read-only/credType";
pub(crate) const CLOUD_NAME_LABEL: &str = "astra.netapp.io/labels/read-only/cloudName";

pub(crate) fn encode(text: impl AsRef<[u8]>) -> String {
    STANDARD.encode(text)
}

/// Body for `POST core/v1/credentials`.
///
/// Cloud service accounts are stored with key type `generic` but keep
/// `service-account` as their credType label.
pub(crate) fn credential_body(
    name: &str,
    key_type: &str,
    key_store: Value,
    cloud_name: Option<&str>,
) -> Value {
    let mut labels = vec![json!({"name": CRED_TYPE_LABEL, "value": key_type})];
    if let Some(cloud) = cloud_name {
        labels.push(json!({"name": CLOUD_NAME_LABEL, "value": cloud}));
    }
    json!({
        "name": name,
        "keyType": if key_type == "service-account" { "generic" } else { key_type },
        "keyStore": key_store,
        "metadata": {"labels": labels},
    })
}

/// Create a credential record and return its id.
pub(crate) async fn create_credential(session: &Session, body: Value) -> Result<String> {
    let created = session
        .rest()?
        .post(endpoints::CREDENTIALS, &media::CREDENTIAL, body)
        .await?;
    let id = id_of(&created)?;
    info!(credential = %id, "credential_created");
    Ok(id)
}

/// Print a record the server returned: YAML when asked for, JSON otherwise.
pub(crate) fn report(session: &Session, record: &Value) -> Result<()> {
    let format = match session.opts.output {
        OutputFormat::Yaml => OutputFormat::Yaml,
        _ => OutputFormat::Json,
    };
    session.out.result(record, format, None)
}

/// The `id` of a record the server just returned.
pub(crate) fn id_of(created: &Value) -> Result<String> {
    lookup(created, "id")
        .ok_or_else(|| ToolkitError::not_found("response did not include an 'id'"))
}

pub(crate) fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        ToolkitError::validation(format!("unable to read '{}': {e}", path.display()))
    })
}

/// Parse a JSON credential file, naming the file on failure.
pub(crate) fn read_json(path: &Path) -> Result<Value> {
    serde_json::from_str(read_file(path)?.trim_end()).map_err(|_| {
        ToolkitError::validation(format!("{} does not seem to be valid JSON", path.display()))
    })
}

/// Parse a kubeconfig and return it with the name of its first cluster.
pub(crate) fn read_kubeconfig(path: &Path) -> Result<(Value, String)> {
    let parsed: Value = serde_yaml::from_str(read_file(path)?.trim_end()).map_err(|e| {
        ToolkitError::validation(format!("{} is not valid YAML: {e}", path.display()))
    })?;
    let name = lookup(&parsed, "clusters.*.name").ok_or_else(|| {
        ToolkitError::validation(format!("{} does not name any cluster", path.display()))
    })?;
    Ok((parsed, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_account_credentials_are_generic() {
        let body = credential_body(
            "astra-sa@gcp1",
            "service-account",
            json!({"base64": "e30="}),
            Some("GCP"),
        );
        assert_eq!(body["keyType"], "generic");
        assert_eq!(body["metadata"]["labels"][0]["value"], "service-account");
        assert_eq!(body["metadata"]["labels"][1]["name"], CLOUD_NAME_LABEL);
        assert_eq!(body["metadata"]["labels"][1]["value"], "GCP");
    }

    #[test]
    fn test_s3_credential_has_single_label() {
        let body = credential_body("bkt", "s3", json!({}), None);
        assert_eq!(body["keyType"], "s3");
        assert_eq!(body["metadata"]["labels"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_read_kubeconfig_first_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kc.yaml");
        std::fs::write(
            &path,
            "apiVersion: v1\nclusters:\n- name: prod-east\n  cluster:\n    server: https://x\n",
        )
        .unwrap();
        let (parsed, name) = read_kubeconfig(&path).unwrap();
        assert_eq!(name, "prod-east");
        assert_eq!(parsed["apiVersion"], "v1");
    }

    #[test]
    fn test_read_json_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cred.json");
        std::fs::write(&path, "not json").unwrap();
        let err = read_json(&path).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("valid JSON"));
    }
}
