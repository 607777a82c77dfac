use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::{create_credential, credential_body, encode, read_file, read_json, report};
use crate::cache::Collection;
use crate::cli::{BucketProvider, CloudType, ManageBucketArgs, ManageLdapArgs, ManageTarget};
use crate::config::RestConfig;
use crate::crd::{
    AppVault, Application, ApplicationSpec, AstraConnector, AstraConnectorSpec, AutoSupport,
    ConnectorAstra, ImageRegistry, LabelSelector, NatsSyncClient, SecretKeyRef, SecretValue,
};
use crate::error::{Result, ToolkitError};
use crate::helpers::{
    allowed_cluster_scoped_resources, create_csr_list, create_namespace_list, extract_aws_keys,
    is_rfc1123, operator_url,
};
use crate::kube_client::{CONNECTOR_NAMESPACE, Gvr, KubeClient};
use crate::output::parse_documents;
use crate::path::lookup;
use crate::rest::{endpoints, media};
use crate::session::Session;
use crate::surface::ListScope;
use crate::templates::{self, ObjectName, S3_ACCESS_KEY, S3_SECRET_KEY};

/// Name of the singleton LDAP setting record.
pub const LDAP_SETTING: &str = "astra.account.ldap";
pub const API_TOKEN_SECRET: &str = "astra-api-token";
pub const CONNECTOR_NAME: &str = "astra-connector";

pub async fn run(session: &mut Session, target: &ManageTarget) -> Result<()> {
    match target {
        ManageTarget::App {
            app_name,
            namespace,
            cluster_id,
            label_selectors,
            additional_namespace,
            cluster_scoped_resource,
        } => {
            let request = AppRequest {
                name: app_name,
                namespace,
                cluster: cluster_id.as_deref(),
                label: label_selectors.as_deref(),
                additional: additional_namespace,
                cluster_scoped: cluster_scoped_resource,
            };
            app(session, request).await
        }
        ManageTarget::Bucket(args) => {
            if session.is_v3() {
                app_vault(session, args).await
            } else {
                bucket(session, args).await
            }
        }
        ManageTarget::Cloud {
            cloud_type,
            cloud_name,
            credential_path,
            default_bucket_id,
        } => {
            let credential = match (cloud_type, credential_path) {
                (CloudType::Private, _) => None,
                (_, None) => {
                    return Err(ToolkitError::validation(format!(
                        "--credentialPath is required for cloudType of {}",
                        cloud_type.as_str()
                    )));
                }
                (_, Some(path)) => {
                    let service_account = read_json(path)?;
                    let body = credential_body(
                        &format!("astra-sa@{cloud_name}"),
                        "service-account",
                        json!({ "base64": encode(serde_json::to_string(&service_account)?) }),
                        Some(cloud_type.as_str()),
                    );
                    Some(create_credential(session, body).await?)
                }
            };
            let mut body = json!({ "name": cloud_name, "cloudType": cloud_type.as_str() });
            if let Some(c) = credential {
                body["credentialID"] = json!(c);
            }
            if let Some(b) = default_bucket_id {
                body["defaultBucketID"] = json!(b);
            }
            let created = session.rest()?.post(endpoints::CLOUDS, &media::CLOUD, body).await?;
            report(session, &created)
        }
        ManageTarget::Cluster {
            cluster,
            default_storage_class_id,
            cloud_id,
            operator_version,
            reg_cred,
            registry,
            headless,
        } => {
            if session.is_v3() {
                let request = ConnectorRequest {
                    cluster_name: cluster,
                    cloud_id: cloud_id.as_deref(),
                    operator_version,
                    reg_cred: reg_cred.as_deref(),
                    registry: registry.as_deref(),
                    headless: *headless,
                };
                return connector(session, request).await;
            }
            let id = session.resolve_id(Collection::Clusters, cluster).await?;
            let mut body = json!({ "id": id });
            if let Some(sc) = default_storage_class_id {
                body["defaultStorageClass"] = json!(sc);
            }
            info!(cluster = %id, "managing_cluster");
            let created = session
                .rest()?
                .post(endpoints::MANAGED_CLUSTERS, &media::MANAGED_CLUSTER, body)
                .await?;
            report(session, &created)
        }
        ManageTarget::Ldap(args) => ldap(session, args).await,
    }
}

/* ============================= APP ============================= */

struct AppRequest<'a> {
    name: &'a str,
    namespace: &'a str,
    cluster: Option<&'a str>,
    label: Option<&'a str>,
    additional: &'a [Vec<String>],
    cluster_scoped: &'a [Vec<String>],
}

/// Body for `POST k8s/v2/apps`.
pub fn manage_app_body(
    name: &str,
    namespace: &str,
    cluster: &str,
    label: Option<&str>,
    additional: Vec<Value>,
    cluster_scoped: Vec<Value>,
) -> Value {
    let mut primary = json!({ "namespace": namespace });
    if let Some(l) = label {
        primary["labelSelectors"] = json!([l]);
    }
    let mut namespaces = vec![primary];
    namespaces.extend(additional);
    let mut body = json!({
        "name": name,
        "clusterID": cluster,
        "namespaceScopedResources": namespaces,
    });
    if !cluster_scoped.is_empty() {
        body["clusterScopedResources"] = json!(cluster_scoped);
    }
    body
}

async fn app(session: &mut Session, request: AppRequest<'_>) -> Result<()> {
    let name = is_rfc1123(request.name)?;
    let v3 = session.is_v3();
    let additional = create_namespace_list(request.additional, v3)?;

    if v3 {
        let cluster_scoped = create_csr_list(
            request.cluster_scoped,
            &allowed_cluster_scoped_resources(),
            true,
        )?;
        let label_selector = request
            .label
            .map(|l| {
                LabelSelector::from_pair(l).ok_or_else(|| {
                    ToolkitError::validation(format!("'{l}' is not a 'key=value' label"))
                })
            })
            .transpose()?;
        let mut namespaces = vec![json!({
            "namespace": request.namespace,
            "labelSelector": label_selector,
        })];
        namespaces.extend(additional);
        let spec = ApplicationSpec {
            included_namespaces: serde_json::from_value(json!(namespaces))?,
            included_cluster_scoped_resources: serde_json::from_value(json!(cluster_scoped))?,
        };
        let doc = templates::application(&name, spec)?;
        session
            .kube()?
            .create(&Gvr::of::<Application>(), Some(CONNECTOR_NAMESPACE), doc)
            .await?;
        return Ok(());
    }

    let cluster = request
        .cluster
        .ok_or_else(|| ToolkitError::validation("clusterID is required to manage an app"))?;
    let cluster = session.resolve_id(Collection::Clusters, cluster).await?;
    let cluster_scoped = if request.cluster_scoped.is_empty() {
        Vec::new()
    } else {
        let api_resources = session
            .surface
            .list(Collection::ApiResources, &ListScope::cluster(&cluster))
            .await?;
        create_csr_list(request.cluster_scoped, &api_resources, false)?
    };
    let body = manage_app_body(
        &name,
        request.namespace,
        &cluster,
        request.label,
        additional,
        cluster_scoped,
    );
    let created = session
        .rest()?
        .post(endpoints::APPS, &media::APP_MANAGE, body)
        .await?;
    report(session, &created)
}

/* ============================= BUCKET ============================= */

fn check_provider_fields(args: &ManageBucketArgs) -> Result<()> {
    if args.provider.needs_server_url() && args.server_url.is_none() {
        return Err(ToolkitError::validation(format!(
            "--serverURL must be provided for '{}' provider",
            args.provider.as_str()
        )));
    }
    if args.provider == BucketProvider::Azure && args.storage_account.is_none() {
        return Err(ToolkitError::validation(
            "--storageAccount must be provided for 'azure' provider",
        ));
    }
    Ok(())
}

/// `bucketParameters` of a v1 bucket record.
pub fn bucket_parameters(args: &ManageBucketArgs) -> Result<Value> {
    check_provider_fields(args)?;
    Ok(match args.provider {
        BucketProvider::Azure => json!({"azure": {
            "bucketName": args.bucket_name,
            "storageAccount": args.storage_account,
        }}),
        BucketProvider::Gcp => json!({"gcp": {"bucketName": args.bucket_name}}),
        _ => json!({"s3": {"bucketName": args.bucket_name, "serverURL": args.server_url}}),
    })
}

/// The access key pair from inline flags or a cloud credential file.
fn access_key_pair(args: &ManageBucketArgs) -> Result<Option<(String, String)>> {
    match (&args.access_key, &args.access_secret, &args.credential_path) {
        (Some(k), Some(s), None) => Ok(Some((k.clone(), s.clone()))),
        (None, None, Some(path)) if args.provider != BucketProvider::Gcp => {
            let credential = read_json(path)?;
            extract_aws_keys(&credential).map(Some).ok_or_else(|| {
                ToolkitError::validation(format!(
                    "{} does not contain an access key id and secret access key",
                    path.display()
                ))
            })
        }
        (None, None, _) => Ok(None),
        _ => Err(ToolkitError::validation(
            "specify either both --accessKey and --accessSecret, or --credentialPath",
        )),
    }
}

async fn bucket(session: &mut Session, args: &ManageBucketArgs) -> Result<()> {
    let parameters = bucket_parameters(args)?;
    let credential = match (&args.credential_id, access_key_pair(args)?) {
        (Some(_), Some(_)) => {
            return Err(ToolkitError::validation(
                "if a credentialID is specified, neither accessKey nor accessSecret should be specified",
            ));
        }
        (Some(c), None) => c.clone(),
        (None, Some((key, secret))) => {
            let body = credential_body(
                &args.bucket_name,
                "s3",
                json!({"accessKey": encode(key), "accessSecret": encode(secret)}),
                Some("s3"),
            );
            create_credential(session, body).await?
        }
        (None, None) => {
            return Err(ToolkitError::validation(
                "if a credentialID is not specified, both accessKey and accessSecret arguments must be provided",
            ));
        }
    };
    let body = json!({
        "name": args.bucket_name,
        "credentialID": credential,
        "provider": args.provider.as_str(),
        "bucketParameters": parameters,
    });
    let created = session.rest()?.post(endpoints::BUCKETS, &media::BUCKET, body).await?;
    report(session, &created)
}

/// Keys of `providerCredentials` each provider expects.
pub fn credential_keys(provider: BucketProvider) -> &'static [&'static str] {
    match provider {
        BucketProvider::Azure => &["accountKey"],
        BucketProvider::Gcp => &["credentials"],
        _ => &[S3_ACCESS_KEY, S3_SECRET_KEY],
    }
}

/// AppVault spec for `args`, with credentials taken from `secrets` in the
/// order [`credential_keys`] lists them.
pub fn app_vault_spec(
    args: &ManageBucketArgs,
    secrets: &[(String, String)],
) -> Result<crate::crd::AppVaultSpec> {
    check_provider_fields(args)?;
    let keys = credential_keys(args.provider);
    if secrets.len() != keys.len() {
        return Err(ToolkitError::validation(format!(
            "'{}' appVaults need {} secret reference(s), got {}",
            args.provider.as_str(),
            keys.len(),
            secrets.len()
        )));
    }
    let mut config = BTreeMap::from([("bucketName".to_string(), args.bucket_name.clone())]);
    match args.provider {
        BucketProvider::Azure => {
            if let Some(account) = &args.storage_account {
                config.insert("accountName".into(), account.clone());
            }
        }
        BucketProvider::Gcp => {}
        _ => {
            if let Some(url) = &args.server_url {
                config.insert("endpoint".into(), url.clone());
            }
            if args.http {
                config.insert("secure".into(), "false".into());
            }
            if args.skip_cert_validation {
                config.insert("skipCertValidation".into(), "true".into());
            }
        }
    }
    let provider_credentials = keys
        .iter()
        .zip(secrets)
        .map(|(k, (name, key))| {
            (
                k.to_string(),
                SecretValue {
                    value_from_secret: SecretKeyRef {
                        name: name.clone(),
                        key: key.clone(),
                    },
                },
            )
        })
        .collect();
    Ok(crate::crd::AppVaultSpec {
        provider_type: args.provider.as_str().to_string(),
        provider_config: config,
        provider_credentials,
    })
}

async fn app_vault(session: &mut Session, args: &ManageBucketArgs) -> Result<()> {
    let name = is_rfc1123(args.app_vault_name.as_deref().unwrap_or(&args.bucket_name))?;
    let kube = session.kube()?;
    let secret_name = format!("{name}-credentials");

    let secrets: Vec<(String, String)> = if !args.secret.is_empty() {
        args.secret
            .iter()
            .map(|pair| match pair.as_slice() {
                [n, k] => Ok((n.clone(), k.clone())),
                _ => Err(ToolkitError::validation("--secret takes a secret name and a key")),
            })
            .collect::<Result<_>>()?
    } else if args.provider == BucketProvider::Gcp {
        let path = args.credential_path.as_ref().ok_or_else(|| {
            ToolkitError::validation("--credentialPath or --secret is required for 'gcp' appVaults")
        })?;
        let contents = read_file(path)?;
        let doc = templates::file_secret(
            &secret_name,
            CONNECTOR_NAMESPACE,
            "credentials",
            contents.as_bytes(),
        )?;
        kube.create_secret(CONNECTOR_NAMESPACE, doc).await?;
        vec![(secret_name, "credentials".to_string())]
    } else {
        let (key, secret) = access_key_pair(args)?.ok_or_else(|| {
            ToolkitError::validation(
                "one of --secret, --accessKey/--accessSecret or --credentialPath is required",
            )
        })?;
        if args.provider == BucketProvider::Azure {
            let doc = templates::file_secret(
                &secret_name,
                CONNECTOR_NAMESPACE,
                "accountKey",
                secret.as_bytes(),
            )?;
            kube.create_secret(CONNECTOR_NAMESPACE, doc).await?;
            vec![(secret_name, "accountKey".to_string())]
        } else {
            let doc = templates::s3_secret(&secret_name, CONNECTOR_NAMESPACE, &key, &secret)?;
            kube.create_secret(CONNECTOR_NAMESPACE, doc).await?;
            vec![
                (secret_name.clone(), S3_ACCESS_KEY.to_string()),
                (secret_name, S3_SECRET_KEY.to_string()),
            ]
        }
    };

    let doc = templates::app_vault(&name, app_vault_spec(args, &secrets)?)?;
    kube.create(&Gvr::of::<AppVault>(), Some(CONNECTOR_NAMESPACE), doc)
        .await?;
    Ok(())
}

/* ============================= CONNECTOR ============================= */

/// Registry host taken from the first `auths` entry of a pull secret.
pub fn registry_from_pull_secret(secret: &Value) -> Option<String> {
    let encoded = secret.pointer("/data/.dockerconfigjson").and_then(Value::as_str)?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let config: Value = serde_json::from_slice(&decoded).ok()?;
    config
        .get("auths")
        .and_then(Value::as_object)
        .and_then(|auths| auths.keys().next().cloned())
}

/// A pull secret for `registry` that the connector or trident can use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySecret {
    pub name: String,
    pub registry: String,
}

/// Look up `reg_cred` in `namespace`, or create a pull secret for the
/// control plane registry from the account id and API token.
pub(crate) async fn ensure_registry_secret(
    kube: &KubeClient,
    namespace: &str,
    reg_cred: Option<&str>,
    registry: Option<&str>,
    config: Option<&RestConfig>,
) -> Result<RegistrySecret> {
    if let Some(name) = reg_cred {
        let secrets = kube.secrets(namespace).await?;
        let secret = secrets
            .get("items")
            .and_then(Value::as_array)
            .and_then(|items| {
                items
                    .iter()
                    .find(|s| lookup(s, "metadata.name").as_deref() == Some(name))
            })
            .ok_or_else(|| {
                ToolkitError::not_found(format!(
                    "secret '{name}' not found in namespace {namespace}"
                ))
            })?;
        let registry = match registry {
            Some(r) => r.to_string(),
            None => registry_from_pull_secret(secret).ok_or_else(|| {
                ToolkitError::validation(format!(
                    "secret '{name}' has no registry in its .dockerconfigjson, specify --registry"
                ))
            })?,
        };
        return Ok(RegistrySecret {
            name: name.to_string(),
            registry,
        });
    }

    let config = config.ok_or_else(|| {
        ToolkitError::validation("a config.yaml is required unless --regCred is given")
    })?;
    let registry = registry
        .map(str::to_string)
        .unwrap_or_else(|| format!("cr.{}", config.domain()));
    let token = config
        .bearer_token()
        .ok_or_else(|| ToolkitError::validation("config.yaml has no API token"))?;
    let prefix = format!("{}-", registry.replace('.', "-"));
    let doc = templates::registry_secret(
        &ObjectName::generated(prefix.clone()),
        namespace,
        &registry,
        &config.account_id,
        token,
    )?;
    let created = kube.create_secret(namespace, doc).await?;
    let name = lookup(&created, "metadata.name").unwrap_or(prefix);
    debug!(secret = %name, registry = %registry, "registry_secret_created");
    Ok(RegistrySecret { name, registry })
}

struct ConnectorRequest<'a> {
    cluster_name: &'a str,
    cloud_id: Option<&'a str>,
    operator_version: &'a str,
    reg_cred: Option<&'a str>,
    registry: Option<&'a str>,
    headless: bool,
}

async fn connector(session: &mut Session, request: ConnectorRequest<'_>) -> Result<()> {
    let config = session.rest_config.as_ref();
    if config.is_none() && !request.headless {
        return Err(ToolkitError::validation(
            "a config.yaml is required to register the cluster with the control plane",
        ));
    }
    let kube = session.kube()?;

    let url = operator_url(request.operator_version);
    let manifest = session.tools.fetch_manifest(&url).await?;
    kube.apply_all(&parse_documents(&manifest)?).await?;
    info!(url = %url, "connector_operator_applied");

    let token_ref = match (request.headless, config.and_then(RestConfig::bearer_token)) {
        (false, Some(token)) => {
            let doc = templates::api_token_secret(API_TOKEN_SECRET, CONNECTOR_NAMESPACE, token)?;
            kube.create_secret(CONNECTOR_NAMESPACE, doc).await?;
            Some(API_TOKEN_SECRET.to_string())
        }
        (false, None) => return Err(ToolkitError::validation("config.yaml has no API token")),
        (true, _) => None,
    };

    let pull = ensure_registry_secret(
        kube,
        CONNECTOR_NAMESPACE,
        request.reg_cred,
        request.registry,
        config,
    )
    .await?;

    let spec = AstraConnectorSpec {
        astra: ConnectorAstra {
            account_id: config.map(|c| c.account_id.clone()).unwrap_or_default(),
            cluster_name: request.cluster_name.to_string(),
            cloud_id: request.cloud_id.map(str::to_string),
            token_ref,
            skip_tls_validation: config.is_some_and(|c| !c.verify_ssl),
            unregister: false,
        },
        nats_sync_client: match (request.headless, config) {
            (false, Some(c)) => Some(NatsSyncClient {
                cloud_bridge_url: c.host(),
            }),
            _ => None,
        },
        image_registry: ImageRegistry {
            name: format!("{}/astra", pull.registry),
            secret: pull.name,
        },
        auto_support: AutoSupport { enrolled: true },
    };
    let doc = templates::astra_connector(CONNECTOR_NAME, spec)?;
    kube.create(&Gvr::of::<AstraConnector>(), Some(CONNECTOR_NAMESPACE), doc)
        .await?;
    Ok(())
}

/* ============================= LDAP ============================= */

/// `desiredConfig` enabling LDAP with the bind credential `credential`.
pub fn ldap_desired_config(args: &ManageLdapArgs, credential: &str) -> Value {
    let mut config = Map::new();
    let mut set = |k: &str, v: Value| {
        config.insert(k.to_string(), v);
    };
    set("connectionHost", json!(args.url));
    set("credentialId", json!(credential));
    set("groupBaseDN", json!(args.group_base_dn));
    set("isEnabled", json!("true"));
    set("port", json!(args.port));
    set("secureMode", json!(if args.insecure { "LDAP" } else { "LDAPS" }));
    set("userBaseDN", json!(args.user_base_dn));
    set("userSearchFilter", json!(args.user_search_filter));
    set("userLoginAttribute", json!(args.user_login_attribute));
    if let Some(f) = &args.group_search_filter {
        set("groupSearchCustomFilter", json!(f));
    }
    Value::Object(config)
}

pub(crate) async fn ldap_setting_id(session: &mut Session) -> Result<String> {
    session.fetch(Collection::Settings).await?;
    let setting = session
        .cache
        .get_single(Collection::Settings, "name", LDAP_SETTING)?;
    lookup(setting, "id").ok_or_else(|| ToolkitError::not_found("the LDAP setting has no id"))
}

async fn ldap(session: &mut Session, args: &ManageLdapArgs) -> Result<()> {
    let setting = ldap_setting_id(session).await?;
    let credential = credential_body(
        &args.cred_username,
        "generic",
        json!({
            "username": encode(&args.cred_username),
            "password": encode(&args.cred_password),
        }),
        None,
    );
    let credential = create_credential(session, credential).await?;
    let body = json!({ "desiredConfig": ldap_desired_config(args, &credential) });
    let updated = session
        .rest()?
        .put(&format!("{}/{setting}", endpoints::SETTINGS), &media::SETTING, body)
        .await?;
    report(session, &updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn bucket_args(provider: BucketProvider) -> ManageBucketArgs {
        ManageBucketArgs {
            provider,
            bucket_name: "backups".into(),
            app_vault_name: None,
            credential_id: None,
            secret: Vec::new(),
            access_key: None,
            access_secret: None,
            credential_path: None,
            server_url: Some("s3.example.com".into()),
            storage_account: None,
            http: false,
            skip_cert_validation: false,
        }
    }

    #[test]
    fn test_manage_app_body_merges_namespaces() {
        let body = manage_app_body(
            "wp",
            "wordpress",
            "c1",
            Some("app=wp"),
            vec![json!({"namespace": "db"})],
            vec![json!({"GVK": {"kind": "ClusterRole"}})],
        );
        assert_eq!(body["namespaceScopedResources"][0]["labelSelectors"], json!(["app=wp"]));
        assert_eq!(body["namespaceScopedResources"][1]["namespace"], "db");
        assert_eq!(body["clusterScopedResources"][0]["GVK"]["kind"], "ClusterRole");
        let bare = manage_app_body("wp", "wordpress", "c1", None, vec![], vec![]);
        assert!(bare.get("clusterScopedResources").is_none());
    }

    #[test]
    fn test_bucket_parameters_per_provider() {
        let s3 = bucket_parameters(&bucket_args(BucketProvider::OntapS3)).unwrap();
        assert_eq!(s3["s3"]["serverURL"], "s3.example.com");

        let mut azure = bucket_args(BucketProvider::Azure);
        assert!(bucket_parameters(&azure).unwrap_err().is_validation());
        azure.storage_account = Some("acct".into());
        assert_eq!(bucket_parameters(&azure).unwrap()["azure"]["storageAccount"], "acct");

        let mut aws = bucket_args(BucketProvider::Aws);
        aws.server_url = None;
        assert!(bucket_parameters(&aws).is_err());
    }

    #[test]
    fn test_app_vault_spec_maps_secret_keys() {
        let mut args = bucket_args(BucketProvider::GenericS3);
        args.http = true;
        let secrets = vec![
            ("creds".to_string(), "ak".to_string()),
            ("creds".to_string(), "sk".to_string()),
        ];
        let spec = app_vault_spec(&args, &secrets).unwrap();
        assert_eq!(spec.provider_type, "generic-s3");
        assert_eq!(spec.provider_config["endpoint"], "s3.example.com");
        assert_eq!(spec.provider_config["secure"], "false");
        assert_eq!(spec.provider_credentials[S3_SECRET_KEY].value_from_secret.key, "sk");
        assert!(app_vault_spec(&args, &secrets[..1]).is_err());
    }

    #[test]
    fn test_registry_from_pull_secret() {
        let config = json!({"auths": {"cr.example.com": {"auth": "eDp5"}}});
        let secret = json!({"data": {".dockerconfigjson": STANDARD.encode(config.to_string())}});
        assert_eq!(registry_from_pull_secret(&secret).as_deref(), Some("cr.example.com"));
        assert!(registry_from_pull_secret(&json!({"data": {}})).is_none());
    }

    #[test]
    fn test_ldap_desired_config() {
        let args = ManageLdapArgs {
            url: "ldap.example.com".into(),
            port: 636,
            cred_username: "binder".into(),
            cred_password: "pw".into(),
            user_base_dn: "ou=users".into(),
            user_search_filter: "(objectClass=Person)".into(),
            user_login_attribute: "mail".into(),
            group_base_dn: "ou=groups".into(),
            group_search_filter: None,
            insecure: false,
        };
        let config = ldap_desired_config(&args, "cred-1");
        assert_eq!(config["isEnabled"], "true");
        assert_eq!(config["secureMode"], "LDAPS");
        assert_eq!(config["credentialId"], "cred-1");
        assert!(config.get("groupSearchCustomFilter").is_none());
    }

    #[test]
    fn test_access_key_pair_requires_both_halves() {
        let mut args = bucket_args(BucketProvider::Aws);
        assert!(access_key_pair(&args).unwrap().is_none());
        args.access_key = Some("ak".into());
        assert!(access_key_pair(&args).is_err());
        args.access_secret = Some("sk".into());
        assert_eq!(access_key_pair(&args).unwrap(), Some(("ak".into(), "sk".into())));
        args.credential_path = Some(PathBuf::from("/nope.json"));
        assert!(access_key_pair(&args).is_err());
    }
}
