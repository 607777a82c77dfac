use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, ToolkitError};

pub const CONFIG_FILE: &str = "config.yaml";
pub const CONFIG_ENV: &str = "ASTRATOOLKITS_CONF";
pub const DEFAULT_DOMAIN: &str = "astra.netapp.io";

/* ============================= REST CONFIG ============================= */

#[derive(Debug, Deserialize)]
struct RawConfig {
    astra_project: Option<String>,
    uid: Option<String>,
    headers: Option<BTreeMap<String, String>>,
    #[serde(rename = "verifySSL")]
    verify_ssl: Option<bool>,
}

/// Validated REST-mode configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RestConfig {
    pub project: String,
    pub account_id: String,
    pub headers: BTreeMap<String, String>,
    pub verify_ssl: bool,
    pub base: String,
}

impl RestConfig {
    /// Load from the first readable `config.yaml` in the standard search order.
    pub fn load() -> Result<Self> {
        Self::load_from_dirs(&search_dirs())
    }

    pub fn load_from_dirs(dirs: &[PathBuf]) -> Result<Self> {
        for dir in dirs {
            let path = dir.join(CONFIG_FILE);
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    debug!(path = %path.display(), "config_found");
                    return Self::from_yaml(&text, &path.display().to_string());
                }
                Err(e) => debug!(path = %path.display(), error = %e, "config_skipped"),
            }
        }
        let searched = dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(ToolkitError::ConfigMissing { searched })
    }

    pub fn from_yaml(text: &str, source_name: &str) -> Result<Self> {
        let invalid = |reason: String| ToolkitError::ConfigInvalid {
            source_name: source_name.to_string(),
            reason,
        };
        let raw: RawConfig = serde_yaml::from_str(text).map_err(|e| invalid(e.to_string()))?;

        let project = raw
            .astra_project
            .filter(|p| !p.is_empty())
            .ok_or_else(|| invalid("missing required field 'astra_project'".into()))?;
        let account_id = raw
            .uid
            .filter(|u| !u.is_empty())
            .ok_or_else(|| invalid("missing required field 'uid'".into()))?;
        let headers = raw
            .headers
            .ok_or_else(|| invalid("missing required field 'headers'".into()))?;
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("authorization")) {
            return Err(invalid("'headers' must contain an 'Authorization' entry".into()));
        }

        let host = project_host(&project);
        Ok(Self {
            base: format!("https://{host}/accounts/{account_id}/"),
            project,
            account_id,
            headers,
            verify_ssl: raw.verify_ssl.unwrap_or(true),
        })
    }

    pub fn host(&self) -> String {
        project_host(&self.project)
    }

    /// Domain used for derived endpoints such as the image registry.
    pub fn domain(&self) -> String {
        if self.project.contains('.') {
            self.project.clone()
        } else {
            DEFAULT_DOMAIN.to_string()
        }
    }

    /// Bearer token carried in the Authorization header, without the scheme.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("authorization"))
            .map(|(_, v)| v.strip_prefix("Bearer ").unwrap_or(v).trim())
    }
}

fn project_host(project: &str) -> String {
    if project.contains('.') {
        project.to_string()
    } else {
        format!("{project}.{DEFAULT_DOMAIN}")
    }
}

/// cwd, `~/.config/astra-toolkits`, `/etc/astra-toolkits`, then `$ASTRATOOLKITS_CONF`.
pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(home) = std::env::var_os("HOME") {
        dirs.push(PathBuf::from(home).join(".config").join("astra-toolkits"));
    }
    dirs.push(PathBuf::from("/etc/astra-toolkits"));
    if let Some(conf) = std::env::var_os(CONFIG_ENV) {
        dirs.push(PathBuf::from(conf));
    }
    dirs
}

/* ============================= KUBE TARGET ============================= */

/// Which cluster a `--v3` invocation talks to.
///
/// Parsed from the `context@kubeconfig` argument; every form normalises to
/// a canonical `context@kubeconfig` string where missing halves are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KubeTarget {
    /// Bare `--v3`: current context of the default kubeconfig.
    Default,
    Mapping { context: String, kubeconfig: PathBuf },
    Kubeconfig(PathBuf),
    Context(String),
    InCluster,
}

impl KubeTarget {
    /// Parse using the real environment to decide on in-cluster config.
    pub fn parse(input: Option<&str>) -> Self {
        let default_kubeconfig_exists = default_kubeconfig_path().is_some_and(|p| p.exists());
        let in_cluster = std::env::var_os("KUBERNETES_SERVICE_HOST").is_some();
        Self::resolve(input, default_kubeconfig_exists, in_cluster, |p| p.is_file())
    }

    /// Pure resolution rules, with the environment supplied by the caller.
    pub fn resolve(
        input: Option<&str>,
        default_kubeconfig_exists: bool,
        in_cluster: bool,
        is_file: impl Fn(&Path) -> bool,
    ) -> Self {
        let input = input.map(str::trim).unwrap_or_default();
        if input.is_empty() {
            return if !default_kubeconfig_exists && in_cluster {
                Self::InCluster
            } else {
                Self::Default
            };
        }
        if let Some((context, kubeconfig)) = input.rsplit_once('@') {
            return match (context.is_empty(), kubeconfig.is_empty()) {
                (false, false) => Self::Mapping {
                    context: context.to_string(),
                    kubeconfig: expand_home(kubeconfig),
                },
                (true, false) => Self::Kubeconfig(expand_home(kubeconfig)),
                (false, true) => Self::Context(context.to_string()),
                (true, true) => Self::Default,
            };
        }
        let as_path = expand_home(input);
        if is_file(&as_path) {
            Self::Kubeconfig(as_path)
        } else {
            Self::Context(input.to_string())
        }
    }

    pub fn context(&self) -> Option<&str> {
        match self {
            Self::Mapping { context, .. } | Self::Context(context) => Some(context),
            _ => None,
        }
    }

    pub fn kubeconfig(&self) -> Option<&Path> {
        match self {
            Self::Mapping { kubeconfig, .. } | Self::Kubeconfig(kubeconfig) => Some(kubeconfig),
            _ => None,
        }
    }

    pub fn canonical(&self) -> String {
        match self {
            Self::InCluster => "incluster@None".to_string(),
            _ => format!(
                "{}@{}",
                self.context().unwrap_or("None"),
                self.kubeconfig()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "None".to_string())
            ),
        }
    }

    /// Build a kube client config for this target.
    pub async fn kube_config(&self, insecure_skip_tls_verify: bool) -> Result<kube::Config> {
        let invalid = |reason: String| ToolkitError::ConfigInvalid {
            source_name: self.canonical(),
            reason,
        };
        let mut config = match self {
            Self::Default => kube::Config::infer()
                .await
                .map_err(|e| invalid(e.to_string()))?,
            Self::InCluster => kube::Config::incluster().map_err(|e| invalid(e.to_string()))?,
            Self::Mapping { .. } | Self::Kubeconfig(_) | Self::Context(_) => {
                let kubeconfig = match self.kubeconfig() {
                    Some(path) => kube::config::Kubeconfig::read_from(path),
                    None => kube::config::Kubeconfig::read(),
                }
                .map_err(|e| invalid(e.to_string()))?;
                kube::Config::from_custom_kubeconfig(
                    kubeconfig,
                    &kube::config::KubeConfigOptions {
                        context: self.context().map(str::to_string),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| invalid(e.to_string()))?
            }
        };
        if insecure_skip_tls_verify {
            config.accept_invalid_certs = true;
        }
        Ok(config)
    }
}

/// Contexts known to the given (or default) kubeconfig.
pub fn list_contexts(kubeconfig: Option<&Path>) -> Result<Vec<String>> {
    let parsed = match kubeconfig {
        Some(path) => kube::config::Kubeconfig::read_from(path),
        None => kube::config::Kubeconfig::read(),
    }
    .map_err(|e| ToolkitError::ConfigInvalid {
        source_name: kubeconfig
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "kubeconfig".to_string()),
        reason: e.to_string(),
    })?;
    Ok(parsed.contexts.iter().map(|c| c.name.clone()).collect())
}

fn default_kubeconfig_path() -> Option<PathBuf> {
    if let Some(env) = std::env::var_os("KUBECONFIG") {
        return std::env::split_paths(&env).next();
    }
    std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".kube").join("config"))
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
headers:
  Authorization: Bearer abc123
uid: 11111111-2222-3333-4444-555555555555
astra_project: preview
"#;

    #[test]
    fn test_short_project_gets_default_domain() {
        let cfg = RestConfig::from_yaml(VALID, "test").unwrap();
        assert_eq!(
            cfg.base,
            "https://preview.astra.netapp.io/accounts/11111111-2222-3333-4444-555555555555/"
        );
        assert!(cfg.verify_ssl);
        assert_eq!(cfg.domain(), "astra.netapp.io");
    }

    #[test]
    fn test_fqdn_project_used_verbatim() {
        let yaml = VALID.replace("preview", "astra.example.com");
        let cfg = RestConfig::from_yaml(&yaml, "test").unwrap();
        assert_eq!(cfg.host(), "astra.example.com");
        assert!(cfg.base.starts_with("https://astra.example.com/accounts/"));
        assert_eq!(cfg.domain(), "astra.example.com");
    }

    #[test]
    fn test_verify_ssl_false() {
        let yaml = format!("{VALID}verifySSL: false\n");
        let cfg = RestConfig::from_yaml(&yaml, "test").unwrap();
        assert!(!cfg.verify_ssl);
    }

    #[test]
    fn test_missing_uid_is_invalid() {
        let yaml = "headers:\n  Authorization: Bearer x\nastra_project: p\n";
        let err = RestConfig::from_yaml(yaml, "test").unwrap_err();
        assert!(matches!(err, ToolkitError::ConfigInvalid { .. }));
        assert!(err.to_string().contains("uid"));
    }

    #[test]
    fn test_missing_authorization_is_invalid() {
        let yaml = "headers:\n  Accept: x\nuid: u\nastra_project: p\n";
        let err = RestConfig::from_yaml(yaml, "test").unwrap_err();
        assert!(err.to_string().contains("Authorization"));
    }

    #[test]
    fn test_bearer_token_strips_scheme() {
        let cfg = RestConfig::from_yaml(VALID, "test").unwrap();
        assert_eq!(cfg.bearer_token(), Some("abc123"));
    }

    #[test]
    fn test_load_from_dirs_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = RestConfig::load_from_dirs(&[dir.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, ToolkitError::ConfigMissing { .. }));
    }

    #[test]
    fn test_load_from_dirs_first_readable_wins() {
        let empty = tempfile::tempdir().unwrap();
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join(CONFIG_FILE), VALID).unwrap();
        std::fs::write(
            second.path().join(CONFIG_FILE),
            VALID.replace("preview", "other"),
        )
        .unwrap();
        let cfg = RestConfig::load_from_dirs(&[
            empty.path().to_path_buf(),
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ])
        .unwrap();
        assert_eq!(cfg.project, "preview");
    }

    // ── kube target ──

    fn resolve(input: Option<&str>) -> KubeTarget {
        KubeTarget::resolve(input, true, false, |p| p.ends_with("exists.yaml"))
    }

    #[test]
    fn test_bare_v3_is_default() {
        assert_eq!(resolve(None), KubeTarget::Default);
        assert_eq!(resolve(Some("")), KubeTarget::Default);
        assert_eq!(resolve(None).canonical(), "None@None");
    }

    #[test]
    fn test_explicit_mapping() {
        let t = resolve(Some("prod@/tmp/kc.yaml"));
        assert_eq!(
            t,
            KubeTarget::Mapping {
                context: "prod".into(),
                kubeconfig: PathBuf::from("/tmp/kc.yaml")
            }
        );
        assert_eq!(t.canonical(), "prod@/tmp/kc.yaml");
    }

    #[test]
    fn test_kubeconfig_only() {
        assert_eq!(
            resolve(Some("/tmp/exists.yaml")),
            KubeTarget::Kubeconfig(PathBuf::from("/tmp/exists.yaml"))
        );
        assert_eq!(
            resolve(Some("@/tmp/kc.yaml")),
            KubeTarget::Kubeconfig(PathBuf::from("/tmp/kc.yaml"))
        );
    }

    #[test]
    fn test_context_only() {
        let t = resolve(Some("staging"));
        assert_eq!(t, KubeTarget::Context("staging".into()));
        assert_eq!(t.canonical(), "staging@None");
        assert_eq!(resolve(Some("staging@")), KubeTarget::Context("staging".into()));
    }

    #[test]
    fn test_in_cluster_when_no_kubeconfig() {
        let t = KubeTarget::resolve(None, false, true, |_| false);
        assert_eq!(t, KubeTarget::InCluster);
        let t = KubeTarget::resolve(None, true, true, |_| false);
        assert_eq!(t, KubeTarget::Default);
    }

    #[test]
    fn test_list_contexts_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubeconfig");
        std::fs::write(
            &path,
            r#"
apiVersion: v1
kind: Config
clusters:
- name: c1
  cluster:
    server: https://127.0.0.1:6443
users:
- name: u1
  user:
    token: abc
contexts:
- name: alpha
  context:
    cluster: c1
    user: u1
- name: beta
  context:
    cluster: c1
    user: u1
current-context: alpha
"#,
        )
        .unwrap();
        let contexts = list_contexts(Some(&path)).unwrap();
        assert_eq!(contexts, vec!["alpha".to_string(), "beta".to_string()]);
    }
}
