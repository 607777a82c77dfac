use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, ToolkitError};

/* ============================= INTERFACE ============================= */

/// A helm release to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmRelease {
    pub name: String,
    pub chart: String,
    pub namespace: String,
    /// `-f` values files.
    pub values_files: Vec<PathBuf>,
    /// `--set key=value` overrides.
    pub set_values: Vec<String>,
}

impl HelmRelease {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "install".to_string(),
            self.name.clone(),
            self.chart.clone(),
            "--namespace".to_string(),
            self.namespace.clone(),
            "--create-namespace".to_string(),
        ];
        for file in &self.values_files {
            args.push("--values".to_string());
            args.push(file.display().to_string());
        }
        for set in &self.set_values {
            args.push("--set".to_string());
            args.push(set.clone());
        }
        args
    }
}

/// Programs and downloads the toolkit delegates to.
#[async_trait]
pub trait ExternalTools: Send + Sync {
    async fn helm_install(&self, release: &HelmRelease) -> Result<()>;

    /// Run a `kubectl cp ...` command line as exposed by a bundle's status.
    async fn kubectl_cp(
        &self,
        command_line: &str,
        kubeconfig: Option<&Path>,
        context: Option<&str>,
    ) -> Result<()>;

    /// Fetch a manifest published at `url`.
    async fn fetch_manifest(&self, url: &str) -> Result<String>;
}

/* ============================= KUBECTL CP ============================= */

/// Validate and split a `kubectl cp` command line into its arguments, adding
/// the context when one is targeted.
pub fn kubectl_cp_args(command_line: &str, context: Option<&str>) -> Result<Vec<String>> {
    let mut words = command_line.split_whitespace();
    match (words.next(), words.next()) {
        (Some("kubectl"), Some("cp")) => {}
        _ => {
            return Err(ToolkitError::validation(format!(
                "'{command_line}' is not a 'kubectl cp' command"
            )));
        }
    }
    let mut args = vec!["cp".to_string()];
    args.extend(words.map(str::to_string));
    if args.len() < 3 {
        return Err(ToolkitError::validation(format!(
            "'{command_line}' is missing a source or destination"
        )));
    }
    if let Some(ctx) = context {
        args.push("--context".to_string());
        args.push(ctx.to_string());
    }
    Ok(args)
}

/* ============================= SYSTEM ============================= */

/// Runs the real `helm` / `kubectl` binaries and fetches over HTTPS.
pub struct SystemTools {
    http: reqwest::Client,
}

impl SystemTools {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
        })
    }

    async fn run(program: &str, args: &[String], kubeconfig: Option<&Path>) -> Result<()> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdout(Stdio::inherit()).stderr(Stdio::piped());
        if let Some(path) = kubeconfig {
            cmd.env("KUBECONFIG", path);
        }
        debug!(program, args = ?args, "external_command");
        let output = cmd.output().await.map_err(|e| ToolkitError::Tool {
            command: program.to_string(),
            message: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(ToolkitError::Tool {
                command: format!("{program} {}", args.join(" ")),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        info!(program, "external_command_succeeded");
        Ok(())
    }
}

#[async_trait]
impl ExternalTools for SystemTools {
    async fn helm_install(&self, release: &HelmRelease) -> Result<()> {
        Self::run("helm", &release.args(), None).await
    }

    async fn kubectl_cp(
        &self,
        command_line: &str,
        kubeconfig: Option<&Path>,
        context: Option<&str>,
    ) -> Result<()> {
        let args = kubectl_cp_args(command_line, context)?;
        Self::run("kubectl", &args, kubeconfig).await
    }

    async fn fetch_manifest(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolkitError::RemoteFailure {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                body: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helm_args() {
        let release = HelmRelease {
            name: "wordpress".into(),
            chart: "bitnami/wordpress".into(),
            namespace: "wp".into(),
            values_files: vec![PathBuf::from("values.yaml")],
            set_values: vec!["replicaCount=2".into()],
        };
        assert_eq!(
            release.args(),
            vec![
                "install",
                "wordpress",
                "bitnami/wordpress",
                "--namespace",
                "wp",
                "--create-namespace",
                "--values",
                "values.yaml",
                "--set",
                "replicaCount=2"
            ]
        );
    }

    #[test]
    fn test_kubectl_cp_args_with_context() {
        let args = kubectl_cp_args(
            "kubectl cp -n astra-connector neptune-0:/var/asup/b1.tgz ./b1.tgz",
            Some("prod"),
        )
        .unwrap();
        assert_eq!(
            args,
            vec![
                "cp",
                "-n",
                "astra-connector",
                "neptune-0:/var/asup/b1.tgz",
                "./b1.tgz",
                "--context",
                "prod"
            ]
        );
    }

    #[test]
    fn test_kubectl_cp_rejects_other_commands() {
        assert!(kubectl_cp_args("rm -rf /", None).is_err());
        assert!(kubectl_cp_args("kubectl delete ns x", None).is_err());
        assert!(kubectl_cp_args("kubectl cp", None).is_err());
    }
}
