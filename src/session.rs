use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;

use crate::cache::{Collection, ResourceCache};
use crate::config::{KubeTarget, RestConfig};
use crate::error::{Result, ToolkitError};
use crate::external::ExternalTools;
use crate::kube_client::{DryRun, KubeClient, KubeConnector};
use crate::output::{Output, OutputFormat};
use crate::path::lookup;
use crate::rest::RestClient;
use crate::surface::{ListScope, Surface};
use crate::waiter::Waiter;

/// Global flags that shape every command.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub verbose: bool,
    pub quiet: bool,
    pub fast: bool,
    pub output: OutputFormat,
    pub dry_run: DryRun,
    pub insecure: bool,
}

/// Everything one invocation works with: the surface it talks to, the
/// resource cache, the output sink and the collaborators used for
/// cross-cluster work and external programs.
pub struct Session {
    pub surface: Surface,
    pub cache: ResourceCache,
    pub out: Output,
    pub opts: SessionOptions,
    /// Present in v1 mode, and in v3 mode when a `config.yaml` was found.
    pub rest_config: Option<RestConfig>,
    /// The cluster a v3 session was opened against.
    pub kube_target: Option<KubeTarget>,
    pub connector: Arc<dyn KubeConnector>,
    pub tools: Arc<dyn ExternalTools>,
    interrupt: Option<Arc<Notify>>,
}

impl Session {
    pub fn new(
        surface: Surface,
        out: Output,
        opts: SessionOptions,
        connector: Arc<dyn KubeConnector>,
        tools: Arc<dyn ExternalTools>,
    ) -> Self {
        Self {
            surface,
            cache: ResourceCache::new(),
            out,
            opts,
            rest_config: None,
            kube_target: None,
            connector,
            tools,
            interrupt: None,
        }
    }

    pub fn with_rest_config(mut self, config: RestConfig) -> Self {
        self.rest_config = Some(config);
        self
    }

    pub fn with_kube_target(mut self, target: KubeTarget) -> Self {
        self.kube_target = Some(target);
        self
    }

    pub fn with_interrupt(mut self, interrupt: Arc<Notify>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn is_v3(&self) -> bool {
        self.surface.is_v3()
    }

    pub fn rest(&self) -> Result<&RestClient> {
        self.surface.rest()
    }

    pub fn kube(&self) -> Result<&KubeClient> {
        self.surface.kube()
    }

    pub fn rest_config(&self) -> Result<&RestConfig> {
        self.rest_config
            .as_ref()
            .ok_or_else(|| ToolkitError::ConfigMissing {
                searched: "config.yaml is required for this command".to_string(),
            })
    }

    /// Load `collection` into the cache unless already attempted.
    pub async fn fetch(&mut self, collection: Collection) -> Result<&Value> {
        if self.cache.needs_attr(collection) {
            let fetched = self.surface.list(collection, &ListScope::default()).await;
            self.cache.store(collection, fetched);
        }
        self.cache.require(collection)
    }

    /// Drop and reload a collection.
    pub async fn refresh(&mut self, collection: Collection) -> Result<&Value> {
        self.cache.invalidate(collection);
        self.fetch(collection).await
    }

    /// Fetch, then resolve exactly one record by any of `keys`.
    pub async fn resolve(
        &mut self,
        collection: Collection,
        keys: &[&str],
        value: &str,
    ) -> Result<Value> {
        self.fetch(collection).await?;
        let found = self.cache.get_single_any(collection, keys, value)?.clone();
        debug!(collection = %collection, value, "resolved");
        Ok(found)
    }

    /// Resolve a user-supplied identifier by the collection's identity keys.
    pub async fn find(&mut self, collection: Collection, value: &str) -> Result<Value> {
        let keys = collection.identity_keys(self.is_v3());
        self.resolve(collection, keys, value).await
    }

    /// The id (v1) or name (v3) of the record `value` names.
    ///
    /// Fast mode trusts the argument and leaves validation to the server.
    pub async fn resolve_id(&mut self, collection: Collection, value: &str) -> Result<String> {
        if self.opts.fast {
            return Ok(value.to_string());
        }
        let record = self.find(collection, value).await?;
        let key = collection.id_key(self.is_v3());
        lookup(&record, key).ok_or_else(|| {
            ToolkitError::not_found(format!("'{value}' in {collection} has no {key}"))
        })
    }

    /// A waiter polling every `poll_secs`, cancelled by ctrl-c or the
    /// session's interrupt.
    pub fn waiter(&self, poll_secs: u64) -> Waiter {
        let waiter = Waiter::new(self.out.clone()).with_interval(Duration::from_secs(poll_secs));
        match &self.interrupt {
            Some(n) => waiter.with_interrupt(n.clone()),
            None => waiter,
        }
    }

    /// A kube client for another cluster, sharing this session's dry-run
    /// mode and output.
    pub async fn connect(&self, target: &KubeTarget) -> Result<KubeClient> {
        let api = self.connector.connect(target, self.opts.insecure).await?;
        Ok(KubeClient::new(
            api,
            self.opts.dry_run,
            self.out.clone(),
            target.canonical(),
        ))
    }

    /// Print a command result in the selected output format.
    pub fn emit(&self, value: &Value, table: Option<&crate::output::TableSpec>) -> Result<()> {
        self.out.result(value, self.opts.output, table)
    }
}
