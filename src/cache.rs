use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, ToolkitError};
use crate::path::KeyPath;

/* ============================= COLLECTIONS ============================= */

/// Every collection the toolkit lists, caches or offers as choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    ApiResources,
    Apps,
    Assets,
    Asups,
    Backups,
    Buckets,
    Clouds,
    Clusters,
    Connectors,
    Credentials,
    Groups,
    Hooks,
    HooksRuns,
    InplaceRestores,
    LdapGroups,
    LdapUsers,
    Namespaces,
    Notifications,
    Protections,
    Replications,
    Restores,
    RoleBindings,
    Scripts,
    Settings,
    Snapshots,
    StorageBackends,
    StorageClasses,
    Users,
}

impl Collection {
    pub const ALL: [Collection; 28] = [
        Collection::ApiResources,
        Collection::Apps,
        Collection::Assets,
        Collection::Asups,
        Collection::Backups,
        Collection::Buckets,
        Collection::Clouds,
        Collection::Clusters,
        Collection::Connectors,
        Collection::Credentials,
        Collection::Groups,
        Collection::Hooks,
        Collection::HooksRuns,
        Collection::InplaceRestores,
        Collection::LdapGroups,
        Collection::LdapUsers,
        Collection::Namespaces,
        Collection::Notifications,
        Collection::Protections,
        Collection::Replications,
        Collection::Restores,
        Collection::RoleBindings,
        Collection::Scripts,
        Collection::Settings,
        Collection::Snapshots,
        Collection::StorageBackends,
        Collection::StorageClasses,
        Collection::Users,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiResources => "apiresources",
            Self::Apps => "apps",
            Self::Assets => "assets",
            Self::Asups => "asups",
            Self::Backups => "backups",
            Self::Buckets => "buckets",
            Self::Clouds => "clouds",
            Self::Clusters => "clusters",
            Self::Connectors => "astraconnectors",
            Self::Credentials => "credentials",
            Self::Groups => "groups",
            Self::Hooks => "hooks",
            Self::HooksRuns => "hooksruns",
            Self::InplaceRestores => "inplacerestores",
            Self::LdapGroups => "ldapgroups",
            Self::LdapUsers => "ldapusers",
            Self::Namespaces => "namespaces",
            Self::Notifications => "notifications",
            Self::Protections => "protections",
            Self::Replications => "replications",
            Self::Restores => "restores",
            Self::RoleBindings => "rolebindings",
            Self::Scripts => "scripts",
            Self::Settings => "ldap",
            Self::Snapshots => "snapshots",
            Self::StorageBackends => "storagebackends",
            Self::StorageClasses => "storageclasses",
            Self::Users => "users",
        }
    }

    /// Fields an argument may name a record by, tried in order.
    pub fn identity_keys(&self, custom_resource: bool) -> &'static [&'static str] {
        if custom_resource {
            return &["metadata.name"];
        }
        match self {
            Self::Users => &["id", "email"],
            Self::Groups => &["id", "authID"],
            Self::Replications | Self::Asups | Self::Notifications => &["id"],
            Self::RoleBindings => &["id", "userID", "groupID"],
            _ => &["id", "name"],
        }
    }

    /// The field a resolved record is referred to by in later calls.
    pub fn id_key(&self, custom_resource: bool) -> &'static str {
        if custom_resource { "metadata.name" } else { "id" }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = ToolkitError;

    /// Accepts the CLI object names plus their custom-resource aliases.
    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        let found = match lowered.as_str() {
            "apps" | "applications" | "app" => Self::Apps,
            "appvaults" | "appvault" | "buckets" | "bucket" => Self::Buckets,
            "schedules" | "protections" | "protection" => Self::Protections,
            "hooks" | "exechooks" => Self::Hooks,
            "hooksruns" | "exechooksruns" => Self::HooksRuns,
            "secrets" | "credentials" => Self::Credentials,
            "connectors" => Self::Connectors,
            "settings" => Self::Settings,
            other => {
                return Self::ALL
                    .into_iter()
                    .find(|c| c.as_str() == other)
                    .ok_or_else(|| {
                        ToolkitError::validation(format!("'{s}' is not a known object type"))
                    });
            }
        };
        Ok(found)
    }
}

/* ============================= CACHE ============================= */

#[derive(Debug, Clone)]
enum Slot {
    Loaded(Value),
    /// A fetch was attempted and failed; the message is kept for reporting.
    Failed(String),
}

/// Per-invocation cache of listed collections.
///
/// A collection is either absent (never fetched), loaded, or marked failed.
/// Lookups that must resolve to one record go through [`ResourceCache::get_single`],
/// which refuses to guess on zero or many matches.
#[derive(Debug, Default, Clone)]
pub struct ResourceCache {
    slots: BTreeMap<Collection, Slot>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the collection has not been fetched yet.
    pub fn needs_attr(&self, collection: Collection) -> bool {
        !self.slots.contains_key(&collection)
    }

    pub fn insert(&mut self, collection: Collection, value: Value) {
        debug!(collection = %collection, items = item_count(&value), "cache_insert");
        self.slots.insert(collection, Slot::Loaded(value));
    }

    /// Store the outcome of a fetch; failures become the failed sentinel.
    pub fn store(&mut self, collection: Collection, fetched: Result<Value>) {
        match fetched {
            Ok(value) => self.insert(collection, value),
            Err(e) => {
                warn!(collection = %collection, error = %e, "cache_fetch_failed");
                self.slots.insert(collection, Slot::Failed(e.to_string()));
            }
        }
    }

    /// Drop a collection so the next access refetches it.
    pub fn invalidate(&mut self, collection: Collection) {
        self.slots.remove(&collection);
    }

    pub fn is_failed(&self, collection: Collection) -> bool {
        matches!(self.slots.get(&collection), Some(Slot::Failed(_)))
    }

    pub fn get(&self, collection: Collection) -> Option<&Value> {
        match self.slots.get(&collection) {
            Some(Slot::Loaded(v)) => Some(v),
            _ => None,
        }
    }

    /// The loaded listing, or an error describing why it is unavailable.
    pub fn require(&self, collection: Collection) -> Result<&Value> {
        match self.slots.get(&collection) {
            Some(Slot::Loaded(v)) => Ok(v),
            Some(Slot::Failed(msg)) => Err(ToolkitError::not_found(format!(
                "could not list {collection}: {msg}"
            ))),
            None => Err(ToolkitError::not_found(format!(
                "{collection} have not been fetched"
            ))),
        }
    }

    /// The `items` array of a loaded collection, empty otherwise.
    pub fn items(&self, collection: Collection) -> &[Value] {
        self.get(collection)
            .and_then(|v| v.get("items"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Values at `key` across `items[]`, optionally keeping only items whose
    /// `filter_key` equals `filter_val`.
    pub fn build_list(
        &self,
        collection: Collection,
        key: &str,
        filter: Option<(&str, &str)>,
    ) -> Vec<String> {
        let Ok(key_path) = key.parse::<KeyPath>() else {
            return Vec::new();
        };
        let filter_path = match filter {
            Some((fk, fv)) => match fk.parse::<KeyPath>() {
                Ok(p) => Some((p, fv)),
                Err(_) => return Vec::new(),
            },
            None => None,
        };
        self.items(collection)
            .iter()
            .filter(|item| match &filter_path {
                Some((p, fv)) => p.first_string(item).as_deref() == Some(*fv),
                None => true,
            })
            .flat_map(|item| {
                key_path
                    .resolve(item)
                    .iter()
                    .filter_map(crate::path::scalar_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn matching(&self, collection: Collection, key: &str, value: &str) -> Result<Vec<&Value>> {
        let key_path: KeyPath = key.parse()?;
        let listing = self.require(collection)?;
        Ok(listing
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| key_path.first_string(item).as_deref() == Some(value))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Exactly one item whose `key` equals `value`.
    pub fn get_single(&self, collection: Collection, key: &str, value: &str) -> Result<&Value> {
        self.get_single_any(collection, &[key], value)
    }

    /// Like [`get_single`](Self::get_single) but tries each key in turn, so an
    /// argument may be given as either id or name. The first key with any
    /// match decides; duplicates under that key are still an error.
    pub fn get_single_any(
        &self,
        collection: Collection,
        keys: &[&str],
        value: &str,
    ) -> Result<&Value> {
        for key in keys {
            let found = self.matching(collection, key, value)?;
            match found.as_slice() {
                [] => continue,
                [one] => return Ok(one),
                many => {
                    return Err(ToolkitError::validation(format!(
                        "'{value}' matches {} {collection} by {key}; use a unique identifier",
                        many.len()
                    )));
                }
            }
        }
        Err(ToolkitError::validation(format!(
            "'{value}' does not match any {collection} by {}",
            keys.join(" or ")
        )))
    }
}

fn item_count(value: &Value) -> usize {
    value
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0)
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apps() -> Value {
        json!({"items": [
            {"id": "a1", "name": "wordpress", "clusterID": "c1", "state": "ready"},
            {"id": "a2", "name": "mysql", "clusterID": "c2", "state": "ready"},
            {"id": "a3", "name": "mysql", "clusterID": "c1", "state": "failed"},
        ]})
    }

    #[test]
    fn test_needs_attr_until_stored() {
        let mut cache = ResourceCache::new();
        assert!(cache.needs_attr(Collection::Apps));
        cache.insert(Collection::Apps, apps());
        assert!(!cache.needs_attr(Collection::Apps));
    }

    #[test]
    fn test_failed_fetch_is_sentinel_not_absent() {
        let mut cache = ResourceCache::new();
        cache.store(Collection::Buckets, Err(ToolkitError::not_found("boom")));
        assert!(!cache.needs_attr(Collection::Buckets));
        assert!(cache.is_failed(Collection::Buckets));
        assert!(cache.get(Collection::Buckets).is_none());
        assert!(cache.items(Collection::Buckets).is_empty());
        assert!(cache.require(Collection::Buckets).is_err());
    }

    #[test]
    fn test_build_list_with_and_without_filter() {
        let mut cache = ResourceCache::new();
        cache.insert(Collection::Apps, apps());
        assert_eq!(
            cache.build_list(Collection::Apps, "id", None),
            vec!["a1", "a2", "a3"]
        );
        assert_eq!(
            cache.build_list(Collection::Apps, "id", Some(("clusterID", "c1"))),
            vec!["a1", "a3"]
        );
    }

    #[test]
    fn test_get_single_exact_match() {
        let mut cache = ResourceCache::new();
        cache.insert(Collection::Apps, apps());
        let app = cache.get_single(Collection::Apps, "name", "wordpress").unwrap();
        assert_eq!(app["id"], "a1");
    }

    #[test]
    fn test_get_single_duplicate_aborts() {
        let mut cache = ResourceCache::new();
        cache.insert(Collection::Apps, apps());
        let err = cache.get_single(Collection::Apps, "name", "mysql").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("matches 2 apps"));
    }

    #[test]
    fn test_get_single_absent_aborts() {
        let mut cache = ResourceCache::new();
        cache.insert(Collection::Apps, apps());
        let err = cache.get_single(Collection::Apps, "name", "nginx").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("'nginx'"));
    }

    #[test]
    fn test_get_single_any_falls_through_keys() {
        let mut cache = ResourceCache::new();
        cache.insert(Collection::Apps, apps());
        let by_id = cache
            .get_single_any(Collection::Apps, &["id", "name"], "a2")
            .unwrap();
        assert_eq!(by_id["name"], "mysql");
        let by_name = cache
            .get_single_any(Collection::Apps, &["id", "name"], "wordpress")
            .unwrap();
        assert_eq!(by_name["id"], "a1");
        // duplicates are not masked by the fallback
        assert!(cache
            .get_single_any(Collection::Apps, &["id", "name"], "mysql")
            .is_err());
    }

    #[test]
    fn test_collection_aliases() {
        assert_eq!("applications".parse::<Collection>().unwrap(), Collection::Apps);
        assert_eq!("appVaults".parse::<Collection>().unwrap(), Collection::Buckets);
        assert_eq!("schedules".parse::<Collection>().unwrap(), Collection::Protections);
        assert_eq!("secrets".parse::<Collection>().unwrap(), Collection::Credentials);
        assert_eq!(
            "astraconnectors".parse::<Collection>().unwrap(),
            Collection::Connectors
        );
        assert!("widgets".parse::<Collection>().is_err());
    }
}
