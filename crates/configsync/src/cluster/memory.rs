//! In-memory cluster backend with server-side-apply-like semantics.
//!
//! Used by the test suite and for offline previews. Applies merge maps
//! recursively and replace lists wholesale, stamp the server-populated
//! metadata a real API server would add, and only bump `resourceVersion`
//! when the stored content actually changes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use super::{
    bundle_from_config_map, object_name, object_namespace, Bundle, BundleReader, ClusterClient,
    ClusterError, PatchParams, Scope, TypeMeta,
};

type Admission = Box<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

const DEFAULT_CLUSTER_SCOPED: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "APIService",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
];

/// Identity of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(
        type_meta: &TypeMeta,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: type_meta.api_version.clone(),
            kind: type_meta.kind.clone(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }
}

struct Stored {
    object: Value,
    manager: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Stored>,
    next_resource_version: u64,
    next_uid: u64,
    commits: usize,
    dry_runs: usize,
}

/// Thread-safe in-memory object store implementing [`ClusterClient`] and
/// [`BundleReader`].
pub struct InMemoryCluster {
    state: Mutex<State>,
    cluster_scoped: BTreeSet<String>,
    unserved: BTreeSet<TypeMeta>,
    admission: Vec<Admission>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            cluster_scoped: DEFAULT_CLUSTER_SCOPED
                .iter()
                .map(|kind| kind.to_string())
                .collect(),
            unserved: BTreeSet::new(),
            admission: Vec::new(),
        }
    }

    /// Marks `kind` as cluster-scoped.
    pub fn with_cluster_scoped_kind(mut self, kind: impl Into<String>) -> Self {
        self.cluster_scoped.insert(kind.into());
        self
    }

    /// Makes scope lookups for `type_meta` fail as if the type were not served.
    pub fn without_kind(mut self, type_meta: TypeMeta) -> Self {
        self.unserved.insert(type_meta);
        self
    }

    /// Registers an admission check run on every apply (dry-run or not).
    /// Returning `Err(message)` rejects the object with a 422.
    pub fn with_admission<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.admission.push(Box::new(check));
        self
    }

    /// Stores `object` as if written by another manager. Not counted as a commit.
    pub fn insert(&self, object: Value, manager: &str) -> Result<(), ClusterError> {
        let type_meta = TypeMeta::from_object(&object)?;
        let key = self.key_for(&type_meta, &object)?;
        let mut state = self.lock();
        let stored = stamp(&mut state, None, strip_server_fields(object), manager);
        state.objects.insert(
            key,
            Stored {
                object: stored,
                manager: manager.to_string(),
            },
        );
        Ok(())
    }

    pub fn get(&self, type_meta: &TypeMeta, namespace: Option<&str>, name: &str) -> Option<Value> {
        let key = ObjectKey::new(type_meta, namespace, name);
        self.lock().objects.get(&key).map(|s| s.object.clone())
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of non-dry-run applies accepted.
    pub fn commit_count(&self) -> usize {
        self.lock().commits
    }

    /// Number of dry-run applies accepted.
    pub fn dry_run_count(&self) -> usize {
        self.lock().dry_runs
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn scope_of(&self, type_meta: &TypeMeta) -> Scope {
        if self.cluster_scoped.contains(&type_meta.kind) {
            Scope::Cluster
        } else {
            Scope::Namespaced
        }
    }

    fn key_for(&self, type_meta: &TypeMeta, object: &Value) -> Result<ObjectKey, ClusterError> {
        let name = object_name(object)?;
        let namespace = match self.scope_of(type_meta) {
            Scope::Namespaced => Some(object_namespace(object).unwrap_or("default")),
            Scope::Cluster => None,
        };
        Ok(ObjectKey::new(type_meta, namespace, name))
    }
}

impl ClusterClient for InMemoryCluster {
    fn scope(&self, type_meta: &TypeMeta) -> Result<Scope, ClusterError> {
        if self.unserved.contains(type_meta) {
            return Err(ClusterError::UnknownKind(type_meta.clone()));
        }
        Ok(self.scope_of(type_meta))
    }

    fn apply(&self, object: &Value, params: &PatchParams) -> Result<Value, ClusterError> {
        let type_meta = TypeMeta::from_object(object)?;
        if self.unserved.contains(&type_meta) {
            return Err(ClusterError::UnknownKind(type_meta));
        }
        if object.pointer("/metadata/managedFields").is_some() {
            return Err(ClusterError::invalid(
                "metadata.managedFields must be nil",
            ));
        }

        let key = self.key_for(&type_meta, object)?;
        let mut desired = object.clone();
        match &key.namespace {
            Some(ns) => set_metadata(&mut desired, "namespace", Value::String(ns.clone())),
            None => remove_metadata(&mut desired, "namespace"),
        }

        for check in &self.admission {
            check(&desired).map_err(ClusterError::invalid)?;
        }

        let mut state = self.lock();
        let existing = state
            .objects
            .get(&key)
            .map(|s| (s.object.clone(), s.manager.clone()));

        if let Some((_, manager)) = &existing {
            if *manager != params.field_manager && !params.force {
                return Err(ClusterError::Api {
                    code: 409,
                    reason: "Conflict".to_string(),
                    message: format!(
                        "Apply failed with conflicts: fields are managed by \"{manager}\""
                    ),
                });
            }
        }

        let content = match &existing {
            Some((object, _)) => {
                let mut merged = strip_server_fields(object.clone());
                merge(&mut merged, strip_server_fields(desired));
                merged
            }
            None => strip_server_fields(desired),
        };

        let previous = existing.as_ref().map(|(object, _)| object);
        let unchanged = existing.as_ref().is_some_and(|(object, manager)| {
            *manager == params.field_manager && strip_server_fields(object.clone()) == content
        });

        if params.dry_run {
            state.dry_runs += 1;
            return Ok(match (unchanged, previous) {
                (true, Some(object)) => object.clone(),
                _ => preview(previous, content, &params.field_manager),
            });
        }

        state.commits += 1;
        if let (true, Some(object)) = (unchanged, previous) {
            return Ok(object.clone());
        }

        let stored = stamp(&mut state, previous, content, &params.field_manager);
        state.objects.insert(
            key,
            Stored {
                object: stored.clone(),
                manager: params.field_manager.clone(),
            },
        );
        Ok(stored)
    }
}

impl BundleReader for InMemoryCluster {
    fn read_bundle(&self, namespace: &str, name: &str) -> Result<Bundle, ClusterError> {
        let key = ObjectKey::new(&TypeMeta::new("v1", "ConfigMap"), Some(namespace), name);
        let state = self.lock();
        let stored = state.objects.get(&key).ok_or_else(|| ClusterError::NotFound {
            kind: "ConfigMap".to_string(),
            name: format!("{namespace}/{name}"),
        })?;
        bundle_from_config_map(&stored.object)
    }
}

/// Adds server-populated metadata, allocating a new resource version.
fn stamp(state: &mut State, previous: Option<&Value>, content: Value, manager: &str) -> Value {
    state.next_resource_version += 1;
    let resource_version = state.next_resource_version;

    let uid = match previous.and_then(|p| p.pointer("/metadata/uid")).cloned() {
        Some(uid) => uid,
        None => {
            state.next_uid += 1;
            Value::String(format!("00000000-0000-4000-8000-{:012x}", state.next_uid))
        }
    };

    with_server_fields(previous, content, uid, resource_version.to_string(), manager)
}

/// Server view of a dry-run: same fields, nothing allocated.
fn preview(previous: Option<&Value>, content: Value, manager: &str) -> Value {
    let uid = previous
        .and_then(|p| p.pointer("/metadata/uid"))
        .cloned()
        .unwrap_or(Value::String(String::new()));
    let resource_version = previous
        .and_then(|p| p.pointer("/metadata/resourceVersion"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    with_server_fields(previous, content, uid, resource_version, manager)
}

fn with_server_fields(
    previous: Option<&Value>,
    content: Value,
    uid: Value,
    resource_version: String,
    manager: &str,
) -> Value {
    let created = previous
        .and_then(|p| p.pointer("/metadata/creationTimestamp"))
        .cloned()
        .unwrap_or_else(|| {
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
        });
    let generation = previous
        .and_then(|p| p.pointer("/metadata/generation"))
        .and_then(Value::as_u64)
        .map_or(1, |g| g + 1);

    let mut object = content;
    set_metadata(&mut object, "uid", uid);
    set_metadata(&mut object, "resourceVersion", Value::String(resource_version));
    set_metadata(&mut object, "creationTimestamp", created);
    set_metadata(&mut object, "generation", json!(generation));
    set_metadata(
        &mut object,
        "managedFields",
        json!([{
            "manager": manager,
            "operation": "Apply",
            "fieldsType": "FieldsV1",
        }]),
    );
    object
}

fn strip_server_fields(mut object: Value) -> Value {
    if let Some(meta) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in [
            "uid",
            "resourceVersion",
            "creationTimestamp",
            "generation",
            "managedFields",
            "selfLink",
        ] {
            meta.remove(field);
        }
    }
    if let Some(root) = object.as_object_mut() {
        root.remove("status");
    }
    object
}

fn set_metadata(object: &mut Value, field: &str, value: Value) {
    if let Some(root) = object.as_object_mut() {
        let meta = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(meta) = meta.as_object_mut() {
            meta.insert(field.to_string(), value);
        }
    }
}

fn remove_metadata(object: &mut Value, field: &str) {
    if let Some(meta) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove(field);
    }
}

/// Maps merge key-by-key; everything else is replaced.
fn merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}
