//! Isolated manifest directory plus an in-memory cluster.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use assert_fs::TempDir;
use serde_json::Value;

use configsync::{
    apply_target, ApplyFailure, ApplyReport, CancellationFlag, EngineConfig, InMemoryCluster,
    TargetRef, TypeMeta,
};

pub struct SyncHarness {
    dir: TempDir,
    pub cluster: InMemoryCluster,
    pub config: EngineConfig,
    pub cancel: CancellationFlag,
}

impl SyncHarness {
    /// Dry-run enabled, empty cluster.
    pub fn new() -> Self {
        Self::with_cluster(InMemoryCluster::new())
    }

    pub fn with_cluster(cluster: InMemoryCluster) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let config = EngineConfig {
            cache_dir: dir.path().join(".cache"),
            ..EngineConfig::default()
        };
        Self {
            dir,
            cluster,
            config,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn without_dry_run(mut self) -> Self {
        self.config.dry_run = false;
        self
    }

    pub fn source_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `content` to `<source>/<name>`.
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let child = self.dir.child(name);
        if let Some(parent) = child.path().parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        child.write_str(content).expect("Failed to write manifest");
        child.path().to_path_buf()
    }

    pub fn apply(&self, target: &TargetRef) -> Result<ApplyReport, ApplyFailure> {
        apply_target(
            &self.cluster,
            self.source_dir(),
            target,
            &self.config,
            &self.cancel,
        )
    }

    pub fn apply_to(&self, namespace: &str) -> Result<ApplyReport, ApplyFailure> {
        self.apply(&TargetRef::namespace(namespace))
    }

    pub fn get(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
        self.cluster
            .get(&TypeMeta::new(api_version, kind), namespace, name)
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<Value> {
        self.get("v1", "ConfigMap", Some(namespace), name)
    }
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}
