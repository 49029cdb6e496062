pub mod apply;
pub mod cancel;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod redact;
pub mod source;

pub use apply::{
    apply_target, ApplyEngine, ApplyFailure, ApplyReport, ApplyResult, Outcome, TargetRef,
};
pub use cancel::CancellationFlag;
pub use cluster::{
    BundleReader, ClusterClient, ClusterError, InMemoryCluster, PatchParams, RestClient,
    RestConfig, Scope, TypeMeta, FIELD_MANAGER,
};
pub use config::{EngineConfig, LogFormat, LogSettings};
pub use error::{ConfigError, DecodeError, FetchError, Result, SyncError};
pub use manifest::ManifestDocument;
pub use source::credentials::{
    AuthMethod, CredentialResolver, EnvCredentials, GitCredentials, MountedSecrets, SecretRef,
    StaticCredentials,
};
pub use source::git::GitSource;
pub use source::{fetch_source, ResolvedSnapshot, SourceDeclaration, SourceResolver, SourceSpec};
