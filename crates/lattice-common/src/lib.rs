//! Common types for Lattice networking: CRDs, errors, release config, telemetry

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod telemetry;

pub use config::{ImageRefs, ReleaseConfig};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label key naming the component a resource belongs to
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Label key for the managing tool
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for resources managed by Lattice
pub const LABEL_MANAGED_BY_LATTICE: &str = "lattice";

/// Annotation carrying the digest of the configuration a workload was rendered from
pub const CONFIG_HASH_ANNOTATION: &str = "network.lattice.dev/config-hash";

/// Annotation asking the applier to create the object if missing but never update it
pub const CREATE_ONLY_ANNOTATION: &str = "network.lattice.dev/create-only";

/// Annotation asking the applier to defer creation until prerequisites are ready
pub const CREATE_WAIT_ANNOTATION: &str = "network.lattice.dev/create-wait";
