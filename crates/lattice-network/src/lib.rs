//! Cluster network pipeline for Lattice
//!
//! Turns a desired `NetworkSpec` into the Kubernetes objects that realize
//! it: defaults are filled, the spec is validated and checked against the
//! previously applied one, and every active provider renders its manifests
//! from a snapshot of bootstrap facts.
//!
//! # Usage
//!
//! ```rust,ignore
//! let reconciler = NetworkReconciler::new(ReleaseConfig::default());
//! let rendered = reconciler.reconcile(&spec, previous.as_ref(), &facts)?;
//! for object in &rendered.objects {
//!     apply(object)?;
//! }
//! ```

pub mod checks;
pub mod facts;
pub mod hash;
pub mod manifest;
pub mod provider;
pub mod reconcile;
pub mod subnet;
pub mod version;

#[cfg(test)]
mod test_fixtures;

pub use facts::BootstrapFacts;
pub use manifest::Manifest;
pub use provider::{create_provider, NetworkProvider, ProviderRegistry, RenderedProvider};
pub use reconcile::{failure_status, NetworkReconciler, ReconcilePhase, RenderedNetwork};
pub use version::{at_least, at_most, compare, RolloutOrder, VersionChange};
