//! Restarts Deployments when a ConfigMap they consume through `envFrom` changes, or when a
//! Deployment opts in with the `restart=true` label.
//!
//! A restart is the same edit `kubectl rollout restart` makes: the Pod template annotation
//! `kubectl.kubernetes.io/restartedAt` is set to the current time. Writes are compare-and-swap
//! on `resourceVersion` and retried on conflict, see [`apply::with_conflict_retry`].
//!
//! The core ([`classify`], [`scan`], [`plan`], [`apply`] and [`reconcile`]) only talks to the
//! cluster through [`store::Store`], so it runs unchanged against [`store::InMemoryStore`].

pub mod apply;
pub mod classify;
pub mod cli;
pub mod constants;
pub mod controller;
pub mod key;
pub mod logging;
pub mod metrics;
pub mod namespace;
pub mod plan;
pub mod reconcile;
pub mod scan;
pub mod signal;
pub mod store;

// External re-exports
pub use k8s_openapi;
pub use kube;
