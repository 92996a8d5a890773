//! Typed, versioned access to the objects the controller reads and writes.
//!
//! Every object kind gets its own [`Store`] which is passed explicitly into the
//! components that need it. Writes are compare-and-swap on
//! `metadata.resourceVersion`: a replace submitted with a stale version fails
//! with [`StoreError::Conflict`] instead of overwriting a concurrent edit.

use async_trait::async_trait;
use snafu::Snafu;

use crate::key::ObjectKey;

mod kubernetes;
pub mod memory;

pub use self::{kubernetes::KubeStore, memory::InMemoryStore};

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("{object} was modified concurrently, the submitted resourceVersion is stale"))]
    Conflict { object: ObjectKey },

    #[snafu(display("{object} does not exist"))]
    NotFound { object: ObjectKey },

    #[snafu(display("store request failed"))]
    Request {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Data access for one namespaced object kind.
#[async_trait]
pub trait Store<K>: Send + Sync
where
    K: Send + Sync,
{
    /// Fetches the current version of the object, [`None`] if it does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>>;

    /// Lists every object in `namespace` in a single request.
    async fn list(&self, namespace: &str) -> Result<Vec<K>>;

    /// Replaces the object, keyed on the resourceVersion it carries.
    ///
    /// Returns the stored object, including its new resourceVersion. Fails with
    /// [`StoreError::NotFound`] if the object was deleted in the meantime.
    async fn replace(&self, object: &K) -> Result<K>;
}
