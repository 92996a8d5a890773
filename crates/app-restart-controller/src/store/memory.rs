//! An in-process [`Store`] with the same compare-and-swap semantics as the API server.
//!
//! Used by the test-suite to drive reconciliations without a cluster. Besides plain storage
//! it can script the behaviour of other writers: an edit or a deletion committed right before
//! the next replace (producing a genuine version conflict or a missing object) and one-shot
//! failures per operation.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use kube::Resource;
use tokio::sync::Mutex;

use crate::{
    key::ObjectKey,
    store::{Result, Store, StoreError},
};

type Edit<K> = Box<dyn FnOnce(&mut K) + Send>;

/// A write by another actor, committed right before the next replace.
enum Interference<K> {
    Edit(Edit<K>),
    Delete,
}

/// The store operation a scripted failure applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Get,
    List,
    Replace,
}

pub struct InMemoryStore<K> {
    state: Mutex<State<K>>,
}

struct State<K> {
    objects: BTreeMap<ObjectKey, K>,
    last_version: u64,
    replaces: usize,
    interference: VecDeque<Interference<K>>,
    failures: VecDeque<Failure>,
}

struct Failure {
    operation: Operation,
    object: Option<ObjectKey>,
    error: StoreError,
}

impl<K> State<K>
where
    K: Resource,
{
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    /// Takes the first scripted failure for `operation` that applies to `object`. Failures
    /// scripted without an object apply to any call.
    fn take_failure(
        &mut self,
        operation: Operation,
        object: Option<&ObjectKey>,
    ) -> Option<StoreError> {
        let position = self.failures.iter().position(|failure| {
            failure.operation == operation
                && failure
                    .object
                    .as_ref()
                    .is_none_or(|expected| Some(expected) == object)
        })?;
        self.failures.remove(position).map(|failure| failure.error)
    }

    /// Stores `object` under a fresh resourceVersion, bypassing any version check.
    fn commit(&mut self, key: ObjectKey, mut object: K) -> K
    where
        K: Clone,
    {
        object.meta_mut().resource_version = Some(self.next_version());
        self.objects.insert(key, object.clone());
        object
    }
}

impl<K> Default for InMemoryStore<K>
where
    K: Resource + Clone,
{
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<K> InMemoryStore<K>
where
    K: Resource + Clone,
{
    /// Creates a store seeded with `objects`, each assigned an initial resourceVersion.
    ///
    /// Objects without a namespace or name are skipped.
    pub fn new(objects: impl IntoIterator<Item = K>) -> Self {
        let mut state = State {
            objects: BTreeMap::new(),
            last_version: 0,
            replaces: 0,
            interference: VecDeque::new(),
            failures: VecDeque::new(),
        };

        for object in objects {
            if let Some(key) = ObjectKey::from_resource(&object) {
                state.commit(key, object);
            }
        }

        Self {
            state: Mutex::new(state),
        }
    }

    /// Writes `object` unconditionally, as an external actor creating or editing it would.
    ///
    /// Returns [`None`] if the object has no namespace or name.
    pub async fn insert(&self, object: K) -> Option<K> {
        let key = ObjectKey::from_resource(&object)?;
        Some(self.state.lock().await.commit(key, object))
    }

    /// Returns the stored object without going through the scripted behaviour.
    pub async fn snapshot(&self, key: &ObjectKey) -> Option<K> {
        self.state.lock().await.objects.get(key).cloned()
    }

    /// The number of successful [`Store::replace`] calls so far.
    pub async fn replace_count(&self) -> usize {
        self.state.lock().await.replaces
    }

    /// Commits `edit` on the stored object right before the next replace is checked.
    ///
    /// The edit bumps the resourceVersion, so the replace it precedes fails with a conflict
    /// unless it was submitted without a version.
    pub async fn interfere_before_next_replace<F>(&self, edit: F)
    where
        F: FnOnce(&mut K) + Send + 'static,
    {
        self.state
            .lock()
            .await
            .interference
            .push_back(Interference::Edit(Box::new(edit)));
    }

    /// Deletes the stored object right before the next replace is checked, so that replace
    /// fails with [`StoreError::NotFound`].
    pub async fn delete_before_next_replace(&self) {
        self.state
            .lock()
            .await
            .interference
            .push_back(Interference::Delete);
    }

    /// Makes the next call of `operation` fail with `error`.
    pub async fn fail_next(&self, operation: Operation, error: StoreError) {
        self.state.lock().await.failures.push_back(Failure {
            operation,
            object: None,
            error,
        });
    }

    /// Makes the next call of `operation` on `object` fail with `error`, other objects are
    /// unaffected.
    pub async fn fail_next_on(&self, operation: Operation, object: ObjectKey, error: StoreError) {
        self.state.lock().await.failures.push_back(Failure {
            operation,
            object: Some(object),
            error,
        });
    }
}

#[async_trait]
impl<K> Store<K> for InMemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.take_failure(Operation::Get, Some(key)) {
            return Err(error);
        }

        Ok(state.objects.get(key).cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>> {
        let mut state = self.state.lock().await;
        if let Some(error) = state.take_failure(Operation::List, None) {
            return Err(error);
        }

        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn replace(&self, object: &K) -> Result<K> {
        let Some(key) = ObjectKey::from_resource(object) else {
            return Err(StoreError::Request {
                source: "object has no namespace or name".into(),
            });
        };

        let mut state = self.state.lock().await;
        if let Some(error) = state.take_failure(Operation::Replace, Some(&key)) {
            return Err(error);
        }

        match state.interference.pop_front() {
            Some(Interference::Edit(edit)) => {
                if let Some(mut concurrent) = state.objects.get(&key).cloned() {
                    edit(&mut concurrent);
                    state.commit(key.clone(), concurrent);
                }
            }
            Some(Interference::Delete) => {
                state.objects.remove(&key);
            }
            None => {}
        }

        let Some(stored) = state.objects.get(&key) else {
            return Err(StoreError::NotFound { object: key });
        };

        let submitted_version = object.meta().resource_version.as_ref();
        if submitted_version
            .is_some_and(|version| Some(version) != stored.meta().resource_version.as_ref())
        {
            return Err(StoreError::Conflict { object: key });
        }

        state.replaces += 1;
        Ok(state.commit(key, object.clone()))
    }
}
