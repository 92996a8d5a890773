use std::{fmt::Debug, marker::PhantomData};

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{ListParams, PostParams},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    key::ObjectKey,
    store::{Result, Store, StoreError},
};

/// A [`Store`] backed by the Kubernetes API server.
///
/// Reads go straight to the API server instead of the controller's watch cache, so a retry
/// after a conflict always sees the version that caused it.
pub struct KubeStore<K> {
    client: Client,
    post_params: PostParams,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            post_params: self.post_params.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K> {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            post_params: PostParams {
                field_manager: Some(field_manager.into()),
                ..PostParams::default()
            },
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<K> Store<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        self.api(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|err| classify_error(err, key))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>> {
        let list = self
            .api(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|err| StoreError::Request {
                source: Box::new(err),
            })?;

        Ok(list.items)
    }

    async fn replace(&self, object: &K) -> Result<K> {
        let namespace = object.namespace().unwrap_or_default();
        let key = ObjectKey::new(namespace, object.name_any());

        self.api(&key.namespace)
            .replace(&key.name, &self.post_params, object)
            .await
            .map_err(|err| classify_error(err, &key))
    }
}

/// Maps an HTTP 409 from the API server onto [`StoreError::Conflict`] and a 404 onto
/// [`StoreError::NotFound`], everything else onto [`StoreError::Request`].
fn classify_error(error: kube::Error, key: &ObjectKey) -> StoreError {
    match error {
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
            object: key.clone(),
        },
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
            object: key.clone(),
        },
        error => StoreError::Request {
            source: Box::new(error),
        },
    }
}
