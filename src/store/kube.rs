use std::marker::PhantomData;

use async_trait::async_trait;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    Api, Client,
};

use super::{FieldSelector, ObjectStore};
use crate::api::v1::{
    chartgroup::ChartGroup,
    imagenamespace::ImageNamespace,
    namespace::Namespace,
    nsemigration::NsEmigration,
    platform::Platform,
    project::Project,
    registry::{RegistryChartGroup, RegistryNamespace},
};
use crate::api::{BusinessObject, ObjectKey};
use crate::error::{Error, Result};

/// Builds the `Api` handle for a kind, scoped to a namespace when the kind
/// is namespaced.
pub trait KubeScoped: BusinessObject {
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

macro_rules! kube_scoped {
    (namespaced: $($ns_kind:ty),*; cluster: $($cl_kind:ty),*) => {
        $(
            impl KubeScoped for $ns_kind {
                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(ns) => Api::namespaced(client, ns),
                        None => Api::all(client),
                    }
                }
            }
        )*
        $(
            impl KubeScoped for $cl_kind {
                fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
                    Api::all(client)
                }
            }
        )*
    };
}

kube_scoped!(
    namespaced: Namespace, ChartGroup, ImageNamespace, NsEmigration;
    cluster: Project, Platform, RegistryChartGroup, RegistryNamespace
);

/// [`ObjectStore`] backed by the API server.
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K: KubeScoped> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: Option<&str>) -> Api<K> {
        K::api(self.client.clone(), namespace)
    }

    fn api_for(&self, obj: &K) -> Api<K> {
        self.api(obj.meta().namespace.as_deref())
    }
}

/// Reports a 404 with the object's own kind and key instead of the raw
/// API server message.
fn map_err<K: BusinessObject>(key: &ObjectKey) -> impl Fn(kube::Error) -> Error + '_ {
    move |err| match Error::from(err) {
        err if err.is_not_found() => Error::not_found(K::kind_name(), key),
        err if err.is_already_exists() => Error::already_exists(K::kind_name(), key),
        Error::Conflict { message, .. } => Error::conflict(K::kind_name(), key, message),
        err => err,
    }
}

#[async_trait]
impl<K: KubeScoped> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<K> {
        self.api(key.namespace.as_deref())
            .get(&key.name)
            .await
            .map_err(map_err::<K>(key))
    }

    // Custom resources only serve field selectors on declared selectable
    // fields, so `spec.*` selectors are evaluated here.
    async fn list(&self, namespace: Option<&str>, selector: &FieldSelector) -> Result<Vec<K>> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        if selector.is_empty() {
            return Ok(list.items);
        }
        let mut matching = Vec::new();
        for obj in list.items {
            if selector.matches(&serde_json::to_value(&obj)?) {
                matching.push(obj);
            }
        }
        Ok(matching)
    }

    async fn create(&self, obj: &K) -> Result<K> {
        self.api_for(obj)
            .create(&PostParams::default(), obj)
            .await
            .map_err(map_err::<K>(&obj.key()))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        self.api_for(obj)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(map_err::<K>(&key))
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        let data = serde_json::to_vec(obj)?;
        self.api_for(obj)
            .replace_subresource("status", &key.name, &PostParams::default(), data)
            .await
            .map_err(map_err::<K>(&key))
    }

    async fn finalize(&self, obj: &K) -> Result<K> {
        let key = obj.key();
        let data = serde_json::to_vec(obj)?;
        self.api_for(obj)
            .replace_subresource("finalize", &key.name, &PostParams::default(), data)
            .await
            .map_err(map_err::<K>(&key))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        match self
            .api(key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::background())
            .await
            .map_err(map_err::<K>(key))
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}
