use async_trait::async_trait;

use super::registry;
use crate::api::constants::IMAGE_NAMESPACE_FINALIZER;
use crate::api::v1::imagenamespace::ImageNamespace;
use crate::clients::Clients;
use crate::deletion::ContentDeleter;
use crate::error::AggregateError;
use crate::store::ObjectStore;

pub struct ImageNamespaceDeleter {
    clients: Clients,
}

impl ImageNamespaceDeleter {
    pub fn new(clients: Clients) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl ContentDeleter for ImageNamespaceDeleter {
    type Object = ImageNamespace;

    fn store(&self) -> &dyn ObjectStore<ImageNamespace> {
        self.clients.image_namespaces.as_ref()
    }

    fn finalizer_token(&self) -> &'static str {
        IMAGE_NAMESPACE_FINALIZER
    }

    async fn delete_all_content(&self, ins: &ImageNamespace) -> AggregateError {
        let mut errors = AggregateError::new();
        if let Err(err) = registry::delete(&self.clients.registry, ins).await {
            errors.push(err);
        }
        errors
    }
}
