use async_trait::async_trait;

use super::registry;
use crate::api::constants::CHART_GROUP_FINALIZER;
use crate::api::v1::chartgroup::ChartGroup;
use crate::clients::Clients;
use crate::deletion::ContentDeleter;
use crate::error::AggregateError;
use crate::store::ObjectStore;

pub struct ChartGroupDeleter {
    clients: Clients,
}

impl ChartGroupDeleter {
    pub fn new(clients: Clients) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl ContentDeleter for ChartGroupDeleter {
    type Object = ChartGroup;

    fn store(&self) -> &dyn ObjectStore<ChartGroup> {
        self.clients.chart_groups.as_ref()
    }

    fn finalizer_token(&self) -> &'static str {
        CHART_GROUP_FINALIZER
    }

    async fn delete_all_content(&self, cg: &ChartGroup) -> AggregateError {
        let mut errors = AggregateError::new();
        if let Err(err) = registry::delete(&self.clients.registry, cg).await {
            errors.push(err);
        }
        errors
    }
}
