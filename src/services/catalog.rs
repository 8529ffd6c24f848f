//! Demo user/product lookups
//!
//! Repositories fake a data-store read with a random sleep and format a
//! synthetic record. The service layer adds a fixed processing delay. Both
//! layers open child spans and log through the caller's correlation context.

use std::fmt;
use std::time::Duration;

use opentelemetry::KeyValue;
use rand::Rng;
use tokio::time::{Instant, sleep};

use crate::error::AppError;
use crate::observability::context::CorrelationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Product,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::User => "user",
            Entity::Product => "product",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Entity::User => "User",
            Entity::Product => "Product",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synthetic data store for one entity kind
#[derive(Debug, Clone)]
pub struct Repository {
    entity: Entity,
    max_latency: Duration,
}

impl Repository {
    pub fn new(entity: Entity, max_latency: Duration) -> Self {
        Self {
            entity,
            max_latency,
        }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub async fn fetch(&self, cx: &CorrelationContext, id: &str) -> String {
        let cx = cx.start_span(
            format!("repository.fetch_{}", self.entity),
            vec![KeyValue::new(format!("{}.id", self.entity), id.to_string())],
        );
        let start = Instant::now();

        let max_ms = self.max_latency.as_millis() as u64;
        if max_ms > 0 {
            let jitter = rand::thread_rng().gen_range(0..max_ms);
            sleep(Duration::from_millis(jitter)).await;
        }

        cx.logger().info(&format!(
            "fetched {} {} in {}ms",
            self.entity,
            id,
            start.elapsed().as_millis()
        ));
        cx.end_span();

        format!("{} data for ID: {}", self.entity.title(), id)
    }
}

/// Service over the user and product repositories
#[derive(Debug, Clone)]
pub struct CatalogService {
    users: Repository,
    products: Repository,
    processing_delay: Duration,
}

impl CatalogService {
    /// Up to 100ms repository latency plus 198ms processing
    pub fn new() -> Self {
        Self::with_latency(Duration::from_millis(100), Duration::from_millis(198))
    }

    pub fn with_latency(max_repository_latency: Duration, processing_delay: Duration) -> Self {
        Self {
            users: Repository::new(Entity::User, max_repository_latency),
            products: Repository::new(Entity::Product, max_repository_latency),
            processing_delay,
        }
    }

    pub async fn get_user(&self, cx: &CorrelationContext, id: &str) -> Result<String, AppError> {
        self.lookup(&self.users, cx, id).await
    }

    pub async fn get_product(&self, cx: &CorrelationContext, id: &str) -> Result<String, AppError> {
        self.lookup(&self.products, cx, id).await
    }

    async fn lookup(
        &self,
        repository: &Repository,
        cx: &CorrelationContext,
        id: &str,
    ) -> Result<String, AppError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "{} must not be empty",
                repository.entity()
            )));
        }

        let cx = cx.start_span(format!("service.get_{}", repository.entity()), vec![]);
        let data = repository.fetch(&cx, id).await;

        // Processing would outlive the caller's deadline
        if cx.remaining().is_some_and(|left| left < self.processing_delay) {
            cx.end_span();
            return Err(AppError::DeadlineExceeded);
        }
        sleep(self.processing_delay).await;
        cx.end_span();

        Ok(data)
    }
}

impl Default for CatalogService {
    fn default() -> Self {
        Self::new()
    }
}
