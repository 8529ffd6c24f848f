//! Synthetic load for the demo endpoints
//!
//! Posts a random user and a random product to the target service on every
//! tick, through the retrying client. Failures are logged and the loop keeps
//! going.

use std::time::Duration;

use rand::seq::SliceRandom;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::config::ProducerConfig;
use crate::observability::context::CorrelationContext;
use crate::services::api_client::{ClientError, RetryingClient};
use crate::services::catalog::Entity;

const USER_POOL: &[&str] = &["bob", "alice", "jack", "mike", "tiger", "panda", "dog"];
const PRODUCT_POOL: &[&str] = &["camiseta", "blusa", "calca", "jaqueta", "camisa"];

#[derive(Debug, Clone)]
pub struct Producer {
    client: RetryingClient,
    target_url: String,
    interval: Duration,
    cx: CorrelationContext,
}

impl Producer {
    pub fn new(client: RetryingClient, config: &ProducerConfig, cx: CorrelationContext) -> Self {
        Self {
            client,
            target_url: config.target_url.trim_end_matches('/').to_string(),
            interval: Duration::from_millis(config.interval_ms),
            cx,
        }
    }

    pub fn endpoint(&self, entity: Entity) -> String {
        format!("{}/{}", self.target_url, entity)
    }

    /// Send one random payload for `entity`
    pub async fn produce(&self, entity: Entity) -> Result<String, ClientError> {
        let pool = match entity {
            Entity::User => USER_POOL,
            Entity::Product => PRODUCT_POOL,
        };
        let name = pool
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or_default();

        let cx = self.cx.start_span(format!("producer.{}", entity), vec![]);
        let result = self
            .client
            .post(self.endpoint(entity))
            .json(&payload(entity, name))
            .context(&cx)
            .send()
            .await
            .map(|body| String::from_utf8_lossy(&body).into_owned());

        match &result {
            Ok(body) => cx.logger().debug(body),
            Err(e) => cx.logger().error(&format!("error on send post {}", entity), e),
        }
        cx.end_span();
        result
    }

    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            url = %self.target_url,
            interval_ms = self.interval.as_millis() as u64,
            "Load producer started"
        );

        loop {
            ticker.tick().await;
            let _ = tokio::join!(self.produce(Entity::User), self.produce(Entity::Product));
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

fn payload(entity: Entity, name: &str) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert(entity.as_str().to_string(), Value::from(name));
    body
}
