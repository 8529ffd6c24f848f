pub mod api_client;
pub mod catalog;

pub use api_client::{ClientError, RetryingClient};
pub use catalog::{CatalogService, Entity, Repository};
