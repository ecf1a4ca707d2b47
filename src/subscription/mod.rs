mod manager;
mod models;

pub use manager::{SubscriptionError, SubscriptionManager};
pub use models::{ModelDefinition, ModelListResponse, SubscriptionSelection};
