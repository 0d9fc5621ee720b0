pub mod client;
pub mod window_store;

pub use client::{create_client, health_check};
pub use window_store::RedisWindowStore;
