pub mod cache;
pub mod config;
pub mod enrich;
pub mod error;
pub mod fetch_pool;
pub mod http_client;
pub mod model;
pub mod page_fetch;
pub mod pipeline;
pub mod rewards;
pub mod stats;
pub mod upstream;
