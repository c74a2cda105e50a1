pub mod auditor;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod harvester;
pub mod models;
pub mod processor;
pub mod query;
pub mod queue;
pub mod response;
pub mod server;
pub mod sparse;
pub mod store;
