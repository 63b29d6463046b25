pub mod api;
pub mod artifacts;
pub mod collab;
pub mod config;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod request;
pub mod shutdown;
pub mod store;
pub mod worker;
