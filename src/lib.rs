pub mod config;
pub mod error;
pub mod job;
pub mod node;
pub mod queue;
pub mod sandbox;
pub mod shutdown;
pub mod store;
pub mod worker;
