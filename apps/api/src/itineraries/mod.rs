pub mod generator;
pub mod handlers;
pub mod plan;
pub mod prompts;
pub mod store;
