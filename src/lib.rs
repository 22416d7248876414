pub mod config;
pub mod database;
pub mod gate;
pub mod llm_client;
pub mod prompt;
pub mod server;
