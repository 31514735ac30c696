pub mod ai;
pub mod commander;
pub mod config;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod mode;
pub mod models;
pub mod orchestrator;
pub mod parsing;
pub mod progress;
pub mod prompts;
pub mod ranking;
pub mod scoring;
pub mod templates;
