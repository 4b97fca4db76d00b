pub mod config;
pub mod logger;
pub mod publisher;
pub mod race_control;
