// Streaming generation load benchmark - library root

pub mod bench;
pub mod config;
pub mod error;
pub mod prompts;
