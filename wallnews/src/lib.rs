// Library interface for wallnews modules
// This allows tests and other binaries to import modules

pub mod cache;
pub mod chat;
pub mod cycle;
pub mod dashboard;
pub mod error;
pub mod headlines;
pub mod llm;
pub mod server;
pub mod synthesis;
