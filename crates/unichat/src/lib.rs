//! Unichat - a chat front-end for locally running OpenAI-compatible model providers.

pub mod chat;
pub mod config;
pub mod discovery;
pub mod handlers;
pub mod llm;
pub mod response;
pub mod server;
pub mod session;
