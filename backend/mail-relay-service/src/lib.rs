//! Mail relay service
//!
//! Stores and threads email, delivers it to internal users over a live
//! websocket channel or to external addresses through a transactional-email
//! relay, ingests inbound mail, and reconciles delivery outcomes from signed
//! relay callbacks.

pub mod client;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod relay;
pub mod repository;
pub mod services;
pub mod state;
pub mod threading;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, AppResult};
