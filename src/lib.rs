// Cloud controller client - library root

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod observer;
pub mod request;
pub mod resolver;
pub mod space_guard;
pub mod transport;

pub use client::CloudControllerClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
