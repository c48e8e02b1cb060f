// Library exports for integration testing

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod models;
pub mod retry;
pub mod service;
