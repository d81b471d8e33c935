//! Tiered object storage: content-addressed ingest into a Fast tier and
//! lease-guarded background migration to a Durable tier.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod stores;
