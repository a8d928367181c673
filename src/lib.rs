//! Kayzen Campaign Sync Library
//!
//! Fetches every campaign from the Kayzen API and upserts them into a
//! BigQuery table, stamping each row with the time of the run.
//!
//! # Modules
//!
//! - `api`: HTTP trigger surface.
//! - `core`: Pipeline, loader and shared models/errors.
//! - `integrations`: Kayzen, BigQuery and Google auth clients.
//! - `config`: Configuration management.
//! - `bigquery`: BigQuery REST warehouse.
//! - `errors`: Error taxonomy.
//! - `gcp_auth`: Google access tokens.
//! - `handlers`: HTTP handlers and router.
//! - `kayzen_client`: Kayzen token exchange and campaign listing.
//! - `loader`: Delete-then-append upsert.
//! - `models`: Data models.
//! - `pipeline`: One invocation, end to end.
//! - `warehouse`: Destination table abstraction and in-memory table.

pub mod api;
pub mod core;
pub mod integrations;

pub mod bigquery;
pub mod config;
pub mod errors;
pub mod gcp_auth;
pub mod handlers;
pub mod kayzen_client;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod warehouse;
