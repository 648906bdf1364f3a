//! epaper-rs: a digital-newspaper publishing backend.
//!
//! This crate provides the e-paper ingestion and page-access pipeline of a
//! newspaper publishing platform: publishers upload a PDF or a batch of
//! images, the server rasterizes pages and a thumbnail, stores artifacts on
//! the filesystem, and serves a paginated edition API whose page list is
//! trimmed per request by a subscription-aware access check.
//!
//! # Features
//!
//! - PDF and raw-image ingestion with normalized page rendering
//! - Subscription-gated page access with a free-preview fallback
//! - Clickable polygon area maps with server-side hit-testing
//! - Time-limited crop-and-share artifacts
//! - User accounts, sessions, and publisher roles
//! - TOML configuration and a management CLI

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Access-control evaluation.
pub mod access;
/// Area-map domain types and hit-testing.
pub mod areamap;
/// Authentication and user management.
pub mod auth;
/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Upload ingestion and page rasterization.
pub mod ingest;
/// HTTP server.
pub mod server;
/// Artifact file storage.
pub mod storage;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
