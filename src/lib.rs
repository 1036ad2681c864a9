//! # Galley: a control plane for vessels, charters and their engines
//!
//! Galley is a multi-tenant control plane. Tenants are organized as a
//! hierarchy:
//!
//! - **Vessels** are the top-level tenant, captained by the user who signed up.
//! - **Charters** split a vessel into teams.
//! - **Projects** and **compute plans** belong to a charter.
//! - **OAuth connections** link a charter to a source or registry provider
//!   (GitHub, GitLab, Bitbucket, Docker Hub).
//!
//! - **Engines** are the clusters a vessel runs on. Each engine is split into
//!   **regions** that hold **nodes**, and a node agent settles each node it
//!   runs on.
//! - A **billing profile** addresses a vessel's invoices.
//!
//! Agents running next to a vessel engine dial into the daemon over a
//! WebSocket and receive commands under credit-based flow control.
//!
//! ## API conventions
//!
//! Every response is a JSON:API document. Requests and responses use the
//! vendor media type `application/vnd.galley.v1+json`; anything else is
//! refused with 406 or 415 before a handler runs. Errors carry a numeric
//! code from [`api_status`] in their `status` member.
//!
//! Access tokens are HS256 JWTs whose `scp` claim maps
//! `vessel:<id>` and `charter:<vesselId>:<charterId>` scopes to crew roles.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HTTP + WebSocket (axum routers)         │
//! ├─────────────────────────────────────────┤
//! │ Negotiation, auth, validation           │
//! ├─────────────────────────────────────────┤
//! │ Resource handlers and agent tunnel      │
//! ├─────────────────────────────────────────┤
//! │ SQL layer (one module per table)        │
//! ├─────────────────────────────────────────┤
//! │ PostgreSQL                              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use galley::pagination::{PageQuery, Pagination};
//!
//! let query = PageQuery { offset: None, limit: Some(10), page: Some(2) };
//! let page = Pagination::from(&query);
//! assert_eq!(page.offset(), 10);
//! assert_eq!(page.meta(25)["totalPages"], 3);
//! ```

mod errors;

pub mod agent;
pub mod api_status;
pub mod auth;
pub mod billing_profile;
pub mod charter;
pub mod compute_plan;
pub mod config;
pub mod connection;
pub mod engine;
pub mod json_api;
pub mod jwt;
pub mod negotiation;
pub mod node;
pub mod oauth;
pub mod pagination;
pub mod project;
pub mod region;
pub mod router;
pub mod telemetry;
pub mod validate;
pub mod vault;
pub mod vessel;

/// PostgreSQL persistence, one module per table.
pub mod sql;

// CLI utility modules

/// Command-line interface utilities for program termination and output formatting.
pub mod cli_utils;

/// Command handlers for the galleyctl CLI, one submodule per resource.
pub mod commands;

/// HTTP client for galleyctl, speaking the vendor media type.
pub mod http_utils;

pub use errors::DataStoreError;
