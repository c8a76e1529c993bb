//! Client for the edu-sharing repository REST API.
//!
//! This crate implements the app side of the edu-sharing wire protocol:
//!
//! - Signed request headers (RSA over `appId + subject + timestamp`)
//! - Session ticket issuance and validation for repository users
//! - Usage lifecycle: create, resolve, fetch and delete bindings between
//!   repository nodes and your own container/resource slots
//! - Content/download URL rewriting for embedded rendering snippets
//! - Repository version compatibility check
//!
//! The HTTP transport is pluggable; a reqwest-backed default is provided.
//! The client holds no call-scoped mutable state, does not retry, and never
//! persists tickets or usages — that is the caller's responsibility.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use edu_sharing_client::{AuthClient, EduClient, EduConfig, UsageClient};
//!
//! # async fn example() -> edu_sharing_client::EduResult<()> {
//! let config = EduConfig::new(
//!     "http://repo.example/edu-sharing",
//!     "my-lms",
//!     std::fs::read_to_string("private.pem").unwrap(),
//! );
//! let client = Arc::new(EduClient::new(config)?);
//! client.verify_compatibility().await?;
//!
//! let auth = AuthClient::new(client.clone());
//! let ticket = auth.get_ticket_for_user("alice", None).await?;
//!
//! let usages = UsageClient::new(client);
//! let usage = usages
//!     .create_usage(&ticket, "course-7", "slot-3", "node-uuid", None)
//!     .await?;
//! // Persist `usage` in your own storage; you need it for later fetches.
//! # Ok(())
//! # }
//! ```
//!
//! # Registering an app
//!
//! Generate a key pair with [`generate_key_pair`] and register the public key
//! in the repository under your app id. The app id is restricted to
//! `[A-Za-z0-9._-]+`; construction fails otherwise.

pub mod auth;
pub mod client;
pub mod error;
pub mod signing;
pub mod transport;
pub mod types;
pub mod usage;

// Re-export main types
pub use auth::{explain_app_auth_message, AuthClient};
pub use client::{EduClient, MIN_REPOSITORY_VERSION};
pub use error::{EduError, EduResult};
pub use signing::{generate_key_pair, validate_app_id, verify_signature, AppSigner, KeyPair};
pub use transport::{Method, ReqwestTransport, RequestOptions, RequestResult, Transport};
pub use types::{DisplayMode, EduConfig, RedirectMode, UrlHandling, Usage};
pub use usage::UsageClient;
