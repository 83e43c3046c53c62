//! Connectivity layer for an NSX Manager cluster.
//!
//! This crate presents N Manager nodes as one logical call surface:
//!
//! - [`RateLimiter`]: per-endpoint token bucket, blocking rather than failing
//! - [`AuthSession`]: form login or client-certificate session to one node
//! - [`Endpoint`]: one node with its health status and keep-alive loop
//! - [`EndpointPool`]: endpoint selection, fail-over and version gating
//! - [`ManagerApi`]: the typed object operations the provisioning engine uses
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │  Provisioning    │────▶│   ManagerApi     │
//! │  engine          │     │   (trait)        │
//! └──────────────────┘     └────────┬─────────┘
//!                                   │
//!                          ┌────────▼─────────┐
//!                          │  EndpointPool    │
//!                          │  (fail-over)     │
//!                          └────────┬─────────┘
//!                       ┌───────────┼───────────┐
//!                 ┌─────▼────┐ ┌────▼─────┐ ┌───▼──────┐
//!                 │ Endpoint │ │ Endpoint │ │ Endpoint │
//!                 │ session  │ │ session  │ │ session  │
//!                 │ limiter  │ │ limiter  │ │ limiter  │
//!                 └──────────┘ └──────────┘ └──────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nsx_sa_client::{EndpointPool, Feature, HttpManagerApi, ManagerApi, ManagerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManagerConfig {
//!     managers: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
//!     ..ManagerConfig::default()
//! };
//!
//! let pool = Arc::new(EndpointPool::new(&config)?);
//! let api = HttpManagerApi::new(Arc::clone(&pool));
//!
//! if api.supports(Feature::ServiceAccount).await? {
//!     let identities = api.list_principal_identities().await?;
//!     println!("{} principal identities", identities.len());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod pool;
pub mod ratelimit;
pub mod request;
pub mod session;
pub mod version;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use api::{HttpManagerApi, ManagerApi};
pub use config::ManagerConfig;
pub use endpoint::{Endpoint, EndpointStatus};
pub use error::{ClientError, Result};
pub use pool::{ClusterHealth, EndpointPool};
pub use ratelimit::{RateLimiter, RateMode};
pub use request::{ApiRequest, ApiResponse};
pub use session::{AuthSession, Credentials};
pub use version::{Feature, FeatureSet, ManagerVersion};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{Journal, MockManagerApi};
