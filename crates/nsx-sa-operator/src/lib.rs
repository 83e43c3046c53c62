//! Kubernetes operator provisioning NSX Manager trust for service accounts.
//!
//! The binary wires the connectivity layer, the provisioning engine and the
//! garbage collector together and runs a controller for
//! `NSXServiceAccount` resources:
//!
//! ```text
//! ┌───────────────────┐      ┌────────────────────────────┐
//! │  kube Controller  │─────▶│  TrustProvisioningService  │
//! │  (finalizer)      │      └─────────────┬──────────────┘
//! └───────────────────┘                    │
//! ┌───────────────────┐                    ▼
//! │ GarbageCollector  │─────▶  EndpointPool ──▶ NSX Managers
//! └───────────────────┘        (keep-alive tasks)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod controller;
pub mod error;

pub use config::OperatorConfig;
pub use error::{OperatorError, Result};
