//! Trust provisioning engine for NSX service accounts.
//!
//! This crate turns `NSXServiceAccount` custom resources into NSX Manager
//! trust objects and Kubernetes credential secrets, and keeps them alive:
//!
//! - [`TrustProvisioningService`]: realize, restore and delete CRs
//! - [`CertificateLifecycleManager`]: client certificates, rotation and CA sync
//! - [`GarbageCollector`]: removal of orphaned realizations, periodic validation
//! - [`KubeClient`]: the Kubernetes boundary
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Operator (kube controller)                  │
//! └─────────────────────────────────────────────────────────────┘
//!                │                              │
//!                ▼                              ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────┐
//! │  TrustProvisioningService    │◄──│    GarbageCollector      │
//! │  ┌────────────┐ ┌──────────┐ │   └──────────────────────────┘
//! │  │ Lifecycle  │ │ Cert     │ │
//! │  │ states     │ │ lifecycle│ │
//! │  └────────────┘ └──────────┘ │
//! └──────────────────────────────┘
//!        │            │            │
//!        ▼            ▼            ▼
//!  ┌──────────┐ ┌──────────┐ ┌──────────┐
//!  │  Stores  │ │ Manager  │ │   Kube   │
//!  │ (memory) │ │   API    │ │  client  │
//!  └──────────┘ └──────────┘ └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use nsx_sa_client::{EndpointPool, HttpManagerApi, ManagerConfig};
//! use nsx_sa_control::{KubeApiClient, ProvisioningConfig, TrustProvisioningService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Arc::new(EndpointPool::new(&ManagerConfig::from_env()?)?);
//! let api = Arc::new(HttpManagerApi::new(pool));
//! let kube = Arc::new(KubeApiClient::new(kube::Client::try_default().await?));
//!
//! let service = TrustProvisioningService::new(api, kube, ProvisioningConfig::from_env()?);
//! let (identities, control_planes) = service.initialize().await?;
//! println!("{identities} principal identities, {control_planes} control planes");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod certificate;
pub mod crd;
pub mod error;
pub mod gc;
pub mod kube_client;
pub mod lifecycle;
pub mod pki;
pub mod proxy;
pub mod service;
pub mod types;

pub use certificate::CertificateLifecycleManager;
pub use crd::{
    Condition, NsxServiceAccount, NsxServiceAccountSpec, NsxServiceAccountStatus, Phase,
};
pub use error::{ControlError, Result};
pub use gc::{GarbageCollector, GcReport, GcStats, ValidationMode};
pub use kube_client::{CredentialSecret, KubeApiClient, KubeClient, SecretOwner};
pub use lifecycle::RealizationState;
pub use service::{TrustProvisioningService, ValidationOutcome};
pub use types::{GcConfig, ProvisioningConfig};

#[cfg(any(test, feature = "test-utils"))]
pub use kube_client::mock::MockKubeClient;
