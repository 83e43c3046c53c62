//! Kubernetes controller for `NSXServiceAccount` resources.
//!
//! Every CR carries a finalizer so its Manager objects are removed before
//! the CR disappears. Secrets are owned by their CR, so deleting or editing
//! one triggers a reconcile of the owner.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event as Finalizer};
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, ResourceExt};
use nsx_sa_control::{ControlError, NsxServiceAccount, TrustProvisioningService};
use tracing::{debug, info, warn};

use crate::config::{PERMANENT_REQUEUE, RETRY_REQUEUE};
use crate::error::{OperatorError, Result};

/// Finalizer placed on every `NSXServiceAccount`.
pub const FINALIZER: &str = "nsx.vmware.com/service-account-cleanup";

/// State shared by reconciles.
pub struct Context {
    client: Client,
    service: Arc<TrustProvisioningService>,
}

impl Context {
    /// Create a new context.
    #[must_use]
    pub const fn new(client: Client, service: Arc<TrustProvisioningService>) -> Self {
        Self { client, service }
    }
}

/// Run the controller until the process receives a shutdown signal.
pub async fn run(client: Client, service: Arc<TrustProvisioningService>) {
    let accounts: Api<NsxServiceAccount> = Api::all(client.clone());
    let context = Arc::new(Context::new(client.clone(), service));

    info!("Starting NSXServiceAccount controller");
    Controller::new(accounts, watcher::Config::default())
        .owns(Api::<Secret>::all(client), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(namespace = ?obj.namespace, name = %obj.name, "Reconciled"),
                Err(e) => warn!(error = %e, "Reconciliation error"),
            }
        })
        .await;
    info!("NSXServiceAccount controller stopped");
}

async fn reconcile(cr: Arc<NsxServiceAccount>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = cr.namespace().ok_or(OperatorError::MissingNamespace)?;
    let api: Api<NsxServiceAccount> = Api::namespaced(ctx.client.clone(), &namespace);
    let service = Arc::clone(&ctx.service);

    Ok(finalizer(&api, FINALIZER, cr, |event| async move {
        match event {
            Finalizer::Apply(cr) => apply(&cr, &service).await,
            Finalizer::Cleanup(cr) => cleanup(&cr, &service).await,
        }
    })
    .await?)
}

/// Bring a live CR to its desired state.
///
/// # Errors
///
/// Returns the provisioning error.
pub async fn apply(
    cr: &NsxServiceAccount,
    service: &TrustProvisioningService,
) -> std::result::Result<Action, ControlError> {
    debug!(namespace = ?cr.namespace(), name = %cr.name_any(), "Applying");
    service.reconcile(cr).await?;
    Ok(Action::await_change())
}

/// Remove the Manager objects of a CR being deleted.
///
/// # Errors
///
/// Returns the delete error; the finalizer stays until it succeeds.
pub async fn cleanup(
    cr: &NsxServiceAccount,
    service: &TrustProvisioningService,
) -> std::result::Result<Action, ControlError> {
    let namespace = cr.namespace().unwrap_or_default();
    let name = cr.name_any();
    info!(namespace = %namespace, name = %name, "Cleaning up");
    service.delete(&namespace, &name, cr.uid().as_deref()).await?;
    Ok(Action::await_change())
}

/// Requeue soon for retriable errors and slowly for the rest.
#[must_use]
pub fn error_policy(cr: Arc<NsxServiceAccount>, error: &OperatorError, _ctx: Arc<Context>) -> Action {
    let retriable = error.is_retriable();
    warn!(
        namespace = ?cr.namespace(),
        name = %cr.name_any(),
        error = %error,
        retriable,
        "Reconcile failed"
    );
    requeue_for(retriable)
}

fn requeue_for(retriable: bool) -> Action {
    if retriable {
        Action::requeue(RETRY_REQUEUE)
    } else {
        Action::requeue(PERMANENT_REQUEUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use nsx_sa_client::MockManagerApi;
    use nsx_sa_control::{MockKubeClient, NsxServiceAccountSpec, ProvisioningConfig};

    fn service() -> (Arc<MockManagerApi>, TrustProvisioningService) {
        let api = Arc::new(MockManagerApi::new());
        let kube = Arc::new(MockKubeClient::with_journal(api.journal()));
        let config = ProvisioningConfig {
            cluster_name: "cl".into(),
            ..ProvisioningConfig::default()
        };
        (api.clone(), TrustProvisioningService::new(api, kube, config))
    }

    fn account() -> NsxServiceAccount {
        NsxServiceAccount {
            metadata: ObjectMeta {
                name: Some("name1".into()),
                namespace: Some("ns1".into()),
                uid: Some("uid-1".into()),
                ..ObjectMeta::default()
            },
            spec: NsxServiceAccountSpec::default(),
            status: None,
        }
    }

    #[tokio::test]
    async fn apply_then_cleanup() {
        let (api, service) = service();

        assert_eq!(apply(&account(), &service).await.unwrap(), Action::await_change());
        assert_eq!(api.principal_identities().len(), 1);
        assert_eq!(api.cluster_control_planes().len(), 1);

        cleanup(&account(), &service).await.unwrap();
        assert!(api.principal_identities().is_empty());
        assert!(api.cluster_control_planes().is_empty());
    }

    #[tokio::test]
    async fn cleanup_of_unrealized_account_is_a_no_op() {
        let (api, service) = service();
        cleanup(&account(), &service).await.unwrap();
        assert!(api.mutations().is_empty());
    }

    #[test]
    fn requeue_depends_on_retriability() {
        assert_eq!(requeue_for(true), Action::requeue(RETRY_REQUEUE));
        assert_eq!(requeue_for(false), Action::requeue(PERMANENT_REQUEUE));
    }
}
