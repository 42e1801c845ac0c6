use crate::{
    core::SharedAggregate,
    k8s::{Api, Client, ProxyValidatingType, ResourceExt, ValidatingWebhookConfiguration},
    reconcile::{KubeCluster, ReconcileError, Reconciler},
};
use futures::prelude::*;
use kube::runtime::{
    controller::{self, Action},
    reflector::ObjectRef,
    watcher, Controller,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// How long a failed reconcile waits before it is retried.
const REQUEUE_DELAY: Duration = Duration::from_secs(5);

type Context = Reconciler<KubeCluster, SharedAggregate>;

/// Runs the `ProxyValidatingType` controller until `drain` fires.
///
/// Reconciles run one at a time. A change to the generated webhook
/// configuration reconciles every resource so that edits made outside the
/// controller are reverted.
pub(crate) async fn run(
    client: Client,
    webhook_name: String,
    reconciler: Arc<Context>,
    drain: drain::Watch,
) {
    let declarants = Api::<ProxyValidatingType>::all(client.clone());
    let webhooks = Api::<ValidatingWebhookConfiguration>::all(client);

    let (close_tx, close_rx) = oneshot::channel::<()>();
    let controller = Controller::new(declarants, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(1));
    let store = controller.store();
    let controller = controller
        .watches(
            webhooks,
            watcher::Config::default().fields(&format!("metadata.name={webhook_name}")),
            move |webhook| {
                debug!(name = %webhook.name_any(), "Webhook configuration changed");
                store
                    .state()
                    .iter()
                    .map(|r| ObjectRef::from_obj(&**r))
                    .collect::<Vec<_>>()
            },
        )
        .graceful_shutdown_on(close_rx.map(|_| ()))
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(name = %obj.name, "Reconciled"),
                Err(error) => debug!(%error, "Reconcile did not complete"),
            }
        });
    tokio::pin!(controller);

    info!("Watching ProxyValidatingTypes");
    tokio::select! {
        () = &mut controller => {}
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(controller).await;
        }
    }
}

async fn reconcile(
    resource: Arc<ProxyValidatingType>,
    reconciler: Arc<Context>,
) -> Result<Action, ReconcileError> {
    reconciler.reconcile(&resource.name_any()).await?;
    Ok(Action::await_change())
}

fn error_policy(
    resource: Arc<ProxyValidatingType>,
    error: &ReconcileError,
    _: Arc<Context>,
) -> Action {
    warn!(name = %resource.name_any(), %error, "Reconcile failed");
    Action::requeue(REQUEUE_DELAY)
}
