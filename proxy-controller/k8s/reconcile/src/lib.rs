#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Keeps the generated webhook configuration in line with the set of
//! `ProxyValidatingType` resources.
//!
//! Each reconcile cycle observes one resource, its peers and the current
//! webhook configuration; analyzes what must change; and then acts on that
//! decision. Writes happen in a fixed order: the webhook configuration first,
//! then the resource itself, then publication of the new aggregate. A failure
//! at any step ends the cycle.

mod cluster;


pub use self::cluster::{ClusterState, KubeCluster};

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use webhook_proxy_core::{
    k8s::{ProxyValidatingType, ProxyValidatingTypeStatus, ResourceExt, ValidatingWebhookConfiguration},
    semantically_equal, Aggregate, AggregateStore, PrimaryTarget, RuleSet,
};

/// Held by every live `ProxyValidatingType` so that its rules are withdrawn
/// before it disappears.
pub const FINALIZER: &str = "type.finalizer.webhookproxy.io";

#[derive(Clone, Debug)]
pub struct Reconciler<C, S> {
    cluster: C,
    store: S,
    target: Arc<PrimaryTarget>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Observed {
    pub resource: ProxyValidatingType,
    pub cluster_webhook: Option<ValidatingWebhookConfiguration>,
    /// Every other resource that holds the finalizer and is not being
    /// deleted.
    pub peers: Aggregate,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileDecision {
    pub create: bool,
    pub update: bool,
    pub delete: bool,
    pub finalizer_change: bool,
    pub status_change: bool,
}

/// A decision with the objects it should write.
#[derive(Clone, Debug, PartialEq)]
pub struct Analyzed {
    pub decision: ReconcileDecision,
    pub resource: ProxyValidatingType,
    pub webhook: ValidatingWebhookConfiguration,
    pub aggregate: Aggregate,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to observe cluster state: {0:#}")]
    Observe(anyhow::Error),

    #[error("failed to apply webhook configuration: {0:#}")]
    ApplyWebhook(anyhow::Error),

    #[error("failed to update resource: {0:#}")]
    UpdateResource(anyhow::Error),

    #[error("failed to update resource status: {0:#}")]
    UpdateStatus(anyhow::Error),
}

// === impl Reconciler ===

impl<C, S> Reconciler<C, S>
where
    C: ClusterState,
    S: AggregateStore,
{
    pub fn new(cluster: C, store: S, target: PrimaryTarget) -> Self {
        Self {
            cluster,
            store,
            target: Arc::new(target),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs one full cycle for the named resource.
    pub async fn reconcile(&self, name: &str) -> Result<(), ReconcileError> {
        let Some(observed) = self.observe(name).await? else {
            debug!(%name, "Resource no longer exists");
            return Ok(());
        };
        let analyzed = self.analyze(observed);
        debug!(%name, decision = ?analyzed.decision);
        self.act(analyzed).await
    }

    pub async fn observe(&self, name: &str) -> Result<Option<Observed>, ReconcileError> {
        let Some(resource) = self
            .cluster
            .get_declarant(name)
            .await
            .map_err(ReconcileError::Observe)?
        else {
            return Ok(None);
        };

        let cluster_webhook = self
            .cluster
            .get_webhook()
            .await
            .map_err(ReconcileError::Observe)?;

        let all = self
            .cluster
            .list_declarants()
            .await
            .map_err(ReconcileError::Observe)?;
        let peers = Aggregate::from_resources(
            all.iter()
                .filter(|r| r.name_any() != name && holds_finalizer(r)),
        );

        Ok(Some(Observed {
            resource,
            cluster_webhook,
            peers,
        }))
    }

    pub fn analyze(&self, observed: Observed) -> Analyzed {
        let Observed {
            mut resource,
            cluster_webhook,
            peers,
        } = observed;

        let delete = resource.metadata.deletion_timestamp.is_some();
        let aggregate = if delete {
            peers
        } else {
            peers.add(RuleSet::from_resource(&resource))
        };

        let mut webhook = aggregate.generate_global_webhook(&self.target);
        let (create, update) = match &cluster_webhook {
            None => (true, false),
            Some(current) => {
                webhook.metadata.resource_version = current.metadata.resource_version.clone();
                (false, !semantically_equal(current, &webhook))
            }
        };

        let finalizer_change = holds_finalizer(&resource) == delete;
        if finalizer_change {
            if delete {
                resource.finalizers_mut().retain(|f| f != FINALIZER);
            } else {
                resource.finalizers_mut().push(FINALIZER.to_string());
            }
        }

        let generation = resource.metadata.generation.unwrap_or_default();
        let status_change = resource.observed_generation() < generation;
        if status_change {
            resource.status = Some(ProxyValidatingTypeStatus {
                observed_generation: generation,
            });
        }

        Analyzed {
            decision: ReconcileDecision {
                create,
                update,
                delete,
                finalizer_change,
                status_change,
            },
            resource,
            webhook,
            aggregate,
        }
    }

    pub async fn act(&self, analyzed: Analyzed) -> Result<(), ReconcileError> {
        let Analyzed {
            decision,
            resource,
            webhook,
            aggregate,
        } = analyzed;
        let name = resource.name_any();

        if decision.create {
            self.cluster
                .create_webhook(&webhook)
                .await
                .map_err(ReconcileError::ApplyWebhook)?;
            info!(%name, rules = aggregate.rules().len(), "Created webhook configuration");
        } else if decision.update {
            self.cluster
                .replace_webhook(&webhook)
                .await
                .map_err(ReconcileError::ApplyWebhook)?;
            info!(%name, rules = aggregate.rules().len(), "Updated webhook configuration");
        }

        if decision.finalizer_change {
            self.cluster
                .replace_declarant(&resource)
                .await
                .map_err(ReconcileError::UpdateResource)?;
            debug!(%name, deleting = decision.delete, "Updated finalizers");
        } else if decision.status_change {
            self.cluster
                .patch_declarant_status(&resource)
                .await
                .map_err(ReconcileError::UpdateStatus)?;
            debug!(%name, "Updated status");
        }

        self.store.publish(Arc::new(aggregate));
        Ok(())
    }

    /// Publishes the aggregate of every finalized resource, but only when the
    /// cluster's webhook configuration already matches it. Returns whether
    /// anything was published.
    pub async fn prime(&self) -> anyhow::Result<bool> {
        let resources = self.cluster.list_declarants().await?;
        let aggregate =
            Aggregate::from_resources(resources.iter().filter(|r| holds_finalizer(r)));
        let generated = aggregate.generate_global_webhook(&self.target);

        match self.cluster.get_webhook().await? {
            Some(current) if semantically_equal(&current, &generated) => {
                info!(declarants = aggregate.len(), "Primed from existing webhook configuration");
                self.store.publish(Arc::new(aggregate));
                Ok(true)
            }
            _ => {
                info!("Webhook configuration is out of date; waiting for reconciliation");
                Ok(false)
            }
        }
    }
}

/// A resource contributes rules only while it holds the finalizer.
fn holds_finalizer(resource: &ProxyValidatingType) -> bool {
    resource.finalizers().iter().any(|f| f == FINALIZER)
}
