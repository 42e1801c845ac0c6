use anyhow::{Context, Result};
use webhook_proxy_core::k8s::{
    Api, Client, ListParams, Patch, PatchParams, PostParams, ProxyValidatingType, ResourceExt,
    ValidatingWebhookConfiguration, API_GROUP,
};

/// The cluster reads and writes a reconcile cycle depends on.
#[async_trait::async_trait]
pub trait ClusterState: Send + Sync {
    async fn get_declarant(&self, name: &str) -> Result<Option<ProxyValidatingType>>;

    async fn list_declarants(&self) -> Result<Vec<ProxyValidatingType>>;

    /// Fetches the generated webhook configuration, if it exists.
    async fn get_webhook(&self) -> Result<Option<ValidatingWebhookConfiguration>>;

    async fn create_webhook(&self, webhook: &ValidatingWebhookConfiguration) -> Result<()>;

    /// Replaces the webhook configuration. The object's resource version must
    /// match the stored one.
    async fn replace_webhook(&self, webhook: &ValidatingWebhookConfiguration) -> Result<()>;

    /// Writes the whole resource, including its finalizers.
    async fn replace_declarant(&self, resource: &ProxyValidatingType) -> Result<()>;

    /// Writes only the resource's status.
    async fn patch_declarant_status(&self, resource: &ProxyValidatingType) -> Result<()>;
}

#[derive(Clone)]
pub struct KubeCluster {
    declarants: Api<ProxyValidatingType>,
    webhooks: Api<ValidatingWebhookConfiguration>,
    webhook_name: String,
}

// === impl KubeCluster ===

impl KubeCluster {
    pub fn new(client: Client, webhook_name: impl Into<String>) -> Self {
        Self {
            declarants: Api::all(client.clone()),
            webhooks: Api::all(client),
            webhook_name: webhook_name.into(),
        }
    }
}

#[async_trait::async_trait]
impl ClusterState for KubeCluster {
    async fn get_declarant(&self, name: &str) -> Result<Option<ProxyValidatingType>> {
        self.declarants
            .get_opt(name)
            .await
            .with_context(|| format!("failed to get ProxyValidatingType {name}"))
    }

    async fn list_declarants(&self) -> Result<Vec<ProxyValidatingType>> {
        let list = self
            .declarants
            .list(&ListParams::default())
            .await
            .context("failed to list ProxyValidatingTypes")?;
        Ok(list.items)
    }

    async fn get_webhook(&self) -> Result<Option<ValidatingWebhookConfiguration>> {
        self.webhooks
            .get_opt(&self.webhook_name)
            .await
            .with_context(|| format!("failed to get ValidatingWebhookConfiguration {}", self.webhook_name))
    }

    async fn create_webhook(&self, webhook: &ValidatingWebhookConfiguration) -> Result<()> {
        self.webhooks
            .create(&PostParams::default(), webhook)
            .await
            .with_context(|| format!("failed to create ValidatingWebhookConfiguration {}", self.webhook_name))?;
        Ok(())
    }

    async fn replace_webhook(&self, webhook: &ValidatingWebhookConfiguration) -> Result<()> {
        self.webhooks
            .replace(&self.webhook_name, &PostParams::default(), webhook)
            .await
            .with_context(|| format!("failed to update ValidatingWebhookConfiguration {}", self.webhook_name))?;
        Ok(())
    }

    async fn replace_declarant(&self, resource: &ProxyValidatingType) -> Result<()> {
        let name = resource.name_any();
        self.declarants
            .replace(&name, &PostParams::default(), resource)
            .await
            .with_context(|| format!("failed to update ProxyValidatingType {name}"))?;
        Ok(())
    }

    async fn patch_declarant_status(&self, resource: &ProxyValidatingType) -> Result<()> {
        let name = resource.name_any();
        // The resource version makes the merge patch fail on conflict.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": resource.resource_version() },
            "status": resource.status,
        });
        self.declarants
            .patch_status(&name, &PatchParams::apply(API_GROUP), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to update ProxyValidatingType {name} status"))?;
        Ok(())
    }
}
