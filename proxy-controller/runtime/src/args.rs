use crate::{
    admission::Admission,
    config,
    controller,
    core::{FailurePolicy, PrimaryTarget, SharedAggregate},
    dispatch::{DispatchMetrics, Dispatcher, HttpsCaller},
    k8s::API_GROUP,
    reconcile::{KubeCluster, Reconciler},
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{num::NonZeroU16, path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "webhook-proxy", about = "An admission webhook proxy controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "webhook_proxy=info,warn",
        env = "WEBHOOK_PROXY_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission proxy server. The controller still maintains
    /// the webhook configuration.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// Name of the generated ValidatingWebhookConfiguration.
    #[clap(long, default_value = "webhook-proxy")]
    cluster_webhook_name: String,

    #[clap(long, default_value = "webhook-proxy")]
    proxy_service_name: String,

    #[clap(long, default_value = "webhook-proxy")]
    proxy_service_namespace: String,

    #[clap(long, default_value = "443")]
    proxy_service_port: NonZeroU16,

    #[clap(long, default_value = "/proxy")]
    proxy_path: String,

    /// PEM bundle the API server uses to verify the proxy.
    #[clap(long)]
    ca_bundle_path: PathBuf,

    /// JSON file listing the secondary webhooks.
    #[clap(long, env = "WEBHOOK_PROXY_SECONDARY_WEBHOOKS")]
    secondary_webhooks: Option<PathBuf>,

    #[clap(long, default_value = "8000")]
    secondary_timeout_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            cluster_webhook_name,
            proxy_service_name,
            proxy_service_namespace,
            proxy_service_port,
            proxy_path,
            ca_bundle_path,
            secondary_webhooks,
            secondary_timeout_ms,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        // Configuration errors are fatal before anything is started.
        let webhooks = match secondary_webhooks {
            Some(path) => config::load_secondary_webhooks(&path)?,
            None => Vec::new(),
        };
        let caller = HttpsCaller::new(&webhooks, Duration::from_millis(secondary_timeout_ms))?;
        let target = PrimaryTarget {
            webhook_name: format!("{cluster_webhook_name}.{API_GROUP}"),
            configuration_name: cluster_webhook_name.clone(),
            service_name: proxy_service_name,
            service_namespace: proxy_service_namespace,
            service_port: proxy_service_port,
            path: proxy_path.clone(),
            ca_bundle: config::load_ca_bundle(&ca_bundle_path)?,
            failure_policy: FailurePolicy::Fail,
        };

        let mut prom = <Registry>::default();
        let dispatch_metrics = DispatchMetrics::register(prom.sub_registry_with_prefix("dispatch"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        if webhooks.is_empty() {
            warn!("No secondary webhooks configured; all requests will be allowed");
        }

        let store = SharedAggregate::default();
        let reconciler = Arc::new(Reconciler::new(
            KubeCluster::new(runtime.client(), cluster_webhook_name.clone()),
            store.clone(),
            target,
        ));

        // Serve from the existing configuration when it is already current;
        // otherwise start empty until the first reconcile publishes.
        if let Err(error) = reconciler.prime().await {
            warn!(%error, "Failed to prime from cluster state");
        }

        tokio::spawn(
            controller::run(
                runtime.client(),
                cluster_webhook_name,
                reconciler,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("proxyvalidatingtypes")),
        );

        info!(webhooks = webhooks.len(), path = %proxy_path, "Dispatching to secondary webhooks");
        let dispatcher = Dispatcher::new(store, webhooks, caller, dispatch_metrics);
        let admission = Admission::new(dispatcher, &proxy_path);
        let runtime = runtime.spawn_server(move || admission.clone());

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
