#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Fans admission requests received by the proxy out to the secondary
//! webhooks whose declared rules match them, and merges their verdicts.

mod caller;
pub mod metrics;


pub use self::{
    caller::{CallError, CallWebhook, HttpsCaller},
    metrics::DispatchMetrics,
};

use bytes::Bytes;
use futures::future;
use http::HeaderMap;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, Operation},
    DynamicObject,
};
use std::sync::Arc;
use tracing::{debug, info, Instrument};
use webhook_proxy_core::{AggregateStore, FailurePolicy, RequestAttributes, SecondaryWebhook};

pub type Request = AdmissionRequest<DynamicObject>;

/// An admission request as it was received on the primary endpoint.
#[derive(Debug)]
pub struct Inbound {
    pub request: Request,
    pub headers: HeaderMap,
    /// The undecoded request body, forwarded as-is.
    pub body: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(String),
}

/// The verdict of a single secondary webhook, after its failure policy has
/// been applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub webhook: String,
    pub verdict: Verdict,
}

#[derive(Clone, Debug)]
pub struct Dispatcher<C, S> {
    store: S,
    webhooks: Arc<[Arc<SecondaryWebhook>]>,
    caller: C,
    metrics: DispatchMetrics,
}

// === impl Dispatcher ===

impl<C, S> Dispatcher<C, S>
where
    C: CallWebhook + Clone + Send + Sync + 'static,
    S: AggregateStore,
{
    pub fn new(
        store: S,
        webhooks: impl IntoIterator<Item = SecondaryWebhook>,
        caller: C,
        metrics: DispatchMetrics,
    ) -> Self {
        Self {
            store,
            webhooks: webhooks.into_iter().map(Arc::new).collect(),
            caller,
            metrics,
        }
    }

    /// Returns the webhooks whose declarant's rules, in the currently
    /// published aggregate, select `attrs`. Configuration order is preserved.
    pub fn matching(&self, attrs: &RequestAttributes) -> Vec<Arc<SecondaryWebhook>> {
        let aggregate = self.store.get();
        self.webhooks
            .iter()
            .filter(|wh| {
                aggregate
                    .by_declarant(&wh.declarant)
                    .is_some_and(|rules| rules.matches(attrs))
            })
            .cloned()
            .collect()
    }

    pub async fn dispatch(&self, inbound: Inbound) -> AdmissionResponse {
        let Inbound {
            request,
            headers,
            body,
        } = inbound;
        let rsp = AdmissionResponse::from(&request);

        let attrs = attributes(&request);
        let webhooks = self.matching(&attrs);
        if webhooks.is_empty() {
            debug!(uid = %request.uid, ?attrs, "No secondary webhooks match");
            return rsp;
        }

        let outcomes = self.fan_out(webhooks, headers, body).await;
        match merge(&outcomes) {
            Verdict::Allow => {
                debug!(uid = %request.uid, webhooks = outcomes.len(), "Allowed");
                rsp
            }
            Verdict::Deny(message) => {
                info!(uid = %request.uid, %message, "Denied");
                rsp.deny(message)
            }
        }
    }

    /// Calls every webhook concurrently and waits for all of them.
    ///
    /// Each call runs on its own task, so calls still in flight when the
    /// inbound request is dropped run to completion and are discarded.
    async fn fan_out(
        &self,
        webhooks: Vec<Arc<SecondaryWebhook>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Vec<Outcome> {
        let headers = Arc::new(headers);
        let calls = webhooks.into_iter().map(|webhook| {
            let caller = self.caller.clone();
            let metrics = self.metrics.clone();
            let headers = headers.clone();
            let body = body.clone();
            let task = {
                let webhook = webhook.clone();
                tokio::spawn(
                    async move {
                        let started = tokio::time::Instant::now();
                        let result = caller.call(&webhook, &headers, body).await;
                        metrics.record(&webhook.name, &result, started);
                        result
                    }
                    .in_current_span(),
                )
            };
            async move {
                let result = match task.await {
                    Ok(result) => result,
                    Err(error) => Err(CallError::Transport(Box::new(error))),
                };
                resolve(&webhook, result)
            }
        });
        future::join_all(calls).await
    }
}

/// Applies the webhook's failure policy to the result of calling it.
fn resolve(webhook: &SecondaryWebhook, result: Result<(), CallError>) -> Outcome {
    let verdict = match result {
        Ok(()) => Verdict::Allow,
        Err(error) => match webhook.failure_policy {
            FailurePolicy::Fail => {
                info!(webhook = %webhook.name, %error, "Secondary webhook did not allow request");
                Verdict::Deny(format!("proxied webhook {} {}", webhook.name, error))
            }
            FailurePolicy::Ignore => {
                debug!(webhook = %webhook.name, %error, "Ignoring secondary webhook failure");
                Verdict::Allow
            }
        },
    };
    Outcome {
        webhook: webhook.name.clone(),
        verdict,
    }
}

/// Merges outcomes into a single verdict.
///
/// Any denial denies the request. Only the first denial's message, in
/// webhook order, is reported.
pub fn merge(outcomes: &[Outcome]) -> Verdict {
    outcomes
        .iter()
        .find_map(|o| match &o.verdict {
            Verdict::Deny(message) => Some(Verdict::Deny(message.clone())),
            Verdict::Allow => None,
        })
        .unwrap_or(Verdict::Allow)
}

pub fn attributes(req: &Request) -> RequestAttributes {
    let operation = match req.operation {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        Operation::Connect => "CONNECT",
    };
    RequestAttributes {
        group: req.resource.group.clone(),
        version: req.resource.version.clone(),
        resource: req.resource.resource.clone(),
        sub_resource: req.sub_resource.clone(),
        operation: operation.to_string(),
    }
}
