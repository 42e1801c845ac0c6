use crate::{
    endpoint::FailurePolicy,
    k8s::{
        ByteString, LabelSelector, ObjectMeta, RuleWithOperations, ServiceReference,
        ValidatingWebhook, ValidatingWebhookConfiguration, WebhookClientConfig,
    },
};
use std::num::NonZeroU16;

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY: &str = "webhook-proxy";

// Values the API server fills in when a webhook leaves them unset.
const DEFAULT_MATCH_POLICY: &str = "Equivalent";
const DEFAULT_TIMEOUT_SECONDS: i32 = 10;
const DEFAULT_SERVICE_PORT: i32 = 443;
const DEFAULT_SCOPE: &str = "*";

/// Describes how the platform reaches the proxy's own admission endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrimaryTarget {
    pub configuration_name: String,
    pub webhook_name: String,
    pub service_name: String,
    pub service_namespace: String,
    pub service_port: NonZeroU16,
    pub path: String,
    pub ca_bundle: Vec<u8>,
    pub failure_policy: FailurePolicy,
}

impl PrimaryTarget {
    /// Builds the configuration object that sends requests matching `rules`
    /// to the proxy.
    pub fn webhook_configuration(
        &self,
        rules: Vec<RuleWithOperations>,
    ) -> ValidatingWebhookConfiguration {
        let webhook = ValidatingWebhook {
            name: self.webhook_name.clone(),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            failure_policy: Some(self.failure_policy.to_string()),
            match_policy: Some(DEFAULT_MATCH_POLICY.to_string()),
            timeout_seconds: Some(DEFAULT_TIMEOUT_SECONDS),
            namespace_selector: Some(LabelSelector::default()),
            object_selector: Some(LabelSelector::default()),
            client_config: WebhookClientConfig {
                ca_bundle: Some(ByteString(self.ca_bundle.clone())),
                service: Some(ServiceReference {
                    name: self.service_name.clone(),
                    namespace: self.service_namespace.clone(),
                    path: Some(self.path.clone()),
                    port: Some(i32::from(self.service_port.get())),
                }),
                url: None,
            },
            rules: Some(rules),
            ..Default::default()
        };

        ValidatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some(self.configuration_name.clone()),
                labels: Some(
                    [(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            webhooks: Some(vec![webhook]),
        }
    }
}

/// Compares two configurations on the content the platform acts on.
///
/// Metadata is ignored and both sides are normalized with the API server's
/// defaults, so an object that has round-tripped through storage compares
/// equal to the one it was generated from.
pub fn semantically_equal(
    observed: &ValidatingWebhookConfiguration,
    desired: &ValidatingWebhookConfiguration,
) -> bool {
    normalize(observed) == normalize(desired)
}

fn normalize(config: &ValidatingWebhookConfiguration) -> Vec<ValidatingWebhook> {
    config
        .webhooks
        .iter()
        .flatten()
        .cloned()
        .map(|mut wh| {
            wh.failure_policy
                .get_or_insert_with(|| FailurePolicy::Fail.to_string());
            wh.match_policy
                .get_or_insert_with(|| DEFAULT_MATCH_POLICY.to_string());
            wh.timeout_seconds.get_or_insert(DEFAULT_TIMEOUT_SECONDS);
            wh.namespace_selector.get_or_insert_with(Default::default);
            wh.object_selector.get_or_insert_with(Default::default);
            if wh.match_conditions.as_ref().is_some_and(|c| c.is_empty()) {
                wh.match_conditions = None;
            }
            if let Some(svc) = wh.client_config.service.as_mut() {
                svc.port.get_or_insert(DEFAULT_SERVICE_PORT);
            }
            let rules = wh.rules.get_or_insert_with(Vec::new);
            for rule in rules.iter_mut() {
                rule.scope.get_or_insert_with(|| DEFAULT_SCOPE.to_string());
            }
            wh
        })
        .collect()
}
