use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declares a set of admission rules on behalf of one secondary webhook.
///
/// Every `ProxyValidatingType` in the cluster contributes its rules to a
/// single generated `ValidatingWebhookConfiguration` that routes matching
/// requests to the proxy.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema,
)]
#[kube(
    group = "webhookproxy.io",
    version = "v1alpha1",
    kind = "ProxyValidatingType",
    status = "ProxyValidatingTypeStatus",
    derive = "PartialEq",
    shortname = "pvt"
)]
#[serde(rename_all = "camelCase")]
pub struct ProxyValidatingTypeSpec {
    #[serde(default)]
    pub types: Vec<TypeRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyValidatingTypeStatus {
    #[serde(default)]
    pub observed_generation: i64,
}

/// Matches requests by group, version, resource and operation, using the
/// same vocabulary as the platform's webhook rules.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypeRule {
    #[serde(default)]
    pub api_groups: Vec<String>,
    #[serde(default)]
    pub api_versions: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Operation {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "CONNECT")]
    Connect,
    #[serde(rename = "*")]
    All,
}

// === impl ProxyValidatingType ===

impl ProxyValidatingType {
    /// The declared types as platform webhook rules.
    pub fn rules(&self) -> Vec<RuleWithOperations> {
        self.spec.types.iter().map(RuleWithOperations::from).collect()
    }

    pub fn observed_generation(&self) -> i64 {
        self.status
            .as_ref()
            .map(|s| s.observed_generation)
            .unwrap_or_default()
    }
}

// === impl TypeRule ===

impl From<&TypeRule> for RuleWithOperations {
    fn from(rule: &TypeRule) -> Self {
        RuleWithOperations {
            api_groups: Some(rule.api_groups.clone()),
            api_versions: Some(rule.api_versions.clone()),
            resources: Some(rule.resources.clone()),
            operations: Some(rule.operations.iter().map(ToString::to_string).collect()),
            scope: rule.scope.clone(),
        }
    }
}

// === impl Operation ===

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::All => "*",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
