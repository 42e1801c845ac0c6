#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod aggregate;
pub mod endpoint;
pub mod rules;
pub mod store;
pub mod webhook;

pub use self::{
    aggregate::{Aggregate, RuleSet},
    endpoint::{validate_all, ConfigError, EndpointConfig, FailurePolicy, SecondaryWebhook},
    rules::RequestAttributes,
    store::{AggregateStore, SharedAggregate},
    webhook::{semantically_equal, PrimaryTarget},
};
pub use webhook_proxy_k8s_api as k8s;
