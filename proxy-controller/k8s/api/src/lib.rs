#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod proxy_validating_type;

pub use self::proxy_validating_type::{
    Operation, ProxyValidatingType, ProxyValidatingTypeSpec, ProxyValidatingTypeStatus, TypeRule,
};
pub use k8s_openapi::{
    api::admissionregistration::v1::{
        RuleWithOperations, ServiceReference, ValidatingWebhook, ValidatingWebhookConfiguration,
        WebhookClientConfig,
    },
    apimachinery::pkg::apis::meta::v1::LabelSelector,
    ByteString,
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    Client, Error, Resource,
};

/// The API group shared by every resource this controller owns.
pub const API_GROUP: &str = "webhookproxy.io";
