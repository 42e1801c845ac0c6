use super::*;
use crate::{
    endpoint::FailurePolicy,
    k8s::{Operation, ProxyValidatingTypeSpec, TypeRule},
};
use pretty_assertions::assert_eq;
use std::num::NonZeroU16;

fn target() -> PrimaryTarget {
    PrimaryTarget {
        configuration_name: "webhook-proxy".to_string(),
        webhook_name: "proxy.webhookproxy.io".to_string(),
        service_name: "webhook-proxy".to_string(),
        service_namespace: "webhook-proxy".to_string(),
        service_port: NonZeroU16::new(443).unwrap(),
        path: "/proxy".to_string(),
        ca_bundle: Vec::new(),
        failure_policy: FailurePolicy::Fail,
    }
}

fn type_rule(group: &str, resource: &str, op: Operation) -> TypeRule {
    TypeRule {
        api_groups: vec![group.to_string()],
        api_versions: vec!["v1".to_string()],
        resources: vec![resource.to_string()],
        operations: vec![op],
        scope: None,
    }
}

fn resource(name: &str, uid: &str, types: Vec<TypeRule>) -> ProxyValidatingType {
    let mut pvt = ProxyValidatingType::new(name, ProxyValidatingTypeSpec { types });
    pvt.metadata.uid = Some(uid.to_string());
    pvt
}

fn deployments() -> RuleSet {
    RuleSet::from_resource(&resource(
        "deployments",
        "uid-a",
        vec![type_rule("apps", "deployments", Operation::Create)],
    ))
}

fn pods() -> RuleSet {
    RuleSet::from_resource(&resource(
        "pods",
        "uid-b",
        vec![
            type_rule("", "pods", Operation::Create),
            type_rule("", "pods", Operation::Update),
        ],
    ))
}

#[test]
fn union_is_order_independent() {
    let ab = Aggregate::default().add(deployments()).add(pods());
    let ba = Aggregate::default().add(pods()).add(deployments());
    assert_eq!(ab, ba);
    assert_eq!(
        ab.generate_global_webhook(&target()),
        ba.generate_global_webhook(&target())
    );
}

#[test]
fn add_is_idempotent() {
    let once = Aggregate::default().add(deployments());
    let twice = once.add(deployments());
    assert_eq!(once, twice);
    assert_eq!(twice.len(), 1);
}

#[test]
fn add_replaces_by_id() {
    let agg = Aggregate::default().add(deployments());
    let updated = RuleSet::from_resource(&resource(
        "deployments",
        "uid-a",
        vec![type_rule("apps", "deployments", Operation::Delete)],
    ));
    let agg = agg.add(updated.clone());
    assert_eq!(agg.len(), 1);
    assert_eq!(agg.get("uid-a"), Some(&updated));
}

#[test]
fn add_does_not_mutate_the_original() {
    let empty = Aggregate::default();
    let agg = empty.add(deployments());
    assert!(empty.is_empty());
    assert_eq!(agg.len(), 1);
    let removed = agg.remove("uid-a");
    assert!(removed.is_empty());
    assert_eq!(agg.len(), 1);
}

#[test]
fn rules_are_deduplicated_within_a_declarant() {
    let rule = type_rule("apps", "deployments", Operation::Create);
    let rs = RuleSet::from_resource(&resource("dup", "uid-d", vec![rule.clone(), rule]));
    assert_eq!(rs.rules().len(), 1);
}

#[test]
fn rules_follow_id_order() {
    let agg = Aggregate::default().add(pods()).add(deployments());
    let resources = agg
        .rules()
        .into_iter()
        .flat_map(|r| r.resources.unwrap_or_default())
        .collect::<Vec<_>>();
    assert_eq!(resources, vec!["deployments", "pods", "pods"]);
}

#[test]
fn finds_rule_sets_by_declarant_name() {
    let agg = Aggregate::default().add(deployments()).add(pods());
    assert_eq!(agg.by_declarant("pods").map(RuleSet::id), Some("uid-b"));
    assert!(agg.by_declarant("services").is_none());
}

#[test]
fn skips_resources_being_deleted() {
    let live = resource(
        "deployments",
        "uid-a",
        vec![type_rule("apps", "deployments", Operation::Create)],
    );
    let deleting: ProxyValidatingType = serde_json::from_value(serde_json::json!({
        "apiVersion": "webhookproxy.io/v1alpha1",
        "kind": "ProxyValidatingType",
        "metadata": {
            "name": "pods",
            "uid": "uid-b",
            "deletionTimestamp": "2024-01-01T00:00:00Z",
        },
        "spec": { "types": [] },
    }))
    .unwrap();

    let agg = Aggregate::from_resources([&live, &deleting]);
    assert_eq!(agg.len(), 1);
    assert!(agg.get("uid-a").is_some());
}

#[test]
fn generates_one_rule_per_declared_triple() {
    let agg = Aggregate::default().add(deployments());
    let config = agg.generate_global_webhook(&target());
    let webhooks = config.webhooks.unwrap();
    assert_eq!(webhooks.len(), 1);

    let rules = webhooks[0].rules.clone().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].api_groups, Some(vec!["apps".to_string()]));
    assert_eq!(rules[0].api_versions, Some(vec!["v1".to_string()]));
    assert_eq!(rules[0].resources, Some(vec!["deployments".to_string()]));
    assert_eq!(rules[0].operations, Some(vec!["CREATE".to_string()]));
}

#[test]
fn generation_is_deterministic() {
    let agg = Aggregate::default().add(pods()).add(deployments());
    let first = serde_json::to_vec(&agg.generate_global_webhook(&target())).unwrap();
    let second = serde_json::to_vec(&agg.clone().generate_global_webhook(&target())).unwrap();
    assert_eq!(first, second);
}
