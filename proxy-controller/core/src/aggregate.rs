use crate::{
    k8s::{ProxyValidatingType, ResourceExt, RuleWithOperations, ValidatingWebhookConfiguration},
    rules::RequestAttributes,
    webhook::PrimaryTarget,
};
use std::collections::BTreeMap;

#[cfg(test)]
mod tests;

/// The rules declared by a single `ProxyValidatingType`.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleSet {
    id: String,
    name: String,
    rules: Vec<RuleWithOperations>,
}

/// The union of every active declarant's rules.
///
/// An `Aggregate` is never mutated once built: `add` and `remove` return a
/// new value so that a published snapshot can be shared with readers freely.
/// Entries are keyed by declarant id, which fixes the order in which rules
/// are emitted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Aggregate {
    by_id: BTreeMap<String, RuleSet>,
}

// === impl RuleSet ===

impl RuleSet {
    /// Builds a rule set, dropping repeated rules while keeping the first
    /// occurrence of each.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        rules: impl IntoIterator<Item = RuleWithOperations>,
    ) -> Self {
        let mut deduped = Vec::new();
        for rule in rules {
            if !deduped.contains(&rule) {
                deduped.push(rule);
            }
        }
        Self {
            id: id.into(),
            name: name.into(),
            rules: deduped,
        }
    }

    /// Builds the rule set declared by `resource`, keyed by its UID.
    ///
    /// Objects that have not been persisted yet have no UID; their name is
    /// used instead.
    pub fn from_resource(resource: &ProxyValidatingType) -> Self {
        let name = resource.name_any();
        let id = resource.uid().unwrap_or_else(|| name.clone());
        Self::new(id, name, resource.rules())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[RuleWithOperations] {
        &self.rules
    }

    pub fn matches(&self, attrs: &RequestAttributes) -> bool {
        self.rules.iter().any(|rule| attrs.matches(rule))
    }
}

// === impl Aggregate ===

impl Aggregate {
    /// Builds an aggregate from every resource that is not being deleted.
    pub fn from_resources<'r>(resources: impl IntoIterator<Item = &'r ProxyValidatingType>) -> Self {
        resources
            .into_iter()
            .filter(|r| r.metadata.deletion_timestamp.is_none())
            .fold(Self::default(), |agg, r| agg.add(RuleSet::from_resource(r)))
    }

    /// Returns a new aggregate in which `rule_set` replaces any entry with the
    /// same id.
    pub fn add(&self, rule_set: RuleSet) -> Self {
        let mut by_id = self.by_id.clone();
        by_id.insert(rule_set.id.clone(), rule_set);
        Self { by_id }
    }

    /// Returns a new aggregate without the entry for `id`.
    pub fn remove(&self, id: &str) -> Self {
        let mut by_id = self.by_id.clone();
        by_id.remove(id);
        Self { by_id }
    }

    pub fn get(&self, id: &str) -> Option<&RuleSet> {
        self.by_id.get(id)
    }

    /// Finds the rule set declared by the resource named `name`.
    pub fn by_declarant(&self, name: &str) -> Option<&RuleSet> {
        self.by_id.values().find(|rs| rs.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleSet> {
        self.by_id.values()
    }

    /// All rules, in id order and then in each declarant's own order.
    pub fn rules(&self) -> Vec<RuleWithOperations> {
        self.by_id
            .values()
            .flat_map(|rs| rs.rules.iter().cloned())
            .collect()
    }

    /// Generates the cluster-wide webhook configuration that routes every
    /// aggregated rule to the proxy.
    pub fn generate_global_webhook(&self, target: &PrimaryTarget) -> ValidatingWebhookConfiguration {
        target.webhook_configuration(self.rules())
    }
}
