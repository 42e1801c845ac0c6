use crate::k8s::RuleWithOperations;

const WILDCARD: &str = "*";

/// The parts of an admission request that webhook rules match against.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestAttributes {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub sub_resource: Option<String>,
    pub operation: String,
}

impl RequestAttributes {
    /// Checks whether `rule` selects this request.
    ///
    /// Each field must be listed exactly or by `*`. Resources are split into
    /// `resource/sub`, with no sub-resource when there is no `/`, and `*`
    /// allowed on either side. A bare `*` therefore selects only main
    /// resources, while `*/*` selects everything.
    pub fn matches(&self, rule: &RuleWithOperations) -> bool {
        contains(&rule.api_groups, &self.group)
            && contains(&rule.api_versions, &self.version)
            && contains(&rule.operations, &self.operation)
            && rule
                .resources
                .iter()
                .flatten()
                .any(|r| self.matches_resource(r))
    }

    fn matches_resource(&self, pattern: &str) -> bool {
        let (resource, sub) = pattern.split_once('/').unwrap_or((pattern, ""));
        let want = self.sub_resource.as_deref().unwrap_or("");
        (resource == WILDCARD || resource == self.resource) && (sub == WILDCARD || sub == want)
    }
}

fn contains(values: &Option<Vec<String>>, value: &str) -> bool {
    values
        .iter()
        .flatten()
        .any(|v| v == WILDCARD || v == value)
}
