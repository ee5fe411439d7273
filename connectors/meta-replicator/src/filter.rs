//! Group eligibility filter.
//!
//! A group is replicated only if it is not one of the brokers' built-in groups,
//! does not carry a reserved system prefix, and fully matches at least one
//! operator-supplied whitelist pattern.

use regex::Regex;
use replicator_connect_core::{ConnectorError, ConnectorResult};
use std::collections::HashSet;

/// Consumer groups created by the brokers and their tooling
const INNER_CONSUMER_GROUPS: &[&str] = &[
    "TOOLS_CONSUMER",
    "FILTERSRV_CONSUMER",
    "__MONITOR_CONSUMER",
    "CLIENT_INNER_PRODUCER",
    "SELF_TEST_P_GROUP",
    "SELF_TEST_C_GROUP",
    "CID_ONSAPI_PERMISSION",
    "CID_ONS-HTTP-PROXY",
    "CID_ONSAPI_OWNER",
    "CID_ONSAPI_PULL",
];

/// Prefixes of groups owned by the brokers or by the connect runtime itself
const SYSTEM_GROUP_PREFIXES: &[&str] = &[
    "CID_RMQ_SYS_",
    "PositionManage",
    "ConfigManage",
    "OffsetManage",
    "DefaultConnectCluster",
    "RebalanceService",
];

/// Groups that are never replicated regardless of the whitelist
#[derive(Debug, Clone)]
pub struct GroupDenyList {
    inner_groups: HashSet<String>,
    system_prefixes: Vec<String>,
}

impl GroupDenyList {
    /// The built-in deny list
    pub fn builtin() -> Self {
        Self::new(
            INNER_CONSUMER_GROUPS.iter().copied(),
            SYSTEM_GROUP_PREFIXES.iter().copied(),
        )
    }

    pub fn new<G, P>(inner_groups: G, system_prefixes: P) -> Self
    where
        G: IntoIterator,
        G::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            inner_groups: inner_groups.into_iter().map(Into::into).collect(),
            system_prefixes: system_prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_denied(&self, group: &str) -> bool {
        self.inner_groups.contains(group)
            || self
                .system_prefixes
                .iter()
                .any(|prefix| group.starts_with(prefix.as_str()))
    }
}

/// Compiled whitelist plus deny list, built once at startup
#[derive(Debug, Clone)]
pub struct WhitelistFilter {
    deny: GroupDenyList,
    patterns: Vec<Regex>,
}

impl WhitelistFilter {
    /// Compile `patterns` against the built-in deny list
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> ConnectorResult<Self> {
        Self::with_deny_list(GroupDenyList::builtin(), patterns)
    }

    pub fn with_deny_list<S: AsRef<str>>(
        deny: GroupDenyList,
        patterns: &[S],
    ) -> ConnectorResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref();
                // Anchored so that a pattern must match the whole group id
                Regex::new(&format!("^(?:{})$", p)).map_err(|e| {
                    ConnectorError::config(format!("Invalid whitelist pattern '{}': {}", p, e))
                })
            })
            .collect::<ConnectorResult<Vec<_>>>()?;

        Ok(Self { deny, patterns })
    }

    /// Whether `group` should be replicated
    pub fn eligible(&self, group: &str) -> bool {
        !self.deny.is_denied(group) && self.patterns.iter().any(|p| p.is_match(group))
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_groups_denied_even_if_whitelisted() {
        let filter = WhitelistFilter::new(&[".*"]).unwrap();

        assert!(!filter.eligible("CID_ONSAPI_OWNER"));
        assert!(!filter.eligible("TOOLS_CONSUMER"));
        assert!(!filter.eligible("__MONITOR_CONSUMER"));
        assert!(!filter.eligible("CID_RMQ_SYS_TRANS"));
        assert!(!filter.eligible("PositionManage-node-1"));
        assert!(!filter.eligible("RebalanceService"));
        assert!(filter.eligible("order-service-consumer"));
    }

    #[test]
    fn test_full_match_semantics() {
        let filter = WhitelistFilter::new(&["order-.*"]).unwrap();

        assert!(filter.eligible("order-service-consumer"));
        assert!(!filter.eligible("legacy-order-service"));
        assert!(!filter.eligible("random-debug-group"));

        let filter = WhitelistFilter::new(&["billing"]).unwrap();
        assert!(filter.eligible("billing"));
        assert!(!filter.eligible("billing-v2"));
    }

    #[test]
    fn test_patterns_are_or_combined() {
        let filter = WhitelistFilter::new(&["order-.*", "payment-[0-9]+"]).unwrap();

        assert!(filter.eligible("order-a"));
        assert!(filter.eligible("payment-42"));
        assert!(!filter.eligible("payment-x"));
        assert_eq!(filter.pattern_count(), 2);
    }

    #[test]
    fn test_alternation_is_anchored_as_a_whole() {
        let filter = WhitelistFilter::new(&["a|b"]).unwrap();
        assert!(filter.eligible("a"));
        assert!(filter.eligible("b"));
        assert!(!filter.eligible("ab"));
        assert!(!filter.eligible("xa"));
    }

    #[test]
    fn test_empty_whitelist_matches_nothing() {
        let filter = WhitelistFilter::new::<&str>(&[]).unwrap();
        assert!(!filter.eligible("order-service-consumer"));
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let err = WhitelistFilter::new(&["order-(unclosed"]).unwrap_err();
        assert!(matches!(err, ConnectorError::Configuration(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_custom_deny_list() {
        let deny = GroupDenyList::new(["blocked"], ["tmp-"]);
        let filter = WhitelistFilter::with_deny_list(deny, &[".*"]).unwrap();

        assert!(!filter.eligible("blocked"));
        assert!(!filter.eligible("tmp-123"));
        assert!(filter.eligible("CID_ONSAPI_OWNER"));
    }
}
