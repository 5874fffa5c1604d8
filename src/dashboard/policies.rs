//! Kuadrant policy browser: reads AuthPolicy / RateLimitPolicy / TokenRateLimitPolicy
//! custom resources and normalizes them for display.

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use super::kube::{Cluster, ResourceRef};
use super::types::{KuadrantPolicy, PolicyCondition, PolicyItem, PolicyKind, TargetRef};

const AUTH_RULE_SECTIONS: &[&str] = &[
    "authentication",
    "metadata",
    "authorization",
    "response",
    "callbacks",
];
const AUTH_RULE_RESERVED_KEYS: &[&str] = &["when", "priority", "metrics", "cache", "credentials"];

impl PolicyKind {
    pub const ALL: [PolicyKind; 3] = [
        PolicyKind::AuthPolicy,
        PolicyKind::RateLimitPolicy,
        PolicyKind::TokenRateLimitPolicy,
    ];

    pub fn resource(self) -> ResourceRef {
        match self {
            Self::AuthPolicy => ResourceRef {
                group: "kuadrant.io",
                version: "v1",
                plural: "authpolicies",
            },
            Self::RateLimitPolicy => ResourceRef {
                group: "kuadrant.io",
                version: "v1beta2",
                plural: "ratelimitpolicies",
            },
            Self::TokenRateLimitPolicy => ResourceRef {
                group: "kuadrant.io",
                version: "v1beta1",
                plural: "tokenratelimitpolicies",
            },
        }
    }

    pub fn plural(self) -> &'static str {
        self.resource().plural
    }

    pub fn from_plural(plural: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.plural().eq_ignore_ascii_case(plural))
    }
}

/// Lists one policy kind: namespace scope first, then cluster scope. When both fail the
/// error is logged and the list is empty.
pub async fn list_policies(
    cluster: &dyn Cluster,
    kind: PolicyKind,
    namespace: &str,
) -> Vec<KuadrantPolicy> {
    let resource = kind.resource();
    let objects = match cluster.list_custom_objects(&resource, Some(namespace)).await {
        Ok(objects) => objects,
        Err(err) => {
            warn!(
                kind = resource.plural,
                namespace,
                error = %err,
                "namespaced policy list failed, retrying at cluster scope"
            );
            match cluster.list_custom_objects(&resource, None).await {
                Ok(objects) => objects,
                Err(err) => {
                    error!(kind = resource.plural, error = %err, "policy list failed");
                    return Vec::new();
                }
            }
        }
    };
    debug!(kind = resource.plural, count = objects.len(), "listed policies");
    objects
        .iter()
        .filter_map(|object| normalize_policy(kind, object))
        .collect()
}

/// Every supported kind, fetched concurrently.
pub async fn list_all_policies(cluster: &dyn Cluster, namespace: &str) -> Vec<KuadrantPolicy> {
    let (auth, rate_limit, token_rate_limit) = tokio::join!(
        list_policies(cluster, PolicyKind::AuthPolicy, namespace),
        list_policies(cluster, PolicyKind::RateLimitPolicy, namespace),
        list_policies(cluster, PolicyKind::TokenRateLimitPolicy, namespace),
    );
    auth.into_iter()
        .chain(rate_limit)
        .chain(token_rate_limit)
        .collect()
}

/// `None` for objects without `metadata.name`.
pub fn normalize_policy(kind: PolicyKind, object: &Value) -> Option<KuadrantPolicy> {
    let metadata = object.get("metadata")?;
    let name = metadata.get("name")?.as_str()?.to_string();
    let namespace = metadata
        .get("namespace")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let spec = object.get("spec").cloned().unwrap_or(Value::Null);
    let conditions: Vec<PolicyCondition> = object
        .pointer("/status/conditions")
        .and_then(|conditions| serde_json::from_value(conditions.clone()).ok())
        .unwrap_or_default();
    let target_ref = spec
        .get("targetRef")
        .and_then(|target| serde_json::from_value::<TargetRef>(target.clone()).ok());

    Some(KuadrantPolicy {
        id: format!("{namespace}/{name}"),
        is_active: is_active(&conditions),
        items: policy_items(kind, &spec),
        created_at: metadata
            .get("creationTimestamp")
            .and_then(Value::as_str)
            .map(str::to_string),
        name,
        namespace,
        kind,
        target_ref,
        spec,
        conditions,
    })
}

/// `Enforced=True`; without an `Enforced` condition, `Accepted=True`.
pub fn is_active(conditions: &[PolicyCondition]) -> bool {
    let status_of = |kind: &str| {
        conditions
            .iter()
            .find(|condition| condition.kind == kind)
            .map(|condition| condition.status.eq_ignore_ascii_case("true"))
    };
    match status_of("Enforced") {
        Some(enforced) => enforced,
        None => status_of("Accepted").unwrap_or(false),
    }
}

pub fn policy_items(kind: PolicyKind, spec: &Value) -> Vec<PolicyItem> {
    let scopes = [
        ("", Some(spec)),
        ("defaults/", spec.get("defaults")),
        ("overrides/", spec.get("overrides")),
    ];
    let mut items = Vec::new();
    for (prefix, scope) in scopes {
        let Some(scope) = scope else {
            continue;
        };
        match kind {
            PolicyKind::AuthPolicy => auth_rule_items(prefix, scope, &mut items),
            PolicyKind::RateLimitPolicy => limit_items(prefix, "rate-limit", scope, &mut items),
            PolicyKind::TokenRateLimitPolicy => {
                limit_items(prefix, "token-rate-limit", scope, &mut items)
            }
        }
    }
    items
}

fn auth_rule_items(prefix: &str, scope: &Value, items: &mut Vec<PolicyItem>) {
    let Some(rules) = scope.get("rules").and_then(Value::as_object) else {
        return;
    };
    for section in AUTH_RULE_SECTIONS {
        let Some(entries) = rules.get(*section).and_then(Value::as_object) else {
            continue;
        };
        for (name, config) in entries {
            let method = auth_method(config);
            let description = match method {
                Some(method) => format!("{section} via {method}"),
                None => (*section).to_string(),
            };
            items.push(PolicyItem {
                id: format!("{prefix}{section}/{name}"),
                name: name.clone(),
                category: (*section).to_string(),
                description,
                config: config.clone(),
            });
        }
    }
}

fn auth_method(config: &Value) -> Option<&str> {
    config
        .as_object()?
        .keys()
        .map(String::as_str)
        .find(|key| !AUTH_RULE_RESERVED_KEYS.contains(key))
}

fn limit_items(prefix: &str, category: &str, scope: &Value, items: &mut Vec<PolicyItem>) {
    let Some(limits) = scope.get("limits").and_then(Value::as_object) else {
        return;
    };
    for (name, config) in limits {
        let rates = config
            .get("rates")
            .and_then(Value::as_array)
            .map(|rates| {
                rates
                    .iter()
                    .filter_map(Value::as_object)
                    .map(describe_rate)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let description = if rates.is_empty() {
            category.to_string()
        } else {
            rates.join(", ")
        };
        items.push(PolicyItem {
            id: format!("{prefix}limits/{name}"),
            name: name.clone(),
            category: category.to_string(),
            description,
            config: config.clone(),
        });
    }
}

/// `{limit: 5, window: "10s"}` → `5 per 10s`; the older `duration` + `unit` form is
/// also understood.
fn describe_rate(rate: &Map<String, Value>) -> String {
    let limit = match rate.get("limit") {
        Some(Value::Number(limit)) => limit.to_string(),
        Some(Value::String(limit)) => limit.clone(),
        _ => "?".to_string(),
    };
    let window = match (rate.get("window"), rate.get("duration"), rate.get("unit")) {
        (Some(Value::String(window)), _, _) => window.clone(),
        (_, Some(duration), Some(Value::String(unit))) => {
            let unit = unit.chars().next().map(String::from).unwrap_or_default();
            format!("{duration}{unit}")
        }
        _ => "?".to_string(),
    };
    format!("{limit} per {window}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn condition(kind: &str, status: &str) -> PolicyCondition {
        PolicyCondition {
            kind: kind.to_string(),
            status: status.to_string(),
            ..PolicyCondition::default()
        }
    }

    #[test]
    fn enforced_wins_over_accepted() {
        assert!(is_active(&[condition("Accepted", "True"), condition("Enforced", "True")]));
        assert!(!is_active(&[condition("Accepted", "True"), condition("Enforced", "False")]));
        assert!(is_active(&[condition("Accepted", "True")]));
        assert!(!is_active(&[condition("Accepted", "False")]));
        assert!(!is_active(&[]));
    }

    #[test]
    fn plural_lookup_is_closed() {
        assert_eq!(
            PolicyKind::from_plural("authpolicies"),
            Some(PolicyKind::AuthPolicy)
        );
        assert_eq!(
            PolicyKind::from_plural("tokenratelimitpolicies"),
            Some(PolicyKind::TokenRateLimitPolicy)
        );
        assert_eq!(PolicyKind::from_plural("gateways"), None);
        assert_eq!(PolicyKind::RateLimitPolicy.resource().version, "v1beta2");
    }

    #[test]
    fn auth_policy_rules_flatten_into_items() {
        let object = json!({
            "metadata": {"name": "gateway-auth", "namespace": "llm", "creationTimestamp": "2024-05-01T00:00:00Z"},
            "spec": {
                "targetRef": {"group": "gateway.networking.k8s.io", "kind": "Gateway", "name": "maas-default-gateway"},
                "rules": {
                    "authentication": {"api-keys": {"apiKey": {"selector": {}}, "credentials": {"authorizationHeader": {"prefix": "APIKEY"}}}},
                    "authorization": {"tier-check": {"opa": {"rego": "allow = true"}}}
                },
                "defaults": {"rules": {"response": {"identity": {"json": {}}}}}
            },
            "status": {"conditions": [{"type": "Accepted", "status": "True"}, {"type": "Enforced", "status": "True", "reason": "Enforced"}]}
        });
        let policy = normalize_policy(PolicyKind::AuthPolicy, &object).expect("normalize");
        assert_eq!(policy.id, "llm/gateway-auth");
        assert!(policy.is_active);
        assert_eq!(policy.created_at.as_deref(), Some("2024-05-01T00:00:00Z"));
        assert_eq!(
            policy.target_ref.as_ref().map(|target| target.kind.as_str()),
            Some("Gateway")
        );
        let ids: Vec<&str> = policy.items.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "authentication/api-keys",
                "authorization/tier-check",
                "defaults/response/identity"
            ]
        );
        assert_eq!(policy.items[0].description, "authentication via apiKey");
        assert_eq!(policy.items[1].description, "authorization via opa");
    }

    #[test]
    fn rate_limits_flatten_with_rates() {
        let spec = json!({
            "limits": {
                "free": {"rates": [{"limit": 5, "window": "10s"}, {"limit": 100, "window": "1h"}], "counters": [{"expression": "auth.identity.userid"}]},
                "legacy": {"rates": [{"limit": 2, "duration": 1, "unit": "minute"}]}
            }
        });
        let items = policy_items(PolicyKind::RateLimitPolicy, &spec);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "limits/free");
        assert_eq!(items[0].description, "5 per 10s, 100 per 1h");
        assert_eq!(items[1].description, "2 per 1m");
        assert_eq!(items[0].config["counters"][0]["expression"], "auth.identity.userid");
    }

    #[test]
    fn objects_without_name_are_skipped() {
        assert!(normalize_policy(PolicyKind::AuthPolicy, &json!({"spec": {}})).is_none());
    }
}
