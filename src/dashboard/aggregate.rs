//! Pure reductions from raw samples (or parsed requests) to dashboard counts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{
    Decision, MetricSample, NamespaceCounts, PolicyType, PolicyVerdict, RequestLogEntry,
};

pub const UNKNOWN_NAMESPACE: &str = "unknown";
pub const AUTH_FAILED_STATUS: &str = "401";
pub const OVER_LIMIT_RESULT: &str = "over_limit";

/// Raw sample sets as returned by the three dashboard queries.
#[derive(Clone, Debug, Default)]
pub struct MetricSets {
    pub total: Vec<MetricSample>,
    pub auth: Vec<MetricSample>,
    pub rate_limit: Vec<MetricSample>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedCounts {
    pub total: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub auth_failed: u64,
    pub rate_limited: u64,
    pub by_namespace: BTreeMap<String, NamespaceCounts>,
}

pub fn sum(samples: &[MetricSample]) -> f64 {
    samples.iter().map(|sample| finite_or_zero(sample.value)).sum()
}

pub fn sum_where(samples: &[MetricSample], label: &str, expected: &str) -> f64 {
    samples
        .iter()
        .filter(|sample| sample.label(label) == Some(expected))
        .map(|sample| finite_or_zero(sample.value))
        .sum()
}

pub fn group_by_namespace<'a>(
    samples: impl IntoIterator<Item = &'a MetricSample>,
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::<String, f64>::new();
    for sample in samples {
        let namespace = sample
            .label("namespace")
            .filter(|namespace| !namespace.is_empty())
            .unwrap_or(UNKNOWN_NAMESPACE);
        *out.entry(namespace.to_string()).or_default() += finite_or_zero(sample.value);
    }
    out
}

/// `success = total - authFailed - rateLimited`, with the subtractands clamped so that no
/// component goes negative.
pub fn aggregate(sets: &MetricSets) -> AggregatedCounts {
    let (total, auth_failed, rate_limited, success) = split_counts(
        sum(&sets.total),
        sum_where(&sets.auth, "status_code", AUTH_FAILED_STATUS),
        sum_where(&sets.rate_limit, "result", OVER_LIMIT_RESULT),
    );

    let totals = group_by_namespace(&sets.total);
    let auth = group_by_namespace(
        sets.auth
            .iter()
            .filter(|sample| sample.label("status_code") == Some(AUTH_FAILED_STATUS)),
    );
    let limited = group_by_namespace(
        sets.rate_limit
            .iter()
            .filter(|sample| sample.label("result") == Some(OVER_LIMIT_RESULT)),
    );

    let mut by_namespace = BTreeMap::new();
    let namespaces = totals.keys().chain(auth.keys()).chain(limited.keys());
    for namespace in namespaces {
        if by_namespace.contains_key(namespace) {
            continue;
        }
        let (ns_total, ns_auth, ns_limited, ns_success) = split_counts(
            totals.get(namespace).copied().unwrap_or(0.0),
            auth.get(namespace).copied().unwrap_or(0.0),
            limited.get(namespace).copied().unwrap_or(0.0),
        );
        by_namespace.insert(
            namespace.clone(),
            NamespaceCounts {
                total: ns_total,
                success: ns_success,
                auth_failed: ns_auth,
                rate_limited: ns_limited,
            },
        );
    }

    AggregatedCounts {
        total,
        accepted: success,
        rejected: auth_failed + rate_limited,
        auth_failed,
        rate_limited,
        by_namespace,
    }
}

/// Counts derived from parsed requests, used when the metrics path reports no traffic.
///
/// A rejected request is attributed by status first (401/403 auth, 429 rate limit), then by
/// its `policyType`, then by its first `deny` policy decision.
pub fn aggregate_requests(requests: &[RequestLogEntry]) -> AggregatedCounts {
    let mut counts = AggregatedCounts::default();
    for request in requests {
        let namespace = request
            .namespace
            .clone()
            .filter(|namespace| !namespace.is_empty())
            .unwrap_or_else(|| UNKNOWN_NAMESPACE.to_string());
        let ns = counts.by_namespace.entry(namespace).or_default();
        counts.total += 1;
        ns.total += 1;

        if request.decision == Decision::Accept {
            counts.accepted += 1;
            ns.success += 1;
            continue;
        }

        counts.rejected += 1;
        match rejection_kind(request) {
            Some(PolicyType::AuthPolicy) => {
                counts.auth_failed += 1;
                ns.auth_failed += 1;
            }
            Some(PolicyType::RateLimitPolicy) => {
                counts.rate_limited += 1;
                ns.rate_limited += 1;
            }
            _ => {}
        }
    }
    counts
}

pub fn rejection_kind(request: &RequestLogEntry) -> Option<PolicyType> {
    match request.status_code {
        401 | 403 => return Some(PolicyType::AuthPolicy),
        429 => return Some(PolicyType::RateLimitPolicy),
        _ => {}
    }
    if request.policy_type.is_some() {
        return request.policy_type;
    }
    request
        .policy_decisions
        .iter()
        .find(|decision| decision.decision == PolicyVerdict::Deny)
        .map(|decision| decision.policy_type)
}

fn split_counts(total: f64, auth_failed: f64, rate_limited: f64) -> (u64, u64, u64, u64) {
    let total = to_count(total);
    let auth_failed = to_count(auth_failed).min(total);
    let rate_limited = to_count(rate_limited).min(total - auth_failed);
    let success = total - auth_failed - rate_limited;
    (total, auth_failed, rate_limited, success)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn to_count(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    value.round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::types::{EnforcementPoint, PolicyDecisionDetails};

    fn sample(value: f64, labels: &[(&str, &str)]) -> MetricSample {
        labels
            .iter()
            .fold(MetricSample::new(value), |sample, (name, label)| {
                sample.with_label(*name, *label)
            })
    }

    #[test]
    fn success_is_total_minus_rejections() {
        let sets = MetricSets {
            total: vec![
                sample(80.0, &[("namespace", "llm")]),
                sample(20.0, &[("namespace", "tenant-b")]),
            ],
            auth: vec![
                sample(7.0, &[("namespace", "llm"), ("status_code", "401")]),
                sample(5.0, &[("namespace", "llm"), ("status_code", "403")]),
            ],
            rate_limit: vec![
                sample(3.0, &[("namespace", "tenant-b"), ("result", "over_limit")]),
                sample(40.0, &[("namespace", "tenant-b"), ("result", "under_limit")]),
            ],
        };
        let counts = aggregate(&sets);
        assert_eq!(counts.total, 100);
        assert_eq!(counts.auth_failed, 7);
        assert_eq!(counts.rate_limited, 3);
        assert_eq!(counts.accepted, 90);
        assert_eq!(counts.accepted, counts.total - counts.auth_failed - counts.rate_limited);
        assert_eq!(counts.total, counts.accepted + counts.rejected);

        assert_eq!(counts.by_namespace["llm"].auth_failed, 7);
        assert_eq!(counts.by_namespace["llm"].success, 73);
        assert_eq!(counts.by_namespace["tenant-b"].rate_limited, 3);
        assert_eq!(counts.by_namespace["tenant-b"].success, 17);
    }

    #[test]
    fn unset_namespace_groups_as_unknown() {
        let grouped = group_by_namespace(&[
            sample(1.0, &[]),
            sample(2.0, &[("namespace", "")]),
            sample(4.0, &[("namespace", "llm")]),
        ]);
        assert_eq!(grouped["unknown"], 3.0);
        assert_eq!(grouped["llm"], 4.0);
    }

    #[test]
    fn rejections_are_clamped_to_total() {
        let sets = MetricSets {
            total: vec![sample(10.0, &[])],
            auth: vec![sample(8.0, &[("status_code", "401")])],
            rate_limit: vec![sample(6.0, &[("result", "over_limit")])],
        };
        let counts = aggregate(&sets);
        assert_eq!(counts.total, 10);
        assert_eq!(counts.auth_failed, 8);
        assert_eq!(counts.rate_limited, 2);
        assert_eq!(counts.accepted, 0);
        assert_eq!(counts.total, counts.accepted + counts.rejected);
    }

    #[test]
    fn non_finite_and_negative_values_count_as_zero() {
        let sets = MetricSets {
            total: vec![sample(f64::NAN, &[]), sample(-4.0, &[]), sample(2.4, &[])],
            auth: vec![sample(f64::INFINITY, &[("status_code", "401")])],
            rate_limit: Vec::new(),
        };
        let counts = aggregate(&sets);
        assert_eq!(counts.total, 0);
        assert_eq!(counts.auth_failed, 0);
        assert_eq!(counts.accepted, 0);
    }

    #[test]
    fn empty_sets_aggregate_to_zero() {
        assert_eq!(aggregate(&MetricSets::default()), AggregatedCounts::default());
    }

    #[test]
    fn request_counts_attribute_rejections() {
        let ok = RequestLogEntry::new("a", "t", 200);
        let unauthorized = RequestLogEntry::new("b", "t", 401);
        let limited = RequestLogEntry::new("c", "t", 429);
        let mut denied_by_policy = RequestLogEntry::new("d", "t", 400);
        denied_by_policy.policy_decisions.push(PolicyDecisionDetails {
            policy_id: "llm/token-limits".to_string(),
            policy_name: "token-limits".to_string(),
            policy_type: PolicyType::RateLimitPolicy,
            decision: PolicyVerdict::Deny,
            enforcement_point: EnforcementPoint::Limitador,
            reason: "token budget exhausted".to_string(),
            processing_time: None,
        });
        let mut server_error = RequestLogEntry::new("e", "t", 503);
        server_error.namespace = Some("llm".to_string());

        let counts =
            aggregate_requests(&[ok, unauthorized, limited, denied_by_policy, server_error]);
        assert_eq!(counts.total, 5);
        assert_eq!(counts.accepted, 1);
        assert_eq!(counts.rejected, 4);
        assert_eq!(counts.auth_failed, 1);
        assert_eq!(counts.rate_limited, 2);
        assert_eq!(counts.total, counts.accepted + counts.rejected);
        assert_eq!(counts.by_namespace["llm"].total, 1);
        assert_eq!(counts.by_namespace["unknown"].total, 4);
    }

    #[test]
    fn policy_type_wins_over_decision_list_for_non_policy_status() {
        let mut request = RequestLogEntry::new("x", "t", 400);
        request.policy_type = Some(PolicyType::AuthPolicy);
        request.policy_decisions.push(PolicyDecisionDetails {
            policy_id: "p".to_string(),
            policy_name: "p".to_string(),
            policy_type: PolicyType::RateLimitPolicy,
            decision: PolicyVerdict::Deny,
            enforcement_point: EnforcementPoint::Limitador,
            reason: String::new(),
            processing_time: None,
        });
        assert_eq!(rejection_kind(&request), Some(PolicyType::AuthPolicy));
    }
}
