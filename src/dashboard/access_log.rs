//! Gateway access-log parsing: Envoy-style JSON lines and common log format lines.
//!
//! Parsing never fails. Lines that are neither valid JSON nor common log format are
//! dropped.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::types::{
    AuthenticationDetails, Decision, EnforcementPoint, ModelInferenceDetails,
    PolicyDecisionDetails, PolicyType, PolicyVerdict, RequestLogEntry,
};
use crate::utils::clock::{format_rfc3339, from_epoch_number, parse_timestamp};

const TIMESTAMP_KEYS: &[&str] = &["timestamp", "time", "start_time", "@timestamp"];
const REQUEST_ID_KEYS: &[&str] = &["request_id", "requestId", "x_request_id"];
const STATUS_KEYS: &[&str] = &["status_code", "status", "response_code"];
const RESPONSE_TIME_KEYS: &[&str] = &["response_time", "duration"];
const SOURCE_IP_KEYS: &[&str] = &["source_ip", "remote_addr", "downstream_remote_address"];
const PATH_KEYS: &[&str] = &["path", "uri"];
const MODEL_KEYS: &[&str] = &["model", "x_model", "model_name"];
const TIER_KEYS: &[&str] = &["tier", "x_tier", "user_tier", "x_kuadrant_tier"];
const POLICY_NAME_KEYS: &[&str] = &["policy", "policy_name", "x_kuadrant_policy"];

fn common_log_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"^(\S+) \S+ \S+ \[([^\]]+)\] "([A-Z]+) (\S+)(?: [^"]*)?" (\d{3}) (\d+|-)"#)
            .expect("common log regex is valid")
    })
}

/// Parses every non-blank line of `text`. Entries keep their order of appearance.
pub fn parse_access_logs(text: &str) -> Vec<RequestLogEntry> {
    parse_lines(text, None)
}

/// Like [`parse_access_logs`], with `source` (a pod name) folded into generated ids so
/// that lines from different replicas logged in the same second stay distinct.
pub fn parse_source_logs(text: &str, source: &str) -> Vec<RequestLogEntry> {
    parse_lines(text, Some(source))
}

fn parse_lines(text: &str, source: Option<&str>) -> Vec<RequestLogEntry> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .filter_map(|(index, line)| parse_line_from(line, source, index))
        .collect()
}

/// `index` seeds the generated id when the line carries no request id.
pub fn parse_line(line: &str, index: usize) -> Option<RequestLogEntry> {
    parse_line_from(line, None, index)
}

fn parse_line_from(line: &str, source: Option<&str>, index: usize) -> Option<RequestLogEntry> {
    let line = line.trim();
    let id_seed = IdSeed { source, index };
    if let (Some(open), Some(close)) = (line.find('{'), line.rfind('}')) {
        if open < close {
            return parse_json_line(&line[open..=close], id_seed);
        }
    }
    parse_common_log_line(line, id_seed)
}

#[derive(Clone, Copy)]
struct IdSeed<'a> {
    source: Option<&'a str>,
    index: usize,
}

fn parse_json_line(raw: &str, id_seed: IdSeed<'_>) -> Option<RequestLogEntry> {
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(raw) else {
        return None;
    };

    let parsed_at = timestamp_field(&obj);
    let timestamp = match (&parsed_at, string_field(&obj, TIMESTAMP_KEYS)) {
        (Some(at), _) => format_rfc3339(*at),
        (None, Some(raw)) => raw,
        (None, None) => format_rfc3339(OffsetDateTime::now_utc()),
    };
    let status_code = number_field(&obj, STATUS_KEYS)
        .filter(|status| (0.0..=999.0).contains(status))
        .map(|status| status as u16)
        .unwrap_or(0);
    let id = string_field(&obj, REQUEST_ID_KEYS)
        .filter(|id| !id.is_empty() && id != "-")
        .unwrap_or_else(|| generated_id(parsed_at, id_seed));

    let mut entry = RequestLogEntry::new(id, timestamp, status_code);
    if let Some(method) = string_field(&obj, &["method"]).filter(|m| !m.is_empty()) {
        entry.method = method.to_ascii_uppercase();
    }
    if let Some(path) = string_field(&obj, PATH_KEYS).filter(|p| !p.is_empty()) {
        entry.path = path;
    }
    entry.response_time = number_field(&obj, RESPONSE_TIME_KEYS)
        .filter(|ms| *ms >= 0.0)
        .unwrap_or(0.0);
    if let Some(source_ip) = string_field(&obj, SOURCE_IP_KEYS).filter(|ip| !ip.is_empty()) {
        entry.source_ip = strip_port(&source_ip).to_string();
    }
    entry.namespace = string_field(&obj, &["namespace"]).filter(|ns| !ns.is_empty());

    let tier = string_field(&obj, TIER_KEYS).filter(|tier| !tier.is_empty());
    if tier.is_some() {
        entry.authentication = Some(AuthenticationDetails {
            method: "api-key".to_string(),
            is_valid: !matches!(status_code, 401 | 403),
            tier,
            key_prefix: None,
        });
    }
    entry.model_inference = model_inference(&obj);

    let policy_name = string_field(&obj, POLICY_NAME_KEYS).filter(|name| !name.is_empty());
    attach_enforcement(&mut entry, policy_name.as_deref());
    Some(entry)
}

fn parse_common_log_line(line: &str, id_seed: IdSeed<'_>) -> Option<RequestLogEntry> {
    let captures = common_log_regex().captures(line)?;
    let raw_timestamp = captures.get(2)?.as_str();
    let parsed_at = parse_timestamp(raw_timestamp);
    let timestamp = parsed_at
        .map(format_rfc3339)
        .unwrap_or_else(|| raw_timestamp.to_string());
    let status_code = captures.get(5)?.as_str().parse::<u16>().ok()?;

    let mut entry = RequestLogEntry::new(generated_id(parsed_at, id_seed), timestamp, status_code);
    entry.source_ip = captures.get(1)?.as_str().to_string();
    entry.method = captures.get(3)?.as_str().to_string();
    entry.path = captures.get(4)?.as_str().to_string();
    attach_enforcement(&mut entry, None);
    Some(entry)
}

/// The policy denial implied by a gateway status code: 401/403 are Authorino, 429 is
/// Limitador.
pub fn denial_for_status(status_code: u16, policy_name: Option<&str>) -> Option<PolicyDecisionDetails> {
    let (policy_type, enforcement_point, default_name, reason) = match status_code {
        401 => (
            PolicyType::AuthPolicy,
            EnforcementPoint::Authorino,
            "gateway-auth-policy",
            "authentication failed",
        ),
        403 => (
            PolicyType::AuthPolicy,
            EnforcementPoint::Authorino,
            "gateway-auth-policy",
            "authorization denied",
        ),
        429 => (
            PolicyType::RateLimitPolicy,
            EnforcementPoint::Limitador,
            "gateway-rate-limits",
            "rate limit exceeded",
        ),
        _ => return None,
    };
    let name = policy_name.unwrap_or(default_name).to_string();
    Some(PolicyDecisionDetails {
        policy_id: name.clone(),
        policy_name: name,
        policy_type,
        decision: PolicyVerdict::Deny,
        enforcement_point,
        reason: reason.to_string(),
        processing_time: None,
    })
}

fn attach_enforcement(entry: &mut RequestLogEntry, policy_name: Option<&str>) {
    if let Some(denial) = denial_for_status(entry.status_code, policy_name) {
        entry.policy_type = Some(denial.policy_type);
        entry.policy_decisions.push(denial);
    }
    entry.decision = Decision::from_status(entry.status_code);
}

fn model_inference(obj: &Map<String, Value>) -> Option<ModelInferenceDetails> {
    let model = string_field(obj, MODEL_KEYS).filter(|model| !model.is_empty())?;
    let usage = obj.get("usage").and_then(Value::as_object);
    let tokens = |key: &str| {
        number_field(obj, &[key])
            .or_else(|| usage.and_then(|usage| number_field(usage, &[key])))
            .filter(|count| *count >= 0.0)
            .map(|count| count as u64)
    };
    Some(ModelInferenceDetails {
        model,
        prompt_tokens: tokens("prompt_tokens"),
        completion_tokens: tokens("completion_tokens"),
        total_tokens: tokens("total_tokens"),
        finish_reason: string_field(obj, &["finish_reason"]),
    })
}

fn timestamp_field(obj: &Map<String, Value>) -> Option<OffsetDateTime> {
    TIMESTAMP_KEYS.iter().find_map(|key| match obj.get(*key)? {
        Value::String(raw) => parse_timestamp(raw),
        Value::Number(number) => from_epoch_number(number.as_f64()?),
        _ => None,
    })
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::String(value) => Some(value.trim().to_string()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    })
}

fn number_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::Number(value) => value.as_f64(),
        Value::String(value) => value.trim().parse::<f64>().ok(),
        _ => None,
    })
    .filter(|value| value.is_finite())
}

/// `10.0.0.1:51234` → `10.0.0.1`. Bare IPv6 addresses are left alone.
fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split_once(']').map(|(host, _)| host).unwrap_or(addr);
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => addr,
    }
}

fn generated_id(at: Option<OffsetDateTime>, seed: IdSeed<'_>) -> String {
    let millis = at
        .unwrap_or_else(OffsetDateTime::now_utc)
        .unix_timestamp_nanos()
        / 1_000_000;
    match seed.source {
        Some(source) => format!("log-{source}-{millis}-{}", seed.index),
        None => format!("log-{millis}-{}", seed.index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_line_with_string_status_is_rejected() {
        let entry = parse_line(r#"{"status_code": "401", "request_id": "abc"}"#, 0)
            .expect("json line parses");
        assert_eq!(entry.id, "abc");
        assert_eq!(entry.status_code, 401);
        assert_eq!(entry.decision, Decision::Reject);
        assert_eq!(entry.policy_type, Some(PolicyType::AuthPolicy));
        assert_eq!(entry.policy_decisions.len(), 1);
        assert_eq!(
            entry.policy_decisions[0].enforcement_point,
            EnforcementPoint::Authorino
        );
    }

    #[test]
    fn common_log_line_is_accepted() {
        let entry = parse_line(
            r#"10.0.0.1 - - [10/Oct/2020:13:55:36] "GET /v1/chat/completions HTTP/1.1" 200 123"#,
            3,
        )
        .expect("clf line parses");
        assert_eq!(entry.decision, Decision::Accept);
        assert_eq!(entry.method, "GET");
        assert_eq!(entry.status_code, 200);
        assert_eq!(entry.path, "/v1/chat/completions");
        assert_eq!(entry.source_ip, "10.0.0.1");
        assert_eq!(entry.timestamp, "2020-10-10T13:55:36Z");
        assert!(entry.id.ends_with("-3"));
        assert!(entry.policy_decisions.is_empty());
    }

    #[test]
    fn envoy_aliases_and_prefix_noise() {
        let entry = parse_line(
            r#"[2024-05-01T10:00:00Z] access: {"start_time":"2024-05-01T10:00:00.123Z","x_request_id":"r-1","response_code":429,"duration":17,"downstream_remote_address":"10.1.2.3:51234","method":"post","uri":"/v1/chat/completions","model":"qwen3","tier":"free","usage":{"prompt_tokens":12,"total_tokens":30}}"#,
            0,
        )
        .expect("json with prefix parses");
        assert_eq!(entry.id, "r-1");
        assert_eq!(entry.method, "POST");
        assert_eq!(entry.path, "/v1/chat/completions");
        assert_eq!(entry.response_time, 17.0);
        assert_eq!(entry.source_ip, "10.1.2.3");
        assert_eq!(entry.timestamp, "2024-05-01T10:00:00.123Z");
        assert_eq!(entry.policy_type, Some(PolicyType::RateLimitPolicy));
        let auth = entry.authentication.expect("tier maps to authentication");
        assert_eq!(auth.tier.as_deref(), Some("free"));
        assert!(auth.is_valid);
        let inference = entry.model_inference.expect("model maps to inference");
        assert_eq!(inference.model, "qwen3");
        assert_eq!(inference.prompt_tokens, Some(12));
        assert_eq!(inference.total_tokens, Some(30));
        assert_eq!(inference.completion_tokens, None);
    }

    #[test]
    fn generated_ids_carry_the_source() {
        let line = r#"10.0.0.1 - - [10/Oct/2020:13:55:36] "GET / HTTP/1.1" 200 1"#;
        let plain = parse_access_logs(line);
        let from_a = parse_source_logs(line, "gw-a");
        let from_b = parse_source_logs(line, "gw-b");
        assert_eq!(plain[0].id, "log-1602338136000-0");
        assert_eq!(from_a[0].id, "log-gw-a-1602338136000-0");
        assert_ne!(from_a[0].id, from_b[0].id);

        let with_id = parse_source_logs(r#"{"request_id":"abc","status":200}"#, "gw-a");
        assert_eq!(with_id[0].id, "abc");
    }

    #[test]
    fn malformed_lines_are_dropped() {
        assert!(parse_line(r#"{"status_code": 200"#, 0).is_none());
        assert!(parse_line(r#"{"status_code": 200,}"#, 0).is_none());
        assert!(parse_line("} nonsense {", 0).is_none());
        assert!(parse_line(r#"["not", "an", "object"]"#, 0).is_none());
        assert!(parse_line("starting envoy proxy", 0).is_none());
    }

    #[test]
    fn parse_access_logs_skips_blanks_and_garbage() {
        let text = r#"
{"status":200,"request_id":"a","timestamp":1714557600}

garbage line
10.0.0.9 - - [10/Oct/2020:13:55:36 +0000] "DELETE /x HTTP/1.1" 503 -
{"broken":
"#;
        let entries = parse_access_logs(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "a");
        assert_eq!(entries[0].timestamp, "2024-05-01T10:00:00Z");
        assert_eq!(entries[1].method, "DELETE");
        assert_eq!(entries[1].decision, Decision::Reject);
    }

    #[test]
    fn missing_status_counts_as_accepted() {
        let entry = parse_line(r#"{"request_id":"no-status"}"#, 0).expect("parses");
        assert_eq!(entry.status_code, 0);
        assert_eq!(entry.decision, Decision::Accept);
    }

    #[test]
    fn strip_port_handles_ipv4_and_ipv6() {
        assert_eq!(strip_port("10.0.0.1:80"), "10.0.0.1");
        assert_eq!(strip_port("[::1]:80"), "::1");
        assert_eq!(strip_port("fe80::1"), "fe80::1");
        assert_eq!(strip_port("10.0.0.1"), "10.0.0.1");
    }
}
