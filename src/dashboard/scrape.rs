//! Direct scraping of component `/metrics` endpoints (Limitador, Authorino) in the
//! Prometheus text exposition format.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;

use super::config::ScrapeConfig;
use super::types::MetricSample;
use crate::utils::http::send_checked_text;
use crate::Result;

const MAX_EXPOSITION_BYTES: usize = 4 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ComponentScraper {
    client: reqwest::Client,
    limitador_url: Option<String>,
    authorino_url: Option<String>,
    timeout: Duration,
}

impl ComponentScraper {
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            limitador_url: config.limitador_url.clone().filter(|url| !url.trim().is_empty()),
            authorino_url: config.authorino_url.clone().filter(|url| !url.trim().is_empty()),
            timeout: Duration::from_secs(config.timeout_seconds.max(1)),
        })
    }

    pub async fn scrape(&self, url: &str) -> Result<Vec<(String, MetricSample)>> {
        let req = self.client.get(url).timeout(self.timeout);
        let body = send_checked_text(req, MAX_EXPOSITION_BYTES).await?;
        Ok(parse_exposition(&body))
    }

    /// Best effort: a failed scrape logs and yields no samples.
    pub async fn scrape_or_empty(
        &self,
        component: &str,
        url: Option<&str>,
    ) -> Vec<(String, MetricSample)> {
        let Some(url) = url else {
            return Vec::new();
        };
        match self.scrape(url).await {
            Ok(samples) => samples,
            Err(err) => {
                warn!(component, url, error = %err, "component metrics scrape failed");
                Vec::new()
            }
        }
    }

    pub async fn limitador(&self) -> Vec<(String, MetricSample)> {
        self.scrape_or_empty("limitador", self.limitador_url.as_deref()).await
    }

    pub async fn authorino(&self) -> Vec<(String, MetricSample)> {
        self.scrape_or_empty("authorino", self.authorino_url.as_deref()).await
    }
}

/// Parses `name{label="v",...} value [timestamp]` lines. Comments, blank lines and
/// malformed lines are skipped.
pub fn parse_exposition(body: &str) -> Vec<(String, MetricSample)> {
    body.lines().filter_map(parse_line).collect()
}

/// Sums every sample of `family` grouped by the value of `label` (missing → `unknown`).
pub fn sum_family_by(
    samples: &[(String, MetricSample)],
    family: &str,
    label: &str,
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::<String, f64>::new();
    for (name, sample) in samples {
        if name != family {
            continue;
        }
        let key = sample
            .label(label)
            .filter(|value| !value.is_empty())
            .unwrap_or("unknown");
        *out.entry(key.to_string()).or_default() += sample.value;
    }
    out
}

pub fn sum_family(samples: &[(String, MetricSample)], family: &str) -> f64 {
    samples
        .iter()
        .filter(|(name, _)| name == family)
        .map(|(_, sample)| sample.value)
        .sum()
}

fn parse_line(line: &str) -> Option<(String, MetricSample)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (name, labels, rest) = match line.find('{') {
        Some(open) => {
            let close = line[open..].rfind('}')? + open;
            let labels = parse_labels(&line[open + 1..close])?;
            (line[..open].trim(), labels, &line[close + 1..])
        }
        None => {
            let (name, rest) = line.split_once(char::is_whitespace)?;
            (name, BTreeMap::new(), rest)
        }
    };
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':') {
        return None;
    }

    let value = rest.split_whitespace().next()?;
    let value = match value {
        "+Inf" | "-Inf" | "NaN" => return None,
        raw => raw.parse::<f64>().ok()?,
    };

    Some((name.to_string(), MetricSample { labels, value }))
}

fn parse_labels(raw: &str) -> Option<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    let mut chars = raw.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            return Some(labels);
        }

        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            name.push(c);
            chars.next();
        }
        if chars.next() != Some('=') || chars.next() != Some('"') {
            return None;
        }

        let mut value = String::new();
        loop {
            match chars.next()? {
                '\\' => match chars.next()? {
                    'n' => value.push('\n'),
                    other => value.push(other),
                },
                '"' => break,
                c => value.push(c),
            }
        }
        labels.insert(name.trim().to_string(), value);
    }
}
