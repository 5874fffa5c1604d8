use std::collections::BTreeMap;
use std::path::Path;

use crate::Result;

/// Environment lookup that prefers values from a dotenv file over the process environment.
#[derive(Clone, Default)]
pub struct Env {
    pub dotenv: BTreeMap<String, String>,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.dotenv.keys().map(|key| key.as_str()).collect();
        f.debug_struct("Env").field("dotenv_keys", &keys).finish()
    }
}

impl Env {
    pub fn parse_dotenv(contents: &str) -> Self {
        Self {
            dotenv: parse_dotenv(contents),
        }
    }

    pub fn from_dotenv_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::parse_dotenv(&raw))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.dotenv.get(key) {
            return Some(value.clone());
        }
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }

    /// First key in `keys` that is set.
    pub fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.get(key))
    }

    /// Comma separated list; blank entries are dropped.
    pub fn get_list(&self, key: &str) -> Option<Vec<String>> {
        let raw = self.get(key)?;
        let items: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect();
        (!items.is_empty()).then_some(items)
    }

    /// `name=value,name=value` pairs.
    pub fn get_pairs(&self, key: &str) -> Option<BTreeMap<String, String>> {
        let items = self.get_list(key)?;
        let pairs: BTreeMap<String, String> = items
            .iter()
            .filter_map(|item| item.split_once('='))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .filter(|(name, value)| !name.is_empty() && !value.is_empty())
            .collect();
        (!pairs.is_empty()).then_some(pairs)
    }

    pub fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|raw| raw.trim().parse::<T>().ok())
    }
}

pub fn parse_dotenv(contents: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::<String, String>::new();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line).trim();
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = raw_key.trim();
        if key.is_empty() {
            continue;
        }

        let mut value = raw_value.trim().to_string();
        if let Some(stripped) = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        {
            value = stripped.to_string();
        }

        if value.trim().is_empty() {
            continue;
        }

        out.insert(key.to_string(), value);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_handles_quotes_exports_and_comments() {
        let env = Env::parse_dotenv(
            "# upstreams\nexport SIMULATOR_URL=\"http://gw.local\"\nNAMESPACE='llm'\nEMPTY=\n",
        );
        assert_eq!(env.get("SIMULATOR_URL").as_deref(), Some("http://gw.local"));
        assert_eq!(env.get("NAMESPACE").as_deref(), Some("llm"));
        assert!(!env.dotenv.contains_key("EMPTY"));
    }

    #[test]
    fn lists_and_pairs_skip_blank_entries() {
        let env = Env::parse_dotenv(
            "PROMETHEUS_URLS=http://a:9090, ,http://b:9090\nMODEL_HOSTS=qwen3=qwen3.maas.local,broken,=x\n",
        );
        assert_eq!(
            env.get_list("PROMETHEUS_URLS"),
            Some(vec!["http://a:9090".to_string(), "http://b:9090".to_string()])
        );
        let hosts = env.get_pairs("MODEL_HOSTS").expect("pairs");
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts["qwen3"], "qwen3.maas.local");
    }

    #[test]
    fn first_of_respects_key_order() {
        let env = Env::parse_dotenv("QWEN3_URL=http://qwen\nKUADRANT_GATEWAY_URL=http://gw\n");
        assert_eq!(
            env.first_of(&["SIMULATOR_URL_UNSET_FOR_TEST", "KUADRANT_GATEWAY_URL", "QWEN3_URL"]),
            Some("http://gw".to_string())
        );
    }
}
