use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("api error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to decode base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl DashboardError {
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
