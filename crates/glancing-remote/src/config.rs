use crate::RemoteError;
use glancing_schema::MarketplaceId;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MARKETPLACE_URL: &str = "https://marketplace.stratuslab.eu/marketplace/metadata";

/// Marketplace metadata endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MARKETPLACE_URL)
    }
}

impl MarketplaceConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim().trim_end_matches('/').to_owned(),
            auth_token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    pub fn validate(&self) -> Result<(), RemoteError> {
        if self.url.starts_with("http://") || self.url.starts_with("https://") {
            Ok(())
        } else {
            Err(RemoteError::Config(format!(
                "marketplace URL must be http(s): '{}'",
                self.url
            )))
        }
    }

    /// URL of the descriptor for one marketplace entry.
    pub fn metadata_url(&self, id: &MarketplaceId) -> String {
        format!("{}/{}", self.url, id)
    }

    /// Whether `url` is served by this marketplace, and so may carry the
    /// bearer token.
    pub fn owns(&self, url: &str) -> bool {
        url.strip_prefix(&self.url)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'))
    }
}
