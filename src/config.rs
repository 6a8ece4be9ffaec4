use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::util::is_local_endpoint_url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,
    pub model: String,
    pub api_url: String,
    pub api_version: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_url = std::env::var("BOTSTUDIO_API_URL")
            .unwrap_or_else(|_| "https://api.botstudio.dev/v1/completions".to_string());
        let api_key = std::env::var("BOTSTUDIO_API_KEY").ok().and_then(|v| {
            if v.trim().is_empty() {
                None
            } else {
                Some(v)
            }
        });
        let model =
            std::env::var("BOTSTUDIO_MODEL").unwrap_or_else(|_| "designer-large".to_string());
        let api_version =
            std::env::var("BOTSTUDIO_API_VERSION").unwrap_or_else(|_| "2024-06-01".to_string());

        Ok(Self {
            api_key,
            model,
            api_url,
            api_version,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            bail!(
                "Invalid BOTSTUDIO_API_URL '{}': expected http:// or https:// URL",
                self.api_url
            );
        }

        if !self.is_local_endpoint() && self.api_key.is_none() {
            bail!(
                "BOTSTUDIO_API_KEY must be set for non-local endpoints (url: '{}')",
                self.api_url
            );
        }

        if self.model.trim().is_empty() {
            bail!("BOTSTUDIO_MODEL must not be empty");
        }

        Ok(())
    }

    fn is_local_endpoint(&self) -> bool {
        is_local_endpoint_url(&self.api_url)
    }
}
