use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::config::{ConfigError, DEFAULT_HTTP_TIMEOUT_MS, DEFAULT_USER_AGENT, EnvVars};

const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl Downloaded {
    pub fn is_html(&self) -> bool {
        self.content_type.as_deref().is_some_and(|content_type| {
            content_type.contains("text/html") || content_type.contains("application/xhtml")
        })
    }
}

/// Read-only access to third-party feeds, APIs and assets.
pub trait SourceApi {
    fn fetch_text(&mut self, url: &str, headers: &[(&str, &str)]) -> Result<String>;
    fn fetch_json(&mut self, url: &str) -> Result<Value>;
    fn fetch_bytes(&mut self, url: &str) -> Result<Downloaded>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSourceConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl HttpSourceConfig {
    pub fn from_env(env: &EnvVars) -> Result<Self, ConfigError> {
        Ok(Self {
            user_agent: env.value_or("SOURCE_USER_AGENT", DEFAULT_USER_AGENT),
            timeout_ms: env.number("SOURCE_HTTP_TIMEOUT_MS", DEFAULT_HTTP_TIMEOUT_MS)?,
        })
    }
}

pub struct HttpSource {
    client: Client,
    request_count: usize,
}

impl HttpSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent)
            .build()
            .context("failed to build source HTTP client")?;
        Ok(Self {
            client,
            request_count: 0,
        })
    }

    fn get(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::blocking::Response> {
        self.request_count += 1;
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request
            .send()
            .with_context(|| format!("failed to fetch {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            bail!("request failed ({status}): {url}\n{snippet}");
        }
        Ok(response)
    }
}

impl SourceApi for HttpSource {
    fn fetch_text(&mut self, url: &str, headers: &[(&str, &str)]) -> Result<String> {
        self.get(url, headers)?
            .text()
            .with_context(|| format!("failed to read body of {url}"))
    }

    fn fetch_json(&mut self, url: &str) -> Result<Value> {
        self.get(url, &[("Accept", "application/json")])?
            .json()
            .with_context(|| format!("failed to decode JSON from {url}"))
    }

    fn fetch_bytes(&mut self, url: &str) -> Result<Downloaded> {
        let response = self.get(url, &[])?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read bytes of {url}"))?;
        Ok(Downloaded {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn html_detection_uses_content_type() {
        let page = Downloaded {
            bytes: b"<html></html>".to_vec(),
            content_type: Some("text/html; charset=utf-8".to_string()),
        };
        assert!(page.is_html());
        let image = Downloaded {
            bytes: Vec::new(),
            content_type: Some("image/png".to_string()),
        };
        assert!(!image.is_html());
        let unknown = Downloaded {
            bytes: Vec::new(),
            content_type: None,
        };
        assert!(!unknown.is_html());
    }

    #[test]
    fn config_reads_timeout_override() {
        let vars: BTreeMap<String, String> =
            [("SOURCE_HTTP_TIMEOUT_MS".to_string(), "1500".to_string())].into();
        let config = HttpSourceConfig::from_env(&EnvVars::from_map(&vars)).expect("config");
        assert_eq!(config.timeout_ms, 1500);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }
}
