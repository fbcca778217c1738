//! HTTP transport that submits payloads to a live target

use crate::error::{DaedalusError, Result};
use crate::http::transport::{Transport, TransportError, TransportResponse};
use crate::models::{EngagementConfig, SubmitMode};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use url::Url;

/// Characters a path-mode payload can never carry intact
const PATH_UNSAFE: [&str; 4] = ["/", "..", " ", "%"];

/// Sends each probe as one HTTP request and hands back the decoded body
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    target: Url,
    param: String,
    mode: SubmitMode,
    extra_params: Arc<RwLock<HashMap<String, String>>>,
    headers: HashMap<String, String>,
    request_count: Arc<AtomicU64>,
}

impl HttpTransport {
    /// Creates a transport from engagement configuration
    pub fn from_config(config: &EngagementConfig) -> Result<Self> {
        let target = Url::parse(&config.target)?;
        if config.mode != SubmitMode::Path && config.param.is_empty() {
            return Err(DaedalusError::ConfigError(
                "a parameter name is required unless submitting in path mode".to_string(),
            ));
        }

        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_store(true)
            .danger_accept_invalid_certs(config.insecure);

        if let Some(ref proxy_url) = config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| DaedalusError::ConfigError(format!("Invalid proxy URL: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build()?;

        Ok(Self {
            client,
            target,
            param: config.param.clone(),
            mode: config.mode,
            extra_params: Arc::new(RwLock::new(config.extra_params.clone())),
            headers: config.headers.clone(),
            request_count: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Returns the total number of requests made
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn extra_params(&self) -> HashMap<String, String> {
        self.extra_params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn build_request(&self, payload: &str) -> std::result::Result<reqwest::RequestBuilder, TransportError> {
        let extra_params = self.extra_params();
        let req = match self.mode {
            SubmitMode::Query => {
                let mut url = self.target.clone();
                {
                    let mut pairs = url.query_pairs_mut();
                    for (key, value) in &extra_params {
                        pairs.append_pair(key, value);
                    }
                    pairs.append_pair(&self.param, payload);
                }
                self.client.get(url)
            }
            SubmitMode::Form => {
                let mut form: Vec<(&str, &str)> = extra_params
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                form.push((self.param.as_str(), payload));
                self.client.post(self.target.clone()).form(&form)
            }
            SubmitMode::Json => {
                let mut body = serde_json::Map::new();
                for (key, value) in &extra_params {
                    body.insert(key.clone(), serde_json::Value::String(value.clone()));
                }
                body.insert(self.param.clone(), serde_json::Value::String(payload.to_string()));
                self.client.post(self.target.clone()).json(&body)
            }
            SubmitMode::Path => {
                if let Some(bad) = PATH_UNSAFE.iter().find(|s| payload.contains(*s)) {
                    return Err(TransportError::Unsubmittable(format!(
                        "path mode cannot carry {bad:?}"
                    )));
                }
                let mut url = self.target.clone();
                url.path_segments_mut()
                    .map_err(|_| TransportError::Unsubmittable("target URL cannot take a path".to_string()))?
                    .pop_if_empty()
                    .push(payload);
                self.client.get(url)
            }
        };

        let mut req = req;
        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        Ok(req)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &str, timeout: Duration) -> std::result::Result<TransportResponse, TransportError> {
        let req = self.build_request(payload)?.timeout(timeout);
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Connection(e.to_string())
            }
        };

        let response = req.send().await.map_err(map_err)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_err)?;
        let latency = started.elapsed();

        debug!("Response: {status} in {latency:?}");
        trace!("Payload {payload:?} -> {} bytes", body.len());

        Ok(TransportResponse {
            status,
            body: html_unescape(&body),
            latency,
        })
    }

    fn set_extra_param(&self, key: &str, value: &str) -> bool {
        debug!("Sending extra parameter {key}");
        self.extra_params
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        true
    }
}

/// Decodes the HTML entities Jinja2 autoescaping produces
pub fn html_unescape(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&#x2F;", "/")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_unescape() {
        assert_eq!(
            html_unescape("&lt;class &#39;dict&#39;&gt;"),
            "<class 'dict'>"
        );
        assert_eq!(html_unescape("&amp;lt;"), "&lt;");
        assert_eq!(html_unescape("plain"), "plain");
    }

    #[test]
    fn test_missing_param_is_config_error() {
        let config = EngagementConfig {
            target: "http://127.0.0.1:1/".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            HttpTransport::from_config(&config),
            Err(DaedalusError::ConfigError(_))
        ));
    }
}
