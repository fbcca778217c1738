//! Configuration management for Daedalus

use crate::error::{DaedalusError, Result};
use crate::models::{EngagementConfig, SubmitMode, TemplateEnvironment};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File-based configuration structure matching default.toml
#[derive(Debug, Deserialize)]
struct FileConfig {
    target: Option<TargetSection>,
    oracle: Option<OracleSection>,
    search: Option<SearchSection>,
    classifier: Option<ClassifierSection>,
    session: Option<SessionSection>,
}

#[derive(Debug, Deserialize)]
struct TargetSection {
    url: Option<String>,
    param: Option<String>,
    mode: Option<SubmitMode>,
    environment: Option<TemplateEnvironment>,
    user_agent: Option<String>,
    proxy: Option<String>,
    insecure: Option<bool>,
    headers: Option<HashMap<String, String>>,
    extra_params: Option<HashMap<String, String>>,
    arg_param: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OracleSection {
    timeout_secs: Option<u64>,
    rate_limit: Option<u32>,
    threads: Option<usize>,
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SearchSection {
    max_depth: Option<usize>,
    max_nodes: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ClassifierSection {
    blocked_markers: Option<Vec<String>>,
    blocked_patterns: Option<Vec<String>>,
    blocked_status: Option<Vec<u16>>,
    ambiguous_status: Option<Vec<u16>>,
    render_error_markers: Option<Vec<String>>,
    success_marker: Option<String>,
    blocked_body_length: Option<usize>,
    length_tolerance: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SessionSection {
    file: Option<PathBuf>,
}

/// Loads configuration from a TOML file and merges with defaults
pub fn load_config(path: &Path) -> Result<EngagementConfig> {
    let content = std::fs::read_to_string(path).map_err(DaedalusError::IoError)?;
    parse_config(&content)
}

/// Parses TOML configuration text over the defaults
pub fn parse_config(content: &str) -> Result<EngagementConfig> {
    let file_config: FileConfig = toml::from_str(content)?;
    let mut config = EngagementConfig::default();

    if let Some(target) = file_config.target {
        if let Some(url) = target.url {
            config.target = url;
        }
        if let Some(param) = target.param {
            config.param = param;
        }
        if let Some(mode) = target.mode {
            config.mode = mode;
        }
        if let Some(environment) = target.environment {
            config.environment = environment;
        }
        if let Some(ua) = target.user_agent {
            config.user_agent = ua;
        }
        if target.proxy.is_some() {
            config.proxy = target.proxy;
        }
        if let Some(insecure) = target.insecure {
            config.insecure = insecure;
        }
        if let Some(headers) = target.headers {
            config.headers.extend(headers);
        }
        if let Some(extra) = target.extra_params {
            config.extra_params.extend(extra);
        }
        if target.arg_param.is_some() {
            config.arg_param = target.arg_param;
        }
    }

    if let Some(oracle) = file_config.oracle {
        if let Some(timeout) = oracle.timeout_secs {
            config.timeout_secs = timeout;
        }
        if let Some(rate) = oracle.rate_limit {
            config.rate_limit = (rate > 0).then_some(rate);
        }
        if let Some(threads) = oracle.threads {
            config.threads = threads.max(1);
        }
        if let Some(attempts) = oracle.max_attempts {
            config.retry.max_attempts = attempts.max(1);
        }
        if let Some(backoff) = oracle.initial_backoff_ms {
            config.retry.initial_backoff_ms = backoff;
        }
        if let Some(backoff) = oracle.max_backoff_ms {
            config.retry.max_backoff_ms = backoff;
        }
    }

    if let Some(search) = file_config.search {
        if let Some(depth) = search.max_depth {
            config.budget.max_depth = depth;
        }
        if let Some(nodes) = search.max_nodes {
            config.budget.max_nodes = nodes;
        }
    }

    if let Some(classifier) = file_config.classifier {
        let c = &mut config.classifier;
        if let Some(markers) = classifier.blocked_markers {
            c.blocked_markers = markers;
        }
        if let Some(patterns) = classifier.blocked_patterns {
            c.blocked_patterns = patterns;
        }
        if let Some(status) = classifier.blocked_status {
            c.blocked_status = status;
        }
        if let Some(status) = classifier.ambiguous_status {
            c.ambiguous_status = status;
        }
        if let Some(markers) = classifier.render_error_markers {
            c.render_error_markers = markers;
        }
        if classifier.success_marker.is_some() {
            c.success_marker = classifier.success_marker;
        }
        if classifier.blocked_body_length.is_some() {
            c.blocked_body_length = classifier.blocked_body_length;
        }
        if let Some(tolerance) = classifier.length_tolerance {
            c.length_tolerance = tolerance;
        }
    }

    if let Some(session) = file_config.session {
        config.session_file = session.file;
    }

    Ok(config)
}

fn split_pairs(items: Vec<String>, separator: char) -> Vec<(String, String)> {
    items
        .into_iter()
        .filter_map(|item| {
            item.split_once(separator)
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Merges CLI arguments into an existing EngagementConfig
#[allow(clippy::too_many_arguments)]
pub fn merge_cli_args(
    config: &mut EngagementConfig,
    target: Option<String>,
    param: Option<String>,
    mode: Option<SubmitMode>,
    environment: Option<TemplateEnvironment>,
    threads: Option<usize>,
    timeout: Option<u64>,
    proxy: Option<String>,
    rate_limit: Option<u32>,
    headers: Option<Vec<String>>,
    extra_params: Option<Vec<String>>,
    arg_param: Option<String>,
    session_file: Option<PathBuf>,
) {
    if let Some(t) = target {
        config.target = t;
    }
    if let Some(p) = param {
        config.param = p;
    }
    if let Some(m) = mode {
        config.mode = m;
    }
    if let Some(e) = environment {
        config.environment = e;
    }
    if let Some(t) = threads {
        config.threads = t.max(1);
    }
    if let Some(t) = timeout {
        config.timeout_secs = t;
    }
    if let Some(p) = proxy {
        config.proxy = Some(p);
    }
    if let Some(r) = rate_limit {
        config.rate_limit = (r > 0).then_some(r);
    }
    if let Some(h) = headers {
        config.headers.extend(split_pairs(h, ':'));
    }
    if let Some(e) = extra_params {
        config.extra_params.extend(split_pairs(e, '='));
    }
    if let Some(a) = arg_param {
        config.arg_param = Some(a);
    }
    if let Some(s) = session_file {
        config.session_file = Some(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections() {
        let config = parse_config(
            r#"
            [target]
            url = "http://ctf.local/render"
            param = "name"
            mode = "form"
            environment = "flask"

            [oracle]
            rate_limit = 0
            max_attempts = 5

            [search]
            max_depth = 12

            [classifier]
            blocked_markers = ["Hacker detected"]
            "#,
        )
        .unwrap();

        assert_eq!(config.target, "http://ctf.local/render");
        assert_eq!(config.mode, SubmitMode::Form);
        assert_eq!(config.environment, TemplateEnvironment::Flask);
        assert_eq!(config.rate_limit, None);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.budget.max_depth, 12);
        assert_eq!(config.classifier.blocked_markers, vec!["Hacker detected"]);
        assert_eq!(config.classifier.blocked_status, vec![403]);
    }

    #[test]
    fn test_merge_cli_headers_and_params() {
        let mut config = EngagementConfig::default();
        merge_cli_args(
            &mut config,
            Some("http://t/".to_string()),
            Some("q".to_string()),
            None,
            None,
            Some(0),
            None,
            None,
            None,
            Some(vec!["Cookie: session=abc".to_string(), "junk".to_string()]),
            Some(vec!["lang=en".to_string()]),
            Some("cmd".to_string()),
            None,
        );
        assert_eq!(config.arg_param.as_deref(), Some("cmd"));
        assert_eq!(config.threads, 1);
        assert_eq!(config.headers.get("Cookie").map(String::as_str), Some("session=abc"));
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.extra_params.get("lang").map(String::as_str), Some("en"));
    }
}
