use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::SourceError;
use crate::query_executor::ExecutorConfig;

pub const DEFAULT_CONFIG_PATH: &str = "./schemas/supergraph.yaml";

/// The gateway's YAML configuration: runtime settings plus the subgraphs
/// that make up the supergraph.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Whole-execution deadline.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub include_subgraph_errors: bool,
    /// Zero disables schema polling.
    #[serde(default)]
    pub poll_interval_secs: u64,
    pub subgraphs: BTreeMap<String, SubgraphConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubgraphConfig {
    pub routing_url: String,
    pub schema: SchemaConfig,
}

/// Where a subgraph's SDL comes from: a file relative to the config, or
/// the subgraph itself via `{ _service { sdl } }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub subgraph_url: Option<String>,
}

fn default_listen() -> String {
    "0.0.0.0:4000".to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrency() -> usize {
    16
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let contents = fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, SourceError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Command line values win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(listen) = &args.listen {
            self.listen = listen.clone();
        }
        if let Some(timeout) = args.fetch_timeout_ms {
            self.fetch_timeout_ms = timeout;
        }
        if let Some(max_concurrency) = args.max_concurrency {
            self.max_concurrency = max_concurrency;
        }
        if let Some(interval) = args.poll_interval_secs {
            self.poll_interval_secs = interval;
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            max_concurrency: self.max_concurrency,
            include_subgraph_errors: self.include_subgraph_errors,
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "gangway", version, about = "GraphQL federation gateway")]
pub struct Args {
    /// Path to the supergraph configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Address to listen on, e.g. 0.0.0.0:4000
    #[arg(long)]
    pub listen: Option<String>,

    /// Per subgraph fetch timeout in milliseconds
    #[arg(long)]
    pub fetch_timeout_ms: Option<u64>,

    /// Maximum concurrent fetches per request
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Seconds between schema reloads, 0 to disable
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_defaults_and_applies_overrides() {
        let mut config = GatewayConfig::from_yaml(
            r#"
subgraphs:
  accounts:
    routing_url: http://localhost:4001/graphql
    schema:
      file: accounts.graphql
"#,
        )
        .unwrap();
        assert_eq!(config.listen, "0.0.0.0:4000");
        assert_eq!(config.fetch_timeout_ms, 30_000);
        assert_eq!(config.poll_interval(), None);
        assert_eq!(
            config.subgraphs["accounts"].schema.file.as_deref(),
            Some("accounts.graphql")
        );

        let args = Args::parse_from(["gangway", "--max-concurrency", "4", "--poll-interval-secs", "10"]);
        config.apply_args(&args);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.poll_interval(), Some(Duration::from_secs(10)));
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn rejects_missing_subgraphs() {
        assert!(matches!(
            GatewayConfig::from_yaml("listen: 127.0.0.1:4000\n"),
            Err(SourceError::Config(_))
        ));
    }
}
