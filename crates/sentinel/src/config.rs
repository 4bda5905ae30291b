//! Agent configuration
//!
//! Layered, later sources win: optional config file (`--config`), then
//! `AGENT_*` environment variables with `__` separating nested keys
//! (`AGENT_GOVERNANCE__TRUST_THRESHOLD=40`), then command-line flags.

use anyhow::{Context, Result};
use clap::Parser;
use sentinel_lib::predictor::PredictorConfig;
use sentinel_lib::{ControlConfig, GovernancePolicy};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Predictive cgroup v2 resource agent
#[derive(Debug, Default, Parser)]
#[command(name = "sentinel-agent")]
#[command(author, version, about = "Predictive cgroup v2 resource agent", long_about = None)]
pub struct Cli {
    /// Control-group paths of the workloads to manage, relative to the cgroup root
    pub workloads: Vec<String>,

    /// Runtime container ids to resolve to control-group paths
    #[arg(long = "container", value_delimiter = ',')]
    pub containers: Vec<String>,

    /// Tick interval in seconds
    #[arg(long, short)]
    pub interval: Option<u64>,

    /// Record intended limit writes without touching the cgroup filesystem
    #[arg(long)]
    pub dry_run: bool,

    /// Log level or filter directive, overrides RUST_LOG
    #[arg(long)]
    pub log_level: Option<String>,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Mount point of the cgroup v2 hierarchy
    #[arg(long)]
    pub cgroup_root: Option<PathBuf>,

    /// Node identifier reported in telemetry
    #[arg(long)]
    pub node_id: Option<String>,

    /// Port for health and metrics endpoints
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Docker Engine API endpoint used as security feed
    #[arg(long)]
    pub docker_endpoint: Option<String>,

    /// Collector endpoint for telemetry pushes
    #[arg(long)]
    pub telemetry_endpoint: Option<String>,

    /// ONNX model for the learned predictor
    #[arg(long)]
    pub model: Option<PathBuf>,
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node identifier, defaults to the host's NODE_NAME
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    /// Control-group paths to manage
    #[serde(default)]
    pub workloads: Vec<String>,

    /// Container ids resolved to control-group paths at startup
    #[serde(default)]
    pub containers: Vec<String>,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default)]
    pub dry_run: bool,

    /// Forecast in CPU-usec per second above which a quota is applied
    #[serde(default = "default_scaling_threshold")]
    pub scaling_threshold: f64,

    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,

    #[serde(default)]
    pub governance: GovernancePolicy,

    #[serde(default = "default_security_refresh")]
    pub security_refresh_every: u64,

    /// Trust score assumed while the security feed is unavailable
    #[serde(default = "default_unavailable_trust")]
    pub unavailable_trust_score: u8,

    #[serde(default = "default_io_rate_threshold")]
    pub io_rate_threshold_bytes: u64,

    #[serde(default = "default_io_fallback_rate")]
    pub io_fallback_rate_bytes: u64,

    /// `major:minor` device for io.max, discovered from io.stat when unset
    #[serde(default)]
    pub io_device: Option<String>,

    #[serde(default = "default_predict_budget")]
    pub predict_budget_ms: u64,

    #[serde(default = "default_workload_timeout")]
    pub workload_timeout_ms: u64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub predictor: PredictorConfig,

    /// Docker Engine API endpoint; without it the security feed is unavailable
    #[serde(default)]
    pub docker_endpoint: Option<String>,

    #[serde(default = "default_security_timeout")]
    pub security_timeout_ms: u64,

    #[serde(default)]
    pub telemetry_endpoint: Option<String>,

    #[serde(default = "default_telemetry_timeout")]
    pub telemetry_timeout_ms: u64,
}

fn default_node_id() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "local".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_interval() -> u64 {
    5
}

fn default_scaling_threshold() -> f64 {
    2_000_000.0
}

fn default_safety_margin() -> f64 {
    1.2
}

fn default_security_refresh() -> u64 {
    10
}

fn default_unavailable_trust() -> u8 {
    100
}

fn default_io_rate_threshold() -> u64 {
    100 * 1024 * 1024
}

fn default_io_fallback_rate() -> u64 {
    50 * 1024 * 1024
}

fn default_predict_budget() -> u64 {
    50
}

fn default_workload_timeout() -> u64 {
    2000
}

fn default_max_concurrency() -> usize {
    8
}

fn default_security_timeout() -> u64 {
    2000
}

fn default_telemetry_timeout() -> u64 {
    100
}

impl AgentConfig {
    /// Load configuration from the config file, environment and flags
    pub fn load(cli: &Cli) -> Result<Self> {
        Self::load_with(cli, Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix("AGENT")
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("workloads")
            .with_list_parse_key("containers")
            .try_parsing(true)
    }

    fn load_with(cli: &Cli, environment: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &cli.config {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        let mut config: AgentConfig = builder
            .add_source(environment)
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if !cli.workloads.is_empty() {
            self.workloads = cli.workloads.clone();
        }
        if !cli.containers.is_empty() {
            self.containers = cli.containers.clone();
        }
        if let Some(interval) = cli.interval {
            self.interval_secs = interval;
        }
        self.dry_run |= cli.dry_run;
        if let Some(root) = &cli.cgroup_root {
            self.cgroup_root = root.clone();
        }
        if let Some(node_id) = &cli.node_id {
            self.node_id = node_id.clone();
        }
        if let Some(port) = cli.api_port {
            self.api_port = port;
        }
        if let Some(endpoint) = &cli.docker_endpoint {
            self.docker_endpoint = Some(endpoint.clone());
        }
        if let Some(endpoint) = &cli.telemetry_endpoint {
            self.telemetry_endpoint = Some(endpoint.clone());
        }
        if let Some(model) = &cli.model {
            self.predictor.model_path = Some(model.clone());
        }
    }

    /// Fail fast on values the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workloads.is_empty() && self.containers.is_empty() {
            anyhow::bail!("no workloads configured, pass control-group paths or --container ids");
        }
        if self.predictor.window == 0 || self.predictor.lags == 0 {
            anyhow::bail!("predictor window and lags must be at least 1");
        }
        if let Some(id) = self
            .workloads
            .iter()
            .chain(&self.containers)
            .find(|id| escapes_root(id))
        {
            anyhow::bail!("workload {id:?} points outside the cgroup root");
        }
        self.control_config()
            .validate()
            .context("invalid control loop configuration")
    }

    pub fn control_config(&self) -> ControlConfig {
        ControlConfig {
            interval: Duration::from_secs(self.interval_secs),
            scaling_threshold: self.scaling_threshold,
            safety_margin: self.safety_margin,
            governance: self.governance.clone(),
            security_refresh_every: self.security_refresh_every,
            unavailable_trust_score: self.unavailable_trust_score,
            io_rate_threshold: self.io_rate_threshold_bytes as f64,
            io_fallback_rate: self.io_fallback_rate_bytes,
            predict_budget: Duration::from_millis(self.predict_budget_ms),
            workload_timeout: Duration::from_millis(self.workload_timeout_ms),
            max_concurrency: self.max_concurrency,
            horizon: 1,
            baseline_window: self.predictor.window,
            node_id: self.node_id.clone(),
        }
    }

    pub fn security_timeout(&self) -> Duration {
        Duration::from_millis(self.security_timeout_ms)
    }

    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }
}

/// True for ids that would resolve above the cgroup root once joined onto it
fn escapes_root(id: &str) -> bool {
    Path::new(id)
        .components()
        .any(|component| matches!(component, Component::ParentDir))
}
