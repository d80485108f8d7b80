//! YAML load test plans.
//!
//! A plan describes one HTTP load test: the target base URL, the pacing model,
//! the worker pool bounds and the weighted endpoints. Plans are plain data;
//! [`LoadTestPlan::to_load_test_config`] turns one into a runnable
//! [`LoadTestConfig`].

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration as StdDuration;
use thiserror::Error;

use crate::client::{build_client, ClientConfig};
use crate::config::{ConfigError, LoadTestConfig};
use crate::http_endpoint::{HttpEndpoint, HttpEndpointError, ResponseValidation};
use crate::load_models::LoadModel;
use crate::pacer::{PacerError, Rate};

/// Errors that can occur when loading or parsing a YAML plan.
#[derive(Error, Debug)]
pub enum YamlConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Invalid pacer: {0}")]
    Pacer(#[from] PacerError),

    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] HttpEndpointError),

    #[error("Invalid load test: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Duration format for YAML (e.g., "30s", "5m", "2h").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlDuration {
    Seconds(u64),
    String(String),
}

impl YamlDuration {
    pub fn to_std_duration(&self) -> Result<StdDuration, YamlConfigError> {
        match self {
            YamlDuration::Seconds(s) => Ok(StdDuration::from_secs(*s)),
            YamlDuration::String(s) => crate::utils::parse_duration_string(s)
                .map_err(|e| YamlConfigError::Validation(format!("Invalid duration '{}': {}", s, e))),
        }
    }
}

fn optional_duration(value: &Option<YamlDuration>) -> Result<Option<StdDuration>, YamlConfigError> {
    value.as_ref().map(YamlDuration::to_std_duration).transpose()
}

/// Worker pool bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YamlWorkers {
    #[serde(default = "default_initial_workers")]
    pub initial: usize,

    pub max: Option<usize>,
}

impl Default for YamlWorkers {
    fn default() -> Self {
        Self {
            initial: default_initial_workers(),
            max: None,
        }
    }
}

fn default_initial_workers() -> usize {
    crate::runner::DEFAULT_INITIAL_WORKERS
}

/// One step of a step schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YamlStep {
    pub minute: u32,
    pub rpm: u64,
}

/// Pacing model in YAML. Rates are written as "<count>/<period>".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum YamlPacer {
    Constant {
        rate: String,
    },
    Linear {
        start: String,
        target: String,
        #[serde(rename = "rampUp")]
        ramp_up: YamlDuration,
    },
    Steps {
        points: Vec<YamlStep>,
    },
}

impl YamlPacer {
    pub fn to_load_model(&self) -> Result<LoadModel, YamlConfigError> {
        match self {
            YamlPacer::Constant { rate } => Ok(LoadModel::Constant {
                rate: Rate::from_str(rate)?,
            }),
            YamlPacer::Linear {
                start,
                target,
                ramp_up,
            } => Ok(LoadModel::Linear {
                start: Rate::from_str(start)?,
                target: Rate::from_str(target)?,
                ramp_up: ramp_up.to_std_duration()?,
            }),
            YamlPacer::Steps { points } => Ok(LoadModel::Steps {
                points: points.iter().map(|p| (p.minute, p.rpm)).collect(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YamlBasicAuth {
    pub username: String,
    pub password: Option<String>,
}

/// Settings shared by every endpoint's HTTP client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YamlClient {
    #[serde(rename = "userAgent")]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(rename = "basicAuth")]
    pub basic_auth: Option<YamlBasicAuth>,

    #[serde(rename = "skipTlsVerify", default)]
    pub skip_tls_verify: bool,

    /// DNS override, "hostname:ip:port".
    pub resolve: Option<String>,

    #[serde(rename = "clientCert")]
    pub client_cert: Option<String>,

    #[serde(rename = "clientKey")]
    pub client_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YamlEndpoint {
    pub name: String,

    #[serde(default)]
    pub path: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default = "default_weight")]
    pub weight: u32,

    pub timeout: Option<YamlDuration>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    pub body: Option<String>,

    /// Exact status expected. Any 2xx is accepted when unset.
    #[serde(rename = "expectStatus")]
    pub expect_status: Option<u16>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_weight() -> u32 {
    1
}

/// Root of a YAML load test plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestPlan {
    #[serde(rename = "baseUrl")]
    pub base_url: String,

    /// Runs until interrupted when unset.
    pub duration: Option<YamlDuration>,

    #[serde(default)]
    pub workers: YamlWorkers,

    #[serde(rename = "defaultTimeout")]
    pub default_timeout: Option<YamlDuration>,

    #[serde(rename = "reportInterval")]
    pub report_interval: Option<YamlDuration>,

    pub seed: Option<u64>,

    pub pacer: YamlPacer,

    #[serde(rename = "weightOverrides", default)]
    pub weight_overrides: HashMap<String, u32>,

    #[serde(default)]
    pub client: YamlClient,

    #[serde(rename = "metricsPort")]
    pub metrics_port: Option<u16>,

    pub endpoints: Vec<YamlEndpoint>,
}

impl FromStr for LoadTestPlan {
    type Err = YamlConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let plan: LoadTestPlan = serde_yaml::from_str(content)?;
        plan.validate()?;
        Ok(plan)
    }
}

impl LoadTestPlan {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, YamlConfigError> {
        let content = fs::read_to_string(path)?;
        content.parse()
    }

    fn validate(&self) -> Result<(), YamlConfigError> {
        let base_url = self.base_url()?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(YamlConfigError::Validation(format!(
                "baseUrl must use http or https, got '{}'",
                self.base_url
            )));
        }

        if self.endpoints.is_empty() {
            return Err(YamlConfigError::Validation(
                "at least one endpoint is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(YamlConfigError::Validation(
                    "endpoint names can't be empty".to_string(),
                ));
            }
            if !names.insert(endpoint.name.as_str()) {
                return Err(YamlConfigError::Validation(format!(
                    "duplicate endpoint name '{}'",
                    endpoint.name
                )));
            }
            optional_duration(&endpoint.timeout)?;
        }

        for name in self.weight_overrides.keys() {
            if !names.contains(name.as_str()) {
                return Err(YamlConfigError::Validation(format!(
                    "weight override for unknown endpoint '{}'",
                    name
                )));
            }
        }

        if self.workers.initial == 0 || self.workers.max == Some(0) {
            return Err(YamlConfigError::Validation(
                "workers must be greater than zero".to_string(),
            ));
        }

        optional_duration(&self.duration)?;
        optional_duration(&self.default_timeout)?;
        optional_duration(&self.report_interval)?;
        self.pacer.to_load_model()?.to_pacer()?;

        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, YamlConfigError> {
        Url::parse(&self.base_url).map_err(|e| {
            YamlConfigError::Validation(format!("invalid baseUrl '{}': {}", self.base_url, e))
        })
    }

    pub fn load_model(&self) -> Result<LoadModel, YamlConfigError> {
        self.pacer.to_load_model()
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            user_agent: self.client.user_agent.clone(),
            headers: self.client.headers.clone(),
            skip_tls_verify: self.client.skip_tls_verify,
            resolve_target_addr: self.client.resolve.clone(),
            client_cert_path: self.client.client_cert.clone(),
            client_key_path: self.client.client_key.clone(),
            pool_config: None,
        }
    }

    /// Builds the HTTP client and endpoints and assembles a runnable config.
    pub fn to_load_test_config(&self) -> Result<LoadTestConfig, YamlConfigError> {
        let client = build_client(&self.client_config())
            .map_err(|e| YamlConfigError::Client(e.to_string()))?
            .client;
        self.to_load_test_config_with_client(client)
    }

    pub fn to_load_test_config_with_client(
        &self,
        client: reqwest::Client,
    ) -> Result<LoadTestConfig, YamlConfigError> {
        let base_url = self.base_url()?;

        let mut builder = LoadTestConfig::builder()
            .shared_pacer(self.load_model()?.to_pacer()?)
            .initial_workers(self.workers.initial)
            .weight_overrides(self.weight_overrides.clone());

        for endpoint in &self.endpoints {
            builder = builder.executor(self.build_endpoint(endpoint, &client, &base_url)?);
        }
        if let Some(max) = self.workers.max {
            builder = builder.max_workers(max);
        }
        if let Some(duration) = optional_duration(&self.duration)? {
            builder = builder.duration(duration);
        }
        if let Some(timeout) = optional_duration(&self.default_timeout)? {
            builder = builder.default_timeout(timeout);
        }
        if let Some(interval) = optional_duration(&self.report_interval)? {
            builder = builder.report_interval(interval);
        }
        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }

        Ok(builder.build()?)
    }

    fn build_endpoint(
        &self,
        endpoint: &YamlEndpoint,
        client: &reqwest::Client,
        base_url: &Url,
    ) -> Result<crate::executor::ExecutorRef, YamlConfigError> {
        let mut builder = HttpEndpoint::builder(&endpoint.name, client.clone(), base_url.clone())
            .path(&endpoint.path)
            .method(&endpoint.method)
            .weight(endpoint.weight);

        if let Some(timeout) = optional_duration(&endpoint.timeout)? {
            builder = builder.timeout(timeout);
        }
        for (name, value) in &endpoint.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &endpoint.body {
            builder = builder.body(body);
        }
        if let Some(auth) = &self.client.basic_auth {
            builder = builder.basic_auth(&auth.username, auth.password.clone());
        }
        if let Some(status) = endpoint.expect_status {
            builder = builder.validation(ResponseValidation::ExpectStatus(status));
        }

        Ok(builder.build_ref()?)
    }
}
