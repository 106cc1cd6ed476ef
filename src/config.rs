//! Agent configuration and collector templates.
//!
//! Configuration is layered: an optional TOML file, then environment
//! variables with the `ONTAP_AGENT` prefix (`__` as separator), with a
//! `.env` file loaded first if present. The `[collector]` section is the
//! perf template: which counters to request, how instances are keyed, and
//! the knobs of the post-processing pipeline.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub ontap: OntapConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    pub collector: Template,
    #[serde(default)]
    pub shelf: Option<ShelfTemplate>,
}

/// Connection parameters for the ONTAP management interface.
#[derive(Debug, Deserialize, Clone)]
pub struct OntapConfig {
    pub addr: String,
    pub username: String,
    pub password: SecretString,
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    /// Clustered ONTAP vs 7-mode; drives query selection and pagination.
    #[serde(default = "default_true")]
    pub clustered: bool,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollerConfig {
    /// Value of the `datacenter` global label on every emitted matrix.
    #[serde(default)]
    pub datacenter: String,
    #[serde(default = "default_data_interval")]
    pub data_interval_seconds: u64,
    #[serde(default = "default_instance_interval")]
    pub instance_interval_seconds: u64,
    #[serde(default = "default_counter_interval")]
    pub counter_interval_seconds: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            datacenter: String::new(),
            data_interval_seconds: default_data_interval(),
            instance_interval_seconds: default_instance_interval(),
            counter_interval_seconds: default_counter_interval(),
        }
    }
}

/// Perf collector template: the object to collect and how.
///
/// Counters are listed by their raw catalog name, optionally renamed with
/// `source=>display`. The special token `instance_name` becomes an instance
/// label named after the object.
#[derive(Debug, Deserialize, Clone)]
pub struct Template {
    pub object: String,
    pub query: String,
    #[serde(default)]
    pub counters: Vec<String>,
    #[serde(default = "default_instance_key")]
    pub instance_key: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Minimum number of operations in an interval before a latency
    /// average is considered meaningful.
    #[serde(default = "default_latency_io_reqd")]
    pub latency_io_reqd: f64,
    /// Per-counter property overrides, e.g. `write_data = "rate"`.
    #[serde(default, rename = "override")]
    pub overrides: BTreeMap<String, String>,
    /// workload_detail only: layer counter name -> resource display name.
    #[serde(default)]
    pub resource_map: BTreeMap<String, String>,
    /// workload families only: labels copied from the QoS inventory,
    /// each `name` or `name=>display`.
    #[serde(default)]
    pub qos_labels: Vec<String>,
}

/// Shelf plugin template: one entry per nested sub-object.
///
/// The map key is the attribute element name, optionally renamed with
/// `attr=>display`. Each leaf is a counter spec: a bare name is a scalar
/// metric, `^name` an instance label, `^^name` the instance key (also a
/// label); `x=>y` renames inside any form.
#[derive(Debug, Deserialize, Clone)]
pub struct ShelfTemplate {
    pub objects: BTreeMap<String, Vec<String>>,
}

fn default_use_tls() -> bool {
    true
}

fn default_verify_tls() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_data_interval() -> u64 {
    60
}

fn default_instance_interval() -> u64 {
    600
}

fn default_counter_interval() -> u64 {
    86400
}

fn default_instance_key() -> String {
    "uuid".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_latency_io_reqd() -> f64 {
    10.0
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        // Load environment variables from .env if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("ONTAP_AGENT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

/// Split a counter spec `source=>display` into its two halves.
/// Returns the spec itself as both halves when there is no arrow.
pub fn parse_rename(spec: &str) -> (&str, &str) {
    match spec.split_once("=>") {
        Some((source, display)) => (source.trim(), display.trim()),
        None => (spec, spec),
    }
}
