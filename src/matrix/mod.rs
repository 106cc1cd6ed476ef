//! In-memory table of metrics × instances.
//!
//! The matrix is the unit of exchange between the collector and whatever
//! consumes its output: metric descriptors and instances are ordered maps
//! with unique keys, and every (metric, instance) cell holds a numeric
//! value plus a validity bit. Instance slots are handed out monotonically
//! and never reused, so removing one instance leaves every other cell
//! addressable.

pub mod instance;
pub mod metric;

pub use instance::Instance;
pub use metric::{Metric, MetricType, Property};

use crate::error::{AgentError, Result};
use std::collections::HashMap;

/// Which labels downstream exporters should treat as instance keys and
/// which as passthrough labels.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub instance_keys: Vec<String>,
    pub instance_labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Matrix {
    object: String,
    global_labels: Vec<(String, String)>,
    metrics: HashMap<String, Metric>,
    metric_order: Vec<String>,
    instances: HashMap<String, Instance>,
    instance_order: Vec<String>,
    next_slot: usize,
    export_options: ExportOptions,
}

impl Matrix {
    pub fn new(object: &str) -> Self {
        Matrix {
            object: object.to_string(),
            global_labels: Vec::new(),
            metrics: HashMap::new(),
            metric_order: Vec::new(),
            instances: HashMap::new(),
            instance_order: Vec::new(),
            next_slot: 0,
            export_options: ExportOptions::default(),
        }
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn set_object(&mut self, object: &str) {
        self.object = object.to_string();
    }

    pub fn set_global_label(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.global_labels.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value.to_string();
        } else {
            self.global_labels.push((name.to_string(), value.to_string()));
        }
    }

    pub fn global_labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.global_labels.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn export_options(&self) -> &ExportOptions {
        &self.export_options
    }

    pub fn set_export_options(&mut self, options: ExportOptions) {
        self.export_options = options;
    }

    // --- metrics ---

    pub fn new_metric(&mut self, key: &str, metric_type: MetricType) -> Result<&mut Metric> {
        if self.metrics.contains_key(key) {
            return Err(AgentError::Config(format!("duplicate metric key [{key}]")));
        }
        let metric = Metric::new(key, metric_type, self.next_slot);
        self.metric_order.push(key.to_string());
        self.metrics.insert(key.to_string(), metric);
        Ok(self.metrics.get_mut(key).unwrap())
    }

    pub fn new_metric_f64(&mut self, key: &str) -> Result<&mut Metric> {
        self.new_metric(key, MetricType::Float64)
    }

    pub fn metric(&self, key: &str) -> Option<&Metric> {
        self.metrics.get(key)
    }

    pub fn metric_mut(&mut self, key: &str) -> Option<&mut Metric> {
        self.metrics.get_mut(key)
    }

    pub fn remove_metric(&mut self, key: &str) {
        if self.metrics.remove(key).is_some() {
            self.metric_order.retain(|k| k != key);
        }
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    /// Metric keys in insertion order.
    pub fn metric_keys(&self) -> Vec<String> {
        self.metric_order.clone()
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&String, &Metric)> {
        self.metric_order
            .iter()
            .map(move |k| (k, self.metrics.get(k).unwrap()))
    }

    // --- instances ---

    pub fn new_instance(&mut self, key: &str) -> Result<&mut Instance> {
        if self.instances.contains_key(key) {
            return Err(AgentError::Config(format!("duplicate instance key [{key}]")));
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        for metric in self.metrics.values_mut() {
            metric.grow(self.next_slot);
        }
        self.instance_order.push(key.to_string());
        self.instances.insert(key.to_string(), Instance::new(slot));
        Ok(self.instances.get_mut(key).unwrap())
    }

    pub fn instance(&self, key: &str) -> Option<&Instance> {
        self.instances.get(key)
    }

    pub fn instance_mut(&mut self, key: &str) -> Option<&mut Instance> {
        self.instances.get_mut(key)
    }

    pub fn remove_instance(&mut self, key: &str) {
        if self.instances.remove(key).is_some() {
            self.instance_order.retain(|k| k != key);
        }
    }

    /// Drop every instance and release their cells.
    pub fn purge_instances(&mut self) {
        self.instances.clear();
        self.instance_order.clear();
        self.next_slot = 0;
        for metric in self.metrics.values_mut() {
            metric.truncate();
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Instance keys in insertion order.
    pub fn instance_keys(&self) -> Vec<String> {
        self.instance_order.clone()
    }

    pub fn instances(&self) -> impl Iterator<Item = (&String, &Instance)> {
        self.instance_order
            .iter()
            .map(move |k| (k, self.instances.get(k).unwrap()))
    }

    // --- cells ---

    /// Clear every validity bit; structure and label data stay intact.
    pub fn reset(&mut self) {
        for metric in self.metrics.values_mut() {
            metric.reset();
        }
    }

    pub fn set_value_f64(&mut self, metric_key: &str, instance_key: &str, value: f64) -> Result<()> {
        let slot = self
            .instances
            .get(instance_key)
            .ok_or_else(|| AgentError::Config(format!("invalid instance key [{instance_key}]")))?
            .slot();
        let metric = self
            .metrics
            .get_mut(metric_key)
            .ok_or_else(|| AgentError::Config(format!("invalid metric key [{metric_key}]")))?;
        metric.set_value_f64(slot, value);
        Ok(())
    }

    pub fn value_f64(&self, metric_key: &str, instance_key: &str) -> Option<f64> {
        let slot = self.instances.get(instance_key)?.slot();
        self.metrics.get(metric_key)?.value_f64(slot)
    }

    /// Copy of this matrix with the requested subsets. Cell data is only
    /// carried when metrics and instances both come along.
    pub fn clone_with(&self, with_data: bool, with_metrics: bool, with_instances: bool) -> Matrix {
        let mut out = Matrix::new(&self.object);
        out.global_labels = self.global_labels.clone();
        out.export_options = self.export_options.clone();

        if with_instances {
            out.instances = self.instances.clone();
            out.instance_order = self.instance_order.clone();
            out.next_slot = self.next_slot;
        }

        if with_metrics {
            for key in &self.metric_order {
                let mut metric = self.metrics.get(key).unwrap().clone();
                if !with_instances {
                    metric.truncate();
                } else if !with_data {
                    metric.reset();
                }
                out.metric_order.push(key.clone());
                out.metrics.insert(key.clone(), metric);
            }
        }

        out
    }
}
