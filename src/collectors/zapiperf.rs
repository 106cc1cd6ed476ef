//! Perf counter collector.
//!
//! Collects cumulative performance counters from an ONTAP controller and
//! turns them into rate/average/percent metrics. The collector keeps three
//! pieces of state between polls: the counter-metadata cache (which
//! catalog counters map to which matrix metrics), the instance cache
//! (which entities exist), and the baseline matrix (the previous poll's
//! raw counter values, used for delta arithmetic).
//!
//! The three poll operations are driven externally on separate cadences:
//! [`ZapiPerf::poll_counter`] infrequently, [`ZapiPerf::poll_instance`] on
//! a medium cadence, [`ZapiPerf::poll_data`] frequently.

use crate::config::Template;
use crate::error::{AgentError, Result};
use crate::matrix::{Matrix, Property};
use crate::ontap::{Connection, Node};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Floor below which batch size is never reduced.
const MIN_BATCH_SIZE: usize = 100;

pub struct ZapiPerf {
    client: Arc<dyn Connection>,
    template: Template,
    object: String,
    matrix: Matrix,
    /// Raw counter name -> display label, for counters of string type.
    instance_labels: HashMap<String, String>,
    /// Array counter name -> expanded element labels, for the decoder.
    array_labels: HashMap<String, Vec<String>>,
    /// QoS inventory attribute -> display label (workload queries).
    qos_labels: HashMap<String, String>,
    batch_size: usize,
    latency_io_reqd: f64,
    instance_key: String,
    cache_empty: bool,
    clock: Box<dyn Fn() -> f64 + Send + Sync>,
}

impl ZapiPerf {
    pub fn new(client: Arc<dyn Connection>, template: Template) -> Result<Self> {
        if template.object.is_empty() {
            return Err(AgentError::MissingParam("object".to_string()));
        }
        if template.query.is_empty() {
            return Err(AgentError::MissingParam("query".to_string()));
        }

        let object = template.object.clone();
        let matrix = Matrix::new(&object);
        let batch_size = template.batch_size;
        let latency_io_reqd = template.latency_io_reqd;
        let instance_key = template.instance_key.clone();

        Ok(ZapiPerf {
            client,
            template,
            object,
            matrix,
            instance_labels: HashMap::new(),
            array_labels: HashMap::new(),
            qos_labels: HashMap::new(),
            batch_size,
            latency_io_reqd,
            instance_key,
            cache_empty: true,
            clock: Box::new(wall_clock_seconds),
        })
    }

    pub fn matrix(&self) -> &Matrix {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut Matrix {
        &mut self.matrix
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn set_global_label(&mut self, name: &str, value: &str) {
        self.matrix.set_global_label(name, value);
    }

    /// Replace the time source. Collection stamps each instance with this
    /// clock's seconds; rates are normalized by its deltas.
    pub fn set_clock(&mut self, clock: Box<dyn Fn() -> f64 + Send + Sync>) {
        self.clock = clock;
    }

    fn is_workload(&self) -> bool {
        matches!(
            self.template.query.as_str(),
            "workload" | "workload_detail" | "workload_volume" | "workload_detail_volume"
        )
    }

    fn is_workload_detail(&self) -> bool {
        matches!(
            self.template.query.as_str(),
            "workload_detail" | "workload_detail_volume"
        )
    }

    fn is_workload_volume(&self) -> bool {
        matches!(
            self.template.query.as_str(),
            "workload_volume" | "workload_detail_volume"
        )
    }

    // --- counter metadata cache ---

    /// Synchronize the matrix's metric schema with the template and the
    /// controller's counter catalog.
    pub async fn poll_counter(&mut self) -> Result<()> {
        let mut old_metrics: HashSet<String> = self.matrix.metric_keys().into_iter().collect();
        let mut old_labels: HashSet<String> = self.instance_labels.keys().cloned().collect();
        let old_metrics_size = old_metrics.len();
        let old_labels_size = old_labels.len();

        if self.template.counters.is_empty() {
            return Err(AgentError::MissingParam("counters".to_string()));
        }

        // counters requested by the template: raw name -> display name
        let mut wanted: HashMap<String, String> = HashMap::new();
        for spec in &self.template.counters {
            if let Some((source, display_name)) = spec.split_once("=>") {
                wanted.insert(source.trim().to_string(), display_name.trim().to_string());
            } else if spec == "instance_name" {
                wanted.insert(spec.clone(), self.object.clone());
            } else {
                wanted.insert(spec.clone(), default_display(spec, &self.object));
            }
        }

        debug!(
            object = %self.object,
            metrics = old_metrics.len(),
            labels = old_labels.len(),
            "updating metric cache"
        );

        let mut request = Node::new("perf-object-counter-list-info");
        request.new_child("objectname", &self.template.query);
        let response = self.client.invoke(&request).await?;

        let mut catalog: BTreeMap<String, Node> = BTreeMap::new();
        if let Some(elems) = response.child("counters") {
            for counter in elems.children() {
                if let Some(name) = counter.child_content("name") {
                    catalog.insert(name.to_string(), counter.clone());
                }
            }
        }
        if catalog.is_empty() {
            return Err(AgentError::NoMetrics("no counters in response".to_string()));
        }

        // apply per-counter property overrides before any pass reads them
        for (key, counter) in catalog.iter_mut() {
            if let Some(p) = self.template.overrides.get(key) {
                debug!(counter = %key, property = %p, "override counter properties");
                counter.set_child_content("properties", p);
            }
        }

        let mut replaced: HashSet<String> = HashSet::new();
        let mut missing: HashSet<String> = HashSet::new();

        for (key, counter) in &catalog {
            let Some(display_name) = wanted.get(key) else {
                continue;
            };

            // deprecated counters are dropped; their replacement is
            // picked up in the second pass
            if counter.child_content("is-deprecated") == Some("true") {
                match counter.child_content("replaced-by") {
                    Some(r) => {
                        info!(counter = %key, replacement = %r, "replaced deprecated counter");
                        if !wanted.contains_key(r) {
                            replaced.insert(r.to_string());
                        }
                    }
                    None => info!(counter = %key, "skip deprecated counter"),
                }
                continue;
            }

            let properties = counter.child_content("properties").unwrap_or_default();
            if properties.contains("string") {
                old_labels.remove(key);
                let display_name = if key == "instance_name" && display_name.is_empty() {
                    self.object.clone()
                } else {
                    display_name.clone()
                };
                debug!(counter = %key, label = %display_name, "added as instance label");
                self.instance_labels.insert(key.clone(), display_name);
            } else {
                old_metrics.remove(key);
                if let Some(base) = self.add_counter(counter, key, display_name, true, &catalog) {
                    if !base.is_empty() && !wanted.contains_key(&base) {
                        debug!(counter = %key, base = %base, "required base counter not in template");
                        missing.insert(base);
                    }
                }
            }
        }

        // second pass: replacements for deprecated counters
        for (name, counter) in &catalog {
            if replaced.contains(name) {
                old_metrics.remove(name);
                debug!(counter = %name, "adding replacement for deprecated counter");
                if let Some(base) = self.add_counter(counter, name, name, true, &catalog) {
                    if !base.is_empty() && !wanted.contains_key(&base) {
                        missing.insert(base);
                    }
                }
            }
        }

        // third pass: required base counters, hidden from export
        for (name, counter) in &catalog {
            if missing.contains(name) {
                old_metrics.remove(name);
                debug!(counter = %name, "adding missing base counter");
                self.add_counter(counter, name, "", false, &catalog);
            }
        }

        // Each instance carries its own collection timestamp, since
        // instances may arrive in different batches.
        if !old_metrics.contains("timestamp") && self.matrix.metric("timestamp").is_none() {
            let m = self.matrix.new_metric_f64("timestamp")?;
            m.set_property(Property::Raw);
            m.set_exportable(false);
        }

        if self.is_workload() {
            if self.is_workload_detail() {
                self.add_resource_latency_metrics(&mut old_metrics)?;
            }

            if self.template.qos_labels.is_empty() {
                return Err(AgentError::MissingParam("qos_labels".to_string()));
            }
            self.qos_labels.clear();
            for spec in &self.template.qos_labels {
                match spec.split_once("=>") {
                    Some((label, display_name)) => {
                        self.qos_labels
                            .insert(label.trim().to_string(), display_name.trim().to_string());
                    }
                    None => {
                        self.qos_labels
                            .insert(spec.clone(), spec.replace('-', "_"));
                    }
                }
            }
        }

        // drop metrics and labels the catalog no longer backs; array
        // elements (keys containing '.') are managed by their parent name
        for key in &old_metrics {
            if key != "timestamp" && !key.contains('.') {
                self.matrix.remove_metric(key);
                debug!(metric = %key, "removed metric");
            }
        }
        for key in &old_labels {
            self.instance_labels.remove(key);
            debug!(label = %key, "removed label");
        }

        let metrics_added =
            self.matrix.metric_count() + old_metrics.len() - old_metrics_size;
        let labels_added = self.instance_labels.len() + old_labels.len() - old_labels_size;
        info!(
            object = %self.object,
            added = metrics_added,
            removed = old_metrics.len(),
            total = self.matrix.metric_count(),
            "metric cache updated"
        );
        debug!(
            added = labels_added,
            removed = old_labels.len(),
            total = self.instance_labels.len(),
            "label cache updated"
        );

        if self.matrix.metric_count() == 0 {
            return Err(AgentError::NoMetrics("no usable metrics".to_string()));
        }

        Ok(())
    }

    /// Per-resource latency metrics for workload_detail: one metric per
    /// `resource_map` layer, accumulating `service_time`/`wait_time` and
    /// inheriting the base ops counter from whichever of the two exists.
    fn add_resource_latency_metrics(&mut self, old_metrics: &mut HashSet<String>) -> Result<()> {
        old_metrics.remove("service_time");
        old_metrics.remove("wait_time");

        let base_key = if self.matrix.metric("service_time").is_some() {
            "service_time"
        } else if self.matrix.metric("wait_time").is_some() {
            "wait_time"
        } else {
            return Err(AgentError::MissingParam(
                "counter service_time or wait_time".to_string(),
            ));
        };
        let (base_property, base_comment, base_exportable) = {
            let base = self.matrix.metric(base_key).unwrap();
            (
                base.property(),
                base.comment().to_string(),
                base.is_exportable(),
            )
        };

        if self.template.resource_map.is_empty() {
            return Err(AgentError::MissingParam("resource_map".to_string()));
        }

        let resource_map = self.template.resource_map.clone();
        for (layer, resource) in &resource_map {
            if self.matrix.metric(layer).is_none() {
                self.matrix.new_metric_f64(layer)?;
            }
            let m = self.matrix.metric_mut(layer).unwrap();
            m.set_name(&format!("latency_from_{resource}"));
            m.set_property(base_property);
            m.set_comment(&base_comment);
            m.set_exportable(base_exportable);
            old_metrics.remove(layer);
        }
        Ok(())
    }

    /// Register one catalog counter in the matrix: a single metric for
    /// scalars, one metric per expanded label for arrays. Returns the
    /// counter's declared base-counter name.
    fn add_counter(
        &mut self,
        counter: &Node,
        name: &str,
        display_name: &str,
        enabled: bool,
        catalog: &BTreeMap<String, Node>,
    ) -> Option<String> {
        let properties = counter.child_content("properties").unwrap_or_default();
        let Some(property) = Property::from_catalog(properties) else {
            warn!(counter = %name, properties = %properties, "skip counter with unknown property");
            return None;
        };

        let base_counter = counter
            .child_content("base-counter")
            .unwrap_or_default()
            .to_string();
        let unit = counter.child_content("unit").unwrap_or_default().to_string();

        let display_name = if display_name.is_empty() {
            default_display(name, &self.object)
        } else {
            display_name.to_string()
        };

        debug!(counter = %name, property = property.as_str(), unit = %unit, "handling counter");

        if counter.child_content("type") == Some("array") {
            let labels = match parse_array_labels(counter) {
                Ok(labels) => labels,
                Err(msg) => {
                    warn!(counter = %name, "skipping array counter: {msg}");
                    return None;
                }
            };

            let mut base_labels: Vec<String> = Vec::new();
            if !base_counter.is_empty() {
                match catalog.get(&base_counter) {
                    Some(base) if base.child_content("type") == Some("array") => {
                        base_labels = match parse_array_labels(base) {
                            Ok(labels) => labels,
                            Err(msg) => {
                                warn!(counter = %name, base = %base_counter,
                                      "skipping, base counter is array but {msg}");
                                return None;
                            }
                        };
                        if base_labels.len() != labels.len() {
                            warn!(counter = %name, base = %base_counter,
                                  "skipping, array labels don't match base counter labels");
                            return None;
                        }
                    }
                    Some(_) => {}
                    None => {
                        warn!(counter = %name, base = %base_counter, "skipping, base counter not found");
                        return None;
                    }
                }
            }

            for label in &labels {
                let key = format!("{name}.{label}");
                let base_key = if !base_counter.is_empty() && !base_labels.is_empty() {
                    format!("{}.{}", base_counter, base_labels[0])
                } else {
                    base_counter.clone()
                };

                if self.matrix.metric(&key).is_none() {
                    if let Err(e) = self.matrix.new_metric_f64(&key) {
                        error!(metric = %key, "add array metric element: {e}");
                        return None;
                    }
                    debug!(counter = %name, element = %label, "added array metric element");
                }
                let m = self.matrix.metric_mut(&key).unwrap();
                m.set_name(&display_name);
                m.set_property(property);
                m.set_comment(&base_key);
                m.set_exportable(enabled);
                m.set_unit(&unit);
                match label.split_once('.') {
                    Some((a, b)) => {
                        m.set_label("metric", a);
                        m.set_label("submetric", b);
                    }
                    None => m.set_label("metric", label),
                }
            }
            // cache labels only after the counter parsed cleanly
            self.array_labels.insert(name.to_string(), labels);
        } else {
            if self.matrix.metric(name).is_none() {
                if let Err(e) = self.matrix.new_metric_f64(name) {
                    error!(metric = %name, "add scalar metric: {e}");
                    return None;
                }
                debug!(counter = %name, display_name = %display_name, "added scalar metric");
            }
            let m = self.matrix.metric_mut(name).unwrap();
            m.set_name(&display_name);
            m.set_property(property);
            m.set_comment(&base_counter);
            m.set_exportable(enabled);
            m.set_unit(&unit);
        }

        Some(base_counter)
    }

    // --- instance cache ---

    /// Reconcile the matrix's instance set with the controller's current
    /// inventory.
    pub async fn poll_instance(&mut self) -> Result<()> {
        let mut old_instances: HashSet<String> =
            self.matrix.instance_keys().into_iter().collect();
        let old_size = old_instances.len();

        debug!(object = %self.object, cached = old_size, "updating instance cache");

        let mut request;
        let instances_attr;
        let key_attr: String;

        if self.is_workload() {
            request = Node::new("qos-workload-get-iter");
            let class = if self.is_workload_volume() {
                "autovolume"
            } else {
                "user-defined"
            };
            request
                .new_child("query", "")
                .new_child("qos-workload-info", "")
                .new_child("workload-class", class);
            instances_attr = "attributes-list";
            key_attr = if self.instance_key == "name" {
                "workload-name".to_string()
            } else {
                "workload-uuid".to_string()
            };
        } else if self.client.is_clustered() {
            request = Node::new("perf-object-instance-list-info-iter");
            request.new_child("objectname", &self.template.query);
            instances_attr = "attributes-list";
            key_attr = self.instance_key.clone();
        } else {
            request = Node::new("perf-object-instance-list-info");
            request.new_child("objectname", &self.template.query);
            instances_attr = "instances";
            key_attr = self.instance_key.clone();
        }

        if self.client.is_clustered() {
            request.new_child("max-records", &self.batch_size.to_string());
        }

        let copy_qos_labels = self.is_workload() && !self.is_workload_detail();

        let mut tag = "initial".to_string();
        loop {
            let (results, next_tag) = self.client.invoke_batch(&request, &tag).await?;
            tag = next_tag;

            let Some(results) = results else {
                break;
            };
            let Some(instances) = results.child(instances_attr) else {
                break;
            };
            if instances.children().is_empty() {
                break;
            }

            for i in instances.children() {
                let key = i.child_content(&key_attr).unwrap_or_default();
                if key.is_empty() {
                    debug!(
                        name = i.child_content("workload-name").or(i.child_content("name")).unwrap_or_default(),
                        "skip instance, missing key"
                    );
                } else if old_instances.remove(key) {
                    debug!(instance = %key, "updated instance");
                } else {
                    match self.matrix.new_instance(key) {
                        Ok(instance) => {
                            if copy_qos_labels {
                                for (label, display_name) in &self.qos_labels {
                                    match i.child_content(label) {
                                        Some(value) => instance.set_label(display_name, value),
                                        None => debug!(instance = %key, label = %display_name, "no QoS label value"),
                                    }
                                }
                            }
                            debug!(instance = %key, "added new instance");
                        }
                        Err(e) => debug!(instance = %key, "add instance: {e}"),
                    }
                }
            }
        }

        for key in &old_instances {
            self.matrix.remove_instance(key);
            debug!(instance = %key, "removed instance");
        }

        let removed = old_instances.len();
        let new_size = self.matrix.instance_count();
        info!(
            object = %self.object,
            added = new_size + removed - old_size,
            removed,
            total = new_size,
            "instance cache updated"
        );

        if new_size == 0 {
            return Err(AgentError::NoInstances);
        }

        Ok(())
    }

    // --- data collection ---

    /// Collect counter values for every cached instance and post-process
    /// them against the previous poll's baseline. Returns `None` (and
    /// retains the new baseline) on the first successful poll, and when a
    /// resource-limit rejection shrank the batch size for a retry.
    pub async fn poll_data(&mut self) -> Result<Option<Matrix>> {
        debug!(object = %self.object, "updating data cache");

        let mut new_data = self.matrix.clone_with(false, true, true);

        if new_data.metric("timestamp").is_none() {
            return Err(AgentError::Config("missing timestamp metric".to_string()));
        }

        // what serves as instance key in the request and the response
        let key_name = if self.instance_key == "name" {
            "instance"
        } else {
            "instance-uuid"
        };

        let instance_keys: Vec<String> = if self.is_workload_detail() {
            if self.template.resource_map.is_empty() {
                return Err(AgentError::MissingParam("resource_map".to_string()));
            }
            let mut keys = Vec::new();
            for layer in self.template.resource_map.keys() {
                for key in self.matrix.instance_keys() {
                    keys.push(format!("{key}.{layer}"));
                }
            }
            keys
        } else {
            new_data.instance_keys()
        };

        let mut request = Node::new("perf-object-get-instances");
        request.new_child("objectname", &self.template.query);

        // requested counters: scalar metrics, array roots, string labels
        let counters = request.new_child("counters", "");
        for (key, metric) in new_data.metrics() {
            if !metric.has_labels() {
                counters.new_child("counter", key);
            }
        }
        for key in self.array_labels.keys() {
            counters.new_child("counter", key);
        }
        for key in self.instance_labels.keys() {
            counters.new_child("counter", key);
        }

        let mut count = 0u64;
        let mut batch_count = 0usize;
        let mut start = 0usize;

        while start < instance_keys.len() {
            let end = (start + self.batch_size).min(instance_keys.len());
            debug!(from = start, to = end, "starting batch poll");

            request.pop_child(&format!("{key_name}s"));
            let request_instances = request.new_child(&format!("{key_name}s"), "");
            for key in &instance_keys[start..end] {
                request_instances.new_child(key_name, key);
            }
            start = end;

            let response = match self.client.invoke(&request).await {
                Ok(response) => response,
                Err(e) if e.is_resource_limit() && self.batch_size > MIN_BATCH_SIZE => {
                    error!("{e}");
                    error!(
                        old = self.batch_size,
                        new = self.batch_size - 100,
                        "reduced batch_size to avoid resource limit"
                    );
                    self.batch_size -= 100;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            batch_count += 1;

            let Some(instances) = response.child("instances") else {
                warn!("no instances in batch response");
                break;
            };
            if instances.children().is_empty() {
                warn!("no instances in batch response");
                break;
            }

            debug!(instances = instances.children().len(), "fetched batch");

            // one timestamp per batch; float seconds so the poll
            // interval itself doesn't have to be integral
            let ts = (self.clock)();

            for i in instances.children() {
                let raw_key = i.child_content(&self.instance_key).unwrap_or_default();

                // workload_detail keys come back as <instance>.<layer>
                let (key, layer) = if self.is_workload_detail() {
                    match raw_key.split_once('.') {
                        Some((instance, layer)) if !instance.is_empty() && !layer.is_empty() => {
                            (instance, layer)
                        }
                        _ => {
                            warn!(instance = %raw_key, "instance name has unexpected format");
                            continue;
                        }
                    }
                } else {
                    (raw_key, "")
                };

                if !layer.is_empty() && new_data.metric(layer).is_none() {
                    warn!(layer = %layer, "resource-layer metric missing in cache");
                    continue;
                }

                if key.is_empty() {
                    debug!("skip instance with no key");
                    continue;
                }
                let Some(slot) = new_data.instance(key).map(|i| i.slot()) else {
                    debug!(instance = %key, "skip instance, not found in cache");
                    continue;
                };
                let Some(counter_data) = i.child("counters") else {
                    debug!(instance = %key, "skip instance, no data counters");
                    continue;
                };

                new_data
                    .metric_mut("timestamp")
                    .unwrap()
                    .set_value_f64(slot, ts);

                for cnt in counter_data.children() {
                    let name = cnt.child_content("name").unwrap_or_default();
                    let value = cnt.child_content("value").unwrap_or_default();
                    if name.is_empty() || value.is_empty() {
                        debug!(counter = %name, "skipping incomplete counter");
                        continue;
                    }

                    // a counter is either an instance label (string), an
                    // array to fan out, or a scalar metric
                    if let Some(display_name) = self.instance_labels.get(name) {
                        new_data
                            .instance_mut(key)
                            .unwrap()
                            .set_label(display_name, value);
                        continue;
                    }

                    if let Some(labels) = self.array_labels.get(name) {
                        let values: Vec<&str> = value.split(',').collect();
                        if labels.len() != values.len() {
                            error!(counter = %name, value = %value,
                                   "array labels don't match parsed values");
                            continue;
                        }
                        for (label, v) in labels.iter().zip(values) {
                            let element_key = format!("{name}.{label}");
                            match new_data.metric_mut(&element_key) {
                                Some(metric) => match metric.set_value_string(slot, v) {
                                    Ok(()) => count += 1,
                                    Err(e) => error!(metric = %element_key, "set array value: {e}"),
                                },
                                None => warn!(metric = %element_key, "array element not in cache"),
                            }
                        }
                        continue;
                    }

                    if !layer.is_empty() {
                        // workload_detail: wait/service time accumulate
                        // into the per-layer latency metric
                        if name == "wait_time" || name == "service_time" {
                            match new_data.metric_mut(layer).unwrap().add_value_string(slot, value)
                            {
                                Ok(()) => count += 1,
                                Err(e) => error!(counter = %name, "add resource counter: {e}"),
                            }
                        }
                        continue;
                    }

                    match new_data.metric_mut(name) {
                        Some(metric) => match metric.set_value_string(slot, value) {
                            Ok(()) => count += 1,
                            Err(e) => error!(counter = %name, "set value: {e}"),
                        },
                        None => warn!(counter = %name, value = %value, "counter not found in cache"),
                    }
                }
            }
        }

        info!(
            object = %self.object,
            datapoints = count,
            batches = batch_count,
            "collected data"
        );

        // no baseline to diff against on the very first poll
        if self.cache_empty {
            debug!("skip postprocessing until next poll (previous cache empty)");
            self.matrix = new_data;
            self.cache_empty = false;
            return Ok(None);
        }

        // keep the raw cumulative values as the next poll's baseline;
        // the delta/divide phase below destroys them in new_data
        let cached = new_data.clone_with(true, true, true);

        self.postprocess(&mut new_data)?;

        self.matrix = cached;
        Ok(Some(new_data))
    }

    /// Turn raw cumulative counters in `new_data` into derived metrics,
    /// using `self.matrix` (the previous poll) as baseline.
    fn postprocess(&self, new_data: &mut Matrix) -> Result<()> {
        debug!("starting delta calculations from previous cache");

        // order metrics so that base counters are reduced to deltas
        // before the metrics that divide by them
        let mut ordered: Vec<String> = Vec::new();
        for (key, metric) in new_data.metrics() {
            if metric.comment().is_empty() {
                ordered.push(key.clone());
            }
        }
        for (key, metric) in new_data.metrics() {
            if !metric.comment().is_empty() {
                ordered.push(key.clone());
                // the two-pass ordering only works if bases are flat
                if let Some(base) = new_data.metric(metric.comment()) {
                    if !base.comment().is_empty() {
                        warn!(
                            metric = %key,
                            base = metric.comment(),
                            "base counter itself declares a base, ordering unreliable"
                        );
                    }
                }
            }
        }

        // elapsed seconds per instance; timestamp is raw, so it is not
        // touched by the property dispatch below
        let prev_ts = self
            .matrix
            .metric("timestamp")
            .cloned()
            .ok_or_else(|| AgentError::Config("missing timestamp metric in baseline".to_string()))?;
        new_data.metric_mut("timestamp").unwrap().delta(&prev_ts);
        let timestamp = new_data.metric("timestamp").cloned().unwrap();

        for key in &ordered {
            let property = new_data.metric(key).unwrap().property();

            if matches!(property, Property::Raw | Property::None) {
                continue;
            }

            match self.matrix.metric(key) {
                Some(prev) => {
                    let prev = prev.clone();
                    new_data.metric_mut(key).unwrap().delta(&prev);
                }
                None => {
                    // metric appeared since last poll, nothing to diff
                    new_data.metric_mut(key).unwrap().reset();
                    continue;
                }
            }

            if property == Property::Delta {
                continue;
            }

            if property == Property::Rate {
                new_data.metric_mut(key).unwrap().divide(&timestamp);
                continue;
            }

            // average and percent divide by their base counter's delta
            let comment = new_data.metric(key).unwrap().comment().to_string();
            let Some(base) = new_data.metric(&comment).cloned() else {
                warn!(metric = %key, property = property.as_str(), base = %comment, "base counter missing");
                continue;
            };

            let is_latency = new_data.metric(key).unwrap().name().ends_with("_latency");
            let metric = new_data.metric_mut(key).unwrap();
            if is_latency {
                metric.divide_with_threshold(&base, self.latency_io_reqd);
            } else {
                metric.divide(&base);
            }

            if property == Property::Percent {
                metric.multiply_by_scalar(100.0);
            }
        }

        Ok(())
    }
}

fn wall_clock_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as f64 / 1e9)
        .unwrap_or(0.0)
}

/// Default display name: dashes to underscores, object prefix stripped.
fn default_display(name: &str, object: &str) -> String {
    let display_name = name.replace('-', "_");
    match display_name.strip_prefix(object) {
        Some(rest) => rest.strip_prefix('_').unwrap_or(rest).to_string(),
        None => display_name,
    }
}

/// Expand an array counter's label declaration: 1-D is used as-is, 2-D
/// becomes the cross product `a.b`.
fn parse_array_labels(counter: &Node) -> std::result::Result<Vec<String>, String> {
    let Some(labels_elem) = counter.child("labels") else {
        return Err("array labels missing".to_string());
    };
    match labels_elem.children() {
        [single] => Ok(single
            .content()
            .split(',')
            .map(str::to_string)
            .collect()),
        [first, second] => {
            let a: Vec<&str> = first.content().split(',').collect();
            let b: Vec<&str> = second.content().split(',').collect();
            let mut labels = Vec::with_capacity(a.len() * b.len());
            for x in &a {
                for y in &b {
                    labels.push(format!("{x}.{y}"));
                }
            }
            Ok(labels)
        }
        _ => Err("unexpected dimensions".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strips_object_prefix() {
        assert_eq!(default_display("volume-read-ops", "volume"), "read_ops");
        assert_eq!(default_display("total_ops", "volume"), "total_ops");
    }

    #[test]
    fn array_labels_one_dimension() {
        let mut counter = Node::new("counter");
        counter.new_child("labels", "").new_child("label-info", "a,b,c");
        assert_eq!(parse_array_labels(&counter).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn array_labels_two_dimensions() {
        let mut counter = Node::new("counter");
        let labels = counter.new_child("labels", "");
        labels.new_child("label-info", "R,W");
        labels.new_child("label-info", "4K,8K");
        assert_eq!(
            parse_array_labels(&counter).unwrap(),
            vec!["R.4K", "R.8K", "W.4K", "W.8K"]
        );
    }

    #[test]
    fn array_labels_missing() {
        let counter = Node::new("counter");
        assert!(parse_array_labels(&counter).is_err());
    }
}
