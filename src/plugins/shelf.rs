//! Shelf environment plugin.
//!
//! Flattens the nested sub-objects of each disk shelf (power supplies,
//! fans, temperature sensors, ...) into one matrix per sub-object. The
//! template decides which attributes to walk and which leaves become
//! metrics, labels, or the instance key.

use crate::config::{parse_rename, ShelfTemplate};
use crate::error::{AgentError, Result};
use crate::matrix::{ExportOptions, Matrix};
use crate::ontap::{Connection, Node};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ShelfPlugin {
    client: Arc<dyn Connection>,
    query: &'static str,
    /// attribute element name -> matrix for that sub-object
    data: BTreeMap<String, Matrix>,
    /// attribute -> leaf name that keys instances
    instance_keys: HashMap<String, String>,
    /// attribute -> (leaf name -> display label)
    instance_labels: HashMap<String, HashMap<String, String>>,
}

impl std::fmt::Debug for ShelfPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShelfPlugin")
            .field("query", &self.query)
            .field("data", &self.data)
            .field("instance_keys", &self.instance_keys)
            .field("instance_labels", &self.instance_labels)
            .finish()
    }
}

impl ShelfPlugin {
    pub fn new(
        client: Arc<dyn Connection>,
        template: &ShelfTemplate,
        datacenter: &str,
        cluster: &str,
    ) -> Result<Self> {
        let query = if client.is_clustered() {
            "storage-shelf-info-get-iter"
        } else {
            "storage-shelf-environment-list-info"
        };

        if template.objects.is_empty() {
            return Err(AgentError::MissingParam("objects".to_string()));
        }

        let mut data = BTreeMap::new();
        let mut instance_keys = HashMap::new();
        let mut instance_labels: HashMap<String, HashMap<String, String>> = HashMap::new();

        for (spec, leaves) in &template.objects {
            let (attribute, object_name) = match spec.split_once("=>") {
                Some((a, b)) => (a.trim().to_string(), b.trim().to_string()),
                None => (spec.clone(), spec.replace('-', "_")),
            };

            let mut matrix = Matrix::new(&format!("shelf_{object_name}"));
            matrix.set_global_label("datacenter", datacenter);
            matrix.set_global_label("cluster", cluster);

            let mut export = ExportOptions::default();
            export.instance_keys.push("shelf".to_string());
            let mut labels: HashMap<String, String> = HashMap::new();

            for leaf in leaves {
                let spec = leaf.trim_start_matches('^');
                let (name, display_name) = parse_rename(spec);
                let display_name = if name == display_name {
                    name.replace('-', "_")
                } else {
                    display_name.to_string()
                };

                if let Some(stripped) = leaf.strip_prefix("^^") {
                    let (name, _) = parse_rename(stripped);
                    instance_keys.insert(attribute.clone(), name.to_string());
                    labels.insert(name.to_string(), display_name.clone());
                    export.instance_keys.push(display_name.clone());
                    debug!(object = %attribute, key = %display_name, "added instance key");
                } else if leaf.starts_with('^') {
                    labels.insert(name.to_string(), display_name.clone());
                    export.instance_labels.push(display_name.clone());
                    debug!(object = %attribute, label = %display_name, "added instance label");
                } else {
                    let metric = matrix.new_metric_f64(name)?;
                    metric.set_name(&display_name);
                    debug!(object = %attribute, metric = %display_name, "added metric");
                }
            }

            matrix.set_export_options(export);
            debug!(
                object = %attribute,
                metrics = matrix.metric_count(),
                "initialized sub-object matrix"
            );
            instance_labels.insert(attribute.clone(), labels);
            data.insert(attribute, matrix);
        }

        Ok(ShelfPlugin {
            client,
            query,
            data,
            instance_keys,
            instance_labels,
        })
    }

    pub async fn run(&mut self, parent: &mut Matrix) -> Result<Vec<Matrix>> {
        // 7-mode has no shelf name; reuse the id
        if !self.client.is_clustered() {
            for key in parent.instance_keys() {
                if let Some(instance) = parent.instance_mut(&key) {
                    let id = instance.label("shelf_id").unwrap_or_default().to_string();
                    instance.set_label("shelf", &id);
                }
            }
        }

        let request = Node::new(self.query);
        let result = self.client.invoke(&request).await?;

        let shelves: Vec<&Node> = match result.child("attributes-list") {
            Some(list) => list.children().iter().collect(),
            None if !self.client.is_clustered() => result.search_children(&[
                "shelf-environ-channel-info",
                "shelf-environ-shelf-list",
                "shelf-environ-shelf-info",
            ]),
            None => Vec::new(),
        };

        if shelves.is_empty() {
            return Err(AgentError::NoInstances);
        }

        debug!(shelves = shelves.len(), "fetching shelf counters");

        for data in self.data.values_mut() {
            data.purge_instances();
        }

        let clustered = self.client.is_clustered();

        // first pass creates instances and labels
        for shelf in &shelves {
            let (shelf_name, shelf_id) = shelf_identity(shelf, clustered);

            for (attribute, data) in self.data.iter_mut() {
                let Some(key_name) = self.instance_keys.get(attribute) else {
                    warn!(object = %attribute, "no instance key defined, skipping");
                    continue;
                };
                let Some(object_elem) = shelf.child(attribute) else {
                    warn!(object = %attribute, "no instances on this system");
                    continue;
                };

                debug!(
                    object = %attribute,
                    instances = object_elem.children().len(),
                    "fetching sub-object instances"
                );

                for obj in object_elem.children() {
                    let Some(key) = obj.child_content(key_name) else {
                        debug!(object = %attribute, "instance without key, skipping");
                        continue;
                    };
                    let instance = data.new_instance(&format!("{shelf_id}.{key}"))?;
                    for (label, display_name) in &self.instance_labels[attribute] {
                        if let Some(value) = obj.child_content(label) {
                            instance.set_label(display_name, value);
                        }
                    }
                    instance.set_label("shelf", shelf_name);
                    instance.set_label("shelf_id", shelf_id);
                }
            }
        }

        // second pass populates numeric cells
        for shelf in &shelves {
            let (_, shelf_id) = shelf_identity(shelf, clustered);

            for (attribute, data) in self.data.iter_mut() {
                let Some(key_name) = self.instance_keys.get(attribute) else {
                    continue;
                };
                let Some(object_elem) = shelf.child(attribute) else {
                    continue;
                };

                for obj in object_elem.children() {
                    let Some(key) = obj.child_content(key_name) else {
                        continue;
                    };
                    let Some(slot) = data
                        .instance(&format!("{shelf_id}.{key}"))
                        .map(|i| i.slot())
                    else {
                        debug!(object = %attribute, instance = %key, "instance not found in cache");
                        continue;
                    };

                    for metric_key in data.metric_keys() {
                        let content = obj.child_content(&metric_key).unwrap_or_default();
                        // values may carry a unit suffix; only the first
                        // token is numeric
                        let Some(value) = content.split_whitespace().next() else {
                            continue;
                        };
                        let metric = data.metric_mut(&metric_key).unwrap();
                        if let Err(e) = metric.set_value_string(slot, value) {
                            debug!(metric = %metric_key, value = %value, "failed to parse: {e}");
                        }
                    }
                }
            }
        }

        Ok(self.data.values().cloned().collect())
    }
}

fn shelf_identity(shelf: &Node, clustered: bool) -> (&str, &str) {
    if clustered {
        (
            shelf.child_content("shelf").unwrap_or_default(),
            shelf.child_content("shelf-uid").unwrap_or_default(),
        )
    } else {
        let id = shelf.child_content("shelf-id").unwrap_or_default();
        (id, id)
    }
}
