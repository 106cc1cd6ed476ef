//! Shared test helpers: a scripted connection and response builders.

#![allow(dead_code)]

use async_trait::async_trait;
use ontap_agent::error::{AgentError, Result};
use ontap_agent::ontap::{Connection, Node};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Connection that replays canned responses in order and records every
/// request it sees.
pub struct MockConnection {
    clustered: bool,
    replies: Mutex<VecDeque<Result<Node>>>,
    requests: Mutex<Vec<Node>>,
}

impl MockConnection {
    pub fn new(clustered: bool) -> Arc<Self> {
        Arc::new(MockConnection {
            clustered,
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, response: Node) {
        self.replies.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_err(&self, error: AgentError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<Node> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Node {
        self.requests.lock().unwrap().last().cloned().expect("no request recorded")
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn invoke(&self, request: &Node) -> Result<Node> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::InvalidResponse("no scripted reply".into())))
    }

    fn is_clustered(&self) -> bool {
        self.clustered
    }
}

/// A `counter-info` element for a `perf-object-counter-list-info` reply.
pub fn counter_info(name: &str, properties: &str) -> Node {
    let mut counter = Node::new("counter-info");
    counter.new_child("name", name);
    counter.new_child("properties", properties);
    counter
}

/// Wrap counter elements into a catalog reply.
pub fn counter_catalog(counters: Vec<Node>) -> Node {
    let mut results = Node::new("results");
    let list = results.new_child("counters", "");
    for counter in counters {
        list.add_child(counter);
    }
    results
}

/// An instance inventory reply; `attr` is the list element name and each
/// entry becomes a child with the given (field, value) pairs.
pub fn instance_list(attr: &str, entries: &[&[(&str, &str)]]) -> Node {
    let mut results = Node::new("results");
    let list = results.new_child(attr, "");
    for fields in entries {
        let entry = list.new_child("instance-info", "");
        for (field, value) in *fields {
            entry.new_child(field, value);
        }
    }
    results
}

/// An `instance-data` element for a `perf-object-get-instances` reply.
pub fn perf_instance(key_field: &str, key: &str, counters: &[(&str, &str)]) -> Node {
    let mut instance = Node::new("instance-data");
    instance.new_child(key_field, key);
    let list = instance.new_child("counters", "");
    for (name, value) in counters {
        let data = list.new_child("counter-data", "");
        data.new_child("name", name);
        data.new_child("value", value);
    }
    instance
}

pub fn perf_data(instances: Vec<Node>) -> Node {
    let mut results = Node::new("results");
    let list = results.new_child("instances", "");
    for instance in instances {
        list.add_child(instance);
    }
    results
}

/// Clock that replays a fixed sequence of timestamps, holding the last
/// one once exhausted.
pub fn scripted_clock(times: Vec<f64>) -> Box<dyn Fn() -> f64 + Send + Sync> {
    let index = std::sync::atomic::AtomicUsize::new(0);
    Box::new(move || {
        let i = index.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        times[i.min(times.len() - 1)]
    })
}
