//! Instance cache reconciliation against the controller inventory.

mod common;

use common::*;
use ontap_agent::collectors::ZapiPerf;
use ontap_agent::config::Template;
use ontap_agent::error::AgentError;
use ontap_agent::ontap::Node;
use std::collections::BTreeMap;

fn template(query: &str, instance_key: &str) -> Template {
    Template {
        object: "volume".to_string(),
        query: query.to_string(),
        counters: vec!["read_ops".to_string()],
        instance_key: instance_key.to_string(),
        batch_size: 500,
        latency_io_reqd: 10.0,
        overrides: BTreeMap::new(),
        resource_map: BTreeMap::new(),
        qos_labels: Vec::new(),
    }
}

#[tokio::test]
async fn clustered_inventory_follows_pagination() {
    let mock = MockConnection::new(true);
    let mut collector = ZapiPerf::new(mock.clone(), template("volume", "uuid")).unwrap();

    let mut page1 = instance_list("attributes-list", &[&[("uuid", "a")]]);
    page1.new_child("next-tag", "page-2");
    mock.push(page1);
    mock.push(instance_list("attributes-list", &[&[("uuid", "b")]]));

    collector.poll_instance().await.unwrap();

    assert_eq!(collector.matrix().instance_keys(), vec!["a", "b"]);

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].name(), "perf-object-instance-list-info-iter");
    assert_eq!(requests[0].child_content("max-records"), Some("500"));
    // follow-up request carries the controller's tag back
    assert_eq!(requests[1].child_content("tag"), Some("page-2"));
}

#[tokio::test]
async fn vanished_instances_are_removed() {
    let mock = MockConnection::new(true);
    let mut collector = ZapiPerf::new(mock.clone(), template("volume", "uuid")).unwrap();

    mock.push(instance_list("attributes-list", &[&[("uuid", "a")], &[("uuid", "b")]]));
    collector.poll_instance().await.unwrap();
    assert_eq!(collector.matrix().instance_count(), 2);

    mock.push(instance_list("attributes-list", &[&[("uuid", "a")]]));
    collector.poll_instance().await.unwrap();

    assert_eq!(collector.matrix().instance_keys(), vec!["a"]);
}

#[tokio::test]
async fn empty_inventory_is_no_instances() {
    let mock = MockConnection::new(true);
    let mut collector = ZapiPerf::new(mock.clone(), template("volume", "uuid")).unwrap();

    mock.push(Node::new("results"));
    assert!(matches!(
        collector.poll_instance().await.unwrap_err(),
        AgentError::NoInstances
    ));
}

#[tokio::test]
async fn entries_without_key_are_skipped() {
    let mock = MockConnection::new(true);
    let mut collector = ZapiPerf::new(mock.clone(), template("volume", "uuid")).unwrap();

    mock.push(instance_list(
        "attributes-list",
        &[&[("name", "keyless")], &[("uuid", "a")]],
    ));
    collector.poll_instance().await.unwrap();

    assert_eq!(collector.matrix().instance_keys(), vec!["a"]);
}

#[tokio::test]
async fn seven_mode_uses_single_shot_query() {
    let mock = MockConnection::new(false);
    let mut collector = ZapiPerf::new(mock.clone(), template("volume", "name")).unwrap();

    mock.push(instance_list("instances", &[&[("name", "vol0")]]));
    collector.poll_instance().await.unwrap();

    assert_eq!(collector.matrix().instance_keys(), vec!["vol0"]);
    let request = mock.last_request();
    assert_eq!(request.name(), "perf-object-instance-list-info");
    assert!(request.child("max-records").is_none());
}

#[tokio::test]
async fn workload_inventory_copies_qos_labels() {
    let mock = MockConnection::new(true);
    let mut t = template("workload", "uuid");
    t.counters = vec!["ops".to_string()];
    t.qos_labels = vec!["policy-group=>policy_group".to_string(), "vserver".to_string()];
    let mut collector = ZapiPerf::new(mock.clone(), t).unwrap();

    mock.push(counter_catalog(vec![counter_info("ops", "rate")]));
    collector.poll_counter().await.unwrap();

    let mut inventory = Node::new("results");
    let list = inventory.new_child("attributes-list", "");
    let info = list.new_child("qos-workload-info", "");
    info.new_child("workload-uuid", "w1");
    info.new_child("workload-name", "gold");
    info.new_child("policy-group", "gold-policy");
    info.new_child("vserver", "svm1");
    mock.push(inventory);
    collector.poll_instance().await.unwrap();

    let request = mock.last_request();
    assert_eq!(request.name(), "qos-workload-get-iter");
    let class = request
        .child("query")
        .and_then(|q| q.child("qos-workload-info"))
        .and_then(|i| i.child_content("workload-class"));
    assert_eq!(class, Some("user-defined"));

    let instance = collector.matrix().instance("w1").unwrap();
    assert_eq!(instance.label("policy_group"), Some("gold-policy"));
    assert_eq!(instance.label("vserver"), Some("svm1"));
}

#[tokio::test]
async fn workload_volume_queries_autovolume_class() {
    let mock = MockConnection::new(true);
    let mut t = template("workload_volume", "name");
    t.qos_labels = vec!["vserver".to_string()];
    let mut collector = ZapiPerf::new(mock.clone(), t).unwrap();

    mock.push(counter_catalog(vec![counter_info("read_ops", "rate")]));
    collector.poll_counter().await.unwrap();

    let mut inventory = Node::new("results");
    let list = inventory.new_child("attributes-list", "");
    list.new_child("qos-workload-info", "")
        .new_child("workload-name", "vol0-wid");
    mock.push(inventory);
    collector.poll_instance().await.unwrap();

    let request = mock.last_request();
    let class = request
        .child("query")
        .and_then(|q| q.child("qos-workload-info"))
        .and_then(|i| i.child_content("workload-class"));
    assert_eq!(class, Some("autovolume"));
    assert_eq!(collector.matrix().instance_keys(), vec!["vol0-wid"]);
}

#[tokio::test]
async fn retained_instances_keep_their_labels() {
    let mock = MockConnection::new(true);
    let mut t = template("workload", "uuid");
    t.counters = vec!["ops".to_string()];
    t.qos_labels = vec!["vserver".to_string()];
    let mut collector = ZapiPerf::new(mock.clone(), t).unwrap();

    mock.push(counter_catalog(vec![counter_info("ops", "rate")]));
    collector.poll_counter().await.unwrap();

    let inventory = || {
        let mut results = Node::new("results");
        let list = results.new_child("attributes-list", "");
        let info = list.new_child("qos-workload-info", "");
        info.new_child("workload-uuid", "w1");
        info.new_child("vserver", "svm1");
        results
    };
    mock.push(inventory());
    collector.poll_instance().await.unwrap();
    mock.push(inventory());
    collector.poll_instance().await.unwrap();

    assert_eq!(collector.matrix().instance_count(), 1);
    assert_eq!(
        collector.matrix().instance("w1").unwrap().label("vserver"),
        Some("svm1")
    );
}
