use auctioneer::*;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeSet;
use std::time::Duration;

fn tags(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[test]
fn test_resource_is_empty() {
    assert!(Resource::default().is_empty());
    assert!(!Resource::new(128, 0, "").is_empty());
    assert!(!Resource::new(0, 512, "").is_empty());
    assert!(!Resource::new(0, 0, "preloaded:cflinuxfs3").is_empty());
}

#[test]
fn test_parse_tags_trims_and_drops_empty() {
    assert_eq!(parse_tags("default, gpu ,,ssd"), tags(&["default", "gpu", "ssd"]));
    assert!(parse_tags("").is_empty());
    assert!(parse_tags(" , ").is_empty());
}

#[test]
fn test_lrp_decodes_with_missing_fields() {
    let lrp: LrpStartRequest = serde_json::from_str(r#"{"process_guid":"pg-1"}"#).unwrap();
    assert_eq!(lrp.process_guid, "pg-1");
    assert!(lrp.domain.is_empty());
    assert!(lrp.indices.is_empty());
    assert!(lrp.resource.is_empty());
    assert!(lrp.tags.is_empty());
}

#[test]
fn test_lrp_decodes_nested_resource() {
    let lrp: LrpStartRequest = serde_json::from_str(
        r#"{
            "process_guid": "pg-1",
            "domain": "cf-apps",
            "indices": [0, 1],
            "resource": {"memory_mb": 256, "disk_mb": 1024, "root_fs": "preloaded:cflinuxfs3"},
            "tags": ["gpu"]
        }"#,
    )
    .unwrap();

    assert_eq!(lrp.indices, vec![0, 1]);
    assert_eq!(lrp.resource, Resource::new(256, 1024, "preloaded:cflinuxfs3"));
    assert_eq!(lrp.tags, tags(&["gpu"]));
}

#[test]
fn test_brain_tags_merge_environment() {
    let mut lrp = LrpStartRequest::new("pg-1", "cf-apps", vec![0], Resource::new(128, 0, ""))
        .with_tags(["gpu"]);
    lrp.environment_variables.push(EnvironmentVariable {
        name: BRAIN_TAG_ENV.to_string(),
        value: "ssd, windows".to_string(),
    });
    lrp.environment_variables.push(EnvironmentVariable {
        name: "OTHER".to_string(),
        value: "ignored".to_string(),
    });

    assert_eq!(lrp.brain_tags(), tags(&["gpu", "ssd", "windows"]));
    assert_eq!(lrp.tags, tags(&["gpu"]));
}

#[test]
fn test_task_brain_tags_without_env() {
    let task = TaskStartRequest::new("tg-1", "cf-tasks", Resource::new(64, 64, "")).with_tags(["a", "b"]);
    assert_eq!(task.brain_tags(), tags(&["a", "b"]));
}

#[test]
fn test_brain_is_default() {
    let brain = Brain {
        name: "b1".to_string(),
        url: "http://b1".to_string(),
        tags: tags(&["default", "gpu"]),
    };
    assert!(brain.is_default());

    let tagged = Brain {
        tags: tags(&["gpu"]),
        ..brain
    };
    assert!(!tagged.is_default());
}

#[test]
fn test_lock_record_expiry() {
    let now = Utc::now();
    let record = LockRecord {
        holder_id: "a".to_string(),
        address: "http://a:9016".to_string(),
        expires_at: now + ChronoDuration::seconds(5),
    };

    assert!(!record.is_expired_at(now));
    assert!(record.is_expired_at(now + ChronoDuration::seconds(5)));
    assert!(record.is_expired_at(now + ChronoDuration::seconds(6)));
}

#[test]
fn test_lock_lease_ttl_serialized_as_millis() {
    let lease = LockLease::new("a", "http://a:9016", Duration::from_millis(1500));
    let json = serde_json::to_value(&lease).unwrap();
    assert_eq!(json["ttl"], 1500);

    let back: LockLease = serde_json::from_value(json).unwrap();
    assert_eq!(back, lease);
}

#[test]
fn test_auction_request_is_empty() {
    let mut request = AuctionRequest::default();
    assert!(request.is_empty());

    request.cells.push(CellPresence::default());
    assert!(request.is_empty());

    request.tasks.push(TaskStartRequest::new("tg-1", "d", Resource::new(1, 1, "")));
    assert!(!request.is_empty());
}

#[test]
fn test_lifecycle_state_is_active() {
    assert!(LifecycleState::Active.is_active());
    for state in [
        LifecycleState::Starting,
        LifecycleState::AcquiringLock,
        LifecycleState::LockLost,
        LifecycleState::ShuttingDown,
        LifecycleState::Terminated,
    ] {
        assert!(!state.is_active());
    }
}
