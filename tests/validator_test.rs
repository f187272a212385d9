use auctioneer::error::{IntakeError, ValidationError};
use auctioneer::intake::{decode_lrp_batch, decode_task, Validate};
use auctioneer::*;

fn valid_lrp(guid: &str) -> LrpStartRequest {
    LrpStartRequest::new(guid, "cf-apps", vec![0], Resource::new(256, 1024, "preloaded:cflinuxfs3"))
}

fn valid_task(guid: &str) -> TaskStartRequest {
    TaskStartRequest::new(guid, "cf-tasks", Resource::new(128, 256, ""))
}

#[test]
fn test_valid_lrp_passes() {
    assert!(valid_lrp("pg-1").validate().is_ok());
}

#[test]
fn test_lrp_empty_process_guid() {
    let lrp = valid_lrp("");
    assert_eq!(lrp.validate(), Err(ValidationError::EmptyProcessGuid));
}

#[test]
fn test_lrp_empty_domain() {
    let mut lrp = valid_lrp("pg-1");
    lrp.domain.clear();
    assert_eq!(lrp.validate(), Err(ValidationError::EmptyDomain));
}

#[test]
fn test_lrp_empty_indices() {
    let mut lrp = valid_lrp("pg-1");
    lrp.indices.clear();
    assert_eq!(lrp.validate(), Err(ValidationError::EmptyIndices));
}

#[test]
fn test_lrp_empty_resource() {
    let mut lrp = valid_lrp("pg-1");
    lrp.resource = Resource::default();
    assert_eq!(lrp.validate(), Err(ValidationError::EmptyResource));
}

#[test]
fn test_lrp_first_failure_wins() {
    let lrp = LrpStartRequest::default();
    assert_eq!(lrp.validate(), Err(ValidationError::EmptyProcessGuid));

    let lrp = LrpStartRequest {
        process_guid: "pg-1".to_string(),
        ..Default::default()
    };
    assert_eq!(lrp.validate(), Err(ValidationError::EmptyDomain));

    let lrp = LrpStartRequest {
        process_guid: "pg-1".to_string(),
        domain: "cf-apps".to_string(),
        ..Default::default()
    };
    assert_eq!(lrp.validate(), Err(ValidationError::EmptyIndices));
}

#[test]
fn test_task_validation_order() {
    assert!(valid_task("tg-1").validate().is_ok());
    assert_eq!(
        TaskStartRequest::default().validate(),
        Err(ValidationError::EmptyTaskGuid)
    );

    let mut task = valid_task("tg-1");
    task.resource = Resource::default();
    assert_eq!(task.validate(), Err(ValidationError::EmptyResource));
}

#[test]
fn test_task_does_not_require_domain() {
    let mut task = valid_task("tg-1");
    task.domain.clear();
    assert!(task.validate().is_ok());
}

#[test]
fn test_validation_messages() {
    assert_eq!(ValidationError::EmptyProcessGuid.to_string(), "process guid is empty");
    assert_eq!(ValidationError::EmptyDomain.to_string(), "domain is empty");
    assert_eq!(ValidationError::EmptyIndices.to_string(), "indices must not be empty");
    assert_eq!(ValidationError::EmptyResource.to_string(), "resources cannot be empty");
    assert_eq!(ValidationError::EmptyTaskGuid.to_string(), "task guid is empty");
}

#[test]
fn test_batch_keeps_valid_items_in_order() {
    let mut bad_domain = valid_lrp("pg-2");
    bad_domain.domain.clear();
    let payload = serde_json::to_vec(&vec![
        valid_lrp("pg-1"),
        bad_domain,
        valid_lrp("pg-3"),
        valid_lrp(""),
        valid_lrp("pg-5"),
    ])
    .unwrap();

    let batch = decode_lrp_batch(&payload).unwrap();
    let accepted: Vec<&str> = batch.accepted.iter().map(|l| l.process_guid.as_str()).collect();

    assert_eq!(accepted, vec!["pg-1", "pg-3", "pg-5"]);
    assert_eq!(
        batch.rejected,
        vec![
            (1, ValidationError::EmptyDomain),
            (3, ValidationError::EmptyProcessGuid)
        ]
    );
    assert_eq!(batch.received(), 5);
}

#[test]
fn test_batch_all_invalid_is_not_an_error() {
    let payload = serde_json::to_vec(&vec![valid_lrp(""), valid_lrp("")]).unwrap();
    let batch = decode_lrp_batch(&payload).unwrap();
    assert!(batch.accepted.is_empty());
    assert_eq!(batch.rejected.len(), 2);
}

#[test]
fn test_empty_batch() {
    let batch = decode_lrp_batch(b"[]").unwrap();
    assert_eq!(batch.received(), 0);
}

#[test]
fn test_malformed_batch() {
    assert!(matches!(
        decode_lrp_batch(b"{\"process_guid\":\"pg-1\"}"),
        Err(IntakeError::MalformedPayload(_))
    ));
    assert!(matches!(
        decode_lrp_batch(b"not json"),
        Err(IntakeError::MalformedPayload(_))
    ));
    assert!(matches!(
        decode_lrp_batch(b"[{\"indices\": \"zero\"}]"),
        Err(IntakeError::MalformedPayload(_))
    ));
}

#[test]
fn test_decode_task() {
    let payload = serde_json::to_vec(&valid_task("tg-1")).unwrap();
    assert_eq!(decode_task(&payload).unwrap().task_guid, "tg-1");

    let payload = serde_json::to_vec(&valid_task("")).unwrap();
    assert!(matches!(
        decode_task(&payload),
        Err(IntakeError::Invalid(ValidationError::EmptyTaskGuid))
    ));

    assert!(matches!(decode_task(b"[]"), Err(IntakeError::MalformedPayload(_))));
    assert!(matches!(decode_task(b"null"), Err(IntakeError::MalformedPayload(_))));
}

#[test]
fn test_positional_arrays_are_malformed() {
    let task = br#"["tg-1", "cf-tasks", {"memory_mb": 64}]"#;
    assert!(matches!(decode_task(task), Err(IntakeError::MalformedPayload(_))));

    let batch = br#"[["pg-1", "cf-apps", [0], {"memory_mb": 256}]]"#;
    assert!(matches!(decode_lrp_batch(batch), Err(IntakeError::MalformedPayload(_))));

    let mixed = serde_json::to_vec(&serde_json::json!([valid_lrp("pg-1"), "pg-2"])).unwrap();
    assert!(matches!(decode_lrp_batch(&mixed), Err(IntakeError::MalformedPayload(_))));
}
