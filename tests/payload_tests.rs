//! Tests for the broker wire format: the pending-lead payload stored in the
//! outbox and consumed by the worker.

use dripq::error::Error;
use dripq::idempotency::idem_key;
use dripq::types::PendingLead;

fn wire_payload() -> serde_json::Value {
    serde_json::json!({
        "lead_state_id": "state-1",
        "lead_id": "lead-1",
        "sequence_id": "seq-1",
        "current_step": 0,
        "step_id": "step-1",
        "step_number": 1,
        "min_interval_min": 30
    })
}

#[test]
fn test_wire_payload_decodes() {
    let bytes = serde_json::to_vec(&wire_payload()).unwrap();
    let pending = PendingLead::from_slice(&bytes).unwrap();

    assert_eq!(pending.lead_state_id, "state-1");
    assert_eq!(pending.lead_id, "lead-1");
    assert_eq!(pending.sequence_id, "seq-1");
    assert_eq!(pending.current_step, 0);
    assert_eq!(pending.step_number, 1);
    assert_eq!(pending.min_interval_min, 30);
}

#[test]
fn test_serialized_payload_uses_snake_case_fields() {
    let pending = PendingLead {
        lead_state_id: "state-1".to_string(),
        lead_id: "lead-1".to_string(),
        sequence_id: "seq-1".to_string(),
        current_step: 2,
        step_id: "step-3".to_string(),
        step_number: 3,
        min_interval_min: 0,
    };

    let value = serde_json::to_value(&pending).unwrap();
    for field in [
        "lead_state_id",
        "lead_id",
        "sequence_id",
        "current_step",
        "step_id",
        "step_number",
        "min_interval_min",
    ] {
        assert!(value.get(field).is_some(), "missing field {}", field);
    }
}

#[test]
fn test_ids_are_opaque_strings() {
    // A numeric id is a schema violation, not something to coerce.
    let mut payload = wire_payload();
    payload["lead_state_id"] = serde_json::json!(42);
    let bytes = serde_json::to_vec(&payload).unwrap();

    assert!(matches!(
        PendingLead::from_slice(&bytes),
        Err(Error::InvalidMessage { .. })
    ));
}

#[test]
fn test_missing_fields_are_rejected() {
    let mut payload = wire_payload();
    payload.as_object_mut().unwrap().remove("step_number");
    let bytes = serde_json::to_vec(&payload).unwrap();

    assert!(matches!(
        PendingLead::from_slice(&bytes),
        Err(Error::InvalidMessage { .. })
    ));
}

#[test]
fn test_unknown_fields_are_tolerated() {
    // Forward compatibility: extra columns in the eligibility row must not
    // break older workers.
    let mut payload = wire_payload();
    payload["extra_column"] = serde_json::json!("ignored");
    let bytes = serde_json::to_vec(&payload).unwrap();

    assert!(PendingLead::from_slice(&bytes).is_ok());
}

#[test]
fn test_enqueue_key_matches_the_consumed_step() {
    // The scheduler keys the outbox row off currentStep + 1, which must be
    // the step number the worker sees in the payload.
    let bytes = serde_json::to_vec(&wire_payload()).unwrap();
    let pending = PendingLead::from_slice(&bytes).unwrap();

    let scheduler_key = idem_key(
        &pending.sequence_id,
        &pending.lead_id,
        pending.current_step + 1,
        0,
        "",
    );
    let step_key = idem_key(&pending.sequence_id, &pending.lead_id, pending.step_number, 0, "");
    assert_eq!(scheduler_key, step_key);
}
