//! Update payload vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use tally_core::protocol::{decode_payload, payload_complete};

use vector_loader::load_update;

#[test]
fn update_vectors() {
    let files = [
        "update_single.json",
        "update_batch.json",
        "update_missing_method.json",
        "update_null_fields.json",
        "update_truncated.json",
        "update_scalar.json",
    ];

    for f in files {
        let v = load_update(f);
        let res = decode_payload(v.payload.as_bytes());

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.class().as_str(), err.class, "vector={}", v.description);
            continue;
        }

        let expect = v.expect.expect("vector must carry expect or expect_error");
        assert_eq!(res.expect("expected success"), expect, "vector={}", v.description);
    }
}

#[test]
fn truncated_payload_is_incomplete_not_invalid() {
    let v = load_update("update_truncated.json");
    assert!(!payload_complete(v.payload.as_bytes()).unwrap());
}

#[test]
fn batch_payload_is_complete() {
    let v = load_update("update_batch.json");
    assert!(payload_complete(v.payload.as_bytes()).unwrap());
}
