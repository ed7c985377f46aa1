//! Control flow over JSON lines

use dualwrite::{MigrationPattern, Response};
use serde_json::{json, Value};

use crate::{rows, wait_until, Harness, NAME};

fn send(h: &Harness, request: Value) -> Value {
    serde_json::from_str(&h.executor.execute_json(&request.to_string())).unwrap()
}

#[test]
fn test_operator_session() {
    let h = Harness::new(rows(1..=8), rows(1..=4));

    assert_eq!(send(&h, json!("ListMigrations")), json!({"ok": {"Migrations": [NAME]}}));
    assert_eq!(
        send(&h, json!({"UpdatePattern": {"migration": NAME, "pattern": "src_first"}})),
        json!({"ok": {"Pattern": "src_first"}})
    );

    let started = send(
        &h,
        json!({"StartValidation": {"migration": NAME, "mode": "full", "params": {"batch_size": 3}}}),
    );
    let job = &started["ok"]["Job"];
    assert_eq!(job["mode"], json!("full"));
    assert_eq!(job["direction"], json!("SRC"));

    wait_until("full validation", || {
        send(&h, json!({"Status": {"migration": NAME}}))["ok"]["Status"]["jobs"][0]["state"]
            == json!("completed")
    });
    h.await_repairs();
    h.assert_converged();

    let status = send(&h, json!({"Status": {"migration": NAME}}));
    assert_eq!(status["ok"]["Status"]["jobs"][0]["events"], json!(4));
    assert_eq!(status["ok"]["Status"]["pattern"], json!("src_first"));
}

#[test]
fn test_errors_come_back_as_responses() {
    let h = Harness::new(vec![], vec![]);

    let reply: Response = serde_json::from_value(send(
        &h,
        json!({"UpdatePattern": {"migration": NAME, "pattern": "dst_last"}}),
    ))
    .unwrap();
    assert!(matches!(reply, Response::Error(dualwrite::Error::UnknownPattern { .. })));
    assert_eq!(h.migration.pool().pattern(), MigrationPattern::SrcOnly);

    assert_eq!(
        send(&h, json!({"GetPattern": {"migration": "other"}})),
        json!({"error": {"MigrationNotFound": {"migration": "other"}}})
    );

    let malformed = send(&h, json!({"Frobnicate": {}}));
    assert!(malformed["error"]["Serialization"]["reason"].is_string());
}
