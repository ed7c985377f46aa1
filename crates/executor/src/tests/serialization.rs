//! Tests for the JSON wire form of commands, outputs and responses.

use dualwrite_core::{Direction, MigrationPattern, Timestamp};
use dualwrite_migrator::{ValidationMode, ValidationParams};
use serde_json::json;

use super::{create_test_executor, MIGRATION};
use crate::{Command, Error, Executor, Output, Response};

// ============================================================================
// Helper Functions
// ============================================================================

fn decode(value: serde_json::Value) -> Command {
    serde_json::from_value(value).unwrap()
}

fn reply(executor: &Executor, value: serde_json::Value) -> serde_json::Value {
    serde_json::from_str(&executor.execute_json(&value.to_string())).unwrap()
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn test_unit_variant_is_bare_string() {
    assert_eq!(serde_json::to_value(Command::Ping).unwrap(), json!("Ping"));
    assert_eq!(decode(json!("ListMigrations")), Command::ListMigrations);
}

#[test]
fn test_start_validation_params_default() {
    let cmd = decode(json!({
        "StartValidation": {"migration": MIGRATION, "mode": "incremental"}
    }));
    assert_eq!(
        cmd,
        Command::StartValidation {
            migration: MIGRATION.into(),
            mode: ValidationMode::Incremental,
            params: ValidationParams::default(),
        }
    );
}

#[test]
fn test_start_validation_params_decoded() {
    let cmd = decode(json!({
        "StartValidation": {
            "migration": MIGRATION,
            "mode": "full",
            "params": {"direction": "DST", "batch_size": 50, "since": 1_700_000_000_000_000u64}
        }
    }));
    match cmd {
        Command::StartValidation { mode, params, .. } => {
            assert_eq!(mode, ValidationMode::Full);
            assert_eq!(params.direction, Direction::Dst);
            assert_eq!(params.batch_size, Some(50));
            assert_eq!(params.sleep_interval_ms, None);
            assert_eq!(params.since, Some(Timestamp::from_micros(1_700_000_000_000_000)));
        }
        other => panic!("Expected StartValidation, got {:?}", other),
    }
}

#[test]
fn test_unknown_field_rejected() {
    let result: Result<Command, _> = serde_json::from_value(json!({
        "GetPattern": {"migration": MIGRATION, "branch": "main"}
    }));
    assert!(result.is_err());
}

#[test]
fn test_bad_mode_rejected() {
    let result: Result<Command, _> = serde_json::from_value(json!({
        "StopValidation": {"migration": MIGRATION, "mode": "partial"}
    }));
    assert!(result.is_err());
}

// ============================================================================
// Outputs and responses
// ============================================================================

#[test]
fn test_pattern_output_wire_form() {
    let response = Response::Ok(Output::Pattern(MigrationPattern::DstFirst));
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({"ok": {"Pattern": "dst_first"}})
    );
}

#[test]
fn test_error_response_wire_form() {
    let response = Response::Error(Error::MigrationNotFound {
        migration: "ghost".into(),
    });
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(
        value,
        json!({"error": {"MigrationNotFound": {"migration": "ghost"}}})
    );
    let back: Response = serde_json::from_value(value).unwrap();
    assert_eq!(back, response);
}

// ============================================================================
// execute_json
// ============================================================================

#[test]
fn test_execute_json_update_pattern() {
    let (executor, migration) = create_test_executor();
    let value = reply(
        &executor,
        json!({"UpdatePattern": {"migration": MIGRATION, "pattern": "src_first"}}),
    );
    assert_eq!(value, json!({"ok": {"Pattern": "src_first"}}));
    assert_eq!(migration.pool().pattern(), MigrationPattern::SrcFirst);
}

#[test]
fn test_execute_json_malformed_request() {
    let executor = Executor::new();
    let reply: Response = serde_json::from_str(&executor.execute_json("{not json")).unwrap();
    assert!(matches!(reply, Response::Error(Error::Serialization { .. })));
}

#[test]
fn test_execute_json_status() {
    let (executor, _migration) = create_test_executor();
    let value = reply(&executor, json!({"Status": {"migration": MIGRATION}}));
    let status = &value["ok"]["Status"];
    assert_eq!(status["name"], json!(MIGRATION));
    assert_eq!(status["pattern"], json!("src_only"));
    assert_eq!(status["jobs"], json!([]));
    assert_eq!(
        status["fixer"],
        json!({"running": false, "lag": 0, "stats": {"upserted": 0, "deleted": 0, "failed": 0}})
    );
}

#[test]
fn test_execute_json_fixer_commands() {
    let (executor, _migration) = create_test_executor();
    let start = json!({"StartFixer": {"migration": MIGRATION}});
    assert_eq!(reply(&executor, start), json!({"ok": {"Bool": true}}));
    let stop = json!({"StopFixer": {"migration": MIGRATION}});
    assert_eq!(reply(&executor, stop.clone()), json!({"ok": {"Bool": true}}));
    assert_eq!(reply(&executor, stop), json!({"ok": {"Bool": false}}));
}
