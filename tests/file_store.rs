//! Persistence of gate state through the JSON state file.

use assert_fs::prelude::*;
use chrono::{Local, TimeZone};
use family_guard::store::keys;
use family_guard::{
    ContentFilterLevel, EnforcementGate, FileStore, GuardConfig, KeyValueStore, ManualClock,
    SettingsUpdate, ThreatScanner, VerifyResult,
};
use predicates::prelude::*;
use std::path::Path;
use std::time::Duration;

fn make_test_clock() -> ManualClock {
    ManualClock::new(Local.with_ymd_and_hms(2025, 11, 16, 9, 0, 0).unwrap())
}

fn open_gate(path: &Path, clock: &ManualClock) -> EnforcementGate<FileStore, ManualClock> {
    EnforcementGate::with_scanner(
        FileStore::open(path).unwrap(),
        clock.clone(),
        &GuardConfig::default(),
        ThreatScanner::new(Vec::new(), Duration::from_secs(30)),
    )
}

#[test]
fn state_file_uses_namespaced_layout() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("state.json");
    let clock = make_test_clock();

    let gate = open_gate(state.path(), &clock);
    gate.set_pin("2468").unwrap();
    gate.verify_pin("1111").unwrap();

    state.assert(predicate::path::is_file());
    state.assert(predicate::str::contains("\"version\": \"1.0\""));
    state.assert(predicate::str::contains("\"credential\""));
    state.assert(predicate::str::contains("\"pin_salt\""));
    state.assert(predicate::str::contains("\"failed_attempts\": 1"));
}

#[test]
fn lockout_survives_restart() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("state.json");
    let clock = make_test_clock();

    {
        let gate = open_gate(state.path(), &clock);
        gate.set_pin("2468").unwrap();
        for _ in 0..5 {
            gate.verify_pin("0000").unwrap();
        }
    }

    clock.advance(Duration::from_secs(120));
    let gate = open_gate(state.path(), &clock);
    assert_eq!(
        gate.verify_pin("2468").unwrap(),
        VerifyResult::LockedOut { remaining: Duration::from_secs(180) }
    );
}

#[test]
fn settings_and_usage_survive_restart() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("state.json");
    let clock = make_test_clock();

    {
        let gate = open_gate(state.path(), &clock);
        gate.update_settings(&SettingsUpdate {
            daily_limit_minutes: Some(90),
            block_posting: Some(true),
            content_filter_level: Some(ContentFilterLevel::Strict),
            ..Default::default()
        })
        .unwrap();
        gate.record_usage(45).unwrap();
    }

    state.assert(predicate::str::contains("\"content_filter_level\": \"strict\""));
    state.assert(predicate::str::contains("\"usage_date\": \"2025-11-16\""));

    let gate = open_gate(state.path(), &clock);
    let snapshot = gate.get_state().unwrap();
    assert_eq!(snapshot.usage_today_minutes, 45);
    assert_eq!(snapshot.remaining_minutes, Some(45));
    assert!(snapshot.controls.block_posting);
    assert_eq!(snapshot.controls.content_filter_level, ContentFilterLevel::Strict);
}

#[test]
fn remove_controls_empties_state_file() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("state.json");
    let clock = make_test_clock();

    let gate = open_gate(state.path(), &clock);
    gate.set_pin("2468").unwrap();
    gate.record_usage(10).unwrap();
    gate.remove_controls("2468").unwrap();
    drop(gate);

    let store = FileStore::open(state.path()).unwrap();
    assert_eq!(store.get(keys::CREDENTIAL, keys::PIN_HASH), None);
    assert_eq!(store.get_u64(keys::USAGE, keys::DAILY_USAGE_MINUTES), None);
    state.assert(predicate::str::contains("pin_hash").not());
}

#[test]
fn unknown_filter_tag_in_file_falls_back_to_default() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("state.json");
    state
        .write_str(
            r#"{"version":"1.0","namespaces":{"settings":{"content_filter_level":"MAXIMUM","block_dms":true}}}"#,
        )
        .unwrap();

    let gate = open_gate(state.path(), &make_test_clock());
    let snapshot = gate.get_state().unwrap();

    assert_eq!(snapshot.controls.content_filter_level, ContentFilterLevel::Moderate);
    assert!(snapshot.controls.block_dms);
}

#[test]
fn corrupt_credential_refuses_every_pin() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("state.json");
    state
        .write_str(
            r#"{"version":"1.0","namespaces":{"credential":{"pin_hash":"not-hex","pin_salt":"00","is_enabled":true}}}"#,
        )
        .unwrap();

    let gate = open_gate(state.path(), &make_test_clock());

    assert!(gate.is_pin_set().unwrap());
    assert_eq!(
        gate.verify_pin("1234").unwrap(),
        VerifyResult::Incorrect { attempts_remaining: 4 }
    );
}

#[test]
fn two_gates_on_one_file_share_the_attempt_counter() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("state.json");
    let clock = make_test_clock();

    let first = open_gate(state.path(), &clock);
    let second = open_gate(state.path(), &clock);
    first.set_pin("2468").unwrap();

    let gates = [&first, &second, &first, &second];
    for (gate, expected) in gates.into_iter().zip([4, 3, 2, 1]) {
        assert_eq!(
            gate.verify_pin("0000").unwrap(),
            VerifyResult::Incorrect { attempts_remaining: expected }
        );
    }

    assert!(matches!(
        first.verify_pin("0000").unwrap(),
        VerifyResult::LockedOut { .. }
    ));
    assert!(matches!(
        second.verify_pin("2468").unwrap(),
        VerifyResult::LockedOut { .. }
    ));
    state.assert(predicate::str::contains("\"lockout_elapsed_monotonic\""));
}

#[test]
fn gates_in_parallel_threads_count_every_failure() {
    let temp = assert_fs::TempDir::new().unwrap();
    let state = temp.child("state.json");
    let clock = make_test_clock();
    open_gate(state.path(), &clock).set_pin("2468").unwrap();

    std::thread::scope(|scope| {
        for _ in 0..2 {
            let gate = open_gate(state.path(), &clock);
            scope.spawn(move || {
                for _ in 0..2 {
                    gate.verify_pin("0000").unwrap();
                }
            });
        }
    });

    let store = FileStore::open(state.path()).unwrap();
    assert_eq!(store.get_u64(keys::LOCKOUT, keys::FAILED_ATTEMPTS), Some(4));
}
