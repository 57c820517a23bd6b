//! End-to-end scenarios against an in-memory gate driven by a manual clock.

use chrono::{Duration as ChronoDuration, Local, TimeZone};
use family_guard::threat::{EnvironmentProbe, StaticProbe};
use family_guard::{
    EnforcementGate, Error, GuardConfig, ManualClock, MemoryStore, SettingsUpdate,
    ThreatIndicator, ThreatLevel, ThreatScanner, VerifyResult,
};
use std::time::Duration;

type Gate = EnforcementGate<MemoryStore, ManualClock>;

fn make_test_clock() -> ManualClock {
    ManualClock::new(Local.with_ymd_and_hms(2025, 11, 16, 15, 0, 0).unwrap())
}

fn make_test_gate(clock: &ManualClock, detected: &[ThreatIndicator]) -> Gate {
    let probes = detected
        .iter()
        .map(|&i| Box::new(StaticProbe::detected(i)) as Box<dyn EnvironmentProbe>)
        .collect();
    EnforcementGate::with_scanner(
        MemoryStore::new(),
        clock.clone(),
        &GuardConfig::default(),
        ThreatScanner::new(probes, Duration::from_secs(30)),
    )
}

#[test]
fn lockout_scenario_with_pin_1234() {
    let clock = make_test_clock();
    let gate = make_test_gate(&clock, &[]);
    gate.set_pin("1234").unwrap();

    for expected in [4, 3, 2, 1] {
        assert_eq!(
            gate.verify_pin("0000").unwrap(),
            VerifyResult::Incorrect { attempts_remaining: expected }
        );
    }

    assert!(matches!(
        gate.verify_pin("0000").unwrap(),
        VerifyResult::LockedOut { .. }
    ));

    // The right PIN does not help during the lockout window
    assert!(matches!(
        gate.verify_pin("1234").unwrap(),
        VerifyResult::LockedOut { .. }
    ));

    clock.advance_monotonic(Duration::from_secs(300));

    assert_eq!(gate.verify_pin("1234").unwrap(), VerifyResult::Success);
    let state = gate.get_state().unwrap();
    assert_eq!(state.failed_attempts, 0);
    assert!(!state.locked_out);
}

#[test]
fn lockout_remaining_decreases_with_monotonic_time() {
    let clock = make_test_clock();
    let gate = make_test_gate(&clock, &[]);
    gate.set_pin("1234").unwrap();
    for _ in 0..5 {
        gate.verify_pin("0000").unwrap();
    }

    let mut previous = Duration::MAX;
    for _ in 0..4 {
        clock.advance_monotonic(Duration::from_secs(60));
        let VerifyResult::LockedOut { remaining } = gate.verify_pin("1234").unwrap() else {
            panic!("expected lockout");
        };
        assert!(remaining < previous);
        previous = remaining;
    }

    clock.advance_monotonic(Duration::from_secs(60));
    assert!(gate.verify_pin("1234").unwrap().is_success());
}

#[test]
fn setting_wall_clock_back_does_not_extend_or_shorten_lockout() {
    let clock = make_test_clock();
    let gate = make_test_gate(&clock, &[]);
    gate.set_pin("1234").unwrap();
    for _ in 0..5 {
        gate.verify_pin("0000").unwrap();
    }

    // Rewinding the date by a week changes nothing about the window
    clock.shift_wall(ChronoDuration::days(-7));
    assert!(matches!(
        gate.verify_pin("1234").unwrap(),
        VerifyResult::LockedOut { remaining } if remaining == Duration::from_secs(300)
    ));

    // Moving it forward a day does not end the lockout either
    clock.shift_wall(ChronoDuration::days(8));
    assert!(matches!(
        gate.verify_pin("1234").unwrap(),
        VerifyResult::LockedOut { .. }
    ));

    clock.advance_monotonic(Duration::from_secs(300));
    assert!(gate.verify_pin("1234").unwrap().is_success());
}

#[test]
fn tampering_is_sticky_until_verified() {
    let clock = make_test_clock();
    let gate = make_test_gate(&clock, &[]);
    gate.set_pin("1234").unwrap();
    gate.update_settings(&SettingsUpdate {
        daily_limit_minutes: Some(120),
        ..Default::default()
    })
    .unwrap();
    assert!(!gate.get_state().unwrap().time_tampering_detected);

    clock.advance(Duration::from_secs(60));
    clock.shift_wall(ChronoDuration::minutes(-30));

    for _ in 0..3 {
        clock.advance(Duration::from_secs(5));
        let state = gate.get_state().unwrap();
        assert!(state.time_tampering_detected);
        assert!(state.is_during_bedtime);
        assert!(state.is_over_daily_limit);
    }

    assert!(gate.verify_pin("1234").unwrap().is_success());

    let state = gate.get_state().unwrap();
    assert!(!state.time_tampering_detected);
    assert!(!state.is_over_daily_limit);
    assert!(!state.is_during_bedtime);
}

#[test]
fn usage_resets_on_a_new_day_only() {
    let clock = make_test_clock();
    let gate = make_test_gate(&clock, &[]);
    gate.update_settings(&SettingsUpdate {
        daily_limit_minutes: Some(60),
        ..Default::default()
    })
    .unwrap();

    gate.record_usage(25).unwrap();
    clock.advance(Duration::from_secs(3600));
    gate.record_usage(40).unwrap();

    let state = gate.get_state().unwrap();
    assert_eq!(state.usage_today_minutes, 65);
    assert!(state.is_over_daily_limit);
    assert_eq!(state.remaining_minutes, Some(0));

    // 15:00 + 1h + 10h crosses midnight
    clock.advance(Duration::from_secs(10 * 3600));
    let state = gate.get_state().unwrap();
    assert_eq!(state.usage_today_minutes, 0);
    assert!(!state.is_over_daily_limit);
    assert_eq!(state.remaining_minutes, Some(60));
}

#[test]
fn forward_date_change_does_not_refill_allowance() {
    let clock = make_test_clock();
    let gate = make_test_gate(&clock, &[]);
    gate.update_settings(&SettingsUpdate {
        daily_limit_minutes: Some(30),
        ..Default::default()
    })
    .unwrap();
    gate.record_usage(30).unwrap();

    clock.advance(Duration::from_secs(10));
    clock.shift_wall(ChronoDuration::days(1));

    let state = gate.get_state().unwrap();
    assert!(state.time_tampering_detected);
    assert_eq!(state.usage_today_minutes, 30);
    assert!(state.is_over_daily_limit);

    assert_eq!(gate.record_usage(5).unwrap(), 35);
}

#[test]
fn bedtime_window_tracks_time_of_day() {
    let clock = ManualClock::new(Local.with_ymd_and_hms(2025, 11, 16, 21, 0, 0).unwrap());
    let gate = make_test_gate(&clock, &[]);
    gate.update_settings(&SettingsUpdate {
        bedtime_enabled: Some(true),
        bedtime_start_hour: Some(22),
        bedtime_start_minute: Some(0),
        bedtime_end_hour: Some(7),
        bedtime_end_minute: Some(0),
        ..Default::default()
    })
    .unwrap();

    assert!(!gate.get_state().unwrap().is_during_bedtime);

    clock.advance(Duration::from_secs(2 * 3600 + 30 * 60));
    assert!(gate.get_state().unwrap().is_during_bedtime);

    clock.advance(Duration::from_secs(4 * 3600));
    assert!(gate.get_state().unwrap().is_during_bedtime);

    clock.advance(Duration::from_secs(9 * 3600));
    assert!(!gate.get_state().unwrap().is_during_bedtime);
}

#[test]
fn root_and_hook_framework_is_critical() {
    let clock = make_test_clock();
    let gate = make_test_gate(
        &clock,
        &[ThreatIndicator::Root, ThreatIndicator::HookFramework],
    );

    let assessment = gate.get_security_assessment(true);
    assert!(assessment.score >= 110);
    assert_eq!(assessment.level, ThreatLevel::Critical);

    let err = gate.enforce_or_fail(ThreatLevel::Medium).unwrap_err();
    assert!(matches!(
        err,
        Error::ThreatExceeded {
            level: ThreatLevel::Critical,
            max_tolerated: ThreatLevel::Medium
        }
    ));
}

#[test]
fn reboot_during_lockout_restarts_window() {
    let clock = make_test_clock();
    let gate = make_test_gate(&clock, &[]);
    gate.set_pin("1234").unwrap();
    for _ in 0..5 {
        gate.verify_pin("0000").unwrap();
    }
    clock.advance(Duration::from_secs(200));

    // Monotonic epoch restarts below the stored anchor
    clock.reboot(Duration::from_secs(5));
    assert_eq!(
        gate.verify_pin("1234").unwrap(),
        VerifyResult::LockedOut { remaining: Duration::from_secs(300) }
    );

    clock.advance(Duration::from_secs(300));
    assert!(gate.verify_pin("1234").unwrap().is_success());
}

#[test]
fn concurrent_failures_are_all_counted() {
    let clock = make_test_clock();
    let gate = make_test_gate(&clock, &[]);
    gate.set_pin("1234").unwrap();

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| gate.verify_pin("0000").unwrap());
        }
    });

    assert_eq!(gate.get_state().unwrap().failed_attempts, 4);
    assert_eq!(
        gate.verify_pin("0000").unwrap(),
        VerifyResult::LockedOut { remaining: Duration::from_secs(300) }
    );
}

#[test]
fn overnight_power_off_is_not_tampering() {
    let clock = make_test_clock();
    let gate = make_test_gate(&clock, &[]);
    clock.advance(Duration::from_secs(600));
    assert!(!gate.get_state().unwrap().time_tampering_detected);

    // Device is off for the night and comes back with a longer uptime
    clock.shift_wall(ChronoDuration::hours(11));
    clock.reboot(Duration::from_secs(1800));
    assert!(!gate.get_state().unwrap().time_tampering_detected);

    clock.advance(Duration::from_secs(60));
    assert!(!gate.get_state().unwrap().time_tampering_detected);
}

#[test]
fn only_the_configured_pin_verifies() {
    let pins = ["1234", "90210", "000000", "8675309", "13579246"];

    for pin in pins {
        let clock = make_test_clock();
        let gate = make_test_gate(&clock, &[]);
        gate.set_pin(pin).unwrap();
        assert!(gate.verify_pin(pin).unwrap().is_success());

        let others = pins.iter().filter(|&&other| other != pin);
        let near_misses = [&pin[1..], &pin[..pin.len() - 1]];
        for other in others.copied().chain(near_misses) {
            assert_eq!(
                gate.verify_pin(other).unwrap(),
                VerifyResult::Incorrect { attempts_remaining: 4 },
                "{} accepted for {}",
                other,
                pin
            );
            // Keep the attempt counter below the lockout threshold
            assert!(gate.verify_pin(pin).unwrap().is_success());
        }
    }
}
