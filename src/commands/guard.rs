use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use family_guard::config::{EXAMPLE_CONFIG, get_config_path, load_config_or_default};
use family_guard::store::get_state_path;
use family_guard::{
    EnforcementGate, Error, FileStore, GuardConfig, SettingsUpdate, SystemClock, VerifyResult,
};

use super::utils::{format_duration, init_logging, yes_no};
use crate::cli::{Args, SettingsArgs};

pub type Gate = EnforcementGate<FileStore, SystemClock>;

/// Write the example configuration file
pub fn init_config(output: Option<PathBuf>, force: bool) -> Result<()> {
    let output_path = match output {
        Some(path) => path,
        None => get_config_path()?,
    };

    if output_path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}\nUse --force to overwrite",
            output_path.display()
        );
    }

    family_guard::platform::atomic_write(&output_path, EXAMPLE_CONFIG.as_bytes())
        .with_context(|| format!("Failed to write config file: {}", output_path.display()))?;

    println!("✓ Created configuration file: {}", output_path.display());
    println!("\nEdit this file to adjust lockout, clock tolerance and threat settings.");
    println!("Then set a guardian PIN: family-guard set-pin <PIN>");

    Ok(())
}

/// Load configuration, start logging and open the gate over the state file
pub fn open_gate(args: &Args) -> Result<Gate> {
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_path()?,
    };
    let config = load_config_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration: {}", config_path.display()))?;

    init_logging(args.verbose, &config.logging.level);

    let state_path = match &args.state {
        Some(path) => path.clone(),
        None => get_state_path()?,
    };
    open_gate_at(&state_path, &config)
}

fn open_gate_at(state_path: &Path, config: &GuardConfig) -> Result<Gate> {
    let store = FileStore::open(state_path)
        .with_context(|| format!("Failed to open state file: {}", state_path.display()))?;
    Ok(EnforcementGate::new(store, SystemClock::new(), config))
}

pub fn set_pin(gate: &Gate, pin: &str) -> Result<()> {
    if gate.is_pin_set()? {
        anyhow::bail!("A guardian PIN is already set. Use change-pin to replace it");
    }
    gate.set_pin(pin).context("Failed to set PIN")?;

    println!("✓ Guardian PIN set, parental controls enabled");
    Ok(())
}

pub fn verify(gate: &Gate, pin: &str) -> Result<()> {
    let result = gate.verify_pin(pin)?;
    print_verify_result(result);

    if !result.is_success() {
        std::process::exit(2);
    }
    Ok(())
}

pub fn change_pin(gate: &Gate, old_pin: &str, new_pin: &str) -> Result<()> {
    guarded(gate.change_pin(old_pin, new_pin))?;
    println!("✓ Guardian PIN changed");
    Ok(())
}

pub fn remove(gate: &Gate, pin: &str) -> Result<()> {
    guarded(gate.remove_controls(pin))?;
    println!("✓ Parental controls removed, all state erased");
    Ok(())
}

pub fn set_enabled(gate: &Gate, enabled: bool, pin: &str) -> Result<()> {
    guarded(gate.set_enabled(enabled, pin))?;
    println!(
        "✓ Parental controls {}",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub fn status(gate: &Gate, json: bool) -> Result<()> {
    let state = gate.get_state()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    println!("Family Guard Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("PIN set:            {}", yes_no(state.pin_set));
    println!("Controls enabled:   {}", yes_no(state.enabled));

    match state.lockout_remaining {
        Some(remaining) => println!("PIN entry:          LOCKED ({} left)", format_duration(remaining)),
        None => println!(
            "PIN entry:          open ({} attempts remaining)",
            state.attempts_remaining
        ),
    }

    if state.time_tampering_detected {
        println!("Clock tampering:    DETECTED (verify the PIN to clear)");
    } else {
        println!("Clock tampering:    none");
    }

    println!();
    let schedule = &state.schedule;
    if schedule.bedtime_enabled {
        println!(
            "Bedtime:            {} - {}{}",
            schedule.bedtime_start.format("%H:%M"),
            schedule.bedtime_end.format("%H:%M"),
            if state.is_during_bedtime { " (now)" } else { "" }
        );
    } else {
        println!("Bedtime:            off");
    }

    match state.remaining_minutes {
        Some(remaining) => println!(
            "Usage today:        {} of {} minutes ({} left){}",
            state.usage_today_minutes,
            schedule.daily_limit_minutes,
            remaining,
            if state.is_over_daily_limit { " - LIMIT REACHED" } else { "" }
        ),
        None => println!("Usage today:        {} minutes (no limit)", state.usage_today_minutes),
    }

    let controls = &state.controls;
    println!();
    println!("Block DMs:          {}", yes_no(controls.block_dms));
    println!("Block explore:      {}", yes_no(controls.block_explore));
    println!("Block posting:      {}", yes_no(controls.block_posting));
    println!("Approve follows:    {}", yes_no(controls.require_approval_for_follows));
    println!("Content filter:     {}", controls.content_filter_level);

    Ok(())
}

pub fn settings(gate: &Gate, args: SettingsArgs) -> Result<()> {
    let update = SettingsUpdate {
        daily_limit_minutes: args.daily_limit,
        bedtime_enabled: args.bedtime,
        bedtime_start_hour: args.bedtime_start.map(|(h, _)| h),
        bedtime_start_minute: args.bedtime_start.map(|(_, m)| m),
        bedtime_end_hour: args.bedtime_end.map(|(h, _)| h),
        bedtime_end_minute: args.bedtime_end.map(|(_, m)| m),
        block_dms: args.block_dms,
        block_explore: args.block_explore,
        block_posting: args.block_posting,
        require_approval_for_follows: args.require_approval_for_follows,
        content_filter_level: args.content_filter,
    };

    if update.is_empty() {
        println!("No settings given; nothing changed");
        return Ok(());
    }

    gate.update_settings(&update).context("Failed to update settings")?;
    println!("✓ Settings updated");
    Ok(())
}

pub fn record_usage(gate: &Gate, minutes: u32) -> Result<()> {
    let total = gate.record_usage(minutes)?;
    println!("✓ Recorded {} minutes ({} today)", minutes, total);
    Ok(())
}

pub fn scan(gate: &Gate, json: bool) -> Result<()> {
    let assessment = gate.get_security_assessment(true);

    if json {
        println!("{}", serde_json::to_string_pretty(&*assessment)?);
        return Ok(());
    }

    println!("Threat level: {} (score {})", assessment.level, assessment.score);
    if assessment.indicators.is_empty() {
        println!("No threat indicators detected");
    } else {
        println!("Indicators:");
        for indicator in &assessment.indicators {
            println!("  - {:?} (+{})", indicator, indicator.weight());
        }
    }
    Ok(())
}

#[cfg(feature = "developer-bypass")]
pub fn bypass(gate: &Gate) -> Result<()> {
    let result = gate.developer_bypass()?;
    print_verify_result(result);
    Ok(())
}

fn print_verify_result(result: VerifyResult) {
    match result {
        VerifyResult::Success => println!("✓ PIN accepted"),
        VerifyResult::NoPinSet => println!("No guardian PIN set. Run: family-guard set-pin <PIN>"),
        VerifyResult::Incorrect { attempts_remaining } => {
            println!("✗ Incorrect PIN ({} attempts remaining)", attempts_remaining)
        }
        VerifyResult::LockedOut { remaining } => {
            println!("✗ Too many attempts. Try again in {}", format_duration(remaining))
        }
    }
}

/// Print a friendlier message for failed guardian checks
fn guarded(result: family_guard::Result<()>) -> Result<()> {
    match result {
        Err(Error::VerificationFailed(verify)) => {
            print_verify_result(verify);
            anyhow::bail!("Guardian verification failed")
        }
        other => other.map_err(Into::into),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    #[test]
    fn init_config_refuses_to_overwrite() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = temp.child("config.yaml");
        config.write_str("lockout:\n  max_attempts: 3\n").unwrap();

        assert!(init_config(Some(config.path().to_path_buf()), false).is_err());
        config.assert(predicate::str::contains("max_attempts: 3"));

        init_config(Some(config.path().to_path_buf()), true).unwrap();
        config.assert(predicate::str::contains("max_level_for_sensitive"));
    }

    #[test]
    fn gate_over_state_file_persists() {
        let temp = assert_fs::TempDir::new().unwrap();
        let state = temp.child("state.json");

        let gate = open_gate_at(state.path(), &GuardConfig::default()).unwrap();
        set_pin(&gate, "1357").unwrap();
        drop(gate);

        state.assert(predicate::path::exists());
        let reopened = open_gate_at(state.path(), &GuardConfig::default()).unwrap();
        assert!(reopened.is_pin_set().unwrap());
        assert!(reopened.verify_pin("1357").unwrap().is_success());
        assert!(set_pin(&reopened, "2468").is_err());
    }

    #[test]
    fn guarded_maps_failed_verification() {
        let err = guarded(Err(Error::VerificationFailed(VerifyResult::Incorrect {
            attempts_remaining: 2,
        })))
        .unwrap_err();
        assert!(err.to_string().contains("Guardian verification failed"));
    }
}
