use clap::{Parser, Subcommand};
use family_guard::ContentFilterLevel;
use std::path::PathBuf;

/// Family Guard
///
/// Guardian PIN, lockout, clock-tamper detection and environment checks for
/// parental controls.
#[derive(Parser, Debug)]
#[command(name = "family-guard")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (defaults to the per-user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to state file (defaults to the per-user data dir)
    #[arg(short, long, global = true)]
    pub state: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an example configuration file
    InitConfig {
        /// Output path (defaults to the per-user config path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Set the guardian PIN and enable controls
    SetPin {
        /// New PIN (4-8 digits)
        pin: String,
    },
    /// Check a guardian PIN
    Verify { pin: String },
    /// Change the guardian PIN
    ChangePin {
        /// Current PIN
        old_pin: String,

        /// New PIN (4-8 digits)
        new_pin: String,
    },
    /// Remove the PIN and erase all parental-control state
    Remove { pin: String },
    /// Enable parental controls
    Enable { pin: String },
    /// Disable parental controls
    Disable { pin: String },
    /// Show current parental-control state
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change restriction settings
    Settings(SettingsArgs),
    /// Add minutes to today's usage
    RecordUsage { minutes: u32 },
    /// Scan the runtime environment for threat indicators
    Scan {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Verify as guardian without a PIN (development builds only)
    #[cfg(feature = "developer-bypass")]
    Bypass,
}

/// Partial settings change; omitted options are left unchanged
#[derive(clap::Args, Debug)]
pub struct SettingsArgs {
    /// Daily usage limit in minutes (0 for unlimited)
    #[arg(long)]
    pub daily_limit: Option<u32>,

    /// Turn the bedtime window on or off
    #[arg(long)]
    pub bedtime: Option<bool>,

    /// Bedtime start as HH:MM
    #[arg(long, value_parser = parse_time_of_day)]
    pub bedtime_start: Option<(u32, u32)>,

    /// Bedtime end as HH:MM
    #[arg(long, value_parser = parse_time_of_day)]
    pub bedtime_end: Option<(u32, u32)>,

    #[arg(long)]
    pub block_dms: Option<bool>,

    #[arg(long)]
    pub block_explore: Option<bool>,

    #[arg(long)]
    pub block_posting: Option<bool>,

    #[arg(long)]
    pub require_approval_for_follows: Option<bool>,

    /// Content filter level (off, light, moderate, strict)
    #[arg(long)]
    pub content_filter: Option<ContentFilterLevel>,
}

/// Parse `HH:MM` without range checks; the library clamps
fn parse_time_of_day(s: &str) -> Result<(u32, u32), String> {
    let (hour, minute) = s
        .split_once(':')
        .ok_or_else(|| format!("expected HH:MM, got '{}'", s))?;

    let hour = hour
        .trim()
        .parse()
        .map_err(|_| format!("invalid hour in '{}'", s))?;
    let minute = minute
        .trim()
        .parse()
        .map_err(|_| format!("invalid minute in '{}'", s))?;

    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_time_of_day() {
        assert_eq!(parse_time_of_day("21:30"), Ok((21, 30)));
        assert_eq!(parse_time_of_day("7:05"), Ok((7, 5)));
        assert!(parse_time_of_day("2130").is_err());
        assert!(parse_time_of_day("ab:cd").is_err());
    }

    #[test]
    fn parses_settings_command() {
        let args = Args::parse_from([
            "family-guard",
            "settings",
            "--daily-limit",
            "90",
            "--bedtime",
            "true",
            "--bedtime-start",
            "21:00",
            "--content-filter",
            "strict",
        ]);

        let Commands::Settings(settings) = args.command else {
            panic!("expected settings command");
        };
        assert_eq!(settings.daily_limit, Some(90));
        assert_eq!(settings.bedtime, Some(true));
        assert_eq!(settings.bedtime_start, Some((21, 0)));
        assert_eq!(settings.bedtime_end, None);
        assert_eq!(settings.content_filter, Some(ContentFilterLevel::Strict));
    }

    #[test]
    fn global_paths_accepted_after_subcommand() {
        let args = Args::parse_from(["family-guard", "status", "--state", "/tmp/s.json", "--json"]);
        assert_eq!(args.state, Some(PathBuf::from("/tmp/s.json")));
        assert!(matches!(args.command, Commands::Status { json: true }));
    }
}
