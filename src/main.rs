use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Args, Commands};
use commands::guard;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    // Needs no state file, and the config may not exist yet
    if let Commands::InitConfig { output, force } = &args.command {
        commands::utils::init_logging(args.verbose, "info");
        return guard::init_config(output.clone(), *force);
    }

    let gate = guard::open_gate(&args)?;

    match args.command {
        Commands::InitConfig { .. } => Ok(()),
        Commands::SetPin { pin } => guard::set_pin(&gate, &pin),
        Commands::Verify { pin } => guard::verify(&gate, &pin),
        Commands::ChangePin { old_pin, new_pin } => guard::change_pin(&gate, &old_pin, &new_pin),
        Commands::Remove { pin } => guard::remove(&gate, &pin),
        Commands::Enable { pin } => guard::set_enabled(&gate, true, &pin),
        Commands::Disable { pin } => guard::set_enabled(&gate, false, &pin),
        Commands::Status { json } => guard::status(&gate, json),
        Commands::Settings(settings) => guard::settings(&gate, settings),
        Commands::RecordUsage { minutes } => guard::record_usage(&gate, minutes),
        Commands::Scan { json } => guard::scan(&gate, json),
        #[cfg(feature = "developer-bypass")]
        Commands::Bypass => guard::bypass(&gate),
    }
}
