use std::path::PathBuf;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use uuid::Uuid;

use gatekey_core::{
    config::GatekeyConfig,
    guest::{self, GuestFilter, GuestSortMode},
    import,
    ledger::GuestLedger,
    ticket, util,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "gatekey",
    version = util::VERSION,
    about = "Offline guest list and signed QR ticketing for event check-in"
)]
struct Cli {
    /// Directory holding guests.json and event_config.json.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the data directory and event configuration.
    Init {
        /// Event display name.
        #[arg(long, default_value = "My Event")]
        event_name: String,
    },

    /// Add a guest by name.
    Add {
        name: String,
    },

    /// List the roster.
    List {
        #[arg(long, value_enum, default_value_t = SortArg::Az)]
        sort: SortArg,
        #[arg(long, value_enum, default_value_t = FilterArg::All)]
        filter: FilterArg,
        /// Case-insensitive substring match against names.
        #[arg(long, default_value = "")]
        search: String,
        /// Output the roster as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Rename a guest.
    Edit {
        id: Uuid,
        name: String,
    },

    /// Remove a guest.  Interactively offers a short undo window; press
    /// Enter before it lapses to restore the guest.
    Remove {
        id: Uuid,
        /// Skip the undo prompt (for scripting).
        #[arg(long)]
        yes: bool,
    },

    /// Mark a guest entered (or not) by id, without a ticket.
    CheckIn {
        id: Uuid,
        /// Clear the entered flag instead of setting it.
        #[arg(long)]
        revert: bool,
    },

    /// Merge guest names from a CSV file into the roster.
    Import {
        csv: PathBuf,
        /// CSV header to read names from (default: configured column, else
        /// the first column).
        #[arg(long)]
        column: Option<String>,
    },

    /// Show what an import would add, without changing anything.
    PreviewImport {
        csv: PathBuf,
        #[arg(long)]
        column: Option<String>,
    },

    /// Issue (or reissue) a signed ticket for a guest.  Prints the wire
    /// string to encode into a QR image.
    Issue {
        id: Uuid,
    },

    /// Verify a scanned ticket string without admitting anyone.
    Verify {
        wire: String,
    },

    /// Door flow: verify a scanned ticket and mark the guest entered.
    Scan {
        wire: String,
    },

    /// Rotate the ticket-signing secret.  Invalidates every issued ticket.
    RotateSecret {
        /// Confirm the rotation (required).
        #[arg(long)]
        yes: bool,
    },

    /// Change the event display name.
    SetEventName {
        name: String,
    },

    /// Delete every guest from the roster.
    Clear {
        /// Confirm the wipe (required).
        #[arg(long)]
        yes: bool,
    },

    /// Print version information.
    Version,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Az,
    Za,
    Latest,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FilterArg {
    All,
    Entered,
    NotEntered,
}

impl From<SortArg> for GuestSortMode {
    fn from(v: SortArg) -> Self {
        match v {
            SortArg::Az => GuestSortMode::Az,
            SortArg::Za => GuestSortMode::Za,
            SortArg::Latest => GuestSortMode::Latest,
        }
    }
}

impl From<FilterArg> for GuestFilter {
    fn from(v: FilterArg) -> Self {
        match v {
            FilterArg::All => GuestFilter::All,
            FilterArg::Entered => GuestFilter::Entered,
            FilterArg::NotEntered => GuestFilter::NotEntered,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration.
    let mut cfg = GatekeyConfig::load(cli.config.as_deref()).context("load config")?;
    cfg.apply_env();

    init_logging(&cfg.logging);

    let data_dir = cli.data_dir.unwrap_or(cfg.paths.data_dir.clone());
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("create data dir {}", data_dir.display()))?;
    let undo_window = time::Duration::seconds(cfg.undo.window_secs as i64);

    let open = || GuestLedger::open_with_undo_window(&data_dir, undo_window);

    match cli.cmd {
        Commands::Init { event_name } => {
            let mut ledger = open().context("initialize store")?;
            if ledger.event_config().event_name != event_name {
                ledger
                    .update_event_config(|c| c.event_name = event_name.clone())
                    .context("set event name")?;
            }
            let ec = ledger.event_config();
            info!(event_id = %ec.event_id, key_version = ec.key_version, "store ready");
            println!("Event '{}' ready in {}", ec.event_name, data_dir.display());
        }

        Commands::Add { name } => {
            let mut ledger = open().context("open store")?;
            let guest = ledger.add(&name).context("add guest")?;
            println!("Added {} ({})", guest.full_name, guest.id);
        }

        Commands::List {
            sort,
            filter,
            search,
            json,
        } => {
            let ledger = open().context("open store")?;
            let rows = guest::present(ledger.guests(), filter.into(), &search, sort.into());
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&rows).context("serialize roster")?
                );
            } else {
                for g in &rows {
                    let mark = if g.entered { "x" } else { " " };
                    let code = g.ticket_code.as_deref().unwrap_or("------");
                    println!("[{mark}] {code}  {}  {}", g.id, g.full_name);
                }
                let s = guest::stats(ledger.guests());
                println!("{} entered / {} total", s.entered, s.total);
            }
        }

        Commands::Edit { id, name } => {
            let mut ledger = open().context("open store")?;
            ledger.update(id, &name).context("rename guest")?;
            println!("Renamed {id} to {}", name.trim());
        }

        Commands::Remove { id, yes } => {
            let mut ledger = open().context("open store")?;
            let Some(removed) = ledger.delete(id).context("remove guest")? else {
                anyhow::bail!("no guest with id {id}");
            };
            println!("Removed {}", removed.full_name);

            if !yes {
                // The undo slot lives in this process; offer it before exit.
                println!(
                    "Press Enter within {}s to undo",
                    cfg.undo.window_secs
                );
                if wait_for_enter(StdDuration::from_secs(cfg.undo.window_secs)) {
                    ledger.undo_delete().context("undo removal")?;
                    if ledger.guest(id).is_some() {
                        println!("Restored {}", removed.full_name);
                    } else {
                        warn!("undo window lapsed; guest not restored");
                    }
                }
            }
        }

        Commands::CheckIn { id, revert } => {
            let mut ledger = open().context("open store")?;
            anyhow::ensure!(ledger.guest(id).is_some(), "no guest with id {id}");
            ledger
                .toggle_entered(id, !revert)
                .context("set entered flag")?;
            let g = ledger.guest(id).context("reload guest")?;
            println!(
                "{} is now {}",
                g.full_name,
                if g.entered { "entered" } else { "not entered" }
            );
        }

        Commands::Import { csv, column } => {
            let mut ledger = open().context("open store")?;
            let column = column.or_else(|| ledger.event_config().preferred_name_column.clone());
            let names = import::read_names_csv(&csv, column.as_deref()).context("read csv")?;
            let outcome = ledger.add_or_merge(&names).context("merge names")?;
            println!(
                "Imported {} guests ({} duplicates skipped)",
                outcome.added.len(),
                outcome.skipped.len()
            );
            for name in &outcome.skipped {
                println!("  skipped: {}", name.trim());
            }
        }

        Commands::PreviewImport { csv, column } => {
            let ledger = open().context("open store")?;
            let column = column.or_else(|| ledger.event_config().preferred_name_column.clone());
            let names = import::read_names_csv(&csv, column.as_deref()).context("read csv")?;
            let p = import::preview(&ledger, &names);
            println!(
                "{} rows: {} new, {} duplicates",
                p.total_count, p.unique_count, p.duplicate_count
            );
            for name in &p.sample {
                println!("  {name}");
            }
            if p.unique_count > p.sample.len() {
                println!("  ... and {} more", p.unique_count - p.sample.len());
            }
        }

        Commands::Issue { id } => {
            let mut ledger = open().context("open store")?;
            let t = ticket::issue(&mut ledger, id).context("issue ticket")?;
            println!("Code: {}", t.code);
            println!("{}", t.wire_string());
        }

        Commands::Verify { wire } => {
            let ledger = open().context("open store")?;
            match ticket::verify(&ledger, &wire) {
                Ok(g) => println!("Valid ticket for {}", g.full_name),
                Err(e) if e.is_invalid_ticket() => {
                    // One message for every verification failure; the door
                    // display must not reveal why a ticket was rejected.
                    println!("Invalid ticket");
                    std::process::exit(1);
                }
                Err(e) => return Err(e).context("verify ticket"),
            }
        }

        Commands::Scan { wire } => {
            let mut ledger = open().context("open store")?;
            match ticket::check_in(&mut ledger, &wire) {
                Ok(outcome) if outcome.already_entered => {
                    println!("Already entered: {}", outcome.guest.full_name);
                }
                Ok(outcome) => {
                    println!("Welcome, {}", outcome.guest.full_name);
                }
                Err(e) if e.is_invalid_ticket() => {
                    println!("Invalid ticket");
                    std::process::exit(1);
                }
                Err(e) => return Err(e).context("scan ticket"),
            }
        }

        Commands::RotateSecret { yes } => {
            anyhow::ensure!(
                yes,
                "rotating the secret invalidates every issued ticket; pass --yes to confirm"
            );
            let mut ledger = open().context("open store")?;
            let version = ledger.rotate_secret().context("rotate secret")?;
            println!("Secret rotated; key version is now {version}");
            println!("All previously issued tickets are invalid. Reissue as needed.");
        }

        Commands::SetEventName { name } => {
            let mut ledger = open().context("open store")?;
            ledger
                .update_event_config(|c| c.event_name = name.clone())
                .context("set event name")?;
            println!("Event name set to '{name}'");
        }

        Commands::Clear { yes } => {
            anyhow::ensure!(yes, "this deletes every guest; pass --yes to confirm");
            let mut ledger = open().context("open store")?;
            let count = ledger.guests().len();
            ledger.replace_all(Vec::new()).context("clear roster")?;
            println!("Removed {count} guests");
        }

        Commands::Version => {
            println!("{}", util::version_string());
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Block until Enter is pressed or `window` elapses.  Returns true if a line
/// arrived in time.
fn wait_for_enter(window: StdDuration) -> bool {
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_ok() {
            let _ = tx.send(());
        }
    });
    rx.recv_timeout(window).is_ok()
}

fn init_logging(cfg: &gatekey_core::config::LoggingConfig) {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    let registry = tracing_subscriber::registry().with(filter);

    if cfg.json_stdout {
        // JSON output to stdout for pipelines.
        let json_layer = tracing_subscriber::fmt::layer().json();
        registry.with(json_layer).init();
        return;
    }

    match open_json_log(&cfg.json_log_file) {
        Some(log_file) => {
            // JSON-lines output to file, human output on stderr.
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::sync::Mutex::new(log_file));
            let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            registry.with(file_layer).with(console_layer).init();
        }
        None => {
            // Default: human-readable output to stderr, stdout stays clean
            // for command output.
            let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            registry.with(console_layer).init();
        }
    }
}

/// Open the configured JSON log file for appending.  An empty path means no
/// file logging; an unopenable path degrades to stderr-only logging instead
/// of aborting the command.
fn open_json_log(path: &str) -> Option<std::fs::File> {
    if path.is_empty() {
        return None;
    }
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => Some(f),
        Err(e) => {
            eprintln!("warning: cannot open json log file {path}: {e}; logging to stderr");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_log_open_degrades_instead_of_panicking() {
        assert!(open_json_log("").is_none());
        // Parent directory does not exist; must fall back, not abort.
        assert!(open_json_log("/nonexistent-dir-xyz/gatekey.log").is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gatekey.log");
        assert!(open_json_log(path.to_str().unwrap()).is_some());
    }
}
