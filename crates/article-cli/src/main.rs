use anyhow::{bail, Context, Result};
use article_core::diff::{DiffAlgorithm, DiffKind, DiffLine, DiffSummary};
use article_core::ledger::CodeVersion;
use article_core::session_store::SessionStore;
use article_core::settings::{self, EngineSettings};
use clap::{Parser, Subcommand};
use log::debug;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Inspect digital article diffs, history and settings",
    long_about = None
)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a line diff between two versions of a cell's code
    Diff {
        /// File holding the original code
        original: PathBuf,
        /// File holding the edited code
        current: PathBuf,
        /// Diff algorithm (positional, lcs)
        #[arg(long, short)]
        algorithm: Option<DiffAlgorithm>,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Show saved version history of a notebook
    History {
        /// Notebook id
        notebook_id: String,
        /// Only show versions of this cell
        cell_id: Option<String>,
        /// Session directory (defaults to the user data directory)
        #[arg(long)]
        store: Option<PathBuf>,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Delete the saved history instead of showing it
        #[arg(long, conflicts_with = "cell_id")]
        clear: bool,
    },
    /// Engine settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print the current settings
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Change one setting
    Set {
        /// retry-cap, autofix, diff-algorithm, stop-rerun-on-error, preview-char-limit
        key: String,
        value: String,
    },
    /// Print the JSON Schema of the settings file
    Schema,
    /// Print the settings file location
    Path,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    match cli.command {
        Commands::Diff {
            original,
            current,
            algorithm,
            json,
        } => diff_command(&original, &current, algorithm, json),
        Commands::History {
            notebook_id,
            cell_id,
            store,
            json,
            clear,
        } => {
            let store = SessionStore::new(store.unwrap_or_else(SessionStore::default_dir));
            if clear {
                clear_history(&store, &notebook_id)
            } else {
                history_command(&store, &notebook_id, cell_id.as_deref(), json)
            }
        }
        Commands::Settings { command } => settings_command(command),
    }
}

// =============================================================================
// diff
// =============================================================================

#[derive(Serialize)]
struct DiffOutput {
    algorithm: DiffAlgorithm,
    summary: DiffSummary,
    lines: Vec<DiffLine>,
}

fn diff_command(
    original: &Path,
    current: &Path,
    algorithm: Option<DiffAlgorithm>,
    json: bool,
) -> Result<()> {
    let original_code = std::fs::read_to_string(original)
        .with_context(|| format!("Failed to read {}", original.display()))?;
    let current_code = std::fs::read_to_string(current)
        .with_context(|| format!("Failed to read {}", current.display()))?;

    let algorithm = algorithm.unwrap_or_else(|| settings::load_settings().diff_algorithm);
    debug!("Diffing with {} algorithm", algorithm);
    let lines = algorithm.engine().compute(&original_code, &current_code);
    let summary = DiffSummary::from_lines(&lines);

    if json {
        let output = DiffOutput {
            algorithm,
            summary,
            lines,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for line in &lines {
        match line.kind {
            DiffKind::Unchanged => println!("{:>4}   {}", line.line_number, line.content),
            DiffKind::Added => println!("{:>4} + {}", line.line_number, line.content),
            DiffKind::Removed => println!("{:>4} - {}", line.line_number, line.content),
            DiffKind::Modified => {
                let previous = line.previous.as_deref().unwrap_or("");
                println!("{:>4} - {}", line.line_number, previous);
                println!("{:>4} + {}", line.line_number, line.content);
            }
        }
    }
    println!();
    println!(
        "{} unchanged, {} added, {} removed, {} modified",
        summary.unchanged, summary.added, summary.removed, summary.modified
    );
    Ok(())
}

// =============================================================================
// history
// =============================================================================

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "VERSION")]
    version: u32,
    #[tabled(rename = "ORIGIN")]
    origin: String,
    #[tabled(rename = "CREATED")]
    created_at: String,
    #[tabled(rename = "LINES")]
    lines: usize,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

impl From<&CodeVersion> for VersionRow {
    fn from(version: &CodeVersion) -> Self {
        VersionRow {
            version: version.version,
            origin: version.origin.to_string(),
            created_at: version.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            lines: version.content.lines().count(),
            description: version
                .description
                .as_deref()
                .map(|d| truncate(d, 60))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Tabled)]
struct CellHistoryRow {
    #[tabled(rename = "CELL")]
    cell_id: String,
    #[tabled(rename = "VERSIONS")]
    versions: usize,
    #[tabled(rename = "LATEST")]
    latest_origin: String,
}

fn history_command(
    store: &SessionStore,
    notebook_id: &str,
    cell_id: Option<&str>,
    json: bool,
) -> Result<()> {
    let Some(record) = store.load(notebook_id) else {
        bail!(
            "No saved history for notebook {} in {}",
            notebook_id,
            shorten_path(store.dir())
        );
    };

    match cell_id {
        Some(cell_id) => {
            let Some(ledger) = record.ledgers.get(cell_id) else {
                bail!("Notebook {} has no history for cell {}", notebook_id, cell_id);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(ledger)?);
                return Ok(());
            }
            let rows: Vec<VersionRow> = ledger
                .history()
                .into_iter()
                .map(VersionRow::from)
                .collect();
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        None => {
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
                return Ok(());
            }
            let rows: Vec<CellHistoryRow> = record
                .ledgers
                .iter()
                .map(|(id, ledger)| CellHistoryRow {
                    cell_id: id.clone(),
                    versions: ledger.len(),
                    latest_origin: ledger
                        .latest()
                        .map(|v| v.origin.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            if rows.is_empty() {
                println!("No cell history saved for {}", notebook_id);
                return Ok(());
            }
            println!("Saved at {}", record.saved_at);
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
    }
    Ok(())
}

fn clear_history(store: &SessionStore, notebook_id: &str) -> Result<()> {
    if store.load(notebook_id).is_none() {
        println!("No saved history for {}", notebook_id);
        return Ok(());
    }
    store.clear(notebook_id);
    println!("Cleared saved history for {}", notebook_id);
    Ok(())
}

// =============================================================================
// settings
// =============================================================================

fn settings_command(command: SettingsCommands) -> Result<()> {
    match command {
        SettingsCommands::Show { json } => {
            let settings = settings::load_settings();
            if json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                print_settings(&settings);
            }
        }
        SettingsCommands::Set { key, value } => {
            let mut settings = settings::load_settings();
            apply_setting(&mut settings, &key, &value)?;
            settings::save_settings(&settings)?;
            print_settings(&settings);
        }
        SettingsCommands::Schema => println!("{}", settings::settings_schema()?),
        SettingsCommands::Path => println!("{}", shorten_path(&settings::settings_path())),
    }
    Ok(())
}

fn apply_setting(settings: &mut EngineSettings, key: &str, value: &str) -> Result<()> {
    match key.replace('_', "-").as_str() {
        "retry-cap" => {
            let cap: u32 = value
                .parse()
                .with_context(|| format!("Invalid retry cap: {value}"))?;
            if !(1..=article_core::retry::MAX_RETRY_CAP).contains(&cap) {
                bail!(
                    "Retry cap must be between 1 and {}",
                    article_core::retry::MAX_RETRY_CAP
                );
            }
            settings.retry_cap = cap;
        }
        "autofix" => settings.autofix = parse_bool(value)?,
        "diff-algorithm" => {
            settings.diff_algorithm = value.parse().map_err(anyhow::Error::msg)?;
        }
        "stop-rerun-on-error" => settings.stop_rerun_on_error = parse_bool(value)?,
        "preview-char-limit" => {
            settings.preview_char_limit = value
                .parse()
                .with_context(|| format!("Invalid character limit: {value}"))?;
        }
        other => bail!("Unknown setting: {other}"),
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        other => bail!("Expected true or false, got {other}"),
    }
}

fn print_settings(settings: &EngineSettings) {
    println!("retry-cap:           {}", settings.effective_retry_cap());
    println!("autofix:             {}", settings.autofix);
    println!("diff-algorithm:      {}", settings.diff_algorithm);
    println!("stop-rerun-on-error: {}", settings.stop_rerun_on_error);
    println!("preview-char-limit:  {}", settings.preview_char_limit);
}

/// Shorten a path for display by replacing home directory with ~
fn shorten_path(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(relative) = path.strip_prefix(&home) {
            return format!("~/{}", relative.display());
        }
    }
    path.display().to_string()
}

/// Truncate to `max_len` characters on a single line.
fn truncate(text: &str, max_len: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max_len {
        single_line
    } else {
        let cut: String = single_line.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
