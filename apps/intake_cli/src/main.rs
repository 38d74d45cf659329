use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{FormModel, LiveForm, PersistenceController, PersistenceOptions};
use storage::{FileStore, KeyValueStore, PersistedSnapshot, DEFAULT_STORAGE_KEY};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod session;

use session::{complete_submission, parse_line, SessionCommand, HELP};

const DEFAULT_FIELDS: &[&str] = &[
    "full_name",
    "birth_date",
    "gender",
    "phone",
    "address",
    "complaints",
    "anamnesis_morbi",
    "anamnesis_vitae",
    "allergies",
    "blood_pressure",
    "pulse",
    "temperature",
];

#[derive(Parser, Debug)]
#[command(about = "Fill in a patient intake form with an interruption-safe draft")]
struct Cli {
    /// Directory holding saved drafts.
    #[arg(long, default_value = "./data/drafts")]
    store_dir: PathBuf,
    #[arg(long, default_value = DEFAULT_STORAGE_KEY)]
    storage_key: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Edit the form interactively, restoring any saved draft first.
    Fill {
        /// Quiet period after the last edit before the draft is written.
        #[arg(long, default_value_t = 10_000)]
        debounce_ms: u64,
        /// Form schema; defaults to the standard intake fields.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },
    /// Print the saved draft.
    Show,
    /// Delete the saved draft.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let store = Arc::new(FileStore::open(&cli.store_dir)?);

    match cli.command {
        Command::Fill {
            debounce_ms,
            fields,
        } => {
            let fields = if fields.is_empty() {
                DEFAULT_FIELDS.iter().map(|field| field.to_string()).collect()
            } else {
                fields
            };
            let options = PersistenceOptions {
                storage_key: cli.storage_key,
                debounce: Duration::from_millis(debounce_ms),
            };
            fill(store, fields, options).await?;
        }
        Command::Show => show(store.as_ref(), &cli.storage_key)?,
        Command::Clear => {
            store.remove(&cli.storage_key)?;
            println!("draft '{}' cleared", cli.storage_key);
        }
    }

    Ok(())
}

async fn fill(
    store: Arc<FileStore>,
    fields: Vec<String>,
    options: PersistenceOptions,
) -> Result<()> {
    let form = Arc::new(LiveForm::new(fields));
    let controller = PersistenceController::new(form.clone(), store, options);

    let report = controller.initialize();
    if report.corrupt {
        println!("saved draft is unreadable; starting from an empty form");
    } else if report.restored_anything() {
        println!("restored {} field(s) from the saved draft", report.restored.len());
    }
    let observer = controller.observe();
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_line(&line) else {
            continue;
        };
        match command {
            SessionCommand::Set { field, value } => {
                if !form.set_value(&field, value) {
                    println!("unknown field '{field}'");
                }
            }
            SessionCommand::Save => {
                if controller.save_now() {
                    println!("draft saved");
                } else {
                    println!("draft could not be saved; continuing without it");
                }
            }
            SessionCommand::Show => print_record(form.as_ref()),
            SessionCommand::Submit => {
                complete_submission(&form, &controller);
                info!("intake form submitted");
                println!("form submitted; draft discarded");
            }
            SessionCommand::Quit => {
                controller.save_now();
                break;
            }
            SessionCommand::Help => println!("{HELP}"),
            SessionCommand::Unknown(line) => println!("unrecognised input '{line}', try :help"),
        }
    }

    observer.unsubscribe();
    Ok(())
}

fn show(store: &dyn KeyValueStore, key: &str) -> Result<()> {
    let Some(stored) = store.get(key)? else {
        println!("no saved draft under '{key}'");
        return Ok(());
    };
    let snapshot = PersistedSnapshot::parse(&stored)?;
    println!(
        "draft '{key}' saved {}",
        snapshot.written_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for (field, value) in snapshot.record.iter().filter(|(_, value)| !value.is_empty()) {
        println!("  {field}: {value}");
    }
    Ok(())
}

fn print_record(form: &dyn FormModel) {
    for (field, value) in form.values().iter() {
        println!("  {field}: {value}");
    }
}
