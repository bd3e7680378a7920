use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use roofsketch_contracts::credentials::{Credential, CredentialStore};
use roofsketch_contracts::events::{EventKind, EventWriter};
use roofsketch_contracts::material::RoofMaterial;
use roofsketch_contracts::shell::{parse_intent, SHELL_HELP_COMMANDS};
use roofsketch_engine::{
    latest_download_name, write_download, write_history_entry, GeminiSketchProvider,
    GenerateOutcome, GenerationAttempt, RawFile, SketchSession, UploadState,
};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "roofsketch",
    version,
    about = "Turn a roof photo into an architectural line sketch"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Key(KeyArgs),
    Shell(ShellArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value = "shingle")]
    material: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct KeyArgs {
    #[command(subcommand)]
    action: KeyAction,
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Defaults to `events.jsonl` next to the settings file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum KeyAction {
    Set { value: String },
    Status,
}

#[derive(Debug, Parser)]
struct ShellArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long, default_value = "shingle")]
    material: String,
}

const EXIT_CREDENTIAL_REQUIRED: i32 = 2;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("roofsketch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Key(args) => run_key(args),
        Command::Shell(args) => {
            run_shell(args)?;
            Ok(0)
        }
    }
}

fn parse_material(raw: &str) -> Result<RoofMaterial> {
    raw.parse::<RoofMaterial>().map_err(anyhow::Error::msg)
}

fn open_session(
    credential: Credential,
    out_dir: &Path,
    events_path: Option<PathBuf>,
) -> Result<(SketchSession, EventWriter)> {
    let events_path = events_path.unwrap_or_else(|| out_dir.join("events.jsonl"));
    let events = EventWriter::new(events_path, Uuid::new_v4().to_string());
    let session = SketchSession::new(Arc::new(GeminiSketchProvider::new()), credential)
        .with_events(events.clone());
    Ok((session, events))
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let material = parse_material(&args.material)?;
    let store = CredentialStore::locate(args.settings.as_deref());
    let (mut session, events) = open_session(store.resolve(), &args.out, args.events.clone())?;
    session.set_material(material);

    session.select_file(RawFile::from_path(&args.image))?;
    session.settle()?;
    if let UploadState::Rejected(err) = session.upload() {
        eprintln!("{err} ({})", args.image.display());
        return Ok(1);
    }

    match session.generate()? {
        GenerateOutcome::Started => {}
        GenerateOutcome::CredentialRequired => {
            eprintln!(
                "API key required. Save one with `roofsketch key set <KEY>` or set GEMINI_API_KEY."
            );
            return Ok(EXIT_CREDENTIAL_REQUIRED);
        }
        other => bail!("generation did not start ({other:?})"),
    }
    println!(
        "Generating {} sketch with {}...",
        material.label(),
        session.provider().model()
    );
    session.settle()?;

    match session.attempt().clone() {
        GenerationAttempt::Success(image) => {
            let latest = write_download(&args.out, &latest_download_name(&image), &image)?;
            note_download(&events, &latest);
            if let Some(entry) = session.history().latest() {
                let path = write_history_entry(&args.out, entry)?;
                note_download(&events, &path);
            }
            println!("Sketch saved to {}", latest.display());
            Ok(0)
        }
        GenerationAttempt::Error(message) => {
            eprintln!("Sketch failed: {message}");
            Ok(1)
        }
        other => bail!("generation ended in unexpected state {other:?}"),
    }
}

fn run_key(args: KeyArgs) -> Result<i32> {
    let store = CredentialStore::locate(args.settings.as_deref());
    match args.action {
        KeyAction::Set { value } => match store.save(&value)? {
            Some(credential) => {
                let events_path = args.events.unwrap_or_else(|| {
                    store
                        .path()
                        .parent()
                        .map(|dir| dir.join("events.jsonl"))
                        .unwrap_or_else(|| PathBuf::from("events.jsonl"))
                });
                let events = EventWriter::new(events_path, Uuid::new_v4().to_string());
                note_credential_saved(&events, &store);
                println!(
                    "Saved API key {} to {}",
                    credential.masked(),
                    store.path().display()
                );
                Ok(0)
            }
            None => {
                println!("Nothing to save; API key unchanged.");
                Ok(0)
            }
        },
        KeyAction::Status => {
            let credential = store.resolve();
            println!(
                "API key: {} (source: {})",
                credential.masked(),
                credential.source().as_str()
            );
            Ok(if credential.is_present() {
                0
            } else {
                EXIT_CREDENTIAL_REQUIRED
            })
        }
    }
}

fn run_shell(args: ShellArgs) -> Result<()> {
    let store = CredentialStore::locate(args.settings.as_deref());
    let (mut session, events) = open_session(store.resolve(), &args.out, args.events.clone())?;
    session.set_material(parse_material(&args.material)?);

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Roof sketch shell. Open a roof photo to begin; /help lists commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => {}
            "help" => {
                println!("Commands: {}", SHELL_HELP_COMMANDS.join(" "));
            }
            "quit" => break,
            "open_file" => {
                let Some(path) = intent.arg("path") else {
                    println!("/open requires a path");
                    continue;
                };
                session.select_file(RawFile::from_path(path))?;
                session.settle()?;
                match session.upload() {
                    UploadState::Ready(upload) => println!(
                        "Loaded {path} ({}x{}, {})",
                        upload.width, upload.height, upload.mime
                    ),
                    UploadState::Rejected(err) => println!("{err} Try another file."),
                    UploadState::Empty | UploadState::Validating => {}
                }
            }
            "set_material" => match intent.arg("material").map(parse_material) {
                Some(Ok(material)) => {
                    session.set_material(material);
                    println!("Material set to {}", material.label());
                }
                Some(Err(err)) => println!("{err}"),
                None => println!(
                    "Material: {} (options: {})",
                    session.material().label(),
                    RoofMaterial::ALL
                        .iter()
                        .map(|material| material.short_name())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            },
            "set_key" => {
                let raw = intent.arg("key").unwrap_or_default();
                match store.save(raw)? {
                    Some(credential) => {
                        println!("API key saved ({})", credential.masked());
                        session.set_credential(credential);
                        note_credential_saved(&events, &store);
                    }
                    None => println!("/key requires a value; API key unchanged."),
                }
            }
            "generate" => match session.generate()? {
                GenerateOutcome::CredentialRequired => {
                    println!("API key required. Set it with /key <value>.");
                }
                GenerateOutcome::NotReady => {
                    println!("Open a roof photo (at least 256x256 JPG, PNG, or WEBP) first.");
                }
                GenerateOutcome::AlreadyLoading => {
                    println!("A sketch is already generating.");
                }
                GenerateOutcome::Started => {
                    println!("Generating {} sketch...", session.material().label());
                    session.settle()?;
                    report_attempt(&session, &args.out, &events)?;
                }
            },
            "status" => print_status(&session),
            "history" => {
                if session.history().is_empty() {
                    println!("No sketches yet.");
                }
                for entry in session.history().entries() {
                    println!(
                        "{}  {}  {}",
                        entry.id,
                        entry.created_at.to_rfc3339(),
                        entry.download_name()
                    );
                }
            }
            "save" => {
                let entry = match intent.arg("id") {
                    Some(id) => session.history().get(id),
                    None => session.history().latest(),
                };
                match entry {
                    Some(entry) => {
                        let path = write_history_entry(&args.out, entry)?;
                        note_download(&events, &path);
                        println!("Saved {}", path.display());
                    }
                    None => println!("No sketch to save."),
                }
            }
            "unknown" => {
                let command = intent.arg("command").unwrap_or_default();
                println!("Unknown command: /{command}");
            }
            other => println!("Unhandled action: {other}"),
        }
    }

    Ok(())
}

fn report_attempt(session: &SketchSession, out_dir: &Path, events: &EventWriter) -> Result<()> {
    match session.attempt() {
        GenerationAttempt::Success(image) => {
            let path = write_download(out_dir, &latest_download_name(image), image)?;
            note_download(events, &path);
            let id = session
                .history()
                .latest()
                .map(|entry| entry.id.as_str())
                .unwrap_or("-");
            println!("Sketch {id} ready: {}", path.display());
        }
        GenerationAttempt::Error(message) => println!("Sketch failed: {message}"),
        GenerationAttempt::Idle | GenerationAttempt::Loading => {}
    }
    Ok(())
}

fn print_status(session: &SketchSession) {
    let upload = match session.upload() {
        UploadState::Empty => "none".to_string(),
        UploadState::Validating => "validating".to_string(),
        UploadState::Ready(upload) => {
            format!("{}x{} {}", upload.width, upload.height, upload.mime)
        }
        UploadState::Rejected(err) => format!("rejected: {err}"),
    };
    let attempt = match session.attempt() {
        GenerationAttempt::Idle => "idle".to_string(),
        GenerationAttempt::Loading => "loading".to_string(),
        GenerationAttempt::Success(image) => format!("success ({})", image.mime_type),
        GenerationAttempt::Error(message) => format!("error: {message}"),
    };
    println!("Upload: {upload}");
    println!("Material: {}", session.material().label());
    println!("Sketch: {attempt}");
    println!(
        "API key: {} (source: {})",
        session.credential().masked(),
        session.credential().source().as_str()
    );
    println!("History: {} sketch(es)", session.history().len());
}

// The log is a side channel; a failed write never fails the command.
fn note_download(events: &EventWriter, path: &Path) {
    events.record(
        EventKind::DownloadWritten,
        json!({ "path": path.to_string_lossy() }),
    );
}

fn note_credential_saved(events: &EventWriter, store: &CredentialStore) {
    events.record(
        EventKind::CredentialSaved,
        json!({ "settings_path": store.path().to_string_lossy() }),
    );
}
