//! notepad-daemon: realtime note hub and file-backed notepad client.
//!
//! `serve` runs the hub that stores notes and pushes changes to subscribers.
//! `edit` mirrors one note into a local file: edits to the file are written
//! to the hub after a quiet period, and changes from other editors land in
//! the file. Lock and share commands are read from stdin.

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use notepad_core::identity::NOTES_ROUTE_PREFIX;
use notepad_core::{EventBus, FormatCommand, Navigator, NotepadConfig, NotepadEvent};
use notepad_daemon::watcher::FileEventKind;
use notepad_daemon::{
    FileSurface, FileWatcher, HubDaemon, RemoteStore, SessionCommand, SessionHandle, WebSocketServer, open_session,
};

#[derive(Parser, Debug)]
#[command(name = "notepad-daemon")]
#[command(about = "Shared notepad hub and file-backed editor")]
struct Cli {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the hub
    Serve(ServeArgs),
    /// Edit a note through a local file
    Edit(EditArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on for client connections
    #[arg(short, long, env = "NOTEPAD_LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,

    /// Directory holding notes.json
    #[arg(short, long, env = "NOTEPAD_DATA_DIR", default_value = "notepad-data")]
    data_dir: PathBuf,
}

#[derive(Args, Debug)]
struct EditArgs {
    /// Hub WebSocket URL
    #[arg(short, long, env = "NOTEPAD_SERVER", default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Note to open: a share URL, a `#/notes/<id>` fragment or a bare id.
    /// A new note is created when omitted.
    #[arg(short, long)]
    note: Option<String>,

    /// File the note is mirrored into
    #[arg(short, long)]
    file: PathBuf,

    /// Quiet period before an edit is written
    #[arg(long, default_value_t = 500)]
    debounce_ms: u64,

    /// Page address used to build share links
    #[arg(long, default_value = "http://localhost:8080/")]
    share_base: String,
}

/// Navigator over the `--note` argument.
struct ArgNavigator {
    fragment: Option<String>,
}

impl ArgNavigator {
    fn new(note: Option<&str>) -> Self {
        let fragment = note.map(|note| match note.split_once('#') {
            Some((_, fragment)) => fragment.to_string(),
            None if note.starts_with(NOTES_ROUTE_PREFIX) => note.to_string(),
            None => format!("{}{}", NOTES_ROUTE_PREFIX, note),
        });
        Self { fragment }
    }
}

impl Navigator for ArgNavigator {
    fn fragment(&self) -> Option<String> {
        self.fragment.clone()
    }

    fn set_fragment(&mut self, fragment: &str) {
        info!("Note address: #{}", fragment);
        self.fragment = Some(fragment.to_string());
    }
}

/// A line typed on stdin.
enum StdinCommand {
    Session(SessionCommand),
    Share,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<StdinCommand>> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let command = match word {
        "" => return Ok(None),
        "lock" => StdinCommand::Session(SessionCommand::RequestLock),
        "unlock" => StdinCommand::Session(SessionCommand::RequestUnlock),
        "password" if !rest.is_empty() => StdinCommand::Session(SessionCommand::SubmitPassword(rest.to_string())),
        "password" => return Err(anyhow!("usage: password <password>")),
        "cancel" => StdinCommand::Session(SessionCommand::CancelPrompt),
        "clear" => StdinCommand::Session(SessionCommand::Clear),
        "flush" => StdinCommand::Session(SessionCommand::Flush),
        "format" => {
            let (name, value) = match rest.split_once(' ') {
                Some((name, value)) => (name, Some(value.trim())),
                None => (rest, None),
            };
            StdinCommand::Session(SessionCommand::Format(FormatCommand::parse(name, value)?))
        }
        "image" if !rest.is_empty() => {
            let path = Path::new(rest);
            let bytes = std::fs::read(path)?;
            StdinCommand::Session(SessionCommand::InsertImage {
                mime: image_mime(path).to_string(),
                bytes,
            })
        }
        "image" => return Err(anyhow!("usage: image <path>")),
        "share" => StdinCommand::Share,
        "quit" | "exit" => StdinCommand::Quit,
        other => return Err(anyhow!("unknown command: {}", other)),
    };
    Ok(Some(command))
}

/// MIME type for an image file, from its extension.
fn image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

fn log_event(event: NotepadEvent) {
    match event {
        NotepadEvent::DocumentResolved { note_id, created } => {
            info!("Opened note {}{}", note_id, if created { " (new)" } else { "" });
        }
        NotepadEvent::RemoteApplied { size } => info!("Received update ({} bytes)", size),
        NotepadEvent::WriteFlushed { size, .. } => info!("Saved ({} bytes)", size),
        NotepadEvent::WriteFailed { message } => warn!("Save failed: {}", message),
        NotepadEvent::LockChanged { locked } => info!("Note {}", if locked { "locked" } else { "unlocked" }),
        NotepadEvent::PromptOpened { mode } if mode == "set" => info!("Choose a password: password <pw>"),
        NotepadEvent::PromptOpened { .. } => info!("Enter the password: password <pw>"),
        NotepadEvent::UnlockRejected => warn!("Incorrect password."),
        NotepadEvent::RemoteSkipped => {}
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    info!("Data directory: {:?}", args.data_dir);

    let server_id = format!("hub-{}", uuid::Uuid::new_v4());
    let daemon = HubDaemon::open(&args.data_dir, server_id)?;
    let listener = WebSocketServer::bind(&args.listen).await?;

    info!("Hub running. Press Ctrl+C to stop.");
    daemon
        .run(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

async fn edit(args: EditArgs) -> Result<()> {
    let config = NotepadConfig::default().with_debounce_ms(args.debounce_ms);
    let store = Arc::new(RemoteStore::connect(&args.server).await?);
    let surface = FileSurface::open(&args.file)?;

    let events = EventBus::shared();
    let _log = events.subscribe(log_event);

    let mut navigator = ArgNavigator::new(args.note.as_deref());
    let handle = match open_session(store, &mut navigator, surface, &config, events).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to open note: {}", e);
            return Err(e.into());
        }
    };
    info!("Share link: {}", handle.share_url(&args.share_base));

    let mut watcher = FileWatcher::new(&args.file)?;
    info!("Editing {:?}. Commands: lock, unlock, password <pw>, cancel, clear, share, quit", args.file);

    run_editor(&handle, &mut watcher, &args.share_base).await;

    handle.shutdown().await;
    info!("Shutting down");
    Ok(())
}

async fn run_editor(handle: &SessionHandle, watcher: &mut FileWatcher, share_base: &str) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            Some(kind) = watcher.recv() => {
                match kind {
                    FileEventKind::Modified => match tokio::fs::read_to_string(watcher.path()).await {
                        Ok(markup) => {
                            handle.send(SessionCommand::Edit(markup));
                        }
                        Err(e) => warn!("Failed to read {:?}: {}", watcher.path(), e),
                    },
                    FileEventKind::Deleted => {
                        warn!("{:?} was deleted; remote changes will recreate it", watcher.path());
                    }
                }
            }

            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match parse_command(&line) {
                        Ok(Some(StdinCommand::Session(command))) => {
                            if !handle.send(command) {
                                error!("Session stopped");
                                break;
                            }
                        }
                        Ok(Some(StdinCommand::Share)) => println!("{}", handle.share_url(share_base)),
                        Ok(Some(StdinCommand::Quit)) => break,
                        Ok(None) => {}
                        Err(e) => warn!("{}", e),
                    },
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if cli.verbose {
        "debug,notepad_daemon=debug,notepad_core=debug"
    } else {
        "info,notepad_daemon=info,notepad_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Edit(args) => edit(args).await,
    }
}
