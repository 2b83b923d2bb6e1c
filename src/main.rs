use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use facesort::config::Config;
use facesort::db::Database;
use facesort::export::export_person_photos;
use facesort::faces::{Dbscan, OnnxFaceExtractor};
use facesort::logging;
use facesort::people::{rename_or_merge, RenameOutcome};
use facesort::scanner::{ScanOrchestrator, ScanStatus};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_HISTORY: usize = 10;

enum Command {
    Scan { dir: PathBuf, json: bool },
    Library(LibraryCommand),
}

/// Commands that only read or edit the store
enum LibraryCommand {
    People { all: bool },
    Rename { person_id: i64, name: String },
    Hide { person_id: i64 },
    Favorite { image_id: i64, on: bool },
    Favorites,
    Export { dest: PathBuf, person_ids: Vec<i64> },
    History { limit: usize },
}

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut json = false;
    let mut all = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("facesort {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    usage_error("--config requires a path argument");
                }
            }
            "--json" => json = true,
            "--all" => all = true,
            arg if arg.starts_with('-') && arg.len() > 1 => {
                usage_error(&format!("Unknown argument: {}", arg));
            }
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    let Some((name, rest)) = positional.split_first() else {
        usage_error("No command given");
    };

    let command = match (name.as_str(), rest) {
        ("scan", [dir]) => Command::Scan {
            dir: PathBuf::from(dir),
            json,
        },
        ("people", []) => Command::Library(LibraryCommand::People { all }),
        ("rename", [id, words @ ..]) if !words.is_empty() => Command::Library(LibraryCommand::Rename {
            person_id: parse_id(id),
            name: words.join(" "),
        }),
        ("hide", [id]) => Command::Library(LibraryCommand::Hide {
            person_id: parse_id(id),
        }),
        ("favorite", [id, state]) => Command::Library(LibraryCommand::Favorite {
            image_id: parse_id(id),
            on: match state.as_str() {
                "on" => true,
                "off" => false,
                other => usage_error(&format!("Expected on or off, got {}", other)),
            },
        }),
        ("favorites", []) => Command::Library(LibraryCommand::Favorites),
        ("export", [dest, ids @ ..]) if !ids.is_empty() => Command::Library(LibraryCommand::Export {
            dest: PathBuf::from(dest),
            person_ids: ids.iter().map(|id| parse_id(id)).collect(),
        }),
        ("history", []) => Command::Library(LibraryCommand::History {
            limit: DEFAULT_HISTORY,
        }),
        ("history", [n]) => Command::Library(LibraryCommand::History {
            limit: n
                .parse()
                .unwrap_or_else(|_| usage_error(&format!("Not a count: {}", n))),
        }),
        _ => usage_error(&format!("Invalid use of '{}'", name)),
    };

    Args {
        config_path,
        command,
    }
}

fn parse_id(value: &str) -> i64 {
    value
        .parse()
        .unwrap_or_else(|_| usage_error(&format!("Not an id: {}", value)))
}

fn usage_error(message: &str) -> ! {
    eprintln!("Error: {}", message);
    eprintln!("Run 'facesort --help' for usage.");
    std::process::exit(2);
}

fn print_help() {
    println!(
        r#"facesort - group the faces in a photo library into people

USAGE:
    facesort [OPTIONS] <COMMAND>

COMMANDS:
    scan <DIR> [--json]           Scan a directory tree and regroup all faces
    people [--all]                List people (--all includes hidden ones)
    rename <PERSON_ID> <NAME>     Name a person; merges into an existing person of that name
    hide <PERSON_ID>              Hide a person from listings
    favorite <IMAGE_ID> on|off    Mark or unmark an image as favorite
    favorites                     List favorite images
    export <DEST> <PERSON_ID>...  Copy every photo of the given people into DEST
    history [N]                   Show the last N scans (default 10)

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    FACESORT_CONFIG     Path to config file (overrides default location)
    FACESORT_LOG        Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/facesort/config.toml"#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let config = match args.config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    match args.command {
        Command::Scan { dir, json } => run_scan(config, dir, json),
        Command::Library(command) => {
            let db = Database::open(&config.db_path)?;
            db.initialize()?;
            run_command(&db, command)
        }
    }
}

fn run_scan(config: Config, dir: PathBuf, json: bool) -> Result<()> {
    let extractor = OnnxFaceExtractor::new(config.faces.models_dir.clone());
    extractor
        .init_models()
        .context("Face models are not available")?;

    let orchestrator = ScanOrchestrator::new(config, Arc::new(extractor), Arc::new(Dbscan));
    let handle = match orchestrator.start_scan(&dir) {
        Ok(handle) => handle,
        Err(e) => bail!("Scan not started: {}", e),
    };

    let mut shown = None;
    loop {
        let progress = orchestrator.get_progress();
        if progress.is_finished() {
            break;
        }
        if !json && shown != Some((progress.current, progress.total)) {
            eprint!("\r[{:>3}%] {}/{} {:<40}", progress.percent(), progress.current, progress.total, progress.message);
            let _ = std::io::stderr().flush();
            shown = Some((progress.current, progress.total));
        }
        thread::sleep(POLL_INTERVAL);
    }
    if handle.join().is_err() {
        tracing::error!("Scan worker panicked");
    }

    let progress = orchestrator.get_progress();
    if json {
        let report = serde_json::json!({
            "progress": progress,
            "summary": orchestrator.last_summary(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        if shown.is_some() {
            eprintln!();
        }
        println!("{}", progress.message);
    }

    if progress.status == ScanStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn run_command(db: &Database, command: LibraryCommand) -> Result<()> {
    match command {
        LibraryCommand::People { all } => {
            let people = db.get_all_people(all)?;
            if people.is_empty() {
                println!("No people yet. Run 'facesort scan <DIR>' first.");
            }
            for person in people {
                let hidden = if person.is_hidden { "  (hidden)" } else { "" };
                println!("{:>6}  {:>5} faces  {}{}", person.id, person.face_count, person.name, hidden);
            }
        }
        LibraryCommand::Rename { person_id, name } => match rename_or_merge(db, person_id, &name)? {
            RenameOutcome::Renamed => println!("Person {} is now '{}'", person_id, name.trim()),
            RenameOutcome::Merged { into } => {
                println!("Merged person {} into person {} ('{}')", person_id, into, name.trim())
            }
            RenameOutcome::NotFound => bail!("No person with id {}", person_id),
        },
        LibraryCommand::Hide { person_id } => {
            if !db.hide_person(person_id)? {
                bail!("No person with id {}", person_id);
            }
            println!("Person {} hidden", person_id);
        }
        LibraryCommand::Favorite { image_id, on } => {
            if !db.set_favorite(image_id, on)? {
                bail!("No image with id {}", image_id);
            }
            println!("Image {} {}", image_id, if on { "marked favorite" } else { "unmarked" });
        }
        LibraryCommand::Favorites => {
            for image in db.favorite_images()? {
                println!("{:>6}  {:<19}  {}", image.id, image.captured_at.as_deref().unwrap_or("-"), image.path);
            }
        }
        LibraryCommand::Export { dest, person_ids } => {
            let summary = export_person_photos(db, &person_ids, &dest)?;
            println!("Copied {} photos to {}", summary.copied.len(), dest.display());
            for skipped in &summary.skipped {
                println!("  skipped {}", skipped);
            }
        }
        LibraryCommand::History { limit } => {
            for scan in db.recent_scans(limit)? {
                println!(
                    "{:>4}  {}  {:<9}  {} files, {} new images, {} new faces  {}",
                    scan.id,
                    scan.started_at,
                    scan.status.as_str(),
                    scan.files_found,
                    scan.images_new,
                    scan.faces_new,
                    scan.directory
                );
            }
        }
    }
    Ok(())
}
