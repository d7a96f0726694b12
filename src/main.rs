//! PhaseFlow CLI Entry Point
//!
//! Runs flow definition files through the engine, parks suspended messages
//! as checkpoint files and resumes them later.
//!
//! # Usage
//!
//! ```bash
//! # Drive a message through the inbound flow
//! phaseflow run flow.yaml --payload '{"order": 7}'
//!
//! # Resume a suspended message
//! phaseflow resume flow.yaml 3f2c9a0e-4d7b-4c1e-9a55-0d6f1b2c3d4e
//!
//! # Show what a checkpoint contains
//! phaseflow inspect .phaseflow/3f2c9a0e-4d7b-4c1e-9a55-0d6f1b2c3d4e.checkpoint.json
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info, warn};
use serde_json::Value;
use uuid::Uuid;

use phaseflow::checkpoint::{self, CheckpointStore, FileCheckpointStore};
use phaseflow::config::FlowConfiguration;
use phaseflow::context::WorkContext;
use phaseflow::engine::{Engine, RunOutcome};
use phaseflow::error::EngineError;
use phaseflow::flow::FlowDirection;
use phaseflow::{APP_NAME, VERSION};

/// Default checkpoint directory.
const DEFAULT_CHECKPOINT_DIR: &str = checkpoint::store::DEFAULT_CHECKPOINT_DIR;

#[derive(Debug, PartialEq)]
enum Command {
    Run {
        flow_path: String,
        direction: FlowDirection,
        payload: Value,
    },
    Resume {
        flow_path: String,
        message_id: Uuid,
    },
    Inspect {
        checkpoint_path: PathBuf,
    },
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    command: Command,
    checkpoint_dir: PathBuf,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Handler/Phase Pipeline Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: phaseflow [OPTIONS] <COMMAND> ...");
    println!();
    println!("Commands:");
    println!("  run <FLOW_FILE>                 Drive a new message through a flow");
    println!("  resume <FLOW_FILE> <MESSAGE_ID> Resume a suspended message");
    println!("  inspect <CHECKPOINT_FILE>       Show the contents of a checkpoint");
    println!();
    println!("Options:");
    println!("  --direction DIR       Flow to run: in, out, in_fault, out_fault (default: in)");
    println!("  --payload JSON        Message payload (default: null)");
    println!("  --checkpoint-dir DIR  Checkpoint directory (default: {})", DEFAULT_CHECKPOINT_DIR);
    println!("  --verbose             Enable debug logging");
    println!("  --help                Show this help message");
    println!("  --version             Show version information");
    println!();
    println!("Examples:");
    println!("  phaseflow run orders.yaml --payload '{{\"order\": 7}}'");
    println!("  phaseflow resume orders.yaml 3f2c9a0e-4d7b-4c1e-9a55-0d6f1b2c3d4e");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut positional: Vec<String> = Vec::new();
    let mut direction = FlowDirection::In;
    let mut payload = Value::Null;
    let mut checkpoint_dir = PathBuf::from(DEFAULT_CHECKPOINT_DIR);
    let mut verbose = false;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--direction" => {
                i += 1;
                let value = args.get(i).ok_or("--direction requires a value")?;
                direction = value.parse()?;
            }
            "--payload" => {
                i += 1;
                let value = args.get(i).ok_or("--payload requires a JSON argument")?;
                payload = serde_json::from_str(value)
                    .map_err(|e| format!("Invalid --payload JSON: {}", e))?;
            }
            "--checkpoint-dir" => {
                i += 1;
                let value = args.get(i).ok_or("--checkpoint-dir requires a path argument")?;
                checkpoint_dir = PathBuf::from(value);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => positional.push(arg.clone()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("run") => Command::Run {
            flow_path: positional.next().ok_or("run requires a flow file")?,
            direction,
            payload,
        },
        Some("resume") => {
            let flow_path = positional.next().ok_or("resume requires a flow file")?;
            let id = positional.next().ok_or("resume requires a message id")?;
            let message_id =
                Uuid::parse_str(&id).map_err(|e| format!("Invalid message id '{}': {}", id, e))?;
            Command::Resume {
                flow_path,
                message_id,
            }
        }
        Some("inspect") => Command::Inspect {
            checkpoint_path: PathBuf::from(
                positional.next().ok_or("inspect requires a checkpoint file")?,
            ),
        },
        Some(other) => return Err(format!("Unknown command: {}", other)),
        None => return Err("No command given".to_string()),
    };

    if let Some(extra) = positional.next() {
        return Err(format!("Unexpected argument: {}", extra));
    }

    Ok(Config {
        command,
        checkpoint_dir,
        verbose,
    })
}

/// Loads a flow file into an engine.
fn load_engine(flow_path: &str) -> Result<Engine, Box<dyn std::error::Error>> {
    let config = FlowConfiguration::load(flow_path).map_err(|e| {
        error!("Failed to load flow definition: {}", e);
        format!("Could not load flow definition from '{}': {}", flow_path, e)
    })?;

    info!(
        "Flow '{}' loaded: {} handlers, flows: {}",
        config.name(),
        config.registry().len(),
        config
            .directions()
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(Engine::new(config))
}

/// Reports a drive/resume result, saving or clearing the checkpoint.
fn settle(
    engine: &Engine,
    store: &FileCheckpointStore,
    flow_path: &str,
    ctx: &mut WorkContext,
    result: Result<RunOutcome, EngineError>,
) -> Result<(), Box<dyn std::error::Error>> {
    match result {
        Ok(RunOutcome::Completed) => {
            store.delete(ctx.message_id())?;
            println!();
            println!("{} {}", "Completed".green().bold(), ctx.message_id());
            println!("Payload: {}", ctx.payload());
            Ok(())
        }
        Ok(RunOutcome::Suspended) => report_suspended(store, flow_path, ctx),
        Ok(RunOutcome::Aborted) => {
            store.delete(ctx.message_id())?;
            println!();
            println!("{} {}", "Aborted".yellow().bold(), ctx.message_id());
            Ok(())
        }
        Err(EngineError::HandlerFault(fault)) => {
            store.delete(ctx.message_id())?;
            if run_fault_flow(engine, ctx) == Some(RunOutcome::Suspended) {
                report_suspended(store, flow_path, ctx)?;
            }
            Err(format!("Message {} failed: {}", ctx.message_id(), fault).into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parks a suspended context and tells the user how to resume it.
fn report_suspended(
    store: &FileCheckpointStore,
    flow_path: &str,
    ctx: &WorkContext,
) -> Result<(), Box<dyn std::error::Error>> {
    store.save(ctx)?;
    println!();
    println!("{} {}", "Suspended".yellow().bold(), ctx.message_id());
    println!(
        "Resume with: phaseflow resume {} {} --checkpoint-dir {}",
        flow_path,
        ctx.message_id(),
        store.dir().display()
    );
    Ok(())
}

/// Drives a faulted context through its fault flow, if one is configured.
///
/// A context that failed inside a fault flow is not sent through it again.
fn run_fault_flow(engine: &Engine, ctx: &mut WorkContext) -> Option<RunOutcome> {
    let target = ctx.direction().fault_counterpart();
    if ctx.direction().is_fault() || engine.configuration().chain(target).is_none() {
        return None;
    }

    let outcome = engine
        .rebind_to_fault_flow(ctx)
        .and_then(|()| engine.drive(ctx));
    match outcome {
        Ok(RunOutcome::Completed) => {
            info!("Fault flow completed");
            Some(RunOutcome::Completed)
        }
        Ok(other) => {
            warn!("Fault flow ended as {:?}", other);
            Some(other)
        }
        Err(e) => {
            error!("Fault flow failed: {}", e);
            None
        }
    }
}

/// Prints a summary of a checkpoint file.
fn inspect(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(path)
        .map_err(|e| format!("Failed to read checkpoint '{}': {}", path.display(), e))?;
    let checkpoint = checkpoint::decode(&bytes)?;

    println!("{}     {}", "Message:".bold(), checkpoint.message_id);
    println!("{}   {}", "Direction:".bold(), checkpoint.direction);
    println!("{}       {}", "State:".bold(), checkpoint.state);
    println!(
        "{}    {} ({} of {} handlers executed)",
        "Position:".bold(),
        checkpoint.position,
        checkpoint.executed.len(),
        checkpoint.handler_count()
    );
    println!("{}     {}", "Created:".bold(), checkpoint.created_at.to_rfc3339());
    println!("{}       {}", "Saved:".bold(), checkpoint.checkpointed_at.to_rfc3339());

    println!();
    println!("{}", "Chain:".bold());
    let mut index = 0;
    for phase in &checkpoint.chain {
        println!("  {}", phase.name.cyan());
        for handler in &phase.handlers {
            let marker = if index < checkpoint.executed.len() {
                "done".green()
            } else {
                "pending".dimmed()
            };
            println!("    {:<24} {}", handler, marker);
            index += 1;
        }
    }

    if let Some(failure) = &checkpoint.failure {
        println!();
        println!(
            "{} {} at {}: {}",
            "Failure:".red().bold(),
            failure.handler,
            failure.position,
            failure.fault
        );
    }

    if !checkpoint.self_managed.is_empty() {
        println!();
        println!("{}", "Self-managed data:".bold());
        for entry in &checkpoint.self_managed {
            println!(
                "  {:<16} {:<16} {:?} ({} bytes)",
                entry.owner,
                entry.key.as_deref().unwrap_or("*"),
                entry.encoding,
                entry.data.len()
            );
        }
    }

    println!();
    println!("{} {}", "Payload:".bold(), checkpoint.payload);
    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let store = FileCheckpointStore::new(&config.checkpoint_dir);

    match config.command {
        Command::Run {
            flow_path,
            direction,
            payload,
        } => {
            let engine = load_engine(&flow_path)?;
            let mut ctx = engine.create_context(direction, payload)?;
            info!("Message id: {}", ctx.message_id());

            let result = engine.drive(&mut ctx);
            settle(&engine, &store, &flow_path, &mut ctx, result)
        }
        Command::Resume {
            flow_path,
            message_id,
        } => {
            let engine = load_engine(&flow_path)?;
            let mut ctx = store.load(message_id, engine.configuration())?;

            let result = engine.resume(&mut ctx);
            settle(&engine, &store, &flow_path, &mut ctx, result)
        }
        Command::Inspect { checkpoint_path } => inspect(&checkpoint_path),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
