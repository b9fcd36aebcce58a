use std::path::{Path, PathBuf};

use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pipewright::config::{ProjectFile, DEFAULT_PROJECT_FILE};
use pipewright::log::{self, LogMode};
use pipewright::orchestration::{RunEvent, RunState, WatchEvent};
use pipewright::util::format_duration;
use pipewright::{pwlog, pwlog_debug, Error, Orchestrator, Result};

/// Pipewright - declarative build-task orchestrator
#[derive(Parser, Debug)]
#[command(name = "pipewright")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    PIPEWRIGHT_DEBUG=1            Enable debug logging (alternative to --debug)\n    PIPEWRIGHT_LOG_LEVEL=<level>  error, warn, info, debug or trace\n    PIPEWRIGHT_LOG=<path>         Log file (default: .pipewright/pipewright.log)")]
pub struct Cli {
    /// Project file to load
    #[arg(short = 'f', long, default_value = DEFAULT_PROJECT_FILE)]
    pub file: PathBuf,

    /// Enable debug logging (writes to .pipewright/pipewright.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Print the run report as JSON instead of progress lines
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run tasks or sequences in order as one plan (default: "default")
    Run {
        /// Task or sequence names
        names: Vec<String>,
    },

    /// Optionally run tasks first, then re-run tasks on file changes until Ctrl-C
    Watch {
        /// Tasks or sequences to run before watching
        names: Vec<String>,
    },

    /// List tasks, sequences and watch bindings
    List,

    /// Print the prerequisite graph in Graphviz DOT
    Graph,
}

fn main() {
    let cli = Cli::parse();
    let root = ProjectFile::root_of(&cli.file);
    if let Some(path) = log::init(&root, cli.debug, log_mode(cli.command.as_ref())) {
        pwlog!("pipewright {} logging to {}", env!("CARGO_PKG_VERSION"), path.display());
    }

    if let Err(e) = dispatch(cli) {
        eprintln!("\x1b[31mpipewright: {}\x1b[0m", e);
        std::process::exit(1);
    }
}

/// Only a run starts a fresh log; other commands append to it.
fn log_mode(command: Option<&Command>) -> LogMode {
    match command {
        None | Some(Command::Run { .. }) => LogMode::Truncate,
        Some(_) => LogMode::Append,
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    let root = ProjectFile::root_of(&cli.file);
    let orchestrator = load(&cli.file, &root)?;

    match cli.command {
        None => run_targets(&orchestrator, Vec::new(), cli.json),
        Some(Command::Run { names }) => run_targets(&orchestrator, names, cli.json),
        Some(Command::Watch { names }) => run_watch(&orchestrator, &root, names, cli.json),
        Some(Command::List) => {
            print!("{}", format_listing(&orchestrator));
            Ok(())
        }
        Some(Command::Graph) => {
            print!("{}", orchestrator.registry().to_dot()?);
            Ok(())
        }
    }
}

fn load(file: &Path, root: &Path) -> Result<Orchestrator> {
    if !file.exists() {
        return Err(Error::Config(format!(
            "no project file at {}",
            file.display()
        )));
    }
    let orchestrator = ProjectFile::load(file)?.build(root)?;
    orchestrator.validate()?;
    pwlog!("Loaded {} ({:?})", file.display(), orchestrator);
    Ok(orchestrator)
}

/// Run `names` as one plan, printing progress or a JSON report.
fn run_targets(orchestrator: &Orchestrator, names: Vec<String>, json: bool) -> Result<()> {
    pwlog!("Run command: names={:?}, json={}", names, json);
    let plan = orchestrator.plan_for(&names)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (tx, printer) = spawn_progress(json);
        let outcome = orchestrator.runner().with_events(tx).execute(&plan).await;
        let _ = printer.await;

        if json {
            println!("{}", serde_json::to_string_pretty(&outcome.report)?);
        }
        outcome.into_result().map(|_| ())
    })
}

fn run_watch(orchestrator: &Orchestrator, root: &Path, names: Vec<String>, json: bool) -> Result<()> {
    pwlog!("Watch command: names={:?}", names);
    if orchestrator.bindings().is_empty() {
        return Err(Error::Config("no [[watch]] bindings in project file".to_string()));
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if !names.is_empty() {
            let plan = orchestrator.plan_for(&names)?;
            let (tx, printer) = spawn_progress(json);
            let result = orchestrator.runner().with_events(tx).run(&plan).await;
            let _ = printer.await;
            result?;
        }

        // The runner and service stay alive until shutdown, so both printers
        // end once the service is dropped.
        let (run_tx, run_printer) = spawn_progress(json);
        let (watch_tx, mut watch_rx) = mpsc::channel::<WatchEvent>(64);
        let watch_printer = tokio::spawn(async move {
            while let Some(event) = watch_rx.recv().await {
                if let Some(line) = format_watch_event(&event) {
                    println!("[{}] {}", timestamp(), line);
                }
            }
        });

        let mut service = orchestrator
            .watch_service(orchestrator.runner().with_events(run_tx), root)?
            .with_events(watch_tx);
        service.start()?;
        println!(
            "[{}] Watching {} pattern(s), Ctrl-C to stop",
            timestamp(),
            service.bindings().len()
        );

        service
            .serve_until(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
        drop(service);

        let _ = run_printer.await;
        let _ = watch_printer.await;
        println!("[{}] Stopped watching", timestamp());
        Ok(())
    })
}

/// Print progress lines for run events until the sender side is dropped.
fn spawn_progress(quiet: bool) -> (mpsc::Sender<RunEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<RunEvent>(256);
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if quiet {
                continue;
            }
            if let Some(line) = format_run_event(&event) {
                match event {
                    RunEvent::TaskFailed { .. } => eprintln!("[{}] {}", timestamp(), line),
                    _ => println!("[{}] {}", timestamp(), line),
                }
            }
        }
    });
    (tx, handle)
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn format_run_event(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::RunStarted { run_id, plan } => {
            pwlog_debug!(run_id.short() => "plan: {}", plan);
            None
        }
        RunEvent::TaskStarted { task, .. } => Some(format!("Starting '{}'...", task)),
        RunEvent::TaskCompleted { task, duration, .. } => Some(format!(
            "Finished '{}' after \x1b[35m{}\x1b[0m",
            task,
            format_duration(*duration)
        )),
        RunEvent::TaskFailed { task, error, .. } => {
            Some(format!("\x1b[31m'{}' errored: {}\x1b[0m", task, error))
        }
        RunEvent::RunFinished { state, .. } => Some(format_state(state)),
        RunEvent::TaskSkipped { .. } | RunEvent::StateChanged { .. } => None,
    }
}

fn format_watch_event(event: &WatchEvent) -> Option<String> {
    match event {
        WatchEvent::Changed { pattern, path } => {
            Some(format!("{} changed ({})", path.display(), pattern))
        }
        WatchEvent::RunFailed { pattern, .. } => {
            Some(format!("\x1b[33mRun for {} failed, still watching\x1b[0m", pattern))
        }
        WatchEvent::RunCompleted { .. } | WatchEvent::Stopped { .. } => None,
    }
}

/// Format run state with color codes for terminal.
fn format_state(state: &RunState) -> String {
    match state {
        RunState::Completed => format!("\x1b[32m{}\x1b[0m", state), // Green
        RunState::Failed { .. } => format!("\x1b[31m{}\x1b[0m", state), // Red
        _ => format!("\x1b[90m{}\x1b[0m", state),                    // Gray
    }
}

fn format_listing(orchestrator: &Orchestrator) -> String {
    let mut out = String::from("Tasks:\n");
    for task in orchestrator.registry().tasks() {
        out.push_str(&format!("  {}", task.name));
        if !task.prerequisites.is_empty() {
            out.push_str(&format!(" [{}]", task.prerequisites.join(", ")));
        }
        if let Some(description) = &task.description {
            out.push_str(&format!("  {}", description));
        }
        out.push('\n');
    }

    let sequences: Vec<_> = orchestrator.sequences().collect();
    if !sequences.is_empty() {
        out.push_str("\nSequences:\n");
        for (name, plan) in sequences {
            out.push_str(&format!("  {}: {}\n", name, plan));
        }
    }

    if !orchestrator.bindings().is_empty() {
        out.push_str("\nWatch:\n");
        for binding in orchestrator.bindings() {
            out.push_str(&format!(
                "  {} -> [{}]\n",
                binding.pattern,
                binding.tasks.join(", ")
            ));
        }
    }
    out
}
