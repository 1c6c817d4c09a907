use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use playbook_engine::playbook::MappingNote;
use playbook_engine::prelude::*;
use playbook_engine::Scheduler;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "engine.yaml";

#[derive(Parser)]
#[command(name = "playbook")]
#[command(about = "Run playbooks of numbered automation scripts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine config file (default: engine.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a playbook, an explicit job list, or a CI workflow
    Run {
        /// Playbook path, or name resolved in the playbooks directory
        #[arg(value_name = "PLAYBOOK")]
        playbook: Option<String>,

        /// Run these job ids in order instead of a playbook
        #[arg(long, value_delimiter = ',', conflicts_with = "playbook")]
        jobs: Vec<String>,

        /// Treat PLAYBOOK as a CI workflow file and convert it first
        #[arg(long)]
        workflow: bool,

        /// Print the execution plan without running anything
        #[arg(long)]
        dry_run: bool,

        /// Replay identical successful runs from the cache
        #[arg(long)]
        use_cache: bool,

        /// Print a one-line summary instead of the full report
        #[arg(long, conflicts_with = "json")]
        summary: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Maximum number of concurrent instances (overrides config)
        #[arg(short = 'j', long)]
        max_concurrency: Option<usize>,

        /// Skip later waves after a failure (overrides config)
        #[arg(long)]
        fail_fast: bool,

        /// Per-instance timeout in seconds (overrides config)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Set a run variable, highest precedence
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, Value)>,
    },

    /// Validate a playbook file or directory without running it
    Validate {
        /// Path to playbook file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// List playbooks in a directory
    List {
        /// Directory to list (default: playbooks directory from config)
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// Convert a CI workflow into a playbook
    Convert {
        /// Path to the workflow YAML file
        #[arg(value_name = "WORKFLOW")]
        workflow: PathBuf,

        /// Write the playbook here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect or clear the result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached runs
    List,
    /// Remove every cached run
    Clear,
}

/// `KEY=VALUE`, with VALUE read as a YAML scalar or list
fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", raw));
    }
    let value = serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::from(value));
    Ok((key.to_string(), value))
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "playbook_engine=debug"
    } else {
        "playbook_engine=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, "Playbook failed");
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            playbook,
            jobs,
            workflow,
            dry_run,
            use_cache,
            summary,
            json,
            max_concurrency,
            fail_fast,
            timeout,
            vars,
        } => {
            let playbook = select_playbook(&config, playbook, jobs, workflow)?;
            let options = RunOptions {
                use_cache,
                fail_fast: fail_fast.then_some(true),
                max_concurrency,
                timeout,
                variables: vars.into_iter().collect(),
                cancellation: CancellationToken::new(),
            };
            let output = OutputMode::from_flags(summary, json);
            run_playbook(config, playbook, options, dry_run, output).await
        }
        Commands::Validate { path } => validate(&config, path),
        Commands::List { dir } => {
            let dir = dir.unwrap_or_else(|| config.playbooks_dir.clone());
            list_playbooks(&config, dir)
        }
        Commands::Convert { workflow, output } => convert(&config, workflow, output),
        Commands::Cache { action } => cache(&config, action),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None if Path::new(DEFAULT_CONFIG).is_file() => Ok(EngineConfig::load(DEFAULT_CONFIG)?),
        None => Ok(EngineConfig::default()),
    }
}

fn select_playbook(
    config: &EngineConfig,
    reference: Option<String>,
    jobs: Vec<String>,
    workflow: bool,
) -> anyhow::Result<Playbook> {
    if !jobs.is_empty() {
        return Ok(Playbook::from_job_ids(
            "adhoc",
            &jobs,
            config.success_criteria.clone(),
        )?);
    }

    let Some(reference) = reference else {
        anyhow::bail!("Nothing to run: pass a PLAYBOOK or --jobs");
    };

    if workflow {
        let adapter = WorkflowAdapter::with_defaults(config.success_criteria.clone());
        return Ok(adapter.convert_file(Path::new(&reference))?);
    }

    let loader = PlaybookLoader::with_defaults(config.success_criteria.clone());
    Ok(loader.resolve(&reference, &config.playbooks_dir)?)
}

#[derive(Clone, Copy)]
enum OutputMode {
    Full,
    Summary,
    Json,
}

impl OutputMode {
    fn from_flags(summary: bool, json: bool) -> Self {
        match (summary, json) {
            (_, true) => OutputMode::Json,
            (true, false) => OutputMode::Summary,
            _ => OutputMode::Full,
        }
    }
}

#[tracing::instrument(skip_all, fields(playbook = %playbook.name))]
async fn run_playbook(
    config: EngineConfig,
    playbook: Playbook,
    options: RunOptions,
    dry_run: bool,
    output: OutputMode,
) -> anyhow::Result<bool> {
    let engine = Engine::new(config);

    if dry_run {
        let plan = engine.plan(&playbook, &options)?;
        match output {
            OutputMode::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
            _ => println!("{}", plan),
        }
        return Ok(true);
    }

    let cancellation = options.cancellation.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight instances");
            cancellation.cancel();
        }
    });

    let result = engine.run(&playbook, &options).await;
    interrupt.abort();
    let result = result?;

    let report = Report::render(&result, &playbook.success_criteria);
    match output {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputMode::Summary => println!("{}", report.summary_line()),
        OutputMode::Full => println!("{}", report),
    }

    Ok(result.overall_success)
}

fn validate(config: &EngineConfig, path: PathBuf) -> anyhow::Result<bool> {
    if !path.exists() {
        anyhow::bail!("Path not found: {}", path.display());
    }

    let loader = PlaybookLoader::with_defaults(config.success_criteria.clone());
    let playbooks = if path.is_dir() {
        loader.load_directory(&path)?
    } else {
        vec![loader.load_file(&path)?]
    };

    if playbooks.is_empty() {
        println!("No playbooks found in: {}", path.display());
        return Ok(true);
    }

    for playbook in &playbooks {
        let schedule = Scheduler::schedule(playbook)?;
        println!(
            "✓ {} is valid ({}, {} wave(s), {} instance(s))",
            playbook.name,
            playbook.schema,
            schedule.len(),
            schedule.instance_count()
        );
    }

    Ok(true)
}

fn list_playbooks(config: &EngineConfig, dir: PathBuf) -> anyhow::Result<bool> {
    if !dir.exists() {
        anyhow::bail!("Directory not found: {}", dir.display());
    }

    let loader = PlaybookLoader::with_defaults(config.success_criteria.clone());
    let playbooks = loader.load_directory(&dir)?;

    if playbooks.is_empty() {
        println!("No playbooks found in: {}", dir.display());
        return Ok(true);
    }

    println!("Playbooks in {}:\n", dir.display());

    for playbook in &playbooks {
        let schedule = Scheduler::schedule(playbook)?;
        let description = playbook
            .description
            .as_deref()
            .map(|d| format!(" - {}", d))
            .unwrap_or_default();
        println!(
            "  {} ({}, {} job(s)){}",
            playbook.name,
            playbook.schema,
            playbook.job_count(),
            description
        );
        for wave in &schedule.waves {
            println!("      Wave {}: [{}]", wave.index, wave.job_ids().join(", "));
        }
    }

    Ok(true)
}

fn convert(config: &EngineConfig, workflow: PathBuf, output: Option<PathBuf>) -> anyhow::Result<bool> {
    let content = std::fs::read_to_string(&workflow)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", workflow.display(), e))?;

    let adapter = WorkflowAdapter::with_defaults(config.success_criteria.clone());
    let conversion = adapter.convert_detailed(&content, &workflow.display().to_string())?;
    print_notes(&conversion.notes);

    let yaml = conversion.playbook.to_yaml()?;
    match output {
        Some(path) => {
            std::fs::write(&path, yaml)?;
            eprintln!("Wrote {}", path.display());
        }
        None => print!("{}", yaml),
    }

    Ok(true)
}

fn print_notes(notes: &[MappingNote]) {
    for note in notes {
        eprintln!("note: {}", note);
    }
}

fn cache(config: &EngineConfig, action: CacheAction) -> anyhow::Result<bool> {
    let store = CacheStore::new(&config.cache_dir);

    match action {
        CacheAction::List => {
            let entries = store.entries();
            if entries.is_empty() {
                println!("Cache is empty: {}", store.root().display());
                return Ok(true);
            }
            for entry in entries {
                println!(
                    "  {}  {}  {} instance(s)  {}",
                    &entry.fingerprint[..entry.fingerprint.len().min(12)],
                    entry.playbook,
                    entry.inputs.instances.len(),
                    entry.stored_at.to_rfc3339()
                );
            }
        }
        CacheAction::Clear => {
            let removed = store.clear()?;
            println!("Removed {} cached run(s)", removed);
        }
    }

    Ok(true)
}
