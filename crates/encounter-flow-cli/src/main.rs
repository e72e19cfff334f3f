use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use encounter_flow_core::{BulkClearPolicy, FlowConfig, RetriggerPolicy};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

mod realtime;
mod scenario;
mod simulate;

use realtime::{OperatorAction, RunOptions};
use scenario::Scenario;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "efc")]
#[command(about = "Encounter flow coordinator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Replay a scenario file on a simulated clock.
    Simulate(SimulateArgs),
    /// Drive a scenario backlog in real time with a scripted operator.
    Run(RunArgs),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show(ConfigArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    holding_capacity: Option<usize>,
    #[arg(long, value_enum)]
    retrigger_policy: Option<RetriggerArg>,
    #[arg(long, value_enum)]
    bulk_clear_policy: Option<BulkClearArg>,
    #[arg(long, default_value_t = false)]
    disable_timing_restrictions: bool,
}

#[derive(Debug, Args)]
struct SimulateArgs {
    #[arg(long)]
    scenario: PathBuf,
    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    scenario: PathBuf,
    #[command(flatten)]
    config: ConfigArgs,
    #[arg(long, default_value_t = 30_000)]
    duration_ms: u64,
    #[arg(long, default_value_t = 5_000)]
    request_every_ms: u64,
    #[arg(long, default_value_t = 2_000)]
    decide_after_ms: u64,
    #[arg(long, value_enum, value_delimiter = ',', default_value = "approve")]
    operator: Vec<OperatorAction>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RetriggerArg {
    Manual,
    AutoAfterCooldown,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BulkClearArg {
    ReturnOnly,
    ApplyConsequences,
}

impl From<RetriggerArg> for RetriggerPolicy {
    fn from(value: RetriggerArg) -> Self {
        match value {
            RetriggerArg::Manual => Self::Manual,
            RetriggerArg::AutoAfterCooldown => Self::AutoAfterCooldown,
        }
    }
}

impl From<BulkClearArg> for BulkClearPolicy {
    fn from(value: BulkClearArg) -> Self {
        match value {
            BulkClearArg::ReturnOnly => Self::ReturnOnly,
            BulkClearArg::ApplyConsequences => Self::ApplyConsequences,
        }
    }
}

fn with_envelope(value: Value) -> Result<Value> {
    let generated_at =
        OffsetDateTime::now_utc().format(&Rfc3339).context("failed to format generated_at")?;
    Ok(match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            object.insert("generated_at".to_string(), Value::String(generated_at));
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "generated_at": generated_at,
            "payload": other
        }),
    })
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_envelope(value)?)?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Config { command: ConfigCommand::Show(args) } => run_config_show(&args),
        Command::Simulate(args) => run_simulate(&args),
        Command::Run(args) => run_realtime(&args),
    }
}

/// Config file first, then flag overrides, then validation.
fn load_config(args: &ConfigArgs) -> Result<FlowConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => {
            let body = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            FlowConfig::from_yaml_str(&body)
                .with_context(|| format!("invalid config file {}", path.display()))?
        }
        None => FlowConfig::default(),
    };

    if let Some(capacity) = args.holding_capacity {
        config.holding_capacity = capacity;
    }
    if let Some(policy) = args.retrigger_policy {
        config.retrigger_policy = policy.into();
    }
    if let Some(policy) = args.bulk_clear_policy {
        config.bulk_clear_policy = policy.into();
    }
    if args.disable_timing_restrictions {
        config.timing_restrictions_enabled = false;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run_config_show(args: &ConfigArgs) -> Result<()> {
    let config = load_config(args)?;
    let source = args
        .config
        .as_ref()
        .map_or_else(|| "defaults".to_string(), |path| path.display().to_string());
    emit_json(serde_json::json!({
        "source": source,
        "config": config
    }))
}

fn run_simulate(args: &SimulateArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let scenario = Scenario::load(&args.scenario)?;
    let report = simulate::run(config, &scenario)?;
    emit_json(serde_json::to_value(report)?)
}

fn run_realtime(args: &RunArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let scenario = Scenario::load(&args.scenario)?;
    let options = RunOptions {
        duration: Duration::from_millis(args.duration_ms),
        request_every: Duration::from_millis(args.request_every_ms.max(1)),
        decide_after: Duration::from_millis(args.decide_after_ms),
        operator: args.operator.clone(),
    };
    let summary = realtime::run(config, &scenario, options)?;
    emit_json(serde_json::to_value(summary)?)
}
