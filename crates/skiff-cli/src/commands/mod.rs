//! CLI command definitions and dispatch.

pub mod destroy;
pub mod graph;
pub mod outputs;
pub mod plan;
pub mod up;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use skiff_common::config::DeployConfig;
use skiff_common::constants::DEFAULT_STACK_FILE;
use skiff_engine::{Engine, LocalProvider};
use skiff_topology::Topology;

/// skiff: deploy one containerized HTTP service behind a public gateway.
#[derive(Parser, Debug)]
#[command(name = "skiff", version, about, long_about = None)]
pub struct Cli {
    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Configuration sources and output options.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path to the YAML stack file.
    #[arg(long, global = true, default_value = DEFAULT_STACK_FILE)]
    pub stack_file: PathBuf,

    /// Path to the state file (overrides the stack file).
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Logical service name (defaults to the last segment of the image URI).
    #[arg(long, global = true, env = "SKIFF_SERVICE_NAME")]
    pub service_name: Option<String>,

    /// Registry URI the image is pushed to.
    #[arg(long, global = true, env = "SKIFF_IMAGE_URI")]
    pub image_uri: Option<String>,

    /// Tag of the image to run.
    #[arg(long, global = true, env = "SKIFF_IMAGE_TAG")]
    pub image_tag: Option<String>,

    /// Region resources are created in.
    #[arg(long, global = true, env = "SKIFF_REGION")]
    pub region: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl GlobalArgs {
    /// Merges the stack file (if present) with flags and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack file exists but cannot be parsed.
    pub fn config(&self) -> anyhow::Result<DeployConfig> {
        let file = if self.stack_file.exists() {
            DeployConfig::load(&self.stack_file)
                .with_context(|| format!("reading {}", self.stack_file.display()))?
        } else {
            tracing::debug!(path = %self.stack_file.display(), "no stack file, using flags only");
            DeployConfig::default()
        };
        Ok(file.merge(self.overrides()))
    }

    fn overrides(&self) -> DeployConfig {
        DeployConfig {
            service_name: self.service_name.clone(),
            image_uri: self.image_uri.clone(),
            image_tag: self.image_tag.clone(),
            region: self.region.clone(),
            state_file: self.state_file.clone(),
        }
    }

    /// Builds the engine the configuration points at.
    pub fn engine(config: &DeployConfig) -> Engine<LocalProvider> {
        let provider = config
            .region
            .as_deref()
            .map_or_else(LocalProvider::default, LocalProvider::new);
        Engine::new(provider, config.state_file())
    }

    /// Resolves inputs and assembles the topology.
    ///
    /// # Errors
    ///
    /// Returns an error if a required input is missing or the topology is
    /// invalid. No resource has been touched when this fails.
    pub fn assemble(&self) -> anyhow::Result<(Engine<LocalProvider>, Topology)> {
        let config = self.config()?;
        let inputs = config.require()?;
        let engine = Self::engine(&config);
        let topology = Topology::assemble(&inputs, engine.provider())?;
        Ok((engine, topology))
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show what applying the stack would change.
    Plan(plan::PlanArgs),
    /// Create or update every resource of the stack.
    Up(up::UpArgs),
    /// Delete every recorded resource, dependents first.
    Destroy(destroy::DestroyArgs),
    /// Print the outputs of the last successful apply.
    Outputs(outputs::OutputsArgs),
    /// Print the resource dependency graph.
    Graph(graph::GraphArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let global = cli.global;
    match cli.command {
        Command::Plan(args) => plan::execute(&global, args),
        Command::Up(args) => up::execute(&global, args),
        Command::Destroy(args) => destroy::execute(&global, args),
        Command::Outputs(args) => outputs::execute(&global, args),
        Command::Graph(args) => graph::execute(&global, args),
    }
}
