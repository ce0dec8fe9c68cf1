use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, trace};

use tfstream::config::{self, TfstreamConfig};
use tfstream::filter::{
    LineClassifier, Pipeline, PipelineOptions, RenderMode, RenderOptions, StdinSource,
    StreamMultiplexer, TerminalRenderer, WrappedCommand,
};

/// Run terraform with a live progress summary instead of its raw output
#[derive(Parser)]
#[command(name = "tfstream", version)]
#[command(about = "Live progress view for terraform output", long_about = None)]
struct Cli {
    /// Executable to wrap (default: terraform)
    #[arg(long, value_name = "PATH")]
    binary: Option<String>,

    /// Path to configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Print every line instead of drawing a live region
    #[arg(long)]
    plain: bool,

    /// Disable colours
    #[arg(long)]
    no_color: bool,

    /// Show the plan body instead of hiding it
    #[arg(long)]
    show_diff: bool,

    /// Print noise lines (blank lines, state lock chatter)
    #[arg(long)]
    show_noise: bool,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Arguments passed through to the wrapped executable
    #[arg(last = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut TfstreamConfig) {
        if let Some(binary) = &self.binary {
            config.binary = binary.clone();
        }
        if self.no_color {
            config.color = false;
        }
        if self.show_diff {
            config.suppress.enabled = false;
        }
        if self.show_noise {
            config.show_noise = true;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let cwd = std::env::current_dir().context("Failed to determine working directory")?;
    let config = config::load_config_with(
        cli.config.as_deref(),
        &cwd,
        |key| std::env::var(key).ok(),
        |config| cli.apply_overrides(config),
    )
    .await?;

    tfstream::logging::init(cli.verbose, config.log_file.as_deref())?;
    debug!("tfstream started with verbosity level: {}", cli.verbose);
    trace!("Effective config: {:?}", config);

    let stdout = std::io::stdout();
    let mode = if cli.plain || !stdout.is_terminal() {
        RenderMode::Plain
    } else {
        RenderMode::Progress
    };

    let classifier = LineClassifier::new(Arc::new(config.build_registry()?));
    let suppressor = config.build_suppressor()?;
    let renderer = TerminalRenderer::new(
        stdout,
        RenderOptions {
            mode,
            color: config.color,
            max_active: config.max_active,
            width: None,
        },
    );
    let mut pipeline = Pipeline::new(
        classifier,
        suppressor,
        renderer,
        PipelineOptions {
            mode,
            refresh_interval: config.refresh_interval(),
            show_noise: config.show_noise,
        },
    );

    let command = WrappedCommand::new(&config.binary).args(&cli.args);
    let outcome = StreamMultiplexer::new(command)
        .with_read_buffer(config.read_buffer_bytes)
        .run(StdinSource::Parent, &mut pipeline)
        .await
        .with_context(|| format!("Failed to run {}", config.binary))?;

    debug!(
        "Finished in {:?} with exit code {} ({} lines suppressed)",
        outcome.duration, outcome.exit_code, outcome.suppressed_lines
    );
    Ok(outcome.exit_code)
}
