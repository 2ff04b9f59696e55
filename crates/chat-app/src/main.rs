use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vqa_chat::app::{AppError, ChatApp, LaunchOptions, build_runtime};

#[derive(Parser)]
#[command(name = "vqa-chat")]
#[command(about = "Terminal client for a visual question answering backend", long_about = None)]
struct Cli {
    /// Backend origin, e.g. http://localhost:8000
    #[arg(long, value_name = "URL")]
    backend_url: Option<String>,
    /// Settings file to read and update instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Sqlite file used to cache conversation history
    #[arg(long, value_name = "PATH", conflicts_with = "no_cache")]
    cache: Option<PathBuf>,
    /// Keep history in memory only
    #[arg(long)]
    no_cache: bool,
    /// Start in light mode for this run
    #[arg(long)]
    light: bool,
}

impl From<Cli> for LaunchOptions {
    fn from(cli: Cli) -> Self {
        Self {
            backend_url: cli.backend_url,
            config_path: cli.config,
            cache_path: cli.cache,
            no_cache: cli.no_cache,
            light: cli.light,
        }
    }
}

fn init_tracing() {
    // Logs go to stderr so they never interleave with the conversation on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[snafu::report]
fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_tracing();

    let runtime = build_runtime()?;
    ChatApp::bootstrap(cli.into(), runtime)?.run()
}
