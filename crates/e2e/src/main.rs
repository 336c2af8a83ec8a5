//! editor-e2e - smoke runner and artifact browser for the editor harness

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use editor_e2e::capture::collect_frames;
use editor_e2e::config::{ARTIFACT_ROOT_ENV, EXECUTABLE_ENV};
use editor_e2e::fixture::reset_workspace;
use editor_e2e::playwright::{PlaywrightConfig, PlaywrightDriver};
use editor_e2e::{
    Category, CommandGrabber, HarnessConfig, HarnessError, HarnessResult, LaunchOptions, ScenarioContext,
    Workspace,
};

#[derive(Parser, Debug)]
#[command(name = "editor-e2e")]
#[command(about = "E2E harness for the editor host", long_about = None)]
struct Cli {
    /// Root directory for screenshot trees
    #[arg(long, env = ARTIFACT_ROOT_ENV, global = true)]
    artifact_root: Option<PathBuf>,

    /// YAML harness config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch the host once, wait for its window, and capture it
    Smoke(SmokeArgs),

    /// List flushed frames in capture order
    List,
}

#[derive(Args, Debug)]
struct SmokeArgs {
    /// Host executable
    #[arg(long, env = EXECUTABLE_ENV)]
    executable: PathBuf,

    /// Folder to open; recreated empty unless --keep-workspace is set
    #[arg(long)]
    workspace: Option<PathBuf>,

    #[arg(long)]
    keep_workspace: bool,

    /// Extension under development
    #[arg(long)]
    extension_development_path: Option<PathBuf>,

    /// Directory with the host's companion executables
    #[arg(long)]
    companion_bin_dir: Option<PathBuf>,

    /// Directory whose node_modules provides playwright
    #[arg(long, default_value = ".")]
    node_modules_dir: PathBuf,

    /// Screenshot category (create, emit, import, preview)
    #[arg(long, default_value = "create")]
    category: String,

    /// Case name used for the screenshot directory
    #[arg(long, default_value = "smoke")]
    case: String,

    /// Attempts while waiting for the window title
    #[arg(long, default_value = "30")]
    attempts: u32,

    /// Gap between attempts in milliseconds
    #[arg(long, default_value = "1000")]
    gap_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> HarnessResult<bool> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_yaml_file(path)?,
        None => HarnessConfig::from_env(),
    };
    if let Some(root) = cli.artifact_root {
        config.artifact_root = root;
    }

    match cli.command {
        Commands::Smoke(args) => smoke(config, args).await,
        Commands::List => {
            let cases = collect_frames(&config.images_root())?;
            for (case, frames) in &cases {
                println!("{}", case.display());
                for frame in frames {
                    if let Some(name) = frame.file_name() {
                        println!("  {}", name.to_string_lossy());
                    }
                }
            }
            info!("{} case(s) under {}", cases.len(), config.images_root().display());
            Ok(true)
        }
    }
}

async fn smoke(config: HarnessConfig, args: SmokeArgs) -> HarnessResult<bool> {
    let category: Category = args.category.parse()?;

    if let Some(ws) = &args.workspace {
        if !args.keep_workspace {
            reset_workspace(ws).await?;
        }
    }

    let options = LaunchOptions {
        workspace: args.workspace.clone().map(Workspace::Path).unwrap_or_default(),
        executable_path: Some(args.executable.clone()),
        extension_development_path: args.extension_development_path.clone(),
        companion_bin_dir: args.companion_bin_dir.clone(),
        ..LaunchOptions::from_config(&config)
    };

    let driver = PlaywrightDriver::new(PlaywrightConfig {
        working_dir: args.node_modules_dir.clone(),
        ..Default::default()
    });

    let mut ctx = ScenarioContext::new(config, CommandGrabber::new());
    ctx.set_category(category);
    ctx.set_dir(&args.case);

    let app = ctx.launch(&driver, &options).await?;
    info!("Extension storage: {}", app.storage_dir.display());

    let surface = app.surface;
    let waited = ctx
        .poll(
            args.attempts,
            || {
                let surface = Arc::clone(&surface);
                async move { Ok::<_, HarnessError>(!surface.title().await?.trim().is_empty()) }
            },
            "Host window never reported a title",
            Some(Duration::from_millis(args.gap_ms)),
        )
        .await;

    match waited {
        Ok(attempts) => {
            info!("Host window ready after {} attempt(s)", attempts);
            let saved = match ctx.capture("started.png").await {
                Ok(()) => ctx.flush().await,
                Err(e) => Err(e),
            };
            ctx.teardown().await?;
            for path in saved? {
                info!("Saved {}", path.display());
            }
            Ok(true)
        }
        Err(e) if e.is_poll_exhausted() => {
            error!("✗ {}: {}", args.case, e);
            Ok(false)
        }
        Err(e) => {
            ctx.teardown().await?;
            Err(e)
        }
    }
}
