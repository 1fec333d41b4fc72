use clap::{Parser, Subcommand};
use stem_splitter_service::{
    config::ServiceConfig, ensure_model, model::load_model, server::run_server,
    ProcessResponse, Processor, SeparationEngine, Upload, Workspace,
};
use std::{path::PathBuf, process, sync::Arc};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stem-splitter-service")]
#[command(about = "Stem separation service with raw and reduction lanes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ModelArgs {
    /// JSON config file (defaults to $STEM_SERVICE_CONFIG or ./stem-service.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local model file; its manifest is read from `<file>.json`
    #[arg(short, long)]
    model: Option<PathBuf>,

    #[arg(long)]
    manifest_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        #[command(flatten)]
        model: ModelArgs,

        #[arg(short, long)]
        listen: Option<String>,

        #[arg(short, long)]
        work_dir: Option<PathBuf>,
    },

    /// Process one file and print the JSON response
    Split {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "default")]
        lane: String,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Download and verify a model into the cache
    Prepare {
        #[arg(long)]
        manifest_url: String,

        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            model,
            listen,
            work_dir,
        } => handle_serve(model, listen, work_dir),
        Commands::Split {
            input,
            lane,
            model,
        } => handle_split(input, lane, model),
        Commands::Prepare {
            manifest_url,
            cache_dir,
        } => handle_prepare(manifest_url, cache_dir),
    };

    if let Err(e) = result {
        error!(error = %e, "fatal");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load_config(args: &ModelArgs) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    let mut cfg = ServiceConfig::load(args.config.as_deref())?;
    // a model given on the command line replaces whatever the file configured
    if let Some(path) = &args.model {
        cfg.model.path = Some(path.clone());
        cfg.model.manifest_url = None;
    } else if let Some(url) = &args.manifest_url {
        cfg.model.manifest_url = Some(url.clone());
        cfg.model.path = None;
    }
    Ok(cfg)
}

/// Loads the model once; the processor shares it with every request.
fn build_processor(cfg: &ServiceConfig) -> Result<Processor, Box<dyn std::error::Error>> {
    let model = load_model(&cfg.model)?;
    let engine = SeparationEngine::new(model, cfg.engine.clone())?;
    let workspace = Workspace::new(&cfg.work_dir)?;
    Ok(Processor::new(Arc::new(engine), workspace, cfg))
}

fn handle_serve(model: ModelArgs, listen: Option<String>, work_dir: Option<PathBuf>) -> CliResult {
    let mut cfg = load_config(&model)?;
    if let Some(addr) = listen {
        cfg.listen_addr = addr;
    }
    if let Some(dir) = work_dir {
        cfg.work_dir = dir;
    }
    cfg.validate()?;

    // model download uses a blocking client, so it happens before the runtime starts
    let processor = Arc::new(build_processor(&cfg)?);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_server(processor, &cfg))?;
    Ok(())
}

fn handle_split(input: PathBuf, lane: String, model: ModelArgs) -> CliResult {
    if !input.exists() {
        return Err(format!("Input file not found: {}", input.display()).into());
    }
    let cfg = load_config(&model)?;
    let processor = build_processor(&cfg)?;

    let upload = Upload {
        file_name: input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".into()),
        bytes: std::fs::read(&input)?,
    };
    let stems = processor.handle(upload, &lane)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&ProcessResponse { stems })?
    );
    Ok(())
}

fn handle_prepare(manifest_url: String, cache_dir: Option<PathBuf>) -> CliResult {
    let handle = ensure_model(&manifest_url, cache_dir.as_deref())?;
    println!("{}", handle.local_path.display());
    Ok(())
}
