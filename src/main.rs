use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use visearch::cli::{Cli, Commands, ConfigAction, IngestArgs};
use visearch::config::{Config, ConfigValidator};
use visearch::embedding::{FastEmbedImageProvider, ImageEmbedder};
use visearch::error::{Result, VisearchError};
use visearch::ingest::{IngestOptions, IngestPipeline};
use visearch::search::{AvailabilityMonitor, QueryEngine};
use visearch::server::{self, AppState};
use visearch::store::{ElasticClient, ElasticClientConfig, IndexSchema, IndexStore, ModelService};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    let outcome = match cli.command {
        Commands::Ingest(args) => cmd_ingest(cli.config, args).await,
        Commands::Serve { host, port } => cmd_serve(cli.config, host, port).await,
        Commands::Status => cmd_status(cli.config).await,
        Commands::Config { action } => cmd_config(cli.config, action),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_certificate_error() => {
            eprintln!("✗ {}", e);
            eprintln!(
                "  The Elasticsearch certificate could not be verified. Pass the cluster's CA \
                 bundle with --ca_certs <FILE>, or disable verification with --verify_certs=false."
            );
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "visearch=debug" } else { "visearch=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

async fn cmd_ingest(config_path: Option<PathBuf>, args: IngestArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    args.apply(&mut config);
    ConfigValidator::validate(&config)?;

    let schema = IndexSchema::load(&config.index.mappings_file)?;

    let start = Instant::now();
    let embedder = load_embedder(&config)?;
    tracing::info!("Duration loading model = {:.2?}", start.elapsed());

    let client: Arc<dyn IndexStore> = Arc::new(connect(&config)?);
    let pipeline = IngestPipeline::new(client, embedder, IngestOptions::from_config(&config));
    let report = pipeline.run(&schema).await?;

    println!("✓ Ingestion finished");
    println!("  Images discovered: {}", report.discovered);
    println!("  Documents indexed: {}", report.indexed);
    if !report.embedding_failures.is_empty() {
        println!("  Skipped files:     {}", report.embedding_failures.len());
        for failure in &report.embedding_failures {
            println!("    {}: {}", failure.path.display(), failure.error);
        }
    }
    if !report.bulk_failures.is_empty() {
        println!("  Rejected docs:     {}", report.bulk_failures.len());
        for failure in &report.bulk_failures {
            println!(
                "    {} ({}): {}",
                failure.image_id, failure.relative_path, failure.reason
            );
        }
    }
    if report.duplicate_ids > 0 {
        println!("  Duplicate ids:     {}", report.duplicate_ids);
    }
    println!("  Total duration:    {:.2?}", start.elapsed());

    Ok(())
}

async fn cmd_serve(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| {
            VisearchError::Config(format!(
                "Invalid listen address {}:{}: {}",
                config.server.host, config.server.port, e
            ))
        })?;

    let embedder = load_embedder(&config)?;
    let client = Arc::new(connect(&config)?);
    let store: Arc<dyn IndexStore> = client.clone();
    let models: Arc<dyn ModelService> = client;

    let engine = QueryEngine::new(
        store,
        models.clone(),
        embedder,
        config.index.name.clone(),
        config.embedding.text_model_id.clone(),
        Duration::from_secs(config.server.query_timeout_secs),
    );

    let state = AppState {
        engine,
        monitor: AvailabilityMonitor::new(models),
        images_root: config.corpus.images_root.clone(),
        upload_dir: config.server.upload_dir.clone(),
        max_upload_bytes: config.server.max_content_length,
    };

    server::serve(state, addr).await
}

async fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let client = Arc::new(connect(&config)?);

    let index = &config.index.name;
    let model_id = &config.embedding.text_model_id;
    let readiness = AvailabilityMonitor::new(client.clone()).check(model_id).await?;
    let index_exists = client.index_exists(index).await?;

    println!("visearch Status");
    println!("===============");
    println!("\nElasticsearch: {}", client.host());
    println!("\nText model: {}", model_id);
    println!("  State: {}", readiness);

    println!("\nIndex: {}", index);
    if index_exists {
        let count = client.count(index).await?;
        println!("  Documents: {}", count);
    } else {
        println!("  Not created yet. Run 'visearch ingest' first.");
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| VisearchError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            IndexSchema::load(&config.index.mappings_file)?.validate(config.embedding.dimension)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Index schema:   {}", config.index.mappings_file.display());
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            // Create parent directory
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| VisearchError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'visearch config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    Config::load(&path)
}

fn load_embedder(config: &Config) -> Result<Arc<dyn ImageEmbedder>> {
    tracing::info!("Loading image model {}", config.embedding.image_model);
    let provider = FastEmbedImageProvider::new(&config.embedding.image_model)?;

    if provider.dimension() != config.embedding.dimension {
        return Err(VisearchError::Config(format!(
            "Model {} produces {}-dim vectors but embedding.dimension is {}",
            provider.model_name(),
            provider.dimension(),
            config.embedding.dimension
        )));
    }

    Ok(Arc::new(provider))
}

fn connect(config: &Config) -> Result<ElasticClient> {
    ElasticClient::new(ElasticClientConfig::from(&config.elasticsearch))
}
