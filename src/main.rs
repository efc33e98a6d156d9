use misp_glue::cli::{Cli, Commands, ConfigAction};
use misp_glue::config::{parse_duration, Config};
use misp_glue::daemon::{report_configuration_gaps, Daemon};
use misp_glue::error::{GlueError, Result};
use misp_glue::modules::{select_modules, ModuleService};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Run => cmd_run(cli.config)?,
        Commands::Modules { attribute_type } => cmd_modules(cli.config, attribute_type)?,
        Commands::Config { action } => cmd_config(cli.config, action)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "misp_glue=debug" } else { "misp_glue=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| GlueError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_run(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    tracing::info!("Configuration loaded successfully");

    let mut daemon = Daemon::new(config)?;
    let stats = runtime()?.block_on(daemon.run_foreground())?;

    tracing::debug!("Final statistics: {:?}", stats);
    Ok(())
}

fn cmd_modules(config_path: Option<PathBuf>, attribute_type: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let timeout = parse_duration(&config.modules.timeout).ok_or_else(|| {
        GlueError::Config(format!("Invalid modules.timeout: {}", config.modules.timeout))
    })?;
    let service = ModuleService::new(config.modules.base_url(), timeout)?;

    let catalog = runtime()?.block_on(service.fetch_catalog())?;
    let allow_list = &config.enrichment.enabled;

    match attribute_type {
        Some(attribute_type) => {
            let selected = select_modules(&attribute_type, &catalog, allow_list);
            if selected.is_empty() {
                println!("No enabled modules accept '{}'", attribute_type);
            }
            for module in selected {
                println!("{}", module.name);
            }
        }
        None => {
            report_configuration_gaps(&catalog, &config);
            for module in catalog.expansion_modules() {
                let marker = if allow_list.permits(&module.name) { "✓" } else { " " };
                println!(
                    "{} {:<24} {}",
                    marker,
                    module.name,
                    module.attributes.input.join(", ")
                );
            }
        }
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let json =
                serde_json::to_string_pretty(&config.redacted()).map_err(|e| GlueError::Json {
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
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
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

            create_parent_dir(&path)?;
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

    Config::load(&path)
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| GlueError::Io {
            source: e,
            context: format!("Failed to create config directory: {:?}", parent),
        })?;
    }
    Ok(())
}
