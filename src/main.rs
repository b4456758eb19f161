use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use regionsweep::api::{HttpApiClient, ListCache, RemoteApi};
use regionsweep::api::http::format_api_error;
use regionsweep::config::Config;
use regionsweep::engine::{
    run_module, EngineSettings, RemoteServiceMap, RunContext, ScanModule, ServiceAvailability,
    StaticServiceMap,
};
use regionsweep::error::ScanError;
use regionsweep::loot::write_loot;
use regionsweep::modules::{self, DnsModule, RegistriesModule};
use regionsweep::output::{OutputFormat, OutputWriter, TableFile};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Concurrent multi-region cloud resource inventory
#[derive(Parser, Debug)]
#[command(name = "regionsweep", version = regionsweep::VERSION, about, long_about = None)]
struct Args {
    /// Modules to run: registries (ecr), dns (route53) or all
    #[arg(required = true, value_name = "MODULE")]
    modules: Vec<String>,

    /// Comma-separated regions to scan (default: every known region)
    #[arg(long, value_delimiter = ',')]
    regions: Option<Vec<String>>,

    /// Maximum number of regions fetched at once
    #[arg(short = 'g', long)]
    concurrency: Option<usize>,

    /// Base URL of the inventory API
    #[arg(long)]
    endpoint: Option<String>,

    /// Account identifier
    #[arg(long)]
    account: Option<String>,

    /// Profile label used in output paths
    #[arg(long)]
    profile: Option<String>,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format
    #[arg(long)]
    format: Option<OutputFormat>,

    /// 1 = summary only, 2 = print tables, 3 = also print loot
    #[arg(short, long, default_value_t = 2)]
    verbosity: u8,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    /// Per-call deadline in seconds (0 waits forever)
    #[arg(long)]
    call_timeout: Option<u64>,

    /// Whole-scan deadline in seconds (0 disables)
    #[arg(long)]
    scan_timeout: Option<u64>,

    /// Service map file or http(s) URL
    #[arg(long)]
    service_map: Option<String>,

    /// Suppress the progress line
    #[arg(short, long)]
    quiet: bool,

    /// Remember these settings in the config file for later runs
    #[arg(long)]
    save_config: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", log_path.display(), e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("regionsweep started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("regionsweep").join("regionsweep.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".regionsweep").join("regionsweep.log");
    }
    PathBuf::from("regionsweep.log")
}

/// Fold command-line flags over the config file
fn merge_args(mut config: Config, args: &Args) -> Config {
    config.endpoint = args.endpoint.clone().or(config.endpoint);
    config.account = args.account.clone().or(config.account);
    config.profile = args.profile.clone().or(config.profile);
    config.regions = args.regions.clone().or(config.regions);
    config.concurrency = args.concurrency.or(config.concurrency);
    config.output_dir = args.output_dir.clone().or(config.output_dir);
    config.output_format = args.format.or(config.output_format);
    config.call_timeout_secs = args.call_timeout.or(config.call_timeout_secs);
    config.scan_timeout_secs = args.scan_timeout.or(config.scan_timeout_secs);
    config.service_map = args.service_map.clone().or(config.service_map);
    config
}

fn build_availability(
    config: &Config,
    client: &HttpApiClient,
) -> Result<Arc<dyn ServiceAvailability>> {
    match config.service_map.as_deref() {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(Arc::new(
            RemoteServiceMap::new(url, client.http.inner().clone()),
        )),
        Some(path) => Ok(Arc::new(
            StaticServiceMap::from_file(Path::new(path)).context("loading service map")?,
        )),
        None => Ok(Arc::new(
            StaticServiceMap::embedded().context("loading embedded service map")?,
        )),
    }
}

fn seconds(value: Option<u64>) -> Option<Duration> {
    value.filter(|s| *s > 0).map(Duration::from_secs)
}

/// Where one module's tables and loot go
struct Destination {
    directory: PathBuf,
    format: OutputFormat,
    verbosity: u8,
    profile: String,
}

/// Run one module end to end. Returns true when anything failed.
async fn scan<M: ScanModule>(
    module: M,
    regions: &[String],
    ctx: &RunContext,
    destination: &Destination,
) -> bool {
    let module = Arc::new(module);
    let name = module.name();
    let report = run_module(module.clone(), regions, ctx).await;

    for error in &report.errors {
        match error {
            ScanError::Fetch { region, source } => {
                eprintln!("[{}][{}] {}", name, region, format_api_error(source))
            }
            other => eprintln!("[{}] {}", name, other),
        }
    }

    let rows: Vec<Vec<String>> = report.records.iter().map(|r| module.row(r)).collect();
    let table = TableFile::new(name, &module.header(), rows);
    let writer = OutputWriter::new(&destination.directory, destination.format, destination.verbosity);
    let mut failures = writer.write(&table);

    let loot = write_loot(
        &destination.directory,
        name,
        &module.loot(&report.records),
        destination.verbosity,
    );
    failures += loot.failures;

    println!(
        "[{}][{}] {} {} found.",
        name,
        destination.profile,
        report.records.len(),
        if report.records.len() == 1 { "record" } else { "records" }
    );
    tracing::info!(
        module = %name,
        "Finished in {:?}: {} complete, {} errors, {} skipped, {} output failures",
        report.elapsed,
        report.counts.complete,
        report.counts.error,
        report.counts.skipped,
        failures
    );

    report.has_errors() || failures > 0
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let mut selected: Vec<&'static str> = Vec::new();
    for requested in &args.modules {
        let resolved = modules::resolve(requested)
            .with_context(|| format!("unknown module: {}", requested))?;
        for name in resolved {
            if !selected.contains(&name) {
                selected.push(name);
            }
        }
    }

    let config = merge_args(Config::load(), &args);
    if args.save_config {
        config.save().context("saving config")?;
        if let Some(path) = Config::config_path() {
            println!("Settings saved to {}", path.display());
        }
    }
    let account = config.effective_account();
    let profile = config.effective_profile();

    let client = HttpApiClient::new(&config.effective_endpoint(), config.effective_token())?;
    let availability = build_availability(&config, &client)?;

    let mut regions = config.effective_regions(Vec::new);
    if regions.is_empty() {
        regions = availability
            .known_regions()
            .await
            .context("listing regions from the service map")?;
    }

    let settings = EngineSettings {
        concurrency: config.effective_concurrency(),
        channel_capacity: config.effective_channel_capacity(),
        progress_interval: Duration::from_millis(config.effective_progress_interval_ms()),
        quiet: args.quiet,
        call_timeout: seconds(config.call_timeout_secs),
    };
    tracing::info!("Account {} profile {} settings {:?}", account, profile, settings);

    let api: Arc<dyn RemoteApi> = Arc::new(client);
    let ctx = RunContext::new(
        api,
        Arc::new(ListCache::new()),
        availability,
        &account,
        settings,
    );

    let deadline = seconds(config.scan_timeout_secs).map(|limit| ctx.cancel_after(limit));
    let interrupt = {
        let cancel = ctx.cancel_token().clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, cancelling outstanding calls");
                cancel.cancel();
            }
        })
    };

    let destination = Destination {
        directory: config
            .effective_output_dir()
            .join(format!("{}-{}", account, profile)),
        format: config.effective_output_format(),
        verbosity: args.verbosity,
        profile,
    };

    let mut failed = false;
    for name in selected {
        failed |= match name {
            "registries" => scan(RegistriesModule::new(), &regions, &ctx, &destination).await,
            "dns" => scan(DnsModule::new(), &regions, &ctx, &destination).await,
            _ => false,
        };
    }

    if let Some(deadline) = deadline {
        deadline.abort();
    }
    interrupt.abort();

    if failed {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
