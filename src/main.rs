//! applykit CLI entrypoint.
//!
//! This is the main entrypoint for the applykit command-line tool.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use applykit::cli::{ApplySwitches, Cli, Commands, DefinitionArgs, LogFormat, OutputFormatter};
use applykit::client::{ObjectStore, RestClient};
use applykit::config::{ApplyKitConfig, ConfigParser, find_config_file, user_config_file};
use applykit::error::{ApplyKitError, Result};
use applykit::manifest;
use applykit::object::{GroupVersion, Object};
use applykit::patch::OpenApiSchema;
use applykit::patcher::{ApplyOutcome, Patcher};
use applykit::registrar::Registrar;
use applykit::resource::{ResourceDescriptor, RestMapper};
use applykit::watcher::{EventHandler, Watcher};

use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", formatter.error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` takes precedence.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    write_line(&mut std::io::stdout().lock(), text)
}

fn write_line(out: &mut impl Write, text: &str) -> Result<()> {
    writeln!(out, "{}", text.trim_end())?;
    Ok(())
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    // Printing a definition needs no configuration or server.
    if let Commands::Definition(args) = &cli.command {
        return emit(&formatter.format_object(&args.descriptor().definition()?));
    }

    let config = load_config(&cli)?;
    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());

    let client = Arc::new(RestClient::new(&config.cluster)?);
    let store: Arc<dyn ObjectStore> = client.clone();

    match cli.command {
        Commands::Apply { file, switches } => {
            let patcher = with_server_schema(build_patcher(&config, store, &token), &client).await;
            cmd_apply(&patcher, &file, &switches, &formatter).await
        }
        Commands::Delete { file } => {
            let patcher = build_patcher(&config, store, &token);
            cmd_delete(&patcher, &file, &formatter).await
        }
        Commands::Get {
            api_version,
            kind,
            name,
        } => {
            let patcher = build_patcher(&config, store, &token);
            let gvk = GroupVersion::parse(&api_version).with_kind(kind);
            let object: Object = patcher.get(&gvk, Some(&config.cluster.namespace), &name).await?;
            emit(&formatter.format_object(&object))
        }
        Commands::Register(args) => cmd_register(store, &args, token, &formatter).await,
        Commands::Watch {
            api_version,
            kind,
            all_namespaces,
            resync_secs,
        } => {
            let gvk = GroupVersion::parse(&api_version).with_kind(kind);
            let mut mapper = RestMapper::builtin();
            for descriptor in &config.resources {
                mapper.register_descriptor(descriptor);
            }
            let mapping = if mapper.contains(&gvk) {
                mapper.mapping_for(&gvk)?
            } else {
                let descriptor = ResourceDescriptor::new(gvk.group, gvk.version, gvk.kind);
                mapper.register_descriptor(&descriptor);
                mapper.mapping_for(&descriptor.group_version_kind())?
            };
            let namespace = (!all_namespaces).then(|| config.cluster.namespace.clone());
            let handler = Arc::new(PrintingHandler::new(formatter, std::io::stdout()));

            Watcher::new(store, mapping, namespace, handler)
                .with_resync_period(Duration::from_secs(resync_secs.max(1)))
                .run(token)
                .await;
            Ok(())
        }
        Commands::Definition(_) => Ok(()),
    }
}

/// Loads configuration: explicit path, then the project file, then the
/// per-user file, then defaults. Flags override the environment.
fn load_config(cli: &Cli) -> Result<ApplyKitConfig> {
    let parser = ConfigParser::new();
    parser.load_dotenv()?;

    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| find_config_file(cwd).ok())
            .or_else(user_config_file),
    };
    match &path {
        Some(path) => debug!("Using configuration file: {}", path.display()),
        None => debug!("No configuration file found, using defaults"),
    }

    let mut config = parser.load_with_env(path.as_deref())?;
    if let Some(server) = &cli.server {
        config.cluster.server.clone_from(server);
    }
    if let Some(token) = &cli.token {
        config.cluster.token = Some(token.clone());
    }
    if let Some(namespace) = &cli.namespace {
        config.cluster.namespace.clone_from(namespace);
    }
    config.patcher.default_namespace.clone_from(&config.cluster.namespace);
    config.validate()?;
    Ok(config)
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

fn build_patcher(config: &ApplyKitConfig, store: Arc<dyn ObjectStore>, token: &CancellationToken) -> Patcher {
    let mut patcher = Patcher::new(config.apply.tracker_name.clone(), store)
        .with_config(config.apply.clone())
        .with_settings(config.patcher.clone())
        .with_cancellation(token.clone());
    for descriptor in &config.resources {
        patcher = patcher.with_descriptor(descriptor);
    }
    patcher
}

/// Attaches the server's published schema when it can be fetched.
async fn with_server_schema(patcher: Patcher, client: &RestClient) -> Patcher {
    let schema = client
        .openapi_document()
        .await
        .and_then(|bytes| OpenApiSchema::from_slice(&bytes));
    match schema {
        Ok(schema) => {
            debug!("Loaded OpenAPI schema with {} definitions", schema.len());
            patcher.with_schema(Arc::new(schema))
        }
        Err(e) => {
            warn!("OpenAPI schema unavailable, using built-in metadata: {}", e);
            patcher
        }
    }
}

/// Apply every object of a manifest.
async fn cmd_apply(
    patcher: &Patcher,
    file: &Path,
    switches: &ApplySwitches,
    formatter: &OutputFormatter,
) -> Result<()> {
    let objects = manifest::load_file(file)?;
    info!("Applying {} objects from {}", objects.len(), file.display());

    let options = switches.options();
    let mut outcome = ApplyOutcome::default();
    for object in &objects {
        match patcher.apply(object, &options).await {
            Ok(applied) => outcome.applied.extend(applied.applied),
            Err(failure) => {
                if !outcome.applied.is_empty() {
                    emit(&formatter.format_outcome(&outcome))?;
                }
                debug!("Last payload: {}", String::from_utf8_lossy(&failure.patch));
                return Err(failure.into_error());
            }
        }
    }

    emit(&formatter.format_outcome(&outcome))
}

/// Delete every object of a manifest.
async fn cmd_delete(patcher: &Patcher, file: &Path, formatter: &OutputFormatter) -> Result<()> {
    let objects = manifest::load_file(file)?;
    for object in &objects {
        patcher.delete(object, &[]).await?;
        let name = object.name().unwrap_or_default();
        emit(&formatter.success(&format!(
            "{} {} deleted",
            object.kind().unwrap_or_default(),
            name
        )))?;
    }
    Ok(())
}

/// Register a custom resource kind.
async fn cmd_register(
    store: Arc<dyn ObjectStore>,
    args: &DefinitionArgs,
    token: CancellationToken,
    formatter: &OutputFormatter,
) -> Result<()> {
    let descriptor = args.descriptor();
    Registrar::new(store, &RestMapper::builtin())?
        .with_cancellation(token)
        .register(&descriptor)
        .await?;
    emit(&formatter.success(&format!("{} established", descriptor.full_name())))
}

/// Prints watch events as they arrive.
struct PrintingHandler<W> {
    formatter: OutputFormatter,
    out: Mutex<W>,
}

impl<W: Write> PrintingHandler<W> {
    fn new(formatter: OutputFormatter, out: W) -> Self {
        Self {
            formatter,
            out: Mutex::new(out),
        }
    }

    fn print(&self, event: &str, object: &Object) {
        let text = self.formatter.format_event(event, object);
        let result = match self.out.lock() {
            Ok(mut out) => write_line(&mut *out, &text),
            Err(_) => Err(ApplyKitError::internal("output lock poisoned")),
        };
        if let Err(e) = result {
            warn!("Failed to print {} event for {}: {}", event, object.name().unwrap_or_default(), e);
        }
    }
}

#[async_trait]
impl<W: Write + Send> EventHandler for PrintingHandler<W> {
    async fn on_add(&self, object: &Object) {
        self.print("added", object);
    }

    async fn on_update(&self, _old: &Object, new: &Object) {
        self.print("updated", new);
    }

    async fn on_delete(&self, object: &Object) {
        self.print("deleted", object);
    }
}
