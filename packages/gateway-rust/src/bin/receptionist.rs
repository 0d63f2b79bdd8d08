//! `receptionist`: command-line front end for the caching gateway.
//!
//! Loads an API definition, opens the selected cache store and either
//! performs one request, records one callback, lists routes, or serves the
//! callback ingestion endpoint.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use http::Method;
use receptionist_core::{ApiDefinition, Body};
use receptionist_gateway::network::{IngestConfig, IngestServer};
use receptionist_gateway::{
    open_store, BackendConfig, CallbackOptions, Receptionist, ReceptionistConfig, ReqwestTransport,
    RequestOptions, TransportConfig, DEFAULT_LOG_CAPACITY,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Outbound-request caching gateway.
#[derive(Parser, Debug)]
#[command(name = "receptionist", version, about)]
struct Cli {
    /// API definition (TOML with `headers`, `url` and `vars` tables).
    #[arg(short, long, env = "RECEPTIONIST_CONFIG")]
    config: PathBuf,

    /// Gateway name used in log fields.
    #[arg(long, env = "RECEPTIONIST_NAME", default_value = "receptionist")]
    name: String,

    /// Cache store backend.
    #[arg(long, env = "RECEPTIONIST_BACKEND", value_enum, default_value_t = Backend::Sqlite)]
    backend: Backend,

    /// SQLite connection URL for the relational backend.
    #[arg(long, env = "RECEPTIONIST_SQLITE_URL", default_value = "sqlite://receptionist.db")]
    sqlite_url: String,

    /// redb file for the key-value backend; in-memory when omitted.
    #[arg(long, env = "RECEPTIONIST_REDB_PATH")]
    redb_path: Option<PathBuf>,

    /// Record callbacks instead of ignoring them.
    #[arg(long, env = "RECEPTIONIST_CALLBACKS")]
    callbacks: bool,

    /// Entries kept by each in-memory request and callback log.
    #[arg(long, env = "RECEPTIONIST_LOG_CAPACITY", default_value_t = DEFAULT_LOG_CAPACITY)]
    log_capacity: usize,

    /// Whole-request timeout for upstream calls, in seconds.
    #[arg(long, env = "RECEPTIONIST_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "RECEPTIONIST_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Sqlite,
    Redb,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Perform one request through the cache and print the response as JSON.
    Request {
        /// HTTP method (GET, POST, ...).
        #[arg(value_parser = parse_method)]
        method: Method,
        /// Route name, or a literal URL.
        route: String,
        /// Literal suffix appended to the resolved path.
        #[arg(long, default_value = "")]
        append: String,
        /// Route placeholder value, `name=value`. Repeatable.
        #[arg(short, long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
        /// Query parameter, `name=value`. Repeatable.
        #[arg(short, long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,
        /// Extra request header, `name=value`. Repeatable.
        #[arg(short = 'H', long = "header", value_parser = parse_key_value)]
        headers: Vec<(String, String)>,
        /// JSON request body.
        #[arg(long, conflicts_with = "text")]
        json: Option<String>,
        /// Plain-text request body.
        #[arg(long)]
        text: Option<String>,
        /// Skip the cache lookup.
        #[arg(short, long)]
        force: bool,
    },
    /// Record one callback event.
    Callback {
        event: String,
        /// Payload; parsed as JSON when possible, otherwise kept as text.
        payload: String,
        #[arg(long)]
        source: Option<String>,
    },
    /// Print the configured routes, resolved against the base URL.
    Routes,
    /// Serve `POST /callbacks/{event}` and `GET /health`.
    Serve {
        #[arg(long, env = "RECEPTIONIST_HOST", default_value = "127.0.0.1")]
        host: String,
        #[arg(long, env = "RECEPTIONIST_PORT", default_value_t = 8080)]
        port: u16,
    },
}

fn parse_method(raw: &str) -> Result<Method, String> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).map_err(|err| err.to_string())
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected name=value, got {raw:?}"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

impl Cli {
    fn backend_config(&self) -> BackendConfig {
        match self.backend {
            Backend::Sqlite => BackendConfig::Sqlite {
                url: self.sqlite_url.clone(),
            },
            Backend::Redb => BackendConfig::Redb {
                path: self.redb_path.clone(),
            },
        }
    }

    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: Some(Duration::from_secs(self.timeout_secs)),
            ..TransportConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let api = ApiDefinition::load(&cli.config)
        .with_context(|| format!("failed to load API definition {}", cli.config.display()))?;
    let store = open_store(&cli.backend_config())
        .await
        .context("failed to open cache store")?;
    let transport = ReqwestTransport::new(&cli.transport_config())?;
    let gateway = Arc::new(Receptionist::new(
        ReceptionistConfig {
            name: cli.name.clone(),
            callback_enabled: cli.callbacks,
            max_log_entries: cli.log_capacity,
        },
        api,
        store,
        Arc::new(transport),
    ));

    let outcome = run(cli.command, Arc::clone(&gateway)).await;
    gateway.close().await?;
    outcome
}

async fn run(command: Command, gateway: Arc<Receptionist>) -> anyhow::Result<()> {
    match command {
        Command::Request {
            method,
            route,
            append,
            params,
            query,
            headers,
            json,
            text,
            force,
        } => {
            let mut options = RequestOptions::new().append(append);
            for (name, value) in params {
                options = options.param(name, value);
            }
            for (name, value) in query {
                options = options.query(name, value);
            }
            for (name, value) in headers {
                options = options.header(name, value);
            }
            if let Some(raw) = json {
                let value: serde_json::Value =
                    serde_json::from_str(&raw).context("--json is not valid JSON")?;
                options = options.body(value);
            } else if let Some(raw) = text {
                options = options.body(raw);
            }
            if force {
                options = options.force_refresh();
            }

            let response = gateway.request(method, &route, options).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Callback {
            event,
            payload,
            source,
        } => {
            if !gateway.callback_enabled() {
                bail!("callback mode is disabled; pass --callbacks to record events");
            }
            let payload = serde_json::from_str(&payload).map_or(Body::Text(payload), Body::Json);
            let mut options = CallbackOptions::default();
            if let Some(source) = source {
                options = options.source(source);
            }
            gateway.callback(&event, payload, options).await?;
            info!(event = %event, "callback recorded");
        }
        Command::Routes => {
            let routes = gateway.routes();
            for name in routes.routes().keys() {
                println!("{name}\t{}", routes.resolve(name));
            }
        }
        Command::Serve { host, port } => {
            let config = IngestConfig {
                host,
                port,
                ..IngestConfig::default()
            };
            let mut server = IngestServer::new(config, gateway);
            server.start().await?;
            server.serve(shutdown_signal()).await?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
