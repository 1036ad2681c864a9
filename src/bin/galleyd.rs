use std::net::SocketAddr;
use std::path::Path;

use arrrg::CommandLine;
use arrrg_derive::CommandLine;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::signal;

use galley::config::ServerConfig;
use galley::router::{AppState, create_router};
use galley::telemetry::{self, LogFormat};

#[derive(CommandLine, Default, PartialEq, Eq)]
struct Args {
    #[arrrg(optional, "Path to a YAML configuration file")]
    config: Option<String>,
    #[arrrg(optional, "Host to bind the HTTP server")]
    host: Option<String>,
    #[arrrg(optional, "Port to bind the HTTP server")]
    port: Option<u16>,
    #[arrrg(optional, "PostgreSQL database URL")]
    database_url: Option<String>,
    #[arrrg(optional, "Public base URL used in OAuth redirects")]
    public_url: Option<String>,
    #[arrrg(optional, "Comma-separated list of allowed CORS origins")]
    cors_origins: Option<String>,
    #[arrrg(optional, "Log format: text or json")]
    log_format: Option<String>,
    #[arrrg(flag, "Run pending database migrations before serving")]
    migrate: bool,
    #[arrrg(flag, "Enable verbose logging")]
    verbose: bool,
}

const HELP_TEXT: &str = r#"galleyd - Galley control plane daemon

USAGE:
    galleyd [OPTIONS]

OPTIONS:
    --config <PATH>          YAML configuration file
    --host <HOST>            Host to bind the HTTP server [default: 127.0.0.1]
    --port <PORT>            Port to bind the HTTP server [default: 8080]
    --database-url <URL>     PostgreSQL database URL
    --public-url <URL>       Public base URL used in OAuth redirects
    --cors-origins <LIST>    Comma-separated list of allowed CORS origins
    --log-format <FORMAT>    text or json [default: text]
    --migrate                Run pending migrations before serving
    --verbose                Enable verbose logging

DESCRIPTION:
    Serves the Galley API and accepts agent connections on
    /agents/connect. RUST_LOG overrides the log filter.

    The server supports graceful shutdown via Ctrl+C."#;

impl Args {
    fn into_config(self) -> Result<(ServerConfig, LogFormat), Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(Path::new(path))?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(database_url) = self.database_url {
            config.database_url = database_url;
        }
        if let Some(public_url) = self.public_url {
            config.public_url = public_url;
        }
        if let Some(origins) = self.cors_origins {
            config.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }
        config.validate()?;
        let log_format = match self.log_format.as_deref() {
            Some(value) => LogFormat::parse(value)
                .ok_or_else(|| format!("unknown log format '{}': use text or json", value))?,
            None => LogFormat::default(),
        };
        Ok((config, log_format))
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received, stopping gracefully");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, free) = Args::from_command_line("USAGE: galleyd [OPTIONS]");

    if !free.is_empty() && free[0] == "help" {
        println!("{}", HELP_TEXT);
        return Ok(());
    }

    let migrate = args.migrate;
    let verbose = args.verbose;
    let (config, log_format) = match args.into_config() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    telemetry::init(log_format, verbose)?;

    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&config.database_url)
        .await
        .map_err(|e| format!("failed to connect to database: {}", e))?;
    if migrate {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("migrations applied");
    }

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;
    let app = create_router(AppState::new(pool, config));

    tracing::info!(%addr, "galleyd listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    tracing::info!("galleyd stopped");

    Ok(())
}
