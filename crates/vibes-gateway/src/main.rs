//! UITVibes gateway - Entry point

use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info};
use vibes_gateway::{Gateway, GatewayConfig, GatewayServer, ServiceLocator, ServiceRegistry};
use vibes_telemetry::init_telemetry;

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("vibes-gateway {}", vibes_gateway::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"UITVibes API gateway

USAGE:
    vibes-gateway [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    VIBES_GATEWAY_LISTEN_ADDR              Listen address (default: 0.0.0.0)
    VIBES_GATEWAY_LISTEN_PORT              Listen port (default: 8080)
    VIBES_GATEWAY_GATEWAY_NAME             Value of the X-Gateway header
    VIBES_GATEWAY_UPSTREAM_TIMEOUT         Upstream timeout in seconds (default: 30)
    VIBES_GATEWAY_JWT_KEY                  Token signing key (required, 32+ bytes)
    VIBES_GATEWAY_JWT_ISSUER               Expected token issuer (required)
    VIBES_GATEWAY_JWT_AUDIENCE             Expected token audience (required)
    VIBES_GATEWAY_RATE_LIMIT_ENABLED       Enable rate limiting (default: true)
    VIBES_GATEWAY_RATE_LIMIT_PERMITS       Requests per window (default: 200)
    VIBES_GATEWAY_SERVICES_STRICT          Disable development service defaults
    VIBES_GATEWAY_SERVICES_<NAME>_HTTPS    HTTPS base URL of a service
    VIBES_GATEWAY_SERVICES_<NAME>_HTTP     HTTP base URL of a service
    VIBES_GATEWAY_LOG_LEVEL                Log filter (default: info)
    VIBES_GATEWAY_OTLP_ENDPOINT            OpenTelemetry collector endpoint

EXAMPLES:
    # Run with configuration file
    vibes-gateway --config /etc/vibes/gateway.toml

    # Run with environment variables
    VIBES_GATEWAY_JWT_KEY=... VIBES_GATEWAY_JWT_ISSUER=uitvibes \
    VIBES_GATEWAY_JWT_AUDIENCE=uitvibes-clients vibes-gateway
"
    );
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<GatewayConfig> {
    let config = match path {
        Some(path) => GatewayConfig::from_file(&path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => GatewayConfig::default(),
    }
    .with_env_overrides();

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(args.config)?;
    let _telemetry = init_telemetry(config.telemetry_config()).context("failed to initialize telemetry")?;

    info!("Starting UITVibes gateway v{}", vibes_gateway::VERSION);
    info!(
        issuer = %config.jwt.issuer,
        audience = %config.jwt.audience,
        key_bytes = config.jwt.key.len(),
        algorithm = ?config.jwt.algorithm,
        "Token verification configured"
    );

    let registry = ServiceRegistry::from_settings(&config.services);
    for route in &config.routes {
        if let Ok(url) = registry.resolve(&route.service) {
            info!(prefix = %route.prefix, service = %route.service, url = %url, "Route configured");
        }
    }

    let gateway = Gateway::builder(config).build().context("failed to build gateway")?;
    let server = GatewayServer::bind(gateway).await.context("failed to bind listener")?;

    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("server error")?;

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        if tracing::dispatcher::has_been_set() {
            error!("{:#}", e);
        } else {
            eprintln!("vibes-gateway: {e:#}");
        }
        std::process::exit(1);
    }
}
