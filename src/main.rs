use std::{net::SocketAddr, path::Path, sync::Arc};

use axum::{Router, extract::ConnectInfo};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use portico::{
    adapters::{AdminState, HealthChecker, HttpClientAdapter, HttpHandler, admin_router},
    config::{self, GatewayConfigValidator},
    core::GatewayService,
    plugins::PluginRegistry,
    ports::http_client::HttpClient,
    tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "gateway.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the gateway (default)
    Serve {
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
    /// Validate a configuration file
    Validate {
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
    /// Write a starter configuration file
    Init {
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let (command, config_path) = match args.command {
        Some(Commands::Serve { config }) => ("serve", config),
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        None => ("serve", args.config),
    };

    match command {
        "validate" => return validate_config_command(&config_path),
        "init" => return init_config_command(&config_path).await,
        _ => {}
    }

    let cfg = config::load_config(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    tracing_setup::init_tracing(&cfg.gateway.logging)
        .map_err(|e| eyre!("failed to initialize tracing: {e}"))?;

    let registry = Arc::new(PluginRegistry::with_builtins());
    GatewayConfigValidator::validate(&cfg, &registry.names())
        .map_err(|e| eyre!("configuration invalid:\n{e}"))?;

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("failed to create HTTP client")?);

    let gateway = Arc::new(
        GatewayService::new(&cfg, &registry, Arc::clone(&http_client))
            .context("failed to build gateway")?,
    );

    for upstream in gateway.upstreams().list() {
        HealthChecker::spawn(upstream, Arc::clone(&http_client));
    }

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = Arc::clone(&graceful_shutdown);
    tokio::spawn(async move {
        if let Err(error) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!(error = %error, "signal handler error");
        }
    });

    let handler = HttpHandler::new(Arc::clone(&gateway));
    let ingress = move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
                        req: axum::extract::Request| {
        let handler = handler.clone();
        async move { handler.handle_request(req, client_addr).await }
    };

    let admin_state = AdminState {
        gateway: Arc::clone(&gateway),
        registry: Arc::clone(&registry),
        http_client: Arc::clone(&http_client),
    };

    let mut app = Router::new();
    let mut admin_on_gateway_port = false;
    if cfg.gateway.admin_enabled && cfg.gateway.admin_port.is_none() {
        app = app.nest("/admin", admin_router(admin_state.clone()));
        admin_on_gateway_port = true;
    }
    let app = app.fallback(ingress);

    // dedicated admin listener when admin_port is configured
    if cfg.gateway.admin_enabled {
        if let Some(admin_port) = cfg.gateway.admin_port {
            let admin_addr: SocketAddr = format!("{}:{admin_port}", cfg.gateway.host)
                .parse()
                .context("failed to parse admin address")?;
            let admin_app = admin_router(admin_state);
            let admin_listener = tokio::net::TcpListener::bind(admin_addr)
                .await
                .context("failed to bind admin address")?;
            tracing::info!("admin API listening on {admin_addr}");
            tokio::spawn(async move {
                if let Err(error) = axum::serve(admin_listener, admin_app).await {
                    tracing::error!(error = %error, "admin server error");
                }
            });
        }
    }

    let addr: SocketAddr = format!("{}:{}", cfg.gateway.host, cfg.gateway.port)
        .parse()
        .context("failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    tracing::info!(
        "Portico gateway listening on {addr} ({} upstreams, {} services, admin: {})",
        cfg.upstreams.len(),
        cfg.services.len(),
        if !cfg.gateway.admin_enabled {
            "disabled".to_string()
        } else if admin_on_gateway_port {
            "/admin".to_string()
        } else {
            format!("port {}", cfg.gateway.admin_port.unwrap_or_default())
        },
    );

    tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            result.context("server error")?;
        }
        _ = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("shutting down, stopping health checkers");
            gateway.upstreams().stop_all();
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

fn validate_config_command(config_path: &str) -> Result<()> {
    println!("validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("error: configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let cfg = match config::load_config(config_path) {
        Ok(cfg) => {
            println!("configuration parsing: OK");
            cfg
        }
        Err(error) => {
            eprintln!("configuration parsing failed:\n  {error}");
            std::process::exit(1);
        }
    };

    let registry = PluginRegistry::with_builtins();
    match GatewayConfigValidator::validate(&cfg, &registry.names()) {
        Ok(()) => {
            println!("configuration validation: OK");
            println!();
            println!("summary:");
            println!("  listen:    {}:{}", cfg.gateway.host, cfg.gateway.port);
            println!("  upstreams: {}", cfg.upstreams.len());
            println!("  services:  {}", cfg.services.len());
            println!(
                "  routes:    {}",
                cfg.services.iter().map(|s| s.routes.len()).sum::<usize>()
            );
            println!("  plugins:   {} global", cfg.plugins.len());
            Ok(())
        }
        Err(error) => {
            eprintln!("configuration validation failed:\n{error}");
            std::process::exit(1);
        }
    }
}

async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("error: configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Portico gateway configuration

gateway:
  host: "0.0.0.0"
  port: 8000
  admin_enabled: true
  logging:
    level: info
    format: json

upstreams:
  - name: example-backend
    algorithm: round-robin
    targets:
      - host: "127.0.0.1"
        port: 3001
      - host: "127.0.0.1"
        port: 3002
    health_check:
      enabled: true
      path: /health
      interval_secs: 10

services:
  - name: example
    upstream: example-backend
    routes:
      - name: example-route
        paths: ["/api/*"]
        methods: [GET, POST, PUT, DELETE, PATCH]

plugins:
  - name: cors
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("failed to write config file")?;
    println!("created starter configuration at: {config_path}");
    println!("run 'portico serve --config {config_path}' to start the gateway");
    Ok(())
}
