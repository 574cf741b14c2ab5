use std::net::TcpListener;

use pactline_hub::config::Config;
use pactline_hub::hub::Hub;
use tokio::signal;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Graceful start: Check if port is available
fn check_port_available(bind: &str, port: u16) -> bool {
    TcpListener::bind(format!("{bind}:{port}")).is_ok()
}

/// Graceful start: Find available port starting from default
fn find_available_port(bind: &str, start: u16) -> Option<u16> {
    (start..start + 10).find(|&port| check_port_available(bind, port))
}

fn print_help() {
    println!("pactline-hub - realtime sync hub for the Pactline contract suite");
    println!();
    println!("USAGE:");
    println!("    pactline-hub [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Print help information");
    println!("    -v, --version    Print version");
    println!();
    println!("CONFIG:");
    println!("    ~/.config/pactline/config.toml");
    println!();
    println!("ENDPOINTS:");
    println!("    ws://<bind>:<port>/api/websocket   Connection endpoint");
    println!("    http://<bind>:<port>/api/health    Health check");
    println!("    http://<bind>:<port>/api/sessions  Live session list");
}

async fn shutdown_signal() {
    // Wait for Ctrl+C or SIGTERM
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Graceful shutdown initiated");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging (tracing)
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    // Handle --version and --help
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-v" => {
                println!("pactline-hub {VERSION}");
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            _ => {}
        }
    }

    // === LOAD CONFIGURATION ===
    Config::create_default_if_missing();
    let config = Config::load();
    tracing::info!(
        path = %Config::default_config_path().display(),
        "Loaded configuration"
    );

    // === GRACEFUL START ===
    let port = if check_port_available(&config.server.bind, config.server.port) {
        config.server.port
    } else {
        tracing::warn!(port = config.server.port, "Port in use, finding alternative");
        find_available_port(&config.server.bind, config.server.port + 1).ok_or_else(|| {
            anyhow::anyhow!(
                "no available port in range {}-{}",
                config.server.port,
                config.server.port + 10
            )
        })?
    };

    let hub = Hub::new(&config);
    let app = hub.router();

    let addr = format!("{}:{}", config.server.bind, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Hub listening");
    tracing::info!("WebSocket endpoint: ws://{addr}/api/websocket");

    // Connection tasks are spawned per accepted socket, so closing them is
    // the hub's job, not the accept loop's; run the server against the
    // shutdown signal and tear the hub down once either finishes.
    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        () = shutdown_signal() => {}
    }

    hub.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
