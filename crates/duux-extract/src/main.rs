//! Standalone Duux credential extractor.
//!
//! Runs the intercepting proxy on the user's own machine, prints the
//! proxy settings to configure on the phone, and waits for the Duux app
//! to produce a capturable request. On success the credential is written
//! to `duux_credentials.json` and optionally pushed to a waiting setup
//! flow via its loopback callback endpoint.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use duux_capture::{CaptureConfig, Credential, ProxyManager};

const OUTPUT_FILE: &str = "duux_credentials.json";
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Extract Duux API credentials with an intercepting proxy.
#[derive(Parser, Debug)]
#[command(name = "duux-extract")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Proxy port (falls back to an ephemeral port when taken)
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Setup-flow endpoint to push captured credentials to
    /// (e.g. http://localhost:8123)
    #[arg(long)]
    ha_endpoint: Option<String>,

    /// Intercepting-proxy executable
    #[arg(long)]
    proxy_program: Option<String>,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep the console quiet by default; the proxy is noisy enough.
    let filter = if cli.verbose {
        "duux_extract=debug,duux_capture=debug,warn"
    } else {
        "duux_extract=info,error"
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_target(false)
        .init();

    let mut config = CaptureConfig::load().context("Failed to load capture config")?;
    config.requested_port = Some(cli.port);
    config.capture_timeout_secs = cli.timeout;
    if let Some(program) = cli.proxy_program {
        config.proxy_program = program;
    }

    let manager = ProxyManager::new(config);

    // Ctrl-C cancels the wait; teardown happens on the normal exit path.
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let bold = Style::new().bold();
    let dim = Style::new().dim();
    let green = Style::new().green();
    let red = Style::new().red();

    let port = match manager.start().await {
        Ok(port) => port,
        Err(e) => {
            eprintln!("{} {}", red.apply_to("Failed to start proxy:"), e);
            eprintln!(
                "{}",
                dim.apply_to("Is mitmproxy installed? Try: pip install mitmproxy")
            );
            std::process::exit(1);
        }
    };

    println!();
    println!("{}", bold.apply_to(format!("Proxy started on port {}", port)));
    println!(
        "  Configure your phone's proxy: {}",
        bold.apply_to(format!("{}:{}", local_ip(), port))
    );
    println!(
        "  Install the certificate from {}",
        bold.apply_to("http://mitm.it")
    );
    println!("  Then open the Duux app; credentials are captured automatically.");
    println!("{}", dim.apply_to("  Press Ctrl+C to stop."));
    println!();

    let captured = manager
        .wait_for_credentials(Duration::from_secs(cli.timeout), &cancel)
        .await;

    manager.stop().await;

    let credential = match captured {
        Ok(Some(credential)) => credential,
        Ok(None) => {
            if cancel.is_cancelled() {
                println!("{}", dim.apply_to("Stopped by user."));
            } else {
                println!(
                    "{}",
                    red.apply_to("No credentials captured before the timeout.")
                );
            }
            return Ok(());
        }
        Err(e) => {
            eprintln!("{} {}", red.apply_to("Capture failed:"), e);
            std::process::exit(1);
        }
    };

    println!("{}", green.apply_to("Credentials captured!"));
    println!("  Device ID: {}", bold.apply_to(&credential.device_id));
    println!("  Token:     {}", bold.apply_to(credential.redacted_token()));

    write_output(&credential)?;
    println!("  Saved to {}", bold.apply_to(OUTPUT_FILE));

    if let Some(endpoint) = &cli.ha_endpoint {
        push_to_endpoint(endpoint, &credential).await;
    } else {
        println!();
        println!(
            "{}",
            dim.apply_to("Enter the values above in the Duux integration setup.")
        );
    }

    Ok(())
}

/// Best-effort local address, for the proxy settings the user types into
/// their phone. The UDP connect never sends a packet.
fn local_ip() -> String {
    let probe = || -> std::io::Result<String> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    probe().unwrap_or_else(|e| {
        debug!(error = %e, "Could not determine local IP, using loopback");
        "127.0.0.1".to_string()
    })
}

fn write_output(credential: &Credential) -> Result<()> {
    let path = PathBuf::from(OUTPUT_FILE);
    let payload = serde_json::to_string_pretty(credential)?;
    std::fs::write(&path, payload)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Push the credential to a waiting setup flow. Failure is reported but
/// does not fail the run; the user still has the local file.
async fn push_to_endpoint(endpoint: &str, credential: &Credential) {
    let green = Style::new().green();
    let yellow = Style::new().yellow();

    let url = format!("{}/credentials", endpoint.trim_end_matches('/'));
    let client = match reqwest::Client::builder().timeout(PUSH_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            println!("{} {}", yellow.apply_to("Could not build HTTP client:"), e);
            return;
        }
    };

    match client.post(&url).json(credential).send().await {
        Ok(response) if response.status().is_success() => {
            println!(
                "{}",
                green.apply_to("Credentials sent to the setup flow. Setup can finish there.")
            );
        }
        Ok(response) => {
            println!(
                "{} {}",
                yellow.apply_to("Setup flow rejected the credentials:"),
                response.status()
            );
            println!("  Enter them manually instead.");
        }
        Err(e) => {
            println!("{} {}", yellow.apply_to("Could not reach the setup flow:"), e);
            println!("  Enter the credentials manually instead.");
        }
    }
}
