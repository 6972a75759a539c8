//! # MarshRPC CLI Entry Point
//!
//! Main binary for the MarshRPC framework. Serves the demo calculator
//! contract over TCP, or calls one of its procedures.
//!
//! ## Usage
//!
//! ```bash
//! # Serve on the default address (127.0.0.1:7400)
//! marshrpc serve
//!
//! # Serve with limits
//! marshrpc serve -b 0.0.0.0:7400 --max-connections 64 --max-frame-bytes 1048576
//!
//! # Call a procedure (outputs raw JSON)
//! marshrpc call 127.0.0.1:7400 add 2 3
//! ```
//!
//! The bind address falls back to the `MARSHRPC_BIND` environment variable
//! when `--bind` is not given.

use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use marshrpc_client::{Client, ClientConfig};
use marshrpc_common::transport::{TcpConfig, TcpTransport, DEFAULT_MAX_FRAME_SIZE};
use marshrpc_server::ServerConfig;

/// Main CLI structure parsed from command-line arguments.
#[derive(FromArgs)]
/// MarshRPC - typed RPC over any transport
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

/// Available CLI subcommands.
///
/// - **Serve**: Serve the demo calculator contract over TCP
/// - **Call**: Make a single RPC call (unix-friendly JSON output)
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
}

/// Arguments for serving the calculator contract.
///
/// # Example
///
/// ```bash
/// marshrpc serve -b 0.0.0.0:7400 --max-connections 64
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// serve the demo calculator contract over TCP
struct ServeArgs {
    /// address to bind to
    ///
    /// Falls back to the MARSHRPC_BIND environment variable, then to
    /// 127.0.0.1:7400.
    #[argh(option, short = 'b')]
    bind: Option<String>,

    /// maximum number of concurrent connections
    ///
    /// Further connections wait until a slot frees up. Unlimited by default.
    #[argh(option, long = "max-connections")]
    max_connections: Option<usize>,

    /// largest accepted frame in bytes
    ///
    /// Connections sending a larger frame are closed. Defaults to 100 MB.
    #[argh(option, long = "max-frame-bytes", default = "DEFAULT_MAX_FRAME_SIZE")]
    max_frame_bytes: usize,
}

/// Arguments for making a single RPC call.
///
/// Prints the result as raw JSON to stdout. Failures are printed to stderr
/// as a JSON error descriptor with a non-zero exit code.
///
/// # Examples
///
/// ```bash
/// marshrpc call 127.0.0.1:7400 div 10 2
/// marshrpc call 127.0.0.1:7400 sum 1.5 2.5 3
/// marshrpc call 127.0.0.1:7400 concat foo bar | jq -r .
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a calculator procedure on a server
struct CallArgs {
    /// address of the server to call
    #[argh(positional)]
    server_address: String,

    /// name of the procedure to call (add, sub, mul, div, sum, concat, echo, fail)
    #[argh(positional)]
    procedure: String,

    /// procedure arguments, in declaration order
    #[argh(positional)]
    args: Vec<String>,

    /// time to wait for the response in milliseconds
    #[argh(option, long = "timeout-ms", default = "5000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Keep `call` output clean for unix tool usage (piping to jq, etc.)
    if !matches!(cli.command, Commands::Call(_)) {
        // Set default log level to INFO, but allow RUST_LOG env var to override
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Call(args) => call(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let bind = marshrpc_cli::resolve_bind(args.bind, std::env::var(marshrpc_cli::BIND_ENV).ok());

    let mut config = ServerConfig::default().with_max_frame_size(args.max_frame_bytes);
    if let Some(max_connections) = args.max_connections {
        config = config.with_max_connections(max_connections);
    }

    let server = marshrpc_cli::calculator_server(config).context("Failed to build calculator server")?;
    tracing::info!("Starting MarshRPC calculator on {}", bind);

    let mut listening = tokio::spawn({
        let server = server.clone();
        async move { server.listen_on(&bind).await }
    });

    let interrupted = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            true
        }
        finished = &mut listening => {
            // The accept loop only returns on its own after a bind error
            finished.context("Server task panicked")??;
            false
        }
    };

    if interrupted {
        tracing::info!("Received Ctrl-C, shutting down");
        server.stop();
        listening.await.context("Server task panicked")??;
    }

    let stats = serde_json::to_string(&server.stats())?;
    tracing::info!("Final statistics: {}", stats);
    Ok(())
}

async fn call(args: CallArgs) -> Result<()> {
    let timeout = Duration::from_millis(args.timeout_ms);
    let contract = marshrpc_cli::calculator_contract()?;

    let tcp_config = TcpConfig::default().with_connect_timeout(timeout);
    let transport = TcpTransport::connect_with_config(&args.server_address, tcp_config)
        .await
        .with_context(|| format!("Failed to connect to {}", args.server_address))?;

    let mut client = Client::with_config(transport, contract, ClientConfig::default().with_call_timeout(timeout));

    let result = marshrpc_cli::call_by_name(&mut client, &args.procedure, &args.args).await;
    // Best effort; the result is already in hand
    let _ = client.close().await;

    match result {
        Ok(value) => {
            println!("{}", value);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", marshrpc_cli::describe_error(&e));
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve_defaults() {
        let args: Cli = Cli::from_args(&["marshrpc"], &["serve"]).unwrap();
        match args.command {
            Commands::Serve(ServeArgs {
                bind,
                max_connections,
                max_frame_bytes,
            }) => {
                assert!(bind.is_none());
                assert!(max_connections.is_none());
                assert_eq!(max_frame_bytes, DEFAULT_MAX_FRAME_SIZE);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_serve_with_limits() {
        let args: Cli = Cli::from_args(
            &["marshrpc"],
            &["serve", "-b", "0.0.0.0:9001", "--max-connections", "8", "--max-frame-bytes", "4096"],
        )
        .unwrap();
        match args.command {
            Commands::Serve(ServeArgs {
                bind,
                max_connections,
                max_frame_bytes,
            }) => {
                assert_eq!(bind.as_deref(), Some("0.0.0.0:9001"));
                assert_eq!(max_connections, Some(8));
                assert_eq!(max_frame_bytes, 4096);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_call() {
        let args: Cli = Cli::from_args(&["marshrpc"], &["call", "127.0.0.1:7400", "add", "2", "3"]).unwrap();
        match args.command {
            Commands::Call(CallArgs {
                server_address,
                procedure,
                args,
                timeout_ms,
            }) => {
                assert_eq!(server_address, "127.0.0.1:7400");
                assert_eq!(procedure, "add");
                assert_eq!(args, vec!["2".to_string(), "3".to_string()]);
                assert_eq!(timeout_ms, 5000);
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_negative_argument() {
        let args: Cli =
            Cli::from_args(&["marshrpc"], &["call", "--timeout-ms", "250", "127.0.0.1:7400", "sub", "--", "-4", "3"])
                .unwrap();
        match args.command {
            Commands::Call(CallArgs { args, timeout_ms, .. }) => {
                assert_eq!(args, vec!["-4".to_string(), "3".to_string()]);
                assert_eq!(timeout_ms, 250);
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_call_requires_procedure() {
        assert!(Cli::from_args(&["marshrpc"], &["call", "127.0.0.1:7400"]).is_err());
    }
}
