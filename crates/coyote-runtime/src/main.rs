//! coyote: DG-LAB Coyote control daemon and its CLI client.
//! The daemon embeds the DG-LAB websocket server in-process; every other
//! subcommand is a one-shot JSON-RPC call over the daemon's Unix socket.

use clap::Parser;

mod cli;
mod client;
mod config;
mod daemon;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("COYOTE_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("coyote daemon starting");
            daemon::run_daemon(opts, &socket_path).await?;
        }
        command => client::cmd_request(&socket_path, &command).await?,
    }

    Ok(())
}
