//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "coyote", about = "DG-LAB Coyote control daemon", version)]
pub struct Cli {
    /// UDS socket path (default: /tmp/coyote-$USER/coyoted.sock)
    #[arg(long, short = 's', global = true, env = "COYOTE_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (DG-LAB session manager + UDS server)
    Daemon(DaemonOpts),
    /// Start the session and print the QR code for the app
    Connect(ConnectOpts),
    /// Set, increase or decrease a channel's strength
    Strength(StrengthOpts),
    /// Append pulse operations (JSON array) to a channel's queue
    Waveform(WaveformOpts),
    /// Stop the channel's loop and empty its queue
    Clear(ChannelOpts),
    /// Loop a named preset on a channel
    Preset(PresetOpts),
    /// Zero both channels and close the session
    Disconnect,
    /// Show session status (JSON)
    Status,
    /// List available presets
    Presets,
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Config file
    #[arg(long, short = 'c', env = "COYOTE_CONFIG", default_value = crate::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Override connection.server_uri
    #[arg(long, env = "COYOTE_SERVER_URI")]
    pub server_uri: Option<String>,

    /// Override connection.pulse_dir
    #[arg(long)]
    pub pulse_dir: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct ConnectOpts {
    /// Endpoint to serve instead of the configured one (ws://host:port)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Seconds to wait for the app to bind (0 = return immediately)
    #[arg(long)]
    pub bind_timeout: Option<f64>,
}

#[derive(clap::Args)]
pub struct ChannelOpts {
    /// A or B
    pub channel: String,
}

#[derive(clap::Args)]
pub struct StrengthOpts {
    /// A or B
    pub channel: String,
    /// set, increase or decrease
    pub mode: String,
    pub value: i64,
}

#[derive(clap::Args)]
pub struct WaveformOpts {
    /// A or B
    pub channel: String,
    /// e.g. '[{"frequency":[10,10,10,10],"strength":[0,20,40,60]}]'
    pub pulses: String,
}

#[derive(clap::Args)]
pub struct PresetOpts {
    /// A or B
    pub channel: String,
    pub name: String,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/coyote/coyoted.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/coyote-{user}/coyoted.sock")
}
