//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.

use std::sync::Arc;

use coyote_core::RawPulse;
use coyote_session::{Controller, DeviceTransport};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct ConnectParams {
    endpoint: Option<String>,
    register_timeout: Option<f64>,
    bind_timeout: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChannelParams {
    channel: String,
}

#[derive(Debug, Deserialize)]
struct StrengthParams {
    channel: String,
    mode: String,
    value: i64,
}

#[derive(Debug, Deserialize)]
struct WaveformParams {
    channel: String,
    pulses: Vec<RawPulse>,
}

#[derive(Debug, Deserialize)]
struct PresetParams {
    channel: String,
    preset: String,
}

#[derive(Debug, PartialEq)]
pub(crate) struct RpcError {
    code: i64,
    message: String,
}

fn params<P: DeserializeOwned>(raw: &Value) -> Result<P, RpcError> {
    let raw = if raw.is_null() { json!({}) } else { raw.clone() };
    serde_json::from_value(raw).map_err(|e| RpcError {
        code: INVALID_PARAMS,
        message: format!("invalid params: {e}"),
    })
}

/// Run the UDS JSON-RPC server.
pub async fn run_server<T: DeviceTransport>(
    socket_path: &str,
    controller: Arc<Controller<T>>,
) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, controller).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection<T: DeviceTransport>(
    stream: tokio::net::UnixStream,
    controller: Arc<Controller<T>>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request: Value = serde_json::from_str(line.trim())?;
    let method = request["method"].as_str().unwrap_or("");
    let id = request["id"].clone();
    tracing::debug!(method, "rpc request");

    let response = match dispatch(&controller, method, &request["params"]).await {
        Ok(result) => json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": id,
        }),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "error": {"code": e.code, "message": e.message},
            "id": id,
        }),
    };
    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

/// Route one request to the controller.
///
/// Control failures are results with `ok: false`; only unknown methods and
/// malformed params are RPC errors.
pub(crate) async fn dispatch<T: DeviceTransport>(
    controller: &Controller<T>,
    method: &str,
    raw: &Value,
) -> Result<Value, RpcError> {
    let result = match method {
        "connect" => {
            let p: ConnectParams = params(raw)?;
            let reply = controller
                .connect(p.endpoint.as_deref(), p.register_timeout, p.bind_timeout)
                .await;
            json!(reply)
        }
        "set_strength" => {
            let p: StrengthParams = params(raw)?;
            json!(controller.set_strength(&p.channel, &p.mode, p.value).await)
        }
        "add_waveform" => {
            let p: WaveformParams = params(raw)?;
            json!(controller.add_waveform(&p.channel, &p.pulses).await)
        }
        "clear_waveform" => {
            let p: ChannelParams = params(raw)?;
            json!(controller.clear_waveform(&p.channel).await)
        }
        "play_preset" => {
            let p: PresetParams = params(raw)?;
            json!(controller.play_preset(&p.channel, &p.preset).await)
        }
        "disconnect" => json!(controller.disconnect().await),
        "status" => json!(controller.status().await),
        "list_presets" => json!(controller.list_presets()),
        _ => {
            return Err(RpcError {
                code: METHOD_NOT_FOUND,
                message: "method not found".to_string(),
            });
        }
    };
    Ok(result)
}
