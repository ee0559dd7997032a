//! UDS JSON-RPC client for CLI subcommands.

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::cli::Command;

pub(crate) async fn rpc_call(
    socket_path: &str,
    method: &str,
    params: Value,
) -> anyhow::Result<Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// Method name and params for a client subcommand. `None` for `daemon`.
pub(crate) fn request_for(command: &Command) -> anyhow::Result<Option<(&'static str, Value)>> {
    let request = match command {
        Command::Daemon(_) => return Ok(None),
        Command::Connect(opts) => (
            "connect",
            json!({ "endpoint": opts.endpoint, "bind_timeout": opts.bind_timeout }),
        ),
        Command::Strength(opts) => (
            "set_strength",
            json!({ "channel": opts.channel, "mode": opts.mode, "value": opts.value }),
        ),
        Command::Waveform(opts) => {
            let pulses: Value = serde_json::from_str(&opts.pulses)
                .map_err(|e| anyhow::anyhow!("pulses must be a JSON array: {e}"))?;
            ("add_waveform", json!({ "channel": opts.channel, "pulses": pulses }))
        }
        Command::Clear(opts) => ("clear_waveform", json!({ "channel": opts.channel })),
        Command::Preset(opts) => (
            "play_preset",
            json!({ "channel": opts.channel, "preset": opts.name }),
        ),
        Command::Disconnect => ("disconnect", Value::Null),
        Command::Status => ("status", Value::Null),
        Command::Presets => ("list_presets", Value::Null),
    };
    Ok(Some(request))
}

/// Human-readable rendering of a reply. Control replies with `ok: false`
/// become errors so the process exits non-zero.
pub(crate) fn render(method: &str, result: &Value) -> anyhow::Result<String> {
    match method {
        "status" => Ok(serde_json::to_string_pretty(result)?),
        "list_presets" => Ok(result
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()),
        _ => {
            let message = result["message"].as_str().unwrap_or_default().to_string();
            if result["ok"].as_bool() == Some(true) {
                Ok(message)
            } else {
                anyhow::bail!(message)
            }
        }
    }
}

pub async fn cmd_request(socket_path: &str, command: &Command) -> anyhow::Result<()> {
    let Some((method, params)) = request_for(command)? else {
        return Ok(());
    };
    let result = rpc_call(socket_path, method, params).await?;
    println!("{}", render(method, &result)?);
    Ok(())
}
