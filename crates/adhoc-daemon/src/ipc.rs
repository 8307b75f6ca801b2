//! The local control endpoint: a Unix domain socket accepting one newline-terminated command per
//! line and replying with a newline-terminated response on the same connection. Exists so `status`
//! and `stop` can reach a running daemon without sharing its address space; `shutdown` is the one
//! command that reaches past the connection and cancels every worker via the shared token.

use crate::handler::Engine;
use log::{
    debug,
    error,
    warn,
};
use std::sync::Arc;
use tokio::{
    io::{
        AsyncBufReadExt,
        AsyncWriteExt,
        BufReader,
    },
    net::{
        UnixListener,
        UnixStream,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Binds `socket_path`, removing a stale socket file left behind by an unclean shutdown, and
/// spawns the accept loop. One task per connection; the connection task exits once its peer
/// closes the stream or a line fails to parse into a known command.
pub fn spawn_ipc_listener(engine: Arc<Engine>, socket_path: String, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if std::fs::metadata(&socket_path).is_ok() {
            if let Err(error) = std::fs::remove_file(&socket_path) {
                warn!("could not remove stale IPC socket {socket_path}: {error}");
            }
        }

        let listener = match UnixListener::bind(&socket_path) {
            Ok(listener) => listener,
            Err(error) => {
                error!("failed to bind IPC socket {socket_path}: {error}");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let engine = engine.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(error) = serve_connection(&engine, stream, &cancel).await {
                                debug!("IPC connection ended: {error}");
                            }
                        });
                    }
                    Err(error) => {
                        error!("IPC accept failed: {error}");
                        return;
                    }
                },
            }
        }
    })
}

async fn serve_connection(engine: &Engine, stream: UnixStream, cancel: &CancellationToken) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let response = dispatch(engine, cancel, line.trim()).await;
        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

async fn dispatch(engine: &Engine, cancel: &CancellationToken, line: &str) -> String {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("routes") => format_routes(engine).await,
        Some("neighbors") => format_neighbors(engine).await,
        Some("inject") => match (parts.next(), parts.next()) {
            (Some(dst_ip), Some(hex)) => inject(engine, dst_ip, hex).await,
            _ => "ERR usage: inject <dst-ip> <hex-bytes>".to_owned(),
        },
        Some("shutdown") => {
            cancel.cancel();
            "OK shutting down".to_owned()
        }
        Some(other) => format!("ERR unknown command {other:?}"),
        None => "ERR empty command".to_owned(),
    }
}

/// Responses are a single line, since the wire framing is newline-delimited: records within a
/// response are separated with "; " rather than embedded newlines.
async fn format_routes(engine: &Engine) -> String {
    let snapshot = engine.routes_snapshot().await;
    if snapshot.is_empty() {
        return "OK 0 routes".to_owned();
    }
    let mut entries = Vec::new();
    for (dst, actions) in snapshot {
        for (mac, value) in actions {
            entries.push(format!("{dst} via {mac} = {value:.3}"));
        }
    }
    entries.join("; ")
}

async fn format_neighbors(engine: &Engine) -> String {
    let neighbors = engine.neighbor_list().await;
    if neighbors.is_empty() {
        return "OK 0 neighbors".to_owned();
    }
    neighbors
        .into_iter()
        .map(|n| match (n.ipv4, n.ipv6) {
            (Some(v4), _) => format!("{} ({v4})", n.mac),
            (None, Some(v6)) => format!("{} ({v6})", n.mac),
            (None, None) => format!("{}", n.mac),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

async fn inject(engine: &Engine, dst_ip: &str, hex: &str) -> String {
    if dst_ip.parse::<std::net::IpAddr>().is_err() {
        return format!("ERR invalid destination address {dst_ip:?}");
    }
    let Some(packet) = decode_hex(hex) else {
        return "ERR payload must be an even-length hex string".to_owned();
    };
    engine.handle_tunnel_packet(packet).await;
    "OK injected".to_owned()
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}
