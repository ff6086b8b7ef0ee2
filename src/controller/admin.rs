use crate::admin::{handle, AdminResponse};
use crate::registry::Registry;
use async_std::io::BufReader;
use async_std::net::TcpStream;
use futures::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use log::{debug, info, warn};

/// Longest request head accepted from an admin client.
const MAX_HEAD: usize = 8 * 1024;

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        431 => "Request Header Fields Too Large",
        _ => "Internal Server Error",
    }
}

/// Serves a single admin request on `socket` and closes it.
///
/// Only the request line is interpreted; headers are read and discarded,
/// bodies are ignored. No more than [`MAX_HEAD`] bytes are ever read; a head
/// that does not end within them is answered with `431`.
pub async fn admin_handler(socket: TcpStream, registry: Registry) -> anyhow::Result<()> {
    let peer = socket.peer_addr()?;
    let mut reader = BufReader::new(socket.clone().take(MAX_HEAD as u64));

    let mut raw_line = Vec::new();
    let mut consumed = reader.read_until(b'\n', &mut raw_line).await?;
    let request_line = String::from_utf8_lossy(&raw_line).into_owned();

    let mut terminated = false;
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        consumed += n;
        if n == 0 {
            break;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            terminated = true;
            break;
        }
    }

    if !terminated && consumed >= MAX_HEAD {
        warn!("{peer} sent no complete request head within {MAX_HEAD} bytes");
        return respond(socket, AdminResponse::error(431, "request head too large")).await;
    }

    let mut parts = request_line.split_whitespace();
    let response = match (parts.next(), parts.next()) {
        (Some(method), Some(path)) => {
            let response = handle(&registry, method, path);
            info!("{peer} {method} {path} -> {}", response.status);
            response
        }
        _ => {
            debug!("{peer} sent malformed request line {request_line:?}");
            AdminResponse::error(400, "malformed request line")
        }
    };

    respond(socket, response).await
}

async fn respond(mut socket: TcpStream, response: AdminResponse) -> anyhow::Result<()> {
    let body = response.to_json();
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason(response.status),
        body.len()
    );

    socket.write_all(head.as_bytes()).await?;
    socket.write_all(body.as_bytes()).await?;
    socket.close().await?;
    Ok(())
}
