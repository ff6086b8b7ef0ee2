mod admin;

pub use admin::admin_handler;

use crate::dispatch::{resolve_host, Dispatcher, SocketPeer};
use async_std::future;
use async_std::io;
use async_std::net::TcpStream;
use async_std::sync::Arc;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, FutureExt};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::time::Duration;

/// How long a new client gets to send its first bytes before it is routed as
/// the default host.
const PEEK_TIMEOUT: Duration = Duration::from_secs(2);

/// Handles one proxied client connection.
///
/// The host is taken from the `Host` header of the first bytes the client
/// sends, if they look like HTTP; anything else, including a client that stays
/// silent for [`PEEK_TIMEOUT`], is routed as the default host. Connections without a dispatchable upstream are closed.
///
/// # Arguments
/// * `socket` - The client socket.
/// * `dispatcher` - Selects and commits the upstream.
///
/// # Returns
/// An `anyhow::Result` indicating the success or failure of the operation.
pub async fn client_handler(socket: TcpStream, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let head = {
        let mut head = vec![0u8; 4096];
        let size = match future::timeout(PEEK_TIMEOUT, socket.peek(head.as_mut_slice())).await {
            Ok(size) => size?,
            Err(_) => {
                debug!("Client sent nothing within {PEEK_TIMEOUT:?}");
                0
            }
        };
        head.truncate(size);
        head
    };

    let host = resolve_host(host_header(&head));
    let mut peer = SocketPeer::default();
    let selected = match dispatcher.dispatch(Some(&host), &mut peer) {
        Ok(selected) => selected,
        Err(e) => {
            warn!("Dropping connection for host {host}: {e}");
            return Ok(());
        }
    };

    let Some(addr) = peer.addr else {
        return Ok(());
    };

    info!("Host {host} proxied to upstream {selected}");
    // peeked bytes are still unread, so the upstream sees the full request
    main_loop(socket, addr).await?;
    Ok(())
}

/// Extracts the `Host` header from the start of an HTTP/1 request.
fn host_header(head: &[u8]) -> Option<&str> {
    head.split(|b| *b == b'\n')
        .skip(1)
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .take_while(|line| !line.is_empty())
        .filter_map(|line| std::str::from_utf8(line).ok())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("host")
                .then(|| value.trim())
        })
}

/// Main loop for relaying data between the client and the upstream.
///
/// # Arguments
/// * `transport` - The client stream.
/// * `server_addr` - The upstream address.
///
/// # Returns
/// An `io::Result` indicating the success or failure of the operation.
async fn main_loop<T>(mut transport: T, server_addr: SocketAddr) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut server_stream = TcpStream::connect(server_addr).await?;
    let mut buf_client = [0u8; 4096];
    let mut buf_server = [0u8; 4096];

    loop {
        futures::select! {
            res = transport.read(&mut buf_client).fuse() => {
                let len = res?;
                if len == 0 {
                    debug!("Client closed connection to {server_addr}");
                    break;
                };
                server_stream.write_all(&buf_client[..len]).await?;
            },
            res = server_stream.read(&mut buf_server).fuse() => {
                let len = res?;
                if len == 0 {
                    debug!("Upstream {server_addr} closed connection");
                    transport.close().await?;
                    break;
                };
                transport.write_all(&buf_server[..len]).await?;
            },
        }
    }

    Ok(())
}
