//! RPC client with request/response correlation.

use crate::channel::{bounded, Channel, RecvTimeoutError};
use crate::net::TcpStream;
use crate::rpc::frame::{read_frame, write_frame, FrameDecoder};
use crate::rpc::{Request, Response, RpcError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct ClientInner {
    stream: TcpStream,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Channel<Response>>>,
    /// Serializes whole-frame writes from concurrent callers.
    write_lock: crate::sync::Mutex<()>,
}

/// A connection-oriented RPC client.
///
/// Cheap to clone; clones multiplex calls over the same connection. A
/// background reader task routes responses to pending calls by id.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Connects to an RPC server.
    pub async fn connect(addr: SocketAddr, timeout: Option<Duration>) -> io::Result<Self> {
        let stream = TcpStream::connect(addr, timeout).await?;
        let inner = Arc::new(ClientInner {
            stream,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            write_lock: crate::sync::Mutex::new(()),
        });

        let reader = Arc::clone(&inner);
        crate::runtime::spawn(async move {
            read_loop(&reader).await;
        });

        Ok(Self { inner })
    }

    /// Calls `method` with opaque `params`, waiting for the matching
    /// response. The timeout, when given, covers the whole call.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, RpcError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let reply = bounded::<Response>(1);
        self.inner.pending.lock().insert(id, reply.clone());

        let payload = Request::new(id, method, params).to_bytes()?;
        let written = {
            let _write = self.inner.write_lock.lock().await;
            write_frame(&self.inner.stream, &payload, timeout).await
        };
        if let Err(e) = written {
            self.inner.pending.lock().remove(&id);
            return Err(e.into());
        }

        let response = match timeout {
            Some(duration) => match reply.recv_timeout(duration).await {
                Ok(response) => response,
                Err(RecvTimeoutError::Timeout) => {
                    self.inner.pending.lock().remove(&id);
                    return Err(RpcError::Timeout);
                }
                Err(RecvTimeoutError::Closed) => return Err(RpcError::ConnectionClosed),
            },
            None => reply
                .recv()
                .await
                .map_err(|_| RpcError::ConnectionClosed)?,
        };

        if response.ok {
            Ok(response.result)
        } else {
            Err(RpcError::Remote(response.error.unwrap_or_default()))
        }
    }

    /// Number of calls awaiting a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Closes the connection; pending calls fail with
    /// [`RpcError::ConnectionClosed`].
    pub fn close(&self) {
        self.inner.stream.close();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("pending", &self.pending_calls())
            .finish_non_exhaustive()
    }
}

async fn read_loop(inner: &Arc<ClientInner>) {
    let mut decoder = FrameDecoder::new();
    loop {
        let frame = match read_frame(&inner.stream, &mut decoder, None).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "rpc client connection lost");
                break;
            }
        };
        match Response::from_bytes(&frame) {
            Ok(response) => {
                let reply = inner.pending.lock().remove(&response.id);
                match reply {
                    Some(reply) => {
                        let _ = reply.try_send(response);
                    }
                    None => {
                        // Late response to a call that already timed out.
                        tracing::trace!(id = response.id, "dropping unmatched rpc response");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed rpc response frame");
                break;
            }
        }
    }

    // Fail whatever is still pending.
    let drained: Vec<Channel<Response>> = {
        let mut pending = inner.pending.lock();
        pending.drain().map(|(_, reply)| reply).collect()
    };
    for reply in drained {
        reply.close();
    }
}
