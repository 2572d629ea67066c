//! RPC server with a method registry.

use crate::net::{TcpListener, TcpStream};
use crate::rpc::frame::{read_frame, write_frame, FrameDecoder};
use crate::rpc::{Request, Response};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

/// A registered method handler. Runs on the connection's task; keep it
/// short or hand the work to a spawned task.
pub type Handler = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync>;

/// Dispatches framed requests to registered handlers.
#[derive(Default)]
pub struct RpcServer {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl RpcServer {
    /// Creates a server with an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a handler under a method name, replacing any previous
    /// registration.
    pub fn register<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .insert(method.into(), Arc::new(handler));
    }

    /// Accept loop: serves each connection on its own task. Returns when
    /// the listener fails (closing the listener is the way to stop).
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(peer = %peer, "rpc connection accepted");
            let server = Arc::clone(&self);
            crate::runtime::spawn(async move {
                server.serve_connection(stream).await;
            });
        }
    }

    async fn serve_connection(&self, stream: TcpStream) {
        let mut decoder = FrameDecoder::new();
        loop {
            let frame = match read_frame(&stream, &mut decoder, None).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "rpc connection lost");
                    break;
                }
            };

            let response = match Request::from_bytes(&frame) {
                Ok(request) => self.dispatch(&request),
                Err(e) => {
                    tracing::warn!(error = %e, "malformed rpc request frame");
                    break;
                }
            };

            let Ok(payload) = response.to_bytes() else {
                break;
            };
            if write_frame(&stream, &payload, None).await.is_err() {
                break;
            }
        }
    }

    fn dispatch(&self, request: &Request) -> Response {
        let handler = self.handlers.read().get(&request.method).cloned();
        match handler {
            Some(handler) => match handler(&request.params) {
                Ok(result) => Response::success(request.id, result),
                Err(error) => Response::failure(request.id, error),
            },
            None => Response::failure(request.id, format!("unknown method: {}", request.method)),
        }
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("methods", &self.handlers.read().len())
            .finish_non_exhaustive()
    }
}
