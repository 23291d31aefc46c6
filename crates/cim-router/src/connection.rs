//! One live connection per endpoint.
//!
//! Tool bridges are reached over their Unix socket, everything else
//! over TCP `host:port`. The wire protocol is bare delimiter framing:
//! write body + delimiter, read bytes until the delimiter appears.
//! Bytes read past a frame boundary stay in the residual buffer for the
//! next read.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

use cim_core::{CiName, CommsError, CommsResult, Delimiter, Endpoint};

/// Transport behind a connection.
enum Wire {
    Unix(UnixStream),
    Tcp(TcpStream),
}

/// A framed connection to one endpoint.
///
/// Exchanges are strictly request-response; the caller (the router's
/// per-target mutex) guarantees no interleaving. A timed-out exchange
/// leaves the connection open and its eventual response is drained and
/// discarded by the next exchange.
pub struct Connection {
    name: CiName,
    wire: Wire,
    delimiter: Delimiter,
    residual: Vec<u8>,
    orphaned: usize,
}

impl Connection {
    /// Opens a connection to the endpoint, bounded by `connect_timeout`.
    ///
    /// # Errors
    ///
    /// `ConnectionRefused` when the socket is missing, the peer is dead
    /// or the connect does not complete within the bound.
    pub async fn open(endpoint: &Endpoint, connect_timeout: Duration) -> CommsResult<Self> {
        let name = endpoint.name.clone();
        let refused = |reason: String| CommsError::ConnectionRefused {
            name: name.clone(),
            reason,
        };

        let wire = match &endpoint.socket_path {
            Some(path) => {
                let stream = timeout(connect_timeout, UnixStream::connect(path))
                    .await
                    .map_err(|_| refused("connect timed out".to_string()))?
                    .map_err(|e| refused(e.to_string()))?;
                Wire::Unix(stream)
            }
            None => {
                let addr = format!("{}:{}", endpoint.host, endpoint.port);
                let stream = timeout(connect_timeout, TcpStream::connect(&addr))
                    .await
                    .map_err(|_| refused("connect timed out".to_string()))?
                    .map_err(|e| refused(e.to_string()))?;
                Wire::Tcp(stream)
            }
        };

        debug!(name = %endpoint.name, "Connection opened");
        Ok(Self {
            name: endpoint.name.clone(),
            wire,
            delimiter: endpoint.delimiter.clone(),
            residual: Vec::new(),
            orphaned: 0,
        })
    }

    /// Responses abandoned by timed-out exchanges, not yet drained.
    pub fn orphaned(&self) -> usize {
        self.orphaned
    }

    /// Writes one request frame and awaits its response frame.
    ///
    /// The `window` covers the whole exchange: the request write (a
    /// peer that stops reading cannot block a send forever), draining
    /// orphaned responses from earlier timed-out exchanges, and the
    /// response read. On timeout the connection stays usable; only
    /// this caller gives up, and the response it abandoned becomes the
    /// next exchange's orphan.
    ///
    /// Orphan accounting assumes the peer answers every request it has
    /// received. A peer that silently drops a request leaves the
    /// counter overstated and later exchanges discard one real
    /// response per dropped request; the bare framed wire carries no
    /// correlation, so resetting the counter instead would risk
    /// delivering a stale response to the wrong caller.
    pub async fn exchange(&mut self, body: &str, window: Duration) -> CommsResult<String> {
        let deadline = Instant::now() + window;
        match timeout_at(deadline, self.write_frame(body)).await {
            Ok(written) => written?,
            // Nothing may have reached the peer; no orphan to record
            Err(_) => {
                return Err(CommsError::Timeout {
                    name: self.name.clone(),
                    elapsed: window,
                })
            }
        }

        loop {
            let frame = match timeout_at(deadline, self.read_frame()).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    self.orphaned += 1;
                    return Err(CommsError::Timeout {
                        name: self.name.clone(),
                        elapsed: window,
                    });
                }
            };

            if self.orphaned > 0 {
                self.orphaned -= 1;
                debug!(name = %self.name, "Discarded orphaned response");
                continue;
            }
            return Ok(String::from_utf8_lossy(&frame).into_owned());
        }
    }

    /// Writes body + delimiter.
    async fn write_frame(&mut self, body: &str) -> CommsResult<()> {
        let refused = |name: &CiName, e: std::io::Error| CommsError::ConnectionRefused {
            name: name.clone(),
            reason: e.to_string(),
        };

        let delimiter = self.delimiter.as_bytes().to_vec();
        match &mut self.wire {
            Wire::Unix(stream) => {
                stream
                    .write_all(body.as_bytes())
                    .await
                    .map_err(|e| refused(&self.name, e))?;
                stream
                    .write_all(&delimiter)
                    .await
                    .map_err(|e| refused(&self.name, e))?;
                stream.flush().await.map_err(|e| refused(&self.name, e))?;
            }
            Wire::Tcp(stream) => {
                stream
                    .write_all(body.as_bytes())
                    .await
                    .map_err(|e| refused(&self.name, e))?;
                stream
                    .write_all(&delimiter)
                    .await
                    .map_err(|e| refused(&self.name, e))?;
                stream.flush().await.map_err(|e| refused(&self.name, e))?;
            }
        }
        Ok(())
    }

    /// Reads until the delimiter, returning the frame without it.
    async fn read_frame(&mut self) -> CommsResult<Vec<u8>> {
        let mut buf = vec![0u8; 8192];
        loop {
            if let Some(pos) = self.delimiter.find(&self.residual) {
                let mut frame: Vec<u8> = self.residual.drain(..pos + self.delimiter.len()).collect();
                frame.truncate(pos);
                return Ok(frame);
            }

            let read = match &mut self.wire {
                Wire::Unix(stream) => stream.read(&mut buf).await,
                Wire::Tcp(stream) => stream.read(&mut buf).await,
            };
            match read {
                Ok(0) => {
                    return Err(CommsError::ConnectionRefused {
                        name: self.name.clone(),
                        reason: "connection closed by peer".to_string(),
                    })
                }
                Ok(n) => self.residual.extend_from_slice(&buf[..n]),
                Err(e) => {
                    return Err(CommsError::ConnectionRefused {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}
