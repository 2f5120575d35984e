use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::LogClientError;
use crate::wire::{Request, Response};

/// A single length-prefixed JSON request/response connection to one
/// cluster endpoint. Framing is a 4-byte big-endian length prefix
/// followed by the JSON body, capped at `max_message_size` in both
/// directions (`§4.3`).
pub struct Connection {
    stream: TcpStream,
    max_message_size: usize,
}

impl Connection {
    pub async fn connect(addr: &str, max_message_size: usize) -> Result<Self, LogClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream, max_message_size })
    }

    pub async fn roundtrip(&mut self, req: &Request) -> Result<Response, LogClientError> {
        self.send(req).await?;
        self.recv().await
    }

    async fn send(&mut self, req: &Request) -> Result<(), LogClientError> {
        let body = serde_json::to_vec(req).map_err(|e| LogClientError::Codec(e.to_string()))?;
        if body.len() > self.max_message_size {
            return Err(LogClientError::Codec(format!(
                "request of {} bytes exceeds max_message_size {}",
                body.len(),
                self.max_message_size
            )));
        }
        self.stream.write_u32(body.len() as u32).await?;
        self.stream.write_all(&body).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Response, LogClientError> {
        let len = self.stream.read_u32().await? as usize;
        if len > self.max_message_size {
            return Err(LogClientError::Codec(format!(
                "response of {len} bytes exceeds max_message_size {}",
                self.max_message_size
            )));
        }
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;
        serde_json::from_slice(&body).map_err(|e| LogClientError::Codec(e.to_string()))
    }
}
