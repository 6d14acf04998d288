//! Async TCP client for Redis-protocol nodes.
//!
//! Handles connecting, sending commands as RESP arrays of bulk strings,
//! and reading back parsed reply frames. One connection per client;
//! concurrent callers are serialized on it.

use crate::common::{Error, Result};
use crate::node::{Connector, Endpoint, NodeClient};
use crate::resp::{parse_frame, Frame, ProtocolError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// [`Connector`] for real servers
#[derive(Debug, Clone, Default)]
pub struct RespConnector;

impl RespConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for RespConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn NodeClient>> {
        let client = RespClient::connect(endpoint).await?;
        // a node is only ready once it answers
        client.ping().await?;
        Ok(Arc::new(client))
    }
}

/// A TCP connection with read/write buffering.
struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
    /// Set while a request awaits its reply. Still set at the start of the
    /// next request means the previous caller was cancelled mid-flight and
    /// the reply stream can no longer be matched to requests.
    in_flight: bool,
}

impl Connection {
    async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", endpoint, e)))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(1024),
            in_flight: false,
        })
    }

    async fn request(&mut self, frame: &Frame) -> Result<Frame> {
        if self.in_flight {
            return Err(Error::ConnectionFailed(
                "connection desynchronized by a cancelled request".into(),
            ));
        }
        self.in_flight = true;

        self.write_buf.clear();
        frame.serialize(&mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        let reply = self.read_reply().await?;
        self.in_flight = false;
        Ok(reply)
    }

    async fn read_reply(&mut self) -> Result<Frame> {
        loop {
            if let Some((frame, consumed)) = parse_frame(&self.read_buf)? {
                let _ = self.read_buf.split_to(consumed);
                return Ok(frame);
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionFailed("server closed the connection".into()));
            }
        }
    }
}

/// Client for one Redis-protocol node
pub struct RespClient {
    endpoint: Endpoint,
    conn: Mutex<Connection>,
}

impl RespClient {
    /// Open a TCP connection to `endpoint`
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let conn = Connection::connect(endpoint).await?;
        Ok(Self {
            endpoint: endpoint.clone(),
            conn: Mutex::new(conn),
        })
    }

    /// Send one command. Error replies become [`Error::Command`].
    async fn call(&self, frame: Frame) -> Result<Frame> {
        let reply = self.conn.lock().await.request(&frame).await?;
        match reply {
            Frame::Error(reason) => Err(Error::Command {
                node: self.endpoint.to_string(),
                reason,
            }),
            other => Ok(other),
        }
    }

    async fn call_ok(&self, frame: Frame) -> Result<()> {
        match self.call(frame).await? {
            Frame::Simple(s) if s.starts_with("OK") => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(frame: &Frame) -> Error {
    Error::Protocol(ProtocolError::UnexpectedReply(format!("{:?}", frame)))
}

#[async_trait]
impl NodeClient for RespClient {
    async fn ping(&self) -> Result<()> {
        match self.call(Frame::command(["PING"])).await? {
            Frame::Simple(s) if s == "PONG" => Ok(()),
            Frame::Bulk(b) if b.as_ref() == b"PONG" => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match self
            .call(Frame::command([Bytes::from_static(b"GET"), Bytes::copy_from_slice(key.as_bytes())]))
            .await?
        {
            Frame::Bulk(value) => Ok(Some(value)),
            Frame::Null => Ok(None),
            other => Err(unexpected(&other)),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let mut parts = vec![
            Bytes::from_static(b"SET"),
            Bytes::copy_from_slice(key.as_bytes()),
            value,
        ];
        if let Some(ttl) = ttl {
            parts.push(Bytes::from_static(b"PX"));
            parts.push(Bytes::from(ttl.as_millis().max(1).to_string()));
        }
        self.call_ok(Frame::command(parts)).await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        match self
            .call(Frame::command([Bytes::from_static(b"DEL"), Bytes::copy_from_slice(key.as_bytes())]))
            .await?
        {
            Frame::Integer(n) => Ok(n > 0),
            other => Err(unexpected(&other)),
        }
    }

    async fn replica_of(&self, upstream: Option<&Endpoint>) -> Result<()> {
        let command = match upstream {
            Some(ep) => Frame::command([
                "REPLICAOF".to_string(),
                ep.host.clone(),
                ep.port.to_string(),
            ]),
            None => Frame::command(["REPLICAOF", "NO", "ONE"]),
        };
        self.call_ok(command).await
    }
}
