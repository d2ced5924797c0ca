//! Modbus/TCP transport for GivEnergy inverters
//!
//! This module owns the TCP connection to the data adapter, frames requests
//! and responses with [`framer::FrameCodec`], answers heartbeats, and exposes
//! the single-exchange [`Transport::send`] operation. Retry policy lives in
//! the request planner, never here.

pub mod framer;
pub mod pdu;

use crate::config::DeviceConfig;
use crate::error::TransportError;
use crate::logging::get_logger;
use bytes::BytesMut;
use framer::{Frame, FrameCodec};
use pdu::{Message, Request, Response, Serial};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::codec::{Decoder, Encoder};

pub use pdu::RegisterType;

/// One request in, one validated response out
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Optional connection status. Default: unknown (None).
    fn connection_status(&self) -> Option<bool> {
        None
    }

    async fn send(&mut self, request: &Request) -> Result<Response, TransportError>;
}

/// TCP client speaking the transparent protocol to the data adapter
pub struct GivEnergyClient {
    /// Live connection, if any
    stream: Option<TcpStream>,

    /// Bytes read but not yet framed
    buffer: BytesMut,

    codec: FrameCodec,

    /// Configuration
    config: DeviceConfig,

    adapter_serial: Serial,

    /// Connection timeout
    connection_timeout: Duration,

    /// Time allowed for one request/response exchange
    request_timeout: Duration,

    /// Logger
    logger: crate::logging::StructuredLogger,
}

impl GivEnergyClient {
    /// Create a new client; no connection is made until the first request
    pub fn new(config: &DeviceConfig) -> Self {
        let logger = get_logger("transport");
        let adapter_serial = config.adapter_serial.parse().unwrap_or_else(|e| {
            logger.warn(&format!(
                "Invalid adapter serial '{}' ({}), using default",
                config.adapter_serial, e
            ));
            Serial::default()
        });
        Self {
            stream: None,
            buffer: BytesMut::with_capacity(4096),
            codec: FrameCodec::new(),
            config: config.clone(),
            adapter_serial,
            connection_timeout: Duration::from_millis(config.connect_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            logger,
        }
    }

    /// Connect to the data adapter
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let address = format!("{}:{}", self.config.host, self.config.port);
        self.logger
            .info(&format!("Connecting to inverter at {}", address));

        match timeout(self.connection_timeout, TcpStream::connect(address.as_str())).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                self.stream = Some(stream);
                self.buffer.clear();
                self.logger.info("Successfully connected to inverter");
                Ok(())
            }
            Ok(Err(e)) => {
                let error_msg = format!("Failed to connect to {}: {}", address, e);
                self.logger.error(&error_msg);
                Err(TransportError::unreachable(error_msg))
            }
            Err(_) => {
                let error_msg = format!("Connection to {} timed out", address);
                self.logger.error(&error_msg);
                Err(TransportError::unreachable(error_msg))
            }
        }
    }

    /// Drop the connection; the next request reconnects
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            self.logger.info("Disconnecting from inverter");
        }
        self.buffer.clear();
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let mut out = BytesMut::new();
        self.codec.encode(frame, &mut out)?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::unreachable("Not connected to inverter"))?;
        stream.write_all(&out).await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(frame);
            }
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| TransportError::unreachable("Not connected to inverter"))?;
            let n = stream.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(TransportError::unreachable("Connection closed by peer"));
            }
        }
    }

    /// Send `request` and wait for its matching response, answering
    /// heartbeats and skipping unrelated frames meanwhile
    async fn exchange(&mut self, request: &Request) -> Result<Response, TransportError> {
        self.write_frame(request.to_frame(&self.adapter_serial))
            .await?;

        loop {
            let frame = self.read_frame().await?;
            match Message::decode(&frame)? {
                Message::Heartbeat(heartbeat) => {
                    self.logger.debug(&format!(
                        "Heartbeat from adapter {} (type {})",
                        heartbeat.adapter_serial, heartbeat.adapter_type
                    ));
                    self.write_frame(heartbeat.to_frame()).await?;
                }
                Message::Transparent(Response::Null) => {
                    self.logger.trace("Ignoring null response");
                }
                Message::Transparent(response) if request.matches(&response) => {
                    return Ok(response);
                }
                Message::Transparent(other) => {
                    self.logger
                        .debug(&format!("Discarding unsolicited response {:?}", other));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for GivEnergyClient {
    fn connection_status(&self) -> Option<bool> {
        Some(self.is_connected())
    }

    async fn send(&mut self, request: &Request) -> Result<Response, TransportError> {
        if !self.is_connected() {
            self.connect().await?;
        }

        self.logger.debug(&format!("Sending {}", request));
        let deadline = Instant::now() + self.request_timeout;
        match timeout_at(deadline, self.exchange(request)).await {
            Ok(Ok(response)) => {
                self.logger.trace(&format!("Received {:?}", response));
                Ok(response)
            }
            Ok(Err(e)) => {
                self.logger.warn(&format!("{} failed: {}", request, e));
                if !e.is_corrupt() {
                    self.disconnect();
                }
                Err(e)
            }
            Err(_) => {
                let error_msg = format!(
                    "{} timed out after {} ms",
                    request,
                    self.request_timeout.as_millis()
                );
                self.logger.warn(&error_msg);
                self.disconnect();
                Err(TransportError::unreachable(error_msg))
            }
        }
    }
}
