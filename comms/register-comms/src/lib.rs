//! Write holding registers on a remote controller using Modbus TCP.
//!
//! [codec] contains the framing as [tokio_util::codec] encoders and decoders.
//! [ModbusTcpClient] drives the client codec over a blocking [TcpStream], so
//! it can be owned by an ordinary acquisition thread.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};

pub mod codec;
pub use codec::{ClientCodec, MAX_WRITE_REGISTERS, Response, ServerCodec, WriteRegisters};

/// The registered Modbus TCP port.
pub const DEFAULT_PORT: u16 = 502;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("could not resolve address {0}")]
    Resolve(String),
    #[error("Modbus exception code {code} for function 0x{function:02x}")]
    Exception { function: u8, code: u8 },
    #[error("Modbus protocol error: {0}")]
    Protocol(String),
    #[error("cannot write {0} registers in one request")]
    TooManyRegisters(usize),
    #[error("a write request needs at least one register")]
    NoRegisters,
    #[error("connection closed by peer")]
    ConnectionClosed,
}

/// A blocking Modbus TCP client for Write Multiple Registers.
///
/// If a write fails with an I/O error, the connection is dropped and the next
/// write reconnects once before sending.
pub struct ModbusTcpClient {
    addr: SocketAddr,
    unit_id: u8,
    timeout: Duration,
    stream: Option<TcpStream>,
    codec: ClientCodec,
    next_transaction_id: u16,
    read_buf: BytesMut,
}

fn open_stream(addr: &SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let stream = TcpStream::connect_timeout(addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

impl ModbusTcpClient {
    /// Connect to `host:port`. `timeout` bounds the connect and each read and
    /// write.
    pub fn connect(host: &str, port: u16, unit_id: u8, timeout: Duration) -> Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Resolve(format!("{host}:{port}")))?;
        let stream = open_stream(&addr, timeout)?;
        info!("connected to Modbus server at {addr}, unit {unit_id}");
        Ok(Self {
            addr,
            unit_id,
            timeout,
            stream: Some(stream),
            codec: ClientCodec::default(),
            next_transaction_id: 0,
            read_buf: BytesMut::with_capacity(64),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Write `values` to consecutive holding registers from `start_address`.
    pub fn write_registers(&mut self, start_address: u16, values: &[u16]) -> Result<()> {
        if self.stream.is_none() {
            debug!("reconnecting to {}", self.addr);
            self.stream = Some(open_stream(&self.addr, self.timeout)?);
            self.read_buf.clear();
        }
        let result = self.transact(start_address, values);
        if let Err(Error::Io(_) | Error::ConnectionClosed | Error::Protocol(_)) = &result {
            warn!("dropping Modbus connection to {}", self.addr);
            self.stream = None;
        }
        result
    }

    fn transact(&mut self, start_address: u16, values: &[u16]) -> Result<()> {
        let transaction_id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);

        let mut send_buf = BytesMut::new();
        self.codec.encode(
            WriteRegisters {
                transaction_id,
                unit_id: self.unit_id,
                start_address,
                values: values.to_vec(),
            },
            &mut send_buf,
        )?;

        let stream = self.stream.as_mut().ok_or(Error::ConnectionClosed)?;
        stream.write_all(&send_buf)?;

        let response = loop {
            if let Some(response) = self.codec.decode(&mut self.read_buf)? {
                break response;
            }
            let mut chunk = [0u8; 64];
            let n_bytes = stream.read(&mut chunk)?;
            if n_bytes == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.read_buf.extend_from_slice(&chunk[..n_bytes]);
        };

        if response.transaction_id() != transaction_id {
            return Err(Error::Protocol(format!(
                "expected transaction {transaction_id}, got {}",
                response.transaction_id()
            )));
        }
        match response {
            Response::Written {
                start_address: echoed_address,
                quantity,
                ..
            } => {
                if echoed_address != start_address || quantity as usize != values.len() {
                    return Err(Error::Protocol(format!(
                        "response echoed {quantity} registers at {echoed_address}"
                    )));
                }
                Ok(())
            }
            Response::Exception { function, code, .. } => Err(Error::Exception { function, code }),
        }
    }
}
