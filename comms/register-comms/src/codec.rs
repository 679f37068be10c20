//! Modbus TCP framing for function 0x10, Write Multiple Registers.
//!
//! Each frame starts with the 7 byte MBAP header (transaction id, protocol id,
//! length, unit id) followed by the PDU. All fields are big-endian. The length
//! field counts the unit id and the PDU.

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Error, Result};

/// Function code for Write Multiple Registers.
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
/// Largest register count allowed in one Write Multiple Registers request.
pub const MAX_WRITE_REGISTERS: usize = 123;

const MBAP_LEN: usize = 7;
const EXCEPTION_FLAG: u8 = 0x80;

/// A Write Multiple Registers request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRegisters {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub start_address: u16,
    pub values: Vec<u16>,
}

/// A reply to [WriteRegisters].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Normal reply echoing the start address and register count.
    Written {
        transaction_id: u16,
        unit_id: u8,
        start_address: u16,
        quantity: u16,
    },
    /// The server refused the request.
    Exception {
        transaction_id: u16,
        unit_id: u8,
        function: u8,
        code: u8,
    },
}

impl Response {
    pub fn transaction_id(&self) -> u16 {
        match self {
            Response::Written { transaction_id, .. } => *transaction_id,
            Response::Exception { transaction_id, .. } => *transaction_id,
        }
    }
}

struct Mbap {
    transaction_id: u16,
    unit_id: u8,
    /// Number of PDU bytes following the header.
    pdu_len: usize,
}

/// Parse the MBAP header if a whole frame is buffered.
fn peek_frame(buf: &BytesMut) -> Result<Option<Mbap>> {
    if buf.len() < MBAP_LEN {
        return Ok(None);
    }
    let protocol_id = BigEndian::read_u16(&buf[2..4]);
    if protocol_id != 0 {
        return Err(Error::Protocol(format!(
            "unexpected protocol id {protocol_id}"
        )));
    }
    let length = BigEndian::read_u16(&buf[4..6]) as usize;
    if length < 2 {
        return Err(Error::Protocol(format!("frame length {length} too short")));
    }
    if buf.len() < 6 + length {
        return Ok(None);
    }
    Ok(Some(Mbap {
        transaction_id: BigEndian::read_u16(&buf[0..2]),
        unit_id: buf[6],
        pdu_len: length - 1,
    }))
}

fn put_mbap(dst: &mut BytesMut, transaction_id: u16, unit_id: u8, pdu_len: usize) {
    dst.put_u16(transaction_id);
    dst.put_u16(0);
    dst.put_u16((pdu_len + 1) as u16);
    dst.put_u8(unit_id);
}

/// Client side: encodes requests, decodes responses.
#[derive(Debug, Default)]
pub struct ClientCodec {}

impl Encoder<WriteRegisters> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, msg: WriteRegisters, dst: &mut BytesMut) -> Result<()> {
        let n = msg.values.len();
        if n == 0 {
            return Err(Error::NoRegisters);
        }
        if n > MAX_WRITE_REGISTERS {
            return Err(Error::TooManyRegisters(n));
        }
        let pdu_len = 6 + 2 * n;
        dst.reserve(MBAP_LEN + pdu_len);
        put_mbap(dst, msg.transaction_id, msg.unit_id, pdu_len);
        dst.put_u8(WRITE_MULTIPLE_REGISTERS);
        dst.put_u16(msg.start_address);
        dst.put_u16(n as u16);
        dst.put_u8((2 * n) as u8);
        for v in msg.values {
            dst.put_u16(v);
        }
        Ok(())
    }
}

impl Decoder for ClientCodec {
    type Item = Response;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Response>> {
        let Some(mbap) = peek_frame(buf)? else {
            return Ok(None);
        };
        let frame = buf.split_to(MBAP_LEN + mbap.pdu_len);
        let pdu = &frame[MBAP_LEN..];
        let function = pdu[0];
        if function & EXCEPTION_FLAG != 0 {
            if pdu.len() < 2 {
                return Err(Error::Protocol("truncated exception response".into()));
            }
            return Ok(Some(Response::Exception {
                transaction_id: mbap.transaction_id,
                unit_id: mbap.unit_id,
                function: function & !EXCEPTION_FLAG,
                code: pdu[1],
            }));
        }
        if function != WRITE_MULTIPLE_REGISTERS {
            return Err(Error::Protocol(format!(
                "unexpected function code 0x{function:02x}"
            )));
        }
        if pdu.len() < 5 {
            return Err(Error::Protocol("truncated write response".into()));
        }
        Ok(Some(Response::Written {
            transaction_id: mbap.transaction_id,
            unit_id: mbap.unit_id,
            start_address: BigEndian::read_u16(&pdu[1..3]),
            quantity: BigEndian::read_u16(&pdu[3..5]),
        }))
    }
}

/// Server side: decodes requests, encodes responses.
///
/// Used to stand in for the remote controller in tests and tools.
#[derive(Debug, Default)]
pub struct ServerCodec {}

impl Decoder for ServerCodec {
    type Item = WriteRegisters;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<WriteRegisters>> {
        let Some(mbap) = peek_frame(buf)? else {
            return Ok(None);
        };
        let mut frame = buf.split_to(MBAP_LEN + mbap.pdu_len);
        frame.advance(MBAP_LEN);
        if frame.remaining() < 6 {
            return Err(Error::Protocol("truncated request".into()));
        }
        let function = frame.get_u8();
        if function != WRITE_MULTIPLE_REGISTERS {
            return Err(Error::Protocol(format!(
                "unsupported function code 0x{function:02x}"
            )));
        }
        let start_address = frame.get_u16();
        let quantity = frame.get_u16() as usize;
        let byte_count = frame.get_u8() as usize;
        if byte_count != 2 * quantity || frame.remaining() != byte_count {
            return Err(Error::Protocol(format!(
                "byte count {byte_count} does not match quantity {quantity}"
            )));
        }
        let values = (0..quantity).map(|_| frame.get_u16()).collect();
        Ok(Some(WriteRegisters {
            transaction_id: mbap.transaction_id,
            unit_id: mbap.unit_id,
            start_address,
            values,
        }))
    }
}

impl Encoder<Response> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, msg: Response, dst: &mut BytesMut) -> Result<()> {
        match msg {
            Response::Written {
                transaction_id,
                unit_id,
                start_address,
                quantity,
            } => {
                put_mbap(dst, transaction_id, unit_id, 5);
                dst.put_u8(WRITE_MULTIPLE_REGISTERS);
                dst.put_u16(start_address);
                dst.put_u16(quantity);
            }
            Response::Exception {
                transaction_id,
                unit_id,
                function,
                code,
            } => {
                put_mbap(dst, transaction_id, unit_id, 2);
                dst.put_u8(function | EXCEPTION_FLAG);
                dst.put_u8(code);
            }
        }
        Ok(())
    }
}
