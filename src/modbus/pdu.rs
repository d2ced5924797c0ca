//! Transparent message bodies
//!
//! A transparent frame wraps a Modbus-RTU-like payload addressed through the
//! data adapter. Requests carry the adapter serial, a fixed padding word, the
//! slave address, a function code, the payload and a CRC. Responses also
//! carry the inverter serial, and read responses use a CRC variant that is
//! offset by one from the standard Modbus CRC.

use super::framer::{Frame, FrameFunction};
use crate::error::TransportError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Slave address the inverter answers to
pub const INVERTER_SLAVE: u8 = 0x32;

/// Slave address used for holding register writes
pub const WRITE_SLAVE: u8 = 0x11;

/// Largest register count the device returns in one read
pub const MAX_REGISTER_COUNT: u16 = 60;

const REQUEST_PADDING: u64 = 0x08;

const SERIAL_LEN: usize = 10;

/// Transparent function codes
pub mod function {
    pub const NULL: u8 = 0;
    pub const READ_HOLDING_REGISTERS: u8 = 3;
    pub const READ_INPUT_REGISTERS: u8 = 4;
    pub const WRITE_HOLDING_REGISTER: u8 = 6;
    pub const ERROR_FLAG: u8 = 0x80;
}

/// The two disjoint register spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegisterType {
    Holding,
    Input,
}

impl RegisterType {
    pub fn read_function(self) -> u8 {
        match self {
            RegisterType::Holding => function::READ_HOLDING_REGISTERS,
            RegisterType::Input => function::READ_INPUT_REGISTERS,
        }
    }

    /// Short prefix used in logs, e.g. `HR(20)` or `IR(0)`
    pub fn prefix(self) -> &'static str {
        match self {
            RegisterType::Holding => "HR",
            RegisterType::Input => "IR",
        }
    }
}

/// Devices answer writes from 0x11 and sometimes reads from 0x00; both mean
/// the inverter itself
pub fn normalize_slave(slave: u8) -> u8 {
    match slave {
        0x00 | WRITE_SLAVE => INVERTER_SLAVE,
        other => other,
    }
}

/// 10 byte ASCII serial number of the data adapter or inverter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Serial([u8; SERIAL_LEN]);

impl Serial {
    pub fn new(bytes: [u8; SERIAL_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SERIAL_LEN] {
        &self.0
    }
}

impl Default for Serial {
    fn default() -> Self {
        Self(*b"AB1234G567")
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: String = self
            .0
            .iter()
            .filter(|b| **b != 0)
            .map(|b| char::from(*b))
            .collect();
        write!(f, "{}", text)
    }
}

impl std::str::FromStr for Serial {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; SERIAL_LEN] = s
            .as_bytes()
            .try_into()
            .map_err(|_| format!("serial must be {} bytes, got {}", SERIAL_LEN, s.len()))?;
        if !bytes.is_ascii() {
            return Err("serial must be ASCII".to_string());
        }
        Ok(Self(bytes))
    }
}

/// CRC-16/MODBUS as used by the transparent protocol
pub fn crc16_modbus(data: &[u8]) -> u16 {
    crc16::State::<crc16::MODBUS>::calculate(data)
}

/// A request sent through the data adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadRegisters {
        slave: u8,
        register_type: RegisterType,
        base: u16,
        count: u16,
    },
    WriteHoldingRegister {
        slave: u8,
        register: u16,
        value: u16,
    },
}

impl Request {
    pub fn read(slave: u8, register_type: RegisterType, base: u16, count: u16) -> Self {
        Request::ReadRegisters {
            slave,
            register_type,
            base,
            count,
        }
    }

    pub fn write(register: u16, value: u16) -> Self {
        Request::WriteHoldingRegister {
            slave: WRITE_SLAVE,
            register,
            value,
        }
    }

    pub fn function(&self) -> u8 {
        match self {
            Request::ReadRegisters { register_type, .. } => register_type.read_function(),
            Request::WriteHoldingRegister { .. } => function::WRITE_HOLDING_REGISTER,
        }
    }

    pub fn slave(&self) -> u8 {
        match self {
            Request::ReadRegisters { slave, .. } | Request::WriteHoldingRegister { slave, .. } => {
                *slave
            }
        }
    }

    fn payload_words(&self) -> [u16; 2] {
        match self {
            Request::ReadRegisters { base, count, .. } => [*base, *count],
            Request::WriteHoldingRegister {
                register, value, ..
            } => [*register, *value],
        }
    }

    /// Encode the transparent body
    pub fn encode(&self, adapter: &Serial) -> Bytes {
        let [a, b] = self.payload_words();
        let mut crc_input = BytesMut::with_capacity(6);
        crc_input.put_u8(self.slave());
        crc_input.put_u8(self.function());
        crc_input.put_u16(a);
        crc_input.put_u16(b);
        let crc = crc16_modbus(&crc_input);

        let mut body = BytesMut::with_capacity(SERIAL_LEN + 8 + crc_input.len() + 2);
        body.put_slice(adapter.as_bytes());
        body.put_u64(REQUEST_PADDING);
        body.put_slice(&crc_input);
        body.put_u16_le(crc);
        body.freeze()
    }

    pub fn to_frame(&self, adapter: &Serial) -> Frame {
        Frame::new(FrameFunction::Transparent, self.encode(adapter))
    }

    /// Whether `response` is the answer to this request
    pub fn matches(&self, response: &Response) -> bool {
        if normalize_slave(self.slave()) != normalize_slave(response.slave()) {
            return false;
        }
        match (self, response) {
            (
                Request::ReadRegisters {
                    register_type,
                    base,
                    count,
                    ..
                },
                Response::ReadRegisters {
                    register_type: rt,
                    base: rb,
                    values,
                    ..
                },
            ) => register_type == rt && base == rb && values.len() == *count as usize,
            (
                Request::WriteHoldingRegister { register, .. },
                Response::WriteHoldingRegister { register: rr, .. },
            ) => register == rr,
            (_, Response::Exception { function, .. }) => *function == self.function(),
            _ => false,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::ReadRegisters {
                slave,
                register_type,
                base,
                count,
            } => write!(
                f,
                "Read{}({}+{})@{:#04x}",
                register_type.prefix(),
                base,
                count,
                slave
            ),
            Request::WriteHoldingRegister {
                slave,
                register,
                value,
            } => write!(f, "WriteHR({}={})@{:#04x}", register, value, slave),
        }
    }
}

/// A decoded transparent response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadRegisters {
        slave: u8,
        register_type: RegisterType,
        base: u16,
        values: Vec<u16>,
        inverter_serial: Serial,
    },
    WriteHoldingRegister {
        slave: u8,
        register: u16,
        value: u16,
        inverter_serial: Serial,
    },
    /// Error-flagged response for the given (unflagged) function
    Exception {
        slave: u8,
        function: u8,
    },
    /// Filler the adapter emits between real answers
    Null,
}

impl Response {
    pub fn slave(&self) -> u8 {
        match self {
            Response::ReadRegisters { slave, .. }
            | Response::WriteHoldingRegister { slave, .. }
            | Response::Exception { slave, .. } => *slave,
            Response::Null => 0,
        }
    }

    /// Decode a transparent frame body
    pub fn decode(body: &Bytes) -> Result<Response, TransportError> {
        let mut buf = body.clone();
        if buf.remaining() < SERIAL_LEN + 8 + 2 {
            return Err(TransportError::corrupt(format!(
                "transparent body of {} bytes",
                buf.remaining()
            )));
        }
        buf.advance(SERIAL_LEN);
        let _padding = buf.get_u64();
        let slave = buf.get_u8();
        let raw_function = buf.get_u8();
        if raw_function == function::NULL {
            return Ok(Response::Null);
        }
        let error = raw_function & function::ERROR_FLAG != 0;
        let function = raw_function & !function::ERROR_FLAG;

        if buf.remaining() < SERIAL_LEN {
            return Err(TransportError::corrupt("missing inverter serial"));
        }
        let mut serial = [0u8; SERIAL_LEN];
        buf.copy_to_slice(&mut serial);
        let inverter_serial = Serial::new(serial);

        if error {
            return Ok(Response::Exception { slave, function });
        }

        match function {
            function::READ_HOLDING_REGISTERS | function::READ_INPUT_REGISTERS => {
                let register_type = if function == function::READ_HOLDING_REGISTERS {
                    RegisterType::Holding
                } else {
                    RegisterType::Input
                };
                decode_read_response(&mut buf, slave, function, register_type, inverter_serial)
            }
            function::WRITE_HOLDING_REGISTER => {
                if buf.remaining() < 6 {
                    return Err(TransportError::corrupt("short write response"));
                }
                let register = buf.get_u16();
                let value = buf.get_u16();
                let _check = buf.get_u16();
                if register == 0 {
                    return Err(TransportError::corrupt(
                        "write response for register 0",
                    ));
                }
                Ok(Response::WriteHoldingRegister {
                    slave,
                    register,
                    value,
                    inverter_serial,
                })
            }
            other => Err(TransportError::corrupt(format!(
                "unknown transparent function {}",
                other
            ))),
        }
    }
}

fn decode_read_response(
    buf: &mut Bytes,
    slave: u8,
    function: u8,
    register_type: RegisterType,
    inverter_serial: Serial,
) -> Result<Response, TransportError> {
    if buf.remaining() < 4 {
        return Err(TransportError::corrupt("short read response"));
    }
    let base = buf.get_u16();
    let count = buf.get_u16();
    if count == 0 || count > MAX_REGISTER_COUNT {
        return Err(TransportError::corrupt(format!(
            "implausible register count {}",
            count
        )));
    }
    let needed = count as usize * 2 + 2;
    if buf.remaining() < needed {
        return Err(TransportError::corrupt(format!(
            "register_count={} but only {} value bytes",
            count,
            buf.remaining().saturating_sub(2)
        )));
    }
    let values: Vec<u16> = (0..count).map(|_| buf.get_u16()).collect();
    let check = buf.get_u16();

    let expected = read_response_crc(slave, function, &inverter_serial, base, &values);
    if expected.wrapping_sub(1) != check {
        return Err(TransportError::corrupt(format!(
            "supplied CRC {:#06x} does not match calculated CRC {:#06x}",
            check, expected
        )));
    }

    Ok(Response::ReadRegisters {
        slave,
        register_type,
        base,
        values,
        inverter_serial,
    })
}

/// Byte-swapped CRC over a read response; the device sends this value minus one
pub fn read_response_crc(
    slave: u8,
    function: u8,
    inverter_serial: &Serial,
    base: u16,
    values: &[u16],
) -> u16 {
    let mut crc_input = BytesMut::with_capacity(16 + values.len() * 2);
    crc_input.put_u8(slave);
    crc_input.put_u8(function);
    crc_input.put_slice(inverter_serial.as_bytes());
    crc_input.put_u16(base);
    crc_input.put_u16(values.len() as u16);
    for v in values {
        crc_input.put_u16(*v);
    }
    crc16_modbus(&crc_input).swap_bytes()
}

/// Heartbeat exchanged with the data adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub adapter_serial: Serial,
    pub adapter_type: u8,
}

impl Heartbeat {
    pub fn decode(body: &Bytes) -> Result<Self, TransportError> {
        let mut buf = body.clone();
        if buf.remaining() < SERIAL_LEN + 1 {
            return Err(TransportError::corrupt("short heartbeat"));
        }
        let mut serial = [0u8; SERIAL_LEN];
        buf.copy_to_slice(&mut serial);
        Ok(Self {
            adapter_serial: Serial::new(serial),
            adapter_type: buf.get_u8(),
        })
    }

    pub fn to_frame(&self) -> Frame {
        let mut body = BytesMut::with_capacity(SERIAL_LEN + 1);
        body.put_slice(self.adapter_serial.as_bytes());
        body.put_u8(self.adapter_type);
        Frame::new(FrameFunction::Heartbeat, body.freeze())
    }
}

/// Anything the device may send us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Heartbeat(Heartbeat),
    Transparent(Response),
}

impl Message {
    pub fn decode(frame: &Frame) -> Result<Self, TransportError> {
        match frame.function {
            FrameFunction::Heartbeat => Heartbeat::decode(&frame.body).map(Message::Heartbeat),
            FrameFunction::Transparent => Response::decode(&frame.body).map(Message::Transparent),
        }
    }
}

/// Registers the device is known to return when a frame is garbled: the
/// same bytes show up at these offsets of an otherwise random bank
const SUSPICIOUS_VALUES: &[(usize, &[u16])] = &[
    (28, &[0x4C32]),
    (30, &[0xA119]),
    (31, &[0x34EA]),
    (32, &[0xE77F]),
    (33, &[0xD475]),
    (35, &[0x4500]),
    (40, &[0xE4F9, 0xB619]),
    (41, &[0xC0A8]),
    (43, &[0xC0A8]),
    (46, &[0xC5E9]),
    (50, &[0x60EF, 0x503C]),
    (51, &[0x8018]),
    (52, &[0x43E0]),
    (53, &[0xF6CE]),
    (56, &[0x080A]),
    (58, &[0xFCC1]),
    (59, &[0x661E]),
];

/// Detect a full 60-register bank that carries the known garbage pattern
pub fn is_suspicious(base: u16, values: &[u16]) -> bool {
    if values.len() != MAX_REGISTER_COUNT as usize || base % MAX_REGISTER_COUNT != 0 {
        return false;
    }
    let hits = SUSPICIOUS_VALUES
        .iter()
        .filter(|(idx, bad)| bad.contains(&values[*idx]))
        .count();
    hits > 5
}

/// Build a read response body as the device would, for tests and tooling
pub fn encode_read_response(
    adapter: &Serial,
    inverter_serial: &Serial,
    request: &Request,
    values: &[u16],
) -> Bytes {
    let (slave, function, base) = match request {
        Request::ReadRegisters {
            slave,
            register_type,
            base,
            ..
        } => (*slave, register_type.read_function(), *base),
        Request::WriteHoldingRegister { slave, .. } => {
            (*slave, function::WRITE_HOLDING_REGISTER, 0)
        }
    };
    let crc = read_response_crc(slave, function, inverter_serial, base, values);
    let mut body = BytesMut::with_capacity(34 + values.len() * 2);
    body.put_slice(adapter.as_bytes());
    body.put_u64(0x8A);
    body.put_u8(slave);
    body.put_u8(function);
    body.put_slice(inverter_serial.as_bytes());
    body.put_u16(base);
    body.put_u16(values.len() as u16);
    for v in values {
        body.put_u16(*v);
    }
    body.put_u16(crc.wrapping_sub(1));
    body.freeze()
}

/// Build a write echo body as the device would, for tests and tooling
pub fn encode_write_response(
    adapter: &Serial,
    inverter_serial: &Serial,
    register: u16,
    value: u16,
) -> Bytes {
    let mut body = BytesMut::with_capacity(36);
    body.put_slice(adapter.as_bytes());
    body.put_u64(0x8A);
    body.put_u8(WRITE_SLAVE);
    body.put_u8(function::WRITE_HOLDING_REGISTER);
    body.put_slice(inverter_serial.as_bytes());
    body.put_u16(register);
    body.put_u16(value);
    body.put_u16(0);
    body.freeze()
}
