//! Register codec
//!
//! Converts runs of 16-bit registers into typed [`Value`]s and back. Multi
//! register integers are big-endian in register order (high word first).
//! Fixed-point kinds scale by 10, 100 or 1000. Time of day is stored as
//! decimal `HHMM`, dates as six registers starting with `year - 2000`.

use crate::error::{DecodeError, EncodeError};
use crate::modbus::RegisterType;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// How a field is laid out in registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U16,
    I16,
    U32,
    Deci,
    Centi,
    Milli,
    DeciI16,
    CentiI16,
    DeciU32,
    CentiU32,
    MilliU32,
    /// Single bit of a register
    Flag(u8),
    Bool,
    HighByte,
    LowByte,
    /// Register rendered as four lowercase hex digits
    Hex,
    TimeOfDay,
    /// Start and end time of day in consecutive registers
    TimeSlot,
    /// Two latin1 characters per register
    Ascii(usize),
    DateTime,
}

impl FieldKind {
    /// Number of registers the field occupies
    pub fn width(self) -> usize {
        match self {
            FieldKind::U32
            | FieldKind::DeciU32
            | FieldKind::CentiU32
            | FieldKind::MilliU32
            | FieldKind::TimeSlot => 2,
            FieldKind::Ascii(n) => n,
            FieldKind::DateTime => 6,
            _ => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldKind::U16 => "u16",
            FieldKind::I16 => "i16",
            FieldKind::U32 => "u32",
            FieldKind::Deci => "deci",
            FieldKind::Centi => "centi",
            FieldKind::Milli => "milli",
            FieldKind::DeciI16 => "deci_i16",
            FieldKind::CentiI16 => "centi_i16",
            FieldKind::DeciU32 => "deci_u32",
            FieldKind::CentiU32 => "centi_u32",
            FieldKind::MilliU32 => "milli_u32",
            FieldKind::Flag(_) => "flag",
            FieldKind::Bool => "bool",
            FieldKind::HighByte => "high_byte",
            FieldKind::LowByte => "low_byte",
            FieldKind::Hex => "hex",
            FieldKind::TimeOfDay => "time_of_day",
            FieldKind::TimeSlot => "time_slot",
            FieldKind::Ascii(_) => "ascii",
            FieldKind::DateTime => "datetime",
        }
    }
}

/// A start/end pair of times of day; the end may precede the start for
/// windows that cross midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Build from hour/minute pairs, rejecting anything outside a day
    pub fn from_hm(start: (u32, u32), end: (u32, u32)) -> Option<Self> {
        Some(Self {
            start: NaiveTime::from_hms_opt(start.0, start.1, 0)?,
            end: NaiveTime::from_hms_opt(end.0, end.1, 0)?,
        })
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end < self.start
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// A decoded register value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Unsigned(u32),
    Signed(i32),
    Decimal(f64),
    Flag(bool),
    Time(NaiveTime),
    Slot(TimeSlot),
    Text(String),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unsigned(_) => "unsigned",
            Value::Signed(_) => "signed",
            Value::Decimal(_) => "decimal",
            Value::Flag(_) => "flag",
            Value::Time(_) => "time",
            Value::Slot(_) => "slot",
            Value::Text(_) => "text",
            Value::DateTime(_) => "datetime",
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Signed(v) => Some(*v),
            Value::Unsigned(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Decimal(v) => Some(*v),
            Value::Unsigned(v) => Some(*v as f64),
            Value::Signed(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Flag(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            Value::Time(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_slot(&self) -> Option<TimeSlot> {
        match self {
            Value::Slot(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unsigned(v) => write!(f, "{}", v),
            Value::Signed(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Flag(v) => write!(f, "{}", v),
            Value::Time(v) => write!(f, "{}", v.format("%H:%M")),
            Value::Slot(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

fn join_u32(hi: u16, lo: u16) -> u32 {
    ((hi as u32) << 16) | lo as u32
}

fn split_u32(v: u32) -> [u16; 2] {
    [(v >> 16) as u16, (v & 0xFFFF) as u16]
}

/// Decode a `HHMM` register into a time of day
pub fn decode_time_of_day(raw: u16) -> Result<NaiveTime, DecodeError> {
    let hour = raw / 100;
    let minute = raw % 100;
    NaiveTime::from_hms_opt(hour as u32, minute as u32, 0).ok_or(DecodeError::InvalidTimeSlot {
        raw,
        hour,
        minute,
    })
}

pub fn encode_time_of_day(time: NaiveTime) -> u16 {
    (time.hour() * 100 + time.minute()) as u16
}

/// Decode a pair of `HHMM` registers
pub fn decode_time_slot(start: u16, end: u16) -> Result<TimeSlot, DecodeError> {
    Ok(TimeSlot {
        start: decode_time_of_day(start)?,
        end: decode_time_of_day(end)?,
    })
}

pub fn encode_time_slot(slot: &TimeSlot) -> [u16; 2] {
    [encode_time_of_day(slot.start), encode_time_of_day(slot.end)]
}

/// Decode `year - 2000, month, day, hour, minute, second`
pub fn decode_datetime(regs: &[u16]) -> Result<NaiveDateTime, DecodeError> {
    let [y, mo, d, h, mi, s] = match regs {
        [y, mo, d, h, mi, s] => [*y, *mo, *d, *h, *mi, *s],
        _ => {
            return Err(DecodeError::OutOfRange {
                address: 0,
                width: regs.len(),
            });
        }
    };
    let invalid = DecodeError::InvalidDate {
        year: y.saturating_add(2000),
        month: mo,
        day: d,
        hour: h,
        minute: mi,
        second: s,
    };
    let date = NaiveDate::from_ymd_opt(2000 + y as i32, mo as u32, d as u32)
        .ok_or_else(|| invalid.clone())?;
    date.and_hms_opt(h as u32, mi as u32, s as u32)
        .ok_or(invalid)
}

pub fn encode_datetime(dt: &NaiveDateTime) -> Result<[u16; 6], EncodeError> {
    let year = dt.year() - 2000;
    let year = u16::try_from(year).map_err(|_| EncodeError::OutOfRange {
        message: format!("year {} cannot be stored before 2000", dt.year()),
    })?;
    Ok([
        year,
        dt.month() as u16,
        dt.day() as u16,
        dt.hour() as u16,
        dt.minute() as u16,
        dt.second() as u16,
    ])
}

/// Decode latin1 text, two characters per register, with NULs dropped
pub fn decode_ascii(regs: &[u16]) -> String {
    regs.iter()
        .flat_map(|r| r.to_be_bytes())
        .filter(|b| *b != 0)
        .map(char::from)
        .collect()
}

pub fn encode_ascii(text: &str, registers: usize) -> Result<Vec<u16>, EncodeError> {
    let mut bytes = Vec::with_capacity(registers * 2);
    for c in text.chars() {
        let b = u8::try_from(c as u32).map_err(|_| EncodeError::OutOfRange {
            message: format!("character {:?} is not latin1", c),
        })?;
        bytes.push(b);
    }
    if bytes.len() > registers * 2 {
        return Err(EncodeError::ValueTooLong {
            len: bytes.len(),
            max: registers * 2,
        });
    }
    bytes.resize(registers * 2, 0);
    Ok(bytes
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Decode `regs` (exactly `kind.width()` registers) into a value
pub fn decode(kind: FieldKind, regs: &[u16]) -> Result<Value, DecodeError> {
    if regs.len() != kind.width() {
        return Err(DecodeError::OutOfRange {
            address: 0,
            width: kind.width(),
        });
    }
    let r0 = regs.first().copied().unwrap_or(0);
    let value = match kind {
        FieldKind::U16 => Value::Unsigned(r0 as u32),
        FieldKind::I16 => Value::Signed(r0 as i16 as i32),
        FieldKind::U32 => Value::Unsigned(join_u32(r0, regs[1])),
        FieldKind::Deci => Value::Decimal(r0 as f64 / 10.0),
        FieldKind::Centi => Value::Decimal(r0 as f64 / 100.0),
        FieldKind::Milli => Value::Decimal(r0 as f64 / 1000.0),
        FieldKind::DeciI16 => Value::Decimal(r0 as i16 as f64 / 10.0),
        FieldKind::CentiI16 => Value::Decimal(r0 as i16 as f64 / 100.0),
        FieldKind::DeciU32 => Value::Decimal(join_u32(r0, regs[1]) as f64 / 10.0),
        FieldKind::CentiU32 => Value::Decimal(join_u32(r0, regs[1]) as f64 / 100.0),
        FieldKind::MilliU32 => Value::Decimal(join_u32(r0, regs[1]) as f64 / 1000.0),
        FieldKind::Flag(bit) => Value::Flag(r0 & (1u16 << (bit & 0x0F)) != 0),
        FieldKind::Bool => Value::Flag(r0 != 0),
        FieldKind::HighByte => Value::Unsigned((r0 >> 8) as u32),
        FieldKind::LowByte => Value::Unsigned((r0 & 0xFF) as u32),
        FieldKind::Hex => Value::Text(format!("{:04x}", r0)),
        FieldKind::TimeOfDay => Value::Time(decode_time_of_day(r0)?),
        FieldKind::TimeSlot => Value::Slot(decode_time_slot(r0, regs[1])?),
        FieldKind::Ascii(_) => Value::Text(decode_ascii(regs)),
        FieldKind::DateTime => Value::DateTime(decode_datetime(regs)?),
    };
    Ok(value)
}

fn scaled(value: f64, scale: f64, min: f64, max: f64) -> Result<i64, EncodeError> {
    let raw = (value * scale).round();
    if !raw.is_finite() || raw < min || raw > max {
        return Err(EncodeError::OutOfRange {
            message: format!(
                "{} does not fit {}..={} at scale {}",
                value,
                min / scale,
                max / scale,
                scale
            ),
        });
    }
    Ok(raw as i64)
}

fn unsigned_in(value: u32, max: u32) -> Result<u32, EncodeError> {
    if value > max {
        return Err(EncodeError::OutOfRange {
            message: format!("{} exceeds {}", value, max),
        });
    }
    Ok(value)
}

/// Encode a value into `kind.width()` registers
pub fn encode(kind: FieldKind, value: &Value) -> Result<Vec<u16>, EncodeError> {
    const U16_MAX: f64 = u16::MAX as f64;
    const U32_MAX: f64 = u32::MAX as f64;
    const I16_MIN: f64 = i16::MIN as f64;
    const I16_MAX: f64 = i16::MAX as f64;

    let regs = match (kind, value) {
        (FieldKind::U16, Value::Unsigned(v)) => vec![unsigned_in(*v, 0xFFFF)? as u16],
        (FieldKind::I16, Value::Signed(v)) => {
            let v = i16::try_from(*v).map_err(|_| EncodeError::OutOfRange {
                message: format!("{} does not fit a signed register", v),
            })?;
            vec![v as u16]
        }
        (FieldKind::U32, Value::Unsigned(v)) => split_u32(*v).to_vec(),
        (FieldKind::Deci, Value::Decimal(v)) => vec![scaled(*v, 10.0, 0.0, U16_MAX)? as u16],
        (FieldKind::Centi, Value::Decimal(v)) => vec![scaled(*v, 100.0, 0.0, U16_MAX)? as u16],
        (FieldKind::Milli, Value::Decimal(v)) => vec![scaled(*v, 1000.0, 0.0, U16_MAX)? as u16],
        (FieldKind::DeciI16, Value::Decimal(v)) => {
            vec![scaled(*v, 10.0, I16_MIN, I16_MAX)? as i16 as u16]
        }
        (FieldKind::CentiI16, Value::Decimal(v)) => {
            vec![scaled(*v, 100.0, I16_MIN, I16_MAX)? as i16 as u16]
        }
        (FieldKind::DeciU32, Value::Decimal(v)) => {
            split_u32(scaled(*v, 10.0, 0.0, U32_MAX)? as u32).to_vec()
        }
        (FieldKind::CentiU32, Value::Decimal(v)) => {
            split_u32(scaled(*v, 100.0, 0.0, U32_MAX)? as u32).to_vec()
        }
        (FieldKind::MilliU32, Value::Decimal(v)) => {
            split_u32(scaled(*v, 1000.0, 0.0, U32_MAX)? as u32).to_vec()
        }
        (FieldKind::Flag(bit), Value::Flag(v)) => {
            vec![if *v { 1u16 << (bit & 0x0F) } else { 0 }]
        }
        (FieldKind::Bool, Value::Flag(v)) => vec![u16::from(*v)],
        (FieldKind::HighByte, Value::Unsigned(v)) => vec![(unsigned_in(*v, 0xFF)? as u16) << 8],
        (FieldKind::LowByte, Value::Unsigned(v)) => vec![unsigned_in(*v, 0xFF)? as u16],
        (FieldKind::Hex, Value::Text(v)) => {
            let raw = u16::from_str_radix(v, 16).map_err(|e| EncodeError::OutOfRange {
                message: format!("{:?} is not a 16-bit hex value: {}", v, e),
            })?;
            vec![raw]
        }
        (FieldKind::TimeOfDay, Value::Time(t)) => vec![encode_time_of_day(*t)],
        (FieldKind::TimeSlot, Value::Slot(s)) => encode_time_slot(s).to_vec(),
        (FieldKind::Ascii(n), Value::Text(v)) => encode_ascii(v, n)?,
        (FieldKind::DateTime, Value::DateTime(dt)) => encode_datetime(dt)?.to_vec(),
        (kind, value) => {
            return Err(EncodeError::KindMismatch {
                kind: kind.name(),
                value: value.type_name(),
            });
        }
    };
    Ok(regs)
}

/// One contiguous block of registers as returned by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank {
    pub register_type: RegisterType,
    pub slave: u8,
    pub base: u16,
    pub values: Vec<u16>,
}

impl RegisterBank {
    pub fn new(register_type: RegisterType, slave: u8, base: u16, values: Vec<u16>) -> Self {
        Self {
            register_type,
            slave,
            base,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_all_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0)
    }

    /// Registers `address..address + width`, addressed absolutely
    pub fn slice(&self, address: u16, width: usize) -> Result<&[u16], DecodeError> {
        let out_of_range = DecodeError::OutOfRange { address, width };
        let start = address
            .checked_sub(self.base)
            .map(usize::from)
            .ok_or_else(|| out_of_range.clone())?;
        self.values
            .get(start..start + width)
            .ok_or(out_of_range)
    }

    pub fn get(&self, address: u16) -> Option<u16> {
        self.slice(address, 1).ok().map(|s| s[0])
    }

    /// Decode the field at an absolute address
    pub fn decode(&self, address: u16, kind: FieldKind) -> Result<Value, DecodeError> {
        decode(kind, self.slice(address, kind.width())?)
    }
}

/// Raw register values merged from several banks of one slave
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterCache {
    registers: BTreeMap<(RegisterType, u16), u16>,
}

impl RegisterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_banks<'a>(banks: impl IntoIterator<Item = &'a RegisterBank>) -> Self {
        let mut cache = Self::new();
        for bank in banks {
            cache.extend(bank);
        }
        cache
    }

    pub fn extend(&mut self, bank: &RegisterBank) {
        for (offset, value) in bank.values.iter().enumerate() {
            let address = bank.base as usize + offset;
            if let Ok(address) = u16::try_from(address) {
                self.registers
                    .insert((bank.register_type, address), *value);
            }
        }
    }

    pub fn get(&self, register_type: RegisterType, address: u16) -> Option<u16> {
        self.registers.get(&(register_type, address)).copied()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Whether every register of the field is present
    pub fn contains(&self, register_type: RegisterType, address: u16, width: usize) -> bool {
        (0..width).all(|i| {
            u16::try_from(address as usize + i)
                .map(|a| self.registers.contains_key(&(register_type, a)))
                .unwrap_or(false)
        })
    }

    pub fn decode(
        &self,
        register_type: RegisterType,
        address: u16,
        kind: FieldKind,
    ) -> Result<Value, DecodeError> {
        let width = kind.width();
        let regs = (0..width)
            .map(|i| {
                u16::try_from(address as usize + i)
                    .ok()
                    .and_then(|a| self.get(register_type, a))
            })
            .collect::<Option<Vec<u16>>>()
            .ok_or(DecodeError::OutOfRange { address, width })?;
        decode(kind, &regs)
    }
}
