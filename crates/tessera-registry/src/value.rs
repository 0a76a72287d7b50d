//! Register values - a closed tagged union
//!
//! Every register holds one of these kinds, fixed at creation. Numeric
//! kinds convert into one another on assignment (arity preserved); string,
//! byte-sequence, and bit kinds never do. `Empty` exists only as the wire
//! representation of "no value supplied" and cannot be stored.

use tessera_core::DecodeError;
use tessera_wire::{BitReader, BitWriter, Message, TypeDescriptor};

/// Discriminant of a register value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Empty = 0,
    String = 1,
    Bytes = 2,
    Bit = 3,
    I64 = 4,
    I32 = 5,
    I16 = 6,
    I8 = 7,
    U64 = 8,
    U32 = 9,
    U16 = 10,
    U8 = 11,
    F64 = 12,
    F32 = 13,
    F16 = 14,
}

impl ValueKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueKind::Empty),
            1 => Some(ValueKind::String),
            2 => Some(ValueKind::Bytes),
            3 => Some(ValueKind::Bit),
            4 => Some(ValueKind::I64),
            5 => Some(ValueKind::I32),
            6 => Some(ValueKind::I16),
            7 => Some(ValueKind::I8),
            8 => Some(ValueKind::U64),
            9 => Some(ValueKind::U32),
            10 => Some(ValueKind::U16),
            11 => Some(ValueKind::U8),
            12 => Some(ValueKind::F64),
            13 => Some(ValueKind::F32),
            14 => Some(ValueKind::F16),
            _ => None,
        }
    }

    #[inline]
    pub fn to_tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Empty => "empty",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::Bit => "bit",
            ValueKind::I64 => "i64",
            ValueKind::I32 => "i32",
            ValueKind::I16 => "i16",
            ValueKind::I8 => "i8",
            ValueKind::U64 => "u64",
            ValueKind::U32 => "u32",
            ValueKind::U16 => "u16",
            ValueKind::U8 => "u8",
            ValueKind::F64 => "f64",
            ValueKind::F32 => "f32",
            ValueKind::F16 => "f16",
        }
    }

    /// Numeric kinds convert into one another on register assignment
    pub fn is_numeric(self) -> bool {
        !matches!(
            self,
            ValueKind::Empty | ValueKind::String | ValueKind::Bytes | ValueKind::Bit
        )
    }

    /// Largest element count whose serialization fits the value extent
    pub fn max_elements(self) -> usize {
        match self {
            ValueKind::Empty => 0,
            ValueKind::String | ValueKind::Bytes | ValueKind::Bit => 256,
            ValueKind::U8 | ValueKind::I8 => 256,
            ValueKind::U16 | ValueKind::I16 | ValueKind::F16 => 128,
            ValueKind::U32 | ValueKind::I32 | ValueKind::F32 => 64,
            ValueKind::U64 | ValueKind::I64 | ValueKind::F64 => 32,
        }
    }
}

/// A register value: scalar values are single-element arrays
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Empty,
    String(String),
    Bytes(Vec<u8>),
    Bit(Vec<bool>),
    I64(Vec<i64>),
    I32(Vec<i32>),
    I16(Vec<i16>),
    I8(Vec<i8>),
    U64(Vec<u64>),
    U32(Vec<u32>),
    U16(Vec<u16>),
    U8(Vec<u8>),
    F64(Vec<f64>),
    F32(Vec<f32>),
    /// Stored single-precision, encoded as IEEE 754 binary16
    F16(Vec<f32>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Empty => ValueKind::Empty,
            Value::String(_) => ValueKind::String,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Bit(_) => ValueKind::Bit,
            Value::I64(_) => ValueKind::I64,
            Value::I32(_) => ValueKind::I32,
            Value::I16(_) => ValueKind::I16,
            Value::I8(_) => ValueKind::I8,
            Value::U64(_) => ValueKind::U64,
            Value::U32(_) => ValueKind::U32,
            Value::U16(_) => ValueKind::U16,
            Value::U8(_) => ValueKind::U8,
            Value::F64(_) => ValueKind::F64,
            Value::F32(_) => ValueKind::F32,
            Value::F16(_) => ValueKind::F16,
        }
    }

    /// Element count; strings count bytes
    pub fn arity(&self) -> usize {
        match self {
            Value::Empty => 0,
            Value::String(s) => s.len(),
            Value::Bytes(v) => v.len(),
            Value::Bit(v) => v.len(),
            Value::I64(v) => v.len(),
            Value::I32(v) => v.len(),
            Value::I16(v) => v.len(),
            Value::I8(v) => v.len(),
            Value::U64(v) => v.len(),
            Value::U32(v) => v.len(),
            Value::U16(v) => v.len(),
            Value::U8(v) => v.len(),
            Value::F64(v) => v.len(),
            Value::F32(v) => v.len(),
            Value::F16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Elements widened to f64, for numeric kinds only
    pub fn numeric_f64(&self) -> Option<Vec<f64>> {
        match self {
            Value::I64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Value::I32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Value::I16(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Value::I8(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Value::U64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Value::U32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Value::U16(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Value::U8(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Value::F64(v) => Some(v.clone()),
            Value::F32(v) | Value::F16(v) => Some(v.iter().map(|&x| x as f64).collect()),
            _ => None,
        }
    }

    fn from_f64_elems(kind: ValueKind, elems: &[f64]) -> Option<Value> {
        let value = match kind {
            ValueKind::I64 => Value::I64(elems.iter().map(|&x| x as i64).collect()),
            ValueKind::I32 => Value::I32(elems.iter().map(|&x| x as i32).collect()),
            ValueKind::I16 => Value::I16(elems.iter().map(|&x| x as i16).collect()),
            ValueKind::I8 => Value::I8(elems.iter().map(|&x| x as i8).collect()),
            ValueKind::U64 => Value::U64(elems.iter().map(|&x| x as u64).collect()),
            ValueKind::U32 => Value::U32(elems.iter().map(|&x| x as u32).collect()),
            ValueKind::U16 => Value::U16(elems.iter().map(|&x| x as u16).collect()),
            ValueKind::U8 => Value::U8(elems.iter().map(|&x| x as u8).collect()),
            ValueKind::F64 => Value::F64(elems.to_vec()),
            ValueKind::F32 => Value::F32(elems.iter().map(|&x| x as f32).collect()),
            ValueKind::F16 => Value::F16(elems.iter().map(|&x| x as f32).collect()),
            _ => return None,
        };
        Some(value)
    }

    /// Convert into `kind`, preserving arity.
    ///
    /// Identity conversion always succeeds; numeric kinds inter-convert
    /// element-wise; everything else fails.
    pub fn coerce(self, kind: ValueKind) -> Option<Value> {
        if self.kind() == kind {
            return Some(self);
        }
        if !self.kind().is_numeric() || !kind.is_numeric() {
            return None;
        }
        let elems = self.numeric_f64()?;
        Value::from_f64_elems(kind, &elems)
    }

    /// First element as u16, for numeric scalars (port/node identifiers)
    pub fn scalar_u16(&self) -> Option<u16> {
        let elems = self.numeric_f64()?;
        let first = *elems.first()?;
        if !(0.0..=65535.0).contains(&first) {
            return None;
        }
        Some(first as u16)
    }
}

const VALUE_TAG_BITS: usize = 8;
const VALUE_COUNT_BITS: usize = 16;

impl Message for Value {
    // tag + count + up to 256 payload bytes
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::delimited(8, 2072, 2072);

    fn encode(&self, w: &mut BitWriter) {
        w.write_bits(self.kind().to_tag() as u64, VALUE_TAG_BITS);
        if self.is_empty() {
            return;
        }
        let count = self.arity().min(self.kind().max_elements());
        w.write_bits(count as u64, VALUE_COUNT_BITS);
        match self {
            Value::Empty => unreachable!(),
            Value::String(s) => w.write_bytes(&s.as_bytes()[..count]),
            Value::Bytes(v) => w.write_bytes(&v[..count]),
            Value::Bit(v) => v[..count].iter().for_each(|&b| w.write_bool(b)),
            Value::I64(v) => v[..count].iter().for_each(|&x| w.write_signed(x, 64)),
            Value::I32(v) => v[..count].iter().for_each(|&x| w.write_signed(x as i64, 32)),
            Value::I16(v) => v[..count].iter().for_each(|&x| w.write_signed(x as i64, 16)),
            Value::I8(v) => v[..count].iter().for_each(|&x| w.write_signed(x as i64, 8)),
            Value::U64(v) => v[..count].iter().for_each(|&x| w.write_bits(x, 64)),
            Value::U32(v) => v[..count].iter().for_each(|&x| w.write_bits(x as u64, 32)),
            Value::U16(v) => v[..count].iter().for_each(|&x| w.write_bits(x as u64, 16)),
            Value::U8(v) => w.write_bytes(&v[..count]),
            Value::F64(v) => v[..count].iter().for_each(|&x| w.write_f64(x)),
            Value::F32(v) => v[..count].iter().for_each(|&x| w.write_f32(x)),
            Value::F16(v) => v[..count].iter().for_each(|&x| w.write_f16(x)),
        }
    }

    fn decode(r: &mut BitReader<'_>) -> Result<Self, DecodeError> {
        let tag = r.read_bits(VALUE_TAG_BITS);
        let kind = ValueKind::from_tag(tag as u8).ok_or(DecodeError::InvalidDiscriminant {
            what: "register value kind",
            value: tag,
        })?;
        if kind == ValueKind::Empty {
            return Ok(Value::Empty);
        }
        let count = r.read_bits(VALUE_COUNT_BITS) as usize;
        if count > kind.max_elements() {
            return Err(DecodeError::IllFormedLengthPrefix {
                length: count,
                remaining: kind.max_elements(),
            });
        }
        let value = match kind {
            ValueKind::Empty => unreachable!(),
            ValueKind::String => {
                Value::String(String::from_utf8_lossy(&r.read_bytes(count)).into_owned())
            }
            ValueKind::Bytes => Value::Bytes(r.read_bytes(count)),
            ValueKind::Bit => Value::Bit((0..count).map(|_| r.read_bool()).collect()),
            ValueKind::I64 => Value::I64((0..count).map(|_| r.read_signed(64)).collect()),
            ValueKind::I32 => Value::I32((0..count).map(|_| r.read_signed(32) as i32).collect()),
            ValueKind::I16 => Value::I16((0..count).map(|_| r.read_signed(16) as i16).collect()),
            ValueKind::I8 => Value::I8((0..count).map(|_| r.read_signed(8) as i8).collect()),
            ValueKind::U64 => Value::U64((0..count).map(|_| r.read_bits(64)).collect()),
            ValueKind::U32 => Value::U32((0..count).map(|_| r.read_bits(32) as u32).collect()),
            ValueKind::U16 => Value::U16((0..count).map(|_| r.read_bits(16) as u16).collect()),
            ValueKind::U8 => Value::U8(r.read_bytes(count)),
            ValueKind::F64 => Value::F64((0..count).map(|_| r.read_f64()).collect()),
            ValueKind::F32 => Value::F32((0..count).map(|_| r.read_f32()).collect()),
            ValueKind::F16 => Value::F16((0..count).map(|_| r.read_f16()).collect()),
        };
        Ok(value)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<u16> for Value {
    fn from(x: u16) -> Self {
        Value::U16(vec![x])
    }
}

impl From<u32> for Value {
    fn from(x: u32) -> Self {
        Value::U32(vec![x])
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::F64(vec![x])
    }
}

impl From<bool> for Value {
    fn from(x: bool) -> Self {
        Value::Bit(vec![x])
    }
}
