//! Codec traits binding typed values to their descriptors

use tessera_core::DecodeError;

use crate::{BitReader, BitWriter, TypeDescriptor};

/// A value serializable under a published type descriptor.
///
/// `encode` has no error path: handing a value to the wrong writer state is
/// a programming contract violation, not a runtime condition.
pub trait Message: Sized {
    const DESCRIPTOR: TypeDescriptor;

    fn encode(&self, w: &mut BitWriter);

    fn decode(r: &mut BitReader<'_>) -> Result<Self, DecodeError>;
}

/// A request/response type pair served over a service identifier
pub trait Service {
    type Request: Message;
    type Response: Message;
}

/// Serialize a message; the result never exceeds the type's extent
pub fn encode_to_vec<T: Message>(value: &T) -> Vec<u8> {
    let mut w = BitWriter::with_capacity(T::DESCRIPTOR.max_bytes());
    value.encode(&mut w);
    let buf = w.finish();
    debug_assert!(
        buf.len() <= T::DESCRIPTOR.extent_bytes(),
        "serialization of {} bytes exceeds extent {}",
        buf.len(),
        T::DESCRIPTOR.extent_bytes(),
    );
    buf
}

/// Deserialize a message, enforcing the descriptor's size contract.
///
/// Sealed types require the exact serialized size. Delimited types accept
/// anything up to the extent, tolerating both unknown trailing bytes and
/// truncated trailing fields.
pub fn decode_from_slice<T: Message>(buf: &[u8]) -> Result<T, DecodeError> {
    let d = T::DESCRIPTOR;
    if d.sealed {
        let expected = d.extent_bytes();
        if buf.len() < expected {
            return Err(DecodeError::Truncated {
                expected,
                available: buf.len(),
            });
        }
        if buf.len() > expected {
            return Err(DecodeError::OverExtent {
                len: buf.len(),
                extent: expected,
            });
        }
    } else if buf.len() > d.extent_bytes() {
        return Err(DecodeError::OverExtent {
            len: buf.len(),
            extent: d.extent_bytes(),
        });
    }
    let mut r = BitReader::new(buf);
    T::decode(&mut r)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sealed test fixture: three fields over 48 bits
    #[derive(Clone, Debug, PartialEq)]
    struct Probe {
        a: u32,
        b: u8, // 4 bits
        c: u16, // 12 bits
    }

    impl Message for Probe {
        const DESCRIPTOR: TypeDescriptor = TypeDescriptor::sealed(48);

        fn encode(&self, w: &mut BitWriter) {
            w.write_bits(self.a as u64, 32);
            w.write_bits(self.b as u64, 4);
            w.write_bits(self.c as u64, 12);
        }

        fn decode(r: &mut BitReader<'_>) -> Result<Self, DecodeError> {
            Ok(Probe {
                a: r.read_bits(32) as u32,
                b: r.read_bits(4) as u8,
                c: r.read_bits(12) as u16,
            })
        }
    }

    /// Delimited test fixture with extent headroom
    #[derive(Clone, Debug, PartialEq)]
    struct Growable {
        x: u16,
    }

    impl Message for Growable {
        const DESCRIPTOR: TypeDescriptor = TypeDescriptor::delimited(16, 16, 64);

        fn encode(&self, w: &mut BitWriter) {
            w.write_bits(self.x as u64, 16);
        }

        fn decode(r: &mut BitReader<'_>) -> Result<Self, DecodeError> {
            Ok(Growable {
                x: r.read_bits(16) as u16,
            })
        }
    }

    #[test]
    fn test_sealed_roundtrip_exact_size() {
        let value = Probe {
            a: 0xDEAD_BEEF,
            b: 0xA,
            c: 0x123,
        };
        let buf = encode_to_vec(&value);
        assert_eq!(buf.len(), Probe::DESCRIPTOR.extent_bytes());
        assert_eq!(decode_from_slice::<Probe>(&buf).unwrap(), value);
    }

    #[test]
    fn test_sealed_rejects_short_input() {
        let buf = vec![0u8; 5];
        assert!(matches!(
            decode_from_slice::<Probe>(&buf),
            Err(DecodeError::Truncated { expected: 6, available: 5 })
        ));
    }

    #[test]
    fn test_sealed_rejects_long_input() {
        let buf = vec![0u8; 7];
        assert!(matches!(
            decode_from_slice::<Probe>(&buf),
            Err(DecodeError::OverExtent { len: 7, extent: 6 })
        ));
    }

    #[test]
    fn test_delimited_tolerates_trailing_bytes_within_extent() {
        let value = Growable { x: 0x5A5A };
        let mut buf = encode_to_vec(&value);
        buf.extend_from_slice(&[1, 2, 3, 4]); // fields from a newer schema
        let back = decode_from_slice::<Growable>(&buf).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_delimited_rejects_input_beyond_extent() {
        let buf = vec![0u8; Growable::DESCRIPTOR.extent_bytes() + 1];
        assert!(matches!(
            decode_from_slice::<Growable>(&buf),
            Err(DecodeError::OverExtent { .. })
        ));
    }

    #[test]
    fn test_delimited_short_input_defaults_fields() {
        let back = decode_from_slice::<Growable>(&[]).unwrap();
        assert_eq!(back.x, 0);
    }
}
