//! Type-directed marshaling.
//!
//! Every type that can cross the wire implements [`Marshal`]. Two encoding
//! strategies exist:
//!
//! | Strategy | Types | Encoding |
//! |----------|-------|----------|
//! | By-value | integers, floats, `bool`, `char`, `()`, `[T; N]`, [`marshal_enum!`](crate::marshal_enum) enums | fixed number of raw big-endian bytes |
//! | Variable-length | `String`, `Vec<T>`, `Option<T>`, tuples | length/count/tag prefix followed by the fields |
//!
//! By-value types implement [`ByValue`] and receive [`Marshal`] through a
//! blanket impl, so the strategy is selected at compile time and scalars pay
//! no prefix or count checks.
//!
//! # Validation
//!
//! Decoding never trusts the buffer:
//!
//! - `bool` accepts only `0` and `1`, `char` only Unicode scalar values
//! - enum discriminants outside the declared set are rejected
//! - a sequence count that could not fit in the remaining bytes is rejected
//!   before anything is allocated
//! - sequences of zero-size elements (`Vec<()>`, `Vec<[u8; 0]>`) must be
//!   empty, in both directions
//! - text must be valid UTF-8
//!
//! All of these are `MalformedPayload`; running out of bytes is
//! `TruncatedPayload`.
//!
//! Platform-sized integers (`usize`, `isize`) are deliberately not
//! marshalable; use a fixed-width type in declarations.

use std::mem::size_of;

use crate::protocol::error::{Result, RpcError};
use crate::protocol::payload::{Payload, LENGTH_PREFIX_SIZE};

/// A value with a canonical wire encoding.
pub trait Marshal: Sized {
    /// Smallest number of bytes any encoding of this type occupies.
    ///
    /// Used to reject sequence counts that cannot possibly fit in the
    /// remaining payload.
    const MIN_WIRE_SIZE: usize;

    fn encode(&self, payload: &mut Payload) -> Result<()>;

    fn decode(payload: &mut Payload) -> Result<Self>;
}

/// A fixed-size, self-describing type encoded as its raw bytes.
pub trait ByValue: Sized {
    /// Exact encoded size in bytes.
    const WIRE_SIZE: usize;

    fn write_to(&self, payload: &mut Payload);

    fn read_from(payload: &mut Payload) -> Result<Self>;
}

impl<T: ByValue> Marshal for T {
    const MIN_WIRE_SIZE: usize = T::WIRE_SIZE;

    fn encode(&self, payload: &mut Payload) -> Result<()> {
        self.write_to(payload);
        Ok(())
    }

    fn decode(payload: &mut Payload) -> Result<Self> {
        T::read_from(payload)
    }
}

/// Encodes a single value into a fresh payload.
pub fn to_payload<T: Marshal>(value: &T) -> Result<Payload> {
    let mut payload = Payload::with_capacity(T::MIN_WIRE_SIZE);
    value.encode(&mut payload)?;
    Ok(payload)
}

/// Decodes a single value that must span the whole payload.
pub fn from_payload<T: Marshal>(mut payload: Payload) -> Result<T> {
    let value = T::decode(&mut payload)?;
    payload.finish()?;
    Ok(value)
}

macro_rules! by_value_number {
    ($($ty:ty),* $(,)?) => {$(
        impl ByValue for $ty {
            const WIRE_SIZE: usize = size_of::<$ty>();

            fn write_to(&self, payload: &mut Payload) {
                payload.write_raw(&self.to_be_bytes());
            }

            fn read_from(payload: &mut Payload) -> Result<Self> {
                Ok(<$ty>::from_be_bytes(payload.read_array::<{ size_of::<$ty>() }>()?))
            }
        }
    )*};
}

by_value_number!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl ByValue for bool {
    const WIRE_SIZE: usize = 1;

    fn write_to(&self, payload: &mut Payload) {
        payload.write_raw(&[u8::from(*self)]);
    }

    fn read_from(payload: &mut Payload) -> Result<Self> {
        match u8::read_from(payload)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(RpcError::MalformedPayload(format!("invalid bool byte {:#04x}", other))),
        }
    }
}

impl ByValue for char {
    const WIRE_SIZE: usize = 4;

    fn write_to(&self, payload: &mut Payload) {
        u32::from(*self).write_to(payload);
    }

    fn read_from(payload: &mut Payload) -> Result<Self> {
        let raw = u32::read_from(payload)?;
        char::from_u32(raw)
            .ok_or_else(|| RpcError::MalformedPayload(format!("invalid char scalar {:#x}", raw)))
    }
}

impl ByValue for () {
    const WIRE_SIZE: usize = 0;

    fn write_to(&self, _payload: &mut Payload) {}

    fn read_from(_payload: &mut Payload) -> Result<Self> {
        Ok(())
    }
}

impl<T: ByValue, const N: usize> ByValue for [T; N] {
    const WIRE_SIZE: usize = T::WIRE_SIZE * N;

    fn write_to(&self, payload: &mut Payload) {
        for item in self {
            item.write_to(payload);
        }
    }

    fn read_from(payload: &mut Payload) -> Result<Self> {
        let remaining = payload.remaining();
        if Self::WIRE_SIZE > remaining {
            return Err(RpcError::TruncatedPayload {
                needed: Self::WIRE_SIZE,
                remaining,
            });
        }

        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::read_from(payload)?);
        }
        items
            .try_into()
            .map_err(|_| RpcError::MalformedPayload(format!("expected {} array elements", N)))
    }
}

impl Marshal for String {
    const MIN_WIRE_SIZE: usize = LENGTH_PREFIX_SIZE;

    fn encode(&self, payload: &mut Payload) -> Result<()> {
        payload.write_length_prefixed(self.as_bytes())
    }

    fn decode(payload: &mut Payload) -> Result<Self> {
        let bytes = payload.read_length_prefixed()?.to_vec();
        String::from_utf8(bytes)
            .map_err(|e| RpcError::MalformedPayload(format!("text is not valid UTF-8: {}", e)))
    }
}

impl<T: Marshal> Marshal for Vec<T> {
    const MIN_WIRE_SIZE: usize = LENGTH_PREFIX_SIZE;

    fn encode(&self, payload: &mut Payload) -> Result<()> {
        if T::MIN_WIRE_SIZE == 0 && !self.is_empty() {
            return Err(zero_size_sequence(self.len()));
        }
        payload.write_len(self.len())?;
        for item in self {
            item.encode(payload)?;
        }
        Ok(())
    }

    fn decode(payload: &mut Payload) -> Result<Self> {
        let count = payload.read_len()?;

        // Zero-size elements consume no bytes, so nothing bounds their count
        if T::MIN_WIRE_SIZE == 0 {
            if count != 0 {
                return Err(zero_size_sequence(count));
            }
            return Ok(Vec::new());
        }

        // Reject counts that cannot fit before allocating for them
        let fits = count
            .checked_mul(T::MIN_WIRE_SIZE)
            .is_some_and(|needed| needed <= payload.remaining());
        if !fits {
            return Err(RpcError::MalformedPayload(format!(
                "sequence count {} exceeds {} remaining bytes",
                count,
                payload.remaining()
            )));
        }

        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode(payload)?);
        }
        Ok(items)
    }
}

fn zero_size_sequence(count: usize) -> RpcError {
    RpcError::MalformedPayload(format!(
        "sequence of {} zero-size elements; only empty sequences of zero-size types are marshalable",
        count
    ))
}

impl<T: Marshal> Marshal for Option<T> {
    const MIN_WIRE_SIZE: usize = 1;

    fn encode(&self, payload: &mut Payload) -> Result<()> {
        match self {
            None => {
                payload.write_raw(&[0]);
                Ok(())
            }
            Some(value) => {
                payload.write_raw(&[1]);
                value.encode(payload)
            }
        }
    }

    fn decode(payload: &mut Payload) -> Result<Self> {
        match u8::read_from(payload)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(payload)?)),
            tag => Err(RpcError::MalformedPayload(format!("invalid option tag {:#04x}", tag))),
        }
    }
}

// Tuples carry argument lists: fields in declaration order, no prefix.
macro_rules! marshal_tuple {
    ($($name:ident),+) => {
        impl<$($name: Marshal),+> Marshal for ($($name,)+) {
            const MIN_WIRE_SIZE: usize = 0 $(+ $name::MIN_WIRE_SIZE)+;

            #[allow(non_snake_case)]
            fn encode(&self, payload: &mut Payload) -> Result<()> {
                let ($($name,)+) = self;
                $($name.encode(payload)?;)+
                Ok(())
            }

            fn decode(payload: &mut Payload) -> Result<Self> {
                Ok(($($name::decode(payload)?,)+))
            }
        }
    };
}

marshal_tuple!(A);
marshal_tuple!(A, B);
marshal_tuple!(A, B, C);
marshal_tuple!(A, B, C, D);
marshal_tuple!(A, B, C, D, E);
marshal_tuple!(A, B, C, D, E, F);
marshal_tuple!(A, B, C, D, E, F, G);
marshal_tuple!(A, B, C, D, E, F, G, H);

/// Declares a fieldless enum that marshals by value as its discriminant.
///
/// Decoding rejects any discriminant not listed in the declaration with
/// `MalformedPayload`.
///
/// # Example
///
/// ```
/// use marshrpc_common::marshal_enum;
/// use marshrpc_common::protocol::{from_payload, to_payload};
///
/// marshal_enum! {
///     #[derive(Debug, Clone, Copy, PartialEq, Eq)]
///     pub enum Color: u8 {
///         Red = 1,
///         Green = 2,
///     }
/// }
///
/// let payload = to_payload(&Color::Green).unwrap();
/// assert_eq!(payload.as_bytes(), &[2]);
/// assert_eq!(from_payload::<Color>(payload).unwrap(), Color::Green);
/// ```
#[macro_export]
macro_rules! marshal_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr($repr)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $crate::protocol::marshal::ByValue for $name {
            const WIRE_SIZE: usize = <$repr as $crate::protocol::marshal::ByValue>::WIRE_SIZE;

            fn write_to(&self, payload: &mut $crate::protocol::Payload) {
                let raw: $repr = match self {
                    $($name::$variant => $value,)+
                };
                <$repr as $crate::protocol::marshal::ByValue>::write_to(&raw, payload);
            }

            fn read_from(payload: &mut $crate::protocol::Payload) -> $crate::protocol::Result<Self> {
                let raw = <$repr as $crate::protocol::marshal::ByValue>::read_from(payload)?;
                $(
                    if raw == $value {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::protocol::RpcError::MalformedPayload(format!(
                    "invalid {} discriminant {}",
                    stringify!($name),
                    raw
                )))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Marshal + PartialEq + std::fmt::Debug>(value: T) {
        let payload = to_payload(&value).unwrap();
        let decoded: T = from_payload(Payload::from_bytes(payload.into_bytes())).unwrap();
        assert_eq!(decoded, value);
    }

    crate::marshal_enum! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum Shape: u8 {
            Circle = 1,
            Square = 2,
        }
    }

    #[test]
    fn test_integers_are_big_endian() {
        let payload = to_payload(&0x0102_0304u32).unwrap();
        assert_eq!(payload.as_bytes(), &[1, 2, 3, 4]);

        let payload = to_payload(&-2i16).unwrap();
        assert_eq!(payload.as_bytes(), &[0xFF, 0xFE]);
    }

    #[test]
    fn test_scalar_round_trips() {
        round_trip(u64::MAX);
        round_trip(i128::MIN);
        round_trip(-0.5f32);
        round_trip(f64::INFINITY);
        round_trip('\u{1F980}');
        round_trip(true);
        round_trip(());
    }

    #[test]
    fn test_nan_keeps_its_bits() {
        let nan = f64::from_bits(0x7FF8_0000_0000_0001);
        let payload = to_payload(&nan).unwrap();
        let decoded: f64 = from_payload(payload).unwrap();
        assert_eq!(decoded.to_bits(), nan.to_bits());
    }

    #[test]
    fn test_nested_variable_length_round_trip() {
        round_trip(vec![
            vec!["a".to_string(), String::new()],
            vec![],
            vec!["héllo".to_string()],
        ]);
        round_trip((7u8, Some("x".to_string()), vec![[1u16, 2, 3]], None::<i32>));
    }

    #[test]
    fn test_string_wire_layout() {
        let payload = to_payload(&"hi".to_string()).unwrap();
        assert_eq!(payload.as_bytes(), &[0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let err = from_payload::<bool>(Payload::from_bytes(vec![2])).unwrap_err();
        assert!(matches!(err, RpcError::MalformedPayload(_)));
    }

    #[test]
    fn test_surrogate_char_rejected() {
        let err = from_payload::<char>(Payload::from_bytes(0xD800u32.to_be_bytes().to_vec())).unwrap_err();
        assert!(matches!(err, RpcError::MalformedPayload(_)));
    }

    #[test]
    fn test_enum_discriminant_validation() {
        round_trip(Shape::Square);
        let err = from_payload::<Shape>(Payload::from_bytes(vec![9])).unwrap_err();
        assert!(matches!(err, RpcError::MalformedPayload(_)));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut payload = Payload::new();
        payload.write_length_prefixed(&[0xC3, 0x28]).unwrap();
        let err = from_payload::<String>(payload).unwrap_err();
        assert!(matches!(err, RpcError::MalformedPayload(_)));
    }

    #[test]
    fn test_oversized_sequence_count_rejected_before_allocation() {
        let mut payload = Payload::new();
        payload.write_raw(&u32::MAX.to_be_bytes());
        payload.write_raw(&[0; 8]);

        let err = from_payload::<Vec<u64>>(payload).unwrap_err();
        assert!(matches!(err, RpcError::MalformedPayload(_)));
    }

    #[test]
    fn test_zero_size_sequence_count_rejected() {
        // A nested count of u32::MAX would otherwise spin without consuming bytes
        let mut payload = Payload::new();
        payload.write_raw(&1u32.to_be_bytes());
        payload.write_raw(&u32::MAX.to_be_bytes());

        let err = from_payload::<Vec<Vec<()>>>(payload).unwrap_err();
        assert!(matches!(err, RpcError::MalformedPayload(_)));

        let err = from_payload::<Vec<[u8; 0]>>(Payload::from_bytes(1u32.to_be_bytes().to_vec())).unwrap_err();
        assert!(matches!(err, RpcError::MalformedPayload(_)));
    }

    #[test]
    fn test_zero_size_sequences_must_be_empty() {
        let payload = to_payload(&Vec::<()>::new()).unwrap();
        assert_eq!(payload.as_bytes(), &[0, 0, 0, 0]);
        assert_eq!(from_payload::<Vec<()>>(payload).unwrap(), Vec::<()>::new());

        let err = to_payload(&vec![(), ()]).unwrap_err();
        assert!(matches!(err, RpcError::MalformedPayload(_)));
    }

    #[test]
    fn test_invalid_option_tag_rejected() {
        let err = from_payload::<Option<u8>>(Payload::from_bytes(vec![5, 1])).unwrap_err();
        assert!(matches!(err, RpcError::MalformedPayload(_)));
    }

    #[test]
    fn test_array_truncation() {
        let err = from_payload::<[u32; 2]>(Payload::from_bytes(vec![0; 7])).unwrap_err();
        assert!(matches!(err, RpcError::TruncatedPayload { needed: 8, remaining: 7 }));
    }

    #[test]
    fn test_min_wire_sizes() {
        assert_eq!(<(i32, i32)>::MIN_WIRE_SIZE, 8);
        assert_eq!(<(String, Option<u8>)>::MIN_WIRE_SIZE, 5);
        assert_eq!(<[u16; 3]>::MIN_WIRE_SIZE, 6);
        assert_eq!(<()>::MIN_WIRE_SIZE, 0);
    }
}
