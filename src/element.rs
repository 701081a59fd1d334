//! Purpose: Fixed-width wire encoding for elements stored in shared slots.
//! Exports: `Element` plus impls for scalar fundamentals and arrays thereof.
//! Role: Codec seam between user types and the byte cells of a shared
//! segment; the in-process flavor never encodes.
//! Invariants: `decode(encode(x)) == x`; the wire length is a constant per
//! type and equals the slot cell size.
use crate::error::{Error, ErrorKind};

/// A value that can live in a shared-memory slot.
///
/// `encode` must fill exactly `WIRE_LEN` bytes; callers hand it a cell of
/// that size. User types implement this by hand; fundamentals and arrays of
/// fundamentals are covered here and keep `IS_FUNDAMENTAL` raised, which
/// makes raw-cell access refuse them.
pub trait Element: Sized {
    const WIRE_LEN: usize;
    const IS_FUNDAMENTAL: bool = false;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Result<Self, Error>;
}

macro_rules! scalar_element {
    ($($ty:ty),* $(,)?) => {$(
        impl Element for $ty {
            const WIRE_LEN: usize = std::mem::size_of::<$ty>();
            const IS_FUNDAMENTAL: bool = true;

            fn encode(&self, buf: &mut [u8]) {
                buf[..Self::WIRE_LEN].copy_from_slice(&self.to_le_bytes());
            }

            fn decode(buf: &[u8]) -> Result<Self, Error> {
                if buf.len() < Self::WIRE_LEN {
                    return Err(
                        Error::new(ErrorKind::Corrupt).with_message("element cell too small")
                    );
                }
                let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                bytes.copy_from_slice(&buf[..Self::WIRE_LEN]);
                Ok(<$ty>::from_le_bytes(bytes))
            }
        }
    )*};
}

scalar_element!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl Element for bool {
    const WIRE_LEN: usize = 1;
    const IS_FUNDAMENTAL: bool = true;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = u8::from(*self);
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        match buf.first().copied() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(Error::new(ErrorKind::Corrupt).with_message("invalid boolean cell")),
        }
    }
}

impl<T: Element, const N: usize> Element for [T; N] {
    const WIRE_LEN: usize = T::WIRE_LEN * N;
    const IS_FUNDAMENTAL: bool = T::IS_FUNDAMENTAL;

    fn encode(&self, buf: &mut [u8]) {
        for (item, cell) in self.iter().zip(buf.chunks_exact_mut(T::WIRE_LEN)) {
            item.encode(cell);
        }
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < Self::WIRE_LEN {
            return Err(Error::new(ErrorKind::Corrupt).with_message("element cell too small"));
        }
        let mut items = Vec::with_capacity(N);
        for cell in buf[..Self::WIRE_LEN].chunks_exact(T::WIRE_LEN) {
            items.push(T::decode(cell)?);
        }
        items
            .try_into()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("array length mismatch"))
    }
}
