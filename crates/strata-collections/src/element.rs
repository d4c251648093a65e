//! Fixed-size element encoding for heap-backed containers.
//!
//! Container storage is raw heap bytes, so an element type must be able
//! to write itself into a slot of exactly [`Element::SIZE`] bytes and read
//! itself back. An all-zero slot must decode to the type's zero value;
//! [`GrowableVector::resize`](crate::GrowableVector::resize) relies on it.

/// A plain value that can live in container storage.
///
/// Zero-sized encodings are rejected when the constant is evaluated, so
/// an empty byte array never reaches a container:
///
/// ```compile_fail
/// use strata_collections::Element;
///
/// const EMPTY: usize = <[u8; 0] as Element>::SIZE;
/// ```
pub trait Element: Copy {
    /// Bytes occupied by one element. Must be non-zero.
    const SIZE: usize;

    /// Encode into `out`, which is exactly `SIZE` bytes long.
    fn write_to(self, out: &mut [u8]);

    /// Decode from `bytes`, which is exactly `SIZE` bytes long.
    fn read_from(bytes: &[u8]) -> Self;
}

macro_rules! impl_element_for_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Element for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn write_to(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_ne_bytes());
                }

                #[inline]
                fn read_from(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_element_for_primitive!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

impl Element for bool {
    const SIZE: usize = 1;

    #[inline]
    fn write_to(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    #[inline]
    fn read_from(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

impl<const N: usize> Element for [u8; N] {
    const SIZE: usize = {
        assert!(N > 0, "a zero-length byte array cannot be a container element");
        N
    };

    #[inline]
    fn write_to(self, out: &mut [u8]) {
        out.copy_from_slice(&self);
    }

    #[inline]
    fn read_from(bytes: &[u8]) -> Self {
        let mut raw = [0u8; N];
        raw.copy_from_slice(bytes);
        raw
    }
}
