//! # Value Streams
//!
//! The byte codec every replicated value and RPC argument goes through.
//!
//! ## Design
//!
//! - Little-endian fixed width scalars, no tags, no padding
//! - Strings and sequences carry a `u32` length prefix, nothing else does
//! - A new value type is added by implementing [`Streamable`] once; property
//!   bindings and RPC arguments pick it up through [`read`] / [`write`]
//!
//! The schema (a `RepLayout` built identically on both ends) is the framing:
//! a stream of values carries no field ids.

use bytemuck::{bytes_of, Pod as BytemuckPod};
use thiserror::Error;

/// Upper bound on a decoded sequence length.
pub const MAX_SEQUENCE_LEN: usize = 1 << 20;

/// Errors raised while decoding a stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The buffer ended before the value was complete.
    #[error("unexpected end of stream: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd {
        /// Bytes the value needed.
        needed: usize,
        /// Bytes that were left.
        remaining: usize,
    },

    /// The bytes do not encode a valid value of the type.
    #[error("invalid {ty} value: {value}")]
    InvalidValue {
        /// Name of the type being decoded.
        ty: &'static str,
        /// The offending raw value.
        value: u64,
    },

    /// A string was not valid UTF-8.
    #[error("string is not valid utf-8")]
    InvalidUtf8,

    /// A sequence length prefix exceeded [`MAX_SEQUENCE_LEN`].
    #[error("sequence length {0} exceeds limit")]
    LengthOverflow(usize),
}

/// Growable output buffer.
#[derive(Clone, Debug, Default)]
pub struct Writer {
    buffer: Vec<u8>,
}

impl Writer {
    /// Creates an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Creates a writer with preallocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns a slice of the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer, returning its bytes.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    /// Resets the writer for reuse, keeping its allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes raw bytes with no length prefix.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a `Pod` type directly.
    #[inline]
    pub fn write_pod<T: BytemuckPod>(&mut self, value: &T) {
        self.buffer.extend_from_slice(bytes_of(value));
    }

    /// Writes a sequence length prefix.
    #[inline]
    pub fn write_len(&mut self, len: usize) {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        self.write_bytes(&len.to_le_bytes());
    }
}

/// Cursor over an input buffer.
#[derive(Clone, Debug)]
pub struct Reader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    /// Creates a new reader from a buffer.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Returns true if every byte has been consumed.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Reads exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Fails if fewer than `len` bytes remain.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], StreamError> {
        if len > self.remaining() {
            return Err(StreamError::UnexpectedEnd {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Reads a fixed size byte array.
    ///
    /// # Errors
    ///
    /// Fails if fewer than `N` bytes remain.
    #[inline]
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Reads a single byte.
    ///
    /// # Errors
    ///
    /// Fails at the end of the buffer.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads a `Pod` type directly.
    ///
    /// # Errors
    ///
    /// Fails if the buffer is too short.
    #[inline]
    pub fn read_pod<T: BytemuckPod>(&mut self) -> Result<T, StreamError> {
        let slice = self.read_bytes(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(slice))
    }

    /// Reads a sequence length prefix.
    ///
    /// # Errors
    ///
    /// Fails if the prefix is truncated or exceeds [`MAX_SEQUENCE_LEN`].
    #[inline]
    pub fn read_len(&mut self) -> Result<usize, StreamError> {
        let len = u32::from_le_bytes(self.read_array()?) as usize;
        if len > MAX_SEQUENCE_LEN {
            return Err(StreamError::LengthOverflow(len));
        }
        Ok(len)
    }

    /// Consumes and returns everything left in the buffer.
    #[inline]
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buffer[self.position.min(self.buffer.len())..];
        self.position = self.buffer.len();
        slice
    }
}

/// A value that can be written to and read from a stream.
///
/// Implemented once per value type; every property binding style and every
/// RPC argument list uses the same implementation.
pub trait Streamable: Sized {
    /// Appends this value to the writer.
    fn write(&self, out: &mut Writer);

    /// Decodes a value from the reader.
    ///
    /// # Errors
    ///
    /// Fails if the bytes are truncated or invalid for the type.
    fn read(input: &mut Reader<'_>) -> Result<Self, StreamError>;
}

/// Writes one value.
#[inline]
pub fn write<T: Streamable>(out: &mut Writer, value: &T) {
    value.write(out);
}

/// Reads one value.
///
/// # Errors
///
/// Fails if the bytes are truncated or invalid for `T`.
#[inline]
pub fn read<T: Streamable>(input: &mut Reader<'_>) -> Result<T, StreamError> {
    T::read(input)
}

/// Encodes a single value into a fresh buffer.
#[must_use]
pub fn to_bytes<T: Streamable>(value: &T) -> Vec<u8> {
    let mut out = Writer::new();
    value.write(&mut out);
    out.into_inner()
}

/// Decodes a single value that must span the whole buffer.
///
/// # Errors
///
/// Fails if decoding fails or bytes are left over.
pub fn from_bytes<T: Streamable>(bytes: &[u8]) -> Result<T, StreamError> {
    let mut input = Reader::new(bytes);
    let value = T::read(&mut input)?;
    if !input.is_empty() {
        return Err(StreamError::InvalidValue {
            ty: "trailing bytes",
            value: input.remaining() as u64,
        });
    }
    Ok(value)
}

macro_rules! impl_streamable_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Streamable for $ty {
                #[inline]
                fn write(&self, out: &mut Writer) {
                    out.write_bytes(&self.to_le_bytes());
                }

                #[inline]
                fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
                    Ok(<$ty>::from_le_bytes(input.read_array()?))
                }
            }
        )*
    };
}

impl_streamable_scalar!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl Streamable for bool {
    #[inline]
    fn write(&self, out: &mut Writer) {
        out.write_u8(u8::from(*self));
    }

    #[inline]
    fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
        match input.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(StreamError::InvalidValue {
                ty: "bool",
                value: u64::from(other),
            }),
        }
    }
}

impl Streamable for String {
    fn write(&self, out: &mut Writer) {
        out.write_len(self.len());
        out.write_bytes(self.as_bytes());
    }

    fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
        let len = input.read_len()?;
        let bytes = input.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| StreamError::InvalidUtf8)
    }
}

/// A decoded length larger than the bytes left is rejected before any element
/// is read. Zero-sized elements are held to the same bound.
impl<T: Streamable> Streamable for Vec<T> {
    fn write(&self, out: &mut Writer) {
        out.write_len(self.len());
        for item in self {
            item.write(out);
        }
    }

    fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
        let len = input.read_len()?;
        if len > input.remaining() {
            return Err(StreamError::LengthOverflow(len));
        }
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::read(input)?);
        }
        Ok(items)
    }
}

impl<T: Streamable> Streamable for Option<T> {
    fn write(&self, out: &mut Writer) {
        match self {
            Some(value) => {
                out.write_u8(1);
                value.write(out);
            }
            None => out.write_u8(0),
        }
    }

    fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
        match input.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::read(input)?)),
            other => Err(StreamError::InvalidValue {
                ty: "option tag",
                value: u64::from(other),
            }),
        }
    }
}

impl<T: Streamable + Copy + Default, const N: usize> Streamable for [T; N] {
    fn write(&self, out: &mut Writer) {
        for item in self {
            item.write(out);
        }
    }

    fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
        let mut items = [T::default(); N];
        for item in &mut items {
            *item = T::read(input)?;
        }
        Ok(items)
    }
}

macro_rules! impl_streamable_tuple {
    ($($name:ident),*) => {
        impl<$($name: Streamable),*> Streamable for ($($name,)*) {
            #[allow(non_snake_case, unused_variables)]
            fn write(&self, out: &mut Writer) {
                let ($($name,)*) = self;
                $($name.write(out);)*
            }

            #[allow(unused_variables)]
            fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
                Ok(($($name::read(input)?,)*))
            }
        }
    };
}

impl_streamable_tuple!();
impl_streamable_tuple!(A);
impl_streamable_tuple!(A, B);
impl_streamable_tuple!(A, B, C);
impl_streamable_tuple!(A, B, C, D);
impl_streamable_tuple!(A, B, C, D, E);
impl_streamable_tuple!(A, B, C, D, E, F);

/// Adapter streaming any `bytemuck::Pod` value as its raw bytes.
///
/// Useful for plain data structs that already derive `Pod`:
///
/// ```rust
/// use replica_net::stream::{self, Pod};
///
/// let bytes = stream::to_bytes(&Pod([1.0f32, 2.0, 3.0]));
/// assert_eq!(bytes.len(), 12);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Pod<T>(pub T);

impl<T: BytemuckPod> Streamable for Pod<T> {
    #[inline]
    fn write(&self, out: &mut Writer) {
        out.write_pod(&self.0);
    }

    #[inline]
    fn read(input: &mut Reader<'_>) -> Result<Self, StreamError> {
        input.read_pod().map(Pod)
    }
}
