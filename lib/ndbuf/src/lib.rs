// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dtype-tagged 1-D sample buffers.
//!
//! An [`NdArray`] is the unit of payload moved through the message queue:
//! a raw byte buffer tagged with an element dtype, a used length and a
//! capacity. Arrays either own their storage or borrow it as a read-only
//! view; a view is what a producer wraps around an existing sample buffer
//! to publish it without copying.
//!
//! The invariants carried by every array:
//!
//! - `len() * dtype.size() <= bufsize()`
//! - the dtype is fixed for the lifetime of the data (only
//!   [`NdArray::reset`] — used when a receiver adopts an incoming
//!   message's type — may change it, and it empties the array)
//! - a view never outlives its backing buffer (enforced by the borrow)

use num_derive::FromPrimitive;

/// Element type of an [`NdArray`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Dtype {
    U8 = 0,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    Bool,
}

impl Dtype {
    /// Size of a single element in bytes.
    pub const fn size(self) -> usize {
        match self {
            Dtype::U8 | Dtype::I8 | Dtype::Bool => 1,
            Dtype::U16 | Dtype::I16 => 2,
            Dtype::U32 | Dtype::I32 | Dtype::F32 => 4,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum NdError {
    Failed = 1,
    BadArg,
}

mod private {
    pub trait Sealed {}
}

/// Rust scalar types that have a [`Dtype`] representation. Elements are
/// stored in native byte order and read back without any alignment
/// requirement on the backing buffer.
pub trait Element: private::Sealed + Copy {
    const DTYPE: Dtype;
    fn store(self, out: &mut [u8]);
    fn load(raw: &[u8]) -> Self;
}

macro_rules! element {
    ($t:ty, $d:expr) => {
        impl private::Sealed for $t {}
        impl Element for $t {
            const DTYPE: Dtype = $d;
            fn store(self, out: &mut [u8]) {
                out[..core::mem::size_of::<$t>()]
                    .copy_from_slice(&self.to_ne_bytes());
            }
            fn load(raw: &[u8]) -> Self {
                let mut b = [0u8; core::mem::size_of::<$t>()];
                b.copy_from_slice(&raw[..core::mem::size_of::<$t>()]);
                <$t>::from_ne_bytes(b)
            }
        }
    };
}

element!(u8, Dtype::U8);
element!(i8, Dtype::I8);
element!(u16, Dtype::U16);
element!(i16, Dtype::I16);
element!(u32, Dtype::U32);
element!(i32, Dtype::I32);
element!(f32, Dtype::F32);

impl private::Sealed for bool {}
impl Element for bool {
    const DTYPE: Dtype = Dtype::Bool;
    fn store(self, out: &mut [u8]) {
        out[0] = self as u8;
    }
    fn load(raw: &[u8]) -> Self {
        raw[0] != 0
    }
}

enum Storage<'a> {
    Owned(Vec<u8>),
    View(&'a [u8]),
}

impl Storage<'_> {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v,
            Storage::View(s) => s,
        }
    }
}

pub struct NdArray<'a> {
    dtype: Dtype,
    len: usize,
    buf: Storage<'a>,
}

impl NdArray<'static> {
    /// An owned, zero-length array with room for `capacity` elements.
    pub fn empty(dtype: Dtype, capacity: usize) -> Self {
        NdArray {
            dtype,
            len: 0,
            buf: Storage::Owned(vec![0; capacity * dtype.size()]),
        }
    }

    /// An owned array of `len` zeroed elements.
    pub fn zeroed(dtype: Dtype, len: usize) -> Self {
        NdArray {
            dtype,
            len,
            buf: Storage::Owned(vec![0; len * dtype.size()]),
        }
    }

    /// An owned array holding a copy of `elems`.
    pub fn from_elems<T: Element>(elems: &[T]) -> Self {
        let mut a = NdArray::empty(T::DTYPE, elems.len());
        for &e in elems {
            // Capacity matches by construction.
            let _ = a.push(e);
        }
        a
    }
}

impl<'a> NdArray<'a> {
    /// Borrows `buf` as a read-only array of `len` elements. The buffer
    /// must hold at least `len` elements; extra bytes count towards the
    /// capacity reported to readers.
    pub fn view(
        dtype: Dtype,
        len: usize,
        buf: &'a [u8],
    ) -> Result<NdArray<'a>, NdError> {
        if buf.len() < len * dtype.size() {
            return Err(NdError::BadArg);
        }
        Ok(NdArray {
            dtype,
            len,
            buf: Storage::View(buf),
        })
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Used length in elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Capacity in elements at the current dtype.
    pub fn capacity(&self) -> usize {
        self.buf.bytes().len() / self.dtype.size()
    }

    /// Allocated (or borrowed) size in bytes.
    pub fn bufsize(&self) -> usize {
        self.buf.bytes().len()
    }

    fn is_view(&self) -> bool {
        matches!(self.buf, Storage::View(_))
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.buf {
            Storage::Owned(v) => v,
            // Callers gate on is_view() first.
            Storage::View(_) => unreachable!(),
        }
    }

    /// The used portion of the backing buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf.bytes()[..self.len * self.dtype.size()]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Sets the used length without touching the data. Fails past the
    /// capacity.
    pub fn set_len(&mut self, len: usize) -> Result<(), NdError> {
        if len > self.capacity() {
            return Err(NdError::BadArg);
        }
        self.len = len;
        Ok(())
    }

    /// Re-tags the array with a new dtype and empties it, keeping the
    /// storage. Receivers use this to adopt the dtype of an incoming
    /// message before appending its data.
    pub fn reset(&mut self, dtype: Dtype) -> Result<(), NdError> {
        if self.is_view() {
            return Err(NdError::BadArg);
        }
        self.dtype = dtype;
        self.len = 0;
        Ok(())
    }

    /// Appends as many elements of `src` as fit, returning how many were
    /// copied. Dtypes must match.
    pub fn append(&mut self, src: &NdArray<'_>) -> Result<usize, NdError> {
        if self.is_view() {
            return Err(NdError::BadArg);
        }
        if src.dtype != self.dtype {
            return Err(NdError::BadArg);
        }
        let ds = self.dtype.size();
        let n = src.len.min(self.capacity() - self.len);
        let at = self.len * ds;
        self.bytes_mut()[at..at + n * ds]
            .copy_from_slice(&src.as_bytes()[..n * ds]);
        self.len += n;
        Ok(n)
    }

    /// Appends a single element. Fails with `Failed` when full.
    pub fn push<T: Element>(&mut self, value: T) -> Result<(), NdError> {
        if self.is_view() || T::DTYPE != self.dtype {
            return Err(NdError::BadArg);
        }
        if self.len == self.capacity() {
            return Err(NdError::Failed);
        }
        let ds = self.dtype.size();
        let at = self.len * ds;
        value.store(&mut self.bytes_mut()[at..at + ds]);
        self.len += 1;
        Ok(())
    }

    /// Checked element copy from another array into the used region.
    pub fn copy_from(
        &mut self,
        dst_off: usize,
        src: &NdArray<'_>,
        src_off: usize,
        n: usize,
    ) -> Result<(), NdError> {
        if self.is_view() || src.dtype != self.dtype {
            return Err(NdError::BadArg);
        }
        if dst_off + n > self.len || src_off + n > src.len {
            return Err(NdError::BadArg);
        }
        let ds = self.dtype.size();
        self.bytes_mut()[dst_off * ds..(dst_off + n) * ds]
            .copy_from_slice(&src.as_bytes()[src_off * ds..(src_off + n) * ds]);
        Ok(())
    }

    /// Moves `n` elements from `src_off` to `dst_off` within the used
    /// region. Overlapping ranges are safe (memmove semantics).
    pub fn move_within(
        &mut self,
        dst_off: usize,
        src_off: usize,
        n: usize,
    ) -> Result<(), NdError> {
        if self.is_view() {
            return Err(NdError::BadArg);
        }
        if dst_off + n > self.len || src_off + n > self.len {
            return Err(NdError::BadArg);
        }
        let ds = self.dtype.size();
        self.bytes_mut()
            .copy_within(src_off * ds..(src_off + n) * ds, dst_off * ds);
        Ok(())
    }

    /// Zeroes the used region without changing the length.
    pub fn zero(&mut self) -> Result<(), NdError> {
        if self.is_view() {
            return Err(NdError::BadArg);
        }
        let used = self.len * self.dtype.size();
        self.bytes_mut()[..used].fill(0);
        Ok(())
    }

    /// Elementwise square root; `F32` arrays only.
    pub fn sqrt(&mut self) -> Result<(), NdError> {
        if self.is_view() || self.dtype != Dtype::F32 {
            return Err(NdError::BadArg);
        }
        for i in 0..self.len {
            let v: f32 = self.get(i);
            self.set(i, v.sqrt());
        }
        Ok(())
    }

    /// Typed element read. Panics on a dtype mismatch or an
    /// out-of-bounds index, like slice indexing.
    pub fn get<T: Element>(&self, i: usize) -> T {
        assert_eq!(T::DTYPE, self.dtype);
        assert!(i < self.len);
        let ds = self.dtype.size();
        T::load(&self.buf.bytes()[i * ds..(i + 1) * ds])
    }

    /// Typed element write; same panic rules as [`NdArray::get`].
    pub fn set<T: Element>(&mut self, i: usize, value: T) {
        assert_eq!(T::DTYPE, self.dtype);
        assert!(i < self.len);
        assert!(!self.is_view());
        let ds = self.dtype.size();
        value.store(&mut self.bytes_mut()[i * ds..(i + 1) * ds]);
    }

    /// Element `i` widened to `f32`, whatever the dtype. This is what
    /// the numeric transform nodes run their arithmetic on.
    pub fn to_f32(&self, i: usize) -> f32 {
        assert!(i < self.len);
        let ds = self.dtype.size();
        let raw = &self.buf.bytes()[i * ds..(i + 1) * ds];
        match self.dtype {
            Dtype::U8 => f32::from(u8::load(raw)),
            Dtype::I8 => f32::from(i8::load(raw)),
            Dtype::U16 => f32::from(u16::load(raw)),
            Dtype::I16 => f32::from(i16::load(raw)),
            Dtype::U32 => u32::load(raw) as f32,
            Dtype::I32 => i32::load(raw) as f32,
            Dtype::F32 => f32::load(raw),
            Dtype::Bool => {
                if bool::load(raw) {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn dsize_table() {
        assert_eq!(Dtype::U8.size(), 1);
        assert_eq!(Dtype::I16.size(), 2);
        assert_eq!(Dtype::F32.size(), 4);
        assert_eq!(Dtype::Bool.size(), 1);
    }

    #[test]
    fn append_fills_to_len() {
        let mut a = NdArray::empty(Dtype::I16, 8);
        for i in 0..8i16 {
            a.push(i).unwrap();
        }
        assert_eq!(a.len(), 8);
        assert_eq!(a.push(9i16), Err(NdError::Failed));
        for i in 0..8 {
            assert_eq!(a.get::<i16>(i), i as i16);
        }
    }

    #[test]
    fn append_past_capacity_is_short() {
        let mut dst = NdArray::empty(Dtype::U8, 4);
        let src = NdArray::from_elems(&[1u8, 2, 3, 4, 5, 6]);
        assert_eq!(dst.append(&src), Ok(4));
        assert_eq!(dst.len(), 4);
        assert_eq!(dst.append(&src), Ok(0));
    }

    #[test]
    fn append_dtype_mismatch() {
        let mut dst = NdArray::empty(Dtype::F32, 4);
        let src = NdArray::from_elems(&[1u8]);
        assert_eq!(dst.append(&src), Err(NdError::BadArg));
    }

    #[test]
    fn move_within_overlapping() {
        let mut a = NdArray::from_elems(&[0i16, 1, 2, 3, 4, 5, 6, 7]);
        // Shift left by 3, the FIFO idiom.
        a.move_within(0, 3, 5).unwrap();
        let head: Vec<i16> = (0..5).map(|i| a.get::<i16>(i)).collect();
        assert_eq!(head, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn views_are_read_only() {
        let backing = [1u8, 0, 2, 0];
        let mut v = NdArray::view(Dtype::U16, 2, &backing).unwrap();
        assert_eq!(v.get::<u16>(0), 1);
        assert_eq!(v.get::<u16>(1), 2);
        assert_eq!(v.push(3u16), Err(NdError::BadArg));
        assert_eq!(v.zero(), Err(NdError::BadArg));
    }

    #[test]
    fn view_too_small() {
        let backing = [0u8; 3];
        assert!(NdArray::view(Dtype::U16, 2, &backing).is_err());
    }

    #[test]
    fn sqrt_f32_only() {
        let mut a = NdArray::from_elems(&[4.0f32, 9.0, 16.0]);
        a.sqrt().unwrap();
        assert_eq!(a.get::<f32>(0), 2.0);
        assert_eq!(a.get::<f32>(2), 4.0);

        let mut b = NdArray::from_elems(&[4i32]);
        assert_eq!(b.sqrt(), Err(NdError::BadArg));
    }

    #[test]
    fn reset_keeps_storage() {
        let mut a = NdArray::empty(Dtype::U8, 8);
        a.push(1u8).unwrap();
        a.reset(Dtype::U16).unwrap();
        assert_eq!(a.len(), 0);
        assert_eq!(a.capacity(), 4);
        assert_eq!(a.bufsize(), 8);
    }

    proptest! {
        #[test]
        fn prop_append_counts(len in 0usize..32, cap in 0usize..32) {
            let src = NdArray::from_elems(
                &(0..len as i32).collect::<Vec<_>>(),
            );
            let mut dst = NdArray::empty(Dtype::I32, cap);
            let n = dst.append(&src).unwrap();
            prop_assert_eq!(n, len.min(cap));
            prop_assert_eq!(dst.len(), n);
            for i in 0..n {
                prop_assert_eq!(dst.get::<i32>(i), i as i32);
            }
        }

        #[test]
        fn prop_move_preserves(
            len in 1usize..32,
            src_off in 0usize..32,
            n in 0usize..32,
        ) {
            let src_off = src_off % len;
            let n = n % (len - src_off).max(1);
            let mut a = NdArray::from_elems(
                &(0..len as u16).collect::<Vec<_>>(),
            );
            let expect: Vec<u16> =
                (src_off..src_off + n).map(|i| i as u16).collect();
            a.move_within(0, src_off, n).unwrap();
            let got: Vec<u16> = (0..n).map(|i| a.get::<u16>(i)).collect();
            prop_assert_eq!(got, expect);
        }
    }
}
