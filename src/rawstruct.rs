use super::s11n::{BeginRequestBody, EndRequestBody, FastcgiRecordHeader};

use std::mem::size_of;
use std::ptr;
use std::slice;

/// Marker for the packed on-wire structs.
///
/// # Safety
/// Implementors must be `#[repr(C, packed)]`, contain no padding, and be valid for any bit
/// pattern.
pub unsafe trait RawStruct: Copy {}

unsafe impl RawStruct for FastcgiRecordHeader {}
unsafe impl RawStruct for BeginRequestBody {}
unsafe impl RawStruct for EndRequestBody {}

/// Return a slice of the bytes in the given struct.
pub fn as_bytes<T: RawStruct>(x: &T) -> &[u8] {
    unsafe { slice::from_raw_parts(x as *const T as *const u8, size_of::<T>()) }
}

/// Copy a struct out of the front of a byte slice, or `None` if the slice is too short.
pub fn from_bytes<T: RawStruct>(bytes: &[u8]) -> Option<T> {
    if bytes.len() < size_of::<T>() {
        return None;
    }
    Some(unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) })
}
