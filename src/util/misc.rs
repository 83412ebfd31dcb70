//! Helper functions

use core::fmt;

use num_traits::{PrimInt, FromBytes};

/// Check if `v` fits into a signed 12-bit immediate.
///
/// # Examples
///
/// ```
/// use ingot::util::misc::fits_into_12_bits;
///
/// assert!(fits_into_12_bits(0));
/// assert!(fits_into_12_bits(2047));
/// assert!(fits_into_12_bits(-2048));
/// assert!(!fits_into_12_bits(2048));
/// assert!(!fits_into_12_bits(-2049));
/// ```
#[inline(always)]
pub fn fits_into_12_bits<T: TryInto<i32>>(v: T) -> bool {
    const BOUND: i32 = 1 << (12 - 1);

    matches!{
        v.try_into(),
        Ok(v) if v >= -BOUND && v < BOUND
    }
}

/// Read a little-endian integer out of a byte slice.
#[track_caller]
#[inline(always)]
#[doc(alias = "lint")]
pub fn le_bytes_into_int<T>(bytes: &[u8]) -> T
where
    T: PrimInt + FromBytes,
    <T as FromBytes>::Bytes: Sized + for<'a> TryFrom<&'a [u8]>,
    for<'a> <<T as FromBytes>::Bytes as TryFrom<&'a [u8]>>::Error: fmt::Debug,
{
    let array: <T as FromBytes>::Bytes = bytes.try_into().expect("wrong length");
    T::from_le_bytes(&array)
}

/// Read the 32-bit instruction word stored at byte `offset`.
#[track_caller]
#[inline(always)]
pub fn word_at(bytes: &[u8], offset: usize) -> u32 {
    le_bytes_into_int::<u32>(&bytes[offset..offset + 4])
}

/// Overwrite the 32-bit instruction word stored at byte `offset`.
#[track_caller]
#[inline(always)]
pub fn set_word_at(bytes: &mut [u8], offset: usize, word: u32) {
    bytes[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
}

/// Sign-extend the low 12 bits of `v`.
///
/// ```
/// use ingot::util::misc::sext12;
///
/// assert_eq!(sext12(0x7FF), 2047);
/// assert_eq!(sext12(0x800), -2048);
/// assert_eq!(sext12(0xFFF), -1);
/// ```
#[inline(always)]
pub const fn sext12(v: i64) -> i32 {
    ((v as i32) << 20) >> 20
}
