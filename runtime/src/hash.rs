//! Stable digests of scalar arrays.
//!
//! Arrays are reported as a single hash value rather than element by
//! element, so that snapshots of large buffers stay comparable across runs
//! without drowning the log. The digest is an equivalence check, not a
//! cryptographic hash.
//!
//! The fold is `acc := 31*acc + encode(element)` with `acc0 = 1` per row,
//! and rows of an N-dimensional array are summed. `encode` is the identity
//! for integer formats (truncated to 32 bits); floating-point values are
//! truncated to an integer first and, when non-zero, scaled by
//! [`FP_PRECISION`]. Zero-valued elements always contribute 0.

use std::ffi::c_void;

use crate::table::Format;

/// Scale factor applied to (the integer part of) floating-point elements
pub const FP_PRECISION: i32 = 100;

/// The contribution of the `index`th element of `base` under `format`.
///
/// # Safety
///
/// `base` must point to at least `index + 1` readable elements of the size
/// implied by `format`.
unsafe fn element(base: *const c_void, index: isize, format: Format) -> i32 {
    unsafe {
        match format {
            Format::Double => {
                let truncated = (base as *const f64).offset(index).read_unaligned() as i32;
                if truncated == 0 {
                    0
                } else {
                    truncated.wrapping_mul(FP_PRECISION)
                }
            }
            Format::Float => {
                let truncated = (base as *const f32).offset(index).read_unaligned() as i32;
                if truncated == 0 {
                    0
                } else {
                    truncated.wrapping_mul(FP_PRECISION)
                }
            }
            Format::Short => (base as *const i16).offset(index).read_unaligned() as i32,
            Format::Long | Format::LongLong => {
                (base as *const i64).offset(index).read_unaligned() as i32
            }
            Format::Int => (base as *const i32).offset(index).read_unaligned(),
            Format::Char => (base as *const i8).offset(index).read_unaligned() as i32,
            Format::UChar => (base as *const u8).offset(index).read_unaligned() as i32,
            Format::UShort => (base as *const u16).offset(index).read_unaligned() as i32,
            Format::ULong | Format::ULongLong => {
                (base as *const u64).offset(index).read_unaligned() as i32
            }
            Format::UInt => (base as *const u32).offset(index).read_unaligned() as i32,
            // Callers guarantee a scalar format
            _ => 0,
        }
    }
}

/// Digest of a one-dimensional scalar array of `size` elements.
///
/// # Safety
///
/// `array` must point to at least `size` readable elements of the size
/// implied by `format`.
pub unsafe fn compute_hashcode_1d(array: *const c_void, size: i64, format: Format) -> i32 {
    let mut hashcode: i32 = 1;
    for i in 0..size.max(0) {
        let contribution = unsafe { element(array, i as isize, format) };
        hashcode = hashcode.wrapping_mul(31).wrapping_add(contribution);
    }
    hashcode
}

/// Digest of an N-dimensional scalar array: the sum of the row digests,
/// where `step` is the length of the innermost dimension and
/// `total_elements` the element count across all dimensions.
///
/// # Safety
///
/// `array` must point to at least `total_elements` readable elements of the
/// size implied by `format`.
pub unsafe fn compute_hashcode(
    array: *const c_void,
    total_elements: i64,
    step: i64,
    format: Format,
) -> i32 {
    if !format.is_scalar() {
        log::warn!(target: "inspect", "not an array of a scalar type: {format:?}");
        return 0;
    }
    if step <= 0 {
        return 0;
    }
    let element_size = format.size_in_bytes() as isize;
    let mut hashcode: i32 = 0;
    let mut i: i64 = 0;
    while i < total_elements {
        let row = unsafe { array.byte_offset(i as isize * element_size) };
        let row_hash = unsafe { compute_hashcode_1d(row, step, format) };
        hashcode = hashcode.wrapping_add(row_hash);
        i += step;
    }
    hashcode
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn hash_ints(values: &[i32]) -> i32 {
        unsafe {
            compute_hashcode(
                values.as_ptr() as *const c_void,
                values.len() as i64,
                values.len() as i64,
                Format::Int,
            )
        }
    }

    #[test]
    fn zero_elements_contribute_zero() {
        // fold of [0, 0, 0] is 31^3 + 0 + 0 + 0
        let zeros = [0i32; 3];
        assert_eq!(hash_ints(&zeros), 31i32.wrapping_mul(31).wrapping_mul(31));
    }

    #[test]
    fn matches_the_reference_fold() {
        let values = [1i32, 2, 3, 4];
        let mut expected: i32 = 1;
        for v in values {
            expected = expected.wrapping_mul(31).wrapping_add(v);
        }
        assert_eq!(hash_ints(&values), expected);
    }

    #[test]
    fn rows_are_summed_for_multidimensional_arrays() {
        // A 2x3 matrix hashed with step 3 equals the sum of its row hashes
        let matrix = [1i32, 2, 3, 10, 20, 30];
        let whole = unsafe {
            compute_hashcode(matrix.as_ptr() as *const c_void, 6, 3, Format::Int)
        };
        let row0 = unsafe {
            compute_hashcode_1d(matrix[..3].as_ptr() as *const c_void, 3, Format::Int)
        };
        let row1 = unsafe {
            compute_hashcode_1d(matrix[3..].as_ptr() as *const c_void, 3, Format::Int)
        };
        assert_eq!(whole, row0.wrapping_add(row1));
    }

    #[test]
    fn float_elements_truncate_then_scale() {
        let values = [2.75f64, 0.25, -3.5];
        let hash = unsafe {
            compute_hashcode(values.as_ptr() as *const c_void, 3, 3, Format::Double)
        };
        // encode(2.75) = 200, encode(0.25) = 0, encode(-3.5) = -300
        let mut expected: i32 = 1;
        for contribution in [200, 0, -300] {
            expected = expected.wrapping_mul(31).wrapping_add(contribution);
        }
        assert_eq!(hash, expected);
    }

    #[test]
    fn unsigned_formats_truncate_to_32_bits() {
        let values = [u64::MAX, 7];
        let hash = unsafe {
            compute_hashcode(values.as_ptr() as *const c_void, 2, 2, Format::ULongLong)
        };
        let mut expected: i32 = 1;
        for contribution in [-1i32, 7] {
            expected = expected.wrapping_mul(31).wrapping_add(contribution);
        }
        assert_eq!(hash, expected);
    }

    #[test]
    fn non_scalar_format_yields_zero() {
        let values = [1i32, 2];
        let hash = unsafe {
            compute_hashcode(values.as_ptr() as *const c_void, 2, 2, Format::Pointer)
        };
        assert_eq!(hash, 0);
    }

    proptest! {
        #[test]
        fn digest_is_pure(values in prop::collection::vec(any::<i32>(), 0..64)) {
            prop_assert_eq!(hash_ints(&values), hash_ints(&values));
        }

        #[test]
        fn one_row_digest_equals_1d(values in prop::collection::vec(any::<i32>(), 1..32)) {
            let nd = hash_ints(&values);
            let od = unsafe {
                compute_hashcode_1d(
                    values.as_ptr() as *const c_void,
                    values.len() as i64,
                    Format::Int,
                )
            };
            prop_assert_eq!(nd, od);
        }
    }
}
