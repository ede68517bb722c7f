//! Cast selection between IR value types.
//!
//! The liveness-repair machinery stores definitions with mixed IR types into
//! a single slot, and merge nodes require one common type; both paths need a
//! conversion that is valid for the pair of types at hand. [`valid_cast`]
//! mirrors the upstream IR's cast-opcode selection for unsigned operands:
//! bit-width changes widen with zero-extension, pointers convert through
//! integers, and floats convert by value. A `None` result means no valid
//! cast exists and the definition must be dropped.

use crate::{function::CastKind, types::Type};

/// Chooses the cast that converts a value of type `from` into type `to`,
/// or `None` when no conversion is valid
pub fn valid_cast(from: &Type, to: &Type) -> Option<CastKind> {
    use CastKind::*;

    if from == to {
        return Some(Bitcast);
    }

    match (from, to) {
        (f, t) if f.is_integer() && t.is_integer() => {
            let (fw, tw) = (f.bit_width().unwrap(), t.bit_width().unwrap());
            Some(if fw < tw {
                ZExt
            } else if fw > tw {
                Trunc
            } else {
                Bitcast
            })
        }
        (f, t) if f.is_integer() && t.is_pointer() => Some(IntToPtr),
        (f, t) if f.is_pointer() && t.is_integer() => Some(PtrToInt),
        (f, t) if f.is_pointer() && t.is_pointer() => Some(Bitcast),
        (f, t) if f.is_float() && t.is_integer() => Some(FpToInt),
        (f, t) if f.is_integer() && t.is_float() => Some(IntToFp),
        (Type::F32, Type::F64) => Some(FpExt),
        (Type::F64, Type::F32) => Some(FpTrunc),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_widening_is_zext() {
        assert_eq!(valid_cast(&Type::I16, &Type::I64), Some(CastKind::ZExt));
        assert_eq!(valid_cast(&Type::I64, &Type::I8), Some(CastKind::Trunc));
        assert_eq!(valid_cast(&Type::I32, &Type::U32), Some(CastKind::Bitcast));
    }

    #[test]
    fn pointer_casts() {
        let p = Type::pointer(Type::I32);
        let q = Type::pointer(Type::I8);
        assert_eq!(valid_cast(&p, &q), Some(CastKind::Bitcast));
        assert_eq!(valid_cast(&p, &Type::I64), Some(CastKind::PtrToInt));
        assert_eq!(valid_cast(&Type::I64, &q), Some(CastKind::IntToPtr));
    }

    #[test]
    fn aggregates_have_no_cast() {
        let arr = Type::array(Type::I32, 4);
        assert_eq!(valid_cast(&arr, &Type::I64), None);
        assert_eq!(valid_cast(&Type::F64, &arr), None);
    }
}
