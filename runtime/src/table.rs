//! The Type Table: the on-disk and in-memory catalogue of reified types.
//!
//! The wire format is the contract between the instrumenter and the runtime:
//! a sequence of descriptors, each `name[129]` followed by a little-endian
//! `i32` field count and that many fields of `name[129], format: i32,
//! offset: i32, base_type_index: i32`. There is no header and no count; the
//! descriptor count travels out-of-band (it is baked into the injected
//! initialisation call).

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::Error;

/// Maximum length of a serialised type or field name, excluding the NUL
pub const MAX_NAME_LENGTH: usize = 128;

/// How a field or element is interpreted when rendered.
///
/// The numeric codes are part of the Type Table's on-disk contract and must
/// not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Format {
    Double = 1,
    Float = 2,
    Short = 3,
    Long = 4,
    LongLong = 5,
    Int = 6,
    Char = 7,
    UChar = 8,
    UShort = 9,
    ULong = 10,
    ULongLong = 11,
    UInt = 12,
    Pointer = 13,
    Void = 14,
    /// An array of scalars, rendered as a stable hash
    ScalarArray = 15,
    Union = 16,
    /// A struct nested within another type
    Struct = 17,
    /// A value the engine could not classify
    NonInspectable = 18,
}

impl Format {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::Double,
            2 => Self::Float,
            3 => Self::Short,
            4 => Self::Long,
            5 => Self::LongLong,
            6 => Self::Int,
            7 => Self::Char,
            8 => Self::UChar,
            9 => Self::UShort,
            10 => Self::ULong,
            11 => Self::ULongLong,
            12 => Self::UInt,
            13 => Self::Pointer,
            14 => Self::Void,
            15 => Self::ScalarArray,
            16 => Self::Union,
            17 => Self::Struct,
            18 => Self::NonInspectable,
            _ => return None,
        })
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Formats 1 through 12 are the scalar set
    pub fn is_scalar(self) -> bool {
        (1..=12).contains(&self.code())
    }

    /// The in-memory size of one element of this format, in bytes
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::Char | Self::UChar => 1,
            Self::Short | Self::UShort => 2,
            Self::Float | Self::Int | Self::UInt => 4,
            Self::Double
            | Self::Long
            | Self::LongLong
            | Self::ULong
            | Self::ULongLong
            | Self::Pointer => 8,
            Self::Void | Self::ScalarArray | Self::Union | Self::Struct | Self::NonInspectable => 0,
        }
    }
}

/// A field within a type descriptor.
///
/// `offset` is overloaded by the wire format: for ordinary members it is the
/// byte offset within the containing type, for array descriptors it is the
/// element count, and for union-typed members it is the union's total byte
/// size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub format: Format,
    pub offset: i32,
    /// An index into the Type Table for pointer pointees, array descriptors
    /// and nested composites; otherwise a copy of the format code
    pub base_type_index: i32,
}

/// One reified type: a name plus at least one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    /// A descriptor with a single anonymous field, the encoding used for
    /// scalars, pointers, arrays, unions, enums and voids
    pub fn single(name: impl Into<String>, format: Format, offset: i32, base_type_index: i32) -> Self {
        Self {
            name: name.into(),
            fields: vec![FieldDescriptor {
                name: String::new(),
                format,
                offset,
                base_type_index,
            }],
        }
    }
}

fn write_name<W: Write>(w: &mut W, name: &str) -> std::io::Result<()> {
    debug_assert!(name.len() <= MAX_NAME_LENGTH);
    let mut buf = [0u8; MAX_NAME_LENGTH + 1];
    let len = name.len().min(MAX_NAME_LENGTH);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    w.write_all(&buf)
}

fn read_name<R: Read>(r: &mut R) -> std::io::Result<String> {
    let mut buf = [0u8; MAX_NAME_LENGTH + 1];
    r.read_exact(&mut buf)?;
    let len = buf.iter().position(|b| *b == 0).unwrap_or(MAX_NAME_LENGTH);
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

impl FieldDescriptor {
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        write_name(w, &self.name)?;
        w.write_i32::<LittleEndian>(self.format.code())?;
        w.write_i32::<LittleEndian>(self.offset)?;
        w.write_i32::<LittleEndian>(self.base_type_index)
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, Error> {
        let name = read_name(r)?;
        let code = r.read_i32::<LittleEndian>()?;
        let format = Format::from_code(code).ok_or(Error::InvalidFormat(code))?;
        let offset = r.read_i32::<LittleEndian>()?;
        let base_type_index = r.read_i32::<LittleEndian>()?;
        Ok(Self {
            name,
            format,
            offset,
            base_type_index,
        })
    }
}

impl TypeDescriptor {
    pub fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        write_name(w, &self.name)?;
        w.write_i32::<LittleEndian>(self.fields.len() as i32)?;
        for field in self.fields.iter() {
            field.write(w)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, Error> {
        let name = read_name(r)?;
        let quant_fields = r.read_i32::<LittleEndian>()?;
        if quant_fields < 1 {
            return Err(Error::InvalidFieldCount(quant_fields));
        }
        let mut fields = Vec::with_capacity(quant_fields as usize);
        for _ in 0..quant_fields {
            fields.push(FieldDescriptor::read(r)?);
        }
        Ok(Self { name, fields })
    }
}

/// The loaded Type Table. Immutable once read; indices are stable.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TypeTable {
    descriptors: Vec<TypeDescriptor>,
}

impl TypeTable {
    pub fn from_descriptors(descriptors: Vec<TypeDescriptor>) -> Self {
        Self { descriptors }
    }

    /// Reads exactly `count` descriptors; a short read is fatal to the caller
    pub fn read<R: Read>(r: &mut R, count: usize) -> Result<Self, Error> {
        let mut descriptors = Vec::with_capacity(count);
        for _ in 0..count {
            descriptors.push(TypeDescriptor::read(r)?);
        }
        Ok(Self { descriptors })
    }

    pub fn get(&self, index: i32) -> Option<&TypeDescriptor> {
        usize::try_from(index).ok().and_then(|i| self.descriptors.get(i))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TypeTable {
        TypeTable::from_descriptors(vec![
            TypeDescriptor::single("int", Format::Int, 0, Format::Int.code()),
            TypeDescriptor::single("pointer to int", Format::Pointer, 0, 0),
            TypeDescriptor {
                name: "struct point".to_string(),
                fields: vec![
                    FieldDescriptor {
                        name: "x".to_string(),
                        format: Format::Int,
                        offset: 0,
                        base_type_index: Format::Int.code(),
                    },
                    FieldDescriptor {
                        name: "y".to_string(),
                        format: Format::Int,
                        offset: 4,
                        base_type_index: Format::Int.code(),
                    },
                ],
            },
        ])
    }

    #[test]
    fn round_trips_through_the_wire_format() {
        let table = sample_table();
        let mut bytes = Vec::new();
        for descriptor in table.descriptors.iter() {
            descriptor.write(&mut bytes).unwrap();
        }
        let loaded = TypeTable::read(&mut bytes.as_slice(), table.len()).unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn descriptor_layout_is_fixed_width() {
        let descriptor = TypeDescriptor::single("int", Format::Int, 0, 6);
        let mut bytes = Vec::new();
        descriptor.write(&mut bytes).unwrap();
        // name[129] + i32 + (name[129] + 3 * i32)
        assert_eq!(bytes.len(), 129 + 4 + 129 + 12);
        assert_eq!(&bytes[..3], b"int");
        // quant_fields, little-endian, right after the padded name
        assert_eq!(&bytes[129..133], &1i32.to_le_bytes());
    }

    #[test]
    fn short_read_is_an_error() {
        let table = sample_table();
        let mut bytes = Vec::new();
        table.descriptors[0].write(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(TypeTable::read(&mut bytes.as_slice(), 1).is_err());
    }

    #[test]
    fn scalar_format_set() {
        assert!(Format::Double.is_scalar());
        assert!(Format::UInt.is_scalar());
        assert!(!Format::Pointer.is_scalar());
        assert!(!Format::NonInspectable.is_scalar());
        assert_eq!(Format::from_code(19), None);
        assert_eq!(Format::from_code(0), None);
    }
}
