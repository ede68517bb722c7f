//! Type reification: lowering the debug-type graph into the Type Table.
//!
//! The walk assigns every meaningful debug type a dense, zero-based index in
//! iteration order and keeps a side table from debug handle to index, so
//! that field base-type references resolve by handle identity. Descriptors
//! are then serialised in the runtime's wire format.

use std::io::Write;

use rustc_hash::FxHashMap;
use whiro_ir::{
    debug::{ArrayBound, DebugInfo, DebugType, DebugTypeId},
    StructType, Type,
};
use whiro_runtime::{FieldDescriptor, Format, TypeDescriptor, MAX_NAME_LENGTH};

/// Truncates over-long names the way the wire format requires: 125 bytes of
/// the original plus `...`
pub fn truncate_name(name: &str) -> String {
    if name.len() > MAX_NAME_LENGTH {
        let mut truncated = name.as_bytes()[..MAX_NAME_LENGTH - 3].to_vec();
        truncated.extend_from_slice(b"...");
        String::from_utf8_lossy(&truncated).into_owned()
    } else {
        name.to_string()
    }
}

/// Whether a descriptor should be created for this debug type.
///
/// Struct members, pointers-to-members and subroutine types never get their
/// own descriptor; incomplete composites and variable-length arrays whose
/// outermost bound is not a constant are skipped as well.
pub fn should_process(debug: &DebugInfo, id: DebugTypeId) -> bool {
    match debug.ty(id) {
        DebugType::Basic { .. } => true,
        DebugType::Derived { tag, base, .. } => {
            if *tag == gimli::DW_TAG_member || *tag == gimli::DW_TAG_ptr_to_member_type {
                return false;
            }
            match base {
                Some(base) => should_process(debug, *base),
                None => true,
            }
        }
        DebugType::Composite {
            tag,
            members,
            bounds,
            ..
        } => {
            if *tag == gimli::DW_TAG_array_type {
                matches!(bounds.first(), Some(ArrayBound::Constant(_)))
            } else if *tag == gimli::DW_TAG_enumeration_type {
                true
            } else {
                !members.is_empty()
            }
        }
        DebugType::Subroutine => false,
    }
}

/// The report format of a debug type, derived from its DWARF encoding or
/// tag. Unclassifiable types reify as [`Format::NonInspectable`].
pub fn type_format(debug: &DebugInfo, id: Option<DebugTypeId>) -> Format {
    let Some(id) = id else {
        return Format::Void;
    };
    match debug.ty(id) {
        DebugType::Basic { name, encoding, .. } => match *encoding {
            gimli::DW_ATE_float => {
                if name == "double" {
                    Format::Double
                } else {
                    Format::Float
                }
            }
            gimli::DW_ATE_signed => match name.as_str() {
                "short" => Format::Short,
                "long int" => Format::Long,
                "long long int" => Format::LongLong,
                _ => Format::Int,
            },
            gimli::DW_ATE_signed_char => Format::Char,
            gimli::DW_ATE_unsigned_char => Format::UChar,
            gimli::DW_ATE_unsigned => match name.as_str() {
                "unsigned short" => Format::UShort,
                "long unsigned int" => Format::ULong,
                "long long unsigned int" => Format::ULongLong,
                _ => Format::UInt,
            },
            other => {
                log::debug!(target: "reify", "unknown base-type encoding {other} for {name}");
                Format::NonInspectable
            }
        },
        DebugType::Derived { tag, base, .. } => match *tag {
            gimli::DW_TAG_pointer_type => Format::Pointer,
            gimli::DW_TAG_typedef | gimli::DW_TAG_const_type | gimli::DW_TAG_member => {
                type_format(debug, *base)
            }
            other => {
                log::debug!(target: "reify", "unknown derived tag {other}");
                Format::NonInspectable
            }
        },
        DebugType::Composite { tag, .. } => match *tag {
            gimli::DW_TAG_array_type => Format::ScalarArray,
            gimli::DW_TAG_union_type => Format::Union,
            gimli::DW_TAG_structure_type => Format::Struct,
            gimli::DW_TAG_enumeration_type => Format::Int,
            other => {
                log::debug!(target: "reify", "unknown composite tag {other}");
                Format::NonInspectable
            }
        },
        DebugType::Subroutine => Format::NonInspectable,
    }
}

/// The complete report name of a debug type
pub fn make_type_name(debug: &DebugInfo, id: Option<DebugTypeId>) -> String {
    let Some(id) = id else {
        return "void".to_string();
    };
    match debug.ty(id) {
        DebugType::Basic { name, .. } => name.clone(),
        DebugType::Derived { tag, name, base, .. } => match *tag {
            gimli::DW_TAG_pointer_type => {
                format!("pointer to {}", make_type_name(debug, *base))
            }
            gimli::DW_TAG_const_type => format!("const {}", make_type_name(debug, *base)),
            gimli::DW_TAG_typedef => name.clone().unwrap_or_default(),
            _ => make_type_name(debug, *base),
        },
        DebugType::Composite { tag, name, base, .. } => {
            let name = name.clone().unwrap_or_default();
            match *tag {
                gimli::DW_TAG_array_type => {
                    format!("array of {}", make_type_name(debug, *base))
                }
                gimli::DW_TAG_structure_type => format!("struct {name}"),
                gimli::DW_TAG_union_type => format!("union {name}"),
                gimli::DW_TAG_enumeration_type => format!("enum {name}"),
                _ => name,
            }
        }
        DebugType::Subroutine => String::new(),
    }
}

/// The report name of an IR type, used to map allocation and pointee types
/// back into the Type Table. The IR has lost signedness, so integer widths
/// map to their signed C names.
pub fn ir_type_name(ty: &Type) -> String {
    match ty {
        Type::Void => "void".to_string(),
        Type::I8 | Type::U8 => "char".to_string(),
        Type::I16 | Type::U16 => "short".to_string(),
        Type::I32 | Type::U32 => "int".to_string(),
        Type::I64 | Type::U64 => "long".to_string(),
        Type::F32 => "float".to_string(),
        Type::F64 => "double".to_string(),
        Type::Ptr(inner) => format!("pointer to {}", ir_type_name(inner)),
        Type::Array(element, _) => format!("array of {}", ir_type_name(element)),
        Type::Struct(st) => struct_type_name(st),
    }
}

fn struct_type_name(st: &StructType) -> String {
    if st.is_union {
        format!("union {}", st.name)
    } else {
        format!("struct {}", st.name)
    }
}

/// The reified Type Table under construction: descriptors plus the side
/// table that resolves debug handles and names to dense indices.
#[derive(Debug, Default)]
pub struct ReifiedTypes {
    /// (report name, index, debug handle), in index order
    entries: Vec<(String, usize, DebugTypeId)>,
    by_handle: FxHashMap<DebugTypeId, usize>,
    descriptors: Vec<TypeDescriptor>,
}

impl ReifiedTypes {
    pub fn build(debug: &DebugInfo) -> Self {
        let mut this = Self::default();

        // First pass: assign indices to every surviving type
        let mut index = 0;
        for (id, _) in debug.types.iter() {
            if !should_process(debug, id) {
                continue;
            }
            let name = truncate_name(&make_type_name(debug, Some(id)));
            this.entries.push((name, index, id));
            this.by_handle.insert(id, index);
            index += 1;
        }

        // Second pass: create descriptors, resolving field references
        // through the now-complete side table
        for i in 0..this.entries.len() {
            let id = this.entries[i].2;
            let descriptor = this.create_descriptor(debug, id);
            this.descriptors.push(descriptor);
        }

        log::debug!(target: "reify", "reified {} types", this.descriptors.len());
        this
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptors(&self) -> &[TypeDescriptor] {
        &self.descriptors
    }

    /// Resolves a debug handle to its dense index
    pub fn index_of_handle(&self, id: DebugTypeId) -> Option<usize> {
        self.by_handle.get(&id).copied()
    }

    /// Resolves a type by report name, with the fallbacks the IR mapping
    /// needs: an `unsigned X` descriptor satisfies a sought `X`, and `long`
    /// matches any descriptor whose name mentions `long`
    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        if let Some((_, index, _)) = self.entries.iter().find(|(n, _, _)| n == name) {
            return Some(*index);
        }
        for (entry_name, index, _) in self.entries.iter() {
            if let Some(unsigned) = entry_name.strip_prefix("unsigned ") {
                if unsigned == name {
                    return Some(*index);
                }
            }
            if name == "long" && entry_name.contains("long") {
                return Some(*index);
            }
        }
        log::debug!(target: "reify", "no type index for {name}");
        None
    }

    /// Serialises the table in index order
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for descriptor in self.descriptors.iter() {
            descriptor.write(w)?;
        }
        Ok(())
    }

    fn create_descriptor(&self, debug: &DebugInfo, id: DebugTypeId) -> TypeDescriptor {
        let name = truncate_name(&make_type_name(debug, Some(id)));
        let format = type_format(debug, Some(id));

        match debug.ty(id) {
            DebugType::Basic { .. } => {
                TypeDescriptor::single(name, format, 0, format.code())
            }
            DebugType::Derived { base, .. } => {
                // Pointers and qualifiers refer to their base type's
                // descriptor; an unresolved base keeps the format code
                let base_index = base
                    .and_then(|b| self.index_of_handle(b))
                    .map(|i| i as i32)
                    .unwrap_or(format.code());
                TypeDescriptor::single(name, format, 0, base_index)
            }
            DebugType::Composite {
                tag,
                base,
                size_bits,
                members,
                bounds,
                ..
            } => match *tag {
                gimli::DW_TAG_array_type => {
                    let count = match bounds.first() {
                        Some(ArrayBound::Constant(count)) => *count as i32,
                        _ => 0,
                    };
                    // The synthetic field carries the element format, with
                    // the element count in the offset slot
                    let element_format = type_format(debug, *base);
                    TypeDescriptor::single(name, element_format, count, element_format.code())
                }
                gimli::DW_TAG_union_type => {
                    TypeDescriptor::single(name, Format::Union, (size_bits / 8) as i32, Format::Union.code())
                }
                gimli::DW_TAG_enumeration_type => {
                    TypeDescriptor::single(name, Format::Int, 0, Format::Int.code())
                }
                _ => TypeDescriptor {
                    name,
                    fields: members
                        .iter()
                        .map(|member| self.member_field(debug, *member))
                        .collect(),
                },
            },
            DebugType::Subroutine => {
                TypeDescriptor::single(name, Format::NonInspectable, 0, Format::NonInspectable.code())
            }
        }
    }

    fn member_field(&self, debug: &DebugInfo, member: DebugTypeId) -> FieldDescriptor {
        let DebugType::Derived {
            name,
            base,
            offset_bits,
            ..
        } = debug.ty(member)
        else {
            return FieldDescriptor {
                name: String::new(),
                format: Format::NonInspectable,
                offset: 0,
                base_type_index: Format::NonInspectable.code(),
            };
        };
        let field_name = truncate_name(name.as_deref().unwrap_or(""));

        let processable = base.map(|b| should_process(debug, b)).unwrap_or(true);
        if !processable {
            return FieldDescriptor {
                name: field_name,
                format: Format::NonInspectable,
                offset: (offset_bits / 8) as i32,
                base_type_index: Format::NonInspectable.code(),
            };
        }

        let format = type_format(debug, *base);
        let mut offset = (offset_bits / 8) as i32;
        let mut base_type_index = format.code();

        if let Some(base_id) = base {
            match debug.ty(*base_id) {
                // Pointer members index their pointee; qualified members
                // their underlying type
                DebugType::Derived {
                    base: inner_base, ..
                } => {
                    if let Some(index) = inner_base.and_then(|b| self.index_of_handle(b)) {
                        base_type_index = index as i32;
                    }
                }
                DebugType::Composite {
                    tag, size_bits, base: element, ..
                } => {
                    if *tag == gimli::DW_TAG_array_type {
                        // Scalar-array members index the array descriptor
                        let scalar_elements = element
                            .map(|e| matches!(debug.ty(e), DebugType::Basic { .. }))
                            .unwrap_or(false);
                        if scalar_elements {
                            if let Some(index) = self.index_of_handle(*base_id) {
                                base_type_index = index as i32;
                            }
                        }
                    } else {
                        // Nested composites index their own descriptor; a
                        // union member's offset slot carries the union size
                        if let Some(index) = self.index_of_handle(*base_id) {
                            base_type_index = index as i32;
                        }
                        if *tag == gimli::DW_TAG_union_type {
                            offset = (size_bits / 8) as i32;
                        }
                    }
                }
                _ => {}
            }
        }

        FieldDescriptor {
            name: field_name,
            format,
            offset,
            base_type_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use whiro_ir::debug::DebugVariable;
    use whiro_runtime::TypeTable;

    use super::*;

    fn c_int(debug: &mut DebugInfo) -> DebugTypeId {
        debug.basic("int", gimli::DW_ATE_signed, 32)
    }

    #[test]
    fn scalars_get_dense_indices_in_iteration_order() {
        let mut debug = DebugInfo::default();
        let int = c_int(&mut debug);
        let double = debug.basic("double", gimli::DW_ATE_float, 64);

        let reified = ReifiedTypes::build(&debug);
        assert_eq!(reified.len(), 2);
        assert_eq!(reified.index_of_handle(int), Some(0));
        assert_eq!(reified.index_of_handle(double), Some(1));
        assert_eq!(reified.descriptors()[0].name, "int");
        assert_eq!(reified.descriptors()[0].fields[0].format, Format::Int);
        assert_eq!(reified.descriptors()[1].fields[0].format, Format::Double);
    }

    #[test]
    fn pointer_descriptor_references_its_pointee() {
        let mut debug = DebugInfo::default();
        let int = c_int(&mut debug);
        let ptr = debug.pointer_to(Some(int));

        let reified = ReifiedTypes::build(&debug);
        let descriptor = &reified.descriptors()[reified.index_of_handle(ptr).unwrap()];
        assert_eq!(descriptor.name, "pointer to int");
        assert_eq!(descriptor.fields[0].format, Format::Pointer);
        assert_eq!(descriptor.fields[0].base_type_index, 0);
    }

    #[test]
    fn pointer_to_void_keeps_the_format_code() {
        let mut debug = DebugInfo::default();
        let ptr = debug.pointer_to(None);

        let reified = ReifiedTypes::build(&debug);
        let descriptor = &reified.descriptors()[reified.index_of_handle(ptr).unwrap()];
        assert_eq!(descriptor.name, "pointer to void");
        assert_eq!(descriptor.fields[0].base_type_index, Format::Pointer.code());
    }

    #[test]
    fn struct_members_resolve_offsets_and_bases() {
        let mut debug = DebugInfo::default();
        let long = debug.basic("long int", gimli::DW_ATE_signed, 64);
        let node_data = debug.member("data", long, 0);
        // A self-referential next pointer, patched below
        let node = debug.structure("Node", 128, vec![]);
        let node_ptr = debug.pointer_to(Some(node));
        let node_next = debug.member("next", node_ptr, 64);
        match debug.types[node] {
            DebugType::Composite {
                ref mut members, ..
            } => *members = vec![node_data, node_next],
            _ => unreachable!(),
        }

        let reified = ReifiedTypes::build(&debug);
        let node_index = reified.index_of_handle(node).unwrap();
        let descriptor = &reified.descriptors()[node_index];
        assert_eq!(descriptor.name, "struct Node");
        assert_eq!(descriptor.fields.len(), 2);
        assert_eq!(descriptor.fields[0].name, "data");
        assert_eq!(descriptor.fields[0].format, Format::Long);
        assert_eq!(descriptor.fields[0].offset, 0);
        assert_eq!(descriptor.fields[1].name, "next");
        assert_eq!(descriptor.fields[1].format, Format::Pointer);
        assert_eq!(descriptor.fields[1].offset, 8);
        // The pointer member's base resolves to the struct itself
        assert_eq!(descriptor.fields[1].base_type_index, node_index as i32);
    }

    #[test]
    fn scalar_array_member_references_the_array_descriptor() {
        let mut debug = DebugInfo::default();
        let int = c_int(&mut debug);
        let arr = debug.array_of(int, vec![ArrayBound::Constant(8)]);
        let member = debug.member("values", arr, 0);
        let holder = debug.structure("Holder", 256, vec![member]);

        let reified = ReifiedTypes::build(&debug);
        let arr_index = reified.index_of_handle(arr).unwrap();
        let arr_descriptor = &reified.descriptors()[arr_index];
        // The array descriptor's field carries the element format and count
        assert_eq!(arr_descriptor.fields[0].format, Format::Int);
        assert_eq!(arr_descriptor.fields[0].offset, 8);

        let holder_descriptor = &reified.descriptors()[reified.index_of_handle(holder).unwrap()];
        assert_eq!(holder_descriptor.fields[0].format, Format::ScalarArray);
        assert_eq!(holder_descriptor.fields[0].base_type_index, arr_index as i32);
    }

    #[test]
    fn union_member_offset_carries_the_union_size() {
        let mut debug = DebugInfo::default();
        let int = c_int(&mut debug);
        let m = debug.member("i", int, 0);
        let u = debug.union_type("U", 32, vec![m]);
        let um = debug.member("u", u, 64);
        let outer = debug.structure("Outer", 128, vec![um]);

        let reified = ReifiedTypes::build(&debug);
        let outer_descriptor = &reified.descriptors()[reified.index_of_handle(outer).unwrap()];
        assert_eq!(outer_descriptor.fields[0].format, Format::Union);
        assert_eq!(outer_descriptor.fields[0].offset, 4);
    }

    #[test]
    fn skip_set_excludes_vla_subroutines_and_members() {
        let mut debug = DebugInfo::default();
        let int = c_int(&mut debug);
        let sub = debug.add_type(DebugType::Subroutine);
        let member = debug.member("m", int, 0);
        let len_var = debug.add_variable(DebugVariable::local("n", "f", int));
        let vla = debug.array_of(int, vec![ArrayBound::Variable(len_var)]);

        assert!(should_process(&debug, int));
        assert!(!should_process(&debug, sub));
        assert!(!should_process(&debug, member));
        assert!(!should_process(&debug, vla));

        let reified = ReifiedTypes::build(&debug);
        assert_eq!(reified.len(), 1);
    }

    #[test]
    fn qualified_types_resolve_through_their_base() {
        let mut debug = DebugInfo::default();
        let int = c_int(&mut debug);
        let const_int = debug.add_type(DebugType::Derived {
            tag: gimli::DW_TAG_const_type,
            name: None,
            base: Some(int),
            size_bits: 32,
            offset_bits: 0,
        });
        assert_eq!(type_format(&debug, Some(const_int)), Format::Int);
        assert_eq!(make_type_name(&debug, Some(const_int)), "const int");
    }

    #[test]
    fn long_names_truncate_with_an_ellipsis() {
        let long_name = "x".repeat(200);
        let truncated = truncate_name(&long_name);
        assert_eq!(truncated.len(), 128);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn name_fallbacks_match_unsigned_and_long() {
        let mut debug = DebugInfo::default();
        debug.basic("unsigned int", gimli::DW_ATE_unsigned, 32);
        debug.basic("long long unsigned int", gimli::DW_ATE_unsigned, 64);

        let reified = ReifiedTypes::build(&debug);
        assert_eq!(reified.index_of_name("unsigned int"), Some(0));
        assert_eq!(reified.index_of_name("int"), Some(0));
        assert_eq!(reified.index_of_name("long"), Some(1));
        assert_eq!(reified.index_of_name("double"), None);
    }

    #[test]
    fn serialised_table_loads_back_identically() {
        let mut debug = DebugInfo::default();
        let int = c_int(&mut debug);
        let m = debug.member("v", int, 0);
        debug.structure("S", 32, vec![m]);
        debug.pointer_to(Some(int));

        let reified = ReifiedTypes::build(&debug);
        let mut bytes = Vec::new();
        reified.write_to(&mut bytes).unwrap();

        let table = TypeTable::read(&mut bytes.as_slice(), reified.len()).unwrap();
        assert_eq!(table.len(), reified.len());
        for (i, descriptor) in reified.descriptors().iter().enumerate() {
            assert_eq!(table.get(i as i32).unwrap(), descriptor);
        }
    }
}
