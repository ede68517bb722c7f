//! DWARF-style debug metadata attached to a module.
//!
//! The front end that produced the module is expected to have lowered its
//! source-level debug information into this graph: one node per debug type
//! (tagged with the corresponding DWARF tag or base-type encoding), plus one
//! record per source variable. Instructions reference variables through
//! [`DebugVarId`]; the type reifier walks [`DebugInfo::types`] to build the
//! on-disk Type Table.

use cranelift_entity::{entity_impl, PrimaryMap};
use gimli::{DwAte, DwTag};

/// A handle to a node in the debug-type graph
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DebugTypeId(u32);
entity_impl!(DebugTypeId, "dbgty");

/// A handle to a source-variable record
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DebugVarId(u32);
entity_impl!(DebugVarId, "dbgvar");

/// One bound of an array debug type.
///
/// A variable-length array carries the variable that holds its extent; the
/// reifier skips such arrays when the outermost bound is not a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayBound {
    Constant(i64),
    Variable(DebugVarId),
}

/// A node in the debug-type graph.
///
/// The shape mirrors DWARF: base types carry an encoding (`DW_AT_encoding`),
/// derived types a tag (`DW_TAG_pointer_type`, `DW_TAG_typedef`,
/// `DW_TAG_const_type`, `DW_TAG_member`, ...) and a base, composites a tag
/// (`DW_TAG_structure_type`, `DW_TAG_union_type`, `DW_TAG_array_type`,
/// `DW_TAG_enumeration_type`) and their elements. A `None` base everywhere
/// means `void`.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugType {
    /// `DW_TAG_base_type`
    Basic {
        name: String,
        encoding: DwAte,
        size_bits: u64,
    },
    /// A type derived from another: pointer, typedef, qualifier, or member
    Derived {
        tag: DwTag,
        /// Present for typedefs and members
        name: Option<String>,
        base: Option<DebugTypeId>,
        size_bits: u64,
        /// `DW_AT_data_member_location`, for `DW_TAG_member` nodes
        offset_bits: u64,
    },
    /// A composite type: struct, union, enumeration, or array
    Composite {
        tag: DwTag,
        name: Option<String>,
        /// Element type for arrays, underlying type for enumerations
        base: Option<DebugTypeId>,
        size_bits: u64,
        /// `DW_TAG_member` nodes, for structs and unions
        members: Vec<DebugTypeId>,
        /// One bound per dimension, outermost first, for arrays
        bounds: Vec<ArrayBound>,
    },
    /// `DW_TAG_subroutine_type`; never reified
    Subroutine,
}

impl DebugType {
    pub fn tag(&self) -> Option<DwTag> {
        match self {
            Self::Basic { .. } => Some(gimli::DW_TAG_base_type),
            Self::Derived { tag, .. } | Self::Composite { tag, .. } => Some(*tag),
            Self::Subroutine => Some(gimli::DW_TAG_subroutine_type),
        }
    }

    pub fn base(&self) -> Option<DebugTypeId> {
        match self {
            Self::Derived { base, .. } | Self::Composite { base, .. } => *base,
            _ => None,
        }
    }

    pub fn size_bits(&self) -> u64 {
        match self {
            Self::Basic { size_bits, .. }
            | Self::Derived { size_bits, .. }
            | Self::Composite { size_bits, .. } => *size_bits,
            Self::Subroutine => 0,
        }
    }
}

/// Where a source variable lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarScope {
    /// A local of the named function
    Local { function: String },
    /// A variable in static memory
    Global,
}

/// A source-level variable record (`DILocalVariable` / `DIGlobalVariable`)
#[derive(Debug, Clone, PartialEq)]
pub struct DebugVariable {
    pub name: String,
    pub scope: VarScope,
    /// `None` models a `void`-typed entity; never produced by real front ends
    pub ty: Option<DebugTypeId>,
    /// Set for variables introduced by the compiler rather than the user
    pub artificial: bool,
}

impl DebugVariable {
    pub fn local(name: impl Into<String>, function: impl Into<String>, ty: DebugTypeId) -> Self {
        Self {
            name: name.into(),
            scope: VarScope::Local {
                function: function.into(),
            },
            ty: Some(ty),
            artificial: false,
        }
    }

    pub fn global(name: impl Into<String>, ty: DebugTypeId) -> Self {
        Self {
            name: name.into(),
            scope: VarScope::Global,
            ty: Some(ty),
            artificial: false,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self.scope, VarScope::Global)
    }
}

/// All debug metadata carried by a module.
///
/// Type iteration order is the order the front end registered the types in;
/// the reifier's dense indices are assigned in this order.
#[derive(Debug, Default)]
pub struct DebugInfo {
    pub types: PrimaryMap<DebugTypeId, DebugType>,
    pub variables: PrimaryMap<DebugVarId, DebugVariable>,
}

impl DebugInfo {
    pub fn add_type(&mut self, ty: DebugType) -> DebugTypeId {
        self.types.push(ty)
    }

    pub fn add_variable(&mut self, var: DebugVariable) -> DebugVarId {
        self.variables.push(var)
    }

    pub fn ty(&self, id: DebugTypeId) -> &DebugType {
        &self.types[id]
    }

    pub fn var(&self, id: DebugVarId) -> &DebugVariable {
        &self.variables[id]
    }

    /// Resolves `typedef` and `const` wrappers down to the underlying type.
    ///
    /// Returns `None` when the chain bottoms out in `void`.
    pub fn strip_qualifiers(&self, mut id: DebugTypeId) -> Option<DebugTypeId> {
        loop {
            match &self.types[id] {
                DebugType::Derived { tag, base, .. }
                    if *tag == gimli::DW_TAG_typedef || *tag == gimli::DW_TAG_const_type =>
                {
                    id = (*base)?;
                }
                _ => return Some(id),
            }
        }
    }

    /// Convenience constructors used by front ends and tests
    pub fn basic(&mut self, name: &str, encoding: DwAte, size_bits: u64) -> DebugTypeId {
        self.add_type(DebugType::Basic {
            name: name.to_string(),
            encoding,
            size_bits,
        })
    }

    pub fn pointer_to(&mut self, base: Option<DebugTypeId>) -> DebugTypeId {
        self.add_type(DebugType::Derived {
            tag: gimli::DW_TAG_pointer_type,
            name: None,
            base,
            size_bits: 64,
            offset_bits: 0,
        })
    }

    pub fn member(&mut self, name: &str, base: DebugTypeId, offset_bits: u64) -> DebugTypeId {
        let size_bits = self.types[base].size_bits();
        self.add_type(DebugType::Derived {
            tag: gimli::DW_TAG_member,
            name: Some(name.to_string()),
            base: Some(base),
            size_bits,
            offset_bits,
        })
    }

    pub fn structure(&mut self, name: &str, size_bits: u64, members: Vec<DebugTypeId>) -> DebugTypeId {
        self.add_type(DebugType::Composite {
            tag: gimli::DW_TAG_structure_type,
            name: Some(name.to_string()),
            base: None,
            size_bits,
            members,
            bounds: Vec::new(),
        })
    }

    pub fn union_type(&mut self, name: &str, size_bits: u64, members: Vec<DebugTypeId>) -> DebugTypeId {
        self.add_type(DebugType::Composite {
            tag: gimli::DW_TAG_union_type,
            name: Some(name.to_string()),
            base: None,
            size_bits,
            members,
            bounds: Vec::new(),
        })
    }

    pub fn array_of(&mut self, element: DebugTypeId, bounds: Vec<ArrayBound>) -> DebugTypeId {
        let elem_bits = self.types[element].size_bits();
        let total: i64 = bounds
            .iter()
            .map(|b| match b {
                ArrayBound::Constant(n) => *n,
                ArrayBound::Variable(_) => 0,
            })
            .product();
        self.add_type(DebugType::Composite {
            tag: gimli::DW_TAG_array_type,
            name: None,
            base: Some(element),
            size_bits: elem_bits * total.max(0) as u64,
            members: Vec::new(),
            bounds,
        })
    }
}
