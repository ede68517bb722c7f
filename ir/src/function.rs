//! SSA functions: values, instructions, and basic blocks in entity maps.
//!
//! Instructions live in a per-block ordered list; values are defined by
//! instruction results, function arguments, materialised constants, or
//! references to module globals. The instrumenter both reads this form and
//! rewrites it in place through [`crate::builder::FuncBuilder`].

use cranelift_entity::{entity_impl, packed_option::PackedOption, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

use crate::{debug::DebugVarId, module::GlobalId, types::Type};

/// An SSA value
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(u32);
entity_impl!(Value, "v");

/// An instruction
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// A basic block
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// A reference to a function callable from this one (defined or external)
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtFunc(u32);
entity_impl!(ExtFunc, "fn");

/// An immediate constant
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Imm {
    Int(i64),
    Float(f64),
    /// The all-zeros value of the constant's type (null for pointers)
    Zero,
    /// An unspecified value; debug observations of undef are dropped
    Undef,
}

impl Imm {
    pub fn is_null_value(&self) -> bool {
        matches!(self, Self::Zero | Self::Int(0)) || matches!(self, Self::Float(f) if *f == 0.0)
    }
}

/// How a value comes into existence
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueDef {
    /// The result of an instruction
    Inst(Inst),
    /// The `index`th function argument
    Arg(u32),
    /// A materialised constant
    Const(Imm),
    /// The address of a module global
    Global(GlobalId),
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: Type,
    pub def: ValueDef,
}

/// Integer binary operations the instrumenter needs to emit or fold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Mul,
    UDiv,
}

/// Value-conversion operations, mirroring the cast opcodes of the upstream IR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Trunc,
    ZExt,
    SExt,
    Bitcast,
    PtrToInt,
    IntToPtr,
    FpToInt,
    IntToFp,
    FpTrunc,
    FpExt,
}

/// The instruction set.
///
/// This is the subset a state-inspection pass must understand: memory and
/// call traffic, control flow, merge nodes, and the two debug-intrinsic
/// forms (`value-at` and `address-of`) the front end emits for source
/// variables.
#[derive(Debug, Clone)]
pub enum InstData {
    Binary {
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    Cast {
        kind: CastKind,
        arg: Value,
    },
    /// A stack slot holding a value of the given type
    Alloca {
        ty: Type,
    },
    Load {
        ptr: Value,
    },
    Store {
        value: Value,
        ptr: Value,
    },
    Call {
        callee: ExtFunc,
        args: SmallVec<[Value; 8]>,
    },
    /// A merge node; one incoming value per predecessor edge
    Phi {
        incoming: SmallVec<[(Block, Value); 2]>,
    },
    Br {
        dest: Block,
    },
    CondBr {
        cond: Value,
        then_dest: Block,
        else_dest: Block,
    },
    Ret {
        value: Option<Value>,
    },
    /// Records that `value` holds the source variable `var` at this point
    DebugValue {
        var: DebugVarId,
        value: Value,
    },
    /// Records that `addr` is the storage address of the source variable `var`
    DebugDeclare {
        var: DebugVarId,
        addr: Value,
    },
}

impl InstData {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Br { .. } | Self::CondBr { .. } | Self::Ret { .. })
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Self::Phi { .. })
    }

    pub fn is_debug(&self) -> bool {
        matches!(self, Self::DebugValue { .. } | Self::DebugDeclare { .. })
    }

    pub fn branch_targets(&self) -> SmallVec<[Block; 2]> {
        match self {
            Self::Br { dest } => smallvec::smallvec![*dest],
            Self::CondBr {
                then_dest,
                else_dest,
                ..
            } => smallvec::smallvec![*then_dest, *else_dest],
            _ => SmallVec::new(),
        }
    }
}

/// A function signature
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    pub params: Vec<Type>,
    pub ret: Option<Type>,
}

impl Signature {
    pub fn new(params: Vec<Type>, ret: Option<Type>) -> Self {
        Self { params, ret }
    }
}

/// A function known to this function by name: another module function or an
/// external symbol such as `malloc`
#[derive(Debug, Clone)]
pub struct ExtFuncData {
    pub name: String,
    pub signature: Signature,
}

#[derive(Debug, Default, Clone)]
pub struct BlockData {
    /// The instructions of this block, in execution order
    pub insts: Vec<Inst>,
}

/// An SSA function, or a declaration of one
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub signature: Signature,
    /// Declarations have no body and are never instrumented
    pub is_declaration: bool,

    pub values: PrimaryMap<Value, ValueData>,
    pub insts: PrimaryMap<Inst, InstData>,
    pub blocks: PrimaryMap<Block, BlockData>,
    /// The result value of each instruction, if it produces one
    results: SecondaryMap<Inst, PackedOption<Value>>,
    /// The block each inserted instruction currently lives in
    inst_block: SecondaryMap<Inst, PackedOption<Block>>,
    ext_funcs: PrimaryMap<ExtFunc, ExtFuncData>,
    entry: PackedOption<Block>,
}

impl Function {
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        Self {
            name: name.into(),
            signature,
            is_declaration: false,
            values: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            results: SecondaryMap::new(),
            inst_block: SecondaryMap::new(),
            ext_funcs: PrimaryMap::new(),
            entry: PackedOption::default(),
        }
    }

    pub fn declaration(name: impl Into<String>, signature: Signature) -> Self {
        let mut f = Self::new(name, signature);
        f.is_declaration = true;
        f
    }

    /// The entry block; the first block created
    pub fn entry_block(&self) -> Block {
        self.entry.expand().expect("function has no blocks")
    }

    pub fn create_block(&mut self) -> Block {
        let block = self.blocks.push(BlockData::default());
        if self.entry.is_none() {
            self.entry = PackedOption::from(block);
        }
        block
    }

    pub fn make_arg(&mut self, index: u32, ty: Type) -> Value {
        self.values.push(ValueData {
            ty,
            def: ValueDef::Arg(index),
        })
    }

    pub fn constant(&mut self, ty: Type, imm: Imm) -> Value {
        self.values.push(ValueData {
            ty,
            def: ValueDef::Const(imm),
        })
    }

    /// The address of a module global, as a value of type `*ty`
    pub fn global_addr(&mut self, global: GlobalId, ty: Type) -> Value {
        self.values.push(ValueData {
            ty: Type::pointer(ty),
            def: ValueDef::Global(global),
        })
    }

    /// Creates an instruction without inserting it into any block.
    ///
    /// `result_ty` is `Some` for value-producing instructions.
    pub fn make_inst(&mut self, data: InstData, result_ty: Option<Type>) -> Inst {
        let inst = self.insts.push(data);
        if let Some(ty) = result_ty {
            let value = self.values.push(ValueData {
                ty,
                def: ValueDef::Inst(inst),
            });
            self.results[inst] = PackedOption::from(value);
        }
        inst
    }

    /// Inserts `inst` into `block` before position `index`
    pub fn insert_inst(&mut self, block: Block, index: usize, inst: Inst) {
        self.blocks[block].insts.insert(index, inst);
        self.inst_block[inst] = PackedOption::from(block);
    }

    pub fn append_inst(&mut self, block: Block, inst: Inst) {
        self.blocks[block].insts.push(inst);
        self.inst_block[inst] = PackedOption::from(block);
    }

    pub fn inst_result(&self, inst: Inst) -> Option<Value> {
        self.results[inst].expand()
    }

    /// The block an instruction lives in; `None` if it was never inserted
    pub fn block_of(&self, inst: Inst) -> Option<Block> {
        self.inst_block[inst].expand()
    }

    /// The position of `inst` within its block
    pub fn position_in_block(&self, inst: Inst) -> Option<usize> {
        let block = self.block_of(inst)?;
        self.blocks[block].insts.iter().position(|i| *i == inst)
    }

    pub fn value_type(&self, value: Value) -> &Type {
        &self.values[value].ty
    }

    pub fn value_def(&self, value: Value) -> ValueDef {
        self.values[value].def
    }

    /// The defining instruction of `value`, if it is an instruction result
    pub fn def_inst(&self, value: Value) -> Option<Inst> {
        match self.values[value].def {
            ValueDef::Inst(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn terminator(&self, block: Block) -> Option<Inst> {
        let last = *self.blocks[block].insts.last()?;
        self.insts[last].is_terminator().then_some(last)
    }

    /// The index of the first non-phi instruction of `block`
    pub fn first_non_phi(&self, block: Block) -> usize {
        self.blocks[block]
            .insts
            .iter()
            .position(|inst| !self.insts[*inst].is_phi())
            .unwrap_or(self.blocks[block].insts.len())
    }

    /// Imports a callable symbol, reusing an existing import with the same name
    pub fn import_function(&mut self, name: &str, signature: Signature) -> ExtFunc {
        if let Some((ext, _)) = self.ext_funcs.iter().find(|(_, data)| data.name == name) {
            return ext;
        }
        self.ext_funcs.push(ExtFuncData {
            name: name.to_string(),
            signature,
        })
    }

    pub fn ext_func(&self, ext: ExtFunc) -> &ExtFuncData {
        &self.ext_funcs[ext]
    }

    /// The name of the function an instruction calls, if it is a call
    pub fn callee_name(&self, inst: Inst) -> Option<&str> {
        match &self.insts[inst] {
            InstData::Call { callee, .. } => Some(self.ext_funcs[*callee].name.as_str()),
            _ => None,
        }
    }

    /// All blocks, in creation order
    pub fn block_ids(&self) -> impl Iterator<Item = Block> + '_ {
        self.blocks.keys()
    }

    /// Finds the unique block terminated by a return, if any.
    ///
    /// The upstream pipeline is expected to have merged returns; when it has
    /// not, the first return block found is reported.
    pub fn return_block(&self) -> Option<Block> {
        self.block_ids().find(|block| {
            matches!(
                self.terminator(*block).map(|t| &self.insts[t]),
                Some(InstData::Ret { .. })
            )
        })
    }
}
