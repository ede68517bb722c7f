//! # Whiro IR
//!
//! The typed SSA substrate the Whiro instrumenter consumes and rewrites.
//!
//! Parsing, optimisation and code generation live in the external toolchain;
//! what arrives here is an already-lowered [`Module`]: functions made of
//! basic blocks of instructions, module globals, and a DWARF-style
//! debug-metadata graph ([`DebugInfo`]) describing source types and
//! variables. The instrumenter reads the debug-intrinsic stream
//! ([`InstData::DebugValue`] / [`InstData::DebugDeclare`]) to reconstruct
//! variable values, and rewrites the module in place through
//! [`FuncBuilder`].

mod builder;
mod cast;
mod cfg;
pub mod debug;
mod dominance;
mod function;
mod module;
mod types;

pub use cranelift_entity::{PrimaryMap, SecondaryMap};

pub use self::{
    builder::{FuncBuilder, InsertionPoint},
    cast::valid_cast,
    cfg::ControlFlowGraph,
    debug::{ArrayBound, DebugInfo, DebugType, DebugTypeId, DebugVarId, DebugVariable, VarScope},
    dominance::DominatorTree,
    function::{
        BinaryOp, Block, BlockData, CastKind, ExtFunc, ExtFuncData, Function, Imm, Inst, InstData,
        Signature, Value, ValueData, ValueDef,
    },
    module::{intern_string, GlobalData, GlobalId, GlobalInit, Module},
    types::{StructType, Type},
};

pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type FxHashSet<K> = rustc_hash::FxHashSet<K>;
