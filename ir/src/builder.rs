//! In-place instruction insertion.
//!
//! [`FuncBuilder`] wraps a function together with an insertion point; every
//! emitted instruction is inserted at the point and the point advances past
//! it, so a straight-line sequence of emissions lands in program order.

use smallvec::SmallVec;

use crate::{
    function::{BinaryOp, Block, CastKind, ExtFunc, Function, Imm, Inst, InstData, Value},
    types::Type,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionPoint {
    pub block: Block,
    /// Emitted instructions are inserted before this position
    pub index: usize,
}

pub struct FuncBuilder<'f> {
    pub func: &'f mut Function,
    ip: InsertionPoint,
}

impl<'f> FuncBuilder<'f> {
    /// Creates a builder positioned at the start of the entry block
    pub fn at_entry(func: &'f mut Function) -> Self {
        let block = func.entry_block();
        Self {
            func,
            ip: InsertionPoint { block, index: 0 },
        }
    }

    pub fn at(func: &'f mut Function, block: Block, index: usize) -> Self {
        Self {
            func,
            ip: InsertionPoint { block, index },
        }
    }

    pub fn insertion_point(&self) -> InsertionPoint {
        self.ip
    }

    pub fn set_insertion_point(&mut self, block: Block, index: usize) {
        self.ip = InsertionPoint { block, index };
    }

    /// Positions the builder immediately before `inst`
    pub fn before(&mut self, inst: Inst) {
        let block = self.func.block_of(inst).expect("instruction is not inserted");
        let index = self.func.position_in_block(inst).unwrap();
        self.set_insertion_point(block, index);
    }

    /// Positions the builder immediately after `inst`
    pub fn after(&mut self, inst: Inst) {
        let block = self.func.block_of(inst).expect("instruction is not inserted");
        let index = self.func.position_in_block(inst).unwrap();
        self.set_insertion_point(block, index + 1);
    }

    /// Positions the builder at the first non-phi instruction of `block`
    pub fn at_first_non_phi(&mut self, block: Block) {
        let index = self.func.first_non_phi(block);
        self.set_insertion_point(block, index);
    }

    /// Positions the builder before the terminator of `block`
    pub fn before_terminator(&mut self, block: Block) {
        let index = match self.func.terminator(block) {
            Some(term) => self.func.position_in_block(term).unwrap(),
            None => self.func.blocks[block].insts.len(),
        };
        self.set_insertion_point(block, index);
    }

    fn emit(&mut self, data: InstData, result_ty: Option<Type>) -> Inst {
        let inst = self.func.make_inst(data, result_ty);
        self.func.insert_inst(self.ip.block, self.ip.index, inst);
        self.ip.index += 1;
        inst
    }

    fn emit_value(&mut self, data: InstData, result_ty: Type) -> Value {
        let inst = self.emit(data, Some(result_ty));
        self.func.inst_result(inst).unwrap()
    }

    pub fn iconst(&mut self, ty: Type, value: i64) -> Value {
        self.func.constant(ty, Imm::Int(value))
    }

    pub fn zero(&mut self, ty: Type) -> Value {
        self.func.constant(ty, Imm::Zero)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        let ty = self.func.value_type(lhs).clone();
        self.emit_value(InstData::Binary { op, lhs, rhs }, ty)
    }

    pub fn cast(&mut self, kind: CastKind, arg: Value, ty: Type) -> Value {
        self.emit_value(InstData::Cast { kind, arg }, ty)
    }

    /// A stack slot for a value of type `ty`; the result is the slot address
    pub fn alloca(&mut self, ty: Type) -> Value {
        let result = Type::pointer(ty.clone());
        self.emit_value(InstData::Alloca { ty }, result)
    }

    pub fn load(&mut self, ptr: Value) -> Value {
        let pointee = self
            .func
            .value_type(ptr)
            .pointee()
            .expect("load requires a pointer operand")
            .clone();
        self.emit_value(InstData::Load { ptr }, pointee)
    }

    pub fn store(&mut self, value: Value, ptr: Value) -> Inst {
        self.emit(InstData::Store { value, ptr }, None)
    }

    pub fn call(&mut self, callee: ExtFunc, args: &[Value]) -> Option<Value> {
        let ret = self.func.ext_func(callee).signature.ret.clone();
        let data = InstData::Call {
            callee,
            args: SmallVec::from_slice(args),
        };
        let inst = self.emit(data, ret);
        self.func.inst_result(inst)
    }

    /// Inserts a merge node at the start of `block`, leaving the insertion
    /// point untouched
    pub fn phi(&mut self, block: Block, ty: Type, incoming: &[(Block, Value)]) -> Value {
        let data = InstData::Phi {
            incoming: SmallVec::from_slice(incoming),
        };
        let inst = self.func.make_inst(data, Some(ty));
        self.func.insert_inst(block, 0, inst);
        if self.ip.block == block {
            self.ip.index += 1;
        }
        self.func.inst_result(inst).unwrap()
    }
}
