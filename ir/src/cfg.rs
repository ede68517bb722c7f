use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;

use crate::function::{Block, Function};

/// The control-flow graph of a function: predecessor and successor edges
/// recovered from block terminators.
#[derive(Debug, Default)]
pub struct ControlFlowGraph {
    preds: SecondaryMap<Block, SmallVec<[Block; 4]>>,
    succs: SecondaryMap<Block, SmallVec<[Block; 2]>>,
}

impl ControlFlowGraph {
    pub fn compute(func: &Function) -> Self {
        let mut cfg = Self::default();
        for block in func.block_ids() {
            let Some(term) = func.terminator(block) else {
                continue;
            };
            for dest in func.insts[term].branch_targets() {
                cfg.succs[block].push(dest);
                cfg.preds[dest].push(block);
            }
        }
        cfg
    }

    pub fn preds(&self, block: Block) -> &[Block] {
        &self.preds[block]
    }

    pub fn succs(&self, block: Block) -> &[Block] {
        &self.succs[block]
    }

    pub fn is_pred(&self, block: Block, maybe_pred: Block) -> bool {
        self.preds[block].contains(&maybe_pred)
    }
}
