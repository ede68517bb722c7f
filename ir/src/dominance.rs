//! Dominator tree construction.
//!
//! Uses the Cooper–Harvey–Kennedy iterative algorithm over a reverse
//! postorder of the CFG. Good enough for the block counts this pass sees,
//! and simple enough to verify by hand.

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};

use crate::{cfg::ControlFlowGraph, function::{Block, Function}};

#[derive(Debug)]
pub struct DominatorTree {
    idom: SecondaryMap<Block, PackedOption<Block>>,
    /// Reverse-postorder number of each reachable block
    rpo_number: SecondaryMap<Block, u32>,
    /// Depth of each block in the dominator tree; the entry has depth 1
    depth: SecondaryMap<Block, u32>,
}

impl DominatorTree {
    pub fn compute(func: &Function, cfg: &ControlFlowGraph) -> Self {
        let entry = func.entry_block();
        let postorder = Self::postorder(func, cfg, entry);

        let mut rpo_number: SecondaryMap<Block, u32> = SecondaryMap::new();
        for (i, block) in postorder.iter().rev().enumerate() {
            // Offset by one so that zero marks unreachable blocks
            rpo_number[*block] = i as u32 + 1;
        }

        let mut idom: SecondaryMap<Block, PackedOption<Block>> = SecondaryMap::new();
        idom[entry] = PackedOption::from(entry);

        let mut changed = true;
        while changed {
            changed = false;
            for block in postorder.iter().rev() {
                if *block == entry {
                    continue;
                }
                let mut new_idom: Option<Block> = None;
                for pred in cfg.preds(*block) {
                    if idom[*pred].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => *pred,
                        Some(current) => Self::intersect(&idom, &rpo_number, *pred, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom[*block].expand() != Some(new_idom) {
                        idom[*block] = PackedOption::from(new_idom);
                        changed = true;
                    }
                }
            }
        }

        let mut depth: SecondaryMap<Block, u32> = SecondaryMap::new();
        for block in postorder.iter().rev() {
            if *block == entry {
                depth[*block] = 1;
            } else if let Some(parent) = idom[*block].expand() {
                depth[*block] = depth[parent] + 1;
            }
        }

        log::trace!(target: "dominance", "computed dominator tree over {} blocks", postorder.len());
        Self {
            idom,
            rpo_number,
            depth,
        }
    }

    fn postorder(func: &Function, cfg: &ControlFlowGraph, entry: Block) -> Vec<Block> {
        let mut order = Vec::with_capacity(func.blocks.len());
        let mut visited: SecondaryMap<Block, bool> = SecondaryMap::new();
        // (block, next successor index) pairs
        let mut stack = vec![(entry, 0usize)];
        visited[entry] = true;
        while let Some((block, next)) = stack.pop() {
            let succs = cfg.succs(block);
            if next < succs.len() {
                stack.push((block, next + 1));
                let succ = succs[next];
                if !visited[succ] {
                    visited[succ] = true;
                    stack.push((succ, 0));
                }
            } else {
                order.push(block);
            }
        }
        order
    }

    fn intersect(
        idom: &SecondaryMap<Block, PackedOption<Block>>,
        rpo_number: &SecondaryMap<Block, u32>,
        mut a: Block,
        mut b: Block,
    ) -> Block {
        while a != b {
            while rpo_number[a] > rpo_number[b] {
                a = idom[a].expand().unwrap();
            }
            while rpo_number[b] > rpo_number[a] {
                b = idom[b].expand().unwrap();
            }
        }
        a
    }

    pub fn is_reachable(&self, block: Block) -> bool {
        self.rpo_number[block] != 0
    }

    /// The immediate dominator of `block`; the entry is its own idom
    pub fn idom(&self, block: Block) -> Option<Block> {
        self.idom[block].expand()
    }

    /// Whether `a` dominates `b` (reflexively)
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut finger = b;
        loop {
            if finger == a {
                return true;
            }
            let parent = match self.idom[finger].expand() {
                Some(parent) => parent,
                None => return false,
            };
            if parent == finger {
                return false;
            }
            finger = parent;
        }
    }

    /// Dominator-tree depth; deeper blocks are more immediate dominators
    pub fn depth(&self, block: Block) -> u32 {
        self.depth[block]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{Function, Imm, InstData, Signature};
    use crate::types::Type;

    /// entry -> {then, other}, then -> exit, other -> exit
    fn diamond() -> Function {
        let mut f = Function::new("diamond", Signature::default());
        let entry = f.create_block();
        let then = f.create_block();
        let other = f.create_block();
        let exit = f.create_block();
        let cond = f.constant(Type::I32, Imm::Int(1));
        let br = f.make_inst(
            InstData::CondBr {
                cond,
                then_dest: then,
                else_dest: other,
            },
            None,
        );
        f.append_inst(entry, br);
        for block in [then, other] {
            let jump = f.make_inst(InstData::Br { dest: exit }, None);
            f.append_inst(block, jump);
        }
        let ret = f.make_inst(InstData::Ret { value: None }, None);
        f.append_inst(exit, ret);
        f
    }

    #[test]
    fn diamond_dominance() {
        let f = diamond();
        let cfg = ControlFlowGraph::compute(&f);
        let domtree = DominatorTree::compute(&f, &cfg);

        let blocks: Vec<_> = f.block_ids().collect();
        let (entry, then, other, exit) = (blocks[0], blocks[1], blocks[2], blocks[3]);

        assert!(domtree.dominates(entry, exit));
        assert!(domtree.dominates(entry, then));
        assert!(!domtree.dominates(then, exit));
        assert!(!domtree.dominates(other, exit));
        assert_eq!(domtree.idom(exit), Some(entry));
        assert_eq!(domtree.depth(entry), 1);
        assert_eq!(domtree.depth(exit), 2);
    }
}
