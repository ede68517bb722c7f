//! Debug-value liveness reconstruction.
//!
//! While scanning a function, every debug intrinsic in the function's own
//! scope is accumulated into a per-variable *trace*: an ordered sequence of
//! observations, each either the variable's storage address or an SSA value
//! holding the variable at that point. At an inspection point the trace is
//! consulted for an *authoritative definition*:
//!
//! 1. any address-of observation wins outright (the slot is loaded at the
//!    inspection point);
//! 2. otherwise the last observation inside the inspection block;
//! 3. otherwise the observation from the most-immediate dominator of the
//!    inspection block.
//!
//! When none applies the live range is *repaired*: first by building a merge
//! node in the inspection block from the per-predecessor observations, and
//! failing that by materialising a zero-initialised shadow slot at function
//! entry and spilling every observed definition into it.

use smallvec::SmallVec;
use whiro_ir::{
    valid_cast, Block, ControlFlowGraph, DebugVarId, DominatorTree, FuncBuilder, Function, Imm,
    Inst, InstData, Type, Value, ValueDef,
};
use whiro_session::Statistics;

/// One debug observation of a variable
#[derive(Debug, Clone, Copy)]
pub enum Observation {
    /// `debug.value`: `value` holds the variable just after `at`
    Value { at: Inst, value: Value },
    /// `debug.declare`: the variable lives in the slot `addr`
    Address { at: Inst, addr: Value },
}

impl Observation {
    fn operand(&self) -> Value {
        match self {
            Self::Value { value, .. } | Self::Address { addr: value, .. } => *value,
        }
    }
}

/// The ordered observation trace of one source variable
#[derive(Debug, Clone)]
pub struct Trace {
    pub var: DebugVarId,
    pub observations: SmallVec<[Observation; 4]>,
}

/// Per-function map from variable name to its trace, in the order the
/// variables were first observed. Snapshot lines follow this order.
#[derive(Debug, Default)]
pub struct StackMap {
    traces: Vec<(String, Trace)>,
}

impl StackMap {
    /// Accumulates one debug intrinsic into the trace of its variable.
    ///
    /// Null and undef observations carry no recoverable value and are
    /// dropped here, so a trace is never polluted by them.
    pub fn record(&mut self, func: &Function, name: &str, var: DebugVarId, obs: Observation) {
        if let ValueDef::Const(imm) = func.value_def(obs.operand()) {
            if matches!(imm, Imm::Undef) || imm.is_null_value() {
                return;
            }
        }
        if let Some((_, trace)) = self.traces.iter_mut().find(|(n, _)| n == name) {
            trace.observations.push(obs);
        } else {
            self.traces.push((
                name.to_string(),
                Trace {
                    var,
                    observations: smallvec::smallvec![obs],
                },
            ));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Trace)> {
        self.traces.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

/// Shadow slots already materialised in the current function, by variable
/// name
#[derive(Debug, Default)]
pub struct ShadowMap {
    slots: Vec<(String, Value)>,
}

impl ShadowMap {
    fn get(&self, name: &str) -> Option<Value> {
        self.slots.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    fn insert(&mut self, name: &str, slot: Value) {
        self.slots.push((name.to_string(), slot));
    }
}

/// Whether `value` is the address of a stack slot
fn is_alloca(func: &Function, value: Value) -> bool {
    func.def_inst(value)
        .is_some_and(|inst| matches!(func.insts[inst], InstData::Alloca { .. }))
}

/// The largest IR type among the value observations of `trace`, by
/// allocation size
fn largest_type(func: &Function, trace: &Trace) -> Option<Type> {
    let mut largest: Option<Type> = None;
    for obs in trace.observations.iter() {
        if let Observation::Value { value, .. } = obs {
            let ty = func.value_type(*value);
            let bigger = largest
                .as_ref()
                .map(|l| ty.size_in_bytes() > l.size_in_bytes())
                .unwrap_or(true);
            if bigger {
                largest = Some(ty.clone());
            }
        }
    }
    largest
}

/// Converts `value` to `ty`, inserting the cast right after the defining
/// instruction (past the merge nodes of its block when the definition is
/// one), or after `obs_at` for constants. Returns `None` when no valid cast
/// exists; the caller drops the definition.
fn convert_to(
    func: &mut Function,
    value: Value,
    ty: &Type,
    obs_at: Inst,
    mixed: &mut bool,
) -> Option<Value> {
    let from = func.value_type(value).clone();
    if from == *ty {
        return Some(value);
    }
    let kind = valid_cast(&from, ty)?;
    *mixed = true;
    match func.value_def(value) {
        // Constants fold instead of casting
        ValueDef::Const(imm) => {
            let folded = match imm {
                Imm::Int(n) if ty.is_float() => Imm::Float(n as f64),
                Imm::Float(f) if ty.is_integer() => Imm::Int(f as i64),
                other => other,
            };
            Some(func.constant(ty.clone(), folded))
        }
        ValueDef::Inst(def) => {
            let block = func.block_of(def)?;
            let mut builder = FuncBuilder::at(func, block, 0);
            if builder.func.insts[def].is_phi() {
                builder.at_first_non_phi(block);
            } else {
                builder.after(def);
            }
            Some(builder.cast(kind, value, ty.clone()))
        }
        _ => {
            let block = func.block_of(obs_at)?;
            let mut builder = FuncBuilder::at(func, block, 0);
            builder.after(obs_at);
            Some(builder.cast(kind, value, ty.clone()))
        }
    }
}

/// Selects the authoritative definition of a variable at the inspection
/// point, repairing the IR when no observation survives to it.
///
/// Returns the SSA value to report, which may be a slot address the caller
/// must load through.
pub fn select_valid_def(
    func: &mut Function,
    cfg: &ControlFlowGraph,
    domtree: &DominatorTree,
    trace: &Trace,
    ins_block: Block,
    shadow: &mut ShadowMap,
    name: &str,
    statistics: &mut Statistics,
) -> Option<Value> {
    // 1. A named stack slot is always authoritative
    for obs in trace.observations.iter() {
        let operand = obs.operand();
        if is_alloca(func, operand) {
            return Some(operand);
        }
    }

    // 2. The last observation inside the inspection block itself
    let mut in_block: Option<Value> = None;
    // 3. The observation whose block most immediately dominates it
    let mut dominating: Option<(Value, u32)> = None;
    for obs in trace.observations.iter() {
        let Observation::Value { at, value } = obs else {
            continue;
        };
        let Some(obs_block) = func.block_of(*at) else {
            continue;
        };
        if obs_block == ins_block {
            in_block = Some(*value);
        } else if domtree.dominates(obs_block, ins_block) {
            let depth = domtree.depth(obs_block);
            let closer = dominating.map(|(_, d)| depth >= d).unwrap_or(true);
            if closer {
                dominating = Some((*value, depth));
            }
        }
    }
    if let Some(value) = in_block.or(dominating.map(|(v, _)| v)) {
        return Some(value);
    }

    // No observation reaches the inspection point; repair the live range
    if let Some(merged) = extend_live_range(func, cfg, trace, ins_block, statistics) {
        return Some(merged);
    }
    Some(shadow_in_stack(func, trace, shadow, name, statistics))
}

/// Extends the live range of a variable into `ins_block` with a merge node.
///
/// Each predecessor contributes its in-block observation when the observed
/// value is also defined in that block; predecessors without a contribution
/// feed the zero value of the merge type. Returns `None` when no real
/// contribution exists.
fn extend_live_range(
    func: &mut Function,
    cfg: &ControlFlowGraph,
    trace: &Trace,
    ins_block: Block,
    statistics: &mut Statistics,
) -> Option<Value> {
    let merge_ty = largest_type(func, trace)?;
    let mut mixed = false;
    let mut incoming: SmallVec<[(Block, Value); 2]> = SmallVec::new();

    for obs in trace.observations.iter() {
        let Observation::Value { at, value } = obs else {
            continue;
        };
        let Some(obs_block) = func.block_of(*at) else {
            continue;
        };
        if !cfg.is_pred(ins_block, obs_block) {
            continue;
        }
        // The observed value must itself be defined in the predecessor,
        // otherwise nothing guarantees it is live on that edge
        if let Some(def) = func.def_inst(*value) {
            if func.block_of(def) != Some(obs_block) {
                continue;
            }
        }
        let Some(converted) = convert_to(func, *value, &merge_ty, *at, &mut mixed) else {
            continue;
        };
        // Last observation per predecessor wins
        if let Some(slot) = incoming.iter_mut().find(|(block, _)| *block == obs_block) {
            slot.1 = converted;
        } else {
            incoming.push((obs_block, converted));
        }
    }

    if incoming.is_empty() {
        return None;
    }

    let preds: SmallVec<[Block; 4]> = SmallVec::from_slice(cfg.preds(ins_block));
    for pred in preds {
        if !incoming.iter().any(|(block, _)| *block == pred) {
            let zero = func.constant(merge_ty.clone(), Imm::Zero);
            incoming.push((pred, zero));
        }
    }

    let entry = func.entry_block();
    let mut builder = FuncBuilder::at(func, entry, 0);
    let merged = builder.phi(ins_block, merge_ty, &incoming);
    statistics.live_ranges_extended += 1;
    if mixed {
        statistics.mixed_type_variables += 1;
    }
    log::debug!(target: "liveness", "extended live range with a merge node in {ins_block}");
    Some(merged)
}

/// Materialises a zero-initialised shadow slot at function entry and spills
/// every observation of the trace into it. The inspection point loads the
/// slot.
fn shadow_in_stack(
    func: &mut Function,
    trace: &Trace,
    shadow: &mut ShadowMap,
    name: &str,
    statistics: &mut Statistics,
) -> Value {
    if let Some(slot) = shadow.get(name) {
        return slot;
    }
    log::debug!(target: "liveness", "could not extend {name}; shadowing in the stack");

    let Some(slot_ty) = largest_type(func, trace) else {
        // An address-only trace: report through the observed address
        return trace.observations[0].operand();
    };

    let entry = func.entry_block();
    let mut builder = FuncBuilder::at(func, entry, 0);
    let slot = builder.alloca(slot_ty.clone());
    let zero = builder.zero(slot_ty.clone());
    builder.store(zero, slot);

    let mut mixed = false;
    let observations: SmallVec<[Observation; 4]> = trace.observations.clone();
    for obs in observations {
        let Observation::Value { at, value } = obs else {
            continue;
        };
        let Some(converted) = convert_to(func, value, &slot_ty, at, &mut mixed) else {
            continue;
        };
        // Store placement: next to the definition when it lives in a
        // different block than the observation (past the merge nodes when it
        // is one), otherwise right after the observation. A cast inserted by
        // the conversion is always the anchor, so the store never precedes it.
        let position = match func.def_inst(value) {
            Some(def) if func.block_of(def) != func.block_of(at) => {
                let anchor = func.def_inst(converted).unwrap_or(def);
                let def_block = func.block_of(anchor).expect("definition is not inserted");
                if func.insts[anchor].is_phi() {
                    (def_block, func.first_non_phi(def_block))
                } else {
                    (def_block, func.position_in_block(anchor).unwrap() + 1)
                }
            }
            Some(_) => {
                let block = func.block_of(at).expect("observation is not inserted");
                (block, func.position_in_block(at).unwrap() + 1)
            }
            None => {
                // Constants: any cast was inserted right after the observation
                let anchor = func.def_inst(converted).unwrap_or(at);
                let block = func.block_of(anchor).expect("observation is not inserted");
                (block, func.position_in_block(anchor).unwrap() + 1)
            }
        };
        let mut builder = FuncBuilder::at(func, position.0, position.1);
        builder.store(converted, slot);
    }

    shadow.insert(name, slot);
    statistics.variables_shadowed += 1;
    if mixed {
        statistics.mixed_type_variables += 1;
    }
    slot
}
