//! The instrumentation driver.
//!
//! Walks the module function by function: allocates per-function call
//! counters, intercepts allocator traffic to keep the runtime Heap Table
//! current, and constructs inspection points before every return and every
//! halting call, injecting the calls that report each live variable through
//! the runtime's entry points.

use whiro_ir::{
    debug::{ArrayBound, DebugInfo, DebugType, DebugTypeId, DebugVarId},
    intern_string, valid_cast, BinaryOp, Block, CastKind, ControlFlowGraph, DominatorTree,
    FuncBuilder, Function, GlobalData, GlobalId, GlobalInit, Imm, Inst, InstData, Module,
    PrimaryMap, Signature, Type, Value, ValueDef, VarScope,
};
use whiro_runtime::{api, Format};
use whiro_session::{output_file_name, type_table_file_name, Options, Session, Statistics};

use crate::{
    liveness::{select_valid_def, Observation, ShadowMap, StackMap, Trace},
    reify::{ir_type_name, type_format, ReifiedTypes},
};

/// The artifacts of one instrumentation run: the serialised Type Table and
/// its descriptor count (passed out-of-band to the runtime loader)
#[derive(Debug)]
pub struct Instrumented {
    pub type_table: Vec<u8>,
    pub type_count: usize,
}

/// Where an inspection point's calls are inserted
#[derive(Debug, Clone, Copy)]
enum InsPoint {
    /// Immediately before the terminator of the function's return block
    BeforeTerminator(Block),
    /// Immediately before a halting call
    Before(Inst),
}

impl InsPoint {
    fn block(self, func: &Function) -> Block {
        match self {
            Self::BeforeTerminator(block) => block,
            Self::Before(inst) => func.block_of(inst).expect("halting call is not inserted"),
        }
    }

    fn builder(self, func: &mut Function) -> FuncBuilder<'_> {
        let mut builder = FuncBuilder::at_entry(func);
        match self {
            Self::BeforeTerminator(block) => builder.before_terminator(block),
            Self::Before(inst) => builder.before(inst),
        }
        builder
    }
}

fn void_ptr() -> Type {
    Type::pointer(Type::Void)
}

fn char_ptr() -> Type {
    Type::pointer(Type::I8)
}

/// Rewrites `module` in place and produces the Type Table artifact
pub fn instrument_module(module: &mut Module, session: &mut Session) -> anyhow::Result<Instrumented> {
    log::debug!(target: "driver", "instrumenting program {}", module.source_file);

    anyhow::ensure!(
        module.function("main").is_some(),
        "program {} has no main function",
        module.source_file
    );

    let reified = ReifiedTypes::build(&module.debug);
    let mut type_table = Vec::new();
    reified.write_to(&mut type_table)?;

    let options = session.options;
    let Module {
        source_file,
        functions,
        globals,
        debug,
    } = module;

    // Gather the static variables before injecting anything
    let statics: Vec<(DebugVarId, GlobalId)> = if options.inspect_static() {
        globals
            .iter()
            .filter(|(_, g)| !g.constant && g.init.is_some())
            .filter_map(|(id, g)| g.debug_var.map(|var| (var, id)))
            .collect()
    } else {
        Vec::new()
    };
    session.statistics.variables_inspected += statics.len();

    let mut driver = Driver {
        debug,
        globals,
        reified: &reified,
        options,
        statistics: &mut session.statistics,
        statics,
    };

    // Open the output file and load the Type Table at the start of main
    let table_path = type_table_file_name(source_file);
    let output_path = output_file_name(source_file);
    let main = functions
        .iter_mut()
        .find(|f| f.name == "main")
        .expect("main presence was checked above");
    driver.emit_startup(main, &output_path, &table_path, reified.len());

    for func in functions.iter_mut() {
        if func.is_declaration {
            continue;
        }
        if options.only_main && func.name != "main" {
            // Pointer and full-heap tracking still need the Heap Table kept
            // current in every function
            if options.needs_heap_tracking_everywhere() {
                driver.instrument_only_heap(func);
            }
            continue;
        }
        driver.instrument_function(func);
    }

    log::debug!(target: "driver", "instrumentation done");
    Ok(Instrumented {
        type_table,
        type_count: reified.len(),
    })
}

struct Driver<'a> {
    debug: &'a DebugInfo,
    globals: &'a mut PrimaryMap<GlobalId, GlobalData>,
    reified: &'a ReifiedTypes,
    options: Options,
    statistics: &'a mut Statistics,
    statics: Vec<(DebugVarId, GlobalId)>,
}

impl Driver<'_> {
    fn str_value(&mut self, func: &mut Function, s: &str) -> Value {
        let global = intern_string(self.globals, s);
        func.global_addr(global, Type::I8)
    }

    /// Injects the output-file open and Type Table load at the start of
    /// `main`, past any leading stack allocations
    fn emit_startup(&mut self, main: &mut Function, output_path: &str, table_path: &str, count: usize) {
        let entry = main.entry_block();
        let index = main.blocks[entry]
            .insts
            .iter()
            .position(|inst| !matches!(main.insts[*inst], InstData::Alloca { .. }))
            .unwrap_or(main.blocks[entry].insts.len());

        let output_str = self.str_value(main, output_path);
        let table_str = self.str_value(main, table_path);

        let mut b = FuncBuilder::at(main, entry, index);
        let open_output = b
            .func
            .import_function(api::OPEN_OUTPUT, Signature::new(vec![char_ptr()], None));
        b.call(open_output, &[output_str]);

        let open_table = b.func.import_function(
            api::OPEN_TYPE_TABLE,
            Signature::new(
                vec![char_ptr(), Type::I32, Type::I32, Type::I32, Type::I32],
                None,
            ),
        );
        let count = b.iconst(Type::I32, count as i64);
        let ins_heap = b.iconst(Type::I32, self.options.select_heap as i64);
        let ins_stack = b.iconst(Type::I32, self.options.select_stack as i64);
        let precise = b.iconst(Type::I32, self.options.track_pointers() as i64);
        b.call(open_table, &[table_str, count, ins_heap, ins_stack, precise]);
    }

    /// The per-function call counter: a zero-initialised global incremented
    /// at function entry. `main` uses the constant 1.
    fn create_counter(&mut self, func: &mut Function) -> Value {
        if func.name == "main" {
            return func.constant(Type::I32, Imm::Int(1));
        }
        let name = format!("{}_counter", func.name);
        let global = self
            .globals
            .iter()
            .find(|(_, g)| g.name == name)
            .map(|(id, _)| id)
            .unwrap_or_else(|| {
                self.globals.push(GlobalData {
                    name,
                    ty: Type::I32,
                    init: Some(GlobalInit::Zero),
                    constant: false,
                    debug_var: None,
                })
            });

        let entry = func.entry_block();
        let index = func.first_non_phi(entry);
        let addr = func.global_addr(global, Type::I32);
        let mut b = FuncBuilder::at(func, entry, index);
        let loaded = b.load(addr);
        let one = b.iconst(Type::I32, 1);
        let incremented = b.binary(BinaryOp::Add, loaded, one);
        b.store(incremented, addr);
        incremented
    }

    fn instrument_only_heap(&mut self, func: &mut Function) {
        for call in self.collect(func).heap_calls {
            self.handle_heap_operation(func, call);
        }
    }

    fn instrument_function(&mut self, func: &mut Function) {
        log::debug!(target: "driver", "instrumenting function {}", func.name);
        self.statistics.functions_instrumented += 1;

        let counter = self.create_counter(func);
        let scan = self.collect(func);

        for call in scan.heap_calls {
            self.handle_heap_operation(func, call);
        }

        let cfg = ControlFlowGraph::compute(func);
        let domtree = DominatorTree::compute(func, &cfg);
        let mut shadow = ShadowMap::default();
        let mut first_inspection = true;

        // Inspection points before each halting call, closing the output on
        // that path
        for exit_call in scan.exit_calls {
            let point = InsPoint::Before(exit_call);
            self.create_inspection_point(
                func,
                &cfg,
                &domtree,
                &scan.stack_map,
                &mut shadow,
                counter,
                point,
                &mut first_inspection,
            );
            if self.options.full_heap {
                self.emit_full_heap_dump(func, point, counter);
            }
            let mut b = point.builder(func);
            let close = b
                .func
                .import_function(api::CLOSE_OUTPUT, Signature::new(vec![], None));
            b.call(close, &[]);
        }

        // The inspection point before the function's return
        let Some(ret_block) = func.return_block() else {
            log::warn!(target: "driver", "could not find the return block of {}; skipping it", func.name);
            return;
        };
        let point = InsPoint::BeforeTerminator(ret_block);
        self.create_inspection_point(
            func,
            &cfg,
            &domtree,
            &scan.stack_map,
            &mut shadow,
            counter,
            point,
            &mut first_inspection,
        );
        if self.options.full_heap {
            self.emit_full_heap_dump(func, point, counter);
        }
        if func.name == "main" {
            let mut b = point.builder(func);
            let close = b
                .func
                .import_function(api::CLOSE_OUTPUT, Signature::new(vec![], None));
            b.call(close, &[]);
        }
    }

    /// One scan over the function's instructions: accumulates the variable
    /// traces and finds the allocator and halting calls
    fn collect(&self, func: &Function) -> FunctionScan {
        let mut scan = FunctionScan::default();
        for block in func.block_ids() {
            for inst in func.blocks[block].insts.clone() {
                match &func.insts[inst] {
                    InstData::DebugValue { var, value } => {
                        self.record_observation(
                            func,
                            &mut scan.stack_map,
                            *var,
                            Observation::Value {
                                at: inst,
                                value: *value,
                            },
                        );
                    }
                    InstData::DebugDeclare { var, addr } => {
                        self.record_observation(
                            func,
                            &mut scan.stack_map,
                            *var,
                            Observation::Address {
                                at: inst,
                                addr: *addr,
                            },
                        );
                    }
                    InstData::Call { .. } => match func.callee_name(inst) {
                        Some("malloc") | Some("calloc") | Some("realloc") | Some("free") => {
                            scan.heap_calls.push(inst);
                        }
                        Some("exit") => scan.exit_calls.push(inst),
                        _ => {}
                    },
                    _ => {}
                }
            }
        }
        scan
    }

    /// Traces accumulate only for variables in the function's own scope
    fn record_observation(
        &self,
        func: &Function,
        stack_map: &mut StackMap,
        var: DebugVarId,
        obs: Observation,
    ) {
        let variable = self.debug.var(var);
        let in_scope = matches!(
            &variable.scope,
            VarScope::Local { function } if *function == func.name
        );
        if in_scope {
            stack_map.record(func, &variable.name, var, obs);
        }
    }

    /// Injects the Heap Table update for one allocator call, immediately
    /// after it
    fn handle_heap_operation(&mut self, func: &mut Function, call: Inst) {
        let callee = func
            .callee_name(call)
            .expect("heap operation is a call")
            .to_string();
        let args: Vec<Value> = match &func.insts[call] {
            InstData::Call { args, .. } => args.to_vec(),
            _ => return,
        };
        self.statistics.heap_operations += 1;

        if callee == "free" {
            let mut b = FuncBuilder::at_entry(func);
            b.after(call);
            let Some(ptr) = cast_to(&mut b, args[0], &void_ptr()) else {
                return;
            };
            let delete = b.func.import_function(
                api::DELETE_HEAP_ENTRY,
                Signature::new(vec![void_ptr()], None),
            );
            b.call(delete, &[ptr]);
            return;
        }

        let Some(result) = func.inst_result(call) else {
            return;
        };
        let allocated = allocation_type(func, call, result);
        let element_size = allocated.size_in_bytes().max(1) as i64;

        let mut b = FuncBuilder::at_entry(func);
        b.after(call);

        // Number of bytes requested: realloc carries it in the second
        // argument, calloc as a (count, size) pair, malloc in the first
        let quantity = match callee.as_str() {
            "realloc" => byte_count_to_elements(&mut b, args[1], element_size),
            "calloc" => {
                let nmemb = b.func.value_def(args[0]);
                let size = b.func.value_def(args[1]);
                if let (ValueDef::Const(Imm::Int(n)), ValueDef::Const(Imm::Int(s))) = (nmemb, size)
                {
                    b.iconst(Type::I64, n.wrapping_mul(s) / element_size)
                } else {
                    let lhs = widen_to_i64(&mut b, args[0]);
                    let rhs = widen_to_i64(&mut b, args[1]);
                    let bytes = b.binary(BinaryOp::Mul, lhs, rhs);
                    let divisor = b.iconst(Type::I64, element_size);
                    b.binary(BinaryOp::UDiv, bytes, divisor)
                }
            }
            _ => byte_count_to_elements(&mut b, args[0], element_size),
        };

        let Some(ptr) = cast_to(&mut b, result, &void_ptr()) else {
            return;
        };

        if callee == "realloc" {
            let update = b.func.import_function(
                api::UPDATE_HEAP_ENTRY_SIZE,
                Signature::new(vec![void_ptr(), Type::I64], None),
            );
            b.call(update, &[ptr, quantity]);
        } else {
            let Some(type_index) = self.reified.index_of_name(&ir_type_name(&allocated)) else {
                return;
            };
            let insert = b.func.import_function(
                api::INSERT_HEAP_ENTRY,
                Signature::new(vec![void_ptr(), Type::I64, Type::I64, Type::I32], None),
            );
            let index = b.iconst(Type::I32, type_index as i64);
            b.call(insert, &[ptr, quantity, quantity, index]);
        }
    }

    fn emit_full_heap_dump(&mut self, func: &mut Function, point: InsPoint, counter: Value) {
        let func_name = func.name.clone();
        let name = self.str_value(func, &func_name);
        let mut b = point.builder(func);
        let dump = b.func.import_function(
            api::INSPECT_ENTIRE_HEAP,
            Signature::new(vec![char_ptr(), Type::I32], None),
        );
        b.call(dump, &[name, counter]);
    }

    /// Reports every inspectable variable at `point`: locals in stack-map
    /// order, then statics
    #[allow(clippy::too_many_arguments)]
    fn create_inspection_point(
        &mut self,
        func: &mut Function,
        cfg: &ControlFlowGraph,
        domtree: &DominatorTree,
        stack_map: &StackMap,
        shadow: &mut ShadowMap,
        counter: Value,
        point: InsPoint,
        first_inspection: &mut bool,
    ) {
        log::debug!(target: "driver", "creating inspection point in {}", func.name);
        let scope = func.name.clone();
        let ins_block = point.block(func);

        if self.options.inspect_stack() || self.options.inspect_heap() {
            let traces: Vec<(String, Trace)> = stack_map.iter().cloned().collect();
            for (name, trace) in traces {
                let variable = self.debug.var(trace.var);
                if variable.artificial {
                    continue;
                }
                let Some(ty) = self.resolve_variable_type(variable.ty) else {
                    continue;
                };
                // Non-pointer locals live on the stack; skip them when the
                // stack was deselected
                if self.options.mem_filter()
                    && !self.options.select_stack
                    && !matches!(self.debug.ty(ty), DebugType::Derived { tag, .. } if *tag == gimli::DW_TAG_pointer_type)
                {
                    continue;
                }
                if *first_inspection {
                    self.statistics.variables_inspected += 1;
                }
                log::debug!(target: "driver", "inspecting variable {name}");
                let Some(def) = select_valid_def(
                    func,
                    cfg,
                    domtree,
                    &trace,
                    ins_block,
                    shadow,
                    &name,
                    self.statistics,
                ) else {
                    continue;
                };
                self.inspect_variable(
                    func, cfg, domtree, stack_map, shadow, point, &name, &scope, ty, def, counter,
                );
            }
        }

        if self.options.inspect_static() {
            let statics = self.statics.clone();
            let static_scope = format!("(Static) {scope}");
            for (var, global) in statics {
                let variable = self.debug.var(var);
                let name = variable.name.clone();
                let Some(ty) = self.resolve_variable_type(variable.ty) else {
                    continue;
                };
                log::debug!(target: "driver", "inspecting variable {name} (Static)");
                let global_ty = self.globals[global].ty.clone();
                let def = func.global_addr(global, global_ty);
                self.inspect_variable(
                    func,
                    cfg,
                    domtree,
                    stack_map,
                    shadow,
                    point,
                    &name,
                    &static_scope,
                    ty,
                    def,
                    counter,
                );
            }
        }

        *first_inspection = false;
    }

    /// Strips qualifiers and rejects variables that are never inspected
    fn resolve_variable_type(&self, ty: Option<DebugTypeId>) -> Option<DebugTypeId> {
        let resolved = self.debug.strip_qualifiers(ty?)?;
        match self.debug.ty(resolved) {
            DebugType::Subroutine => None,
            _ => Some(resolved),
        }
    }

    /// Type-directed dispatch of one variable's report call
    #[allow(clippy::too_many_arguments)]
    fn inspect_variable(
        &mut self,
        func: &mut Function,
        cfg: &ControlFlowGraph,
        domtree: &DominatorTree,
        stack_map: &StackMap,
        shadow: &mut ShadowMap,
        point: InsPoint,
        name: &str,
        scope: &str,
        ty: DebugTypeId,
        def: Value,
        counter: Value,
    ) {
        match self.debug.ty(ty).clone() {
            DebugType::Basic { .. } => {
                let format = type_format(self.debug, Some(ty));
                self.inspect_scalar(func, point, name, scope, def, format, counter, false);
            }
            DebugType::Derived { tag, base, .. } if tag == gimli::DW_TAG_pointer_type => {
                // Function pointers are never inspected
                if let Some(base) = base {
                    if matches!(self.debug.ty(base), DebugType::Subroutine) {
                        return;
                    }
                }
                self.inspect_pointer(func, point, name, scope, def, counter);
            }
            DebugType::Composite { tag, size_bits, .. } if tag == gimli::DW_TAG_union_type => {
                self.inspect_union(func, point, name, scope, def, size_bits, counter);
            }
            DebugType::Composite { tag, .. } if tag == gimli::DW_TAG_structure_type => {
                self.inspect_struct(func, point, name, scope, def, counter);
            }
            DebugType::Composite { tag, base, bounds, .. }
                if tag == gimli::DW_TAG_array_type =>
            {
                let scalar_elements = base
                    .map(|b| matches!(self.debug.ty(b), DebugType::Basic { .. }))
                    .unwrap_or(false);
                if !scalar_elements {
                    log::debug!(target: "driver", "not inspecting non-scalar array {name}");
                    return;
                }
                let format = type_format(self.debug, base);
                self.inspect_array(
                    func, cfg, domtree, stack_map, shadow, point, name, scope, def, &bounds,
                    format, counter,
                );
            }
            DebugType::Composite { tag, .. } if tag == gimli::DW_TAG_enumeration_type => {
                // Enumerations report as plain integers
                self.inspect_scalar(func, point, name, scope, def, Format::Int, counter, false);
            }
            _ => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn inspect_scalar(
        &mut self,
        func: &mut Function,
        point: InsPoint,
        name: &str,
        scope: &str,
        def: Value,
        format: Format,
        counter: Value,
        scalarized: bool,
    ) {
        let name_str = self.str_value(func, name);
        let scope_str = self.str_value(func, scope);
        let mut b = point.builder(func);
        let mut value = def;
        // Slots and shadowed variables are reported through their current
        // memory contents
        while b.func.value_type(value).is_pointer() {
            value = b.load(value);
        }
        let Some(bits) = bits_of(&mut b, value) else {
            return;
        };
        let inspect = b.func.import_function(
            api::INSPECT_SCALAR,
            Signature::new(
                vec![Type::U64, Type::I32, char_ptr(), char_ptr(), Type::I32, Type::I32],
                None,
            ),
        );
        let format = b.iconst(Type::I32, format.code() as i64);
        let scalarized = b.iconst(Type::I32, scalarized as i64);
        b.call(inspect, &[bits, format, name_str, scope_str, counter, scalarized]);
    }

    #[allow(clippy::too_many_arguments)]
    fn inspect_pointer(
        &mut self,
        func: &mut Function,
        point: InsPoint,
        name: &str,
        scope: &str,
        def: Value,
        counter: Value,
    ) {
        let name_str = self.str_value(func, name);
        let scope_str = self.str_value(func, scope);
        let mut b = point.builder(func);
        let mut value = def;
        // A slot holding the pointer is read once to get the pointer itself
        if is_slot(b.func, value) {
            value = b.load(value);
        }
        let Some(pointee) = b.func.value_type(value).pointee().cloned() else {
            return;
        };
        let Some(type_index) = self.reified.index_of_name(&ir_type_name(&pointee)) else {
            return;
        };
        let Some(ptr) = cast_to(&mut b, value, &void_ptr()) else {
            return;
        };
        let inspect = b.func.import_function(
            api::INSPECT_POINTER,
            Signature::new(
                vec![void_ptr(), Type::I32, char_ptr(), char_ptr(), Type::I32],
                None,
            ),
        );
        let index = b.iconst(Type::I32, type_index as i64);
        b.call(inspect, &[ptr, index, name_str, scope_str, counter]);
    }

    #[allow(clippy::too_many_arguments)]
    fn inspect_union(
        &mut self,
        func: &mut Function,
        point: InsPoint,
        name: &str,
        scope: &str,
        def: Value,
        size_bits: u64,
        counter: Value,
    ) {
        let name_str = self.str_value(func, name);
        let scope_str = self.str_value(func, scope);
        let mut b = point.builder(func);
        let value = deref_to_data_pointer(&mut b, def);
        if !b.func.value_type(value).is_pointer() {
            // Scalarised by optimisation; report through the scalar path
            drop(b);
            let format = ir_scalar_format(func.value_type(value));
            self.inspect_scalar(func, point, name, scope, value, format, counter, true);
            return;
        }
        let Some(ptr) = cast_to(&mut b, value, &void_ptr()) else {
            return;
        };
        let inspect = b.func.import_function(
            api::INSPECT_UNION,
            Signature::new(
                vec![void_ptr(), Type::I64, char_ptr(), char_ptr(), Type::I32],
                None,
            ),
        );
        let size = b.iconst(Type::I64, (size_bits / 8) as i64);
        b.call(inspect, &[ptr, size, name_str, scope_str, counter]);
    }

    #[allow(clippy::too_many_arguments)]
    fn inspect_struct(
        &mut self,
        func: &mut Function,
        point: InsPoint,
        name: &str,
        scope: &str,
        def: Value,
        counter: Value,
    ) {
        let name_str = self.str_value(func, name);
        let scope_str = self.str_value(func, scope);
        let mut b = point.builder(func);
        let value = deref_to_data_pointer(&mut b, def);
        if !b.func.value_type(value).is_pointer() {
            drop(b);
            let format = ir_scalar_format(func.value_type(value));
            self.inspect_scalar(func, point, name, scope, value, format, counter, true);
            return;
        }
        let Some(pointee) = b.func.value_type(value).pointee().cloned() else {
            return;
        };
        let Some(type_index) = self.reified.index_of_name(&ir_type_name(&pointee)) else {
            return;
        };
        let Some(ptr) = cast_to(&mut b, value, &void_ptr()) else {
            return;
        };
        let inspect = b.func.import_function(
            api::INSPECT_STRUCT,
            Signature::new(
                vec![void_ptr(), Type::I32, char_ptr(), char_ptr(), Type::I32],
                None,
            ),
        );
        let index = b.iconst(Type::I32, type_index as i64);
        b.call(inspect, &[ptr, index, name_str, scope_str, counter]);
    }

    /// Arrays of scalars report as their hash; the element counts of
    /// variable-length dimensions are recovered through the dimension
    /// variables' own traces
    #[allow(clippy::too_many_arguments)]
    fn inspect_array(
        &mut self,
        func: &mut Function,
        cfg: &ControlFlowGraph,
        domtree: &DominatorTree,
        stack_map: &StackMap,
        shadow: &mut ShadowMap,
        point: InsPoint,
        name: &str,
        scope: &str,
        def: Value,
        bounds: &[ArrayBound],
        format: Format,
        counter: Value,
    ) {
        let ins_block = point.block(func);
        let mut b = point.builder(func);
        let value = deref_to_data_pointer(&mut b, def);
        if !b.func.value_type(value).is_pointer() {
            drop(b);
            let scalar_format = ir_scalar_format(func.value_type(value));
            self.inspect_scalar(func, point, name, scope, value, scalar_format, counter, true);
            return;
        }
        let Some(ptr) = cast_to(&mut b, value, &void_ptr()) else {
            return;
        };
        drop(b);

        // One value per dimension: constants directly, dynamic bounds
        // through the dimension variables' authoritative definitions
        let mut dimensions = Vec::with_capacity(bounds.len());
        for bound in bounds {
            let Some(dimension) =
                self.bound_value(func, cfg, domtree, stack_map, shadow, ins_block, *bound)
            else {
                return;
            };
            dimensions.push(dimension);
        }
        let Some(step) = dimensions.last().copied() else {
            return;
        };

        // Total element count: folded when every dimension is constant,
        // otherwise a multiply chain at the inspection point
        let constants: Option<Vec<i64>> = dimensions
            .iter()
            .map(|d| match func.value_def(*d) {
                ValueDef::Const(Imm::Int(n)) => Some(n),
                _ => None,
            })
            .collect();
        let total = match constants {
            Some(ns) => func.constant(Type::I64, Imm::Int(ns.iter().product())),
            None => {
                let mut b = point.builder(func);
                let mut acc = b.iconst(Type::I64, 1);
                for dimension in dimensions.iter() {
                    let widened = widen_to_i64(&mut b, *dimension);
                    acc = b.binary(BinaryOp::Mul, acc, widened);
                }
                acc
            }
        };

        let name_str = self.str_value(func, name);
        let scope_str = self.str_value(func, scope);
        let mut b = point.builder(func);
        let step = widen_to_i64(&mut b, step);
        let hashcode = b.func.import_function(
            api::COMPUTE_HASHCODE,
            Signature::new(
                vec![void_ptr(), Type::I64, Type::I64, Type::I32],
                Some(Type::I32),
            ),
        );
        let format_arg = b.iconst(Type::I32, format.code() as i64);
        let hash = b
            .call(hashcode, &[ptr, total, step, format_arg])
            .expect("hashcode call produces a value");
        let inspect = b.func.import_function(
            api::INSPECT_SCALAR,
            Signature::new(
                vec![Type::U64, Type::I32, char_ptr(), char_ptr(), Type::I32, Type::I32],
                None,
            ),
        );
        let bits = b.cast(CastKind::ZExt, hash, Type::U64);
        let int_format = b.iconst(Type::I32, Format::Int.code() as i64);
        let not_scalarized = b.iconst(Type::I32, 0);
        b.call(
            inspect,
            &[bits, int_format, name_str, scope_str, counter, not_scalarized],
        );
    }

    /// The runtime value of one array bound: a constant, or the dimension
    /// variable's authoritative definition at the inspection point
    #[allow(clippy::too_many_arguments)]
    fn bound_value(
        &mut self,
        func: &mut Function,
        cfg: &ControlFlowGraph,
        domtree: &DominatorTree,
        stack_map: &StackMap,
        shadow: &mut ShadowMap,
        ins_block: Block,
        bound: ArrayBound,
    ) -> Option<Value> {
        match bound {
            ArrayBound::Constant(n) => Some(func.constant(Type::I64, Imm::Int(n))),
            ArrayBound::Variable(var) => {
                let var_name = self.debug.var(var).name.clone();
                let trace = stack_map
                    .iter()
                    .find(|(name, _)| *name == var_name)
                    .map(|(_, trace)| trace.clone())?;
                let def = select_valid_def(
                    func,
                    cfg,
                    domtree,
                    &trace,
                    ins_block,
                    shadow,
                    &var_name,
                    self.statistics,
                )?;
                Some(def)
            }
        }
    }
}

#[derive(Default)]
struct FunctionScan {
    stack_map: StackMap,
    heap_calls: Vec<Inst>,
    exit_calls: Vec<Inst>,
}

/// Whether `value` is a stack slot or a module global, i.e. an address that
/// must be read to get the variable's value
fn is_slot(func: &Function, value: Value) -> bool {
    match func.value_def(value) {
        ValueDef::Global(_) => true,
        ValueDef::Inst(inst) => matches!(func.insts[inst], InstData::Alloca { .. }),
        _ => false,
    }
}

/// Reads through pointer-to-pointer chains until the value is a plain data
/// pointer (or not a pointer at all, for scalarised aggregates)
fn deref_to_data_pointer(b: &mut FuncBuilder<'_>, mut value: Value) -> Value {
    loop {
        let ty = b.func.value_type(value);
        match ty.pointee() {
            Some(pointee) if pointee.is_pointer() => value = b.load(value),
            _ => return value,
        }
    }
}

/// Converts `value` to `ty` with the best valid cast, or returns the value
/// unchanged when the types already agree. `None` means no valid conversion
/// exists and the variable is skipped.
fn cast_to(b: &mut FuncBuilder<'_>, value: Value, ty: &Type) -> Option<Value> {
    let from = b.func.value_type(value).clone();
    if from == *ty {
        return Some(value);
    }
    let kind = valid_cast(&from, ty)?;
    Some(b.cast(kind, value, ty.clone()))
}

/// Widens an integer byte/element count to `i64`
fn widen_to_i64(b: &mut FuncBuilder<'_>, value: Value) -> Value {
    match b.func.value_type(value) {
        Type::I64 | Type::U64 => value,
        _ => b.cast(CastKind::ZExt, value, Type::I64),
    }
}

/// The raw 64-bit payload of a scalar value, for the scalar-inspection call.
/// Returns `None` for values with no scalar payload.
fn bits_of(b: &mut FuncBuilder<'_>, value: Value) -> Option<Value> {
    let ty = b.func.value_type(value).clone();
    match ty {
        Type::F64 => Some(b.cast(CastKind::Bitcast, value, Type::U64)),
        Type::F32 => {
            let raw = b.cast(CastKind::Bitcast, value, Type::U32);
            Some(b.cast(CastKind::ZExt, raw, Type::U64))
        }
        Type::U64 => Some(value),
        Type::I64 => Some(b.cast(CastKind::Bitcast, value, Type::U64)),
        ty if ty.is_integer() => Some(b.cast(CastKind::ZExt, value, Type::U64)),
        Type::Ptr(_) => Some(b.cast(CastKind::PtrToInt, value, Type::U64)),
        _ => None,
    }
}

/// The element type of an allocation: the pointee of the first bitcast of
/// the allocator's result when one immediately follows, otherwise the raw
/// return type's pointee
fn allocation_type(func: &Function, call: Inst, result: Value) -> Type {
    let block = func.block_of(call).expect("allocator call is inserted");
    let position = func.position_in_block(call).unwrap();
    for inst in func.blocks[block].insts[position + 1..].iter() {
        let data = &func.insts[*inst];
        if data.is_debug() {
            continue;
        }
        if let InstData::Cast {
            kind: CastKind::Bitcast,
            arg,
        } = data
        {
            if *arg == result {
                if let Some(result_value) = func.inst_result(*inst) {
                    if let Some(pointee) = func.value_type(result_value).pointee() {
                        return pointee.clone();
                    }
                }
            }
        }
        break;
    }
    func.value_type(result)
        .pointee()
        .cloned()
        .unwrap_or(Type::I8)
}

/// The report format of a scalarised aggregate, chosen from the IR type of
/// the value that replaced it
fn ir_scalar_format(ty: &Type) -> Format {
    match ty {
        Type::F64 => Format::Double,
        Type::F32 => Format::Float,
        Type::I16 => Format::Short,
        Type::I64 => Format::Long,
        Type::I8 => Format::Char,
        Type::U8 => Format::UChar,
        Type::U16 => Format::UShort,
        Type::U64 => Format::ULong,
        Type::U32 => Format::UInt,
        _ => Format::Int,
    }
}

/// Element count from a byte count: folded at compile time for constants,
/// an unsigned divide at run time otherwise
fn byte_count_to_elements(b: &mut FuncBuilder<'_>, bytes: Value, element_size: i64) -> Value {
    if let ValueDef::Const(Imm::Int(n)) = b.func.value_def(bytes) {
        return b.iconst(Type::I64, n / element_size);
    }
    let bytes = widen_to_i64(b, bytes);
    let divisor = b.iconst(Type::I64, element_size);
    b.binary(BinaryOp::UDiv, bytes, divisor)
}
