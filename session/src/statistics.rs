use std::fmt;

/// Counters gathered while instrumenting a module, reported at the end of
/// the pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct Statistics {
    /// Number of functions instrumented
    pub functions_instrumented: usize,
    /// Number of variables inspected
    pub variables_inspected: usize,
    /// Number of live ranges extended with a merge node
    pub live_ranges_extended: usize,
    /// Number of variables shadowed in the stack
    pub variables_shadowed: usize,
    /// Number of heap operations intercepted
    pub heap_operations: usize,
    /// Number of variables whose trace mixes more than one SSA type
    pub mixed_type_variables: usize,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:6} functions instrumented", self.functions_instrumented)?;
        writeln!(f, "{:6} variables inspected", self.variables_inspected)?;
        writeln!(f, "{:6} live ranges extended", self.live_ranges_extended)?;
        writeln!(f, "{:6} variables shadowed in the stack", self.variables_shadowed)?;
        writeln!(f, "{:6} heap operations", self.heap_operations)?;
        write!(f, "{:6} variables with mixed SSA types", self.mixed_type_variables)
    }
}
