/// Usage-mode configuration for one instrumentation session.
///
/// The booleans record which memory regions the user *explicitly* selected.
/// When none is selected, every region is inspected; selecting any region
/// restricts inspection to the selected ones. Selecting the heap implies
/// precise pointer tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Install inspection points only in `main`
    pub only_main: bool,
    /// Inspect stack-resident locals
    pub select_stack: bool,
    /// Inspect variables in static memory
    pub select_static: bool,
    /// Inspect variables pointing into the heap
    pub select_heap: bool,
    /// Follow pointers instead of printing `pointer to T`
    pub precise: bool,
    /// Dump every live heap entry after each inspection point
    pub full_heap: bool,
}

impl Options {
    /// Whether any memory region was explicitly selected
    pub fn mem_filter(&self) -> bool {
        self.select_stack || self.select_static || self.select_heap
    }

    pub fn inspect_stack(&self) -> bool {
        !self.mem_filter() || self.select_stack
    }

    pub fn inspect_static(&self) -> bool {
        !self.mem_filter() || self.select_static
    }

    pub fn inspect_heap(&self) -> bool {
        !self.mem_filter() || self.select_heap
    }

    /// Precise mode: requested explicitly, or implied by heap selection
    pub fn track_pointers(&self) -> bool {
        self.precise || self.select_heap
    }

    /// Whether non-`main` functions still need heap-table updates under
    /// `only_main`
    pub fn needs_heap_tracking_everywhere(&self) -> bool {
        self.track_pointers() || self.full_heap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_inspect_every_region() {
        let options = Options::default();
        assert!(!options.mem_filter());
        assert!(options.inspect_stack());
        assert!(options.inspect_static());
        assert!(options.inspect_heap());
        assert!(!options.track_pointers());
    }

    #[test]
    fn manual_selection_turns_the_others_off() {
        let options = Options {
            select_stack: true,
            ..Options::default()
        };
        assert!(options.inspect_stack());
        assert!(!options.inspect_static());
        assert!(!options.inspect_heap());
    }

    #[test]
    fn heap_selection_implies_precise() {
        let options = Options {
            select_heap: true,
            ..Options::default()
        };
        assert!(options.track_pointers());
    }
}
