//! The runtime context: all process-wide state of an instrumented program.
//!
//! The original design kept the type table, heap table, mode flags and
//! output file as loose globals; here they are packaged in [`Runtime`],
//! with the injected entry points funnelling through one process lock
//! ([`with_runtime`]). The runtime assumes a single-threaded mutator; the
//! lock exists so the process-wide state has a well-defined owner, not to
//! make concurrent snapshots meaningful.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::{Mutex, OnceLock, PoisonError},
};

use crate::{heap::HeapTable, table::TypeTable, Error};

/// Usage-mode flags recorded at initialisation
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeOptions {
    /// Inspect variables pointing into the heap
    pub inspect_heap: bool,
    /// Inspect stack-resident data reached through pointers
    pub inspect_stack: bool,
    /// Whether any memory region was explicitly selected
    pub mem_filter: bool,
    /// Follow pointers instead of reporting their declared type
    pub precise: bool,
}

impl RuntimeOptions {
    pub fn new(inspect_heap: bool, inspect_stack: bool, precise: bool) -> Self {
        Self {
            inspect_heap,
            inspect_stack,
            mem_filter: inspect_heap || inspect_stack,
            precise,
        }
    }
}

/// The process-wide runtime state of an instrumented program
#[derive(Default)]
pub struct Runtime {
    pub options: RuntimeOptions,
    pub types: TypeTable,
    pub heap: HeapTable,
    out: Option<Box<dyn Write + Send>>,
}

impl Runtime {
    pub fn new(types: TypeTable, options: RuntimeOptions) -> Self {
        Self {
            options,
            types,
            heap: HeapTable::default(),
            out: None,
        }
    }

    /// Loads the Type Table and records the mode flags.
    ///
    /// A missing or truncated table file is fatal for an instrumented
    /// program; the C-ABI wrapper turns this error into process exit.
    pub fn load_type_table(
        &mut self,
        path: &Path,
        count: usize,
        options: RuntimeOptions,
    ) -> Result<(), Error> {
        let file = File::open(path).map_err(|source| Error::OpenTypeTable {
            path: path.display().to_string(),
            source,
        })?;
        let mut reader = std::io::BufReader::new(file);
        self.types = TypeTable::read(&mut reader, count)?;
        self.options = options;
        log::debug!(target: "runtime", "loaded {} type descriptors from {}", count, path.display());
        Ok(())
    }

    /// Opens the snapshot output file for overwrite.
    ///
    /// Telemetry is best-effort: on failure the runtime simply stays silent.
    pub fn open_output(&mut self, path: &Path) {
        match File::create(path) {
            Ok(file) => self.out = Some(Box::new(BufWriter::new(file))),
            Err(err) => {
                log::warn!(target: "runtime", "cannot open output file {}: {err}", path.display());
                self.out = None;
            }
        }
    }

    /// Redirects snapshot output to an arbitrary sink
    pub fn set_output(&mut self, sink: Box<dyn Write + Send>) {
        self.out = Some(sink);
    }

    /// Flushes and closes the output file; called on every halt path
    pub fn close_output(&mut self) {
        if let Some(mut out) = self.out.take() {
            let _ = out.flush();
        }
    }

    pub(crate) fn write_fmt(&mut self, args: std::fmt::Arguments<'_>) {
        if let Some(out) = self.out.as_mut() {
            let _ = out.write_fmt(args);
        }
    }
}

fn runtime() -> &'static Mutex<Runtime> {
    static RUNTIME: OnceLock<Mutex<Runtime>> = OnceLock::new();
    RUNTIME.get_or_init(|| Mutex::new(Runtime::default()))
}

/// Runs `f` with exclusive access to the process-wide runtime
pub fn with_runtime<T>(f: impl FnOnce(&mut Runtime) -> T) -> T {
    let mut guard = runtime().lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}
