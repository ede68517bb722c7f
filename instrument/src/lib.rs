//! # Whiro instrumentation engine
//!
//! The compile-time half of Whiro. Given an already-parsed IR [`Module`]
//! with DWARF-style debug metadata, the engine:
//!
//! 1. reifies the module's debug-type graph into the on-disk Type Table
//!    ([`reify`]);
//! 2. reconstructs a usable value for every source variable at each
//!    inspection point, repairing live ranges with merge nodes or shadow
//!    stack slots where optimisation cut them short ([`liveness`]);
//! 3. rewrites every function with call counters, allocator interception,
//!    and the injected inspection calls ([`driver`]).
//!
//! The rewritten module plus the Type Table file are the two outputs; the
//! runtime half lives in `whiro-runtime`.
//!
//! [`Module`]: whiro_ir::Module

pub mod driver;
pub mod liveness;
pub mod reify;

use std::path::PathBuf;

use anyhow::Context;
use whiro_ir::Module;
use whiro_session::Session;

pub use self::{
    driver::{instrument_module, Instrumented},
    reify::ReifiedTypes,
};

/// Instruments `module` in place and writes the Type Table file next to the
/// program's sources, following the `<stem>_TypeTable.bin` convention.
/// Returns the path written.
pub fn instrument_and_write(module: &mut Module, session: &mut Session) -> anyhow::Result<PathBuf> {
    let artifact = instrument_module(module, session)?;
    let path = PathBuf::from(whiro_session::type_table_file_name(&module.source_file));
    std::fs::write(&path, &artifact.type_table)
        .with_context(|| format!("cannot write Type Table file {}", path.display()))?;
    log::debug!(
        target: "driver",
        "wrote {} descriptors to {}",
        artifact.type_count,
        path.display()
    );
    Ok(path)
}
