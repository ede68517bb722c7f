//! # Whiro runtime
//!
//! The library linked into instrumented programs. The instrumentation
//! driver injects calls to the `whiro_*` entry points defined here: the
//! runtime loads the Type Table at startup, maintains the Heap Table as the
//! program allocates and frees memory, and renders snapshots of program
//! state at inspection points into the program's output file.
//!
//! All process-wide state lives in [`Runtime`], reachable through
//! [`with_runtime`]; the C-ABI layer at the bottom of this crate is a thin
//! shim over it. Library consumers (tests, the instrumenter) use the safe
//! Rust surface directly.

mod context;
mod hash;
mod heap;
mod inspect;
mod table;

use std::{
    ffi::{c_char, c_void, CStr},
    path::Path,
};

pub use self::{
    context::{with_runtime, Runtime, RuntimeOptions},
    hash::{compute_hashcode, compute_hashcode_1d, FP_PRECISION},
    heap::{HeapData, HeapEntry, HeapTable},
    inspect::{array_index_name, render_scalar},
    table::{FieldDescriptor, Format, TypeDescriptor, TypeTable, MAX_NAME_LENGTH},
};

/// Errors surfaced while initialising the runtime
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error opening Type Table file {path}")]
    OpenTypeTable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("truncated Type Table file")]
    Truncated(#[from] std::io::Error),
    #[error("invalid format code {0} in Type Table")]
    InvalidFormat(i32),
    #[error("invalid field count {0} in Type Table")]
    InvalidFieldCount(i32),
}

/// Symbol names of the injected entry points, shared with the
/// instrumentation driver so the two sides cannot drift apart
pub mod api {
    pub const OPEN_OUTPUT: &str = "whiro_open_output";
    pub const CLOSE_OUTPUT: &str = "whiro_close_output";
    pub const OPEN_TYPE_TABLE: &str = "whiro_open_type_table";
    pub const INSERT_HEAP_ENTRY: &str = "whiro_insert_heap_entry";
    pub const UPDATE_HEAP_ENTRY_SIZE: &str = "whiro_update_heap_entry_size";
    pub const DELETE_HEAP_ENTRY: &str = "whiro_delete_heap_entry";
    pub const INSPECT_SCALAR: &str = "whiro_inspect_scalar";
    pub const INSPECT_POINTER: &str = "whiro_inspect_pointer";
    pub const INSPECT_UNION: &str = "whiro_inspect_union";
    pub const INSPECT_STRUCT: &str = "whiro_inspect_struct";
    pub const INSPECT_ENTIRE_HEAP: &str = "whiro_inspect_entire_heap";
    pub const COMPUTE_HASHCODE: &str = "whiro_compute_hashcode";
}

unsafe fn cstr<'a>(ptr: *const c_char) -> &'a str {
    if ptr.is_null() {
        return "";
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("")
}

/// Opens the snapshot output file; injected at `main` entry.
///
/// # Safety
///
/// `path` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn whiro_open_output(path: *const c_char) {
    let path = unsafe { cstr(path) }.to_string();
    with_runtime(|rt| rt.open_output(Path::new(&path)));
}

/// Closes the output file; injected on every halt path.
#[no_mangle]
pub extern "C" fn whiro_close_output() {
    with_runtime(|rt| rt.close_output());
}

/// Loads the Type Table and records the usage-mode flags; injected at
/// `main` entry. A missing or unreadable table terminates the process.
///
/// # Safety
///
/// `path` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn whiro_open_type_table(
    path: *const c_char,
    count: i32,
    ins_heap: i32,
    ins_stack: i32,
    precise: i32,
) {
    let path = unsafe { cstr(path) }.to_string();
    let options = RuntimeOptions::new(ins_heap != 0, ins_stack != 0, precise != 0);
    let result = with_runtime(|rt| {
        rt.load_type_table(Path::new(&path), count.max(0) as usize, options)
    });
    if let Err(err) = result {
        eprintln!("whiro: {err}");
        std::process::exit(1);
    }
}

/// Records an allocation; injected after `malloc`/`calloc` returns.
#[no_mangle]
pub extern "C" fn whiro_insert_heap_entry(
    addr: *mut c_void,
    size: i64,
    array_step: i64,
    type_index: i32,
) {
    with_runtime(|rt| rt.heap.insert(addr as usize, size, array_step, type_index));
}

/// Records a reallocation; injected after `realloc` returns.
#[no_mangle]
pub extern "C" fn whiro_update_heap_entry_size(addr: *mut c_void, new_size: i64) {
    with_runtime(|rt| rt.heap.update_size(addr as usize, new_size));
}

/// Records a deallocation; injected after `free`.
#[no_mangle]
pub extern "C" fn whiro_delete_heap_entry(addr: *mut c_void) {
    with_runtime(|rt| rt.heap.delete(addr as usize));
}

/// Reports a scalar value carried in `bits`; injected at inspection points.
///
/// # Safety
///
/// `name` and `func` must be null or NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn whiro_inspect_scalar(
    bits: u64,
    format: i32,
    name: *const c_char,
    func: *const c_char,
    call: i32,
    scalarized: i32,
) {
    let Some(format) = Format::from_code(format) else {
        return;
    };
    let (name, func) = unsafe { (cstr(name), cstr(func)) };
    with_runtime(|rt| rt.inspect_scalar(bits, format, name, func, call, scalarized != 0));
}

/// Reports a pointer variable; injected at inspection points.
///
/// # Safety
///
/// `name`/`func` as in [`whiro_inspect_scalar`]; in precise mode `ptr` is
/// dereferenced when it is a live heap allocation or above the text segment.
#[no_mangle]
pub unsafe extern "C" fn whiro_inspect_pointer(
    ptr: *const c_void,
    type_index: i32,
    name: *const c_char,
    func: *const c_char,
    call: i32,
) {
    let (name, func) = unsafe { (cstr(name), cstr(func)) };
    with_runtime(|rt| unsafe { rt.inspect_pointer(ptr, type_index, name, func, call) });
}

/// Reports a union variable as its raw bytes; injected at inspection points.
///
/// # Safety
///
/// `bytes` must be readable for `size` bytes; strings as above.
#[no_mangle]
pub unsafe extern "C" fn whiro_inspect_union(
    bytes: *const c_void,
    size: i64,
    name: *const c_char,
    func: *const c_char,
    call: i32,
) {
    let (name, func) = unsafe { (cstr(name), cstr(func)) };
    with_runtime(|rt| unsafe { rt.inspect_union(bytes as *const u8, size, name, func, call) });
}

/// Reports a struct variable; injected at inspection points.
///
/// # Safety
///
/// `obj` must point to a live object of the indexed type; strings as above.
#[no_mangle]
pub unsafe extern "C" fn whiro_inspect_struct(
    obj: *const c_void,
    type_index: i32,
    name: *const c_char,
    func: *const c_char,
    call: i32,
) {
    let (name, func) = unsafe { (cstr(name), cstr(func)) };
    with_runtime(|rt| unsafe { rt.inspect_struct(obj as *const u8, type_index, name, func, call) });
}

/// Digest of a scalar array; injected for array-typed variables.
///
/// # Safety
///
/// `array` must hold `total_elements` readable elements of the format's size.
#[no_mangle]
pub unsafe extern "C" fn whiro_compute_hashcode(
    array: *const c_void,
    total_elements: i64,
    step: i64,
    format: i32,
) -> i32 {
    let Some(format) = Format::from_code(format) else {
        return 0;
    };
    unsafe { compute_hashcode(array, total_elements, step, format) }
}

/// Dumps every live heap entry; injected after inspection points in
/// full-heap mode.
///
/// # Safety
///
/// `func` must be null or a NUL-terminated string; every non-free heap
/// entry must describe live memory.
#[no_mangle]
pub unsafe extern "C" fn whiro_inspect_entire_heap(func: *const c_char, call: i32) {
    let func = unsafe { cstr(func) };
    with_runtime(|rt| unsafe { rt.inspect_entire_heap(func, call) });
}
