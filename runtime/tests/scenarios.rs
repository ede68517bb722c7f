//! End-to-end inspection scenarios against a local runtime instance with a
//! captured output sink.

use std::{
    ffi::c_void,
    io::Write,
    sync::{Arc, Mutex},
};

use whiro_runtime::{
    compute_hashcode, FieldDescriptor, Format, Runtime, RuntimeOptions, TypeDescriptor, TypeTable,
};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn precise_runtime(types: TypeTable) -> (Runtime, SharedBuf) {
    let mut runtime = Runtime::new(types, RuntimeOptions::new(false, false, true));
    let buf = SharedBuf::default();
    runtime.set_output(Box::new(buf.clone()));
    (runtime, buf)
}

fn node_descriptor() -> TypeDescriptor {
    TypeDescriptor {
        name: "struct Node".to_string(),
        fields: vec![
            FieldDescriptor {
                name: "data".to_string(),
                format: Format::Long,
                offset: 0,
                base_type_index: Format::Long.code(),
            },
            FieldDescriptor {
                name: "next".to_string(),
                format: Format::Pointer,
                offset: 8,
                base_type_index: 1,
            },
        ],
    }
}

/// `struct Node { long data; struct Node* next; }` with the scalar entry
/// first: index 0 = long, index 1 = struct Node
fn node_table() -> TypeTable {
    TypeTable::from_descriptors(vec![
        TypeDescriptor::single("long int", Format::Long, 0, Format::Long.code()),
        node_descriptor(),
    ])
}

#[repr(C)]
struct Node {
    data: i64,
    next: *const Node,
}

#[test]
fn linked_list_traversal() {
    let (mut runtime, buf) = precise_runtime(node_table());

    let tail = Box::into_raw(Box::new(Node {
        data: 0,
        next: std::ptr::null(),
    }));
    let head = Box::into_raw(Box::new(Node {
        data: 1,
        next: tail,
    }));
    runtime.heap.insert(tail as usize, 1, 1, 1);
    runtime.heap.insert(head as usize, 1, 1, 1);

    unsafe { runtime.inspect_pointer(head as *const c_void, 1, "n", "main", 1) };

    let output = buf.contents();
    assert_eq!(
        output,
        "n-data main 1 : 1\n\
         n-next-data main 1 : 0\n\
         n-next-next main 1 : NULL\n"
    );
    // The cycle guard is scoped to one top-level inspection
    assert!(runtime.heap.addresses().all(|a| !runtime.heap.lookup(a).unwrap().visited));

    unsafe {
        drop(Box::from_raw(head));
        drop(Box::from_raw(tail));
    }
}

#[test]
fn reallocated_buffer_hashes_all_elements() {
    let table = TypeTable::from_descriptors(vec![TypeDescriptor::single(
        "int",
        Format::Int,
        0,
        Format::Int.code(),
    )]);
    let (mut runtime, buf) = precise_runtime(table);

    let values: Vec<i32> = vec![1, 2, 3, 4, 5, 6, 7, 8];
    let addr = values.as_ptr() as usize;
    // malloc(4 * sizeof(int)) then realloc(p, 8 * sizeof(int))
    runtime.heap.insert(addr, 4, 4, 0);
    runtime.heap.update_size(addr, 8);

    unsafe { runtime.inspect_pointer(addr as *const c_void, 0, "p", "main", 1) };

    let expected = unsafe { compute_hashcode(addr as *const c_void, 8, 8, Format::Int) };
    assert_eq!(buf.contents(), format!("p main 1 : {expected}\n"));
}

#[test]
fn freed_pointer_reports_freed() {
    let table = TypeTable::from_descriptors(vec![TypeDescriptor::single(
        "int",
        Format::Int,
        0,
        Format::Int.code(),
    )]);
    let (mut runtime, buf) = precise_runtime(table);

    let addr = 0xdead_0000usize;
    runtime.heap.insert(addr, 4, 4, 0);
    runtime.heap.delete(addr);

    unsafe { runtime.inspect_pointer(addr as *const c_void, 0, "q", "main", 1) };
    assert_eq!(buf.contents(), "q main 1 : freed\n");
}

#[test]
fn union_renders_bytes_in_memory_order() {
    let table = TypeTable::from_descriptors(vec![]);
    let (mut runtime, buf) = precise_runtime(table);

    let value: i32 = 0x0102_0304;
    let bytes = value.to_ne_bytes();
    unsafe { runtime.inspect_union(bytes.as_ptr(), 4, "u", "main", 1) };

    if cfg!(target_endian = "little") {
        assert_eq!(buf.contents(), "u main 1 : 4321\n");
    } else {
        assert_eq!(buf.contents(), "u main 1 : 1234\n");
    }
}

#[test]
fn cyclic_heap_graph_terminates() {
    let (mut runtime, buf) = precise_runtime(node_table());

    let a = Box::into_raw(Box::new(Node {
        data: 10,
        next: std::ptr::null(),
    }));
    let b = Box::into_raw(Box::new(Node {
        data: 20,
        next: a,
    }));
    unsafe { (*a).next = b };
    runtime.heap.insert(a as usize, 1, 1, 1);
    runtime.heap.insert(b as usize, 1, 1, 1);

    unsafe { runtime.inspect_pointer(a as *const c_void, 1, "a", "main", 1) };

    // A's fields, then B's fields, and no re-entry into A
    assert_eq!(
        buf.contents(),
        "a-data main 1 : 10\n\
         a-next-data main 1 : 20\n"
    );
    assert!(runtime.heap.addresses().all(|x| !runtime.heap.lookup(x).unwrap().visited));

    unsafe {
        drop(Box::from_raw(a));
        drop(Box::from_raw(b));
    }
}

#[test]
fn full_heap_dump_uses_the_synthetic_name() {
    let table = TypeTable::from_descriptors(vec![TypeDescriptor::single(
        "int",
        Format::Int,
        0,
        Format::Int.code(),
    )]);
    let (mut runtime, buf) = precise_runtime(table);

    let live = [42i32];
    let freed = [7i32];
    runtime.heap.insert(live.as_ptr() as usize, 1, 1, 0);
    runtime.heap.insert(freed.as_ptr() as usize, 1, 1, 0);
    runtime.heap.delete(freed.as_ptr() as usize);

    unsafe { runtime.inspect_entire_heap("main", 1) };

    assert_eq!(buf.contents(), "Heap Data main 1 : 42\n");
    assert!(runtime.heap.addresses().all(|a| !runtime.heap.lookup(a).unwrap().visited));
}

#[test]
fn pointer_array_entries_recurse_slot_by_slot() {
    // Table: 0 = long, 1 = struct Node, 2 = pointer to struct Node
    let table = TypeTable::from_descriptors(vec![
        TypeDescriptor::single("long int", Format::Long, 0, Format::Long.code()),
        node_descriptor(),
        TypeDescriptor::single("pointer to struct Node", Format::Pointer, 0, 1),
    ]);
    let (mut runtime, buf) = precise_runtime(table);

    let node = Box::into_raw(Box::new(Node {
        data: 5,
        next: std::ptr::null(),
    }));
    let slots: Vec<*const Node> = vec![node, std::ptr::null()];
    runtime.heap.insert(node as usize, 1, 1, 1);
    runtime.heap.insert(slots.as_ptr() as usize, 2, 2, 2);

    unsafe { runtime.inspect_pointer(slots.as_ptr() as *const c_void, 2, "v", "main", 1) };

    assert_eq!(
        buf.contents(),
        "v[0]-data main 1 : 5\n\
         v[0]-next main 1 : NULL\n\
         v[1] main 1 : NULL\n"
    );

    unsafe { drop(Box::from_raw(node)) };
}

#[test]
fn null_pointer_is_never_followed() {
    let (mut runtime, buf) = precise_runtime(node_table());
    unsafe { runtime.inspect_pointer(std::ptr::null(), 1, "p", "f", 3) };
    assert_eq!(buf.contents(), "p f 3 : NULL\n");
}

#[cfg(target_os = "linux")]
#[test]
fn pointer_below_etext_is_suppressed() {
    let (mut runtime, buf) = precise_runtime(node_table());
    // A small integer-derived pointer: not null, not in the heap table, and
    // well below the text segment boundary
    unsafe { runtime.inspect_pointer(0x10 as *const c_void, 1, "p", "f", 1) };
    assert_eq!(buf.contents(), "");
}

#[test]
fn fast_mode_names_the_pointee() {
    let mut runtime = Runtime::new(node_table(), RuntimeOptions::new(false, false, false));
    let buf = SharedBuf::default();
    runtime.set_output(Box::new(buf.clone()));

    unsafe { runtime.inspect_pointer(0x1000 as *const c_void, 1, "n", "main", 2) };
    assert_eq!(buf.contents(), "n main 2 : pointer to struct Node\n");
}

#[test]
fn scalar_rendering_matches_the_format_specifiers() {
    let table = TypeTable::from_descriptors(vec![]);
    let (mut runtime, buf) = precise_runtime(table);

    runtime.inspect_scalar((-3i32 as u32) as u64, Format::Int, "i", "f", 1, false);
    runtime.inspect_scalar(2.5f64.to_bits(), Format::Double, "d", "f", 1, false);
    runtime.inspect_scalar(b'A' as u64, Format::Char, "c", "f", 1, false);
    runtime.inspect_scalar(0x01, Format::Char, "nc", "f", 1, false);
    runtime.inspect_scalar(7, Format::Int, "s", "f", 1, true);

    assert_eq!(
        buf.contents(),
        "i f 1 : -3\n\
         d f 1 : 2.50\n\
         c f 1 : A\n\
         nc f 1 : @\n\
         s f 1 (scalarized) : 7\n"
    );
}
