//! The Composite Inspector: type-directed rendering of program state.
//!
//! Every reported line has the form `NAME SCOPE CALL : VALUE`. Dispatch is
//! on the field's [`Format`]: scalars render directly, pointers are either
//! named (`pointer to T`) or followed through the heap table, unions are
//! byte-dumped, nested structs recurse, and scalar arrays collapse to their
//! hash. Pointer traversal is depth-first with the heap entries' visited
//! bits as the cycle guard, reset when the outermost inspection returns.

use std::ffi::c_void;

use crate::{
    context::Runtime,
    hash::compute_hashcode,
    heap::HeapData,
    table::{Format, TypeDescriptor},
};

/// `[i]`, the suffix appended to a pointer-array slot's name
pub fn array_index_name(index: i64) -> String {
    format!("[{index}]")
}

/// End of the executable's text segment.
///
/// Pointers that are neither null nor known to the heap table are only
/// dereferenced when they point past this boundary; anything below it is
/// code, not data, and following it could fault. On platforms without the
/// ELF boundary symbol every such pointer is refused.
#[cfg(target_os = "linux")]
pub(crate) fn text_segment_end() -> usize {
    extern "C" {
        static etext: libc::c_char;
    }
    unsafe { &etext as *const libc::c_char as usize }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn text_segment_end() -> usize {
    usize::MAX
}

/// Reads the element at `ptr` as raw 64-bit payload per `format`.
///
/// # Safety
///
/// `ptr` must be readable for the size implied by `format`.
unsafe fn read_bits(ptr: *const u8, format: Format) -> u64 {
    unsafe {
        match format.size_in_bytes() {
            1 => ptr.read_unaligned() as u64,
            2 => (ptr as *const u16).read_unaligned() as u64,
            4 => (ptr as *const u32).read_unaligned() as u64,
            8 => (ptr as *const u64).read_unaligned(),
            _ => 0,
        }
    }
}

/// Renders a scalar from its raw 64-bit payload, with the format
/// specifiers of the original tool (`%.2lf`, `%hi`, `@` for non-printable
/// characters, and so on)
pub fn render_scalar(bits: u64, format: Format) -> String {
    fn printable(byte: u8) -> bool {
        (0x20..=0x7e).contains(&byte)
    }
    match format {
        Format::Double => format!("{:.2}", f64::from_bits(bits)),
        Format::Float => format!("{:.2}", f32::from_bits(bits as u32)),
        Format::Short => (bits as u16 as i16).to_string(),
        Format::Long | Format::LongLong => (bits as i64).to_string(),
        Format::Int => (bits as u32 as i32).to_string(),
        Format::Char => {
            let byte = bits as u8;
            if printable(byte) {
                (byte as char).to_string()
            } else {
                "@".to_string()
            }
        }
        Format::UChar => {
            let byte = bits as u8;
            if printable(byte) {
                byte.to_string()
            } else {
                "@".to_string()
            }
        }
        Format::UShort => (bits as u16).to_string(),
        Format::ULong | Format::ULongLong => bits.to_string(),
        Format::UInt => (bits as u32).to_string(),
        Format::Void => "void".to_string(),
        _ => "non-inspectable value".to_string(),
    }
}

impl Runtime {
    pub(crate) fn emit_line(&mut self, name: &str, func: &str, call: i32, value: &str) {
        self.write_fmt(format_args!("{name} {func} {call} : {value}\n"));
    }

    /// Reports a scalar observed directly at an inspection point.
    ///
    /// `scalarized` marks aggregates that optimisation reduced to a single
    /// SSA scalar.
    pub fn inspect_scalar(
        &mut self,
        bits: u64,
        format: Format,
        name: &str,
        func: &str,
        call: i32,
        scalarized: bool,
    ) {
        let value = render_scalar(bits, format);
        if scalarized {
            self.write_fmt(format_args!("{name} {func} {call} (scalarized) : {value}\n"));
        } else {
            self.emit_line(name, func, call, &value);
        }
    }

    /// Walks a composite object field by field, dispatching on each field's
    /// format.
    ///
    /// # Safety
    ///
    /// `base` must point to a live object laid out as `ty` describes.
    pub unsafe fn inspect_data(
        &mut self,
        base: *const u8,
        ty: &TypeDescriptor,
        name: &str,
        func: &str,
        call: i32,
    ) {
        for field in ty.fields.iter() {
            let full_name = if field.name.is_empty() {
                name.to_string()
            } else {
                format!("{name}-{}", field.name)
            };
            match field.format {
                format if format.is_scalar() => {
                    let bits = unsafe { read_bits(base.add(field.offset as usize), format) };
                    let value = render_scalar(bits, format);
                    self.emit_line(&full_name, func, call, &value);
                }
                Format::Pointer => {
                    if self.options.precise {
                        let slot = unsafe { base.add(field.offset as usize) };
                        let target =
                            unsafe { (slot as *const *const c_void).read_unaligned() };
                        unsafe {
                            self.track_pointer(
                                target,
                                field.base_type_index,
                                &full_name,
                                func,
                                call,
                            )
                        };
                    } else {
                        let Some(pointee) = self.types.get(field.base_type_index) else {
                            continue;
                        };
                        let value = format!("pointer to {}", pointee.name);
                        self.emit_line(name, func, call, &value);
                    }
                }
                Format::Void => self.emit_line(&full_name, func, call, "void"),
                Format::ScalarArray => {
                    let Some(element) = self.types.get(field.base_type_index).cloned() else {
                        continue;
                    };
                    let descriptor = &element.fields[0];
                    let count = descriptor.offset as i64;
                    let hash = unsafe {
                        compute_hashcode(
                            base.add(field.offset as usize) as *const c_void,
                            count,
                            count,
                            descriptor.format,
                        )
                    };
                    self.emit_line(&full_name, func, call, &hash.to_string());
                }
                Format::Union => {
                    // The field's offset carries the union's byte size
                    unsafe { self.inspect_union(base, field.offset as i64, name, func, call) };
                }
                Format::Struct => {
                    let Some(nested) = self.types.get(field.base_type_index).cloned() else {
                        continue;
                    };
                    unsafe {
                        self.inspect_data(
                            base.add(field.offset as usize),
                            &nested,
                            name,
                            func,
                            call,
                        )
                    };
                }
                Format::NonInspectable => {
                    self.emit_line(&full_name, func, call, "non-inspectable value");
                }
                other => {
                    log::warn!(target: "inspect", "unknown format {other:?} while inspecting {full_name}");
                }
            }
        }
    }

    /// Dumps a union's bytes as decimal integers in ascending address order,
    /// with no separator.
    ///
    /// # Safety
    ///
    /// `bytes` must be readable for `size` bytes.
    pub unsafe fn inspect_union(
        &mut self,
        bytes: *const u8,
        size: i64,
        name: &str,
        func: &str,
        call: i32,
    ) {
        let mut rendered = String::new();
        for i in 0..size.max(0) {
            let byte = unsafe { bytes.offset(i as isize).read_unaligned() };
            rendered.push_str(&(byte as i8 as i32).to_string());
        }
        self.emit_line(name, func, call, &rendered);
    }

    /// Reports a struct-typed variable through the table entry at
    /// `type_index`.
    ///
    /// # Safety
    ///
    /// `obj` must point to a live object of the indexed type.
    pub unsafe fn inspect_struct(
        &mut self,
        obj: *const u8,
        type_index: i32,
        name: &str,
        func: &str,
        call: i32,
    ) {
        let Some(ty) = self.types.get(type_index).cloned() else {
            return;
        };
        unsafe { self.inspect_data(obj, &ty, name, func, call) };
    }

    /// Top-level pointer inspection: follows the pointer in precise mode
    /// (resetting the visited bits afterwards, so sibling inspections at the
    /// same point are re-entrant), or names the pointee type in fast mode.
    ///
    /// # Safety
    ///
    /// In precise mode `ptr` is dereferenced when it is a live heap
    /// allocation or lies above the text segment.
    pub unsafe fn inspect_pointer(
        &mut self,
        ptr: *const c_void,
        type_index: i32,
        name: &str,
        func: &str,
        call: i32,
    ) {
        if self.options.precise {
            unsafe { self.track_pointer(ptr, type_index, name, func, call) };
            self.heap.reset_visited();
        } else {
            let Some(ty) = self.types.get(type_index) else {
                return;
            };
            let value = format!("pointer to {}", ty.name);
            self.emit_line(name, func, call, &value);
        }
    }

    /// Follows one pointer: heap entries delegate to heap inspection, other
    /// non-null pointers are dereferenced only past the text-segment
    /// boundary, and null renders as `NULL`.
    ///
    /// # Safety
    ///
    /// See [`Runtime::inspect_pointer`].
    pub unsafe fn track_pointer(
        &mut self,
        ptr: *const c_void,
        type_index: i32,
        name: &str,
        func: &str,
        call: i32,
    ) {
        let addr = ptr as usize;
        if self.heap.contains(addr) {
            if self.options.mem_filter && !self.options.inspect_heap {
                return;
            }
            unsafe { self.inspect_heap_entry(addr, name, func, call, true) };
        } else if !ptr.is_null() {
            if self.options.mem_filter && !self.options.inspect_stack {
                return;
            }
            // Fault avoidance: below the text boundary there is no data to read
            if addr < text_segment_end() {
                return;
            }
            let Some(ty) = self.types.get(type_index).cloned() else {
                return;
            };
            unsafe { self.inspect_data(ptr as *const u8, &ty, name, func, call) };
        } else {
            self.emit_line(name, func, call, "NULL");
        }
    }

    /// Inspects one heap entry, guarded by its visited bit.
    ///
    /// # Safety
    ///
    /// `addr` must be a table key whose non-free data describes live memory.
    pub unsafe fn inspect_heap_entry(
        &mut self,
        addr: usize,
        name: &str,
        func: &str,
        call: i32,
        _follow: bool,
    ) {
        let Some(entry) = self.heap.lookup_mut(addr) else {
            return;
        };
        if entry.visited {
            return;
        }
        entry.visited = true;
        if entry.free {
            self.emit_line(name, func, call, "freed");
            return;
        }
        let Some(data) = entry.data else {
            return;
        };
        if data.size > 1 {
            unsafe { self.inspect_heap_array(addr, data, name, func, call) };
        } else {
            let Some(ty) = self.types.get(data.type_index).cloned() else {
                return;
            };
            unsafe { self.inspect_data(addr as *const u8, &ty, name, func, call) };
        }
    }

    /// Inspects a heap allocation with more than one element: scalar
    /// elements hash, pointer elements recurse slot by slot.
    ///
    /// # Safety
    ///
    /// The allocation at `addr` must hold `data.size` live elements.
    unsafe fn inspect_heap_array(
        &mut self,
        addr: usize,
        data: HeapData,
        name: &str,
        func: &str,
        call: i32,
    ) {
        let Some(ty) = self.types.get(data.type_index).cloned() else {
            return;
        };
        let element = &ty.fields[0];
        if element.format.is_scalar() {
            let hash = unsafe {
                compute_hashcode(
                    addr as *const c_void,
                    data.size,
                    data.array_step,
                    element.format,
                )
            };
            self.emit_line(name, func, call, &hash.to_string());
        } else if element.format == Format::Pointer {
            for i in 0..data.size {
                let slot = unsafe { (addr as *const *const c_void).offset(i as isize) };
                let target = unsafe { slot.read_unaligned() };
                let slot_name = format!("{name}{}", array_index_name(i));
                unsafe {
                    self.track_pointer(target, element.base_type_index, &slot_name, func, call)
                };
            }
        } else {
            log::warn!(target: "inspect", "cannot inspect a heap array of non-scalar elements");
        }
    }

    /// Reports every non-free heap entry under the synthetic name
    /// `Heap Data`, then clears the visited bits.
    ///
    /// # Safety
    ///
    /// Every non-free table entry must describe live memory.
    pub unsafe fn inspect_entire_heap(&mut self, func: &str, call: i32) {
        let addresses: Vec<usize> = self.heap.addresses().collect();
        for addr in addresses {
            let live = self.heap.lookup(addr).is_some_and(|entry| !entry.free);
            if live {
                unsafe { self.inspect_heap_entry(addr, "Heap Data", func, call, false) };
            }
        }
        self.heap.reset_visited();
    }
}
