//! Cheney stop-and-copy collection
//!
//! A collection flips (or grows) the heap, evacuates every root, then
//! scan-copies in FIFO order: each object copied into to-space has its
//! internal pointers rewritten by evacuating the pointees. Object payloads
//! are copied verbatim; the `moved` header of the from-space original is the
//! only field rewritten, becoming the forwarding pointer that preserves
//! object identity across the collection.

use super::heap::Heap;
use super::object::{object_size, CompileStage, Cell, Function, Header};
use super::value::{Tag, Value};

/// Evacuate one value into to-space and return its new tagged pointer.
///
/// - Integers and constants are returned unchanged.
/// - Already-forwarded objects return the stored pointer, retagged to the
///   caller's expected kind.
/// - Anything else is copied to the bump cursor and its old header is
///   rewritten as the forwarding pointer.
pub(crate) fn evacuate(heap: &mut Heap, v: Value) -> Value {
    if !v.is_heap() {
        return v;
    }
    unsafe {
        let hdr = v.ptr() as *mut Header;
        if (*hdr).is_forwarded() {
            return Value::from_ptr((*hdr).forwarding(), v.tag());
        }
        let size = object_size(hdr);
        let dst = heap.alloc_during_collect(size);
        core::ptr::copy_nonoverlapping(hdr as *const u8, dst, size);
        (*hdr).forward_to(dst);
        Value::from_ptr(dst, v.tag())
    }
}

/// Scan-copy phase: walk to-space from `scan_base` to the bump cursor,
/// evacuating the pointees of every copied object. The internal-pointer set
/// is chosen by the object's header tag.
pub(crate) fn scan(heap: &mut Heap, scan_base: *mut u8) {
    let mut scan = scan_base;
    while scan < heap.bump_ptr() {
        unsafe {
            let hdr = scan as *mut Header;
            let size = object_size(hdr);
            match (*hdr).tag() {
                Tag::Cell => {
                    let cell = hdr as *mut Cell;
                    (*cell).car = evacuate(heap, (*cell).car);
                    (*cell).cdr = evacuate(heap, (*cell).cdr);
                }
                Tag::Function | Tag::Macro => {
                    let func = hdr as *mut Function;
                    (*func).params = evacuate(heap, (*func).params);
                    (*func).env = evacuate(heap, (*func).env);
                    // Once compiled, `body` is the native entry point.
                    if (*func).compiled != CompileStage::Code {
                        (*func).body = evacuate(heap, (*func).body);
                    }
                }
                // No internal pointers.
                Tag::Symbol | Tag::Builtin => {}
                t => unreachable!("value tag {t:?} in object header"),
            }
            scan = scan.add(size);
        }
    }
}
