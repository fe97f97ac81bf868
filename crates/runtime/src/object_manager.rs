// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE, LICENSE.additional and CONTRIBUTING.

// the object manager is responsible for
// - allocating the runtime objects (strings, function references and
//   heap activation records),
// - holding the owning reference to them,
// - recovering the type of an opaque slot, because the compilation phase
//   erased the type information.
//
// execution never reclaims an object; everything lives until the manager
// itself is dropped. a terminating top-level program is assumed, so the
// missing collector is a known limitation rather than a leak to chase.

use std::collections::HashMap;

use zephyr_isa::{Value, TAG_BOOLEAN, TAG_DECIMAL, TAG_INT};

/// A closure: the code entry bound to the activation record that was
/// current when `mov_fnc` executed.
///
/// the parent and the callee are not always the same. when function A
/// contains function B and B needs a variable of A, B has to hold a
/// reference to A's activation. A creates the function reference, so the
/// reference captures A's activation; whoever calls B later pushes that
/// captured activation as B's parent, because there is no other path from
/// the caller to A's frame.
///
/// `entry` is the absolute instruction index under the interpreter and a
/// host code address under the baseline JIT.
#[repr(C)]
#[derive(Debug)]
pub struct FnRef {
    pub parent: *mut Value,
    pub entry: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Int,
    Decimal,
    Boolean,
    String,
    FunctionRef,
    UserObject,
    Unknown,
}

pub struct ObjectManager {
    // pointer word -> registered object kind
    kinds: HashMap<u64, ObjectKind>,
    strings: Vec<*mut String>,
    fn_refs: Vec<*mut FnRef>,
    activations: Vec<*mut [Value]>,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
            strings: Vec::new(),
            fn_refs: Vec::new(),
            activations: Vec::new(),
        }
    }

    /// Allocate a runtime string and register its kind so `guess_type` can
    /// recover it later.
    pub fn alloc_string(&mut self, value: String) -> *mut String {
        let ptr = Box::into_raw(Box::new(value));
        self.kinds.insert(ptr as u64, ObjectKind::String);
        self.strings.push(ptr);
        ptr
    }

    pub fn create_fn_ref(&mut self, entry: u64, parent: *mut Value) -> *mut FnRef {
        let ptr = Box::into_raw(Box::new(FnRef { parent, entry }));
        self.kinds.insert(ptr as u64, ObjectKind::FunctionRef);
        self.fn_refs.push(ptr);
        ptr
    }

    /// Allocate a heap activation record of `slot_count` value slots,
    /// zero-initialized. the returned pointer is 8-byte aligned, which the
    /// primitive-vs-pointer test of `guess_type` depends on.
    pub fn alloc_activation(&mut self, slot_count: usize) -> *mut Value {
        debug_assert!(slot_count > 0, "an activation always has the parent slot");
        let slots = vec![Value::null(); slot_count].into_boxed_slice();
        let ptr = Box::into_raw(slots);
        self.activations.push(ptr);
        ptr as *mut Value
    }

    /// Recover the kind of an opaque slot value. primitives carry their
    /// kind in the low 32 bits; everything whose low three bits are zero is
    /// a pointer and is looked up in the registry.
    pub fn guess_type(&self, value: Value) -> ObjectKind {
        if value.as_raw() & 7 == 0 {
            self.kinds
                .get(&value.as_raw())
                .copied()
                .unwrap_or(ObjectKind::Unknown)
        } else {
            match value.tag() {
                TAG_INT => ObjectKind::Int,
                TAG_DECIMAL => ObjectKind::Decimal,
                TAG_BOOLEAN => ObjectKind::Boolean,
                _ => ObjectKind::Unknown,
            }
        }
    }
}

impl Default for ObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ObjectManager {
    fn drop(&mut self) {
        unsafe {
            for ptr in self.strings.drain(..) {
                drop(Box::from_raw(ptr));
            }
            for ptr in self.fn_refs.drain(..) {
                drop(Box::from_raw(ptr));
            }
            for ptr in self.activations.drain(..) {
                drop(Box::from_raw(ptr));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use zephyr_isa::Value;

    use crate::object_manager::{ObjectKind, ObjectManager};

    #[test]
    fn test_guess_type_recovers_constructor_kind() {
        let mut objects = ObjectManager::new();

        assert_eq!(objects.guess_type(Value::int(42)), ObjectKind::Int);
        assert_eq!(objects.guess_type(Value::decimal(1.5)), ObjectKind::Decimal);
        assert_eq!(objects.guess_type(Value::boolean(true)), ObjectKind::Boolean);

        let string_ptr = objects.alloc_string("abc".to_string());
        assert_eq!(
            objects.guess_type(Value::pointer(string_ptr)),
            ObjectKind::String
        );

        let fn_ref = objects.create_fn_ref(7, std::ptr::null_mut());
        assert_eq!(
            objects.guess_type(Value::pointer(fn_ref)),
            ObjectKind::FunctionRef
        );
    }

    #[test]
    fn test_guess_type_unknown_pointer() {
        let objects = ObjectManager::new();
        let mut somewhere = 0u64;
        assert_eq!(
            objects.guess_type(Value::pointer(&mut somewhere)),
            ObjectKind::Unknown
        );
        assert_eq!(objects.guess_type(Value::null()), ObjectKind::Unknown);
    }

    #[test]
    fn test_activation_is_zeroed_and_aligned() {
        let mut objects = ObjectManager::new();
        let activation = objects.alloc_activation(4);
        assert_eq!(activation as usize % 8, 0);
        for index in 0..4 {
            assert!(unsafe { *activation.add(index) }.is_null());
        }
    }
}
