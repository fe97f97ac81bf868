// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE, LICENSE.additional and CONTRIBUTING.

// the shared VM state
// -------------------
//
// everything both execution engines mutate lives in this one struct and is
// passed explicitly: the auxiliary value stack with its signed cursor, the
// current activation pointer, the saved base pointer, the call depth, the
// native function table and the object manager. the instruction handlers
// receive a raw pointer to it, which is also what the baseline JIT threads
// through the generated code.
//
// the auxiliary stack layout around a call (5 slots of overhead):
//
// |  ...              |
// |  argument n-1     |  <-- pushed first (arguments go right to left)
// |  ...              |
// |  argument 0       |
// |  argc             |
// |  caller context   |
// |  return slot      |  (requested by `call`, consumed by `ret`)
// |  (parent link)    |  <-- popped again by `fn_enter_*`
// |  saved bp         |
// \-------------------/  <-- bp = sp just after `fn_enter_*`
//
// `arg_read i` therefore reads `stack[bp - 5 - i]`.

use std::io::Write;

use zephyr_isa::{Value, STACK_MAX};

use crate::object_manager::{ObjectKind, ObjectManager};

/// A native function manages the value stack manually, there is no calling
/// convention yet.
pub type NativeFn = fn(&mut VmState) -> Value;

#[repr(C)]
pub struct VmState {
    /// The current activation record. kept as the first field so the JIT
    /// can address it with a constant offset.
    pub context: *mut Value,
    pub stack_pointer: i64,
    pub base_pointer: i64,
    pub call_depth: u64,
    stack: Box<[Value]>,
    pub objects: ObjectManager,
    natives: Vec<NativeFn>,
    output: Box<dyn Write>,
}

impl VmState {
    pub fn new() -> Self {
        Self::with_output(Box::new(std::io::stdout()))
    }

    /// A VM whose `print` writes into the given sink instead of stdout.
    pub fn with_output(output: Box<dyn Write>) -> Self {
        Self {
            context: std::ptr::null_mut(),
            stack_pointer: 0,
            base_pointer: 0,
            call_depth: 0,
            stack: vec![Value::null(); STACK_MAX].into_boxed_slice(),
            objects: ObjectManager::new(),
            natives: vec![native_print],
            output,
        }
    }

    /// Byte offset of the `context` field, for the JIT's inline slot
    /// accesses.
    pub fn context_field_offset() -> i32 {
        std::mem::offset_of!(VmState, context) as i32
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        if self.stack_pointer >= STACK_MAX as i64 {
            log::error!("stack overflow! sp: {}", self.stack_pointer);
            panic!("stack overflow");
        }
        self.stack[self.stack_pointer as usize] = value;
        self.stack_pointer += 1;
    }

    #[inline]
    pub fn pop(&mut self) -> Value {
        self.stack_pointer -= 1;
        if self.stack_pointer < 0 {
            log::error!("stack underflow! sp: {}", self.stack_pointer);
            panic!("stack underflow");
        }
        self.stack[self.stack_pointer as usize]
    }

    #[inline]
    pub fn stack_value(&self, index: i64) -> Value {
        self.stack[index as usize]
    }

    #[inline]
    pub fn stack_slot_ptr(&mut self, index: i64) -> *mut Value {
        &mut self.stack[index as usize] as *mut Value
    }

    /// Slot 0 of every activation is the parent link. the root activation
    /// (the one without a parent) is additionally seeded with the native
    /// function indices, so `call_native` can reach them through ordinary
    /// INDEX operands.
    pub fn init_call_context(&mut self, context: *mut Value, parent: *mut Value) {
        unsafe {
            *context = Value::pointer(parent);
            if parent.is_null() {
                for index in 0..self.natives.len() {
                    *context.add(1 + index) = Value::raw(index as u64);
                }
            }
        }
    }

    pub fn native_at(&self, index: usize) -> NativeFn {
        match self.natives.get(index) {
            Some(native) => *native,
            None => {
                log::error!("unknown native function index {}", index);
                panic!("unknown native function index {}", index);
            }
        }
    }

    pub fn native_count(&self) -> usize {
        self.natives.len()
    }

    /// Address of the slot at `byte_offset` inside the current activation.
    /// INDEX operands arrive pre-multiplied, so this is a plain byte add.
    #[inline]
    pub(crate) unsafe fn slot_ptr(&mut self, byte_offset: u64) -> *mut Value {
        (self.context as *mut u8).add(byte_offset as usize) as *mut Value
    }

    pub(crate) fn write_line(&mut self, text: &str) {
        if writeln!(self.output, "{}", text).is_err() {
            panic!("failed to write print output");
        }
    }
}

impl Default for VmState {
    fn default() -> Self {
        Self::new()
    }
}

/// Native index 0: pop one value, discover what it is through the object
/// manager, write its text representation and a newline.
pub fn native_print(vm: &mut VmState) -> Value {
    let value = vm.pop();
    let text = match vm.objects.guess_type(value) {
        ObjectKind::String => unsafe { (*value.as_ptr::<String>()).clone() },
        ObjectKind::Decimal => value.arith_decimal().to_string(),
        ObjectKind::Boolean => {
            if value.arith_int() != 0 {
                "true".to_string()
            } else {
                "false".to_string()
            }
        }
        ObjectKind::Int => value.arith_int().to_string(),
        ObjectKind::FunctionRef => "[function ref]".to_string(),
        ObjectKind::UserObject => "[object ref]".to_string(),
        ObjectKind::Unknown => "[?]".to_string(),
    };
    vm.write_line(&text);
    Value::int(0)
}
