// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE, LICENSE.additional and CONTRIBUTING.

// the call model
// --------------
//
// `call` pushes the calling-convention frame and returns the callee entry;
// the callee's `fn_enter_*` pops the parent link, allocates the activation
// record and saves the caller base pointer. `ret` undoes all of it. the
// return ADDRESS is deliberately not part of the aux-stack frame: the
// interpreter keeps its own return-address stack and the JIT rides the host
// call stack.

use zephyr_isa::{Value, STACK_MAX};

use crate::object_manager::FnRef;
use crate::vm::VmState;

pub extern "C-unwind" fn fn_enter_heap(vm: *mut VmState, op1: u64, _op2: u64, _dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    let parent = vm.pop().as_ptr::<Value>();
    let context = vm.objects.alloc_activation(op1 as usize);
    vm.init_call_context(context, parent);
    vm.context = context;

    log::trace!(
        "function enter heap, bp: {}, sp: {}",
        vm.base_pointer,
        vm.stack_pointer
    );
    vm.push(Value::raw(vm.base_pointer as u64));
    vm.base_pointer = vm.stack_pointer;
    vm.call_depth += 1;
    0
}

pub extern "C-unwind" fn fn_enter_stack(vm: *mut VmState, op1: u64, _op2: u64, _dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    let parent = vm.pop().as_ptr::<Value>();
    log::trace!(
        "function enter stack, bp: {}, sp: {}",
        vm.base_pointer,
        vm.stack_pointer
    );
    vm.push(Value::raw(vm.base_pointer as u64));
    vm.base_pointer = vm.stack_pointer;
    vm.call_depth += 1;

    let slot_count = op1 as i64;
    if vm.stack_pointer + slot_count > STACK_MAX as i64 {
        log::error!("could not allocate local stack frame, stack overflow!");
        panic!("could not allocate local stack frame, stack overflow");
    }
    let context = vm.stack_slot_ptr(vm.stack_pointer);
    vm.stack_pointer += slot_count;
    vm.init_call_context(context, parent);
    vm.context = context;
    0
}

pub extern "C-unwind" fn call(vm: *mut VmState, op1: u64, op2: u64, dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    let callee = unsafe { *vm.slot_ptr(op1) };
    if callee.is_null() {
        log::error!("null pointer exception: callee address was null");
        panic!("null pointer exception: callee address was null");
    }
    let fnc_ref = unsafe { &*callee.as_ptr::<FnRef>() };

    log::trace!(
        "call, bp: {}, sp: {}",
        vm.base_pointer,
        vm.stack_pointer
    );
    // number of arguments already pushed by the caller
    vm.push(Value::raw(op2));
    // the caller's activation
    vm.push(Value::pointer(vm.context));
    // the caller slot that receives the return value
    vm.push(Value::raw(dest));
    // the callee's captured lexical parent
    vm.push(Value::pointer(fnc_ref.parent));

    fnc_ref.entry
}

pub extern "C-unwind" fn call_native(vm: *mut VmState, op1: u64, _op2: u64, dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    let index = unsafe { (*vm.slot_ptr(op1)).as_raw() } as usize;
    let native = vm.native_at(index);
    let result = native(vm);
    unsafe {
        *vm.slot_ptr(dest) = result;
    }
    0
}

pub extern "C-unwind" fn arg_read(vm: *mut VmState, op1: u64, _op2: u64, dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    // 5 is the calling-convention overhead between bp and the arguments
    let value = vm.stack_value(vm.base_pointer - 5 - op1 as i64);
    unsafe {
        *vm.slot_ptr(dest) = value;
    }
    0
}

pub extern "C-unwind" fn ret(vm: *mut VmState, _op1: u64, _op2: u64, dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    vm.call_depth -= 1;
    if vm.call_depth == 0 {
        // the root function returned, nothing to unwind
        log::trace!("root function returned");
        return 0;
    }

    // drop the callee frame (including a stack-allocated activation)
    vm.stack_pointer = vm.base_pointer;
    vm.base_pointer = vm.pop().as_raw() as i64;

    let return_slot = vm.pop().as_raw();
    let caller_context = vm.pop().as_ptr::<Value>();
    let argc = vm.pop().as_raw();
    vm.stack_pointer -= argc as i64;

    let callee_context = vm.context;
    vm.context = caller_context;

    if dest != 0 && return_slot != 0 {
        unsafe {
            let source = (callee_context as *mut u8).add(dest as usize) as *mut Value;
            let target = (caller_context as *mut u8).add(return_slot as usize) as *mut Value;
            *target = *source;
        }
    }

    log::trace!(
        "ret, sp: {}, bp: {}",
        vm.stack_pointer,
        vm.base_pointer
    );
    0
}
