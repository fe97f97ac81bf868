// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE, LICENSE.additional and CONTRIBUTING.

use zephyr_isa::Value;

use crate::vm::VmState;

pub extern "C-unwind" fn mov(vm: *mut VmState, op1: u64, _op2: u64, dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    unsafe {
        *vm.slot_ptr(dest) = *vm.slot_ptr(op1);
    }
    0
}

pub extern "C-unwind" fn mov_fnc(vm: *mut VmState, op1: u64, _op2: u64, dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    // the current activation becomes the lexical parent of the reference
    let parent = vm.context;
    let fnc_ref = vm.objects.create_fn_ref(op1, parent);
    unsafe {
        *vm.slot_ptr(dest) = Value::pointer(fnc_ref);
    }
    0
}

pub extern "C-unwind" fn mov_int(vm: *mut VmState, op1: u64, _op2: u64, dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    unsafe {
        *vm.slot_ptr(dest) = Value::int(op1 as u32 as i32);
    }
    0
}

pub extern "C-unwind" fn mov_null(vm: *mut VmState, _op1: u64, _op2: u64, dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    unsafe {
        *vm.slot_ptr(dest) = Value::null();
    }
    0
}

pub extern "C-unwind" fn mov_boolean(vm: *mut VmState, op1: u64, _op2: u64, dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    unsafe {
        *vm.slot_ptr(dest) = Value::boolean(op1 != 0);
    }
    0
}

pub extern "C-unwind" fn mov_decimal(vm: *mut VmState, op1: u64, _op2: u64, dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    // op1 carries an f64 bit pattern, the slot stores a narrowed f32
    let value = f64::from_bits(op1) as f32;
    unsafe {
        *vm.slot_ptr(dest) = Value::decimal(value);
    }
    0
}

pub extern "C-unwind" fn mov_string(vm: *mut VmState, op1: u64, _op2: u64, dest: u64) -> u64 {
    let vm = unsafe { &mut *vm };
    // op1 points at a program-owned string; the slot receives a fresh
    // runtime copy tracked by the object manager
    let source = unsafe { &*(op1 as *const String) };
    let ptr = vm.objects.alloc_string(source.clone());
    unsafe {
        *vm.slot_ptr(dest) = Value::pointer(ptr);
    }
    0
}
