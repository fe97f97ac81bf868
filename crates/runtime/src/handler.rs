// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE, LICENSE.additional and CONTRIBUTING.

// the per-opcode handler table
// ----------------------------
//
// one C-callable function per opcode implements the instruction semantics.
// the same table serves both execution engines: the threaded interpreter
// looks the handler up per decoded instruction, the baseline JIT imports
// each handler as a symbol and emits direct calls.
//
// the contract of the 64-bit status a handler returns:
//
// - a jump handler returns non-zero when the following transfer must be
//   taken (comparisons return their boolean result for the same reason, so
//   a fused conditional jump can reuse it),
// - `call` returns the callee entry: an instruction index under the
//   interpreter, a callable host code pointer under the JIT,
// - everything else returns zero, which both engines ignore.
//
// INDEX operands arrive pre-multiplied to byte offsets.

use zephyr_isa::opcode::{Opcode, MAX_OPCODE_NUMBER};

use crate::vm::VmState;

mod arithmetic;
mod calling;
mod comparison;
mod control_flow;
mod data;
mod environment;

pub type HandlerFn = extern "C-unwind" fn(*mut VmState, u64, u64, u64) -> u64;

extern "C-unwind" fn unreachable_handler(
    _vm: *mut VmState,
    _op1: u64,
    _op2: u64,
    _dest: u64,
) -> u64 {
    unreachable!("invalid opcode");
}

pub struct HandlerTable {
    pub handlers: [HandlerFn; MAX_OPCODE_NUMBER],
}

impl HandlerTable {
    pub fn new() -> Self {
        let mut handlers: [HandlerFn; MAX_OPCODE_NUMBER] =
            [unreachable_handler; MAX_OPCODE_NUMBER];

        // activation
        handlers[Opcode::fn_enter_heap as usize] = calling::fn_enter_heap;
        handlers[Opcode::fn_enter_stack as usize] = calling::fn_enter_stack;

        // control flow
        handlers[Opcode::jmp as usize] = control_flow::jmp;
        handlers[Opcode::jmp_true as usize] = control_flow::jmp_true;
        handlers[Opcode::jmp_false as usize] = control_flow::jmp_false;

        // data movement
        handlers[Opcode::mov as usize] = data::mov;
        handlers[Opcode::mov_fnc as usize] = data::mov_fnc;
        handlers[Opcode::mov_int as usize] = data::mov_int;
        handlers[Opcode::mov_null as usize] = data::mov_null;
        handlers[Opcode::mov_boolean as usize] = data::mov_boolean;
        handlers[Opcode::mov_decimal as usize] = data::mov_decimal;
        handlers[Opcode::mov_string as usize] = data::mov_string;

        // calls
        handlers[Opcode::call as usize] = calling::call;
        handlers[Opcode::call_native as usize] = calling::call_native;
        handlers[Opcode::ret as usize] = calling::ret;
        handlers[Opcode::arg_read as usize] = calling::arg_read;

        // arithmetic
        handlers[Opcode::add_int as usize] = arithmetic::add_int;
        handlers[Opcode::add_string as usize] = arithmetic::add_string;
        handlers[Opcode::add_decimal as usize] = arithmetic::add_decimal;
        handlers[Opcode::sub_int as usize] = arithmetic::sub_int;
        handlers[Opcode::sub_decimal as usize] = arithmetic::sub_decimal;
        handlers[Opcode::div_int as usize] = arithmetic::div_int;
        handlers[Opcode::div_decimal as usize] = arithmetic::div_decimal;
        handlers[Opcode::mul_int as usize] = arithmetic::mul_int;
        handlers[Opcode::mul_decimal as usize] = arithmetic::mul_decimal;
        handlers[Opcode::mod_int as usize] = arithmetic::mod_int;
        handlers[Opcode::mod_decimal as usize] = arithmetic::mod_decimal;
        handlers[Opcode::cast_decimal as usize] = arithmetic::cast_decimal;
        handlers[Opcode::neg_int as usize] = arithmetic::neg_int;
        handlers[Opcode::neg_decimal as usize] = arithmetic::neg_decimal;

        // comparison
        handlers[Opcode::cmp_eq as usize] = comparison::cmp_eq;
        handlers[Opcode::cmp_neq as usize] = comparison::cmp_neq;
        handlers[Opcode::cmp_gt_int as usize] = comparison::cmp_gt_int;
        handlers[Opcode::cmp_gt_decimal as usize] = comparison::cmp_gt_decimal;
        handlers[Opcode::cmp_lt_int as usize] = comparison::cmp_lt_int;
        handlers[Opcode::cmp_lt_decimal as usize] = comparison::cmp_lt_decimal;
        handlers[Opcode::cmp_gte_int as usize] = comparison::cmp_gte_int;
        handlers[Opcode::cmp_gte_decimal as usize] = comparison::cmp_gte_decimal;
        handlers[Opcode::cmp_lte_int as usize] = comparison::cmp_lte_int;
        handlers[Opcode::cmp_lte_decimal as usize] = comparison::cmp_lte_decimal;

        // environment access and the value stack
        handlers[Opcode::push as usize] = environment::push;
        handlers[Opcode::pop as usize] = environment::pop;
        handlers[Opcode::get_in_parent as usize] = environment::get_in_parent;
        handlers[Opcode::get_in_object as usize] = environment::get_in_object;
        handlers[Opcode::set_in_parent as usize] = environment::set_in_parent;
        handlers[Opcode::set_in_object as usize] = environment::set_in_object;

        Self { handlers }
    }

    #[inline]
    pub fn handler_of(&self, opcode: Opcode) -> HandlerFn {
        self.handlers[opcode as usize]
    }

    /// The `(symbol name, address)` pairs the JIT imports, one per opcode.
    pub fn symbols(&self) -> Vec<(String, *const u8)> {
        (0..MAX_OPCODE_NUMBER)
            .map(|number| {
                let opcode = Opcode::from_u16(number as u16);
                (
                    format!("op_{}", opcode.name()),
                    self.handlers[number] as *const u8,
                )
            })
            .collect()
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use zephyr_isa::opcode::Opcode;
    use zephyr_isa::{Value, SLOT_SIZE_IN_BYTES, TAG_BOOLEAN};

    use crate::handler::HandlerTable;
    use crate::object_manager::ObjectKind;
    use crate::vm::VmState;

    fn offset(slot: u64) -> u64 {
        slot * SLOT_SIZE_IN_BYTES as u64
    }

    /// A VM whose current activation is a fresh root record.
    fn vm_with_activation(slot_count: usize) -> VmState {
        let mut vm = VmState::new();
        let context = vm.objects.alloc_activation(slot_count);
        vm.init_call_context(context, std::ptr::null_mut());
        vm.context = context;
        vm
    }

    fn invoke(vm: &mut VmState, opcode: Opcode, op1: u64, op2: u64, dest: u64) -> u64 {
        let table = HandlerTable::new();
        table.handler_of(opcode)(vm as *mut VmState, op1, op2, dest)
    }

    fn slot(vm: &VmState, index: usize) -> Value {
        unsafe { *vm.context.add(index) }
    }

    #[test]
    fn test_handler_mov_int_and_add_int() {
        let mut vm = vm_with_activation(8);
        invoke(&mut vm, Opcode::mov_int, 7, 0, offset(2));
        invoke(&mut vm, Opcode::mov_int, (-2i32) as u32 as u64, 0, offset(3));
        let status = invoke(&mut vm, Opcode::add_int, offset(2), offset(3), offset(4));

        assert_eq!(status, 0);
        assert_eq!(slot(&vm, 4).arith_int(), 5);
    }

    #[test]
    fn test_handler_decimal_family() {
        let mut vm = vm_with_activation(8);
        // op1 of mov_decimal carries an f64 bit pattern
        invoke(&mut vm, Opcode::mov_decimal, 1.25f64.to_bits(), 0, offset(2));
        invoke(&mut vm, Opcode::mov_int, 2, 0, offset(3));
        invoke(&mut vm, Opcode::cast_decimal, offset(3), 0, offset(3));
        invoke(&mut vm, Opcode::add_decimal, offset(2), offset(3), offset(4));

        assert_eq!(slot(&vm, 4).arith_decimal(), 3.25);
        assert_eq!(
            vm.objects.guess_type(slot(&vm, 4)),
            ObjectKind::Decimal
        );
    }

    #[test]
    fn test_handler_comparison_writes_and_returns() {
        let mut vm = vm_with_activation(8);
        invoke(&mut vm, Opcode::mov_int, 1, 0, offset(2));
        invoke(&mut vm, Opcode::mov_int, 2, 0, offset(3));

        let taken = invoke(&mut vm, Opcode::cmp_lt_int, offset(2), offset(3), offset(4));
        assert_eq!(taken, 1);
        assert_eq!(slot(&vm, 4).tag(), TAG_BOOLEAN);
        assert_eq!(slot(&vm, 4).arith_int(), 1);

        let taken = invoke(&mut vm, Opcode::cmp_gt_int, offset(2), offset(3), offset(4));
        assert_eq!(taken, 0);
        assert_eq!(slot(&vm, 4).arith_int(), 0);

        // the conditional jump re-reads the slot the comparison wrote
        assert_eq!(invoke(&mut vm, Opcode::jmp_false, offset(4), 0, 0), 1);
        assert_eq!(invoke(&mut vm, Opcode::jmp_true, offset(4), 0, 0), 0);
    }

    #[test]
    fn test_handler_string_concat() {
        let mut vm = vm_with_activation(8);
        let first = String::from("con");
        let second = String::from("cat");
        invoke(
            &mut vm,
            Opcode::mov_string,
            &first as *const String as u64,
            0,
            offset(2),
        );
        invoke(
            &mut vm,
            Opcode::mov_string,
            &second as *const String as u64,
            0,
            offset(3),
        );
        invoke(&mut vm, Opcode::add_string, offset(2), offset(3), offset(4));

        let merged = slot(&vm, 4);
        assert_eq!(vm.objects.guess_type(merged), ObjectKind::String);
        assert_eq!(unsafe { &*merged.as_ptr::<String>() }.as_str(), "concat");
    }

    #[test]
    fn test_handler_parent_context_access() {
        let mut vm = vm_with_activation(8);
        let parent = vm.context;
        let child = vm.objects.alloc_activation(4);
        vm.init_call_context(child, parent as *mut _);
        vm.context = child;

        // write 11 into parent slot 5 through the chain, then read it back
        invoke(&mut vm, Opcode::mov_int, 11, 0, offset(2));
        invoke(&mut vm, Opcode::set_in_parent, 1, offset(2), offset(5));
        invoke(&mut vm, Opcode::get_in_parent, 1, offset(5), offset(3));

        assert_eq!(slot(&vm, 3).arith_int(), 11);
        assert_eq!(unsafe { *parent.add(5) }.arith_int(), 11);

        // depth 0 reaches the current activation itself
        invoke(&mut vm, Opcode::get_in_parent, 0, offset(2), offset(1));
        assert_eq!(slot(&vm, 1).arith_int(), 11);
    }

    #[test]
    fn test_handler_push_pop_and_arg_read() {
        let mut vm = vm_with_activation(8);
        invoke(&mut vm, Opcode::mov_int, 31, 0, offset(2));
        invoke(&mut vm, Opcode::push, offset(2), 0, 0);
        assert_eq!(vm.stack_pointer, 1);

        // with the 5-slot convention overhead above it, the pushed value
        // (stack index 0) reads back as argument 0
        vm.base_pointer = 5;
        invoke(&mut vm, Opcode::arg_read, 0, 0, offset(3));
        assert_eq!(slot(&vm, 3).arith_int(), 31);

        invoke(&mut vm, Opcode::pop, 0, 0, offset(4));
        assert_eq!(slot(&vm, 4).arith_int(), 31);
        assert_eq!(vm.stack_pointer, 0);
    }

    #[test]
    fn test_handler_object_stubs_do_nothing() {
        let mut vm = vm_with_activation(4);
        assert_eq!(invoke(&mut vm, Opcode::get_in_object, 1, 2, 3), 0);
        assert_eq!(invoke(&mut vm, Opcode::set_in_object, 1, 2, 3), 0);
    }
}
