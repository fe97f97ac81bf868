// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE, LICENSE.additional and CONTRIBUTING.

// the instruction format
// ----------------------
//
// every Zephyr instruction is a 4-tuple:
//
//   (opcode, operand 1, operand 2, destination)
//
// the meaning of each operand slot is fixed per opcode and recorded in the
// instruction descriptor table below. the descriptor is the single source
// of truth shared by the bytecode generator (emission), the program model
// (serialization and label resolution), the interpreter (operand
// pre-scaling) and the baseline JIT (operand binding). adding an opcode
// means adding exactly one descriptor arm here.
//
// operand kinds:
//
// - INDEX operands are slot offsets within the current activation record.
//   both execution engines pre-multiply them by SLOT_SIZE_IN_BYTES during
//   preparation, so the handlers always receive byte offsets.
// - IMM_ADDRESS operands are absolute instruction indices. they start life
//   as labels and are resolved during serialization; the JIT rebinds them
//   to host code addresses.
// - IMM_DECIMAL operands carry an f64 bit pattern; IMM_STRING operands
//   carry the address of a program-owned string.

/// Total number of opcodes; also the size of the handler table.
pub const MAX_OPCODE_NUMBER: usize = 46;

#[repr(u16)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[allow(non_camel_case_types)]
pub enum Opcode {
    // allocate an activation record of `op1` slots on the heap, used for
    // functions whose context may outlive the call (non-leaf functions).
    // pops the callee parent pointer, saves the caller base pointer.
    // (param slot_count:imm)
    fn_enter_heap = 0,

    // as `fn_enter_heap`, but the record is carved out of the auxiliary
    // value stack. only leaf functions qualify.
    // (param slot_count:imm)
    fn_enter_stack,

    // unconditional transfer to an absolute instruction index.
    // (dest address)
    jmp,

    // transfer when the operand slot holds a non-zero arithmetic value.
    // (param test:index) (dest address)
    jmp_true,

    // transfer when the operand slot holds zero.
    // (param test:index) (dest address)
    jmp_false,

    // copy one slot.
    // (param src:index) (dest index)
    mov,

    // allocate a function reference capturing the current activation as the
    // parent and `op1` as the entry address.
    // (param entry:address) (dest index)
    mov_fnc,

    // load immediates.
    mov_int,     // (param value:imm) (dest index)
    mov_null,    // (dest index)
    mov_boolean, // (param value:imm) (dest index)
    mov_decimal, // (param f64_bits:imm_decimal) (dest index)
    mov_string,  // (param string_ptr:imm_string) (dest index)

    // call through the function reference in slot `op1`. pushes the
    // calling-convention frame (argc, caller context, requested return
    // slot, callee parent) and returns the callee entry as the status.
    // (param callee:index, argc:imm) (dest caller_return_slot:index)
    call,

    // invoke the native function whose table index is stored in slot `op1`
    // and write its result into `dest`. natives manage the value stack
    // themselves, there is no calling convention yet.
    // (param native:index, argc:imm) (dest index)
    call_native,

    // arithmetic. the type checker selects the typed variant, the runtime
    // never dispatches on the operand type.
    add_int,     // (param a:index, b:index) (dest index)
    add_string,  // (param a:index, b:index) (dest index), fresh string
    add_decimal, // (param a:index, b:index) (dest index)
    sub_int,
    sub_decimal,
    div_int,
    div_decimal,
    mul_int,
    mul_decimal,
    mod_int,
    mod_decimal, // IEEE remainder

    // comparisons write a boolean into `dest` AND return it as the status,
    // so a following conditional jump can reuse it without reloading.
    // equality compares the full 32-bit arithmetic field.
    cmp_eq, // (param a:index, b:index) (dest index)
    cmp_neq,
    cmp_gt_int,
    cmp_gt_decimal,
    cmp_lt_int,
    cmp_lt_decimal,
    cmp_gte_int,
    cmp_gte_decimal,
    cmp_lte_int,
    cmp_lte_decimal,

    // convert an int slot to a decimal slot.
    // (param src:index) (dest index)
    cast_decimal,

    neg_int,     // (param src:index) (dest index)
    neg_decimal, // (param src:index) (dest index)

    // auxiliary value stack.
    push, // (param src:index)
    pop,  // (dest index)

    // read the op1-th pushed argument from the value stack into the current
    // activation. the source offset is `bp - 5 - op1`, 5 being the
    // calling-convention overhead.
    // (param arg_number:imm) (dest index)
    arg_read,

    // walk `op1` parent links (slot 0 of each activation), then read slot
    // `op2` of the reached activation into `dest` of the current one.
    // (param depth:imm, src:index) (dest index)
    get_in_parent,

    // reserved for a future object model, executes as a no-op.
    get_in_object,

    // walk `op1` parent links, then write slot `op2` of the current
    // activation into slot `dest` of the reached one.
    // (param depth:imm, src:index) (dest target:index)
    set_in_parent,

    // reserved for a future object model, executes as a no-op.
    set_in_object,

    // unwind the current activation. restores the caller base pointer,
    // context and argument slots, and copies `callee[dest]` into the
    // caller slot requested at `call` when both are non-zero. at call
    // depth zero this is the terminal state and nothing is unwound.
    // (dest return_value:index)
    ret,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Self {
        assert!(
            (value as usize) < MAX_OPCODE_NUMBER,
            "invalid opcode number: {}",
            value
        );
        unsafe { std::mem::transmute::<u16, Opcode>(value) }
    }

    pub fn name(&self) -> &'static str {
        use Opcode::*;
        match self {
            fn_enter_heap => "fn_enter_heap",
            fn_enter_stack => "fn_enter_stack",
            jmp => "jmp",
            jmp_true => "jmp_true",
            jmp_false => "jmp_false",
            mov => "mov",
            mov_fnc => "mov_fnc",
            mov_int => "mov_int",
            mov_null => "mov_null",
            mov_boolean => "mov_boolean",
            mov_decimal => "mov_decimal",
            mov_string => "mov_string",
            call => "call",
            call_native => "call_native",
            add_int => "add_int",
            add_string => "add_string",
            add_decimal => "add_decimal",
            sub_int => "sub_int",
            sub_decimal => "sub_decimal",
            div_int => "div_int",
            div_decimal => "div_decimal",
            mul_int => "mul_int",
            mul_decimal => "mul_decimal",
            mod_int => "mod_int",
            mod_decimal => "mod_decimal",
            cmp_eq => "cmp_eq",
            cmp_neq => "cmp_neq",
            cmp_gt_int => "cmp_gt_int",
            cmp_gt_decimal => "cmp_gt_decimal",
            cmp_lt_int => "cmp_lt_int",
            cmp_lt_decimal => "cmp_lt_decimal",
            cmp_gte_int => "cmp_gte_int",
            cmp_gte_decimal => "cmp_gte_decimal",
            cmp_lte_int => "cmp_lte_int",
            cmp_lte_decimal => "cmp_lte_decimal",
            cast_decimal => "cast_decimal",
            neg_int => "neg_int",
            neg_decimal => "neg_decimal",
            push => "push",
            pop => "pop",
            arg_read => "arg_read",
            get_in_parent => "get_in_parent",
            get_in_object => "get_in_object",
            set_in_parent => "set_in_parent",
            set_in_object => "set_in_object",
            ret => "ret",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OpcodeCategory {
    FunctionEnter,
    Jump,
    Comparison,
    Other,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OperandKind {
    ImmInt,
    ImmDecimal,
    ImmString,
    ImmAddress,
    Index,
    Unused,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct InstructionDescriptor {
    pub category: OpcodeCategory,
    pub op1: OperandKind,
    pub op2: OperandKind,
    pub dest: OperandKind,
}

const fn desc(
    category: OpcodeCategory,
    op1: OperandKind,
    op2: OperandKind,
    dest: OperandKind,
) -> InstructionDescriptor {
    InstructionDescriptor {
        category,
        op1,
        op2,
        dest,
    }
}

/// The instruction descriptor table.
pub fn descriptor_of(opcode: Opcode) -> InstructionDescriptor {
    use OpcodeCategory::*;
    use OperandKind::*;

    match opcode {
        Opcode::fn_enter_heap => desc(FunctionEnter, ImmInt, Unused, Unused),
        Opcode::fn_enter_stack => desc(FunctionEnter, ImmInt, Unused, Unused),
        Opcode::jmp => desc(Jump, Unused, Unused, ImmAddress),
        Opcode::jmp_true => desc(Jump, Index, Unused, ImmAddress),
        Opcode::jmp_false => desc(Jump, Index, Unused, ImmAddress),
        Opcode::mov => desc(Other, Index, Unused, Index),
        Opcode::mov_fnc => desc(Other, ImmAddress, Unused, Index),
        Opcode::mov_int => desc(Other, ImmInt, Unused, Index),
        Opcode::mov_null => desc(Other, Unused, Unused, Index),
        Opcode::mov_boolean => desc(Other, ImmInt, Unused, Index),
        Opcode::mov_decimal => desc(Other, ImmDecimal, Unused, Index),
        Opcode::mov_string => desc(Other, ImmString, Unused, Index),
        Opcode::call => desc(Other, Index, ImmInt, Index),
        Opcode::call_native => desc(Other, Index, ImmInt, Index),
        Opcode::add_int
        | Opcode::add_string
        | Opcode::add_decimal
        | Opcode::sub_int
        | Opcode::sub_decimal
        | Opcode::div_int
        | Opcode::div_decimal
        | Opcode::mul_int
        | Opcode::mul_decimal
        | Opcode::mod_int
        | Opcode::mod_decimal => desc(Other, Index, Index, Index),
        Opcode::cmp_eq
        | Opcode::cmp_neq
        | Opcode::cmp_gt_int
        | Opcode::cmp_gt_decimal
        | Opcode::cmp_lt_int
        | Opcode::cmp_lt_decimal
        | Opcode::cmp_gte_int
        | Opcode::cmp_gte_decimal
        | Opcode::cmp_lte_int
        | Opcode::cmp_lte_decimal => desc(Comparison, Index, Index, Index),
        Opcode::cast_decimal => desc(Other, Index, Unused, Index),
        Opcode::neg_int => desc(Other, Index, Unused, Index),
        Opcode::neg_decimal => desc(Other, Index, Unused, Index),
        Opcode::push => desc(Other, Index, Unused, Unused),
        Opcode::pop => desc(Other, Unused, Unused, Index),
        Opcode::arg_read => desc(Other, ImmInt, Unused, Index),
        Opcode::get_in_parent => desc(Other, ImmInt, Index, Index),
        Opcode::get_in_object => desc(Other, Unused, Unused, Unused),
        Opcode::set_in_parent => desc(Other, ImmInt, Index, Index),
        Opcode::set_in_object => desc(Other, Unused, Unused, Unused),
        Opcode::ret => desc(Other, Unused, Unused, Index),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::opcode::{descriptor_of, Opcode, OpcodeCategory, OperandKind, MAX_OPCODE_NUMBER};

    #[test]
    fn test_opcode_number_round_trip() {
        for number in 0..MAX_OPCODE_NUMBER {
            let opcode = Opcode::from_u16(number as u16);
            assert_eq!(opcode as usize, number);
        }
        assert_eq!(Opcode::ret as usize, MAX_OPCODE_NUMBER - 1);
    }

    #[test]
    #[should_panic]
    fn test_opcode_number_out_of_range() {
        let _ = Opcode::from_u16(MAX_OPCODE_NUMBER as u16);
    }

    #[test]
    fn test_descriptor_categories() {
        for number in 0..MAX_OPCODE_NUMBER {
            let opcode = Opcode::from_u16(number as u16);
            let descriptor = descriptor_of(opcode);

            // every jump carries its target in the destination slot
            if descriptor.category == OpcodeCategory::Jump {
                assert_eq!(descriptor.dest, OperandKind::ImmAddress);
            }

            // comparisons are all register-to-register
            if descriptor.category == OpcodeCategory::Comparison {
                assert_eq!(descriptor.op1, OperandKind::Index);
                assert_eq!(descriptor.op2, OperandKind::Index);
                assert_eq!(descriptor.dest, OperandKind::Index);
            }

            // activation allocation takes the slot count as an immediate
            if descriptor.category == OpcodeCategory::FunctionEnter {
                assert_eq!(descriptor.op1, OperandKind::ImmInt);
            }
        }
    }
}
