// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE, LICENSE.additional and CONTRIBUTING.

// the threaded interpreter
// ------------------------
//
// the canonical semantics reference. a preparation pass decodes the
// serialized word stream once: the opcode number becomes the handler
// function for that instruction (the moral equivalent of recording the
// computed-goto branch address), and INDEX operands are pre-multiplied to
// byte offsets. the dispatch loop then only routes on the handler status:
//
// - jumps replace the instruction pointer with the pre-resolved target
//   when the status is non-zero,
// - `call` pushes the return address on a separate return-address stack
//   and continues at the status value (the callee entry),
// - `ret` pops the return-address stack, or halts once the call depth
//   reaches zero.
//
// execution is strictly single-threaded and runs every opcode to
// completion; a divergent program diverges.

use zephyr_isa::opcode::{descriptor_of, Opcode, OpcodeCategory, OperandKind};
use zephyr_isa::{Value, SLOT_SIZE_IN_BYTES};
use zephyr_program::Program;

use crate::handler::{HandlerFn, HandlerTable};
use crate::vm::VmState;

pub struct PreparedInstruction {
    pub opcode: Opcode,
    handler: HandlerFn,
    pub op1: u64,
    pub op2: u64,
    pub dest: u64,
}

/// Decode the serialized word stream into directly-dispatchable form.
pub fn prepare(words: &[u64], table: &HandlerTable) -> Vec<PreparedInstruction> {
    let count = words[0] as usize;
    let mut instructions = Vec::with_capacity(count);

    for number in 0..count {
        let record = &words[1 + number * 4..1 + number * 4 + 4];
        let opcode = Opcode::from_u16(record[0] as u16);
        let descriptor = descriptor_of(opcode);

        let scale = |value: u64, kind: OperandKind| {
            if kind == OperandKind::Index {
                value * SLOT_SIZE_IN_BYTES as u64
            } else {
                value
            }
        };

        instructions.push(PreparedInstruction {
            opcode,
            handler: table.handler_of(opcode),
            op1: scale(record[1], descriptor.op1),
            op2: scale(record[2], descriptor.op2),
            dest: scale(record[3], descriptor.dest),
        });
    }

    instructions
}

pub fn run(vm: &mut VmState, program: &Program) {
    let table = HandlerTable::new();
    let words = program.to_words();
    let instructions = prepare(&words, &table);
    run_prepared(vm, &instructions);
}

pub fn run_prepared(vm: &mut VmState, instructions: &[PreparedInstruction]) {
    // the first parent context is null
    vm.push(Value::null());

    let mut return_stack: Vec<usize> = Vec::new();
    let mut ip = 0usize;
    let vm_ptr = vm as *mut VmState;

    while ip < instructions.len() {
        let instruction = &instructions[ip];
        let status = (instruction.handler)(vm_ptr, instruction.op1, instruction.op2, instruction.dest);

        if descriptor_of(instruction.opcode).category == OpcodeCategory::Jump {
            ip = if status != 0 {
                instruction.dest as usize
            } else {
                ip + 1
            };
            continue;
        }

        match instruction.opcode {
            Opcode::call => {
                return_stack.push(ip + 1);
                ip = status as usize;
            }
            Opcode::ret => {
                if vm.call_depth == 0 {
                    log::debug!("root function returned, vm exited");
                    break;
                }
                match return_stack.pop() {
                    Some(return_ip) => ip = return_ip,
                    None => unreachable!("return without a pending call"),
                }
            }
            _ => ip += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;

    use zephyr_ast::{samples, ProgramNode};
    use zephyr_codegen::BytecodeGenerator;

    use crate::interpreter::run;
    use crate::vm::VmState;

    #[derive(Clone)]
    struct SharedOutput(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedOutput {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run_to_string(root: &ProgramNode) -> (String, VmState) {
        let buffer = Rc::new(RefCell::new(Vec::new()));
        let mut vm = VmState::with_output(Box::new(SharedOutput(buffer.clone())));
        let program = BytecodeGenerator::generate(root);
        run(&mut vm, &program);
        let text = String::from_utf8(buffer.borrow().clone()).unwrap();
        (text, vm)
    }

    #[test]
    fn test_interpreter_print_string() {
        let (output, _) = run_to_string(&samples::hello());
        assert_eq!(output, "hello\n");
    }

    #[test]
    fn test_interpreter_int_arithmetic() {
        let (output, _) = run_to_string(&samples::int_arithmetic());
        assert_eq!(output, "5\n");
    }

    #[test]
    fn test_interpreter_decimal_widening() {
        let (output, _) = run_to_string(&samples::decimal_widening());
        assert_eq!(output, "3.5\n");
    }

    #[test]
    fn test_interpreter_closure_counter() {
        // the counter closure captures `c` by reference through the heap
        // activation of `mk`, so the state survives between the two calls
        let (output, _) = run_to_string(&samples::closure_counter());
        assert_eq!(output, "1\n2\n");
    }

    #[test]
    fn test_interpreter_recursive_factorial() {
        let (output, _) = run_to_string(&samples::factorial());
        assert_eq!(output, "120\n");
    }

    #[test]
    fn test_interpreter_loop_sum() {
        let (output, _) = run_to_string(&samples::loop_sum());
        assert_eq!(output, "55\n");
    }

    #[test]
    fn test_interpreter_conditionals() {
        let (output, _) = run_to_string(&samples::conditionals());
        assert_eq!(output, "-5\n2\n2\n3\n");
    }

    #[test]
    fn test_balanced_activation() {
        // every fn_enter is matched by a ret: after the root returns the
        // call depth is zero and the base pointer is back at the root frame
        for root in [
            samples::hello(),
            samples::closure_counter(),
            samples::factorial(),
            samples::loop_sum(),
        ] {
            let (_, vm) = run_to_string(&root);
            assert_eq!(vm.call_depth, 0);
            assert_eq!(vm.base_pointer, 1);
        }
    }
}
