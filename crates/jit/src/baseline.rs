// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE, LICENSE.additional and CONTRIBUTING.

// the baseline JIT
// ----------------
//
// a template compiler: it emits host code per bytecode instruction and
// performs no optimization beyond what the bytecode already encodes. the
// program is split at function entries (instruction 0 plus every `mov_fnc`
// target) and every bytecode function becomes one host function
// `fn(*mut VmState)`, with one block bound per instruction so that jumps
// inside a function are plain host branches.
//
// codegen per instruction:
//
// - a small set of hot opcodes (`add_int`, `mod_int`, `cmp_lt_int`,
//   `cmp_lte_int`, `cmp_eq`, `mov`, `mov_int`, `mov_decimal`, `jmp`) is
//   inlined as loads/stores through the current activation pointer,
// - everything else is a direct call into the shared per-opcode handler,
//   imported by symbol from the interpreter's handler table,
// - a `call` handler returns the callee's host code pointer, which is
//   invoked with `call_indirect`; `ret` lowers to a host return,
// - a comparison immediately followed by `jmp_true`/`jmp_false` on the
//   same slot branches on the comparison result directly instead of
//   re-testing the slot.
//
// INDEX operands are pre-multiplied to byte offsets exactly as in the
// interpreter's preparation pass, and `mov_fnc`'s address operand is bound
// to the host address of the target function, so function references hold
// real code pointers at run time.

use std::collections::{HashMap, HashSet};

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{
    types, AbiParam, Block, FuncRef as IrFuncRef, Function, InstBuilder, MemFlags, SigRef,
    Signature, Type, UserFuncName,
};
use cranelift_frontend::FunctionBuilder;
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Linkage, Module};

use zephyr_isa::opcode::{descriptor_of, Opcode, OpcodeCategory, OperandKind, MAX_OPCODE_NUMBER};
use zephyr_isa::{Value, TAG_BOOLEAN, TAG_INT};
use zephyr_program::{Program, ResolvedInstruction};
use zephyr_runtime::handler::HandlerTable;
use zephyr_runtime::vm::VmState;

use crate::Jit;

/// A program compiled to host code. the executable memory lives as long as
/// this value does.
pub struct CompiledProgram {
    _jit: Jit,
    entry: *const u8,
}

impl CompiledProgram {
    pub fn invoke(&self, vm: &mut VmState) {
        let entry: extern "C" fn(*mut VmState) = unsafe { std::mem::transmute(self.entry) };
        entry(vm as *mut VmState);
    }
}

/// Compile and execute the whole program.
pub fn run(vm: &mut VmState, program: &Program) {
    let compiled = compile(program);
    // the first parent context is null
    vm.push(Value::null());
    compiled.invoke(vm);
}

pub fn compile(program: &Program) -> CompiledProgram {
    let instructions = program.resolved_instructions();
    assert!(!instructions.is_empty(), "cannot compile an empty program");

    // function entries and branch targets. branch targets matter for the
    // comparison/jump fusion: a conditional jump that is itself a branch
    // target must keep its standalone form.
    let mut entries: Vec<usize> = vec![0];
    let mut branch_targets: HashSet<usize> = HashSet::new();
    for instruction in &instructions {
        match instruction.opcode {
            Opcode::mov_fnc => {
                entries.push(instruction.op1 as usize);
                branch_targets.insert(instruction.op1 as usize);
            }
            Opcode::jmp | Opcode::jmp_true | Opcode::jmp_false => {
                branch_targets.insert(instruction.dest as usize);
            }
            _ => {}
        }
    }
    entries.sort_unstable();
    entries.dedup();

    let table = HandlerTable::new();
    let mut jit = Jit::new(table.symbols());
    let pointer_type = jit.module.target_config().pointer_type();

    let mut handler_signature = jit.module.make_signature();
    handler_signature.params.push(AbiParam::new(pointer_type));
    handler_signature.params.push(AbiParam::new(types::I64));
    handler_signature.params.push(AbiParam::new(types::I64));
    handler_signature.params.push(AbiParam::new(types::I64));
    handler_signature.returns.push(AbiParam::new(types::I64));

    let mut region_signature = jit.module.make_signature();
    region_signature.params.push(AbiParam::new(pointer_type));

    // one import per opcode handler, resolved against the symbols the
    // handler table registered with the JITBuilder
    let handler_ids: Vec<FuncId> = (0..MAX_OPCODE_NUMBER)
        .map(|number| {
            let opcode = Opcode::from_u16(number as u16);
            jit.module
                .declare_function(
                    &format!("op_{}", opcode.name()),
                    Linkage::Import,
                    &handler_signature,
                )
                .unwrap()
        })
        .collect();

    // one host function per bytecode function, declared up front so that
    // `mov_fnc` can take any of their addresses
    let region_ids: HashMap<usize, FuncId> = entries
        .iter()
        .map(|&entry| {
            let func_id = jit
                .module
                .declare_function(&format!("zfn_{}", entry), Linkage::Local, &region_signature)
                .unwrap();
            (entry, func_id)
        })
        .collect();

    for (position, &entry) in entries.iter().enumerate() {
        let end = entries
            .get(position + 1)
            .copied()
            .unwrap_or(instructions.len());
        let func_id = region_ids[&entry];

        let mut func = Function::with_name_signature(
            UserFuncName::user(0, func_id.as_u32()),
            region_signature.clone(),
        );
        {
            let mut builder =
                FunctionBuilder::new(&mut func, &mut jit.function_builder_context);
            compile_function(
                &mut jit.module,
                &mut builder,
                &instructions,
                entry,
                end,
                &handler_ids,
                &region_ids,
                &region_signature,
                pointer_type,
                &branch_targets,
            );
            builder.seal_all_blocks();
            builder.finalize();
        }

        let mut codegen_context = jit.module.make_context();
        codegen_context.func = func;
        jit.module
            .define_function(func_id, &mut codegen_context)
            .unwrap();
        jit.module.clear_context(&mut codegen_context);
    }

    jit.module.finalize_definitions().unwrap();
    let entry_ptr = jit.module.get_finalized_function(region_ids[&0]);
    log::debug!(
        "baseline jit: {} instructions in {} functions",
        instructions.len(),
        entries.len()
    );

    CompiledProgram {
        _jit: jit,
        entry: entry_ptr,
    }
}

#[allow(clippy::too_many_arguments)]
fn compile_function(
    module: &mut JITModule,
    builder: &mut FunctionBuilder,
    instructions: &[ResolvedInstruction],
    entry: usize,
    end: usize,
    handler_ids: &[FuncId],
    region_ids: &HashMap<usize, FuncId>,
    region_signature: &Signature,
    pointer_type: Type,
    branch_targets: &HashSet<usize>,
) {
    let flags = MemFlags::trusted();
    let context_offset = VmState::context_field_offset();
    let count = end - entry;

    // a comparison immediately followed by a conditional jump on the very
    // slot it writes can branch on the comparison result without
    // re-testing the slot. the jump must not be a branch target itself,
    // otherwise it keeps its standalone form.
    let fuse_flags: Vec<bool> = (0..count)
        .map(|index| {
            let instruction = &instructions[entry + index];
            descriptor_of(instruction.opcode).category == OpcodeCategory::Comparison
                && index + 2 < count
                && matches!(
                    instructions[entry + index + 1].opcode,
                    Opcode::jmp_true | Opcode::jmp_false
                )
                && instructions[entry + index + 1].scaled().0 == instruction.scaled().2
                && !branch_targets.contains(&(entry + index + 1))
        })
        .collect();

    // which instructions control flow can actually reach. unreachable ones
    // (dead code behind a return, or a conditional jump that was fused
    // away) become value-free stubs, so every real value use sits in a
    // block dominated by the entry.
    let mut reachable = vec![false; count];
    reachable[0] = true;
    let mut changed = true;
    while changed {
        changed = false;
        for index in 0..count {
            if !reachable[index] {
                continue;
            }
            let instruction = &instructions[entry + index];
            let mut successors: [Option<usize>; 2] = [None, None];
            match instruction.opcode {
                Opcode::ret => {}
                Opcode::jmp => {
                    successors[0] = Some(instruction.dest as usize - entry);
                }
                Opcode::jmp_true | Opcode::jmp_false => {
                    successors[0] = Some(instruction.dest as usize - entry);
                    successors[1] = Some(index + 1);
                }
                _ => {
                    if fuse_flags[index] {
                        successors[0] =
                            Some(instructions[entry + index + 1].dest as usize - entry);
                        successors[1] = Some(index + 2);
                    } else {
                        successors[0] = Some(index + 1);
                    }
                }
            }
            for successor in successors.into_iter().flatten() {
                if successor < count && !reachable[successor] {
                    reachable[successor] = true;
                    changed = true;
                }
            }
        }
    }

    // one block per instruction, so any instruction can be a jump target
    let blocks: Vec<Block> = (0..count).map(|_| builder.create_block()).collect();

    builder.append_block_params_for_function_params(blocks[0]);
    builder.switch_to_block(blocks[0]);
    let vm_value = builder.block_params(blocks[0])[0];

    let mut handler_refs: HashMap<usize, IrFuncRef> = HashMap::new();
    let mut region_refs: HashMap<usize, IrFuncRef> = HashMap::new();
    let mut region_sig_ref: Option<SigRef> = None;

    for index in 0..count {
        if index > 0 {
            builder.switch_to_block(blocks[index]);
        }

        if !reachable[index] {
            builder.ins().return_(&[]);
            continue;
        }

        let instruction = &instructions[entry + index];
        let descriptor = descriptor_of(instruction.opcode);
        let (op1, op2, dest) = instruction.scaled();
        let fuse = fuse_flags[index];

        match instruction.opcode {
            // inlined opcodes
            Opcode::jmp => {
                debug_assert!((entry..end).contains(&(instruction.dest as usize)));
                let target = blocks[instruction.dest as usize - entry];
                builder.ins().jump(target, &[]);
                continue;
            }
            Opcode::mov => {
                let context = builder
                    .ins()
                    .load(pointer_type, flags, vm_value, context_offset);
                let value = builder.ins().load(types::I64, flags, context, op1 as i32);
                builder.ins().store(flags, value, context, dest as i32);
            }
            Opcode::mov_int => {
                let context = builder
                    .ins()
                    .load(pointer_type, flags, vm_value, context_offset);
                let packed = TAG_INT as u64 | ((op1 as u32 as u64) << 32);
                let value = builder.ins().iconst(types::I64, packed as i64);
                builder.ins().store(flags, value, context, dest as i32);
            }
            Opcode::mov_decimal => {
                // narrow the f64 bit pattern to the f32 payload at emit time
                let context = builder
                    .ins()
                    .load(pointer_type, flags, vm_value, context_offset);
                let narrowed = f64::from_bits(op1) as f32;
                let packed = Value::decimal(narrowed).as_raw();
                let value = builder.ins().iconst(types::I64, packed as i64);
                builder.ins().store(flags, value, context, dest as i32);
            }
            Opcode::add_int | Opcode::mod_int => {
                let context = builder
                    .ins()
                    .load(pointer_type, flags, vm_value, context_offset);
                let a = builder.ins().load(types::I32, flags, context, op1 as i32 + 4);
                let b = builder.ins().load(types::I32, flags, context, op2 as i32 + 4);
                let result = if instruction.opcode == Opcode::add_int {
                    builder.ins().iadd(a, b)
                } else {
                    builder.ins().srem(a, b)
                };
                let tag = builder.ins().iconst(types::I32, TAG_INT as i64);
                builder.ins().store(flags, tag, context, dest as i32);
                builder.ins().store(flags, result, context, dest as i32 + 4);
            }
            Opcode::cmp_eq | Opcode::cmp_lt_int | Opcode::cmp_lte_int => {
                let context = builder
                    .ins()
                    .load(pointer_type, flags, vm_value, context_offset);
                let a = builder.ins().load(types::I32, flags, context, op1 as i32 + 4);
                let b = builder.ins().load(types::I32, flags, context, op2 as i32 + 4);
                let condition_code = match instruction.opcode {
                    Opcode::cmp_eq => IntCC::Equal,
                    Opcode::cmp_lt_int => IntCC::SignedLessThan,
                    _ => IntCC::SignedLessThanOrEqual,
                };
                let condition = builder.ins().icmp(condition_code, a, b);
                let widened = builder.ins().uextend(types::I32, condition);
                let tag = builder.ins().iconst(types::I32, TAG_BOOLEAN as i64);
                builder.ins().store(flags, tag, context, dest as i32);
                builder.ins().store(flags, widened, context, dest as i32 + 4);

                if fuse {
                    let jump = &instructions[entry + index + 1];
                    debug_assert!((entry..end).contains(&(jump.dest as usize)));
                    let target = blocks[jump.dest as usize - entry];
                    let fall = blocks[index + 2];
                    if jump.opcode == Opcode::jmp_true {
                        builder.ins().brif(condition, target, &[], fall, &[]);
                    } else {
                        builder.ins().brif(condition, fall, &[], target, &[]);
                    }
                    continue;
                }
            }

            // everything else goes through the shared handler
            _ => {
                let opcode_number = instruction.opcode as usize;
                let handler_ref = match handler_refs.get(&opcode_number) {
                    Some(func_ref) => *func_ref,
                    None => {
                        let func_ref = module
                            .declare_func_in_func(handler_ids[opcode_number], &mut builder.func);
                        handler_refs.insert(opcode_number, func_ref);
                        func_ref
                    }
                };

                let op1_value = if descriptor.op1 == OperandKind::ImmAddress {
                    // bind the host address of the target function, so a
                    // function reference stores a real code pointer
                    let target_entry = instruction.op1 as usize;
                    let callee_ref = match region_refs.get(&target_entry) {
                        Some(func_ref) => *func_ref,
                        None => {
                            let func_ref = module
                                .declare_func_in_func(region_ids[&target_entry], &mut builder.func);
                            region_refs.insert(target_entry, func_ref);
                            func_ref
                        }
                    };
                    builder.ins().func_addr(pointer_type, callee_ref)
                } else {
                    builder.ins().iconst(types::I64, op1 as i64)
                };
                let op2_value = builder.ins().iconst(types::I64, op2 as i64);
                let dest_value = builder.ins().iconst(types::I64, dest as i64);

                let call_inst = builder
                    .ins()
                    .call(handler_ref, &[vm_value, op1_value, op2_value, dest_value]);
                let status = builder.inst_results(call_inst)[0];

                if descriptor.category == OpcodeCategory::Jump {
                    // standalone jmp_true / jmp_false
                    debug_assert!((entry..end).contains(&(instruction.dest as usize)));
                    let target = blocks[instruction.dest as usize - entry];
                    let fall = blocks[index + 1];
                    let condition = builder.ins().icmp_imm(IntCC::NotEqual, status, 0);
                    builder.ins().brif(condition, target, &[], fall, &[]);
                    continue;
                }

                if fuse {
                    let condition = builder.ins().icmp_imm(IntCC::NotEqual, status, 0);
                    let jump = &instructions[entry + index + 1];
                    debug_assert!((entry..end).contains(&(jump.dest as usize)));
                    let target = blocks[jump.dest as usize - entry];
                    let fall = blocks[index + 2];
                    if jump.opcode == Opcode::jmp_true {
                        builder.ins().brif(condition, target, &[], fall, &[]);
                    } else {
                        builder.ins().brif(condition, fall, &[], target, &[]);
                    }
                    continue;
                }

                match instruction.opcode {
                    Opcode::call => {
                        // the handler returned the callee's code pointer
                        let sig_ref = match region_sig_ref {
                            Some(sig_ref) => sig_ref,
                            None => {
                                let sig_ref =
                                    builder.import_signature(region_signature.clone());
                                region_sig_ref = Some(sig_ref);
                                sig_ref
                            }
                        };
                        builder.ins().call_indirect(sig_ref, status, &[vm_value]);
                    }
                    Opcode::ret => {
                        builder.ins().return_(&[]);
                        continue;
                    }
                    _ => {}
                }
            }
        }

        // fall through to the next instruction
        if index + 1 < count {
            builder.ins().jump(blocks[index + 1], &[]);
        } else {
            builder.ins().return_(&[]);
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
    use zephyr_isa::opcode::Opcode;
    use zephyr_program::{Instruction, Operand, Program};
    use zephyr_runtime::interpreter;
    use zephyr_runtime::vm::VmState;

    use crate::run;

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

    fn capture_vm() -> (Rc<RefCell<Vec<u8>>>, VmState) {
        let buffer = Rc::new(RefCell::new(Vec::new()));
        let vm = VmState::with_output(Box::new(SharedOutput(buffer.clone())));
        (buffer, vm)
    }

    /// Run the program under both engines and check they observe the same
    /// world: identical print output and identical final stack cursors.
    fn assert_equivalence(root: &ProgramNode, expected_output: &str) {
        let program = BytecodeGenerator::generate(root);

        let (interpreter_buffer, mut interpreter_vm) = capture_vm();
        interpreter::run(&mut interpreter_vm, &program);

        let (jit_buffer, mut jit_vm) = capture_vm();
        run(&mut jit_vm, &program);

        let interpreter_output =
            String::from_utf8(interpreter_buffer.borrow().clone()).unwrap();
        let jit_output = String::from_utf8(jit_buffer.borrow().clone()).unwrap();

        assert_eq!(interpreter_output, expected_output);
        assert_eq!(jit_output, expected_output);
        assert_eq!(interpreter_vm.stack_pointer, jit_vm.stack_pointer);
        assert_eq!(interpreter_vm.base_pointer, jit_vm.base_pointer);
        assert_eq!(interpreter_vm.call_depth, jit_vm.call_depth);
    }

    #[test]
    fn test_jit_smoke() {
        // fn_enter_stack 3; mov_int 42 -> slot 2; push slot 2; ret
        let mut program = Program::new("smoke.zs");
        program.add_instruction(
            Instruction::new(Opcode::fn_enter_stack).with_op1(Operand::Imm(3)),
        );
        program.add_instruction(
            Instruction::new(Opcode::mov_int)
                .with_op1(Operand::Imm(42))
                .with_dest(Operand::Imm(2)),
        );
        program.add_instruction(Instruction::new(Opcode::push).with_op1(Operand::Imm(2)));
        program.add_instruction(Instruction::new(Opcode::ret).with_dest(Operand::Imm(0)));

        let mut vm = VmState::new();
        run(&mut vm, &program);

        // the frame: saved bp at 0, activation in 1..4, pushed copy at 4
        assert_eq!(vm.stack_value(3).arith_int(), 42);
        assert_eq!(vm.stack_value(4).arith_int(), 42);
        assert_eq!(vm.stack_pointer, 5);
        assert_eq!(vm.call_depth, 0);
    }

    #[test]
    fn test_jit_print_string() {
        assert_equivalence(&samples::hello(), "hello\n");
    }

    #[test]
    fn test_jit_int_arithmetic() {
        assert_equivalence(&samples::int_arithmetic(), "5\n");
    }

    #[test]
    fn test_jit_decimal_widening() {
        assert_equivalence(&samples::decimal_widening(), "3.5\n");
    }

    #[test]
    fn test_jit_closure_counter() {
        // exercises mov_fnc host code pointers, call_indirect and the
        // parent-context walks under generated code
        assert_equivalence(&samples::closure_counter(), "1\n2\n");
    }

    #[test]
    fn test_jit_recursive_factorial() {
        assert_equivalence(&samples::factorial(), "120\n");
    }

    #[test]
    fn test_jit_loop_sum() {
        // exercises the comparison/jump fusion on the loop exit test
        assert_equivalence(&samples::loop_sum(), "55\n");
    }

    #[test]
    fn test_jit_conditionals() {
        // exercises else branches, negation, the inlined mod_int, and the
        // fused branch behind a handler-lowered comparison (cmp_gt_int)
        assert_equivalence(&samples::conditionals(), "-5\n2\n2\n3\n");
    }
}
