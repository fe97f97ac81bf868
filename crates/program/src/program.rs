// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE, LICENSE.additional and CONTRIBUTING.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use zephyr_isa::opcode::{descriptor_of, Opcode, OperandKind};

use crate::instruction::{Instruction, Operand, StrId};

// the serialized program layout (process-local, little-endian 64-bit words):
//
// | word 0            | instruction count N (labels excluded)             |
// | words 1..1+4*N    | N records of (opcode, op1, op2, destination)      |
//
// for `mov_string` op1 is the raw address of a string owned by this
// program's pool, so the Program must outlive the produced stream. for
// `mov_decimal` op1 is the f64 bit pattern. address operands are the index
// of the instruction that follows the referenced label.
// no magic and no version are emitted.

enum ProgramItem {
    /// A symbolic anchor; not an instruction at runtime. it resolves to the
    /// index of the next real instruction.
    Label(String),
    Instruction(Instruction),
}

pub struct Program {
    file_name: String,
    items: Vec<ProgramItem>,
    // Box keeps each string's address stable while the pool grows,
    // the produced bytecode embeds these addresses.
    strings: Vec<Box<String>>,
}

/// An instruction with all labels resolved, for consumers that want the
/// decoded form rather than the word stream (the baseline JIT).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedInstruction {
    pub opcode: Opcode,
    pub op1: u64,
    pub op2: u64,
    pub dest: u64,
}

impl Program {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            items: Vec::new(),
            strings: Vec::new(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn add_instruction(&mut self, instruction: Instruction) {
        self.items.push(ProgramItem::Instruction(instruction));
    }

    pub fn add_label(&mut self, label: impl Into<String>) {
        self.items.push(ProgramItem::Label(label.into()));
    }

    /// Insert an instruction immediately after the first occurrence of the
    /// named label. inserting at a non-existent label is a silent no-op.
    pub fn insert_after_label(&mut self, label: &str, instruction: Instruction) {
        let position = self.items.iter().position(
            |item| matches!(item, ProgramItem::Label(name) if name == label),
        );
        if let Some(position) = position {
            self.items
                .insert(position + 1, ProgramItem::Instruction(instruction));
        }
    }

    /// Intern a string into the program-owned pool. the pooled string's
    /// address is what `mov_string` carries in the serialized form.
    pub fn intern_string(&mut self, value: impl Into<String>) -> StrId {
        self.strings.push(Box::new(value.into()));
        self.strings.len() - 1
    }

    pub fn string_at(&self, id: StrId) -> &str {
        &self.strings[id]
    }

    /// Append another program. the merged program owns the other's string
    /// pool; string operands are re-based onto the combined pool.
    pub fn merge(&mut self, other: Program) {
        let string_base = self.strings.len();
        self.strings.extend(other.strings);

        for item in other.items {
            match item {
                ProgramItem::Label(label) => self.items.push(ProgramItem::Label(label)),
                ProgramItem::Instruction(mut instruction) => {
                    for operand in [
                        &mut instruction.op1,
                        &mut instruction.op2,
                        &mut instruction.dest,
                    ] {
                        if let Operand::Str(id) = operand {
                            *id += string_base;
                        }
                    }
                    self.items.push(ProgramItem::Instruction(instruction));
                }
            }
        }
    }

    /// The real (non-label) instructions, in program order, labels still
    /// unresolved.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.items.iter().filter_map(|item| match item {
            ProgramItem::Instruction(instruction) => Some(instruction),
            ProgramItem::Label(_) => None,
        })
    }

    /// The number of real (non-label) instructions.
    pub fn instruction_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, ProgramItem::Instruction(_)))
            .count()
    }

    fn label_positions(&self) -> HashMap<&str, u64> {
        let mut positions = HashMap::new();
        let mut index = 0u64;
        for item in &self.items {
            match item {
                ProgramItem::Label(label) => {
                    positions.insert(label.as_str(), index);
                }
                ProgramItem::Instruction(_) => index += 1,
            }
        }
        positions
    }

    fn encode_operand(&self, operand: &Operand, positions: &HashMap<&str, u64>) -> u64 {
        match operand {
            Operand::None => 0,
            Operand::Imm(value) => *value,
            Operand::Decimal(value) => value.to_bits(),
            Operand::Str(id) => &*self.strings[*id] as *const String as u64,
            Operand::Label(label) => *positions.get(label.as_str()).unwrap_or_else(|| {
                log::error!("unresolved label `{}` in `{}`", label, self.file_name);
                panic!("unresolved label `{}`", label)
            }),
        }
    }

    /// Serialize to the flat 64-bit word stream described above.
    pub fn to_words(&self) -> Vec<u64> {
        let positions = self.label_positions();
        let count = self.instruction_count();

        let mut words = Vec::with_capacity(1 + count * 4);
        words.push(count as u64);

        for item in &self.items {
            if let ProgramItem::Instruction(instruction) = item {
                words.push(instruction.opcode as u64);
                words.push(self.encode_operand(&instruction.op1, &positions));
                words.push(self.encode_operand(&instruction.op2, &positions));
                words.push(self.encode_operand(&instruction.dest, &positions));
            }
        }

        words
    }

    /// The ordered instruction list with all labels resolved.
    pub fn resolved_instructions(&self) -> Vec<ResolvedInstruction> {
        let positions = self.label_positions();
        self.items
            .iter()
            .filter_map(|item| match item {
                ProgramItem::Label(_) => None,
                ProgramItem::Instruction(instruction) => Some(ResolvedInstruction {
                    opcode: instruction.opcode,
                    op1: self.encode_operand(&instruction.op1, &positions),
                    op2: self.encode_operand(&instruction.op2, &positions),
                    dest: self.encode_operand(&instruction.dest, &positions),
                }),
            })
            .collect()
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "program of file at `{}`:", self.file_name)?;
        let mut index = 0;
        for item in &self.items {
            match item {
                ProgramItem::Label(label) => writeln!(f, "{}:", label)?,
                ProgramItem::Instruction(instruction) => {
                    writeln!(f, "{}:{}", index, instruction)?;
                    index += 1;
                }
            }
        }
        Ok(())
    }
}

impl ResolvedInstruction {
    /// INDEX operands pre-multiplied to byte offsets, the form handlers
    /// expect. both execution engines apply the same scaling.
    pub fn scaled(&self) -> (u64, u64, u64) {
        let descriptor = descriptor_of(self.opcode);
        let scale = |value: u64, kind: OperandKind| {
            if kind == OperandKind::Index {
                value * zephyr_isa::SLOT_SIZE_IN_BYTES as u64
            } else {
                value
            }
        };
        (
            scale(self.op1, descriptor.op1),
            scale(self.op2, descriptor.op2),
            scale(self.dest, descriptor.dest),
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use zephyr_isa::opcode::Opcode;

    use crate::{Instruction, Operand, Program};

    fn sample_program() -> Program {
        // entry:
        //   mov_int 7 -> slot 1
        //   cmp_lt_int slot1, slot2 -> slot 3
        //   jmp_false slot3 -> end
        //   jmp -> entry
        // end:
        //   ret 0
        let mut program = Program::new("sample.zs");
        program.add_label("entry");
        program.add_instruction(
            Instruction::new(Opcode::mov_int)
                .with_op1(Operand::Imm(7))
                .with_dest(Operand::Imm(1)),
        );
        program.add_instruction(
            Instruction::new(Opcode::cmp_lt_int)
                .with_op1(Operand::Imm(1))
                .with_op2(Operand::Imm(2))
                .with_dest(Operand::Imm(3)),
        );
        program.add_instruction(
            Instruction::new(Opcode::jmp_false)
                .with_op1(Operand::Imm(3))
                .with_dest(Operand::Label("end".to_string())),
        );
        program
            .add_instruction(Instruction::new(Opcode::jmp).with_dest(Operand::Label("entry".to_string())));
        program.add_label("end");
        program.add_instruction(Instruction::new(Opcode::ret).with_dest(Operand::Imm(0)));
        program
    }

    #[test]
    fn test_serialization_layout() {
        let program = sample_program();
        let words = program.to_words();

        // header word is the non-label instruction count
        assert_eq!(words[0], 5);
        assert_eq!(words.len(), 1 + 5 * 4);

        // first record
        assert_eq!(words[1], Opcode::mov_int as u64);
        assert_eq!(words[2], 7);
        assert_eq!(words[3], 0);
        assert_eq!(words[4], 1);
    }

    #[test]
    fn test_label_resolution() {
        let program = sample_program();
        let words = program.to_words();
        let count = words[0] as usize;

        // `end` resolves to the instruction following the label (index 4),
        // `entry` to index 0
        let jmp_false_dest = words[1 + 2 * 4 + 3];
        let jmp_dest = words[1 + 3 * 4 + 3];
        assert_eq!(jmp_false_dest, 4);
        assert_eq!(jmp_dest, 0);

        // label closure: every resolved address lands inside the program
        assert!((jmp_false_dest as usize) < count);
        assert!((jmp_dest as usize) < count);
    }

    #[test]
    #[should_panic(expected = "unresolved label")]
    fn test_unresolved_label_is_fatal() {
        let mut program = Program::new("broken.zs");
        program.add_instruction(
            Instruction::new(Opcode::jmp).with_dest(Operand::Label("nowhere".to_string())),
        );
        let _ = program.to_words();
    }

    #[test]
    fn test_insert_after_label() {
        let mut program = Program::new("insert.zs");
        program.add_label("entry");
        program.add_instruction(Instruction::new(Opcode::ret).with_dest(Operand::Imm(0)));

        program.insert_after_label(
            "entry",
            Instruction::new(Opcode::fn_enter_stack).with_op1(Operand::Imm(4)),
        );
        let resolved = program.resolved_instructions();
        assert_eq!(resolved[0].opcode, Opcode::fn_enter_stack);
        assert_eq!(resolved[0].op1, 4);
        assert_eq!(resolved[1].opcode, Opcode::ret);

        // inserting at an unknown label must be a silent no-op
        program.insert_after_label(
            "missing",
            Instruction::new(Opcode::fn_enter_heap).with_op1(Operand::Imm(1)),
        );
        assert_eq!(program.instruction_count(), 2);
    }

    #[test]
    fn test_mov_decimal_bit_pattern() {
        let mut program = Program::new("decimal.zs");
        program.add_instruction(
            Instruction::new(Opcode::mov_decimal)
                .with_op1(Operand::Decimal(2.5))
                .with_dest(Operand::Imm(1)),
        );
        let words = program.to_words();
        assert_eq!(words[2], 2.5f64.to_bits());
    }

    #[test]
    fn test_merge_rebases_string_pool() {
        let mut first = Program::new("first.zs");
        let id0 = first.intern_string("hello");
        first.add_instruction(
            Instruction::new(Opcode::mov_string)
                .with_op1(Operand::Str(id0))
                .with_dest(Operand::Imm(1)),
        );

        let mut second = Program::new("second.zs");
        let id1 = second.intern_string("world");
        second.add_instruction(
            Instruction::new(Opcode::mov_string)
                .with_op1(Operand::Str(id1))
                .with_dest(Operand::Imm(2)),
        );

        first.merge(second);
        let words = first.to_words();

        let first_ptr = words[2] as *const String;
        let second_ptr = words[6] as *const String;
        assert_eq!(unsafe { &*first_ptr }.as_str(), "hello");
        assert_eq!(unsafe { &*second_ptr }.as_str(), "world");
    }

    #[test]
    fn test_scaled_operands() {
        let program = sample_program();
        let resolved = program.resolved_instructions();

        // cmp_lt_int: all three operands are INDEX and become byte offsets
        let (op1, op2, dest) = resolved[1].scaled();
        assert_eq!((op1, op2, dest), (8, 16, 24));

        // jmp_false: the test slot scales, the address does not
        let (op1, _, dest) = resolved[2].scaled();
        assert_eq!(op1, 24);
        assert_eq!(dest, 4);
    }
}
