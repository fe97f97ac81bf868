// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE, LICENSE.additional and CONTRIBUTING.

use std::fmt::{self, Display, Formatter};

use zephyr_isa::opcode::{descriptor_of, Opcode, OperandKind};

/// Index into the owning program's string pool.
pub type StrId = usize;

/// One operand slot of an instruction, before serialization.
///
/// label and string operands are symbolic here; serialization resolves
/// labels to absolute instruction indices and string ids to the addresses
/// of the pooled strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    /// An immediate scalar, a slot index, or an already-resolved address.
    Imm(u64),
    /// A decimal immediate, serialized as the f64 bit pattern.
    Decimal(f64),
    /// A string immediate, owned by the program's string pool.
    Str(StrId),
    /// A reference to a label, resolved at serialization time.
    Label(String),
}

impl Operand {
    /// Whether this operand can serve as the given descriptor slot kind.
    pub fn matches(&self, kind: OperandKind) -> bool {
        match kind {
            OperandKind::Unused => matches!(self, Operand::None),
            OperandKind::ImmInt | OperandKind::Index => matches!(self, Operand::Imm(_)),
            OperandKind::ImmDecimal => matches!(self, Operand::Decimal(_)),
            OperandKind::ImmString => matches!(self, Operand::Str(_)),
            OperandKind::ImmAddress => matches!(self, Operand::Label(_) | Operand::Imm(_)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub op1: Operand,
    pub op2: Operand,
    pub dest: Operand,
    pub comment: String,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            op1: Operand::None,
            op2: Operand::None,
            dest: Operand::None,
            comment: String::new(),
        }
    }

    pub fn with_op1(mut self, op1: Operand) -> Self {
        self.op1 = op1;
        self
    }

    pub fn with_op2(mut self, op2: Operand) -> Self {
        self.op2 = op2;
        self
    }

    pub fn with_dest(mut self, dest: Operand) -> Self {
        self.dest = dest;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Whether all three operand slots agree with the opcode's descriptor.
    pub fn matches_descriptor(&self) -> bool {
        let descriptor = descriptor_of(self.opcode);
        self.op1.matches(descriptor.op1)
            && self.op2.matches(descriptor.op2)
            && self.dest.matches(descriptor.dest)
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => write!(f, "0"),
            Operand::Imm(value) => write!(f, "{}", value),
            Operand::Decimal(value) => write!(f, "{}", value),
            Operand::Str(id) => write!(f, "str#{}", id),
            Operand::Label(label) => write!(f, "{}", label),
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\t{}, {}, {}, {}",
            self.opcode.name(),
            self.op1,
            self.op2,
            self.dest
        )?;
        if !self.comment.is_empty() {
            write!(f, "\t# {}", self.comment)?;
        }
        Ok(())
    }
}
