// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE, LICENSE.additional and CONTRIBUTING.

// lowering the annotated tree to bytecode
// ---------------------------------------
//
// every function literal is emitted into its own subprogram, labeled
// `fun@<line>_<pos>`. the enclosing function only emits a `mov_fnc` that
// refers to that label, so the subprograms can be merged into one flat
// program afterwards and the labels resolve across the merged stream.
//
// a subprogram starts with two labels:
//
//   fun@<line>_<pos>:     the call target, referenced by `mov_fnc`
//   programEntry:         the insertion anchor for the activation setup
//
// the `fn_enter_heap`/`fn_enter_stack` instruction is back-inserted at
// `programEntry` once the body has been emitted, because only then is the
// final slot count known (temporaries extend the activation).
//
// expressions are lowered with a "preferred destination" slot. atoms load
// immediates into it, identifier references usually emit no code at all and
// just report the slot the value already lives in.

use std::collections::BTreeMap;

use zephyr_ast::{
    Argument, BinaryOp, Expr, ExprKind, PrefixOp, ProgramNode, SourcePos, Statement,
    StatementKind, TypeTag,
};
use zephyr_isa::opcode::Opcode;
use zephyr_program::{Instruction, Operand, Program};

const PROGRAM_ENTRY_LABEL: &str = "programEntry";

/// Per-function pool of temporary slots, reused across expression subtrees.
///
/// the pool extends the activation layout produced by the type extractor:
/// the first temporary gets the slot right after the declared ones, and a
/// released temporary is handed out again before the activation grows.
struct TempVariableAllocator {
    base: u32,
    // temp slot index -> currently occupied
    occupancy: BTreeMap<u32, bool>,
}

impl TempVariableAllocator {
    fn new(base: u32) -> Self {
        Self {
            base,
            occupancy: BTreeMap::new(),
        }
    }

    fn alloc(&mut self) -> u32 {
        let free = self
            .occupancy
            .iter()
            .find(|(_, occupied)| !**occupied)
            .map(|(index, _)| *index);
        match free {
            Some(index) => {
                self.occupancy.insert(index, true);
                index
            }
            None => {
                let index = self.base + self.occupancy.len() as u32;
                self.occupancy.insert(index, true);
                index
            }
        }
    }

    fn release(&mut self, index: u32) {
        if let Some(occupied) = self.occupancy.get_mut(&index) {
            *occupied = false;
        }
    }

    /// Declared slots plus every temporary ever allocated; this is the size
    /// reported to `fn_enter_*`.
    fn total_slot_count(&self) -> u32 {
        self.base + self.occupancy.len() as u32
    }
}

struct FunctionFrame {
    temps: TempVariableAllocator,
    is_leaf: bool,
}

pub struct BytecodeGenerator;

impl BytecodeGenerator {
    pub fn generate(root: &ProgramNode) -> Program {
        let mut generator = Generator {
            file_name: root.file_name.clone(),
            subprograms: Vec::new(),
            program_stack: Vec::new(),
            function_stack: Vec::new(),
        };

        // the whole source file acts as a synthesized top-level function
        generator.visit_function(
            "",
            root.slot_count,
            &[],
            &root.statements,
            SourcePos::new(0, 0),
            0,
        );

        let mut program = Program::new(root.file_name.clone());
        for subprogram in generator.subprograms {
            program.merge(subprogram);
        }
        log::debug!(
            "generated {} instructions for `{}`",
            program.instruction_count(),
            program.file_name()
        );
        program
    }
}

struct Generator {
    file_name: String,
    subprograms: Vec<Program>,
    // indices into `subprograms`, innermost last
    program_stack: Vec<usize>,
    function_stack: Vec<FunctionFrame>,
}

impl Generator {
    fn current_program(&mut self) -> &mut Program {
        let index = *self.program_stack.last().unwrap();
        &mut self.subprograms[index]
    }

    fn emit(&mut self, instruction: Instruction) {
        self.current_program().add_instruction(instruction);
    }

    fn emit_label(&mut self, label: &str) {
        self.current_program().add_label(label);
    }

    fn temps(&mut self) -> &mut TempVariableAllocator {
        &mut self.function_stack.last_mut().unwrap().temps
    }

    fn visit_function(
        &mut self,
        identifier: &str,
        slot_count: u32,
        arguments: &[Argument],
        body: &[Statement],
        at: SourcePos,
        preferred: u32,
    ) -> u32 {
        let fn_label = format!("fun@{}_{}", at.line, at.pos);

        if !self.program_stack.is_empty() {
            // let the enclosing function know our address so it can call us
            let display_name = if identifier.is_empty() {
                fn_label.as_str()
            } else {
                identifier
            };
            let instruction = Instruction::new(Opcode::mov_fnc)
                .with_op1(Operand::Label(fn_label.clone()))
                .with_dest(Operand::Imm(preferred as u64))
                .with_comment(format!(
                    "mov address of `{}` to index {} in the current frame",
                    display_name, preferred
                ));
            self.emit(instruction);
        }

        if let Some(frame) = self.function_stack.last_mut() {
            // the enclosing function hosts a nested function now, so its
            // activation can escape and has to live on the heap
            frame.is_leaf = false;
        }

        let mut subprogram = Program::new(self.file_name.clone());
        subprogram.add_label(fn_label);
        subprogram.add_label(PROGRAM_ENTRY_LABEL);
        self.subprograms.push(subprogram);
        self.program_stack.push(self.subprograms.len() - 1);
        self.function_stack.push(FunctionFrame {
            temps: TempVariableAllocator::new(slot_count),
            is_leaf: true,
        });

        for (number, argument) in arguments.iter().enumerate() {
            let instruction = Instruction::new(Opcode::arg_read)
                .with_op1(Operand::Imm(number as u64))
                .with_dest(Operand::Imm(argument.index as u64))
                .with_comment(format!("read argument `{}`", argument.name));
            self.emit(instruction);
        }

        for statement in body {
            self.visit_statement(statement);
        }

        let frame = self.function_stack.pop().unwrap();
        let index = self.program_stack.pop().unwrap();

        let enter_opcode = if frame.is_leaf {
            Opcode::fn_enter_stack
        } else {
            Opcode::fn_enter_heap
        };
        let frame_size = frame.temps.total_slot_count();
        self.subprograms[index].insert_after_label(
            PROGRAM_ENTRY_LABEL,
            Instruction::new(enter_opcode)
                .with_op1(Operand::Imm(frame_size as u64))
                .with_comment(format!(
                    "allocate call frame that is {} values big",
                    frame_size
                )),
        );
        self.subprograms[index].add_instruction(
            Instruction::new(Opcode::ret)
                .with_dest(Operand::Imm(0))
                .with_comment("implicit null-return"),
        );

        preferred
    }

    fn visit_statement(&mut self, statement: &Statement) {
        match &statement.kind {
            StatementKind::Variable {
                name, index, ty, init,
            } => self.visit_variable(name, *index, *ty, init.as_ref()),
            StatementKind::Expression(expr) => self.visit_expression_statement(expr),
            StatementKind::Return(expr) => self.visit_return(expr.as_ref()),
            StatementKind::If {
                condition,
                then_body,
                else_body,
            } => self.visit_if(condition, then_body, else_body.as_deref(), statement.at),
            StatementKind::Loop {
                init,
                condition,
                update,
                body,
            } => self.visit_loop(
                init.as_deref(),
                condition.as_ref(),
                update.as_ref(),
                body,
                statement.at,
            ),
        }
    }

    fn visit_variable(&mut self, name: &str, index: u32, ty: TypeTag, init: Option<&Expr>) {
        match init {
            Some(init) => {
                let actual = self.visit_expr(init, index);
                if init.ty == TypeTag::Int && ty == TypeTag::Decimal {
                    // widen into the variable's own slot, never in place of
                    // whatever slot the initializer happened to live in
                    if actual != index {
                        self.emit(
                            Instruction::new(Opcode::mov)
                                .with_op1(Operand::Imm(actual as u64))
                                .with_dest(Operand::Imm(index as u64)),
                        );
                    }
                    self.emit(
                        Instruction::new(Opcode::cast_decimal)
                            .with_op1(Operand::Imm(index as u64))
                            .with_dest(Operand::Imm(index as u64))
                            .with_comment(format!("widen `{}` from int to decimal", name)),
                    );
                } else if actual != index {
                    self.emit(
                        Instruction::new(Opcode::mov)
                            .with_op1(Operand::Imm(actual as u64))
                            .with_dest(Operand::Imm(index as u64))
                            .with_comment(format!(
                                "mov value at index {} into index {} ({})",
                                actual, index, name
                            )),
                    );
                }
            }
            None => {
                self.emit(
                    Instruction::new(Opcode::mov_null)
                        .with_dest(Operand::Imm(index as u64))
                        .with_comment(format!("uninitialized variable `{}`", name)),
                );
            }
        }
    }

    fn visit_expression_statement(&mut self, expr: &Expr) {
        if matches!(expr.kind, ExprKind::Assign { .. }) {
            self.visit_expr(expr, 0);
        } else {
            // a statement-level expression still needs a slot to land in
            let temp = self.temps().alloc();
            self.visit_expr(expr, temp);
            self.temps().release(temp);
        }
    }

    fn visit_return(&mut self, expr: Option<&Expr>) {
        let value_index = match expr {
            Some(expr) => {
                let temp = self.temps().alloc();
                let actual = self.visit_expr(expr, temp);
                self.temps().release(temp);
                actual
            }
            None => 0,
        };
        self.emit(
            Instruction::new(Opcode::ret)
                .with_dest(Operand::Imm(value_index as u64))
                .with_comment(format!("return value at {}", value_index)),
        );
    }

    fn visit_if(
        &mut self,
        condition: &Expr,
        then_body: &[Statement],
        else_body: Option<&[Statement]>,
        at: SourcePos,
    ) {
        let else_label = format!("if@{}_{}.else", at.line, at.pos);
        let end_label = format!("if@{}_{}.end", at.line, at.pos);
        let skip_label = if else_body.is_some() {
            else_label.clone()
        } else {
            end_label.clone()
        };

        let temp = self.temps().alloc();
        let condition_index = self.visit_expr(condition, temp);
        self.emit(
            Instruction::new(Opcode::jmp_false)
                .with_op1(Operand::Imm(condition_index as u64))
                .with_dest(Operand::Label(skip_label)),
        );
        self.temps().release(temp);

        for statement in then_body {
            self.visit_statement(statement);
        }

        if let Some(else_body) = else_body {
            self.emit(Instruction::new(Opcode::jmp).with_dest(Operand::Label(end_label.clone())));
            self.emit_label(&else_label);
            for statement in else_body {
                self.visit_statement(statement);
            }
        }

        self.emit_label(&end_label);
    }

    fn visit_loop(
        &mut self,
        init: Option<&Statement>,
        condition: Option<&Expr>,
        update: Option<&Expr>,
        body: &[Statement],
        at: SourcePos,
    ) {
        let start_label = format!("loop@{}_{}.start", at.line, at.pos);
        let end_label = format!("loop@{}_{}.end", at.line, at.pos);

        if let Some(init) = init {
            self.visit_statement(init);
        }

        self.emit_label(&start_label);

        if let Some(condition) = condition {
            let temp = self.temps().alloc();
            let condition_index = self.visit_expr(condition, temp);
            self.emit(
                Instruction::new(Opcode::jmp_false)
                    .with_op1(Operand::Imm(condition_index as u64))
                    .with_dest(Operand::Label(end_label.clone())),
            );
            self.temps().release(temp);
        }

        for statement in body {
            self.visit_statement(statement);
        }

        if let Some(update) = update {
            self.visit_expression_statement(update);
        }

        self.emit(Instruction::new(Opcode::jmp).with_dest(Operand::Label(start_label.clone())));
        self.emit_label(&end_label);
    }

    /// Lower an expression, writing its value into `preferred` unless the
    /// value already lives somewhere (identifiers); returns the slot the
    /// value actually ended up in. assignments produce no value and
    /// return 0.
    fn visit_expr(&mut self, expr: &Expr, preferred: u32) -> u32 {
        match &expr.kind {
            ExprKind::IntLit(value) => {
                self.emit(
                    Instruction::new(Opcode::mov_int)
                        .with_op1(Operand::Imm(*value as u32 as u64))
                        .with_dest(Operand::Imm(preferred as u64)),
                );
                preferred
            }
            ExprKind::DecimalLit(value) => {
                self.emit(
                    Instruction::new(Opcode::mov_decimal)
                        .with_op1(Operand::Decimal(*value))
                        .with_dest(Operand::Imm(preferred as u64)),
                );
                preferred
            }
            ExprKind::BooleanLit(value) => {
                self.emit(
                    Instruction::new(Opcode::mov_boolean)
                        .with_op1(Operand::Imm(*value as u64))
                        .with_dest(Operand::Imm(preferred as u64)),
                );
                preferred
            }
            ExprKind::StringLit(value) => {
                let id = self.current_program().intern_string(value.clone());
                self.emit(
                    Instruction::new(Opcode::mov_string)
                        .with_op1(Operand::Str(id))
                        .with_dest(Operand::Imm(preferred as u64)),
                );
                preferred
            }
            ExprKind::NullLit => {
                self.emit(
                    Instruction::new(Opcode::mov_null).with_dest(Operand::Imm(preferred as u64)),
                );
                preferred
            }
            ExprKind::Ident { name, depth, index } => {
                if *depth == 0 {
                    // the value already lives in this activation
                    *index
                } else {
                    self.emit(
                        Instruction::new(Opcode::get_in_parent)
                            .with_op1(Operand::Imm(*depth as u64))
                            .with_op2(Operand::Imm(*index as u64))
                            .with_dest(Operand::Imm(preferred as u64))
                            .with_comment(format!(
                                "fetch `{}` from {} contexts up",
                                name, depth
                            )),
                    );
                    preferred
                }
            }
            ExprKind::Assign {
                name,
                depth,
                index,
                value,
            } => {
                self.visit_assign(name, *depth, *index, value);
                0
            }
            ExprKind::Binary { op, left, right } => {
                self.visit_binary(*op, left, right, expr.ty, preferred)
            }
            ExprKind::Prefix { op, operand } => {
                let actual = self.visit_expr(operand, preferred);
                let opcode = match (op, expr.ty) {
                    (PrefixOp::Neg, TypeTag::Decimal) => Opcode::neg_decimal,
                    (PrefixOp::Neg, _) => Opcode::neg_int,
                };
                self.emit(
                    Instruction::new(opcode)
                        .with_op1(Operand::Imm(actual as u64))
                        .with_dest(Operand::Imm(preferred as u64)),
                );
                preferred
            }
            ExprKind::Call { callee, args } => self.visit_call(callee, args, preferred),
            ExprKind::Function(function) => self.visit_function(
                &function.identifier,
                function.slot_count,
                &function.arguments,
                &function.body,
                function.at,
                preferred,
            ),
        }
    }

    fn visit_assign(&mut self, name: &str, depth: u32, index: u32, value: &Expr) {
        if depth == 0 {
            let actual = self.visit_expr(value, index);
            if actual != index {
                self.emit(
                    Instruction::new(Opcode::mov)
                        .with_op1(Operand::Imm(actual as u64))
                        .with_dest(Operand::Imm(index as u64))
                        .with_comment(format!("assign `{}`", name)),
                );
            }
        } else {
            let temp = self.temps().alloc();
            let actual = self.visit_expr(value, temp);
            self.emit(
                Instruction::new(Opcode::set_in_parent)
                    .with_op1(Operand::Imm(depth as u64))
                    .with_op2(Operand::Imm(actual as u64))
                    .with_dest(Operand::Imm(index as u64))
                    .with_comment(format!("store `{}` {} contexts up", name, depth)),
            );
            self.temps().release(temp);
        }
    }

    fn visit_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        result_ty: TypeTag,
        preferred: u32,
    ) -> u32 {
        let temp1 = self.temps().alloc();
        let temp2 = self.temps().alloc();
        let actual1 = self.visit_expr(left, temp1);
        let actual2 = self.visit_expr(right, temp2);

        // the type the operands must have when the opcode executes.
        // equality compares raw arithmetic fields and never converts.
        let operand_ty = match op {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Mod => Some(result_ty),
            BinaryOp::Eq | BinaryOp::Neq => None,
            BinaryOp::Gt | BinaryOp::Gte | BinaryOp::Lt | BinaryOp::Lte => {
                if left.ty == TypeTag::Decimal || right.ty == TypeTag::Decimal {
                    Some(TypeTag::Decimal)
                } else {
                    Some(TypeTag::Int)
                }
            }
        };

        let actual1 = self.widen_operand(actual1, temp1, left.ty, operand_ty);
        let actual2 = self.widen_operand(actual2, temp2, right.ty, operand_ty);

        let opcode = binary_opcode(op, operand_ty.unwrap_or(TypeTag::Int));
        self.emit(
            Instruction::new(opcode)
                .with_op1(Operand::Imm(actual1 as u64))
                .with_op2(Operand::Imm(actual2 as u64))
                .with_dest(Operand::Imm(preferred as u64)),
        );

        self.temps().release(temp1);
        self.temps().release(temp2);
        preferred
    }

    /// Insert the implicit int-to-decimal widening. the conversion happens
    /// in the operand's scratch slot so that named variables are never
    /// clobbered.
    fn widen_operand(
        &mut self,
        actual: u32,
        temp: u32,
        from: TypeTag,
        to: Option<TypeTag>,
    ) -> u32 {
        if from != TypeTag::Int || to != Some(TypeTag::Decimal) {
            return actual;
        }
        if actual != temp {
            self.emit(
                Instruction::new(Opcode::mov)
                    .with_op1(Operand::Imm(actual as u64))
                    .with_dest(Operand::Imm(temp as u64)),
            );
        }
        self.emit(
            Instruction::new(Opcode::cast_decimal)
                .with_op1(Operand::Imm(temp as u64))
                .with_dest(Operand::Imm(temp as u64))
                .with_comment("auto cast from int to decimal"),
        );
        temp
    }

    fn visit_call(&mut self, callee: &Expr, args: &[Expr], preferred: u32) -> u32 {
        let callee_temp = self.temps().alloc();
        let callee_index = self.visit_expr(callee, callee_temp);

        // arguments are evaluated left to right but pushed right to left,
        // so that `arg_read i` finds argument i at `bp - 5 - i`
        let mut arg_slots = Vec::with_capacity(args.len());
        for arg in args {
            let temp = self.temps().alloc();
            let actual = self.visit_expr(arg, temp);
            arg_slots.push((temp, actual));
        }
        for (_, actual) in arg_slots.iter().rev() {
            self.emit(Instruction::new(Opcode::push).with_op1(Operand::Imm(*actual as u64)));
        }

        let opcode = if callee.ty == TypeTag::Native {
            Opcode::call_native
        } else {
            Opcode::call
        };
        self.emit(
            Instruction::new(opcode)
                .with_op1(Operand::Imm(callee_index as u64))
                .with_op2(Operand::Imm(args.len() as u64))
                .with_dest(Operand::Imm(preferred as u64)),
        );

        for (temp, _) in arg_slots {
            self.temps().release(temp);
        }
        self.temps().release(callee_temp);
        preferred
    }
}

fn binary_opcode(op: BinaryOp, operand_ty: TypeTag) -> Opcode {
    use BinaryOp::*;
    use TypeTag::*;

    match (op, operand_ty) {
        (Add, Int) => Opcode::add_int,
        (Add, Decimal) => Opcode::add_decimal,
        (Add, String) => Opcode::add_string,
        (Sub, Int) => Opcode::sub_int,
        (Sub, Decimal) => Opcode::sub_decimal,
        (Mul, Int) => Opcode::mul_int,
        (Mul, Decimal) => Opcode::mul_decimal,
        (Div, Int) => Opcode::div_int,
        (Div, Decimal) => Opcode::div_decimal,
        (Mod, Int) => Opcode::mod_int,
        (Mod, Decimal) => Opcode::mod_decimal,
        (Eq, _) => Opcode::cmp_eq,
        (Neq, _) => Opcode::cmp_neq,
        (Gt, Int) => Opcode::cmp_gt_int,
        (Gt, Decimal) => Opcode::cmp_gt_decimal,
        (Gte, Int) => Opcode::cmp_gte_int,
        (Gte, Decimal) => Opcode::cmp_gte_decimal,
        (Lt, Int) => Opcode::cmp_lt_int,
        (Lt, Decimal) => Opcode::cmp_lt_decimal,
        (Lte, Int) => Opcode::cmp_lte_int,
        (Lte, Decimal) => Opcode::cmp_lte_decimal,
        (op, ty) => panic!("operator `{:?}` does not work on `{:?}`", op, ty),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use zephyr_ast::{samples, BinaryOp, Expr, ProgramNode, Statement, TypeTag};
    use zephyr_isa::opcode::{descriptor_of, Opcode, OperandKind};

    use crate::BytecodeGenerator;

    fn opcodes(program: &zephyr_program::Program) -> Vec<Opcode> {
        program
            .resolved_instructions()
            .iter()
            .map(|instruction| instruction.opcode)
            .collect()
    }

    #[test]
    fn test_arithmetic_lowering() {
        let program = BytecodeGenerator::generate(&samples::int_arithmetic());
        assert_eq!(
            opcodes(&program),
            vec![
                Opcode::fn_enter_stack,
                Opcode::mov_int, // 2 -> temp
                Opcode::mov_int, // 3 -> temp
                Opcode::add_int, // -> slot of `a`
                Opcode::push,    // argument of print
                Opcode::call_native,
                Opcode::ret,
            ]
        );

        // `a` lives in slot 2, the two literal temps right behind the
        // declared slots
        let resolved = program.resolved_instructions();
        assert_eq!(resolved[1].dest, 3);
        assert_eq!(resolved[2].dest, 4);
        assert_eq!((resolved[3].op1, resolved[3].op2, resolved[3].dest), (3, 4, 2));
        assert_eq!(resolved[4].op1, 2);
    }

    #[test]
    fn test_frame_size_includes_temporaries() {
        let program = BytecodeGenerator::generate(&samples::int_arithmetic());
        let resolved = program.resolved_instructions();
        // 3 declared slots, plus 3 scratch slots alive at once
        assert_eq!(resolved[0].opcode, Opcode::fn_enter_stack);
        assert_eq!(resolved[0].op1, 6);
    }

    #[test]
    fn test_temporary_reuse() {
        // ((1 + 2) + (3 + 4)): the inner sums run one after the other and
        // must share the same pair of scratch slots
        let root = ProgramNode {
            file_name: "temps.zs".to_string(),
            context_type_name: "TempsContext".to_string(),
            slot_count: 3,
            statements: vec![Statement::variable(
                "a",
                2,
                TypeTag::Int,
                Some(Expr::binary(
                    BinaryOp::Add,
                    Expr::binary(BinaryOp::Add, Expr::int(1), Expr::int(2), TypeTag::Int),
                    Expr::binary(BinaryOp::Add, Expr::int(3), Expr::int(4), TypeTag::Int),
                    TypeTag::Int,
                )),
            )],
        };
        let program = BytecodeGenerator::generate(&root);
        let resolved = program.resolved_instructions();

        // 3 declared + 4 temps, not 3 + 6
        assert_eq!(resolved[0].op1, 7);

        // both inner sums landed in the outer scratch pair
        let adds: Vec<_> = resolved
            .iter()
            .filter(|instruction| instruction.opcode == Opcode::add_int)
            .collect();
        assert_eq!(adds.len(), 3);
        assert_eq!(adds[0].dest, 3);
        assert_eq!(adds[1].dest, 4);
        assert_eq!((adds[2].op1, adds[2].op2, adds[2].dest), (3, 4, 2));
    }

    #[test]
    fn test_widening_cast_on_variable_init() {
        let program = BytecodeGenerator::generate(&samples::decimal_widening());
        let resolved = program.resolved_instructions();

        // `var a: decimal = 1` loads the int literal into the variable's
        // slot and widens it in place
        assert_eq!(resolved[1].opcode, Opcode::mov_int);
        assert_eq!(resolved[1].dest, 2);
        assert_eq!(resolved[2].opcode, Opcode::cast_decimal);
        assert_eq!((resolved[2].op1, resolved[2].dest), (2, 2));

        // no cast on the decimal literal
        assert_eq!(resolved[3].opcode, Opcode::mov_decimal);
    }

    #[test]
    fn test_leaf_classification() {
        let program = BytecodeGenerator::generate(&samples::closure_counter());
        let enters: Vec<Opcode> = program
            .resolved_instructions()
            .iter()
            .map(|instruction| instruction.opcode)
            .filter(|opcode| {
                matches!(opcode, Opcode::fn_enter_heap | Opcode::fn_enter_stack)
            })
            .collect();

        // root hosts `mk`, `mk` hosts the counter: both heap.
        // the counter hosts nothing: stack.
        assert_eq!(
            enters,
            vec![
                Opcode::fn_enter_heap,
                Opcode::fn_enter_heap,
                Opcode::fn_enter_stack,
            ]
        );
    }

    #[test]
    fn test_descriptor_consistency() {
        let roots = [
            samples::hello(),
            samples::int_arithmetic(),
            samples::decimal_widening(),
            samples::closure_counter(),
            samples::factorial(),
            samples::loop_sum(),
            samples::conditionals(),
        ];
        for root in &roots {
            let program = BytecodeGenerator::generate(root);
            for instruction in program.instructions() {
                assert!(
                    instruction.matches_descriptor(),
                    "instruction `{}` of `{}` violates its descriptor",
                    instruction,
                    root.file_name
                );
            }
        }
    }

    #[test]
    fn test_label_closure() {
        let roots = [
            samples::closure_counter(),
            samples::factorial(),
            samples::loop_sum(),
            samples::conditionals(),
        ];
        for root in &roots {
            let program = BytecodeGenerator::generate(root);
            let resolved = program.resolved_instructions();
            let count = resolved.len() as u64;
            for instruction in &resolved {
                let descriptor = descriptor_of(instruction.opcode);
                if descriptor.op1 == OperandKind::ImmAddress {
                    assert!(instruction.op1 < count);
                }
                if descriptor.dest == OperandKind::ImmAddress {
                    assert!(instruction.dest < count);
                }
            }
        }
    }

    #[test]
    fn test_loop_shape() {
        let program = BytecodeGenerator::generate(&samples::loop_sum());
        let resolved = program.resolved_instructions();

        // the conditional exit is a comparison immediately followed by a
        // jmp_false on the very slot the comparison wrote
        let position = resolved
            .iter()
            .position(|instruction| instruction.opcode == Opcode::cmp_lte_int)
            .unwrap();
        assert_eq!(resolved[position + 1].opcode, Opcode::jmp_false);
        assert_eq!(resolved[position + 1].op1, resolved[position].dest);

        // the back edge targets the first instruction of the condition,
        // which is the literal load feeding the comparison
        let back_edge = resolved
            .iter()
            .find(|instruction| instruction.opcode == Opcode::jmp)
            .unwrap();
        assert_eq!(back_edge.dest, position as u64 - 1);
        assert_eq!(resolved[back_edge.dest as usize].opcode, Opcode::mov_int);
    }
}
