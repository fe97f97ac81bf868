// Copyright (c) 2025 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE, LICENSE.additional and CONTRIBUTING.

// canned front-end outputs, annotated by hand the way the type extractor
// would annotate them. they are used by the generator and execution-engine
// tests across the workspace.
//
// the root activation layout shared by all samples:
//
// | slot 0 | parent link (null for the root)       |
// | slot 1 | native index of `print`               |
// | slot 2 | first global                          |
// | ...    |                                       |

use crate::{
    BinaryOp, Expr, FunctionLit, PrefixOp, ProgramNode, Statement, StatementKind, TypeTag,
};

fn print_ident() -> Expr {
    Expr::ident("print", 0, 1, TypeTag::Native)
}

fn print_call(arg: Expr) -> Statement {
    Statement::expression(Expr::call(print_ident(), vec![arg], TypeTag::Int))
}

/// `print("hello")`
pub fn hello() -> ProgramNode {
    ProgramNode {
        file_name: "hello.zs".to_string(),
        context_type_name: "HelloContext".to_string(),
        slot_count: 2,
        statements: vec![print_call(Expr::string("hello"))],
    }
}

/// `var a: int = 2 + 3; print(a)`
pub fn int_arithmetic() -> ProgramNode {
    ProgramNode {
        file_name: "arithmetic.zs".to_string(),
        context_type_name: "ArithmeticContext".to_string(),
        slot_count: 3,
        statements: vec![
            Statement::variable(
                "a",
                2,
                TypeTag::Int,
                Some(Expr::binary(
                    BinaryOp::Add,
                    Expr::int(2),
                    Expr::int(3),
                    TypeTag::Int,
                )),
            ),
            print_call(Expr::ident("a", 0, 2, TypeTag::Int)),
        ],
    }
}

/// `var a: decimal = 1; var b: decimal = 2.5; print(a + b)`
///
/// the initializer of `a` is an int literal, the generator has to widen it.
pub fn decimal_widening() -> ProgramNode {
    ProgramNode {
        file_name: "widening.zs".to_string(),
        context_type_name: "WideningContext".to_string(),
        slot_count: 4,
        statements: vec![
            Statement::variable("a", 2, TypeTag::Decimal, Some(Expr::int(1))),
            Statement::variable("b", 3, TypeTag::Decimal, Some(Expr::decimal(2.5))),
            print_call(Expr::binary(
                BinaryOp::Add,
                Expr::ident("a", 0, 2, TypeTag::Decimal),
                Expr::ident("b", 0, 3, TypeTag::Decimal),
                TypeTag::Decimal,
            )),
        ],
    }
}

/// ```text
/// var mk = fun(): fun(): int {
///     var c: int = 0
///     return fun(): int { c = c + 1; return c }
/// }
/// var f = mk()
/// print(f())
/// print(f())
/// ```
///
/// the inner function captures `c` from the enclosing activation, which
/// forces `mk` onto the heap; the counter survives between the two calls.
pub fn closure_counter() -> ProgramNode {
    let counter_fn = FunctionLit {
        identifier: String::new(),
        context_type_name: "CounterContext".to_string(),
        slot_count: 1,
        arguments: vec![],
        body: vec![
            Statement::expression(Expr::assign(
                "c",
                1,
                1,
                Expr::binary(
                    BinaryOp::Add,
                    Expr::ident("c", 1, 1, TypeTag::Int),
                    Expr::int(1),
                    TypeTag::Int,
                ),
            )),
            Statement::ret(Some(Expr::ident("c", 1, 1, TypeTag::Int))),
        ],
        at: crate::SourcePos::new(3, 16),
    };

    let mk_fn = FunctionLit {
        identifier: String::new(),
        context_type_name: "MkContext".to_string(),
        slot_count: 2,
        arguments: vec![],
        body: vec![
            Statement::variable("c", 1, TypeTag::Int, Some(Expr::int(0))),
            Statement::ret(Some(Expr::function(counter_fn))),
        ],
        at: crate::SourcePos::new(2, 13),
    };

    ProgramNode {
        file_name: "closure.zs".to_string(),
        context_type_name: "ClosureContext".to_string(),
        slot_count: 4,
        statements: vec![
            Statement::variable("mk", 2, TypeTag::Function, Some(Expr::function(mk_fn))),
            Statement::variable(
                "f",
                3,
                TypeTag::Function,
                Some(Expr::call(
                    Expr::ident("mk", 0, 2, TypeTag::Function),
                    vec![],
                    TypeTag::Function,
                )),
            ),
            print_call(Expr::call(
                Expr::ident("f", 0, 3, TypeTag::Function),
                vec![],
                TypeTag::Int,
            )),
            print_call(Expr::call(
                Expr::ident("f", 0, 3, TypeTag::Function),
                vec![],
                TypeTag::Int,
            )),
        ],
    }
}

/// ```text
/// var fact = fun(n: int): int {
///     if (n < 2) { return 1 }
///     return n * fact(n - 1)
/// }
/// print(fact(5))
/// ```
pub fn factorial() -> ProgramNode {
    let n = || Expr::ident("n", 0, 1, TypeTag::Int);
    // `fact` itself is captured from the enclosing (root) activation
    let fact_ref = || Expr::ident("fact", 1, 2, TypeTag::Function);

    let fact_fn = FunctionLit {
        identifier: "fact".to_string(),
        context_type_name: "FactContext".to_string(),
        slot_count: 2,
        arguments: vec![crate::Argument {
            name: "n".to_string(),
            index: 1,
            ty: TypeTag::Int,
        }],
        body: vec![
            Statement::new(StatementKind::If {
                condition: Expr::binary(BinaryOp::Lt, n(), Expr::int(2), TypeTag::Boolean),
                then_body: vec![Statement::ret(Some(Expr::int(1)))],
                else_body: None,
            })
            .at(2, 4),
            Statement::ret(Some(Expr::binary(
                BinaryOp::Mul,
                n(),
                Expr::call(
                    fact_ref(),
                    vec![Expr::binary(
                        BinaryOp::Sub,
                        n(),
                        Expr::int(1),
                        TypeTag::Int,
                    )],
                    TypeTag::Int,
                ),
                TypeTag::Int,
            ))),
        ],
        at: crate::SourcePos::new(1, 15),
    };

    ProgramNode {
        file_name: "factorial.zs".to_string(),
        context_type_name: "FactorialContext".to_string(),
        slot_count: 3,
        statements: vec![
            Statement::variable("fact", 2, TypeTag::Function, Some(Expr::function(fact_fn))),
            print_call(Expr::call(
                Expr::ident("fact", 0, 2, TypeTag::Function),
                vec![Expr::int(5)],
                TypeTag::Int,
            )),
        ],
    }
}

/// ```text
/// var sum = 0
/// for (var i = 1; i <= 10; i = i + 1) { sum = sum + i }
/// print(sum)
/// ```
pub fn loop_sum() -> ProgramNode {
    let sum = || Expr::ident("sum", 0, 2, TypeTag::Int);
    let i = || Expr::ident("i", 0, 3, TypeTag::Int);

    ProgramNode {
        file_name: "loop.zs".to_string(),
        context_type_name: "LoopContext".to_string(),
        slot_count: 4,
        statements: vec![
            Statement::variable("sum", 2, TypeTag::Int, Some(Expr::int(0))),
            Statement::new(StatementKind::Loop {
                init: Some(Box::new(Statement::variable(
                    "i",
                    3,
                    TypeTag::Int,
                    Some(Expr::int(1)),
                ))),
                condition: Some(Expr::binary(
                    BinaryOp::Lte,
                    i(),
                    Expr::int(10),
                    TypeTag::Boolean,
                )),
                update: Some(Expr::assign(
                    "i",
                    0,
                    3,
                    Expr::binary(BinaryOp::Add, i(), Expr::int(1), TypeTag::Int),
                )),
                body: vec![Statement::expression(Expr::assign(
                    "sum",
                    0,
                    2,
                    Expr::binary(BinaryOp::Add, sum(), i(), TypeTag::Int),
                ))],
            })
            .at(2, 0),
            print_call(sum()),
        ],
    }
}

/// ```text
/// var flag: boolean = true
/// var u: int
/// if (flag) { print(-5) } else { print(99) }
/// if (1 > 2) { print(1) } else { print(2) }
/// print(17 % 5)
/// print(17 / 5)
/// ```
pub fn conditionals() -> ProgramNode {
    ProgramNode {
        file_name: "conditionals.zs".to_string(),
        context_type_name: "ConditionalsContext".to_string(),
        slot_count: 4,
        statements: vec![
            Statement::variable("flag", 2, TypeTag::Boolean, Some(Expr::boolean(true))),
            Statement::variable("u", 3, TypeTag::Int, None),
            Statement::new(StatementKind::If {
                condition: Expr::ident("flag", 0, 2, TypeTag::Boolean),
                then_body: vec![print_call(Expr::prefix(
                    PrefixOp::Neg,
                    Expr::int(5),
                    TypeTag::Int,
                ))],
                else_body: Some(vec![print_call(Expr::int(99))]),
            })
            .at(3, 0),
            Statement::new(StatementKind::If {
                condition: Expr::binary(BinaryOp::Gt, Expr::int(1), Expr::int(2), TypeTag::Boolean),
                then_body: vec![print_call(Expr::int(1))],
                else_body: Some(vec![print_call(Expr::int(2))]),
            })
            .at(4, 0),
            print_call(Expr::binary(
                BinaryOp::Mod,
                Expr::int(17),
                Expr::int(5),
                TypeTag::Int,
            )),
            print_call(Expr::binary(
                BinaryOp::Div,
                Expr::int(17),
                Expr::int(5),
                TypeTag::Int,
            )),
        ],
    }
}
