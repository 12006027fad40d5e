////////////////////////////////////////////////////////////////////////////////
// This file is part of "Classweave", a bytecode-to-bytecode transpiler       //
// back-end assembler.                                                        //
//                                                                            //
// This work is proprietary software with source-available code.              //
//                                                                            //
// To copy, use, distribute, or contribute to this work, you must agree to    //
// the terms of the General License Agreement:                                //
//                                                                            //
// https://github.com/Eliah-Lakhin/ad-astra/blob/master/EULA.md               //
//                                                                            //
// The agreement grants a Basic Commercial License, allowing you to use       //
// this work in non-commercial and limited commercial products with a total   //
// gross revenue cap. To remove this commercial limit for one of your         //
// products, you must acquire a Full Commercial License.                      //
//                                                                            //
// If you contribute to the source code, documentation, or related materials, //
// you must grant me an exclusive license to these contributions.             //
// Contributions are governed by the "Contributions" section of the General   //
// License Agreement.                                                         //
//                                                                            //
// Copying the work in parts is strictly forbidden, except as permitted       //
// under the General License Agreement.                                       //
//                                                                            //
// If you do not or cannot agree to the terms of this Agreement,              //
// do not use this work.                                                      //
//                                                                            //
// This work is provided "as is", without any warranties, express or implied, //
// except where such disclaimers are legally invalid.                         //
//                                                                            //
// Copyright (c) 2024 Ilya Lakhin (Илья Александрович Лахин).                 //
// All rights reserved.                                                       //
////////////////////////////////////////////////////////////////////////////////

//! Structured source commands.
//!
//! A [Command] is one already-decoded unit of the source program behavior:
//! an [Operation] together with the argument commands that produce the
//! operation's operands. The commands are converted into the target
//! instructions in the context of the [Block] they belong to.

use compact_str::CompactString;

use crate::{
    assemble::{AssembleError, AssembleResult, IfKind, Instruction},
    block::Block,
    config::RuntimeConfig,
    jvm::{Constant, MemberRef, Opcode},
};

/// A source command.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Command {
    pub operation: Operation,

    /// The commands that push the operands of the operation, in order.
    pub arguments: Vec<Command>,
}

impl From<Operation> for Command {
    #[inline(always)]
    fn from(operation: Operation) -> Self {
        Self {
            operation,
            arguments: Vec::new(),
        }
    }
}

impl Command {
    #[inline(always)]
    pub fn new(operation: Operation, arguments: Vec<Command>) -> Self {
        Self {
            operation,
            arguments,
        }
    }

    /// Converts this command into the target instructions.
    #[inline(always)]
    pub fn convert(&self, block: &mut Block) -> AssembleResult<Vec<Instruction>> {
        self.operation.convert(block, &self.arguments)
    }
}

/// A source operation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Operation {
    /// Does nothing.
    Pass,

    /// Pushes the constant.
    LoadConst(Const),

    /// Pushes the named value.
    LoadName(CompactString),

    /// Pops the value into the named local variable.
    StoreName(CompactString),

    /// Pops the value.
    PopTop,

    /// Returns the value.
    ReturnValue,

    /// The conditional chain.
    If(IfChain),

    /// The guarded body and its handlers.
    Try(TryChain),

    /// The ready-made target instructions.
    Raw(Vec<Instruction>),
}

impl Operation {
    /// Converts this operation into the target instructions. The `arguments`
    /// are converted first.
    pub fn convert(
        &self,
        block: &mut Block,
        arguments: &[Command],
    ) -> AssembleResult<Vec<Instruction>> {
        let mut code = Vec::new();

        for argument in arguments {
            code.append(&mut argument.convert(block)?);
        }

        match self {
            Self::Pass => (),

            Self::LoadConst(constant) => {
                code.append(&mut constant.load(block.module().config())?);
            }

            Self::LoadName(name) => code.append(&mut block.load_name(name)?),

            Self::StoreName(name) => code.append(&mut block.store_name(name)?),

            Self::PopTop => code.push(Opcode::Pop.into()),

            Self::ReturnValue => code.push(Opcode::Areturn.into()),

            Self::If(chain) => chain.convert(block, &mut code)?,

            Self::Try(chain) => chain.convert(block, &mut code)?,

            Self::Raw(instructions) => code.extend(instructions.iter().cloned()),
        }

        Ok(code)
    }
}

/// A constant of the source language.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Str(CompactString),
}

impl Const {
    fn load(&self, config: &RuntimeConfig) -> AssembleResult<Vec<Instruction>> {
        Ok(match self {
            Self::None => vec![Opcode::AconstNull.into()],

            Self::Bool(value) => {
                let name = match value {
                    true => "TRUE",
                    false => "FALSE",
                };

                let descriptor = format!("L{};", config.bool_class);

                let field = MemberRef::field(config.bool_class, name, &descriptor)?;

                vec![Opcode::GetStatic(field).into()]
            }

            Self::Int(value) => vec![
                Opcode::Ldc(Constant::Long(*value)).into(),
                Opcode::InvokeStatic(MemberRef::method(
                    config.int_class,
                    config.int_factory,
                    config.int_factory_descriptor,
                )?)
                .into(),
            ],

            Self::Str(value) => vec![
                Opcode::New(CompactString::from(config.str_class)).into(),
                Opcode::Dup.into(),
                Opcode::Ldc(Constant::String(value.clone())).into(),
                Opcode::InvokeSpecial(MemberRef::method(
                    config.str_class,
                    "<init>",
                    config.str_constructor_descriptor,
                )?)
                .into(),
            ],
        })
    }
}

/// An `if`, its `elif`s, and an optional `else`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IfChain {
    /// The `if` clause followed by the `elif` clauses.
    pub branches: Vec<Clause>,

    pub orelse: Option<Vec<Command>>,
}

/// A conditional clause. The body runs if the condition value is truthy.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Clause {
    pub condition: Vec<Command>,
    pub body: Vec<Command>,
}

impl IfChain {
    fn convert(&self, block: &mut Block, code: &mut Vec<Instruction>) -> AssembleResult<()> {
        if self.branches.is_empty() {
            return Err(AssembleError::MalformedStructure {
                reason: "conditional chain without branches",
            });
        }

        let config = *block.module().config();

        let truth = MemberRef::method(
            config.object_class,
            config.truth_method,
            config.truth_descriptor,
        )?;

        for (index, clause) in self.branches.iter().enumerate() {
            let mut condition = Vec::new();

            for command in &clause.condition {
                condition.append(&mut command.convert(block)?);
            }

            condition.push(Opcode::InvokeInterface(truth.clone()).into());

            match index {
                0 => code.push(Instruction::If(condition, IfKind::Ifeq)),
                _ => code.push(Instruction::ElseIf(condition, IfKind::Ifeq)),
            }

            for command in &clause.body {
                code.append(&mut command.convert(block)?);
            }
        }

        if let Some(orelse) = &self.orelse {
            code.push(Instruction::Else);

            for command in orelse {
                code.append(&mut command.convert(block)?);
            }
        }

        code.push(Instruction::EndIf);

        Ok(())
    }
}

/// A guarded body with its exception handlers.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TryChain {
    pub body: Vec<Command>,
    pub handlers: Vec<ExceptHandler>,
}

/// An exception handler.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ExceptHandler {
    /// The internal name of the caught exception class, or None to catch
    /// everything.
    pub exception: Option<CompactString>,

    /// The local variable that receives the caught exception. If None, the
    /// exception is dropped.
    pub name: Option<CompactString>,

    pub body: Vec<Command>,
}

impl TryChain {
    fn convert(&self, block: &mut Block, code: &mut Vec<Instruction>) -> AssembleResult<()> {
        if self.handlers.is_empty() {
            return Err(AssembleError::MalformedStructure {
                reason: "guarded range without handlers",
            });
        }

        code.push(Instruction::Try);

        for command in &self.body {
            code.append(&mut command.convert(block)?);
        }

        for handler in &self.handlers {
            code.push(Instruction::Catch(handler.exception.clone()));

            match &handler.name {
                Some(name) => code.append(&mut block.store_name(name)?),
                None => code.push(Opcode::Pop.into()),
            }

            for command in &handler.body {
                code.append(&mut command.convert(block)?);
            }
        }

        code.push(Instruction::EndTry);

        Ok(())
    }
}
