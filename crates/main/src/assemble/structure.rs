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

use compact_str::CompactString;

use crate::{
    assemble::{
        parts::Open,
        Anchor,
        AssembleError,
        AssembleResult,
        Branch,
        CodeParts,
        Handler,
        IfBlockIndex,
        TryCatchIndex,
        UNRESOLVED,
    },
    jvm::{Jump, Opcode},
};

/// The kind of the conditional jump that skips a branch body.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum IfKind {
    /// Skips the body if the tested int is zero.
    Ifeq,
    /// Skips the body if the tested int is not zero.
    Ifne,
    /// Skips the body if the tested reference is null.
    Ifnull,
    /// Skips the body if the tested reference is not null.
    Ifnonnull,
}

impl IfKind {
    #[inline(always)]
    fn opcode(self) -> Opcode {
        let jump = Jump::default();

        match self {
            Self::Ifeq => Opcode::Ifeq(jump),
            Self::Ifne => Opcode::Ifne(jump),
            Self::Ifnull => Opcode::Ifnull(jump),
            Self::Ifnonnull => Opcode::Ifnonnull(jump),
        }
    }
}

/// An item of the instruction stream produced by the command conversion.
///
/// Most items are plain target instructions. The rest are structural markers
/// that register control structures in the builder and emit the jumps these
/// structures need.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Instruction {
    Op(Opcode),

    /// Opens a guarded range. The next appended instruction is the first
    /// guarded one.
    Try,

    /// Closes the guarded range (or the previous handler) and opens a handler
    /// of the specified exception class. None catches everything.
    Catch(Option<CompactString>),

    /// Closes the last handler. The next appended instruction is the join
    /// point of the whole structure.
    EndTry,

    /// Emits the condition instructions followed by the conditional jump that
    /// skips the branch body, and opens a conditional chain.
    If(Vec<Instruction>, IfKind),

    /// Closes the current branch and opens the next conditional branch.
    ElseIf(Vec<Instruction>, IfKind),

    /// Closes the current branch and opens the final unconditional branch.
    Else,

    /// Closes the conditional chain. The next appended instruction is the join
    /// point.
    EndIf,
}

impl From<Opcode> for Instruction {
    #[inline(always)]
    fn from(opcode: Opcode) -> Self {
        Self::Op(opcode)
    }
}

impl Instruction {
    /// Appends this instruction to the builder.
    pub fn process(self, parts: &mut CodeParts) -> AssembleResult<()> {
        match self {
            Self::Op(opcode) => {
                let _ = parts.add_opcode(opcode);
            }

            Self::Try => {
                let index = parts.push_try();

                parts.open.push(Open::Try(index));
                parts.resolve_next(Anchor::TryStart(index));
            }

            Self::Catch(descriptor) => {
                let index = current_try(parts)?;

                // The first jump ends the guarded range even if the guarded
                // body never falls through.
                if parts.try_catches[index].handlers.is_empty() {
                    let jump_op = parts.add_opcode(Opcode::Goto(Jump::default()));

                    parts.try_catches[index].jump_op = jump_op;
                } else if parts.falls_through() {
                    let jump_op = parts.add_opcode(Opcode::Goto(Jump::default()));

                    if let Some(handler) = parts.try_catches[index].handlers.last_mut() {
                        handler.jump_op = Some(jump_op);
                    }
                }

                let handler = parts.try_catches[index].handlers.len();

                parts.try_catches[index].handlers.push(Handler {
                    start_op: UNRESOLVED,
                    descriptor,
                    jump_op: None,
                });

                parts.resolve_next(Anchor::HandlerStart(index, handler));
            }

            Self::EndTry => {
                let index = current_try(parts)?;

                if parts.try_catches[index].handlers.is_empty() {
                    return Err(AssembleError::MalformedStructure {
                        reason: "guarded range without handlers",
                    });
                }

                let _ = parts.open.pop();

                parts.resolve_next(Anchor::TryEnd(index));
            }

            Self::If(condition, kind) => {
                for instruction in condition {
                    instruction.process(parts)?;
                }

                let if_op = parts.add_opcode(kind.opcode());
                let index = parts.push_if(if_op);

                parts.open.push(Open::If(index));
            }

            Self::ElseIf(condition, kind) => {
                let index = open_branch(parts)?;

                close_branch(parts, index);

                for instruction in condition {
                    instruction.process(parts)?;
                }

                if current_if(parts)? != index {
                    return Err(AssembleError::MalformedStructure {
                        reason: "unbalanced structure inside a branch condition",
                    });
                }

                let if_op = parts.add_opcode(kind.opcode());

                parts.if_blocks[index].branches.push(Branch {
                    if_op,
                    jump_op: None,
                    next_op: UNRESOLVED,
                });
            }

            Self::Else => {
                let index = open_branch(parts)?;

                close_branch(parts, index);

                parts.if_blocks[index].has_else = true;
            }

            Self::EndIf => {
                let index = current_if(parts)?;

                let _ = parts.open.pop();

                let record = &parts.if_blocks[index];

                let last = record.branches.len() - 1;
                let has_else = record.has_else;

                let has_jumps = record
                    .branches
                    .iter()
                    .any(|branch| branch.jump_op.is_some());

                if !has_else {
                    parts.resolve_next(Anchor::BranchNext(index, last));
                }

                // Without skip jumps and with an else branch nothing lands on
                // the join point.
                if has_jumps || !has_else {
                    parts.resolve_next(Anchor::IfEnd(index));
                }
            }
        }

        Ok(())
    }
}

fn current_try(parts: &CodeParts) -> AssembleResult<TryCatchIndex> {
    match parts.open.last() {
        Some(Open::Try(index)) => Ok(*index),

        _ => Err(AssembleError::MalformedStructure {
            reason: "handler outside of a guarded range",
        }),
    }
}

fn current_if(parts: &CodeParts) -> AssembleResult<IfBlockIndex> {
    match parts.open.last() {
        Some(Open::If(index)) => Ok(*index),

        _ => Err(AssembleError::MalformedStructure {
            reason: "branch outside of a conditional chain",
        }),
    }
}

fn open_branch(parts: &CodeParts) -> AssembleResult<IfBlockIndex> {
    let index = current_if(parts)?;

    if parts.if_blocks[index].has_else {
        return Err(AssembleError::MalformedStructure {
            reason: "branch after the final else",
        });
    }

    Ok(index)
}

// Ends the body of the last branch with a jump to the join point (unless the
// body never falls through), and directs the branch's conditional jump to the
// next appended instruction.
fn close_branch(parts: &mut CodeParts, index: IfBlockIndex) {
    let jump_op = match parts.falls_through() {
        true => Some(parts.add_opcode(Opcode::Goto(Jump::default()))),
        false => None,
    };

    let record = &mut parts.if_blocks[index];

    let last = record.branches.len() - 1;

    record.branches[last].jump_op = jump_op;

    parts.resolve_next(Anchor::BranchNext(index, last));
}
