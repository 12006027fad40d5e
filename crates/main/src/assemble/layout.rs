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

use log::{debug, warn};

use crate::{
    assemble::{
        parts::Slot,
        AssembleError,
        AssembleResult,
        Code,
        CodeParts,
        ExceptionInfo,
        OpRef,
        Placed,
    },
    report::{system_panic, ASSEMBLER_LOG},
};

impl CodeParts {
    /// Finishes the assembly.
    ///
    /// Assigns the byte offsets to all instructions, builds the exception
    /// table, and patches every jump with its relative distance. The code
    /// sequence must be final: every structure closed and every forward
    /// reference resolved.
    pub fn assemble(mut self, max_locals: usize) -> AssembleResult<Code> {
        if !self.open.is_empty() {
            return Err(AssembleError::MalformedStructure {
                reason: "unterminated control structure",
            });
        }

        self.ensure_resolved();

        let depth = self.stack_depth();

        let Ok(max_stack) = cast::u16(depth) else {
            return Err(AssembleError::StackOverflow { depth });
        };

        let Ok(max_locals) = cast::u16(max_locals) else {
            return Err(AssembleError::LocalsOverflow { count: max_locals });
        };

        let length = self.layout()?;
        let exceptions = self.patch()?;

        debug!(
            target: ASSEMBLER_LOG,
            "assembled {} instructions ({length} bytes), {} exception entries, \
            max stack {max_stack}, max locals {max_locals}",
            self.code.len(),
            exceptions.len(),
        );

        let mut instructions = Vec::with_capacity(self.code.len());

        for op in &self.code {
            let slot = &self.arena[*op];

            instructions.push(Placed {
                offset: coordinate(slot)?,
                opcode: slot.opcode.clone(),
            });
        }

        Ok(Code {
            max_stack,
            max_locals,
            instructions,
            exceptions,
        })
    }

    fn layout(&mut self) -> AssembleResult<usize> {
        let mut offset = 0;

        for (index, op) in self.code.iter().enumerate() {
            let slot = &mut self.arena[*op];

            slot.code_index = index;
            slot.code_offset = offset;

            offset += slot.opcode.byte_len();
        }

        if let Some(op) = self.code.last() {
            let slot = &self.arena[*op];

            if cast::u16(offset).is_err() {
                return Err(AssembleError::OffsetOverflow {
                    instruction: slot.code_index,
                    mnemonic: slot.opcode.mnemonic(),
                    value: offset as isize,
                });
            }
        }

        Ok(offset)
    }

    fn patch(&mut self) -> AssembleResult<Vec<ExceptionInfo>> {
        let mut exceptions = Vec::new();
        let mut jumps = Vec::<(OpRef, OpRef)>::new();

        for record in &self.try_catches {
            let start = self.target(record.start_op);
            let end = self.target(record.jump_op);

            match start.code_offset < end.code_offset {
                true => {
                    for handler in &record.handlers {
                        exceptions.push(ExceptionInfo {
                            start_offset: coordinate(start)?,
                            end_offset: coordinate(end)?,
                            handler_offset: coordinate(self.target(handler.start_op))?,
                            exception_type: handler.descriptor.clone(),
                        });
                    }
                }

                false => {
                    warn!(
                        target: ASSEMBLER_LOG,
                        "empty guarded range at offset {}",
                        start.code_offset,
                    );
                }
            }

            jumps.push((record.jump_op, record.end_op));

            for handler in &record.handlers {
                if let Some(jump_op) = handler.jump_op {
                    jumps.push((jump_op, record.end_op));
                }
            }
        }

        for record in &self.if_blocks {
            for branch in &record.branches {
                jumps.push((branch.if_op, branch.next_op));

                if let Some(jump_op) = branch.jump_op {
                    jumps.push((jump_op, record.end_op));
                }
            }
        }

        for (from, to) in jumps {
            self.set_jump(from, to)?;
        }

        Ok(exceptions)
    }

    fn set_jump(&mut self, from: OpRef, to: OpRef) -> AssembleResult<()> {
        let target = self.target(to).code_offset as isize;
        let source = self.target(from);

        let distance = target - source.code_offset as isize;

        if cast::i16(distance).is_err() {
            return Err(AssembleError::OffsetOverflow {
                instruction: source.code_index,
                mnemonic: source.opcode.mnemonic(),
                value: distance,
            });
        }

        let Some(jump) = self.arena[from].opcode.jump_mut() else {
            system_panic!("Instruction #{from} is not a jump.");
        };

        jump.offset = distance;

        Ok(())
    }
}

#[inline(always)]
fn coordinate(slot: &Slot) -> AssembleResult<u16> {
    match cast::u16(slot.code_offset) {
        Ok(offset) => Ok(offset),

        Err(_) => Err(AssembleError::OffsetOverflow {
            instruction: slot.code_index,
            mnemonic: slot.opcode.mnemonic(),
            value: slot.code_offset as isize,
        }),
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        assemble::{Anchor, AssembleError, CodeParts, ExceptionInfo, IfKind, Instruction},
        jvm::{Constant, Jump, Opcode},
    };

    fn parts(instructions: Vec<Instruction>) -> CodeParts {
        let mut parts = CodeParts::new();

        for instruction in instructions {
            instruction.process(&mut parts).unwrap();
        }

        parts
    }

    #[test]
    fn test_guarded_range_ends_at_skip_jump() {
        let code = parts(vec![
            Instruction::Try,
            Opcode::AconstNull.into(),
            Opcode::Pop.into(),
            Instruction::Catch(Some("java/lang/Exception".into())),
            Opcode::Pop.into(),
            Instruction::EndTry,
            Opcode::Return.into(),
        ])
        .assemble(0)
        .unwrap();

        assert_eq!(
            code.exceptions,
            vec![ExceptionInfo {
                start_offset: 0,
                end_offset: 2,
                handler_offset: 5,
                exception_type: Some("java/lang/Exception".into()),
            }],
        );

        assert_eq!(code.instructions[2].offset, 2);
        assert_eq!(code.instructions[2].opcode, Opcode::Goto(Jump { offset: 4 }));
        assert_eq!(code.instructions[4].opcode, Opcode::Return);
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.code_len(), 7);
    }

    #[test]
    fn test_multiple_handlers() {
        let code = parts(vec![
            Instruction::Try,
            Opcode::AconstNull.into(),
            Opcode::Pop.into(),
            Instruction::Catch(Some("java/lang/ArithmeticException".into())),
            Opcode::Pop.into(),
            Instruction::Catch(None),
            Opcode::Pop.into(),
            Instruction::EndTry,
            Opcode::Return.into(),
        ])
        .assemble(0)
        .unwrap();

        let offsets = code
            .instructions
            .iter()
            .map(|placed| placed.offset)
            .collect::<Vec<_>>();

        assert_eq!(offsets, vec![0, 1, 2, 5, 6, 9, 10]);

        assert_eq!(code.exceptions.len(), 2);
        assert_eq!(code.exceptions[0].handler_offset, 5);
        assert_eq!(code.exceptions[1].handler_offset, 9);
        assert_eq!(code.exceptions[1].exception_type, None);

        for entry in &code.exceptions {
            assert_eq!(entry.start_offset, 0);
            assert_eq!(entry.end_offset, 2);
        }

        assert_eq!(code.instructions[2].opcode, Opcode::Goto(Jump { offset: 8 }));
        assert_eq!(code.instructions[4].opcode, Opcode::Goto(Jump { offset: 4 }));
    }

    #[test]
    fn test_empty_guarded_range() {
        let code = parts(vec![
            Instruction::Try,
            Instruction::Catch(None),
            Opcode::Pop.into(),
            Instruction::EndTry,
            Opcode::Return.into(),
        ])
        .assemble(0)
        .unwrap();

        assert!(code.exceptions.is_empty());
        assert_eq!(code.instructions[0].opcode, Opcode::Goto(Jump { offset: 4 }));
    }

    #[test]
    fn test_conditional_chain_join_point() {
        let parts = parts(vec![
            Instruction::If(vec![Opcode::Iconst(1).into()], IfKind::Ifeq),
            Opcode::AconstNull.into(),
            Opcode::Pop.into(),
            Instruction::ElseIf(vec![Opcode::Iconst(0).into()], IfKind::Ifne),
            Opcode::AconstNull.into(),
            Opcode::Pop.into(),
            Instruction::Else,
            Opcode::AconstNull.into(),
            Opcode::Pop.into(),
            Instruction::EndIf,
            Opcode::Return.into(),
        ]);

        let record = parts.if_blocks()[0].clone();

        assert_eq!(record.elifs().len(), 1);
        assert!(record.has_else);

        let code = parts.assemble(0).unwrap();

        let offset_of = |op: usize| code.instructions[op].offset as isize;

        let jump_of = |op: usize| match code.instructions[op].opcode.jump() {
            Some(jump) => jump.offset,
            None => panic!("not a jump"),
        };

        // if: skips to the elif test, then jumps to the join point.
        assert_eq!(offset_of(1) + jump_of(1), offset_of(5));
        assert_eq!(offset_of(4) + jump_of(4), offset_of(12));

        // elif: skips to the else body, then jumps to the join point.
        assert_eq!(offset_of(6) + jump_of(6), offset_of(10));
        assert_eq!(offset_of(9) + jump_of(9), offset_of(12));

        assert_eq!(code.instructions.len(), 13);
        assert_eq!(code.instructions[12].opcode, Opcode::Return);
        assert_eq!(code.instructions[12].offset, 20);
        assert!(code.exceptions.is_empty());
    }

    #[test]
    fn test_conditional_without_else() {
        let code = parts(vec![
            Instruction::If(vec![Opcode::AconstNull.into()], IfKind::Ifnonnull),
            Opcode::AconstNull.into(),
            Opcode::Pop.into(),
            Instruction::EndIf,
            Opcode::Return.into(),
        ])
        .assemble(0)
        .unwrap();

        assert_eq!(code.instructions.len(), 5);
        assert_eq!(code.instructions[1].opcode, Opcode::Ifnonnull(Jump { offset: 5 }));
        assert_eq!(code.instructions[4].offset, 6);
    }

    #[test]
    fn test_jump_distance_overflow() {
        let mut instructions = vec![Instruction::If(
            vec![Opcode::Iconst(1).into()],
            IfKind::Ifeq,
        )];

        for _ in 0..11_000 {
            instructions.push(Opcode::Ldc(Constant::String("x".into())).into());
        }

        instructions.push(Instruction::EndIf);
        instructions.push(Opcode::Return.into());

        let error = parts(instructions).assemble(0).unwrap_err();

        assert_eq!(
            error,
            AssembleError::OffsetOverflow {
                instruction: 1,
                mnemonic: "ifeq",
                value: 33_003,
            },
        );
    }

    #[test]
    fn test_malformed_structures() {
        let mut parts = CodeParts::new();

        assert!(Instruction::Catch(None).process(&mut parts).is_err());
        assert!(Instruction::EndIf.process(&mut parts).is_err());

        Instruction::Try.process(&mut parts).unwrap();

        assert!(Instruction::EndTry.process(&mut parts).is_err());

        let mut parts = CodeParts::new();

        Instruction::If(Vec::new(), IfKind::Ifeq)
            .process(&mut parts)
            .unwrap();

        Instruction::Else.process(&mut parts).unwrap();

        assert!(Instruction::Else.process(&mut parts).is_err());

        assert_eq!(
            parts.assemble(0).unwrap_err(),
            AssembleError::MalformedStructure {
                reason: "unterminated control structure",
            },
        );
    }

    #[test]
    #[should_panic]
    fn test_unresolved_reference_is_fatal() {
        let mut parts = CodeParts::new();

        let _ = parts.add_opcode(Opcode::Return);

        let index = parts.push_try();

        parts.resolve_next(Anchor::TryStart(index));

        let _ = parts.assemble(0);
    }

    #[test]
    fn test_code_length_limit() {
        let ldc = || Opcode::Ldc(Constant::String("x".into()));

        let mut fits = CodeParts::new();

        let _ = fits.add_opcodes((0..21_844).map(|_| ldc()));
        let _ = fits.add_opcodes([Opcode::Pop, Opcode::Pop, Opcode::Return]);

        let code = fits.assemble(0).unwrap();

        assert_eq!(code.code_len(), 65_535);
        assert_eq!(code.instructions.last().map(|placed| placed.offset), Some(65_534));

        let mut exceeds = CodeParts::new();

        let _ = exceeds.add_opcodes((0..21_845).map(|_| ldc()));
        let _ = exceeds.add_opcode(Opcode::Return);

        assert_eq!(
            exceeds.assemble(0).unwrap_err(),
            AssembleError::OffsetOverflow {
                instruction: 21_845,
                mnemonic: "return",
                value: 65_536,
            },
        );
    }

    #[test]
    fn test_stack_depth_limit() {
        let mut fits = CodeParts::new();

        let _ = fits.add_opcodes((0..65_535).map(|_| Opcode::AconstNull));

        assert_eq!(fits.assemble(0).unwrap().max_stack, 65_535);

        let mut exceeds = CodeParts::new();

        let _ = exceeds.add_opcodes((0..65_536).map(|_| Opcode::AconstNull));

        assert_eq!(
            exceeds.assemble(0).unwrap_err(),
            AssembleError::StackOverflow { depth: 65_536 },
        );
    }

    #[test]
    fn test_locals_limit() {
        let body = || {
            let mut parts = CodeParts::new();

            let _ = parts.add_opcode(Opcode::Return);

            parts
        };

        assert_eq!(body().assemble(65_535).unwrap().max_locals, 65_535);

        assert_eq!(
            body().assemble(65_536).unwrap_err(),
            AssembleError::LocalsOverflow { count: 65_536 },
        );
    }
}
