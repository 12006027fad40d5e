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

use std::fmt::{Arguments, Debug, Formatter};

use compact_str::CompactString;

use crate::{
    assemble::AssembleResult,
    jvm::{ConstantPool, Opcode},
};

/// The assembled code object of a block.
///
/// The object is produced once per block and is ready to be written into a
/// method body of the target class format.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Code {
    /// The upper bound of the operand stack depth.
    pub max_stack: u16,

    /// The number of local variable slots.
    pub max_locals: u16,

    /// The instructions in their final order, with assigned byte offsets and
    /// patched jump distances.
    pub instructions: Vec<Placed>,

    /// The exception table in the order of the guarded ranges' creation.
    pub exceptions: Vec<ExceptionInfo>,
}

/// An instruction with its byte offset in the code body.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Placed {
    pub offset: u16,
    pub opcode: Opcode,
}

/// An entry of the exception table.
///
/// The guarded range covers the bytes from `start_offset` (inclusive) to
/// `end_offset` (exclusive).
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExceptionInfo {
    pub start_offset: u16,
    pub end_offset: u16,
    pub handler_offset: u16,

    /// The internal name of the caught exception class, or None for
    /// catch-all handlers.
    pub exception_type: Option<CompactString>,
}

impl Debug for Code {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("Code {\n")?;

        let mut indent = 1;

        println(formatter, indent, format_args!("max_stack: {}", self.max_stack))?;
        println(formatter, indent, format_args!("max_locals: {}", self.max_locals))?;

        if !self.instructions.is_empty() {
            println(formatter, indent, format_args!("instructions:"))?;

            indent += 1;

            for Placed { offset, opcode } in &self.instructions {
                println(formatter, indent, format_args!("{offset}: {opcode}"))?;
            }

            indent -= 1;
        }

        if !self.exceptions.is_empty() {
            println(formatter, indent, format_args!("exceptions:"))?;

            indent += 1;

            for entry in &self.exceptions {
                let start = entry.start_offset;
                let end = entry.end_offset;
                let handler = entry.handler_offset;

                match &entry.exception_type {
                    Some(class) => println(
                        formatter,
                        indent,
                        format_args!("{start}..{end} -> {handler} {class}"),
                    )?,

                    None => println(
                        formatter,
                        indent,
                        format_args!("{start}..{end} -> {handler} any"),
                    )?,
                }
            }
        }

        formatter.write_str("}")
    }
}

impl Code {
    /// The length of the code body in bytes.
    #[inline(always)]
    pub fn code_len(&self) -> usize {
        match self.instructions.last() {
            Some(Placed { offset, opcode }) => *offset as usize + opcode.byte_len(),
            None => 0,
        }
    }

    /// Returns the position of the instruction that starts at `offset`.
    pub fn position(&self, offset: u16) -> Option<usize> {
        self.instructions
            .binary_search_by_key(&offset, |placed| placed.offset)
            .ok()
    }

    /// Serializes the code body, interning the symbolic operands in the
    /// shared `pool`.
    pub fn encode(&self, pool: &ConstantPool) -> AssembleResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.code_len());

        for Placed { opcode, .. } in &self.instructions {
            opcode.encode(pool, &mut out)?;
        }

        Ok(out)
    }
}

#[inline(always)]
fn println(formatter: &mut Formatter<'_>, indent: usize, fmt: Arguments) -> std::fmt::Result {
    formatter.write_str(&"    ".repeat(indent))?;
    formatter.write_fmt(fmt)?;
    formatter.write_str("\n")?;

    Ok(())
}
