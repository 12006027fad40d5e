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

use std::{
    error::Error,
    fmt::{Display, Formatter},
};

use compact_str::CompactString;

/// An alias type for assembler results.
pub type AssembleResult<T> = Result<T, AssembleError>;

/// An error that prevents a block from being assembled into a code object.
///
/// These errors are fatal for the block being assembled: the assembler never
/// returns a partially patched code object. Internal consistency failures of
/// the assembler itself are not represented here; they abort the process
/// with a panic.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum AssembleError {
    /// A jump distance, an instruction byte offset, or the total code length
    /// does not fit into the corresponding field of the target binary format.
    OffsetOverflow {
        /// The position of the offending instruction in the laid-out code.
        instruction: usize,

        /// The mnemonic of the offending instruction.
        mnemonic: &'static str,

        /// The value that does not fit.
        value: isize,
    },

    /// The computed operand stack bound exceeds the target format limit.
    StackOverflow {
        /// The computed bound.
        depth: usize,
    },

    /// The number of local variables exceeds the target format limit.
    LocalsOverflow {
        /// The number of local variables.
        count: usize,
    },

    /// The shared constant pool is full.
    PoolOverflow,

    /// A field or method descriptor cannot be parsed.
    Descriptor {
        /// The malformed descriptor.
        descriptor: CompactString,
    },

    /// The command stream produced an unbalanced or otherwise malformed
    /// control structure (for example, a handler outside of a guarded range).
    MalformedStructure {
        /// A brief description of the problem.
        reason: &'static str,
    },
}

impl Error for AssembleError {}

impl Display for AssembleError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OffsetOverflow {
                instruction,
                mnemonic,
                value,
            } => formatter.write_fmt(format_args!(
                "Offset {value} of instruction #{instruction} ({mnemonic}) \
                does not fit into the target format.",
            )),

            Self::StackOverflow { depth } => formatter.write_fmt(format_args!(
                "Operand stack depth {depth} exceeds the target format limit.",
            )),

            Self::LocalsOverflow { count } => formatter.write_fmt(format_args!(
                "{count} local variables exceed the target format limit.",
            )),

            Self::PoolOverflow => formatter.write_str("Constant pool overflow."),

            Self::Descriptor { descriptor } => {
                formatter.write_fmt(format_args!("Malformed descriptor {descriptor:?}."))
            }

            Self::MalformedStructure { reason } => {
                formatter.write_fmt(format_args!("Malformed control structure: {reason}."))
            }
        }
    }
}
