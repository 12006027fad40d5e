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

use log::debug;

use crate::{assemble::CodeParts, jvm::Opcode, report::ASSEMBLER_LOG};

/// The kind of the lexical unit a block represents.
///
/// The kind decides how the final instruction sequence is adjusted before the
/// layout.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
pub enum BlockKind {
    /// A method body that returns nothing. Empty methods are ignorable, and
    /// the trailing `null` return turns into the void return.
    Method,

    /// A function body. The sequence stays as is: explicit `areturn`s are
    /// kept, and the implicit tail appended by the block is the void return,
    /// the same as for every other kind.
    #[default]
    Function,

    /// A module initializer. Always emitted; the trailing `null` return turns
    /// into the void return.
    Module,
}

/// The outcome of the block adjustment.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Tweak {
    Keep,
    Ignore,
}

impl BlockKind {
    pub(crate) fn tweak(self, parts: &mut CodeParts) -> Tweak {
        match self {
            Self::Method => {
                if ignore_empty(parts) {
                    return Tweak::Ignore;
                }

                let _ = void_return(parts);
            }

            Self::Function => (),

            Self::Module => {
                let _ = void_return(parts);
            }
        }

        Tweak::Keep
    }
}

/// Returns true if the sequence is exactly a bare return, or exactly
/// `aconst_null; areturn`.
pub(crate) fn ignore_empty(parts: &CodeParts) -> bool {
    let mut opcodes = parts.opcodes();

    let empty = match (opcodes.next(), opcodes.next(), opcodes.next()) {
        (Some(Opcode::Return), None, None) => true,
        (Some(Opcode::AconstNull), Some(Opcode::Areturn), None) => true,
        _ => false,
    };

    if empty {
        debug!(target: ASSEMBLER_LOG, "empty block ignored");
    }

    empty
}

/// Replaces the trailing `aconst_null; areturn` pair with the void return.
///
/// Returns true if the sequence has been changed.
pub(crate) fn void_return(parts: &mut CodeParts) -> bool {
    let Some(split) = parts.len().checked_sub(2) else {
        return false;
    };

    let matches = {
        let mut tail = parts.opcodes().skip(split);

        matches!(
            (tail.next(), tail.next()),
            (Some(Opcode::AconstNull), Some(Opcode::Areturn)),
        )
    };

    if !matches {
        return false;
    }

    let _ = parts.replace_tail(2, Opcode::Return);

    true
}
