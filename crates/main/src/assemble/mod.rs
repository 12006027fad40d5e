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

//! The code object builder.
//!
//! The [CodeParts] object accumulates the target instructions of a single
//! block together with the registries of its control structures. Structural
//! [Instruction] markers register guarded ranges and conditional chains, and
//! the [assemble](CodeParts::assemble) function lays the final sequence out,
//! patches the jumps and produces the [Code] object.
//!
//! Control structure records refer to their instructions through forward
//! references: a record field is queued until the next instruction is
//! appended, and then the field points to that instruction. Every resolved
//! field is also recorded on the target instruction as an [Anchor], so the
//! field follows the instruction if the builder replaces it.

mod code;
mod error;
mod layout;
mod parts;
mod structure;

pub use crate::assemble::{
    code::{Code, ExceptionInfo, Placed},
    error::{AssembleError, AssembleResult},
    parts::{
        Anchor,
        Branch,
        CodeParts,
        Handler,
        IfBlock,
        IfBlockIndex,
        OpRef,
        TryCatch,
        TryCatchIndex,
        UNRESOLVED,
    },
    structure::{IfKind, Instruction},
};
