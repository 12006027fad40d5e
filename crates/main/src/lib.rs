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

//! # Classweave
//!
//! The back-end assembler of a bytecode-to-bytecode transpiler.
//!
//! The crate takes the already-decoded commands of one lexical unit (a
//! function, method, or module body) and produces a code object of the target
//! virtual machine: the ordered instructions with their byte offsets, the
//! operand stack bound, the number of local variables, and the exception
//! table.
//!
//! ```
//! use std::sync::Arc;
//!
//! use classweave::{
//!     block::{Block, BlockKind, Module, Transpiled},
//!     command::{Command, Const, Operation},
//!     jvm::ConstantPool,
//! };
//!
//! let pool = Arc::new(ConstantPool::new());
//! let module = Arc::new(Module::new("example/Module", pool.clone()));
//!
//! let mut block = Block::new(BlockKind::Function, module);
//!
//! block.extend([Command::new(
//!     Operation::ReturnValue,
//!     vec![Operation::LoadConst(Const::Int(42)).into()],
//! )]);
//!
//! let Transpiled::Code(code) = block.transpile().unwrap() else {
//!     panic!("Non-empty functions are never ignored.");
//! };
//!
//! assert_eq!(code.max_stack, 2);
//! assert_eq!(code.max_locals, 0);
//!
//! let bytes = code.encode(&pool).unwrap();
//!
//! assert_eq!(bytes.len(), code.code_len());
//! ```
//!
//! ## Pipeline
//!
//! 1. Each [Command](command::Command) is converted into a sequence of
//!    [Instructions](assemble::Instruction) in the context of its
//!    [Block](block::Block). Name loads and stores go through the block's
//!    local variable table.
//! 2. The instructions are appended to the [CodeParts](assemble::CodeParts)
//!    builder. Structural instructions register guarded ranges and
//!    conditional chains whose boundaries are resolved to the instructions
//!    appended later.
//! 3. The block closes the sequence with a return and applies the
//!    [BlockKind](block::BlockKind) adjustments: an empty method is reported
//!    as ignorable, and the trailing `null` return turns into the void return.
//! 4. The layout pass assigns the byte offsets, and the patch pass computes
//!    the jump distances and the exception table.
//!
//! ## Logging
//!
//! The crate reports its activity through the [log](https://docs.rs/log)
//! facade under the `classweave::$assembler` target. The host application
//! decides whether and how to print these records.

pub mod assemble;
pub mod block;
pub mod command;
mod config;
pub mod jvm;
mod report;

pub use crate::config::RuntimeConfig;
