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

//! Lexical blocks and their transpilation.
//!
//! A [Block] owns the commands of one function, method, or module body. The
//! [transpile](Block::transpile) function converts the commands into the
//! target instructions, closes the body with a return, adjusts the sequence
//! according to the [BlockKind], and assembles the final [Code] object.

mod names;
mod tweak;

use std::{mem::take, sync::Arc};

use compact_str::CompactString;
use log::{debug, trace};

pub use crate::block::{
    names::{Builtins, LocalVars},
    tweak::BlockKind,
};
use crate::{
    assemble::{AssembleResult, Code, CodeParts, IfKind, Instruction},
    block::tweak::Tweak,
    command::Command,
    config::RuntimeConfig,
    jvm::{ConstantPool, Constant, MemberRef, Opcode},
    report::ASSEMBLER_LOG,
};

/// The compilation context shared by all blocks of one module.
#[derive(Debug)]
pub struct Module {
    descriptor: CompactString,
    pool: Arc<ConstantPool>,
    config: RuntimeConfig,
}

impl Module {
    /// Creates a module context with the default runtime configuration.
    ///
    /// The `descriptor` is the internal name of the module class, the holder
    /// of the module's globals table.
    #[inline(always)]
    pub fn new(descriptor: impl Into<CompactString>, pool: Arc<ConstantPool>) -> Self {
        Self::with_config(descriptor, pool, RuntimeConfig::new())
    }

    #[inline(always)]
    pub fn with_config(
        descriptor: impl Into<CompactString>,
        pool: Arc<ConstantPool>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            descriptor: descriptor.into(),
            pool,
            config,
        }
    }

    #[inline(always)]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// The constant pool of the module class.
    #[inline(always)]
    pub fn pool(&self) -> &Arc<ConstantPool> {
        &self.pool
    }

    #[inline(always)]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

/// The result of the block transpilation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Transpiled {
    /// The assembled code object.
    Code(Code),

    /// The block has no observable effect, and the caller should not emit it.
    Ignored,
}

impl Transpiled {
    /// Returns the code object, or None if the block is ignored.
    #[inline(always)]
    pub fn code(&self) -> Option<&Code> {
        match self {
            Self::Code(code) => Some(code),
            Self::Ignored => None,
        }
    }

    #[inline(always)]
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored)
    }
}

/// One lexical unit: a function, method, or module body.
pub struct Block {
    kind: BlockKind,
    module: Arc<Module>,
    commands: Vec<Command>,
    localvars: LocalVars,
}

impl Block {
    /// Creates an empty block without arguments.
    #[inline(always)]
    pub fn new(kind: BlockKind, module: Arc<Module>) -> Self {
        Self {
            kind,
            module,
            commands: Vec::new(),
            localvars: LocalVars::new(),
        }
    }

    /// Creates an empty block whose first local slots hold the arguments, in
    /// order.
    pub fn with_arguments<'a>(
        kind: BlockKind,
        module: Arc<Module>,
        arguments: impl IntoIterator<Item = &'a str>,
    ) -> AssembleResult<Self> {
        let mut block = Self::new(kind, module);

        for argument in arguments {
            let _ = block.localvars.allocate(argument)?;
        }

        Ok(block)
    }

    /// Appends the commands to the end of the block.
    #[inline(always)]
    pub fn extend(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.commands.extend(commands);
    }

    #[inline(always)]
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    #[inline(always)]
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    #[inline(always)]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[inline(always)]
    pub fn localvars(&self) -> &LocalVars {
        &self.localvars
    }

    /// Emits the store of the top stack value into the local variable.
    pub fn store_name(&mut self, name: &str) -> AssembleResult<Vec<Instruction>> {
        let slot = self.localvars.allocate(name)?;

        Ok(vec![Opcode::Astore(slot).into()])
    }

    /// Emits the load of the named value.
    ///
    /// Local variables are loaded from their slots. Any other name is looked
    /// up at runtime: in the module globals first, and then in the builtins
    /// if the globals do not have it.
    ///
    /// The emitted lookup is the same for every non-local name. [Builtins]
    /// is consulted only to trace which table is expected to provide it.
    pub fn load_name(&self, name: &str) -> AssembleResult<Vec<Instruction>> {
        if let Some(slot) = self.localvars.get(name) {
            return Ok(vec![Opcode::Aload(slot).into()]);
        }

        trace!(
            target: ASSEMBLER_LOG,
            "non-local name {name:?} (builtin: {})",
            Builtins::contains(name),
        );

        let config = &self.module.config;

        let get = MemberRef::method(
            config.table_class,
            config.table_get,
            config.table_get_descriptor,
        )?;

        Ok(vec![
            Opcode::GetStatic(MemberRef::field(
                &self.module.descriptor,
                config.globals_field,
                config.table_descriptor,
            )?)
            .into(),
            Opcode::Ldc(Constant::String(CompactString::from(name))).into(),
            Opcode::InvokeVirtual(get.clone()).into(),
            Instruction::If(vec![Opcode::Dup.into()], IfKind::Ifnonnull),
            Opcode::Pop.into(),
            Opcode::GetStatic(MemberRef::field(
                config.builtins_class,
                config.builtins_field,
                config.table_descriptor,
            )?)
            .into(),
            Opcode::Ldc(Constant::String(CompactString::from(name))).into(),
            Opcode::InvokeVirtual(get).into(),
            Instruction::EndIf,
        ])
    }

    /// Converts the commands into the code object.
    ///
    /// Returns [Transpiled::Ignored] if the block kind allows skipping empty
    /// bodies and the body is empty.
    pub fn transpile(mut self) -> AssembleResult<Transpiled> {
        let mut parts = CodeParts::new();

        let commands = take(&mut self.commands);

        for command in &commands {
            for instruction in command.convert(&mut self)? {
                instruction.process(&mut parts)?;
            }
        }

        let terminated = match parts.last() {
            Some(opcode) => opcode.is_return(),
            None => false,
        };

        if !terminated || parts.has_pending() {
            let _ = parts.add_opcode(Opcode::Return);
        }

        if self.kind.tweak(&mut parts) == Tweak::Ignore {
            return Ok(Transpiled::Ignored);
        }

        let code = parts.assemble(self.localvars.len())?;

        debug!(
            target: ASSEMBLER_LOG,
            "{:?} block of {} transpiled: {} commands, {} bytes",
            self.kind,
            self.module.descriptor,
            commands.len(),
            code.code_len(),
        );

        Ok(Transpiled::Code(code))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use crate::{
        assemble::{AssembleError, ExceptionInfo, Instruction},
        block::{Block, BlockKind, Module, Transpiled},
        command::{Clause, Command, Const, ExceptHandler, IfChain, Operation, TryChain},
        jvm::{ConstantPool, Jump, Opcode},
    };

    fn module() -> Arc<Module> {
        Arc::new(Module::new("test/Module", Arc::new(ConstantPool::new())))
    }

    fn load_const(constant: Const) -> Command {
        Operation::LoadConst(constant).into()
    }

    fn load_name(name: &str) -> Command {
        Operation::LoadName(name.into()).into()
    }

    fn store_name(name: &str, value: Command) -> Command {
        Command::new(Operation::StoreName(name.into()), vec![value])
    }

    fn return_value(value: Command) -> Command {
        Command::new(Operation::ReturnValue, vec![value])
    }

    fn transpile(block: Block) -> crate::assemble::Code {
        match block.transpile().unwrap() {
            Transpiled::Code(code) => code,
            Transpiled::Ignored => panic!("block ignored"),
        }
    }

    fn jump_target(code: &crate::assemble::Code, index: usize) -> Option<usize> {
        let placed = &code.instructions[index];
        let jump = placed.opcode.jump()?;

        code.position((placed.offset as isize + jump.offset) as u16)
    }

    #[test]
    fn test_store_and_branch_on_local() {
        let mut block = Block::new(BlockKind::Function, module());

        block.extend([
            store_name("x", load_const(Const::Int(1))),
            Operation::If(IfChain {
                branches: vec![Clause {
                    condition: vec![load_name("x")],
                    body: vec![return_value(load_name("x"))],
                }],
                orelse: Some(vec![return_value(load_const(Const::Int(0)))]),
            })
            .into(),
        ]);

        let code = transpile(block);

        assert_eq!(code.max_locals, 1);
        assert_eq!(code.max_stack, 2);
        assert!(code.exceptions.is_empty());

        assert_eq!(code.instructions.len(), 11);
        assert_eq!(code.instructions[2].opcode, Opcode::Astore(0));
        assert_eq!(code.instructions[3].opcode, Opcode::Aload(0));
        assert_eq!(code.instructions[5].opcode, Opcode::Ifeq(Jump { offset: 5 }));
        assert_eq!(jump_target(&code, 5), Some(8));

        assert_eq!(code.instructions[7].opcode, Opcode::Areturn);
        assert_eq!(code.instructions[10].opcode, Opcode::Areturn);
        assert_eq!(code.code_len(), 25);
    }

    #[test]
    fn test_pass_is_ignorable() {
        let mut block = Block::new(BlockKind::Method, module());

        block.extend([Operation::Pass.into()]);

        assert_eq!(block.transpile().unwrap(), Transpiled::Ignored);

        let mut block = Block::new(BlockKind::Function, module());

        block.extend([Operation::Pass.into()]);

        let code = transpile(block);

        assert_eq!(code.instructions.len(), 1);
        assert_eq!(code.instructions[0].opcode, Opcode::Return);
        assert_eq!(code.max_stack, 0);
    }

    #[test]
    fn test_guarded_body_with_one_handler() {
        let mut block = Block::new(BlockKind::Function, module());

        block.extend([Operation::Try(TryChain {
            body: vec![Command::new(
                Operation::PopTop,
                vec![load_const(Const::None)],
            )],
            handlers: vec![ExceptHandler {
                exception: Some("java/lang/Exception".into()),
                name: None,
                body: Vec::new(),
            }],
        })
        .into()]);

        let code = transpile(block);

        assert_eq!(
            code.exceptions,
            vec![ExceptionInfo {
                start_offset: 0,
                end_offset: 2,
                handler_offset: 5,
                exception_type: Some("java/lang/Exception".into()),
            }],
        );

        assert_eq!(code.instructions[2].opcode, Opcode::Goto(Jump { offset: 4 }));
        assert_eq!(code.instructions[4].opcode, Opcode::Return);
        assert_eq!(code.instructions[4].offset, 6);
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.max_locals, 0);
    }

    #[test]
    fn test_named_handler() {
        let mut block = Block::new(BlockKind::Function, module());

        block.extend([Operation::Try(TryChain {
            body: vec![store_name("x", load_const(Const::Bool(true)))],
            handlers: vec![ExceptHandler {
                exception: None,
                name: Some("error".into()),
                body: vec![return_value(load_name("error"))],
            }],
        })
        .into()]);

        let code = transpile(block);

        assert_eq!(code.max_locals, 2);
        assert_eq!(code.exceptions.len(), 1);
        assert_eq!(code.exceptions[0].exception_type, None);

        let handler = code.position(code.exceptions[0].handler_offset).unwrap();

        assert_eq!(code.instructions[handler].opcode, Opcode::Astore(1));
        assert_eq!(code.instructions[handler + 1].opcode, Opcode::Aload(1));
        assert_eq!(code.instructions[handler + 2].opcode, Opcode::Areturn);

        // The join point follows the handler that never falls through.
        assert_eq!(jump_target(&code, 2), Some(handler + 3));
        assert_eq!(code.instructions[handler + 3].opcode, Opcode::Return);
    }

    #[test]
    fn test_conditional_chain_converges() {
        let mut block =
            Block::with_arguments(BlockKind::Function, module(), ["x", "y"]).unwrap();

        block.extend([
            Operation::If(IfChain {
                branches: vec![
                    Clause {
                        condition: vec![load_name("x")],
                        body: vec![store_name("z", load_const(Const::Int(1)))],
                    },
                    Clause {
                        condition: vec![load_name("y")],
                        body: vec![store_name("z", load_const(Const::Int(2)))],
                    },
                ],
                orelse: Some(vec![store_name("z", load_const(Const::Int(3)))]),
            })
            .into(),
            return_value(load_name("z")),
        ]);

        let code = transpile(block);

        assert_eq!(code.max_locals, 3);
        assert_eq!(code.instructions.len(), 19);

        assert_eq!(jump_target(&code, 2), Some(7));
        assert_eq!(jump_target(&code, 6), Some(17));
        assert_eq!(jump_target(&code, 9), Some(14));
        assert_eq!(jump_target(&code, 13), Some(17));

        assert_eq!(code.instructions[17].opcode, Opcode::Aload(2));
        assert_eq!(code.instructions[18].opcode, Opcode::Areturn);
    }

    #[test]
    fn test_return_is_idempotent() {
        let body = || [return_value(load_const(Const::None))];

        let mut block = Block::new(BlockKind::Function, module());

        block.extend(body());

        let code = transpile(block);

        assert_eq!(
            code.instructions
                .iter()
                .map(|placed| placed.opcode.clone())
                .collect::<Vec<_>>(),
            vec![Opcode::AconstNull, Opcode::Areturn],
        );

        let mut block = Block::new(BlockKind::Module, module());

        block.extend(body());

        let code = transpile(block);

        assert_eq!(code.instructions.len(), 1);
        assert_eq!(code.instructions[0].opcode, Opcode::Return);

        let mut block = Block::new(BlockKind::Method, module());

        block.extend(body());

        assert!(block.transpile().unwrap().is_ignored());
    }

    #[test]
    fn test_method_tail_normalized() {
        let mut block = Block::new(BlockKind::Method, module());

        block.extend([
            store_name("x", load_const(Const::Bool(false))),
            return_value(load_const(Const::None)),
        ]);

        let code = transpile(block);

        assert_eq!(
            code.instructions
                .iter()
                .map(|placed| placed.opcode.clone())
                .collect::<Vec<_>>(),
            vec![
                code.instructions[0].opcode.clone(),
                Opcode::Astore(0),
                Opcode::Return,
            ],
        );
        assert_eq!(code.code_len(), 5);
    }

    #[test]
    fn test_function_implicit_tail_is_void() {
        let mut block = Block::new(BlockKind::Function, module());

        block.extend([Operation::Try(TryChain {
            body: vec![return_value(load_const(Const::None))],
            handlers: vec![ExceptHandler {
                exception: None,
                name: None,
                body: vec![return_value(load_const(Const::None))],
            }],
        })
        .into()]);

        let code = transpile(block);

        let last = code.instructions.len() - 1;

        assert_eq!(code.instructions[last].opcode, Opcode::Return);
        assert_eq!(code.instructions[last - 1].opcode, Opcode::Areturn);
        assert_eq!(code.instructions[last - 2].opcode, Opcode::AconstNull);
        assert_eq!(jump_target(&code, 2), Some(last));
    }

    #[test]
    fn test_non_local_lookup_chain() {
        let mut block = Block::new(BlockKind::Function, module());

        block.extend([Command::new(Operation::PopTop, vec![load_name("print")])]);

        let code = transpile(block);

        let mnemonics = code
            .instructions
            .iter()
            .map(|placed| placed.opcode.mnemonic())
            .collect::<Vec<_>>();

        assert_eq!(
            mnemonics,
            vec![
                "getstatic",
                "ldc_w",
                "invokevirtual",
                "dup",
                "ifnonnull",
                "pop",
                "getstatic",
                "ldc_w",
                "invokevirtual",
                "pop",
                "return",
            ],
        );

        let Opcode::GetStatic(globals) = &code.instructions[0].opcode else {
            panic!("globals table expected");
        };

        let Opcode::GetStatic(builtins) = &code.instructions[6].opcode else {
            panic!("builtins table expected");
        };

        assert_eq!(globals.class(), "test/Module");
        assert_eq!(globals.name(), "globals");
        assert_eq!(builtins.class(), "org/Python");
        assert_eq!(builtins.name(), "builtins");

        assert_eq!(jump_target(&code, 4), Some(9));
        assert_eq!(code.max_stack, 2);
        assert_eq!(code.max_locals, 0);
    }

    #[test]
    fn test_method_arguments() {
        let mut block =
            Block::with_arguments(BlockKind::Method, module(), ["self", "value"]).unwrap();

        block.extend([Command::new(Operation::PopTop, vec![load_name("value")])]);

        assert_eq!(block.localvars().names(), &["self", "value"]);

        let code = transpile(block);

        assert_eq!(code.max_locals, 2);
        assert_eq!(code.instructions[0].opcode, Opcode::Aload(1));
        assert_eq!(code.instructions[2].opcode, Opcode::Return);
    }

    #[test]
    fn test_unbalanced_commands() {
        let mut block = Block::new(BlockKind::Function, module());

        block.extend([Operation::Raw(vec![Instruction::Try]).into()]);

        assert_eq!(
            block.transpile().unwrap_err(),
            AssembleError::MalformedStructure {
                reason: "unterminated control structure",
            },
        );

        let mut block = Block::new(BlockKind::Function, module());

        block.extend([Operation::Try(TryChain {
            body: Vec::new(),
            handlers: Vec::new(),
        })
        .into()]);

        assert!(block.transpile().is_err());
    }

    #[test]
    fn test_concurrent_blocks_share_pool() {
        let pool = Arc::new(ConstantPool::new());
        let module = Arc::new(Module::new("test/Shared", pool.clone()));

        let encoded = thread::scope(|scope| {
            let workers = (0..8)
                .map(|_| {
                    let module = module.clone();

                    scope.spawn(move || {
                        let mut block = Block::new(BlockKind::Function, module.clone());

                        block.extend([
                            store_name("s", load_const(Const::Str("shared".into()))),
                            return_value(load_name("missing")),
                        ]);

                        let code = transpile(block);
                        let bytes = code.encode(module.pool()).unwrap();

                        assert_eq!(bytes.len(), code.code_len());

                        bytes
                    })
                })
                .collect::<Vec<_>>();

            workers
                .into_iter()
                .map(|worker| worker.join().unwrap())
                .collect::<Vec<_>>()
        });

        for bytes in &encoded[1..] {
            assert_eq!(bytes, &encoded[0]);
        }

        let entries = pool.len();

        let mut block = Block::new(BlockKind::Function, module.clone());

        block.extend([store_name("s", load_const(Const::Str("shared".into())))]);

        let _ = transpile(block).encode(&pool).unwrap();

        assert_eq!(pool.len(), entries);
    }
}
