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

use std::fmt::{Display, Formatter};

use compact_str::CompactString;

use crate::{
    assemble::{AssembleError, AssembleResult},
    jvm::{
        descriptor::{field_slots, method_shape},
        ConstantPool,
        PoolIndex,
    },
    report::system_panic,
};

/// An index of the local variable slot.
pub type LocalSlot = u16;

/// A symbolic reference to a class member (a field or a method).
///
/// The operand stack shape of the member is computed once from its descriptor
/// when the reference is created.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemberRef {
    class: CompactString,
    name: CompactString,
    descriptor: CompactString,
    args: usize,
    ret: usize,
}

impl MemberRef {
    /// Creates a field reference. Fails if `descriptor` is not a valid field
    /// descriptor.
    pub fn field(class: &str, name: &str, descriptor: &str) -> AssembleResult<Self> {
        let Some(ret) = field_slots(descriptor) else {
            return Err(AssembleError::Descriptor {
                descriptor: CompactString::from(descriptor),
            });
        };

        Ok(Self {
            class: CompactString::from(class),
            name: CompactString::from(name),
            descriptor: CompactString::from(descriptor),
            args: 0,
            ret,
        })
    }

    /// Creates a method reference. Fails if `descriptor` is not a valid method
    /// descriptor.
    pub fn method(class: &str, name: &str, descriptor: &str) -> AssembleResult<Self> {
        let Some(shape) = method_shape(descriptor) else {
            return Err(AssembleError::Descriptor {
                descriptor: CompactString::from(descriptor),
            });
        };

        Ok(Self {
            class: CompactString::from(class),
            name: CompactString::from(name),
            descriptor: CompactString::from(descriptor),
            args: shape.args,
            ret: shape.ret,
        })
    }

    #[inline(always)]
    pub fn class(&self) -> &str {
        &self.class
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }
}

impl Display for MemberRef {
    #[inline(always)]
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_fmt(format_args!(
            "{}.{}:{}",
            self.class, self.name, self.descriptor
        ))
    }
}

/// A loadable constant.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Constant {
    Int(i32),
    Long(i64),
    String(CompactString),
}

/// The relative distance of a branch instruction.
///
/// The distance is measured from the first byte of the branch instruction to
/// the first byte of the target instruction. The assembler patches this value
/// during the final pass, so the instructions are created with a zero
/// distance.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Jump {
    pub offset: isize,
}

/// A target machine instruction.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Opcode {
    // Stack: () -> (null)
    AconstNull,
    // Stack: () -> (int) /* iconst_<n>, bipush, sipush or ldc_w */
    Iconst(i32),
    // Stack: () -> (value) /* two slots for longs */
    Ldc(Constant),
    // Stack: () -> (ref)
    Aload(LocalSlot),
    // Stack: (ref) -> ()
    Astore(LocalSlot),
    // Stack: (value) -> (value, value)
    Dup,
    // Stack: (value) -> ()
    Pop,
    // Stack: (a, b) -> (b, a)
    Swap,
    // Stack: () -> (ref)
    New(CompactString),
    // Stack: (ref) -> (ref)
    CheckCast(CompactString),
    // Stack: () -> (value)
    GetStatic(MemberRef),
    // Stack: (value) -> ()
    PutStatic(MemberRef),
    // Stack: (ref, args..) -> (result?)
    InvokeVirtual(MemberRef),
    // Stack: (ref, args..) -> (result?)
    InvokeSpecial(MemberRef),
    // Stack: (args..) -> (result?)
    InvokeStatic(MemberRef),
    // Stack: (ref, args..) -> (result?)
    InvokeInterface(MemberRef),
    // Stack: (int) -> ()
    Ifeq(Jump),
    // Stack: (int) -> ()
    Ifne(Jump),
    // Stack: (ref) -> ()
    Ifnull(Jump),
    // Stack: (ref) -> ()
    Ifnonnull(Jump),
    // Stack: () -> ()
    Goto(Jump),
    // Stack: () -> ()
    Return,
    // Stack: (ref) -> ()
    Areturn,
    // Stack: (ref) -> ()
    Athrow,
}

impl Opcode {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::AconstNull => "aconst_null",
            Self::Iconst(value) => match *value {
                -1..=5 => "iconst",
                -128..=127 => "bipush",
                -32768..=32767 => "sipush",
                _ => "ldc_w",
            },
            Self::Ldc(Constant::Long(..)) => "ldc2_w",
            Self::Ldc(..) => "ldc_w",
            Self::Aload(..) => "aload",
            Self::Astore(..) => "astore",
            Self::Dup => "dup",
            Self::Pop => "pop",
            Self::Swap => "swap",
            Self::New(..) => "new",
            Self::CheckCast(..) => "checkcast",
            Self::GetStatic(..) => "getstatic",
            Self::PutStatic(..) => "putstatic",
            Self::InvokeVirtual(..) => "invokevirtual",
            Self::InvokeSpecial(..) => "invokespecial",
            Self::InvokeStatic(..) => "invokestatic",
            Self::InvokeInterface(..) => "invokeinterface",
            Self::Ifeq(..) => "ifeq",
            Self::Ifne(..) => "ifne",
            Self::Ifnull(..) => "ifnull",
            Self::Ifnonnull(..) => "ifnonnull",
            Self::Goto(..) => "goto",
            Self::Return => "return",
            Self::Areturn => "areturn",
            Self::Athrow => "athrow",
        }
    }

    /// The change of the operand stack depth caused by this instruction.
    pub fn stack_effect(&self) -> isize {
        match self {
            Self::AconstNull | Self::Iconst(..) | Self::Aload(..) | Self::Dup | Self::New(..) => 1,

            Self::Ldc(Constant::Long(..)) => 2,
            Self::Ldc(..) => 1,

            Self::Astore(..) | Self::Pop | Self::Areturn | Self::Athrow => -1,

            Self::Swap | Self::CheckCast(..) | Self::Goto(..) | Self::Return => 0,

            Self::Ifeq(..) | Self::Ifne(..) | Self::Ifnull(..) | Self::Ifnonnull(..) => -1,

            Self::GetStatic(member) => member.ret as isize,
            Self::PutStatic(member) => -(member.ret as isize),

            Self::InvokeStatic(member) => member.ret as isize - member.args as isize,

            Self::InvokeVirtual(member)
            | Self::InvokeSpecial(member)
            | Self::InvokeInterface(member) => member.ret as isize - member.args as isize - 1,
        }
    }

    /// The length of the binary encoding of this instruction in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Iconst(value) => match *value {
                -1..=5 => 1,
                -128..=127 => 2,
                _ => 3,
            },

            Self::Aload(slot) | Self::Astore(slot) => match *slot {
                0..=3 => 1,
                4..=255 => 2,
                _ => 4,
            },

            Self::AconstNull
            | Self::Dup
            | Self::Pop
            | Self::Swap
            | Self::Return
            | Self::Areturn
            | Self::Athrow => 1,

            Self::InvokeInterface(..) => 5,

            Self::Ldc(..)
            | Self::New(..)
            | Self::CheckCast(..)
            | Self::GetStatic(..)
            | Self::PutStatic(..)
            | Self::InvokeVirtual(..)
            | Self::InvokeSpecial(..)
            | Self::InvokeStatic(..)
            | Self::Ifeq(..)
            | Self::Ifne(..)
            | Self::Ifnull(..)
            | Self::Ifnonnull(..)
            | Self::Goto(..) => 3,
        }
    }

    #[inline(always)]
    pub fn jump(&self) -> Option<&Jump> {
        match self {
            Self::Ifeq(jump)
            | Self::Ifne(jump)
            | Self::Ifnull(jump)
            | Self::Ifnonnull(jump)
            | Self::Goto(jump) => Some(jump),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn jump_mut(&mut self) -> Option<&mut Jump> {
        match self {
            Self::Ifeq(jump)
            | Self::Ifne(jump)
            | Self::Ifnull(jump)
            | Self::Ifnonnull(jump)
            | Self::Goto(jump) => Some(jump),
            _ => None,
        }
    }

    /// Returns true for the instructions that end the block returning a value
    /// or void.
    #[inline(always)]
    pub fn is_return(&self) -> bool {
        match self {
            Self::Return | Self::Areturn => true,
            _ => false,
        }
    }

    /// Returns true if the control never falls through this instruction to the
    /// next one.
    #[inline(always)]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Return | Self::Areturn | Self::Athrow | Self::Goto(..) => true,
            _ => false,
        }
    }

    /// Writes the binary encoding of this instruction into `out`, interning
    /// the symbolic operands in the `pool`.
    pub fn encode(&self, pool: &ConstantPool, out: &mut Vec<u8>) -> AssembleResult<()> {
        match self {
            Self::AconstNull => out.push(0x01),

            Self::Iconst(value) => match *value {
                -1..=5 => out.push((0x03 + *value) as u8),
                -128..=127 => out.extend([0x10, *value as i8 as u8]),
                -32768..=32767 => {
                    out.push(0x11);
                    out.extend((*value as i16).to_be_bytes());
                }
                _ => wide_index(out, 0x13, pool.integer(*value)?),
            },

            Self::Ldc(Constant::Int(value)) => wide_index(out, 0x13, pool.integer(*value)?),
            Self::Ldc(Constant::String(string)) => wide_index(out, 0x13, pool.string(string)?),
            Self::Ldc(Constant::Long(value)) => wide_index(out, 0x14, pool.long(*value)?),

            Self::Aload(slot) => local(out, 0x19, 0x2a, *slot),
            Self::Astore(slot) => local(out, 0x3a, 0x4b, *slot),

            Self::Dup => out.push(0x59),
            Self::Pop => out.push(0x57),
            Self::Swap => out.push(0x5f),

            Self::New(class) => wide_index(out, 0xbb, pool.class(class)?),
            Self::CheckCast(class) => wide_index(out, 0xc0, pool.class(class)?),

            Self::GetStatic(member) => wide_index(out, 0xb2, pool.field_ref(member)?),
            Self::PutStatic(member) => wide_index(out, 0xb3, pool.field_ref(member)?),

            Self::InvokeVirtual(member) => wide_index(out, 0xb6, pool.method_ref(member)?),
            Self::InvokeSpecial(member) => wide_index(out, 0xb7, pool.method_ref(member)?),
            Self::InvokeStatic(member) => wide_index(out, 0xb8, pool.method_ref(member)?),

            Self::InvokeInterface(member) => {
                wide_index(out, 0xb9, pool.interface_method_ref(member)?);

                let Ok(count) = cast::u8(member.args + 1) else {
                    return Err(AssembleError::Descriptor {
                        descriptor: member.descriptor.clone(),
                    });
                };

                out.extend([count, 0]);
            }

            Self::Ifeq(jump) => branch(out, 0x99, jump),
            Self::Ifne(jump) => branch(out, 0x9a, jump),
            Self::Ifnull(jump) => branch(out, 0xc6, jump),
            Self::Ifnonnull(jump) => branch(out, 0xc7, jump),
            Self::Goto(jump) => branch(out, 0xa7, jump),

            Self::Return => out.push(0xb1),
            Self::Areturn => out.push(0xb0),
            Self::Athrow => out.push(0xbf),
        }

        Ok(())
    }
}

impl Display for Opcode {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        let mnemonic = self.mnemonic();

        match self {
            Self::Iconst(value) => formatter.write_fmt(format_args!("{mnemonic} {value}")),

            Self::Ldc(Constant::Int(value)) => {
                formatter.write_fmt(format_args!("{mnemonic} {value}"))
            }

            Self::Ldc(Constant::Long(value)) => {
                formatter.write_fmt(format_args!("{mnemonic} {value}L"))
            }

            Self::Ldc(Constant::String(string)) => {
                formatter.write_fmt(format_args!("{mnemonic} {string:?}"))
            }

            Self::Aload(slot) | Self::Astore(slot) => {
                formatter.write_fmt(format_args!("{mnemonic} {slot}"))
            }

            Self::New(class) | Self::CheckCast(class) => {
                formatter.write_fmt(format_args!("{mnemonic} {class}"))
            }

            Self::GetStatic(member)
            | Self::PutStatic(member)
            | Self::InvokeVirtual(member)
            | Self::InvokeSpecial(member)
            | Self::InvokeStatic(member)
            | Self::InvokeInterface(member) => {
                formatter.write_fmt(format_args!("{mnemonic} {member}"))
            }

            Self::Ifeq(Jump { offset })
            | Self::Ifne(Jump { offset })
            | Self::Ifnull(Jump { offset })
            | Self::Ifnonnull(Jump { offset })
            | Self::Goto(Jump { offset }) => {
                formatter.write_fmt(format_args!("{mnemonic} {offset:+}"))
            }

            _ => formatter.write_str(mnemonic),
        }
    }
}

#[inline(always)]
fn wide_index(out: &mut Vec<u8>, opcode: u8, index: PoolIndex) {
    out.push(opcode);
    out.extend(index.to_be_bytes());
}

#[inline(always)]
fn local(out: &mut Vec<u8>, opcode: u8, short: u8, slot: LocalSlot) {
    match slot {
        0..=3 => out.push(short + slot as u8),
        4..=255 => out.extend([opcode, slot as u8]),
        _ => {
            out.extend([0xc4, opcode]);
            out.extend(slot.to_be_bytes());
        }
    }
}

#[inline(always)]
fn branch(out: &mut Vec<u8>, opcode: u8, jump: &Jump) {
    let Ok(offset) = cast::i16(jump.offset) else {
        system_panic!("Unpatched branch offset {}.", jump.offset);
    };

    out.push(opcode);
    out.extend(offset.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use crate::jvm::{ConstantPool, Constant, Jump, MemberRef, Opcode};

    #[test]
    fn test_variable_length_forms() {
        assert_eq!(Opcode::Aload(3).byte_len(), 1);
        assert_eq!(Opcode::Aload(4).byte_len(), 2);
        assert_eq!(Opcode::Astore(255).byte_len(), 2);
        assert_eq!(Opcode::Astore(256).byte_len(), 4);

        assert_eq!(Opcode::Iconst(-1).byte_len(), 1);
        assert_eq!(Opcode::Iconst(100).byte_len(), 2);
        assert_eq!(Opcode::Iconst(-1000).byte_len(), 3);
        assert_eq!(Opcode::Iconst(1_000_000).byte_len(), 3);
    }

    #[test]
    fn test_invoke_stack_effects() {
        let get = MemberRef::method(
            "java/util/Hashtable",
            "get",
            "(Ljava/lang/Object;)Ljava/lang/Object;",
        )
        .unwrap();

        assert_eq!(Opcode::InvokeVirtual(get.clone()).stack_effect(), -1);
        assert_eq!(Opcode::InvokeStatic(get).stack_effect(), 0);

        let box_long =
            MemberRef::method("org/python/types/Int", "getInt", "(J)Lorg/python/types/Int;")
                .unwrap();

        assert_eq!(Opcode::InvokeStatic(box_long).stack_effect(), -1);
        assert_eq!(Opcode::Ldc(Constant::Long(1)).stack_effect(), 2);

        let init =
            MemberRef::method("org/python/types/Str", "<init>", "(Ljava/lang/String;)V").unwrap();

        assert_eq!(Opcode::InvokeSpecial(init).stack_effect(), -2);

        assert!(MemberRef::method("Foo", "bar", "(").is_err());
        assert!(MemberRef::field("Foo", "bar", "()V").is_err());
    }

    #[test]
    fn test_encoding_matches_length() {
        let pool = ConstantPool::new();

        let truth = MemberRef::method("org/python/Object", "toBoolean", "()Z").unwrap();

        let opcodes = [
            Opcode::AconstNull,
            Opcode::Iconst(-1),
            Opcode::Iconst(5),
            Opcode::Iconst(-100),
            Opcode::Iconst(30000),
            Opcode::Iconst(1 << 20),
            Opcode::Ldc(Constant::String("foo".into())),
            Opcode::Ldc(Constant::Long(-7)),
            Opcode::Aload(0),
            Opcode::Aload(200),
            Opcode::Astore(1000),
            Opcode::New("org/python/types/Str".into()),
            Opcode::InvokeInterface(truth),
            Opcode::Goto(Jump { offset: -3 }),
            Opcode::Athrow,
        ];

        for opcode in &opcodes {
            let mut out = Vec::new();

            opcode.encode(&pool, &mut out).unwrap();

            assert_eq!(out.len(), opcode.byte_len(), "{opcode}");
        }

        let mut out = Vec::new();

        Opcode::Goto(Jump { offset: -3 }).encode(&pool, &mut out).unwrap();
        assert_eq!(out, [0xa7, 0xff, 0xfd]);

        let mut out = Vec::new();

        Opcode::Astore(1000).encode(&pool, &mut out).unwrap();
        assert_eq!(out, [0xc4, 0x3a, 0x03, 0xe8]);

        let mut out = Vec::new();

        Opcode::Iconst(-1).encode(&pool, &mut out).unwrap();
        assert_eq!(out, [0x02]);
    }
}
