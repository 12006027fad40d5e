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

use std::str::Chars;

// Operand stack slots of a value of the type that starts with `first`.
fn type_slots(first: char, chars: &mut Chars) -> Option<usize> {
    match first {
        'B' | 'C' | 'F' | 'I' | 'S' | 'Z' => Some(1),

        'J' | 'D' => Some(2),

        'L' => loop {
            match chars.next()? {
                ';' => break Some(1),
                _ => continue,
            }
        },

        '[' => {
            let mut component = chars.next()?;

            while component == '[' {
                component = chars.next()?;
            }

            let _ = type_slots(component, chars)?;

            Some(1)
        }

        _ => None,
    }
}

/// Returns the number of operand stack slots occupied by a value of the
/// field `descriptor`, or None if the descriptor is malformed.
pub fn field_slots(descriptor: &str) -> Option<usize> {
    let mut chars = descriptor.chars();

    let slots = type_slots(chars.next()?, &mut chars)?;

    match chars.next() {
        None => Some(slots),
        Some(_) => None,
    }
}

/// The operand stack shape of a method descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MethodShape {
    /// Stack slots consumed by the arguments (the receiver is not included).
    pub args: usize,

    /// Stack slots produced by the return value.
    pub ret: usize,
}

/// Parses a method `descriptor` such as "(Ljava/lang/String;J)V".
pub fn method_shape(descriptor: &str) -> Option<MethodShape> {
    let mut chars = descriptor.chars();

    if chars.next()? != '(' {
        return None;
    }

    let mut args = 0;

    loop {
        match chars.next()? {
            ')' => break,
            first => args += type_slots(first, &mut chars)?,
        }
    }

    let ret = match chars.next()? {
        'V' => 0,
        first => type_slots(first, &mut chars)?,
    };

    if chars.next().is_some() {
        return None;
    }

    Some(MethodShape { args, ret })
}

#[cfg(test)]
mod tests {
    use crate::jvm::descriptor::{field_slots, method_shape, MethodShape};

    #[test]
    fn test_method_shapes() {
        assert_eq!(method_shape("()V"), Some(MethodShape { args: 0, ret: 0 }));
        assert_eq!(method_shape("()Z"), Some(MethodShape { args: 0, ret: 1 }));
        assert_eq!(
            method_shape("(J)Lorg/python/types/Int;"),
            Some(MethodShape { args: 2, ret: 1 }),
        );

        assert_eq!(
            method_shape("(Ljava/lang/String;[[IDZ)J"),
            Some(MethodShape { args: 5, ret: 2 }),
        );

        assert_eq!(method_shape("(Ljava/lang/String)V"), None);
        assert_eq!(method_shape("V"), None);
        assert_eq!(method_shape("()VV"), None);
    }

    #[test]
    fn test_field_slots() {
        assert_eq!(field_slots("Ljava/util/Hashtable;"), Some(1));
        assert_eq!(field_slots("D"), Some(2));
        assert_eq!(field_slots("[J"), Some(1));
        assert_eq!(field_slots("Q"), None);
        assert_eq!(field_slots("II"), None);
    }
}
