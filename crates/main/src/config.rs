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

/// Runtime coordinates referenced by the emitted code.
///
/// The assembler never resolves global or builtin names at compile time.
/// Instead, it emits code that looks the names up in the runtime name tables,
/// and this object tells where these tables live and how the object model of
/// the target runtime is shaped.
///
/// The default configuration matches the reference runtime library.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[non_exhaustive]
pub struct RuntimeConfig {
    /// The internal name of the root object class of the runtime
    /// (e.g. "org/python/Object").
    pub object_class: &'static str,

    /// The class of the name tables (module globals and builtins).
    pub table_class: &'static str,

    /// The field descriptor of the name tables.
    pub table_descriptor: &'static str,

    /// The name of the table lookup method.
    pub table_get: &'static str,

    /// The method descriptor of the table lookup method.
    pub table_get_descriptor: &'static str,

    /// The name of the static field that holds the globals table in every
    /// module class.
    pub globals_field: &'static str,

    /// The class that holds the process-wide builtins table.
    pub builtins_class: &'static str,

    /// The name of the static builtins table field.
    pub builtins_field: &'static str,

    /// The name of the root object's method that converts the object to a
    /// primitive boolean.
    pub truth_method: &'static str,

    /// The method descriptor of the truthiness method.
    pub truth_descriptor: &'static str,

    /// The class of the boolean objects.
    pub bool_class: &'static str,

    /// The class of the integer objects.
    pub int_class: &'static str,

    /// The static factory that boxes a primitive long into the integer object.
    pub int_factory: &'static str,

    /// The method descriptor of the integer factory.
    pub int_factory_descriptor: &'static str,

    /// The class of the string objects.
    pub str_class: &'static str,

    /// The constructor descriptor of the string class.
    pub str_constructor_descriptor: &'static str,
}

impl Default for RuntimeConfig {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeConfig {
    /// The default constructor for this configuration object.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            object_class: "org/python/Object",
            table_class: "java/util/Hashtable",
            table_descriptor: "Ljava/util/Hashtable;",
            table_get: "get",
            table_get_descriptor: "(Ljava/lang/Object;)Ljava/lang/Object;",
            globals_field: "globals",
            builtins_class: "org/Python",
            builtins_field: "builtins",
            truth_method: "toBoolean",
            truth_descriptor: "()Z",
            bool_class: "org/python/types/Bool",
            int_class: "org/python/types/Int",
            int_factory: "getInt",
            int_factory_descriptor: "(J)Lorg/python/types/Int;",
            str_class: "org/python/types/Str",
            str_constructor_descriptor: "(Ljava/lang/String;)V",
        }
    }
}
