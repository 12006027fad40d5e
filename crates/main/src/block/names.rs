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

use std::sync::RwLock;

use ahash::{AHashMap, AHashSet};
use compact_str::CompactString;
use lady_deirdre::sync::Lazy;

use crate::{
    assemble::{AssembleError, AssembleResult},
    jvm::LocalSlot,
};

/// A table of the block's local variables.
///
/// Slots are assigned in the order of the names' discovery and are never
/// reused within one block.
#[derive(Clone, Default, Debug)]
pub struct LocalVars {
    slots: AHashMap<CompactString, LocalSlot>,
    order: Vec<CompactString>,
}

impl LocalVars {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of slots in use.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the slot of the local variable, if the name is known.
    #[inline(always)]
    pub fn get(&self, name: &str) -> Option<LocalSlot> {
        self.slots.get(name).copied()
    }

    /// Returns the slot of the local variable, assigning the next free slot
    /// if the name has not been seen before.
    pub fn allocate(&mut self, name: &str) -> AssembleResult<LocalSlot> {
        if let Some(slot) = self.slots.get(name) {
            return Ok(*slot);
        }

        let count = self.order.len();

        let Ok(slot) = cast::u16(count) else {
            return Err(AssembleError::LocalsOverflow { count: count + 1 });
        };

        let name = CompactString::from(name);

        let _ = self.slots.insert(name.clone(), slot);
        self.order.push(name);

        Ok(slot)
    }

    /// The names in slot order.
    #[inline(always)]
    pub fn names(&self) -> &[CompactString] {
        &self.order
    }
}

/// A process-wide registry of the names the runtime exposes as builtins.
///
/// The registry does not affect the emitted code: a name that is not a local
/// variable is always looked up at runtime in the module globals first and in
/// the builtins second. The registry only tells which of these tables is
/// expected to provide the name.
pub struct Builtins;

impl Builtins {
    /// Adds a name to the registry.
    pub fn register(name: &str) {
        let mut names = match Self::get().write() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };

        let _ = names.insert(CompactString::from(name));
    }

    /// Returns true if the name is registered as a builtin.
    pub fn contains(name: &str) -> bool {
        let names = match Self::get().read() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };

        names.contains(name)
    }

    #[inline(always)]
    fn get() -> &'static RwLock<AHashSet<CompactString>> {
        static REGISTRY: Lazy<RwLock<AHashSet<CompactString>>> = Lazy::new(|| {
            let mut names = AHashSet::new();

            for name in [
                "abs",
                "all",
                "any",
                "bool",
                "dict",
                "float",
                "int",
                "isinstance",
                "len",
                "list",
                "max",
                "min",
                "object",
                "print",
                "range",
                "repr",
                "set",
                "str",
                "sum",
                "tuple",
                "type",
                "Exception",
            ] {
                let _ = names.insert(CompactString::from(name));
            }

            RwLock::new(names)
        });

        &REGISTRY
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        assemble::AssembleError,
        block::{Builtins, LocalVars},
    };

    #[test]
    fn test_slot_discovery_order() {
        let mut vars = LocalVars::new();

        assert_eq!(vars.allocate("self").unwrap(), 0);
        assert_eq!(vars.allocate("x").unwrap(), 1);
        assert_eq!(vars.allocate("self").unwrap(), 0);
        assert_eq!(vars.allocate("y").unwrap(), 2);

        assert_eq!(vars.len(), 3);
        assert_eq!(vars.get("x"), Some(1));
        assert_eq!(vars.get("z"), None);
        assert_eq!(vars.names(), &["self", "x", "y"]);
    }

    #[test]
    fn test_builtins_registry() {
        assert!(Builtins::contains("print"));
        assert!(!Builtins::contains("classweave_custom_builtin"));

        Builtins::register("classweave_custom_builtin");

        assert!(Builtins::contains("classweave_custom_builtin"));
    }

    #[test]
    fn test_slot_limit() {
        let mut vars = LocalVars::new();

        for index in 0..65_536 {
            let _ = vars.allocate(&format!("v{index}")).unwrap();
        }

        assert_eq!(vars.len(), 65_536);
        assert_eq!(vars.get("v65535"), Some(65_535));
        assert_eq!(vars.allocate("v0").unwrap(), 0);

        assert_eq!(
            vars.allocate("v65536").unwrap_err(),
            AssembleError::LocalsOverflow { count: 65_537 },
        );

        assert_eq!(vars.len(), 65_536);
    }
}
