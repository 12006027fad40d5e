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
    fmt::{Debug, Formatter},
    sync::{Mutex, MutexGuard},
};

use ahash::AHashMap;
use compact_str::CompactString;

use crate::{
    assemble::{AssembleError, AssembleResult},
    jvm::MemberRef,
};

/// An index of the constant pool entry.
pub type PoolIndex = u16;

/// A constant pool entry of the target class format.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum PoolEntry {
    Utf8(CompactString),
    Integer(i32),
    Long(i64),
    String(PoolIndex),
    Class(PoolIndex),
    NameAndType(PoolIndex, PoolIndex),
    Fieldref(PoolIndex, PoolIndex),
    Methodref(PoolIndex, PoolIndex),
    InterfaceMethodref(PoolIndex, PoolIndex),
}

impl PoolEntry {
    // Long and double entries occupy two pool slots.
    #[inline(always)]
    fn slots(&self) -> usize {
        match self {
            Self::Long(..) => 2,
            _ => 1,
        }
    }
}

/// An interning constant pool shared between the blocks of one class.
///
/// The pool is the only mutable structure that several blocks compiled on
/// different threads touch at the same time. All interning operations are
/// serialized by the internal lock, and interning of the same constant always
/// returns the same index regardless of the thread that requested it.
pub struct ConstantPool {
    inner: Mutex<PoolInner>,
}

impl Default for ConstantPool {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ConstantPool {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConstantPool")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl ConstantPool {
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                entries: Vec::new(),
                index: AHashMap::new(),
                next: 1,
            }),
        }
    }

    /// Returns the number of occupied pool slots.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.lock().next - 1
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of all entries together with their indices in the order
    /// of interning.
    pub fn entries(&self) -> Vec<(PoolIndex, PoolEntry)> {
        self.lock().entries.clone()
    }

    #[inline(always)]
    pub fn utf8(&self, string: &str) -> AssembleResult<PoolIndex> {
        self.lock().utf8(string)
    }

    #[inline(always)]
    pub fn integer(&self, value: i32) -> AssembleResult<PoolIndex> {
        self.lock().intern(PoolEntry::Integer(value))
    }

    #[inline(always)]
    pub fn long(&self, value: i64) -> AssembleResult<PoolIndex> {
        self.lock().intern(PoolEntry::Long(value))
    }

    #[inline(always)]
    pub fn string(&self, string: &str) -> AssembleResult<PoolIndex> {
        let mut inner = self.lock();

        let utf8 = inner.utf8(string)?;

        inner.intern(PoolEntry::String(utf8))
    }

    #[inline(always)]
    pub fn class(&self, name: &str) -> AssembleResult<PoolIndex> {
        self.lock().class(name)
    }

    #[inline(always)]
    pub fn field_ref(&self, member: &MemberRef) -> AssembleResult<PoolIndex> {
        let mut inner = self.lock();

        let (class, name_and_type) = inner.member(member)?;

        inner.intern(PoolEntry::Fieldref(class, name_and_type))
    }

    #[inline(always)]
    pub fn method_ref(&self, member: &MemberRef) -> AssembleResult<PoolIndex> {
        let mut inner = self.lock();

        let (class, name_and_type) = inner.member(member)?;

        inner.intern(PoolEntry::Methodref(class, name_and_type))
    }

    #[inline(always)]
    pub fn interface_method_ref(&self, member: &MemberRef) -> AssembleResult<PoolIndex> {
        let mut inner = self.lock();

        let (class, name_and_type) = inner.member(member)?;

        inner.intern(PoolEntry::InterfaceMethodref(class, name_and_type))
    }

    #[inline(always)]
    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

struct PoolInner {
    entries: Vec<(PoolIndex, PoolEntry)>,
    index: AHashMap<PoolEntry, PoolIndex>,
    next: usize,
}

impl PoolInner {
    fn intern(&mut self, entry: PoolEntry) -> AssembleResult<PoolIndex> {
        if let Some(index) = self.index.get(&entry) {
            return Ok(*index);
        }

        let index = cast::u16(self.next).map_err(|_| AssembleError::PoolOverflow)?;

        let next = self.next + entry.slots();

        // The pool count field is itself a u16 and counts the unused zero slot.
        if next > PoolIndex::MAX as usize {
            return Err(AssembleError::PoolOverflow);
        }

        self.next = next;

        let _ = self.index.insert(entry.clone(), index);
        self.entries.push((index, entry));

        Ok(index)
    }

    #[inline(always)]
    fn utf8(&mut self, string: &str) -> AssembleResult<PoolIndex> {
        self.intern(PoolEntry::Utf8(CompactString::from(string)))
    }

    #[inline(always)]
    fn class(&mut self, name: &str) -> AssembleResult<PoolIndex> {
        let utf8 = self.utf8(name)?;

        self.intern(PoolEntry::Class(utf8))
    }

    fn member(&mut self, member: &MemberRef) -> AssembleResult<(PoolIndex, PoolIndex)> {
        let class = self.class(member.class())?;
        let name = self.utf8(member.name())?;
        let descriptor = self.utf8(member.descriptor())?;
        let name_and_type = self.intern(PoolEntry::NameAndType(name, descriptor))?;

        Ok((class, name_and_type))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread::spawn};

    use crate::jvm::{ConstantPool, MemberRef, PoolEntry};

    #[test]
    fn test_pool_interning() {
        let pool = ConstantPool::new();

        let first = pool.string("foo").unwrap();
        let second = pool.string("foo").unwrap();

        assert_eq!(first, second);
        assert_eq!(pool.utf8("foo").unwrap(), 1);
        assert_eq!(first, 2);
        assert_eq!(pool.len(), 2);

        let long = pool.long(10).unwrap();
        let next = pool.integer(10).unwrap();

        assert_eq!(long, 3);
        assert_eq!(next, 5);
        assert_eq!(pool.len(), 5);
    }

    #[test]
    fn test_pool_members() {
        let pool = ConstantPool::new();

        let get = MemberRef::method(
            "java/util/Hashtable",
            "get",
            "(Ljava/lang/Object;)Ljava/lang/Object;",
        )
        .unwrap();

        let method = pool.method_ref(&get).unwrap();
        let interface = pool.interface_method_ref(&get).unwrap();

        assert_ne!(method, interface);
        assert_eq!(pool.method_ref(&get).unwrap(), method);

        let entries = pool.entries();

        assert!(entries
            .iter()
            .any(|(index, entry)| *index == method && matches!(entry, PoolEntry::Methodref(..))));
    }

    #[test]
    fn test_pool_shared_between_threads() {
        let pool = Arc::new(ConstantPool::new());

        let workers = (0..8)
            .map(|worker| {
                let pool = pool.clone();

                spawn(move || {
                    let mut indices = Vec::new();

                    for round in 0..100 {
                        let name = format!("name{}", (worker + round) % 10);

                        indices.push((name.clone(), pool.string(&name).unwrap()));
                    }

                    indices
                })
            })
            .collect::<Vec<_>>();

        let mut seen = std::collections::HashMap::new();

        for worker in workers {
            for (name, index) in worker.join().unwrap() {
                assert_eq!(*seen.entry(name).or_insert(index), index);
            }
        }

        assert_eq!(seen.len(), 10);
        assert_eq!(pool.len(), 20);
    }
}
