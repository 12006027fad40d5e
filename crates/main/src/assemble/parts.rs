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

use std::mem::take;

use compact_str::CompactString;
use log::trace;

use crate::{
    jvm::Opcode,
    report::{system_panic, ASSEMBLER_LOG},
};

/// A stable handle of the instruction inside the builder's arena.
///
/// Handles never change when the instructions are reordered or removed from
/// the code sequence, and they are never reused within one builder.
pub type OpRef = usize;

/// A sentinel handle of the forward reference that has not been resolved yet.
pub const UNRESOLVED: OpRef = OpRef::MAX;

pub type TryCatchIndex = usize;
pub type IfBlockIndex = usize;

/// A field of a control structure record that points to an instruction.
///
/// When the field is resolved, the anchor is recorded in the target
/// instruction's back-reference list, so the field can be redirected if the
/// instruction is replaced later.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Anchor {
    /// The first guarded instruction of the try-catch record.
    TryStart(TryCatchIndex),
    /// The join point after the last handler of the try-catch record.
    TryEnd(TryCatchIndex),
    /// The first instruction of the handler (record index, handler index).
    HandlerStart(TryCatchIndex, usize),
    /// The instruction the conditional branch lands on when its test fails
    /// (record index, branch index).
    BranchNext(IfBlockIndex, usize),
    /// The join point of the conditional chain.
    IfEnd(IfBlockIndex),
}

/// A guarded range together with its handlers.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TryCatch {
    pub start_op: OpRef,
    pub end_op: OpRef,
    /// The unconditional jump placed right after the guarded body. Its
    /// position is the exclusive end of the guarded range.
    pub jump_op: OpRef,
    pub handlers: Vec<Handler>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Handler {
    pub start_op: OpRef,
    /// The internal name of the caught exception class, or None for
    /// catch-all handlers.
    pub descriptor: Option<CompactString>,
    /// The jump to the join point that ends a non-final handler body.
    pub jump_op: Option<OpRef>,
}

/// A conditional chain: `if`, zero or more `elif`s, and an optional `else`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IfBlock {
    /// The first branch is the `if` itself, the rest are the `elif`s.
    pub branches: Vec<Branch>,
    pub end_op: OpRef,
    pub has_else: bool,
}

impl IfBlock {
    #[inline(always)]
    pub fn elifs(&self) -> &[Branch] {
        match self.branches.get(1..) {
            Some(elifs) => elifs,
            None => &[],
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Branch {
    /// The conditional jump that skips the branch body.
    pub if_op: OpRef,
    /// The jump over the remaining branches that ends the branch body. None if
    /// the body never falls through.
    pub jump_op: Option<OpRef>,
    /// The entry point of the next branch, or the join point.
    pub next_op: OpRef,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Open {
    Try(TryCatchIndex),
    If(IfBlockIndex),
}

pub(crate) struct Slot {
    pub(crate) opcode: Opcode,
    pub(crate) references: Vec<Anchor>,
    pub(crate) alive: bool,
    pub(crate) code_index: usize,
    pub(crate) code_offset: usize,
}

/// An append-only accumulator of the block's instructions.
///
/// Besides the instruction sequence, the builder keeps the registries of the
/// control structures (try-catch ranges and conditional chains) and the queue
/// of the forward references that wait for the next appended instruction.
pub struct CodeParts {
    pub(crate) arena: Vec<Slot>,
    pub(crate) code: Vec<OpRef>,
    pub(crate) try_catches: Vec<TryCatch>,
    pub(crate) if_blocks: Vec<IfBlock>,
    pub(crate) open: Vec<Open>,
    next_resolve_list: Vec<Anchor>,
}

impl Default for CodeParts {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl CodeParts {
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            arena: Vec::new(),
            code: Vec::new(),
            try_catches: Vec::new(),
            if_blocks: Vec::new(),
            open: Vec::new(),
            next_resolve_list: Vec::new(),
        }
    }

    /// Appends a single instruction. See [add_opcodes](Self::add_opcodes).
    #[inline(always)]
    pub fn add_opcode(&mut self, opcode: Opcode) -> OpRef {
        let op = self.push(opcode);

        self.resolve_pending(op);

        op
    }

    /// Appends the instructions to the code sequence in order, and resolves
    /// every pending forward reference to the first of them.
    ///
    /// Returns the handle of the first appended instruction, or None if
    /// `opcodes` is empty. In the latter case the pending references stay
    /// queued.
    pub fn add_opcodes(&mut self, opcodes: impl IntoIterator<Item = Opcode>) -> Option<OpRef> {
        let mut first = None;

        for opcode in opcodes {
            let op = self.push(opcode);

            if first.is_none() {
                first = Some(op);
            }
        }

        let first = first?;

        self.resolve_pending(first);

        Some(first)
    }

    /// Requests the `anchor` field to be resolved to the next appended
    /// instruction.
    #[inline(always)]
    pub fn resolve_next(&mut self, anchor: Anchor) {
        self.next_resolve_list.push(anchor);
    }

    /// Returns true if some forward references wait for the next instruction.
    #[inline(always)]
    pub fn has_pending(&self) -> bool {
        !self.next_resolve_list.is_empty()
    }

    /// The number of instructions in the code sequence.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// The handles of the code sequence in order.
    #[inline(always)]
    pub fn code(&self) -> &[OpRef] {
        &self.code
    }

    /// The instructions of the code sequence in order.
    #[inline(always)]
    pub fn opcodes(&self) -> impl Iterator<Item = &Opcode> + '_ {
        self.code.iter().map(|op| &self.arena[*op].opcode)
    }

    #[inline(always)]
    pub fn last(&self) -> Option<&Opcode> {
        let op = self.code.last()?;

        Some(&self.arena[*op].opcode)
    }

    /// Returns the instruction by handle. The instruction may already be
    /// removed from the code sequence.
    #[inline(always)]
    pub fn get(&self, op: OpRef) -> Option<&Opcode> {
        Some(&self.arena.get(op)?.opcode)
    }

    /// Returns true if the instruction is a part of the code sequence.
    #[inline(always)]
    pub fn is_alive(&self, op: OpRef) -> bool {
        match self.arena.get(op) {
            Some(slot) => slot.alive,
            None => false,
        }
    }

    /// Returns the record fields that currently point to the instruction.
    #[inline(always)]
    pub fn references(&self, op: OpRef) -> &[Anchor] {
        match self.arena.get(op) {
            Some(slot) => &slot.references,
            None => &[],
        }
    }

    #[inline(always)]
    pub fn try_catches(&self) -> &[TryCatch] {
        &self.try_catches
    }

    #[inline(always)]
    pub fn if_blocks(&self) -> &[IfBlock] {
        &self.if_blocks
    }

    /// Returns false if the control never reaches the next appended
    /// instruction by falling through the current end of the sequence.
    #[inline(always)]
    pub fn falls_through(&self) -> bool {
        if self.has_pending() {
            return true;
        }

        match self.last() {
            Some(opcode) => !opcode.is_terminal(),
            None => true,
        }
    }

    /// Replaces the last `count` instructions with a single `opcode`.
    ///
    /// Every record field that pointed to any of the removed instructions is
    /// redirected to the replacement.
    pub fn replace_tail(&mut self, count: usize, opcode: Opcode) -> OpRef {
        let Some(split) = self.code.len().checked_sub(count) else {
            system_panic!("Tail replacement of {count} instructions out of bounds.");
        };

        let replacement = self.alloc(opcode);

        let tail = self.code.split_off(split);

        for op in tail {
            for anchor in take(&mut self.arena[op].references) {
                trace!(target: ASSEMBLER_LOG, "redirect {anchor:?}: #{op} -> #{replacement}");

                *self.anchor_mut(anchor) = replacement;
                self.arena[replacement].references.push(anchor);
            }

            self.retire(op);
        }

        self.code.push(replacement);

        replacement
    }

    /// Computes the upper bound of the operand stack depth.
    ///
    /// This is a single linear scan over the code sequence. Both arms of every
    /// conditional are present in the sequence, so the bound is sound but not
    /// necessarily tight.
    ///
    /// Unlike a plain running sum, the scan resets the depth to one at every
    /// handler entry: the target machine clears the operand stack on a throw
    /// and pushes only the caught exception. A plain sum would carry the
    /// depth of the guarded body's fall-through into the handler.
    pub fn stack_depth(&self) -> usize {
        let mut depth: isize = 0;
        let mut max_depth: isize = 0;

        for op in &self.code {
            let slot = &self.arena[*op];

            if slot
                .references
                .iter()
                .any(|anchor| matches!(anchor, Anchor::HandlerStart(..)))
            {
                depth = 1;
                max_depth = max_depth.max(depth);
            }

            depth += slot.opcode.stack_effect();

            if depth > max_depth {
                max_depth = depth;
            }
        }

        max_depth as usize
    }

    pub(crate) fn push_try(&mut self) -> TryCatchIndex {
        let index = self.try_catches.len();

        self.try_catches.push(TryCatch {
            start_op: UNRESOLVED,
            end_op: UNRESOLVED,
            jump_op: UNRESOLVED,
            handlers: Vec::new(),
        });

        index
    }

    pub(crate) fn push_if(&mut self, if_op: OpRef) -> IfBlockIndex {
        let index = self.if_blocks.len();

        self.if_blocks.push(IfBlock {
            branches: vec![Branch {
                if_op,
                jump_op: None,
                next_op: UNRESOLVED,
            }],
            end_op: UNRESOLVED,
            has_else: false,
        });

        index
    }

    pub(crate) fn anchor_mut(&mut self, anchor: Anchor) -> &mut OpRef {
        let field = match anchor {
            Anchor::TryStart(index) => self
                .try_catches
                .get_mut(index)
                .map(|record| &mut record.start_op),

            Anchor::TryEnd(index) => self
                .try_catches
                .get_mut(index)
                .map(|record| &mut record.end_op),

            Anchor::HandlerStart(index, handler) => self
                .try_catches
                .get_mut(index)
                .and_then(|record| record.handlers.get_mut(handler))
                .map(|handler| &mut handler.start_op),

            Anchor::BranchNext(index, branch) => self
                .if_blocks
                .get_mut(index)
                .and_then(|record| record.branches.get_mut(branch))
                .map(|branch| &mut branch.next_op),

            Anchor::IfEnd(index) => self
                .if_blocks
                .get_mut(index)
                .map(|record| &mut record.end_op),
        };

        let Some(field) = field else {
            system_panic!("Malformed anchor {anchor:?}.");
        };

        field
    }

    // Returns the laid-out slot of the instruction referenced by a record.
    pub(crate) fn target(&self, op: OpRef) -> &Slot {
        if op == UNRESOLVED {
            system_panic!("Unresolved forward reference.");
        }

        let Some(slot) = self.arena.get(op) else {
            system_panic!("Malformed instruction handle #{op}.");
        };

        if !slot.alive {
            system_panic!("Dangling back-reference to removed instruction #{op}.");
        }

        slot
    }

    pub(crate) fn ensure_resolved(&self) {
        if let Some(anchor) = self.next_resolve_list.first() {
            system_panic!("Forward reference {anchor:?} has no target instruction.");
        }
    }

    #[inline(always)]
    fn push(&mut self, opcode: Opcode) -> OpRef {
        trace!(target: ASSEMBLER_LOG, "append #{} {opcode}", self.arena.len());

        let op = self.alloc(opcode);

        self.code.push(op);

        op
    }

    #[inline(always)]
    fn alloc(&mut self, opcode: Opcode) -> OpRef {
        let op = self.arena.len();

        self.arena.push(Slot {
            opcode,
            references: Vec::new(),
            alive: true,
            code_index: 0,
            code_offset: 0,
        });

        op
    }

    fn resolve_pending(&mut self, target: OpRef) {
        for anchor in take(&mut self.next_resolve_list) {
            trace!(target: ASSEMBLER_LOG, "resolve {anchor:?} -> #{target}");

            *self.anchor_mut(anchor) = target;
            self.arena[target].references.push(anchor);
        }
    }

    fn retire(&mut self, op: OpRef) {
        let slot = &mut self.arena[op];

        if !slot.references.is_empty() {
            system_panic!("Removing instruction #{op} that is still referenced.");
        }

        slot.alive = false;
    }
}
