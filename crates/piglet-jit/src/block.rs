//! Basic-block discovery.
//!
//! A block starts at some `ip` the supervisor has already confirmed is not
//! itself a jump/terminator/unrecognized opcode, and extends forward,
//! transparently skipping label markers, collecting straight-line opcodes
//! until (but not including) the first opcode that is a control transfer,
//! a terminator, or cannot be decoded at all. That opcode's own offset is
//! the block's `exit` — the supervisor re-examines it on the next
//! iteration using the ordinary interpreter, so jump targets and `DONE`/
//! `ABORT` are never compiled into a block themselves.

use piglet_core::{Offset, Opcode, Program, Word};
use piglet_vm::skip_label_markers;

/// One decoded instruction inside a block, with its own offset (needed for
/// fault reporting) and resolved immediate, if any.
#[derive(Debug, Clone, Copy)]
pub struct BlockOp {
    pub offset: Offset,
    pub op: Opcode,
    pub imm: Option<Word>,
}

/// A maximal run of straight-line opcodes starting at `entry`.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub entry: Offset,
    pub ops: Vec<BlockOp>,
    /// Offset of the first jump/terminator/undecodable opcode following
    /// `ops`, or `None` if the image ends (truncated) immediately after.
    pub exit: Option<Offset>,
}

/// Scans forward from `entry`, stopping at and *excluding* the first
/// control-transfer, terminator, or undecodable opcode.
#[must_use]
pub fn discover(program: &Program, entry: Offset) -> BasicBlock {
    let mut ip = entry;
    skip_label_markers(program, &mut ip);
    let mut ops = Vec::new();

    loop {
        skip_label_markers(program, &mut ip);
        let offset = ip;
        let Some(word) = program.get(offset) else {
            return BasicBlock { entry, ops, exit: None };
        };
        let Some(op) = Opcode::decode(word) else {
            return BasicBlock { entry, ops, exit: Some(offset) };
        };
        if op.is_jump() || op.is_terminator() {
            return BasicBlock { entry, ops, exit: Some(offset) };
        }

        let mut next = ip + 1;
        let imm = if op.has_immediate() {
            let Some(w) = program.get(next) else {
                return BasicBlock { entry, ops, exit: None };
            };
            next += 1;
            Some(w)
        } else {
            None
        };
        ops.push(BlockOp { offset, op, imm });
        ip = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_before_jump_without_consuming_it() {
        let program = Program::from_words(vec![
            Opcode::Pushi.value(), 1,
            Opcode::Pushi.value(), 2,
            Opcode::Add.value(),
            Opcode::Jump.value(), 0,
        ]);
        let block = discover(&program, 0);
        assert_eq!(block.ops.len(), 3);
        assert_eq!(block.exit, Some(5));
    }

    #[test]
    fn truncated_block_has_no_exit() {
        let program = Program::from_words(vec![Opcode::Pushi.value(), 1]);
        let block = discover(&program, 0);
        assert_eq!(block.ops.len(), 1);
        assert_eq!(block.exit, None);
    }

    #[test]
    fn label_marker_mid_block_is_skipped() {
        let program = Program::from_words(vec![
            Opcode::Pushi.value(), 1,
            piglet_core::LABEL_LO, piglet_core::LABEL_HI,
            Opcode::Print.value(),
            Opcode::Done.value(),
        ]);
        let block = discover(&program, 0);
        assert_eq!(block.ops.len(), 2);
        assert_eq!(block.exit, Some(5));
    }
}
