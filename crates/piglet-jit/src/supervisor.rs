//! Ties the interpreter and the block JIT together: every control-transfer
//! opcode and both terminators are interpreted directly, so the JIT never
//! has to reason about jump targets; everything else is dispatched into a
//! compiled block.
//!
//! Checking both `DONE` and `ABORT` here, before either ever reaches a
//! compiled block, is a deliberate departure from the source this was
//! modelled on, where only `DONE` got an equivalent check and `ABORT`
//! reached through the JIT path never terminated the run. See `DESIGN.md`.

use piglet_core::{Opcode, PigletError, Program};
use piglet_vm::{skip_label_markers, ExitStatus, Interpreter, VmHost};

use crate::engine::JitEngine;

/// Runs `program` to completion, using `engine`'s compiled blocks for
/// straight-line code and the interpreter for every jump and terminator.
///
/// # Errors
/// Propagates any fatal [`PigletError`] raised by either driver.
pub fn run(program: &Program, host: &mut VmHost, engine: &mut JitEngine) -> Result<ExitStatus, PigletError> {
    let mut ip: usize = 0;
    loop {
        skip_label_markers(program, &mut ip);
        let offset = ip;
        let word = program.get(offset).ok_or(PigletError::Truncated)?;

        let decoded = Opcode::decode(word);
        let needs_interpreter = matches!(decoded, Some(op) if op.is_jump() || op.is_terminator()) || decoded.is_none();

        if needs_interpreter {
            if let Some(exit) = Interpreter::step(host, program, &mut ip)? {
                return Ok(exit);
            }
            continue;
        }

        let block_fn = engine.block_for(program, offset)?;
        let resume = block_fn();
        if let Some(exit) = host.take_outcome()? {
            return Ok(exit);
        }
        ip = usize::try_from(resume).map_err(|_| PigletError::Truncated)?;
    }
}
