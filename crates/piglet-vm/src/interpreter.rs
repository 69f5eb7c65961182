//! The reference interpreter: a straightforward fetch-decode-execute loop
//! over [`VmHost`] and a [`Program`]. Every opcode's semantics are defined
//! here first; the JIT's lowering pass must agree with this loop exactly.

use piglet_core::{Offset, PigletError, Program, Word, LABEL_HI, LABEL_LO};

use crate::host::{ExitStatus, VmHost};

/// Drives a [`VmHost`] against a [`Program`] one instruction at a time.
/// Holds no state of its own; `ip` lives with the caller so the same
/// stepping logic can be reused by a supervisor that only wants to
/// interpret a single jump between JIT-compiled blocks.
pub struct Interpreter;

impl Interpreter {
    /// Runs the whole program to completion.
    ///
    /// # Errors
    /// Propagates any fatal [`PigletError`] raised while stepping.
    pub fn run(host: &mut VmHost, program: &Program) -> Result<ExitStatus, PigletError> {
        let mut ip: usize = 0;
        loop {
            if let Some(exit) = Self::step(host, program, &mut ip)? {
                return Ok(exit);
            }
        }
    }

    /// Executes exactly one instruction, skipping any label marker found at
    /// `ip` first. Advances `ip` in place.
    ///
    /// # Errors
    /// Returns the fatal error for whatever went wrong (unknown opcode,
    /// stack/memory fault, division by zero, or running off the end of the
    /// image without `DONE`/`ABORT`).
    pub fn step(
        host: &mut VmHost,
        program: &Program,
        ip: &mut usize,
    ) -> Result<Option<ExitStatus>, PigletError> {
        skip_label_markers(program, ip);

        let offset = *ip;
        let word = program.get(offset).ok_or(PigletError::Truncated)?;
        let op = piglet_core::Opcode::decode(word)
            .ok_or(PigletError::UnknownOpcode { word, offset })?;
        *ip += 1;

        let imm = if op.has_immediate() {
            let w = program.get(*ip).ok_or(PigletError::Truncated)?;
            *ip += 1;
            Some(w)
        } else {
            None
        };

        use piglet_core::Opcode::{
            Abort, Add, Addi, Discard, Div, Done, Dup, Equal, Greater, GreaterOrEqual,
            GreaterOrEquali, Jump, JumpIfFalse, JumpIfTrue, Less, LessOrEqual, Load, Loadaddi,
            Loadi, Mul, PopRes, Print, Pushi, Store, Storei, Sub,
        };

        match op {
            Pushi => host.push(offset, imm.unwrap())?,
            Loadi => {
                let v = host.mem_load(offset, imm.unwrap())?;
                host.push(offset, v)?;
            }
            Loadaddi => {
                let x = host.pop(offset)?;
                let v = host.mem_load(offset, imm.unwrap())?;
                host.push(offset, x.wrapping_add(v))?;
            }
            Storei => {
                let x = host.pop(offset)?;
                host.mem_store(offset, imm.unwrap(), x)?;
            }
            Load => {
                let a = host.pop(offset)?;
                let v = host.mem_load(offset, a)?;
                host.push(offset, v)?;
            }
            Store => {
                // Value is popped first, address second: the stack reads
                // `... address value`, top to bottom.
                let v = host.pop(offset)?;
                let a = host.pop(offset)?;
                host.mem_store(offset, a, v)?;
            }
            Dup => {
                let x = host.peek(offset)?;
                host.push(offset, x)?;
            }
            Discard | PopRes => {
                host.pop(offset)?;
            }
            Add => binary(host, offset, Word::wrapping_add)?,
            Sub => binary(host, offset, Word::wrapping_sub)?,
            Mul => binary(host, offset, Word::wrapping_mul)?,
            Div => {
                let b = host.pop(offset)?;
                let a = host.pop(offset)?;
                if b == 0 {
                    return Err(PigletError::DivisionByZero { offset });
                }
                host.push(offset, a.wrapping_div(b))?;
            }
            Addi => {
                let x = host.pop(offset)?;
                host.push(offset, x.wrapping_add(imm.unwrap()))?;
            }
            Equal => compare(host, offset, |a, b| a == b)?,
            Less => compare(host, offset, |a, b| a < b)?,
            LessOrEqual => compare(host, offset, |a, b| a <= b)?,
            Greater => compare(host, offset, |a, b| a > b)?,
            GreaterOrEqual => compare(host, offset, |a, b| a >= b)?,
            GreaterOrEquali => {
                let x = host.pop(offset)?;
                host.push(offset, i32::from(x >= imm.unwrap()))?;
            }
            Jump => *ip = imm.unwrap() as usize,
            JumpIfTrue => {
                let x = host.pop(offset)?;
                if x != 0 {
                    *ip = imm.unwrap() as usize;
                }
            }
            JumpIfFalse => {
                let x = host.pop(offset)?;
                if x == 0 {
                    *ip = imm.unwrap() as usize;
                }
            }
            Print => {
                let x = host.pop(offset)?;
                println!("{x}");
            }
            Done => return Ok(Some(ExitStatus::Done)),
            Abort => return Ok(Some(ExitStatus::Aborted { offset })),
        }
        Ok(None)
    }
}

fn binary(host: &mut VmHost, offset: Offset, f: impl Fn(Word, Word) -> Word) -> Result<(), PigletError> {
    let b = host.pop(offset)?;
    let a = host.pop(offset)?;
    host.push(offset, f(a, b))
}

fn compare(host: &mut VmHost, offset: Offset, f: impl Fn(Word, Word) -> bool) -> Result<(), PigletError> {
    let b = host.pop(offset)?;
    let a = host.pop(offset)?;
    host.push(offset, i32::from(f(a, b)))
}

/// Advances `ip` past any label marker sitting at the current position.
/// Markers never appear as live opcode payloads, only as jump targets, so
/// this is the one place both drivers must call before decoding.
pub fn skip_label_markers(program: &Program, ip: &mut usize) {
    while program.get(*ip) == Some(LABEL_LO) && program.get(*ip + 1) == Some(LABEL_HI) {
        *ip += 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piglet_core::Opcode;

    fn asm(words: &[Word]) -> Program {
        Program::from_words(words.to_vec())
    }

    #[test]
    fn pushi_add_print_done() {
        let program = asm(&[
            Opcode::Pushi.value(), 2,
            Opcode::Pushi.value(), 3,
            Opcode::Add.value(),
            Opcode::Print.value(),
            Opcode::Done.value(),
        ]);
        let mut host = VmHost::new();
        let exit = Interpreter::run(&mut host, &program).unwrap();
        assert_eq!(exit, ExitStatus::Done);
    }

    #[test]
    fn store_pops_value_then_address() {
        // PUSHI 9 (address) ; PUSHI 5 (value) ; STORE -> memory[9] = 5
        let program = asm(&[
            Opcode::Pushi.value(), 9,
            Opcode::Pushi.value(), 5,
            Opcode::Store.value(),
            Opcode::Done.value(),
        ]);
        let mut host = VmHost::new();
        Interpreter::run(&mut host, &program).unwrap();
        assert_eq!(host.mem_load(0, 9).unwrap(), 5);
    }

    #[test]
    fn sub_is_not_commutative() {
        // PUSHI 10 ; PUSHI 3 ; SUB -> 10 - 3 = 7 (under-top minus top)
        let program = asm(&[
            Opcode::Pushi.value(), 10,
            Opcode::Pushi.value(), 3,
            Opcode::Sub.value(),
            Opcode::Done.value(),
        ]);
        let mut host = VmHost::new();
        Interpreter::run(&mut host, &program).unwrap();
        assert_eq!(host.peek(0).unwrap(), 7);
    }

    #[test]
    fn label_marker_is_skipped_transparently() {
        // The jump target is 2: the marker's own first-word offset, per the
        // convention the assembler's label table follows.
        let program = asm(&[
            Opcode::Jump.value(), 2,
            LABEL_LO, LABEL_HI,
            Opcode::Done.value(),
        ]);
        let mut host = VmHost::new();
        let exit = Interpreter::run(&mut host, &program).unwrap();
        assert_eq!(exit, ExitStatus::Done);
    }

    #[test]
    fn division_by_zero_aborts_the_run() {
        let program = asm(&[
            Opcode::Pushi.value(), 1,
            Opcode::Pushi.value(), 0,
            Opcode::Div.value(),
            Opcode::Done.value(),
        ]);
        let mut host = VmHost::new();
        assert!(matches!(
            Interpreter::run(&mut host, &program),
            Err(PigletError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn falling_off_the_end_is_truncated() {
        let program = asm(&[Opcode::Pushi.value(), 1]);
        let mut host = VmHost::new();
        assert!(matches!(
            Interpreter::run(&mut host, &program),
            Err(PigletError::Truncated)
        ));
    }

    #[test]
    fn abort_reports_its_own_offset() {
        let program = asm(&[Opcode::Abort.value()]);
        let mut host = VmHost::new();
        let exit = Interpreter::run(&mut host, &program).unwrap();
        assert_eq!(exit, ExitStatus::Aborted { offset: 0 });
    }

    /// Builds a straight-line program that pushes `first`, folds each value
    /// in `rest` in with ADD, then DONE — always leaving exactly one word
    /// on the stack. With `with_markers` set, a label marker that nothing
    /// ever jumps to is spliced ahead of every instruction, so a correct
    /// interpreter must behave identically either way.
    fn build_fold_program(first: Word, rest: &[Word], with_markers: bool) -> Program {
        let mut words = Vec::new();
        let mut emit = |words: &mut Vec<Word>, op: Opcode, imm: Option<Word>| {
            if with_markers {
                words.push(LABEL_LO);
                words.push(LABEL_HI);
            }
            words.push(op.value());
            if let Some(v) = imm {
                words.push(v);
            }
        };
        emit(&mut words, Opcode::Pushi, Some(first));
        for v in rest {
            emit(&mut words, Opcode::Pushi, Some(*v));
            emit(&mut words, Opcode::Add, None);
        }
        if with_markers {
            words.push(LABEL_LO);
            words.push(LABEL_HI);
        }
        words.push(Opcode::Done.value());
        Program::from_words(words)
    }

    proptest::proptest! {
        #[test]
        fn label_markers_never_change_behaviour(
            first in proptest::prelude::any::<Word>(),
            rest in proptest::collection::vec(proptest::prelude::any::<Word>(), 0..16),
        ) {
            let plain = build_fold_program(first, &rest, false);
            let marked = build_fold_program(first, &rest, true);

            let mut plain_host = VmHost::new();
            let plain_exit = Interpreter::run(&mut plain_host, &plain).unwrap();
            let mut marked_host = VmHost::new();
            let marked_exit = Interpreter::run(&mut marked_host, &marked).unwrap();

            proptest::prop_assert_eq!(plain_exit, marked_exit);
            proptest::prop_assert_eq!(plain_host.peek(0).unwrap(), marked_host.peek(0).unwrap());
        }

        #[test]
        fn stack_depth_matches_the_sum_of_opcode_deltas(
            first in proptest::prelude::any::<Word>(),
            rest in proptest::collection::vec(proptest::prelude::any::<Word>(), 0..16),
        ) {
            let program = build_fold_program(first, &rest, false);
            let mut host = VmHost::new();
            Interpreter::run(&mut host, &program).unwrap();
            // One PUSHI (+1), then one PUSHI/ADD pair (+1, -1) per folded
            // value: net depth is always 1, matching `Opcode::stack_delta`
            // summed over the executed instructions.
            proptest::prop_assert_eq!(host.depth(), 1);
        }

        #[test]
        fn running_the_same_program_twice_is_deterministic(
            first in proptest::prelude::any::<Word>(),
            rest in proptest::collection::vec(proptest::prelude::any::<Word>(), 0..16),
        ) {
            let program = build_fold_program(first, &rest, false);

            let mut host_a = VmHost::new();
            let exit_a = Interpreter::run(&mut host_a, &program).unwrap();
            let mut host_b = VmHost::new();
            let exit_b = Interpreter::run(&mut host_b, &program).unwrap();

            proptest::prop_assert_eq!(exit_a, exit_b);
            proptest::prop_assert_eq!(host_a.peek(0).unwrap(), host_b.peek(0).unwrap());
        }
    }
}
