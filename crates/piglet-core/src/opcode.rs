//! The Piglet opcode table.
//!
//! Numeric assignments are frozen for binary compatibility: the assembler and
//! the VM must agree on them, and they match the original source's
//! declaration order exactly (`PUSHI = 0` through `ABORT = 25`).

use crate::Word;

/// The two words that make up a label marker. Carries no runtime effect; it
/// exists so jump targets can be located without a separate symbol table.
pub const LABEL_LO: Word = 0xCAFE;
pub const LABEL_HI: Word = 0xBABE;

/// One Piglet instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Opcode {
    Pushi = 0,
    Loadi = 1,
    Loadaddi = 2,
    Storei = 3,
    Load = 4,
    Store = 5,
    Dup = 6,
    Discard = 7,
    Add = 8,
    Addi = 9,
    Sub = 10,
    Div = 11,
    Mul = 12,
    Jump = 13,
    JumpIfTrue = 14,
    JumpIfFalse = 15,
    Equal = 16,
    Less = 17,
    LessOrEqual = 18,
    Greater = 19,
    GreaterOrEqual = 20,
    GreaterOrEquali = 21,
    PopRes = 22,
    Done = 23,
    Print = 24,
    Abort = 25,
}

impl Opcode {
    /// All opcodes in canonical declaration order.
    pub const ALL: [Opcode; 26] = [
        Opcode::Pushi,
        Opcode::Loadi,
        Opcode::Loadaddi,
        Opcode::Storei,
        Opcode::Load,
        Opcode::Store,
        Opcode::Dup,
        Opcode::Discard,
        Opcode::Add,
        Opcode::Addi,
        Opcode::Sub,
        Opcode::Div,
        Opcode::Mul,
        Opcode::Jump,
        Opcode::JumpIfTrue,
        Opcode::JumpIfFalse,
        Opcode::Equal,
        Opcode::Less,
        Opcode::LessOrEqual,
        Opcode::Greater,
        Opcode::GreaterOrEqual,
        Opcode::GreaterOrEquali,
        Opcode::PopRes,
        Opcode::Done,
        Opcode::Print,
        Opcode::Abort,
    ];

    /// Decodes a raw instruction word into an opcode. Returns `None` for the
    /// label sentinel (`LABEL_LO`) and for anything outside the defined set;
    /// callers distinguish the two (see `piglet_vm`/`piglet_jit`'s fetch
    /// loops) since only the former is a normal, expected condition.
    #[must_use]
    pub fn decode(word: Word) -> Option<Opcode> {
        if !(0..=25).contains(&word) {
            return None;
        }
        // SAFETY-free: plain numeric match, no transmute.
        Some(match word {
            0 => Opcode::Pushi,
            1 => Opcode::Loadi,
            2 => Opcode::Loadaddi,
            3 => Opcode::Storei,
            4 => Opcode::Load,
            5 => Opcode::Store,
            6 => Opcode::Dup,
            7 => Opcode::Discard,
            8 => Opcode::Add,
            9 => Opcode::Addi,
            10 => Opcode::Sub,
            11 => Opcode::Div,
            12 => Opcode::Mul,
            13 => Opcode::Jump,
            14 => Opcode::JumpIfTrue,
            15 => Opcode::JumpIfFalse,
            16 => Opcode::Equal,
            17 => Opcode::Less,
            18 => Opcode::LessOrEqual,
            19 => Opcode::Greater,
            20 => Opcode::GreaterOrEqual,
            21 => Opcode::GreaterOrEquali,
            22 => Opcode::PopRes,
            23 => Opcode::Done,
            24 => Opcode::Print,
            25 => Opcode::Abort,
            _ => unreachable!("range already checked"),
        })
    }

    /// The numeric value this opcode encodes to.
    #[must_use]
    pub const fn value(self) -> Word {
        self as Word
    }

    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Pushi => "PUSHI",
            Opcode::Loadi => "LOADI",
            Opcode::Loadaddi => "LOADADDI",
            Opcode::Storei => "STOREI",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Dup => "DUP",
            Opcode::Discard => "DISCARD",
            Opcode::Add => "ADD",
            Opcode::Addi => "ADDI",
            Opcode::Sub => "SUB",
            Opcode::Div => "DIV",
            Opcode::Mul => "MUL",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfTrue => "JUMP_IF_TRUE",
            Opcode::JumpIfFalse => "JUMP_IF_FALSE",
            Opcode::Equal => "EQUAL",
            Opcode::Less => "LESS",
            Opcode::LessOrEqual => "LESS_OR_EQUAL",
            Opcode::Greater => "GREATER",
            Opcode::GreaterOrEqual => "GREATER_OR_EQUAL",
            Opcode::GreaterOrEquali => "GREATER_OR_EQUALI",
            // PRES is the assembler's mnemonic; POP_RES is the canonical name.
            Opcode::PopRes => "POP_RES",
            Opcode::Done => "DONE",
            Opcode::Print => "PRINT",
            Opcode::Abort => "ABORT",
        }
    }

    /// Looks up an opcode by mnemonic. Accepts `PRES` and `DISCARD` as
    /// synonyms for `POP_RES` and `DISCARD` respectively, matching the
    /// original assembler's vocabulary.
    #[must_use]
    pub fn from_mnemonic(s: &str) -> Option<Opcode> {
        Some(match s {
            "PRES" => Opcode::PopRes,
            _ => Opcode::ALL.into_iter().find(|op| op.mnemonic() == s)?,
        })
    }

    /// Whether this opcode is followed by one immediate word in the stream.
    #[must_use]
    pub const fn has_immediate(self) -> bool {
        matches!(
            self,
            Opcode::Pushi
                | Opcode::Loadi
                | Opcode::Loadaddi
                | Opcode::Storei
                | Opcode::Addi
                | Opcode::GreaterOrEquali
                | Opcode::Jump
                | Opcode::JumpIfTrue
                | Opcode::JumpIfFalse
        )
    }

    /// Whether the immediate (when present) denotes a memory address that
    /// can be range-checked at lowering time, rather than an arbitrary
    /// literal or jump target.
    #[must_use]
    pub const fn immediate_is_address(self) -> bool {
        matches!(self, Opcode::Loadi | Opcode::Loadaddi | Opcode::Storei)
    }

    #[must_use]
    pub const fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse)
    }

    #[must_use]
    pub const fn is_terminator(self) -> bool {
        matches!(self, Opcode::Done | Opcode::Abort)
    }

    /// Net change in stack depth this opcode causes, assuming it does not
    /// fault. Used both by the interpreter's bookkeeping and by the
    /// depth-conservation property test.
    #[must_use]
    pub const fn stack_delta(self) -> i32 {
        match self {
            Opcode::Pushi | Opcode::Loadi | Opcode::Dup => 1,
            Opcode::Loadaddi
            | Opcode::Load
            | Opcode::Addi
            | Opcode::GreaterOrEquali
            | Opcode::Jump
            | Opcode::Done
            | Opcode::Abort => 0,
            Opcode::Storei
            | Opcode::Discard
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Equal
            | Opcode::Less
            | Opcode::LessOrEqual
            | Opcode::Greater
            | Opcode::GreaterOrEqual
            | Opcode::Print
            | Opcode::PopRes
            | Opcode::JumpIfTrue
            | Opcode::JumpIfFalse => -1,
            Opcode::Store => -2,
        }
    }
}

impl core::fmt::Display for Opcode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
