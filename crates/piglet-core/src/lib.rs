//! Opcode table, program image, and shared error types for the Piglet VM.
//!
//! This crate has no opinions about execution strategy — it is consumed
//! identically by the plain interpreter (`piglet-vm`) and the block JIT
//! (`piglet-jit`), which is the point: a single decode table and a single
//! error vocabulary, reused by both drivers.

mod error;
mod image;
mod opcode;

pub use error::{Offset, PigletError};
pub use image::Program;
pub use opcode::{Opcode, LABEL_HI, LABEL_LO};

/// A Piglet instruction word: opcodes, immediates, and stack/memory values
/// are all signed 32-bit integers that wrap silently on overflow.
pub type Word = i32;

/// Fixed capacity of the operand stack, in words.
pub const STACK_CAPACITY: usize = 8_096;

/// Fixed capacity of linear memory, in words.
pub const MEMORY_CAPACITY: usize = 140_000;
