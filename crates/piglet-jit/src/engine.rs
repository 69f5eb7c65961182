//! The compiled-block cache: one entry per distinct block entry offset,
//! compiled at most once and never evicted for the lifetime of a run.

use std::collections::HashMap;

use cranelift_codegen::Context;
use cranelift_frontend::FunctionBuilderContext;
use cranelift_jit::JITModule;
use cranelift_module::Module;

use piglet_core::{Offset, PigletError, Program};
use piglet_vm::VmHost;

use crate::block::{self, BasicBlock};
use crate::lower::{self, CompiledBlock, HostPointers};

/// Owns the Cranelift module and every block compiled against one
/// [`VmHost`]. Must outlive every [`CompiledBlock`] it has handed out,
/// since those are raw function pointers into the module's code memory.
pub struct JitEngine {
    module: JITModule,
    ctx: Context,
    fn_ctx: FunctionBuilderContext,
    ptrs: HostPointers,
    cache: HashMap<Offset, CompiledBlock>,
    next_id: u64,
}

impl JitEngine {
    /// # Errors
    /// Returns an error if Cranelift fails to detect a usable native target.
    pub fn new(host: &mut VmHost) -> Result<Self, PigletError> {
        let module = lower::make_module()?;
        Ok(Self {
            module,
            ctx: Context::new(),
            fn_ctx: FunctionBuilderContext::new(),
            ptrs: HostPointers::from_host(host),
            cache: HashMap::new(),
            next_id: 0,
        })
    }

    /// Returns the compiled block starting at `entry`, compiling and
    /// caching it on first use. The discovered block's own entry is used as
    /// the cache key, independent of `entry`'s pre-label-marker position,
    /// since [`block::discover`] always skips markers identically for the
    /// same `entry`.
    ///
    /// # Errors
    /// Propagates a compile-time `MemoryOutOfRange` for an out-of-bounds
    /// immediate address, or an internal lowering failure.
    pub fn block_for(&mut self, program: &Program, entry: Offset) -> Result<CompiledBlock, PigletError> {
        if let Some(f) = self.cache.get(&entry) {
            return Ok(*f);
        }
        let block: BasicBlock = block::discover(program, entry);
        let name = format!("piglet_block_{}", self.next_id);
        self.next_id += 1;

        let func_id = lower::compile_block(
            &mut self.module,
            &mut self.ctx,
            &mut self.fn_ctx,
            &name,
            &block,
            self.ptrs,
        )?;
        self.module.finalize_definitions().map_err(|e| {
            tracing::error!(error = %e, "failed to finalize jit definitions");
            PigletError::Truncated
        })?;

        let code = self.module.get_finalized_function(func_id);
        // SAFETY: `compile_block` just defined this function with signature
        // `fn() -> i32`, and the module outlives every caller of
        // `block_for` via `JitEngine`'s ownership.
        let f: CompiledBlock = unsafe { std::mem::transmute::<*const u8, CompiledBlock>(code) };
        self.cache.insert(entry, f);
        Ok(f)
    }
}
