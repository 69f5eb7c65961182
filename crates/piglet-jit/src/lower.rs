//! Lowers one [`BasicBlock`] to a native function via Cranelift.
//!
//! The compiled function takes no arguments: the stack base, memory base,
//! and the halt/trap signalling cells all live at fixed addresses inside a
//! single [`VmHost`], so they are baked in as `iconst` constants rather than
//! threaded through as parameters. This is only sound because `VmHost`'s
//! buffers and cells are heap-allocated once and never relocated for the
//! lifetime of the engine that owns both it and the compiled-block cache —
//! see `JitEngine` in `engine.rs`.
//!
//! On a normal fall-through the function returns the offset execution should
//! resume at (the block's `exit`). A trap (stack fault, out-of-range memory
//! access, division by zero) instead writes the fault into `VmHost`'s trap
//! cells and returns; the supervisor always checks those cells first via
//! `VmHost::take_outcome`, so the return value carries no meaning in that
//! case beyond "something happened, go check".

use cranelift_codegen::ir::{types, AbiParam, InstBuilder, MemFlags, Type, Value};
use cranelift_codegen::isa::CallConv;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};

use piglet_core::{Opcode, PigletError, Word};
use piglet_vm::{halt_signal, trap_kind, VmHost};

use crate::block::{BasicBlock, BlockOp};

/// A block compiled to native code: no arguments, returns the offset to
/// resume execution at.
pub type CompiledBlock = extern "C" fn() -> i32;

extern "C" fn piglet_print_word(word: Word) {
    println!("{word}");
}

/// Builds a fresh Cranelift JIT module targeting the host machine, with the
/// print host call registered under a stable symbol name.
pub fn make_module() -> Result<JITModule, PigletError> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("use_colocated_libcalls", "false")
        .expect("valid cranelift setting");
    flag_builder.set("is_pic", "false").expect("valid cranelift setting");
    let isa_builder = cranelift_native::builder().map_err(lower_error)?;
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| lower_error(e.to_string()))?;

    let mut jit_builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    jit_builder.symbol("piglet_print_word", piglet_print_word as *const u8);
    Ok(JITModule::new(jit_builder))
}

fn lower_error(msg: impl std::fmt::Display) -> PigletError {
    // Compilation failures here are internal bugs in the lowering pass
    // itself, not program-level faults; there is no dedicated
    // `PigletError` variant for them, so they fold into `Truncated`'s
    // "execution could not continue" bucket rather than inventing a new
    // one the rest of the system never needs to distinguish.
    tracing::error!(%msg, "cranelift compilation failed");
    PigletError::Truncated
}

/// Pointers into a single `VmHost`, resolved once per engine and reused for
/// every block compiled against it.
#[derive(Clone, Copy)]
pub struct HostPointers {
    pub stack_base: *mut Word,
    pub memory_base: *mut Word,
    pub depth_cell: *mut i32,
    pub halt_cell: *mut i32,
    pub halt_offset_cell: *mut i32,
    pub trap_kind_cell: *mut i32,
    pub trap_offset_cell: *mut i32,
    pub trap_extra_cell: *mut i32,
}

impl HostPointers {
    #[must_use]
    pub fn from_host(host: &mut VmHost) -> Self {
        Self {
            stack_base: host.stack_base_ptr(),
            memory_base: host.memory_base_ptr(),
            depth_cell: host.depth_cell_ptr(),
            halt_cell: host.halt_cell_ptr(),
            halt_offset_cell: host.halt_offset_cell_ptr(),
            trap_kind_cell: host.trap_kind_cell_ptr(),
            trap_offset_cell: host.trap_offset_cell_ptr(),
            trap_extra_cell: host.trap_extra_cell_ptr(),
        }
    }
}

/// Compiles `block` into a native function registered in `module`, returning
/// its finalized, callable address.
///
/// # Errors
/// Returns the corresponding [`PigletError`] if an immediate address used by
/// `LOADI`/`STOREI`/`LOADADDI` is out of range — these are checked once
/// here, at compile time, since the address is a known constant; they never
/// need a runtime check. Also returns an error (folded into `Truncated`) if
/// Cranelift itself rejects the generated IR.
pub fn compile_block(
    module: &mut JITModule,
    ctx: &mut Context,
    fn_ctx: &mut FunctionBuilderContext,
    name: &str,
    block: &BasicBlock,
    ptrs: HostPointers,
) -> Result<FuncId, PigletError> {
    for op in &block.ops {
        if op.op.immediate_is_address() {
            VmHost::check_address(op.offset, op.imm.expect("address opcode carries an immediate"))?;
        }
    }

    let pointer_ty = module.target_config().pointer_type();
    let mut sig = module.make_signature();
    sig.returns.push(AbiParam::new(types::I32));

    let func_id = module
        .declare_function(name, Linkage::Local, &sig)
        .map_err(lower_error)?;

    ctx.func.signature = sig;
    let mut builder = FunctionBuilder::new(&mut ctx.func, fn_ctx);
    let entry_block = builder.create_block();
    builder.append_block_params_for_function_params(entry_block);
    builder.switch_to_block(entry_block);
    builder.seal_block(entry_block);

    let depth_var = Variable::new(0);
    builder.declare_var(depth_var, types::I32);
    let depth_cell = iconst_ptr(&mut builder, pointer_ty, ptrs.depth_cell);
    let initial_depth = builder
        .ins()
        .load(types::I32, MemFlags::trusted(), depth_cell, 0);
    builder.def_var(depth_var, initial_depth);

    let mut cx = LowerCtx {
        builder,
        pointer_ty,
        depth_var,
        ptrs,
    };

    for op in &block.ops {
        cx.lower_one(op)?;
    }

    let exit_offset = block.exit.map_or(-1, |o| o as i32);
    cx.write_depth_back();
    let ret = cx.builder.ins().iconst(types::I32, i64::from(exit_offset));
    cx.builder.ins().return_(&[ret]);
    cx.builder.finalize();

    module
        .define_function(func_id, ctx)
        .map_err(lower_error)?;
    module.clear_context(ctx);

    Ok(func_id)
}

struct LowerCtx<'a> {
    builder: FunctionBuilder<'a>,
    pointer_ty: Type,
    depth_var: Variable,
    ptrs: HostPointers,
}

impl<'a> LowerCtx<'a> {
    fn iconst_ptr(&mut self, ptr: *mut i32) -> Value {
        iconst_ptr(&mut self.builder, self.pointer_ty, ptr)
    }

    fn write_depth_back(&mut self) {
        let depth = self.builder.use_var(self.depth_var);
        let cell = self.iconst_ptr(self.ptrs.depth_cell);
        self.builder.ins().store(MemFlags::trusted(), depth, cell, 0);
    }

    /// Pushes `value` onto the Piglet operand stack, trapping with
    /// `StackOverflow` if it is already at capacity.
    fn push(&mut self, offset: usize, value: Value) {
        let depth = self.builder.use_var(self.depth_var);
        let cap = self.builder.ins().iconst(types::I32, i64::from(VmHost::stack_capacity()));
        let room = self.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::SignedLessThan, depth, cap);
        self.trap_unless(room, offset, trap_kind::STACK_OVERFLOW, 0);

        let base = self.iconst_ptr_word(self.ptrs.stack_base);
        let addr = self.word_addr(base, depth);
        self.builder.ins().store(MemFlags::trusted(), value, addr, 0);
        let one = self.builder.ins().iconst(types::I32, 1);
        let next = self.builder.ins().iadd(depth, one);
        self.builder.def_var(self.depth_var, next);
    }

    /// Pops the top of the Piglet operand stack, trapping with
    /// `StackUnderflow` if it is empty.
    fn pop(&mut self, offset: usize) -> Value {
        let depth = self.builder.use_var(self.depth_var);
        let zero = self.builder.ins().iconst(types::I32, 0);
        let nonempty = self.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::SignedGreaterThan, depth, zero);
        self.trap_unless(nonempty, offset, trap_kind::STACK_UNDERFLOW, 0);

        let one = self.builder.ins().iconst(types::I32, 1);
        let new_depth = self.builder.ins().isub(depth, one);
        self.builder.def_var(self.depth_var, new_depth);

        let base = self.iconst_ptr_word(self.ptrs.stack_base);
        let addr = self.word_addr(base, new_depth);
        self.builder.ins().load(types::I32, MemFlags::trusted(), addr, 0)
    }

    /// Loads `memory[addr]`, trapping with `MemoryOutOfRange` for an
    /// address computed at runtime (a compile-time-constant address is
    /// validated once up front in `compile_block` instead).
    fn mem_load_checked(&mut self, offset: usize, addr: Value) -> Value {
        self.bounds_check(offset, addr);
        let base = self.iconst_ptr_word(self.ptrs.memory_base);
        let ea = self.word_addr(base, addr);
        self.builder.ins().load(types::I32, MemFlags::trusted(), ea, 0)
    }

    fn mem_store_checked(&mut self, offset: usize, addr: Value, value: Value) {
        self.bounds_check(offset, addr);
        let base = self.iconst_ptr_word(self.ptrs.memory_base);
        let ea = self.word_addr(base, addr);
        self.builder.ins().store(MemFlags::trusted(), value, ea, 0);
    }

    fn bounds_check(&mut self, offset: usize, addr: Value) {
        let zero = self.builder.ins().iconst(types::I32, 0);
        let cap = self.builder.ins().iconst(types::I32, i64::from(VmHost::memory_capacity()));
        let ge0 = self.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::SignedGreaterThanOrEqual, addr, zero);
        let lt_cap = self.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::SignedLessThan, addr, cap);
        let in_range = self.builder.ins().band(ge0, lt_cap);
        self.trap_unless_with_extra(in_range, offset, trap_kind::MEMORY_OUT_OF_RANGE, addr);
    }

    /// Emits a branch that, if `cond` is false, writes the trap cells and
    /// returns from the block immediately.
    fn trap_unless(&mut self, cond: Value, offset: usize, kind: i32, extra: i32) {
        let extra_val = self.builder.ins().iconst(types::I32, i64::from(extra));
        self.trap_unless_with_extra(cond, offset, kind, extra_val);
    }

    fn trap_unless_with_extra(&mut self, cond: Value, offset: usize, kind: i32, extra_val: Value) {
        let trap_block = self.builder.create_block();
        let continue_block = self.builder.create_block();
        self.builder.ins().brif(cond, continue_block, &[], trap_block, &[]);

        self.builder.switch_to_block(trap_block);
        self.builder.seal_block(trap_block);
        self.write_depth_back();
        let kind_cell = self.iconst_ptr(self.ptrs.trap_kind_cell);
        let offset_cell = self.iconst_ptr(self.ptrs.trap_offset_cell);
        let extra_cell = self.iconst_ptr(self.ptrs.trap_extra_cell);
        let kind_val = self.builder.ins().iconst(types::I32, i64::from(kind));
        let offset_val = self.builder.ins().iconst(types::I32, offset as i64);
        self.builder.ins().store(MemFlags::trusted(), kind_val, kind_cell, 0);
        self.builder.ins().store(MemFlags::trusted(), offset_val, offset_cell, 0);
        self.builder.ins().store(MemFlags::trusted(), extra_val, extra_cell, 0);
        let ret = self.builder.ins().iconst(types::I32, offset as i64);
        self.builder.ins().return_(&[ret]);

        self.builder.switch_to_block(continue_block);
        self.builder.seal_block(continue_block);
    }

    fn iconst_ptr_word(&mut self, ptr: *mut Word) -> Value {
        let raw = ptr as i64;
        self.builder.ins().iconst(self.pointer_ty, raw)
    }

    /// `base + index * 4` in the pointer type, for word-sized (`i32`)
    /// elements.
    fn word_addr(&mut self, base: Value, index: Value) -> Value {
        let index_ptr = self.builder.ins().sextend(self.pointer_ty, index);
        let four = self.builder.ins().iconst(self.pointer_ty, 4);
        let byte_offset = self.builder.ins().imul(index_ptr, four);
        self.builder.ins().iadd(base, byte_offset)
    }

    fn lower_one(&mut self, op: &BlockOp) -> Result<(), PigletError> {
        let offset = op.offset;
        match op.op {
            Opcode::Pushi => {
                let v = self.builder.ins().iconst(types::I32, i64::from(op.imm.unwrap()));
                self.push(offset, v);
            }
            Opcode::Loadi => {
                let addr = self.builder.ins().iconst(types::I32, i64::from(op.imm.unwrap()));
                let v = self.mem_load_checked(offset, addr);
                self.push(offset, v);
            }
            Opcode::Loadaddi => {
                let x = self.pop(offset);
                let addr = self.builder.ins().iconst(types::I32, i64::from(op.imm.unwrap()));
                let v = self.mem_load_checked(offset, addr);
                let sum = self.builder.ins().iadd(x, v);
                self.push(offset, sum);
            }
            Opcode::Storei => {
                let x = self.pop(offset);
                let addr = self.builder.ins().iconst(types::I32, i64::from(op.imm.unwrap()));
                self.mem_store_checked(offset, addr, x);
            }
            Opcode::Load => {
                let addr = self.pop(offset);
                let v = self.mem_load_checked(offset, addr);
                self.push(offset, v);
            }
            Opcode::Store => {
                let v = self.pop(offset);
                let addr = self.pop(offset);
                self.mem_store_checked(offset, addr, v);
            }
            Opcode::Dup => {
                // peek without mutating depth, then push: equivalent to a
                // pop immediately followed by pushing it twice.
                let x = self.pop(offset);
                self.push(offset, x);
                self.push(offset, x);
            }
            Opcode::Discard | Opcode::PopRes => {
                self.pop(offset);
            }
            Opcode::Add => self.binary(offset, |b, x, y| b.ins().iadd(x, y)),
            Opcode::Sub => self.binary(offset, |b, x, y| b.ins().isub(x, y)),
            Opcode::Mul => self.binary(offset, |b, x, y| b.ins().imul(x, y)),
            Opcode::Div => {
                let y = self.pop(offset);
                let x = self.pop(offset);
                let zero = self.builder.ins().iconst(types::I32, 0);
                let nonzero = self.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::NotEqual, y, zero);
                self.trap_unless(nonzero, offset, trap_kind::DIVISION_BY_ZERO, 0);
                let q = self.checked_sdiv(x, y);
                self.push(offset, q);
            }
            Opcode::Addi => {
                let x = self.pop(offset);
                let k = self.builder.ins().iconst(types::I32, i64::from(op.imm.unwrap()));
                let sum = self.builder.ins().iadd(x, k);
                self.push(offset, sum);
            }
            Opcode::Equal => self.compare(offset, cranelift_codegen::ir::condcodes::IntCC::Equal),
            Opcode::Less => self.compare(offset, cranelift_codegen::ir::condcodes::IntCC::SignedLessThan),
            Opcode::LessOrEqual => self.compare(offset, cranelift_codegen::ir::condcodes::IntCC::SignedLessThanOrEqual),
            Opcode::Greater => self.compare(offset, cranelift_codegen::ir::condcodes::IntCC::SignedGreaterThan),
            Opcode::GreaterOrEqual => self.compare(offset, cranelift_codegen::ir::condcodes::IntCC::SignedGreaterThanOrEqual),
            Opcode::GreaterOrEquali => {
                let x = self.pop(offset);
                let k = self.builder.ins().iconst(types::I32, i64::from(op.imm.unwrap()));
                let cmp = self.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::SignedGreaterThanOrEqual, x, k);
                let v = self.builder.ins().uextend(types::I32, cmp);
                self.push(offset, v);
            }
            Opcode::Print => {
                let x = self.pop(offset);
                self.call_print(x);
            }
            Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse | Opcode::Done | Opcode::Abort => {
                unreachable!("block discovery never includes control-transfer opcodes in `ops`")
            }
        }
        Ok(())
    }

    /// Signed division that agrees with `Word::wrapping_div`: Cranelift's
    /// `sdiv` traps on `i32::MIN / -1` the same way the hardware `idiv`
    /// instruction does, where wrapping arithmetic just produces `i32::MIN`.
    /// Branches around the `sdiv` itself on that one input rather than
    /// selecting between two computed values, since `sdiv` would still trap
    /// even if its result went unused.
    fn checked_sdiv(&mut self, x: Value, y: Value) -> Value {
        let min = self.builder.ins().iconst(types::I32, i64::from(i32::MIN));
        let neg_one = self.builder.ins().iconst(types::I32, -1);
        let x_is_min = self.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::Equal, x, min);
        let y_is_neg_one = self.builder.ins().icmp(cranelift_codegen::ir::condcodes::IntCC::Equal, y, neg_one);
        let would_overflow = self.builder.ins().band(x_is_min, y_is_neg_one);

        let overflow_block = self.builder.create_block();
        let normal_block = self.builder.create_block();
        let merge_block = self.builder.create_block();
        self.builder.append_block_param(merge_block, types::I32);

        self.builder.ins().brif(would_overflow, overflow_block, &[], normal_block, &[]);

        self.builder.switch_to_block(overflow_block);
        self.builder.seal_block(overflow_block);
        self.builder.ins().jump(merge_block, &[min]);

        self.builder.switch_to_block(normal_block);
        self.builder.seal_block(normal_block);
        let q = self.builder.ins().sdiv(x, y);
        self.builder.ins().jump(merge_block, &[q]);

        self.builder.switch_to_block(merge_block);
        self.builder.seal_block(merge_block);
        self.builder.block_params(merge_block)[0]
    }

    fn binary(&mut self, offset: usize, f: impl FnOnce(&mut FunctionBuilder, Value, Value) -> Value) {
        let y = self.pop(offset);
        let x = self.pop(offset);
        let v = f(&mut self.builder, x, y);
        self.push(offset, v);
    }

    fn compare(&mut self, offset: usize, cc: cranelift_codegen::ir::condcodes::IntCC) {
        let y = self.pop(offset);
        let x = self.pop(offset);
        let cmp = self.builder.ins().icmp(cc, x, y);
        let v = self.builder.ins().uextend(types::I32, cmp);
        self.push(offset, v);
    }

    fn call_print(&mut self, value: Value) {
        // `piglet_print_word` is registered as a JIT symbol in
        // `make_module`; calling it by raw function pointer avoids
        // declaring it through the module's own function table a second
        // time for every compiled block.
        let call_conv = CallConv::triple_default(&target_lexicon::Triple::host());
        let mut sig = cranelift_codegen::ir::Signature::new(call_conv);
        sig.params.push(AbiParam::new(types::I32));
        let sig_ref = self.builder.import_signature(sig);
        let callee = self
            .builder
            .ins()
            .iconst(self.pointer_ty, piglet_print_word as usize as i64);
        self.builder.ins().call_indirect(sig_ref, callee, &[value]);
    }
}

fn iconst_ptr(builder: &mut FunctionBuilder, pointer_ty: Type, ptr: *mut i32) -> Value {
    builder.ins().iconst(pointer_ty, ptr as i64)
}
