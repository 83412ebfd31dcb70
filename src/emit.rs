//! Machine-code emitter
//!
//! Ties the encoder, the code buffer and the relocation log together.
//! Every emission helper checks for cursor collision first and grows
//! the buffer when it owns one; emitting into a full caller-supplied
//! region is fatal.

use crate::reg::Reg;
use crate::op::{OpR, OpI, OpIS, OpS, OpU};
use crate::encode::{encode_r, encode_i, encode_is, encode_s, encode_u, Xlen};
use crate::buffer::{CodeBuffer, CodeDesc, DEFAULT_MAX_BUFFER_SIZE};
use crate::reloc::RelocMode;
use crate::patch::{self, FlushFn, FlushMode, flush_none};
use crate::imm;
use crate::util::compat_fn::CompatFnWrapper;

/// Register width this emitter targets.
const XLEN: Xlen = Xlen::Rv64;

/// Stack slot width in bytes.
pub const POINTER_SIZE: i16 = 8;

/// Construction-time emitter configuration.
#[derive(Copy, Clone, Debug)]
pub struct EmitterOptions {
    /// Record plain external-reference relocations. Off by default:
    /// they are only needed when the code will be serialized or debug
    /// verification wants them.
    pub record_external_references: bool,
    /// Growth cap for owned buffers.
    pub max_buffer_size: usize,
}

impl Default for EmitterOptions {
    #[inline(always)]
    fn default() -> Self {
        Self {
            record_external_references: false,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

/// RV64 machine-code emitter over a [`CodeBuffer`].
#[derive(Debug)]
pub struct Emitter<'a> {
    buf: CodeBuffer<'a>,
    opts: EmitterOptions,
    flush: CompatFnWrapper<FlushFn>,
}

impl<'a> Emitter<'a> {
    /// Create an emitter over an owned, growable buffer.
    pub fn new(capacity: usize, opts: EmitterOptions) -> Self {
        Self {
            buf: CodeBuffer::with_capacity(capacity, opts.max_buffer_size),
            opts,
            flush: CompatFnWrapper(flush_none),
        }
    }

    /// Create an emitter over a caller-supplied region. The region
    /// cannot grow; exhausting it is fatal.
    pub fn with_buffer(region: &'a mut [u8], opts: EmitterOptions) -> Self {
        Self {
            buf: CodeBuffer::from_slice(region),
            opts,
            flush: CompatFnWrapper(flush_none),
        }
    }

    /// Install the platform instruction-cache flush collaborator.
    #[inline(always)]
    pub fn set_flush_fn(&mut self, f: FlushFn) {
        self.flush = CompatFnWrapper(f);
    }

    #[must_use]
    #[inline(always)]
    pub fn pc_offset(&self) -> usize {
        self.buf.pc_offset()
    }

    /// Address the instruction region currently lives at. Base for all
    /// PC-relative patching done through this emitter.
    #[must_use]
    #[inline(always)]
    pub fn base_address(&self) -> u64 {
        self.buf.base_address()
    }

    #[must_use]
    #[inline(always)]
    pub fn buffer(&self) -> &CodeBuffer<'a> {
        &self.buf
    }

    #[inline(always)]
    fn check_buffer(&mut self) {
        if self.buf.overflow() {
            self.buf.grow();
        }
    }

    /// Append one instruction word, growing first if needed. Returns
    /// the word's offset.
    #[inline]
    pub fn emit_word(&mut self, word: u32) -> usize {
        self.check_buffer();
        self.buf.emit_word(word)
    }

    /// Append a whole instruction sequence, returning its start offset.
    pub fn emit_seq(&mut self, seq: &[u32]) -> usize {
        let offset = self.pc_offset();
        for &word in seq {
            self.emit_word(word);
        }
        offset
    }

    /// Record a relocation anchored at the current cursor. Plain
    /// external references are dropped unless the emitter was
    /// configured to keep them.
    pub fn record_reloc(&mut self, mode: RelocMode, data: i64) {
        if mode == RelocMode::ExternalReference && !self.opts.record_external_references {
            return
        }
        self.check_buffer();
        self.buf.record_reloc(mode, data);
    }

    /// Finish emission: flush the instruction region once and hand the
    /// layout snapshot to the next stage.
    #[must_use]
    pub fn finish(self) -> CodeDesc<'a> {
        let instr = &self.buf.bytes()[..self.buf.pc_offset()];
        (self.flush)(instr.as_ptr(), instr.len());
        self.buf.finish()
    }

    // ----- INSTRUCTION EMISSION -----

    #[inline(always)]
    pub fn emit_add(&mut self, rd: Reg, rs1: Reg, rs2: Reg) -> usize {
        self.emit_word(encode_r(OpR::ADD, rd, rs1, rs2))
    }

    #[inline(always)]
    pub fn emit_or(&mut self, rd: Reg, rs1: Reg, rs2: Reg) -> usize {
        self.emit_word(encode_r(OpR::OR, rd, rs1, rs2))
    }

    #[inline(always)]
    pub fn emit_addi(&mut self, rd: Reg, rs: Reg, imm: i16) -> usize {
        self.emit_word(encode_i(OpI::ADDI, rd, rs, imm))
    }

    #[inline(always)]
    pub fn emit_ori(&mut self, rd: Reg, rs: Reg, imm: i16) -> usize {
        self.emit_word(encode_i(OpI::ORI, rd, rs, imm))
    }

    #[inline(always)]
    pub fn emit_jalr(&mut self, rd: Reg, rs: Reg, imm: i16) -> usize {
        self.emit_word(encode_i(OpI::JALR, rd, rs, imm))
    }

    /// Load doubleword, RV64 only.
    #[inline(always)]
    pub fn emit_ld(&mut self, rd: Reg, base: Reg, offset: i16) -> usize {
        self.emit_word(encode_i(OpI::LD, rd, base, offset))
    }

    /// Store doubleword, RV64 only.
    #[inline(always)]
    pub fn emit_sd(&mut self, base: Reg, src: Reg, offset: i16) -> usize {
        self.emit_word(encode_s(OpS::SD, base, src, offset))
    }

    #[inline(always)]
    pub fn emit_slli(&mut self, rd: Reg, rs: Reg, shamt: u8) -> usize {
        self.emit_word(encode_is(OpIS::SLLI, rd, rs, shamt, XLEN))
    }

    #[inline(always)]
    pub fn emit_srli(&mut self, rd: Reg, rs: Reg, shamt: u8) -> usize {
        self.emit_word(encode_is(OpIS::SRLI, rd, rs, shamt, XLEN))
    }

    #[inline(always)]
    pub fn emit_srai(&mut self, rd: Reg, rs: Reg, shamt: u8) -> usize {
        self.emit_word(encode_is(OpIS::SRAI, rd, rs, shamt, XLEN))
    }

    #[inline(always)]
    pub fn emit_lui(&mut self, rd: Reg, imm: i32) -> usize {
        self.emit_word(encode_u(OpU::LUI, rd, imm))
    }

    #[inline(always)]
    pub fn emit_auipc(&mut self, rd: Reg, imm: i32) -> usize {
        self.emit_word(encode_u(OpU::AUIPC, rd, imm))
    }

    // ----- PSEUDO OPS EMISSION -----

    /// No operation (ADDI x0, x0, 0)
    #[inline(always)]
    pub fn emit_nop(&mut self) -> usize {
        self.emit_addi(Reg::ZERO, Reg::ZERO, 0)
    }

    /// Move register to register (ADDI rd, rs, 0)
    #[inline(always)]
    pub fn emit_mv(&mut self, rd: Reg, rs: Reg) -> usize {
        self.emit_addi(rd, rs, 0)
    }

    /// Return from function (JALR x0, ra, 0)
    #[inline(always)]
    pub fn emit_ret(&mut self) -> usize {
        self.emit_jalr(Reg::ZERO, Reg::RA, 0)
    }

    /// Push register onto stack
    #[inline(always)]
    pub fn emit_push(&mut self, reg: Reg) -> usize {
        let offset = self.emit_addi(Reg::SP, Reg::SP, -POINTER_SIZE);
        self.emit_sd(Reg::SP, reg, 0);
        offset
    }

    /// Pop register from stack
    #[inline(always)]
    pub fn emit_pop(&mut self, reg: Reg) -> usize {
        let offset = self.emit_ld(reg, Reg::SP, 0);
        self.emit_addi(Reg::SP, Reg::SP, POINTER_SIZE);
        offset
    }

    // ----- CONSTANT LOADING -----

    /// Load a 64-bit constant with the fixed-length eight-word chain.
    /// The emitted size never depends on the value, so the site can be
    /// patched later.
    #[inline(always)]
    pub fn load_imm(&mut self, rd: Reg, j: i64) -> usize {
        let seq = imm::li64_fixed(rd, j);
        self.emit_seq(&seq)
    }

    /// Load a 32-bit constant with the fixed-length two-word chain.
    #[inline(always)]
    pub fn load_imm32(&mut self, rd: Reg, imm: i32) -> usize {
        let seq = imm::li32_fixed(rd, imm);
        self.emit_seq(&seq)
    }

    /// Load a 64-bit constant through a scratch register, fixed six
    /// words.
    #[inline(always)]
    pub fn load_imm_pair(&mut self, rd: Reg, scratch: Reg, j: i64) -> usize {
        let seq = imm::li64_fixed_pair(rd, scratch, j);
        self.emit_seq(&seq)
    }

    /// Load a 64-bit constant with as few instructions as the decision
    /// ladder finds.
    #[inline(always)]
    pub fn load_imm_smallest(&mut self, rd: Reg, j: i64) -> usize {
        let seq = imm::li64_smallest(rd, j);
        self.emit_seq(&seq)
    }

    /// Load a 64-bit constant minimally, with a scratch register
    /// available for the dense-value fallback.
    #[inline(always)]
    pub fn load_imm_smallest_pair(&mut self, rd: Reg, scratch: Reg, j: i64) -> usize {
        let seq = imm::li64_smallest_pair(rd, scratch, j);
        self.emit_seq(&seq)
    }

    /// Load a 32-bit constant with as few instructions as possible.
    #[inline(always)]
    pub fn load_imm32_smallest(&mut self, rd: Reg, imm: i32) -> usize {
        let seq = imm::li32_smallest(rd, imm);
        self.emit_seq(&seq)
    }

    // ----- PATCHABLE SEQUENCES -----

    /// Emit a patchable call: `auipc t0, 0` + `jalr ra, t0, 0`, with a
    /// code-target relocation. Returns the offset to hand to
    /// [`patch_address_at`].
    ///
    /// [`patch_address_at`]: Emitter::patch_address_at
    pub fn emit_patchable_call(&mut self) -> usize {
        self.record_reloc(RelocMode::CodeTarget, 0);
        let offset = self.emit_auipc(Reg::T0, 0);
        self.emit_jalr(Reg::RA, Reg::T0, 0);
        offset
    }

    /// Emit a patchable embedded-pointer load: `auipc rd, 0` +
    /// `ld rd, 0(rd)`.
    pub fn emit_patchable_pointer_load(&mut self, rd: Reg) -> usize {
        self.record_reloc(RelocMode::CodeTarget, 0);
        let offset = self.emit_auipc(rd, 0);
        self.emit_ld(rd, rd, 0);
        offset
    }

    // ----- PATCHING -----

    /// Rewrite the two-word pattern at `offset` to reach `target`,
    /// using this emitter's base address and flush collaborator.
    pub fn patch_address_at(&mut self, offset: usize, target: u64, flush_mode: FlushMode) {
        let base = self.base_address();
        let flush = self.flush.0;
        patch::patch_address(self.buf.bytes_mut(), offset, base, target, flush, flush_mode);
    }

    /// Read back the target encoded at `offset`.
    #[must_use]
    pub fn read_address_at(&self, offset: usize) -> u64 {
        patch::read_address(self.buf.bytes(), offset, self.base_address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::misc::word_at;

    #[test]
    fn helpers_emit_the_documented_words() {
        let mut e = Emitter::new(4096, EmitterOptions::default());
        e.emit_nop();
        e.emit_addi(Reg::A0, Reg::ZERO, 42);
        e.emit_sd(Reg::SP, Reg::A0, 0);
        e.emit_ld(Reg::S1, Reg::S2, 0);
        e.emit_ret();

        let desc = e.finish();
        let code = desc.instr_bytes();
        assert_eq!(word_at(code, 0), 0x00000013);  // nop
        assert_eq!(word_at(code, 4), 0x02A00513);  // addi a0, zero, 42
        assert_eq!(word_at(code, 8), 0x00A13023);  // sd a0, 0(sp)
        assert_eq!(word_at(code, 12), 0x00093483); // ld s1, 0(s2)
        assert_eq!(word_at(code, 16), 0x00008067); // ret
    }

    #[test]
    fn emission_grows_an_owned_buffer_transparently() {
        let mut e = Emitter::new(512, EmitterOptions::default());
        for _ in 0..1024 {
            e.emit_nop();
        }
        assert_eq!(e.pc_offset(), 4096);
        assert!(e.buffer().buffer_size() > 512);
    }

    #[test]
    #[should_panic(expected = "external code buffer is too small")]
    fn exhausting_a_borrowed_buffer_is_fatal() {
        let mut region = [0u8; 512];
        let mut e = Emitter::with_buffer(&mut region, EmitterOptions::default());
        for _ in 0..1024 {
            e.emit_nop();
        }
    }

    #[test]
    fn external_references_are_filtered_by_default() {
        let mut e = Emitter::new(4096, EmitterOptions::default());
        e.emit_nop();
        e.record_reloc(RelocMode::ExternalReference, 7);
        e.record_reloc(RelocMode::EmbeddedObject, 9);
        let desc = e.finish();
        let modes: Vec<_> = desc.reloc_entries().map(|r| r.mode).collect();
        assert_eq!(modes, [RelocMode::EmbeddedObject]);

        let mut e = Emitter::new(4096, EmitterOptions {
            record_external_references: true,
            ..EmitterOptions::default()
        });
        e.emit_nop();
        e.record_reloc(RelocMode::ExternalReference, 7);
        let desc = e.finish();
        let entries: Vec<_> = desc.reloc_entries().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mode, RelocMode::ExternalReference);
        assert_eq!(entries[0].data, 7);
        assert_eq!(entries[0].pc_offset, 4);
    }

    #[test]
    fn patchable_call_round_trips_through_the_emitter() {
        let mut e = Emitter::new(4096, EmitterOptions::default());
        e.emit_nop();
        let call = e.emit_patchable_call();

        let target = e.base_address() + 0x4000;
        e.patch_address_at(call, target, FlushMode::Skip);
        assert_eq!(e.read_address_at(call), target);
    }
}
