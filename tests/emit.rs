//! End-to-end emission tests: whole code objects built through the
//! emitter, then decoded back word by word.

use ingot::emit::{Emitter, EmitterOptions};
use ingot::encode::{decode_i_imm, decode_rd, decode_rs1, decode_s_imm, decode_u_imm};
use ingot::frame::{FrameKind, STANDARD_FRAME};
use ingot::op::{self, OpI, OpS, OpU};
use ingot::patch::{self, FlushMode};
use ingot::reg::Reg;
use ingot::reloc::RelocMode;
use ingot::util::misc::word_at;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn prologue_call_epilogue_scenario() {
    init_logging();

    let mut e = Emitter::new(4096, EmitterOptions::default());
    e.enter_frame(FrameKind::Standard, &STANDARD_FRAME, 2, None);
    let call = e.emit_patchable_call();
    e.leave_frame(&STANDARD_FRAME);

    let target = e.base_address() + call as u64 + 16;
    e.patch_address_at(call, target, FlushMode::Skip);

    let desc = e.finish();
    let code = desc.instr_bytes();
    assert_eq!(desc.instr_size(), 10 * 4);

    // stack-pointer decrement
    let w = word_at(code, 0);
    assert!(op::is_i(w, OpI::ADDI));
    assert_eq!(decode_rd(w), Reg::SP);
    assert_eq!(decode_rs1(w), Reg::SP);
    assert_eq!(decode_i_imm(w), -24);

    // the two stores: return address, then frame pointer
    let w = word_at(code, 4);
    assert_eq!(w & op::OP_I_MASK, OpS::SD.as_u32());
    assert_eq!(decode_rs1(w), Reg::SP);
    assert_eq!(decode_s_imm(w), 16);

    let w = word_at(code, 8);
    assert_eq!(w & op::OP_I_MASK, OpS::SD.as_u32());
    assert_eq!(decode_s_imm(w), 8);

    // marker materialization and store
    assert_eq!(word_at(code, 12), 0x00200F93); // addi t6, zero, 2
    assert_eq!(word_at(code, 16), 0x01F13023); // sd t6, 0(sp)

    // the patched call pair: auipc + jalr, reaching 16 bytes ahead
    let w = word_at(code, call);
    assert!(op::is_u(w, OpU::AUIPC));
    assert_eq!(decode_rd(w), Reg::T0);
    assert_eq!(decode_u_imm(w), 0);
    let w = word_at(code, call + 4);
    assert!(op::is_i(w, OpI::JALR));
    assert_eq!(decode_rd(w), Reg::RA);
    assert_eq!(decode_i_imm(w), 16);
    assert_eq!(
        patch::read_address(code, call, desc.base_address()),
        target
    );

    // the two epilogue loads, through the old frame pointer
    let w = word_at(code, 32);
    assert!(op::is_i(w, OpI::LD));
    assert_eq!(decode_rd(w), Reg::RA);
    assert_eq!(decode_rs1(w), Reg::FP);
    assert_eq!(decode_i_imm(w), 8);
    let w = word_at(code, 36);
    assert!(op::is_i(w, OpI::LD));
    assert_eq!(decode_rd(w), Reg::FP);
    assert_eq!(decode_i_imm(w), 0);

    // call pattern bookkeeping for stack walkers
    let return_address = target - 16 + 8;
    assert_eq!(
        patch::call_site_from_return_address(return_address),
        desc.base_address() + call as u64
    );
}

#[test]
fn growth_keeps_every_instruction_and_relocation() {
    init_logging();

    let mut e = Emitter::new(512, EmitterOptions::default());
    for i in 0..200i64 {
        e.record_reloc(RelocMode::EmbeddedObject, i);
        e.load_imm(Reg::A0, 0x1234_5678_9ABC_DEF0 ^ i);
    }
    let desc = e.finish();

    assert_eq!(desc.instr_size(), 200 * 8 * 4);
    assert!(desc.buffer_size() > 512);

    // every load site still decodes to a lui at its original offset
    for i in 0..200usize {
        let w = word_at(desc.instr_bytes(), i * 32);
        assert!(op::is_u(w, OpU::LUI), "load {i} lost its lui: {w:#010x}");
    }

    let entries: Vec<_> = desc.reloc_entries().collect();
    assert_eq!(entries.len(), 200);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.mode, RelocMode::EmbeddedObject);
        assert_eq!(entry.pc_offset, i * 32);
        assert_eq!(entry.data, i as i64);
    }
}

#[test]
fn patching_installed_code_by_offset() {
    init_logging();

    let mut e = Emitter::new(4096, EmitterOptions::default());
    let site = e.emit_patchable_pointer_load(Reg::A1);
    e.emit_ret();
    let mut desc = e.finish();

    // the next pipeline stage patches through the descriptor
    let base = desc.base_address();
    patch::patch_address(
        desc.instr_bytes_mut(),
        site,
        base,
        base + 0x2000,
        ingot::flush_none,
        FlushMode::FlushIfNeeded,
    );
    assert_eq!(
        patch::read_pointer_address(desc.instr_bytes(), site, base),
        base + 0x2000
    );

    let relocs: Vec<_> = desc.reloc_entries().collect();
    assert_eq!(relocs.len(), 1);
    assert_eq!(relocs[0].mode, RelocMode::CodeTarget);
    assert_eq!(relocs[0].pc_offset, site);
}
