//! Constant materialization sequences (`li` expansion)
//!
//! Two families over the same inputs. The `*_fixed` builders always
//! produce the maximum-length chain for their width, so the emitted
//! code has a predictable size and can be patched later. The
//! `*_smallest` builders pick the shortest chain that reproduces the
//! value exactly, driven by the bit structure of the constant.
//!
//! All splice stages use sign-compensated ADDI chunks: an ORI whose
//! chunk has bit 11 set would smear its sign extension over the upper
//! bits already in the register.

use crate::util::misc;
use crate::reg::Reg;
use crate::op::{OpI, OpIS, OpU};
use crate::encode::{encode_i, encode_is, encode_u, Xlen};

use smallvec::SmallVec;

/// Longest chain any builder produces: the fixed 64-bit load.
pub const MAX_LOAD_SEQUENCE_WORDS: usize = 8;

/// An instruction-word sequence, inline up to the longest chain.
pub type LoadSeq = SmallVec<[u32; MAX_LOAD_SEQUENCE_WORDS]>;

/// Split off the sign-extended low 12 bits of `j`.
///
/// Returns `(rest, lo)` with `j == (rest << 12) + lo` and
/// `-2048 <= lo <= 2047`.
#[inline(always)]
const fn split12(j: i64) -> (i64, i16) {
    let lo = misc::sext12(j & 0xfff);
    // wrapping keeps the identity j == (rest << 12) + lo mod 2^64,
    // which is the arithmetic the register chain performs
    (j.wrapping_sub(lo as i64) >> 12, lo as i16)
}

#[inline(always)]
fn slli(rd: Reg, shamt: u8) -> u32 {
    encode_is(OpIS::SLLI, rd, rd, shamt, Xlen::Rv64)
}

/// Load a 32-bit constant with a fixed-length, two-word chain:
/// `lui` of the rounded upper part, then `addiw` of the signed rest.
///
/// # Examples
///
/// ```
/// use ingot::reg::Reg;
/// use ingot::imm::li32_fixed;
///
/// let seq = li32_fixed(Reg::A1, 0x12345);
/// assert_eq!(seq.as_slice(), [
///     0x000125B7, // lui   a1, 0x12
///     0x3455859B, // addiw a1, a1, 0x345
/// ]);
/// ```
pub fn li32_fixed(rd: Reg, imm: i32) -> LoadSeq {
    let mut seq = LoadSeq::new();

    let lo = misc::sext12((imm & 0xfff) as i64);
    // rounding carry keeps the addiw rest inside 12 signed bits; the
    // upper field wraps mod 2^20, which addiw's 32-bit wrap absorbs
    let hi = (imm.wrapping_add(0x800) >> 12) & 0xfffff;
    let hi = if hi >= 0x80000 { hi - 0x100000 } else { hi };

    seq.push(encode_u(OpU::LUI, rd, hi));
    seq.push(encode_i(OpI::ADDIW, rd, rd, lo as i16));

    seq
}

/// Load a 32-bit constant with as few words as possible: one `addi`
/// from zero when the value fits 12 signed bits, otherwise `lui`
/// followed by `addiw` only when a low part remains.
///
/// # Examples
///
/// ```
/// use ingot::reg::Reg;
/// use ingot::imm::li32_smallest;
///
/// let seq = li32_smallest(Reg::A0, 42);
/// assert_eq!(seq.as_slice(), [0x02A00513]); // addi a0, zero, 42
///
/// let seq = li32_smallest(Reg::A0, 0x7F000);
/// assert_eq!(seq.as_slice(), [0x0007F537]); // lui a0, 0x7F
/// ```
pub fn li32_smallest(rd: Reg, imm: i32) -> LoadSeq {
    let mut seq = LoadSeq::new();

    if misc::fits_into_12_bits(imm) {
        seq.push(encode_i(OpI::ADDI, rd, Reg::ZERO, imm as i16));
        return seq
    }

    let lo = misc::sext12((imm & 0xfff) as i64);
    let hi = (imm.wrapping_add(0x800) >> 12) & 0xfffff;
    let hi = if hi >= 0x80000 { hi - 0x100000 } else { hi };

    seq.push(encode_u(OpU::LUI, rd, hi));
    if lo != 0 {
        seq.push(encode_i(OpI::ADDIW, rd, rd, lo as i16));
    }

    seq
}

/// Load a 64-bit constant with a fixed-length, eight-word chain:
/// `lui`, `addi`, then three `slli`/`addi` splice stages of 12 bits
/// each, built from sign-compensated splits so the chain is exact for
/// every input.
pub fn li64_fixed(rd: Reg, j: i64) -> LoadSeq {
    let mut seq = LoadSeq::new();

    let (j1, c1) = split12(j);
    let (j2, c2) = split12(j1);
    let (j3, c3) = split12(j2);
    let (hi, c4) = split12(j3);
    debug_assert!{
        (-524288..524288).contains(&hi),
        "upper field of fixed 64-bit load out of lui range: {hi}"
    };

    seq.push(encode_u(OpU::LUI, rd, hi as i32));
    seq.push(encode_i(OpI::ADDI, rd, rd, c4));
    for c in [c3, c2, c1] {
        seq.push(slli(rd, 12));
        seq.push(encode_i(OpI::ADDI, rd, rd, c));
    }

    seq
}

/// Load a 64-bit constant using a scratch register, with a fixed
/// six-word chain: the carry-compensated high half into `rd`, shifted
/// up, the sign-extended low half into `scratch`, then one `add`.
pub fn li64_fixed_pair(rd: Reg, scratch: Reg, j: i64) -> LoadSeq {
    use crate::op::OpR;
    use crate::encode::encode_r;

    assert!(rd != scratch, "scratch register must differ from destination");

    let lo = j as i32;
    // adding sext(lo) later means the high half must absorb the borrow
    let hi = ((j >> 32) as i32).wrapping_add((lo < 0) as i32);

    let mut seq = li32_fixed(rd, hi);
    seq.push(slli(rd, 32));
    seq.extend_from_slice(&li32_fixed(scratch, lo));
    seq.push(encode_r(OpR::ADD, rd, rd, scratch));

    seq
}

/// Load a 64-bit constant with as few words as the decision ladder
/// finds, falling back to the fixed chain for dense values.
///
/// The ladder inspects `trailing`/`leading` zero counts and the solid
/// span between them, in the rungs 12/20/32/44/56. Every rung guards
/// its own representability and falls through to the next when a slice
/// cannot be recursed on, so the result is bit-exact for every input
/// and never longer than [`li64_fixed`].
///
/// # Examples
///
/// ```
/// use ingot::reg::Reg;
/// use ingot::imm::li64_smallest;
///
/// // a single bit far up: ori + slli
/// let seq = li64_smallest(Reg::A0, 1 << 40);
/// assert_eq!(seq.as_slice(), [
///     0x00106513, // ori  a0, zero, 1
///     0x02851513, // slli a0, a0, 40
/// ]);
///
/// // dense 64-bit patterns take the full fixed chain
/// assert_eq!(li64_smallest(Reg::A0, 0x1234_5678_9ABC_DEF0).len(), 8);
/// ```
pub fn li64_smallest(rd: Reg, j: i64) -> LoadSeq {
    if misc::fits_into_12_bits(j) {
        let mut seq = LoadSeq::new();
        seq.push(encode_i(OpI::ADDI, rd, Reg::ZERO, j as i16));
        return seq
    }
    if let Ok(j32) = i32::try_from(j) {
        return li32_smallest(rd, j32)
    }

    let u = j as u64;
    let trailing = u.trailing_zeros();
    let leading = u.leading_zeros();
    let solid = 64 - trailing - leading;

    if solid <= 11 {
        // a short positive chunk shifted into place
        let mut seq = LoadSeq::new();
        seq.push(encode_i(OpI::ORI, rd, Reg::ZERO, (u >> trailing) as i16));
        seq.push(slli(rd, trailing as u8));
        return seq
    }

    if solid <= 20 && trailing >= 12 && (u >> trailing) < (1 << 19) {
        // the span lands in lui's field without touching its sign bit
        let mut seq = LoadSeq::new();
        seq.push(encode_u(OpU::LUI, rd, (u >> trailing) as i32));
        if trailing > 12 {
            seq.push(slli(rd, (trailing - 12) as u8));
        }
        return seq
    }

    if solid <= 32 {
        if let Ok(w32) = i32::try_from((u >> trailing) as i64) {
            let mut seq = li32_smallest(rd, w32);
            seq.push(slli(rd, trailing as u8));
            return seq
        }
    }

    if solid <= 44 {
        // one 12-bit splice stage on top of a 32-bit slice
        let (rest, c) = split12((u >> trailing) as i64);
        if let Ok(r32) = i32::try_from(rest) {
            let mut seq = li32_smallest(rd, r32);
            seq.push(slli(rd, 12));
            seq.push(encode_i(OpI::ADDI, rd, rd, c));
            if trailing > 0 {
                seq.push(slli(rd, trailing as u8));
            }
            return seq
        }
    }

    if solid <= 56 {
        // two splice stages
        let (r1, c1) = split12((u >> trailing) as i64);
        let (r2, c2) = split12(r1);
        if let Ok(r32) = i32::try_from(r2) {
            let mut seq = li32_smallest(rd, r32);
            seq.push(slli(rd, 12));
            seq.push(encode_i(OpI::ADDI, rd, rd, c2));
            seq.push(slli(rd, 12));
            seq.push(encode_i(OpI::ADDI, rd, rd, c1));
            if trailing > 0 {
                seq.push(slli(rd, trailing as u8));
            }
            return seq
        }
    }

    li64_fixed(rd, j)
}

/// Like [`li64_smallest`], with a scratch register available: dense
/// values fall back to the six-word scratch chain instead of the
/// eight-word single-register one.
pub fn li64_smallest_pair(rd: Reg, scratch: Reg, j: i64) -> LoadSeq {
    let seq = li64_smallest(rd, j);
    if seq.len() <= 6 {
        return seq
    }
    li64_fixed_pair(rd, scratch, j)
}
