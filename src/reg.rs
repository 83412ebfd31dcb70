//! RV64 register handles
//!
//! Registers carry only their 5-bit machine code; equality is equality
//! of codes. `Reg::NONE` is the "no register" sentinel and must never
//! reach an encoder.

use core::fmt;

/// General-purpose register handle.
#[derive(Eq, Hash, Copy, Clone, PartialEq)]
pub struct Reg(u8);

/// Floating-point register handle.
#[derive(Eq, Hash, Copy, Clone, PartialEq)]
pub struct FReg(u8);

impl Reg {
    /// The "no register" sentinel, outside the encodable 0..32 range.
    pub const NONE: Reg = Reg(0xFF);

    pub const ZERO: Reg = Reg(0);
    pub const RA:   Reg = Reg(1);
    pub const SP:   Reg = Reg(2);
    pub const GP:   Reg = Reg(3);
    pub const TP:   Reg = Reg(4);
    pub const T0:   Reg = Reg(5);
    pub const T1:   Reg = Reg(6);
    pub const T2:   Reg = Reg(7);
    pub const S0:   Reg = Reg(8);
    pub const S1:   Reg = Reg(9);
    pub const A0:   Reg = Reg(10);
    pub const A1:   Reg = Reg(11);
    pub const A2:   Reg = Reg(12);
    pub const A3:   Reg = Reg(13);
    pub const A4:   Reg = Reg(14);
    pub const A5:   Reg = Reg(15);
    pub const A6:   Reg = Reg(16);
    pub const A7:   Reg = Reg(17);
    pub const S2:   Reg = Reg(18);
    pub const S3:   Reg = Reg(19);
    pub const S4:   Reg = Reg(20);
    pub const S5:   Reg = Reg(21);
    pub const S6:   Reg = Reg(22);
    pub const S7:   Reg = Reg(23);
    pub const S8:   Reg = Reg(24);
    pub const S9:   Reg = Reg(25);
    pub const S10:  Reg = Reg(26);
    pub const S11:  Reg = Reg(27);
    pub const T3:   Reg = Reg(28);
    pub const T4:   Reg = Reg(29);
    pub const T5:   Reg = Reg(30);
    pub const T6:   Reg = Reg(31);

    /// Frame pointer, the ABI alias of `S0`.
    pub const FP: Reg = Reg::S0;

    /// Construct a register from its machine code.
    ///
    /// # Examples
    ///
    /// ```
    /// use ingot::reg::Reg;
    ///
    /// assert_eq!(Reg::from_code(2), Reg::SP);
    /// assert_eq!(Reg::from_code(31), Reg::T6);
    /// ```
    #[inline(always)]
    pub const fn from_code(code: u8) -> Reg {
        assert!(code < 32, "register code out of range");
        Reg(code)
    }

    /// The 5-bit machine code of this register.
    #[must_use]
    #[inline(always)]
    pub const fn code(self) -> u32 {
        assert!(self.0 < 32, "no_reg has no machine code");
        self.0 as u32
    }

    #[must_use]
    #[inline(always)]
    pub const fn is_valid(self) -> bool {
        self.0 < 32
    }
}

impl FReg {
    /// The "no register" sentinel.
    pub const NONE: FReg = FReg(0xFF);

    pub const F0:  FReg = FReg(0);
    pub const F1:  FReg = FReg(1);
    pub const F2:  FReg = FReg(2);
    pub const F3:  FReg = FReg(3);
    pub const F4:  FReg = FReg(4);
    pub const F5:  FReg = FReg(5);
    pub const F6:  FReg = FReg(6);
    pub const F7:  FReg = FReg(7);
    pub const F8:  FReg = FReg(8);
    pub const F9:  FReg = FReg(9);
    pub const F10: FReg = FReg(10);
    pub const F11: FReg = FReg(11);
    pub const F12: FReg = FReg(12);
    pub const F13: FReg = FReg(13);
    pub const F14: FReg = FReg(14);
    pub const F15: FReg = FReg(15);
    pub const F16: FReg = FReg(16);
    pub const F17: FReg = FReg(17);
    pub const F18: FReg = FReg(18);
    pub const F19: FReg = FReg(19);
    pub const F20: FReg = FReg(20);
    pub const F21: FReg = FReg(21);
    pub const F22: FReg = FReg(22);
    pub const F23: FReg = FReg(23);
    pub const F24: FReg = FReg(24);
    pub const F25: FReg = FReg(25);
    pub const F26: FReg = FReg(26);
    pub const F27: FReg = FReg(27);
    pub const F28: FReg = FReg(28);
    pub const F29: FReg = FReg(29);
    pub const F30: FReg = FReg(30);
    pub const F31: FReg = FReg(31);

    #[inline(always)]
    pub const fn from_code(code: u8) -> FReg {
        assert!(code < 32, "register code out of range");
        FReg(code)
    }

    #[must_use]
    #[inline(always)]
    pub const fn code(self) -> u32 {
        assert!(self.0 < 32, "no_freg has no machine code");
        self.0 as u32
    }

    #[must_use]
    #[inline(always)]
    pub const fn is_valid(self) -> bool {
        self.0 < 32
    }
}

const GP_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2",
    "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
    "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7",
    "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

impl fmt::Debug for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", GP_NAMES[self.0 as usize])
        } else {
            write!(f, "no_reg")
        }
    }
}

impl fmt::Debug for FReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "f{}", self.0)
        } else {
            write!(f, "no_freg")
        }
    }
}
