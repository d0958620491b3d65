use crate::{
    bank::Bank,
    jit::reg::{Reg, NUMBER_OF_FPRS, NUMBER_OF_GPRS},
};

use super::code::Code;

/// A Tmp is a generalization of a register. It can refer to any GPR or FPR, or
/// to an unallocated temporary. We use deliberately terse naming since this
/// name shows up everywhere.
///
/// The encoding is a signed integer: zero is the empty Tmp, positive values
/// are GP and negative values are FP. Within a bank, the machine registers
/// occupy the magnitudes closest to zero and allocatable temporaries sit above
/// them, so the magnitude doubles as a dense per-bank index with precolored
/// registers in the low slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tmp {
    value: i32,
}

impl Tmp {
    const fn encode_gp(index: usize) -> i32 {
        1 + index as i32
    }

    const fn encode_fp(index: usize) -> i32 {
        -1 - index as i32
    }

    const fn encode_gp_tmp(index: usize) -> i32 {
        Self::encode_gp(NUMBER_OF_GPRS - 1) + 1 + index as i32
    }

    const fn encode_fp_tmp(index: usize) -> i32 {
        Self::encode_fp(NUMBER_OF_FPRS - 1) - 1 - index as i32
    }

    pub const fn empty() -> Self {
        Tmp { value: 0 }
    }

    pub const fn from_reg(reg: Reg) -> Self {
        if reg.is_gpr() {
            Tmp {
                value: Self::encode_gp(reg.gpr() as usize),
            }
        } else {
            Tmp {
                value: Self::encode_fp(reg.fpr() as usize),
            }
        }
    }

    pub const fn gp_tmp_for_index(index: usize) -> Self {
        Tmp {
            value: Self::encode_gp_tmp(index),
        }
    }

    pub const fn fp_tmp_for_index(index: usize) -> Self {
        Tmp {
            value: Self::encode_fp_tmp(index),
        }
    }

    pub const fn tmp_for_index(bank: Bank, index: usize) -> Self {
        match bank {
            Bank::GP => Self::gp_tmp_for_index(index),
            Bank::FP => Self::fp_tmp_for_index(index),
        }
    }

    pub const fn is_set(self) -> bool {
        self.value != 0
    }

    pub const fn is_gp(self) -> bool {
        self.value > 0
    }

    pub const fn is_fp(self) -> bool {
        self.value < 0
    }

    pub const fn is_gpr(self) -> bool {
        self.value >= 1 && self.value <= NUMBER_OF_GPRS as i32
    }

    pub const fn is_fpr(self) -> bool {
        self.value <= -1 && self.value >= -(NUMBER_OF_FPRS as i32)
    }

    pub const fn is_reg(self) -> bool {
        self.is_gpr() || self.is_fpr()
    }

    pub fn bank(self) -> Bank {
        debug_assert!(self.is_set());
        if self.is_gp() {
            Bank::GP
        } else {
            Bank::FP
        }
    }

    pub fn reg(self) -> Reg {
        debug_assert!(self.is_reg());
        if self.is_gpr() {
            Reg::new_gpr((self.value - 1) as u8)
        } else {
            Reg::new_fpr((-self.value - 1) as u8)
        }
    }

    pub fn gp_tmp_index(self) -> usize {
        debug_assert!(self.is_gp() && !self.is_reg());
        (self.value - 1) as usize - NUMBER_OF_GPRS
    }

    pub fn fp_tmp_index(self) -> usize {
        debug_assert!(self.is_fp() && !self.is_reg());
        (-self.value - 1) as usize - NUMBER_OF_FPRS
    }

    pub const fn internal_value(self) -> i32 {
        self.value
    }

    /// A dense index over both banks: all GP absolute indices first, then the
    /// FP ones shifted past them. Used when one structure spans both banks.
    pub fn linear_index(self, code: &Code) -> usize {
        if self.is_gp() {
            GpIndexing::absolute_index(self)
        } else {
            GpIndexing::absolute_index_for_tmp_index(code.num_gp_tmps)
                + FpIndexing::absolute_index(self)
        }
    }

    pub fn tmp_for_linear_index(code: &Code, index: usize) -> Tmp {
        let gp_end = GpIndexing::absolute_index_for_tmp_index(code.num_gp_tmps);
        if index < gp_end {
            GpIndexing::tmp_for_absolute_index(index)
        } else {
            FpIndexing::tmp_for_absolute_index(index - gp_end)
        }
    }

    pub fn linear_index_end(code: &Code) -> usize {
        GpIndexing::absolute_index_for_tmp_index(code.num_gp_tmps)
            + FpIndexing::absolute_index_for_tmp_index(code.num_fp_tmps)
    }
}

impl std::fmt::Display for Tmp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_set() {
            write!(f, "<empty>")
        } else if self.is_reg() {
            write!(f, "{}", self.reg())
        } else if self.is_gp() {
            write!(f, "%tmp{}", self.gp_tmp_index())
        } else {
            write!(f, "%ftmp{}", self.fp_tmp_index())
        }
    }
}

/// The speed of the allocator depends directly on how fast it can query
/// information associated with a Tmp. Hashing would be a performance bug;
/// instead, Tmps of one bank index directly into arrays through their
/// *absolute index*: magnitude of the encoded value, so machine registers
/// occupy `1..=number_of_registers` and allocatable temporaries follow. Index
/// zero is the empty Tmp and is never used.
///
/// Implemented once per bank; the allocator is generic over the
/// implementation, which is how it gets monomorphized per bank without
/// sharing any state between the banks.
pub trait AbsoluteIndexing: Copy {
    const BANK: Bank;

    fn absolute_index(tmp: Tmp) -> usize;
    fn absolute_index_for_tmp_index(index: usize) -> usize;
    fn tmp_for_absolute_index(index: usize) -> Tmp;
    fn last_machine_register_index() -> usize;
}

#[derive(Clone, Copy)]
pub struct GpIndexing;

#[derive(Clone, Copy)]
pub struct FpIndexing;

impl AbsoluteIndexing for GpIndexing {
    const BANK: Bank = Bank::GP;

    fn absolute_index(tmp: Tmp) -> usize {
        debug_assert!(tmp.is_gp());
        tmp.internal_value() as usize
    }

    fn absolute_index_for_tmp_index(index: usize) -> usize {
        Self::absolute_index(Tmp::gp_tmp_for_index(index))
    }

    fn tmp_for_absolute_index(index: usize) -> Tmp {
        Tmp {
            value: index as i32,
        }
    }

    fn last_machine_register_index() -> usize {
        NUMBER_OF_GPRS
    }
}

impl AbsoluteIndexing for FpIndexing {
    const BANK: Bank = Bank::FP;

    fn absolute_index(tmp: Tmp) -> usize {
        debug_assert!(tmp.is_fp());
        (-tmp.internal_value()) as usize
    }

    fn absolute_index_for_tmp_index(index: usize) -> usize {
        Self::absolute_index(Tmp::fp_tmp_for_index(index))
    }

    fn tmp_for_absolute_index(index: usize) -> Tmp {
        Tmp {
            value: -(index as i32),
        }
    }

    fn last_machine_register_index() -> usize {
        NUMBER_OF_FPRS
    }
}
