use crate::bank::Bank;

pub const NUMBER_OF_GPRS: usize = 16;
pub const NUMBER_OF_FPRS: usize = 16;

/// Reg is a polymorphic register structure. It can refer to either integer or
/// float registers. Internally a register is a dense index: GPRs occupy
/// `0..NUMBER_OF_GPRS`, FPRs the range above that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg {
    index: u8,
}

impl Reg {
    const fn invalid() -> u8 {
        (1 << 7) - 1
    }

    pub const fn from_index(index: u8) -> Reg {
        Reg { index }
    }

    pub const fn new_gpr(gpr: u8) -> Reg {
        Reg { index: gpr }
    }

    pub const fn new_fpr(fpr: u8) -> Reg {
        Reg {
            index: fpr + NUMBER_OF_GPRS as u8,
        }
    }

    pub const fn index(self) -> usize {
        self.index as usize
    }

    pub const fn is_set(self) -> bool {
        self.index != Self::invalid()
    }

    pub const fn is_gpr(self) -> bool {
        (self.index as usize) < NUMBER_OF_GPRS
    }

    pub const fn is_fpr(self) -> bool {
        (self.index as usize).wrapping_sub(NUMBER_OF_GPRS) < NUMBER_OF_FPRS
    }

    pub const fn gpr(self) -> u8 {
        self.index
    }

    pub const fn fpr(self) -> u8 {
        self.index - NUMBER_OF_GPRS as u8
    }

    pub fn bank(self) -> Bank {
        if self.is_gpr() {
            Bank::GP
        } else {
            Bank::FP
        }
    }
}

impl Default for Reg {
    fn default() -> Self {
        Reg {
            index: Self::invalid(),
        }
    }
}

const GPR_NAMES: [&str; NUMBER_OF_GPRS] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];

const FPR_NAMES: [&str; NUMBER_OF_FPRS] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10",
    "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
];

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_set() {
            write!(f, "<invalid>")
        } else if self.is_gpr() {
            write!(f, "%{}", GPR_NAMES[self.gpr() as usize])
        } else {
            write!(f, "%{}", FPR_NAMES[self.fpr() as usize])
        }
    }
}

// The allocation priority puts volatile registers first so that short live
// ranges do not pin down callee-saves. The stack and frame pointers are not
// allocatable.
const GP_PRIORITY: [Reg; 14] = [
    Reg::new_gpr(0),  // rax
    Reg::new_gpr(1),  // rcx
    Reg::new_gpr(2),  // rdx
    Reg::new_gpr(6),  // rsi
    Reg::new_gpr(7),  // rdi
    Reg::new_gpr(8),
    Reg::new_gpr(9),
    Reg::new_gpr(10),
    Reg::new_gpr(11),
    Reg::new_gpr(3),  // rbx
    Reg::new_gpr(12),
    Reg::new_gpr(13),
    Reg::new_gpr(14),
    Reg::new_gpr(15),
];

const FP_PRIORITY: [Reg; 16] = [
    Reg::new_fpr(0),
    Reg::new_fpr(1),
    Reg::new_fpr(2),
    Reg::new_fpr(3),
    Reg::new_fpr(4),
    Reg::new_fpr(5),
    Reg::new_fpr(6),
    Reg::new_fpr(7),
    Reg::new_fpr(8),
    Reg::new_fpr(9),
    Reg::new_fpr(10),
    Reg::new_fpr(11),
    Reg::new_fpr(12),
    Reg::new_fpr(13),
    Reg::new_fpr(14),
    Reg::new_fpr(15),
];

pub fn regs_in_priority_order(bank: Bank) -> &'static [Reg] {
    match bank {
        Bank::GP => &GP_PRIORITY,
        Bank::FP => &FP_PRIORITY,
    }
}
