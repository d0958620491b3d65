use tinyvec::TinyVec;

use crate::bank::Bank;

use super::{
    arg::{Arg, ArgRole},
    opcode::Opcode,
    tmp::Tmp,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub opcode: Opcode,
    pub args: TinyVec<[Arg; 3]>,
}

impl Default for Inst {
    fn default() -> Self {
        Inst {
            opcode: Opcode::Oops,
            args: TinyVec::new(),
        }
    }
}

impl Inst {
    pub fn new(opcode: Opcode, arguments: &[Arg]) -> Self {
        debug_assert_eq!(opcode.forms().len(), arguments.len());
        Inst {
            opcode,
            args: arguments.iter().copied().collect(),
        }
    }

    pub fn admits_stack(&self, arg_index: usize) -> bool {
        self.opcode.admits_stack(arg_index)
    }

    pub fn for_each_arg(&self, mut f: impl FnMut(usize, &Arg, ArgRole, Bank)) {
        let forms = self.opcode.forms();
        debug_assert_eq!(forms.len(), self.args.len());
        for (index, (arg, &(role, bank))) in self.args.iter().zip(forms).enumerate() {
            f(index, arg, role, bank);
        }
    }

    pub fn for_each_arg_mut(&mut self, mut f: impl FnMut(usize, &mut Arg, ArgRole, Bank)) {
        let forms = self.opcode.forms();
        debug_assert_eq!(forms.len(), self.args.len());
        for (index, (arg, &(role, bank))) in self.args.iter_mut().zip(forms).enumerate() {
            f(index, arg, role, bank);
        }
    }

    pub fn for_each_tmp(&self, mut f: impl FnMut(Tmp, ArgRole, Bank)) {
        self.for_each_arg(|_, arg, role, bank| {
            arg.for_each_tmp(role, bank, |tmp, role, bank| f(tmp, role, bank))
        })
    }

    pub fn for_each_tmp_mut(&mut self, mut f: impl FnMut(&mut Tmp, ArgRole, Bank)) {
        self.for_each_arg_mut(|_, arg, role, bank| {
            arg.for_each_tmp_mut(role, bank, |tmp, role, bank| f(tmp, role, bank))
        })
    }

    pub fn for_each_tmp_fast(&self, mut f: impl FnMut(Tmp)) {
        for arg in self.args.iter() {
            arg.for_each_tmp_fast(|tmp| f(tmp));
        }
    }

    pub fn for_each_tmp_fast_mut(&mut self, mut f: impl FnMut(&mut Tmp)) {
        for arg in self.args.iter_mut() {
            arg.for_each_tmp_fast_mut(|tmp| f(tmp));
        }
    }
}

impl std::fmt::Display for Inst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i == 0 {
                write!(f, " ")?;
            } else {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        Ok(())
    }
}
