#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Bank {
    GP,
    FP,
}

pub fn for_each_bank(mut f: impl FnMut(Bank)) {
    f(Bank::GP);
    f(Bank::FP);
}

impl std::fmt::Display for Bank {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Bank::GP => write!(f, "GP"),
            Bank::FP => write!(f, "FP"),
        }
    }
}
