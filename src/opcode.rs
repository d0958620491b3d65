/// Opcodes of the mid-level IR. Only what the constant-motion pass and its
/// clients need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    Nop,
    Const32,
    Const64,
    ConstFloat,
    ConstDouble,
    Load,
    Add,
    Return,
}

impl Opcode {
    pub fn is_constant(self) -> bool {
        matches!(
            self,
            Opcode::Const32 | Opcode::Const64 | Opcode::ConstFloat | Opcode::ConstDouble
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
