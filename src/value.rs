use tinyvec::TinyVec;

use crate::{opcode::Opcode, typ::Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

impl Default for ValueId {
    fn default() -> Self {
        ValueId(usize::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueData {
    None,
    Const32(i32),
    Const64(i64),
    ConstFloat(f32),
    ConstDouble(f64),
    /// For memory-accessing values: the offset added to the address child.
    Memory {
        offset: i32,
    },
}

#[derive(Debug, Clone)]
pub struct Value {
    pub index: usize,
    pub kind: Opcode,
    pub typ: Type,
    pub children: TinyVec<[ValueId; 2]>,
    pub data: ValueData,
}

impl Value {
    pub fn new(kind: Opcode, typ: Type, children: &[ValueId], data: ValueData) -> Value {
        Value {
            index: usize::MAX,
            kind,
            typ,
            children: children.iter().copied().collect(),
            data,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.kind.is_constant()
    }

    pub fn has_int(&self) -> bool {
        matches!(self.data, ValueData::Const32(_) | ValueData::Const64(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.data {
            ValueData::Const32(value) => Some(value as i64),
            ValueData::Const64(value) => Some(value),
            _ => None,
        }
    }

    pub fn representable_as_i32(&self) -> bool {
        match self.as_int() {
            Some(value) => value as i32 as i64 == value,
            None => false,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self.data {
            ValueData::ConstFloat(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self.data {
            ValueData::ConstDouble(value) => Some(value),
            _ => None,
        }
    }

    pub fn memory_offset(&self) -> Option<i32> {
        match self.data {
            ValueData::Memory { offset } => Some(offset),
            _ => None,
        }
    }

    /// The deduplication key of a constant: opcode, type, and bit pattern.
    /// Distinct bit patterns are distinct constants, so -0.0 and +0.0 do not
    /// collapse.
    pub fn key(&self) -> Option<ValueKey> {
        let bits = match self.data {
            ValueData::Const32(value) => value as i64,
            ValueData::Const64(value) => value,
            ValueData::ConstFloat(value) => value.to_bits() as i64,
            ValueData::ConstDouble(value) => value.to_bits() as i64,
            _ => return None,
        };
        if !self.is_constant() {
            return None;
        }
        Some(ValueKey {
            kind: self.kind,
            typ: self.typ,
            bits,
        })
    }

    pub fn replace_with_nop(&mut self) {
        self.kind = Opcode::Nop;
        self.typ = Type::Void;
        self.children.clear();
        self.data = ValueData::None;
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} = {}.{}", self.index, self.kind, self.typ)?;
        for (i, child) in self.children.iter().enumerate() {
            if i == 0 {
                write!(f, " ")?;
            } else {
                write!(f, ", ")?;
            }
            write!(f, "v{}", child.0)?;
        }
        match self.data {
            ValueData::None => Ok(()),
            ValueData::Const32(value) => write!(f, " ${}", value),
            ValueData::Const64(value) => write!(f, " ${}", value),
            ValueData::ConstFloat(value) => write!(f, " ${}", value),
            ValueData::ConstDouble(value) => write!(f, " ${}", value),
            ValueData::Memory { offset } => write!(f, " [offset {}]", offset),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueKey {
    pub kind: Opcode,
    pub typ: Type,
    pub bits: i64,
}

impl ValueKey {
    pub fn new(kind: Opcode, typ: Type, bits: i64) -> ValueKey {
        ValueKey { kind, typ, bits }
    }

    pub fn value(&self) -> i64 {
        self.bits
    }

    /// Rebuilds the constant this key stands for.
    pub fn materialize(&self) -> Value {
        let data = match self.kind {
            Opcode::Const32 => ValueData::Const32(self.bits as i32),
            Opcode::Const64 => ValueData::Const64(self.bits),
            Opcode::ConstFloat => ValueData::ConstFloat(f32::from_bits(self.bits as u32)),
            Opcode::ConstDouble => ValueData::ConstDouble(f64::from_bits(self.bits as u64)),
            _ => panic!("cannot materialize non-constant key"),
        };
        Value::new(self.kind, self.typ, &[], data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_distinguish_bit_patterns() {
        let plus_zero = Value::new(
            Opcode::ConstDouble,
            Type::Double,
            &[],
            ValueData::ConstDouble(0.0),
        );
        let minus_zero = Value::new(
            Opcode::ConstDouble,
            Type::Double,
            &[],
            ValueData::ConstDouble(-0.0),
        );
        assert_ne!(plus_zero.key().unwrap(), minus_zero.key().unwrap());
        assert_eq!(plus_zero.key().unwrap().value(), 0);
    }

    #[test]
    fn key_materialize_roundtrip() {
        let value = Value::new(
            Opcode::ConstDouble,
            Type::Double,
            &[],
            ValueData::ConstDouble(3.25),
        );
        let key = value.key().unwrap();
        assert_eq!(key.materialize().as_double(), Some(3.25));
    }
}
