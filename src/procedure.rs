use crate::{
    data_section::DataSection,
    opcode::Opcode,
    typ::Type,
    value::{Value, ValueData, ValueId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

pub struct Block {
    pub index: usize,
    pub values: Vec<ValueId>,
}

/// The mid-level IR of one procedure: a value graph partitioned into basic
/// blocks, plus the data sections the compiler allocates on its behalf.
pub struct Procedure {
    pub values: Vec<Value>,
    pub blocks: Vec<Block>,
    pub data_sections: Vec<DataSection>,
}

impl Procedure {
    pub fn new() -> Self {
        Procedure {
            values: Vec::new(),
            blocks: Vec::new(),
            data_sections: Vec::new(),
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block {
            index: id.0,
            values: Vec::new(),
        });
        id
    }

    pub fn add(&mut self, mut value: Value) -> ValueId {
        let id = ValueId(self.values.len());
        value.index = id.0;
        self.values.push(value);
        id
    }

    /// Appends a fresh value to the end of a block.
    pub fn add_to_block(&mut self, block: BlockId, value: Value) -> ValueId {
        let id = self.add(value);
        self.block_mut(block).values.push(id);
        id
    }

    pub fn add_int_constant(&mut self, typ: Type, value: i64) -> ValueId {
        let data = match typ {
            Type::Int32 => ValueData::Const32(value as i32),
            Type::Int64 => ValueData::Const64(value),
            _ => panic!("not an integer type: {}", typ),
        };
        let kind = match typ {
            Type::Int32 => Opcode::Const32,
            _ => Opcode::Const64,
        };
        self.add(Value::new(kind, typ, &[], data))
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id.0]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    pub fn add_data_section(&mut self, size: usize) -> usize {
        self.data_sections.push(DataSection::new(size));
        self.data_sections.len() - 1
    }

    pub fn data_section(&self, index: usize) -> &DataSection {
        &self.data_sections[index]
    }

    pub fn data_section_mut(&mut self, index: usize) -> &mut DataSection {
        &mut self.data_sections[index]
    }
}

impl Default for Procedure {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for block in self.blocks.iter() {
            writeln!(f, "BB{}:", block.index)?;
            for &value in block.values.iter() {
                writeln!(f, "    {}", self.value(value))?;
            }
        }
        Ok(())
    }
}
