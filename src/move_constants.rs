//! Moves large constants out of line. Constants that cannot be materialized
//! as instruction immediates get exactly one materialization per basic block,
//! inserted just before their first user; the non-zero floating-point ones
//! additionally live in a shared read-only table and materialize as loads
//! from it.

use std::collections::HashMap;

use indexmap::IndexMap;
use log::debug;

use crate::{
    insertion_set::InsertionSet,
    opcode::Opcode,
    procedure::{BlockId, Procedure},
    typ::Type,
    utils::phase_scope::phase_scope,
    value::{Value, ValueData, ValueId, ValueKey},
};

pub fn move_constants(proc: &mut Procedure) {
    phase_scope("move_constants", || {
        MoveConstants {
            proc,
            insertion_set: InsertionSet::new(),
            const_table: IndexMap::new(),
            constants: HashMap::new(),
            to_remove: Vec::new(),
            data_section: usize::MAX,
        }
        .run();
    });
}

struct MoveConstants<'a> {
    proc: &'a mut Procedure,
    insertion_set: InsertionSet,
    /// Table slot of each table-worthy constant, in discovery order.
    const_table: IndexMap<ValueKey, usize>,
    /// Per-block materialization cache. Cleared at each block boundary.
    constants: HashMap<ValueKey, ValueId>,
    to_remove: Vec<ValueId>,
    data_section: usize,
}

impl<'a> MoveConstants<'a> {
    fn run(&mut self) {
        // Figure out which constants go into the data section: the non-zero
        // floating-point ones.
        for index in 0..self.proc.values.len() {
            let value = &self.proc.values[index];
            if !needs_motion(value) {
                continue;
            }
            self.to_remove.push(ValueId(index));
            let key = value.key().unwrap();
            if goes_in_table(&key) {
                let next_slot = self.const_table.len();
                self.const_table.entry(key).or_insert(next_slot);
            }
        }

        self.data_section = self
            .proc
            .add_data_section(self.const_table.len() * std::mem::size_of::<i64>());
        {
            let data_section = self.proc.data_section_mut(self.data_section);
            for (key, &slot) in self.const_table.iter() {
                data_section.write_i64(slot, key.value());
            }
        }

        debug!(
            "move_constants: {} constants in table, {} to rewrite",
            self.const_table.len(),
            self.to_remove.len()
        );

        // Rewrite every use of a motion-worthy constant to a per-block
        // materialization, inserted just before its first user.
        for block_index in 0..self.proc.blocks.len() {
            let block = BlockId(block_index);
            self.constants.clear();

            for value_index in 0..self.proc.block(block).values.len() {
                let value_id = self.proc.block(block).values[value_index];
                for child_index in 0..self.proc.value(value_id).children.len() {
                    let child = self.proc.value(value_id).children[child_index];
                    if !needs_motion(self.proc.value(child)) {
                        continue;
                    }
                    let key = self.proc.value(child).key().unwrap();
                    let materialized = self.materialize(value_index, key);
                    self.proc.value_mut(value_id).children[child_index] = materialized;
                }
            }

            self.insertion_set.execute(self.proc, block);
        }

        // The original constant definitions are now unreferenced.
        for index in 0..self.to_remove.len() {
            let value_id = self.to_remove[index];
            self.proc.value_mut(value_id).replace_with_nop();
        }
    }

    fn materialize(&mut self, value_index: usize, key: ValueKey) -> ValueId {
        if let Some(&value) = self.constants.get(&key) {
            return value;
        }

        let result = if goes_in_table(&key) {
            // The table base is itself a constant pointer; it goes through
            // the same per-block cache, so a block with several table loads
            // materializes the base once.
            let base_key = ValueKey::new(
                Opcode::Const64,
                Type::Int64,
                self.proc.data_section(self.data_section).base_address(),
            );
            let table_base = self.materialize(value_index, base_key);
            let offset = (self.const_table[&key] * std::mem::size_of::<i64>()) as i32;
            let load = self.proc.add(Value::new(
                Opcode::Load,
                key.typ,
                &[table_base],
                ValueData::Memory { offset },
            ));
            self.insertion_set.insert_value(value_index, load)
        } else {
            let constant = self.proc.add(key.materialize());
            self.insertion_set.insert_value(value_index, constant)
        };

        self.constants.insert(key, result);
        result
    }
}

fn needs_motion(value: &Value) -> bool {
    if !value.is_constant() {
        return false;
    }
    // 32-bit-representable integers are always cheap to materialize inline.
    if value.has_int() && value.representable_as_i32() {
        return false;
    }
    true
}

fn goes_in_table(key: &ValueKey) -> bool {
    // Zero stays out: it materializes inline with a register clear.
    (key.kind == Opcode::ConstDouble && *key != double_zero())
        || (key.kind == Opcode::ConstFloat && *key != float_zero())
}

fn double_zero() -> ValueKey {
    ValueKey::new(Opcode::ConstDouble, Type::Double, 0)
}

fn float_zero() -> ValueKey {
    ValueKey::new(Opcode::ConstFloat, Type::Float, 0)
}
