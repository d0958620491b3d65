/// A read-only region of the compiled procedure's memory holding constants
/// too large to be instruction immediates. The backing storage is heap
/// allocated and never resized, so its address stays valid for pointers baked
/// into the generated code.
pub struct DataSection {
    data: Box<[u8]>,
}

impl DataSection {
    pub fn new(size: usize) -> DataSection {
        DataSection {
            data: vec![0; size].into_boxed_slice(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn base_address(&self) -> i64 {
        self.data.as_ptr() as i64
    }

    pub fn write_i64(&mut self, slot: usize, bits: i64) {
        let offset = slot * std::mem::size_of::<i64>();
        self.data[offset..offset + 8].copy_from_slice(&bits.to_le_bytes());
    }

    pub fn read_i64(&self, slot: usize) -> i64 {
        let offset = slot * std::mem::size_of::<i64>();
        i64::from_le_bytes(self.data[offset..offset + 8].try_into().unwrap())
    }
}
