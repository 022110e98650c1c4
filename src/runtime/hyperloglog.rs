//! HyperLogLog cardinality sketch.
//!
//! 128 registers seeded from the top 7 bits of a 64-bit hash. Each worker
//! feeds its private sketch while materializing build/aggregation tuples;
//! the merge pipelines combine all sketches and size the global hash table
//! from the estimate, so the table is allocated once at the right capacity
//! instead of growing under concurrent insertion.

const REGISTERS: usize = 128;
const INDEX_SHIFT: u32 = 64 - 7;
const REST_SHIFT: u32 = 7;

/// A 128-register HyperLogLog sketch over 64-bit hashes.
#[derive(Debug, Clone)]
pub struct Sketch {
    registers: [u8; REGISTERS],
}

impl Default for Sketch {
    fn default() -> Self {
        Sketch {
            registers: [0; REGISTERS],
        }
    }
}

impl Sketch {
    pub fn add(&mut self, hash: u64) {
        let register = &mut self.registers[(hash >> INDEX_SHIFT) as usize];
        let rest = hash << REST_SHIFT;
        let rank = if rest == 0 {
            INDEX_SHIFT as u8
        } else {
            rest.leading_zeros() as u8 + 1
        };
        *register = (*register).max(rank);
    }

    pub fn merge(&mut self, other: &Sketch) {
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            *mine = (*mine).max(*theirs);
        }
    }

    pub fn estimate(&self) -> u64 {
        let mut sum = 0.0f64;
        let mut zero_count = 0u32;
        for &register in &self.registers {
            zero_count += u32::from(register == 0);
            sum += 1.0 / (1u64 << register) as f64;
        }
        let m = REGISTERS as f64;
        if zero_count == 0 {
            (0.709 * m * m / sum) as u64
        } else {
            (m * (m / f64::from(zero_count)).ln()) as u64
        }
    }
}
