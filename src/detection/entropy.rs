//! Shannon entropy over streamed content.
//!
//! Packed or encrypted payloads sit close to 8.0 bits per byte; ordinary
//! executable code is usually between 5.0 and 6.5.

/// Entropy thresholds for classification.
pub const ENTROPY_HIGH: f64 = 7.0;
pub const ENTROPY_VERY_HIGH: f64 = 7.5;
pub const ENTROPY_MAX: f64 = 8.0;

/// Below this many bytes the estimate is too noisy to act on.
pub const MIN_SAMPLE: u64 = 256;

/// Byte histogram fed chunk by chunk.
#[derive(Debug, Clone)]
pub struct EntropyAccumulator {
    counts: [u64; 256],
    total: u64,
}

impl Default for EntropyAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntropyAccumulator {
    pub fn new() -> Self {
        Self {
            counts: [0; 256],
            total: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            self.counts[byte as usize] += 1;
        }
        self.total += chunk.len() as u64;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Entropy in bits per byte, 0.0 to 8.0.
    pub fn entropy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let len = self.total as f64;
        self.counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / len;
                -p * p.log2()
            })
            .sum()
    }

    /// Whether enough bytes were seen for the estimate to mean anything.
    pub fn is_significant(&self) -> bool {
        self.total >= MIN_SAMPLE
    }
}

/// Entropy of a complete buffer.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    let mut acc = EntropyAccumulator::new();
    acc.update(data);
    acc.entropy()
}
