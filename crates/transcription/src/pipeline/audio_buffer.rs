/// Accumulates signed 16-bit little-endian PCM bytes as normalized f32 samples.
///
/// Chunks may split a sample across calls; the dangling byte is carried over.
pub struct PcmBuffer {
    samples: Vec<f32>,
    carry: Option<u8>,
    /// Samples already drained, used to place windows on the timeline.
    consumed: usize,
}

impl PcmBuffer {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            carry: None,
            consumed: 0,
        }
    }

    /// Appends raw bytes.
    pub fn push_bytes(&mut self, mut bytes: &[u8]) {
        if let Some(low) = self.carry.take() {
            match bytes.split_first() {
                Some((&high, rest)) => {
                    self.samples.push(to_f32(low, high));
                    bytes = rest;
                }
                None => {
                    self.carry = Some(low);
                    return;
                }
            }
        }

        let mut pairs = bytes.chunks_exact(2);
        for pair in &mut pairs {
            self.samples.push(to_f32(pair[0], pair[1]));
        }
        if let [last] = pairs.remainder() {
            self.carry = Some(*last);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drains up to `max` samples and returns them with the offset of the
    /// first drained sample from the start of the stream.
    pub fn drain_window(&mut self, max: usize) -> (usize, Vec<f32>) {
        let take = max.min(self.samples.len());
        let offset = self.consumed;
        let window: Vec<f32> = self.samples.drain(..take).collect();
        self.consumed += window.len();
        (offset, window)
    }
}

impl Default for PcmBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn to_f32(low: u8, high: u8) -> f32 {
    i16::from_le_bytes([low, high]) as f32 / 32768.0
}
