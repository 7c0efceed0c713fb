use rtrb::{Consumer, Producer, RingBuffer};

/// Fixed-capacity ring of interleaved i16 samples, built on rtrb.
///
/// Unlike the producer/consumer split used for cross-thread capture, both
/// halves live together here: the minder appends during ingestion and the
/// adapter peeks and trims during drain, all on the one dispatch thread.
/// The logical window is exposed as up to two contiguous segments so
/// conversion never needs an intermediate copy.
pub struct SampleRing {
    producer: Producer<i16>,
    consumer: Consumer<i16>,
    capacity: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self {
            producer,
            consumer,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples currently buffered.
    pub fn len(&self) -> usize {
        self.consumer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free capacity in samples.
    pub fn free(&self) -> usize {
        self.producer.slots()
    }

    /// Bulk append, bounded by free capacity. Returns how many samples
    /// were actually stored; the rest are the caller's to drop.
    pub fn push(&mut self, samples: &[i16]) -> usize {
        let take = samples.len().min(self.producer.slots());
        if take == 0 {
            return 0;
        }
        let mut chunk = match self.producer.write_chunk(take) {
            Ok(chunk) => chunk,
            Err(_) => return 0,
        };
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&samples[..split]);
        second.copy_from_slice(&samples[split..take]);
        chunk.commit_all();
        take
    }

    /// Expose the whole buffered window as two contiguous segments without
    /// consuming anything. The second segment is empty unless the window
    /// wraps.
    pub fn with_slices<R>(&mut self, f: impl FnOnce(&[i16], &[i16]) -> R) -> R {
        let buffered = self.consumer.slots();
        match self.consumer.read_chunk(buffered) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                f(first, second)
                // chunk dropped without commit: nothing consumed
            }
            Err(_) => f(&[], &[]),
        }
    }

    /// Discard `n` samples from the front of the window.
    pub fn trim(&mut self, n: usize) {
        let n = n.min(self.consumer.slots());
        if n == 0 {
            return;
        }
        if let Ok(chunk) = self.consumer.read_chunk(n) {
            chunk.commit_all();
        }
    }
}
