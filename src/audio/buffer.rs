use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Single-producer/single-consumer ring of interleaved f32 samples.
///
/// Samples are stored as raw bits in `AtomicU32` cells so both ends can work
/// through a shared reference without locking. One slot is always left empty
/// to tell a full ring from an empty one.
#[derive(Debug)]
pub struct RingBuffer {
    cells: Box<[AtomicU32]>,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
    underruns: AtomicUsize,
    channels: u16,
}

impl RingBuffer {
    /// Create a new ring buffer with the specified capacity in frames
    pub fn new(capacity_frames: usize, channels: u16) -> Self {
        let capacity = capacity_frames.max(1) * channels.max(1) as usize + 1;
        let cells = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Self {
            cells,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            underruns: AtomicUsize::new(0),
            channels: channels.max(1),
        }
    }

    fn slots(&self) -> usize {
        self.cells.len()
    }

    /// Usable capacity in samples
    pub fn capacity(&self) -> usize {
        self.slots() - 1
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Get the number of samples available for reading
    pub fn available_read(&self) -> usize {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);

        if write_pos >= read_pos {
            write_pos - read_pos
        } else {
            self.slots() - read_pos + write_pos
        }
    }

    /// Get the number of samples available for writing
    pub fn available_write(&self) -> usize {
        self.capacity() - self.available_read()
    }

    pub fn available_write_frames(&self) -> usize {
        self.available_write() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    /// Write samples, returning how many fit
    pub fn write(&self, data: &[f32]) -> usize {
        let to_write = data.len().min(self.available_write());
        let mut pos = self.write_pos.load(Ordering::Relaxed);

        for &sample in &data[..to_write] {
            self.cells[pos].store(sample.to_bits(), Ordering::Relaxed);
            pos = (pos + 1) % self.slots();
        }

        self.write_pos.store(pos, Ordering::Release);
        to_write
    }

    /// Read samples, returning how many were available
    pub fn read(&self, data: &mut [f32]) -> usize {
        let to_read = data.len().min(self.available_read());
        let mut pos = self.read_pos.load(Ordering::Relaxed);

        for slot in &mut data[..to_read] {
            *slot = f32::from_bits(self.cells[pos].load(Ordering::Relaxed));
            pos = (pos + 1) % self.slots();
        }

        self.read_pos.store(pos, Ordering::Release);
        to_read
    }

    /// Fill `data` completely, padding with silence and counting an underrun
    /// when the ring runs dry
    pub fn read_or_silence(&self, data: &mut [f32]) -> usize {
        let read = self.read(data);
        if read < data.len() {
            data[read..].fill(0.0);
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        read
    }

    /// Drop everything buffered. Only the consumer side may call this, and
    /// the producer must not be writing concurrently.
    pub fn clear(&self) {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write_pos, Ordering::Release);
    }

    pub fn underrun_count(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ring_buffer_creation() {
        let buffer = RingBuffer::new(1024, 2);
        assert_eq!(buffer.capacity(), 2048);
        assert_eq!(buffer.channels(), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.available_write_frames(), 1024);
    }

    #[test]
    fn test_ring_buffer_write_read() {
        let buffer = RingBuffer::new(8, 1);
        let data = [0.1, 0.2, 0.3, 0.4];

        assert_eq!(buffer.write(&data), 4);
        assert_eq!(buffer.available_read(), 4);

        let mut out = [0.0; 4];
        assert_eq!(buffer.read(&mut out), 4);
        assert_eq!(out, data);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_ring_buffer_rejects_overflow() {
        let buffer = RingBuffer::new(4, 1);
        assert_eq!(buffer.write(&[1.0; 6]), 4);
        assert_eq!(buffer.available_write(), 0);
        assert_eq!(buffer.write(&[1.0]), 0);
    }

    #[test]
    fn test_ring_buffer_wrap_around() {
        let buffer = RingBuffer::new(4, 1);
        let mut out = [0.0; 3];

        buffer.write(&[1.0, 2.0, 3.0]);
        buffer.read(&mut out);
        buffer.write(&[4.0, 5.0, 6.0]);

        assert_eq!(buffer.read(&mut out), 3);
        assert_eq!(out, [4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_read_or_silence_pads_and_counts_underrun() {
        let buffer = RingBuffer::new(8, 2);
        buffer.write(&[0.5, 0.5]);

        let mut out = [9.0; 6];
        assert_eq!(buffer.read_or_silence(&mut out), 2);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_clear_drops_buffered_samples() {
        let buffer = RingBuffer::new(100, 1);
        buffer.write(&[0.5; 50]);
        assert_eq!(buffer.available_read(), 50);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.available_write(), 100);
    }

    #[test]
    fn test_ring_buffer_thread_safety() {
        let buffer = Arc::new(RingBuffer::new(256, 1));
        let producer = Arc::clone(&buffer);
        let total = 10_000usize;

        let writer = thread::spawn(move || {
            let mut next = 0usize;
            while next < total {
                let sample = [next as f32];
                if producer.write(&sample) == 1 {
                    next += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        let mut received = Vec::with_capacity(total);
        let mut chunk = [0.0f32; 64];
        while received.len() < total {
            let n = buffer.read(&mut chunk);
            received.extend_from_slice(&chunk[..n]);
            if n == 0 {
                thread::yield_now();
            }
        }
        writer.join().unwrap();

        for (i, sample) in received.iter().enumerate() {
            assert_eq!(*sample, i as f32);
        }
    }
}
