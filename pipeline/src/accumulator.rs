use signstream_common::frame::{Frame, Window};

/// Buffers captured frames and seals them into fixed-size windows.
///
/// Frames beyond a full window stay buffered for the next one, so capture
/// never waits on dispatch.
#[derive(Debug)]
pub struct WindowAccumulator {
    window_size: usize,
    buffer: Vec<Frame>,
    next_window_seq: u64,
}

impl WindowAccumulator {
    pub fn new(window_size: usize) -> Self {
        assert!(window_size > 0, "window size must be at least 1");
        Self {
            window_size,
            buffer: Vec::with_capacity(window_size),
            next_window_seq: 0,
        }
    }

    /// Append a frame; returns a sealed window once `window_size` frames
    /// are buffered.
    pub fn push(&mut self, frame: Frame) -> Option<Window> {
        self.buffer.push(frame);
        if self.buffer.len() < self.window_size {
            return None;
        }

        let frames: Vec<Frame> = self.buffer.drain(..self.window_size).collect();
        let seq = self.next_window_seq;
        self.next_window_seq += 1;
        Some(Window::new(seq, frames))
    }

    /// Frames waiting for the current window to fill.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn windows_sealed(&self) -> u64 {
        self.next_window_seq
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.next_window_seq = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64) -> Frame {
        let mut f = Frame::jpeg(vec![0xFF, 0xD8, seq as u8], 1_000 + seq as i64);
        f.seq = seq;
        f
    }

    #[test]
    fn seals_floor_m_over_n_windows_in_capture_order() {
        for (n, m) in [(1usize, 5u64), (3, 3), (3, 10), (4, 9), (110, 250)] {
            let mut acc = WindowAccumulator::new(n);
            let windows: Vec<Window> = (0..m).filter_map(|i| acc.push(frame(i))).collect();

            assert_eq!(windows.len() as u64, m / n as u64, "n={n} m={m}");
            assert_eq!(acc.buffered() as u64, m % n as u64, "n={n} m={m}");

            let seqs: Vec<u64> = windows
                .iter()
                .flat_map(|w| w.frames.iter().map(|f| f.seq))
                .collect();
            let expected: Vec<u64> = (0..(m / n as u64) * n as u64).collect();
            assert_eq!(seqs, expected, "frames keep capture order");
            assert!(windows.iter().all(|w| w.len() == n));
        }
    }

    #[test]
    fn window_sequence_numbers_increase() {
        let mut acc = WindowAccumulator::new(2);
        let seqs: Vec<u64> = (0..6).filter_map(|i| acc.push(frame(i))).map(|w| w.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(acc.windows_sealed(), 3);
    }

    #[test]
    fn partial_window_never_sealed() {
        let mut acc = WindowAccumulator::new(4);
        for i in 0..3 {
            assert!(acc.push(frame(i)).is_none());
        }
        assert_eq!(acc.buffered(), 3);
    }

    #[test]
    fn clear_drops_buffer_and_restarts_numbering() {
        let mut acc = WindowAccumulator::new(2);
        acc.push(frame(0));
        acc.push(frame(1));
        acc.push(frame(2));
        acc.clear();
        assert_eq!(acc.buffered(), 0);
        assert_eq!(acc.windows_sealed(), 0);
        acc.push(frame(3));
        assert_eq!(acc.push(frame(4)).map(|w| w.seq), Some(0));
    }
}
