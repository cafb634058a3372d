//! Non-throwing streaming reader over a borrowed byte slice.

/// Reader with a sticky error flag. Read calls are always safe; on
/// underflow they return zero values (or an empty slice) and latch the
/// error flag, and every later read fails too. Callers parse a whole
/// structure and check [`ByteReader::has_error`] once at the end, which
/// keeps the happy path branch-free.
#[derive(Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    error: bool,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            error: false,
        }
    }

    /// True if any read ran out of bytes.
    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current read position from the start of the slice. Stable across
    /// failed reads, so it can delimit spans of successfully parsed data.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Returns the next `n` bytes and advances past them, or an empty
    /// slice on underflow. Reading zero bytes always succeeds.
    pub fn read_n(&mut self, n: usize) -> &'a [u8] {
        if self.error || n > self.remaining() {
            self.error = true;
            return &[];
        }
        let start = self.pos;
        self.pos += n;
        &self.buf[start..self.pos]
    }

    pub fn read_u8(&mut self) -> u8 {
        self.read_array::<1>()[0]
    }

    pub fn read_u16(&mut self) -> u16 {
        u16::from_le_bytes(self.read_array())
    }

    pub fn read_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.read_array())
    }

    pub fn read_u64(&mut self) -> u64 {
        u64::from_le_bytes(self.read_array())
    }

    fn read_array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        let bytes = self.read_n(N);
        if bytes.len() == N {
            out.copy_from_slice(bytes);
        }
        out
    }
}
