use byteorder::{BigEndian, ByteOrder};
use std::io;
use std::io::{IoSliceMut, Read};

const DEFAULT_INITIAL_SIZE: usize = 1024;
const DEFAULT_PREPEND_SIZE: usize = 8;

// Stack-side auxiliary region for vectored reads. Big enough that a single
// syscall drains most responses without pre-growing the buffer.
const EXTRA_BUF_SIZE: usize = 65536;

/// Growable byte arena with separate read and write cursors and a reserve at
/// the front, so a frame header can be prepended after the body has been
/// written without copying the body.
///
/// Layout: `[0, prepend)` reserve, `[read_idx, write_idx)` readable,
/// `[write_idx, capacity)` writable. `prepend <= read_idx <= write_idx`
/// holds at all times; violating a size precondition is a programmer error
/// and panics.
pub struct Buffer {
    data: Vec<u8>,
    read_idx: usize,
    write_idx: usize,
    prepend: usize,
}

impl Buffer {
    /// Creates a buffer with the default 8-byte prepend reserve.
    #[inline]
    pub fn new(size: usize) -> Buffer {
        Buffer::with_prepend(size, DEFAULT_PREPEND_SIZE)
    }

    /// Creates a buffer with `size` writable bytes after a `prepend`-byte
    /// reserve. A zero `size` falls back to the default initial size.
    pub fn with_prepend(size: usize, prepend: usize) -> Buffer {
        let size = if size == 0 { DEFAULT_INITIAL_SIZE } else { size };

        Buffer {
            data: vec![0; prepend + size],
            read_idx: prepend,
            write_idx: prepend,
            prepend,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of unread bytes.
    #[inline]
    pub fn readable(&self) -> usize {
        self.write_idx - self.read_idx
    }

    /// Free space at the tail.
    #[inline]
    pub fn writable(&self) -> usize {
        self.data.len() - self.write_idx
    }

    /// Free space in front of the read cursor (reserve included).
    #[inline]
    pub fn prependable(&self) -> usize {
        self.read_idx
    }

    /// The current readable region.
    #[inline]
    pub fn peek(&self) -> &[u8] {
        &self.data[self.read_idx..self.write_idx]
    }

    /// The current writable region. Pair with `has_written`.
    #[inline]
    pub fn write_slice(&mut self) -> &mut [u8] {
        let write_idx = self.write_idx;
        &mut self.data[write_idx..]
    }

    /// Advances the write cursor over bytes filled in via `write_slice`.
    #[inline]
    pub fn has_written(&mut self, len: usize) {
        assert!(len <= self.writable());
        self.write_idx += len;
    }

    /// Consumes `len` bytes from the front. Once everything readable has
    /// been consumed both cursors snap back to the reserve, restoring the
    /// full prepend capacity.
    pub fn retrieve(&mut self, len: usize) {
        assert!(len <= self.readable());
        if len < self.readable() {
            self.read_idx += len;
        } else {
            self.retrieve_all();
        }
    }

    #[inline]
    pub fn retrieve_all(&mut self) {
        self.read_idx = self.prepend;
        self.write_idx = self.prepend;
    }

    /// Appends `data` at the write cursor, compacting or growing as needed.
    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        let write_idx = self.write_idx;
        self.data[write_idx..write_idx + data.len()].copy_from_slice(data);
        self.write_idx += data.len();
    }

    /// Writes `data` into the gap in front of the read cursor. The caller
    /// must have reserved enough prependable space up front.
    pub fn prepend(&mut self, data: &[u8]) {
        assert!(data.len() <= self.prependable());
        self.read_idx -= data.len();
        let read_idx = self.read_idx;
        self.data[read_idx..read_idx + data.len()].copy_from_slice(data);
    }

    /// Makes room for at least `len` writable bytes. Prefers compacting the
    /// readable region down to the reserve; reallocates only when the total
    /// free space does not suffice.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable() >= len {
            return;
        }

        if self.prependable() + self.writable() - self.prepend < len {
            self.data.resize(self.write_idx + len, 0);
        }

        let readable = self.readable();
        self.data.copy_within(self.read_idx..self.write_idx, self.prepend);
        self.read_idx = self.prepend;
        self.write_idx = self.prepend + readable;

        assert!(self.writable() >= len);
    }

    /// Reads from `reader` into the buffer using a vectored read with a
    /// 64 KiB on-stack auxiliary region as the second vector; overflow that
    /// landed in the auxiliary region is appended (growing the buffer). One
    /// syscall therefore suffices for most responses while the buffer stays
    /// lazily sized.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut extra = [0u8; EXTRA_BUF_SIZE];
        let writable = self.writable();

        let n = {
            let mut iovs = [
                IoSliceMut::new(self.write_slice()),
                IoSliceMut::new(&mut extra),
            ];
            reader.read_vectored(&mut iovs)?
        };

        if n <= writable {
            self.write_idx += n;
        } else {
            self.write_idx = self.data.len();
            self.append(&extra[..n - writable]);
        }

        Ok(n)
    }
}

/// Big-endian numeric accessors, at the tail (append), the front (prepend)
/// and the read cursor (peek/read).
impl Buffer {
    #[inline]
    pub fn append_u8(&mut self, x: u8) {
        self.append(&[x]);
    }

    #[inline]
    pub fn append_u16(&mut self, x: u16) {
        let mut be = [0; 2];
        BigEndian::write_u16(&mut be, x);
        self.append(&be);
    }

    #[inline]
    pub fn append_u32(&mut self, x: u32) {
        let mut be = [0; 4];
        BigEndian::write_u32(&mut be, x);
        self.append(&be);
    }

    #[inline]
    pub fn append_i64(&mut self, x: i64) {
        let mut be = [0; 8];
        BigEndian::write_i64(&mut be, x);
        self.append(&be);
    }

    #[inline]
    pub fn prepend_u8(&mut self, x: u8) {
        self.prepend(&[x]);
    }

    #[inline]
    pub fn prepend_u16(&mut self, x: u16) {
        let mut be = [0; 2];
        BigEndian::write_u16(&mut be, x);
        self.prepend(&be);
    }

    #[inline]
    pub fn prepend_u32(&mut self, x: u32) {
        let mut be = [0; 4];
        BigEndian::write_u32(&mut be, x);
        self.prepend(&be);
    }

    #[inline]
    pub fn prepend_i64(&mut self, x: i64) {
        let mut be = [0; 8];
        BigEndian::write_i64(&mut be, x);
        self.prepend(&be);
    }

    #[inline]
    pub fn peek_u8(&self) -> u8 {
        assert!(self.readable() >= 1);
        self.peek()[0]
    }

    #[inline]
    pub fn peek_u16(&self) -> u16 {
        assert!(self.readable() >= 2);
        BigEndian::read_u16(self.peek())
    }

    #[inline]
    pub fn peek_u32(&self) -> u32 {
        assert!(self.readable() >= 4);
        BigEndian::read_u32(self.peek())
    }

    #[inline]
    pub fn peek_i64(&self) -> i64 {
        assert!(self.readable() >= 8);
        BigEndian::read_i64(self.peek())
    }

    #[inline]
    pub fn read_u8(&mut self) -> u8 {
        let x = self.peek_u8();
        self.retrieve(1);
        x
    }

    #[inline]
    pub fn read_u16(&mut self) -> u16 {
        let x = self.peek_u16();
        self.retrieve(2);
        x
    }

    #[inline]
    pub fn read_u32(&mut self) -> u32 {
        let x = self.peek_u32();
        self.retrieve(4);
        x
    }

    #[inline]
    pub fn read_i64(&mut self) -> i64 {
        let x = self.peek_i64();
        self.retrieve(8);
        x
    }
}
