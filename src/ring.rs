// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Single-producer single-consumer ring buffer with variable-length
// records. Each record is framed by an i32 length prefix and padded to an
// 8 byte boundary so every frame header stays aligned. A length of -1 is
// a skip marker: the record that did not fit before the wrap point lives
// at offset 0 instead.
//
// The writer publishes `tail` with Release, the reader observes it with
// Acquire, so a concurrent reader sees either the whole record or
// nothing. One byte is kept free to distinguish full from empty.
//
// With generation counters enabled on the head pointer an out-of-band
// `RingIter` can detect that the reader overtook it and re-synchronise,
// which is what publish-subscribe transports use to let slow readers
// drop data instead of blocking the writer.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::{Error, Result};

const ALIGN: usize = 8;
const HEADER: usize = std::mem::size_of::<i32>();

const fn aligned(x: usize) -> usize {
    x + (x.wrapping_neg() & (ALIGN - 1))
}

/// Head or tail marker. Generation counters are written around the
/// pointer store so an iterator can tell whether memory it read may have
/// been reused: `pre` is bumped before the move, `post` after it.
struct Pointer {
    ptr: AtomicUsize,
    generation_pre: AtomicU64,
    generation_post: AtomicU64,
    generation: bool,
}

impl Pointer {
    fn new(generation: bool) -> Self {
        Self {
            ptr: AtomicUsize::new(0),
            generation_pre: AtomicU64::new(0),
            generation_post: AtomicU64::new(0),
            generation,
        }
    }

    fn load(&self, order: Ordering) -> usize {
        self.ptr.load(order)
    }

    fn store(&self, value: usize, order: Ordering) {
        if self.generation {
            let gen = self.generation_pre.load(Ordering::Relaxed) + 1;
            self.generation_pre.store(gen, order);
            // Guarded by the generation_post store below.
            self.ptr.store(value, Ordering::Relaxed);
            self.generation_post.store(gen, order);
        } else {
            self.ptr.store(value, order);
        }
    }
}

/// SPSC ring buffer over heap memory.
///
/// The safety contract is the classic SPSC one: at most one thread calls
/// the write side (`write_begin`/`write_end`/`write`) and at most one
/// thread calls the read side (`read`/`shift`) at any time. Both sides
/// may be different threads.
pub struct Ring {
    size: usize,
    head: Pointer,
    tail: Pointer,
    data: UnsafeCell<Box<[u8]>>,
}

unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

/// Reservation returned by [`Ring::write_begin`]. Fill [`WriteRef::data`]
/// and commit with [`Ring::write_end`]; dropping it without committing
/// leaves the ring untouched.
pub struct WriteRef<'a> {
    ring: &'a Ring,
    offset: usize,
    capacity: usize,
    wrap: bool,
}

impl WriteRef<'_> {
    /// The reserved payload region.
    pub fn data(&mut self) -> &mut [u8] {
        unsafe {
            let base = (*self.ring.data.get()).as_mut_ptr();
            std::slice::from_raw_parts_mut(base.add(self.offset + HEADER), self.capacity)
        }
    }
}

impl std::fmt::Debug for WriteRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteRef")
            .field("offset", &self.offset)
            .field("capacity", &self.capacity)
            .field("wrap", &self.wrap)
            .finish()
    }
}

impl Ring {
    /// Plain SPSC ring of `size` data bytes.
    pub fn new(size: usize) -> Self {
        Self::build(size, false)
    }

    /// Ring with head generation counters enabled, required for
    /// [`Ring::iter`] readers.
    pub fn with_generation(size: usize) -> Self {
        Self::build(size, true)
    }

    fn build(size: usize, generation: bool) -> Self {
        let size = aligned(size.max(ALIGN * 2));
        Self {
            size,
            head: Pointer::new(generation),
            tail: Pointer::new(generation),
            data: UnsafeCell::new(vec![0u8; size].into_boxed_slice()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn wrap_size(&self, off: usize) -> usize {
        if off >= self.size {
            off - self.size
        } else {
            off
        }
    }

    unsafe fn frame_at(&self, off: usize) -> *mut i32 {
        let base = (*self.data.get()).as_mut_ptr();
        base.add(off) as *mut i32
    }

    fn frame_read(&self, off: usize) -> i32 {
        unsafe { self.frame_at(off).read() }
    }

    fn frame_write(&self, off: usize, value: i32) {
        unsafe { self.frame_at(off).write(value) }
    }

    /// Reserve space for a record of `size` bytes.
    ///
    /// Returns `RangeOverflow` when the framed record can never fit and
    /// `Again` when the ring is currently too full. When the record would
    /// straddle the wrap point the reservation is moved to offset 0 and a
    /// skip marker is placed at commit time.
    pub fn write_begin(&self, size: usize) -> Result<WriteRef<'_>> {
        let a = aligned(size + HEADER);
        if a > self.size {
            return Err(Error::RangeOverflow(format!(
                "record size {size} over ring capacity {}",
                self.size
            )));
        }

        let t = self.tail.load(Ordering::Relaxed);
        let h = self.head.load(Ordering::Acquire);
        // -1 + 1 keeps head == tail meaning empty.
        let free = self.wrap_size(self.size + h - t - 1) + 1;
        if free <= a {
            return Err(Error::Again);
        }
        if t + a > self.size {
            if h <= a {
                return Err(Error::Again);
            }
            return Ok(WriteRef { ring: self, offset: 0, capacity: size, wrap: true });
        }
        Ok(WriteRef { ring: self, offset: t, capacity: size, wrap: false })
    }

    /// Commit a reservation with the final record size (may be smaller
    /// than reserved).
    pub fn write_end(&self, w: WriteRef<'_>, size: usize) {
        debug_assert!(size <= w.capacity);
        let a = aligned(size + HEADER);
        let mut t = self.tail.load(Ordering::Relaxed);
        if w.wrap {
            self.frame_write(t, -1);
            t = 0;
        }
        self.frame_write(t, size as i32);
        self.tail.store(self.wrap_size(t + a), Ordering::Release);
    }

    /// Reserve, copy and commit in one step.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let mut w = self.write_begin(data.len())?;
        w.data()[..data.len()].copy_from_slice(data);
        self.write_end(w, data.len());
        Ok(())
    }

    fn read_at(&self, offset: usize) -> Result<&[u8]> {
        if offset == self.tail.load(Ordering::Acquire) {
            return Err(Error::Again);
        }
        let sz = self.frame_read(offset);
        if sz < 0 {
            return self.read_at(0);
        }
        unsafe {
            let base = (*self.data.get()).as_ptr();
            Ok(std::slice::from_raw_parts(base.add(offset + HEADER), sz as usize))
        }
    }

    /// Peek at the oldest record. The returned slice is valid until the
    /// next [`Ring::shift`]; skip markers are followed transparently.
    pub fn read(&self) -> Result<&[u8]> {
        self.read_at(self.head.load(Ordering::Relaxed))
    }

    fn shift_offset(&self, offset: usize) -> usize {
        let size = self.frame_read(offset);
        if size < 0 {
            return self.shift_offset(0);
        }
        self.wrap_size(offset + aligned(size as usize + HEADER))
    }

    /// Advance past the oldest record. `Again` when empty.
    pub fn shift(&self) -> Result<()> {
        let t = self.tail.load(Ordering::Acquire);
        let h = self.head.load(Ordering::Relaxed);
        if h == t {
            return Err(Error::Again);
        }
        let off = self.shift_offset(h);
        self.head.store(off, Ordering::Release);
        Ok(())
    }

    /// Largest record payload that can currently be written.
    pub fn available(&self) -> usize {
        let h = self.head.load(Ordering::Acquire);
        let t = self.tail.load(Ordering::Relaxed);
        let avail = if t < h { h - t } else { std::cmp::max(h, self.size - t) };
        avail.saturating_sub(2 * ALIGN)
    }

    /// Drop all records. Caller must guarantee no concurrent access.
    pub fn clear(&mut self) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
    }

    fn iter_at(&self, ptr: &Pointer) -> RingIter<'_> {
        if !ptr.generation {
            return RingIter { ring: self, offset: 0, generation: 0, dead: true };
        }
        let generation = ptr.generation_post.load(Ordering::Acquire);
        let offset = ptr.load(Ordering::Acquire);
        if ptr.generation_pre.load(Ordering::Acquire) != generation {
            // Reader moved mid-snapshot, caller retries.
            return RingIter { ring: self, offset: 0, generation: 0, dead: true };
        }
        RingIter { ring: self, offset, generation, dead: false }
    }

    /// Out-of-band iterator positioned at the current head. Requires
    /// [`Ring::with_generation`].
    pub fn iter(&self) -> RingIter<'_> {
        self.iter_at(&self.head)
    }

    /// Iterator positioned at the tail: sees only records written after
    /// this call.
    pub fn iter_end(&self) -> RingIter<'_> {
        self.iter_at(&self.tail)
    }
}

/// Reader that trails the ring without shifting it. Every accessor
/// revalidates against the head generation: once the real reader (or a
/// force-pushing writer) passes this iterator's position, all calls
/// return `InvalidArgument` and the iterator must be re-created.
pub struct RingIter<'a> {
    ring: &'a Ring,
    offset: usize,
    generation: u64,
    dead: bool,
}

impl RingIter<'_> {
    pub fn valid(&self) -> bool {
        !self.dead && self.ring.head.generation_pre.load(Ordering::Acquire) <= self.generation
    }

    fn check(&self) -> Result<()> {
        if self.valid() {
            Ok(())
        } else {
            Err(Error::InvalidArgument("iterator overtaken".into()))
        }
    }

    /// Record at the iterator position. Validity is checked before and
    /// after the read so the returned bytes are known untouched.
    pub fn read(&self) -> Result<&[u8]> {
        self.check()?;
        let r = self.ring.read_at(self.offset)?;
        self.check()?;
        Ok(r)
    }

    pub fn shift(&mut self) -> Result<()> {
        self.check()?;
        let t = self.ring.tail.load(Ordering::Acquire);
        if self.ring.head.load(Ordering::Acquire) == t || self.offset == t {
            return Err(Error::Again);
        }
        let off = self.ring.shift_offset(self.offset);
        self.check()?;
        self.generation += 1;
        self.offset = off;
        Ok(())
    }
}
