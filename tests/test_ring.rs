// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

use std::thread;

use libtll::error::Error;
use libtll::ring::Ring;

#[test]
fn empty_ring() {
    let ring = Ring::new(128);
    assert!(ring.read().unwrap_err().is_again());
    assert!(ring.shift().unwrap_err().is_again());
}

#[test]
fn base() {
    let ring = Ring::new(128);

    assert!(matches!(ring.write_begin(128), Err(Error::RangeOverflow(_))));

    let mut w = ring.write_begin(16).unwrap();
    w.data().fill(b'a');

    // Uncommitted writes are invisible.
    assert!(ring.read().unwrap_err().is_again());
    assert!(ring.shift().unwrap_err().is_again());

    // Commit less than reserved.
    ring.write_end(w, 8);

    assert_eq!(ring.read().unwrap(), b"aaaaaaaa");
    ring.shift().unwrap();

    assert!(ring.read().unwrap_err().is_again());
    assert!(ring.shift().unwrap_err().is_again());
}

#[test]
fn zero_sized_records() {
    let ring = Ring::new(128);
    ring.write(b"test").unwrap();
    ring.write(b"").unwrap();

    assert_eq!(ring.read().unwrap(), b"test");
    ring.shift().unwrap();
    assert_eq!(ring.read().unwrap(), b"");
    ring.shift().unwrap();
    assert!(ring.read().unwrap_err().is_again());
}

// Capacity 128: three records of 30 bytes occupy 3 * 40 = 120 bytes of
// frames. Once the front is freed, a 40 byte record no longer fits
// before the wrap point: the writer leaves a skip marker at the tail
// and allocates from offset 0. The reader never sees the marker.
#[test]
fn wrap_marker() {
    let ring = Ring::new(128);

    for fill in [b'a', b'b', b'c'] {
        let mut w = ring.write_begin(30).unwrap();
        w.data().fill(fill);
        ring.write_end(w, 30);
    }
    // 8 bytes left: no room for another frame.
    assert!(ring.write_begin(30).unwrap_err().is_again());

    assert_eq!(ring.read().unwrap(), [b'a'; 30]);
    ring.shift().unwrap();
    // Still blocked: the wrapped allocation would run into the head.
    assert!(ring.write_begin(40).unwrap_err().is_again());
    assert_eq!(ring.read().unwrap(), [b'b'; 30]);
    ring.shift().unwrap();

    let mut w = ring.write_begin(40).unwrap();
    w.data().fill(b'd');
    ring.write_end(w, 40);

    assert_eq!(ring.read().unwrap(), [b'c'; 30]);
    ring.shift().unwrap();
    // The skip marker is transparent: next record comes from offset 0.
    assert_eq!(ring.read().unwrap(), [b'd'; 40]);
    ring.shift().unwrap();
    assert!(ring.read().unwrap_err().is_again());
}

const MSIZE: usize = 37;
const MDATA: usize = 57;

// Writer thread emits records (seq, payload); reader must observe every
// record exactly once, in order, byte-identical.
#[test]
fn spsc_thread() {
    let ring = std::sync::Arc::new(Ring::new(1024));
    let count = 1000usize;

    let wring = ring.clone();
    let writer = thread::spawn(move || {
        for i in 0..count {
            let c = b'A' + (i % MDATA) as u8;
            let size = 8 + i % MSIZE;
            loop {
                match wring.write_begin(size) {
                    Ok(mut w) => {
                        let data = w.data();
                        data[..8].copy_from_slice(&(i as u64).to_le_bytes());
                        data[8..size].fill(c);
                        wring.write_end(w, size);
                        break;
                    }
                    Err(_) => thread::yield_now(),
                }
            }
        }
    });

    let mut idx = 0usize;
    while idx < count {
        let record = match ring.read() {
            Ok(r) => r,
            Err(_) => {
                thread::yield_now();
                continue;
            }
        };
        assert_eq!(record.len(), 8 + idx % MSIZE);
        let seq = u64::from_le_bytes(record[..8].try_into().unwrap());
        assert_eq!(seq as usize, idx);
        let c = b'A' + (idx % MDATA) as u8;
        assert!(record[8..].iter().all(|&b| b == c));
        idx += 1;
        ring.shift().unwrap();
    }

    writer.join().unwrap();
    assert!(ring.read().unwrap_err().is_again());
}

#[test]
fn iter_follows_reader() {
    let ring = Ring::with_generation(128);
    let mut iter = ring.iter();

    assert!(iter.read().unwrap_err().is_again());
    assert!(iter.shift().unwrap_err().is_again());

    let mut w = ring.write_begin(16).unwrap();
    w.data().fill(b'a');

    assert!(iter.read().unwrap_err().is_again());

    ring.write_end(w, 8);

    assert_eq!(iter.read().unwrap(), b"aaaaaaaa");
    iter.shift().unwrap();
    assert!(iter.read().unwrap_err().is_again());
}

#[test]
fn iter_invalidated_by_shift() {
    let ring = Ring::with_generation(128);
    ring.write(b"record-1").unwrap();

    let iter = ring.iter();
    assert!(iter.valid());

    // The real reader overtakes the iterator.
    ring.shift().unwrap();

    assert!(!iter.valid());
    assert!(matches!(iter.read(), Err(Error::InvalidArgument(_))));
}

// Publish mode: the writer shifts the ring itself when full, the
// iterator detects overtaking and re-synchronises. Every record that is
// fully read must be intact.
#[test]
fn iter_publish() {
    let ring = std::sync::Arc::new(Ring::with_generation(64 * 1024));
    let count = 100_000usize;

    let wring = ring.clone();
    let writer = thread::spawn(move || {
        for i in 0..count {
            let c = b'A' + (i % MDATA) as u8;
            let size = 8 + i % MSIZE;
            loop {
                match wring.write_begin(size) {
                    Ok(mut w) => {
                        let data = w.data();
                        data[..8].copy_from_slice(&(i as u64).to_le_bytes());
                        data[8..size].fill(c);
                        wring.write_end(w, size);
                        break;
                    }
                    // Publish mode: drop the oldest record instead of
                    // waiting for the reader.
                    Err(_) => {
                        let _ = wring.shift();
                    }
                }
            }
        }
    });

    let mut idx = 0usize;
    let mut checked = 0usize;
    let mut iter = ring.iter();
    let mut buf = [0u8; 8 + MSIZE];
    while idx + 1 < count {
        if !iter.valid() {
            iter = ring.iter();
            if !iter.valid() {
                continue;
            }
        }
        let len = match iter.read() {
            Ok(record) => {
                let len = record.len();
                buf[..len].copy_from_slice(record);
                len
            }
            Err(_) => continue,
        };
        // Only data still valid after the shift is trustworthy.
        if iter.shift().is_err() {
            continue;
        }
        let seq = u64::from_le_bytes(buf[..8].try_into().unwrap()) as usize;
        assert_eq!(len, 8 + seq % MSIZE);
        let c = b'A' + (seq % MDATA) as u8;
        assert!(buf[8..len].iter().all(|&b| b == c));
        idx = seq;
        checked += 1;
    }

    writer.join().unwrap();
    assert!(checked > 0);
}

#[test]
fn available_space() {
    let ring = Ring::new(128);
    let before = ring.available();
    assert!(before > 0);
    ring.write(&[0u8; 32]).unwrap();
    assert!(ring.available() < before);
    ring.shift().unwrap();
}
