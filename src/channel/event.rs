// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// OS readiness notifier for channels fed from another thread: an
// eventfd on Linux, a non-blocking self-pipe on other unix platforms.
// The loop polls the read side; producers ring the write side through a
// detached `Notify` handle.

use std::sync::Arc;

use crate::error::{Error, Result};

struct Fds {
    read: i32,
    write: i32,
}

impl Drop for Fds {
    fn drop(&mut self) {
        unsafe {
            if self.read >= 0 {
                libc::close(self.read);
            }
            if self.write >= 0 && self.write != self.read {
                libc::close(self.write);
            }
        }
    }
}

/// Readiness notifier owned by a channel.
pub struct Event {
    fds: Arc<Fds>,
}

/// Detached producer handle; cheap to clone and safe to ring from any
/// thread.
#[derive(Clone)]
pub struct Notify {
    fds: Arc<Fds>,
}

#[cfg(target_os = "linux")]
fn open_fds() -> Result<Fds> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(Fds { read: fd, write: fd })
}

#[cfg(all(unix, not(target_os = "linux")))]
fn open_fds() -> Result<Fds> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    for fd in fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok(Fds { read: fds[0], write: fds[1] })
}

fn ring(fds: &Fds) -> Result<()> {
    let value: u64 = 1;
    let r = unsafe {
        libc::write(fds.write, &value as *const u64 as *const libc::c_void, 8)
    };
    if r != 8 {
        let err = std::io::Error::last_os_error();
        // A full pipe still wakes the poller.
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Ok(());
        }
        return Err(Error::Io(err));
    }
    Ok(())
}

impl Event {
    pub fn new() -> Result<Event> {
        Ok(Event { fds: Arc::new(open_fds()?) })
    }

    /// Descriptor to register with the poller.
    pub fn fd(&self) -> i32 {
        self.fds.read
    }

    pub fn notify(&self) -> Result<()> {
        ring(&self.fds)
    }

    /// Drain the readiness signal.
    pub fn clear(&self) -> Result<()> {
        let mut buf = [0u8; 8];
        let r = unsafe {
            libc::read(self.fds.read, buf.as_mut_ptr() as *mut libc::c_void, 8)
        };
        if r < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(Error::Io(err));
        }
        Ok(())
    }

    /// Drain, but re-arm when `pending` reports data that raced with the
    /// drain: without the recheck a message landing between the last
    /// read and the clear would leave the fd silent with data queued.
    pub fn clear_race(&self, pending: impl Fn() -> bool) -> Result<()> {
        if pending() {
            return Ok(());
        }
        self.clear()?;
        if pending() {
            tracing::debug!("rearm event after clear race");
            self.notify()?;
        }
        Ok(())
    }

    pub fn detach(&self) -> Notify {
        Notify { fds: self.fds.clone() }
    }
}

impl Notify {
    pub fn notify(&self) -> Result<()> {
        ring(&self.fds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_and_clear() {
        let ev = Event::new().unwrap();
        assert!(ev.fd() >= 0);
        ev.notify().unwrap();
        ev.clear().unwrap();
        // Cleared: next clear on the empty fd reports would-block, which
        // is swallowed.
        ev.clear().unwrap();
    }

    #[test]
    fn detached_handle() {
        let ev = Event::new().unwrap();
        let notify = ev.detach();
        std::thread::spawn(move || notify.notify().unwrap()).join().unwrap();
        ev.clear().unwrap();
    }
}
