//! Cross-thread byte ring device.
//!
//! A bounded ring that is also a device, used as the rendezvous point between
//! threads: clone the [`ThreadRing`] handle, open one device per thread, and
//! move bytes through the uniform contract.
//!
//! The contract:
//! - every `read`/`write` call is atomic with respect to other calls: a
//!   record written in one call (up to the ring capacity) is never
//!   interleaved with another writer's bytes;
//! - `read` is non-blocking by default: an empty ring yields 0 without EOF
//!   while the write side is alive, and EOF once it has shut down;
//! - `write` blocks while the ring is full and fails with
//!   [`DeviceError::PipeClosed`] once the read side has shut down;
//! - [`shutdown`](ThreadRing::shutdown) is idempotent and wakes all waiters.
//!
//! Because direction is irrelevant here, ring devices advertise
//! [`DeviceFlags::NO_STATE_SWITCH`]. The backing storage lives until the last
//! handle drops.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::device::{Backend, Device, DeviceFlags, IoStatus};
use crate::error::{DeviceError, DeviceResult};

bitflags::bitflags! {
    /// Which half (or halves) of the ring to shut down.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Shutdown: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const BOTH = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// Blocking behavior knobs; the defaults are the ones the contract names.
#[derive(Debug, Clone, Copy)]
pub struct RingOptions {
    /// Block writers while the ring is full (default true).
    pub blocking_write: bool,
    /// Block readers while the ring is empty (default false).
    pub blocking_read: bool,
}

impl Default for RingOptions {
    fn default() -> Self {
        RingOptions {
            blocking_write: true,
            blocking_read: false,
        }
    }
}

struct RingState {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
    shutdown: Shutdown,
}

impl RingState {
    fn read_bytes(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        let cap = self.buf.len();
        let first = n.min(cap - self.head);
        out[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        if first < n {
            out[first..n].copy_from_slice(&self.buf[..n - first]);
        }
        self.head = (self.head + n) % cap;
        self.len -= n;
        n
    }

    fn write_bytes(&mut self, data: &[u8]) -> usize {
        let cap = self.buf.len();
        let n = data.len().min(cap - self.len);
        let tail = (self.head + self.len) % cap;
        let first = n.min(cap - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        if first < n {
            self.buf[..n - first].copy_from_slice(&data[first..n]);
        }
        self.len += n;
        n
    }
}

struct RingShared {
    state: Mutex<RingState>,
    data_avail: Condvar,
    space_avail: Condvar,
}

/// Cloneable handle to one ring. Open per-thread devices with
/// [`device`](ThreadRing::device).
#[derive(Clone)]
pub struct ThreadRing {
    shared: Arc<RingShared>,
    capacity: usize,
    opts: RingOptions,
}

impl ThreadRing {
    pub fn new(capacity: usize) -> ThreadRing {
        Self::with_options(capacity, RingOptions::default())
    }

    pub fn with_options(capacity: usize, opts: RingOptions) -> ThreadRing {
        let capacity = capacity.max(1);
        ThreadRing {
            shared: Arc::new(RingShared {
                state: Mutex::new(RingState {
                    buf: vec![0; capacity].into_boxed_slice(),
                    head: 0,
                    len: 0,
                    shutdown: Shutdown::empty(),
                }),
                data_avail: Condvar::new(),
                space_avail: Condvar::new(),
            }),
            capacity,
            opts,
        }
    }

    /// Open a device over this ring. Mode governs which directions the
    /// kernel permits; the ring itself never needs a state switch.
    pub fn device(&self, mode: &str) -> DeviceResult<Device> {
        Device::open(
            RingPort {
                ring: self.clone(),
            },
            mode,
        )
    }

    /// Shut down one or both halves. Idempotent; wakes every waiter.
    pub fn shutdown(&self, halves: Shutdown) {
        {
            let mut st = self.shared.state.lock();
            st.shutdown |= halves;
        }
        self.shared.data_avail.notify_all();
        self.shared.space_avail.notify_all();
        log::debug!("thread-ring shutdown {:?}", halves);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        self.shared.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct RingPort {
    ring: ThreadRing,
}

impl Backend for RingPort {
    fn kind(&self) -> &'static str {
        "thread-ring"
    }

    fn flags(&self) -> DeviceFlags {
        DeviceFlags::NO_STATE_SWITCH
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        let mut st = self.ring.shared.state.lock();
        loop {
            if st.shutdown.contains(Shutdown::READ) {
                return Ok(IoStatus::End);
            }
            if st.len > 0 {
                let n = st.read_bytes(buf);
                drop(st);
                self.ring.shared.space_avail.notify_all();
                return Ok(IoStatus::Ready(n));
            }
            if st.shutdown.contains(Shutdown::WRITE) {
                return Ok(IoStatus::End);
            }
            if !self.ring.opts.blocking_read {
                return Ok(IoStatus::Pending);
            }
            self.ring.shared.data_avail.wait(&mut st);
        }
    }

    fn write(&mut self, data: &[u8]) -> DeviceResult<IoStatus> {
        let cap = self.ring.capacity;
        let mut st = self.ring.shared.state.lock();
        loop {
            if st.shutdown.intersects(Shutdown::READ | Shutdown::WRITE) {
                return Err(DeviceError::PipeClosed);
            }
            // Atomicity unit: the whole call, capped at the ring capacity.
            let want = data.len().min(cap);
            if cap - st.len >= want {
                let n = st.write_bytes(&data[..want]);
                drop(st);
                self.ring.shared.data_avail.notify_all();
                return Ok(IoStatus::Ready(n));
            }
            if !self.ring.opts.blocking_write {
                if cap - st.len == 0 {
                    return Ok(IoStatus::Pending);
                }
                let n = st.write_bytes(data);
                drop(st);
                self.ring.shared.data_avail.notify_all();
                return Ok(IoStatus::Ready(n));
            }
            self.ring.shared.space_avail.wait(&mut st);
        }
    }

    fn close(&mut self) -> DeviceResult<()> {
        // The port borrows the ring; storage is freed when the last handle
        // drops, and blocked peers are released by shutdown().
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_spsc_in_order_delivery() {
        let ring = ThreadRing::new(64);
        let tx_ring = ring.clone();
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expect = payload.clone();

        let writer = thread::spawn(move || {
            let mut dev = tx_ring.device("w").unwrap();
            dev.write_all(&payload).unwrap();
            dev.close().unwrap();
            tx_ring.shutdown(Shutdown::WRITE);
        });

        let mut dev = ring.device("r").unwrap();
        let mut got = Vec::new();
        let mut chunk = [0u8; 97];
        loop {
            let n = dev.read(&mut chunk).unwrap();
            if n > 0 {
                got.extend_from_slice(&chunk[..n]);
            } else if dev.eof() {
                break;
            } else {
                thread::yield_now();
            }
        }
        writer.join().unwrap();
        assert_eq!(got, expect);
    }

    #[test]
    fn test_read_empty_is_not_eof() {
        let ring = ThreadRing::new(8);
        let mut dev = ring.device("r").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(dev.read(&mut buf).unwrap(), 0);
        assert!(!dev.eof());
        ring.shutdown(Shutdown::WRITE);
        assert_eq!(dev.read(&mut buf).unwrap(), 0);
        assert!(dev.eof());
    }

    #[test]
    fn test_write_after_read_shutdown_is_pipe_closed() {
        let ring = ThreadRing::new(8);
        ring.shutdown(Shutdown::READ);
        let mut dev = ring.device("w").unwrap();
        assert!(matches!(dev.write(b"x"), Err(DeviceError::PipeClosed)));
        assert_eq!(dev.error(), Some(DeviceError::PipeClosed));
    }

    #[test]
    fn test_shutdown_wakes_blocked_writer() {
        let ring = ThreadRing::new(4);
        let mut fill = ring.device("w").unwrap();
        fill.write(b"full").unwrap();

        let tx_ring = ring.clone();
        let writer = thread::spawn(move || {
            let mut dev = tx_ring.device("w").unwrap();
            // Blocks: the ring is full. Released by the read-side shutdown.
            dev.write(b"more")
        });

        thread::sleep(std::time::Duration::from_millis(20));
        ring.shutdown(Shutdown::READ);
        assert!(matches!(writer.join().unwrap(), Err(DeviceError::PipeClosed)));
    }

    #[test]
    fn test_blocking_read_waits_for_data() {
        let ring = ThreadRing::with_options(
            16,
            RingOptions {
                blocking_write: true,
                blocking_read: true,
            },
        );
        let tx_ring = ring.clone();
        let writer = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            let mut dev = tx_ring.device("w").unwrap();
            dev.write(b"late").unwrap();
        });

        let mut dev = ring.device("r").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(dev.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"late");
        writer.join().unwrap();
    }

    #[test]
    fn test_multi_writer_records_stay_intact() {
        const WRITERS: usize = 5;
        const RECORDS: usize = 2_000;
        const RECORD_LEN: usize = 8;

        let ring = ThreadRing::new(64);
        let mut handles = Vec::new();
        for id in 0..WRITERS {
            let tx_ring = ring.clone();
            handles.push(thread::spawn(move || {
                let mut dev = tx_ring.device("w").unwrap();
                let record = [id as u8; RECORD_LEN];
                for _ in 0..RECORDS {
                    dev.write_all(&record).unwrap();
                }
            }));
        }

        let rx_ring = ring.clone();
        let reader = thread::spawn(move || {
            let mut dev = rx_ring.device("r").unwrap();
            let mut got = Vec::new();
            let mut chunk = [0u8; 256];
            loop {
                let n = dev.read(&mut chunk).unwrap();
                if n > 0 {
                    got.extend_from_slice(&chunk[..n]);
                } else if dev.eof() {
                    break;
                } else {
                    thread::yield_now();
                }
            }
            got
        });

        for h in handles {
            h.join().unwrap();
        }
        ring.shutdown(Shutdown::WRITE);
        let got = reader.join().unwrap();

        assert_eq!(got.len(), WRITERS * RECORDS * RECORD_LEN);
        let mut counts = [0usize; WRITERS];
        for record in got.chunks_exact(RECORD_LEN) {
            let id = record[0] as usize;
            assert!(record.iter().all(|&b| b == record[0]), "torn record");
            counts[id] += 1;
        }
        assert!(counts.iter().all(|&c| c == RECORDS));
    }
}
