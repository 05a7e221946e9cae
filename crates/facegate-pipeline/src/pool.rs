//! Fixed-capacity pool of detection buffers.
//!
//! Buffers move between a free queue and a ready queue under one mutex.
//! A buffer that has been checked out is wrapped in a [`PooledBuffer`]
//! guard which puts it back on the free queue when dropped, so no
//! processing path can leak one.

use facegate_core::{DetectedFace, Image, PixelFormat};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};

/// A frame converted to detection resolution, plus what detection found in it.
#[derive(Debug)]
pub struct DetectionBuffer {
    pub image: Image,
    pub frame_id: u64,
    pub face: Option<DetectedFace>,
}

/// Queue occupancy snapshot. `free + ready + in_flight == capacity` always.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub free: usize,
    pub ready: usize,
    pub in_flight: usize,
}

struct Queues {
    free: VecDeque<DetectionBuffer>,
    ready: VecDeque<DetectionBuffer>,
    in_flight: usize,
    /// Coalesced wakeup: any number of publishes before the worker runs
    /// leave a single pending flag.
    work_pending: bool,
    closed: bool,
}

pub struct BufferPool {
    queues: Mutex<Queues>,
    ready_cond: Condvar,
    capacity: usize,
}

impl BufferPool {
    /// Allocate `capacity` buffers of the given geometry up front.
    pub fn new(capacity: usize, width: u32, height: u32, format: PixelFormat) -> Self {
        let free = (0..capacity)
            .map(|_| DetectionBuffer {
                image: Image::allocate(width, height, format),
                frame_id: 0,
                face: None,
            })
            .collect();
        Self {
            queues: Mutex::new(Queues {
                free,
                ready: VecDeque::new(),
                in_flight: 0,
                work_pending: false,
                closed: false,
            }),
            ready_cond: Condvar::new(),
            capacity,
        }
    }

    /// Take a free buffer without blocking. `None` means the pool is
    /// exhausted (or closed) and the caller should drop its frame.
    pub fn acquire(&self) -> Option<PooledBuffer<'_>> {
        let mut q = self.queues.lock();
        if q.closed {
            return None;
        }
        let mut buffer = q.free.pop_front()?;
        q.in_flight += 1;
        buffer.face = None;
        Some(PooledBuffer {
            pool: self,
            buffer: Some(buffer),
        })
    }

    /// Block until a ready buffer is available. Returns `None` once the
    /// pool is closed.
    pub fn next_ready(&self) -> Option<PooledBuffer<'_>> {
        let mut q = self.queues.lock();
        loop {
            if q.closed {
                return None;
            }
            if let Some(buffer) = q.ready.pop_front() {
                q.in_flight += 1;
                return Some(PooledBuffer {
                    pool: self,
                    buffer: Some(buffer),
                });
            }
            if !q.work_pending {
                self.ready_cond.wait(&mut q);
            }
            q.work_pending = false;
        }
    }

    /// Wake the consumer and make every further acquire/next_ready fail.
    pub fn close(&self) {
        let mut q = self.queues.lock();
        q.closed = true;
        q.work_pending = true;
        self.ready_cond.notify_all();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        let q = self.queues.lock();
        PoolStats {
            capacity: self.capacity,
            free: q.free.len(),
            ready: q.ready.len(),
            in_flight: q.in_flight,
        }
    }

    fn release(&self, buffer: DetectionBuffer) {
        let mut q = self.queues.lock();
        q.in_flight -= 1;
        q.free.push_back(buffer);
    }

    fn publish(&self, buffer: DetectionBuffer) {
        let mut q = self.queues.lock();
        q.in_flight -= 1;
        q.ready.push_back(buffer);
        q.work_pending = true;
        self.ready_cond.notify_one();
    }
}

/// A checked-out buffer. Dropping it returns the buffer to the free queue.
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Option<DetectionBuffer>,
}

impl PooledBuffer<'_> {
    /// Hand the filled buffer to the detection worker.
    pub fn publish(mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.publish(buffer);
        }
    }

    /// Return the buffer to the free queue.
    pub fn release(self) {}
}

impl Deref for PooledBuffer<'_> {
    type Target = DetectionBuffer;

    fn deref(&self) -> &DetectionBuffer {
        self.buffer.as_ref().expect("pooled buffer present until consumed")
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut DetectionBuffer {
        self.buffer.as_mut().expect("pooled buffer present until consumed")
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}
