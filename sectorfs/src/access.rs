//! The per-inode access controller (component D): many concurrent readers,
//! a serialized writer, and an exclusive resizer, with writer-priority
//! fairness so a queued writer is never starved by a steady stream of
//! readers.
//!
//! The reference source gives each inode two condition variables — a wait
//! queue for new arrivals and an on-deck queue for threads that have already
//! been signalled but still need a compatible state — to avoid a
//! thundering herd on every exit. This implementation keeps that two-queue
//! split: `wait_q` is broadcast to on every transition to `Idle` (every
//! blocked reader gets a chance to recheck at once, which is safe and cheap
//! since readers never block each other once admitted), while `deck_q` is
//! signalled one thread at a time to hand the gate to exactly the next
//! writer instead of waking every queued writer to have all but one recheck
//! and go back to sleep.

use parking_lot::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Reading,
    Writing,
    Resizing,
}

struct Gate {
    mode: Mode,
    readers: u32,
    writers_waiting: u32,
}

/// Per-inode coordinator implementing the states and transitions of the
/// design: `Idle`, `Reading(n)`, `Writing(1)`, `Resizing(1)`.
pub struct AccessController {
    gate: Mutex<Gate>,
    wait_q: Condvar,
    deck_q: Condvar,
    resize_lock: Mutex<()>,
}

impl Default for AccessController {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessController {
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(Gate { mode: Mode::Idle, readers: 0, writers_waiting: 0 }),
            wait_q: Condvar::new(),
            deck_q: Condvar::new(),
            resize_lock: Mutex::new(()),
        }
    }

    /// Block until admitted as a reader, then join the `Reading` cohort.
    pub fn enter_read(&self) {
        let mut g = self.gate.lock();
        while !matches!(g.mode, Mode::Idle | Mode::Reading) || g.writers_waiting > 0 {
            self.wait_q.wait(&mut g);
        }
        g.mode = Mode::Reading;
        g.readers += 1;
    }

    /// Leave the `Reading` cohort. Never blocks.
    pub fn exit_read(&self) {
        let mut g = self.gate.lock();
        debug_assert!(g.readers > 0);
        g.readers -= 1;
        if g.readers == 0 {
            g.mode = Mode::Idle;
            self.wake_next(&mut g);
        }
    }

    /// Block until admitted as the sole writer.
    pub fn enter_write(&self) {
        let mut g = self.gate.lock();
        g.writers_waiting += 1;
        while g.mode != Mode::Idle {
            self.deck_q.wait(&mut g);
        }
        g.writers_waiting -= 1;
        g.mode = Mode::Writing;
        g.readers = 1;
    }

    /// Leave `Writing`. Never blocks.
    pub fn exit_write(&self) {
        let mut g = self.gate.lock();
        debug_assert_eq!(g.mode, Mode::Writing);
        g.mode = Mode::Idle;
        g.readers = 0;
        self.wake_next(&mut g);
    }

    /// Upgrade from `Writing` to `Resizing`. The caller must already hold
    /// writer access (see `write_at`'s implicit upgrade on write-past-EOF);
    /// this additionally takes the strict `resize_lock` mutex named in the
    /// design so a resize is serialized even against a hypothetical second
    /// writer-turned-resizer path. Dropping the returned guard restores
    /// `Writing` so the caller's subsequent `exit_write` is valid.
    pub fn enter_resize(&self) -> ResizeGuard<'_> {
        let permit = self.resize_lock.lock();
        let mut g = self.gate.lock();
        debug_assert_eq!(g.mode, Mode::Writing, "resize requires the caller already holds Writing");
        g.mode = Mode::Resizing;
        drop(g);
        ResizeGuard { ctrl: self, _permit: permit }
    }

    fn wake_next(&self, g: &mut MutexGuard<'_, Gate>) {
        if g.writers_waiting > 0 {
            self.deck_q.notify_one();
        } else {
            self.wait_q.notify_all();
        }
    }
}

/// RAII guard returned by [`AccessController::enter_resize`]; restores
/// `Writing` mode on drop.
pub struct ResizeGuard<'a> {
    ctrl: &'a AccessController,
    _permit: MutexGuard<'a, ()>,
}

impl Drop for ResizeGuard<'_> {
    fn drop(&mut self) {
        let mut g = self.ctrl.gate.lock();
        debug_assert_eq!(g.mode, Mode::Resizing);
        g.mode = Mode::Writing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_run_concurrently() {
        let ctrl = Arc::new(AccessController::new());
        let active = Arc::new(AtomicI32::new(0));
        let max_seen = Arc::new(AtomicI32::new(0));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ctrl = ctrl.clone();
                let active = active.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    ctrl.enter_read();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                    ctrl.exit_read();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) > 1, "readers should overlap");
    }

    #[test]
    fn writer_excludes_readers() {
        let ctrl = Arc::new(AccessController::new());
        let active = Arc::new(AtomicI32::new(0));
        let violated = Arc::new(std::sync::atomic::AtomicBool::new(false));

        ctrl.enter_write();
        let ctrl2 = ctrl.clone();
        let active2 = active.clone();
        let violated2 = violated.clone();
        let reader = thread::spawn(move || {
            ctrl2.enter_read();
            if active2.load(Ordering::SeqCst) != 0 {
                violated2.store(true, Ordering::SeqCst);
            }
            ctrl2.exit_read();
        });
        active.store(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        active.store(0, Ordering::SeqCst);
        ctrl.exit_write();
        reader.join().unwrap();
        assert!(!violated.load(Ordering::SeqCst));
    }

    #[test]
    fn resize_requires_writer_and_restores_writing_on_drop() {
        let ctrl = AccessController::new();
        ctrl.enter_write();
        {
            let _guard = ctrl.enter_resize();
        }
        ctrl.exit_write();
    }
}
