//! Bounded admission for chapter workers.
//!
//! A bounded channel holds one token per slot. Waiting workers poll at
//! 500 ms so a cancelled job leaves the queue without ever starting
//! synthesis; the permit returns its token on drop, covering every exit
//! path including panics inside a worker.

use std::time::Duration;

use crossbeam_channel as channel;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct WorkerGate {
    slots: channel::Sender<()>,
    queue: channel::Receiver<()>,
}

pub struct GatePermit {
    slots: channel::Sender<()>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let _ = self.slots.send(());
    }
}

impl WorkerGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (slots, queue) = channel::bounded(capacity);
        for _ in 0..capacity {
            let _ = slots.send(());
        }
        Self { slots, queue }
    }

    /// Block until a slot frees up, re-checking `should_abort` every 500 ms.
    /// Returns `None` when aborted, so a cancelled worker never enters
    /// synthesis.
    pub fn acquire(&self, should_abort: &dyn Fn() -> bool) -> Option<GatePermit> {
        loop {
            if should_abort() {
                return None;
            }
            match self.queue.recv_timeout(POLL_INTERVAL) {
                Ok(()) => {
                    return Some(GatePermit {
                        slots: self.slots.clone(),
                    });
                }
                Err(channel::RecvTimeoutError::Timeout) => continue,
                Err(channel::RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn never_admits_more_than_capacity() {
        let gate = Arc::new(WorkerGate::new(3));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let gate = gate.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(thread::spawn(move || {
                let permit = gate.acquire(&|| false).expect("gate open");
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                active.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3, "peak {}", peak.load(Ordering::SeqCst));
        assert!(peak.load(Ordering::SeqCst) >= 2, "gate should admit concurrently");
    }

    #[test]
    fn abort_while_waiting_returns_none() {
        let gate = Arc::new(WorkerGate::new(1));
        let permit = gate.acquire(&|| false).unwrap();

        let abort = Arc::new(AtomicBool::new(false));
        let waiter = {
            let gate = gate.clone();
            let abort = abort.clone();
            thread::spawn(move || gate.acquire(&move || abort.load(Ordering::SeqCst)).is_none())
        };
        thread::sleep(Duration::from_millis(50));
        abort.store(true, Ordering::SeqCst);
        assert!(waiter.join().unwrap(), "waiter should give up after abort");
        drop(permit);
    }

    #[test]
    fn permits_release_on_drop() {
        let gate = WorkerGate::new(1);
        for _ in 0..5 {
            let permit = gate.acquire(&|| false).unwrap();
            drop(permit);
        }
    }
}
