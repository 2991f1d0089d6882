//! Aging worker
//!
//! A dedicated thread drives the periodic sweep: memory governor first,
//! then a full rebucketing pass. The cadence is re-read from the runtime
//! knobs every tick, so interval changes apply without restart. Shutdown
//! is synchronous: a message on the channel wakes the thread out of its
//! wait and `stop` joins it.

use std::sync::Weak;
use std::thread;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;

use crate::tracker::HotTracker;

pub(crate) struct AgingWorker {
    tx: Sender<()>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AgingWorker {
    pub(crate) fn spawn(tracker: Weak<HotTracker>) -> Self {
        let (tx, rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("hottrack-aging".into())
            .spawn(move || worker_loop(tracker, rx))
            .expect("spawn aging worker");

        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the worker and wait for it to exit
    pub(crate) fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = self.tx.send(());
            // The last tracker reference can die on the worker thread
            // itself, which lands us here from its own sweep; the shutdown
            // message alone finishes it, joining would self-deadlock.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for AgingWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(tracker: Weak<HotTracker>, rx: Receiver<()>) {
    loop {
        let Some(interval) = tracker.upgrade().map(|t| t.update_interval()) else {
            return;
        };

        match rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                let Some(tracker) = tracker.upgrade() else {
                    return;
                };
                tracker.sweep();
            }
        }
    }
}
