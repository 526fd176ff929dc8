//! Snapshot queue and the background thread that feeds the sinks.
//!
//! The control loop must never wait on disk or network I/O, so each cycle's
//! snapshot goes through a bounded queue to one consumer thread. When the
//! queue is full the snapshot is dropped and a fault flag is raised until
//! the next successful enqueue.

use crate::error::{CoreError, CoreResult};
use crate::receiver::LogDataReceiver;
use crate::table::LogTable;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Name of the consumer thread.
pub const DISPATCH_THREAD_NAME: &str = "replaykit-dispatch";

/// Producer side of the snapshot queue plus the consumer thread handle.
pub struct Dispatcher {
    tx: Option<Sender<LogTable>>,
    capacity: usize,
    fault: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Starts the consumer thread.
    ///
    /// The thread calls `start` on every receiver, then delivers snapshots
    /// in order until the dispatcher is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn start(capacity: usize, receivers: Vec<Box<dyn LogDataReceiver>>) -> CoreResult<Self> {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let handle = thread::Builder::new()
            .name(DISPATCH_THREAD_NAME.to_string())
            .spawn(move || run_dispatch_loop(&rx, receivers))
            .map_err(|err| CoreError::thread(format!("failed to spawn dispatcher: {err}")))?;
        Ok(Self {
            tx: Some(tx),
            capacity,
            fault: Arc::new(AtomicBool::new(false)),
            handle: Some(handle),
        })
    }

    /// Enqueues a snapshot without blocking.
    ///
    /// Returns false if the snapshot was dropped.
    pub fn offer(&self, snapshot: LogTable) -> bool {
        let Some(tx) = &self.tx else {
            self.fault.store(true, Ordering::SeqCst);
            return false;
        };
        match tx.try_send(snapshot) {
            Ok(()) => {
                self.fault.store(false, Ordering::SeqCst);
                true
            }
            Err(TrySendError::Full(dropped)) => {
                self.fault.store(true, Ordering::SeqCst);
                tracing::error!(
                    capacity = self.capacity,
                    timestamp = dropped.timestamp(),
                    "snapshot queue full, cycle not logged"
                );
                false
            }
            Err(TrySendError::Disconnected(dropped)) => {
                self.fault.store(true, Ordering::SeqCst);
                tracing::error!(
                    timestamp = dropped.timestamp(),
                    "dispatch thread has exited, cycle not logged"
                );
                false
            }
        }
    }

    /// Number of snapshots waiting for the consumer.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.tx.as_ref().map_or(0, Sender::len)
    }

    /// True if the most recent enqueue dropped its snapshot.
    #[must_use]
    pub fn fault(&self) -> bool {
        self.fault.load(Ordering::SeqCst)
    }

    /// Closes the queue and waits for the consumer to drain it and end
    /// every receiver.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer thread panicked.
    pub fn shutdown(mut self) -> CoreResult<()> {
        self.close()
    }

    fn close(&mut self) -> CoreResult<()> {
        drop(self.tx.take());
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| CoreError::thread("dispatch thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::error!(error = %err, "dispatcher shutdown failed");
        }
    }
}

fn run_dispatch_loop(rx: &Receiver<LogTable>, mut receivers: Vec<Box<dyn LogDataReceiver>>) {
    for (index, receiver) in receivers.iter_mut().enumerate() {
        if let Err(err) = receiver.start() {
            tracing::error!(receiver = index, error = %err, "log receiver failed to start");
        }
    }

    // recv keeps returning queued snapshots after the sender is dropped and
    // fails only once the queue is empty.
    while let Ok(table) = rx.recv() {
        for (index, receiver) in receivers.iter_mut().enumerate() {
            if let Err(err) = receiver.put_table(&table) {
                tracing::error!(
                    receiver = index,
                    timestamp = table.timestamp(),
                    error = %err,
                    "log receiver failed"
                );
            }
        }
    }

    for (index, receiver) in receivers.iter_mut().enumerate() {
        if let Err(err) = receiver.end() {
            tracing::error!(receiver = index, error = %err, "log receiver failed to end");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Start(&'static str),
        Table(&'static str, i64),
        End(&'static str),
    }

    struct Recorder {
        name: &'static str,
        events: Arc<Mutex<Vec<Event>>>,
        gate: Option<Receiver<()>>,
        fail_puts: bool,
    }

    impl LogDataReceiver for Recorder {
        fn start(&mut self) -> CoreResult<()> {
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
            self.events.lock().push(Event::Start(self.name));
            Ok(())
        }

        fn put_table(&mut self, table: &LogTable) -> CoreResult<()> {
            self.events
                .lock()
                .push(Event::Table(self.name, table.timestamp()));
            if self.fail_puts {
                return Err(CoreError::invalid_operation("disk full"));
            }
            Ok(())
        }

        fn end(&mut self) -> CoreResult<()> {
            self.events.lock().push(Event::End(self.name));
            Ok(())
        }
    }

    fn recorder(name: &'static str, events: &Arc<Mutex<Vec<Event>>>) -> Box<Recorder> {
        Box::new(Recorder {
            name,
            events: Arc::clone(events),
            gate: None,
            fail_puts: false,
        })
    }

    #[test]
    fn receivers_run_in_registration_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let dispatcher =
            Dispatcher::start(8, vec![recorder("a", &events), recorder("b", &events)]).unwrap();

        assert!(dispatcher.offer(LogTable::new(1)));
        assert!(dispatcher.offer(LogTable::new(2)));
        dispatcher.shutdown().unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                Event::Start("a"),
                Event::Start("b"),
                Event::Table("a", 1),
                Event::Table("b", 1),
                Event::Table("a", 2),
                Event::Table("b", 2),
                Event::End("a"),
                Event::End("b"),
            ]
        );
    }

    #[test]
    fn receiver_errors_do_not_stop_delivery() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut failing = recorder("bad", &events);
        failing.fail_puts = true;
        let dispatcher = Dispatcher::start(8, vec![failing, recorder("good", &events)]).unwrap();

        for ts in 0..3 {
            dispatcher.offer(LogTable::new(ts));
        }
        dispatcher.shutdown().unwrap();

        let good: Vec<_> = events
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Table("good", _)))
            .cloned()
            .collect();
        assert_eq!(good.len(), 3);
    }

    #[test]
    fn overflow_drops_newest_and_sets_fault() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (open_gate, gate) = unbounded();
        let mut blocked = recorder("sink", &events);
        blocked.gate = Some(gate);
        let dispatcher = Dispatcher::start(500, vec![blocked]).unwrap();

        for ts in 0..500 {
            assert!(dispatcher.offer(LogTable::new(ts)));
        }
        assert!(!dispatcher.fault());
        assert_eq!(dispatcher.queued(), 500);

        assert!(!dispatcher.offer(LogTable::new(500)));
        assert!(dispatcher.fault());

        open_gate.send(()).unwrap();
        dispatcher.shutdown().unwrap();

        let received: Vec<i64> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Table(_, ts) => Some(*ts),
                _ => None,
            })
            .collect();
        assert_eq!(received, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn successful_offer_clears_fault() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (open_gate, gate) = unbounded();
        let mut blocked = recorder("sink", &events);
        blocked.gate = Some(gate);
        let dispatcher = Dispatcher::start(1, vec![blocked]).unwrap();

        assert!(dispatcher.offer(LogTable::new(0)));
        assert!(!dispatcher.offer(LogTable::new(1)));
        assert!(dispatcher.fault());

        open_gate.send(()).unwrap();
        while dispatcher.queued() > 0 {
            std::thread::yield_now();
        }
        assert!(dispatcher.offer(LogTable::new(2)));
        assert!(!dispatcher.fault());
        dispatcher.shutdown().unwrap();
    }

    #[test]
    fn consumer_thread_is_named() {
        struct NameCheck(Arc<Mutex<Option<String>>>);
        impl LogDataReceiver for NameCheck {
            fn start(&mut self) -> CoreResult<()> {
                *self.0.lock() = thread::current().name().map(str::to_string);
                Ok(())
            }
            fn put_table(&mut self, _table: &LogTable) -> CoreResult<()> {
                Ok(())
            }
        }

        let name = Arc::new(Mutex::new(None));
        let dispatcher = Dispatcher::start(1, vec![Box::new(NameCheck(Arc::clone(&name)))]).unwrap();
        dispatcher.shutdown().unwrap();
        assert_eq!(name.lock().as_deref(), Some(DISPATCH_THREAD_NAME));
    }
}
