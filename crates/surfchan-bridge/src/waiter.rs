//! Pending-waiter table
//!
//! The only state shared between blocking callers and the background
//! dispatcher. Holds at most one waiter per frame kind, plus the frames that
//! arrived while nobody was waiting for them.

use crate::protocol::{FrameKind, PeerMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use surfchan_core::{Result, SurfError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How a waiter was resolved
#[derive(Debug)]
pub enum WaitOutcome {
    Delivered(PeerMessage),
    Cancelled,
}

/// A registered wait for the next frame of one kind
#[derive(Debug)]
pub struct PendingWaiter {
    kind: FrameKind,
    rx: oneshot::Receiver<WaitOutcome>,
}

impl PendingWaiter {
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Wait for the matching frame. Teardown yields `SurfError::Cancelled`.
    pub async fn wait(self) -> Result<PeerMessage> {
        match self.rx.await {
            Ok(WaitOutcome::Delivered(msg)) => Ok(msg),
            Ok(WaitOutcome::Cancelled) | Err(_) => Err(SurfError::Cancelled),
        }
    }
}

#[derive(Default)]
struct Slots {
    waiters: HashMap<FrameKind, oneshot::Sender<WaitOutcome>>,
    buffered: HashMap<FrameKind, VecDeque<PeerMessage>>,
}

/// Waiter registry shared between caller and dispatcher
pub struct WaiterTable {
    slots: Mutex<Slots>,
    max_buffered: usize,
    stacked: AtomicU64,
}

impl WaiterTable {
    pub fn new(max_buffered: usize) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            max_buffered: max_buffered.max(1),
            stacked: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register interest in the next frame of `kind`.
    ///
    /// If a frame of that kind is already buffered, the waiter resolves with
    /// the oldest one immediately. A second waiter for the same kind breaks
    /// lock-step and is rejected.
    pub fn register(&self, kind: FrameKind) -> Result<PendingWaiter> {
        let mut slots = self.lock();

        if let Some(existing) = slots.waiters.get(&kind) {
            if !existing.is_closed() {
                return Err(SurfError::ProtocolError(format!(
                    "a {:?} request is already outstanding",
                    kind
                )));
            }
            slots.waiters.remove(&kind);
        }

        let (tx, rx) = oneshot::channel();
        let buffered = slots.buffered.get_mut(&kind).and_then(VecDeque::pop_front);
        match buffered {
            Some(msg) => {
                debug!("{:?} waiter satisfied from buffer", kind);
                let _ = tx.send(WaitOutcome::Delivered(msg));
            }
            None => {
                slots.waiters.insert(kind, tx);
            }
        }

        Ok(PendingWaiter { kind, rx })
    }

    /// Hand a decoded message to its waiter.
    ///
    /// Returns the message back when no waiter exists so the caller can decide
    /// whether to buffer it or act on it.
    pub fn resolve(&self, msg: PeerMessage) -> std::result::Result<(), PeerMessage> {
        let kind = msg.kind();
        let waiter = self.lock().waiters.remove(&kind);
        match waiter {
            Some(tx) => match tx.send(WaitOutcome::Delivered(msg)) {
                Ok(()) => Ok(()),
                // Waiter gave up before the frame arrived
                Err(WaitOutcome::Delivered(msg)) => Err(msg),
                Err(WaitOutcome::Cancelled) => Ok(()),
            },
            None => Err(msg),
        }
    }

    /// Keep a message nobody is waiting for yet.
    ///
    /// More than one unconsumed frame means the caller is slower than the
    /// game's tick rate; each excess frame logs a stacking warning.
    pub fn buffer(&self, msg: PeerMessage) {
        let kind = msg.kind();
        let mut slots = self.lock();
        let queue = slots.buffered.entry(kind).or_default();
        queue.push_back(msg);

        if queue.len() > 1 {
            self.stacked.fetch_add(1, Ordering::Relaxed);
            warn!("Frames are stacking! {:?} queue size: {}", kind, queue.len());
        }
        if queue.len() > self.max_buffered {
            queue.pop_front();
            warn!("Dropped oldest buffered {:?} frame", kind);
        }
    }

    /// Resolve every waiter with `Cancelled` and drop buffered frames
    pub fn cancel_all(&self) {
        let mut slots = self.lock();
        let count = slots.waiters.len();
        for (_, tx) in slots.waiters.drain() {
            let _ = tx.send(WaitOutcome::Cancelled);
        }
        slots.buffered.clear();
        if count > 0 {
            debug!("Cancelled {} pending waiter(s)", count);
        }
    }

    /// Number of live waiters for `kind` (0 or 1)
    pub fn pending(&self, kind: FrameKind) -> usize {
        self.lock()
            .waiters
            .get(&kind)
            .map_or(0, |tx| usize::from(!tx.is_closed()))
    }

    /// Frames of `kind` received but not yet consumed
    pub fn buffered(&self, kind: FrameKind) -> usize {
        self.lock().buffered.get(&kind).map_or(0, VecDeque::len)
    }

    /// Total stacking warnings emitted so far
    pub fn stacking_warnings(&self) -> u64 {
        self.stacked.load(Ordering::Relaxed)
    }
}
