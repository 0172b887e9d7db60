//! Handoff of inbound messages from the network thread to the host's main thread
//!
//! The I/O thread never touches scene state. It posts [`BridgeEvent`]s on an unbounded FIFO
//! channel; the host drains the [`EventQueue`] once per tick into a [`BridgeHandler`].

use crate::types::{ListSnapshot, RefacetResult, RequestFailure, Transaction};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;
use tracing::{error, info, trace};

/// Work item for the host's main thread
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Connected,
    Disconnected,
    Transaction(Transaction),
    List(ListSnapshot),
    Refacet(RefacetResult),
    NewVersion { filename: String, version: u32 },
    NewFile { filename: String },
    RequestFailed(RequestFailure),
}

impl BridgeEvent {
    /// Invoke the matching handler callback
    pub fn dispatch<H: BridgeHandler + ?Sized>(self, handler: &mut H) {
        match self {
            Self::Connected => handler.on_connect(),
            Self::Disconnected => handler.on_disconnect(),
            Self::Transaction(transaction) => handler.on_transaction(transaction),
            Self::List(snapshot) => handler.on_list(snapshot),
            Self::Refacet(result) => handler.on_refacet(result),
            Self::NewVersion { filename, version } => handler.on_new_version(&filename, version),
            Self::NewFile { filename } => handler.on_new_file(&filename),
            Self::RequestFailed(failure) => handler.on_request_failed(failure),
        }
    }
}

/// Main-thread consumer of bridge events
pub trait BridgeHandler {
    fn on_connect(&mut self);

    fn on_disconnect(&mut self);

    fn on_transaction(&mut self, transaction: Transaction);

    fn on_list(&mut self, snapshot: ListSnapshot);

    fn on_refacet(&mut self, result: RefacetResult);

    fn on_new_version(&mut self, filename: &str, version: u32) {
        info!("New version of {}: {}", filename, version);
    }

    fn on_new_file(&mut self, filename: &str) {
        info!("New file: {}", filename);
    }

    fn on_request_failed(&mut self, failure: RequestFailure) {
        error!(
            "{:?} request {} failed with code: {}",
            failure.message_type, failure.request_id, failure.code
        );
    }
}

/// Create a connected sender/queue pair
pub fn event_queue() -> (EventSender, EventQueue) {
    let (sender, receiver) = unbounded();
    (EventSender { sender }, EventQueue { receiver })
}

/// Producer side, held by the connection
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: Sender<BridgeEvent>,
}

impl EventSender {
    /// Post an event; returns false once the queue has been dropped
    pub fn post(&self, event: BridgeEvent) -> bool {
        trace!("Posting event {:?}", std::mem::discriminant(&event));
        self.sender.send(event).is_ok()
    }
}

/// Consumer side, drained by the host tick
#[derive(Debug)]
pub struct EventQueue {
    receiver: Receiver<BridgeEvent>,
}

impl EventQueue {
    /// Dispatch every pending event in arrival order, returning how many ran
    pub fn drain<H: BridgeHandler + ?Sized>(&self, handler: &mut H) -> usize {
        let mut processed = 0;
        while let Some(event) = self.try_next() {
            event.dispatch(handler);
            processed += 1;
        }
        processed
    }

    pub fn try_next(&self) -> Option<BridgeEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BridgeEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
