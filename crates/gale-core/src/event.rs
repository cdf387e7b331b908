//! Worker events.
//!
//! A queued unit of work targeting one worker. Queues are bounded MPSC
//! channels drained FIFO by the worker run loop, so events for a given
//! connection are strictly ordered.

use crate::conn::Conn;

/// A unit of work for a worker.
pub(crate) enum Event {
    /// A freshly accepted connection awaiting admission.
    NewConn(Box<Conn>),
    /// Step the connection state machine.
    Resume {
        /// Arena slot of the connection.
        slot: usize,
        /// Generation guard against slot reuse.
        generation: u64,
    },
    /// Bytes arrived on an idle keepalive connection.
    KeepaliveWake {
        /// Arena slot of the connection.
        slot: usize,
        /// Generation guard against slot reuse.
        generation: u64,
    },
    /// Begin draining and exit once no connections remain.
    Terminate,
}
