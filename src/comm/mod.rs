//! Inter-rank communication: the transport abstraction, an in-process
//! implementation of it, and the staging buffer pool used by every exchange.
//!
//! The solver is SPMD: every rank runs the same program over its own slice of
//! the forest and meets the others only inside [`RankBuffers::sort_and_transfer`].
//! Message sizes are always precomputed on both sides, so there is no
//! handshaking and no probing; a send and a recv per (peer, exchange) is the
//! entire protocol.

mod buffers;
mod local;

pub use buffers::RankBuffers;
pub use local::{LocalCluster, LocalTransport};

/// A communication failure. The solver treats every variant as fatal: the
/// error is propagated out of the cycle and nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("peer {peer} disconnected")]
    Disconnected { peer: usize },
    #[error("message from peer {peer} carried {got} values, expected {expected}")]
    SizeMismatch {
        peer: usize,
        expected: usize,
        got: usize,
    },
}

/// Point-to-point message transport between ranks.
///
/// Contract: `send` is buffered and may complete before the matching `recv`
/// is posted; `recv` blocks until the message arrives; messages between an
/// ordered pair of ranks are delivered in order. Self-sends are not allowed.
pub trait Transport {
    fn my_rank(&self) -> usize;

    fn num_ranks(&self) -> usize;

    fn send(&mut self, peer: usize, data: &[f64]) -> Result<(), CommError>;

    fn recv(&mut self, peer: usize, data: &mut [f64]) -> Result<(), CommError>;

    /// The maximum of `value` over all ranks, on all ranks.
    fn all_reduce_max(&mut self, value: f64) -> Result<f64, CommError>;

    /// Blocks until every rank has arrived.
    fn barrier(&mut self) -> Result<(), CommError> {
        self.all_reduce_max(0.0).map(|_| ())
    }
}
