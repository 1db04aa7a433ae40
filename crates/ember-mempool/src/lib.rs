//! # ember-mempool
//!
//! Transaction memory pool for the Ember blockchain.
//!
//! The pool tracks, for every transaction, the aggregate size, modified fee
//! and signature-operation cost of the transaction together with all of its
//! unconfirmed ancestors, and exposes an index ordered by descending
//! ancestor fee-rate. Template assembly consumes that view.

mod entry;
mod error;
mod ordering;
mod pool;

pub use entry::MempoolEntry;
pub use error::{MempoolError, MempoolResult};
pub use ordering::AncestorScore;
pub use pool::{Mempool, PoolView};
