//! Multi-version concurrency control: the transaction index and the
//! algorithms that operate on MVV version chains (spec §4.5, §4.7).

pub mod txn_index;
pub mod version;

pub use txn_index::{TransactionIndex, TransactionState, TransactionStatus, WwOutcome, N_BUCKETS};
pub use version::{is_visible_present, prune, store_into_mvv, visible_version, StoreOutcome};
