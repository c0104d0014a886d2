//! Reusable mocks for exercising the cache without a live indexer.
//!
//! [`MockChronik`] implements the client capability set over in-memory
//! per-subject histories; [`MockTransport`] is its push transport with
//! test-controlled event injection. Both record the calls they receive
//! so tests can assert on interaction patterns, not just outcomes.

pub mod mock_client;
pub mod mock_ws;
pub mod test_helpers;

pub use mock_client::MockChronik;
pub use mock_ws::MockTransport;
pub use test_helpers::{
    cache_over, confirmed_history, confirmed_tx, confirmed_tx_mislabeled, fast_config, mempool_tx,
    poll_until, TestTiming,
};
