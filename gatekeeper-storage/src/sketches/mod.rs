//! Fixed-memory probabilistic sketches shared by the detector layer.
//!
//! Both sketches are owned by exactly one entity profile (or one detector
//! state within a profile) and are never shared across threads; the
//! no-locking requirement comes from the caller, not from these types.

mod count_min;
mod hyperloglog;

pub use count_min::CountMinSketch;
pub use hyperloglog::HyperLogLog;
