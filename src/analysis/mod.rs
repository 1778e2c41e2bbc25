pub mod bottlenecks;
pub mod compare;
pub mod fingerprint;
pub mod requests;
pub mod stats;
