pub mod attach;
pub mod gaps;
