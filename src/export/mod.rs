pub mod artifacts;
pub mod open_file;
pub mod plot;
pub mod writers;
