pub mod compute;
pub mod decoder;
pub mod patterns;
pub mod routing;
pub mod walker;
pub mod year;
