//! Shared utilities

pub mod cancel;
pub mod flight;
pub mod fs;
pub mod paths;

pub use cancel::CancelToken;
pub use flight::FlightGroup;
