//! Request and response types for the logout API

pub mod responses;

pub use responses::*;
