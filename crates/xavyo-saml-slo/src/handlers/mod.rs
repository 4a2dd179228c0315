//! HTTP handlers for the logout endpoint

pub mod slo;

pub use slo::{slo_post, slo_redirect, SloState};
