//! Clients for remote astronomy services and the local download cache.

pub mod cache;
pub mod convolve;
pub mod fits;
pub mod gaia;
pub mod skyview;

pub use cache::Provenance;
pub use skyview::{Stamp, StampError, StampRequest, get_stamp, get_stamp_from};
