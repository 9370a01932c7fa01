//! SMART Health Links: payload codec, file crypto, manifest builder, and
//! viewer/resolver (components F-I, §4.F-§4.I).

pub mod crypto;
pub mod manifest;
pub mod payload;
pub mod viewer;

pub use payload::{GenerateOptions, Shl, ShlPayload};
