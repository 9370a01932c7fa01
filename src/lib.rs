//! Transport-agnostic core for issuing, verifying, sharing, and resolving
//! SMART Health Cards and SMART Health Links.
//!
//! The crate performs no I/O of its own: HTTP and storage access are
//! supplied by the host application through the traits in [`transport`].
//! Pure pieces — Bundle validation/optimization, the JWS payload codec, the
//! QR numeric codec — are synchronous and runnable without an async
//! runtime.

pub mod bundle;
mod deflate;
pub mod directory;
pub mod error;
pub mod jws;
pub mod keys;
pub mod qr;
pub mod shc_file;
pub mod shl;
pub mod transport;
pub mod vc;

pub use error::{BundleError, FileFormatError, JwsError, QrError, ShlError, VcError};
pub use keys::KeyMaterial;
