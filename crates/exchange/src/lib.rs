pub mod client;
pub mod params;
pub mod signer;

pub use client::*;
pub use params::*;
pub use signer::*;
