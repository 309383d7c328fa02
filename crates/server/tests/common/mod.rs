//! Common test utilities and fixtures.

pub mod remote;
pub mod server;

#[allow(unused_imports)]
pub use remote::*;
#[allow(unused_imports)]
pub use server::*;
