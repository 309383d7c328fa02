//! Remote archive backends.

pub mod s3;
