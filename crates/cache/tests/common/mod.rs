pub mod fixtures;
pub mod harness;
pub mod remote;

#[allow(unused_imports)]
pub use fixtures::{png_bytes, test_policy};
#[allow(unused_imports)]
pub use harness::TestCache;
#[allow(unused_imports)]
pub use remote::{Fault, MockArchive};
