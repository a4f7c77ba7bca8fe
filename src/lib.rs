#![forbid(unsafe_code)]
#![forbid(trivial_numeric_casts)]
#![forbid(unused_qualifications)]
#![forbid(unused_results)]
#![forbid(unreachable_pub)]
#![forbid(deprecated_in_future)]

pub mod bitio;
pub mod debug;
pub mod h264;
pub mod mq;
pub mod snapshot;
pub mod traits;

pub use traits::{CabacReader, CabacWriter, TREE_CONTEXTS};
