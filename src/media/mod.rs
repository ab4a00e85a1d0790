//! Media Module
//!
//! Source acquisition, duration probing and segmentation.

mod probe;
mod segmenter;
mod source;

pub use probe::*;
pub use segmenter::*;
pub use source::*;
