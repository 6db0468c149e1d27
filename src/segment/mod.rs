pub mod split;
pub mod timeline;

pub use split::SegmentSplitter;
pub use timeline::{VadLabel, VadTimeline};
