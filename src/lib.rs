pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod features;
pub mod pipeline;
pub mod precompute;
pub mod processor;
pub mod providers;
pub mod report;
pub mod segment;
pub mod transcribe;
pub mod video;

pub use cache::FeatureCache;
pub use config::{AnalysisSettings, Backend, Config, ProviderSelection};
pub use error::{MmsegError, Result};
pub use pipeline::{print_summary, Analyzer, MediaSource};
pub use providers::Providers;
pub use report::{
    read_report, report_path, write_report, AnalysisMode, AnalysisReport, SegmentResult, Summary,
};
