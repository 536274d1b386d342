pub mod adaptive;
pub mod capture;
pub mod encode;
pub mod frame;
pub mod orchestrator;
pub mod pipeline;
pub mod priority;
pub mod queue;
pub mod send;
pub mod settings;
pub mod stats;
pub mod viewer;

pub use capture::{DisplayGrabber, TestPatternGrabber};
pub use frame::{EncodedFrame, RawFrame};
pub use orchestrator::StreamOrchestrator;
pub use pipeline::SharePipeline;
pub use settings::{QualityPreset, ShareSettings};
pub use stats::ShareStats;
pub use viewer::{RemoteViewer, ViewerEvent};

pub use huddle_video::PixelBuffer;
