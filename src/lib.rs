#![forbid(unsafe_code)]

pub mod color;
pub mod config;
pub mod driver;
pub mod error;
pub mod host;
pub mod perf;
pub mod renderer;

pub use color::Rgba;
pub use config::{BackendKind, CompositorConfig, FragmentSet};
pub use driver::{DriverOptions, DriverState, RenderLoopDriver};
pub use error::{CompositingError, CompositingResult};
pub use host::{DisplayHost, FrameClock, FrameHandler, HeadlessHost, HostSummary};
pub use perf::RollingWindow;
pub use renderer::{BlendOperator, ShaderFragment, StrategyKind};
