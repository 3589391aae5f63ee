//! Compositing engine: shader fragments, the Porter-Duff registry, and the two
//! ways of turning them into frames.
//!
//! This module is organized into several submodules:
//! - `types`: Core type definitions (handles, bindings, FragmentProgram, etc.)
//! - `shader_ir`: Expression tree shared by WGSL generation and CPU evaluation
//! - `blend`: The thirteen Porter-Duff operators and their formulas
//! - `fragment`: Shader fragments and reference generators
//! - `wgsl`: WGSL program assembly
//! - `validation`: WGSL validation using naga
//! - `fusion`: Single-program composition
//! - `multipass`: Offscreen-surface composition
//! - `strategy`: Strategy interface over fusion and multi-pass
//! - `backend`: GPU backend contract, software and wgpu implementations
//!
//! The main entry points are:
//! - `FusionCompiler::compile`: Build one fused program
//! - `MultiPassPipeline::build`: Build every pass of the multi-pass pipeline

pub mod backend;
pub mod blend;
pub mod fragment;
pub mod fusion;
pub mod multipass;
pub mod shader_ir;
pub mod strategy;
pub mod types;
pub mod utils;
pub mod validation;
pub mod wgsl;

pub use backend::{GpuBackend, PixelBuffer, SoftwareBackend};
pub use blend::{BlendOperator, registry};
pub use fragment::{FragmentRole, ShaderFragment, presets};
pub use fusion::{CompiledProgram, FusedProgram, FusionCompiler};
pub use multipass::{MultiPassPipeline, OffscreenSurface};
pub use strategy::{CompositionStrategy, FusedStrategy, MultiPassStrategy, StrategyKind};
pub use types::{Binding, RenderTarget, ResourceCounts};
pub use validation::validate_wgsl;
