//! Core type definitions for the renderer module.

use std::collections::BTreeSet;

use super::shader_ir::{ColorInput, Expr};

/// WGSL value type for shader expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    F32,
    Vec4,
}

impl ValueType {
    /// Returns the WGSL type name for this value type.
    pub fn wgsl(self) -> &'static str {
        match self {
            ValueType::F32 => "f32",
            ValueType::Vec4 => "vec4f",
        }
    }
}

/// An external input a fragment expects to be bound before it runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Binding {
    /// A color texture bound at sampling slot `slot` (`@group(0) @binding(slot)`).
    Texture { slot: u32 },
}

impl Binding {
    pub fn texture_slot(self) -> u32 {
        match self {
            Binding::Texture { slot } => slot,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceHandle(pub u32);

/// Where a draw writes its output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// The visible surface owned by the backend.
    Screen,
    Surface(SurfaceHandle),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    TriangleStrip,
    TriangleList,
}

/// Fragment-stage logic of one program, kept alongside its WGSL text.
///
/// `locals` run in order and assign `src_color` / `dst_color`; `output` is the
/// color written to the target.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentProgram {
    pub locals: Vec<(ColorInput, Expr)>,
    pub output: Expr,
    pub bindings: BTreeSet<Binding>,
}

impl FragmentProgram {
    pub fn declares_slot(&self, slot: u32) -> bool {
        self.bindings.contains(&Binding::Texture { slot })
    }

    pub fn declared_slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.bindings.iter().map(|b| b.texture_slot())
    }
}

/// Everything a backend needs to build one executable program.
#[derive(Clone, Debug)]
pub struct ProgramSource {
    pub label: String,
    /// A standalone vertex WGSL module (shared full-screen quad stage).
    pub vertex: String,
    /// A standalone fragment WGSL module.
    pub fragment: String,
    pub program: FragmentProgram,
    /// Viewport size baked into `fragment`.
    pub resolution: [u32; 2],
}

/// Number of live backend objects, used for leak checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub programs: usize,
    pub buffers: usize,
    pub surfaces: usize,
}

impl ResourceCounts {
    pub fn is_empty(&self) -> bool {
        self.programs == 0 && self.buffers == 0 && self.surfaces == 0
    }
}
