//! Porter-Duff blend operator registry.
//!
//! Each operator carries its formula as an [`Expr`] over `src_color` /
//! `dst_color`. The registry is built once per process and is read-only; the
//! fusion compiler, the multi-pass pipeline and CPU-side `combine` all read
//! their formulas from it.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::color::Rgba;
use crate::error::{CompositingError, CompositingResult};

use super::shader_ir::{ColorInput, EvalEnv, Expr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlendOperator {
    Clear,
    Copy,
    Source,
    Destination,
    SourceOver,
    DestinationOver,
    SourceIn,
    DestinationIn,
    SourceOut,
    DestinationOut,
    SourceAtop,
    DestinationAtop,
    Xor,
}

impl BlendOperator {
    /// Registry order.
    pub const ALL: [BlendOperator; 13] = [
        BlendOperator::Clear,
        BlendOperator::Copy,
        BlendOperator::Source,
        BlendOperator::Destination,
        BlendOperator::SourceOver,
        BlendOperator::DestinationOver,
        BlendOperator::SourceIn,
        BlendOperator::DestinationIn,
        BlendOperator::SourceOut,
        BlendOperator::DestinationOut,
        BlendOperator::SourceAtop,
        BlendOperator::DestinationAtop,
        BlendOperator::Xor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BlendOperator::Clear => "clear",
            BlendOperator::Copy => "copy",
            BlendOperator::Source => "source",
            BlendOperator::Destination => "destination",
            BlendOperator::SourceOver => "source-over",
            BlendOperator::DestinationOver => "destination-over",
            BlendOperator::SourceIn => "source-in",
            BlendOperator::DestinationIn => "destination-in",
            BlendOperator::SourceOut => "source-out",
            BlendOperator::DestinationOut => "destination-out",
            BlendOperator::SourceAtop => "source-atop",
            BlendOperator::DestinationAtop => "destination-atop",
            BlendOperator::Xor => "xor",
        }
    }

    /// Resolve an operator by its exact registry name.
    pub fn lookup(name: &str) -> CompositingResult<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == name)
            .ok_or_else(|| CompositingError::unknown_operator(name))
    }

    pub fn formula(self) -> &'static Expr {
        &registry().entry(self).formula
    }

    /// Which of `src_color` / `dst_color` the formula reads.
    pub fn inputs(self) -> (bool, bool) {
        let entry = registry().entry(self);
        (entry.reads_src, entry.reads_dst)
    }

    pub fn combine(self, src: Rgba, dst: Rgba) -> Rgba {
        self.formula().eval(&EvalEnv::colors(src, dst)).to_color()
    }

    /// The operator after this one in registry order, wrapping around.
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|op| *op == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    fn build_formula(self) -> Expr {
        let src = Expr::src;
        let dst = Expr::dst;
        match self {
            BlendOperator::Clear => Expr::transparent(),
            BlendOperator::Copy | BlendOperator::Source => src(),
            BlendOperator::Destination => dst(),
            BlendOperator::SourceOver => src() + dst() * src().alpha().one_minus(),
            BlendOperator::DestinationOver => dst() + src() * dst().alpha().one_minus(),
            BlendOperator::SourceIn => src() * dst().alpha(),
            BlendOperator::DestinationIn => dst() * src().alpha(),
            BlendOperator::SourceOut => src() * dst().alpha().one_minus(),
            BlendOperator::DestinationOut => dst() * src().alpha().one_minus(),
            BlendOperator::SourceAtop => src() * dst().alpha() + dst() * src().alpha().one_minus(),
            BlendOperator::DestinationAtop => {
                dst() * src().alpha() + src() * dst().alpha().one_minus()
            }
            BlendOperator::Xor => {
                src() * dst().alpha().one_minus() + dst() * src().alpha().one_minus()
            }
        }
    }
}

impl fmt::Display for BlendOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BlendOperator {
    type Err = CompositingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s)
    }
}

#[derive(Debug)]
pub struct BlendEntry {
    pub operator: BlendOperator,
    pub formula: Expr,
    pub reads_src: bool,
    pub reads_dst: bool,
}

/// The process-wide, read-only operator table.
#[derive(Debug)]
pub struct BlendRegistry {
    entries: Vec<BlendEntry>,
}

impl BlendRegistry {
    fn build() -> Self {
        let entries = BlendOperator::ALL
            .into_iter()
            .map(|operator| {
                let formula = operator.build_formula();
                let inputs = formula.color_inputs();
                BlendEntry {
                    operator,
                    reads_src: inputs.contains(&ColorInput::Src),
                    reads_dst: inputs.contains(&ColorInput::Dst),
                    formula,
                }
            })
            .collect();
        tracing::debug!(operators = BlendOperator::ALL.len(), "blend registry initialized");
        Self { entries }
    }

    pub fn entries(&self) -> &[BlendEntry] {
        &self.entries
    }

    pub fn entry(&self, operator: BlendOperator) -> &BlendEntry {
        // Entries are built in `BlendOperator::ALL` order.
        &self.entries[operator as usize]
    }

    pub fn lookup(&self, name: &str) -> CompositingResult<&BlendEntry> {
        BlendOperator::lookup(name).map(|op| self.entry(op))
    }
}

pub fn registry() -> &'static BlendRegistry {
    static REGISTRY: OnceLock<BlendRegistry> = OnceLock::new();
    REGISTRY.get_or_init(BlendRegistry::build)
}
