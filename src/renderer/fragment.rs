//! Shader fragments: the units the fusion compiler and the multi-pass pipeline
//! assemble into programs.

use std::collections::BTreeSet;
use std::fmt;

use crate::color::Rgba;
use crate::error::{CompositingError, CompositingResult};

use super::blend::BlendOperator;
use super::shader_ir::{Axis, Expr};
use super::types::Binding;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FragmentRole {
    SourceGenerator,
    DestinationGenerator,
    BlendOperator,
}

impl fmt::Display for FragmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FragmentRole::SourceGenerator => "source-generator",
            FragmentRole::DestinationGenerator => "destination-generator",
            FragmentRole::BlendOperator => "blend-operator",
        })
    }
}

/// An immutable unit of fragment-stage logic.
///
/// Generators map the pixel coordinate to a color; blend fragments map
/// (`src_color`, `dst_color`) to a color.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderFragment {
    name: String,
    role: FragmentRole,
    body: Expr,
    bindings: BTreeSet<Binding>,
}

impl ShaderFragment {
    pub fn source(name: impl Into<String>, body: Expr) -> CompositingResult<Self> {
        Self::generator(FragmentRole::SourceGenerator, name, body, [])
    }

    pub fn destination(name: impl Into<String>, body: Expr) -> CompositingResult<Self> {
        Self::generator(FragmentRole::DestinationGenerator, name, body, [])
    }

    /// A generator with explicitly declared external bindings.
    ///
    /// Generators may not read `src_color`/`dst_color`. Sampling a slot that was
    /// not declared is not checked here; the shader compiler rejects it.
    pub fn generator(
        role: FragmentRole,
        name: impl Into<String>,
        body: Expr,
        bindings: impl IntoIterator<Item = Binding>,
    ) -> CompositingResult<Self> {
        let name = name.into();
        if role == FragmentRole::BlendOperator {
            return Err(CompositingError::fragment(format!(
                "'{name}': blend fragments are built from the registry, not as generators"
            )));
        }
        if let Some(input) = body.color_inputs().into_iter().next() {
            return Err(CompositingError::fragment(format!(
                "{role} '{name}' reads {}, which only blend fragments may read",
                input.wgsl_local()
            )));
        }
        Ok(Self {
            name,
            role,
            body,
            bindings: bindings.into_iter().collect(),
        })
    }

    /// The blend fragment for a registry operator.
    pub fn blend(operator: BlendOperator) -> Self {
        Self {
            name: operator.name().to_string(),
            role: FragmentRole::BlendOperator,
            body: operator.formula().clone(),
            bindings: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> FragmentRole {
        self.role
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }

    pub fn bindings(&self) -> &BTreeSet<Binding> {
        &self.bindings
    }

    pub(crate) fn expect_role(&self, role: FragmentRole) -> CompositingResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(CompositingError::fragment(format!(
                "'{}' is a {} fragment, expected {role}",
                self.name, self.role
            )))
        }
    }
}

/// Reference fragments used by the demo and the tests.
pub mod presets {
    use super::*;

    /// `vec4(0, 0, y, 0.5)` with `y` the normalised vertical coordinate.
    pub fn blue_vertical_gradient() -> ShaderFragment {
        let y = Expr::normalized_coord(Axis::Y);
        generator_unchecked(
            FragmentRole::SourceGenerator,
            "blue-vertical-gradient",
            Expr::vec4(Expr::constant(0.0), Expr::constant(0.0), y, Expr::constant(0.5)),
        )
    }

    /// `vec4(x, 0, 0, 0.5)` with `x` the normalised horizontal coordinate.
    pub fn red_horizontal_gradient() -> ShaderFragment {
        let x = Expr::normalized_coord(Axis::X);
        generator_unchecked(
            FragmentRole::DestinationGenerator,
            "red-horizontal-gradient",
            Expr::vec4(x, Expr::constant(0.0), Expr::constant(0.0), Expr::constant(0.5)),
        )
    }

    /// Opaque blue whose alpha ramps up with `y`.
    pub fn blue_alpha_ramp() -> ShaderFragment {
        let y = Expr::normalized_coord(Axis::Y);
        generator_unchecked(
            FragmentRole::SourceGenerator,
            "blue-alpha-ramp",
            Expr::vec4(Expr::constant(0.0), Expr::constant(0.0), Expr::constant(1.0), y),
        )
    }

    /// Opaque red ramp reaching full intensity at half the viewport width.
    pub fn red_double_ramp() -> ShaderFragment {
        let x = Expr::frag_coord(Axis::X) / (Expr::resolution(Axis::X) * Expr::constant(0.5));
        generator_unchecked(
            FragmentRole::DestinationGenerator,
            "red-double-ramp",
            Expr::vec4(x, Expr::constant(0.0), Expr::constant(0.0), Expr::constant(1.0)),
        )
    }

    pub fn solid(role: FragmentRole, color: Rgba) -> ShaderFragment {
        generator_unchecked(role, "solid", Expr::rgba(color))
    }

    fn generator_unchecked(role: FragmentRole, name: &str, body: Expr) -> ShaderFragment {
        ShaderFragment {
            name: name.to_string(),
            role,
            body,
            bindings: BTreeSet::new(),
        }
    }
}
