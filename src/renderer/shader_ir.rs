//! Small expression tree used for every piece of per-pixel shading logic.
//!
//! The same tree is lowered to WGSL (what the GPU compiles) and evaluated
//! directly on the CPU (what the software backend and `BlendOperator::combine`
//! run), so the two can never disagree about a formula.

use std::collections::BTreeSet;
use std::ops;

use crate::color::Rgba;

use super::types::ValueType;
use super::utils::fmt_f32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    fn wgsl(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
        }
    }

    fn pick(self, v: [f32; 2]) -> f32 {
        match self {
            Axis::X => v[0],
            Axis::Y => v[1],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    R,
    G,
    B,
    A,
}

impl Channel {
    fn wgsl(self) -> &'static str {
        match self {
            Channel::R => "r",
            Channel::G => "g",
            Channel::B => "b",
            Channel::A => "a",
        }
    }

    fn pick(self, c: Rgba) -> f32 {
        match self {
            Channel::R => c.r,
            Channel::G => c.g,
            Channel::B => c.b,
            Channel::A => c.a,
        }
    }
}

/// The two intermediate colors a blend body reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColorInput {
    Src,
    Dst,
}

impl ColorInput {
    pub fn wgsl_local(self) -> &'static str {
        match self {
            ColorInput::Src => "src_color",
            ColorInput::Dst => "dst_color",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn wgsl(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Const(f32),
    /// Window-space pixel coordinate, origin bottom-left, pixel centres at +0.5.
    FragCoord(Axis),
    /// Viewport size in pixels, baked into the program at compile time.
    Resolution(Axis),
    Color(ColorInput),
    /// Texel of the texture bound at `slot`, fetched at the current pixel.
    Sample(u32),
    Vec4(Box<[Expr; 4]>),
    Swizzle(Box<Expr>, Channel),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// Result of evaluating an [`Expr`] on the CPU.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    F32(f32),
    Vec4(Rgba),
}

impl Value {
    pub fn ty(self) -> ValueType {
        match self {
            Value::F32(_) => ValueType::F32,
            Value::Vec4(_) => ValueType::Vec4,
        }
    }

    /// Scalars splat, so a mistyped body still yields a color instead of panicking.
    pub fn to_color(self) -> Rgba {
        match self {
            Value::F32(v) => Rgba::new(v, v, v, v),
            Value::Vec4(c) => c,
        }
    }

    fn to_f32(self) -> f32 {
        match self {
            Value::F32(v) => v,
            Value::Vec4(c) => c.r,
        }
    }
}

/// Per-pixel inputs for CPU evaluation.
pub struct EvalEnv<'a> {
    pub frag_coord: [f32; 2],
    pub resolution: [f32; 2],
    pub src: Rgba,
    pub dst: Rgba,
    pub sample: &'a dyn Fn(u32) -> Rgba,
}

impl EvalEnv<'_> {
    /// Environment for pure color math: no pixel position and nothing bound.
    pub fn colors(src: Rgba, dst: Rgba) -> EvalEnv<'static> {
        EvalEnv {
            frag_coord: [0.0, 0.0],
            resolution: [1.0, 1.0],
            src,
            dst,
            sample: &|_| Rgba::TRANSPARENT,
        }
    }
}

impl Expr {
    pub fn constant(v: f32) -> Self {
        Expr::Const(v)
    }

    pub fn src() -> Self {
        Expr::Color(ColorInput::Src)
    }

    pub fn dst() -> Self {
        Expr::Color(ColorInput::Dst)
    }

    pub fn frag_coord(axis: Axis) -> Self {
        Expr::FragCoord(axis)
    }

    pub fn resolution(axis: Axis) -> Self {
        Expr::Resolution(axis)
    }

    /// Pixel coordinate normalised to `[0, 1]` along `axis`.
    pub fn normalized_coord(axis: Axis) -> Self {
        Expr::frag_coord(axis) / Expr::resolution(axis)
    }

    pub fn sample(slot: u32) -> Self {
        Expr::Sample(slot)
    }

    pub fn vec4(r: Expr, g: Expr, b: Expr, a: Expr) -> Self {
        Expr::Vec4(Box::new([r, g, b, a]))
    }

    pub fn rgba(c: Rgba) -> Self {
        Expr::vec4(
            Expr::Const(c.r),
            Expr::Const(c.g),
            Expr::Const(c.b),
            Expr::Const(c.a),
        )
    }

    pub fn transparent() -> Self {
        Expr::rgba(Rgba::TRANSPARENT)
    }

    pub fn channel(self, channel: Channel) -> Self {
        Expr::Swizzle(Box::new(self), channel)
    }

    pub fn alpha(self) -> Self {
        self.channel(Channel::A)
    }

    pub fn one_minus(self) -> Self {
        Expr::Const(1.0) - self
    }

    fn binary(op: BinaryOp, a: Expr, b: Expr) -> Self {
        Expr::Binary(op, Box::new(a), Box::new(b))
    }

    /// Static result type, following WGSL's scalar/vector promotion rules.
    /// Shape errors are left for the shader compiler to report.
    pub fn ty(&self) -> ValueType {
        match self {
            Expr::Const(_)
            | Expr::FragCoord(_)
            | Expr::Resolution(_)
            | Expr::Swizzle(..) => ValueType::F32,
            Expr::Color(_) | Expr::Sample(_) | Expr::Vec4(_) => ValueType::Vec4,
            Expr::Binary(_, a, b) => {
                if a.ty() == ValueType::Vec4 || b.ty() == ValueType::Vec4 {
                    ValueType::Vec4
                } else {
                    ValueType::F32
                }
            }
        }
    }

    /// Pre-order walk over this node and all of its children.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Vec4(parts) => parts.iter().for_each(|p| p.visit(f)),
            Expr::Swizzle(inner, _) => inner.visit(f),
            Expr::Binary(_, a, b) => {
                a.visit(f);
                b.visit(f);
            }
            Expr::Const(_)
            | Expr::FragCoord(_)
            | Expr::Resolution(_)
            | Expr::Color(_)
            | Expr::Sample(_) => {}
        }
    }

    pub fn sampled_slots(&self) -> BTreeSet<u32> {
        let mut slots = BTreeSet::new();
        self.visit(&mut |e| {
            if let Expr::Sample(slot) = e {
                slots.insert(*slot);
            }
        });
        slots
    }

    pub fn color_inputs(&self) -> BTreeSet<ColorInput> {
        let mut inputs = BTreeSet::new();
        self.visit(&mut |e| {
            if let Expr::Color(input) = e {
                inputs.insert(*input);
            }
        });
        inputs
    }

    pub fn reads_pixel_position(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            found |= matches!(e, Expr::FragCoord(_) | Expr::Sample(_));
        });
        found
    }

    pub fn to_wgsl(&self) -> String {
        match self {
            Expr::Const(v) => fmt_f32(*v),
            Expr::FragCoord(axis) => format!("frag_coord.{}", axis.wgsl()),
            Expr::Resolution(axis) => format!("RESOLUTION.{}", axis.wgsl()),
            Expr::Color(input) => input.wgsl_local().to_string(),
            Expr::Sample(slot) => format!("textureLoad(tex_{slot}, vec2i(position.xy), 0)"),
            Expr::Vec4(parts) => {
                let [r, g, b, a] = parts.as_ref();
                format!(
                    "vec4f({}, {}, {}, {})",
                    r.to_wgsl(),
                    g.to_wgsl(),
                    b.to_wgsl(),
                    a.to_wgsl()
                )
            }
            Expr::Swizzle(inner, channel) => format!("{}.{}", inner.to_wgsl(), channel.wgsl()),
            Expr::Binary(op, a, b) => format!("({} {} {})", a.to_wgsl(), op.wgsl(), b.to_wgsl()),
        }
    }

    pub fn eval(&self, env: &EvalEnv<'_>) -> Value {
        match self {
            Expr::Const(v) => Value::F32(*v),
            Expr::FragCoord(axis) => Value::F32(axis.pick(env.frag_coord)),
            Expr::Resolution(axis) => Value::F32(axis.pick(env.resolution)),
            Expr::Color(ColorInput::Src) => Value::Vec4(env.src),
            Expr::Color(ColorInput::Dst) => Value::Vec4(env.dst),
            Expr::Sample(slot) => Value::Vec4((env.sample)(*slot)),
            Expr::Vec4(parts) => {
                let [r, g, b, a] = parts.as_ref();
                Value::Vec4(Rgba::new(
                    r.eval(env).to_f32(),
                    g.eval(env).to_f32(),
                    b.eval(env).to_f32(),
                    a.eval(env).to_f32(),
                ))
            }
            Expr::Swizzle(inner, channel) => Value::F32(channel.pick(inner.eval(env).to_color())),
            Expr::Binary(op, a, b) => match (a.eval(env), b.eval(env)) {
                (Value::F32(x), Value::F32(y)) => Value::F32(op.apply(x, y)),
                (x, y) => {
                    let (x, y) = (x.to_color().to_array(), y.to_color().to_array());
                    Value::Vec4(Rgba::from_array(std::array::from_fn(|i| {
                        op.apply(x[i], y[i])
                    })))
                }
            },
        }
    }
}

impl ops::Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, self, rhs)
    }
}

impl ops::Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Sub, self, rhs)
    }
}

impl ops::Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Mul, self, rhs)
    }
}

impl ops::Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Div, self, rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_over_lowers_to_parenthesized_wgsl() {
        let e = Expr::src() + Expr::dst() * Expr::src().alpha().one_minus();
        assert_eq!(
            e.to_wgsl(),
            "(src_color + (dst_color * (1.0 - src_color.a)))"
        );
    }

    #[test]
    fn scalar_vector_mix_is_vec4() {
        let e = Expr::src() * Expr::dst().alpha();
        assert_eq!(e.ty(), ValueType::Vec4);
        assert_eq!(Expr::dst().alpha().one_minus().ty(), ValueType::F32);
    }

    #[test]
    fn eval_broadcasts_scalars_over_vectors() {
        let e = Expr::src() * Expr::dst().alpha();
        let env = EvalEnv::colors(
            Rgba::new(0.2, 0.4, 0.6, 0.8),
            Rgba::new(0.0, 0.0, 0.0, 0.5),
        );
        let out = e.eval(&env).to_color();
        assert!(out.approx_eq(Rgba::new(0.1, 0.2, 0.3, 0.4), 1e-7));
    }

    #[test]
    fn normalized_coord_divides_by_resolution() {
        let e = Expr::normalized_coord(Axis::Y);
        let env = EvalEnv {
            frag_coord: [10.5, 256.5],
            resolution: [512.0, 512.0],
            src: Rgba::TRANSPARENT,
            dst: Rgba::TRANSPARENT,
            sample: &|_| Rgba::TRANSPARENT,
        };
        assert_eq!(e.eval(&env), Value::F32(256.5 / 512.0));
        assert_eq!(e.to_wgsl(), "(frag_coord.y / RESOLUTION.y)");
    }

    #[test]
    fn sample_reads_through_env_callback() {
        let env = EvalEnv {
            frag_coord: [0.5, 0.5],
            resolution: [1.0, 1.0],
            src: Rgba::TRANSPARENT,
            dst: Rgba::TRANSPARENT,
            sample: &|slot| Rgba::new(slot as f32, 0.0, 0.0, 1.0),
        };
        assert_eq!(
            Expr::sample(1).eval(&env),
            Value::Vec4(Rgba::new(1.0, 0.0, 0.0, 1.0))
        );
    }

    #[test]
    fn visitors_collect_inputs_and_slots() {
        let e = Expr::sample(0) * Expr::sample(3).alpha() + Expr::dst();
        assert_eq!(e.sampled_slots().into_iter().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(
            e.color_inputs().into_iter().collect::<Vec<_>>(),
            vec![ColorInput::Dst]
        );
        assert!(e.reads_pixel_position());
        assert!(!Expr::src().reads_pixel_position());
    }
}
