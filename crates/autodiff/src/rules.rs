//! Partial derivatives of scalar operators and builtin functions.

use tangle::{BinOp, CmpOp, ConvOp, FloatType, IntType, PrimExp, PrimType, UnOp};

/// A table of partial derivatives, injected into both engines.
///
/// Every method is pure: it receives symbolic operands and returns symbolic partials, which the
/// engine then lowers into statements.
pub trait Rules {
    /// `d op(x) / dx`.
    fn unop(&self, op: UnOp, x: &PrimExp) -> PrimExp;

    /// `(d op(x, y) / dx, d op(x, y) / dy)`.
    fn binop(&self, op: BinOp, x: &PrimExp, y: &PrimExp) -> (PrimExp, PrimExp);

    /// One partial per argument, or `None` if `func` has no rule.
    fn builtin(&self, func: &str, args: &[PrimExp]) -> Option<Vec<PrimExp>>;

    /// Argument and return types of `func`, or `None` if it is unknown.
    fn signature(&self, func: &str) -> Option<(Vec<PrimType>, PrimType)>;
}

/// The standard table: every scalar operator, plus the usual transcendental builtins in 32- and
/// 64-bit versions (`sin32`, `sin64`, ...).
#[derive(Clone, Copy, Debug, Default)]
pub struct Builtins;

const UNARY: &[&str] = &["sqrt", "exp", "log", "sin", "cos", "tan", "tanh"];
const BINARY: &[&str] = &["pow", "atan2"];

fn split(func: &str) -> Option<(&str, FloatType)> {
    if let Some(base) = func.strip_suffix("64") {
        Some((base, FloatType::F64))
    } else {
        func.strip_suffix("32").map(|base| (base, FloatType::F32))
    }
}

fn from_bool(b: PrimExp, t: PrimType) -> PrimExp {
    match t {
        PrimType::Int(it) => PrimExp::conv(ConvOp::BToI(it), b),
        PrimType::Float(ft) => PrimExp::conv(
            ConvOp::UIToFP(IntType::I8, ft),
            PrimExp::conv(ConvOp::BToI(IntType::I8), b),
        ),
        PrimType::Bool | PrimType::Cert => b,
    }
}

/// Partials of `max(x, y)`: `(x >= y, x < y)` as numbers of type `t`.
fn select_max(x: &PrimExp, y: &PrimExp, le: CmpOp, lt: CmpOp, t: PrimType) -> (PrimExp, PrimExp) {
    (
        from_bool(PrimExp::cmp(le, y.clone(), x.clone()), t),
        from_bool(PrimExp::cmp(lt, x.clone(), y.clone()), t),
    )
}

impl Rules for Builtins {
    fn unop(&self, op: UnOp, x: &PrimExp) -> PrimExp {
        match op {
            UnOp::Not => PrimExp::zero(PrimType::Bool),
            UnOp::Complement(t) => PrimExp::zero(PrimType::Int(t)),
            UnOp::Abs(t) => PrimExp::un(UnOp::SSignum(t), x.clone()),
            UnOp::FAbs(t) => PrimExp::un(UnOp::FSignum(t), x.clone()),
            UnOp::SSignum(t) | UnOp::USignum(t) => PrimExp::zero(PrimType::Int(t)),
            UnOp::FSignum(t) => PrimExp::zero(PrimType::Float(t)),
            UnOp::FNeg(t) => PrimExp::float(t, -1.),
        }
    }

    fn binop(&self, op: BinOp, x: &PrimExp, y: &PrimExp) -> (PrimExp, PrimExp) {
        let t = op.ty();
        let one = || PrimExp::one(t);
        let zero = || PrimExp::zero(t);
        match op {
            BinOp::Add(_) | BinOp::FAdd(_) => (one(), one()),
            BinOp::Sub(_) | BinOp::FSub(_) => (one(), one().neg()),
            BinOp::Mul(_) | BinOp::FMul(_) => (y.clone(), x.clone()),
            BinOp::SDiv(_) | BinOp::UDiv(_) | BinOp::FDiv(_) => (
                one().div(y.clone()),
                x.clone().div(y.clone().mul(y.clone())).neg(),
            ),
            BinOp::SMod(_) | BinOp::UMod(_) => (one(), x.clone().div(y.clone()).neg()),
            BinOp::Pow(_) => (
                y.clone()
                    .mul(PrimExp::bin(op, x.clone(), y.clone().sub(one()))),
                zero(),
            ),
            BinOp::FPow(ft) => {
                let log = match ft {
                    FloatType::F32 => "log32",
                    FloatType::F64 => "log64",
                };
                (
                    y.clone()
                        .mul(PrimExp::bin(op, x.clone(), y.clone().sub(one()))),
                    PrimExp::bin(op, x.clone(), y.clone())
                        .mul(PrimExp::call(log, vec![x.clone()], t)),
                )
            }
            BinOp::SMax(it) => select_max(x, y, CmpOp::Sle(it), CmpOp::Slt(it), t),
            BinOp::UMax(it) => select_max(x, y, CmpOp::Ule(it), CmpOp::Ult(it), t),
            BinOp::FMax(ft) => select_max(x, y, CmpOp::FLe(ft), CmpOp::FLt(ft), t),
            BinOp::SMin(it) => select_max(y, x, CmpOp::Sle(it), CmpOp::Slt(it), t),
            BinOp::UMin(it) => select_max(y, x, CmpOp::Ule(it), CmpOp::Ult(it), t),
            BinOp::FMin(ft) => select_max(y, x, CmpOp::FLe(ft), CmpOp::FLt(ft), t),
            BinOp::Shl(_)
            | BinOp::AShr(_)
            | BinOp::And(_)
            | BinOp::Or(_)
            | BinOp::Xor(_)
            | BinOp::LogAnd
            | BinOp::LogOr => (zero(), zero()),
        }
    }

    fn builtin(&self, func: &str, args: &[PrimExp]) -> Option<Vec<PrimExp>> {
        let (base, ft) = split(func)?;
        let t = PrimType::Float(ft);
        let call = |name: &str, args: Vec<PrimExp>| {
            PrimExp::call(&format!("{name}{}", width(ft)), args, t)
        };
        let one = || PrimExp::one(t);
        match (base, args) {
            ("sqrt", [x]) => {
                let two = PrimExp::float(ft, 2.);
                Some(vec![one().div(two.mul(call("sqrt", vec![x.clone()])))])
            }
            ("exp", [x]) => Some(vec![call("exp", vec![x.clone()])]),
            ("log", [x]) => Some(vec![one().div(x.clone())]),
            ("sin", [x]) => Some(vec![call("cos", vec![x.clone()])]),
            ("cos", [x]) => Some(vec![call("sin", vec![x.clone()]).neg()]),
            ("tan", [x]) => {
                let c = call("cos", vec![x.clone()]);
                Some(vec![one().div(c.clone().mul(c))])
            }
            ("tanh", [x]) => {
                let th = call("tanh", vec![x.clone()]);
                Some(vec![one().sub(th.clone().mul(th))])
            }
            ("pow", [x, y]) => Some(vec![
                y.clone()
                    .mul(call("pow", vec![x.clone(), y.clone().sub(one())])),
                call("pow", vec![x.clone(), y.clone()]).mul(call("log", vec![x.clone()])),
            ]),
            ("atan2", [y, x]) => {
                let r = x.clone().mul(x.clone()).add(y.clone().mul(y.clone()));
                Some(vec![x.clone().div(r.clone()), y.clone().div(r).neg()])
            }
            _ => None,
        }
    }

    fn signature(&self, func: &str) -> Option<(Vec<PrimType>, PrimType)> {
        let (base, ft) = split(func)?;
        let t = PrimType::Float(ft);
        if UNARY.contains(&base) {
            Some((vec![t], t))
        } else if BINARY.contains(&base) {
            Some((vec![t, t], t))
        } else {
            None
        }
    }
}

fn width(ft: FloatType) -> &'static str {
    match ft {
        FloatType::F32 => "32",
        FloatType::F64 => "64",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tangle::id;

    fn leaf(i: usize) -> PrimExp {
        PrimExp::Leaf(id::name(i), PrimType::Float(FloatType::F64))
    }

    #[test]
    fn test_mul_partials_swap_operands() {
        let (x, y) = (leaf(0), leaf(1));
        let (dx, dy) = Builtins.binop(BinOp::FMul(FloatType::F64), &x, &y);
        assert_eq!(dx, y);
        assert_eq!(dy, x);
    }

    #[test]
    fn test_builtin_signature() {
        let t = PrimType::Float(FloatType::F32);
        assert_eq!(Builtins.signature("sin32"), Some((vec![t], t)));
        assert_eq!(Builtins.signature("frobnicate64"), None);
        assert_eq!(Builtins.builtin("sin64", &[leaf(0)]).map(|d| d.len()), Some(1));
        assert_eq!(Builtins.builtin("sin64", &[leaf(0), leaf(1)]), None);
    }
}
