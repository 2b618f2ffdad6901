use crate::{id::Name, SubExp};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntType {
    I8,
    I16,
    I32,
    I64,
}

impl IntType {
    pub fn bits(self) -> u32 {
        match self {
            IntType::I8 => 8,
            IntType::I16 => 16,
            IntType::I32 => 32,
            IntType::I64 => 64,
        }
    }

    /// Sign-extend the low `bits` of `val`, so every stored integer is in canonical form.
    pub fn wrap(self, val: i64) -> i64 {
        let shift = 64 - self.bits();
        (val << shift) >> shift
    }

    /// Zero-extend the low `bits` of `val`.
    pub fn unsigned(self, val: i64) -> u64 {
        let bits = self.bits();
        if bits == 64 {
            val as u64
        } else {
            (val as u64) & ((1u64 << bits) - 1)
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FloatType {
    F32,
    F64,
}

impl FloatType {
    /// Round `val` to the precision of this type.
    pub fn round(self, val: f64) -> f64 {
        match self {
            FloatType::F32 => val as f32 as f64,
            FloatType::F64 => val,
        }
    }
}

/// Scalar types. Integers carry no signedness; operations choose how to interpret them.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimType {
    Int(IntType),
    Float(FloatType),
    Bool,
    /// Proof that some runtime check succeeded; has no numeric content.
    Cert,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PrimValue {
    Int(IntType, i64),
    Float(FloatType, f64),
    Bool(bool),
    Cert,
}

impl PrimValue {
    pub fn ty(self) -> PrimType {
        match self {
            PrimValue::Int(t, _) => PrimType::Int(t),
            PrimValue::Float(t, _) => PrimType::Float(t),
            PrimValue::Bool(_) => PrimType::Bool,
            PrimValue::Cert => PrimType::Cert,
        }
    }

    /// The additive identity of `t`, which also seeds every implicit tangent and adjoint.
    pub fn zero(t: PrimType) -> Self {
        match t {
            PrimType::Int(t) => PrimValue::Int(t, 0),
            PrimType::Float(t) => PrimValue::Float(t, 0.),
            PrimType::Bool => PrimValue::Bool(false),
            PrimType::Cert => PrimValue::Cert,
        }
    }

    pub fn one(t: PrimType) -> Self {
        match t {
            PrimType::Int(t) => PrimValue::Int(t, 1),
            PrimType::Float(t) => PrimValue::Float(t, 1.),
            PrimType::Bool => PrimValue::Bool(true),
            PrimType::Cert => PrimValue::Cert,
        }
    }

    /// `val` converted to type `t`; booleans and certificates ignore the magnitude.
    pub fn from_f64(t: PrimType, val: f64) -> Self {
        match t {
            PrimType::Int(t) => PrimValue::Int(t, t.wrap(val as i64)),
            PrimType::Float(t) => PrimValue::Float(t, t.round(val)),
            PrimType::Bool => PrimValue::Bool(val != 0.),
            PrimType::Cert => PrimValue::Cert,
        }
    }

    pub fn f64(val: f64) -> Self {
        PrimValue::Float(FloatType::F64, val)
    }

    pub fn i64(val: i64) -> Self {
        PrimValue::Int(IntType::I64, val)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnOp {
    Not,
    Complement(IntType),
    Abs(IntType),
    FAbs(FloatType),
    SSignum(IntType),
    USignum(IntType),
    FSignum(FloatType),
    FNeg(FloatType),
}

impl UnOp {
    pub fn ty(self) -> PrimType {
        match self {
            UnOp::Not => PrimType::Bool,
            UnOp::Complement(t) | UnOp::Abs(t) | UnOp::SSignum(t) | UnOp::USignum(t) => {
                PrimType::Int(t)
            }
            UnOp::FAbs(t) | UnOp::FSignum(t) | UnOp::FNeg(t) => PrimType::Float(t),
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    /// Wrapping.
    Add(IntType),
    FAdd(FloatType),
    Sub(IntType),
    FSub(FloatType),
    Mul(IntType),
    FMul(FloatType),
    SDiv(IntType),
    UDiv(IntType),
    FDiv(FloatType),
    SMod(IntType),
    UMod(IntType),
    Pow(IntType),
    FPow(FloatType),
    SMax(IntType),
    UMax(IntType),
    FMax(FloatType),
    SMin(IntType),
    UMin(IntType),
    FMin(FloatType),
    Shl(IntType),
    AShr(IntType),
    And(IntType),
    Or(IntType),
    Xor(IntType),
    LogAnd,
    LogOr,
}

impl BinOp {
    /// Type of both operands and of the result.
    pub fn ty(self) -> PrimType {
        use BinOp::*;
        match self {
            Add(t) | Sub(t) | Mul(t) | SDiv(t) | UDiv(t) | SMod(t) | UMod(t) | Pow(t) | SMax(t)
            | UMax(t) | SMin(t) | UMin(t) | Shl(t) | AShr(t) | And(t) | Or(t) | Xor(t) => {
                PrimType::Int(t)
            }
            FAdd(t) | FSub(t) | FMul(t) | FDiv(t) | FPow(t) | FMax(t) | FMin(t) => {
                PrimType::Float(t)
            }
            LogAnd | LogOr => PrimType::Bool,
        }
    }

    /// The addition of type `t`; booleans and certificates combine by conjunction.
    pub fn add(t: PrimType) -> Self {
        match t {
            PrimType::Int(t) => BinOp::Add(t),
            PrimType::Float(t) => BinOp::FAdd(t),
            PrimType::Bool | PrimType::Cert => BinOp::LogAnd,
        }
    }

    pub fn sub(t: PrimType) -> Self {
        match t {
            PrimType::Int(t) => BinOp::Sub(t),
            PrimType::Float(t) => BinOp::FSub(t),
            PrimType::Bool | PrimType::Cert => BinOp::LogAnd,
        }
    }

    pub fn mul(t: PrimType) -> Self {
        match t {
            PrimType::Int(t) => BinOp::Mul(t),
            PrimType::Float(t) => BinOp::FMul(t),
            PrimType::Bool | PrimType::Cert => BinOp::LogAnd,
        }
    }

    pub fn div(t: PrimType) -> Self {
        match t {
            PrimType::Int(t) => BinOp::SDiv(t),
            PrimType::Float(t) => BinOp::FDiv(t),
            PrimType::Bool | PrimType::Cert => BinOp::LogAnd,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq(PrimType),
    Slt(IntType),
    Sle(IntType),
    Ult(IntType),
    Ule(IntType),
    FLt(FloatType),
    FLe(FloatType),
    /// `false < true`.
    Llt,
    Lle,
}

impl CmpOp {
    /// Type of the operands; the result is always `Bool`.
    pub fn ty(self) -> PrimType {
        match self {
            CmpOp::Eq(t) => t,
            CmpOp::Slt(t) | CmpOp::Sle(t) | CmpOp::Ult(t) | CmpOp::Ule(t) => PrimType::Int(t),
            CmpOp::FLt(t) | CmpOp::FLe(t) => PrimType::Float(t),
            CmpOp::Llt | CmpOp::Lle => PrimType::Bool,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConvOp {
    ZExt(IntType, IntType),
    SExt(IntType, IntType),
    FPConv(FloatType, FloatType),
    FPToUI(FloatType, IntType),
    FPToSI(FloatType, IntType),
    UIToFP(IntType, FloatType),
    SIToFP(IntType, FloatType),
    IToB(IntType),
    BToI(IntType),
}

impl ConvOp {
    /// Source and target types.
    pub fn types(self) -> (PrimType, PrimType) {
        use PrimType::{Bool, Float, Int};
        match self {
            ConvOp::ZExt(a, b) | ConvOp::SExt(a, b) => (Int(a), Int(b)),
            ConvOp::FPConv(a, b) => (Float(a), Float(b)),
            ConvOp::FPToUI(a, b) | ConvOp::FPToSI(a, b) => (Float(a), Int(b)),
            ConvOp::UIToFP(a, b) | ConvOp::SIToFP(a, b) => (Int(a), Float(b)),
            ConvOp::IToB(a) => (Int(a), Bool),
            ConvOp::BToI(b) => (Bool, Int(b)),
        }
    }
}

/// A symbolic scalar expression, lowered into statements by [`crate::build::Builder::prim_exp`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum PrimExp {
    Leaf(Name, PrimType),
    Value(PrimValue),
    Bin(BinOp, Box<PrimExp>, Box<PrimExp>),
    Cmp(CmpOp, Box<PrimExp>, Box<PrimExp>),
    Un(UnOp, Box<PrimExp>),
    Conv(ConvOp, Box<PrimExp>),
    Call(String, Vec<PrimExp>, PrimType),
}

impl PrimExp {
    pub fn ty(&self) -> PrimType {
        match self {
            PrimExp::Leaf(_, t) => *t,
            PrimExp::Value(v) => v.ty(),
            PrimExp::Bin(op, _, _) => op.ty(),
            PrimExp::Cmp(_, _, _) => PrimType::Bool,
            PrimExp::Un(op, _) => op.ty(),
            PrimExp::Conv(op, _) => op.types().1,
            PrimExp::Call(_, _, t) => *t,
        }
    }

    pub fn from_subexp(t: PrimType, se: &SubExp) -> Self {
        match *se {
            SubExp::Const(v) => PrimExp::Value(v),
            SubExp::Var(x) => PrimExp::Leaf(x, t),
        }
    }

    pub fn float(t: FloatType, val: f64) -> Self {
        PrimExp::Value(PrimValue::Float(t, val))
    }

    pub fn zero(t: PrimType) -> Self {
        PrimExp::Value(PrimValue::zero(t))
    }

    pub fn one(t: PrimType) -> Self {
        PrimExp::Value(PrimValue::one(t))
    }

    pub fn bin(op: BinOp, a: PrimExp, b: PrimExp) -> Self {
        PrimExp::Bin(op, Box::new(a), Box::new(b))
    }

    pub fn un(op: UnOp, a: PrimExp) -> Self {
        PrimExp::Un(op, Box::new(a))
    }

    pub fn conv(op: ConvOp, a: PrimExp) -> Self {
        PrimExp::Conv(op, Box::new(a))
    }

    pub fn cmp(op: CmpOp, a: PrimExp, b: PrimExp) -> Self {
        PrimExp::Cmp(op, Box::new(a), Box::new(b))
    }

    pub fn call(func: &str, args: Vec<PrimExp>, ret: PrimType) -> Self {
        PrimExp::Call(func.to_owned(), args, ret)
    }

    /// Type-directed addition, using the type of `self`.
    pub fn add(self, other: PrimExp) -> Self {
        let t = self.ty();
        PrimExp::bin(BinOp::add(t), self, other)
    }

    pub fn sub(self, other: PrimExp) -> Self {
        let t = self.ty();
        PrimExp::bin(BinOp::sub(t), self, other)
    }

    pub fn mul(self, other: PrimExp) -> Self {
        let t = self.ty();
        PrimExp::bin(BinOp::mul(t), self, other)
    }

    pub fn div(self, other: PrimExp) -> Self {
        let t = self.ty();
        PrimExp::bin(BinOp::div(t), self, other)
    }

    pub fn neg(self) -> Self {
        let t = self.ty();
        PrimExp::bin(BinOp::sub(t), PrimExp::zero(t), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_i8() {
        assert_eq!(IntType::I8.wrap(127 + 1), -128);
        assert_eq!(IntType::I8.unsigned(-1), 255);
    }

    #[test]
    fn test_add_is_type_directed() {
        let x = PrimExp::float(FloatType::F32, 1.);
        let y = PrimExp::float(FloatType::F32, 2.);
        assert_eq!(
            x.clone().add(y.clone()),
            PrimExp::bin(BinOp::FAdd(FloatType::F32), x, y),
        );
        assert_eq!(BinOp::add(PrimType::Cert), BinOp::LogAnd);
    }
}
