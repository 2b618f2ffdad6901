pub mod build;
pub mod free;
pub mod id;
mod pprint;
mod prim;

pub use prim::*;

use enumset::{EnumSet, EnumSetType};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An operand: either a literal or a reference to a bound name.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SubExp {
    Const(PrimValue),
    Var(id::Name),
}

impl SubExp {
    pub fn var(self) -> Option<id::Name> {
        match self {
            SubExp::Const(_) => None,
            SubExp::Var(x) => Some(x),
        }
    }

    pub fn i64(val: i64) -> Self {
        SubExp::Const(PrimValue::i64(val))
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Prim(PrimType),
    Array {
        elem: PrimType,
        shape: Vec<SubExp>,
        unique: bool,
    },
    /// A write-only handle onto the backing arrays of a `WithAcc` region.
    Acc {
        /// Identity of the accumulator: the name of the lambda parameter that introduced it.
        token: id::Name,
        shape: Vec<SubExp>,
        elems: Vec<Type>,
        unique: bool,
    },
}

impl Type {
    pub fn f64() -> Self {
        Type::Prim(PrimType::Float(FloatType::F64))
    }

    pub fn i64() -> Self {
        Type::Prim(PrimType::Int(IntType::I64))
    }

    pub fn bool() -> Self {
        Type::Prim(PrimType::Bool)
    }

    pub fn array(elem: PrimType, shape: Vec<SubExp>) -> Self {
        Type::Array {
            elem,
            shape,
            unique: false,
        }
    }

    pub fn is_acc(&self) -> bool {
        matches!(self, Type::Acc { .. })
    }

    pub fn prim(&self) -> Option<PrimType> {
        match self {
            &Type::Prim(t) => Some(t),
            _ => None,
        }
    }

    /// The scalar type underlying this type, if it is not an accumulator.
    pub fn elem(&self) -> Option<PrimType> {
        match self {
            &Type::Prim(t) | &Type::Array { elem: t, .. } => Some(t),
            Type::Acc { .. } => None,
        }
    }

    pub fn shape(&self) -> &[SubExp] {
        match self {
            Type::Prim(_) => &[],
            Type::Array { shape, .. } | Type::Acc { shape, .. } => shape,
        }
    }

    /// The type of one element along the outermost dimension.
    pub fn row(&self) -> Option<Type> {
        match self {
            Type::Array {
                elem,
                shape,
                unique,
            } => Some(match shape.get(1..).unwrap_or_default() {
                [] => Type::Prim(*elem),
                rest => Type::Array {
                    elem: *elem,
                    shape: rest.to_vec(),
                    unique: *unique,
                },
            }),
            _ => None,
        }
    }

    /// This type with `dims` prepended to its shape.
    pub fn array_of(&self, dims: &[SubExp]) -> Type {
        if dims.is_empty() {
            return self.clone();
        }
        match self {
            &Type::Prim(elem) => Type::array(elem, dims.to_vec()),
            Type::Array {
                elem,
                shape,
                unique,
            } => Type::Array {
                elem: *elem,
                shape: dims.iter().chain(shape).copied().collect(),
                unique: *unique,
            },
            Type::Acc { .. } => self.clone(),
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct PatElem {
    pub name: id::Name,
    pub ty: Type,
}

/// Lambda and loop parameters have the same shape as pattern elements.
pub type Param = PatElem;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, EnumSetType)]
pub enum Attr {
    Unsafe,
    Sequential,
    Incremental,
    NoInline,
}

/// Annotations on a statement, carried through every transformation untouched.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Aux {
    pub certs: Vec<id::Name>,
    pub attrs: EnumSet<Attr>,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum DimIndex {
    Fix(SubExp),
    Slice {
        start: SubExp,
        len: SubExp,
        stride: SubExp,
    },
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum BasicOp {
    SubExp(SubExp),
    /// `ty` is the type of each element.
    ArrayLit {
        elems: Vec<SubExp>,
        ty: Type,
    },
    UnOp {
        op: UnOp,
        x: SubExp,
    },
    BinOp {
        op: BinOp,
        x: SubExp,
        y: SubExp,
    },
    CmpOp {
        op: CmpOp,
        x: SubExp,
        y: SubExp,
    },
    ConvOp {
        op: ConvOp,
        x: SubExp,
    },
    Index {
        array: id::Name,
        slice: Vec<DimIndex>,
    },
    Update {
        array: id::Name,
        slice: Vec<DimIndex>,
        value: SubExp,
    },
    Concat {
        dim: usize,
        first: id::Name,
        rest: Vec<id::Name>,
        width: SubExp,
    },
    Copy {
        array: id::Name,
    },
    Manifest {
        perm: Vec<usize>,
        array: id::Name,
    },
    Reshape {
        shape: Vec<SubExp>,
        array: id::Name,
    },
    Rearrange {
        perm: Vec<usize>,
        array: id::Name,
    },
    Rotate {
        offsets: Vec<SubExp>,
        array: id::Name,
    },
    Iota {
        n: SubExp,
        start: SubExp,
        step: SubExp,
        ty: IntType,
    },
    Replicate {
        shape: Vec<SubExp>,
        value: SubExp,
    },
    Scratch {
        elem: PrimType,
        shape: Vec<SubExp>,
    },
    Assert {
        cond: SubExp,
        msg: String,
    },
    UpdateAcc {
        acc: id::Name,
        index: Vec<SubExp>,
        values: Vec<SubExp>,
    },
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IfSort {
    Normal,
    Fallback,
    Equiv,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct IfDec {
    pub ret: Vec<Type>,
    pub sort: IfSort,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum LoopForm {
    /// Runs while the loop-carried boolean `cond` holds.
    While { cond: id::Name },
    /// Runs `bound` times; each iteration binds a row of every array in `arrays`.
    For {
        index: id::Name,
        ty: IntType,
        bound: SubExp,
        arrays: Vec<(Param, id::Name)>,
    },
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct WithAccInput {
    pub shape: Vec<SubExp>,
    pub arrays: Vec<id::Name>,
    /// Combining operator and its neutral elements. The operator takes one index parameter per
    /// dimension of `shape`, followed by two groups of values.
    pub op: Option<(Lambda, Vec<SubExp>)>,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Scan {
    pub lam: Lambda,
    pub nes: Vec<SubExp>,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Reduce {
    pub comm: bool,
    pub lam: Lambda,
    pub nes: Vec<SubExp>,
}

/// A fused scan, reduction and map.
///
/// The map lambda produces the scanned values first, then the reduced values, then plain mapped
/// results; the statement's pattern binds results in that same order.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ScremaForm {
    pub scans: Vec<Scan>,
    pub reduces: Vec<Reduce>,
    pub map: Lambda,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOrder {
    InOrder,
    Disorder,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum StreamForm {
    Sequential,
    Parallel {
        order: StreamOrder,
        comm: bool,
        op: Lambda,
    },
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct HistOp {
    /// Shape of the destination histogram.
    pub shape: Vec<SubExp>,
    pub race: SubExp,
    pub dests: Vec<id::Name>,
    pub nes: Vec<SubExp>,
    pub op: Lambda,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct ScatterDest {
    pub shape: Vec<SubExp>,
    /// Number of values written into `array` per iteration.
    pub num: usize,
    pub array: id::Name,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum Soac {
    Screma {
        width: SubExp,
        arrays: Vec<id::Name>,
        form: ScremaForm,
    },
    /// The lambda takes the chunk size, then the accumulators, then one chunk per array.
    Stream {
        width: SubExp,
        arrays: Vec<id::Name>,
        form: StreamForm,
        nes: Vec<SubExp>,
        lam: Lambda,
    },
    /// The bucket lambda returns every index first, then every value.
    Hist {
        width: SubExp,
        ops: Vec<HistOp>,
        bucket: Lambda,
        arrays: Vec<id::Name>,
    },
    /// The lambda returns every index first, then every value.
    Scatter {
        width: SubExp,
        lam: Lambda,
        arrays: Vec<id::Name>,
        dests: Vec<ScatterDest>,
    },
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum Exp {
    Basic(BasicOp),
    /// Call of a builtin scalar function such as `sin64`.
    Apply {
        func: String,
        args: Vec<SubExp>,
        ret: Vec<Type>,
    },
    If {
        cond: SubExp,
        then: Body,
        els: Body,
        dec: IfDec,
    },
    Loop {
        merge: Vec<(Param, SubExp)>,
        form: LoopForm,
        body: Body,
    },
    /// The lambda takes one accumulator per input and returns the final accumulators followed by
    /// any other results; the pattern binds the updated arrays of every input in order, then the
    /// other results.
    WithAcc {
        inputs: Vec<WithAccInput>,
        lam: Lambda,
    },
    Op(Soac),
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Stm {
    pub pat: Vec<PatElem>,
    pub aux: Aux,
    pub exp: Exp,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Body {
    pub stms: Vec<Stm>,
    pub result: Vec<SubExp>,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Lambda {
    pub params: Vec<Param>,
    pub body: Body,
    pub ret: Vec<Type>,
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn test_serde_round_trip() {
        let x = id::name(0);
        let y = id::name(1);
        let lam = Lambda {
            params: vec![PatElem {
                name: x,
                ty: Type::f64(),
            }],
            body: Body {
                stms: vec![Stm {
                    pat: vec![PatElem {
                        name: y,
                        ty: Type::f64(),
                    }],
                    aux: Aux {
                        certs: vec![],
                        attrs: Attr::Unsafe | Attr::Sequential,
                    },
                    exp: Exp::Basic(BasicOp::BinOp {
                        op: BinOp::FMul(FloatType::F64),
                        x: SubExp::Var(x),
                        y: SubExp::Var(x),
                    }),
                }],
                result: vec![SubExp::Var(y)],
            },
            ret: vec![Type::f64()],
        };
        let json = serde_json::to_string(&lam).unwrap();
        let back: Lambda = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lam);
    }

    #[test]
    fn test_row_type() {
        let t = Type::array(PrimType::Bool, vec![SubExp::i64(2), SubExp::i64(3)]);
        assert_eq!(
            t.row(),
            Some(Type::array(PrimType::Bool, vec![SubExp::i64(3)]))
        );
        assert_eq!(t.row().and_then(|r| r.row()), Some(Type::bool()));
    }
}
