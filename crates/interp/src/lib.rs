use std::{collections::HashMap, rc::Rc};
use tangle::{
    id::Name, BasicOp, BinOp, Body, CmpOp, ConvOp, DimIndex, Exp, FloatType, IntType, Lambda,
    LoopForm, PrimValue, Soac, Stm, SubExp, UnOp,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum Val {
    Prim(PrimValue),
    Array(Rc<Vec<Val>>),
    /// Backing arrays of an accumulator; `id` selects its combining operator.
    Acc { id: usize, arrays: Rc<Vec<Val>> },
}

impl Val {
    pub fn f64(x: f64) -> Self {
        Val::Prim(PrimValue::f64(x))
    }

    pub fn i64(x: i64) -> Self {
        Val::Prim(PrimValue::i64(x))
    }

    pub fn bool(b: bool) -> Self {
        Val::Prim(PrimValue::Bool(b))
    }

    pub fn array(vals: Vec<Val>) -> Self {
        Val::Array(Rc::new(vals))
    }

    pub fn prim(&self) -> Result<PrimValue, Error> {
        match self {
            &Val::Prim(v) => Ok(v),
            v => Err(type_error("scalar", v)),
        }
    }

    pub fn as_f64(&self) -> Result<f64, Error> {
        float(self.prim()?)
    }

    pub fn rows(&self) -> Result<&[Val], Error> {
        match self {
            Val::Array(rows) => Ok(rows),
            v => Err(type_error("array", v)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} is not bound")]
    Unbound(Name),

    #[error("expected {expected}, found {found:?}")]
    Type { expected: &'static str, found: Val },

    #[error("expected {expected} values, found {found}")]
    Arity { expected: usize, found: usize },

    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds { index: i64, len: usize },

    #[error("array does not have the expected shape")]
    Shape,

    #[error("division by zero")]
    DivByZero,

    #[error("negative exponent {0}")]
    NegativeExponent(i64),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("unknown function {0}")]
    UnknownFunction(String),
}

fn type_error(expected: &'static str, found: &Val) -> Error {
    Error::Type {
        expected,
        found: found.clone(),
    }
}

fn int(v: PrimValue) -> Result<i64, Error> {
    match v {
        PrimValue::Int(_, x) => Ok(x),
        v => Err(type_error("integer", &Val::Prim(v))),
    }
}

fn float(v: PrimValue) -> Result<f64, Error> {
    match v {
        PrimValue::Float(_, x) => Ok(x),
        v => Err(type_error("float", &Val::Prim(v))),
    }
}

fn boolean(v: PrimValue) -> Result<bool, Error> {
    match v {
        PrimValue::Bool(b) => Ok(b),
        PrimValue::Cert => Ok(true),
        v => Err(type_error("boolean", &Val::Prim(v))),
    }
}

fn unop(op: UnOp, v: PrimValue) -> Result<PrimValue, Error> {
    Ok(match op {
        UnOp::Not => PrimValue::Bool(!boolean(v)?),
        UnOp::Complement(t) => PrimValue::Int(t, t.wrap(!int(v)?)),
        UnOp::Abs(t) => PrimValue::Int(t, t.wrap(int(v)?.wrapping_abs())),
        UnOp::FAbs(t) => PrimValue::Float(t, float(v)?.abs()),
        UnOp::SSignum(t) => PrimValue::Int(t, int(v)?.signum()),
        UnOp::USignum(t) => PrimValue::Int(t, (t.unsigned(int(v)?) != 0) as i64),
        UnOp::FSignum(t) => {
            let x = float(v)?;
            PrimValue::Float(t, if x == 0. { 0. } else { x.signum() })
        }
        UnOp::FNeg(t) => PrimValue::Float(t, -float(v)?),
    })
}

/// Division rounding towards negative infinity.
fn floor_div(x: i64, y: i64) -> i64 {
    let q = x.wrapping_div(y);
    if x.wrapping_rem(y) != 0 && ((x < 0) != (y < 0)) {
        q - 1
    } else {
        q
    }
}

/// Remainder with the sign of the divisor.
fn floor_mod(x: i64, y: i64) -> i64 {
    let r = x.wrapping_rem(y);
    if r != 0 && ((r < 0) != (y < 0)) {
        r + y
    } else {
        r
    }
}

fn int_op(
    t: IntType,
    a: PrimValue,
    b: PrimValue,
    f: impl Fn(i64, i64) -> Result<i64, Error>,
) -> Result<PrimValue, Error> {
    Ok(PrimValue::Int(t, t.wrap(f(int(a)?, int(b)?)?)))
}

fn float_op(
    t: FloatType,
    a: PrimValue,
    b: PrimValue,
    f: impl Fn(f64, f64) -> f64,
) -> Result<PrimValue, Error> {
    Ok(PrimValue::Float(t, t.round(f(float(a)?, float(b)?))))
}

fn nonzero(y: i64) -> Result<i64, Error> {
    if y == 0 {
        Err(Error::DivByZero)
    } else {
        Ok(y)
    }
}

fn binop(op: BinOp, a: PrimValue, b: PrimValue) -> Result<PrimValue, Error> {
    use BinOp::*;
    match op {
        Add(t) => int_op(t, a, b, |x, y| Ok(x.wrapping_add(y))),
        Sub(t) => int_op(t, a, b, |x, y| Ok(x.wrapping_sub(y))),
        Mul(t) => int_op(t, a, b, |x, y| Ok(x.wrapping_mul(y))),
        SDiv(t) => int_op(t, a, b, |x, y| Ok(floor_div(x, nonzero(y)?))),
        SMod(t) => int_op(t, a, b, |x, y| Ok(floor_mod(x, nonzero(y)?))),
        UDiv(t) => int_op(t, a, b, |x, y| {
            let d = t.unsigned(y);
            if d == 0 {
                return Err(Error::DivByZero);
            }
            Ok((t.unsigned(x) / d) as i64)
        }),
        UMod(t) => int_op(t, a, b, |x, y| {
            let d = t.unsigned(y);
            if d == 0 {
                return Err(Error::DivByZero);
            }
            Ok((t.unsigned(x) % d) as i64)
        }),
        Pow(t) => int_op(t, a, b, |x, y| {
            let e = u32::try_from(y).map_err(|_| Error::NegativeExponent(y))?;
            Ok(x.wrapping_pow(e))
        }),
        SMax(t) => int_op(t, a, b, |x, y| Ok(x.max(y))),
        SMin(t) => int_op(t, a, b, |x, y| Ok(x.min(y))),
        UMax(t) => int_op(t, a, b, |x, y| {
            Ok(if t.unsigned(x) >= t.unsigned(y) { x } else { y })
        }),
        UMin(t) => int_op(t, a, b, |x, y| {
            Ok(if t.unsigned(x) <= t.unsigned(y) { x } else { y })
        }),
        Shl(t) => int_op(t, a, b, |x, y| Ok(x.wrapping_shl(y as u32))),
        AShr(t) => int_op(t, a, b, |x, y| Ok(x.wrapping_shr(y as u32))),
        And(t) => int_op(t, a, b, |x, y| Ok(x & y)),
        Or(t) => int_op(t, a, b, |x, y| Ok(x | y)),
        Xor(t) => int_op(t, a, b, |x, y| Ok(x ^ y)),
        FAdd(t) => float_op(t, a, b, |x, y| x + y),
        FSub(t) => float_op(t, a, b, |x, y| x - y),
        FMul(t) => float_op(t, a, b, |x, y| x * y),
        FDiv(t) => float_op(t, a, b, |x, y| x / y),
        FPow(t) => float_op(t, a, b, f64::powf),
        FMax(t) => float_op(t, a, b, f64::max),
        FMin(t) => float_op(t, a, b, f64::min),
        LogAnd => match (a, b) {
            (PrimValue::Cert, PrimValue::Cert) => Ok(PrimValue::Cert),
            _ => Ok(PrimValue::Bool(boolean(a)? && boolean(b)?)),
        },
        LogOr => Ok(PrimValue::Bool(boolean(a)? || boolean(b)?)),
    }
}

fn cmpop(op: CmpOp, a: PrimValue, b: PrimValue) -> Result<bool, Error> {
    Ok(match op {
        CmpOp::Eq(_) => a == b,
        CmpOp::Slt(_) => int(a)? < int(b)?,
        CmpOp::Sle(_) => int(a)? <= int(b)?,
        CmpOp::Ult(t) => t.unsigned(int(a)?) < t.unsigned(int(b)?),
        CmpOp::Ule(t) => t.unsigned(int(a)?) <= t.unsigned(int(b)?),
        CmpOp::FLt(_) => float(a)? < float(b)?,
        CmpOp::FLe(_) => float(a)? <= float(b)?,
        CmpOp::Llt => !boolean(a)? && boolean(b)?,
        CmpOp::Lle => !boolean(a)? || boolean(b)?,
    })
}

fn convop(op: ConvOp, v: PrimValue) -> Result<PrimValue, Error> {
    Ok(match op {
        ConvOp::ZExt(from, to) => PrimValue::Int(to, to.wrap(from.unsigned(int(v)?) as i64)),
        ConvOp::SExt(_, to) => PrimValue::Int(to, to.wrap(int(v)?)),
        ConvOp::FPConv(_, to) => PrimValue::Float(to, to.round(float(v)?)),
        ConvOp::FPToUI(_, to) => PrimValue::Int(to, to.wrap(float(v)? as u64 as i64)),
        ConvOp::FPToSI(_, to) => PrimValue::Int(to, to.wrap(float(v)? as i64)),
        ConvOp::UIToFP(from, to) => PrimValue::Float(to, to.round(from.unsigned(int(v)?) as f64)),
        ConvOp::SIToFP(_, to) => PrimValue::Float(to, to.round(int(v)? as f64)),
        ConvOp::IToB(_) => PrimValue::Bool(int(v)? != 0),
        ConvOp::BToI(to) => PrimValue::Int(to, boolean(v)? as i64),
    })
}

/// The builtin scalar functions, suffixed by float width (`sin64`, `atan232`, ...).
fn builtin(func: &str, args: &[PrimValue]) -> Result<PrimValue, Error> {
    let unknown = || Error::UnknownFunction(func.to_owned());
    let (base, ft) = if let Some(base) = func.strip_suffix("64") {
        (base, FloatType::F64)
    } else if let Some(base) = func.strip_suffix("32") {
        (base, FloatType::F32)
    } else {
        return Err(unknown());
    };
    let xs = args
        .iter()
        .map(|&v| float(v))
        .collect::<Result<Vec<_>, _>>()?;
    let y = match (base, xs.as_slice()) {
        ("sqrt", [x]) => x.sqrt(),
        ("exp", [x]) => x.exp(),
        ("log", [x]) => x.ln(),
        ("sin", [x]) => x.sin(),
        ("cos", [x]) => x.cos(),
        ("tan", [x]) => x.tan(),
        ("tanh", [x]) => x.tanh(),
        ("pow", [x, y]) => x.powf(*y),
        ("atan2", [y, x]) => y.atan2(*x),
        _ => return Err(unknown()),
    };
    Ok(PrimValue::Float(ft, ft.round(y)))
}

/// A resolved [`DimIndex`].
#[derive(Clone, Copy)]
enum Dim {
    Fix(i64),
    Slice { start: i64, len: i64, stride: i64 },
}

fn bounds(i: i64, len: usize) -> Result<usize, Error> {
    usize::try_from(i)
        .ok()
        .filter(|&j| j < len)
        .ok_or(Error::OutOfBounds { index: i, len })
}

fn row(v: &Val, i: i64) -> Result<&Val, Error> {
    let rows = v.rows()?;
    Ok(&rows[bounds(i, rows.len())?])
}

fn index(v: &Val, dims: &[Dim]) -> Result<Val, Error> {
    let Some((first, rest)) = dims.split_first() else {
        return Ok(v.clone());
    };
    match *first {
        Dim::Fix(i) => index(row(v, i)?, rest),
        Dim::Slice { start, len, stride } => (0..len)
            .map(|k| index(row(v, start + k * stride)?, rest))
            .collect::<Result<_, _>>()
            .map(Val::array),
    }
}

fn update(v: &Val, dims: &[Dim], value: &Val) -> Result<Val, Error> {
    let Some((first, rest)) = dims.split_first() else {
        return Ok(value.clone());
    };
    let mut rows = v.rows()?.to_vec();
    match *first {
        Dim::Fix(i) => {
            let j = bounds(i, rows.len())?;
            rows[j] = update(&rows[j], rest, value)?;
        }
        Dim::Slice { start, len, stride } => {
            let vals = value.rows()?;
            for k in 0..len {
                let j = bounds(start + k * stride, rows.len())?;
                let vk = usize::try_from(k)
                    .ok()
                    .and_then(|k| vals.get(k))
                    .ok_or(Error::Shape)?;
                rows[j] = update(&rows[j], rest, vk)?;
            }
        }
    }
    Ok(Val::array(rows))
}

/// Dimensions of `v`, read off its first elements.
fn shape_of(v: &Val) -> Vec<usize> {
    let mut shape = vec![];
    let mut v = v;
    while let Val::Array(rows) = v {
        shape.push(rows.len());
        match rows.first() {
            Some(first) => v = first,
            None => break,
        }
    }
    shape
}

fn flatten(v: &Val, out: &mut Vec<Val>) {
    match v {
        Val::Array(rows) => rows.iter().for_each(|r| flatten(r, out)),
        _ => out.push(v.clone()),
    }
}

fn build(shape: &[usize], elems: &mut impl Iterator<Item = Val>) -> Result<Val, Error> {
    match shape.split_first() {
        None => elems.next().ok_or(Error::Shape),
        Some((&n, rest)) => (0..n)
            .map(|_| build(rest, elems))
            .collect::<Result<_, _>>()
            .map(Val::array),
    }
}

fn replicate(shape: &[usize], v: &Val) -> Val {
    match shape.split_first() {
        None => v.clone(),
        Some((&n, rest)) => Val::array(vec![replicate(rest, v); n]),
    }
}

fn reshape(v: &Val, shape: &[usize]) -> Result<Val, Error> {
    let mut elems = vec![];
    flatten(v, &mut elems);
    if elems.len() != shape.iter().product::<usize>() {
        return Err(Error::Shape);
    }
    build(shape, &mut elems.into_iter())
}

fn rearrange(v: &Val, perm: &[usize]) -> Result<Val, Error> {
    fn go(v: &Val, perm: &[usize], shape: &[usize], idx: &mut Vec<usize>) -> Result<Val, Error> {
        if idx.len() == shape.len() {
            let mut src = vec![0; idx.len()];
            for (&i, &p) in idx.iter().zip(perm) {
                *src.get_mut(p).ok_or(Error::Shape)? = i;
            }
            let dims: Vec<Dim> = src.iter().map(|&i| Dim::Fix(i as i64)).collect();
            return index(v, &dims);
        }
        let mut rows = vec![];
        for k in 0..shape[idx.len()] {
            idx.push(k);
            rows.push(go(v, perm, shape, idx)?);
            idx.pop();
        }
        Ok(Val::array(rows))
    }
    let src_shape = shape_of(v);
    let shape = perm
        .iter()
        .map(|&p| src_shape.get(p).copied().ok_or(Error::Shape))
        .collect::<Result<Vec<_>, _>>()?;
    go(v, perm, &shape, &mut vec![])
}

fn rotate(v: &Val, offsets: &[i64]) -> Result<Val, Error> {
    let Some((&off, rest)) = offsets.split_first() else {
        return Ok(v.clone());
    };
    let rows = v.rows()?;
    let n = rows.len() as i64;
    (0..n)
        .map(|i| rotate(row(v, (i + off).rem_euclid(n))?, rest))
        .collect::<Result<_, _>>()
        .map(Val::array)
}

fn concat(dim: usize, arrays: &[Val]) -> Result<Val, Error> {
    if dim == 0 {
        let mut rows = vec![];
        for a in arrays {
            rows.extend(a.rows()?.iter().cloned());
        }
        return Ok(Val::array(rows));
    }
    let n = arrays.first().ok_or(Error::Shape)?.rows()?.len();
    (0..n as i64)
        .map(|i| {
            let inner = arrays
                .iter()
                .map(|a| row(a, i).cloned())
                .collect::<Result<Vec<_>, _>>()?;
            concat(dim - 1, &inner)
        })
        .collect::<Result<_, _>>()
        .map(Val::array)
}

fn split(mut vals: Vec<Val>, n: usize) -> Result<(Vec<Val>, Vec<Val>), Error> {
    if vals.len() < n {
        return Err(Error::Arity {
            expected: n,
            found: vals.len(),
        });
    }
    let rest = vals.split_off(n);
    Ok((vals, rest))
}

fn fixed(vals: &[Val]) -> Result<Vec<Dim>, Error> {
    vals.iter().map(|v| Ok(Dim::Fix(int(v.prim()?)?))).collect()
}

struct Interpreter<'a> {
    vars: HashMap<Name, Val>,
    /// Combining operator of every accumulator created so far.
    ops: Vec<Option<&'a Lambda>>,
}

impl<'a> Interpreter<'a> {
    fn get(&self, x: Name) -> Result<Val, Error> {
        self.vars.get(&x).cloned().ok_or(Error::Unbound(x))
    }

    fn subexp(&self, se: &SubExp) -> Result<Val, Error> {
        match *se {
            SubExp::Const(v) => Ok(Val::Prim(v)),
            SubExp::Var(x) => self.get(x),
        }
    }

    fn prim(&self, se: &SubExp) -> Result<PrimValue, Error> {
        self.subexp(se)?.prim()
    }

    fn int(&self, se: &SubExp) -> Result<i64, Error> {
        int(self.prim(se)?)
    }

    fn sizes(&self, ses: &[SubExp]) -> Result<Vec<usize>, Error> {
        ses.iter()
            .map(|se| {
                let n = self.int(se)?;
                usize::try_from(n).map_err(|_| Error::Shape)
            })
            .collect()
    }

    fn gets(&self, xs: &[Name]) -> Result<Vec<Val>, Error> {
        xs.iter().map(|&x| self.get(x)).collect()
    }

    fn bind(&mut self, names: &[Name], vals: Vec<Val>) -> Result<(), Error> {
        if names.len() != vals.len() {
            return Err(Error::Arity {
                expected: names.len(),
                found: vals.len(),
            });
        }
        self.vars.extend(names.iter().copied().zip(vals));
        Ok(())
    }

    fn lambda(&mut self, lam: &'a Lambda, args: Vec<Val>) -> Result<Vec<Val>, Error> {
        let params: Vec<Name> = lam.params.iter().map(|p| p.name).collect();
        self.bind(&params, args)?;
        self.body(&lam.body)
    }

    /// Apply a binary operator lambda to `acc` and `vals`, checking that it returns as many
    /// values as `acc` holds.
    fn combine(&mut self, lam: &'a Lambda, acc: &[Val], vals: &[Val]) -> Result<Vec<Val>, Error> {
        let res = self.lambda(lam, [acc, vals].concat())?;
        if res.len() != acc.len() {
            return Err(Error::Arity {
                expected: acc.len(),
                found: res.len(),
            });
        }
        Ok(res)
    }

    fn body(&mut self, body: &'a Body) -> Result<Vec<Val>, Error> {
        for stm in &body.stms {
            self.stm(stm)?;
        }
        body.result.iter().map(|se| self.subexp(se)).collect()
    }

    fn stm(&mut self, stm: &'a Stm) -> Result<(), Error> {
        let vals = self.exp(&stm.exp)?;
        let names: Vec<Name> = stm.pat.iter().map(|pe| pe.name).collect();
        self.bind(&names, vals)
    }

    fn dims(&self, slice: &[DimIndex]) -> Result<Vec<Dim>, Error> {
        slice
            .iter()
            .map(|d| match d {
                DimIndex::Fix(i) => Ok(Dim::Fix(self.int(i)?)),
                DimIndex::Slice { start, len, stride } => Ok(Dim::Slice {
                    start: self.int(start)?,
                    len: self.int(len)?,
                    stride: self.int(stride)?,
                }),
            })
            .collect()
    }

    fn update_acc(&mut self, acc: Name, at: &[SubExp], values: &[SubExp]) -> Result<Val, Error> {
        let (id, arrays) = match self.get(acc)? {
            Val::Acc { id, arrays } => (id, arrays),
            v => return Err(type_error("accumulator", &v)),
        };
        let idx = at
            .iter()
            .map(|se| self.subexp(se))
            .collect::<Result<Vec<_>, _>>()?;
        let dims = fixed(&idx)?;
        let vals = values
            .iter()
            .map(|se| self.subexp(se))
            .collect::<Result<Vec<_>, _>>()?;
        let old: Result<Vec<Val>, Error> = arrays.iter().map(|a| index(a, &dims)).collect();
        let old = match old {
            Ok(old) => old,
            Err(Error::OutOfBounds { .. }) => return Ok(Val::Acc { id, arrays }),
            Err(e) => return Err(e),
        };
        let new = match self.ops.get(id).copied().flatten() {
            Some(op) => self.lambda(op, [idx, old, vals].concat())?,
            None => vals,
        };
        if new.len() != arrays.len() {
            return Err(Error::Arity {
                expected: arrays.len(),
                found: new.len(),
            });
        }
        let arrays = arrays
            .iter()
            .zip(&new)
            .map(|(a, v)| update(a, &dims, v))
            .collect::<Result<_, _>>()?;
        Ok(Val::Acc {
            id,
            arrays: Rc::new(arrays),
        })
    }

    fn basic(&mut self, op: &'a BasicOp) -> Result<Val, Error> {
        Ok(match op {
            BasicOp::SubExp(se) => self.subexp(se)?,
            BasicOp::ArrayLit { elems, .. } => Val::array(
                elems
                    .iter()
                    .map(|se| self.subexp(se))
                    .collect::<Result<_, _>>()?,
            ),
            &BasicOp::UnOp { op, x } => Val::Prim(unop(op, self.prim(&x)?)?),
            &BasicOp::BinOp { op, x, y } => Val::Prim(binop(op, self.prim(&x)?, self.prim(&y)?)?),
            &BasicOp::CmpOp { op, x, y } => {
                Val::bool(cmpop(op, self.prim(&x)?, self.prim(&y)?)?)
            }
            &BasicOp::ConvOp { op, x } => Val::Prim(convop(op, self.prim(&x)?)?),
            BasicOp::Index { array, slice } => index(&self.get(*array)?, &self.dims(slice)?)?,
            BasicOp::Update {
                array,
                slice,
                value,
            } => update(
                &self.get(*array)?,
                &self.dims(slice)?,
                &self.subexp(value)?,
            )?,
            BasicOp::Concat {
                dim, first, rest, ..
            } => {
                let mut arrays = vec![self.get(*first)?];
                arrays.extend(self.gets(rest)?);
                concat(*dim, &arrays)?
            }
            BasicOp::Copy { array } | BasicOp::Manifest { array, .. } => self.get(*array)?,
            BasicOp::Reshape { shape, array } => reshape(&self.get(*array)?, &self.sizes(shape)?)?,
            BasicOp::Rearrange { perm, array } => rearrange(&self.get(*array)?, perm)?,
            BasicOp::Rotate { offsets, array } => {
                let offsets = offsets
                    .iter()
                    .map(|se| self.int(se))
                    .collect::<Result<Vec<_>, _>>()?;
                rotate(&self.get(*array)?, &offsets)?
            }
            &BasicOp::Iota { n, start, step, ty } => {
                let (n, start, step) = (self.int(&n)?, self.int(&start)?, self.int(&step)?);
                Val::array(
                    (0..n)
                        .map(|i| {
                            let x = start.wrapping_add(i.wrapping_mul(step));
                            Val::Prim(PrimValue::Int(ty, ty.wrap(x)))
                        })
                        .collect(),
                )
            }
            BasicOp::Replicate { shape, value } => {
                replicate(&self.sizes(shape)?, &self.subexp(value)?)
            }
            BasicOp::Scratch { elem, shape } => {
                replicate(&self.sizes(shape)?, &Val::Prim(PrimValue::zero(*elem)))
            }
            BasicOp::Assert { cond, msg } => {
                if !boolean(self.prim(cond)?)? {
                    return Err(Error::Assertion(msg.clone()));
                }
                Val::Prim(PrimValue::Cert)
            }
            BasicOp::UpdateAcc { acc, index, values } => self.update_acc(*acc, index, values)?,
        })
    }

    fn exp(&mut self, exp: &'a Exp) -> Result<Vec<Val>, Error> {
        match exp {
            Exp::Basic(op) => Ok(vec![self.basic(op)?]),
            Exp::Apply { func, args, .. } => {
                let args = args
                    .iter()
                    .map(|se| self.prim(se))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(vec![Val::Prim(builtin(func, &args)?)])
            }
            Exp::If {
                cond, then, els, ..
            } => {
                if boolean(self.prim(cond)?)? {
                    self.body(then)
                } else {
                    self.body(els)
                }
            }
            Exp::Loop { merge, form, body } => {
                let params: Vec<Name> = merge.iter().map(|(p, _)| p.name).collect();
                let init = merge
                    .iter()
                    .map(|(_, se)| self.subexp(se))
                    .collect::<Result<Vec<_>, _>>()?;
                self.bind(&params, init)?;
                match form {
                    LoopForm::While { cond } => {
                        while boolean(self.get(*cond)?.prim()?)? {
                            let next = self.body(body)?;
                            self.bind(&params, next)?;
                        }
                    }
                    LoopForm::For {
                        index,
                        ty,
                        bound,
                        arrays,
                    } => {
                        let sources = arrays
                            .iter()
                            .map(|(_, a)| self.get(*a))
                            .collect::<Result<Vec<_>, _>>()?;
                        for i in 0..self.int(bound)? {
                            self.vars.insert(*index, Val::Prim(PrimValue::Int(*ty, i)));
                            for ((p, _), src) in arrays.iter().zip(&sources) {
                                self.vars.insert(p.name, row(src, i)?.clone());
                            }
                            let next = self.body(body)?;
                            self.bind(&params, next)?;
                        }
                    }
                }
                self.gets(&params)
            }
            Exp::WithAcc { inputs, lam } => {
                let mut accs = vec![];
                for input in inputs {
                    let arrays = self.gets(&input.arrays)?;
                    let id = self.ops.len();
                    self.ops.push(input.op.as_ref().map(|(op, _)| op));
                    accs.push(Val::Acc {
                        id,
                        arrays: Rc::new(arrays),
                    });
                }
                let (accs, rest) = split(self.lambda(lam, accs)?, inputs.len())?;
                let mut out = vec![];
                for acc in accs {
                    match acc {
                        Val::Acc { arrays, .. } => out.extend(arrays.iter().cloned()),
                        v => return Err(type_error("accumulator", &v)),
                    }
                }
                out.extend(rest);
                Ok(out)
            }
            Exp::Op(soac) => self.soac(soac),
        }
    }

    fn rows_at(&self, arrays: &[Val], i: usize) -> Result<Vec<Val>, Error> {
        arrays.iter().map(|a| row(a, i as i64).cloned()).collect()
    }

    fn soac(&mut self, soac: &'a Soac) -> Result<Vec<Val>, Error> {
        match soac {
            Soac::Screma {
                width,
                arrays,
                form,
            } => {
                let n = self.sizes(std::slice::from_ref(width))?[0];
                let arrays = self.gets(arrays)?;
                let nes = |ad: &Self, nes: &[SubExp]| -> Result<Vec<Val>, Error> {
                    nes.iter().map(|se| ad.subexp(se)).collect()
                };
                let mut scan_accs = vec![];
                for scan in &form.scans {
                    scan_accs.push(nes(self, &scan.nes)?);
                }
                let mut red_accs = vec![];
                for red in &form.reduces {
                    red_accs.push(nes(self, &red.nes)?);
                }
                let n_scan: usize = scan_accs.iter().map(Vec::len).sum();
                let n_red: usize = red_accs.iter().map(Vec::len).sum();
                let n_map = form.map.ret.len().saturating_sub(n_scan + n_red);
                let mut scanned = vec![vec![]; n_scan];
                let mut mapped = vec![vec![]; n_map];
                for i in 0..n {
                    let args = self.rows_at(&arrays, i)?;
                    let res = self.lambda(&form.map, args)?;
                    let (scan_vals, res) = split(res, n_scan)?;
                    let (red_vals, map_vals) = split(res, n_red)?;
                    let mut offset = 0;
                    for (scan, acc) in form.scans.iter().zip(&mut scan_accs) {
                        let vals = &scan_vals[offset..offset + acc.len()];
                        *acc = self.combine(&scan.lam, acc, vals)?;
                        for (j, v) in acc.iter().enumerate() {
                            scanned[offset + j].push(v.clone());
                        }
                        offset += acc.len();
                    }
                    let mut offset = 0;
                    for (red, acc) in form.reduces.iter().zip(&mut red_accs) {
                        let vals = &red_vals[offset..offset + acc.len()];
                        *acc = self.combine(&red.lam, acc, vals)?;
                        offset += acc.len();
                    }
                    if map_vals.len() != n_map {
                        return Err(Error::Arity {
                            expected: n_map,
                            found: map_vals.len(),
                        });
                    }
                    for (out, v) in mapped.iter_mut().zip(map_vals) {
                        out.push(v);
                    }
                }
                let mut out: Vec<Val> = scanned.into_iter().map(Val::array).collect();
                out.extend(red_accs.into_iter().flatten());
                out.extend(mapped.into_iter().map(Val::array));
                Ok(out)
            }
            Soac::Stream {
                width,
                arrays,
                nes,
                lam,
                ..
            } => {
                // a single chunk spanning every row
                let mut args = vec![Val::i64(self.int(width)?)];
                for ne in nes {
                    args.push(self.subexp(ne)?);
                }
                args.extend(self.gets(arrays)?);
                self.lambda(lam, args)
            }
            Soac::Hist {
                width,
                ops,
                bucket,
                arrays,
            } => {
                let n = self.sizes(std::slice::from_ref(width))?[0];
                let arrays = self.gets(arrays)?;
                let mut dests = vec![];
                for op in ops {
                    dests.push(self.gets(&op.dests)?);
                }
                let n_indices = ops.iter().map(|op| op.shape.len()).sum();
                for i in 0..n {
                    let args = self.rows_at(&arrays, i)?;
                    let (idxs, vals) = split(self.lambda(bucket, args)?, n_indices)?;
                    let (mut idxs, mut vals) = (idxs.as_slice(), vals.as_slice());
                    for (op, dest) in ops.iter().zip(&mut dests) {
                        let (idx, rest) = idxs.split_at(op.shape.len().min(idxs.len()));
                        idxs = rest;
                        let (vs, rest) = vals.split_at(dest.len().min(vals.len()));
                        vals = rest;
                        let dims = fixed(idx)?;
                        let old: Result<Vec<Val>, Error> =
                            dest.iter().map(|d| index(d, &dims)).collect();
                        let old = match old {
                            Ok(old) => old,
                            Err(Error::OutOfBounds { .. }) => continue,
                            Err(e) => return Err(e),
                        };
                        let new = self.combine(&op.op, &old, vs)?;
                        for (d, v) in dest.iter_mut().zip(&new) {
                            *d = update(d, &dims, v)?;
                        }
                    }
                }
                Ok(dests.into_iter().flatten().collect())
            }
            Soac::Scatter {
                width,
                lam,
                arrays,
                dests,
            } => {
                let n = self.sizes(std::slice::from_ref(width))?[0];
                let arrays = self.gets(arrays)?;
                let mut outs = vec![];
                for dest in dests {
                    outs.push(self.get(dest.array)?);
                }
                let n_indices = dests.iter().map(|d| d.num * d.shape.len()).sum();
                for i in 0..n {
                    let args = self.rows_at(&arrays, i)?;
                    let (idxs, vals) = split(self.lambda(lam, args)?, n_indices)?;
                    let (mut idxs, mut vals) = (idxs.as_slice(), vals.iter());
                    for (dest, out) in dests.iter().zip(&mut outs) {
                        for _ in 0..dest.num {
                            let (idx, rest) = idxs.split_at(dest.shape.len().min(idxs.len()));
                            idxs = rest;
                            let v = vals.next().ok_or(Error::Shape)?;
                            match update(out, &fixed(idx)?, v) {
                                Ok(new) => *out = new,
                                Err(Error::OutOfBounds { .. }) => {}
                                Err(e) => return Err(e),
                            }
                        }
                    }
                }
                Ok(outs)
            }
        }
    }
}

/// Evaluate `lam` on `args`.
pub fn interp(lam: &Lambda, args: Vec<Val>) -> Result<Vec<Val>, Error> {
    let mut interpreter = Interpreter {
        vars: HashMap::new(),
        ops: vec![],
    };
    interpreter.lambda(lam, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tangle::{
        build::Builder, id::NameSource, IfDec, IfSort, Param, PrimType, Reduce, ScremaForm, Type,
        WithAccInput,
    };

    fn fbin(op: fn(FloatType) -> BinOp, x: Name, y: Name) -> BasicOp {
        BasicOp::BinOp {
            op: op(FloatType::F64),
            x: SubExp::Var(x),
            y: SubExp::Var(y),
        }
    }

    fn sum_lambda(b: &mut Builder) -> Lambda {
        let a = b.param(Type::f64());
        let c = b.param(Type::f64());
        let s = b.let_basic(Type::f64(), fbin(BinOp::FAdd, a.name, c.name));
        b.lambda(vec![a, c], vec![SubExp::Var(s)]).unwrap()
    }

    #[test]
    fn test_two_plus_two() {
        let mut names = NameSource::new();
        let mut b = Builder::new(&mut names);
        let lam = sum_lambda(&mut b);
        let answer = interp(&lam, vec![Val::f64(2.), Val::f64(2.)]).unwrap();
        assert_eq!(answer, vec![Val::f64(4.)]);
    }

    #[test]
    fn test_signed_division_rounds_down() {
        let t = IntType::I32;
        let q = binop(
            BinOp::SDiv(t),
            PrimValue::Int(t, -7),
            PrimValue::Int(t, 2),
        )
        .unwrap();
        assert_eq!(q, PrimValue::Int(t, -4));
        let r = binop(BinOp::SMod(t), PrimValue::Int(t, -7), PrimValue::Int(t, 2)).unwrap();
        assert_eq!(r, PrimValue::Int(t, 1));
        assert!(matches!(
            binop(BinOp::SDiv(t), PrimValue::Int(t, 1), PrimValue::Int(t, 0)),
            Err(Error::DivByZero)
        ));
    }

    #[test]
    fn test_sum_reduction() {
        let mut names = NameSource::new();
        let mut b = Builder::new(&mut names);
        let n = SubExp::i64(4);
        let xs = b.param(Type::array(PrimType::Float(FloatType::F64), vec![n]));
        let red = sum_lambda(&mut b);
        let x = b.param(Type::f64());
        let map = b.lambda(vec![x.clone()], vec![SubExp::Var(x.name)]).unwrap();
        let total = b.let_exp(
            Type::f64(),
            Exp::Op(Soac::Screma {
                width: n,
                arrays: vec![xs.name],
                form: ScremaForm {
                    scans: vec![],
                    reduces: vec![Reduce {
                        comm: true,
                        lam: red,
                        nes: vec![SubExp::Const(PrimValue::f64(0.))],
                    }],
                    map,
                },
            }),
        );
        let lam = b.lambda(vec![xs], vec![SubExp::Var(total)]).unwrap();
        let input = Val::array((1..=4).map(|i| Val::f64(i as f64)).collect());
        assert_eq!(interp(&lam, vec![input]).unwrap(), vec![Val::f64(10.)]);
    }

    #[test]
    fn test_accumulator_combines_and_skips_out_of_bounds() {
        let mut names = NameSource::new();
        let mut b = Builder::new(&mut names);
        let vec3 = Type::array(PrimType::Float(FloatType::F64), vec![SubExp::i64(3)]);
        let ys = b.param(vec3.clone());
        let i = b.param(Type::i64());
        let a = b.param(Type::f64());
        let c = b.param(Type::f64());
        let s = b.let_basic(Type::f64(), fbin(BinOp::FAdd, a.name, c.name));
        let op = b.lambda(vec![i, a, c], vec![SubExp::Var(s)]).unwrap();
        let token = b.fresh();
        let acc_ty = Type::Acc {
            token,
            shape: vec![SubExp::i64(3)],
            elems: vec![Type::f64()],
            unique: false,
        };
        b.declare(token, acc_ty.clone());
        let (last, stms) = b.collect(|b| {
            let mut acc = token;
            for (at, v) in [(1, 2.), (1, 3.), (7, 5.)] {
                acc = b.let_basic(
                    acc_ty.clone(),
                    BasicOp::UpdateAcc {
                        acc,
                        index: vec![SubExp::i64(at)],
                        values: vec![SubExp::Const(PrimValue::f64(v))],
                    },
                );
            }
            acc
        });
        let body = Lambda {
            params: vec![Param {
                name: token,
                ty: acc_ty.clone(),
            }],
            body: Body {
                stms,
                result: vec![SubExp::Var(last)],
            },
            ret: vec![acc_ty],
        };
        let out = b.let_exp(
            vec3,
            Exp::WithAcc {
                inputs: vec![WithAccInput {
                    shape: vec![SubExp::i64(3)],
                    arrays: vec![ys.name],
                    op: Some((op, vec![SubExp::Const(PrimValue::f64(0.))])),
                }],
                lam: body,
            },
        );
        let lam = b.lambda(vec![ys], vec![SubExp::Var(out)]).unwrap();
        let ones = Val::array(vec![Val::f64(1.); 3]);
        let expected = Val::array(vec![Val::f64(1.), Val::f64(6.), Val::f64(1.)]);
        assert_eq!(interp(&lam, vec![ones]).unwrap(), vec![expected]);
    }

    #[test]
    fn test_for_loop_product() {
        let mut names = NameSource::new();
        let mut b = Builder::new(&mut names);
        let x = b.param(Type::f64());
        let acc: Param = b.param(Type::f64());
        let i = b.fresh();
        let (next, stms) = b.collect(|b| b.let_basic(Type::f64(), fbin(BinOp::FMul, acc.name, x.name)));
        let r = b.let_exp(
            Type::f64(),
            Exp::Loop {
                merge: vec![(acc, SubExp::Const(PrimValue::f64(1.)))],
                form: LoopForm::For {
                    index: i,
                    ty: IntType::I64,
                    bound: SubExp::i64(3),
                    arrays: vec![],
                },
                body: Body {
                    stms,
                    result: vec![SubExp::Var(next)],
                },
            },
        );
        let lam = b.lambda(vec![x], vec![SubExp::Var(r)]).unwrap();
        assert_eq!(interp(&lam, vec![Val::f64(2.)]).unwrap(), vec![Val::f64(8.)]);
    }

    #[test]
    fn test_failed_assertion() {
        let mut names = NameSource::new();
        let mut b = Builder::new(&mut names);
        let c = b.param(Type::bool());
        let cert = b.let_basic(
            Type::Prim(PrimType::Cert),
            BasicOp::Assert {
                cond: SubExp::Var(c.name),
                msg: "index in bounds".to_owned(),
            },
        );
        let lam = b.lambda(vec![c], vec![SubExp::Var(cert)]).unwrap();
        assert_eq!(
            interp(&lam, vec![Val::bool(true)]).unwrap(),
            vec![Val::Prim(PrimValue::Cert)]
        );
        let err = interp(&lam, vec![Val::bool(false)]).unwrap_err();
        assert!(matches!(err, Error::Assertion(msg) if msg == "index in bounds"));
    }

    #[test]
    fn test_if_selects_branch() {
        let mut names = NameSource::new();
        let mut b = Builder::new(&mut names);
        let c = b.param(Type::bool());
        let x = b.param(Type::f64());
        let r = b.let_exp(
            Type::f64(),
            Exp::If {
                cond: SubExp::Var(c.name),
                then: Body {
                    stms: vec![],
                    result: vec![SubExp::Var(x.name)],
                },
                els: Body {
                    stms: vec![],
                    result: vec![SubExp::Const(PrimValue::f64(0.))],
                },
                dec: IfDec {
                    ret: vec![Type::f64()],
                    sort: IfSort::Normal,
                },
            },
        );
        let lam = b.lambda(vec![c, x], vec![SubExp::Var(r)]).unwrap();
        let run = |c| interp(&lam, vec![Val::bool(c), Val::f64(5.)]).unwrap();
        assert_eq!(run(true), vec![Val::f64(5.)]);
        assert_eq!(run(false), vec![Val::f64(0.)]);
    }

    #[test]
    fn test_rearrange_transposes() {
        let m = Val::array(vec![
            Val::array(vec![Val::i64(1), Val::i64(2), Val::i64(3)]),
            Val::array(vec![Val::i64(4), Val::i64(5), Val::i64(6)]),
        ]);
        let t = rearrange(&m, &[1, 0]).unwrap();
        assert_eq!(shape_of(&t), vec![3, 2]);
        assert_eq!(index(&t, &[Dim::Fix(2), Dim::Fix(0)]).unwrap(), Val::i64(3));
        assert_eq!(reshape(&m, &[6]).unwrap().rows().unwrap().len(), 6);
        assert_eq!(
            rotate(&m, &[0, 1]).unwrap(),
            Val::array(vec![
                Val::array(vec![Val::i64(2), Val::i64(3), Val::i64(1)]),
                Val::array(vec![Val::i64(5), Val::i64(6), Val::i64(4)]),
            ])
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_val_json() {
        let v = Val::array(vec![Val::f64(1.5)]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(serde_json::from_str::<Val>(&json).unwrap(), v);
    }
}
