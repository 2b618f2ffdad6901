//! Name-level traversals: free variables, the largest name in use, and capture-avoiding renaming.

use crate::{
    id::{Name, NameSource},
    BasicOp, Body, DimIndex, Exp, Lambda, LoopForm, PatElem, Soac, StreamForm, SubExp, Type,
};
use indexmap::IndexSet;
use std::collections::{HashMap, HashSet};

/// Callbacks for every name occurrence, visited in binding order: the operands of a statement come
/// before the names its pattern binds, and parameters come before the body they scope over.
trait Walk {
    fn bind(&mut self, x: &mut Name);
    fn used(&mut self, x: &mut Name);
}

fn subexp(w: &mut impl Walk, se: &mut SubExp) {
    if let SubExp::Var(x) = se {
        w.used(x);
    }
}

fn subexps(w: &mut impl Walk, ses: &mut [SubExp]) {
    for se in ses {
        subexp(w, se);
    }
}

fn names(w: &mut impl Walk, xs: &mut [Name]) {
    for x in xs {
        w.used(x);
    }
}

fn ty(w: &mut impl Walk, t: &mut Type) {
    match t {
        Type::Prim(_) => {}
        Type::Array { shape, .. } => subexps(w, shape),
        Type::Acc {
            token,
            shape,
            elems,
            ..
        } => {
            w.used(token);
            subexps(w, shape);
            for t in elems {
                ty(w, t);
            }
        }
    }
}

fn bind(w: &mut impl Walk, pes: &mut [PatElem]) {
    for pe in pes {
        w.bind(&mut pe.name);
        ty(w, &mut pe.ty);
    }
}

fn slice(w: &mut impl Walk, dims: &mut [DimIndex]) {
    for dim in dims {
        match dim {
            DimIndex::Fix(i) => subexp(w, i),
            DimIndex::Slice { start, len, stride } => {
                subexp(w, start);
                subexp(w, len);
                subexp(w, stride);
            }
        }
    }
}

fn basic(w: &mut impl Walk, op: &mut BasicOp) {
    match op {
        BasicOp::SubExp(se) => subexp(w, se),
        BasicOp::ArrayLit { elems, ty: t } => {
            subexps(w, elems);
            ty(w, t);
        }
        BasicOp::UnOp { x, .. } | BasicOp::ConvOp { x, .. } => subexp(w, x),
        BasicOp::BinOp { x, y, .. } | BasicOp::CmpOp { x, y, .. } => {
            subexp(w, x);
            subexp(w, y);
        }
        BasicOp::Index { array, slice: s } => {
            w.used(array);
            slice(w, s);
        }
        BasicOp::Update {
            array,
            slice: s,
            value,
        } => {
            w.used(array);
            slice(w, s);
            subexp(w, value);
        }
        BasicOp::Concat {
            first, rest, width, ..
        } => {
            w.used(first);
            names(w, rest);
            subexp(w, width);
        }
        BasicOp::Copy { array }
        | BasicOp::Manifest { array, .. }
        | BasicOp::Rearrange { array, .. } => w.used(array),
        BasicOp::Reshape { shape, array } => {
            subexps(w, shape);
            w.used(array);
        }
        BasicOp::Rotate { offsets, array } => {
            subexps(w, offsets);
            w.used(array);
        }
        BasicOp::Iota { n, start, step, .. } => {
            subexp(w, n);
            subexp(w, start);
            subexp(w, step);
        }
        BasicOp::Replicate { shape, value } => {
            subexps(w, shape);
            subexp(w, value);
        }
        BasicOp::Scratch { shape, .. } => subexps(w, shape),
        BasicOp::Assert { cond, .. } => subexp(w, cond),
        BasicOp::UpdateAcc { acc, index, values } => {
            w.used(acc);
            subexps(w, index);
            subexps(w, values);
        }
    }
}

fn lambda(w: &mut impl Walk, lam: &mut Lambda) {
    bind(w, &mut lam.params);
    body(w, &mut lam.body);
    for t in &mut lam.ret {
        ty(w, t);
    }
}

fn soac(w: &mut impl Walk, op: &mut Soac) {
    match op {
        Soac::Screma {
            width,
            arrays,
            form,
        } => {
            subexp(w, width);
            names(w, arrays);
            for scan in &mut form.scans {
                subexps(w, &mut scan.nes);
                lambda(w, &mut scan.lam);
            }
            for red in &mut form.reduces {
                subexps(w, &mut red.nes);
                lambda(w, &mut red.lam);
            }
            lambda(w, &mut form.map);
        }
        Soac::Stream {
            width,
            arrays,
            form,
            nes,
            lam,
        } => {
            subexp(w, width);
            names(w, arrays);
            subexps(w, nes);
            if let StreamForm::Parallel { op, .. } = form {
                lambda(w, op);
            }
            lambda(w, lam);
        }
        Soac::Hist {
            width,
            ops,
            bucket,
            arrays,
        } => {
            subexp(w, width);
            for op in ops {
                subexps(w, &mut op.shape);
                subexp(w, &mut op.race);
                names(w, &mut op.dests);
                subexps(w, &mut op.nes);
                lambda(w, &mut op.op);
            }
            lambda(w, bucket);
            names(w, arrays);
        }
        Soac::Scatter {
            width,
            lam,
            arrays,
            dests,
        } => {
            subexp(w, width);
            lambda(w, lam);
            names(w, arrays);
            for dest in dests {
                subexps(w, &mut dest.shape);
                w.used(&mut dest.array);
            }
        }
    }
}

fn exp(w: &mut impl Walk, e: &mut Exp) {
    match e {
        Exp::Basic(op) => basic(w, op),
        Exp::Apply { args, ret, .. } => {
            subexps(w, args);
            for t in ret {
                ty(w, t);
            }
        }
        Exp::If {
            cond,
            then,
            els,
            dec,
        } => {
            subexp(w, cond);
            body(w, then);
            body(w, els);
            for t in &mut dec.ret {
                ty(w, t);
            }
        }
        Exp::Loop {
            merge,
            form,
            body: b,
        } => {
            for (_, init) in merge.iter_mut() {
                subexp(w, init);
            }
            if let LoopForm::For { bound, arrays, .. } = form {
                subexp(w, bound);
                for (_, arr) in arrays.iter_mut() {
                    w.used(arr);
                }
            }
            for (p, _) in merge.iter_mut() {
                bind(w, std::slice::from_mut(p));
            }
            match form {
                LoopForm::While { cond } => {
                    body(w, b);
                    w.used(cond);
                }
                LoopForm::For { index, arrays, .. } => {
                    w.bind(index);
                    for (p, _) in arrays.iter_mut() {
                        bind(w, std::slice::from_mut(p));
                    }
                    body(w, b);
                }
            }
        }
        Exp::WithAcc { inputs, lam } => {
            for input in inputs {
                subexps(w, &mut input.shape);
                names(w, &mut input.arrays);
                if let Some((op, nes)) = &mut input.op {
                    subexps(w, nes);
                    lambda(w, op);
                }
            }
            lambda(w, lam);
        }
        Exp::Op(op) => soac(w, op),
    }
}

fn body(w: &mut impl Walk, b: &mut Body) {
    for stm in &mut b.stms {
        for c in &mut stm.aux.certs {
            w.used(c);
        }
        exp(w, &mut stm.exp);
        bind(w, &mut stm.pat);
    }
    subexps(w, &mut b.result);
}

#[derive(Default)]
struct Free {
    bound: HashSet<Name>,
    free: IndexSet<Name>,
}

impl Walk for Free {
    fn bind(&mut self, x: &mut Name) {
        self.bound.insert(*x);
    }

    fn used(&mut self, x: &mut Name) {
        if !self.bound.contains(x) {
            self.free.insert(*x);
        }
    }
}

/// Names read by `b` but not bound inside it, in order of first occurrence.
///
/// The walk runs over a copy since it shares its traversal with renaming.
pub fn free_in_body(b: &Body) -> IndexSet<Name> {
    let mut w = Free::default();
    body(&mut w, &mut b.clone());
    w.free
}

struct Max(Option<Name>);

impl Walk for Max {
    fn bind(&mut self, x: &mut Name) {
        self.0 = self.0.max(Some(*x));
    }

    fn used(&mut self, x: &mut Name) {
        self.0 = self.0.max(Some(*x));
    }
}

/// The largest name occurring anywhere in `lam`, bound or free.
pub fn max_name(lam: &Lambda) -> Option<Name> {
    let mut w = Max(None);
    lambda(&mut w, &mut lam.clone());
    w.0
}

struct Rename<'a> {
    names: &'a mut NameSource,
    subst: HashMap<Name, Name>,
}

impl Walk for Rename<'_> {
    fn bind(&mut self, x: &mut Name) {
        let y = self.names.fresh();
        self.subst.insert(*x, y);
        *x = y;
    }

    fn used(&mut self, x: &mut Name) {
        if let Some(&y) = self.subst.get(x) {
            *x = y;
        }
    }
}

/// Give every name bound inside `b` a fresh name, leaving free names untouched.
pub fn rename_body(names: &mut NameSource, b: &Body) -> Body {
    let mut renamed = b.clone();
    let mut w = Rename {
        names,
        subst: HashMap::new(),
    };
    body(&mut w, &mut renamed);
    renamed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{id, Aux, BinOp, FloatType, Stm};

    fn mul(z: Name, x: Name, y: Name) -> Stm {
        Stm {
            pat: vec![PatElem {
                name: z,
                ty: Type::f64(),
            }],
            aux: Aux::default(),
            exp: Exp::Basic(BasicOp::BinOp {
                op: BinOp::FMul(FloatType::F64),
                x: SubExp::Var(x),
                y: SubExp::Var(y),
            }),
        }
    }

    #[test]
    fn test_free_excludes_bound() {
        let (a, b, c, d) = (id::name(0), id::name(1), id::name(2), id::name(3));
        let body = Body {
            stms: vec![mul(c, a, b), mul(d, c, a)],
            result: vec![SubExp::Var(d)],
        };
        let free: Vec<_> = free_in_body(&body).into_iter().collect();
        assert_eq!(free, vec![a, b]);
    }

    #[test]
    fn test_rename_keeps_free_names() {
        let (a, c) = (id::name(0), id::name(1));
        let body = Body {
            stms: vec![mul(c, a, a)],
            result: vec![SubExp::Var(c)],
        };
        let mut names = NameSource::new();
        names.fresh();
        names.fresh();
        let renamed = rename_body(&mut names, &body);
        let fresh = id::name(2);
        assert_eq!(renamed.stms[0].pat[0].name, fresh);
        assert_eq!(renamed.result, vec![SubExp::Var(fresh)]);
        assert_eq!(free_in_body(&renamed), free_in_body(&body));
    }
}
