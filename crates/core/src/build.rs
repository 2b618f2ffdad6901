use crate::{
    id::{Name, NameSource},
    Aux, BasicOp, Exp, Lambda, Param, PatElem, PrimExp, Stm, SubExp, Type,
};
use std::{collections::HashMap, mem::take};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no type known for {0}")]
    UnknownName(Name),
}

/// A statement list under construction, together with the types of every name seen so far.
///
/// Not guaranteed to be well-formed: nothing stops a caller from reading a name before binding it.
pub struct Builder<'a> {
    names: &'a mut NameSource,
    types: HashMap<Name, Type>,
    stms: Vec<Stm>,
}

impl<'a> Builder<'a> {
    pub fn new(names: &'a mut NameSource) -> Self {
        Self {
            names,
            types: HashMap::new(),
            stms: vec![],
        }
    }

    pub fn fresh(&mut self) -> Name {
        self.names.fresh()
    }

    pub fn names(&mut self) -> &mut NameSource {
        &mut *self.names
    }

    /// Record the type of a name bound somewhere other than this builder's statements.
    pub fn declare(&mut self, name: Name, ty: Type) {
        self.types.insert(name, ty);
    }

    pub fn declare_params(&mut self, params: &[Param]) {
        for p in params {
            self.declare(p.name, p.ty.clone());
        }
    }

    pub fn ty(&self, x: Name) -> Result<&Type, Error> {
        self.types.get(&x).ok_or(Error::UnknownName(x))
    }

    pub fn subexp_ty(&self, se: &SubExp) -> Result<Type, Error> {
        match se {
            SubExp::Const(v) => Ok(Type::Prim(v.ty())),
            &SubExp::Var(x) => self.ty(x).cloned(),
        }
    }

    /// A fresh parameter of type `ty`.
    pub fn param(&mut self, ty: Type) -> Param {
        let name = self.fresh();
        self.declare(name, ty.clone());
        PatElem { name, ty }
    }

    pub fn add(&mut self, stm: Stm) {
        for pe in &stm.pat {
            self.types.insert(pe.name, pe.ty.clone());
        }
        self.stms.push(stm);
    }

    pub fn bind(&mut self, pat: Vec<PatElem>, exp: Exp) {
        self.add(Stm {
            pat,
            aux: Aux::default(),
            exp,
        });
    }

    /// Bind `exp` to a single fresh name of type `ty`.
    pub fn let_exp(&mut self, ty: Type, exp: Exp) -> Name {
        let name = self.fresh();
        self.bind(vec![PatElem { name, ty }], exp);
        name
    }

    pub fn let_basic(&mut self, ty: Type, op: BasicOp) -> Name {
        self.let_exp(ty, Exp::Basic(op))
    }

    fn exp_of(&mut self, e: &PrimExp) -> Exp {
        match e {
            &PrimExp::Leaf(x, _) => Exp::Basic(BasicOp::SubExp(SubExp::Var(x))),
            &PrimExp::Value(v) => Exp::Basic(BasicOp::SubExp(SubExp::Const(v))),
            PrimExp::Bin(op, a, b) => {
                let x = self.prim_exp(a);
                let y = self.prim_exp(b);
                Exp::Basic(BasicOp::BinOp { op: *op, x, y })
            }
            PrimExp::Cmp(op, a, b) => {
                let x = self.prim_exp(a);
                let y = self.prim_exp(b);
                Exp::Basic(BasicOp::CmpOp { op: *op, x, y })
            }
            PrimExp::Un(op, a) => {
                let x = self.prim_exp(a);
                Exp::Basic(BasicOp::UnOp { op: *op, x })
            }
            PrimExp::Conv(op, a) => {
                let x = self.prim_exp(a);
                Exp::Basic(BasicOp::ConvOp { op: *op, x })
            }
            PrimExp::Call(func, args, t) => Exp::Apply {
                func: func.clone(),
                args: args.iter().map(|arg| self.prim_exp(arg)).collect(),
                ret: vec![Type::Prim(*t)],
            },
        }
    }

    /// Lower `e` into statements, returning an operand holding its value.
    pub fn prim_exp(&mut self, e: &PrimExp) -> SubExp {
        match e {
            &PrimExp::Leaf(x, _) => SubExp::Var(x),
            &PrimExp::Value(v) => SubExp::Const(v),
            _ => {
                let exp = self.exp_of(e);
                SubExp::Var(self.let_exp(Type::Prim(e.ty()), exp))
            }
        }
    }

    /// Lower `e` so that its outermost operation binds exactly `pe`.
    pub fn bind_prim_exp(&mut self, pe: PatElem, aux: Aux, e: &PrimExp) {
        let exp = self.exp_of(e);
        self.add(Stm {
            pat: vec![pe],
            aux,
            exp,
        });
    }

    /// Take every statement added so far.
    pub fn take(&mut self) -> Vec<Stm> {
        take(&mut self.stms)
    }

    /// Swap in `stms` as the statements added so far, returning the previous ones.
    pub fn replace(&mut self, stms: Vec<Stm>) -> Vec<Stm> {
        std::mem::replace(&mut self.stms, stms)
    }

    /// Run `f` against an empty statement list, returning its result and the statements it added.
    pub fn collect<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> (T, Vec<Stm>) {
        let outer = take(&mut self.stms);
        let x = f(self);
        let inner = self.replace(outer);
        (x, inner)
    }

    /// Close the statements added so far into a lambda returning `result`.
    pub fn lambda(&mut self, params: Vec<Param>, result: Vec<SubExp>) -> Result<Lambda, Error> {
        let ret = result
            .iter()
            .map(|se| self.subexp_ty(se))
            .collect::<Result<_, _>>()?;
        Ok(Lambda {
            params,
            body: crate::Body {
                stms: self.take(),
                result,
            },
            ret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinOp, FloatType, PrimType};

    #[test]
    fn test_prim_exp_binds_inner_nodes() {
        let mut names = NameSource::new();
        let mut b = Builder::new(&mut names);
        let x = b.param(Type::f64());
        let t = PrimType::Float(FloatType::F64);
        let leaf = PrimExp::Leaf(x.name, t);
        let e = leaf.clone().mul(leaf.clone()).add(leaf);
        let res = b.prim_exp(&e);
        let lam = b.lambda(vec![x], vec![res]).unwrap();
        assert_eq!(lam.body.stms.len(), 2);
        assert_eq!(lam.ret, vec![Type::f64()]);
        match &lam.body.stms[1].exp {
            Exp::Basic(BasicOp::BinOp { op, .. }) => assert_eq!(*op, BinOp::FAdd(FloatType::F64)),
            e => panic!("unexpected {e}"),
        }
    }

    #[test]
    fn test_collect_restores_outer() {
        let mut names = NameSource::new();
        let mut b = Builder::new(&mut names);
        b.let_basic(Type::i64(), BasicOp::SubExp(SubExp::i64(1)));
        let (_, inner) = b.collect(|b| b.let_basic(Type::i64(), BasicOp::SubExp(SubExp::i64(2))));
        assert_eq!(inner.len(), 1);
        assert_eq!(b.take().len(), 1);
    }
}
