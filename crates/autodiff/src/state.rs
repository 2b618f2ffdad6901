use crate::{rules::Rules, Error, Mode};
use indexmap::IndexMap;
use tangle::{
    build::Builder,
    id::{Name, NameSource},
    BasicOp, Exp, PatElem, PrimValue, Stm, SubExp, Type,
};

/// Transformation context shared by both engines.
///
/// In forward mode the companion of a name is its tangent; in reverse mode it is the adjoint
/// accumulated so far.
pub(crate) struct Ad<'a> {
    pub b: Builder<'a>,
    pub rules: &'a dyn Rules,
    companions: IndexMap<Name, Name>,
}

impl<'a> Ad<'a> {
    pub fn new(names: &'a mut NameSource, rules: &'a dyn Rules) -> Self {
        Self {
            b: Builder::new(names),
            rules,
            companions: IndexMap::new(),
        }
    }

    pub fn companion(&self, x: Name) -> Option<Name> {
        self.companions.get(&x).copied()
    }

    pub fn set_companion(&mut self, x: Name, c: Name) {
        self.companions.insert(x, c);
    }

    /// Run `f`, then restore the companion map to what it was before, even if `f` failed.
    pub fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, Error>) -> Result<T, Error> {
        let saved = self.companions.clone();
        let res = f(self);
        self.companions = saved;
        res
    }

    /// Run `f` with an empty companion map, restoring the caller's map afterwards.
    pub fn sub_ad<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, Error>) -> Result<T, Error> {
        let saved = std::mem::take(&mut self.companions);
        let res = f(self);
        self.companions = saved;
        res
    }

    /// Run `f` against an empty statement list, returning its result and the statements it added.
    pub fn collect<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<(T, Vec<Stm>), Error> {
        let outer = self.b.replace(vec![]);
        let res = f(self);
        let inner = self.b.replace(outer);
        Ok((res?, inner))
    }

    /// A fresh name holding the zero of `x`'s type.
    pub fn zero_of(&mut self, x: Name) -> Result<Name, Error> {
        let ty = self.b.ty(x)?.clone();
        let exp = zero_exp(&ty).ok_or(Error::Accumulator(x))?;
        Ok(self.b.let_exp(ty, exp))
    }

    /// An operand holding the zero of `se`'s type; constants need no statement.
    pub fn zero_from_subexp(&mut self, se: &SubExp) -> Result<SubExp, Error> {
        match se {
            SubExp::Const(v) => Ok(SubExp::Const(PrimValue::zero(v.ty()))),
            &SubExp::Var(x) => match self.b.ty(x)? {
                Type::Prim(t) => Ok(SubExp::Const(PrimValue::zero(*t))),
                _ => self.zero_of(x).map(SubExp::Var),
            },
        }
    }
}

pub(crate) fn zero_exp(ty: &Type) -> Option<Exp> {
    match ty {
        &Type::Prim(t) => Some(Exp::Basic(BasicOp::SubExp(SubExp::Const(PrimValue::zero(
            t,
        ))))),
        Type::Array { elem, shape, .. } => Some(Exp::Basic(BasicOp::Replicate {
            shape: shape.clone(),
            value: SubExp::Const(PrimValue::zero(*elem)),
        })),
        Type::Acc { .. } => None,
    }
}

/// The only element of a pattern that must bind exactly one name.
pub(crate) fn single(stm: &Stm, mode: Mode) -> Result<&PatElem, Error> {
    match stm.pat.as_slice() {
        [pe] => Ok(pe),
        pat => Err(Error::Pattern {
            mode,
            expected: 1,
            found: pat.len(),
            stm: stm.to_string(),
        }),
    }
}
