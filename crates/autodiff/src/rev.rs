//! Reverse mode: run the original computation, then sweep it backwards accumulating adjoints.

use crate::{
    arity,
    rules::Rules,
    state::{single, Ad},
    Error, Mode,
};
use tangle::{
    free::{free_in_body, rename_body},
    id::{Name, NameSource},
    Aux, BasicOp, Body, ConvOp, Exp, IfDec, IfSort, Lambda, PatElem, PrimExp, PrimType, PrimValue,
    ScremaForm, Soac, Stm, SubExp, Type,
};

const MODE: Mode = Mode::Reverse;

fn unsupported(stm: &Stm) -> Error {
    Error::Unsupported {
        mode: MODE,
        stm: stm.to_string(),
    }
}

impl Ad<'_> {
    /// The adjoint of `x`, materialized as zero if nothing has contributed to it yet.
    fn lookup_adj(&mut self, x: Name) -> Result<Name, Error> {
        if let Some(adj) = self.companion(x) {
            return Ok(adj);
        }
        let adj = self.zero_of(x)?;
        self.set_companion(x, adj);
        Ok(adj)
    }

    /// Add the contribution `d` to the adjoint of `x`.
    fn update_adjoint(&mut self, x: Name, d: Name) -> Result<(), Error> {
        let sum = match self.companion(x) {
            None => d,
            Some(old) => {
                let ty = self.b.ty(x)?.clone();
                self.add_values(&ty, old, d)?
            }
        };
        self.set_companion(x, sum);
        Ok(())
    }

    /// `x + y` for values of type `ty`, element-wise for arrays.
    fn add_values(&mut self, ty: &Type, x: Name, y: Name) -> Result<Name, Error> {
        match ty {
            &Type::Prim(t) => Ok(self.contrib(&PrimExp::Leaf(x, t).add(PrimExp::Leaf(y, t)))),
            Type::Array { shape, .. } => {
                let (Some(&width), Some(row)) = (shape.first(), ty.row()) else {
                    return Err(Error::Accumulator(x));
                };
                let a = self.b.param(row.clone());
                let c = self.b.param(row.clone());
                let (sum, stms) = self.collect(|ad| ad.add_values(&row, a.name, c.name))?;
                let map = Lambda {
                    params: vec![a, c],
                    body: Body {
                        stms,
                        result: vec![SubExp::Var(sum)],
                    },
                    ret: vec![row],
                };
                Ok(self.b.let_exp(
                    ty.clone(),
                    Exp::Op(Soac::Screma {
                        width,
                        arrays: vec![x, y],
                        form: ScremaForm {
                            scans: vec![],
                            reduces: vec![],
                            map,
                        },
                    }),
                ))
            }
            Type::Acc { .. } => Err(Error::Accumulator(x)),
        }
    }

    /// Bind `e` to a fresh name.
    fn contrib(&mut self, e: &PrimExp) -> Name {
        let name = self.b.fresh();
        let ty = Type::Prim(e.ty());
        self.b.bind_prim_exp(PatElem { name, ty }, Aux::default(), e);
        name
    }

    /// Contribute `e` to the adjoint of `se`, unless it is a constant.
    fn update_subexp(&mut self, se: &SubExp, e: &PrimExp) -> Result<(), Error> {
        if let &SubExp::Var(x) = se {
            let d = self.contrib(e);
            self.update_adjoint(x, d)?;
        }
        Ok(())
    }

    /// Emit `stms` unchanged, run `seed`, then distribute adjoints through `stms` last to first.
    fn rev_stms(
        &mut self,
        stms: &[Stm],
        seed: impl FnOnce(&mut Self) -> Result<(), Error>,
    ) -> Result<(), Error> {
        for stm in stms {
            self.b.add(stm.clone());
        }
        seed(self)?;
        for stm in stms.iter().rev() {
            log::trace!("reverse: {stm}");
            self.diff_stm(stm)?;
        }
        Ok(())
    }

    fn diff_basic(&mut self, stm: &Stm, op: &BasicOp) -> Result<(), Error> {
        if let BasicOp::SubExp(SubExp::Const(_)) | BasicOp::Assert { .. } = op {
            return Ok(());
        }
        let rules = self.rules;
        let pe = single(stm, MODE)?;
        if let &BasicOp::CmpOp { op, x, y } = op {
            return self.diff_cmp(op.ty(), pe.name, [x, y]);
        }
        let adj = self.lookup_adj(pe.name)?;
        match op {
            &BasicOp::SubExp(SubExp::Var(x)) => self.update_adjoint(x, adj)?,
            &BasicOp::ConvOp {
                op: ConvOp::FPConv(from, to),
                x,
            } => {
                let back = PrimExp::conv(
                    ConvOp::FPConv(to, from),
                    PrimExp::Leaf(adj, PrimType::Float(to)),
                );
                self.update_subexp(&x, &back)?;
            }
            BasicOp::ConvOp { .. } => {}
            &BasicOp::UnOp { op, x } => {
                let t = op.ty();
                let d = rules.unop(op, &PrimExp::from_subexp(t, &x));
                self.update_subexp(&x, &PrimExp::Leaf(adj, t).mul(d))?;
            }
            &BasicOp::BinOp { op, x, y } => {
                let t = op.ty();
                let (wrt_x, wrt_y) = rules.binop(
                    op,
                    &PrimExp::from_subexp(t, &x),
                    &PrimExp::from_subexp(t, &y),
                );
                self.update_subexp(&x, &PrimExp::Leaf(adj, t).mul(wrt_x))?;
                self.update_subexp(&y, &PrimExp::Leaf(adj, t).mul(wrt_y))?;
            }
            _ => return Err(unsupported(stm)),
        }
        Ok(())
    }

    /// A comparison contributes its boolean result `b`, as a number of the operand type `t`, to
    /// both of its variable operands.
    fn diff_cmp(&mut self, t: PrimType, b: Name, operands: [SubExp; 2]) -> Result<(), Error> {
        let d = match t {
            PrimType::Float(ft) => {
                let branch = |val: f64| Body {
                    stms: vec![],
                    result: vec![SubExp::Const(PrimValue::Float(ft, val))],
                };
                self.b.let_exp(
                    Type::Prim(t),
                    Exp::If {
                        cond: SubExp::Var(b),
                        then: branch(1.),
                        els: branch(0.),
                        dec: IfDec {
                            ret: vec![Type::Prim(t)],
                            sort: IfSort::Normal,
                        },
                    },
                )
            }
            PrimType::Int(it) => self.b.let_basic(
                Type::Prim(t),
                BasicOp::ConvOp {
                    op: ConvOp::BToI(it),
                    x: SubExp::Var(b),
                },
            ),
            PrimType::Bool => b,
            PrimType::Cert => return Ok(()),
        };
        for se in operands {
            if let SubExp::Var(v) = se {
                self.update_adjoint(v, d)?;
            }
        }
        Ok(())
    }

    fn diff_apply(&mut self, stm: &Stm, func: &str, args: &[SubExp]) -> Result<(), Error> {
        let rules = self.rules;
        let missing = || Error::MissingRule {
            func: func.to_owned(),
        };
        let (arg_types, ret) = rules.signature(func).ok_or_else(missing)?;
        let arg_pes: Vec<_> = arg_types
            .iter()
            .zip(args)
            .map(|(&t, arg)| PrimExp::from_subexp(t, arg))
            .collect();
        let derivs = rules.builtin(func, &arg_pes).ok_or_else(missing)?;
        let pe = single(stm, MODE)?;
        let adj = self.lookup_adj(pe.name)?;
        for (arg, d) in args.iter().zip(derivs) {
            self.update_subexp(arg, &PrimExp::Leaf(adj, ret).mul(d))?;
        }
        Ok(())
    }

    /// One branch of an adjoint conditional: recompute the branch, seed its results with the
    /// adjoints of the conditional's pattern and return the adjoints of `fvs`.
    fn diff_branch(&mut self, body: &Body, seeds: &[Name], fvs: &[Name]) -> Result<Body, Error> {
        let body = rename_body(self.b.names(), body);
        self.sub_ad(|ad| {
            let (result, stms) = ad.collect(|ad| {
                ad.rev_stms(&body.stms, |ad| {
                    for (se, &d) in body.result.iter().zip(seeds) {
                        if let &SubExp::Var(x) = se {
                            ad.update_adjoint(x, d)?;
                        }
                    }
                    Ok(())
                })?;
                fvs.iter()
                    .map(|&x| ad.lookup_adj(x).map(SubExp::Var))
                    .collect::<Result<Vec<_>, _>>()
            })?;
            Ok(Body { stms, result })
        })
    }

    fn diff_if(
        &mut self,
        stm: &Stm,
        cond: SubExp,
        then: &Body,
        els: &Body,
        sort: IfSort,
    ) -> Result<(), Error> {
        let seeds = stm
            .pat
            .iter()
            .map(|pe| self.lookup_adj(pe.name))
            .collect::<Result<Vec<_>, _>>()?;
        let mut free = free_in_body(then);
        free.extend(free_in_body(els));
        let mut fvs = vec![];
        let mut ret = vec![];
        for x in free {
            let t = self.b.ty(x)?;
            if !t.is_acc() {
                ret.push(t.clone());
                fvs.push(x);
            }
        }
        if fvs.is_empty() {
            return Ok(());
        }
        let then = self.diff_branch(then, &seeds, &fvs)?;
        let els = self.diff_branch(els, &seeds, &fvs)?;
        let pat: Vec<PatElem> = ret
            .iter()
            .map(|t| PatElem {
                name: self.b.fresh(),
                ty: t.clone(),
            })
            .collect();
        let contribs: Vec<Name> = pat.iter().map(|pe| pe.name).collect();
        self.b.add(Stm {
            pat,
            aux: stm.aux.clone(),
            exp: Exp::If {
                cond,
                then,
                els,
                dec: IfDec { ret, sort },
            },
        });
        for (x, d) in fvs.into_iter().zip(contribs) {
            self.update_adjoint(x, d)?;
        }
        Ok(())
    }

    fn diff_stm(&mut self, stm: &Stm) -> Result<(), Error> {
        match &stm.exp {
            Exp::Basic(op) => self.diff_basic(stm, op),
            Exp::Apply { func, args, .. } => self.diff_apply(stm, func, args),
            Exp::If {
                cond,
                then,
                els,
                dec,
            } => self.diff_if(stm, *cond, then, els, dec.sort),
            Exp::Loop { .. } | Exp::WithAcc { .. } | Exp::Op(_) => Err(unsupported(stm)),
        }
    }
}

/// The vector-Jacobian product of `lam`.
///
/// The result takes the original parameters followed by one seed per original result, and returns
/// the adjoint of every original parameter. A seed for a constant result is accepted but never
/// read.
pub fn reverse(names: &mut NameSource, rules: &dyn Rules, lam: &Lambda) -> Result<Lambda, Error> {
    let (n, m) = arity(lam);
    log::debug!("reverse differentiating lambda with {n} parameters and {m} results");
    names.reserve(lam);
    let mut ad = Ad::new(names, rules);
    ad.b.declare_params(&lam.params);
    let seeds: Vec<_> = lam.ret.iter().map(|t| ad.b.param(t.clone())).collect();
    let (result, stms) = ad.collect(|ad| {
        ad.rev_stms(&lam.body.stms, |ad| {
            for (se, seed) in lam.body.result.iter().zip(&seeds) {
                if let &SubExp::Var(x) = se {
                    ad.update_adjoint(x, seed.name)?;
                }
            }
            Ok(())
        })?;
        lam.params
            .iter()
            .map(|p| ad.lookup_adj(p.name).map(SubExp::Var))
            .collect::<Result<Vec<_>, _>>()
    })?;
    let mut params = lam.params.clone();
    params.extend(seeds);
    let ret = lam.params.iter().map(|p| p.ty.clone()).collect();
    log::debug!("reverse produced {} statements", stms.len());
    Ok(Lambda {
        params,
        body: Body { stms, result },
        ret,
    })
}
