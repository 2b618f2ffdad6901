//! Forward mode: every value is paired with a tangent computed right after it.

use crate::{
    arity,
    rules::Rules,
    state::{single, Ad},
    Error, Mode,
};
use tangle::{
    id::{Name, NameSource},
    BasicOp, Body, Exp, HistOp, IfDec, Lambda, LoopForm, Param, PatElem, PrimExp, PrimType,
    PrimValue, Reduce, Scan, ScatterDest, ScremaForm, Soac, Stm, StreamForm, SubExp, Type,
    WithAccInput,
};

const MODE: Mode = Mode::Forward;

/// The type of a tangent of a value of type `t`. Accumulators carry their tangents alongside their
/// primal elements, so their element list doubles.
fn tan_type(t: &Type) -> Type {
    match t {
        Type::Acc {
            token,
            shape,
            elems,
            unique,
        } => Type::Acc {
            token: *token,
            shape: shape.clone(),
            elems: elems.iter().chain(elems).map(tan_type).collect(),
            unique: *unique,
        },
        _ => t.clone(),
    }
}

/// Each type followed by its tangent type, except accumulators, which stand alone.
fn bundle_types(ts: &[Type]) -> Vec<Type> {
    let mut bundled = vec![];
    for t in ts {
        if !t.is_acc() {
            bundled.push(t.clone());
        }
        bundled.push(tan_type(t));
    }
    bundled
}

fn unsupported(stm: &Stm) -> Error {
    Error::Unsupported {
        mode: MODE,
        stm: stm.to_string(),
    }
}

fn interleave(xs: &[SubExp], ys: Vec<SubExp>) -> Vec<SubExp> {
    xs.iter().zip(ys).flat_map(|(&x, y)| [x, y]).collect()
}

impl Ad<'_> {
    /// A tangent pattern element for `pe`, recorded as its companion.
    fn new_tan(&mut self, pe: &PatElem) -> PatElem {
        let ty = tan_type(&pe.ty);
        let name = if pe.ty.is_acc() {
            pe.name
        } else {
            self.b.fresh()
        };
        self.set_companion(pe.name, name);
        self.b.declare(name, ty.clone());
        PatElem { name, ty }
    }

    /// Every element followed by its tangent, except accumulators, which stand alone.
    fn bundle_new(&mut self, pes: &[PatElem]) -> Vec<PatElem> {
        let mut bundled = vec![];
        for pe in pes {
            let tan = self.new_tan(pe);
            if !pe.ty.is_acc() {
                bundled.push(pe.clone());
            }
            bundled.push(tan);
        }
        bundled
    }

    /// The tangent of `x`, materialized as zero if nothing has assigned one yet.
    fn tangent(&mut self, x: Name) -> Result<Name, Error> {
        if let Some(dx) = self.companion(x) {
            return Ok(dx);
        }
        let dx = self.zero_of(x)?;
        self.set_companion(x, dx);
        Ok(dx)
    }

    fn tangent_se(&mut self, se: &SubExp) -> Result<SubExp, Error> {
        match se {
            SubExp::Const(v) => Ok(SubExp::Const(PrimValue::zero(v.ty()))),
            &SubExp::Var(x) => self.tangent(x).map(SubExp::Var),
        }
    }

    fn tangents(&mut self, ses: &[SubExp]) -> Result<Vec<SubExp>, Error> {
        ses.iter().map(|se| self.tangent_se(se)).collect()
    }

    fn bundle_tan(&mut self, ses: &[SubExp]) -> Result<Vec<SubExp>, Error> {
        let mut bundled = vec![];
        for se in ses {
            bundled.push(*se);
            let acc = match se {
                &SubExp::Var(x) => self.b.ty(x)?.is_acc(),
                SubExp::Const(_) => false,
            };
            if !acc {
                bundled.push(self.tangent_se(se)?);
            }
        }
        Ok(bundled)
    }

    fn bundle_tan_names(&mut self, xs: &[Name]) -> Result<Vec<Name>, Error> {
        let mut bundled = vec![];
        for &x in xs {
            bundled.push(x);
            if !self.b.ty(x)?.is_acc() {
                bundled.push(self.tangent(x)?);
            }
        }
        Ok(bundled)
    }

    /// Zero tangents for neutral elements, interleaved with them.
    fn bundle_zeros(&mut self, nes: &[SubExp]) -> Result<Vec<SubExp>, Error> {
        let zeros = nes
            .iter()
            .map(|ne| self.zero_from_subexp(ne))
            .collect::<Result<_, _>>()?;
        Ok(interleave(nes, zeros))
    }

    /// Loop-carried parameters, each followed by a tangent parameter whose initial value is the
    /// tangent of the original initial value.
    fn bundle_merge(&mut self, merge: &[(Param, SubExp)]) -> Result<Vec<(Param, SubExp)>, Error> {
        let mut bundled = vec![];
        for (p, init) in merge {
            self.b.declare(p.name, p.ty.clone());
            if p.ty.is_acc() {
                bundled.push((self.new_tan(p), *init));
            } else {
                let init_tan = self.tangent_se(init)?;
                let p_tan = self.new_tan(p);
                bundled.push((p.clone(), *init));
                bundled.push((p_tan, init_tan));
            }
        }
        Ok(bundled)
    }

    fn bundle_loop_arrays(&mut self, arrays: &[(Param, Name)]) -> Result<Vec<(Param, Name)>, Error> {
        let mut bundled = vec![];
        for (p, arr) in arrays {
            self.b.declare(p.name, p.ty.clone());
            let arr_tan = self.tangent(*arr)?;
            let p_tan = self.new_tan(p);
            bundled.push((p.clone(), *arr));
            bundled.push((p_tan, arr_tan));
        }
        Ok(bundled)
    }

    fn basic_fwd(&mut self, stm: &Stm, op: &BasicOp) -> Result<(), Error> {
        if let BasicOp::CmpOp { .. } | BasicOp::Assert { .. } | BasicOp::Scratch { .. } = op {
            return Ok(());
        }
        let rules = self.rules;
        let aux = stm.aux.clone();
        let pe = single(stm, MODE)?;
        let exp = match op {
            BasicOp::SubExp(se) => BasicOp::SubExp(self.tangent_se(se)?),
            BasicOp::ArrayLit { elems, ty } => BasicOp::ArrayLit {
                elems: self.tangents(elems)?,
                ty: ty.clone(),
            },
            &BasicOp::UnOp { op, x } => {
                let t = op.ty();
                let dx = PrimExp::from_subexp(t, &self.tangent_se(&x)?);
                let d = rules.unop(op, &PrimExp::from_subexp(t, &x));
                let tan = self.new_tan(pe);
                self.b.bind_prim_exp(tan, aux, &dx.mul(d));
                return Ok(());
            }
            &BasicOp::BinOp { op, x, y } => {
                let t = op.ty();
                let dx = PrimExp::from_subexp(t, &self.tangent_se(&x)?);
                let dy = PrimExp::from_subexp(t, &self.tangent_se(&y)?);
                let (wrt_x, wrt_y) = rules.binop(
                    op,
                    &PrimExp::from_subexp(t, &x),
                    &PrimExp::from_subexp(t, &y),
                );
                let tan = self.new_tan(pe);
                self.b
                    .bind_prim_exp(tan, aux, &dx.mul(wrt_x).add(dy.mul(wrt_y)));
                return Ok(());
            }
            &BasicOp::ConvOp { op, x } => BasicOp::ConvOp {
                op,
                x: self.tangent_se(&x)?,
            },
            BasicOp::Index { array, slice } => BasicOp::Index {
                array: self.tangent(*array)?,
                slice: slice.clone(),
            },
            BasicOp::Update {
                array,
                slice,
                value,
            } => BasicOp::Update {
                array: self.tangent(*array)?,
                slice: slice.clone(),
                value: self.tangent_se(value)?,
            },
            BasicOp::Concat {
                dim,
                first,
                rest,
                width,
            } => BasicOp::Concat {
                dim: *dim,
                first: self.tangent(*first)?,
                rest: rest
                    .iter()
                    .map(|&x| self.tangent(x))
                    .collect::<Result<_, _>>()?,
                width: *width,
            },
            BasicOp::Copy { array } => BasicOp::Copy {
                array: self.tangent(*array)?,
            },
            BasicOp::Manifest { perm, array } => BasicOp::Manifest {
                perm: perm.clone(),
                array: self.tangent(*array)?,
            },
            BasicOp::Reshape { shape, array } => BasicOp::Reshape {
                shape: shape.clone(),
                array: self.tangent(*array)?,
            },
            BasicOp::Rearrange { perm, array } => BasicOp::Rearrange {
                perm: perm.clone(),
                array: self.tangent(*array)?,
            },
            BasicOp::Rotate { offsets, array } => BasicOp::Rotate {
                offsets: offsets.clone(),
                array: self.tangent(*array)?,
            },
            &BasicOp::Iota { n, ty, .. } => BasicOp::Replicate {
                shape: vec![n],
                value: SubExp::Const(PrimValue::Int(ty, 0)),
            },
            BasicOp::Replicate { shape, value } => BasicOp::Replicate {
                shape: shape.clone(),
                value: self.tangent_se(value)?,
            },
            BasicOp::CmpOp { .. }
            | BasicOp::Assert { .. }
            | BasicOp::Scratch { .. }
            | BasicOp::UpdateAcc { .. } => return Err(unsupported(stm)),
        };
        let tan = self.new_tan(pe);
        self.b.add(Stm {
            pat: vec![tan],
            aux,
            exp: Exp::Basic(exp),
        });
        Ok(())
    }

    fn fwd_apply(&mut self, stm: &Stm, func: &str, args: &[SubExp]) -> Result<(), Error> {
        let rules = self.rules;
        let missing = || Error::MissingRule {
            func: func.to_owned(),
        };
        let (arg_types, ret) = rules.signature(func).ok_or_else(missing)?;
        let pe = single(stm, MODE)?;
        self.b.add(stm.clone());
        let arg_pes: Vec<_> = arg_types
            .iter()
            .zip(args)
            .map(|(&t, arg)| PrimExp::from_subexp(t, arg))
            .collect();
        let derivs = rules.builtin(func, &arg_pes).ok_or_else(missing)?;
        let mut sum: Option<PrimExp> = None;
        for ((&t, arg), d) in arg_types.iter().zip(args).zip(derivs) {
            let term = PrimExp::from_subexp(t, &self.tangent_se(arg)?).mul(d);
            sum = Some(match sum {
                None => term,
                Some(s) => s.add(term),
            });
        }
        let tan = self.new_tan(pe);
        let e = sum.unwrap_or_else(|| PrimExp::zero(ret));
        self.b.bind_prim_exp(tan, stm.aux.clone(), &e);
        Ok(())
    }

    fn fwd_stm(&mut self, stm: &Stm) -> Result<(), Error> {
        log::trace!("forward: {stm}");
        let aux = stm.aux.clone();
        match &stm.exp {
            Exp::Basic(BasicOp::UpdateAcc { acc, index, values }) => {
                let pat = self.bundle_new(&stm.pat);
                let mut bundled = values.clone();
                bundled.extend(self.tangents(values)?);
                let acc = self.tangent(*acc)?;
                self.b.add(Stm {
                    pat,
                    aux,
                    exp: Exp::Basic(BasicOp::UpdateAcc {
                        acc,
                        index: index.clone(),
                        values: bundled,
                    }),
                });
            }
            Exp::Basic(op) => {
                self.b.add(stm.clone());
                self.basic_fwd(stm, op)?;
            }
            Exp::Apply { func, args, .. } => self.fwd_apply(stm, func, args)?,
            Exp::If {
                cond,
                then,
                els,
                dec,
            } => {
                let then = self.scoped(|ad| ad.fwd_body(then))?;
                let els = self.scoped(|ad| ad.fwd_body(els))?;
                let pat = self.bundle_new(&stm.pat);
                self.b.add(Stm {
                    pat,
                    aux,
                    exp: Exp::If {
                        cond: *cond,
                        then,
                        els,
                        dec: IfDec {
                            ret: bundle_types(&dec.ret),
                            sort: dec.sort,
                        },
                    },
                });
            }
            Exp::Loop {
                merge,
                form: LoopForm::While { cond },
                body,
            } => {
                let merge = self.bundle_merge(merge)?;
                let pat = self.bundle_new(&stm.pat);
                let body = self.scoped(|ad| ad.fwd_body(body))?;
                self.b.add(Stm {
                    pat,
                    aux,
                    exp: Exp::Loop {
                        merge,
                        form: LoopForm::While { cond: *cond },
                        body,
                    },
                });
            }
            Exp::Loop {
                merge,
                form:
                    LoopForm::For {
                        index,
                        ty,
                        bound,
                        arrays,
                    },
                body,
            } => {
                let merge = self.bundle_merge(merge)?;
                let arrays = self.bundle_loop_arrays(arrays)?;
                self.b.declare(*index, Type::Prim(PrimType::Int(*ty)));
                let pat = self.bundle_new(&stm.pat);
                let body = self.scoped(|ad| ad.fwd_body(body))?;
                self.b.add(Stm {
                    pat,
                    aux,
                    exp: Exp::Loop {
                        merge,
                        form: LoopForm::For {
                            index: *index,
                            ty: *ty,
                            bound: *bound,
                            arrays,
                        },
                        body,
                    },
                });
            }
            Exp::WithAcc { inputs, lam } => self.fwd_with_acc(stm, inputs, lam)?,
            Exp::Op(soac) => self.fwd_soac(stm, soac)?,
        }
        Ok(())
    }

    fn fwd_stms(&mut self, stms: &[Stm]) -> Result<(), Error> {
        for stm in stms {
            self.fwd_stm(stm)?;
        }
        Ok(())
    }

    /// The body with every result followed by its tangent.
    fn fwd_body(&mut self, body: &Body) -> Result<Body, Error> {
        let (result, stms) = self.collect(|ad| {
            ad.fwd_stms(&body.stms)?;
            ad.bundle_tan(&body.result)
        })?;
        Ok(Body { stms, result })
    }

    fn fwd_lambda(&mut self, lam: &Lambda) -> Result<Lambda, Error> {
        self.scoped(|ad| {
            ad.b.declare_params(&lam.params);
            let params = ad.bundle_new(&lam.params);
            let body = ad.fwd_body(&lam.body)?;
            Ok(Lambda {
                params,
                body,
                ret: bundle_types(&lam.ret),
            })
        })
    }

    /// Like [`Ad::fwd_lambda`], but the leading chunk-size parameter has no tangent.
    fn fwd_stream_lambda(&mut self, stm: &Stm, lam: &Lambda) -> Result<Lambda, Error> {
        let (chunk, rest) = lam.params.split_first().ok_or_else(|| unsupported(stm))?;
        self.scoped(|ad| {
            ad.b.declare_params(&lam.params);
            let mut params = vec![chunk.clone()];
            params.extend(ad.bundle_new(rest));
            let body = ad.fwd_body(&lam.body)?;
            Ok(Lambda {
                params,
                body,
                ret: bundle_types(&lam.ret),
            })
        })
    }

    /// A lambda whose first `n` results are indices, which get no tangents.
    fn fwd_hist_bucket(&mut self, lam: &Lambda, n: usize) -> Result<Lambda, Error> {
        self.scoped(|ad| {
            ad.b.declare_params(&lam.params);
            let params = ad.bundle_new(&lam.params);
            let (result, stms) = ad.collect(|ad| {
                ad.fwd_stms(&lam.body.stms)?;
                let (is, vs) = lam.body.result.split_at(n.min(lam.body.result.len()));
                let mut result = is.to_vec();
                result.extend(ad.bundle_tan(vs)?);
                Ok(result)
            })?;
            let (is, vs) = lam.ret.split_at(n.min(lam.ret.len()));
            let mut ret = is.to_vec();
            ret.extend(bundle_types(vs));
            Ok(Lambda {
                params,
                body: Body { stms, result },
                ret,
            })
        })
    }

    /// A scatter lambda: the `n` index results are repeated verbatim, once for the primal
    /// destinations and once for the tangent destinations, followed by the values and then
    /// their tangents.
    fn fwd_scatter_lambda(&mut self, lam: &Lambda, n: usize) -> Result<Lambda, Error> {
        self.scoped(|ad| {
            ad.b.declare_params(&lam.params);
            let params = ad.bundle_new(&lam.params);
            let (result, stms) = ad.collect(|ad| {
                ad.fwd_stms(&lam.body.stms)?;
                let (is, vs) = lam.body.result.split_at(n.min(lam.body.result.len()));
                let mut result = [is, is, vs].concat();
                result.extend(ad.tangents(vs)?);
                Ok(result)
            })?;
            let (is, vs) = lam.ret.split_at(n.min(lam.ret.len()));
            let ret = [is, is, vs, vs].concat();
            Ok(Lambda {
                params,
                body: Body { stms, result },
                ret,
            })
        })
    }

    /// The combining operator of an accumulator: `rank` index parameters, then two groups of
    /// values. Each group is followed by its tangents, matching the layout of the accumulator's
    /// elements, and the index parameters stay as they are.
    fn fwd_acc_op(&mut self, stm: &Stm, lam: &Lambda, rank: usize) -> Result<Lambda, Error> {
        if lam.params.len() < rank || (lam.params.len() - rank) % 2 != 0 {
            return Err(unsupported(stm));
        }
        self.scoped(|ad| {
            ad.b.declare_params(&lam.params);
            let (is, vs) = lam.params.split_at(rank);
            let (xs, ys) = vs.split_at(vs.len() / 2);
            let mut params = is.to_vec();
            for group in [xs, ys] {
                params.extend(group.iter().cloned());
                for p in group {
                    params.push(ad.new_tan(p));
                }
            }
            let (result, stms) = ad.collect(|ad| {
                ad.fwd_stms(&lam.body.stms)?;
                let mut result = lam.body.result.clone();
                result.extend(ad.tangents(&lam.body.result)?);
                Ok(result)
            })?;
            let ret = lam.ret.iter().chain(&lam.ret).map(tan_type).collect();
            Ok(Lambda {
                params,
                body: Body { stms, result },
                ret,
            })
        })
    }

    fn fwd_with_acc(
        &mut self,
        stm: &Stm,
        inputs: &[WithAccInput],
        lam: &Lambda,
    ) -> Result<(), Error> {
        let n_arrays: usize = inputs.iter().map(|input| input.arrays.len()).sum();
        if stm.pat.len() < n_arrays {
            return Err(Error::Pattern {
                mode: MODE,
                expected: n_arrays,
                found: stm.pat.len(),
                stm: stm.to_string(),
            });
        }
        let mut bundled = vec![];
        for input in inputs {
            let mut arrays = input.arrays.clone();
            for &arr in &input.arrays {
                arrays.push(self.tangent(arr)?);
            }
            let op = match &input.op {
                None => None,
                Some((op, nes)) => {
                    let op = self.fwd_acc_op(stm, op, input.shape.len())?;
                    let mut nes_bundled = nes.clone();
                    for ne in nes {
                        nes_bundled.push(self.zero_from_subexp(ne)?);
                    }
                    Some((op, nes_bundled))
                }
            };
            bundled.push(WithAccInput {
                shape: input.shape.clone(),
                arrays,
                op,
            });
        }
        let mut pat = vec![];
        let mut pes = stm.pat.iter();
        for input in inputs {
            let group: Vec<PatElem> = pes.by_ref().take(input.arrays.len()).cloned().collect();
            let tans: Vec<PatElem> = group.iter().map(|pe| self.new_tan(pe)).collect();
            pat.extend(group);
            pat.extend(tans);
        }
        let rest: Vec<PatElem> = pes.cloned().collect();
        pat.extend(self.bundle_new(&rest));
        let lam = self.fwd_lambda(lam)?;
        self.b.add(Stm {
            pat,
            aux: stm.aux.clone(),
            exp: Exp::WithAcc {
                inputs: bundled,
                lam,
            },
        });
        Ok(())
    }

    fn fwd_soac(&mut self, stm: &Stm, soac: &Soac) -> Result<(), Error> {
        let aux = stm.aux.clone();
        match soac {
            Soac::Screma {
                width,
                arrays,
                form,
            } => {
                let pat = self.bundle_new(&stm.pat);
                let arrays = self.bundle_tan_names(arrays)?;
                let mut scans = vec![];
                for scan in &form.scans {
                    scans.push(Scan {
                        lam: self.fwd_lambda(&scan.lam)?,
                        nes: self.bundle_zeros(&scan.nes)?,
                    });
                }
                let mut reduces = vec![];
                for red in &form.reduces {
                    reduces.push(Reduce {
                        comm: red.comm,
                        lam: self.fwd_lambda(&red.lam)?,
                        nes: self.bundle_zeros(&red.nes)?,
                    });
                }
                let map = self.fwd_lambda(&form.map)?;
                self.b.add(Stm {
                    pat,
                    aux,
                    exp: Exp::Op(Soac::Screma {
                        width: *width,
                        arrays,
                        form: ScremaForm {
                            scans,
                            reduces,
                            map,
                        },
                    }),
                });
            }
            Soac::Stream {
                width,
                arrays,
                form,
                nes,
                lam,
            } => {
                let pat = self.bundle_new(&stm.pat);
                let lam = self.fwd_stream_lambda(stm, lam)?;
                let arrays = self.bundle_tan_names(arrays)?;
                let nes = self.bundle_zeros(nes)?;
                let form = match form {
                    StreamForm::Sequential => StreamForm::Sequential,
                    StreamForm::Parallel { order, comm, op } => StreamForm::Parallel {
                        order: *order,
                        comm: *comm,
                        op: self.fwd_lambda(op)?,
                    },
                };
                self.b.add(Stm {
                    pat,
                    aux,
                    exp: Exp::Op(Soac::Stream {
                        width: *width,
                        arrays,
                        form,
                        nes,
                        lam,
                    }),
                });
            }
            Soac::Hist {
                width,
                ops,
                bucket,
                arrays,
            } => {
                let n_indices = ops.iter().map(|op| op.shape.len()).sum();
                let pat = self.bundle_new(&stm.pat);
                let mut bundled = vec![];
                for op in ops {
                    bundled.push(HistOp {
                        shape: op.shape.clone(),
                        race: op.race,
                        dests: self.bundle_tan_names(&op.dests)?,
                        nes: self.bundle_zeros(&op.nes)?,
                        op: self.fwd_lambda(&op.op)?,
                    });
                }
                let bucket = self.fwd_hist_bucket(bucket, n_indices)?;
                let arrays = self.bundle_tan_names(arrays)?;
                self.b.add(Stm {
                    pat,
                    aux,
                    exp: Exp::Op(Soac::Hist {
                        width: *width,
                        ops: bundled,
                        bucket,
                        arrays,
                    }),
                });
            }
            Soac::Scatter {
                width,
                lam,
                arrays,
                dests,
            } => {
                let mut dests_tan = vec![];
                for dest in dests {
                    dests_tan.push(ScatterDest {
                        shape: dest.shape.clone(),
                        num: dest.num,
                        array: self.tangent(dest.array)?,
                    });
                }
                let pes_tan: Vec<PatElem> = stm.pat.iter().map(|pe| self.new_tan(pe)).collect();
                let arrays = self.bundle_tan_names(arrays)?;
                let n_indices = dests.iter().map(|d| d.num * d.shape.len()).sum();
                let lam = self.fwd_scatter_lambda(lam, n_indices)?;
                let mut pat = stm.pat.clone();
                pat.extend(pes_tan);
                let mut dests = dests.clone();
                dests.extend(dests_tan);
                self.b.add(Stm {
                    pat,
                    aux,
                    exp: Exp::Op(Soac::Scatter {
                        width: *width,
                        lam,
                        arrays,
                        dests,
                    }),
                });
            }
        }
        Ok(())
    }

    /// Set up the bundled parameters of a top-level lambda and transform its statements.
    fn fwd_top(&mut self, lam: &Lambda) -> Result<Vec<Param>, Error> {
        self.b.declare_params(&lam.params);
        Ok(self.bundle_new(&lam.params))
    }
}

/// The Jacobian-vector product of `lam`.
///
/// Every parameter is followed by a tangent parameter (accumulators carry their tangents inside
/// and are not doubled), and the result is the tangent of every original result.
pub fn forward(names: &mut NameSource, rules: &dyn Rules, lam: &Lambda) -> Result<Lambda, Error> {
    let (n, m) = arity(lam);
    log::debug!("forward differentiating lambda with {n} parameters and {m} results");
    names.reserve(lam);
    let mut ad = Ad::new(names, rules);
    let params = ad.fwd_top(lam)?;
    let (result, stms) = ad.collect(|ad| {
        ad.fwd_stms(&lam.body.stms)?;
        ad.tangents(&lam.body.result)
    })?;
    let ret = lam.ret.iter().map(tan_type).collect();
    Ok(Lambda {
        params,
        body: Body { stms, result },
        ret,
    })
}

/// Like [`forward`], but every primal result is kept and followed by its tangent.
pub fn forward_bundled(
    names: &mut NameSource,
    rules: &dyn Rules,
    lam: &Lambda,
) -> Result<Lambda, Error> {
    let (n, m) = arity(lam);
    log::debug!("forward differentiating lambda with {n} parameters and {m} bundled results");
    names.reserve(lam);
    let mut ad = Ad::new(names, rules);
    let params = ad.fwd_top(lam)?;
    let body = ad.fwd_body(&lam.body)?;
    Ok(Lambda {
        params,
        body,
        ret: bundle_types(&lam.ret),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Builtins;
    use tangle::{build::Builder, id, Aux, BinOp, FloatType, IfSort, IntType};

    fn f64_var(b: &mut Builder, op: BasicOp) -> Name {
        b.let_basic(Type::f64(), op)
    }

    #[test]
    fn test_tan_type_doubles_accumulator_elements() {
        let t = Type::Acc {
            token: id::name(0),
            shape: vec![SubExp::i64(4)],
            elems: vec![Type::f64()],
            unique: false,
        };
        match tan_type(&t) {
            Type::Acc { elems, .. } => assert_eq!(elems.len(), 2),
            t => panic!("unexpected {t}"),
        }
        assert_eq!(bundle_types(&[t, Type::f64()]).len(), 3);
    }

    #[test]
    fn test_comparison_has_no_tangent_statement() {
        let mut names = NameSource::new();
        let mut b = Builder::new(&mut names);
        let x = b.param(Type::f64());
        let y = b.param(Type::f64());
        let c = b.let_basic(
            Type::bool(),
            BasicOp::CmpOp {
                op: tangle::CmpOp::FLt(FloatType::F64),
                x: SubExp::Var(x.name),
                y: SubExp::Var(y.name),
            },
        );
        let lam = b.lambda(vec![x, y], vec![SubExp::Var(c)]).unwrap();
        let jvp = forward(&mut names, &Builtins, &lam).unwrap();
        // the comparison itself, then the lazily materialized zero tangent of its result
        assert_eq!(jvp.body.stms.len(), 2);
        assert_eq!(jvp.body.stms[0], lam.body.stms[0]);
        assert_eq!(
            jvp.body.stms[1].exp,
            Exp::Basic(BasicOp::SubExp(SubExp::Const(PrimValue::Bool(false))))
        );
    }

    #[test]
    fn test_iota_tangent_is_zero_replicate() {
        let mut names = NameSource::new();
        let mut b = Builder::new(&mut names);
        let n = SubExp::i64(5);
        let xs = b.let_basic(
            Type::array(PrimType::Int(IntType::I64), vec![n]),
            BasicOp::Iota {
                n,
                start: SubExp::i64(0),
                step: SubExp::i64(1),
                ty: IntType::I64,
            },
        );
        let lam = b.lambda(vec![], vec![SubExp::Var(xs)]).unwrap();
        let jvp = forward(&mut names, &Builtins, &lam).unwrap();
        assert_eq!(
            jvp.body.stms[1].exp,
            Exp::Basic(BasicOp::Replicate {
                shape: vec![n],
                value: SubExp::Const(PrimValue::Int(IntType::I64, 0)),
            })
        );
    }

    #[test]
    fn test_if_bundles_pattern_and_types() {
        let mut names = NameSource::new();
        let mut b = Builder::new(&mut names);
        let c = b.param(Type::bool());
        let x = b.param(Type::f64());
        let (sq, then_stms) = b.collect(|b| {
            f64_var(
                b,
                BasicOp::BinOp {
                    op: BinOp::FMul(FloatType::F64),
                    x: SubExp::Var(x.name),
                    y: SubExp::Var(x.name),
                },
            )
        });
        let r = b.let_exp(
            Type::f64(),
            Exp::If {
                cond: SubExp::Var(c.name),
                then: Body {
                    stms: then_stms,
                    result: vec![SubExp::Var(sq)],
                },
                els: Body {
                    stms: vec![],
                    result: vec![SubExp::Var(x.name)],
                },
                dec: IfDec {
                    ret: vec![Type::f64()],
                    sort: IfSort::Normal,
                },
            },
        );
        let lam = b.lambda(vec![c, x], vec![SubExp::Var(r)]).unwrap();
        let jvp = forward(&mut names, &Builtins, &lam).unwrap();
        let stm = jvp
            .body
            .stms
            .iter()
            .find(|stm| matches!(stm.exp, Exp::If { .. }))
            .unwrap();
        assert_eq!(stm.pat.len(), 2);
        match &stm.exp {
            Exp::If {
                then, els, dec, ..
            } => {
                assert_eq!(dec.ret.len(), 2);
                assert_eq!(then.result.len(), 2);
                assert_eq!(els.result.len(), 2);
                assert_eq!(els.result[1], SubExp::Var(jvp.params[3].name));
            }
            e => panic!("unexpected {e}"),
        }
    }

    #[test]
    fn test_unknown_builtin_is_missing_rule() {
        let mut names = NameSource::new();
        let mut b = Builder::new(&mut names);
        let x = b.param(Type::f64());
        let y = b.let_exp(
            Type::f64(),
            Exp::Apply {
                func: "erf64".to_owned(),
                args: vec![SubExp::Var(x.name)],
                ret: vec![Type::f64()],
            },
        );
        let lam = b.lambda(vec![x], vec![SubExp::Var(y)]).unwrap();
        let err = forward(&mut names, &Builtins, &lam).unwrap_err();
        assert!(matches!(err, Error::MissingRule { func } if func == "erf64"));
    }

    #[test]
    fn test_multi_pattern_basic_op_is_rejected() {
        let (x, y, z) = (id::name(0), id::name(1), id::name(2));
        let lam = Lambda {
            params: vec![PatElem {
                name: x,
                ty: Type::f64(),
            }],
            body: Body {
                stms: vec![Stm {
                    pat: vec![
                        PatElem {
                            name: y,
                            ty: Type::f64(),
                        },
                        PatElem {
                            name: z,
                            ty: Type::f64(),
                        },
                    ],
                    aux: Aux::default(),
                    exp: Exp::Basic(BasicOp::SubExp(SubExp::Var(x))),
                }],
                result: vec![SubExp::Var(y)],
            },
            ret: vec![Type::f64()],
        };
        let mut names = NameSource::new();
        let err = forward(&mut names, &Builtins, &lam).unwrap_err();
        assert!(matches!(err, Error::Pattern { found: 2, .. }));
    }
}
