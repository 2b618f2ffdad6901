use indexmap::IndexMap;
use tangle::{
    id::Name, BasicOp, Body, DimIndex, Exp, Lambda, LoopForm, PatElem, Soac, Stm, StreamForm,
    SubExp,
};

#[derive(Debug, thiserror::Error)]
pub enum StmError {
    #[error("{0} is not in scope")]
    NotInScope(Name),

    #[error("{0} was already bound")]
    Redeclare(Name),

    #[error("pattern binds {found} names, but the expression produces {expected} values")]
    Pattern { expected: usize, found: usize },

    #[error("branch returns {found} values, but {expected} are declared")]
    Branch { expected: usize, found: usize },

    #[error("loop body returns {found} values for {expected} loop parameters")]
    Loop { expected: usize, found: usize },

    #[error("nested body is invalid")]
    Nested(#[source] Box<Error>),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parameter {0} was already bound")]
    InvalidParam(Name),

    #[error("statement {0} is invalid")]
    InvalidBody(usize, #[source] StmError),

    #[error("result {0} is not in scope")]
    InvalidResult(Name),

    #[error("lambda returns {found} values, but {expected} are declared")]
    InvalidRet { expected: usize, found: usize },
}

fn check(p: bool, e: StmError) -> Result<(), StmError> {
    if p {
        Ok(())
    } else {
        Err(e)
    }
}

#[derive(Clone, Copy)]
enum Scope {
    Defined,
    /// Bound in a scope that has since ended; may be bound again, but not read.
    Expired,
}

#[derive(Default)]
struct Validator {
    vars: IndexMap<Name, Scope>,
    /// Every name bound in an open scope, innermost last.
    bound: Vec<Name>,
}

impl Validator {
    fn bind(&mut self, x: Name) -> Result<(), StmError> {
        match self.vars.get(&x) {
            Some(Scope::Defined) => Err(StmError::Redeclare(x)),
            Some(Scope::Expired) | None => {
                self.vars.insert(x, Scope::Defined);
                self.bound.push(x);
                Ok(())
            }
        }
    }

    fn bind_all(&mut self, pes: &[PatElem]) -> Result<(), StmError> {
        pes.iter().try_for_each(|pe| self.bind(pe.name))
    }

    fn get(&self, x: Name) -> Result<(), StmError> {
        match self.vars.get(&x) {
            Some(Scope::Defined) => Ok(()),
            _ => Err(StmError::NotInScope(x)),
        }
    }

    fn gets(&self, xs: &[Name]) -> Result<(), StmError> {
        xs.iter().try_for_each(|&x| self.get(x))
    }

    fn subexp(&self, se: &SubExp) -> Result<(), StmError> {
        match *se {
            SubExp::Const(_) => Ok(()),
            SubExp::Var(x) => self.get(x),
        }
    }

    fn subexps(&self, ses: &[SubExp]) -> Result<(), StmError> {
        ses.iter().try_for_each(|se| self.subexp(se))
    }

    /// Run `f`, then expire every name it bound.
    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let mark = self.bound.len();
        let res = f(self);
        for x in self.bound.drain(mark..) {
            self.vars.insert(x, Scope::Expired);
        }
        res
    }

    fn slice(&self, dims: &[DimIndex]) -> Result<(), StmError> {
        dims.iter().try_for_each(|dim| match dim {
            DimIndex::Fix(i) => self.subexp(i),
            DimIndex::Slice { start, len, stride } => {
                self.subexp(start)?;
                self.subexp(len)?;
                self.subexp(stride)
            }
        })
    }

    fn basic(&self, op: &BasicOp) -> Result<(), StmError> {
        match op {
            BasicOp::SubExp(se)
            | BasicOp::UnOp { x: se, .. }
            | BasicOp::ConvOp { x: se, .. }
            | BasicOp::Assert { cond: se, .. } => self.subexp(se),
            BasicOp::ArrayLit { elems, .. } => self.subexps(elems),
            BasicOp::BinOp { x, y, .. } | BasicOp::CmpOp { x, y, .. } => {
                self.subexp(x)?;
                self.subexp(y)
            }
            BasicOp::Index { array, slice } => {
                self.get(*array)?;
                self.slice(slice)
            }
            BasicOp::Update {
                array,
                slice,
                value,
            } => {
                self.get(*array)?;
                self.slice(slice)?;
                self.subexp(value)
            }
            BasicOp::Concat {
                first, rest, width, ..
            } => {
                self.get(*first)?;
                self.gets(rest)?;
                self.subexp(width)
            }
            BasicOp::Copy { array }
            | BasicOp::Manifest { array, .. }
            | BasicOp::Rearrange { array, .. } => self.get(*array),
            BasicOp::Reshape { shape: ses, array } | BasicOp::Rotate { offsets: ses, array } => {
                self.subexps(ses)?;
                self.get(*array)
            }
            BasicOp::Iota { n, start, step, .. } => {
                self.subexp(n)?;
                self.subexp(start)?;
                self.subexp(step)
            }
            BasicOp::Replicate { shape, value } => {
                self.subexps(shape)?;
                self.subexp(value)
            }
            BasicOp::Scratch { shape, .. } => self.subexps(shape),
            BasicOp::UpdateAcc { acc, index, values } => {
                self.get(*acc)?;
                self.subexps(index)?;
                self.subexps(values)
            }
        }
    }

    fn lambda(&mut self, lam: &Lambda) -> Result<(), StmError> {
        self.scoped(|v| v.closed(lam))
            .map_err(|e| StmError::Nested(Box::new(e)))
    }

    /// Check `lam` in the current scope.
    fn closed(&mut self, lam: &Lambda) -> Result<(), Error> {
        for p in &lam.params {
            self.bind(p.name).map_err(|_| Error::InvalidParam(p.name))?;
        }
        self.body(&lam.body)?;
        if lam.body.result.len() != lam.ret.len() {
            return Err(Error::InvalidRet {
                expected: lam.ret.len(),
                found: lam.body.result.len(),
            });
        }
        Ok(())
    }

    fn body(&mut self, body: &Body) -> Result<(), Error> {
        for (i, stm) in body.stms.iter().enumerate() {
            self.stm(stm).map_err(|e| Error::InvalidBody(i, e))?;
        }
        for se in &body.result {
            if let &SubExp::Var(x) = se {
                self.get(x).map_err(|_| Error::InvalidResult(x))?;
            }
        }
        Ok(())
    }

    /// A nested body, reported as part of its enclosing statement.
    fn branch(&mut self, body: &Body, expected: usize) -> Result<(), StmError> {
        self.scoped(|v| v.body(body))
            .map_err(|e| StmError::Nested(Box::new(e)))?;
        check(
            body.result.len() == expected,
            StmError::Branch {
                expected,
                found: body.result.len(),
            },
        )
    }

    fn soac(&mut self, op: &Soac) -> Result<(), StmError> {
        match op {
            Soac::Screma {
                width,
                arrays,
                form,
            } => {
                self.subexp(width)?;
                self.gets(arrays)?;
                for scan in &form.scans {
                    self.subexps(&scan.nes)?;
                    self.lambda(&scan.lam)?;
                }
                for red in &form.reduces {
                    self.subexps(&red.nes)?;
                    self.lambda(&red.lam)?;
                }
                self.lambda(&form.map)
            }
            Soac::Stream {
                width,
                arrays,
                form,
                nes,
                lam,
            } => {
                self.subexp(width)?;
                self.gets(arrays)?;
                self.subexps(nes)?;
                if let StreamForm::Parallel { op, .. } = form {
                    self.lambda(op)?;
                }
                self.lambda(lam)
            }
            Soac::Hist {
                width,
                ops,
                bucket,
                arrays,
            } => {
                self.subexp(width)?;
                for op in ops {
                    self.subexps(&op.shape)?;
                    self.subexp(&op.race)?;
                    self.gets(&op.dests)?;
                    self.subexps(&op.nes)?;
                    self.lambda(&op.op)?;
                }
                self.lambda(bucket)?;
                self.gets(arrays)
            }
            Soac::Scatter {
                width,
                lam,
                arrays,
                dests,
            } => {
                self.subexp(width)?;
                self.lambda(lam)?;
                self.gets(arrays)?;
                for dest in dests {
                    self.subexps(&dest.shape)?;
                    self.get(dest.array)?;
                }
                Ok(())
            }
        }
    }

    fn stm(&mut self, stm: &Stm) -> Result<(), StmError> {
        self.gets(&stm.aux.certs)?;
        let pattern = |expected: usize| {
            check(
                stm.pat.len() == expected,
                StmError::Pattern {
                    expected,
                    found: stm.pat.len(),
                },
            )
        };
        match &stm.exp {
            Exp::Basic(op) => {
                self.basic(op)?;
                pattern(1)?;
            }
            Exp::Apply { args, ret, .. } => {
                self.subexps(args)?;
                pattern(ret.len())?;
            }
            Exp::If {
                cond,
                then,
                els,
                dec,
            } => {
                self.subexp(cond)?;
                self.branch(then, dec.ret.len())?;
                self.branch(els, dec.ret.len())?;
                pattern(dec.ret.len())?;
            }
            Exp::Loop { merge, form, body } => {
                for (_, init) in merge {
                    self.subexp(init)?;
                }
                if let LoopForm::For { bound, arrays, .. } = form {
                    self.subexp(bound)?;
                    for (_, arr) in arrays {
                        self.get(*arr)?;
                    }
                }
                self.scoped(|v| {
                    for (p, _) in merge {
                        v.bind(p.name)?;
                    }
                    match form {
                        LoopForm::While { cond } => v.get(*cond)?,
                        LoopForm::For { index, arrays, .. } => {
                            v.bind(*index)?;
                            for (p, _) in arrays {
                                v.bind(p.name)?;
                            }
                        }
                    }
                    v.body(body).map_err(|e| StmError::Nested(Box::new(e)))
                })?;
                check(
                    body.result.len() == merge.len(),
                    StmError::Loop {
                        expected: merge.len(),
                        found: body.result.len(),
                    },
                )?;
                pattern(merge.len())?;
            }
            Exp::WithAcc { inputs, lam } => {
                for input in inputs {
                    self.subexps(&input.shape)?;
                    self.gets(&input.arrays)?;
                    if let Some((op, nes)) = &input.op {
                        self.subexps(nes)?;
                        self.lambda(op)?;
                    }
                }
                self.lambda(lam)?;
            }
            Exp::Op(op) => self.soac(op)?,
        }
        self.bind_all(&stm.pat)
    }
}

/// Check that every name in `lam` is bound exactly once along any scope chain, that no name is
/// read outside the scope that binds it, and that result counts match their declarations.
///
/// Sibling scopes (the two branches of a conditional, or two lambdas) may bind the same name.
pub fn validate(lam: &Lambda) -> Result<(), Error> {
    Validator::default().closed(lam)
}
