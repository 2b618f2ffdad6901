use crate::{
    id::Name, BasicOp, Body, DimIndex, Exp, Lambda, LoopForm, PatElem, PrimType, PrimValue, Soac,
    Stm, StreamForm, SubExp, Type,
};
use std::fmt;

fn write_elems<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    let mut first = true;
    for item in items {
        if first {
            first = false;
        } else {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_shape(f: &mut fmt::Formatter<'_>, shape: &[SubExp]) -> fmt::Result {
    for dim in shape {
        write!(f, "[{dim}]")?;
    }
    Ok(())
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.name())
    }
}

impl fmt::Display for PrimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimType::Int(t) => write!(f, "i{}", t.bits()),
            PrimType::Float(t) => write!(f, "{}", format!("{t:?}").to_lowercase()),
            PrimType::Bool => write!(f, "bool"),
            PrimType::Cert => write!(f, "cert"),
        }
    }
}

impl fmt::Display for PrimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimValue::Int(t, v) => write!(f, "{v}i{}", t.bits()),
            PrimValue::Float(t, v) => write!(f, "{v:?}{}", format!("{t:?}").to_lowercase()),
            PrimValue::Bool(v) => write!(f, "{v}"),
            PrimValue::Cert => write!(f, "cert"),
        }
    }
}

impl fmt::Display for SubExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubExp::Const(v) => write!(f, "{v}"),
            SubExp::Var(x) => write!(f, "{x}"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Prim(t) => write!(f, "{t}"),
            Type::Array {
                elem,
                shape,
                unique,
            } => {
                if *unique {
                    write!(f, "*")?;
                }
                write_shape(f, shape)?;
                write!(f, "{elem}")
            }
            Type::Acc {
                token,
                shape,
                elems,
                unique,
            } => {
                if *unique {
                    write!(f, "*")?;
                }
                write!(f, "acc({token}, ")?;
                write_shape(f, shape)?;
                write!(f, ", (")?;
                write_elems(f, elems)?;
                write!(f, "))")
            }
        }
    }
}

impl fmt::Display for PatElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)
    }
}

impl fmt::Display for DimIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimIndex::Fix(i) => write!(f, "{i}"),
            DimIndex::Slice { start, len, stride } => write!(f, "{start}:+{len}*{stride}"),
        }
    }
}

impl fmt::Display for BasicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasicOp::SubExp(se) => write!(f, "{se}"),
            BasicOp::ArrayLit { elems, ty } => {
                write!(f, "[")?;
                write_elems(f, elems)?;
                write!(f, "]: []{ty}")
            }
            BasicOp::UnOp { op, x } => write!(f, "{op:?}({x})"),
            BasicOp::BinOp { op, x, y } => write!(f, "{op:?}({x}, {y})"),
            BasicOp::CmpOp { op, x, y } => write!(f, "{op:?}({x}, {y})"),
            BasicOp::ConvOp { op, x } => write!(f, "{op:?}({x})"),
            BasicOp::Index { array, slice } => {
                write!(f, "{array}[")?;
                write_elems(f, slice)?;
                write!(f, "]")
            }
            BasicOp::Update {
                array,
                slice,
                value,
            } => {
                write!(f, "{array} with [")?;
                write_elems(f, slice)?;
                write!(f, "] = {value}")
            }
            BasicOp::Concat {
                dim,
                first,
                rest,
                width,
            } => {
                write!(f, "concat@{dim}({first}")?;
                for x in rest {
                    write!(f, ", {x}")?;
                }
                write!(f, "): [{width}]")
            }
            BasicOp::Copy { array } => write!(f, "copy({array})"),
            BasicOp::Manifest { perm, array } => write!(f, "manifest({perm:?}, {array})"),
            BasicOp::Reshape { shape, array } => {
                write!(f, "reshape(")?;
                write_shape(f, shape)?;
                write!(f, ", {array})")
            }
            BasicOp::Rearrange { perm, array } => write!(f, "rearrange({perm:?}, {array})"),
            BasicOp::Rotate { offsets, array } => {
                write!(f, "rotate((")?;
                write_elems(f, offsets)?;
                write!(f, "), {array})")
            }
            BasicOp::Iota { n, start, step, ty } => {
                write!(f, "iota{}({n}, {start}, {step})", ty.bits())
            }
            BasicOp::Replicate { shape, value } => {
                write!(f, "replicate(")?;
                write_shape(f, shape)?;
                write!(f, ", {value})")
            }
            BasicOp::Scratch { elem, shape } => {
                write!(f, "scratch({elem}")?;
                for dim in shape {
                    write!(f, ", {dim}")?;
                }
                write!(f, ")")
            }
            BasicOp::Assert { cond, msg } => write!(f, "assert({cond}, {msg:?})"),
            BasicOp::UpdateAcc { acc, index, values } => {
                write!(f, "update_acc({acc}, (")?;
                write_elems(f, index)?;
                write!(f, "), (")?;
                write_elems(f, values)?;
                write!(f, "))")
            }
        }
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        for stm in &self.stms {
            writeln!(f, "  {stm}")?;
        }
        write!(f, "  in (")?;
        write_elems(f, &self.result)?;
        write!(f, ") }}")
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\\(")?;
        write_elems(f, &self.params)?;
        write!(f, "): (")?;
        write_elems(f, &self.ret)?;
        write!(f, ") -> {}", self.body)
    }
}

impl fmt::Display for Soac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Soac::Screma {
                width,
                arrays,
                form,
            } => {
                write!(f, "screma({width}, (")?;
                write_elems(f, arrays)?;
                write!(f, ")")?;
                for scan in &form.scans {
                    write!(f, ", scan({}, (", scan.lam)?;
                    write_elems(f, &scan.nes)?;
                    write!(f, "))")?;
                }
                for red in &form.reduces {
                    write!(f, ", reduce({}, (", red.lam)?;
                    write_elems(f, &red.nes)?;
                    write!(f, "))")?;
                }
                write!(f, ", {})", form.map)
            }
            Soac::Stream {
                width,
                arrays,
                form,
                nes,
                lam,
            } => {
                write!(f, "stream({width}, (")?;
                write_elems(f, arrays)?;
                write!(f, "), ")?;
                match form {
                    StreamForm::Sequential => write!(f, "sequential")?,
                    StreamForm::Parallel { order, comm, op } => {
                        write!(f, "parallel({order:?}, {comm}, {op})")?
                    }
                }
                write!(f, ", (")?;
                write_elems(f, nes)?;
                write!(f, "), {lam})")
            }
            Soac::Hist {
                width,
                ops,
                bucket,
                arrays,
            } => {
                write!(f, "hist({width}")?;
                for op in ops {
                    write!(f, ", op(")?;
                    write_shape(f, &op.shape)?;
                    write!(f, ", {}, (", op.race)?;
                    write_elems(f, &op.dests)?;
                    write!(f, "), (")?;
                    write_elems(f, &op.nes)?;
                    write!(f, "), {})", op.op)?;
                }
                write!(f, ", {bucket}, (")?;
                write_elems(f, arrays)?;
                write!(f, "))")
            }
            Soac::Scatter {
                width,
                lam,
                arrays,
                dests,
            } => {
                write!(f, "scatter({width}, {lam}, (")?;
                write_elems(f, arrays)?;
                write!(f, ")")?;
                for dest in dests {
                    write!(f, ", (")?;
                    write_shape(f, &dest.shape)?;
                    write!(f, ", {}, {})", dest.num, dest.array)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exp::Basic(op) => write!(f, "{op}"),
            Exp::Apply { func, args, .. } => {
                write!(f, "{func}(")?;
                write_elems(f, args)?;
                write!(f, ")")
            }
            Exp::If {
                cond, then, els, ..
            } => write!(f, "if {cond} then {then} else {els}"),
            Exp::Loop { merge, form, body } => {
                write!(f, "loop (")?;
                let mut first = true;
                for (p, init) in merge {
                    if first {
                        first = false;
                    } else {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p} = {init}")?;
                }
                write!(f, ") ")?;
                match form {
                    LoopForm::While { cond } => write!(f, "while {cond}")?,
                    LoopForm::For {
                        index,
                        bound,
                        arrays,
                        ..
                    } => {
                        write!(f, "for {index} < {bound}")?;
                        for (p, arr) in arrays {
                            write!(f, ", {p} in {arr}")?;
                        }
                    }
                }
                write!(f, " do {body}")
            }
            Exp::WithAcc { inputs, lam } => {
                write!(f, "with_acc(")?;
                for input in inputs {
                    write!(f, "(")?;
                    write_shape(f, &input.shape)?;
                    write!(f, ", (")?;
                    write_elems(f, &input.arrays)?;
                    write!(f, ")")?;
                    if let Some((op, nes)) = &input.op {
                        write!(f, ", {op}, (")?;
                        write_elems(f, nes)?;
                        write!(f, ")")?;
                    }
                    write!(f, "), ")?;
                }
                write!(f, "{lam})")
            }
            Exp::Op(op) => write!(f, "{op}"),
        }
    }
}

impl fmt::Display for Stm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "let (")?;
        write_elems(f, &self.pat)?;
        write!(f, ") = ")?;
        if !self.aux.certs.is_empty() {
            write!(f, "<")?;
            write_elems(f, &self.aux.certs)?;
            write!(f, "> ")?;
        }
        write!(f, "{}", self.exp)
    }
}
