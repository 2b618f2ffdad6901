use tangle::{
    build::Builder,
    id::{Name, NameSource},
    BasicOp, BinOp, Body, CmpOp, ConvOp, Exp, FloatType, IfDec, IfSort, IntType, Lambda, PatElem,
    PrimType, PrimValue, ScremaForm, Soac, Stm, SubExp, Type,
};
use tangle_autodiff::{forward, reverse, Builtins, Error, Mode};
use tangle_interp::{interp, Val};
use tangle_validate::validate;

const F64: FloatType = FloatType::F64;

fn var(x: Name) -> SubExp {
    SubExp::Var(x)
}

fn float(x: f64) -> SubExp {
    SubExp::Const(PrimValue::f64(x))
}

fn fbin(b: &mut Builder, op: fn(FloatType) -> BinOp, x: SubExp, y: SubExp) -> Name {
    b.let_basic(
        Type::f64(),
        BasicOp::BinOp {
            op: op(F64),
            x,
            y,
        },
    )
}

fn call(b: &mut Builder, func: &str, x: SubExp) -> Name {
    b.let_exp(
        Type::f64(),
        Exp::Apply {
            func: func.to_owned(),
            args: vec![x],
            ret: vec![Type::f64()],
        },
    )
}

fn scalars(lam: &Lambda, args: &[f64]) -> Vec<f64> {
    interp(lam, args.iter().map(|&x| Val::f64(x)).collect())
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect()
}

fn vjp(names: &mut NameSource, lam: &Lambda) -> Lambda {
    let out = reverse(names, &Builtins, lam).unwrap();
    validate(&out).unwrap();
    out
}

fn pe(name: Name, ty: Type) -> PatElem {
    PatElem { name, ty }
}

fn stm(name: Name, ty: Type, exp: Exp) -> Stm {
    Stm {
        pat: vec![pe(name, ty)],
        aux: Default::default(),
        exp,
    }
}

#[test]
fn test_square() {
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let x = b.param(Type::f64());
    let sq = fbin(&mut b, BinOp::FMul, var(x.name), var(x.name));
    let lam = b.lambda(vec![x], vec![var(sq)]).unwrap();
    let grad = vjp(&mut names, &lam);
    assert_eq!(scalars(&grad, &[3., 1.]), vec![6.]);
    assert_eq!(scalars(&grad, &[3., 0.5]), vec![3.]);
}

#[test]
fn test_product_plus_operand() {
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let x = b.param(Type::f64());
    let y = b.param(Type::f64());
    let p = fbin(&mut b, BinOp::FMul, var(x.name), var(y.name));
    let r = fbin(&mut b, BinOp::FAdd, var(p), var(x.name));
    let lam = b.lambda(vec![x, y], vec![var(r)]).unwrap();
    let grad = vjp(&mut names, &lam);
    assert_eq!(grad.params.len(), 3);
    assert_eq!(grad.ret.len(), 2);
    assert_eq!(scalars(&grad, &[2., 5., 1.]), vec![6., 2.]);
}

#[test]
fn test_repeated_subterms_accumulate() {
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let x = b.param(Type::f64());
    let s1 = fbin(&mut b, BinOp::FMul, var(x.name), var(x.name));
    let s2 = fbin(&mut b, BinOp::FMul, var(x.name), var(x.name));
    let r = fbin(&mut b, BinOp::FAdd, var(s1), var(s2));
    let lam = b.lambda(vec![x], vec![var(r)]).unwrap();
    let grad = vjp(&mut names, &lam);
    assert_eq!(scalars(&grad, &[1.5, 1.]), vec![6.]);
}

#[test]
fn test_chain_matches_finite_differences() {
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let x = b.param(Type::f64());
    let s = call(&mut b, "sin64", var(x.name));
    let e = call(&mut b, "exp64", var(s));
    let r = fbin(&mut b, BinOp::FMul, var(e), var(x.name));
    let lam = b.lambda(vec![x], vec![var(r)]).unwrap();
    let grad = vjp(&mut names, &lam);
    let h = 1e-6;
    for x in [-1.3, 0., 0.4, 2.] {
        let fd = (scalars(&lam, &[x + h])[0] - scalars(&lam, &[x - h])[0]) / (2. * h);
        let d = scalars(&grad, &[x, 1.])[0];
        assert!((d - fd).abs() < 1e-5, "x = {x}: {d} vs {fd}");
    }
}

#[test]
fn test_agrees_with_forward() {
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let x = b.param(Type::f64());
    let y = b.param(Type::f64());
    let q = fbin(&mut b, BinOp::FDiv, var(x.name), var(y.name));
    let t = call(&mut b, "tanh64", var(q));
    let r = fbin(&mut b, BinOp::FSub, var(t), var(y.name));
    let lam = b.lambda(vec![x, y], vec![var(r)]).unwrap();
    let jac = forward(&mut names, &Builtins, &lam).unwrap();
    let grad = vjp(&mut names, &lam);
    let (x, y) = (0.7, 1.9);
    let dx = scalars(&jac, &[x, 1., y, 0.])[0];
    let dy = scalars(&jac, &[x, 0., y, 1.])[0];
    let g = scalars(&grad, &[x, y, 1.]);
    assert!((g[0] - dx).abs() < 1e-12);
    assert!((g[1] - dy).abs() < 1e-12);
}

/// Both branches bind the same internal name `t`.
fn shared_names(cond: SubExp) -> Lambda {
    let ids: Vec<Name> = (0..5).map(tangle::id::name).collect();
    let (c, x, y, t, r) = (ids[0], ids[1], ids[2], ids[3], ids[4]);
    let square = |z: Name| {
        Exp::Basic(BasicOp::BinOp {
            op: BinOp::FMul(F64),
            x: var(z),
            y: var(z),
        })
    };
    let branch = |z: Name| Body {
        stms: vec![stm(t, Type::f64(), square(z))],
        result: vec![var(t)],
    };
    let cond = match cond {
        SubExp::Var(_) => var(c),
        se => se,
    };
    Lambda {
        params: vec![pe(c, Type::bool()), pe(x, Type::f64()), pe(y, Type::f64())],
        body: Body {
            stms: vec![stm(
                r,
                Type::f64(),
                Exp::If {
                    cond,
                    then: branch(x),
                    els: branch(y),
                    dec: IfDec {
                        ret: vec![Type::f64()],
                        sort: IfSort::Normal,
                    },
                },
            )],
            result: vec![var(r)],
        },
        ret: vec![Type::f64()],
    }
}

fn float_grads(grad: &Lambda, c: bool, x: f64, y: f64) -> Vec<f64> {
    let args = vec![Val::bool(c), Val::f64(x), Val::f64(y), Val::f64(1.)];
    let out = interp(grad, args).unwrap();
    out[1..].iter().map(|v| v.as_f64().unwrap()).collect()
}

#[test]
fn test_branches_with_shared_names() {
    let lam = shared_names(SubExp::Const(PrimValue::Bool(true)));
    validate(&lam).unwrap();
    let mut names = NameSource::new();
    let grad = vjp(&mut names, &lam);
    assert_eq!(float_grads(&grad, false, 3., 4.), vec![6., 0.]);

    let lam = shared_names(SubExp::Const(PrimValue::Bool(false)));
    let grad = vjp(&mut names, &lam);
    assert_eq!(float_grads(&grad, true, 3., 4.), vec![0., 8.]);
}

#[test]
fn test_branch_on_parameter() {
    let lam = shared_names(var(tangle::id::name(0)));
    let mut names = NameSource::after(&lam);
    let grad = vjp(&mut names, &lam);
    assert_eq!(float_grads(&grad, true, 3., 4.), vec![6., 0.]);
    assert_eq!(float_grads(&grad, false, 3., 4.), vec![0., 8.]);
    let out = interp(
        &grad,
        vec![Val::bool(true), Val::f64(3.), Val::f64(4.), Val::f64(1.)],
    )
    .unwrap();
    assert_eq!(out[0], Val::bool(false));
}

#[test]
fn test_comparison_feeds_its_result_to_operands() {
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let x = b.param(Type::f64());
    let small = b.let_basic(
        Type::bool(),
        BasicOp::CmpOp {
            op: CmpOp::FLt(F64),
            x: var(x.name),
            y: float(3.),
        },
    );
    let (sq, stms) = b.collect(|b| fbin(b, BinOp::FMul, var(x.name), var(x.name)));
    let r = b.let_exp(
        Type::f64(),
        Exp::If {
            cond: var(small),
            then: Body {
                stms,
                result: vec![var(sq)],
            },
            els: Body {
                stms: vec![],
                result: vec![float(0.)],
            },
            dec: IfDec {
                ret: vec![Type::f64()],
                sort: IfSort::Normal,
            },
        },
    );
    let lam = b.lambda(vec![x], vec![var(r)]).unwrap();
    let grad = vjp(&mut names, &lam);
    // 2x from the taken branch, plus 1 from the comparison that held
    assert_eq!(scalars(&grad, &[1., 1.]), vec![3.]);
    assert_eq!(scalars(&grad, &[5., 1.]), vec![0.]);
}

#[test]
fn test_unused_comparison_still_contributes() {
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let x = b.param(Type::f64());
    b.let_basic(
        Type::bool(),
        BasicOp::CmpOp {
            op: CmpOp::FLt(F64),
            x: var(x.name),
            y: float(3.),
        },
    );
    let sq = fbin(&mut b, BinOp::FMul, var(x.name), var(x.name));
    let lam = b.lambda(vec![x], vec![var(sq)]).unwrap();
    let grad = vjp(&mut names, &lam);
    assert_eq!(scalars(&grad, &[1., 1.]), vec![3.]);
    assert_eq!(scalars(&grad, &[5., 1.]), vec![10.]);
}

#[test]
fn test_integer_and_boolean_comparisons() {
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let x = b.param(Type::f64());
    let n = b.param(Type::i64());
    let p = b.param(Type::bool());
    let q = b.param(Type::bool());
    b.let_basic(
        Type::bool(),
        BasicOp::CmpOp {
            op: CmpOp::Slt(IntType::I64),
            x: var(n.name),
            y: SubExp::i64(4),
        },
    );
    b.let_basic(
        Type::bool(),
        BasicOp::CmpOp {
            op: CmpOp::Llt,
            x: var(p.name),
            y: var(q.name),
        },
    );
    let sq = fbin(&mut b, BinOp::FMul, var(x.name), var(x.name));
    let lam = b.lambda(vec![x, n, p, q], vec![var(sq)]).unwrap();
    let grad = vjp(&mut names, &lam);
    let run = |n: i64, p: bool| {
        let args = vec![
            Val::f64(2.),
            Val::i64(n),
            Val::bool(p),
            Val::bool(true),
            Val::f64(1.),
        ];
        interp(&grad, args).unwrap()
    };
    assert_eq!(
        run(2, false),
        vec![Val::f64(4.), Val::i64(1), Val::bool(true), Val::bool(true)]
    );
    assert_eq!(
        run(9, true),
        vec![Val::f64(4.), Val::i64(0), Val::bool(false), Val::bool(false)]
    );
}

#[test]
fn test_float_conversion_round_trip() {
    let f32 = Type::Prim(PrimType::Float(FloatType::F32));
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let x = b.param(Type::f64());
    let y = b.let_basic(
        f32.clone(),
        BasicOp::ConvOp {
            op: ConvOp::FPConv(F64, FloatType::F32),
            x: var(x.name),
        },
    );
    let z = b.let_basic(
        f32,
        BasicOp::BinOp {
            op: BinOp::FMul(FloatType::F32),
            x: var(y),
            y: var(y),
        },
    );
    let lam = b.lambda(vec![x], vec![var(z)]).unwrap();
    let grad = vjp(&mut names, &lam);
    assert_eq!(grad.ret, vec![Type::f64()]);
    let seed = Val::Prim(PrimValue::Float(FloatType::F32, 1.));
    let out = interp(&grad, vec![Val::f64(1.5), seed]).unwrap();
    assert_eq!(out, vec![Val::f64(3.)]);
}

#[test]
fn test_parameter_and_seed_arity() {
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let x = b.param(Type::f64());
    let y = b.param(Type::f64());
    let p = fbin(&mut b, BinOp::FMul, var(x.name), var(y.name));
    let lam = b.lambda(vec![x, y], vec![var(p), float(5.)]).unwrap();
    let grad = vjp(&mut names, &lam);
    assert_eq!(grad.params.len(), 4);
    assert_eq!(grad.ret, vec![Type::f64(), Type::f64()]);
    // the seed of the constant result is never read
    assert_eq!(scalars(&grad, &[2., 3., 1., 100.]), vec![3., 2.]);
}

#[test]
fn test_assertion_is_kept_unchanged() {
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let x = b.param(Type::f64());
    let pos = b.let_basic(
        Type::bool(),
        BasicOp::CmpOp {
            op: CmpOp::FLt(F64),
            x: float(0.),
            y: var(x.name),
        },
    );
    b.let_basic(
        Type::Prim(PrimType::Cert),
        BasicOp::Assert {
            cond: var(pos),
            msg: "positive".to_owned(),
        },
    );
    let r = call(&mut b, "log64", var(x.name));
    let lam = b.lambda(vec![x], vec![var(r)]).unwrap();
    let grad = vjp(&mut names, &lam);
    assert_eq!(grad.body.stms[..3], lam.body.stms[..]);
    // 1/x from the logarithm, plus 1 from `0 < x`
    assert_eq!(scalars(&grad, &[4., 1.]), vec![1.25]);
    assert!(interp(&grad, vec![Val::f64(-1.), Val::f64(1.)]).is_err());
}

#[test]
fn test_map_is_unsupported() {
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let xs = b.param(Type::array(PrimType::Float(F64), vec![SubExp::i64(3)]));
    let x = b.param(Type::f64());
    let sq = fbin(&mut b, BinOp::FMul, var(x.name), var(x.name));
    let map = b.lambda(vec![x], vec![var(sq)]).unwrap();
    let ys = b.let_exp(
        xs.ty.clone(),
        Exp::Op(Soac::Screma {
            width: SubExp::i64(3),
            arrays: vec![xs.name],
            form: ScremaForm {
                scans: vec![],
                reduces: vec![],
                map,
            },
        }),
    );
    let lam = b.lambda(vec![xs], vec![var(ys)]).unwrap();
    match reverse(&mut names, &Builtins, &lam) {
        Err(Error::Unsupported { mode, .. }) => assert_eq!(mode, Mode::Reverse),
        res => panic!("unexpected {res:?}"),
    }
}

#[test]
fn test_unknown_function_fails() {
    let mut names = NameSource::new();
    let mut b = Builder::new(&mut names);
    let x = b.param(Type::f64());
    let r = call(&mut b, "gamma64", var(x.name));
    let lam = b.lambda(vec![x], vec![var(r)]).unwrap();
    match reverse(&mut names, &Builtins, &lam) {
        Err(Error::MissingRule { func }) => assert_eq!(func, "gamma64"),
        res => panic!("unexpected {res:?}"),
    }
}
