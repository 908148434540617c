use super::*;

fn call(ns: Namespace, name: &str, args: &[Value]) -> Result<Value, EvalError> {
    Library::standard().call(ns, name, args)
}

fn numpy() -> Namespace {
    Namespace::Module(Module::Numpy)
}

#[test]
fn test_module_names() {
    assert_eq!(Module::from_name("numpy"), Some(Module::Numpy));
    assert_eq!(Module::from_name("math"), Some(Module::Math));
    assert_eq!(Module::from_name("os"), None);
    assert_eq!(Module::Numpy.name(), "numpy");
}

#[test]
fn test_builtin_min_max() {
    let ns = Namespace::Builtin;
    assert_eq!(
        call(ns, "min", &[3.0.into(), 1.0.into(), 2.0.into()]),
        Ok(Value::Number(1.0))
    );
    assert_eq!(
        call(ns, "max", &[vec![3.0, 7.0, 2.0].into()]),
        Ok(Value::Number(7.0))
    );
    assert!(matches!(
        call(ns, "min", &[Value::List(vec![])]),
        Err(EvalError::Value(_))
    ));
    assert!(matches!(
        call(ns, "max", &[5.0.into()]),
        Err(EvalError::Type(_))
    ));
}

#[test]
fn test_numpy_reductions_accept_scalars() {
    assert_eq!(call(numpy(), "max", &[5.0.into()]), Ok(Value::Number(5.0)));
    assert_eq!(
        call(numpy(), "sum", &[vec![1.0, 2.0, 3.5].into()]),
        Ok(Value::Number(6.5))
    );
    assert_eq!(
        call(numpy(), "mean", &[vec![1.0, 2.0, 3.0].into()]),
        Ok(Value::Number(2.0))
    );
}

#[test]
fn test_reductions_propagate_nan() {
    match call(numpy(), "min", &[vec![1.0, f64::NAN].into()]) {
        Ok(Value::Number(n)) => assert!(n.is_nan()),
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn test_sqrt_domain() {
    assert_eq!(
        call(Namespace::Builtin, "sqrt", &[9.0.into()]),
        Ok(Value::Number(3.0))
    );
    assert!(matches!(
        call(Namespace::Builtin, "sqrt", &[(-1.0).into()]),
        Err(EvalError::Value(_))
    ));
    assert!(matches!(
        call(Namespace::Module(Module::Math), "sqrt", &[(-4.0).into()]),
        Err(EvalError::Value(_))
    ));
}

#[test]
fn test_round_ties_to_even() {
    let ns = Namespace::Builtin;
    assert_eq!(call(ns, "round", &[2.5.into()]), Ok(Value::Number(2.0)));
    assert_eq!(call(ns, "round", &[3.5.into()]), Ok(Value::Number(4.0)));
    assert_eq!(
        call(ns, "round", &[1.234.into(), 2.0.into()]),
        Ok(Value::Number(1.23))
    );
    assert!(call(ns, "round", &[1.0.into(), 0.5.into()]).is_err());
}

#[test]
fn test_len_and_sum_require_lists() {
    let ns = Namespace::Builtin;
    assert_eq!(
        call(ns, "len", &[vec![1.0, 2.0].into()]),
        Ok(Value::Number(2.0))
    );
    assert!(matches!(call(ns, "len", &[1.0.into()]), Err(EvalError::Type(_))));
    assert!(matches!(call(ns, "sum", &[1.0.into()]), Err(EvalError::Type(_))));
}

#[test]
fn test_where_broadcasts() {
    let out = call(
        numpy(),
        "where",
        &[vec![1.0, 0.0, 1.0].into(), 0.0.into(), vec![5.0, 6.0, 7.0].into()],
    );
    assert_eq!(out, Ok(Value::List(vec![0.0, 6.0, 0.0])));

    let scalar = call(numpy(), "where", &[true.into(), 1.0.into(), 2.0.into()]);
    assert_eq!(scalar, Ok(Value::Number(1.0)));

    let mismatch = call(
        numpy(),
        "where",
        &[vec![1.0, 0.0].into(), 0.0.into(), vec![5.0, 6.0, 7.0].into()],
    );
    assert!(matches!(mismatch, Err(EvalError::Value(_))));
}

#[test]
fn test_clip_and_elementwise_extrema() {
    assert_eq!(
        call(numpy(), "clip", &[vec![-1.0, 0.5, 2.0].into(), 0.0.into(), 1.0.into()]),
        Ok(Value::List(vec![0.0, 0.5, 1.0]))
    );
    assert_eq!(
        call(numpy(), "maximum", &[vec![-1.0, 3.0].into(), 0.0.into()]),
        Ok(Value::List(vec![0.0, 3.0]))
    );
    assert_eq!(
        call(numpy(), "minimum", &[2.0.into(), 5.0.into()]),
        Ok(Value::Number(2.0))
    );
}

#[test]
fn test_arity_errors() {
    assert!(matches!(
        call(Namespace::Builtin, "abs", &[1.0.into(), 2.0.into()]),
        Err(EvalError::Type(_))
    ));
    assert!(matches!(
        call(Namespace::Module(Module::Math), "pow", &[1.0.into()]),
        Err(EvalError::Type(_))
    ));
}

#[test]
fn test_unknown_functions_and_constants() {
    let library = Library::standard();
    assert_eq!(
        library.call(numpy(), "linalg", &[]),
        Err(EvalError::UnknownFunction("numpy.linalg".to_string()))
    );
    assert_eq!(
        library.call(Namespace::Builtin, "open", &[]),
        Err(EvalError::UnknownFunction("open".to_string()))
    );
    assert!(library.has_function(numpy(), "where"));
    assert!(!library.has_function(Namespace::Module(Module::Math), "where"));
    assert_eq!(library.constant(Module::Math, "pi"), Some(std::f64::consts::PI));
    assert_eq!(library.constant(Module::Math, "nan"), None);
    assert!(library.constant(Module::Numpy, "nan").is_some_and(f64::is_nan));
}
