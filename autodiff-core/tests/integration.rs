//! Integration Tests for the Graph Engine
//!
//! These tests verify that variables, functions and both propagation
//! directions work together correctly.

use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};

use autodiff_core::{ops, Error, Function, FunctionConfig, FunctionState, Graph, Value, Variable};

/// Test the basic evaluate / push / pull cycle on a scalar function.
#[test]
fn scalar_function_end_to_end() {
    let graph = Graph::new();
    let x = graph.variable(3.0).unwrap();
    let u = graph.variable(&x * 2.0).unwrap();

    let mut f = Function::new([&u]).unwrap();
    f.evaluate().unwrap();
    assert_eq!(u.value(), 6.0);

    f.push_tangent_at(&x).unwrap();
    assert_eq!(u.derivative(), 2.0);

    f.pull_gradient_at(&u).unwrap();
    assert_eq!(x.derivative(), 2.0);
}

/// Test that unseeded passes use the derivatives already stored.
#[test]
fn unseeded_passes_use_stored_derivatives() {
    let graph = Graph::new();
    let x = graph.variable(3.0).unwrap();
    let u = graph.variable(&x * 2.0).unwrap();

    let mut f = Function::new([&u]).unwrap();
    f.evaluate().unwrap();

    x.set_derivative(0.5);
    f.push_tangent().unwrap();
    assert_eq!(u.derivative(), 1.0);

    u.set_derivative(3.0);
    f.pull_gradient().unwrap();
    assert_eq!(x.derivative(), 6.0);
}

/// Test that a chain of elementary functions differentiates correctly.
#[test]
fn chain_rule_through_elementary_functions() {
    let graph = Graph::new();
    let x = graph.variable(0.7).unwrap();
    let u = graph.variable(ops::exp(ops::sin(&x))).unwrap();

    let mut f = Function::new([&u]).unwrap();
    f.evaluate().unwrap();
    assert_relative_eq!(u.value().as_scalar().unwrap(), 0.7f64.sin().exp(), epsilon = 1e-12);

    // d/dx exp(sin x) = cos x exp(sin x)
    let expected = 0.7f64.cos() * 0.7f64.sin().exp();
    f.push_tangent_at(&x).unwrap();
    assert_relative_eq!(u.derivative().as_scalar().unwrap(), expected, epsilon = 1e-12);

    f.pull_gradient_at(&u).unwrap();
    assert_relative_eq!(x.derivative().as_scalar().unwrap(), expected, epsilon = 1e-12);
}

/// Test that forward and reverse mode agree on a linear map.
#[test]
fn forward_and_reverse_mode_agree() {
    let graph = Graph::new();
    let a = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let m = graph.literal(a.clone());
    let x = graph.variable(DVector::from_vec(vec![1.0, -1.0, 2.0])).unwrap();
    let u = graph.variable(ops::matmul(&m, &x)).unwrap();

    let mut f = Function::with_sources([&u], [&x]).unwrap();
    f.evaluate().unwrap();
    assert_eq!(u.value(), Value::from(DVector::from_vec(vec![5.0, 11.0])));

    // Both directions recover the whole Jacobian from an identity seed
    f.push_tangent_at(&x).unwrap();
    assert_relative_eq!(u.derivative().to_matrix(2, 3), a);

    f.pull_gradient_at(&u).unwrap();
    assert_relative_eq!(x.derivative().to_matrix(2, 3), a);
}

/// Test that `w · J v` is the same whichever direction computes it.
#[test]
fn forward_and_reverse_products_are_dual() {
    let graph = Graph::new();
    let a = DMatrix::from_row_slice(2, 3, &[0.5, -1.0, 2.0, 3.0, 0.25, -4.0]);
    let m = graph.literal(a);
    let x = graph.variable(DVector::from_vec(vec![1.0, 2.0, 3.0])).unwrap();
    let u = graph.variable(ops::matmul(&m, &x) * 2.0).unwrap();
    let v = DVector::from_vec(vec![0.3, -0.7, 1.1]);
    let w = DVector::from_vec(vec![-2.0, 0.9]);

    let mut f = Function::with_sources([&u], [&x]).unwrap();
    f.evaluate().unwrap();

    x.set_derivative(v.clone());
    f.push_tangent().unwrap();
    let forward = (w.transpose() * u.derivative().to_matrix(2, 1))[(0, 0)];

    u.set_derivative(DMatrix::from_row_slice(1, 2, w.as_slice()));
    f.pull_gradient().unwrap();
    let reverse = (x.derivative().to_matrix(1, 3) * &v)[(0, 0)];

    assert_relative_eq!(forward, reverse, epsilon = 1e-12);
}

/// Test element-wise products produce diagonal Jacobians.
#[test]
fn elementwise_product_jacobians() {
    let graph = Graph::new();
    let xs = DVector::from_vec(vec![1.0, 2.0, 3.0]);
    let ys = DVector::from_vec(vec![4.0, 5.0, 6.0]);
    let x = graph.variable(xs.clone()).unwrap();
    let y = graph.variable(ys.clone()).unwrap();
    let u = graph.variable(&x * &y).unwrap();

    let mut f = Function::new([&u]).unwrap();
    f.evaluate().unwrap();

    f.push_tangent_at(&x).unwrap();
    assert_relative_eq!(u.derivative().to_matrix(3, 3), DMatrix::from_diagonal(&ys));

    f.pull_gradient_at(&u).unwrap();
    assert_relative_eq!(x.derivative().to_matrix(3, 3), DMatrix::from_diagonal(&ys));
    assert_relative_eq!(y.derivative().to_matrix(3, 3), DMatrix::from_diagonal(&xs));
}

/// Test the gradient of a matrix product reduced to a scalar.
#[test]
fn matrix_product_gradient() {
    let graph = Graph::new();
    let a = graph.variable(DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0])).unwrap();
    let b = graph.variable(DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0])).unwrap();
    let s = graph.variable(ops::sum(ops::matmul(&a, &b))).unwrap();

    let mut f = Function::new([&s]).unwrap();
    f.evaluate().unwrap();
    assert_eq!(s.value(), 10.0);

    // ∂s/∂A_ij is the j-th row sum of B, flattened column-major
    f.pull_gradient_at(&s).unwrap();
    assert_relative_eq!(
        a.derivative().to_matrix(1, 4),
        DMatrix::from_row_slice(1, 4, &[3.0, 3.0, 7.0, 7.0])
    );
}

/// Test that a function needs at least one target.
#[test]
fn empty_targets_are_rejected() {
    let graph = Graph::new();
    let x = graph.variable(1.0).unwrap();

    let err = Function::with_sources(Vec::<&Variable>::new(), [&x]).unwrap_err();
    assert_eq!(err, Error::EmptyTargets);
}

/// Test that re-seating a variable onto its own reader is caught.
#[test]
fn cycles_are_detected_after_reseating() {
    let graph = Graph::new();
    let x = graph.variable(1.0).unwrap();
    let u = graph.variable(&x + 1.0).unwrap();

    let mut stale = Function::new([&u]).unwrap();
    stale.evaluate().unwrap();
    let mut stale_forward = Function::new([&u]).unwrap();
    stale_forward.evaluate().unwrap();
    let mut stale_reverse = Function::new([&u]).unwrap();
    stale_reverse.evaluate().unwrap();

    // x now reads u, which reads x
    x.set(&u + 1.0).unwrap();
    assert_eq!(x.value(), 3.0);

    let mut fresh = Function::new([&u]).unwrap();
    let err = fresh.compile().unwrap_err();
    assert!(matches!(err, Error::CyclicDependency { node } if node == x.id() || node == u.id()));
    assert!(!fresh.compiled());

    let err = stale.evaluate().unwrap_err();
    assert!(matches!(err, Error::CyclicDependency { .. }));
    assert_eq!(stale.state(), FunctionState::Uncompiled);

    let err = stale_forward.push_tangent().unwrap_err();
    assert!(matches!(err, Error::CyclicDependency { .. }));
    assert_eq!(stale_forward.state(), FunctionState::Uncompiled);

    let err = stale_reverse.pull_gradient().unwrap_err();
    assert!(matches!(err, Error::CyclicDependency { .. }));
    assert_eq!(stale_reverse.state(), FunctionState::Uncompiled);

    // Once uncompiled, the next attempt fails in compilation itself
    assert!(matches!(stale_reverse.pull_gradient(), Err(Error::CyclicDependency { .. })));
}

/// Test that seeds must be sources (forward) or targets (reverse).
#[test]
fn invalid_seeds_are_rejected() {
    let graph = Graph::new();
    let x = graph.variable(1.0).unwrap();
    let u = graph.variable(ops::square(&x)).unwrap();

    let mut f = Function::new([&u]).unwrap();
    f.evaluate().unwrap();

    assert_eq!(f.push_tangent_at(&u).unwrap_err(), Error::InvalidSeed { node: u.id() });
    assert_eq!(f.pull_gradient_at(&x).unwrap_err(), Error::InvalidSeed { node: x.id() });
}

/// Test that differentiation is refused until evaluation succeeds.
#[test]
fn differentiation_requires_evaluation() {
    let graph = Graph::new();
    let x = graph.variable(1.0).unwrap();
    let u = graph.variable(ops::cos(&x)).unwrap();

    let mut f = Function::new([&u]).unwrap();
    assert_eq!(f.push_tangent_at(&x).unwrap_err(), Error::NotEvaluated);
    assert_eq!(f.pull_gradient_at(&u).unwrap_err(), Error::NotEvaluated);
    assert_eq!(f.push_tangent().unwrap_err(), Error::NotEvaluated);
    assert_eq!(f.pull_gradient().unwrap_err(), Error::NotEvaluated);
    assert_eq!(f.state(), FunctionState::Compiled);

    f.evaluate().unwrap();
    f.pull_gradient_at(&u).unwrap();
    assert_relative_eq!(x.derivative().as_scalar().unwrap(), -(1.0f64.sin()));
}

/// Test that compiling the same graph twice gives the same order.
#[test]
fn compilation_order_is_deterministic() {
    let graph = Graph::new();
    let x = graph.variable(1.0).unwrap();
    let y = graph.variable(2.0).unwrap();
    let a = graph.variable(&x * &y).unwrap();
    let b = graph.variable(&a + &x).unwrap();
    let c = graph.variable(ops::pow(&b, &y)).unwrap();

    let mut first = Function::new([&c, &a]).unwrap();
    let mut second = Function::new([&c, &a]).unwrap();
    first.compile().unwrap();
    second.compile().unwrap();

    assert_eq!(first.order(), second.order());
    assert_eq!(first.order().len(), 5);
}

/// Test that a re-seated function is reported stale, then recompiles.
#[test]
fn stale_compilation_is_detected() {
    let graph = Graph::new();
    let x = graph.variable(1.0).unwrap();
    let z = graph.variable(5.0).unwrap();
    let u = graph.variable(&x * 2.0).unwrap();

    let mut f = Function::new([&u]).unwrap();
    f.evaluate().unwrap();

    u.set(&z * 2.0).unwrap();
    assert_eq!(f.evaluate().unwrap_err(), Error::StaleCompilation);
    assert_eq!(f.state(), FunctionState::Uncompiled);

    // The next call compiles the new topology
    f.evaluate().unwrap();
    assert_eq!(f.order(), &[z.id(), u.id()]);
    f.push_tangent_at(&z).unwrap();
    assert_eq!(u.derivative(), 2.0);
}

/// Test that staleness checks can be switched off.
#[test]
fn topology_checks_can_be_disabled() {
    let graph = Graph::new();
    let x = graph.variable(1.0).unwrap();
    let z = graph.variable(5.0).unwrap();
    let u = graph.variable(&x * 2.0).unwrap();

    let config = FunctionConfig::from_json(r#"{ "verify_topology": false }"#).unwrap();
    let mut f = Function::with_config([&u], [], config).unwrap();
    f.evaluate().unwrap();

    u.set(&z * 2.0).unwrap();
    f.evaluate().unwrap();

    // The old order is kept as compiled
    assert_eq!(f.state(), FunctionState::Evaluated);
    assert_eq!(f.order(), &[x.id(), u.id()]);
    assert_eq!(u.value(), 10.0);
}

/// Test that a failed evaluation leaves values untouched.
#[test]
fn failed_evaluation_rolls_back() {
    let graph = Graph::new();
    let x = graph.variable(2.0).unwrap();
    let v = graph.variable(DVector::from_vec(vec![1.0, 2.0])).unwrap();
    let w = graph.variable(DVector::from_vec(vec![1.0, 1.0])).unwrap();
    let a = graph.variable(&v * &x).unwrap();
    let b = graph.variable(ops::dot(&a, &w)).unwrap();

    let mut f = Function::new([&b]).unwrap();
    f.evaluate().unwrap();
    assert_eq!(b.value(), 6.0);

    x.set(10.0).unwrap();
    w.set(DVector::from_vec(vec![1.0, 1.0, 1.0])).unwrap();
    let err = f.evaluate().unwrap_err();

    assert!(matches!(err, Error::ShapeMismatch { operation: "dot", .. }));
    assert_eq!(f.state(), FunctionState::Compiled);
    assert_eq!(a.value(), Value::from(DVector::from_vec(vec![2.0, 4.0])));
    assert_eq!(b.value(), 6.0);
    assert_eq!(f.pull_gradient_at(&b).unwrap_err(), Error::NotEvaluated);
}

/// Test that bounding the search makes intermediate variables sources.
#[test]
fn explicit_sources_bound_the_function() {
    let graph = Graph::new();
    let x = graph.variable(2.0).unwrap();
    let u = graph.variable(ops::square(&x)).unwrap();
    let v = graph.variable(&u * 3.0).unwrap();

    let mut f = Function::with_sources([&v], [&u]).unwrap();
    f.evaluate().unwrap();
    assert_eq!(f.order(), &[u.id(), v.id()]);

    f.pull_gradient_at(&v).unwrap();
    assert_eq!(u.derivative(), 3.0);
    // x lies outside the function and is not touched
    assert!(x.derivative().is_zero());
}

/// Test that configuration round-trips through JSON.
#[test]
fn config_serializes_to_json() {
    let config: FunctionConfig = serde_json::from_str("{}").unwrap();
    assert!(config.verify_topology);

    let json = serde_json::to_value(FunctionConfig { verify_topology: false }).unwrap();
    assert_eq!(json, serde_json::json!({ "verify_topology": false }));
}
