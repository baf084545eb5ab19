use vkstage::{
    Array, DataType, DeviceContext, ElementwiseFn, Expr, HostArray, Operand, StagingError,
    Target, compile,
};

fn ctx() -> DeviceContext {
    DeviceContext::emulated(8 << 20).unwrap()
}

#[test]
fn mismatched_shapes_never_broadcast() {
    let ctx = ctx();
    let add = ctx.vectorize(&ElementwiseFn::add()).unwrap();
    let a = HostArray::zeros(&[4, 1], DataType::F32).unwrap();
    let b = HostArray::zeros(&[4], DataType::F32).unwrap();
    let b_dev = ctx.upload(&b).unwrap();

    for operands in [
        [Operand::from(&a), Operand::from(&b)],
        [Operand::from(&a), Operand::from(&b_dev)],
        [Operand::from(&b_dev), Operand::from(&a)],
    ] {
        assert!(matches!(
            add.call(&operands),
            Err(StagingError::ShapeMismatch { .. })
        ));
    }
}

#[test]
fn mixed_dtypes_fail_fast() {
    let ctx = ctx();
    let add = ctx.vectorize(&ElementwiseFn::add()).unwrap();
    let a = ctx
        .upload(&HostArray::from_slice(&[1.0f32, 2.0]).unwrap())
        .unwrap();
    let b = ctx
        .upload(&HostArray::from_slice(&[1.0f64, 2.0]).unwrap())
        .unwrap();

    let err = add.call(&[Operand::from(&a), Operand::from(&b)]).unwrap_err();
    assert!(matches!(
        err,
        StagingError::DtypeMismatch {
            expected: DataType::F32,
            found: DataType::F64
        }
    ));
    assert!(!err.is_recoverable());
}

#[test]
fn arity_mismatch_names_the_function() {
    let ctx = ctx();
    let fma = ElementwiseFn::new(
        "fma",
        3,
        Expr::arg(0) * Expr::arg(1) + Expr::arg(2),
    );
    let kernel = ctx.vectorize(&fma).unwrap();
    let a = HostArray::zeros(&[2], DataType::F64).unwrap();

    let err = kernel.call(&[Operand::from(&a), Operand::from(&a)]).unwrap_err();
    assert!(matches!(
        &err,
        StagingError::ArityMismatch {
            name,
            expected: 3,
            found: 2
        } if name == "fma"
    ));
}

#[test]
fn all_device_apply_moves_no_bytes() {
    let ctx = ctx();
    let a = ctx
        .upload(&HostArray::from_slice(&[1i32, 2, 3, 4]).unwrap())
        .unwrap();
    let b = ctx
        .upload(&HostArray::from_slice(&[10i32, 20, 30, 40]).unwrap())
        .unwrap();
    let out = ctx.allocate(&[4], DataType::I32).unwrap();
    let add = ctx.vectorize(&ElementwiseFn::add()).unwrap();

    ctx.reset_stats();
    let result = add
        .apply(&[Operand::from(&a), Operand::from(&b)], Some(out.into()))
        .unwrap();
    let fresh = add.call(&[Operand::from(&a), Operand::from(&b)]).unwrap();

    let stats = ctx.stats();
    assert_eq!(stats.total_copies(), 0);
    assert_eq!(stats.total_bytes(), 0);
    assert_eq!(stats.kernel_launches, 2);
    assert!(result.is_device());
    assert!(fresh.is_device());
}

#[test]
fn host_operands_are_staged_and_released() {
    let ctx = ctx();
    let a = HostArray::from_slice(&[1.0f32, 2.0, 3.0]).unwrap();
    let b_dev = ctx
        .upload(&HostArray::from_slice(&[0.5f32, 0.5, 0.5]).unwrap())
        .unwrap();
    let mul = ctx.vectorize(&ElementwiseFn::mul()).unwrap();
    let in_use = ctx.memory_in_use().unwrap();

    ctx.reset_stats();
    let result = mul.call(&[Operand::from(&a), Operand::from(&b_dev)]).unwrap();

    // one upload for `a`, one download of the result
    let stats = ctx.stats();
    assert_eq!(stats.host_to_device_copies, 1);
    assert_eq!(stats.host_to_device_bytes, 12);
    assert_eq!(stats.device_to_host_copies, 1);
    assert_eq!(stats.device_to_host_bytes, 12);

    assert!(!result.is_device());
    assert_eq!(
        result.into_host().unwrap().to_vec::<f32>().unwrap(),
        vec![0.5, 1.0, 1.5]
    );
    assert_eq!(ctx.memory_in_use().unwrap(), in_use);
}

#[test]
fn host_kernel_downloads_device_operands() {
    let ctx = ctx();
    let a = ctx
        .upload(&HostArray::from_slice(&[3i64, -4]).unwrap())
        .unwrap();
    let b = ctx
        .upload(&HostArray::from_slice(&[1i64, 1]).unwrap())
        .unwrap();
    let max = compile(&ElementwiseFn::max(), Target::Host).unwrap();

    ctx.reset_stats();
    let result = max.call(&[Operand::from(&a), Operand::from(&b)]).unwrap();

    // every operand on device, so the result is placed there too
    assert!(result.is_device());
    let stats = ctx.stats();
    assert_eq!(stats.device_to_host_copies, 2);
    assert_eq!(stats.host_to_device_copies, 1);
    assert_eq!(stats.kernel_launches, 0);

    assert_eq!(
        result.into_host().unwrap().to_vec::<i64>().unwrap(),
        vec![3, 1]
    );
}

#[test]
fn composite_expressions_evaluate_per_element() {
    let ctx = ctx();
    // (x - y)^2 / 2, clamped below at 1
    let f = ElementwiseFn::new(
        "half_sq_diff",
        2,
        ((Expr::arg(0) - Expr::arg(1)) * (Expr::arg(0) - Expr::arg(1)) / Expr::constant(2.0))
            .max(Expr::constant(1.0)),
    );
    let kernel = ctx.vectorize(&f).unwrap();

    let x = HostArray::from_vec(&[2, 2], vec![0.0f64, 4.0, 1.0, -3.0]).unwrap();
    let y = HostArray::from_vec(&[2, 2], vec![0.0f64, 0.0, 2.0, 3.0]).unwrap();
    let out = HostArray::zeros(&[2, 2], DataType::F64).unwrap();

    let result = kernel
        .apply(&[Operand::from(&x), Operand::from(&y)], Some(Array::Host(out)))
        .unwrap();

    let host = result.as_host().unwrap();
    assert_eq!(host.shape(), &[2, 2]);
    assert_eq!(host.to_vec::<f64>().unwrap(), vec![1.0, 8.0, 1.0, 18.0]);
}

#[test]
fn integer_kernels_wrap_and_guard_division() {
    let ctx = ctx();
    let a = ctx
        .upload(&HostArray::from_slice(&[i32::MAX, 7, -9]).unwrap())
        .unwrap();
    let b = ctx
        .upload(&HostArray::from_slice(&[1i32, 0, 2]).unwrap())
        .unwrap();

    let add = ctx.vectorize(&ElementwiseFn::add()).unwrap();
    let div = ctx.vectorize(&ElementwiseFn::div()).unwrap();

    let sum = add
        .call(&[Operand::from(&a), Operand::from(&b)])
        .unwrap()
        .into_host()
        .unwrap();
    assert_eq!(sum.to_vec::<i32>().unwrap(), vec![i32::MIN, 7, -7]);

    let quotient = div
        .call(&[Operand::from(&a), Operand::from(&b)])
        .unwrap()
        .into_host()
        .unwrap();
    assert_eq!(quotient.to_vec::<i32>().unwrap(), vec![i32::MAX, 0, -4]);
}
