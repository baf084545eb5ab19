use std::sync::Arc;

use vkstage::{
    Array, ContextConfig, DataType, DeviceContext, ElementwiseFn, EmulatedDevice, HostArray,
    Operand, StagingError, TransferDirection,
};

const N: usize = 100_000;

fn x_and_2x(ctx: &DeviceContext) -> (vkstage::DeviceBuffer, vkstage::DeviceBuffer) {
    let x: Vec<f64> = (0..N).map(|i| i as f64).collect();
    let y: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();

    (
        ctx.upload(&HostArray::from_slice(&x).unwrap()).unwrap(),
        ctx.upload(&HostArray::from_slice(&y).unwrap()).unwrap(),
    )
}

fn emulated_with_handle(capacity: u64, retries: u32) -> (DeviceContext, Arc<EmulatedDevice>) {
    let config = ContextConfig {
        transfer_retries: retries,
        ..ContextConfig::emulated(capacity)
    };
    let device = Arc::new(EmulatedDevice::new(capacity, 1.0, 1024));
    let ctx = DeviceContext::with_backend(config, device.clone()).unwrap();
    (ctx, device)
}

#[test]
fn add_two_device_buffers() {
    let ctx = DeviceContext::emulated(16 << 20).unwrap();
    let (x_dev, y_dev) = x_and_2x(&ctx);
    let add = ctx.vectorize(&ElementwiseFn::add()).unwrap();

    let result = add
        .call(&[Operand::from(&x_dev), Operand::from(&y_dev)])
        .unwrap()
        .into_host()
        .unwrap();

    let values = result.as_slice::<f64>().unwrap();
    assert_eq!(values.len(), N);
    assert_eq!(values[10], 30.0);
    assert!(values.iter().enumerate().all(|(i, v)| *v == 3.0 * i as f64));
}

#[test]
fn add_into_preallocated_output() {
    let ctx = DeviceContext::emulated(16 << 20).unwrap();
    let (x_dev, y_dev) = x_and_2x(&ctx);
    let add = ctx.vectorize(&ElementwiseFn::add()).unwrap();
    let out_dev = ctx.allocate(&[N], DataType::F64).unwrap();

    let out = add
        .apply(
            &[Operand::from(&x_dev), Operand::from(&y_dev)],
            Some(Array::Device(out_dev)),
        )
        .unwrap();

    let host = out.into_host().unwrap();
    assert_eq!(
        &host.as_slice::<f64>().unwrap()[..10],
        &[0.0, 3.0, 6.0, 9.0, 12.0, 15.0, 18.0, 21.0, 24.0, 27.0]
    );
}

#[test]
fn output_buffer_is_reused_without_new_allocations() {
    let ctx = DeviceContext::emulated(16 << 20).unwrap();
    let (x_dev, y_dev) = x_and_2x(&ctx);
    let add = ctx.vectorize(&ElementwiseFn::add()).unwrap();
    let mut out = Array::Device(ctx.allocate(&[N], DataType::F64).unwrap());
    let in_use = ctx.memory_in_use().unwrap();

    for _ in 0..5 {
        add.apply_into(&[Operand::from(&x_dev), Operand::from(&y_dev)], &mut out)
            .unwrap();
        assert_eq!(ctx.memory_in_use().unwrap(), in_use);
    }
}

#[test]
fn every_operation_on_a_freed_buffer_fails() {
    let ctx = DeviceContext::emulated(1 << 20).unwrap();
    let host = HostArray::from_slice(&[1.0f32, 2.0]).unwrap();
    let mut dev = ctx.upload(&host).unwrap();
    let live = ctx.upload(&host).unwrap();
    dev.free().unwrap();

    let use_after_free = |r: Result<_, StagingError>| matches!(r, Err(StagingError::UseAfterFree { .. }));

    assert!(use_after_free(dev.download().map(|_| ())));
    assert!(use_after_free(dev.copy_from_host(&host)));
    let mut sink = host.clone();
    assert!(use_after_free(dev.copy_to_host(&mut sink)));

    let add = ctx.vectorize(&ElementwiseFn::add()).unwrap();
    assert!(use_after_free(
        add.call(&[Operand::from(&dev), Operand::from(&live)]).map(|_| ())
    ));
    assert!(use_after_free(
        add.call(&[Operand::from(&live), Operand::from(&dev)]).map(|_| ())
    ));

    assert!(matches!(dev.free(), Err(StagingError::DoubleFree { .. })));
}

#[test]
fn allocation_over_capacity_leaves_usage_unchanged() {
    let ctx = DeviceContext::emulated(1000).unwrap();
    let _a = ctx.allocate(&[200], DataType::F32).unwrap();

    let err = ctx.allocate(&[100], DataType::F32).unwrap_err();
    assert!(err.is_recoverable());
    assert!(matches!(
        err,
        StagingError::Allocation {
            requested: 400,
            in_use: 800,
            capacity: 1000
        }
    ));
    assert_eq!(ctx.memory_in_use().unwrap(), 800);
}

#[test]
fn oversized_shapes_fail_without_panicking() {
    let ctx = DeviceContext::emulated(1 << 20).unwrap();

    assert!(matches!(
        ctx.allocate(&[usize::MAX / 2, 4], DataType::F32),
        Err(StagingError::InvalidShape(_))
    ));
    assert!(matches!(
        HostArray::zeros(&[1 << 40, 1 << 40], DataType::F64),
        Err(StagingError::InvalidShape(_))
    ));

    // representable but beyond the device budget
    let err = ctx.allocate(&[1 << 40], DataType::F64).unwrap_err();
    assert!(matches!(
        err,
        StagingError::Allocation {
            requested,
            in_use: 0,
            capacity,
        } if requested == 8 << 40 && capacity == 1 << 20
    ));
    assert_eq!(ctx.memory_in_use().unwrap(), 0);
}

#[test]
fn output_buffer_survives_a_failed_launch() {
    let (ctx, device) = emulated_with_handle(1 << 20, 0);
    let x = ctx
        .upload(&HostArray::from_slice(&[1.0f64, 2.0, 3.0]).unwrap())
        .unwrap();
    let add = ctx.vectorize(&ElementwiseFn::add()).unwrap();
    let mut out = Array::Device(ctx.allocate(&[3], DataType::F64).unwrap());
    let in_use = ctx.memory_in_use().unwrap();

    device.set_online(false);
    assert!(
        add.apply_into(&[Operand::from(&x), Operand::from(&x)], &mut out)
            .is_err()
    );
    assert_eq!(ctx.memory_in_use().unwrap(), in_use);

    device.set_online(true);
    add.apply_into(&[Operand::from(&x), Operand::from(&x)], &mut out)
        .unwrap();
    assert_eq!(
        out.into_host().unwrap().to_vec::<f64>().unwrap(),
        vec![2.0, 4.0, 6.0]
    );
}

#[test]
fn failed_upload_leaks_nothing() {
    let (ctx, device) = emulated_with_handle(1 << 20, 0);
    device.set_online(false);

    let err = ctx
        .upload(&HostArray::from_slice(&[1i32, 2, 3]).unwrap())
        .unwrap_err();
    assert!(matches!(
        err,
        StagingError::Transfer {
            direction: TransferDirection::HostToDevice,
            bytes: 12,
            ..
        }
    ));
    assert_eq!(ctx.memory_in_use().unwrap(), 0);
    assert_eq!(device.live_allocations(), 0);
}

#[test]
fn retries_recover_from_transient_faults() {
    let (ctx, device) = emulated_with_handle(1 << 20, 2);
    let host = HostArray::from_slice(&[4i64, 5, 6]).unwrap();

    device.inject_transfer_faults(2);
    let dev = ctx.upload(&host).unwrap();

    device.inject_transfer_faults(2);
    assert_eq!(dev.download().unwrap(), host);

    device.inject_transfer_faults(3);
    assert!(matches!(
        dev.download(),
        Err(StagingError::Transfer {
            direction: TransferDirection::DeviceToHost,
            ..
        })
    ));
}

#[test]
fn device_loss_surfaces_from_downloads() {
    let (ctx, device) = emulated_with_handle(1 << 20, 0);
    let dev = ctx
        .upload(&HostArray::from_slice(&[1.0f32]).unwrap())
        .unwrap();

    device.set_online(false);
    assert!(dev.download().unwrap_err().is_recoverable());

    device.set_online(true);
    assert_eq!(dev.download().unwrap().to_vec::<f32>().unwrap(), vec![1.0]);
}

#[test]
fn shutdown_ends_the_context() {
    let ctx = DeviceContext::emulated(1 << 20).unwrap();
    let host = HostArray::from_slice(&[1.0f32, 2.0]).unwrap();
    let dev = ctx.upload(&host).unwrap();
    let add = ctx.vectorize(&ElementwiseFn::add()).unwrap();

    ctx.shutdown();
    ctx.shutdown();

    assert!(matches!(ctx.upload(&host), Err(StagingError::ContextShutdown)));
    assert!(matches!(dev.download(), Err(StagingError::ContextShutdown)));
    assert!(matches!(
        add.call(&[Operand::from(&dev), Operand::from(&dev)]),
        Err(StagingError::ContextShutdown)
    ));

    // dropping buffers after shutdown is harmless
    drop(dev);
}

#[test]
fn dropping_buffers_returns_memory() {
    let ctx = DeviceContext::emulated(16 << 20).unwrap();
    let (x_dev, y_dev) = x_and_2x(&ctx);
    assert_eq!(ctx.memory_in_use().unwrap(), 2 * N as u64 * 8);

    drop(x_dev);
    drop(y_dev);
    assert_eq!(ctx.memory_in_use().unwrap(), 0);
}
