// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Cross-process exchange over the software driver.
//!
//! Two `SoftwareDriver` instances built from the same adapter specs stand in
//! for two processes: they see the same LUIDs and the same share table.

use std::sync::Arc;
use std::time::{Duration, Instant};

use texshare::{
    AdapterSelection, DeviceFactory, Diagnostics, ErrorKind, MemorySink, Operation, ShareError,
    ShareHandle, SoftAdapterSpec, SoftwareDriver, SyncConfig, SyncGate, TextureFormat, vendor,
};

// =============================================================================
// Helpers
// =============================================================================

fn specs() -> Vec<SoftAdapterSpec> {
    vec![
        SoftAdapterSpec::hardware("GeForce Test", vendor::NVIDIA).with_output(r"\\.\DISPLAY1"),
        SoftAdapterSpec::hardware("Radeon Test", vendor::AMD),
    ]
}

/// One "process": its own driver instance over the shared adapter layout.
fn process() -> DeviceFactory {
    DeviceFactory::new(Arc::new(SoftwareDriver::with_adapters(specs())))
}

fn process_with_latency(latency: Duration) -> DeviceFactory {
    let specs = specs().into_iter().map(|s| s.with_latency(latency)).collect();
    DeviceFactory::new(Arc::new(SoftwareDriver::with_adapters(specs)))
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_end_to_end_exchange_on_same_adapter() {
    let producer = process().create_device(AdapterSelection::Index(0)).unwrap();
    let consumer = process().create_device(AdapterSelection::Index(0)).unwrap();
    let gate = SyncGate::default();

    let (texture, handle) = producer
        .create_shared_texture(512, 512, TextureFormat::Bgra8Unorm)
        .unwrap();
    producer.clear_texture(&texture, [1.0, 0.0, 0.0, 1.0]).unwrap();
    gate.flush_and_wait(&producer).unwrap();

    // Out-of-band publication as text.
    let published = handle.to_string();
    let received: ShareHandle = published.parse().unwrap();

    let opened = consumer.open_shared_texture(&received).unwrap();
    assert_eq!(opened.width(), 512);
    assert_eq!(opened.height(), 512);
    assert_eq!(opened.format(), TextureFormat::Bgra8Unorm);
    assert!(opened.is_imported());

    let pixels = consumer.read_pixels(&opened).unwrap();
    assert_eq!(pixels.len(), 512 * 512 * 4);
    assert!(pixels.chunks_exact(4).all(|p| p == [0x00, 0x00, 0xff, 0xff]));
}

#[test]
fn test_consumer_writes_are_visible_to_producer() {
    let producer = process().create_device(AdapterSelection::Index(0)).unwrap();
    let consumer = process().create_device(AdapterSelection::Index(0)).unwrap();
    let gate = SyncGate::default();

    let (texture, handle) = producer
        .create_shared_texture(4, 4, TextureFormat::Rgba8Unorm)
        .unwrap();
    let opened = consumer.open_shared_texture(&handle).unwrap();

    let pixels: Vec<u8> = (0..64).collect();
    consumer.write_pixels(&opened, &pixels).unwrap();
    gate.flush_and_wait(&consumer).unwrap();

    assert_eq!(producer.read_pixels(&texture).unwrap(), pixels);
}

#[test]
fn test_importer_on_other_adapter_gets_adapter_mismatch() {
    let producer = process().create_device(AdapterSelection::Index(0)).unwrap();
    let consumer = process().create_device(AdapterSelection::Index(1)).unwrap();

    let (_texture, handle) = producer
        .create_shared_texture(512, 512, TextureFormat::Bgra8Unorm)
        .unwrap();

    let err = consumer.open_shared_texture(&handle).unwrap_err();
    assert!(matches!(err, ShareError::AdapterMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::CrossProcess);
    assert!(!err.is_retryable());
}

#[test]
fn test_handle_goes_stale_after_every_owner_releases() {
    let producer = process().create_device(AdapterSelection::Index(0)).unwrap();
    let consumer = process().create_device(AdapterSelection::Index(0)).unwrap();

    let (texture, handle) = producer
        .create_shared_texture(16, 16, TextureFormat::Bgra8Unorm)
        .unwrap();
    let opened = consumer.open_shared_texture(&handle).unwrap();

    // The producer lets go; the consumer still holds the memory.
    assert_eq!(producer.release_texture(texture), 0);
    let second = consumer.open_shared_texture(&handle).unwrap();
    assert_eq!(consumer.release_texture(second), 0);

    assert_eq!(consumer.release_texture(opened), 0);
    let err = consumer.open_shared_texture(&handle).unwrap_err();
    assert!(matches!(err, ShareError::StaleHandle { .. }));
    assert!(err.is_retryable());
}

#[test]
fn test_refcounted_teardown() {
    let device = process().create_device(AdapterSelection::Index(0)).unwrap();
    let (texture, _handle) = device
        .create_shared_texture(8, 8, TextureFormat::Bgra8Unorm)
        .unwrap();

    let extra = texture.clone();
    assert_eq!(texture.ref_count(), 2);
    assert_eq!(device.release_texture(extra), 1);
    assert_eq!(device.release_texture(texture), 0);
    assert_eq!(device.release(), 0);
}

#[test]
fn test_device_release_reports_leaked_textures() {
    let sink = Arc::new(MemorySink::new());
    let device = process()
        .with_diagnostics(Diagnostics::new(sink.clone()))
        .create_device(AdapterSelection::Index(0))
        .unwrap();
    let (texture, _handle) = device
        .create_shared_texture(8, 8, TextureFormat::Bgra8Unorm)
        .unwrap();

    assert_eq!(device.release(), 1);
    assert_eq!(sink.count_for(Operation::ReleaseDevice), 1);
    let event = sink.last().unwrap();
    assert_eq!(event.kind, ErrorKind::Resource);
    assert!(event.reason.contains('1'));

    // The leaked texture keeps the device state alive until it goes.
    assert_eq!(texture.width(), 8);
    drop(texture);
}

#[test]
fn test_producer_release_keeps_consumer_import_readable() {
    let producer = process().create_device(AdapterSelection::Index(0)).unwrap();
    let consumer = process().create_device(AdapterSelection::Index(0)).unwrap();
    let gate = SyncGate::default();

    let (texture, handle) = producer
        .create_shared_texture(4, 4, TextureFormat::Bgra8Unorm)
        .unwrap();
    producer.clear_texture(&texture, [1.0, 0.0, 0.0, 1.0]).unwrap();
    gate.flush_and_wait(&producer).unwrap();
    let opened = consumer.open_shared_texture(&handle).unwrap();

    assert_eq!(producer.release_texture(texture), 0);
    assert_eq!(producer.release(), 0);

    let pixels = consumer.read_pixels(&opened).unwrap();
    assert_eq!(pixels.len(), 4 * 4 * 4);
    assert!(pixels.chunks_exact(4).all(|p| p == [0x00, 0x00, 0xff, 0xff]));

    // The consumer can still write and read back on its own.
    let written: Vec<u8> = (0..64).collect();
    consumer.write_pixels(&opened, &written).unwrap();
    gate.flush_and_wait(&consumer).unwrap();
    assert_eq!(consumer.read_pixels(&opened).unwrap(), written);
    assert_eq!(consumer.release_texture(opened), 0);
}

#[test]
fn test_flush_and_wait_is_bounded() {
    let device = process_with_latency(Duration::from_millis(5))
        .create_device(AdapterSelection::Index(0))
        .unwrap();
    let gate = SyncGate::new(SyncConfig {
        timeout: Duration::from_millis(500),
        poll_interval: Duration::from_micros(100),
    });

    let (texture, _handle) = device
        .create_shared_texture(64, 64, TextureFormat::Bgra8Unorm)
        .unwrap();
    device.clear_texture(&texture, [0.0, 1.0, 0.0, 1.0]).unwrap();

    let start = Instant::now();
    gate.flush_and_wait(&device).unwrap();
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_wait_timeout_is_device_lost() {
    let device = process_with_latency(Duration::from_millis(300))
        .create_device(AdapterSelection::Index(0))
        .unwrap();
    let gate = SyncGate::new(SyncConfig {
        timeout: Duration::from_millis(20),
        poll_interval: Duration::ZERO,
    });

    let (texture, _handle) = device
        .create_shared_texture(4, 4, TextureFormat::Bgra8Unorm)
        .unwrap();
    device.clear_texture(&texture, [0.0, 0.0, 1.0, 1.0]).unwrap();

    let err = gate.flush_and_wait(&device).unwrap_err();
    assert!(matches!(err, ShareError::SyncTimeout { .. }));
    assert!(err.is_device_lost());
}

#[test]
fn test_handles_are_unique_per_texture() {
    let device = process().create_device(AdapterSelection::Index(0)).unwrap();
    let (_a, first) = device
        .create_shared_texture(4, 4, TextureFormat::Bgra8Unorm)
        .unwrap();
    let (_b, second) = device
        .create_shared_texture(4, 4, TextureFormat::Bgra8Unorm)
        .unwrap();
    assert_ne!(first.raw(), second.raw());
    assert_eq!(first.adapter(), second.adapter());
}
