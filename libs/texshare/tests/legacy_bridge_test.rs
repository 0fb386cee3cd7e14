// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Generation-1 sharing between two legacy devices, and the generation
//! boundary.

use std::sync::Arc;

use texshare::{
    AdapterSelection, DeviceFactory, Generation, SessionConfig, SessionTexture, ShareError,
    ShareSession, SoftAdapterSpec, SoftwareDriver, TextureFormat, TextureSharing, vendor,
};

fn process() -> DeviceFactory {
    DeviceFactory::new(Arc::new(SoftwareDriver::with_adapters(vec![
        SoftAdapterSpec::hardware("GeForce Test", vendor::NVIDIA),
        SoftAdapterSpec::hardware("Arc Test", vendor::INTEL).without_legacy_ex(),
    ])))
}

#[test]
fn test_legacy_producer_to_legacy_consumer() {
    let producer = process()
        .create_legacy_device(AdapterSelection::Index(0), None)
        .unwrap();
    let consumer = process()
        .create_legacy_device(AdapterSelection::Index(0), None)
        .unwrap();

    let (texture, _surface, _handle) = producer
        .create_shared_texture(8, 4, TextureFormat::Bgra8Unorm)
        .unwrap();
    let upload = producer
        .create_staging_surface(8, 4, TextureFormat::Bgra8Unorm)
        .unwrap();
    let pixels: Vec<u8> = (0..128).map(|i| i as u8).collect();
    producer.write_surface(&upload, &pixels).unwrap();
    producer.write_to_texture(&upload, &texture).unwrap();

    let opened = consumer.open_shared_texture(&texture.info()).unwrap();
    let download = consumer
        .create_staging_surface(8, 4, TextureFormat::Bgra8Unorm)
        .unwrap();
    consumer.write_to_surface(&opened, &download).unwrap();
    assert_eq!(consumer.read_surface(&download).unwrap(), pixels);
}

#[test]
fn test_legacy_producer_release_keeps_consumer_import_readable() {
    let producer = process()
        .create_legacy_device(AdapterSelection::Index(0), None)
        .unwrap();
    let consumer = process()
        .create_legacy_device(AdapterSelection::Index(0), None)
        .unwrap();

    let (texture, surface, _handle) = producer
        .create_shared_texture(4, 4, TextureFormat::Bgra8Unorm)
        .unwrap();
    let upload = producer
        .create_staging_surface(4, 4, TextureFormat::Bgra8Unorm)
        .unwrap();
    let pixels: Vec<u8> = (0..64).collect();
    producer.write_surface(&upload, &pixels).unwrap();
    producer.write_to_texture(&upload, &texture).unwrap();
    let opened = consumer.open_shared_texture(&texture.info()).unwrap();

    drop(upload);
    drop(surface);
    assert_eq!(producer.release_texture(texture), 0);
    assert_eq!(producer.release(), 0);

    let download = consumer
        .create_staging_surface(4, 4, TextureFormat::Bgra8Unorm)
        .unwrap();
    consumer.write_to_surface(&opened, &download).unwrap();
    assert_eq!(consumer.read_surface(&download).unwrap(), pixels);
}

#[test]
fn test_legacy_open_with_wrong_description_fails() {
    let producer = process()
        .create_legacy_device(AdapterSelection::Index(0), None)
        .unwrap();
    let consumer = process()
        .create_legacy_device(AdapterSelection::Index(0), None)
        .unwrap();

    let (texture, _surface, _handle) = producer
        .create_shared_texture(8, 4, TextureFormat::Bgra8Unorm)
        .unwrap();
    let mut info = texture.info();
    info.width = 16;
    assert!(consumer.open_shared_texture(&info).is_err());
}

#[test]
fn test_adapter_without_extended_interface_is_fatal() {
    let err = process()
        .create_legacy_device(AdapterSelection::Index(1), None)
        .unwrap_err();
    assert!(matches!(err, ShareError::LegacyExUnavailable(_)));
    assert!(!err.is_retryable());
}

#[test]
fn test_handles_do_not_cross_generations() {
    let legacy = ShareSession::open(
        &process(),
        &SessionConfig {
            generation: Generation::Legacy,
            adapter: AdapterSelection::Index(0),
            ..Default::default()
        },
    )
    .unwrap();
    let current = ShareSession::open(
        &process(),
        &SessionConfig {
            generation: Generation::Current,
            adapter: AdapterSelection::Index(0),
            ..Default::default()
        },
    )
    .unwrap();

    let (legacy_texture, _) = legacy
        .create_shared_texture(4, 4, TextureFormat::Bgra8Unorm)
        .unwrap();
    let (current_texture, _) = current
        .create_shared_texture(4, 4, TextureFormat::Bgra8Unorm)
        .unwrap();

    assert!(matches!(
        current.open_shared_texture(&legacy_texture.info()),
        Err(ShareError::GenerationMismatch {
            handle: Generation::Legacy,
            device: Generation::Current,
        })
    ));
    assert!(matches!(
        legacy.open_shared_texture(&current_texture.info()),
        Err(ShareError::GenerationMismatch {
            handle: Generation::Current,
            device: Generation::Legacy,
        })
    ));
}

/// Same exchange written once against the capability trait.
fn exchange<S: TextureSharing>(producer: &S, consumer: &S) -> SessionTexture {
    let (texture, _handle) = producer
        .create_shared_texture(32, 32, TextureFormat::Bgrx8Unorm)
        .unwrap();
    producer.synchronize().unwrap();
    let opened = consumer.open_shared_texture(&texture.info()).unwrap();
    assert_eq!(opened.desc(), texture.desc());
    assert_eq!(opened.generation(), producer.generation());
    assert_eq!(producer.release_texture(texture), 0);
    opened
}

#[test]
fn test_exchange_is_generation_agnostic() {
    for generation in [Generation::Legacy, Generation::Current] {
        let config = SessionConfig {
            generation,
            adapter: AdapterSelection::Index(0),
            ..Default::default()
        };
        let producer = ShareSession::open(&process(), &config).unwrap();
        let consumer = ShareSession::open(&process(), &config).unwrap();

        let opened = exchange(&producer, &consumer);
        assert_eq!(consumer.release_texture(opened), 0);
        assert_eq!(producer.release(), 0);
        assert_eq!(consumer.release(), 0);
    }
}
