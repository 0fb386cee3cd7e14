// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Producer/consumer exchange between two devices in one process.

use std::time::Instant;

use anyhow::{Context as _, Result, anyhow, bail};
use texshare::{
    Generation, SessionConfig, SessionTexture, ShareSession, TextureFormat, TextureSharing,
};

use super::Context;

/// Parse `r,g,b,a` with every channel in `0.0..=1.0`.
pub fn parse_color(value: &str) -> std::result::Result<[f32; 4], String> {
    let channels = value
        .split(',')
        .map(|c| c.trim().parse::<f32>().map_err(|e| format!("'{}': {}", c, e)))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let color: [f32; 4] = channels
        .try_into()
        .map_err(|_| "expected four channels: r,g,b,a".to_string())?;
    if color.iter().any(|c| !(0.0..=1.0).contains(c)) {
        return Err("channels must be between 0.0 and 1.0".into());
    }
    Ok(color)
}

fn texel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn fill(
    session: &ShareSession,
    texture: &SessionTexture,
    texel: &[u8],
    color: [f32; 4],
) -> Result<()> {
    match session {
        ShareSession::Current(session) => {
            let texture = texture
                .as_current()
                .ok_or_else(|| anyhow!("expected a d3d11 texture"))?;
            session.device().clear_texture(texture, color)?;
        }
        ShareSession::Legacy(session) => {
            let texture = texture
                .as_legacy()
                .ok_or_else(|| anyhow!("expected a d3d9ex texture"))?;
            let device = session.device();
            let desc = texture.desc();
            let staging = device.create_staging_surface(desc.width, desc.height, desc.format)?;
            let pixels = texel.repeat(texel_count(desc.width, desc.height));
            device.write_surface(&staging, &pixels)?;
            device.write_to_texture(&staging, texture)?;
        }
    }
    Ok(())
}

fn read_back(session: &ShareSession, texture: &SessionTexture) -> Result<Vec<u8>> {
    match session {
        ShareSession::Current(session) => {
            let texture = texture
                .as_current()
                .ok_or_else(|| anyhow!("expected a d3d11 texture"))?;
            Ok(session.device().read_pixels(texture)?)
        }
        ShareSession::Legacy(session) => {
            let texture = texture
                .as_legacy()
                .ok_or_else(|| anyhow!("expected a d3d9ex texture"))?;
            let device = session.device();
            let desc = texture.desc();
            let staging = device.create_staging_surface(desc.width, desc.height, desc.format)?;
            device.write_to_surface(texture, &staging)?;
            Ok(device.read_surface(&staging)?)
        }
    }
}

pub fn run(
    ctx: &Context,
    generation: Generation,
    width: u32,
    height: u32,
    format: TextureFormat,
    color: [f32; 4],
) -> Result<()> {
    let directory = ctx.directory()?;
    let config = SessionConfig {
        generation,
        adapter: directory.current(),
        window: None,
        sync: ctx.config.sync_config(),
    };

    println!(
        "Self-test: {} {}x{} {} on adapter {} ({} driver)",
        generation,
        width,
        height,
        format,
        config.adapter,
        ctx.backend
    );

    let producer =
        ShareSession::open(&ctx.factory, &config).context("Failed to create producer device")?;
    let consumer =
        ShareSession::open(&ctx.factory, &config).context("Failed to create consumer device")?;

    let start = Instant::now();
    let (texture, handle) = producer
        .create_shared_texture(width, height, format)
        .context("Failed to create shared texture")?;
    println!("  handle  {}", handle);

    let texel = format.encode_color(color);
    fill(&producer, &texture, &texel, color)?;
    producer.synchronize().context("Producer sync failed")?;

    let opened = consumer
        .open_shared_texture(&texture.info())
        .context("Consumer failed to open the handle")?;
    let pixels = read_back(&consumer, &opened)?;
    let elapsed = start.elapsed();

    let mismatched = pixels
        .chunks_exact(texel.len())
        .filter(|p| *p != texel.as_slice())
        .count();

    let remaining = consumer.release_texture(opened) + producer.release_texture(texture);
    let leaked = consumer.release() + producer.release();
    if remaining > 0 || leaked > 0 {
        tracing::warn!(
            "{} texture and {} device reference(s) outlived the self-test",
            remaining,
            leaked
        );
    }

    let expected = texel.len() * texel_count(width, height);
    if pixels.len() != expected {
        bail!("read back {} bytes, expected {}", pixels.len(), expected);
    }
    if mismatched > 0 {
        bail!(
            "{} of {} pixels differ from the producer's color",
            mismatched,
            texel_count(width, height)
        );
    }

    println!("  OK      color round trip in {:.2?}", elapsed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("1, 0.5, 0, 1").unwrap(), [1.0, 0.5, 0.0, 1.0]);
        assert!(parse_color("1,0,0").is_err());
        assert!(parse_color("2,0,0,1").is_err());
        assert!(parse_color("red,0,0,1").is_err());
    }

    #[test]
    fn test_texel_count_does_not_wrap() {
        assert_eq!(texel_count(512, 512), 262_144);
        assert_eq!(texel_count(u32::MAX, 2), u32::MAX as usize * 2);
    }
}
