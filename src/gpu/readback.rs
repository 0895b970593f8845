// ============================================================================
// READBACK — copy a texture into a mapped staging buffer
// ============================================================================

use super::context::GpuContext;
use super::texture::GpuTexture;
use crate::error::{PipelineError, PipelineResult};

/// Row pitch padded to wgpu's 256-byte copy alignment.
pub fn aligned_bytes_per_row(width: u32, bytes_per_texel: u32) -> u32 {
    let unaligned = width * bytes_per_texel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unaligned.div_ceil(align) * align
}

/// Read the whole texture back as tightly packed texels.
///
/// Blocks until every previously submitted command has finished, so the
/// result reflects all draws queued before the call.
pub fn read_texture(ctx: &GpuContext, texture: &GpuTexture) -> PipelineResult<Vec<u8>> {
    if texture.sample_count > 1 {
        return Err(PipelineError::readback("multisampled textures must be resolved first"));
    }
    let device = &ctx.device;
    let (width, height) = texture.size();
    let bpp = texture.format.bytes_per_texel();
    let bytes_per_row = aligned_bytes_per_row(width, bpp);
    let buffer_size = (bytes_per_row * height) as u64;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size: buffer_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture: &texture.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    ctx.submit_one(encoder);

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.wait_idle();
    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(PipelineError::readback(format!("map failed: {e:?}"))),
        Err(e) => return Err(PipelineError::readback(format!("map callback dropped: {e}"))),
    }

    let mapped = slice.get_mapped_range();
    let tight = (width * bpp) as usize;
    let mut result = Vec::with_capacity(tight * height as usize);
    for row in 0..height as usize {
        let start = row * bytes_per_row as usize;
        result.extend_from_slice(&mapped[start..start + tight]);
    }
    drop(mapped);
    staging.unmap();

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_256_bytes() {
        assert_eq!(aligned_bytes_per_row(64, 4), 256);
        assert_eq!(aligned_bytes_per_row(65, 4), 512);
        assert_eq!(aligned_bytes_per_row(1, 8), 256);
        assert_eq!(aligned_bytes_per_row(128, 8), 1024);
    }
}
