// ============================================================================
// RENDER TARGETS — framebuffers, stage outputs and ping-pong pairs
// ============================================================================
//
//   RenderTarget         — validated set of 1..8 color attachments
//   StageOutput          — named textures + the render target writing them
//   BufferedStageOutput  — two StageOutputs alternating by frame parity
//   MultisampleTarget    — MSAA color buffer resolved into a StageOutput texture

use super::context::GpuContext;
use super::texture::{self, FilterMode, GpuTexture, TexelFormat};
use crate::error::{PipelineError, PipelineResult};

/// Color outputs every device is guaranteed to accept.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// Per-sample byte budget across all color attachments of one target.
pub const MAX_TARGET_BYTES_PER_SAMPLE: u32 = 32;

/// A framebuffer: attachment metadata checked for completeness once, at
/// creation.  The textures themselves live in the owning `StageOutput`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderTarget {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    pub formats: Vec<TexelFormat>,
}

/// Attach `textures` at sequential color slots and verify the result is a
/// complete render target.
pub fn create_frame_buffer(label: &str, textures: &[&GpuTexture]) -> PipelineResult<RenderTarget> {
    if textures.len() > MAX_COLOR_ATTACHMENTS {
        return Err(PipelineError::InvalidAttachmentIndex {
            index: textures.len() - 1,
            max: MAX_COLOR_ATTACHMENTS,
        });
    }
    let first = textures
        .first()
        .ok_or_else(|| PipelineError::frame_buffer(label, "no color attachments"))?;

    for (slot, tex) in textures.iter().enumerate() {
        if tex.size() != first.size() {
            return Err(PipelineError::frame_buffer(
                label,
                format!(
                    "attachment {} is {}x{}, attachment 0 is {}x{}",
                    slot, tex.width, tex.height, first.width, first.height
                ),
            ));
        }
        if tex.sample_count != first.sample_count {
            return Err(PipelineError::frame_buffer(
                label,
                format!("attachment {slot} has mismatched sample count {}", tex.sample_count),
            ));
        }
    }

    let bytes = attachment_bytes(textures.iter().map(|t| t.format));
    if bytes > MAX_TARGET_BYTES_PER_SAMPLE {
        return Err(PipelineError::frame_buffer(
            label,
            format!("{bytes} bytes per sample exceeds the {MAX_TARGET_BYTES_PER_SAMPLE}-byte limit"),
        ));
    }

    Ok(RenderTarget {
        label: label.to_string(),
        width: first.width,
        height: first.height,
        sample_count: first.sample_count,
        formats: textures.iter().map(|t| t.format).collect(),
    })
}

/// Aligned per-sample byte cost of a list of attachment formats.
pub fn attachment_bytes(formats: impl Iterator<Item = TexelFormat>) -> u32 {
    formats.fold(0, |offset, format| {
        let (cost, align) = format.target_cost();
        offset.div_ceil(align) * align + cost
    })
}

// ============================================================================
// STAGE OUTPUT
// ============================================================================

pub struct StageOutput {
    pub name: String,
    pub textures: Vec<GpuTexture>,
    pub target: RenderTarget,
}

impl StageOutput {
    /// Allocate one texture per `(format, filter)` pair at the given size and
    /// bind them all to a single render target.
    pub fn new(
        ctx: &GpuContext,
        name: &str,
        width: u32,
        height: u32,
        layout: &[(TexelFormat, FilterMode)],
    ) -> PipelineResult<Self> {
        let textures = layout
            .iter()
            .enumerate()
            .map(|(i, &(format, filter))| {
                texture::create_texture(ctx, &format!("{name}[{i}]"), width, height, format, filter)
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        let refs: Vec<&GpuTexture> = textures.iter().collect();
        let target = create_frame_buffer(name, &refs)?;
        Ok(Self {
            name: name.to_string(),
            textures,
            target,
        })
    }

    pub fn width(&self) -> u32 {
        self.target.width
    }

    pub fn height(&self) -> u32 {
        self.target.height
    }

    pub fn texture(&self, slot: usize) -> &GpuTexture {
        &self.textures[slot]
    }

    /// Color attachments for every texture, loading or clearing as requested.
    pub fn attachments(&self, load: &[wgpu::LoadOp<wgpu::Color>]) -> Vec<Option<wgpu::RenderPassColorAttachment<'_>>> {
        self.textures
            .iter()
            .enumerate()
            .map(|(i, tex)| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &tex.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: load.get(i).copied().unwrap_or(wgpu::LoadOp::Load),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect()
    }

    /// Clear every attachment to the matching color (missing entries clear to
    /// transparent black).
    pub fn clear(&self, encoder: &mut wgpu::CommandEncoder, colors: &[wgpu::Color]) {
        let load: Vec<wgpu::LoadOp<wgpu::Color>> = (0..self.textures.len())
            .map(|i| wgpu::LoadOp::Clear(colors.get(i).copied().unwrap_or(wgpu::Color::TRANSPARENT)))
            .collect();
        let attachments = self.attachments(&load);
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("stage_output_clear"),
            color_attachments: &attachments,
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    pub fn destroy(self) {
        tracing::debug!(output = %self.name, "releasing stage output");
        for tex in self.textures {
            tex.destroy();
        }
    }
}

// ============================================================================
// PING-PONG
// ============================================================================

/// `(read, write)` slot indices for a frame counter.  The two always differ
/// and swap every tick.
pub fn ping_pong_indices(frame: u64) -> (usize, usize) {
    let read = (frame % 2) as usize;
    let write = ((frame + 1) % 2) as usize;
    (read, write)
}

/// Two equivalent outputs used in alternation so a pass can read last tick's
/// result while writing this tick's.
pub struct BufferedStageOutput {
    slots: [StageOutput; 2],
    /// Slot holding the most recently written result.
    current: usize,
}

impl BufferedStageOutput {
    pub fn new(
        ctx: &GpuContext,
        name: &str,
        width: u32,
        height: u32,
        layout: &[(TexelFormat, FilterMode)],
    ) -> PipelineResult<Self> {
        let a = StageOutput::new(ctx, &format!("{name}/0"), width, height, layout)?;
        let b = StageOutput::new(ctx, &format!("{name}/1"), width, height, layout)?;
        Ok(Self {
            slots: [a, b],
            current: 0,
        })
    }

    pub fn slot(&self, index: usize) -> &StageOutput {
        &self.slots[index]
    }

    pub fn read(&self, frame: u64) -> &StageOutput {
        &self.slots[ping_pong_indices(frame).0]
    }

    pub fn write(&self, frame: u64) -> &StageOutput {
        &self.slots[ping_pong_indices(frame).1]
    }

    /// Record that `frame`'s write slot now holds the latest result.
    pub fn mark_written(&mut self, frame: u64) {
        self.current = ping_pong_indices(frame).1;
    }

    pub fn current(&self) -> &StageOutput {
        &self.slots[self.current]
    }

    pub fn width(&self) -> u32 {
        self.slots[0].width()
    }

    pub fn height(&self) -> u32 {
        self.slots[0].height()
    }

    pub fn clear_all(&self, encoder: &mut wgpu::CommandEncoder, colors: &[wgpu::Color]) {
        for slot in &self.slots {
            slot.clear(encoder, colors);
        }
    }

    pub fn destroy(self) {
        let [a, b] = self.slots;
        a.destroy();
        b.destroy();
    }
}

// ============================================================================
// MULTISAMPLE TARGET
// ============================================================================

/// Multisampled color buffer that resolves into a single-sample texture.
pub struct MultisampleTarget {
    pub sample_count: u32,
    pub format: TexelFormat,
    pub buffer: GpuTexture,
}

impl MultisampleTarget {
    pub fn new(
        ctx: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        format: TexelFormat,
        sample_count: u32,
    ) -> PipelineResult<Self> {
        if !format.is_blendable() {
            return Err(PipelineError::resource(label, format!("{:?} cannot be multisampled", format)));
        }
        let buffer = texture::create_multisample_texture(ctx, label, width, height, format, sample_count)?;
        create_frame_buffer(label, &[&buffer])?;
        Ok(Self {
            sample_count,
            format,
            buffer,
        })
    }

    /// Attachment that renders multisampled and resolves into `resolve`.
    pub fn attachment<'a>(&'a self, resolve: &'a GpuTexture, load: wgpu::LoadOp<wgpu::Color>) -> wgpu::RenderPassColorAttachment<'a> {
        wgpu::RenderPassColorAttachment {
            view: &self.buffer.view,
            resolve_target: Some(&resolve.view),
            ops: wgpu::Operations {
                load,
                // The multisampled contents are not needed after the resolve.
                store: wgpu::StoreOp::Discard,
            },
        }
    }

    pub fn destroy(self) {
        self.buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_slots_alternate() {
        for frame in 0..64u64 {
            let (read, write) = ping_pong_indices(frame);
            assert_ne!(read, write);
            assert_eq!(read + write, 1);
            let (next_read, _) = ping_pong_indices(frame + 1);
            assert_eq!(next_read, write);
        }
    }

    #[test]
    fn attachment_budget_counts_alignment() {
        // Simulation state: positions + color + properties.
        let sim = [TexelFormat::Rgba32F, TexelFormat::Rgba16F, TexelFormat::Rgba16F];
        assert_eq!(attachment_bytes(sim.into_iter()), 32);
        // Trail color + timestamp.
        let trail = [TexelFormat::Rgba16F, TexelFormat::R32F];
        assert_eq!(attachment_bytes(trail.into_iter()), 12);
        // R32F after an odd offset is pushed to 4-byte alignment.
        let mixed = [TexelFormat::Rgba8, TexelFormat::R32F, TexelFormat::Rgba32F];
        assert_eq!(attachment_bytes(mixed.into_iter()), 28);
        let too_big = [TexelFormat::Rgba32F, TexelFormat::Rgba32F, TexelFormat::Rgba16F];
        assert!(attachment_bytes(too_big.into_iter()) > MAX_TARGET_BYTES_PER_SAMPLE);
    }
}
