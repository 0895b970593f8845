// ============================================================================
// PROGRAM ASSEMBLY — shader modules + render pipeline with named bindings
// ============================================================================
//
// A `Program` is the compiled descriptor a stage keeps for its whole life:
// the render pipeline, its bind group layout, and the binding slot of every
// named resource.  Slots are resolved once here and never looked up on the
// GPU side again.

use std::collections::HashMap;

use super::context::GpuContext;
use super::texture::TexelFormat;
use crate::error::{PipelineError, PipelineResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl ShaderKind {
    fn label(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum BindingKind {
    Uniform,
    Texture(wgpu::TextureSampleType),
    Sampler,
}

/// A named resource slot in bind group 0.  Slots are numbered in declaration
/// order.
#[derive(Clone, Copy, Debug)]
pub struct BindingDecl {
    pub name: &'static str,
    pub kind: BindingKind,
}

impl BindingDecl {
    pub const fn uniform(name: &'static str) -> Self {
        Self {
            name,
            kind: BindingKind::Uniform,
        }
    }

    pub fn texture(name: &'static str, format: TexelFormat) -> Self {
        Self {
            name,
            kind: BindingKind::Texture(format.sample_type()),
        }
    }

    pub const fn sampler(name: &'static str) -> Self {
        Self {
            name,
            kind: BindingKind::Sampler,
        }
    }

    fn layout_entry(&self, binding: u32) -> wgpu::BindGroupLayoutEntry {
        let ty = match self.kind {
            BindingKind::Uniform => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            BindingKind::Texture(sample_type) => wgpu::BindingType::Texture {
                sample_type,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            BindingKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        };
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty,
            count: None,
        }
    }
}

/// Source text plus entry point for one shader stage.
#[derive(Clone, Copy, Debug)]
pub struct ShaderSource<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub entry: &'a str,
}

pub struct ProgramSpec<'a> {
    pub label: &'a str,
    pub vertex: ShaderSource<'a>,
    pub fragment: ShaderSource<'a>,
    pub bindings: &'a [BindingDecl],
    pub vertex_buffers: &'a [wgpu::VertexBufferLayout<'a>],
    pub topology: wgpu::PrimitiveTopology,
    pub targets: &'a [Option<wgpu::ColorTargetState>],
    pub sample_count: u32,
}

pub struct Program {
    pub label: String,
    pub pipeline: wgpu::RenderPipeline,
    pub layout: wgpu::BindGroupLayout,
    locations: HashMap<&'static str, u32>,
}

impl Program {
    pub fn location(&self, name: &str) -> PipelineResult<u32> {
        self.locations
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::UnknownBinding {
                program: self.label.clone(),
                name: name.to_string(),
            })
    }

    /// Build a bind group from `(name, resource)` pairs.
    pub fn bind_group(
        &self,
        device: &wgpu::Device,
        resources: &[(&str, wgpu::BindingResource<'_>)],
    ) -> PipelineResult<wgpu::BindGroup> {
        let entries = resources
            .iter()
            .map(|(name, resource)| {
                Ok(wgpu::BindGroupEntry {
                    binding: self.location(name)?,
                    resource: resource.clone(),
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&self.label),
            layout: &self.layout,
            entries: &entries,
        }))
    }
}

/// Compile one shader stage.  Compilation errors carry the compiler output.
pub fn load_shader(ctx: &GpuContext, kind: ShaderKind, shader: &ShaderSource<'_>) -> PipelineResult<wgpu::ShaderModule> {
    let label = format!("{} ({})", shader.label, kind.label());
    ctx.scoped(
        || {
            Ok(ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(shader.source.into()),
            }))
        },
        |log| PipelineError::ShaderCompile {
            label: label.clone(),
            log,
        },
    )
}

/// Link a vertex + fragment module pair into a render pipeline.
pub fn create_shader_program(
    ctx: &GpuContext,
    spec: &ProgramSpec<'_>,
    vs: &wgpu::ShaderModule,
    fs: &wgpu::ShaderModule,
) -> PipelineResult<(wgpu::RenderPipeline, wgpu::BindGroupLayout)> {
    let entries: Vec<wgpu::BindGroupLayoutEntry> = spec
        .bindings
        .iter()
        .enumerate()
        .map(|(i, decl)| decl.layout_entry(i as u32))
        .collect();

    ctx.scoped(
        || {
            let layout = ctx.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(spec.label),
                entries: &entries,
            });
            let pipeline_layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(spec.label),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = ctx.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(spec.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: vs,
                    entry_point: spec.vertex.entry,
                    buffers: spec.vertex_buffers,
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: spec.topology,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: spec.sample_count,
                    ..Default::default()
                },
                fragment: Some(wgpu::FragmentState {
                    module: fs,
                    entry_point: spec.fragment.entry,
                    targets: spec.targets,
                    compilation_options: Default::default(),
                }),
                multiview: None,
            });
            Ok((pipeline, layout))
        },
        |log| PipelineError::ShaderLink {
            label: spec.label.to_string(),
            log,
        },
    )
}

/// Compile, link and resolve binding slots in one step.
pub fn assemble_program(ctx: &GpuContext, spec: &ProgramSpec<'_>) -> PipelineResult<Program> {
    let vs = load_shader(ctx, ShaderKind::Vertex, &spec.vertex)?;
    let fs = load_shader(ctx, ShaderKind::Fragment, &spec.fragment)?;
    let (pipeline, layout) = create_shader_program(ctx, spec, &vs, &fs)?;

    let locations = resolve_locations(spec.bindings)?;
    tracing::debug!(program = spec.label, bindings = locations.len(), "program assembled");

    Ok(Program {
        label: spec.label.to_string(),
        pipeline,
        layout,
        locations,
    })
}

fn resolve_locations(bindings: &[BindingDecl]) -> PipelineResult<HashMap<&'static str, u32>> {
    let mut locations = HashMap::with_capacity(bindings.len());
    for (i, decl) in bindings.iter().enumerate() {
        if locations.insert(decl.name, i as u32).is_some() {
            return Err(PipelineError::config(format!("duplicate binding name '{}'", decl.name)));
        }
    }
    Ok(locations)
}

// ============================================================================
// COMMON TARGET STATES
// ============================================================================

/// Plain replace — blending disabled.
pub fn replace_target(format: TexelFormat) -> Option<wgpu::ColorTargetState> {
    Some(wgpu::ColorTargetState {
        format: format.wgpu(),
        blend: None,
        write_mask: wgpu::ColorWrites::ALL,
    })
}

/// `dst = src + dst`.
pub fn additive_target(format: TexelFormat) -> Option<wgpu::ColorTargetState> {
    let add = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    };
    Some(wgpu::ColorTargetState {
        format: format.wgpu(),
        blend: Some(wgpu::BlendState { color: add, alpha: add }),
        write_mask: wgpu::ColorWrites::ALL,
    })
}

/// `dst = src * constant + dst * dst_factor`, with the constant supplied per
/// pass through `set_blend_constant`.
pub fn weighted_target(format: TexelFormat, dst_factor: wgpu::BlendFactor) -> Option<wgpu::ColorTargetState> {
    let weighted = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Constant,
        dst_factor,
        operation: wgpu::BlendOperation::Add,
    };
    Some(wgpu::ColorTargetState {
        format: format.wgpu(),
        blend: Some(wgpu::BlendState {
            color: weighted,
            alpha: weighted,
        }),
        write_mask: wgpu::ColorWrites::ALL,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_follow_declaration_order() {
        let decls = [
            BindingDecl::uniform("params"),
            BindingDecl::texture("source", TexelFormat::Rgba16F),
            BindingDecl::sampler("samp"),
        ];
        let locations = resolve_locations(&decls).unwrap();
        assert_eq!(locations["params"], 0);
        assert_eq!(locations["source"], 1);
        assert_eq!(locations["samp"], 2);
    }

    #[test]
    fn duplicate_binding_names_are_rejected() {
        let decls = [BindingDecl::uniform("u"), BindingDecl::uniform("u")];
        assert!(resolve_locations(&decls).is_err());
    }

    #[test]
    fn float_state_textures_bind_unfilterable() {
        let decl = BindingDecl::texture("geometry", TexelFormat::Rgba32F);
        match decl.kind {
            BindingKind::Texture(wgpu::TextureSampleType::Float { filterable }) => assert!(!filterable),
            other => panic!("unexpected binding kind {other:?}"),
        }
    }
}
