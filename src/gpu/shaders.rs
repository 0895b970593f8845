// ============================================================================
// GPU SHADERS — all WGSL code kept inline for containment
// ============================================================================
//
// Uniform structs avoid vec3 members so their layout matches the
// `#[repr(C)]` Rust mirrors in each stage byte for byte.

// ============================================================================
// FULLSCREEN QUAD — shared vertex stage for every image-space pass
// ============================================================================
//
// Six vertices, two triangles covering clip space.  `uv` has (0,0) at the top
// left texel so render-to-texture and sampling agree on orientation.
pub const FULLSCREEN_VS: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_fullscreen(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>( 1.0, -1.0),
        vec2<f32>(-1.0,  1.0),
        vec2<f32>(-1.0,  1.0),
        vec2<f32>( 1.0, -1.0),
        vec2<f32>( 1.0,  1.0),
    );
    let p = positions[vi];

    var out: VertexOutput;
    out.position = vec4<f32>(p, 0.0, 1.0);
    out.uv = vec2<f32>(p.x * 0.5 + 0.5, 0.5 - p.y * 0.5);
    return out;
}
"#;

// ============================================================================
// SIMULATE — per-particle update, one texel per particle
// ============================================================================
//
// Reads last tick's state through textureLoad (float32 state is not
// filterable) and writes the next state to three attachments:
//   0: geometry  (pos.x, pos.y, drift.x, drift.y)
//   1: color     (rgb premultiplied by the life envelope, envelope)
//   2: props     (angle, radius, age, lifetime)
// A texel whose lifetime has run out (including all-zero initial state) is
// respawned from a hash of its index and the frame counter.
pub const SIMULATE_FS: &str = r#"
struct SimParams {
    time: f32,
    delta: f32,
    frame: u32,
    particle_count: u32,
    state_width: u32,
    noise_scale: f32,
    noise_speed: f32,
    drift: f32,
    spin: f32,
    spawn_radius: f32,
    lifetime_min: f32,
    lifetime_max: f32,
    palette_a: vec4<f32>,
    palette_b: vec4<f32>,
    palette_c: vec4<f32>,
    palette_d: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: SimParams;
@group(0) @binding(1) var geometry_tex: texture_2d<f32>;
@group(0) @binding(2) var color_tex: texture_2d<f32>;
@group(0) @binding(3) var props_tex: texture_2d<f32>;

struct FragIn {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

struct SimOut {
    @location(0) geometry: vec4<f32>,
    @location(1) color: vec4<f32>,
    @location(2) props: vec4<f32>,
};

const TAU: f32 = 6.283185307;

fn hash_u32(seed: u32) -> u32 {
    var x = seed;
    x ^= x >> 16u;
    x *= 0x7feb352du;
    x ^= x >> 15u;
    x *= 0x846ca68bu;
    x ^= x >> 16u;
    return x;
}

fn rand(seed: u32) -> f32 {
    return f32(hash_u32(seed)) / 4294967295.0;
}

fn palette(t: f32) -> vec3<f32> {
    return params.palette_a.xyz
        + params.palette_b.xyz * cos(TAU * (params.palette_c.xyz * t + params.palette_d.xyz));
}

fn flow(p: vec2<f32>, t: f32) -> vec2<f32> {
    let a = sin(p.x * 1.7 + t) + sin(p.y * 2.3 - t * 0.7);
    let b = cos(p.y * 1.3 - t * 1.1) + cos(p.x * 2.9 + t * 0.5);
    return vec2<f32>(a, b) * 0.5;
}

@fragment
fn fs_simulate(in: FragIn) -> SimOut {
    let texel = vec2<i32>(in.position.xy);
    let index = u32(texel.y) * params.state_width + u32(texel.x);

    var out: SimOut;
    if (index >= params.particle_count) {
        out.geometry = vec4<f32>(0.0);
        out.color = vec4<f32>(0.0);
        out.props = vec4<f32>(0.0);
        return out;
    }

    let geometry = textureLoad(geometry_tex, texel, 0);
    let props = textureLoad(props_tex, texel, 0);

    var angle = props.x;
    var radius = props.y;
    var age = props.z;
    var lifetime = props.w;
    var offset = geometry.zw;

    if (age >= lifetime) {
        let seed = index * 4u + params.frame * 1664525u;
        let fresh = lifetime <= 0.0;
        angle = rand(seed) * TAU;
        radius = sqrt(rand(seed + 1u)) * params.spawn_radius;
        lifetime = mix(params.lifetime_min, params.lifetime_max, rand(seed + 2u));
        // Stagger the very first generation so particles do not die in lockstep.
        age = select(0.0, rand(seed + 3u) * lifetime, fresh);
        offset = vec2<f32>(0.0);
    } else {
        age = age + params.delta;
        angle = angle + params.spin * params.delta / (0.2 + radius);
        radius = max(radius + params.drift * params.delta, 0.0);
    }

    let orbit = vec2<f32>(cos(angle), sin(angle)) * radius;
    let n = flow(orbit * params.noise_scale, params.time * params.noise_speed);
    offset = offset + n * params.delta * 0.3;

    let life = clamp(age / max(lifetime, 1e-4), 0.0, 1.0);
    let envelope = smoothstep(0.0, 0.1, life) * (1.0 - smoothstep(0.7, 1.0, life));
    let hue = fract(rand(index * 7u + 3u) + life * 0.25 + params.time * 0.02);

    out.geometry = vec4<f32>(orbit + offset, offset);
    out.color = vec4<f32>(palette(hue) * envelope, envelope);
    out.props = vec4<f32>(angle, radius, age, lifetime);
    return out;
}
"#;

// ============================================================================
// MATERIALIZE — rasterize particles as points
// ============================================================================
//
// Vertex input is the particle index; position and color come from the
// simulate state textures.  `fs_points` writes color and timestamp together
// (single-sample path).  The multisampled path splits them: `fs_color` into
// the MSAA buffer, `fs_stamp` straight into the timestamp texture.
pub const MATERIALIZE_SHADER: &str = r#"
struct MaterializeParams {
    time: f32,
    aspect: f32,
    brightness: f32,
    scale: f32,
    particle_count: u32,
    state_width: u32,
    _pad0: u32,
    _pad1: u32,
};

@group(0) @binding(0) var<uniform> params: MaterializeParams;
@group(0) @binding(1) var geometry_tex: texture_2d<f32>;
@group(0) @binding(2) var color_tex: texture_2d<f32>;
@group(0) @binding(3) var props_tex: texture_2d<f32>;

struct PointOut {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
};

struct MaterializeOut {
    @location(0) color: vec4<f32>,
    @location(1) stamp: vec4<f32>,
};

@vertex
fn vs_points(@location(0) index: u32) -> PointOut {
    let texel = vec2<i32>(i32(index % params.state_width), i32(index / params.state_width));
    let geometry = textureLoad(geometry_tex, texel, 0);
    let color = textureLoad(color_tex, texel, 0);
    let props = textureLoad(props_tex, texel, 0);

    var out: PointOut;
    let pos = geometry.xy * params.scale * vec2<f32>(params.aspect, 1.0);
    out.position = vec4<f32>(pos, 0.0, 1.0);
    if (index >= params.particle_count || props.w <= 0.0) {
        // Outside the clip volume: dropped before rasterization.
        out.position = vec4<f32>(2.0, 2.0, 2.0, 1.0);
    }
    out.color = vec4<f32>(color.rgb * params.brightness, color.a);
    return out;
}

@fragment
fn fs_points(in: PointOut) -> MaterializeOut {
    var out: MaterializeOut;
    out.color = in.color;
    out.stamp = vec4<f32>(params.time, 0.0, 0.0, 0.0);
    return out;
}

@fragment
fn fs_color(in: PointOut) -> @location(0) vec4<f32> {
    return in.color;
}

@fragment
fn fs_stamp(in: PointOut) -> @location(0) vec4<f32> {
    return vec4<f32>(params.time, 0.0, 0.0, 0.0);
}
"#;

// ============================================================================
// ACCUMULATE — persistent trail buffer with timed fade
// ============================================================================
//
// A pixel the materialize pass touched this tick (stamp >= 0, the pass clears
// to -1) takes the fresh color and stamp.  Otherwise the previous color decays
// by exp(-FADE_RATE * delta / fade_time) and drops to zero once its age
// reaches fade_time.
pub const ACCUMULATE_FS: &str = r#"
struct AccumulateParams {
    time: f32,
    delta: f32,
    fade_time: f32,
    enabled: u32,
};

@group(0) @binding(0) var<uniform> params: AccumulateParams;
@group(0) @binding(1) var prev_color: texture_2d<f32>;
@group(0) @binding(2) var prev_stamp: texture_2d<f32>;
@group(0) @binding(3) var fresh_color: texture_2d<f32>;
@group(0) @binding(4) var fresh_stamp: texture_2d<f32>;

struct FragIn {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

struct AccumulateOut {
    @location(0) color: vec4<f32>,
    @location(1) stamp: vec4<f32>,
};

const FADE_RATE: f32 = 5.0;

fn fade_factor(age: f32, delta: f32, fade_time: f32) -> f32 {
    if (fade_time <= 0.0 || age >= fade_time) {
        return 0.0;
    }
    return exp(-FADE_RATE * delta / fade_time);
}

@fragment
fn fs_accumulate(in: FragIn) -> AccumulateOut {
    let texel = vec2<i32>(in.position.xy);
    let color = textureLoad(fresh_color, texel, 0);
    let stamp = textureLoad(fresh_stamp, texel, 0).r;

    var out: AccumulateOut;
    if (params.enabled == 0u || stamp >= 0.0) {
        out.color = color;
        out.stamp = vec4<f32>(stamp, 0.0, 0.0, 0.0);
        return out;
    }

    let last = textureLoad(prev_stamp, texel, 0).r;
    let age = params.time - last;
    out.color = textureLoad(prev_color, texel, 0) * fade_factor(age, params.delta, params.fade_time);
    out.stamp = vec4<f32>(last, 0.0, 0.0, 0.0);
    return out;
}
"#;

// ============================================================================
// LUMA — brightness threshold
// ============================================================================
pub const LUMA_FS: &str = r#"
struct LumaParams {
    threshold: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

@group(0) @binding(0) var<uniform> params: LumaParams;
@group(0) @binding(1) var source: texture_2d<f32>;
@group(0) @binding(2) var samp: sampler;

struct FragIn {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@fragment
fn fs_luma(in: FragIn) -> @location(0) vec4<f32> {
    let color = textureSample(source, samp, in.uv);
    let luma = dot(color.rgb, vec3<f32>(0.2126, 0.7152, 0.0722));
    if (luma >= params.threshold) {
        return color;
    }
    return vec4<f32>(0.0);
}
"#;

// ============================================================================
// BLOOM — downsample, separable blur, weighted copy
// ============================================================================

/// Tent filter: four bilinear taps half a source texel from the center,
/// covering a 4x4 source footprint.
pub const DOWNSAMPLE_FS: &str = r#"
struct DownsampleParams {
    source_texel: vec2<f32>,
    _pad0: f32,
    _pad1: f32,
};

@group(0) @binding(0) var<uniform> params: DownsampleParams;
@group(0) @binding(1) var source: texture_2d<f32>;
@group(0) @binding(2) var samp: sampler;

struct FragIn {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@fragment
fn fs_downsample(in: FragIn) -> @location(0) vec4<f32> {
    let d = params.source_texel;
    var sum = textureSample(source, samp, in.uv + vec2<f32>(-d.x, -d.y));
    sum += textureSample(source, samp, in.uv + vec2<f32>( d.x, -d.y));
    sum += textureSample(source, samp, in.uv + vec2<f32>(-d.x,  d.y));
    sum += textureSample(source, samp, in.uv + vec2<f32>( d.x,  d.y));
    return sum * 0.25;
}
"#;

/// 9-tap Gaussian along `direction`; `radius` stretches the tap spacing.
pub const BLUR_FS: &str = r#"
struct BlurParams {
    texel: vec2<f32>,
    direction: vec2<f32>,
    radius: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

@group(0) @binding(0) var<uniform> params: BlurParams;
@group(0) @binding(1) var source: texture_2d<f32>;
@group(0) @binding(2) var samp: sampler;

struct FragIn {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@fragment
fn fs_blur(in: FragIn) -> @location(0) vec4<f32> {
    var weights = array<f32, 5>(0.2270270270, 0.1945945946, 0.1216216216, 0.0540540541, 0.0162162162);
    let stride = params.direction * params.texel * (params.radius / 4.0);
    var sum = textureSample(source, samp, in.uv) * weights[0];
    for (var i = 1; i < 5; i = i + 1) {
        let offset = stride * f32(i);
        sum += textureSample(source, samp, in.uv + offset) * weights[i];
        sum += textureSample(source, samp, in.uv - offset) * weights[i];
    }
    return sum;
}
"#;

/// Straight bilinear copy.  Blend state on the pipeline decides whether it
/// replaces, adds or weights the destination.
pub const COPY_FS: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var samp: sampler;

struct FragIn {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@fragment
fn fs_copy(in: FragIn) -> @location(0) vec4<f32> {
    return textureSample(source, samp, in.uv);
}
"#;

// ============================================================================
// COMBINE — in-shader weighted sum of two images
// ============================================================================
pub const COMBINE_FS: &str = r#"
struct CombineParams {
    intensity1: f32,
    intensity2: f32,
    _pad0: f32,
    _pad1: f32,
};

@group(0) @binding(0) var<uniform> params: CombineParams;
@group(0) @binding(1) var texture1: texture_2d<f32>;
@group(0) @binding(2) var texture2: texture_2d<f32>;
@group(0) @binding(3) var samp: sampler;

struct FragIn {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@fragment
fn fs_combine(in: FragIn) -> @location(0) vec4<f32> {
    let a = textureSample(texture1, samp, in.uv);
    let b = textureSample(texture2, samp, in.uv);
    return a * params.intensity1 + b * params.intensity2;
}
"#;

// ============================================================================
// DISPLAY — final blit, clamped and opaque
// ============================================================================
pub const DISPLAY_FS: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var samp: sampler;

struct FragIn {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@fragment
fn fs_display(in: FragIn) -> @location(0) vec4<f32> {
    let color = textureSample(source, samp, in.uv);
    return vec4<f32>(clamp(color.rgb, vec3<f32>(0.0), vec3<f32>(1.0)), 1.0);
}
"#;
