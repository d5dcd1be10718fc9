//! The `.shader` dialect preprocessor.
//!
//! Turns one source file into per-stage GLSL: multi-compile variant
//! expansion, fixed-function state directives, material/instancing assembly,
//! HLSL-style type rewriting, stage splitting and push-constant merging.

use asset_format::shader::{
    color_mask_from_source, BlendFactor, BlendOp, Comparison, CullMode, FixedFunctionState,
    MaterialProperty, RasterMode, ShaderKeyword, ShaderStage,
};
use asset_format::{write_name, ElementType, NAME_MAX_LENGTH};

use crate::instancing;
use crate::text::{
    extract_token, extract_token_at, find_scope_char, find_scope_str, is_identifier_char,
    replace_all_masked, split, split_no_whitespace, IDENTIFIER_MASK,
};
use crate::Error;

pub const STAGE_TOKEN: &str = "#pragma PROGRAM_";

const TOKEN_MULTI_COMPILE: &str = "#multi_compile ";
const TOKEN_ZWRITE: &str = "#ZWrite ";
const TOKEN_ZTEST: &str = "#ZTest ";
const TOKEN_BLEND_COLOR: &str = "#BlendColor ";
const TOKEN_BLEND_ALPHA: &str = "#BlendAlpha ";
const TOKEN_COLOR_MASK: &str = "#ColorMask ";
const TOKEN_CULL: &str = "#Cull ";
const TOKEN_OFFSET: &str = "#Offset ";
const TOKEN_RASTER_MODE: &str = "#RasterMode ";
const TOKEN_MATERIAL_PROP: &str = "#pk_material_prop ";
const TOKEN_INSTANCING: &str = "#pk_instancing";
const TOKEN_NOFRAG_INSTANCING: &str = "#pk_no_fragment_instancing";
const TOKEN_ATOMIC_COUNTER: &str = "#pk_atomicCounter";
const TOKEN_LOG_VERBOSE: &str = "#pk_logverbose";
const TOKEN_DEBUG_INFO: &str = "#pk_debuginfo";
const TOKEN_LOCAL_OPEN: &str = "[pk_local(";
const TOKEN_LOCAL_CLOSE: &str = ")]";
const TOKEN_NUMTHREADS_OPEN: &str = "[pk_numthreads(";
const TOKEN_NUMTHREADS_CLOSE: &str = ")]";

const EXTENSIONS_COMMON: &str = "\
#extension GL_KHR_shader_subgroup_basic : require
#extension GL_KHR_shader_subgroup_ballot : require
#extension GL_KHR_shader_subgroup_vote : require
#extension GL_EXT_samplerless_texture_functions : require
#extension GL_EXT_shader_16bit_storage : require
#extension GL_EXT_control_flow_attributes : require
#extension GL_EXT_shader_explicit_arithmetic_types : require
#extension GL_EXT_nonuniform_qualifier : require
#extension GL_ARB_shader_viewport_layer_array : require
#extension GL_EXT_shader_image_load_formatted : require
";

const EXTENSIONS_RAYTRACING: &str = "\
#extension GL_EXT_ray_tracing : require
#extension GL_EXT_ray_tracing_position_fetch : require
";

const EXTENSIONS_MESHSHADING: &str = "\
#extension GL_EXT_shader_explicit_arithmetic_types_int8 : require
#extension GL_EXT_mesh_shader : require
";

const EXTENSION_PRINTF: &str = "#extension GL_EXT_debug_printf : enable\n";

/// HLSL-style primitive spellings and their GLSL equivalents, index aligned.
const HLSL_PRIMITIVE_TYPES: [&str; 71] = [
    "bool2", "bool3", "bool4", "half", "half2", "half3", "half4", "float2", "float3", "float4",
    "double", "double2", "double3", "double4", "short", "short2", "short3", "short4", "ushort",
    "ushort2", "ushort3", "ushort4", "byte", "byte2", "byte3", "byte4", "sbyte", "sbyte2",
    "sbyte3", "sbyte4", "int2", "int3", "int4", "uint2", "uint3", "uint4", "long", "long2",
    "long3", "long4", "ulong", "ulong2", "ulong3", "ulong4", "half2x2", "half2x3", "half2x4",
    "half3x2", "half3x3", "half3x4", "half4x2", "half4x3", "half4x4", "float2x2", "float2x3",
    "float2x4", "float3x2", "float3x3", "float3x4", "float4x2", "float4x3", "float4x4",
    "double2x2", "double2x3", "double2x4", "double3x2", "double3x3", "double3x4", "double4x2",
    "double4x3", "double4x4",
];

const GLSL_PRIMITIVE_TYPES: [&str; 71] = [
    "bvec2", "bvec3", "bvec4", "float16_t", "f16vec2", "f16vec3", "f16vec4", "vec2", "vec3",
    "vec4", "float64_t", "f64vec2", "f64vec3", "f64vec4", "int16_t", "i16vec2", "i16vec3",
    "i16vec4", "uint16_t", "u16vec2", "u16vec3", "u16vec4", "uint8_t", "u8vec2", "u8vec3",
    "u8vec4", "int8_t", "i8vec2", "i8vec3", "i8vec4", "ivec2", "ivec3", "ivec4", "uvec2", "uvec3",
    "uvec4", "int64_t", "i64vec2", "i64vec3", "i64vec4", "uint64_t", "u64vec2", "u64vec3",
    "u64vec4", "f16mat2", "f16mat2x3", "f16mat2x4", "f16mat3x2", "f16mat3", "f16mat3x4",
    "f16mat4x2", "f16mat4x3", "f16mat4", "mat2", "mat2x3", "mat2x4", "mat3x2", "mat3", "mat3x4",
    "mat4x2", "mat4x3", "mat4", "f64mat2", "f64mat2x3", "f64mat2x4", "f64mat3x2", "f64mat3",
    "f64mat3x4", "f64mat4x2", "f64mat4x3", "f64mat4",
];

/// A push-constant field collected from the stage sources.
#[derive(Clone, Debug)]
pub struct SourceConstant {
    pub name: String,
    pub field: String,
    pub stage_flags: u32,
}

/// Everything extracted from the source before variant expansion.
#[derive(Clone, Debug)]
pub struct Preprocessed {
    pub keywords: Vec<ShaderKeyword>,
    pub directives: Vec<Vec<String>>,
    pub variant_count: u32,
    pub state: FixedFunctionState,
    pub material_properties: Vec<MaterialProperty>,
    pub enable_instancing: bool,
    pub no_fragment_instancing: bool,
    pub log_verbose: bool,
    pub debug_info: bool,
    pub shared_include: String,
    pub source: String,
}

pub fn preprocess(mut source: String) -> Result<Preprocessed, Error> {
    let log_verbose = extract_token(&mut source, TOKEN_LOG_VERBOSE, true).is_some();
    let debug_info = extract_token(&mut source, TOKEN_DEBUG_INFO, true).is_some();

    let (directives, keywords, variant_count) = extract_multi_compiles(&mut source);
    let state = extract_state_attributes(&mut source);

    let no_fragment_instancing =
        extract_token(&mut source, TOKEN_NOFRAG_INSTANCING, true).is_some();
    let (material_properties, enable_instancing) = insert_material_assembly(&mut source);

    if extract_token(&mut source, TOKEN_ATOMIC_COUNTER, true).is_some() {
        source.insert_str(0, instancing::ATOMIC_COUNTER_GLSL);
    }

    convert_hlsl_types(&mut source);

    let shared_include = source
        .find(STAGE_TOKEN)
        .map(|pos| source[..pos].to_string())
        .unwrap_or_default();

    Ok(Preprocessed {
        keywords,
        directives,
        variant_count,
        state,
        material_properties,
        enable_instancing,
        no_fragment_instancing,
        log_verbose,
        debug_info,
        shared_include,
        source,
    })
}

/// Expands `#multi_compile A B …` lines into the keyword table. The variant
/// count is the product of all directive sizes.
fn extract_multi_compiles(source: &mut String) -> (Vec<Vec<String>>, Vec<ShaderKeyword>, u32) {
    let mut directives = Vec::new();
    let mut keywords = Vec::new();
    let mut variant_count = 1u32;
    let mut offset = 0;

    while let Some((pos, value)) = extract_token_at(source, offset, TOKEN_MULTI_COMPILE, false) {
        offset = pos;
        let directive: Vec<String> = split(&value, &[' ', '\t']);

        for (local_index, keyword) in directive.iter().enumerate() {
            if keyword == "_" {
                continue;
            }

            let mut entry = ShaderKeyword {
                name: [0; NAME_MAX_LENGTH],
                offsets: ShaderKeyword::encode_offsets(
                    directives.len() as u32,
                    local_index as u32,
                    variant_count,
                ),
            };
            write_name(&mut entry.name, keyword);
            keywords.push(entry);
        }

        variant_count *= directive.len().max(1) as u32;
        directives.push(directive);
    }

    (directives, keywords, variant_count)
}

fn extract_state_attributes(source: &mut String) -> FixedFunctionState {
    let mut state = FixedFunctionState::default();

    if let Some(value) = extract_token(source, TOKEN_ZWRITE, false) {
        state.zwrite = u8::from(value.trim() == "True");
    }

    if let Some(value) = extract_token(source, TOKEN_ZTEST, false) {
        state.ztest = Comparison::from_source_name(value.trim()) as u8;
    }

    if let Some(value) = extract_token(source, TOKEN_BLEND_COLOR, false) {
        let parts = split(&value, &[' ', '\n', '\r']);
        state.blend_op_color = BlendOp::None as u8;
        state.blend_src_factor_color = BlendFactor::None as u8;
        state.blend_dst_factor_color = BlendFactor::None as u8;

        if parts.len() == 3 {
            state.blend_op_color = BlendOp::from_source_name(&parts[0]) as u8;
            state.blend_src_factor_color = BlendFactor::from_source_name(&parts[1]) as u8;
            state.blend_dst_factor_color = BlendFactor::from_source_name(&parts[2]) as u8;
        }
    }

    if let Some(value) = extract_token(source, TOKEN_BLEND_ALPHA, false) {
        let parts = split(&value, &[' ', '\n', '\r']);
        state.blend_op_alpha = BlendOp::None as u8;
        state.blend_src_factor_alpha = BlendFactor::None as u8;
        state.blend_dst_factor_alpha = BlendFactor::None as u8;

        if parts.len() == 3 {
            state.blend_op_alpha = BlendOp::from_source_name(&parts[0]) as u8;
            state.blend_src_factor_alpha = BlendFactor::from_source_name(&parts[1]) as u8;
            state.blend_dst_factor_alpha = BlendFactor::from_source_name(&parts[2]) as u8;
        }
    }

    if let Some(value) = extract_token(source, TOKEN_OFFSET, false) {
        let parts = split(&value, &[' ', '\n', '\r']);

        state.z_offsets = [0.0; 3];

        if parts.len() == 3 {
            for (slot, part) in state.z_offsets.iter_mut().zip(&parts) {
                *slot = part.parse().unwrap_or(0.0);
            }
        }
    }

    if let Some(value) = extract_token(source, TOKEN_RASTER_MODE, false) {
        let parts = split(&value, &[' ', '\n', '\r']);
        state.raster_mode = RasterMode::Default as u8;
        state.over_estimation = 0;

        if let Some(mode) = parts.first() {
            state.raster_mode = RasterMode::from_source_name(mode) as u8;
        }

        if let Some(estimation) = parts.get(1) {
            state.over_estimation = estimation.parse().unwrap_or(0);
        }
    }

    if let Some(value) = extract_token(source, TOKEN_COLOR_MASK, false) {
        state.color_mask = color_mask_from_source(value.trim());
    }

    if let Some(value) = extract_token(source, TOKEN_CULL, false) {
        state.cull = CullMode::from_source_name(value.trim()) as u8;
    }

    state
}

/// Collects `#pk_material_prop` declarations and injects the property-block
/// assembly, or the standalone instancing block when only `#pk_instancing`
/// is present.
fn insert_material_assembly(source: &mut String) -> (Vec<MaterialProperty>, bool) {
    let mut properties = Vec::new();
    let mut offset = 0;

    while let Some((pos, value)) = extract_token_at(source, offset, TOKEN_MATERIAL_PROP, false) {
        offset = pos;
        let parts = split(&value, &[' ', '\t']);

        if parts.len() != 2 {
            continue;
        }

        let element_type = ElementType::from_source_name(&parts[0]);

        if element_type == ElementType::Invalid {
            continue;
        }

        let mut property = MaterialProperty {
            name: [0; NAME_MAX_LENGTH],
            element_type: element_type as u16,
        };
        write_name(&mut property.name, &parts[1]);
        properties.push(property);
    }

    if properties.is_empty() {
        if extract_token(source, TOKEN_INSTANCING, true).is_some() {
            source.insert_str(0, instancing::INSTANCING_STANDALONE_GLSL);
            return (properties, true);
        }

        return (properties, false);
    }

    extract_token(source, TOKEN_INSTANCING, true);
    source.insert_str(0, &instancing::material_assembly_block(&properties));
    (properties, true)
}

pub fn convert_hlsl_types(source: &mut String) {
    replace_all_masked(source, IDENTIFIER_MASK, "lerp", "mix");
    replace_all_masked(source, IDENTIFIER_MASK, "asuint", "floatBitsToUint");
    replace_all_masked(source, IDENTIFIER_MASK, "asfloat", "uintBitsToFloat");

    for (hlsl, glsl) in HLSL_PRIMITIVE_TYPES.iter().zip(&GLSL_PRIMITIVE_TYPES) {
        replace_all_masked(source, IDENTIFIER_MASK, hlsl, glsl);
    }
}

/// `#define` lines for one variant index.
pub fn variant_defines(directives: &[Vec<String>], index: u32) -> String {
    let mut defines = String::new();
    let mut index = index;

    for directive in directives {
        let keyword = &directive[index as usize % directive.len()];

        if keyword != "_" {
            defines.push_str("#define ");
            defines.push_str(keyword);
            defines.push('\n');
        }

        index /= directive.len() as u32;
    }

    defines
}

/// Splits the source into per-stage GLSL and runs the per-stage rewrite
/// pipeline plus push-constant merging.
pub fn build_stage_sources(
    pre: &Preprocessed,
    defines: &str,
) -> Result<Vec<(ShaderStage, String)>, Error> {
    let source = &pre.source;
    let mut stages: Vec<(ShaderStage, String)> = Vec::new();
    let mut cursor = source.find(STAGE_TOKEN);

    while let Some(pos) = cursor {
        let name_start = pos + STAGE_TOKEN.len();
        let eol = source[name_start..]
            .find(['\r', '\n'])
            .map(|p| p + name_start)
            .ok_or_else(|| Error::Syntax("missing stage body".into()))?;
        let body_start = source[eol..]
            .find(|c| c != '\r' && c != '\n')
            .map(|p| p + eol)
            .ok_or_else(|| Error::Syntax("missing stage body".into()))?;

        let name = source[name_start..eol].trim();
        let stage = ShaderStage::from_source_name(name)
            .ok_or_else(|| Error::UnknownStage(name.to_string()))?;

        let next = source[body_start..].find(STAGE_TOKEN).map(|p| p + body_start);
        let body = &source[body_start..next.unwrap_or(source.len())];

        if stages.iter().any(|(existing, _)| *existing == stage) {
            return Err(Error::Syntax(format!("duplicate stage {name}")));
        }

        stages.push((stage, body.to_string()));
        cursor = next;
    }

    if stages.is_empty() {
        return Err(Error::Syntax("source declares no stages".into()));
    }

    let mut constants: Vec<SourceConstant> = Vec::new();

    for (stage, body) in &mut stages {
        let stage = *stage;

        body.insert_str(0, &pre.shared_include);
        instancing::insert_entry_point(
            body,
            stage,
            pre.enable_instancing,
            pre.no_fragment_instancing,
        );
        body.insert_str(0, &format!("#define SHADER_STAGE_{}\n", stage.source_name()));
        body.insert_str(0, defines);
        insert_required_extensions(body, stage);

        remove_descriptor_sets(body);
        remove_entry_point_locals(body, stage)?;
        remove_inactive_group_size_layouts(body, stage);
        remove_unsupported_ray_tracing_fields(body, stage);
        convert_num_threads(body);
        convert_hlsl_buffers(body);
        convert_hlsl_cbuffers(body);
        convert_printf(body);
        extract_push_constants(body, stage, &mut constants);

        process_shader_version(body);
    }

    compile_push_constant_block(&mut stages, &constants);

    Ok(stages)
}

fn insert_required_extensions(source: &mut String, stage: ShaderStage) {
    source.insert_str(0, EXTENSIONS_COMMON);

    if stage.is_mesh_shading() {
        source.insert_str(0, EXTENSIONS_MESHSHADING);
    }

    if stage.is_ray_tracing() {
        source.insert_str(0, EXTENSIONS_RAYTRACING);
    }
}

/// Moves (or synthesizes) the `#version` line to the very top.
fn process_shader_version(source: &mut String) {
    match extract_token(source, "#version ", true) {
        Some(version) => source.insert_str(0, &version),
        None => source.insert_str(0, "#version 460\n"),
    }
}

/// Strips user-declared `set = N` layout qualifiers; descriptor sets are
/// assigned by the compiler's auto-binding.
fn remove_descriptor_sets(source: &mut String) {
    let mut cursor = 0;

    while let Some((open, close)) = find_scope_str(source, cursor, "layout(", ")") {
        let inner = &source[open + 7..close];
        let tokens = split_no_whitespace(inner, &[',']);

        if !tokens.iter().any(|token| token.starts_with("set=")) {
            cursor = close;
            continue;
        }

        let kept: Vec<&str> = tokens
            .iter()
            .map(String::as_str)
            .filter(|token| !token.starts_with("set="))
            .collect();

        if kept.is_empty() {
            source.replace_range(open..close + 1, "");
            cursor = open;
            continue;
        }

        let layout = format!("layout({})", kept.join(","));
        source.replace_range(open..close + 1, &layout);
        cursor = open + layout.len();
    }
}

/// Erases declarations gated by `[pk_local(...)]` unless one of the listed
/// names matches the current stage; matching gates are simply unwrapped.
fn remove_entry_point_locals(source: &mut String, stage: ShaderStage) -> Result<(), Error> {
    let stage_name = format!("STAGE_{}", stage.source_name());
    let mut cursor = 0;

    while let Some((open, close)) = find_scope_str(source, cursor, TOKEN_LOCAL_OPEN, TOKEN_LOCAL_CLOSE)
    {
        let content = source[open + TOKEN_LOCAL_OPEN.len()..close].to_string();
        let matches_stage = split(&content, &[',', ' ']).iter().any(|arg| *arg == stage_name);

        if matches_stage {
            source.replace_range(open..close + TOKEN_LOCAL_CLOSE.len(), "");
            cursor = open;
            continue;
        }

        // Remove the whole gated declaration: up to the terminating
        // semicolon, or the closing brace of its body.
        let mut end = source[close..]
            .find(';')
            .map(|p| p + close)
            .ok_or_else(|| Error::Syntax("no declaration after [pk_local]".into()))?;

        if let Some((body_open, body_close)) = find_scope_char(source, open, '{', '}') {
            if body_open < end {
                end = body_close;

                if source[end + 1..].starts_with(';') {
                    end += 1;
                }
            }
        }

        source.replace_range(open..end + 1, "");
        cursor = open;
    }

    Ok(())
}

/// In compute stages, keeps only the `local_size_x` layout declaration
/// directly preceding `void main()` and erases the rest.
fn remove_inactive_group_size_layouts(source: &mut String, stage: ShaderStage) {
    if stage != ShaderStage::Compute {
        return;
    }

    let mut positions = Vec::new();
    let mut cursor = 0;

    while let Some((open, close)) = find_scope_str(source, cursor, "layout(", ")") {
        if source[open..close].contains("local_size_x") {
            positions.push(open);
        }

        cursor = close;
    }

    let main_pos = source.find("void main()").unwrap_or(source.len());
    let mut keep_found = false;

    for &open in positions.iter().rev() {
        if open < main_pos && !keep_found {
            keep_found = true;
            continue;
        }

        if let Some(end) = source[open..].find(';').map(|p| p + open) {
            source.replace_range(open..end + 1, "");
        }
    }
}

/// Scrubs ray-tracing-only declarations from stages that cannot carry them.
fn remove_unsupported_ray_tracing_fields(source: &mut String, stage: ShaderStage) {
    let supported =
        source.contains("GL_EXT_ray_tracing") || source.contains("GL_EXT_ray_query");
    let hit_stage = stage.is_ray_tracing_hit();

    if !supported {
        let mut cursor = 0;

        while let Some(pos) = source[cursor..].find("uniform ").map(|p| p + cursor) {
            let after = pos + 8;
            let decl_start = source[after..]
                .find(|c: char| c != ' ')
                .map(|p| p + after)
                .unwrap_or(source.len());

            if !source[decl_start..].starts_with("accelerationStructureEXT ") {
                cursor = after;
                continue;
            }

            let Some(end) = source[decl_start..].find(';').map(|p| p + decl_start) else {
                break;
            };

            source.replace_range(pos..end + 1, "");
            cursor = pos;
        }
    }

    if !hit_stage || !supported {
        while let Some(pos) = source.find("hitAttributeEXT ") {
            let Some(end) = source[pos..].find(';').map(|p| p + pos) else {
                break;
            };

            source.replace_range(pos..end + 1, "");
        }
    }

    if hit_stage {
        let mut cursor = 0;

        while let Some(pos) = source[cursor..].find("rayPayloadEXT").map(|p| p + cursor) {
            source.replace_range(pos..pos + "rayPayloadEXT".len(), "rayPayloadInEXT");
            cursor = pos + "rayPayloadInEXT".len();
        }
    }
}

/// `[pk_numthreads(x, y, z)]` into a `layout(local_size_…) in;` declaration.
fn convert_num_threads(source: &mut String) {
    const DIMENSIONS: [&str; 3] = ["local_size_x=", "local_size_y=", "local_size_z="];

    let mut cursor = 0;

    while let Some((open, close)) =
        find_scope_str(source, cursor, TOKEN_NUMTHREADS_OPEN, TOKEN_NUMTHREADS_CLOSE)
    {
        let values = split(
            &source[open + TOKEN_NUMTHREADS_OPEN.len()..close],
            &[',', ' '],
        );

        let body = values
            .iter()
            .take(3)
            .enumerate()
            .map(|(axis, value)| format!("{}{}", DIMENSIONS[axis], value))
            .collect::<Vec<_>>()
            .join(",");
        let layout = format!("layout({body}) in;");

        source.replace_range(open..close + TOKEN_NUMTHREADS_CLOSE.len(), &layout);
        cursor = open + layout.len();
    }
}

/// HLSL `Buffer<T> name` / `RWBuffer<T> name` into std430 buffer blocks.
/// The wrapper block gets a `_pkalias` name that reflection strips back.
fn convert_hlsl_buffers(source: &mut String) {
    let mut cursor = 0;

    while let Some((open, close)) = find_scope_str(source, cursor, "Buffer<", ">") {
        let tokens = split(&source[open + 7..close], &[',', ' ']);

        let Some(element) = tokens.first().cloned() else {
            cursor = close;
            continue;
        };

        let size: usize = tokens
            .get(1)
            .and_then(|token| token.parse().ok())
            .unwrap_or(0);

        let name_start = source[close + 1..]
            .find(|c: char| c != ' ')
            .map(|p| p + close + 1)
            .unwrap_or(source.len());
        let name_end = source[name_start..]
            .find(|c: char| !is_identifier_char(c))
            .map(|p| p + name_start)
            .unwrap_or(source.len());

        if name_start >= name_end {
            cursor = close;
            continue;
        }

        let name = source[name_start..name_end].to_string();

        let mut start = open;
        let writable = source[..open].ends_with("RW");

        if writable {
            start -= 2;
        }

        // A leading `uniform` qualifier is erroneous on buffer blocks.
        if let Some(uniform_pos) = source[..start].rfind("uniform") {
            if source[uniform_pos + 7..start].chars().all(|c| c == ' ') {
                start = uniform_pos;
            }
        }

        // Consume a trailing array/semicolon tail up to the end of the
        // declaration statement.
        let decl_end = source[name_end..]
            .find(';')
            .map(|p| p + name_end + 1)
            .unwrap_or(name_end);

        let access = if writable { "" } else { " readonly" };
        let contents = match size {
            0 => format!("{element} {name}[];"),
            1 => format!("{element} {name};"),
            n => format!("{element} {name}[{n}];"),
        };
        let replacement =
            format!("layout(std430){access} buffer {name}_pkalias{{ {contents} }};");

        source.replace_range(start..decl_end, &replacement);
        cursor = start + replacement.len();
    }
}

/// HLSL `uniform cbuffer Name { … }` into a std140 uniform block.
fn convert_hlsl_cbuffers(source: &mut String) {
    let mut cursor = 0;

    while let Some(pos) = source[cursor..].find("uniform ").map(|p| p + cursor) {
        let after = pos + 8;
        let decl_start = source[after..]
            .find(|c: char| c != ' ')
            .map(|p| p + after)
            .unwrap_or(source.len());

        if !source[decl_start..].starts_with("cbuffer ") {
            cursor = after;
            continue;
        }

        source.replace_range(pos..decl_start + 7, "layout(std140) uniform");
        cursor = pos + 22;
    }
}

/// `printf(…)` into `debugPrintfEXT(…)`, enabling the debug printf extension
/// when any call site exists.
fn convert_printf(source: &mut String) {
    let mut found = false;
    let mut cursor = 0;

    while let Some(pos) = source[cursor..].find("printf(").map(|p| p + cursor) {
        // `debugPrintfEXT(` must not rewrite itself.
        let preceded_by_ident = source[..pos]
            .chars()
            .next_back()
            .is_some_and(is_identifier_char);

        if preceded_by_ident {
            cursor = pos + 7;
            continue;
        }

        source.replace_range(pos..pos + 7, "debugPrintfEXT(");
        cursor = pos + 15;
        found = true;
    }

    if found {
        source.insert_str(0, EXTENSION_PRINTF);
    }
}

fn is_primitive_type(name: &str) -> bool {
    !name.is_empty() && GLSL_PRIMITIVE_TYPES.iter().any(|ty| ty.starts_with(name))
}

/// Tries to parse `T name;` starting at `offset`, recording it as a push
/// constant for `stage`. Returns the end of the parsed declaration.
fn extract_primitive_variable(
    source: &str,
    offset: usize,
    stage: ShaderStage,
    constants: &mut Vec<SourceConstant>,
) -> Option<usize> {
    let type_start = source[offset..].find(|c: char| c != ' ')? + offset;
    let type_end = source[type_start..].find(' ')? + type_start;
    let name_start = source[type_end..].find(|c: char| c != ' ')? + type_end;
    let name_end = source[name_start..].find(|c: char| !is_identifier_char(c))? + name_start;

    if !source[name_end..].starts_with(';') {
        return None;
    }

    let type_name = &source[type_start..type_end];

    if !is_primitive_type(type_name) {
        return None;
    }

    let name = &source[name_start..name_end];
    let field = format!("{type_name} {name};\n");

    if let Some(existing) = constants.iter_mut().find(|c| c.name == name) {
        if existing.field != field {
            tracing::warn!(
                name,
                previous = %existing.field.trim(),
                conflicting = %field.trim(),
                "push constant redeclared with a different format"
            );
        }

        existing.stage_flags |= stage.flag().bits();
        return Some(name_end + 1);
    }

    constants.push(SourceConstant {
        name: name.to_string(),
        field,
        stage_flags: stage.flag().bits(),
    });

    Some(name_end + 1)
}

/// Removes `uniform T name;` declarations and `layout(push_constant)` blocks,
/// recording every primitive field for the merged block.
fn extract_push_constants(
    source: &mut String,
    stage: ShaderStage,
    constants: &mut Vec<SourceConstant>,
) {
    let mut cursor = 0;

    loop {
        let next_single = source[cursor..].find("uniform ").map(|p| p + cursor);
        let next_block = source[cursor..]
            .find("layout(push_constant)")
            .map(|p| p + cursor);

        match (next_single, next_block) {
            (Some(single), block) if block.map_or(true, |b| single < b) => {
                match extract_primitive_variable(source, single + 8, stage, constants) {
                    Some(end) => {
                        source.replace_range(single..end, "");
                        cursor = single;
                    }
                    None => cursor = single + 8,
                }
            }
            (_, Some(block)) => {
                let Some((open, close)) = find_scope_char(source, block, '{', '}') else {
                    cursor = block + 21;
                    continue;
                };

                if !source[close + 1..].starts_with(';') {
                    cursor = block + 21;
                    continue;
                }

                let mut member_cursor = open + 1;

                loop {
                    member_cursor = match source[member_cursor..]
                        .find(|c: char| !c.is_whitespace())
                    {
                        Some(p) => p + member_cursor,
                        None => break,
                    };

                    match extract_primitive_variable(source, member_cursor, stage, constants) {
                        Some(end) if end <= close => member_cursor = end,
                        _ => break,
                    }
                }

                source.replace_range(block..close + 2, "");
                cursor = block;
            }
            (None, None) => break,
            (Some(_), None) => unreachable!("guard above is always true when block is None"),
        }
    }
}

/// Emits the merged push-constant block into every stage source, fields
/// stable-sorted by descending stage-coverage popcount.
fn compile_push_constant_block(
    stages: &mut [(ShaderStage, String)],
    constants: &[SourceConstant],
) {
    if constants.is_empty() {
        return;
    }

    let mut sorted: Vec<&SourceConstant> = constants.iter().collect();
    sorted.sort_by_key(|constant| std::cmp::Reverse(constant.stage_flags.count_ones()));

    let mut block = String::from("layout(push_constant) uniform pk_global_push_constant_block\n{\n");
    for constant in &sorted {
        block.push_str(&constant.field);
    }
    block.push_str("};\n");

    for (_, source) in stages.iter_mut() {
        if source.is_empty() {
            continue;
        }

        // Keep the `#version` pragma on the first line.
        let insert_at = source.find('\n').map_or(source.len(), |p| p + 1);
        source.insert_str(insert_at, &block);
    }
}

#[cfg(test)]
mod tests {
    use asset_format::read_name;
    use asset_format::shader::ShaderStage;

    use super::{
        build_stage_sources, convert_hlsl_buffers, convert_hlsl_cbuffers, convert_hlsl_types,
        convert_num_threads, convert_printf, preprocess, variant_defines,
    };

    #[test]
    fn multi_compile_expansion() {
        let source = "\
#multi_compile X Y
#multi_compile _ Z
#pragma PROGRAM_VERTEX
void main() {}
";
        let pre = preprocess(source.to_string()).unwrap();

        assert_eq!(pre.variant_count, 4);
        assert_eq!(pre.keywords.len(), 3);

        let names: Vec<&str> = pre.keywords.iter().map(|k| read_name(&k.name)).collect();
        assert_eq!(names, vec!["X", "Y", "Z"]);

        // (directive, local index, stride).
        assert_eq!(pre.keywords[0].offsets, (0 << 28) | (0 << 24) | 1);
        assert_eq!(pre.keywords[1].offsets, (0 << 28) | (1 << 24) | 1);
        assert_eq!(pre.keywords[2].offsets, (1 << 28) | (1 << 24) | 2);
    }

    #[test]
    fn variant_defines_walk_the_product() {
        let directives = vec![
            vec!["X".to_string(), "Y".to_string()],
            vec!["_".to_string(), "Z".to_string()],
        ];

        assert_eq!(variant_defines(&directives, 0), "#define X\n");
        assert_eq!(variant_defines(&directives, 1), "#define Y\n");
        assert_eq!(variant_defines(&directives, 2), "#define X\n#define Z\n");
        assert_eq!(variant_defines(&directives, 3), "#define Y\n#define Z\n");
    }

    #[test]
    fn state_attributes_are_parsed_and_stripped() {
        let source = "\
#ZWrite False
#ZTest Greater
#Cull Back
#pragma PROGRAM_FRAGMENT
void main() {}
";
        let pre = preprocess(source.to_string()).unwrap();
        assert_eq!(pre.state.zwrite, 0);
        assert!(!pre.source.contains("#ZWrite"));
        assert!(!pre.source.contains("#Cull"));
    }

    #[test]
    fn hlsl_type_rewrite_is_identifier_safe() {
        let mut source = "float3 float3x4 float3_foo".to_string();
        convert_hlsl_types(&mut source);
        assert_eq!(source, "vec3 mat3x4 float3_foo");
    }

    #[test]
    fn hlsl_type_rewrite_is_idempotent() {
        let mut source = "float3 a; lerp(a, b, c); uint4 d;".to_string();
        convert_hlsl_types(&mut source);
        let once = source.clone();
        convert_hlsl_types(&mut source);
        assert_eq!(source, once);
    }

    #[test]
    fn num_threads_becomes_local_size_layout() {
        let mut source = "[pk_numthreads(8, 8, 1)]\nvoid main() {}".to_string();
        convert_num_threads(&mut source);
        assert!(source.starts_with("layout(local_size_x=8,local_size_y=8,local_size_z=1) in;"));
    }

    #[test]
    fn rw_buffer_becomes_writable_block() {
        let mut source = "RWBuffer<uint> counters;".to_string();
        convert_hlsl_buffers(&mut source);
        assert_eq!(
            source,
            "layout(std430) buffer counters_pkalias{ uint counters[]; };"
        );

        let mut source = "Buffer<vec4, 16> lights;".to_string();
        convert_hlsl_buffers(&mut source);
        assert_eq!(
            source,
            "layout(std430) readonly buffer lights_pkalias{ vec4 lights[16]; };"
        );
    }

    #[test]
    fn cbuffer_becomes_std140_uniform() {
        let mut source = "uniform cbuffer Globals { mat4 view; };".to_string();
        convert_hlsl_cbuffers(&mut source);
        assert_eq!(source, "layout(std140) uniform Globals { mat4 view; };");
    }

    #[test]
    fn printf_rewrites_once() {
        let mut source = "printf(\"%d\", x);".to_string();
        convert_printf(&mut source);
        assert!(source.contains("debugPrintfEXT(\"%d\", x);"));
        assert!(source.starts_with("#extension GL_EXT_debug_printf"));

        let once = source.clone();
        let mut again = source.clone();
        convert_printf(&mut again);
        // A second pass adds nothing: the call is already rewritten.
        assert_eq!(again, once);
    }

    #[test]
    fn stage_split_builds_full_sources() {
        let source = "\
shared code here
#pragma PROGRAM_VERTEX
uniform float4 pk_offset;
void main() {}
#pragma PROGRAM_FRAGMENT
void main() {}
";
        let pre = preprocess(source.to_string()).unwrap();
        let stages = build_stage_sources(&pre, "#define A\n").unwrap();

        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].0, ShaderStage::Vertex);
        assert_eq!(stages[1].0, ShaderStage::Fragment);

        for (_, body) in &stages {
            assert!(body.starts_with("#version 460\n"));
            assert!(body.contains("shared code here"));
            assert!(body.contains("#define A"));
            // The merged push-constant block replaced the loose uniform.
            assert!(body.contains("pk_global_push_constant_block"));
            assert!(body.contains("vec4 pk_offset;"));
            assert!(!body.contains("uniform vec4 pk_offset;"));
        }

        assert!(stages[0].1.contains("#define SHADER_STAGE_VERTEX"));
        assert!(stages[1].1.contains("#define SHADER_STAGE_FRAGMENT"));
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let pre = preprocess("#pragma PROGRAM_PIXEL\nvoid main() {}\n".to_string()).unwrap();
        assert!(build_stage_sources(&pre, "").is_err());
    }

    #[test]
    fn push_constants_merge_across_stages() {
        let source = "\
#pragma PROGRAM_VERTEX
uniform float4 pk_shared;
uniform float2 pk_vertex_only;
void main() {}
#pragma PROGRAM_FRAGMENT
uniform float4 pk_shared;
void main() {}
";
        let pre = preprocess(source.to_string()).unwrap();
        let stages = build_stage_sources(&pre, "").unwrap();

        for (_, body) in &stages {
            let block_pos = body.find("pk_global_push_constant_block").unwrap();
            let shared_pos = body.find("vec4 pk_shared;").unwrap();
            let single_pos = body.find("vec2 pk_vertex_only;").unwrap();

            // Two-stage fields sort before single-stage fields.
            assert!(block_pos < shared_pos);
            assert!(shared_pos < single_pos);
        }
    }
}
