//! Generated GLSL for instanced rendering and material property access.
//!
//! When a source declares material properties, a property block struct plus
//! bindless texture arrays are injected at the top of the source and every
//! participating stage gets an entry-point prologue that loads its instance
//! locals.

use asset_format::shader::{MaterialProperty, ShaderStage};
use asset_format::{read_name, ElementType};

use crate::text;

pub const INSTANCING_STANDALONE_GLSL: &str = r#"#define PK_INSTANCING_ENABLED
layout(std430, set = 0, binding = 100) readonly restrict buffer pk_Instancing_Transforms { mat3x4 pk_Instancing_Transforms_Data[]; };
layout(std430, set = 3, binding = 101) readonly restrict buffer pk_Instancing_Indices { uvec4 pk_Instancing_Indices_Data[]; };
mat3x4 pk_ObjectToWorld;
float pk_Instancing_UniformScale;
uint pk_Instancing_Material;
uint pk_Instancing_Transform;
uint pk_Instancing_Submesh;
uint pk_Instancing_Userdata;
void PK_INSTANCING_BROADCAST_LOCALS_MANUAL()
{
    pk_ObjectToWorld[0] = subgroupBroadcastFirst(pk_ObjectToWorld[0]);
    pk_ObjectToWorld[1] = subgroupBroadcastFirst(pk_ObjectToWorld[1]);
    pk_ObjectToWorld[2] = subgroupBroadcastFirst(pk_ObjectToWorld[2]);
    pk_Instancing_UniformScale = subgroupBroadcastFirst(pk_Instancing_UniformScale);
    pk_Instancing_Material = subgroupBroadcastFirst(pk_Instancing_Material);
    pk_Instancing_Transform = subgroupBroadcastFirst(pk_Instancing_Transform);
    pk_Instancing_Submesh = subgroupBroadcastFirst(pk_Instancing_Submesh);
    pk_Instancing_Userdata = subgroupBroadcastFirst(pk_Instancing_Userdata);
}
void PK_INSTANCING_ASSIGN_LOCALS(uint index)
{
    uvec4 data = pk_Instancing_Indices_Data[index];
    pk_Instancing_UniformScale = unpackHalf2x16(data.x).y;
    pk_Instancing_Material = data.x & 0xFFFFu;
    pk_Instancing_Transform = data.y;
    pk_Instancing_Submesh = data.z;
    pk_Instancing_Userdata = data.w;
    pk_ObjectToWorld = pk_Instancing_Transforms_Data[pk_Instancing_Transform];
}
"#;

/// Shared head of the material-property assembly; the per-property loads and
/// the closing brace are generated.
const INSTANCING_BASE_GLSL: &str = r#"#define PK_INSTANCING_ENABLED
layout(std430, set = 0, binding = 100) readonly restrict buffer pk_Instancing_Transforms { mat3x4 pk_Instancing_Transforms_Data[]; };
layout(std430, set = 3, binding = 101) readonly restrict buffer pk_Instancing_Indices { uvec4 pk_Instancing_Indices_Data[]; };
layout(std430, set = 3, binding = 102) readonly restrict buffer pk_Instancing_Properties { PK_MaterialPropertyBlock pk_Instancing_Properties_Data[]; };
layout(set = 3, binding = 103) uniform texture2D pk_Instancing_Textures2D[];
layout(set = 3, binding = 104) uniform texture3D pk_Instancing_Textures3D[];
layout(set = 3, binding = 105) uniform textureCube pk_Instancing_TexturesCube[];
mat3x4 pk_ObjectToWorld;
float pk_Instancing_UniformScale;
uint pk_Instancing_Material;
uint pk_Instancing_Transform;
uint pk_Instancing_Submesh;
uint pk_Instancing_Userdata;
void PK_INSTANCING_BROADCAST_LOCALS_MANUAL()
{
    pk_ObjectToWorld[0] = subgroupBroadcastFirst(pk_ObjectToWorld[0]);
    pk_ObjectToWorld[1] = subgroupBroadcastFirst(pk_ObjectToWorld[1]);
    pk_ObjectToWorld[2] = subgroupBroadcastFirst(pk_ObjectToWorld[2]);
    pk_Instancing_UniformScale = subgroupBroadcastFirst(pk_Instancing_UniformScale);
    pk_Instancing_Material = subgroupBroadcastFirst(pk_Instancing_Material);
    pk_Instancing_Transform = subgroupBroadcastFirst(pk_Instancing_Transform);
    pk_Instancing_Submesh = subgroupBroadcastFirst(pk_Instancing_Submesh);
    pk_Instancing_Userdata = subgroupBroadcastFirst(pk_Instancing_Userdata);
}
void PK_INSTANCING_ASSIGN_LOCALS(uint index)
{
    uvec4 data = pk_Instancing_Indices_Data[index];
    pk_Instancing_UniformScale = unpackHalf2x16(data.x).y;
    pk_Instancing_Material = data.x & 0xFFFFu;
    pk_Instancing_Transform = data.y;
    pk_Instancing_Submesh = data.z;
    pk_Instancing_Userdata = data.w;
    pk_ObjectToWorld = pk_Instancing_Transforms_Data[pk_Instancing_Transform];
    PK_MaterialPropertyBlock prop = pk_Instancing_Properties_Data[pk_Instancing_Material];
"#;

const INSTANCING_STAGE_GLSL: &str = "\nPK_INSTANCING_ASSIGN_STAGE_LOCALS\n";

const INSTANCING_VERTEX_GLSL: &str = r#"out flat uint vs_INSTANCE_ID;
#define PK_INSTANCE_ID uint(gl_InstanceIndex)
#define PK_INSTANCING_ASSIGN_STAGE_LOCALS PK_INSTANCING_ASSIGN_LOCALS(PK_INSTANCE_ID); vs_INSTANCE_ID = PK_INSTANCE_ID;
"#;

const INSTANCING_MESH_TASK_GLSL: &str = "#define PK_INSTANCING_ASSIGN_STAGE_LOCALS\n";

const INSTANCING_MESH_ASSEMBLY_GLSL: &str = r#"out flat uint vs_INSTANCE_ID[];
#define PK_INSTANCING_ASSIGN_VERTEX_INSTANCE_ID(vertexIndex, instanceId) vs_INSTANCE_ID[vertexIndex] = instanceId;
#define PK_INSTANCING_ASSIGN_STAGE_LOCALS
"#;

const INSTANCING_MESH_ASSEMBLY_NOFRAG_GLSL: &str = r#"#define PK_INSTANCING_ASSIGN_VERTEX_INSTANCE_ID(vertexIndex, instanceId)
#define PK_INSTANCING_ASSIGN_STAGE_LOCALS
"#;

const INSTANCING_FRAGMENT_GLSL: &str = r#"in flat uint vs_INSTANCE_ID;
#define PK_INSTANCING_ASSIGN_STAGE_LOCALS PK_INSTANCING_ASSIGN_LOCALS(vs_INSTANCE_ID);
"#;

const INSTANCING_FRAGMENT_NOFRAG_GLSL: &str = r#"#define vs_INSTANCE_ID 0u
#define PK_INSTANCING_ASSIGN_STAGE_LOCALS
"#;

/// Atomic counter declaration plus accessor helpers.
pub const ATOMIC_COUNTER_GLSL: &str = r#"layout(std430, set = 3) buffer pk_BuiltInAtomicCounter { uint pk_BuiltInAtomicCounter_Data; };
uint PK_AtomicCounterAdd(uint increment) { return atomicAdd(pk_BuiltInAtomicCounter_Data, increment); }
uint PK_AtomicCounterNext() { return atomicAdd(pk_BuiltInAtomicCounter_Data, 1u); }
"#;

fn texture_array_for(element_type: ElementType) -> Option<&'static str> {
    match element_type {
        ElementType::Texture2DHandle => Some("pk_Instancing_Textures2D"),
        ElementType::Texture3DHandle => Some("pk_Instancing_Textures3D"),
        ElementType::TextureCubeHandle => Some("pk_Instancing_TexturesCube"),
        _ => None,
    }
}

/// Builds the material assembly block for the declared properties.
pub fn material_assembly_block(properties: &[MaterialProperty]) -> String {
    let mut block = String::from("struct PK_MaterialPropertyBlock\n{\n");

    for property in properties {
        let element_type = ElementType::from_raw(property.element_type);
        block.push_str(&format!(
            "    {} {};\n",
            element_type.glsl_name(),
            read_name(&property.name)
        ));
    }

    block.push_str("};\n");

    // Per-property globals; texture handles become indices into the bindless
    // arrays.
    for property in properties {
        let element_type = ElementType::from_raw(property.element_type);
        let name = read_name(&property.name);

        if texture_array_for(element_type).is_some() {
            block.push_str(&format!("uint {name}_Handle;\n"));
        } else {
            block.push_str(&format!("{} {};\n", element_type.glsl_name(), name));
        }
    }

    block.push_str(INSTANCING_BASE_GLSL);

    for property in properties {
        let element_type = ElementType::from_raw(property.element_type);
        let name = read_name(&property.name);

        if texture_array_for(element_type).is_some() {
            block.push_str(&format!("    {name}_Handle = prop.{name};\n"));
        } else {
            block.push_str(&format!("    {name} = prop.{name};\n"));
        }
    }

    block.push_str("}\n");

    for property in properties {
        let element_type = ElementType::from_raw(property.element_type);
        let name = read_name(&property.name);

        if let Some(array) = texture_array_for(element_type) {
            block.push_str(&format!("#define {name} {array}[{name}_Handle]\n"));
        }
    }

    block
}

/// Prepends the per-stage instancing interface and injects the stage-locals
/// assignment at the top of `main`.
pub fn insert_entry_point(
    source: &mut String,
    stage: ShaderStage,
    enable_instancing: bool,
    no_fragment_instancing: bool,
) {
    if !enable_instancing {
        return;
    }

    let prologue = match stage {
        ShaderStage::Vertex => INSTANCING_VERTEX_GLSL,
        ShaderStage::MeshTask => INSTANCING_MESH_TASK_GLSL,
        ShaderStage::MeshAssembly => {
            if no_fragment_instancing {
                INSTANCING_MESH_ASSEMBLY_NOFRAG_GLSL
            } else {
                INSTANCING_MESH_ASSEMBLY_GLSL
            }
        }
        ShaderStage::Fragment => {
            if no_fragment_instancing {
                INSTANCING_FRAGMENT_NOFRAG_GLSL
            } else {
                INSTANCING_FRAGMENT_GLSL
            }
        }
        _ => return,
    };

    source.insert_str(0, prologue);

    let Some(main) = source.find("main()") else {
        tracing::warn!("no main() found for instancing insert");
        return;
    };

    let Some((open, _)) = text::find_scope_char(source, main, '{', '}') else {
        tracing::warn!("no scope found after main() for instancing insert");
        return;
    };

    source.insert_str(open + 1, INSTANCING_STAGE_GLSL);
}
