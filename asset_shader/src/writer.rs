//! `.shader` to `.pkshader` compilation: variant expansion, per-stage
//! compilation, cross-stage reflection merging, binding compaction and
//! record emission.

use std::collections::BTreeMap;
use std::mem::offset_of;
use std::path::Path;

use asset_format::buffer::{AssetBuffer, RelPtr};
use asset_format::freshness;
use asset_format::shader::{
    ConstantVariable, Descriptor, DescriptorSet, DescriptorType, ShaderBlob, ShaderStage,
    ShaderVariant, VertexInputAttribute, MAX_DESCRIPTOR_SETS, MAX_PUSH_CONSTANTS, MAX_STAGES,
    MAX_UNBOUNDED_SIZE, MAX_VERTEX_ATTRIBUTES,
};
use asset_format::writer::{persist, WriteStatus};
use asset_format::{write_name, AssetType, NAME_MAX_LENGTH};

use crate::compiler::compile_stage;
use crate::preprocess::{build_stage_sources, preprocess, variant_defines};
use crate::reflect::ReflectModule;
use crate::text::read_file_recursive_include;
use crate::Error;

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

struct StageData {
    stage: ShaderStage,
    /// Unoptimised module, used for all reflection queries.
    debug: ReflectModule,
    /// Optimised module that is patched and persisted.
    release: ReflectModule,
}

#[derive(Clone, Debug)]
struct MergedBinding {
    first_stage: usize,
    set: u32,
    max_binding: u32,
    count: u32,
    write_stage_mask: u32,
    kind: DescriptorType,
    per_stage_var: [Option<u32>; MAX_STAGES],
}

impl Default for MergedBinding {
    fn default() -> Self {
        Self {
            first_stage: MAX_STAGES,
            set: 0,
            max_binding: 0,
            count: 0,
            write_stage_mask: 0,
            kind: DescriptorType::Invalid,
            per_stage_var: [None; MAX_STAGES],
        }
    }
}

#[derive(Clone, Debug, Default)]
struct MergedConstant {
    stage_flags: u32,
    offset: u16,
    size: u16,
}

#[derive(Default)]
struct Reflection {
    bindings: BTreeMap<String, MergedBinding>,
    set_stage_flags: BTreeMap<u32, u32>,
    vertex_attributes: Vec<VertexInputAttribute>,
    constants: BTreeMap<String, MergedConstant>,
}

fn merge_stage_reflection(reflection: &mut Reflection, data: &StageData, log_verbose: bool) {
    let slot = data.stage as usize;
    let stage_bit = data.stage.flag().bits();

    for info in data.debug.descriptor_bindings() {
        if !info.accessed {
            continue;
        }

        // The optimiser may drop the binding entirely; only resources that
        // survive in the release module are exported.
        let Some(release_var) = data.release.find_binding(info.set, info.binding) else {
            continue;
        };

        *reflection.set_stage_flags.entry(info.set).or_default() |= stage_bit;

        let entry = reflection.bindings.entry(info.name.clone()).or_default();
        entry.first_stage = entry.first_stage.min(slot);
        entry.set = info.set;
        entry.max_binding = entry.max_binding.max(info.binding);
        entry.count = info.count.unwrap_or(MAX_UNBOUNDED_SIZE);
        entry.kind = info.kind;
        entry.per_stage_var[slot] = Some(release_var);

        if info.written {
            entry.write_stage_mask |= stage_bit;
        }

        if log_verbose {
            tracing::debug!(
                resource = %info.name,
                access = if info.written { "write" } else { "read" },
                "reflected resource"
            );
        }
    }

    if data.stage == ShaderStage::Vertex {
        for input in data.debug.vertex_inputs() {
            if reflection.vertex_attributes.len() >= MAX_VERTEX_ATTRIBUTES {
                tracing::warn!(
                    limit = MAX_VERTEX_ATTRIBUTES,
                    "shader has more vertex attributes than supported"
                );
                continue;
            }

            let mut attribute = VertexInputAttribute {
                name: [0; NAME_MAX_LENGTH],
                location: input.location as u16,
                element_type: input.element_type as u16,
            };
            write_name(&mut attribute.name, &input.name);
            reflection.vertex_attributes.push(attribute);

            if log_verbose {
                tracing::debug!(attribute = %input.name, location = input.location, "vertex input");
            }
        }
    }

    for block in data.debug.push_constant_blocks() {
        let entry = reflection.constants.entry(block.type_name).or_default();
        entry.stage_flags |= stage_bit;
        entry.size = entry.size.max(block.size as u16);
    }
}

/// Renumbers descriptor sets densely and bindings contiguously within each
/// set, patching every stage's release module.
fn compress_bind_indices(reflection: &mut Reflection, stages: &mut [StageData]) -> u32 {
    let set_remap: BTreeMap<u32, u32> = reflection
        .set_stage_flags
        .keys()
        .enumerate()
        .map(|(index, &set)| (set, index as u32))
        .collect();

    reflection.set_stage_flags = reflection
        .set_stage_flags
        .iter()
        .map(|(set, flags)| (set_remap[set], *flags))
        .collect();

    // Bindings are reassigned in ascending order of their original maximum
    // binding number; the name-keyed map makes ties stable.
    let mut sorted: Vec<(&String, &mut MergedBinding)> = reflection.bindings.iter_mut().collect();
    sorted.sort_by_key(|(_, binding)| binding.max_binding);

    let mut set_counters = vec![0u32; set_remap.len()];

    for (_, binding) in sorted {
        let new_set = set_remap[&binding.set];
        let new_binding = set_counters[new_set as usize];
        set_counters[new_set as usize] += 1;

        for (slot, var) in binding.per_stage_var.iter().enumerate() {
            let Some(var) = *var else {
                continue;
            };

            let module = stages
                .iter_mut()
                .find(|data| data.stage as usize == slot)
                .map(|data| &mut data.release);

            if let Some(module) = module {
                module.set_descriptor_set(var, new_set);
                module.set_binding(var, new_binding);
            }
        }

        binding.set = new_set;
        binding.max_binding = new_binding;
    }

    set_remap.len() as u32
}

pub fn write_shader(src: &Path, dst: &Path) -> Result<WriteStatus, Error> {
    let dst_time = freshness::last_write_time(dst);
    let mut includes = Vec::new();
    let raw_source = read_file_recursive_include(src, &mut includes)?;

    let out_of_date = freshness::is_file_out_of_date(src, dst)
        || freshness::is_any_out_of_date(&includes, dst_time);

    if !out_of_date {
        return Ok(WriteStatus::UpToDate);
    }

    let filename = file_stem(src);
    let pre = preprocess(raw_source)?;

    if pre.log_verbose {
        tracing::info!(shader = %filename, variants = pre.variant_count, "preprocessing shader");
    }

    let mut buffer = AssetBuffer::new(AssetType::Shader, &filename);
    let shader = buffer.alloc::<ShaderBlob>(1);

    buffer.update(shader, |record| {
        record.attributes = pre.state;
        record.keyword_count = pre.keywords.len() as u32;
        record.material_property_count = pre.material_properties.len() as u32;
        record.variant_count = pre.variant_count;
    });

    if !pre.keywords.is_empty() {
        let keywords = buffer.write_slice(&pre.keywords);
        buffer.link(shader, offset_of!(ShaderBlob, keywords), keywords);
    }

    if !pre.material_properties.is_empty() {
        let properties = buffer.write_slice(&pre.material_properties);
        buffer.link(shader, offset_of!(ShaderBlob, material_properties), properties);
    }

    let variants = buffer.alloc::<ShaderVariant>(pre.variant_count as usize);
    buffer.link(shader, offset_of!(ShaderBlob, variants), variants);

    let compiler = shaderc::Compiler::new().map_err(|_| Error::CompilerInit)?;

    for variant_index in 0..pre.variant_count {
        let defines = variant_defines(&pre.directives, variant_index);
        let stage_sources = build_stage_sources(&pre, &defines)?;
        let variant = variants.element(variant_index as usize);

        let mut stages = Vec::with_capacity(stage_sources.len());
        let mut group_size = [0u32; 3];

        for (stage, source) in &stage_sources {
            if pre.log_verbose {
                tracing::debug!(
                    shader = %filename,
                    variant = variant_index,
                    stage = ?stage,
                    "compiling stage"
                );
            }

            let compiled = compile_stage(&compiler, &filename, *stage, source, pre.debug_info)?;
            let debug = ReflectModule::parse(&compiled.reflection)?;
            let release = ReflectModule::parse(&compiled.release)?;

            if let Some(size) = debug.compute_group_size() {
                group_size = size;
            }

            stages.push(StageData {
                stage: *stage,
                debug,
                release,
            });
        }

        let mut reflection = Reflection::default();

        for data in &stages {
            merge_stage_reflection(&mut reflection, data, pre.log_verbose);
        }

        let set_count = compress_bind_indices(&mut reflection, &mut stages);

        buffer.update(variant, |record| record.group_size = group_size);

        for data in &stages {
            let slot = data.stage as usize;
            let spirv = data.release.to_bytes();
            let spirv_ptr = buffer.write_slice(&spirv);

            buffer.update(variant, |record| {
                record.spirv_sizes[slot] = spirv.len() as u32;
            });
            buffer.link(
                variant,
                offset_of!(ShaderVariant, spirv_buffers) + slot * std::mem::size_of::<RelPtr<u8>>(),
                spirv_ptr,
            );
        }

        if !reflection.vertex_attributes.is_empty() {
            buffer.update(variant, |record| {
                record.vertex_attribute_count = reflection.vertex_attributes.len() as u32;
            });

            let attributes = buffer.write_slice(&reflection.vertex_attributes);
            buffer.link(
                variant,
                offset_of!(ShaderVariant, vertex_attributes),
                attributes,
            );
        }

        if !reflection.constants.is_empty() {
            let mut records: Vec<ConstantVariable> = reflection
                .constants
                .iter()
                .map(|(name, merged)| {
                    let mut record = ConstantVariable {
                        name: [0; NAME_MAX_LENGTH],
                        offset: merged.offset,
                        size: merged.size,
                        stage_flags: merged.stage_flags,
                    };
                    write_name(&mut record.name, name);
                    record
                })
                .collect();

            records
                .sort_by_key(|record| std::cmp::Reverse(record.stage_flags.count_ones()));

            if records.len() > MAX_PUSH_CONSTANTS {
                tracing::warn!(
                    limit = MAX_PUSH_CONSTANTS,
                    found = records.len(),
                    "shader has more push constants than supported"
                );
                records.truncate(MAX_PUSH_CONSTANTS);
            }

            buffer.update(variant, |record| {
                record.constant_variable_count = records.len() as u32;
            });

            let constants = buffer.write_slice(&records);
            buffer.link(
                variant,
                offset_of!(ShaderVariant, constant_variables),
                constants,
            );
        }

        if set_count > 0 {
            let mut dropped = 0u32;
            let mut per_set: BTreeMap<u32, Vec<Descriptor>> = BTreeMap::new();

            for (name, binding) in &reflection.bindings {
                if binding.set as usize >= MAX_DESCRIPTOR_SETS {
                    tracing::warn!(
                        set = binding.set,
                        limit = MAX_DESCRIPTOR_SETS,
                        "descriptor set outside of supported range"
                    );
                    dropped += 1;
                    continue;
                }

                let mut descriptor = Descriptor {
                    count: binding.count,
                    write_stage_mask: binding.write_stage_mask,
                    kind: binding.kind as u16,
                    _reserved: 0,
                    name: [0; NAME_MAX_LENGTH],
                };
                write_name(&mut descriptor.name, name);
                per_set.entry(binding.set).or_default().push(descriptor);
            }

            let emitted_sets = set_count.min(MAX_DESCRIPTOR_SETS as u32);

            if dropped > 0 {
                tracing::warn!(dropped, "descriptors dropped by range checks");
            }

            buffer.update(variant, |record| {
                record.descriptor_set_count = emitted_sets;
            });

            let sets_ptr = buffer.alloc::<DescriptorSet>(emitted_sets as usize);
            buffer.link(variant, offset_of!(ShaderVariant, descriptor_sets), sets_ptr);

            for (set_index, descriptors) in &per_set {
                let set_record = sets_ptr.element(*set_index as usize);

                buffer.update(set_record, |record| {
                    record.stage_flags = reflection
                        .set_stage_flags
                        .get(set_index)
                        .copied()
                        .unwrap_or(0);
                    record.descriptor_count = descriptors.len() as u32;
                });

                let descriptors_ptr = buffer.write_slice(descriptors);
                buffer.link(
                    set_record,
                    offset_of!(DescriptorSet, descriptors),
                    descriptors_ptr,
                );
            }
        }
    }

    persist(dst, &mut buffer, false)?;

    Ok(WriteStatus::Written)
}

#[cfg(test)]
mod tests {
    use asset_format::shader::{DescriptorType, ShaderStage, MAX_STAGES};

    use super::{compress_bind_indices, MergedBinding, Reflection};

    fn binding(set: u32, max_binding: u32) -> MergedBinding {
        MergedBinding {
            first_stage: ShaderStage::Vertex as usize,
            set,
            max_binding,
            count: 1,
            write_stage_mask: 0,
            kind: DescriptorType::StorageBuffer,
            per_stage_var: [None; MAX_STAGES],
        }
    }

    #[test]
    fn set_and_binding_compaction_is_dense() {
        let mut reflection = Reflection::default();
        reflection.set_stage_flags.insert(1, 0b1);
        reflection.set_stage_flags.insert(3, 0b10);
        reflection.bindings.insert("a".into(), binding(1, 5));
        reflection.bindings.insert("b".into(), binding(1, 2));
        reflection.bindings.insert("c".into(), binding(3, 9));

        let set_count = compress_bind_indices(&mut reflection, &mut []);
        assert_eq!(set_count, 2);

        // Sets renumber densely in first-appearance order.
        assert_eq!(reflection.bindings["a"].set, 0);
        assert_eq!(reflection.bindings["c"].set, 1);

        // Within a set, bindings become 0..n-1 ordered by the original
        // maximum binding number.
        assert_eq!(reflection.bindings["b"].max_binding, 0);
        assert_eq!(reflection.bindings["a"].max_binding, 1);
        assert_eq!(reflection.bindings["c"].max_binding, 0);

        assert_eq!(
            reflection.set_stage_flags.iter().collect::<Vec<_>>(),
            vec![(&0, &0b1), (&1, &0b10)]
        );
    }
}
