//! SPIR-V reflection over the raw word stream.
//!
//! The module walks the bytecode directly with the `spirv` crate's opcode
//! constants: descriptor enumeration, vertex inputs, push constants, compute
//! group size, and a deliberately simple linear-scan resource-write analysis.
//! Set and binding decorations can be patched in place so the compacted
//! numbering is serialised back without rebuilding the module.

use hashbrown::{HashMap, HashSet};
use spirv::{Decoration, ExecutionMode, Op, StorageClass};

use asset_format::shader::DescriptorType;
use asset_format::ElementType;

use crate::Error;

const HEADER_WORDS: usize = 5;

fn op(code: Op) -> u32 {
    code as u32
}

#[derive(Clone, Debug, Default)]
struct VarDecorations {
    set: Option<u32>,
    binding: Option<u32>,
    location: Option<u32>,
    builtin: bool,
}

#[derive(Clone, Debug)]
enum TypeInfo {
    Void,
    Bool,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, count: u32 },
    Image { sampled: u32 },
    Sampler,
    SampledImage,
    Array { element: u32, length: u32 },
    RuntimeArray { element: u32 },
    Struct { members: Vec<u32> },
    Pointer { storage_class: u32, pointee: u32 },
    AccelerationStructure,
    Other,
}

#[derive(Copy, Clone, Debug)]
struct Variable {
    id: u32,
    type_id: u32,
    storage_class: u32,
}

/// One descriptor-bound resource of a module.
#[derive(Clone, Debug)]
pub struct BindingInfo {
    pub var_id: u32,
    pub set: u32,
    pub binding: u32,
    pub kind: DescriptorType,
    /// `None` for runtime-sized arrays.
    pub count: Option<u32>,
    pub name: String,
    pub accessed: bool,
    pub written: bool,
}

#[derive(Clone, Debug)]
pub struct VertexInput {
    pub name: String,
    pub location: u32,
    pub element_type: ElementType,
}

#[derive(Clone, Debug)]
pub struct PushConstantBlock {
    pub type_name: String,
    pub size: u32,
}

pub struct ReflectModule {
    words: Vec<u32>,
    names: HashMap<u32, String>,
    member_names: HashMap<u32, Vec<(u32, String)>>,
    decorations: HashMap<u32, VarDecorations>,
    member_builtins: HashSet<u32>,
    member_offsets: HashMap<u32, Vec<(u32, u32)>>,
    types: HashMap<u32, TypeInfo>,
    constants: HashMap<u32, u32>,
    variables: Vec<Variable>,
    local_size: Option<[u32; 3]>,
    local_size_ids: Option<[u32; 3]>,
    /// `(target, decoration) -> word index of the literal operand`, for
    /// in-place renumbering.
    decoration_slots: HashMap<(u32, u32), usize>,
}

fn read_string(operands: &[u32]) -> (String, usize) {
    let mut bytes = Vec::new();
    let mut consumed = 0;

    'words: for word in operands {
        consumed += 1;

        for byte in word.to_le_bytes() {
            if byte == 0 {
                break 'words;
            }

            bytes.push(byte);
        }
    }

    (String::from_utf8_lossy(&bytes).into_owned(), consumed)
}

impl ReflectModule {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() % 4 != 0 || bytes.len() < HEADER_WORDS * 4 {
            return Err(Error::Reflect("truncated module".into()));
        }

        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
            .collect();

        if words[0] != spirv::MAGIC_NUMBER {
            return Err(Error::Reflect(format!("bad magic {:#x}", words[0])));
        }

        let mut module = Self {
            words,
            names: HashMap::new(),
            member_names: HashMap::new(),
            decorations: HashMap::new(),
            member_builtins: HashSet::new(),
            member_offsets: HashMap::new(),
            types: HashMap::new(),
            constants: HashMap::new(),
            variables: Vec::new(),
            local_size: None,
            local_size_ids: None,
            decoration_slots: HashMap::new(),
        };

        module.parse_instructions()?;
        Ok(module)
    }

    fn parse_instructions(&mut self) -> Result<(), Error> {
        let mut index = HEADER_WORDS;

        while index < self.words.len() {
            let word = self.words[index];
            let opcode = word & 0xFFFF;
            let count = (word >> 16) as usize;

            if count == 0 || index + count > self.words.len() {
                return Err(Error::Reflect(format!(
                    "invalid instruction length at word {index}"
                )));
            }

            let operands = self.words[index + 1..index + count].to_vec();

            if opcode == op(Op::Name) {
                let (name, _) = read_string(&operands[1..]);
                self.names.insert(operands[0], name);
            } else if opcode == op(Op::MemberName) {
                let (name, _) = read_string(&operands[2..]);
                self.member_names
                    .entry(operands[0])
                    .or_default()
                    .push((operands[1], name));
            } else if opcode == op(Op::ExecutionMode) {
                if operands[1] == ExecutionMode::LocalSize as u32 && operands.len() >= 5 {
                    self.local_size = Some([operands[2], operands[3], operands[4]]);
                }
            } else if opcode == op(Op::ExecutionModeId) {
                if operands[1] == ExecutionMode::LocalSizeId as u32 && operands.len() >= 5 {
                    self.local_size_ids = Some([operands[2], operands[3], operands[4]]);
                }
            } else if opcode == op(Op::Decorate) {
                let target = operands[0];
                let decoration = operands[1];
                let entry = self.decorations.entry(target).or_default();

                if decoration == Decoration::DescriptorSet as u32 {
                    entry.set = Some(operands[2]);
                    self.decoration_slots
                        .insert((target, decoration), index + 3);
                } else if decoration == Decoration::Binding as u32 {
                    entry.binding = Some(operands[2]);
                    self.decoration_slots
                        .insert((target, decoration), index + 3);
                } else if decoration == Decoration::Location as u32 {
                    entry.location = Some(operands[2]);
                } else if decoration == Decoration::BuiltIn as u32 {
                    entry.builtin = true;
                }
            } else if opcode == op(Op::MemberDecorate) {
                if operands[2] == Decoration::BuiltIn as u32 {
                    self.member_builtins.insert(operands[0]);
                } else if operands[2] == Decoration::Offset as u32 {
                    self.member_offsets
                        .entry(operands[0])
                        .or_default()
                        .push((operands[1], operands[3]));
                }
            } else if opcode == op(Op::TypeVoid) {
                self.types.insert(operands[0], TypeInfo::Void);
            } else if opcode == op(Op::TypeBool) {
                self.types.insert(operands[0], TypeInfo::Bool);
            } else if opcode == op(Op::TypeInt) {
                self.types.insert(
                    operands[0],
                    TypeInfo::Int {
                        width: operands[1],
                        signed: operands[2] != 0,
                    },
                );
            } else if opcode == op(Op::TypeFloat) {
                self.types
                    .insert(operands[0], TypeInfo::Float { width: operands[1] });
            } else if opcode == op(Op::TypeVector) {
                self.types.insert(
                    operands[0],
                    TypeInfo::Vector {
                        component: operands[1],
                        count: operands[2],
                    },
                );
            } else if opcode == op(Op::TypeMatrix) {
                self.types.insert(
                    operands[0],
                    TypeInfo::Matrix {
                        column: operands[1],
                        count: operands[2],
                    },
                );
            } else if opcode == op(Op::TypeImage) {
                self.types
                    .insert(operands[0], TypeInfo::Image { sampled: operands[6] });
            } else if opcode == op(Op::TypeSampler) {
                self.types.insert(operands[0], TypeInfo::Sampler);
            } else if opcode == op(Op::TypeSampledImage) {
                self.types.insert(operands[0], TypeInfo::SampledImage);
            } else if opcode == op(Op::TypeArray) {
                self.types.insert(
                    operands[0],
                    TypeInfo::Array {
                        element: operands[1],
                        length: operands[2],
                    },
                );
            } else if opcode == op(Op::TypeRuntimeArray) {
                self.types
                    .insert(operands[0], TypeInfo::RuntimeArray { element: operands[1] });
            } else if opcode == op(Op::TypeStruct) {
                self.types.insert(
                    operands[0],
                    TypeInfo::Struct {
                        members: operands[1..].to_vec(),
                    },
                );
            } else if opcode == op(Op::TypePointer) {
                self.types.insert(
                    operands[0],
                    TypeInfo::Pointer {
                        storage_class: operands[1],
                        pointee: operands[2],
                    },
                );
            } else if opcode == op(Op::TypeAccelerationStructureKHR) {
                self.types
                    .insert(operands[0], TypeInfo::AccelerationStructure);
            } else if opcode == op(Op::TypeFunction) {
                self.types.insert(operands[0], TypeInfo::Other);
            } else if opcode == op(Op::Constant) {
                if let Some(value) = operands.get(2) {
                    self.constants.insert(operands[1], *value);
                }
            } else if opcode == op(Op::Variable) {
                self.variables.push(Variable {
                    id: operands[1],
                    type_id: operands[0],
                    storage_class: operands[2],
                });
            }

            index += count;
        }

        Ok(())
    }

    /// Iterates `(opcode, operand range)` over the instruction stream.
    fn instructions(&self) -> impl Iterator<Item = (u32, &[u32])> {
        let words = &self.words;
        let mut index = HEADER_WORDS;

        std::iter::from_fn(move || {
            if index >= words.len() {
                return None;
            }

            let word = words[index];
            let opcode = word & 0xFFFF;
            let count = ((word >> 16) as usize).max(1);
            let operands = &words[index + 1..(index + count).min(words.len())];
            index += count;

            Some((opcode, operands))
        })
    }

    fn pointee(&self, pointer_type: u32) -> Option<&TypeInfo> {
        match self.types.get(&pointer_type) {
            Some(TypeInfo::Pointer { pointee, .. }) => self.types.get(pointee),
            _ => None,
        }
    }

    fn pointee_id(&self, pointer_type: u32) -> Option<u32> {
        match self.types.get(&pointer_type) {
            Some(TypeInfo::Pointer { pointee, .. }) => Some(*pointee),
            _ => None,
        }
    }

    /// Descends arrays to the element type, multiplying constant lengths.
    /// Returns the terminal type id and the element count (`None` for
    /// runtime-sized arrays).
    fn descend_arrays(&self, mut type_id: u32) -> (u32, Option<u32>) {
        let mut count = Some(1u32);

        loop {
            match self.types.get(&type_id) {
                Some(TypeInfo::Array { element, length }) => {
                    let len = self.constants.get(length).copied().unwrap_or(1);
                    count = count.map(|c| c.saturating_mul(len.max(1)));
                    type_id = *element;
                }
                Some(TypeInfo::RuntimeArray { element }) => {
                    count = None;
                    type_id = *element;
                }
                _ => return (type_id, count),
            }
        }
    }

    fn classify(&self, storage_class: u32, type_id: u32) -> Option<DescriptorType> {
        if storage_class == StorageClass::Uniform as u32 {
            return Some(DescriptorType::ConstantBuffer);
        }

        if storage_class == StorageClass::StorageBuffer as u32 {
            return Some(DescriptorType::StorageBuffer);
        }

        if storage_class != StorageClass::UniformConstant as u32 {
            return None;
        }

        match self.types.get(&type_id) {
            Some(TypeInfo::Image { sampled }) => {
                if *sampled == 2 {
                    Some(DescriptorType::Image)
                } else {
                    Some(DescriptorType::Texture)
                }
            }
            Some(TypeInfo::SampledImage) => Some(DescriptorType::SamplerTexture),
            Some(TypeInfo::Sampler) => Some(DescriptorType::Sampler),
            Some(TypeInfo::AccelerationStructure) => Some(DescriptorType::AccelerationStructure),
            _ => Some(DescriptorType::ConstantBuffer),
        }
    }

    /// True when any instruction reads through or addresses the variable.
    fn is_accessed(&self, var_id: u32) -> bool {
        self.instructions().any(|(opcode, operands)| {
            if opcode == op(Op::Load)
                || opcode == op(Op::AccessChain)
                || opcode == op(Op::InBoundsAccessChain)
            {
                operands.get(2) == Some(&var_id)
            } else if opcode == op(Op::Store) {
                operands.first() == Some(&var_id)
            } else if opcode == op(Op::CopyMemory) {
                operands.first() == Some(&var_id) || operands.get(1) == Some(&var_id)
            } else {
                false
            }
        })
    }

    /// A buffer variable is written when some access chain rooted at it is
    /// the pointer operand of a store or atomic write.
    fn is_buffer_written(&self, var_id: u32) -> bool {
        self.instructions().any(|(opcode, operands)| {
            (opcode == op(Op::AccessChain) || opcode == op(Op::InBoundsAccessChain))
                && operands.get(2) == Some(&var_id)
                && operands
                    .get(1)
                    .is_some_and(|chain| self.is_pointer_stored(*chain))
        })
    }

    fn is_pointer_stored(&self, pointer_id: u32) -> bool {
        self.instructions().any(|(opcode, operands)| {
            if opcode == op(Op::Store) || opcode == op(Op::AtomicStore) {
                operands.first() == Some(&pointer_id)
            } else if opcode == op(Op::AtomicExchange)
                || opcode == op(Op::AtomicCompareExchange)
                || opcode == op(Op::AtomicCompareExchangeWeak)
                || opcode == op(Op::AtomicIIncrement)
                || opcode == op(Op::AtomicIDecrement)
                || opcode == op(Op::AtomicIAdd)
                || opcode == op(Op::AtomicISub)
                || opcode == op(Op::AtomicSMin)
                || opcode == op(Op::AtomicUMin)
                || opcode == op(Op::AtomicSMax)
                || opcode == op(Op::AtomicUMax)
                || opcode == op(Op::AtomicAnd)
                || opcode == op(Op::AtomicOr)
                || opcode == op(Op::AtomicXor)
                || opcode == op(Op::AtomicFAddEXT)
            {
                operands.get(2) == Some(&pointer_id)
            } else {
                false
            }
        })
    }

    /// An image variable is written when some load of it feeds an
    /// `OpImageWrite`.
    fn is_image_written(&self, var_id: u32) -> bool {
        self.instructions().any(|(opcode, operands)| {
            opcode == op(Op::Load)
                && operands.get(2) == Some(&var_id)
                && operands.get(1).is_some_and(|loaded| {
                    self.instructions().any(|(opcode, operands)| {
                        opcode == op(Op::ImageWrite) && operands.first() == Some(loaded)
                    })
                })
        })
    }

    fn binding_name(&self, variable: &Variable, terminal_type: u32) -> String {
        let mut name = self
            .names
            .get(&variable.id)
            .filter(|name| !name.is_empty())
            .cloned()
            .or_else(|| self.names.get(&terminal_type).cloned())
            .unwrap_or_default();

        // Generated buffer wrappers carry an alias suffix; reflect the single
        // member's name instead.
        if let Some(stripped) = name.strip_suffix("_pkalias") {
            let single_member = matches!(
                self.types.get(&terminal_type),
                Some(TypeInfo::Struct { members }) if members.len() == 1
            );

            if single_member {
                if let Some(member) = self
                    .member_names
                    .get(&terminal_type)
                    .and_then(|members| members.first())
                {
                    return member.1.clone();
                }
            }

            name = stripped.to_string();
        }

        name
    }

    /// Enumerates every descriptor-bound resource.
    pub fn descriptor_bindings(&self) -> Vec<BindingInfo> {
        let mut bindings = Vec::new();

        for variable in &self.variables {
            let descriptor_classes = [
                StorageClass::Uniform as u32,
                StorageClass::StorageBuffer as u32,
                StorageClass::UniformConstant as u32,
            ];

            if !descriptor_classes.contains(&variable.storage_class) {
                continue;
            }

            let Some(pointee) = self.pointee_id(variable.type_id) else {
                continue;
            };

            let (terminal, count) = self.descend_arrays(pointee);

            let Some(kind) = self.classify(variable.storage_class, terminal) else {
                continue;
            };

            let decorations = self.decorations.get(&variable.id).cloned().unwrap_or_default();
            let written = match kind {
                DescriptorType::Image => self.is_image_written(variable.id),
                DescriptorType::StorageBuffer | DescriptorType::DynamicStorageBuffer => {
                    self.is_buffer_written(variable.id)
                }
                _ => false,
            };

            bindings.push(BindingInfo {
                var_id: variable.id,
                set: decorations.set.unwrap_or(0),
                binding: decorations.binding.unwrap_or(0),
                kind,
                count,
                name: self.binding_name(variable, terminal),
                accessed: self.is_accessed(variable.id),
                written,
            });
        }

        bindings
    }

    pub fn find_binding(&self, set: u32, binding: u32) -> Option<u32> {
        self.descriptor_bindings()
            .iter()
            .find(|info| info.set == set && info.binding == binding)
            .map(|info| info.var_id)
    }

    fn element_type_of(&self, type_id: u32) -> ElementType {
        let scalar = |width: u32, signed: Option<bool>| match (width, signed) {
            (16, Some(true)) => ElementType::Short,
            (16, Some(false)) => ElementType::Ushort,
            (16, None) => ElementType::Half,
            (32, Some(true)) => ElementType::Int,
            (32, Some(false)) => ElementType::Uint,
            (32, None) => ElementType::Float,
            (64, Some(true)) => ElementType::Long,
            (64, Some(false)) => ElementType::Ulong,
            (64, None) => ElementType::Double,
            _ => ElementType::Invalid,
        };

        let widen = |base: ElementType, count: u32| {
            let step = count.saturating_sub(1) as u16;

            if base == ElementType::Invalid || count == 0 || count > 4 {
                return ElementType::Invalid;
            }

            ElementType::from_raw(base as u16 + step)
        };

        match self.types.get(&type_id) {
            Some(TypeInfo::Float { width }) => scalar(*width, None),
            Some(TypeInfo::Int { width, signed }) => scalar(*width, Some(*signed)),
            Some(TypeInfo::Vector { component, count }) => {
                widen(self.element_type_of(*component), *count)
            }
            _ => ElementType::Invalid,
        }
    }

    /// Vertex-stage input variables, built-ins excluded.
    pub fn vertex_inputs(&self) -> Vec<VertexInput> {
        let mut inputs = Vec::new();

        for variable in &self.variables {
            if variable.storage_class != StorageClass::Input as u32 {
                continue;
            }

            let decorations = self.decorations.get(&variable.id).cloned().unwrap_or_default();

            if decorations.builtin {
                continue;
            }

            let Some(pointee) = self.pointee_id(variable.type_id) else {
                continue;
            };

            if self.member_builtins.contains(&pointee) {
                continue;
            }

            inputs.push(VertexInput {
                name: self.names.get(&variable.id).cloned().unwrap_or_default(),
                location: decorations.location.unwrap_or(0),
                element_type: self.element_type_of(pointee),
            });
        }

        inputs.sort_by_key(|input| input.location);
        inputs
    }

    fn type_size(&self, type_id: u32) -> u32 {
        match self.types.get(&type_id) {
            Some(TypeInfo::Int { width, .. }) | Some(TypeInfo::Float { width }) => width / 8,
            Some(TypeInfo::Vector { component, count }) => self.type_size(*component) * count,
            Some(TypeInfo::Matrix { column, count }) => self.type_size(*column) * count,
            Some(TypeInfo::Array { element, length }) => {
                let len = self.constants.get(length).copied().unwrap_or(0);
                self.type_size(*element) * len
            }
            Some(TypeInfo::Struct { members }) => {
                let offsets = self.member_offsets.get(&type_id);

                members
                    .iter()
                    .enumerate()
                    .map(|(index, member)| {
                        let offset = offsets
                            .and_then(|offsets| {
                                offsets
                                    .iter()
                                    .find(|(m, _)| *m == index as u32)
                                    .map(|(_, o)| *o)
                            })
                            .unwrap_or(0);
                        offset + self.type_size(*member)
                    })
                    .max()
                    .unwrap_or(0)
            }
            _ => 0,
        }
    }

    /// Push-constant interface blocks with their computed byte sizes.
    pub fn push_constant_blocks(&self) -> Vec<PushConstantBlock> {
        let mut blocks = Vec::new();

        for variable in &self.variables {
            if variable.storage_class != StorageClass::PushConstant as u32 {
                continue;
            }

            let Some(pointee) = self.pointee_id(variable.type_id) else {
                continue;
            };

            blocks.push(PushConstantBlock {
                type_name: self.names.get(&pointee).cloned().unwrap_or_default(),
                size: self.type_size(pointee),
            });
        }

        blocks
    }

    /// Compute workgroup dimensions. Literal `LocalSize` execution modes win;
    /// `LocalSizeId` operands are resolved through their constants otherwise.
    pub fn compute_group_size(&self) -> Option<[u32; 3]> {
        if let Some(size) = self.local_size {
            return Some(size);
        }

        let ids = self.local_size_ids?;
        let mut size = [0u32; 3];

        for (slot, id) in size.iter_mut().zip(ids) {
            *slot = self.constants.get(&id).copied()?;
        }

        Some(size)
    }

    /// Rewrites the descriptor-set decoration literal of a variable.
    pub fn set_descriptor_set(&mut self, var_id: u32, value: u32) {
        if let Some(&slot) = self
            .decoration_slots
            .get(&(var_id, Decoration::DescriptorSet as u32))
        {
            self.words[slot] = value;
        }

        if let Some(decorations) = self.decorations.get_mut(&var_id) {
            decorations.set = Some(value);
        }
    }

    /// Rewrites the binding decoration literal of a variable.
    pub fn set_binding(&mut self, var_id: u32, value: u32) {
        if let Some(&slot) = self
            .decoration_slots
            .get(&(var_id, Decoration::Binding as u32))
        {
            self.words[slot] = value;
        }

        if let Some(decorations) = self.decorations.get_mut(&var_id) {
            decorations.binding = Some(value);
        }
    }

    /// Serialises the (possibly patched) module back to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.words.len() * 4);

        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }

        bytes
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

#[cfg(test)]
mod tests {
    use spirv::{Decoration, ExecutionMode, Op, StorageClass};

    use super::ReflectModule;

    struct Assembler {
        words: Vec<u32>,
    }

    impl Assembler {
        fn new(bound: u32) -> Self {
            Self {
                words: vec![spirv::MAGIC_NUMBER, 0x0001_0600, 0, bound, 0],
            }
        }

        fn ins(&mut self, opcode: Op, operands: &[u32]) -> &mut Self {
            self.words
                .push((opcode as u32) | (((operands.len() + 1) as u32) << 16));
            self.words.extend_from_slice(operands);
            self
        }

        fn bytes(&self) -> Vec<u8> {
            self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
        }
    }

    // %1 = void, %2 = f32, %3 = ptr StorageBuffer f32, %4/%5 = variables,
    // %6 = access chain of %4 stored through, %7 = access chain of %5 only
    // loaded.
    fn storage_module() -> Vec<u8> {
        let mut asm = Assembler::new(20);
        asm.ins(Op::TypeVoid, &[1])
            .ins(Op::TypeFloat, &[2, 32])
            .ins(
                Op::TypePointer,
                &[3, StorageClass::StorageBuffer as u32, 2],
            )
            .ins(
                Op::Variable,
                &[3, 4, StorageClass::StorageBuffer as u32],
            )
            .ins(
                Op::Variable,
                &[3, 5, StorageClass::StorageBuffer as u32],
            )
            .ins(Op::AccessChain, &[3, 6, 4])
            .ins(Op::AccessChain, &[3, 7, 5])
            .ins(Op::Load, &[2, 8, 7])
            .ins(Op::Store, &[6, 8]);
        asm.bytes()
    }

    #[test]
    fn buffer_write_analysis() {
        let module = ReflectModule::parse(&storage_module()).unwrap();

        assert!(module.is_buffer_written(4));
        assert!(!module.is_buffer_written(5));
        assert!(module.is_accessed(4));
        assert!(module.is_accessed(5));
    }

    #[test]
    fn local_size_id_resolution() {
        let mut asm = Assembler::new(20);
        asm.ins(Op::TypeInt, &[1, 32, 0])
            .ins(Op::Constant, &[1, 2, 8])
            .ins(Op::Constant, &[1, 3, 4])
            .ins(Op::Constant, &[1, 4, 1])
            .ins(
                Op::ExecutionModeId,
                &[9, ExecutionMode::LocalSizeId as u32, 2, 3, 4],
            );

        let module = ReflectModule::parse(&asm.bytes()).unwrap();
        assert_eq!(module.compute_group_size(), Some([8, 4, 1]));
    }

    #[test]
    fn literal_local_size_wins() {
        let mut asm = Assembler::new(20);
        asm.ins(Op::TypeInt, &[1, 32, 0])
            .ins(Op::Constant, &[1, 2, 8])
            .ins(
                Op::ExecutionMode,
                &[9, ExecutionMode::LocalSize as u32, 16, 2, 1],
            )
            .ins(
                Op::ExecutionModeId,
                &[9, ExecutionMode::LocalSizeId as u32, 2, 2, 2],
            );

        let module = ReflectModule::parse(&asm.bytes()).unwrap();
        assert_eq!(module.compute_group_size(), Some([16, 2, 1]));
    }

    #[test]
    fn binding_patch_roundtrips_through_serialisation() {
        let mut asm = Assembler::new(20);
        asm.ins(Op::Decorate, &[4, Decoration::DescriptorSet as u32, 2])
            .ins(Op::Decorate, &[4, Decoration::Binding as u32, 7])
            .ins(Op::TypeFloat, &[2, 32])
            .ins(
                Op::TypePointer,
                &[3, StorageClass::StorageBuffer as u32, 2],
            )
            .ins(
                Op::Variable,
                &[3, 4, StorageClass::StorageBuffer as u32],
            );

        let mut module = ReflectModule::parse(&asm.bytes()).unwrap();
        let bindings = module.descriptor_bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!((bindings[0].set, bindings[0].binding), (2, 7));

        module.set_descriptor_set(4, 0);
        module.set_binding(4, 1);

        let reparsed = ReflectModule::parse(&module.to_bytes()).unwrap();
        let bindings = reparsed.descriptor_bindings();
        assert_eq!((bindings[0].set, bindings[0].binding), (0, 1));
    }
}
