//! GLSL to SPIR-V compilation through shaderc.
//!
//! Every stage is compiled twice: once without optimisation for reflection,
//! and once with performance optimisation (optionally with debug info) for
//! the bytes that get persisted.

use std::io::IsTerminal;

use asset_format::shader::ShaderStage;

use crate::Error;

pub struct CompiledStage {
    /// Unoptimised module used for reflection analysis.
    pub reflection: Vec<u8>,
    /// Optimised module that ends up in the asset.
    pub release: Vec<u8>,
}

fn shader_kind(stage: ShaderStage) -> shaderc::ShaderKind {
    match stage {
        ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
        ShaderStage::TesselationControl => shaderc::ShaderKind::TessControl,
        ShaderStage::TesselationEvaluation => shaderc::ShaderKind::TessEvaluation,
        ShaderStage::Geometry => shaderc::ShaderKind::Geometry,
        ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        ShaderStage::Compute => shaderc::ShaderKind::Compute,
        ShaderStage::MeshTask => shaderc::ShaderKind::Task,
        ShaderStage::MeshAssembly => shaderc::ShaderKind::Mesh,
        ShaderStage::RayGeneration => shaderc::ShaderKind::RayGeneration,
        ShaderStage::RayMiss => shaderc::ShaderKind::Miss,
        ShaderStage::RayClosestHit => shaderc::ShaderKind::ClosestHit,
        ShaderStage::RayAnyHit => shaderc::ShaderKind::AnyHit,
        ShaderStage::RayIntersection => shaderc::ShaderKind::Intersection,
    }
}

fn base_options() -> Result<shaderc::CompileOptions<'static>, Error> {
    let mut options = shaderc::CompileOptions::new().map_err(|_| Error::CompilerInit)?;

    options.set_auto_bind_uniforms(true);
    options.set_auto_map_locations(true);
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_3 as u32,
    );
    options.set_target_spirv(shaderc::SpirvVersion::V1_6);

    Ok(options)
}

/// Extracts the `name:line:` range referenced by a shaderc error message.
fn find_line_range(name: &str, message: &str) -> Option<(i64, i64)> {
    let token = format!("{name}:");
    let mut min = i64::MAX;
    let mut max = i64::MIN;
    let mut offset = 0;

    while let Some(pos) = message[offset..].find(&token).map(|p| p + offset) {
        let digits: String = message[pos + token.len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();

        if let Ok(line) = digits.parse::<i64>() {
            min = min.min(line);
            max = max.max(line);
        }

        offset = pos + token.len();
    }

    (min <= max).then_some((min, max))
}

/// Prints the compiler message plus ±5 lines of source context around the
/// reported range, highlighted when stdout is a terminal.
fn print_error_context(name: &str, source: &str, message: &str) {
    const LINE_PADDING: i64 = 5;

    let colored = std::io::stdout().is_terminal();
    let (highlight, reset) = if colored { ("\x1b[31m", "\x1b[0m") } else { ("", "") };

    println!("{highlight}");
    println!(" ----------BEGIN ERROR---------- ");
    println!();
    println!("{message}");

    if let Some((min, max)) = find_line_range(name, message) {
        let min = min - LINE_PADDING;
        let max = max + LINE_PADDING;

        for (index, line) in source.lines().enumerate() {
            let index = index as i64;

            if index > min && index < max {
                println!("{index}: {line}");
            }
        }
    }

    println!(" ----------END ERROR---------- ");
    println!("{reset}");
}

/// Compiles one stage into its reflection and release SPIR-V modules.
pub fn compile_stage(
    compiler: &shaderc::Compiler,
    name: &str,
    stage: ShaderStage,
    source: &str,
    debug_info: bool,
) -> Result<CompiledStage, Error> {
    let kind = shader_kind(stage);

    let options = base_options()?;
    let reflection =
        match compiler.compile_into_spirv(source, kind, name, "main", Some(&options)) {
            Ok(artifact) => {
                if artifact.get_num_warnings() > 0 {
                    print_error_context(name, source, &artifact.get_warning_messages());
                }

                artifact.as_binary_u8().to_vec()
            }
            Err(err) => {
                print_error_context(name, source, &err.to_string());
                return Err(Error::Compile(format!("{name} {:?}", stage)));
            }
        };

    let mut options = base_options()?;
    options.set_optimization_level(shaderc::OptimizationLevel::Performance);

    if debug_info {
        options.set_generate_debug_info();
    }

    let release = match compiler.compile_into_spirv(source, kind, name, "main", Some(&options)) {
        Ok(artifact) => artifact.as_binary_u8().to_vec(),
        Err(err) => {
            print_error_context(name, source, &err.to_string());
            return Err(Error::Compile(format!("{name} {:?}", stage)));
        }
    };

    Ok(CompiledStage {
        reflection,
        release,
    })
}

#[cfg(test)]
mod tests {
    use super::find_line_range;

    #[test]
    fn line_range_from_error_message() {
        let message = "\
blit:12: error: 'foo' : undeclared identifier
blit:15: error: '' : compilation terminated
";
        assert_eq!(find_line_range("blit", message), Some((12, 15)));
        assert_eq!(find_line_range("other", message), None);
    }
}
