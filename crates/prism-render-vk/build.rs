use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    // Vertex shader: matches the pipeline vertex layout
    //   - binding 0, location 0: R32G32B32_SFLOAT (position)
    //   - binding 0, location 1: R32G32B32_SFLOAT (color)
    // No descriptor sets: positions are already in clip space.
    let vs_src = r#"
#version 450
layout(location = 0) in vec3 inPosition;
layout(location = 1) in vec3 inColor;

layout(location = 0) out vec3 vColor;

void main() {
    vColor = inColor;
    gl_Position = vec4(inPosition, 1.0);
}
"#;

    let fs_src = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0);
}
"#;

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");

    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "mesh.vert",
            "main",
            Some(&opts),
        )
        .expect("compile vertex shader");

    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "mesh.frag",
            "main",
            Some(&opts),
        )
        .expect("compile fragment shader");

    // File names follow the logical stage names used by ShaderSource
    fs::write(out.join("vertex.spv"), vs_spv.as_binary_u8()).expect("write vertex.spv");
    fs::write(out.join("fragment.spv"), fs_spv.as_binary_u8()).expect("write fragment.spv");

    println!("cargo:rerun-if-changed=build.rs");
}
