use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use rhi::shader::{FragmentOutput, VertexAttributeDesc, VertexOutput};
use rhi::{DrawMode, GraphicsApi, PixelFormat, ShaderDescription, ShaderStage, StagePipeline, VarType};
use shader_gen::{
    CompilationSettings, CompilationStep, ExecStatus, ShaderCompilation, ShaderGenError, ShaderOptions,
};
use tempfile::tempdir;

fn description() -> ShaderDescription {
    let mut description = ShaderDescription {
        pipeline: StagePipeline::VsPs,
        draw_mode: DrawMode::Triangles,
        ..Default::default()
    };
    description.bindings.input_attributes.push(VertexAttributeDesc {
        name: "Position".into(),
        ty: VarType::Float3,
        location: 0,
    });
    description.vertex_output.push(VertexOutput::new("Color", VarType::Float4));
    description.fragment_output.push(FragmentOutput {
        name: "Output0".into(),
        format: PixelFormat::Unorm8Rgba,
    });
    description
}

const BODY: &str = concat!(
    "#if defined(VINPUT_Position)\n",
    "void\tVertexMain(IN(SVertexInput) vInput, OUT(SVertexOutput) vOutput VS_ARGS)\n",
    "{\n",
    "\tvOutput.VertexPosition = vec4(vInput.Position, 1.0);\n",
    "}\n",
    "#endif\n",
);

fn write_body(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("Source.vert");
    std::fs::write(&path, body).unwrap();
    path
}

fn job(input: &Path, output: &Path, settings: CompilationSettings) -> ShaderCompilation {
    ShaderCompilation::new(
        input,
        output,
        "Fwd|perm=3",
        ShaderStage::Vertex,
        ShaderOptions::empty(),
        description(),
        settings,
    )
}

fn lock(path: &Path) -> File {
    let file = OpenOptions::new().write(true).create(true).truncate(false).open(path).unwrap();
    file.try_lock().unwrap();
    file
}

#[test]
fn exec_generates_preprocessed_source() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let input = write_body(tmp, BODY);
    let output = tmp.join("out/Fwd.vert.glsl");

    let settings = CompilationSettings::default().with_target(GraphicsApi::OpenGL, "");
    let status = job(&input, &output, settings).exec(GraphicsApi::OpenGL).unwrap();
    assert_eq!(status, ExecStatus::Compiled);

    let text = std::fs::read_to_string(&output).unwrap();
    assert!(text.contains("#version 330"));
    assert!(text.contains("VertexMain"));
    assert!(!text.contains("#if defined"));
    assert!(!tmp.join("out/Fwd.vert.glsl.lock").exists());
    assert!(!tmp.join("out/Fwd.vert.glsl.generated").exists());
}

#[test]
fn held_lock_reports_in_flight_without_touching_output() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let input = write_body(tmp, BODY);
    let output = tmp.join("Fwd.vert.glsl");
    std::fs::write(&output, "previous artifact").unwrap();

    let lock_path = tmp.join("Fwd.vert.glsl.lock");
    let held = lock(&lock_path);

    let settings = CompilationSettings::default().with_target(GraphicsApi::OpenGL, "");
    let status = job(&input, &output, settings.clone()).exec(GraphicsApi::OpenGL).unwrap();
    assert_eq!(status, ExecStatus::InFlight);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "previous artifact");
    assert!(lock_path.exists());

    // A lock file left behind by a crashed build does not block.
    drop(held);
    let status = job(&input, &output, settings).exec(GraphicsApi::OpenGL).unwrap();
    assert_eq!(status, ExecStatus::Compiled);
    assert!(!lock_path.exists());
    assert_ne!(std::fs::read_to_string(&output).unwrap(), "previous artifact");
}

#[test]
fn unusable_lock_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let input = write_body(tmp, BODY);
    let output = tmp.join("Fwd.vert.glsl");
    std::fs::create_dir(tmp.join("Fwd.vert.glsl.lock")).unwrap();

    let settings = CompilationSettings::default().with_target(GraphicsApi::OpenGL, "");
    let err = job(&input, &output, settings).exec(GraphicsApi::OpenGL).unwrap_err();
    assert!(matches!(err, ShaderGenError::Io(_)));
    assert!(!output.exists());
}

#[test]
fn preprocess_failure_leaves_diagnostics() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let input = write_body(tmp, "#error unsupported permutation\n");
    let output = tmp.join("Fwd.vert.spv");

    let settings = CompilationSettings::default().with_target(GraphicsApi::Vulkan, "");
    let err = job(&input, &output, settings).exec(GraphicsApi::Vulkan).unwrap_err();
    assert!(matches!(err, ShaderGenError::Preprocess { .. }));

    let error_text = std::fs::read_to_string(tmp.join("Fwd.vert.vk.glsl.error")).unwrap();
    assert!(error_text.contains("unsupported permutation"));
    let generated = std::fs::read_to_string(tmp.join("Fwd.vert.vk.glsl.generated")).unwrap();
    assert!(generated.contains("#error unsupported permutation"));
    assert!(!tmp.join("Fwd.vert.vk.glsl").exists());
    assert!(!output.exists());
    assert!(!tmp.join("Fwd.vert.spv.lock").exists());
}

#[test]
fn meta_file_records_the_permutation() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let input = write_body(tmp, BODY);
    let output = tmp.join("Fwd.vert.hlsl.cso");

    let settings = CompilationSettings {
        keep_tmp_files: true,
        ..Default::default()
    }
    .with_target(GraphicsApi::D3D11, "");
    let mut compilation = job(&input, &output, settings);
    assert_eq!(compilation.exec(GraphicsApi::D3D11).unwrap(), ExecStatus::Compiled);

    let meta = compilation.meta_path().unwrap().to_path_buf();
    assert_eq!(meta, tmp.join("Fwd.vert.hlsl.meta"));
    assert_eq!(std::fs::read_to_string(&meta).unwrap(), "Fwd|perm=3");
    assert!(!tmp.join("Fwd.vert.hlsl.meta.lock").exists());
    // Kept temporaries: the preprocessed HLSL stays next to the output.
    assert!(tmp.join("Fwd.vert.hlsl.hlsl").exists());
}

#[test]
fn held_meta_lock_skips_the_meta_write_only() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let input = write_body(tmp, BODY);
    let output = tmp.join("Fwd.vert.spv");
    let _held = lock(&tmp.join("Fwd.vert.meta.lock"));

    let settings = CompilationSettings {
        keep_tmp_files: true,
        ..Default::default()
    }
    .with_target(GraphicsApi::Vulkan, "");
    let status = job(&input, &output, settings).exec(GraphicsApi::Vulkan).unwrap();
    assert_eq!(status, ExecStatus::Compiled);
    assert!(tmp.join("Fwd.vert.vk.glsl").exists());
    assert!(!tmp.join("Fwd.vert.meta").exists());
}

#[test]
fn missing_target_fails_compilation() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let input = write_body(tmp, BODY);
    let output = tmp.join("Fwd.vert.metallib");

    let err = job(&input, &output, CompilationSettings::default())
        .exec(GraphicsApi::Metal)
        .unwrap_err();
    assert!(matches!(err, ShaderGenError::MissingTarget(GraphicsApi::Metal)));
    // Generation ran before the target lookup.
    assert!(tmp.join("Fwd.vert.metal").exists());
}

#[test]
fn empty_description_is_a_no_op() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let output = tmp.join("Empty.frag.spv");

    let mut compilation = ShaderCompilation::new(
        "",
        &output,
        "",
        ShaderStage::Fragment,
        ShaderOptions::empty(),
        ShaderDescription::default(),
        CompilationSettings::default(),
    );
    assert_eq!(compilation.exec(GraphicsApi::Vulkan).unwrap(), ExecStatus::Compiled);
    compilation.partial(GraphicsApi::Vulkan, CompilationStep::Compilation).unwrap();
    assert_eq!(std::fs::read_dir(tmp).unwrap().count(), 0);
}

#[test]
fn unsupported_backend_is_an_error() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let input = write_body(tmp, BODY);

    let err = job(&input, &tmp.join("Fwd.vert.sb"), CompilationSettings::default())
        .partial(GraphicsApi::Orbis, CompilationStep::Generation)
        .unwrap_err();
    assert!(matches!(err, ShaderGenError::UnsupportedBackend(GraphicsApi::Orbis)));
}

#[cfg(unix)]
#[test]
fn compiler_command_produces_the_output() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let input = write_body(tmp, BODY);
    let output = tmp.join("Fwd.vert.spv");

    let settings =
        CompilationSettings::default().with_target(GraphicsApi::Vulkan, "cp ##InputPath## ##OutputPath##");
    let mut compilation = job(&input, &output, settings);
    compilation.partial(GraphicsApi::Vulkan, CompilationStep::Generation).unwrap();
    let preprocessed = std::fs::read_to_string(tmp.join("Fwd.vert.vk.glsl")).unwrap();
    compilation.partial(GraphicsApi::Vulkan, CompilationStep::Compilation).unwrap();

    assert_eq!(std::fs::read_to_string(&output).unwrap(), preprocessed);
    // Temporaries are removed once a compiler consumed them.
    assert!(!tmp.join("Fwd.vert.vk.glsl").exists());
}

#[cfg(unix)]
#[test]
fn failing_compiler_reports_the_command() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let input = write_body(tmp, BODY);
    let output = tmp.join("Fwd.vert.spv");

    let settings = CompilationSettings::default().with_target(GraphicsApi::Vulkan, "false ##ShaderStage##");
    let err = job(&input, &output, settings).exec(GraphicsApi::Vulkan).unwrap_err();
    match err {
        ShaderGenError::Compiler(command) => assert_eq!(command, "false vert"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(tmp.join("Fwd.vert.vk.glsl").exists());
    assert!(!output.exists());
}
