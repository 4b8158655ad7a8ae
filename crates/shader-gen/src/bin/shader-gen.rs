use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rhi::shader::binding::{generate_bindings_for_api, reset_bindings};
use rhi::{GraphicsApi, ShaderDescription, ShaderStage};
use shader_gen::{
    defines_from_description, preprocess, shader_name, stage_pipeline, CompilationSettings, ExecStatus,
    Generator, ShaderCompilation, ShaderOptions,
};

#[derive(Parser, Debug)]
#[command(name = "shader-gen", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate one stage of a shader.
    Generate(GenerateArgs),
    /// Generate and compile a list of jobs.
    Compile(CompileArgs),
    /// Print the per-stage shader names of an option set.
    Names(NamesArgs),
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    /// Shader description JSON.
    #[arg(long)]
    description: PathBuf,

    /// Target backend (opengl, gles, vulkan, d3d11, d3d12, metal).
    #[arg(long)]
    api: GraphicsApi,

    /// Stage to generate (vertex, geometry, fragment, compute).
    #[arg(long)]
    stage: ShaderStage,

    /// Shader body. Without it a no-op stage is generated.
    #[arg(long)]
    body: Option<PathBuf>,

    /// Particle options, e.g. "GEOM_BILLBOARDING | AXIS_C1".
    #[arg(long, value_parser = ShaderOptions::parse, default_value = "")]
    options: ShaderOptions,

    /// Run the preprocessor on the generated source.
    #[arg(long, default_value_t = false)]
    preprocess: bool,

    /// Output file. Prints to stdout when absent.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct CompileArgs {
    /// Compilation settings JSON.
    #[arg(long)]
    settings: PathBuf,

    /// Job list JSON.
    #[arg(long)]
    jobs: PathBuf,
}

#[derive(Parser, Debug)]
struct NamesArgs {
    #[arg(value_parser = ShaderOptions::parse)]
    options: ShaderOptions,
}

/// One entry of a `compile` job list.
#[derive(Debug, Deserialize)]
struct JobSpec {
    #[serde(default)]
    input: PathBuf,
    /// Relative paths are resolved against the settings output folder.
    output: PathBuf,
    #[serde(default)]
    permutation: String,
    stage: ShaderStage,
    #[serde(default)]
    options: ShaderOptions,
    description: ShaderDescription,
    apis: Vec<GraphicsApi>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Generate(args) => cmd_generate(args),
        Command::Compile(args) => cmd_compile(args),
        Command::Names(args) => cmd_names(args),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse '{}'", path.display()))
}

fn cmd_generate(args: GenerateArgs) -> anyhow::Result<()> {
    let mut description: ShaderDescription = read_json(&args.description)?;
    reset_bindings(&mut description.bindings);
    generate_bindings_for_api(args.api, &mut description.bindings);

    let (content, body_dir) = match &args.body {
        Some(body) => (
            std::fs::read_to_string(body).with_context(|| format!("read '{}'", body.display()))?,
            body.parent().map(Path::to_path_buf).unwrap_or_default(),
        ),
        None => (String::new(), PathBuf::from(".")),
    };

    let mut generator = Generator::for_api(args.api)?;
    generator.gather_shader_info(&content, &body_dir)?;
    let mut source = generator.generate_shader(&content, args.stage, &description, args.options);
    if args.preprocess {
        let defines = defines_from_description(&description, args.stage);
        source = preprocess::preprocess(&defines, &source, &body_dir)?.output;
    }

    match args.out {
        Some(out) => {
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create output dir '{}'", parent.display()))?;
            }
            std::fs::write(&out, source).with_context(|| format!("write '{}'", out.display()))?;
            eprintln!("wrote {}", out.display());
        }
        None => print!("{source}"),
    }
    Ok(())
}

fn cmd_compile(args: CompileArgs) -> anyhow::Result<()> {
    let settings = CompilationSettings::load(&args.settings)?;
    let jobs: Vec<JobSpec> = read_json(&args.jobs)?;
    let library = settings.load_particle_library().context("load particle library")?;

    let mut failures = 0usize;
    for spec in jobs {
        let output = if spec.output.is_absolute() {
            spec.output.clone()
        } else {
            settings.output_folder.join(&spec.output)
        };
        for api in &spec.apis {
            let mut job = ShaderCompilation::new(
                spec.input.clone(),
                output.clone(),
                spec.permutation.clone(),
                spec.stage,
                spec.options,
                spec.description.clone(),
                settings.clone(),
            )
            .with_particle_library(library.clone());
            match job.exec(*api) {
                Ok(ExecStatus::Compiled) => {}
                Ok(ExecStatus::InFlight) => info!("{} skipped: compiled elsewhere", output.display()),
                Err(e) => {
                    error!("{} ({}): {e}", output.display(), api.name());
                    failures += 1;
                }
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} shader job(s) failed");
    }
    Ok(())
}

fn cmd_names(args: NamesArgs) -> anyhow::Result<()> {
    let pipeline = stage_pipeline(args.options);
    println!("pipeline: {pipeline:?}");
    for stage in [ShaderStage::Vertex, ShaderStage::Geometry, ShaderStage::Fragment] {
        println!("{}: {}", stage.long_name(), shader_name(args.options, stage));
    }
    Ok(())
}
