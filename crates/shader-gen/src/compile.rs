//! Shader compilation jobs.
//!
//! A [`ShaderCompilation`] turns one shader body into a compiled artifact
//! for one backend in two steps:
//!
//! 1. **Generation**: backend source is generated from the description,
//!    preprocessed and written next to the output with the backend's
//!    temporary extension.
//! 2. **Compilation**: the backend's compiler command line runs on that
//!    file and produces the output.
//!
//! [`ShaderCompilation::exec`] runs both under `<output>.lock`. Jobs for
//! several backends of the same shader share a `.meta` file, guarded by
//! its own `<meta>.lock`. Locks are OS advisory locks on the lock files: a
//! held lock means another process is producing the artifact and the job
//! reports [`ExecStatus::InFlight`].

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use rhi::shader::binding::{generate_bindings_for_api, reset_bindings};
use rhi::shader::{GraphicsApi, ShaderDescription, ShaderStage};

use crate::defines::defines_from_description;
use crate::error::{ShaderGenError, ShaderGenResult};
use crate::generator::Generator;
use crate::options::ShaderOptions;
use crate::particle::ParticleLibrary;
use crate::preprocess;

/// Raw generated source, kept when preprocessing fails.
pub const GENERATED_EXTENSION: &str = ".generated";
/// Preprocessor diagnostics, written when preprocessing fails.
pub const ERROR_EXTENSION: &str = ".error";
/// Permutation metadata shared by every backend of a shader.
pub const META_EXTENSION: &str = ".meta";
pub const LOCK_EXTENSION: &str = ".lock";

/// File extension of a backend's shader, either the generated source
/// (`temporary`) or the compiled artifact. `None` for backends without a
/// shader format.
pub fn shader_extension(api: GraphicsApi, temporary: bool) -> Option<&'static str> {
    let ext = match api {
        GraphicsApi::OpenGL | GraphicsApi::OpenGLES => ".glsl",
        GraphicsApi::Vulkan if temporary => ".vk.glsl",
        GraphicsApi::Vulkan => ".spv",
        GraphicsApi::D3D11 | GraphicsApi::D3D12 if temporary => ".hlsl",
        GraphicsApi::D3D11 | GraphicsApi::D3D12 => ".cso",
        GraphicsApi::Metal if temporary => ".metal",
        GraphicsApi::Metal => ".metallib",
        GraphicsApi::Orbis if temporary => ".pssl",
        GraphicsApi::Orbis => ".sb",
        GraphicsApi::Null => return None,
    };
    Some(ext)
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Compiler invocation for one backend.
///
/// The command line is a template. `##InputPath##`, `##OutputPath##` and
/// `##OutputDir##` are replaced per argument, the first one found only;
/// `##ShortStage##` (`vs`, `gs`, `ps`) and `##ShaderStage##` (`vert`,
/// `geom`, `frag`) in the whole line.
/// An empty command line keeps the generated source as the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationTarget {
    pub target: GraphicsApi,
    #[serde(default)]
    pub compiler_cmd_line: String,
}

/// Settings shared by every job of a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilationSettings {
    pub targets: Vec<CompilationTarget>,
    pub output_folder: PathBuf,
    /// Keep `.generated` and preprocessed sources, and write `.meta` files.
    pub keep_tmp_files: bool,
    pub generate_geometry_bb_shaders: bool,
    pub generate_vertex_bb_shaders: bool,
    pub force_recreate: bool,
    /// Directory holding the billboarding sources (`Billboard.vert`, ...).
    pub particle_library: Option<PathBuf>,
}

impl CompilationSettings {
    /// Reads settings from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read compilation settings {}: {e}", path.display()))?;
        let settings = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("invalid compilation settings {}: {e}", path.display()))?;
        Ok(settings)
    }

    pub fn with_target(mut self, target: GraphicsApi, compiler_cmd_line: impl Into<String>) -> Self {
        self.targets.push(CompilationTarget {
            target,
            compiler_cmd_line: compiler_cmd_line.into(),
        });
        self
    }

    /// Last registered command line for `api`.
    pub fn compiler_cmd_line(&self, api: GraphicsApi) -> Option<&str> {
        self.targets
            .iter()
            .rev()
            .find(|t| t.target == api)
            .map(|t| t.compiler_cmd_line.as_str())
    }

    /// Billboarding sources from [`Self::particle_library`], empty when unset.
    pub fn load_particle_library(&self) -> std::io::Result<ParticleLibrary> {
        match &self.particle_library {
            Some(dir) => ParticleLibrary::load(dir),
            None => Ok(ParticleLibrary::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Lock files
// ---------------------------------------------------------------------------

/// Exclusive advisory lock on a lock file, released and deleted on drop.
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
    file: File,
}

/// Outcome of locking an opened lock file.
#[derive(Debug)]
enum LockAttempt {
    Locked(LockFile),
    Held,
    /// The previous holder unlinked the file between our open and lock.
    Unlinked,
}

impl LockFile {
    /// `Ok(None)` when another handle holds the lock.
    fn try_acquire(path: PathBuf) -> std::io::Result<Option<Self>> {
        loop {
            let file = Self::open(&path)?;
            match Self::try_lock_opened(path.clone(), file)? {
                LockAttempt::Locked(lock) => return Ok(Some(lock)),
                LockAttempt::Held => return Ok(None),
                LockAttempt::Unlinked => debug!("{} was replaced, retrying", path.display()),
            }
        }
    }

    fn open(path: &Path) -> std::io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    fn try_lock_opened(path: PathBuf, file: File) -> std::io::Result<LockAttempt> {
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Ok(LockAttempt::Held),
            Err(TryLockError::Error(e)) => return Err(e),
        }
        if is_linked_at(&file, &path)? {
            Ok(LockAttempt::Locked(Self { path, file }))
        } else {
            Ok(LockAttempt::Unlinked)
        }
    }
}

/// Whether `path` still names the file behind `file`.
#[cfg(unix)]
fn is_linked_at(file: &File, path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let on_disk = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let held = file.metadata()?;
    Ok(on_disk.dev() == held.dev() && on_disk.ino() == held.ino())
}

/// Open files cannot be deleted on Windows, so a present path is the one held.
#[cfg(not(unix))]
fn is_linked_at(_file: &File, path: &Path) -> std::io::Result<bool> {
    path.try_exists()
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
        let _ = self.file.unlock();
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// The two steps of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompilationStep {
    Generation,
    Compilation,
}

/// Result of a successful [`ShaderCompilation::exec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// Both steps ran.
    Compiled,
    /// Another job holds the output lock and is producing the artifact.
    InFlight,
}

/// One (shader, permutation, stage) job. [`Self::exec`] selects the backend.
#[derive(Debug, Clone)]
pub struct ShaderCompilation {
    input_path: PathBuf,
    output_path: PathBuf,
    permutation: String,
    stage: ShaderStage,
    options: ShaderOptions,
    description: ShaderDescription,
    settings: CompilationSettings,
    library: ParticleLibrary,
    meta_path: Option<PathBuf>,
}

impl ShaderCompilation {
    /// `input_path` may be empty: the stage is then generated without a body.
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        permutation: impl Into<String>,
        stage: ShaderStage,
        options: ShaderOptions,
        description: ShaderDescription,
        settings: CompilationSettings,
    ) -> Self {
        let output_path = output_path.into();
        let meta_path = settings
            .keep_tmp_files
            .then(|| with_suffix(&output_path.with_extension(""), META_EXTENSION));
        Self {
            input_path: input_path.into(),
            output_path,
            permutation: permutation.into(),
            stage,
            options,
            description,
            settings,
            library: ParticleLibrary::default(),
            meta_path,
        }
    }

    pub fn with_particle_library(mut self, library: ParticleLibrary) -> Self {
        self.library = library;
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// `<output>.meta` sibling, only when temporary files are kept.
    pub fn meta_path(&self) -> Option<&Path> {
        self.meta_path.as_deref()
    }

    pub fn description(&self) -> &ShaderDescription {
        &self.description
    }

    /// Generated (and preprocessed) source path for `api`.
    pub fn preprocessed_path(&self, api: GraphicsApi) -> ShaderGenResult<PathBuf> {
        let ext = shader_extension(api, true).ok_or(ShaderGenError::UnsupportedBackend(api))?;
        Ok(with_suffix(&self.output_path.with_extension(""), ext))
    }

    /// Runs generation then compilation for `api` under the output lock.
    pub fn exec(&mut self, api: GraphicsApi) -> ShaderGenResult<ExecStatus> {
        let lock_path = with_suffix(&self.output_path, LOCK_EXTENSION);
        let dst_folder = parent_dir(&self.output_path);
        fs::create_dir_all(dst_folder).inspect_err(|_| {
            error!(
                "Couldn't create directory chain '{}' when trying to compile shader '{}'",
                dst_folder.display(),
                self.output_path.display()
            )
        })?;

        let lock = LockFile::try_acquire(lock_path).inspect_err(|e| {
            error!("Couldn't lock '{}': {e}", self.output_path.display())
        })?;
        let Some(_lock) = lock else {
            debug!("{} is already being compiled", self.output_path.display());
            return Ok(ExecStatus::InFlight);
        };

        remove_if_exists(&self.output_path)?;

        // The meta file is shared by every backend of the shader: only the
        // holder of its lock writes it.
        let meta_lock = match &self.meta_path {
            Some(meta) => LockFile::try_acquire(with_suffix(meta, LOCK_EXTENSION))?,
            None => None,
        };

        self.run_step(api, CompilationStep::Generation, meta_lock.is_some())?;
        self.run_step(api, CompilationStep::Compilation, false)?;
        Ok(ExecStatus::Compiled)
    }

    /// Runs one step for `api` without taking any lock. The meta file is
    /// not written.
    pub fn partial(&mut self, api: GraphicsApi, step: CompilationStep) -> ShaderGenResult<()> {
        self.run_step(api, step, false)
    }

    fn run_step(&mut self, api: GraphicsApi, step: CompilationStep, write_meta: bool) -> ShaderGenResult<()> {
        if self.description.is_empty() {
            return Ok(());
        }
        let preprocessed = self.preprocessed_path(api)?;
        match step {
            CompilationStep::Generation => {
                let dst_folder = parent_dir(&self.output_path);
                fs::create_dir_all(dst_folder).inspect_err(|_| {
                    error!(
                        "Couldn't create directory chain '{}' when trying to compile shader '{}'",
                        dst_folder.display(),
                        self.output_path.display()
                    )
                })?;
                reset_bindings(&mut self.description.bindings);
                generate_bindings_for_api(api, &mut self.description.bindings);
                self.generate(api, &preprocessed, write_meta)
            }
            CompilationStep::Compilation => self.compile(api, &preprocessed),
        }
    }

    fn generate(&self, api: GraphicsApi, preprocessed: &Path, write_meta: bool) -> ShaderGenResult<()> {
        let mut generator = Generator::for_api(api)?.with_particle_library(self.library.clone());

        let mut content = String::new();
        if !self.input_path.as_os_str().is_empty() {
            content = fs::read_to_string(&self.input_path).unwrap_or_default();
            if content.is_empty() {
                error!(
                    "Couldn't open '{}' for reading when trying to compile shader '{}'",
                    self.input_path.display(),
                    preprocessed.display()
                );
                return Err(ShaderGenError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("empty or unreadable shader '{}'", self.input_path.display()),
                )));
            }
        }

        let input_dir = parent_dir(&self.input_path);
        generator.gather_shader_info(&content, input_dir).inspect_err(|_| {
            error!(
                "Shader generator could not gather info from shader '{}'",
                self.input_path.display()
            )
        })?;

        let source = generator.generate_shader(&content, self.stage, &self.description, self.options);
        let defines = defines_from_description(&self.description, self.stage);

        let generated_path = with_suffix(preprocessed, GENERATED_EXTENSION);
        let error_path = with_suffix(preprocessed, ERROR_EXTENSION);
        match preprocess::preprocess(&defines, &source, input_dir) {
            Ok(out) => {
                fs::write(preprocessed, out.output).inspect_err(|_| {
                    error!("Couldn't create/open shader file '{}'", preprocessed.display())
                })?;
                remove_if_exists(&generated_path)?;
                remove_if_exists(&error_path)?;
            }
            Err(e) => {
                error!("preprocess errors:\n{e}");
                error!("Shader precompiling failed");
                fs::write(&generated_path, &source)?;
                fs::write(&error_path, format!("{e}\n"))?;
                remove_if_exists(preprocessed)?;
                return Err(e);
            }
        }

        if write_meta {
            if let Some(meta) = &self.meta_path {
                fs::write(meta, &self.permutation).inspect_err(|_| {
                    error!("Couldn't create/open shader meta file '{}'", meta.display())
                })?;
            }
        }
        Ok(())
    }

    fn compile(&self, api: GraphicsApi, preprocessed: &Path) -> ShaderGenResult<()> {
        let template = self
            .settings
            .compiler_cmd_line(api)
            .ok_or(ShaderGenError::MissingTarget(api))?;
        let cmd_line = substitute_stage(template, self.stage, api);

        let result = if cmd_line.trim().is_empty() {
            Ok(())
        } else {
            run_compiler(&cmd_line, preprocessed, &self.output_path)
        };
        match &result {
            Ok(()) => info!("Shader {} successfully compiled", self.output_path.display()),
            Err(_) => info!("Shader failed compilation: \"{cmd_line}\""),
        }
        result?;

        if !self.settings.keep_tmp_files {
            remove_if_exists(&with_suffix(preprocessed, GENERATED_EXTENSION))?;
            if !cmd_line.trim().is_empty() {
                remove_if_exists(preprocessed)?;
            }
        }
        Ok(())
    }
}

/// Replaces the stage placeholders of a compiler command line.
pub fn substitute_stage(cmd_line: &str, stage: ShaderStage, api: GraphicsApi) -> String {
    let (short, long) = match stage {
        ShaderStage::Vertex if api == GraphicsApi::Orbis => ("vs_vs", "vert"),
        ShaderStage::Vertex => ("vs", "vert"),
        ShaderStage::Geometry => ("gs", "geom"),
        ShaderStage::Fragment => ("ps", "frag"),
        ShaderStage::Compute => return cmd_line.to_string(),
    };
    cmd_line.replace("##ShortStage##", short).replace("##ShaderStage##", long)
}

/// Splits a command line on whitespace; double quotes group words.
pub fn split_command_line(cmd_line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut has_token = false;
    for c in cmd_line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                has_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

fn run_compiler(cmd_line: &str, input: &Path, output: &Path) -> ShaderGenResult<()> {
    let input = std::path::absolute(input)?;
    let output = std::path::absolute(output)?;
    let output_dir = parent_dir(&output);

    let mut words = split_command_line(cmd_line).into_iter();
    let Some(program) = words.next() else {
        return Ok(());
    };
    let args: Vec<String> = words
        .map(|arg| {
            let arg = substitute_path_token(&arg, &input, &output, output_dir);
            if cfg!(windows) {
                arg.replace('/', "\\")
            } else {
                arg
            }
        })
        .collect();

    let command = std::iter::once(program.as_str())
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    let status = Command::new(&program).args(&args).status();
    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => {
            error!("Shader compile command failed: \"{command}\" ({status})");
            Err(ShaderGenError::Compiler(command))
        }
        Err(e) => {
            error!("Shader compile command failed: \"{command}\" ({e})");
            Err(ShaderGenError::Compiler(command))
        }
    }
}

/// Replaces the first path placeholder found in `arg`, checked in the order
/// `##InputPath##`, `##OutputPath##`, `##OutputDir##`. Other placeholders in
/// the same argument are left as they are.
fn substitute_path_token(arg: &str, input: &Path, output: &Path, output_dir: &Path) -> String {
    let tokens = [
        ("##InputPath##", input),
        ("##OutputPath##", output),
        ("##OutputDir##", output_dir),
    ];
    match tokens.iter().find(|(token, _)| arg.contains(token)) {
        Some((token, path)) => arg.replace(token, &path.to_string_lossy()),
        None => arg.to_string(),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
