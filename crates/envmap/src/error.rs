use std::path::PathBuf;

pub type EnvMapResult<T> = Result<T, EnvMapError>;

#[derive(thiserror::Error, Debug)]
pub enum EnvMapError {
    #[error("invalid environment map config: {0}")]
    Config(String),

    #[error("kernel '{kernel}' failed to load: {message}")]
    Kernel { kernel: String, message: String },

    #[error("failed to load '{}': {message}", .path.display())]
    Load { path: PathBuf, message: String },

    #[error("no source texture to generate from")]
    NoSource,

    #[error("cache export failed: {0}")]
    Export(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EnvMapError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn kernel(kernel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Kernel {
            kernel: kernel.into(),
            message: message.into(),
        }
    }

    pub fn load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }
}
