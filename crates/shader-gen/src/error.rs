use rhi::GraphicsApi;

pub type ShaderGenResult<T> = Result<T, ShaderGenError>;

#[derive(thiserror::Error, Debug)]
pub enum ShaderGenError {
    #[error("no shader generator for {}", .0.name())]
    UnsupportedBackend(GraphicsApi),

    #[error("{file}:{line}: {message}")]
    Preprocess {
        file: String,
        line: usize,
        message: String,
    },

    #[error("could not find the shader dependencies: {0}")]
    Dependency(String),

    #[error("no compiler command registered for {}", .0.name())]
    MissingTarget(GraphicsApi),

    #[error("shader compile command failed: \"{0}\"")]
    Compiler(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ShaderGenError {
    pub fn preprocess(file: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Preprocess {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        Self::Dependency(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_errors_carry_location() {
        let err = ShaderGenError::preprocess("Billboard.vert", 12, "#error config error");
        assert_eq!(err.to_string(), "Billboard.vert:12: #error config error");
    }

    #[test]
    fn backend_names_are_reported() {
        let err = ShaderGenError::UnsupportedBackend(GraphicsApi::Orbis);
        assert!(err.to_string().contains(GraphicsApi::Orbis.name()));
    }
}
