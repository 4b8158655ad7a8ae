pub type RhiResult<T> = Result<T, RhiError>;

#[derive(thiserror::Error, Debug)]
pub enum RhiError {
    #[error("resource creation failed: {0}")]
    Creation(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("binding error: {0}")]
    Binding(String),

    #[error("image codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RhiError {
    pub fn creation(msg: impl Into<String>) -> Self {
        Self::Creation(msg.into())
    }

    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    pub fn binding(msg: impl Into<String>) -> Self {
        Self::Binding(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(RhiError::creation("x")
            .to_string()
            .contains("resource creation failed:"));
        assert!(RhiError::command("x").to_string().contains("command error:"));
        assert!(RhiError::binding("x").to_string().contains("binding error:"));
        assert!(RhiError::codec("x")
            .to_string()
            .contains("image codec error:"));
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = RhiError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
