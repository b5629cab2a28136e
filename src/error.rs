pub type FuseResult<T> = Result<T, FuseError>;

/// Pipeline failures that surface to the caller.
///
/// Per-image fetch failures and cache file-removal failures are deliberately
/// absent: they are logged where they happen and never abort a run.
#[derive(thiserror::Error, Debug)]
pub enum FuseError {
    #[error("input error: {0}")]
    Input(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("encode timed out after {}s", .0.as_secs())]
    EncodeTimeout(std::time::Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FuseError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}
