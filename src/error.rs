pub type CompositingResult<T> = Result<T, CompositingError>;

#[derive(thiserror::Error, Debug)]
pub enum CompositingError {
    #[error("unknown blend operator '{name}' (expected one of: {expected})")]
    UnknownOperator { name: String, expected: String },

    #[error("compile error in {program}:\n{diagnostic}")]
    Compile { program: String, diagnostic: String },

    #[error("backend resource error: {0}")]
    BackendResource(String),

    #[error("binding error: {0}")]
    Binding(String),

    #[error("fragment error: {0}")]
    Fragment(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CompositingError {
    pub fn unknown_operator(name: impl Into<String>) -> Self {
        let expected = crate::renderer::blend::BlendOperator::ALL
            .iter()
            .map(|op| op.name())
            .collect::<Vec<_>>()
            .join(", ");
        Self::UnknownOperator {
            name: name.into(),
            expected,
        }
    }

    pub fn compile(program: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::Compile {
            program: program.into(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendResource(msg.into())
    }

    pub fn binding(msg: impl Into<String>) -> Self {
        Self::Binding(msg.into())
    }

    pub fn fragment(msg: impl Into<String>) -> Self {
        Self::Fragment(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Unknown operator names are the only recoverable failure; everything else
    /// leaves the requested configuration unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownOperator { .. })
    }
}
