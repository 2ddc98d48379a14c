use crate::dsl::error::{render_all, CompileError, RuntimeFailure};

/// Errors surfaced to the host.
#[derive(Debug, thiserror::Error)]
pub enum CoverError {
    /// Front-end or lowering diagnostics, already rendered against the source.
    #[error("compilation failed:\n{rendered}")]
    Compile {
        diagnostics: Vec<CompileError>,
        rendered: String,
    },
    #[error("no function main() defined")]
    NoMain,
    #[error("main() must take no parameters")]
    MainTakesParameters,
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeFailure),
    #[error("evaluation thread panicked")]
    EvaluatorPanicked,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoverError {
    pub fn compile(diagnostics: Vec<CompileError>, source: &str) -> Self {
        let rendered = render_all(&diagnostics, source);
        CoverError::Compile {
            diagnostics,
            rendered,
        }
    }
}
