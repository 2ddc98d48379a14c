use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::info;

use crate::computation::ComputationResult;
use crate::dsl::builtins::HostIo;
use crate::dsl::{compile_source, include, vm};
use crate::error::CoverError;
use crate::settings::Settings;

// ── Host State ─────────────────────────────────────────────────────

/// Interpreter state shared by every run in the process.
///
/// The computation result is locked for the whole of a run, so runs on
/// one `HostState` are serialized.
pub struct HostState {
    settings: Settings,
    result: Mutex<ComputationResult>,
}

/// What a completed run hands back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// `main`'s return value, when it returns a number or bool.
    pub exit_code: Option<i64>,
    pub result: ComputationResult,
}

static GLOBAL: OnceLock<HostState> = OnceLock::new();

impl HostState {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            result: Mutex::new(ComputationResult::default()),
        }
    }

    /// The process-wide instance, created with default settings on first use.
    pub fn global() -> &'static HostState {
        GLOBAL.get_or_init(|| HostState::new(Settings::default()))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Copy of the live result. A failed run leaves its partial updates.
    pub fn snapshot(&self) -> ComputationResult {
        self.with_result(ComputationResult::clone)
    }

    /// Read-only access to the result. Locks the mutex for the duration of `f`.
    pub fn with_result<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ComputationResult) -> R,
    {
        let guard = self.result.lock();
        f(&guard)
    }

    /// Mutating access to the result. Locks the mutex for the duration of `f`.
    pub fn with_result_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut ComputationResult) -> R,
    {
        let mut guard = self.result.lock();
        f(&mut guard)
    }

    /// Install `input`, compile `source` and run its `main`, writing script
    /// output to `out`.
    pub fn run_source(
        &self,
        source: &str,
        input: ComputationResult,
        out: &mut (dyn Write + Send),
    ) -> Result<RunOutcome, CoverError> {
        self.run(source, None, input, out)
    }

    /// Like `run_source`, with quoted `#include`s resolved next to `path`.
    pub fn run_file(
        &self,
        path: &Path,
        input: ComputationResult,
        out: &mut (dyn Write + Send),
    ) -> Result<RunOutcome, CoverError> {
        let source = std::fs::read_to_string(path)?;
        self.run(&source, Some(path), input, out)
    }

    fn run(
        &self,
        source: &str,
        origin: Option<&Path>,
        input: ComputationResult,
        out: &mut (dyn Write + Send),
    ) -> Result<RunOutcome, CoverError> {
        let mut guard = self.result.lock();
        *guard = input;
        let result: &mut ComputationResult = &mut guard;
        let settings = &self.settings;

        // Program holds Rc values, so it is built on the thread that runs it.
        let exit_code = std::thread::scope(|scope| -> Result<Option<i64>, CoverError> {
            let handle = std::thread::Builder::new()
                .name("cover-eval".into())
                .stack_size(settings.stack_size_mb.saturating_mul(1024 * 1024))
                .spawn_scoped(scope, move || evaluate(source, origin, settings, out, result))?;
            handle.join().map_err(|_| CoverError::EvaluatorPanicked)?
        })?;

        info!(exit_code = ?exit_code, "run finished");
        Ok(RunOutcome {
            exit_code,
            result: guard.clone(),
        })
    }
}

fn evaluate(
    source: &str,
    origin: Option<&Path>,
    settings: &Settings,
    out: &mut (dyn Write + Send),
    result: &mut ComputationResult,
) -> Result<Option<i64>, CoverError> {
    let expanded = include::preprocess(source, origin, settings)
        .map_err(|e| CoverError::compile(vec![e], source))?;
    let program =
        compile_source(&expanded).map_err(|errors| CoverError::compile(errors, &expanded))?;

    let main = program
        .main
        .and_then(|id| program.function(id).map(|f| (id, f)))
        .filter(|(_, f)| f.body.is_some());
    let Some((main, function)) = main else {
        return Err(CoverError::NoMain);
    };
    if !function.ty.params.is_empty() {
        return Err(CoverError::MainTakesParameters);
    }

    let exit_code = vm::run(
        &program,
        main,
        HostIo::new(&mut *out, Some(result)),
        settings.max_call_depth,
    )?;
    out.flush()?;
    Ok(exit_code)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::error::{ErrorKind, RuntimeError};

    fn run(src: &str, input: ComputationResult) -> (Result<RunOutcome, CoverError>, String) {
        run_with(&HostState::new(Settings::default()), src, input)
    }

    fn run_with(
        state: &HostState,
        src: &str,
        input: ComputationResult,
    ) -> (Result<RunOutcome, CoverError>, String) {
        let mut out = Vec::new();
        let outcome = state.run_source(src, input, &mut out);
        (outcome, String::from_utf8(out).unwrap())
    }

    fn exit_code(src: &str) -> i64 {
        run(src, ComputationResult::default()).0.unwrap().exit_code.unwrap()
    }

    #[test]
    fn runs_main_and_collects_output() {
        let (outcome, out) = run(
            "#include <stdio.h>\nint main() { printf(\"hi %d\\n\", 3); return 7; }",
            ComputationResult::default(),
        );
        assert_eq!(outcome.unwrap().exit_code, Some(7));
        assert_eq!(out, "hi 3\n");
    }

    #[test]
    fn postfix_and_prefix_forms() {
        assert_eq!(exit_code("int main() { int i = 0; int a = i++; return a * 10 + i; }"), 1);
        assert_eq!(exit_code("int main() { int i = 0; int a = ++i; return a * 10 + i; }"), 11);
    }

    #[test]
    fn for_and_while_agree() {
        for n in [0, 1, 5] {
            let with_for = format!(
                "int main() {{ int s = 7; for (int i = 0; i < {n}; i++) {{ int d = i * 2; s += d; }} return s; }}"
            );
            let with_while = format!(
                "int main() {{ int s = 7; int i = 0; while (i < {n}) {{ int d = i * 2; s += d; i++; }} return s; }}"
            );
            assert_eq!(exit_code(&with_for), exit_code(&with_while), "n = {n}");
        }
        assert_eq!(exit_code("int main() { int s = 7; for (int i = 0; i < 0; i++) s = 0; return s; }"), 7);
    }

    #[test]
    fn shadowing_restores_outer_binding() {
        assert_eq!(exit_code("int main() { int x = 1; { int x = 2; } return x; }"), 1);
    }

    #[test]
    fn check_pow_records_hash() {
        let input = ComputationResult::new([0xFF; 16], [0; 12], Vec::new());
        let (outcome, _) = run("int main() { return check_pow(1, 0, 0, 0); }", input);
        let outcome = outcome.unwrap();
        assert_eq!(outcome.exit_code, Some(1));
        assert_eq!(
            outcome.result.pow_hash,
            [237, 250, 9, 1, 32, 80, 112, 40, 79, 100, 235, 27, 80, 197, 49, 180]
        );
    }

    #[test]
    fn sync_r_copies_flags() {
        let src = "typedef struct { int isPow; int isBounty; } R;\n\
                   int main() { R r; r.isPow = 1; r.isBounty = 0; sync_r(); return 0; }";
        let result = run(src, ComputationResult::default()).0.unwrap().result;
        assert!(result.is_pow);
        assert!(!result.is_bounty);
    }

    #[test]
    fn pull_the_rest_copies_host_vectors() {
        let input = ComputationResult::new([0; 16], [5; 12], vec![1, 2, 3]);
        let src = "int main() { int m[12]; int s[3]; pull_the_rest(m, s); return m[11] * 10 + s[2]; }";
        assert_eq!(run(src, input).0.unwrap().exit_code, Some(53));
    }

    #[test]
    fn pull_the_rest_mismatch_copies_nothing() {
        let input = ComputationResult::new([0; 16], [5; 12], vec![1, 2, 3]);
        let src = "int main() { int m[4]; int s[3]; pull_the_rest(m, s); return m[0] + s[0]; }";
        assert_eq!(run(src, input).0.unwrap().exit_code, Some(0));
    }

    #[test]
    fn out_of_range_store_does_not_mutate() {
        let state = HostState::new(Settings::default());
        let src = "int main() { int m[12]; int s[1]; pull_the_rest(m, s); s[0] = 9; s[1] = 4; return 0; }";
        let input = ComputationResult::new([0; 16], [0; 12], vec![7]);
        let (outcome, _) = run_with(&state, src, input);
        let Err(CoverError::Runtime(failure)) = outcome else {
            panic!("expected a runtime error");
        };
        assert_eq!(failure.error, RuntimeError::IndexOutOfRange { index: 1, len: 1 });
        assert_eq!(failure.stack, vec!["main".to_string()]);
        // the host copy is untouched by script arrays
        assert_eq!(state.snapshot().storage, vec![7]);
    }

    #[test]
    fn call_depth_limit_is_a_runtime_error() {
        let state = HostState::new(Settings {
            max_call_depth: 50,
            ..Settings::default()
        });
        let (outcome, _) = run_with(
            &state,
            "int down(int n) { return down(n + 1); }\nint main() { return down(0); }",
            ComputationResult::default(),
        );
        let Err(CoverError::Runtime(failure)) = outcome else {
            panic!("expected a runtime error");
        };
        assert_eq!(failure.error, RuntimeError::StackOverflow { limit: 50 });
    }

    #[test]
    fn compile_errors_are_rendered() {
        let (outcome, _) = run("int main() { return y; }", ComputationResult::default());
        let Err(CoverError::Compile { diagnostics, rendered }) = outcome else {
            panic!("expected a compile error");
        };
        assert_eq!(diagnostics.first().unwrap().kind, ErrorKind::UnknownIdentifier);
        assert!(rendered.starts_with("[unknown identifier] line 1:21"));
    }

    #[test]
    fn main_is_required() {
        let (outcome, _) = run("int helper() { return 1; }", ComputationResult::default());
        assert!(matches!(outcome, Err(CoverError::NoMain)));
        let (outcome, _) = run("int main(int argc) { return argc; }", ComputationResult::default());
        assert!(matches!(outcome, Err(CoverError::MainTakesParameters)));
    }

    #[test]
    fn runs_reset_the_result() {
        let state = HostState::new(Settings::default());
        let src = "typedef struct { int isPow; int isBounty; } R;\nint main() { R r; r.isPow = 1; sync_r(); return 0; }";
        run_with(&state, src, ComputationResult::default()).0.unwrap();
        assert!(state.snapshot().is_pow);
        run_with(&state, "int main() { return 0; }", ComputationResult::default()).0.unwrap();
        assert!(!state.with_result(|r| r.is_pow));
    }

    #[test]
    fn run_file_resolves_includes() {
        let dir = std::env::temp_dir().join("cover_test_state_run_file");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("lib.h"), "int seven() { return 7; }\n").unwrap();
        let path = dir.join("main.c");
        std::fs::write(&path, "#include \"lib.h\"\nint main() { return seven(); }\n").unwrap();

        let state = HostState::new(Settings::default());
        let mut out = Vec::new();
        let outcome = state.run_file(&path, ComputationResult::default(), &mut out).unwrap();
        assert_eq!(outcome.exit_code, Some(7));
    }
}
