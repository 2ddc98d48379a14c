use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::ast::Span;
use super::error::CompileError;
use crate::settings::Settings;

const MAX_INCLUDE_DEPTH: usize = 16;

enum Directive<'a> {
    Local(&'a str),
    System(&'a str),
    Pragma,
}

/// Expand `#include` directives in `source`. `origin` is the file the
/// source came from, if any; quoted includes resolve relative to it.
pub fn preprocess(
    source: &str,
    origin: Option<&Path>,
    settings: &Settings,
) -> Result<String, CompileError> {
    let mut expander = Expander {
        include_dirs: &settings.include_dirs,
        active: Vec::new(),
    };
    if let Some(origin) = origin {
        expander.active.push(canonical(origin));
    }
    expander.expand(source, origin.and_then(Path::parent))
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn parse_directive(line: &str, span: Span) -> Result<Option<Directive<'_>>, CompileError> {
    let Some(rest) = line.trim_start().strip_prefix('#') else {
        return Ok(None);
    };
    let rest = rest.trim_start();
    if rest.starts_with("pragma") {
        return Ok(Some(Directive::Pragma));
    }
    let Some(target) = rest.strip_prefix("include") else {
        let name = rest.split_whitespace().next().unwrap_or("");
        return Err(CompileError::preprocessor(
            format!("unsupported directive '#{name}'"),
            span,
        ));
    };
    let target = target.trim();
    if let Some(name) = target.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Ok(Some(Directive::Local(name)));
    }
    if let Some(name) = target.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        return Ok(Some(Directive::System(name)));
    }
    Err(CompileError::preprocessor(
        format!("malformed #include '{target}'"),
        span,
    ))
}

struct Expander<'s> {
    include_dirs: &'s [PathBuf],
    /// Files currently being expanded, outermost first.
    active: Vec<PathBuf>,
}

impl Expander<'_> {
    fn expand(&mut self, source: &str, dir: Option<&Path>) -> Result<String, CompileError> {
        let mut out = String::with_capacity(source.len());
        let mut offset = 0;
        for line in source.split_inclusive('\n') {
            let span = Span::new(offset, offset + line.trim_end().len());
            offset += line.len();

            let path = match parse_directive(line, span)? {
                None => {
                    out.push_str(line);
                    continue;
                }
                Some(Directive::Pragma) => None,
                Some(Directive::Local(name)) => {
                    let found = self.search(name, dir);
                    if found.is_none() {
                        return Err(CompileError::preprocessor(
                            format!("include file \"{name}\" not found"),
                            span,
                        ));
                    }
                    found
                }
                Some(Directive::System(name)) => {
                    let found = self.search(name, None);
                    if found.is_none() {
                        debug!(header = name, "system header not found, skipping");
                    }
                    found
                }
            };

            match path {
                Some(path) => {
                    let text = self.include(&path, span)?;
                    out.push_str(&text);
                    if !text.ends_with('\n') {
                        out.push('\n');
                    }
                }
                None if line.ends_with('\n') => out.push('\n'),
                None => {}
            }
        }
        Ok(out)
    }

    fn search(&self, name: &str, dir: Option<&Path>) -> Option<PathBuf> {
        dir.into_iter()
            .chain(self.include_dirs.iter().map(PathBuf::as_path))
            .map(|d| d.join(name))
            .find(|p| p.is_file())
    }

    fn include(&mut self, path: &Path, span: Span) -> Result<String, CompileError> {
        let key = canonical(path);
        if self.active.contains(&key) {
            return Err(CompileError::preprocessor(
                format!("circular #include of {}", path.display()),
                span,
            ));
        }
        if self.active.len() >= MAX_INCLUDE_DEPTH {
            return Err(CompileError::preprocessor(
                format!("#include nested more than {MAX_INCLUDE_DEPTH} levels"),
                span,
            ));
        }
        let text = fs::read_to_string(path).map_err(|e| {
            CompileError::preprocessor(format!("cannot read {}: {e}", path.display()), span)
        })?;

        debug!(file = %path.display(), "including");
        self.active.push(key);
        let expanded = self.expand(&text, path.parent());
        self.active.pop();
        // nested errors are reported at the outer directive
        expanded.map_err(|e| {
            CompileError::preprocessor(format!("in {}: {}", path.display(), e.message), span)
        })
    }
}
