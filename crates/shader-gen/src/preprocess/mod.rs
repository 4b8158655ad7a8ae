//! C-style preprocessor for generated shader text.
//!
//! # Overview
//!
//! - `#define` / `#undef`, object-like and function-like (with `#`, `##`
//!   and `__VA_ARGS__`)
//! - `#include "..."` and `#include <...>`, resolved against the including
//!   file's directory and the include directories, `#pragma once`
//! - `#if`, `#ifdef`, `#ifndef`, `#elif`, `#else`, `#endif`, `#error`
//! - every other directive (`#version`, `#extension`, `#pragma ...`) is
//!   emitted untouched
//!
//! Text produced by macro expansion is never read back as a directive:
//! a `VERSION` macro expanding to `#version 430` is emitted as is. No
//! line markers are written.

mod deps;
mod expr;
mod lexer;
mod macros;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{ShaderGenError, ShaderGenResult};

pub use deps::find_shader_dependencies;

use lexer::{logical_lines, to_text, tokenize, trim, Token, TokenKind};
use macros::MacroTable;

const MAX_INCLUDE_DEPTH: usize = 200;

/// Name reported for errors in the top-level text.
const ROOT_FILE: &str = "<shader>";

/// Result of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preprocessed {
    pub output: String,
    /// Files read through `#include`, in first-inclusion order.
    pub dependencies: Vec<PathBuf>,
}

/// Preprocesses `content` with command-line style `defines` (`NAME` or
/// `NAME=VALUE`), resolving includes from `cur_dir`.
pub fn preprocess(defines: &[String], content: &str, cur_dir: &Path) -> ShaderGenResult<Preprocessed> {
    let mut preprocessor = Preprocessor::new();
    for define in defines {
        preprocessor.define(define)?;
    }
    preprocessor.run(content, cur_dir)
}

#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    macros: MacroTable,
    include_dirs: Vec<PathBuf>,
    once: HashSet<PathBuf>,
    dependencies: Vec<PathBuf>,
    depth: usize,
}

/// One open `#if` group.
#[derive(Debug)]
struct Conditional {
    line: usize,
    /// Whether the enclosing group emits text.
    parent_active: bool,
    active: bool,
    taken: bool,
    seen_else: bool,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    /// Adds a `NAME` / `NAME=VALUE` definition.
    pub fn define(&mut self, option: &str) -> ShaderGenResult<()> {
        self.macros
            .define_option(option)
            .map_err(|message| ShaderGenError::preprocess("<command line>", 0, message))
    }

    pub fn run(mut self, content: &str, cur_dir: &Path) -> ShaderGenResult<Preprocessed> {
        let mut output = String::new();
        self.process(content, ROOT_FILE, cur_dir, &mut output)?;
        Ok(Preprocessed {
            output,
            dependencies: self.dependencies,
        })
    }

    fn process(&mut self, source: &str, file: &str, dir: &Path, out: &mut String) -> ShaderGenResult<()> {
        let err = |line: usize, message: String| ShaderGenError::preprocess(file, line, message);
        let mut groups: Vec<Conditional> = Vec::new();
        let mut text: Vec<Token> = Vec::new();
        let mut text_line = 0;

        for (line_no, line) in logical_lines(source) {
            let active = groups.last().map_or(true, |g| g.active);
            let Some(directive) = line.trim_start().strip_prefix('#') else {
                if active {
                    if text.is_empty() {
                        text_line = line_no;
                    }
                    text.extend(tokenize(&line));
                    text.push(Token::new(TokenKind::Newline, "\n"));
                }
                continue;
            };

            self.flush(&mut text, out).map_err(|m| err(text_line, m))?;

            let directive = directive.trim_start();
            let name_len = directive
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(directive.len());
            let (name, rest) = directive.split_at(name_len);
            let rest = rest.trim();

            match name {
                "if" | "ifdef" | "ifndef" => {
                    let value = if !active {
                        false
                    } else if name == "if" {
                        self.condition(rest).map_err(|m| err(line_no, m))?
                    } else {
                        let macro_name = rest.split_whitespace().next().ok_or_else(|| {
                            err(line_no, format!("no macro name given in #{name} directive"))
                        })?;
                        self.macros.is_defined(macro_name) == (name == "ifdef")
                    };
                    groups.push(Conditional {
                        line: line_no,
                        parent_active: active,
                        active: value,
                        taken: value,
                        seen_else: false,
                    });
                }
                "elif" => {
                    let Some(group) = groups.last() else {
                        return Err(err(line_no, "#elif without #if".to_string()));
                    };
                    if group.seen_else {
                        return Err(err(line_no, "#elif after #else".to_string()));
                    }
                    let value = if group.parent_active && !group.taken {
                        self.condition(rest).map_err(|m| err(line_no, m))?
                    } else {
                        false
                    };
                    if let Some(group) = groups.last_mut() {
                        group.active = value;
                        group.taken |= value;
                    }
                }
                "else" => {
                    let Some(group) = groups.last_mut() else {
                        return Err(err(line_no, "#else without #if".to_string()));
                    };
                    if group.seen_else {
                        return Err(err(line_no, "#else after #else".to_string()));
                    }
                    group.seen_else = true;
                    group.active = group.parent_active && !group.taken;
                    group.taken = true;
                }
                "endif" => {
                    if groups.pop().is_none() {
                        return Err(err(line_no, "#endif without #if".to_string()));
                    }
                }
                _ if !active => {}
                "define" => self.macros.define(rest).map_err(|m| err(line_no, m))?,
                "undef" => {
                    let macro_name = rest
                        .split_whitespace()
                        .next()
                        .ok_or_else(|| err(line_no, "no macro name given in #undef directive".to_string()))?;
                    self.macros.undefine(macro_name);
                }
                "include" => self.include(rest, dir, out).map_err(|e| match e {
                    ShaderGenError::Io(io) => err(line_no, io.to_string()),
                    ShaderGenError::Other(msg) => err(line_no, msg.to_string()),
                    other => other,
                })?,
                "error" => return Err(err(line_no, format!("#error {rest}"))),
                "warning" => warn!("{file}:{line_no}: #warning {rest}"),
                "pragma" if rest == "once" => {
                    if file != ROOT_FILE {
                        self.once.insert(PathBuf::from(file));
                    }
                }
                "" => {}
                _ => {
                    out.push_str(line.trim());
                    out.push('\n');
                }
            }
        }

        self.flush(&mut text, out).map_err(|m| err(text_line, m))?;
        if let Some(group) = groups.first() {
            return Err(err(group.line, "unterminated conditional directive".to_string()));
        }
        Ok(())
    }

    fn flush(&self, text: &mut Vec<Token>, out: &mut String) -> Result<(), String> {
        if text.is_empty() {
            return Ok(());
        }
        let expanded = self.macros.expand(std::mem::take(text))?;
        out.push_str(&to_text(&expanded));
        Ok(())
    }

    /// Value of an `#if` / `#elif` expression.
    fn condition(&self, expression: &str) -> Result<bool, String> {
        let tokens = tokenize(expression);
        let mut resolved = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            if token.kind != TokenKind::Ident || token.text != "defined" {
                resolved.push(token.clone());
                i += 1;
                continue;
            }
            let mut j = next_solid(&tokens, i + 1);
            let parenthesized = tokens.get(j).is_some_and(|t| t.is_punct("("));
            if parenthesized {
                j = next_solid(&tokens, j + 1);
            }
            let name = match tokens.get(j) {
                Some(t) if t.kind == TokenKind::Ident => &t.text,
                _ => return Err("operator 'defined' requires an identifier".to_string()),
            };
            if parenthesized {
                let close = next_solid(&tokens, j + 1);
                if !tokens.get(close).is_some_and(|t| t.is_punct(")")) {
                    return Err("missing ')' after 'defined'".to_string());
                }
                j = close;
            }
            let value = if self.macros.is_defined(name) { "1" } else { "0" };
            resolved.push(Token::new(TokenKind::Number, value));
            i = j + 1;
        }
        let expanded = self.macros.expand(resolved)?;
        expr::evaluate(&expanded).map(|v| v != 0)
    }

    fn include(&mut self, operand: &str, dir: &Path, out: &mut String) -> ShaderGenResult<()> {
        let operand = if operand.starts_with('"') || operand.starts_with('<') {
            operand.to_string()
        } else {
            let expanded = self.macros.expand(tokenize(operand)).map_err(|m| anyhow::anyhow!(m))?;
            to_text(trim(&expanded))
        };
        let Some(target) = deps::include_target(&format!("#include {operand}")).map(str::to_string) else {
            return Err(anyhow::anyhow!("#include expects \"FILENAME\" or <FILENAME>").into());
        };
        let angled = operand.starts_with('<');
        let Some(path) = self.resolve(&target, angled, dir) else {
            return Err(anyhow::anyhow!("can't open include file '{target}'").into());
        };
        if self.once.contains(&path) {
            return Ok(());
        }
        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(anyhow::anyhow!("#include nested too deeply").into());
        }

        let source = std::fs::read_to_string(&path)?;
        if !self.dependencies.contains(&path) {
            self.dependencies.push(path.clone());
        }
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.depth += 1;
        let result = self.process(&source, &path.to_string_lossy(), &parent, out);
        self.depth -= 1;
        result
    }

    fn resolve(&self, target: &str, angled: bool, dir: &Path) -> Option<PathBuf> {
        let candidate = Path::new(target);
        if candidate.is_absolute() {
            return candidate.is_file().then(|| deps::normalize(candidate));
        }
        let local = std::iter::once(dir);
        let search: Vec<&Path> = if angled {
            self.include_dirs.iter().map(PathBuf::as_path).chain(local).collect()
        } else {
            local.chain(self.include_dirs.iter().map(PathBuf::as_path)).collect()
        };
        search
            .into_iter()
            .map(|d| deps::normalize(&d.join(target)))
            .find(|p| p.is_file())
    }
}

fn next_solid(tokens: &[Token], from: usize) -> usize {
    (from..tokens.len()).find(|&j| !tokens[j].is_space()).unwrap_or(tokens.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn run(defines: &[&str], content: &str) -> ShaderGenResult<String> {
        let defines: Vec<String> = defines.iter().map(|d| d.to_string()).collect();
        preprocess(&defines, content, Path::new(".")).map(|p| p.output)
    }

    #[test]
    fn expanded_directives_are_emitted_verbatim() {
        let content = "#define VERSION\t\t\t#version 430\nVERSION\n#extension GL_ARB_separate_shader_objects : enable\nvoid main() {}\n";
        assert_eq!(
            run(&[], content).unwrap(),
            "#version 430\n#extension GL_ARB_separate_shader_objects : enable\nvoid main() {}\n"
        );
    }

    #[test]
    fn conditionals_select_branches() {
        let content = concat!(
            "#if defined(CONST_SceneInfo_ViewProj) && !defined VINPUT_Color\n",
            "a\n",
            "#elif MAX_LIGHTS > 2\n",
            "b\n",
            "#else\n",
            "c\n",
            "#endif\n",
            "#ifdef VINPUT_Color\n",
            "#error never reached\n",
            "#endif\n",
        );
        assert_eq!(run(&["CONST_SceneInfo_ViewProj"], content).unwrap(), "a\n");
        assert_eq!(run(&["VINPUT_Color", "MAX_LIGHTS=4"], content).unwrap_err().to_string(), "<shader>:9: #error never reached");
        assert_eq!(run(&["MAX_LIGHTS=1"], content).unwrap(), "c\n");
    }

    #[test]
    fn nested_groups_inside_disabled_branches_are_skipped() {
        let content = "#if 0\n#if garbage (\n#else\nx\n#endif\n#else\ny\n#endif\n";
        assert_eq!(run(&[], content).unwrap(), "y\n");
    }

    #[test]
    fn unbalanced_conditionals_are_errors() {
        let err = run(&[], "#if 1\nx\n").unwrap_err();
        assert_eq!(err.to_string(), "<shader>:1: unterminated conditional directive");
        assert!(run(&[], "#endif\n").unwrap_err().to_string().contains("#endif without #if"));
        assert!(run(&[], "#if 1\n#else\n#elif 1\n#endif\n").unwrap_err().to_string().contains("#elif after #else"));
    }

    #[test]
    fn multi_line_invocations_expand() {
        let content = "#define ADD(a, b) ((a) + (b))\nx = ADD(1,\n        2);\n";
        assert_eq!(run(&[], content).unwrap(), "x = ((1) + (2));\n");
    }

    #[test]
    fn includes_resolve_relative_to_the_including_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::create_dir_all(dir.join("lib")).unwrap();
        fs::write(dir.join("lib/Math.h"), "#pragma once\n#include \"Consts.h\"\nfloat Square(float x) { return x * x; }\n").unwrap();
        fs::write(dir.join("lib/Consts.h"), "#define PI 3.14159\n").unwrap();

        let content = "#include \"lib/Math.h\"\n#include \"lib/Math.h\"\nfloat a = PI;\n";
        let result = preprocess(&[], content, dir).unwrap();
        assert_eq!(result.output, "float Square(float x) { return x * x; }\nfloat a = 3.14159;\n");
        assert_eq!(result.dependencies, vec![dir.join("lib/Math.h"), dir.join("lib/Consts.h")]);

        let err = preprocess(&[], "\n#include \"Nope.h\"\n", dir).unwrap_err();
        assert_eq!(err.to_string(), "<shader>:2: can't open include file 'Nope.h'");
    }

    #[test]
    fn include_dirs_serve_angled_includes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::write(dir.join("Shared.h"), "shared\n").unwrap();
        let result = Preprocessor::new()
            .with_include_dir(dir)
            .run("#include <Shared.h>\n", Path::new("/nonexistent"))
            .unwrap();
        assert_eq!(result.output, "shared\n");
    }

    #[test]
    fn errors_in_included_files_name_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::write(dir.join("Bad.h"), "ok\n#error config error\n").unwrap();
        let err = preprocess(&[], "#include \"Bad.h\"\n", dir).unwrap_err();
        assert!(matches!(err, ShaderGenError::Preprocess { line: 2, .. }));
        assert!(err.to_string().ends_with("Bad.h:2: #error config error"));
    }
}
