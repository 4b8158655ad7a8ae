//! Lightweight `#include` discovery.
//!
//! Only comments, line continuations and `#include` lines are understood:
//! conditionals are not evaluated, so includes in disabled branches are
//! listed too. Includes that do not exist are skipped.

use std::path::{Component, Path, PathBuf};

use crate::error::ShaderGenResult;

use super::lexer::logical_lines;

/// Files transitively included by `content`, resolved against `dir` (and
/// each included file's own directory), in discovery order.
pub fn find_shader_dependencies(content: &str, dir: &Path) -> ShaderGenResult<Vec<PathBuf>> {
    let mut dependencies = Vec::new();
    collect(content, dir, &mut dependencies)?;
    Ok(dependencies)
}

fn collect(content: &str, dir: &Path, dependencies: &mut Vec<PathBuf>) -> ShaderGenResult<()> {
    let start = dependencies.len();
    for (_, line) in logical_lines(content) {
        let Some(target) = include_target(&line) else {
            continue;
        };
        let path = normalize(&dir.join(target));
        if !dependencies.contains(&path) && path.is_file() {
            dependencies.push(path);
        }
    }

    let end = dependencies.len();
    for i in start..end {
        let path = dependencies[i].clone();
        let code = std::fs::read_to_string(&path)?;
        if !code.is_empty() {
            let parent = path.parent().unwrap_or(Path::new(""));
            collect(&code, parent, dependencies)?;
        }
    }
    Ok(())
}

/// Path between the quotes or angle brackets of an `#include` line.
pub(crate) fn include_target(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('#')?.trim_start();
    let rest = rest.strip_prefix("include")?.trim_start();
    let close = match rest.chars().next()? {
        '"' => '"',
        '<' => '>',
        _ => return None,
    };
    let inner = &rest[1..];
    inner.find(close).map(|end| &inner[..end])
}

/// Resolves `.` and `..` without touching the file system.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn include_lines_are_recognized() {
        assert_eq!(include_target("#include \"Common.h\""), Some("Common.h"));
        assert_eq!(include_target("  #  include <lib/Math.h> "), Some("lib/Math.h"));
        assert_eq!(include_target("#included \"x\""), None);
        assert_eq!(include_target("#define include \"x\""), None);
        assert_eq!(include_target("#include \"unterminated"), None);
    }

    #[test]
    fn dependencies_are_transitive_and_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        fs::create_dir_all(dir.join("lib")).unwrap();
        fs::write(dir.join("lib/Math.h"), "#include \"../Common.h\"\n").unwrap();
        fs::write(dir.join("Common.h"), "#define ONE 1\n").unwrap();

        let content = concat!(
            "#include \"lib/Math.h\"\n",
            "// #include \"Commented.h\"\n",
            "#include \"Common.h\"\n",
            "#include \"Missing.h\"\n",
        );
        let deps = find_shader_dependencies(content, dir).unwrap();
        assert_eq!(deps, vec![dir.join("lib/Math.h"), dir.join("Common.h")]);
    }

    #[test]
    fn normalize_folds_parent_components() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d.h")), PathBuf::from("/a/c/d.h"));
    }
}
