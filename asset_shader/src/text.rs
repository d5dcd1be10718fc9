//! Text utilities for the shader dialect: include expansion, token-line
//! extraction, scope scanning and identifier-safe replacement.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

/// Characters that disqualify a masked replacement when adjacent to a match.
pub const IDENTIFIER_MASK: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_.";

const IDENTIFIER_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_";

pub fn is_identifier_char(c: char) -> bool {
    IDENTIFIER_CHARS.contains(c)
}

/// Reads a file and expands `#include "path"` lines recursively, resolving
/// paths relative to the including file.
///
/// `#pragma once` guards are honoured via an include-path set; every visited
/// file is recorded in `visited` for downstream freshness checks.
pub fn read_file_recursive_include(
    path: &Path,
    visited: &mut Vec<PathBuf>,
) -> io::Result<String> {
    fn read_inner(
        path: &Path,
        visited: &mut Vec<PathBuf>,
        once: &mut HashSet<PathBuf>,
    ) -> io::Result<String> {
        let contents = std::fs::read_to_string(path)?;
        visited.push(path.to_path_buf());

        let mut result = String::with_capacity(contents.len());

        for line in contents.lines() {
            if line.trim_start().starts_with("#pragma once") {
                if !once.insert(path.to_path_buf()) {
                    // Already expanded once, drop the whole file.
                    return Ok(String::new());
                }

                continue;
            }

            if let Some(rest) = line.trim_start().strip_prefix("#include ") {
                let rest = rest.trim();
                let include = rest
                    .strip_prefix('"')
                    .and_then(|r| r.split('"').next())
                    .ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("invalid include directive: {line}"),
                        )
                    })?;

                let resolved = path
                    .parent()
                    .map(|dir| dir.join(include))
                    .unwrap_or_else(|| PathBuf::from(include));

                result.push_str(&read_inner(&resolved, visited, once)?);
                continue;
            }

            result.push_str(line);
            result.push('\n');
        }

        Ok(result)
    }

    // The guard set persists across sibling includes but not across calls.
    let mut once = HashSet::new();
    read_inner(path, visited, &mut once)
}

fn line_bounds(source: &str, pos: usize) -> (usize, usize) {
    let eol = source[pos..]
        .find(['\r', '\n'])
        .map_or(source.len(), |p| p + pos);
    let next = source[eol..]
        .find(|c| c != '\r' && c != '\n')
        .map_or(source.len(), |p| p + eol);
    (eol, next)
}

/// Removes every line containing `token` and returns the value of the first
/// one: the rest of the line after the token, or the whole line including the
/// trailing newline when `include_token` is set.
pub fn extract_token(source: &mut String, token: &str, include_token: bool) -> Option<String> {
    let mut first = None;

    while let Some(pos) = source.find(token) {
        let (eol, next) = line_bounds(source, pos);

        if first.is_none() {
            first = Some(if include_token {
                source[pos..next].to_string()
            } else {
                source[pos + token.len()..eol].to_string()
            });
        }

        source.replace_range(pos..next, "");
    }

    first
}

/// Like [`extract_token`] but starts the search at `offset` and removes only
/// that occurrence. Returns the match position and value.
pub fn extract_token_at(
    source: &mut String,
    offset: usize,
    token: &str,
    include_token: bool,
) -> Option<(usize, String)> {
    let pos = source[offset..].find(token)? + offset;
    let (eol, next) = line_bounds(source, pos);

    let value = if include_token {
        source[pos..next].to_string()
    } else {
        source[pos + token.len()..eol].to_string()
    };

    source.replace_range(pos..next, "");
    Some((pos, value))
}

/// Collects the values of every `token` line without modifying the source.
pub fn find_tokens(source: &str, token: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut offset = 0;

    while let Some(pos) = source[offset..].find(token).map(|p| p + offset) {
        let (eol, next) = line_bounds(source, pos);
        values.push(source[pos + token.len()..eol].to_string());
        offset = next;
    }

    values
}

/// Finds a balanced `open`..`close` region starting at or after `offset`.
/// Returns the positions of the opening and closing delimiters.
pub fn find_scope_char(
    source: &str,
    offset: usize,
    open: char,
    close: char,
) -> Option<(usize, usize)> {
    let start = source[offset..].find(open)? + offset;
    let mut depth = 1i32;

    for (pos, c) in source[start + open.len_utf8()..].char_indices() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;

            if depth == 0 {
                return Some((start, start + open.len_utf8() + pos));
            }
        }
    }

    None
}

/// String-delimited variant of [`find_scope_char`].
pub fn find_scope_str(
    source: &str,
    offset: usize,
    open: &str,
    close: &str,
) -> Option<(usize, usize)> {
    let start = source[offset..].find(open)? + offset;
    let mut cursor = start + open.len();
    let mut depth = 1i32;

    loop {
        let next_open = source[cursor..].find(open).map(|p| p + cursor);
        let next_close = source[cursor..].find(close).map(|p| p + cursor);

        let (pos, is_open) = match (next_open, next_close) {
            (Some(o), Some(c)) if o < c => (o, true),
            (_, Some(c)) => (c, false),
            (Some(o), None) => (o, true),
            (None, None) => return None,
        };

        depth += if is_open { 1 } else { -1 };

        if depth == 0 {
            return Some((start, pos));
        }

        cursor = pos + if is_open { open.len() } else { close.len() };
    }
}

/// Replaces whole-identifier occurrences of `from` with `to`. A match is
/// rejected when either neighbouring character belongs to `mask`.
pub fn replace_all_masked(source: &mut String, mask: &str, from: &str, to: &str) {
    if from.is_empty() {
        return;
    }

    let mut pos = 0;

    while let Some(found) = source[pos..].find(from).map(|p| p + pos) {
        let before = source[..found].chars().next_back();
        let after = source[found + from.len()..].chars().next();

        let blocked = before.is_some_and(|c| mask.contains(c))
            || after.is_some_and(|c| mask.contains(c));

        if blocked {
            pos = found + from.len();
            continue;
        }

        source.replace_range(found..found + from.len(), to);
        pos = found + to.len();
    }
}

/// Splits on any of `separators` after stripping all whitespace.
pub fn split_no_whitespace(value: &str, separators: &[char]) -> Vec<String> {
    let packed: String = value.chars().filter(|c| !c.is_whitespace()).collect();

    packed
        .split(|c| separators.contains(&c))
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Splits on any of `symbols`, dropping empty segments.
pub fn split(value: &str, symbols: &[char]) -> Vec<String> {
    value
        .split(|c| symbols.contains(&c))
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        extract_token, find_scope_char, find_scope_str, find_tokens,
        read_file_recursive_include, replace_all_masked, IDENTIFIER_MASK,
    };

    #[test]
    fn extract_removes_all_and_returns_first() {
        let mut source = "#ZTest LEqual\ncode\n#ZTest Always\nmore\n".to_string();
        let value = extract_token(&mut source, "#ZTest ", false);
        assert_eq!(value.as_deref(), Some("LEqual"));
        assert_eq!(source, "code\nmore\n");
    }

    #[test]
    fn extract_with_token_keeps_line() {
        let mut source = "#version 450\nvoid main() {}\n".to_string();
        let value = extract_token(&mut source, "#version ", true);
        assert_eq!(value.as_deref(), Some("#version 450\n"));
        assert_eq!(source, "void main() {}\n");
    }

    #[test]
    fn extract_handles_missing_trailing_newline() {
        let mut source = "code\n#pragma pk_logverbose".to_string();
        let value = extract_token(&mut source, "#pragma pk_logverbose", true);
        assert!(value.is_some());
        assert_eq!(source, "code\n");
    }

    #[test]
    fn find_tokens_is_non_destructive() {
        let source = "#define A\n#define B\n";
        assert_eq!(find_tokens(source, "#define "), vec!["A", "B"]);
    }

    #[test]
    fn nested_scopes() {
        let source = "fn x() { if y { z } }";
        let (open, close) = find_scope_char(source, 0, '{', '}').unwrap();
        assert_eq!(open, 7);
        assert_eq!(close, source.len() - 1);

        let (open, close) = find_scope_str(source, 0, "{", "}").unwrap();
        assert_eq!(open, 7);
        assert_eq!(close, source.len() - 1);
    }

    #[test]
    fn masked_replace_respects_identifiers() {
        let mut source = "float3 float3x4 float3_foo".to_string();
        replace_all_masked(&mut source, IDENTIFIER_MASK, "float3x4", "mat3x4");
        replace_all_masked(&mut source, IDENTIFIER_MASK, "float3", "vec3");
        assert_eq!(source, "vec3 mat3x4 float3_foo");
    }

    #[test]
    fn include_expansion_honours_pragma_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("common.glsl"),
            "#pragma once\nfloat shared_value;\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("main.shader"),
            "#include \"common.glsl\"\n#include \"common.glsl\"\nvoid main() {}\n",
        )
        .unwrap();

        let mut visited = Vec::new();
        let expanded =
            read_file_recursive_include(&dir.path().join("main.shader"), &mut visited).unwrap();

        assert_eq!(expanded.matches("shared_value").count(), 1);
        assert_eq!(visited.len(), 3);
    }
}
