//! Offline asset compiler.
//!
//! Mirrors a source directory tree of authoring files into a parallel tree
//! of packed binary runtime assets:
//!
//! | source    | output       |
//! |-----------|--------------|
//! | `.shader` | `.pkshader`  |
//! | `.obj`    | `.pkmesh`    |
//! | `.ttf`    | `.pkfont`    |
//! | `.ktx2`   | `.pktexture` |

mod font;
mod texture;

use std::fmt::Display;
use std::path::{Path, PathBuf};

use asset_format::freshness;
use asset_format::writer::WriteStatus;

/// Strips optional single quotes around a CLI path argument.
fn process_path(argument: &str) -> PathBuf {
    let trimmed = argument
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .unwrap_or(argument);

    PathBuf::from(trimmed)
}

/// One build status line per file; a failure never cancels the batch.
fn report<E: Display>(dst: &Path, result: Result<WriteStatus, E>) {
    match result {
        Ok(WriteStatus::Written) => println!("Wrote asset: {}", dst.display()),
        Ok(WriteStatus::UpToDate) => println!("Asset was up to date: {}", dst.display()),
        Err(err) => {
            tracing::error!("{err}");
            println!("Failed to asset: {}", dst.display());
        }
    }
}

fn process_files_recursive(base: &Path, dir: &Path, dst_root: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    let mut entries: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).collect();
    entries.sort();

    for path in entries {
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            // Extensionless entries are treated as subdirectories.
            process_files_recursive(base, &path, dst_root);
            continue;
        };

        let relative = path.strip_prefix(base).unwrap_or(&path);
        let dst = dst_root.join(relative);

        match extension {
            "shader" => {
                let dst = dst.with_extension("pkshader");
                report(&dst, asset_shader::write_shader(&path, &dst));
            }
            "obj" => {
                let dst = dst.with_extension("pkmesh");
                report(&dst, asset_mesh::write_mesh(&path, &dst));
            }
            "ttf" => {
                let dst = dst.with_extension("pkfont");
                report(&dst, font::write_font(&path, &dst));
            }
            "ktx2" => {
                let dst = dst.with_extension("pktexture");
                report(&dst, texture::write_texture(&path, &dst));
            }
            _ => (),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let program = std::env::args().next().unwrap_or_default();
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.len() > 2 {
        println!("Invalid number of arguments. current: {}", args.len());

        for arg in &args {
            println!("{arg}");
        }

        return;
    }

    // Two arguments are the source and destination. With a single argument
    // the launcher passed an explicit working directory in the program slot;
    // it doubles as the source root.
    let (source_arg, dst_arg) = if args.len() == 2 {
        (args[0].as_str(), args[1].as_str())
    } else {
        (program.as_str(), args[0].as_str())
    };

    let srcdir = process_path(source_arg);
    let dstdir = process_path(dst_arg);

    println!("Processing assets from: {}", srcdir.display());
    println!("to: {}", dstdir.display());

    if !srcdir.exists() {
        println!("Source directory not found: {}", srcdir.display());
        return;
    }

    if !freshness::is_directory_out_of_date(&srcdir, &dstdir) {
        println!("Assets are up to date.");
        return;
    }

    process_files_recursive(&srcdir, &srcdir, &dstdir);
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::process_path;

    #[test]
    fn quoted_paths_are_unwrapped() {
        assert_eq!(process_path("'/tmp/assets'"), PathBuf::from("/tmp/assets"));
        assert_eq!(process_path("/tmp/assets"), PathBuf::from("/tmp/assets"));
        assert_eq!(process_path("'x"), PathBuf::from("'x"));
    }
}
