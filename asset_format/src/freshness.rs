//! Source/destination modification-time comparisons.
//!
//! The build skips any destination that is newer than all of its inputs.
//! Directory scans treat extensionless entries as subdirectories and recurse.

use std::path::Path;
use std::time::SystemTime;

pub fn last_write_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// True when `dst` is missing or older than `src`.
pub fn is_file_out_of_date(src: &Path, dst: &Path) -> bool {
    let Some(dst_time) = last_write_time(dst) else {
        return true;
    };

    match last_write_time(src) {
        Some(src_time) => src_time > dst_time,
        None => true,
    }
}

/// True when any of `paths` exists and is newer than `reference`.
pub fn is_any_out_of_date<P: AsRef<Path>>(paths: &[P], reference: Option<SystemTime>) -> bool {
    let Some(reference) = reference else {
        return true;
    };

    paths
        .iter()
        .filter_map(|path| last_write_time(path.as_ref()))
        .any(|time| time > reference)
}

fn max_write_time_recursive(dir: &Path, newest: &mut Option<SystemTime>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if path.extension().is_none() {
            max_write_time_recursive(&path, newest);
            continue;
        }

        if let Some(time) = last_write_time(&path) {
            if newest.map_or(true, |n| time > n) {
                *newest = Some(time);
            }
        }
    }
}

/// True when `dst_dir` is missing or the newest file under `src_dir` is newer
/// than the newest file under `dst_dir`.
pub fn is_directory_out_of_date(src_dir: &Path, dst_dir: &Path) -> bool {
    if !dst_dir.exists() {
        return true;
    }

    let mut src_time = None;
    let mut dst_time = None;
    max_write_time_recursive(src_dir, &mut src_time);
    max_write_time_recursive(dst_dir, &mut dst_time);

    match (src_time, dst_time) {
        (Some(src), Some(dst)) => src > dst,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{Duration, SystemTime};

    use super::{is_any_out_of_date, is_directory_out_of_date, is_file_out_of_date};

    #[test]
    fn missing_destination_is_out_of_date() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.obj");
        fs::write(&src, "x").unwrap();

        assert!(is_file_out_of_date(&src, &dir.path().join("a.pkmesh")));
    }

    #[test]
    fn newer_destination_is_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.obj");
        let dst = dir.path().join("a.pkmesh");
        fs::write(&src, "x").unwrap();
        fs::write(&dst, "y").unwrap();

        let old = SystemTime::now() - Duration::from_secs(3600);
        let file = fs::File::open(&src).unwrap();
        file.set_modified(old).unwrap();

        assert!(!is_file_out_of_date(&src, &dst));
    }

    #[test]
    fn any_out_of_date_against_reference() {
        let dir = tempfile::tempdir().unwrap();
        let include = dir.path().join("common.glsl");
        fs::write(&include, "x").unwrap();

        let past = SystemTime::now() - Duration::from_secs(3600);
        let future = SystemTime::now() + Duration::from_secs(3600);
        assert!(is_any_out_of_date(&[&include], Some(past)));
        assert!(!is_any_out_of_date(&[&include], Some(future)));
        assert!(is_any_out_of_date(&[&include], None));
    }

    #[test]
    fn directory_scan_recurses_extensionless_entries() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("nested").join("a.obj"), "x").unwrap();

        // Destination directory exists but has no files: source wins.
        assert!(is_directory_out_of_date(&src, &dst));

        fs::write(dst.join("a.pkmesh"), "y").unwrap();
        assert!(!is_directory_out_of_date(&src, &dst));
    }
}
