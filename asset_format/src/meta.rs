//! `.pkmeta` sidecar files: per-asset build options as `key value` lines.

use std::collections::HashMap;
use std::path::Path;

/// Parsed sidecar options. A missing or unreadable file behaves like an empty
/// one, so every option falls back to its default.
#[derive(Clone, Debug, Default)]
pub struct AssetMeta {
    values: HashMap<String, String>,
}

impl AssetMeta {
    pub fn open(path: &Path) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Self::default();
        };

        let mut values = HashMap::new();

        for line in contents.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };

            values.insert(key.to_owned(), value.to_owned());
        }

        Self { values }
    }

    /// Sidecar path for a source file: `<file>.pkmeta` appended to the full
    /// file name.
    pub fn for_source(source: &Path) -> Self {
        let mut path = source.as_os_str().to_owned();
        path.push(".pkmeta");
        Self::open(Path::new(&path))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            "1" | "true" | "True" => Some(true),
            "0" | "false" | "False" => Some(false),
            _ => None,
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::AssetMeta;

    #[test]
    fn parses_bool_spellings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.obj.pkmeta");
        std::fs::write(
            &path,
            "mesh_splitPositionStream True\nmesh_useHalfPrecisionNormals 1\n# comment\nmesh_useHalfPrecisionUVs False\n",
        )
        .unwrap();

        let meta = AssetMeta::open(&path);
        assert_eq!(meta.get_bool("mesh_splitPositionStream"), Some(true));
        assert_eq!(meta.get_bool("mesh_useHalfPrecisionNormals"), Some(true));
        assert_eq!(meta.get_bool("mesh_useHalfPrecisionUVs"), Some(false));
        assert_eq!(meta.get_bool("mesh_useHalfPrecisionTangents"), None);
        assert!(!meta.bool_or("mesh_useHalfPrecisionUVs", true));
    }

    #[test]
    fn missing_file_is_empty() {
        let meta = AssetMeta::open(std::path::Path::new("/nonexistent/x.pkmeta"));
        assert_eq!(meta.get_bool("anything"), None);
    }
}
