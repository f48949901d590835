use std::path::{Path, PathBuf};

const ANN_SUFFIX: &str = ".ann";
const IDS_SUFFIX: &str = ".ids.json";
const META_SUFFIX: &str = ".meta.json";
const SPARSE_SUFFIX: &str = ".sparse.bin";

/// Artifact file names derived from one index path prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub prefix: PathBuf,
    pub ann: PathBuf,
    pub ids: PathBuf,
    pub meta: PathBuf,
    pub sparse: PathBuf,
}

impl IndexPaths {
    /// Accepts a bare prefix or the path of one of its artifacts
    ///
    /// Non-UTF-8 prefixes are kept byte-for-byte and never stripped.
    pub fn from_prefix(prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix.as_ref();
        let base = match prefix.to_str() {
            Some(raw) => PathBuf::from(
                [SPARSE_SUFFIX, IDS_SUFFIX, META_SUFFIX, ANN_SUFFIX]
                    .iter()
                    .find_map(|suffix| raw.strip_suffix(suffix))
                    .unwrap_or(raw),
            ),
            None => prefix.to_path_buf(),
        };

        let with = |suffix: &str| {
            let mut name = base.clone().into_os_string();
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            ann: with(ANN_SUFFIX),
            ids: with(IDS_SUFFIX),
            meta: with(META_SUFFIX),
            sparse: with(SPARSE_SUFFIX),
            prefix: base,
        }
    }

    /// The dense family, in write order (probe artifact last)
    pub fn dense_artifacts(&self) -> [&PathBuf; 3] {
        [&self.ids, &self.meta, &self.ann]
    }

    /// Directory that must exist before saving
    pub fn parent_dir(&self) -> Option<&Path> {
        self.prefix.parent().filter(|p| !p.as_os_str().is_empty())
    }

    /// Temporary sibling used for write-then-rename
    pub fn staging(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}
