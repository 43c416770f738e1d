use anyhow::{bail, Result};
use std::path::{Component, Path, PathBuf};

/// Ensure `rel` stays under `root`: no absolute paths, no `..`,
/// and no symlinked component between `root` and the target.
/// The target itself need not exist.
pub fn resolve_under(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() || rel.starts_with('/') {
        bail!("absolute paths are not allowed: {:?}", rel);
    }
    for comp in rel_path.components() {
        match comp {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => bail!("parent traversal not allowed: {:?}", rel),
            Component::RootDir | Component::Prefix(_) => {
                bail!("absolute paths are not allowed: {:?}", rel)
            }
        }
    }
    let mut cur = root.to_path_buf();
    for comp in rel_path.components() {
        cur.push(comp);
        if let Ok(m) = std::fs::symlink_metadata(&cur) {
            if m.file_type().is_symlink() {
                bail!("symlink in path (not following): {:?}", cur);
            }
        }
    }
    Ok(root.join(rel_path))
}
