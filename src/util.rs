//! Утилиты: копирование файла под вывод канала.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Скопировать src в dest, создав родительские каталоги.
/// Копирование файла в самого себя — no-op.
pub fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    if let (Ok(a), Ok(b)) = (src.canonicalize(), dest.canonicalize()) {
        if a == b {
            return Ok(());
        }
    }
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output directory {}", parent.display()))?;
        }
    }
    fs::copy(src, dest)
        .with_context(|| format!("copy {} to {}", src.display(), dest.display()))?;
    Ok(())
}
