use std::path::{Path, PathBuf};

use anyhow::Context;
use leakscope::ClassFile;

/// Reads a class file and parses it, keeping the original bytes.
pub fn load_class(path: &Path) -> anyhow::Result<(Vec<u8>, ClassFile)> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let class = ClassFile::parse(&bytes)
        .with_context(|| format!("failed to parse class file: {}", path.display()))?;
    Ok((bytes, class))
}

/// Lower-case names of the set flags, space separated.
pub fn flag_names<'a, F>(names: impl Iterator<Item = (&'a str, F)>) -> String {
    names
        .map(|(name, _)| name.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Where to write the output for `input`.
///
/// An explicit output directory receives the suffixed file name; an explicit file is used as
/// is; otherwise the suffixed file is written next to the input.
pub fn resolve_output_path(input: &Path, output: Option<&Path>, suffix: &str) -> PathBuf {
    let name = suffixed_filename(input, suffix);
    match output {
        Some(dir) if dir.is_dir() => dir.join(name),
        Some(file) => file.to_path_buf(),
        None => input.parent().unwrap_or(Path::new(".")).join(name),
    }
}

fn suffixed_filename(input: &Path, suffix: &str) -> String {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("output");
    match input.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{stem}{suffix}.{ext}"),
        _ => format!("{stem}{suffix}"),
    }
}

/// File name of `path` for messages.
pub fn file_display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}
