use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Joins a source path onto a base directory.
///
/// Debug information stores file names relative to include directories, which are in turn
/// relative to the compilation directory. Absolute right-hand sides replace the base, empty sides
/// are ignored and separators are not doubled.
///
/// ```
/// assert_eq!(crashlog_common::join_path("/src", "app/main.c"), "/src/app/main.c");
/// assert_eq!(crashlog_common::join_path("/src/", "/usr/include/stdio.h"), "/usr/include/stdio.h");
/// ```
pub fn join_path(base: &str, other: &str) -> String {
    // special case for things like <stdin> or <compiler-generated>
    if other.starts_with('<') && other.ends_with('>') {
        return other.into();
    }

    if base.is_empty() || other.starts_with('/') {
        return other.into();
    }

    if other.is_empty() {
        return base.into();
    }

    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        other.trim_start_matches('/')
    )
}

/// Simplifies paths by stripping redundant `./` and `../` components.
///
/// This does not operate on the file system and therefore does not resolve symlinks. Parent
/// components of absolute paths stop at the root, while relative paths keep leading `..`.
///
/// ```
/// assert_eq!(crashlog_common::clean_path("/a/./b"), "/a/b");
/// assert_eq!(crashlog_common::clean_path("/a/b/../c"), "/a/c");
/// ```
pub fn clean_path(path: &str) -> Cow<'_, str> {
    let is_absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if is_absolute => {}
                _ => segments.push(".."),
            },
            _ => segments.push(segment),
        }
    }

    let mut cleaned = segments.join("/");
    if is_absolute {
        cleaned.insert(0, '/');
    }

    if cleaned == path {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(cleaned)
    }
}

/// Extensions to `Path` for handling `dSYM` directories.
///
/// A `dSYM` is a folder structure storing the debug companion of an executable on Apple platforms:
///
/// ```text
/// MyApp.app.dSYM
/// └── Contents
///     ├── Info.plist
///     └── Resources
///         └── DWARF
///             └── MyApp
/// ```
pub trait DSymPathExt {
    /// Returns `true` if this path points to an existing directory with a `.dSYM` extension.
    fn is_dsym_dir(&self) -> bool;

    /// Resolves the path of the debug file in a `dSYM` directory structure.
    ///
    /// Returns `Some(path)` if this path is a dSYM directory and a file of the same name is located
    /// at `Contents/Resources/DWARF/`. An `.app` suffix in the bundle name is stripped.
    fn resolve_dsym(&self) -> Option<PathBuf>;
}

impl DSymPathExt for Path {
    fn is_dsym_dir(&self) -> bool {
        self.extension() == Some("dSYM".as_ref()) && self.is_dir()
    }

    fn resolve_dsym(&self) -> Option<PathBuf> {
        if !self.is_dsym_dir() {
            return None;
        }

        let framework = self.file_stem()?;
        let mut full_path = self.to_path_buf();
        full_path.push("Contents/Resources/DWARF");
        full_path.push(framework);

        // Xcode produces [appName].app.dSYM bundles where the debug file is just named [appName].
        if matches!(full_path.extension(), Some(extension) if extension == "app") {
            full_path = full_path.with_extension("")
        }

        full_path.is_file().then_some(full_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use similar_asserts::assert_eq;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("foo", "bar"), "foo/bar");
        assert_eq!(join_path("/foo/", "bar"), "/foo/bar");
        assert_eq!(join_path("/foo", "/bar"), "/bar");
        assert_eq!(join_path("", "bar"), "bar");
        assert_eq!(join_path("/foo", ""), "/foo");
        assert_eq!(join_path("/foo", "<stdin>"), "<stdin>");
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/a/b/c"), "/a/b/c");
        assert_eq!(clean_path("/a/./b"), "/a/b");
        assert_eq!(clean_path("/a/b/../c"), "/a/c");
        assert_eq!(clean_path("a/../../b"), "../b");
        assert_eq!(clean_path("./main.c"), "main.c");
    }

    #[test]
    fn test_resolve_dsym() -> Result<(), std::io::Error> {
        let tmp = tempfile::tempdir()?;
        let dsym = tmp.path().join("Crash.app.dSYM");
        let dwarf_dir = dsym.join("Contents/Resources/DWARF");
        fs::create_dir_all(&dwarf_dir)?;
        fs::write(dwarf_dir.join("Crash"), b"\xcf\xfa\xed\xfe")?;

        assert!(dsym.is_dsym_dir());
        assert_eq!(dsym.resolve_dsym(), Some(dwarf_dir.join("Crash")));

        let other = tmp.path().join("Other.dSYM");
        fs::create_dir_all(&other)?;
        assert_eq!(other.resolve_dsym(), None);

        Ok(())
    }
}
