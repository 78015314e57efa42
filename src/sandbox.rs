//! Read-only filesystem tools rooted at the configured source directory.
//!
//! Failures are returned as strings beginning with `Error:` rather than as
//! `Err` values: the strings go back to the model as tool output, and the
//! model can recover within the same loop without the transport ever seeing
//! an exception.

use std::path::{Component, Path, PathBuf};

/// Largest file the read tool will return.
const MAX_FILE_SIZE: u64 = 100 * 1024;

/// Directory names omitted from listings to keep the model's context small.
const IGNORED_DIRS: &[&str] = &["node_modules", "vendor", "__pycache__"];

/// Filesystem access for the agent, confined to one root directory.
#[derive(Debug, Clone)]
pub struct SandboxFs {
    root: PathBuf,
}

impl SandboxFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SandboxFs { root: root.into() }
    }

    /// Resolve a tool-supplied path to an absolute path under the root.
    ///
    /// Two checks, both kept: the lexical one short-circuits obvious
    /// traversal (`../`, absolute paths) before touching the filesystem, and
    /// the post-canonicalization prefix check catches symlink escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        if self.root.as_os_str().is_empty() {
            return Err("Error: Source directory not configured".to_string());
        }

        let relative = lexical_clean(path)
            .ok_or_else(|| "Error: Invalid path - must be relative within source directory".to_string())?;

        let abs_root = std::fs::canonicalize(&self.root)
            .map_err(|e| format!("Error: Cannot access source directory: {}", e))?;

        let joined = abs_root.join(&relative);
        // Canonicalize when the target exists so symlinks are resolved;
        // otherwise keep the lexical join and let the read report not-found.
        let resolved = std::fs::canonicalize(&joined).unwrap_or(joined);

        if !resolved.starts_with(&abs_root) {
            return Err("Error: Path escapes source directory".to_string());
        }

        Ok(resolved)
    }

    /// List the immediate children of a directory, one name per line.
    ///
    /// Directories are suffixed with `/`. Hidden names and dependency
    /// directories are omitted. `.` means the sandbox root.
    pub async fn list_files(&self, path: &str) -> String {
        let dir = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return format!("Error: Directory not found: {}", path);
            }
            Err(e) => return format!("Error reading directory: {}", e),
        };

        let mut names = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return format!("Error reading directory: {}", e),
            };

            let mut name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || IGNORED_DIRS.contains(&name.as_str()) {
                continue;
            }
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }

        if names.is_empty() {
            return "Directory is empty or contains only hidden files".to_string();
        }

        // read_dir order is platform-dependent; keep tool output deterministic.
        names.sort();
        names.join("\n")
    }

    /// Read a file's bytes as text, within the size cap.
    pub async fn read_file(&self, path: &str) -> String {
        let file = match self.resolve(path) {
            Ok(p) => p,
            Err(e) => return e,
        };

        let meta = match tokio::fs::metadata(&file).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return format!("Error: File not found: {}", path);
            }
            Err(e) => return format!("Error: Cannot access file: {}", e),
        };

        if meta.is_dir() {
            return format!("Error: Path is a directory, not a file: {}", path);
        }
        if meta.len() > MAX_FILE_SIZE {
            return format!("Error: File too large ({} bytes, max 100KB)", meta.len());
        }

        match tokio::fs::read(&file).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => format!("Error reading file: {}", e),
        }
    }
}

/// Collapse `.` and `..` segments textually. Returns `None` when the path is
/// absolute or climbs above its starting point.
fn lexical_clean(path: &str) -> Option<PathBuf> {
    let p = Path::new(path);
    if p.is_absolute() {
        return None;
    }

    let mut clean = PathBuf::new();
    for component in p.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(c) => clean.push(c),
            Component::ParentDir => {
                if !clean.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    Some(clean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixture() -> (tempfile::TempDir, SandboxFs) {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
        std::fs::write(dir.path().join(".env"), "SECRET=1\n").unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        let sandbox = SandboxFs::new(dir.path());
        (dir, sandbox)
    }

    #[tokio::test]
    async fn lists_root_with_directory_suffix() {
        let (_dir, sandbox) = fixture();
        let listing = sandbox.list_files(".").await;
        assert_eq!(listing, "README.md\nsrc/");
    }

    #[tokio::test]
    async fn lists_subdirectory() {
        let (_dir, sandbox) = fixture();
        assert_eq!(sandbox.list_files("src").await, "main.rs");
        // Trailing slash resolves the same way.
        assert_eq!(sandbox.list_files("src/").await, "main.rs");
    }

    #[tokio::test]
    async fn empty_root_returns_literal_message() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        let sandbox = SandboxFs::new(dir.path());
        assert_eq!(
            sandbox.list_files(".").await,
            "Directory is empty or contains only hidden files"
        );
    }

    #[tokio::test]
    async fn reads_file_content() {
        let (_dir, sandbox) = fixture();
        assert_eq!(sandbox.read_file("src/main.rs").await, "fn main() {}\n");
    }

    #[tokio::test]
    async fn rejects_traversal_and_absolute_paths() {
        let (_dir, sandbox) = fixture();
        let invalid = "Error: Invalid path - must be relative within source directory";

        assert_eq!(sandbox.read_file("../../etc/passwd").await, invalid);
        assert_eq!(sandbox.read_file("/etc/passwd").await, invalid);
        assert_eq!(sandbox.read_file("//etc/passwd").await, invalid);
        assert_eq!(sandbox.read_file("src/../../outside").await, invalid);
        assert_eq!(sandbox.list_files("..").await, invalid);
    }

    #[tokio::test]
    async fn interior_dotdot_stays_inside() {
        let (_dir, sandbox) = fixture();
        // Collapses to src/main.rs, never leaves the root.
        let content = sandbox.read_file("src/../src/main.rs").await;
        assert_eq!(content, "fn main() {}\n");
    }

    #[tokio::test]
    async fn symlink_escape_is_caught_by_prefix_check() {
        let outside = tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "top secret").unwrap();

        let (dir, sandbox) = fixture();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt"))
            .unwrap();

        assert_eq!(
            sandbox.read_file("link.txt").await,
            "Error: Path escapes source directory"
        );
    }

    #[tokio::test]
    async fn missing_file_and_directory_mismatch() {
        let (_dir, sandbox) = fixture();
        assert_eq!(
            sandbox.read_file("nope.rs").await,
            "Error: File not found: nope.rs"
        );
        assert_eq!(
            sandbox.read_file("src").await,
            "Error: Path is a directory, not a file: src"
        );
        assert_eq!(
            sandbox.list_files("missing").await,
            "Error: Directory not found: missing"
        );
    }

    #[tokio::test]
    async fn size_cap_is_exact() {
        let (dir, sandbox) = fixture();

        std::fs::write(dir.path().join("exact.bin"), vec![b'a'; 100 * 1024]).unwrap();
        let content = sandbox.read_file("exact.bin").await;
        assert_eq!(content.len(), 100 * 1024);

        std::fs::write(dir.path().join("over.bin"), vec![b'a'; 100 * 1024 + 1]).unwrap();
        assert_eq!(
            sandbox.read_file("over.bin").await,
            format!("Error: File too large ({} bytes, max 100KB)", 100 * 1024 + 1)
        );
    }

    #[tokio::test]
    async fn empty_root_path_is_not_configured() {
        let sandbox = SandboxFs::new("");
        assert_eq!(
            sandbox.read_file("anything").await,
            "Error: Source directory not configured"
        );
    }

    #[test]
    fn lexical_clean_cases() {
        assert_eq!(lexical_clean("a/b/../c"), Some(PathBuf::from("a/c")));
        assert_eq!(lexical_clean("./a"), Some(PathBuf::from("a")));
        assert_eq!(lexical_clean("."), Some(PathBuf::new()));
        assert_eq!(lexical_clean("a/.."), Some(PathBuf::new()));
        assert_eq!(lexical_clean(".."), None);
        assert_eq!(lexical_clean("a/../.."), None);
        assert_eq!(lexical_clean("/abs"), None);
    }
}
