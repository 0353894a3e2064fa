//! Path validation - resolves a model-supplied filename to a canonical path
//! inside the whitelist.
//!
//! The filename is text reflected back from the language model, so it is
//! treated as attacker-influenced: containment is recomputed on every call
//! even when the base directory came from a whitelist listing.

use crate::error::{AutoFileError, Result};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// 规范化后的绝对路径
    pub path: PathBuf,
    pub file_name: String,
    /// 小写、不带点
    pub extension: String,
    /// 包含该文件的白名单根目录
    pub root: PathBuf,
}

/// Access the caller needs on the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    /// 关闭时可能触发保存
    ReadWrite,
}

pub struct PathValidator {
    /// (展开后的根目录, 规范化后的根目录)
    roots: Vec<(PathBuf, PathBuf)>,
}

impl PathValidator {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots = roots
            .into_iter()
            .map(|r| {
                let lexical = normalize_lexically(r.as_ref());
                let canonical = fs::canonicalize(r.as_ref()).unwrap_or_else(|_| lexical.clone());
                (lexical, canonical)
            })
            .collect();
        Self { roots }
    }

    pub fn validate(&self, base_dir: &Path, filename: &str, access: Access) -> Result<ResolvedTarget> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(AutoFileError::FileNotFound(base_dir.to_path_buf()));
        }

        let joined = base_dir.join(filename);

        // 先做词法层面的包含检查：即使目标不存在，`..` 逃逸也必须报 PathNotWhitelisted
        let lexical = normalize_lexically(&joined);
        if !self
            .roots
            .iter()
            .any(|(lex_root, canon_root)| lexical.starts_with(lex_root) || lexical.starts_with(canon_root))
        {
            tracing::warn!("拒绝白名单外路径: {}", joined.display());
            return Err(AutoFileError::PathNotWhitelisted(joined));
        }

        let canonical = fs::canonicalize(&joined).map_err(|e| match e.kind() {
            IoErrorKind::PermissionDenied => AutoFileError::PermissionDenied {
                path: joined.clone(),
                access: "read",
            },
            _ => AutoFileError::FileNotFound(joined.clone()),
        })?;

        // 解析软链接后重新检查
        let root = self
            .containing_root(&canonical)
            .ok_or_else(|| {
                tracing::warn!(
                    "软链接逃逸: {} -> {}",
                    joined.display(),
                    canonical.display()
                );
                AutoFileError::PathNotWhitelisted(canonical.clone())
            })?
            .to_path_buf();

        if !canonical.is_file() {
            return Err(AutoFileError::FileNotFound(canonical));
        }

        check_access(&canonical, access)?;

        let file_name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = canonical
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        Ok(ResolvedTarget {
            path: canonical,
            file_name,
            extension,
            root,
        })
    }

    /// 嵌套根目录时取最深的那个
    fn containing_root(&self, canonical: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .map(|(_, canon_root)| canon_root.as_path())
            .filter(|root| canonical.starts_with(root))
            .max_by_key(|root| root.components().count())
    }
}

/// 检查已解析目标的读写权限
pub fn check_access(path: &Path, access: Access) -> Result<()> {
    fs::File::open(path).map_err(|e| match e.kind() {
        IoErrorKind::PermissionDenied => AutoFileError::PermissionDenied {
            path: path.to_path_buf(),
            access: "read",
        },
        _ => AutoFileError::FileNotFound(path.to_path_buf()),
    })?;

    if access == Access::ReadWrite {
        let writable = fs::OpenOptions::new().append(true).open(path).is_ok();
        if !writable {
            return Err(AutoFileError::PermissionDenied {
                path: path.to_path_buf(),
                access: "write",
            });
        }
    }
    Ok(())
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        validator: PathValidator,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap().join("docs");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("report.pdf"), b"%PDF").unwrap();
        fs::write(root.join("sub").join("notes.txt"), b"hi").unwrap();
        fs::write(root.parent().unwrap().join("outside.txt"), b"no").unwrap();
        let validator = PathValidator::new([&root]);
        Fixture {
            _dir: dir,
            root,
            validator,
        }
    }

    #[test]
    fn resolves_files_inside_root() {
        let fx = fixture();
        let target = fx.validator.validate(&fx.root, "report.pdf", Access::Read).unwrap();
        assert_eq!(target.path, fx.root.join("report.pdf"));
        assert_eq!(target.extension, "pdf");
        assert_eq!(target.file_name, "report.pdf");
        assert_eq!(target.root, fx.root);

        let nested = fx.validator.validate(&fx.root, "sub/./notes.txt", Access::ReadWrite).unwrap();
        assert_eq!(nested.path, fx.root.join("sub").join("notes.txt"));
    }

    #[test]
    fn rejects_parent_traversal() {
        let fx = fixture();
        let err = fx.validator.validate(&fx.root, "../../etc/passwd", Access::Read).unwrap_err();
        assert!(matches!(err, AutoFileError::PathNotWhitelisted(_)));

        let err = fx.validator.validate(&fx.root, "../outside.txt", Access::Read).unwrap_err();
        assert!(matches!(err, AutoFileError::PathNotWhitelisted(_)));

        // 即使拼接后看起来仍以根目录开头
        let err = fx
            .validator
            .validate(&fx.root.join("sub"), "../../outside.txt", Access::Read)
            .unwrap_err();
        assert!(matches!(err, AutoFileError::PathNotWhitelisted(_)));
    }

    #[test]
    fn rejects_traversal_to_missing_paths() {
        let fx = fixture();
        let err = fx.validator.validate(&fx.root, "../../nope/missing.txt", Access::Read).unwrap_err();
        assert!(matches!(err, AutoFileError::PathNotWhitelisted(_)));
    }

    #[test]
    fn rejects_absolute_paths_outside_root() {
        let fx = fixture();
        let outside = fx.root.parent().unwrap().join("outside.txt");
        let err = fx
            .validator
            .validate(&fx.root, &outside.to_string_lossy(), Access::Read)
            .unwrap_err();
        assert!(matches!(err, AutoFileError::PathNotWhitelisted(_)));
    }

    #[test]
    fn missing_file_is_not_found() {
        let fx = fixture();
        let err = fx.validator.validate(&fx.root, "ghost.pdf", Access::Read).unwrap_err();
        assert!(matches!(err, AutoFileError::FileNotFound(_)));

        let err = fx.validator.validate(&fx.root, "sub", Access::Read).unwrap_err();
        assert!(matches!(err, AutoFileError::FileNotFound(_)));

        let err = fx.validator.validate(&fx.root, "  ", Access::Read).unwrap_err();
        assert!(matches!(err, AutoFileError::FileNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let fx = fixture();
        let link = fx.root.join("innocent.txt");
        std::os::unix::fs::symlink(fx.root.parent().unwrap().join("outside.txt"), &link).unwrap();

        let err = fx.validator.validate(&fx.root, "innocent.txt", Access::Read).unwrap_err();
        assert!(matches!(err, AutoFileError::PathNotWhitelisted(_)));
    }

    #[cfg(unix)]
    #[test]
    fn read_only_file_fails_write_check() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        let path = fx.root.join("locked.csv");
        fs::write(&path, b"a,b").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).unwrap();

        fx.validator.validate(&fx.root, "locked.csv", Access::Read).unwrap();
        // root 用户不受权限位限制
        if fs::OpenOptions::new().append(true).open(&path).is_err() {
            let err = fx.validator.validate(&fx.root, "locked.csv", Access::ReadWrite).unwrap_err();
            assert!(matches!(err, AutoFileError::PermissionDenied { access: "write", .. }));
        }
    }

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(normalize_lexically(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_lexically(Path::new("/a/../../b")), PathBuf::from("/b"));
    }
}
