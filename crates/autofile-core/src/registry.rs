//! Whitelist registry - enumerates files under the configured root directories.
//!
//! Listings are built fresh on every call. Hidden entries, unreadable entries
//! and files above the size limit never appear in the output.

use crate::config::AppConfig;
use crate::error::{AutoFileError, Result};
use chrono::{DateTime, Local};
use glob::MatchOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub name: String,
    pub path: PathBuf,
    /// 小写、不带点；无扩展名时为空字符串
    #[serde(rename = "type")]
    pub extension: String,
    pub size: u64,
    /// 所属的白名单根目录
    pub directory: PathBuf,
    pub modified: DateTime<Local>,
}

impl FileRecord {
    /// 文件所在的目录（可能是根目录下的子目录）
    pub fn parent_dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.directory)
    }
}

pub struct WhitelistRegistry {
    /// (配置原文, 展开后的绝对路径)
    roots: Vec<(String, PathBuf)>,
    file_types: BTreeMap<String, Vec<String>>,
    max_file_size: u64,
}

/// 展开 `~` 与环境变量；展开失败时保留原文
pub fn expand_dir(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            tracing::warn!("无法展开路径 {}: {}", raw, e);
            PathBuf::from(shellexpand::tilde(raw).as_ref())
        }
    }
}

impl WhitelistRegistry {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut roots = Vec::new();
        for raw in &config.whitelist_dirs {
            let expanded = expand_dir(raw);
            if !expanded.is_dir() {
                tracing::warn!("白名单目录不存在，已忽略: {} -> {}", raw, expanded.display());
                continue;
            }
            let absolute = fs::canonicalize(&expanded).unwrap_or(expanded);
            if roots.iter().any(|(_, p): &(String, PathBuf)| p == &absolute) {
                continue;
            }
            roots.push((raw.clone(), absolute));
        }

        if roots.is_empty() {
            tracing::warn!("No valid directories found in whitelist");
            return Err(AutoFileError::NoValidDirectories);
        }

        let file_types = config
            .file_types
            .iter()
            .map(|(category, exts)| {
                let exts = exts
                    .iter()
                    .map(|e| e.trim_start_matches('.').to_lowercase())
                    .collect();
                (category.to_lowercase(), exts)
            })
            .collect();

        Ok(Self {
            roots,
            file_types,
            max_file_size: config.max_file_size,
        })
    }

    pub fn roots(&self) -> impl Iterator<Item = &Path> {
        self.roots.iter().map(|(_, p)| p.as_path())
    }

    /// 扩展名所属类别（如 "document"）
    pub fn category_of(&self, extension: &str) -> Option<&str> {
        let ext = extension.trim_start_matches('.').to_lowercase();
        self.file_types
            .iter()
            .find(|(_, exts)| exts.contains(&ext))
            .map(|(category, _)| category.as_str())
    }

    pub fn extensions_of(&self, category: &str) -> &[String] {
        self.file_types
            .get(&category.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 列出白名单中的文件
    ///
    /// `directory` 必须是某个白名单根目录（原文或展开后的形式），否则返回空列表。
    pub fn list_files(&self, directory: Option<&str>, type_filter: Option<&str>) -> Vec<FileRecord> {
        let search_roots: Vec<&Path> = match directory {
            Some(dir) => {
                let expanded = expand_dir(dir);
                let canonical = fs::canonicalize(&expanded).ok();
                self.roots
                    .iter()
                    .filter(|(raw, root)| {
                        raw == dir || root == &expanded || canonical.as_deref() == Some(root.as_path())
                    })
                    .map(|(_, root)| root.as_path())
                    .collect()
            }
            None => self.roots().collect(),
        };

        if search_roots.is_empty() {
            tracing::debug!("目录不在白名单中: {:?}", directory);
            return Vec::new();
        }

        let allowed_exts = type_filter.map(|t| self.extensions_of(t));

        let mut files = Vec::new();
        for root in search_roots {
            self.walk(root, root, allowed_exts, &mut files);
        }
        files
    }

    /// 按 glob 模式（不区分大小写）匹配文件名；模式非法时返回错误
    pub fn search(
        &self,
        pattern: &str,
        directory: Option<&str>,
    ) -> std::result::Result<Vec<FileRecord>, glob::PatternError> {
        let pattern = glob::Pattern::new(pattern)?;
        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };
        Ok(self
            .list_files(directory, None)
            .into_iter()
            .filter(|f| pattern.matches_with(&f.name, options))
            .collect())
    }

    fn walk(&self, root: &Path, dir: &Path, allowed_exts: Option<&[String]>, out: &mut Vec<FileRecord>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("跳过无法读取的目录 {}: {}", dir.display(), e);
                return;
            }
        };

        let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                self.walk(root, &path, allowed_exts, out);
                continue;
            }

            if file_type.is_symlink() {
                // 软链接只在目标仍位于根目录内、且是普通文件时收录
                match fs::canonicalize(&path) {
                    Ok(target) if target.starts_with(root) && target.is_file() => {}
                    _ => continue,
                }
            } else if !file_type.is_file() {
                continue;
            }

            if let Some(record) = self.make_record(root, &path, name, allowed_exts) {
                out.push(record);
            }
        }
    }

    fn make_record(
        &self,
        root: &Path,
        path: &Path,
        name: String,
        allowed_exts: Option<&[String]>,
    ) -> Option<FileRecord> {
        if is_hidden_below(root, path) {
            return None;
        }

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if let Some(exts) = allowed_exts {
            if !exts.contains(&extension) {
                return None;
            }
        }

        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Could not get metadata for file {}: {}", path.display(), e);
                return None;
            }
        };
        if metadata.len() > self.max_file_size {
            return None;
        }
        if fs::File::open(path).is_err() {
            return None;
        }

        let modified = metadata
            .modified()
            .map(DateTime::<Local>::from)
            .unwrap_or_else(|_| Local::now());

        Some(FileRecord {
            name,
            path: path.to_path_buf(),
            extension,
            size: metadata.len(),
            directory: root.to_path_buf(),
            modified,
        })
    }
}

fn is_hidden_below(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .map(|rel| {
            rel.components().any(|c| match c {
                Component::Normal(part) => part.to_string_lossy().starts_with('.'),
                _ => false,
            })
        })
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(path: &Path, size: usize) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut f = fs::File::create(path).unwrap();
        f.write_all(&vec![b'x'; size]).unwrap();
    }

    fn config_for(dirs: &[&Path], max_file_size: u64) -> AppConfig {
        AppConfig {
            whitelist_dirs: dirs.iter().map(|d| d.to_string_lossy().into_owned()).collect(),
            max_file_size,
            ..AppConfig::default()
        }
    }

    fn names(files: &[FileRecord]) -> Vec<&str> {
        files.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn lists_only_visible_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("report.pdf"), 2 * 1024 * 1024);
        write_file(&dir.path().join(".secret"), 10);

        let registry = WhitelistRegistry::new(&config_for(&[dir.path()], 10 * 1024 * 1024)).unwrap();
        let files = registry.list_files(None, None);
        assert_eq!(names(&files), vec!["report.pdf"]);
        assert_eq!(files[0].extension, "pdf");
        assert_eq!(files[0].size, 2 * 1024 * 1024);
    }

    #[test]
    fn skips_hidden_dirs_and_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("a.txt"), 10);
        write_file(&root.join("big.csv"), 4096);
        write_file(&root.join(".git").join("config.txt"), 10);
        write_file(&root.join("sub").join(".cache").join("x.png"), 10);
        write_file(&root.join("sub").join("b.md"), 10);

        let registry = WhitelistRegistry::new(&config_for(&[root], 1024)).unwrap();
        let files = registry.list_files(None, None);
        assert_eq!(names(&files), vec!["a.txt", "b.md"]);
        for f in &files {
            assert!(f.size <= 1024);
            assert!(!is_hidden_below(root, &f.path));
        }
    }

    #[test]
    fn fails_without_valid_roots() {
        let config = config_for(&[Path::new("/definitely/not/here")], 1024);
        assert!(matches!(
            WhitelistRegistry::new(&config),
            Err(AutoFileError::NoValidDirectories)
        ));
    }

    #[test]
    fn missing_roots_are_dropped_when_one_remains() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a.txt"), 1);
        let config = config_for(&[Path::new("/definitely/not/here"), dir.path()], 1024);
        let registry = WhitelistRegistry::new(&config).unwrap();
        assert_eq!(registry.roots().count(), 1);
    }

    #[test]
    fn directory_argument_must_be_whitelisted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("a.txt"), 1);
        write_file(&root.join("sub").join("b.txt"), 1);
        let registry = WhitelistRegistry::new(&config_for(&[root], 1024)).unwrap();

        let root_str = root.to_string_lossy().into_owned();
        assert_eq!(registry.list_files(Some(&root_str), None).len(), 2);

        let sub = root.join("sub").to_string_lossy().into_owned();
        assert!(registry.list_files(Some(&sub), None).is_empty());
        assert!(registry.list_files(Some("/etc"), None).is_empty());
    }

    #[test]
    fn type_filter_uses_categories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("a.txt"), 1);
        write_file(&root.join("b.PNG"), 1);
        write_file(&root.join("c.csv"), 1);
        let registry = WhitelistRegistry::new(&config_for(&[root], 1024)).unwrap();

        assert_eq!(names(&registry.list_files(None, Some("image"))), vec!["b.PNG"]);
        assert_eq!(names(&registry.list_files(None, Some("Data"))), vec!["c.csv"]);
        assert!(registry.list_files(None, Some("video")).is_empty());
        assert_eq!(registry.category_of(".png"), Some("image"));
        assert_eq!(registry.category_of("exe"), None);
    }

    #[test]
    fn listing_order_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in ["zeta.txt", "alpha.txt", "mid.txt"] {
            write_file(&root.join(name), 1);
        }
        let registry = WhitelistRegistry::new(&config_for(&[root], 1024)).unwrap();
        let first = registry.list_files(None, None);
        let second = registry.list_files(None, None);
        assert_eq!(names(&first), vec!["alpha.txt", "mid.txt", "zeta.txt"]);
        assert_eq!(names(&first), names(&second));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_escaping_the_root_are_skipped() {
        let outside = tempfile::tempdir().unwrap();
        write_file(&outside.path().join("secret.txt"), 1);
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("ok.txt"), 1);
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), root.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("linkdir")).unwrap();

        let registry = WhitelistRegistry::new(&config_for(&[root], 1024)).unwrap();
        assert_eq!(names(&registry.list_files(None, None)), vec!["ok.txt"]);
    }

    #[test]
    fn search_matches_wildcards_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_file(&root.join("Budget-2024.csv"), 1);
        write_file(&root.join("notes.txt"), 1);
        let registry = WhitelistRegistry::new(&config_for(&[root], 1024)).unwrap();

        assert_eq!(names(&registry.search("budget*", None).unwrap()), vec!["Budget-2024.csv"]);
        assert_eq!(names(&registry.search("note?.TXT", None).unwrap()), vec!["notes.txt"]);
        assert_eq!(names(&registry.search("[bn]*", None).unwrap()), vec!["Budget-2024.csv", "notes.txt"]);
        assert!(registry.search("*.pdf", None).unwrap().is_empty());
    }

    #[test]
    fn invalid_search_pattern_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a.txt"), 1);
        let registry = WhitelistRegistry::new(&config_for(&[dir.path()], 1024)).unwrap();
        assert!(registry.search("[a", None).is_err());
    }
}
