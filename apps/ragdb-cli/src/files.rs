use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use ragdb_core::types::{ContentType, Document};

const TEXT_EXTENSIONS: &[&str] = &["txt", "text"];

/// Whether a file is ingestible: plain text, markdown, html or known source.
pub fn is_ingestible(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        || ContentType::from_extension(ext) != ContentType::Text
}

/// List ingestible files under `root` (or `root` itself), sorted.
pub fn list_files(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_ingestible(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Build a document for `path`. The id is the path relative to `root`; the
/// `category` is its parent directory (`root` for top-level files).
pub fn document_for(root: &Path, path: &Path, text: String) -> Document {
    let base = if root.is_file() { root.parent().unwrap_or(root) } else { root };
    let rel = path.strip_prefix(base).unwrap_or(path);
    let id = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
    let category = rel
        .parent()
        .map(|p| p.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/"))
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "root".to_string());
    let content_type = path.extension().and_then(|e| e.to_str()).map(ContentType::from_extension).unwrap_or_default();

    Document::new(id, text)
        .with_content_type(content_type)
        .with_metadata("path", path.to_string_lossy().to_string())
        .with_metadata("category", category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn walks_supported_files_and_derives_categories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("guides/setup")).unwrap();
        fs::write(dir.path().join("readme.md"), "# hi").unwrap();
        fs::write(dir.path().join("guides/setup/install.txt"), "steps").unwrap();
        fs::write(dir.path().join("guides/main.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let files = list_files(dir.path());
        assert_eq!(files.len(), 3);

        let install = dir.path().join("guides/setup/install.txt");
        let doc = document_for(dir.path(), &install, "steps".into());
        assert_eq!(doc.id, "guides/setup/install.txt");
        assert_eq!(doc.metadata["category"], "guides/setup");
        assert_eq!(doc.content_type, ContentType::Text);

        let code = document_for(dir.path(), &dir.path().join("guides/main.rs"), String::new());
        assert_eq!(code.content_type, ContentType::Code);
        let top = document_for(dir.path(), &dir.path().join("readme.md"), String::new());
        assert_eq!(top.metadata["category"], "root");
        assert_eq!(top.content_type, ContentType::Markdown);
    }
}
