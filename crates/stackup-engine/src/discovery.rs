use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use stackup_domain::TemplateDocument;
use walkdir::WalkDir;

use crate::error::DiscoveryError;

const DOCUMENT_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Recursively load pipeline documents (`*.yaml`, `*.yml`) under `root`,
/// sorted by path. A document is named after its path relative to `root`
/// without the extension, with directory separators replaced by `-`.
///
/// # Errors
///
/// Returns an error if `root` is invalid, walking fails, a document cannot be
/// read, two documents map to the same name, or no documents are found.
pub fn discover_pipeline_documents(
    root: &Path,
) -> std::result::Result<Vec<TemplateDocument>, DiscoveryError> {
    if !root.exists() {
        return Err(DiscoveryError::RootDoesNotExist {
            root: root.to_path_buf(),
        });
    }
    if !root.is_dir() {
        return Err(DiscoveryError::RootIsNotDirectory {
            root: root.to_path_buf(),
        });
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|source| DiscoveryError::Walk { source })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(extension) = entry.path().extension().and_then(|value| value.to_str()) else {
            continue;
        };
        if DOCUMENT_EXTENSIONS.contains(&extension) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();

    if paths.is_empty() {
        return Err(DiscoveryError::NoDocuments {
            root: root.to_path_buf(),
        });
    }

    let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let name = document_name(root, &path);
        if let Some(first) = seen.get(&name) {
            return Err(DiscoveryError::DuplicateDocument {
                name,
                first: first.clone(),
                second: path,
            });
        }
        let body = fs::read_to_string(&path).map_err(|source| DiscoveryError::ReadDocument {
            path: path.clone(),
            source,
        })?;
        seen.insert(name.clone(), path);
        documents.push(TemplateDocument::new(name, body));
    }
    Ok(documents)
}

fn document_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("-")
}
