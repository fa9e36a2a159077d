use crate::error::{Result, XmlError};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Async discovery of the documents to extract
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    /// File extensions to include, lowercase (e.g., ["xml", "veo"])
    extensions: Vec<String>,
    /// Include patterns set
    include_set: Option<GlobSet>,
    /// Exclude patterns set
    exclude_set: Option<GlobSet>,
    /// Maximum depth for directory traversal (None = unlimited)
    max_depth: Option<usize>,
    /// Follow symbolic links
    follow_symlinks: bool,
}

impl FileDiscovery {
    pub fn new() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            include_set: None,
            exclude_set: None,
            max_depth: None,
            follow_symlinks: false,
        }
    }

    /// Build a discovery from the `[files]` configuration section
    pub fn from_config(files: &crate::config::FileConfig) -> Result<Self> {
        Ok(Self::new()
            .with_extensions(files.extensions.clone())
            .with_include_patterns(files.include_patterns.clone())?
            .with_exclude_patterns(files.exclude_patterns.clone())?
            .with_max_depth(files.max_depth)
            .with_follow_symlinks(files.follow_symlinks))
    }

    /// Set file extensions to discover
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.to_lowercase())
            .collect();
        self
    }

    /// Only process files matching one of these patterns
    pub fn with_include_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        self.include_set = build_glob_set(&patterns, "include")?;
        Ok(self)
    }

    /// Skip files matching any of these patterns
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        self.exclude_set = build_glob_set(&patterns, "exclude")?;
        Ok(self)
    }

    /// Set maximum traversal depth
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set whether to follow symbolic links
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Discover files in the given path (file or directory), sorted by path.
    ///
    /// Entries of the root directory are at depth 0. Unreadable entries below
    /// the root are logged and skipped.
    pub async fn discover_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|e| traversal_error(path, &e))?;

        if metadata.is_file() {
            return Ok(if self.should_process(path) {
                vec![path.to_path_buf()]
            } else {
                Vec::new()
            });
        }

        let mut files = Vec::new();
        let mut pending = vec![(path.to_path_buf(), 0usize)];
        let mut is_root = true;

        while let Some((dir, depth)) = pending.pop() {
            match self.scan_directory(&dir, depth, &mut files, &mut pending).await {
                Ok(()) => {}
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "Skipping unreadable directory");
                }
            }
            is_root = false;
        }

        files.sort();
        Ok(files)
    }

    /// Read one directory whose entries sit at `depth`
    async fn scan_directory(
        &self,
        dir: &Path,
        depth: usize,
        files: &mut Vec<PathBuf>,
        pending: &mut Vec<(PathBuf, usize)>,
    ) -> Result<()> {
        if self.max_depth.is_some_and(|max_depth| depth > max_depth) {
            return Ok(());
        }

        let mut read_dir = fs::read_dir(dir)
            .await
            .map_err(|e| traversal_error(dir, &e))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| traversal_error(dir, &e))?
        {
            let entry_path = entry.path();

            let is_symlink = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_symlink())
                .unwrap_or(false);
            if is_symlink && !self.follow_symlinks {
                continue;
            }

            let metadata = match fs::metadata(&entry_path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::warn!(path = %entry_path.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            if metadata.is_file() {
                if self.should_process(&entry_path) {
                    files.push(entry_path);
                }
            } else if metadata.is_dir() {
                pending.push((entry_path, depth + 1));
            }
        }

        Ok(())
    }

    /// Check if a file should be processed based on extensions and patterns
    pub fn should_process(&self, path: &Path) -> bool {
        let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        if !self.extensions.contains(&extension.to_lowercase()) {
            return false;
        }

        if let Some(exclude_set) = &self.exclude_set
            && exclude_set.is_match(path)
        {
            return false;
        }

        match &self.include_set {
            Some(include_set) => include_set.is_match(path),
            None => true,
        }
    }
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

fn build_glob_set(patterns: &[String], kind: &str) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| XmlError::Config(format!("Invalid glob pattern '{}': {}", pattern, e)))?;
        builder.add(glob);
    }

    let set = builder
        .build()
        .map_err(|e| XmlError::Config(format!("Failed to build {} glob set: {}", kind, e)))?;
    Ok(Some(set))
}

fn traversal_error(path: &Path, error: &std::io::Error) -> XmlError {
    XmlError::FileSystemTraversal {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}
