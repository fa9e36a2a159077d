//! Concurrent Extraction Engine
//!
//! Documents are discovered asynchronously and each one is parsed by its own
//! [`XmlParser`] on the blocking thread pool:
//! - **Async I/O**: file discovery and output directory preparation
//! - **Blocking parse**: one parser per document inside `spawn_blocking`
//! - **Bounded concurrency**: a semaphore caps the number of documents in flight
//!
//! Content errors are recorded per document and the run continues. A fatal
//! error stops the run and is returned to the caller.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Result, Severity, XmlError};
use crate::file_discovery::FileDiscovery;
use crate::parser::{DEFAULT_READ_BUFFER, ParserOptions, XmlParser};
use crate::rules::{CapturedItem, RuleConsumer, RuleSet};

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Number of documents processed concurrently
    pub max_concurrent_documents: usize,
    /// Stop starting new documents after the first failure
    pub fail_fast: bool,
    /// Stop reading a document after this many captured items
    pub max_items: Option<usize>,
    pub read_buffer_size: usize,
    /// Root directory for files written by `file` rules
    pub output_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: num_cpus::get(),
            fail_fast: false,
            max_items: None,
            read_buffer_size: DEFAULT_READ_BUFFER,
            output_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_documents: crate::config::ConfigManager::get_thread_count(config),
            fail_fast: config.extraction.fail_fast,
            max_items: config.extraction.max_items,
            read_buffer_size: config.extraction.read_buffer_size,
            output_dir: config.output.directory.clone(),
        }
    }
}

/// Outcome of extracting one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Parsed to the end, or until the item limit was reached
    Extracted { items: Vec<CapturedItem>, files: usize },
    /// The document could not be extracted
    Failed { message: String, severity: Severity },
    /// Not attempted because an earlier document failed
    Skipped { reason: String },
}

impl DocumentStatus {
    pub fn is_extracted(&self) -> bool {
        matches!(self, DocumentStatus::Extracted { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DocumentStatus::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, DocumentStatus::Skipped { .. })
    }
}

/// Result of extracting a single document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    pub path: PathBuf,
    pub status: DocumentStatus,
    pub duration: Duration,
}

impl DocumentResult {
    pub fn extracted(path: PathBuf, items: Vec<CapturedItem>, duration: Duration) -> Self {
        let files = items.iter().filter(|item| item.file.is_some()).count();
        Self {
            path,
            status: DocumentStatus::Extracted { items, files },
            duration,
        }
    }

    pub fn failed(path: PathBuf, error: &XmlError, duration: Duration) -> Self {
        Self {
            path,
            status: DocumentStatus::Failed {
                message: error.to_string(),
                severity: error.severity(),
            },
            duration,
        }
    }

    pub fn skipped(path: PathBuf, reason: impl Into<String>) -> Self {
        Self {
            path,
            status: DocumentStatus::Skipped {
                reason: reason.into(),
            },
            duration: Duration::ZERO,
        }
    }
}

/// Aggregated results of an extraction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResults {
    pub total_documents: usize,
    pub extracted_documents: usize,
    pub failed_documents: usize,
    pub skipped_documents: usize,
    pub total_items: usize,
    pub total_files: usize,
    /// Sum of per-document durations
    pub total_duration: Duration,
    pub average_duration: Duration,
    /// When the results were aggregated
    pub generated_at: DateTime<Utc>,
    pub document_results: Vec<DocumentResult>,
}

impl ExtractionResults {
    /// Aggregate individual document results into a summary
    pub fn aggregate(document_results: Vec<DocumentResult>) -> Self {
        let total_documents = document_results.len();
        let mut extracted_documents = 0;
        let mut failed_documents = 0;
        let mut skipped_documents = 0;
        let mut total_items = 0;
        let mut total_files = 0;
        let mut total_duration = Duration::ZERO;

        for result in &document_results {
            match &result.status {
                DocumentStatus::Extracted { items, files } => {
                    extracted_documents += 1;
                    total_items += items.len();
                    total_files += files;
                }
                DocumentStatus::Failed { .. } => failed_documents += 1,
                DocumentStatus::Skipped { .. } => skipped_documents += 1,
            }
            total_duration += result.duration;
        }

        let average_duration = match u32::try_from(total_documents) {
            Ok(0) => Duration::ZERO,
            Ok(count) => total_duration / count,
            Err(_) => total_duration.div_f64(total_documents as f64),
        };

        Self {
            total_documents,
            extracted_documents,
            failed_documents,
            skipped_documents,
            total_items,
            total_files,
            total_duration,
            average_duration,
            generated_at: Utc::now(),
            document_results,
        }
    }

    /// True when every document was extracted
    pub fn all_extracted(&self) -> bool {
        self.extracted_documents == self.total_documents && self.total_documents > 0
    }

    pub fn has_failures(&self) -> bool {
        self.failed_documents > 0 || self.skipped_documents > 0
    }

    /// Share of extracted documents as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_documents == 0 {
            0.0
        } else {
            (self.extracted_documents as f64 / self.total_documents as f64) * 100.0
        }
    }
}

/// Runs a [`RuleSet`] over many documents
pub struct ExtractionEngine {
    rules: Arc<RuleSet>,
    config: EngineConfig,
}

impl ExtractionEngine {
    pub fn new(rules: RuleSet, config: EngineConfig) -> Result<Self> {
        if config.max_concurrent_documents == 0 {
            return Err(XmlError::Config(
                "Number of concurrent documents must be greater than 0".to_string(),
            ));
        }
        if rules.has_file_rules() && config.output_dir.is_none() {
            return Err(XmlError::Config(
                "Rules with the 'file' action need an output directory".to_string(),
            ));
        }

        Ok(Self {
            rules: Arc::new(rules),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Discover documents under `path` and extract all of them
    pub async fn extract_path(
        &self,
        path: &Path,
        file_discovery: &FileDiscovery,
    ) -> Result<ExtractionResults> {
        let started = Instant::now();
        let files = file_discovery.discover_files(path).await?;
        tracing::debug!(root = %path.display(), documents = files.len(), "Discovered documents");

        let documents = files
            .into_iter()
            .map(|file| {
                let file_dir = self.document_output_dir(path, &file);
                (file, file_dir)
            })
            .collect();
        let results = ExtractionResults::aggregate(self.extract_documents(documents).await?);

        tracing::info!(
            documents = results.total_documents,
            extracted = results.extracted_documents,
            failed = results.failed_documents,
            items = results.total_items,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Extraction finished"
        );
        Ok(results)
    }

    /// Extract a list of documents; extracted files go to one directory per document stem
    pub async fn extract_files(&self, files: Vec<PathBuf>) -> Result<Vec<DocumentResult>> {
        let documents = files
            .into_iter()
            .map(|file| {
                let file_dir = self.document_output_dir(&file, &file);
                (file, file_dir)
            })
            .collect();
        self.extract_documents(documents).await
    }

    async fn extract_documents(
        &self,
        documents: Vec<(PathBuf, Option<PathBuf>)>,
    ) -> Result<Vec<DocumentResult>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.max_concurrent_documents,
        ));
        let stop = Arc::new(AtomicBool::new(false));

        let tasks: Vec<_> = documents
            .into_iter()
            .map(|(file_path, file_dir)| {
                let rules = Arc::clone(&self.rules);
                let semaphore = Arc::clone(&semaphore);
                let stop = Arc::clone(&stop);
                let config = self.config.clone();

                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.map_err(|_| XmlError::Concurrency {
                        details: "Failed to acquire extraction semaphore".to_string(),
                    })?;

                    if stop.load(Ordering::SeqCst) {
                        return Ok(DocumentResult::skipped(
                            file_path,
                            "stopped after an earlier failure",
                        ));
                    }

                    let result = Self::extract_document_internal(
                        file_path.clone(),
                        file_dir,
                        rules,
                        &config,
                    )
                    .await;

                    match &result {
                        Err(_) => stop.store(true, Ordering::SeqCst),
                        Ok(document) if config.fail_fast && document.status.is_failed() => {
                            stop.store(true, Ordering::SeqCst)
                        }
                        Ok(_) => {}
                    }
                    result
                })
            })
            .collect();

        let task_results = try_join_all(tasks)
            .await
            .map_err(|e| XmlError::Concurrency {
                details: format!("Task join error: {}", e),
            })?;

        let mut document_results = Vec::with_capacity(task_results.len());
        for result in task_results {
            document_results.push(result?);
        }
        Ok(document_results)
    }

    /// Extract a single document
    pub async fn extract_document(&self, file_path: &Path) -> Result<DocumentResult> {
        let file_dir = self.document_output_dir(file_path, file_path);
        Self::extract_document_internal(
            file_path.to_path_buf(),
            file_dir,
            Arc::clone(&self.rules),
            &self.config,
        )
        .await
    }

    async fn extract_document_internal(
        file_path: PathBuf,
        file_dir: Option<PathBuf>,
        rules: Arc<RuleSet>,
        config: &EngineConfig,
    ) -> Result<DocumentResult> {
        let started = Instant::now();

        if let Some(dir) = &file_dir
            && let Err(source) = tokio::fs::create_dir_all(dir).await
        {
            let error = XmlError::Sink {
                path: dir.clone(),
                source,
            };
            tracing::warn!(path = %file_path.display(), error = %error, "Cannot prepare output directory");
            return Ok(DocumentResult::failed(file_path, &error, started.elapsed()));
        }

        let options = ParserOptions {
            read_buffer_size: config.read_buffer_size,
        };
        let max_items = config.max_items;
        let path = file_path.clone();
        let consumer_dir = file_dir.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let mut consumer = RuleConsumer::new(rules).with_max_items(max_items);
            if let Some(dir) = consumer_dir {
                consumer = consumer.with_file_dir(dir);
            }
            let mut parser = XmlParser::with_options(consumer, options)?;
            parser.parse(&path)?;
            Ok::<_, XmlError>(parser.into_consumer().into_items())
        })
        .await
        .map_err(|e| XmlError::Concurrency {
            details: format!("Extraction task failed: {}", e),
        })?;

        match outcome {
            Ok(items) => {
                tracing::debug!(path = %file_path.display(), items = items.len(), "Document extracted");
                Ok(DocumentResult::extracted(file_path, items, started.elapsed()))
            }
            Err(error) if error.is_fatal() => {
                tracing::error!(path = %file_path.display(), error = %error, "Fatal error, stopping");
                Err(error)
            }
            Err(error) => {
                tracing::warn!(path = %file_path.display(), error = %error, "Document failed");
                if let Some(dir) = &file_dir {
                    // Only succeeds when nothing was left in it.
                    let _ = tokio::fs::remove_dir(dir).await;
                }
                Ok(DocumentResult::failed(file_path, &error, started.elapsed()))
            }
        }
    }

    /// Directory for the files extracted from `document`, mirroring its place under `root`
    fn document_output_dir(&self, root: &Path, document: &Path) -> Option<PathBuf> {
        if !self.rules.has_file_rules() {
            return None;
        }
        let output_dir = self.config.output_dir.as_ref()?;

        let relative = document
            .strip_prefix(root)
            .ok()
            .filter(|relative| !relative.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new(document.file_name().unwrap_or(document.as_os_str())));
        Some(output_dir.join(directory_name(relative)))
    }
}

/// `a/b.xml` becomes `a/b_xml`, so documents sharing a stem get separate directories.
fn directory_name(relative: &Path) -> PathBuf {
    match (relative.file_stem(), relative.extension()) {
        (Some(stem), Some(extension)) => {
            let mut name = stem.to_os_string();
            name.push("_");
            name.push(extension);
            relative.with_file_name(name)
        }
        _ => relative.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::CaptureKind;
    use crate::rules::Rule;
    use tempfile::TempDir;

    fn value_rules() -> RuleSet {
        RuleSet::new(vec![Rule::new("record/title", CaptureKind::Value)]).unwrap()
    }

    fn engine_config(threads: usize) -> EngineConfig {
        EngineConfig {
            max_concurrent_documents: threads,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_document_status_predicates() {
        let extracted = DocumentStatus::Extracted {
            items: vec![],
            files: 0,
        };
        assert!(extracted.is_extracted());
        assert!(!extracted.is_failed());

        let failed = DocumentStatus::Failed {
            message: "bad".to_string(),
            severity: Severity::Content,
        };
        assert!(failed.is_failed());

        let skipped = DocumentStatus::Skipped {
            reason: "fail fast".to_string(),
        };
        assert!(skipped.is_skipped());
    }

    #[test]
    fn test_results_aggregation() {
        let item = CapturedItem {
            path: "r/a".to_string(),
            kind: CaptureKind::File,
            content: None,
            file: Some(PathBuf::from("/out/0001-a.bin")),
        };
        let results = ExtractionResults::aggregate(vec![
            DocumentResult::extracted(
                PathBuf::from("a.xml"),
                vec![item.clone(), item],
                Duration::from_millis(10),
            ),
            DocumentResult::failed(
                PathBuf::from("b.xml"),
                &XmlError::malformed("b.xml", "broken"),
                Duration::from_millis(30),
            ),
            DocumentResult::skipped(PathBuf::from("c.xml"), "fail fast"),
        ]);

        assert_eq!(results.total_documents, 3);
        assert_eq!(results.extracted_documents, 1);
        assert_eq!(results.failed_documents, 1);
        assert_eq!(results.skipped_documents, 1);
        assert_eq!(results.total_items, 2);
        assert_eq!(results.total_files, 2);
        assert_eq!(results.total_duration, Duration::from_millis(40));
        assert!(results.has_failures());
        assert!(!results.all_extracted());
    }

    #[test]
    fn test_results_empty() {
        let results = ExtractionResults::aggregate(vec![]);
        assert_eq!(results.total_documents, 0);
        assert_eq!(results.success_rate(), 0.0);
        assert!(!results.all_extracted());
        assert!(!results.has_failures());
    }

    #[test]
    fn test_file_rules_need_output_dir() {
        let rules = RuleSet::new(vec![Rule::new("**/data", CaptureKind::File)]).unwrap();
        let result = ExtractionEngine::new(rules, engine_config(2));
        assert!(matches!(result, Err(XmlError::Config(_))));
    }

    #[tokio::test]
    async fn test_extract_files_empty_list() {
        let engine = ExtractionEngine::new(value_rules(), engine_config(2)).unwrap();
        let results = engine.extract_files(vec![]).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_extract_single_document() {
        let temp_dir = TempDir::new().unwrap();
        let xml = temp_dir.path().join("record.xml");
        tokio::fs::write(&xml, "<record><title> Minutes </title></record>")
            .await
            .unwrap();

        let engine = ExtractionEngine::new(value_rules(), engine_config(1)).unwrap();
        let result = engine.extract_document(&xml).await.unwrap();

        match result.status {
            DocumentStatus::Extracted { items, files } => {
                assert_eq!(files, 0);
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].content.as_deref(), Some("Minutes"));
            }
            other => panic!("Expected extracted document, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_document_is_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("good.xml");
        let bad = temp_dir.path().join("bad.xml");
        tokio::fs::write(&good, "<record><title>ok</title></record>")
            .await
            .unwrap();
        tokio::fs::write(&bad, "<record><title>broken</record>")
            .await
            .unwrap();

        let engine = ExtractionEngine::new(value_rules(), engine_config(2)).unwrap();
        let results = engine.extract_files(vec![good, bad]).await.unwrap();

        assert!(results[0].status.is_extracted());
        match &results[1].status {
            DocumentStatus::Failed { severity, .. } => assert_eq!(*severity, Severity::Content),
            other => panic!("Expected failed document, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fail_fast_skips_remaining() {
        let temp_dir = TempDir::new().unwrap();
        let bad = temp_dir.path().join("bad.xml");
        let good = temp_dir.path().join("good.xml");
        tokio::fs::write(&bad, "<record>").await.unwrap();
        tokio::fs::write(&good, "<record/>").await.unwrap();

        let config = EngineConfig {
            fail_fast: true,
            ..engine_config(1)
        };
        let engine = ExtractionEngine::new(value_rules(), config).unwrap();
        let results = engine.extract_files(vec![bad, good]).await.unwrap();

        assert!(results[0].status.is_failed());
        assert!(results[1].status.is_skipped());
    }

    #[tokio::test]
    async fn test_same_stem_documents_get_separate_directories() {
        let records = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        tokio::fs::write(records.path().join("a.xml"), "<r><data>from xml</data></r>")
            .await
            .unwrap();
        tokio::fs::write(records.path().join("a.veo"), "<r><data>from veo</data></r>")
            .await
            .unwrap();

        let rules = RuleSet::new(vec![Rule::new("r/data", CaptureKind::File)]).unwrap();
        let config = EngineConfig {
            output_dir: Some(output.path().to_path_buf()),
            ..engine_config(2)
        };
        let engine = ExtractionEngine::new(rules, config).unwrap();
        let discovery =
            FileDiscovery::new().with_extensions(vec!["xml".to_string(), "veo".to_string()]);
        let results = engine.extract_path(records.path(), &discovery).await.unwrap();

        assert_eq!(results.total_files, 2);
        assert_eq!(
            std::fs::read_to_string(output.path().join("a_xml/0001-data.txt")).unwrap(),
            "from xml"
        );
        assert_eq!(
            std::fs::read_to_string(output.path().join("a_veo/0001-data.txt")).unwrap(),
            "from veo"
        );
    }

    #[test]
    fn test_average_duration() {
        let results = ExtractionResults::aggregate(vec![
            DocumentResult::skipped(PathBuf::from("a.xml"), "stopped"),
            DocumentResult::failed(
                PathBuf::from("b.xml"),
                &XmlError::malformed("b.xml", "broken"),
                Duration::from_millis(30),
            ),
        ]);
        assert_eq!(results.average_duration, Duration::from_millis(15));
    }

    #[test]
    fn test_document_output_dir_mirrors_tree() {
        let rules = RuleSet::new(vec![Rule::new("**/data", CaptureKind::File)]).unwrap();
        let config = EngineConfig {
            output_dir: Some(PathBuf::from("/out")),
            ..engine_config(1)
        };
        let engine = ExtractionEngine::new(rules, config).unwrap();

        assert_eq!(
            engine.document_output_dir(Path::new("/records"), Path::new("/records/2024/veo1.xml")),
            Some(PathBuf::from("/out/2024/veo1_xml"))
        );
        assert_eq!(
            engine.document_output_dir(Path::new("/records/veo2.xml"), Path::new("/records/veo2.xml")),
            Some(PathBuf::from("/out/veo2_xml"))
        );
    }
}
