use std::collections::BTreeSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::{QualityColumns, ResolvedConfig};
use crate::dataset::{DatasetView, ViewOptions, local_file_paths};
use crate::domain::{AggregationLevel, ExperimentSet};
use crate::error::CacheError;
use crate::paths::normalize;

pub const CACHE_FILE_EXTENSION: &str = "parquet";
pub const STAGING_PREFIX: &str = ".partial-";

#[derive(Debug, Clone)]
pub struct Cache {
    cache_root: Utf8PathBuf,
    columns: QualityColumns,
}

#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub deleted: Vec<Utf8PathBuf>,
}

impl Cache {
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            cache_root: config.cache_root.clone(),
            columns: config.columns.clone(),
        }
    }

    pub fn new_with_root(cache_root: Utf8PathBuf) -> Self {
        Self {
            cache_root,
            columns: QualityColumns::default(),
        }
    }

    pub fn with_columns(mut self, columns: QualityColumns) -> Self {
        self.columns = columns;
        self
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn set_cache_root(&mut self, cache_root: Utf8PathBuf) {
        self.cache_root = cache_root;
    }

    pub fn columns(&self) -> &QualityColumns {
        &self.columns
    }

    pub fn level_dir(&self, level: AggregationLevel) -> Utf8PathBuf {
        normalize(&self.cache_root.join(level.as_str()))
    }

    pub fn local_path(
        &self,
        level: AggregationLevel,
        relative_path: &str,
    ) -> Result<Utf8PathBuf, CacheError> {
        let level_dir = self.level_dir(level);
        let resolved = normalize(&level_dir.join(relative_path));
        if resolved == level_dir || !resolved.starts_with(&level_dir) {
            return Err(CacheError::InvalidPath(relative_path.to_string()));
        }
        Ok(resolved)
    }

    pub fn exists(&self, level: AggregationLevel, relative_path: &str) -> bool {
        match self.local_path(level, relative_path) {
            Ok(path) => {
                let present = path.as_std_path().exists();
                debug!(%level, path = %path, present, "cache probe");
                present
            }
            Err(_) => {
                debug!(%level, relative_path, "cache probe outside level directory");
                false
            }
        }
    }

    pub fn staging_file(target: &Utf8Path) -> Result<NamedTempFile, CacheError> {
        let parent = target.parent().ok_or_else(|| CacheError::Write {
            path: target.to_string(),
            message: "target has no parent directory".to_string(),
        })?;
        fs::create_dir_all(parent.as_std_path()).map_err(|err| CacheError::Write {
            path: parent.to_string(),
            message: err.to_string(),
        })?;
        tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(".tmp")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CacheError::Write {
                path: target.to_string(),
                message: err.to_string(),
            })
    }

    pub fn persist(staged: NamedTempFile, target: &Utf8Path) -> Result<(), CacheError> {
        staged
            .persist(target.as_std_path())
            .map_err(|err| CacheError::Write {
                path: target.to_string(),
                message: err.error.to_string(),
            })?;
        Ok(())
    }

    pub fn prune(
        &self,
        experiments: &ExperimentSet,
        level: AggregationLevel,
    ) -> Result<PruneReport, CacheError> {
        let mut report = PruneReport::default();
        if experiments.is_empty() {
            debug!(%level, "no experiments selected for pruning");
            return Ok(report);
        }
        if !self.level_dir(level).as_std_path().exists() {
            return Ok(report);
        }

        for path in self.files_for_experiments(experiments, level) {
            let std_path = path.as_std_path();
            if !std_path.exists() {
                continue;
            }
            if path.extension() != Some(CACHE_FILE_EXTENSION) {
                warn!(path = %path, "refusing to delete non-cache file");
                continue;
            }
            fs::remove_file(std_path)
                .map_err(|err| CacheError::Filesystem(format!("remove {path}: {err}")))?;
            info!(%level, path = %path, "deleted cached partition");
            report.deleted.push(path);
        }
        Ok(report)
    }

    pub fn prune_all(&self) -> Result<(), CacheError> {
        if self.cache_root.as_std_path().exists() {
            fs::remove_dir_all(self.cache_root.as_std_path())
                .map_err(|err| CacheError::Filesystem(err.to_string()))?;
            info!(root = %self.cache_root, "removed cache root");
        }
        Ok(())
    }

    fn files_for_experiments(
        &self,
        experiments: &ExperimentSet,
        level: AggregationLevel,
    ) -> BTreeSet<Utf8PathBuf> {
        let view = DatasetView::open_tolerant(self, level, &ViewOptions::unfiltered())
            .and_then(|view| view.restrict_to_experiments(experiments));
        let view = match view {
            Ok(view) => view,
            Err(err) => {
                warn!(%level, error = %err, "unable to open cached dataset for pruning");
                return BTreeSet::new();
            }
        };

        let mut paths = BTreeSet::new();
        for (file, batches) in view.collect_per_file() {
            match batches.and_then(|batches| local_file_paths(&batches)) {
                Ok(found) => paths.extend(found),
                Err(err) => {
                    warn!(path = %file, error = %err, "skipping unreadable cached partition");
                }
            }
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn layout_paths() {
        let cache = Cache::new_with_root(Utf8PathBuf::from("/tmp/rdbc"));
        let path = cache
            .local_path(
                AggregationLevel::Peptides,
                "result-db/v1/peptides.parquet/experiment_uuid=e1/part-0.parquet",
            )
            .unwrap();
        assert_eq!(
            path,
            "/tmp/rdbc/peptides/result-db/v1/peptides.parquet/experiment_uuid=e1/part-0.parquet"
        );
    }

    #[test]
    fn local_path_stays_inside_level() {
        let cache = Cache::new_with_root(Utf8PathBuf::from("/tmp/rdbc"));
        let err = cache
            .local_path(AggregationLevel::Psms, "../precursors/x.parquet")
            .unwrap_err();
        assert_matches!(err, CacheError::InvalidPath(_));
        let err = cache
            .local_path(AggregationLevel::Psms, "/etc/passwd")
            .unwrap_err();
        assert_matches!(err, CacheError::InvalidPath(_));
        assert!(!cache.exists(AggregationLevel::Psms, "../precursors/x.parquet"));
    }
}
