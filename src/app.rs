use std::time::{Duration, Instant};

use serde::Serialize;

use crate::dataset::{DatasetView, ViewOptions, local_file_paths};
use crate::domain::{AggregationLevel, ExperimentSet, RemotePartition};
use crate::error::CacheError;
use crate::fetch::{PartitionSource, fetch};
use crate::paths::sanitize;
use crate::store::Cache;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub level: String,
    pub items: Vec<SyncItemResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncItemResult {
    pub remote_path: String,
    pub relative_path: String,
    pub local_path: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowResult {
    pub level: String,
    pub columns: Vec<String>,
    pub rows: usize,
    pub files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneResult {
    pub level: Option<String>,
    pub deleted: Vec<String>,
    pub cleared: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<S: PartitionSource> {
    cache: Cache,
    source: S,
}

impl<S: PartitionSource> App<S> {
    pub fn new(cache: Cache, source: S) -> Self {
        Self { cache, source }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn sync(
        &self,
        level: AggregationLevel,
        partitions: &[RemotePartition],
        options: &SyncOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SyncResult, CacheError> {
        let mut items = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let relative_path = sanitize(&partition.path)?;
            let local_path = self.cache.local_path(level, &relative_path)?;

            let action = if !options.force && self.cache.exists(level, &relative_path) {
                sink.event(ProgressEvent {
                    message: format!("phase=Store; cached {relative_path}"),
                    elapsed: None,
                });
                "cached"
            } else if options.dry_run {
                "would-download"
            } else {
                sink.event(ProgressEvent {
                    message: format!("phase=Download; {relative_path}"),
                    elapsed: None,
                });
                let start = Instant::now();
                fetch(
                    &self.cache,
                    &self.source,
                    level,
                    &relative_path,
                    &partition.url,
                )?;
                sink.event(ProgressEvent {
                    message: format!("phase=Store; wrote {relative_path}"),
                    elapsed: Some(start.elapsed()),
                });
                "download"
            };

            items.push(SyncItemResult {
                remote_path: partition.path.clone(),
                relative_path,
                local_path: local_path.to_string(),
                action: action.to_string(),
            });
        }

        Ok(SyncResult {
            level: level.to_string(),
            items,
        })
    }

    pub fn read(
        &self,
        level: AggregationLevel,
        experiments: Option<&ExperimentSet>,
        options: &ViewOptions,
    ) -> Result<DatasetView, CacheError> {
        let view = DatasetView::open(&self.cache, level, options)?;
        match experiments {
            Some(experiments) => view.restrict_to_experiments(experiments),
            None => Ok(view),
        }
    }

    pub fn show(
        &self,
        level: AggregationLevel,
        experiments: Option<&ExperimentSet>,
        options: &ViewOptions,
    ) -> Result<ShowResult, CacheError> {
        let view = self.read(level, experiments, options)?;
        let batches = view.collect()?;
        Ok(ShowResult {
            level: level.to_string(),
            columns: view.column_names(),
            rows: batches.iter().map(|batch| batch.num_rows()).sum(),
            files: local_file_paths(&batches)?.len(),
        })
    }

    pub fn prune(
        &self,
        experiments: &ExperimentSet,
        level: AggregationLevel,
        sink: &dyn ProgressSink,
    ) -> Result<PruneResult, CacheError> {
        sink.event(ProgressEvent {
            message: format!("phase=Prune; {level}"),
            elapsed: None,
        });
        let report = self.cache.prune(experiments, level)?;
        Ok(PruneResult {
            level: Some(level.to_string()),
            deleted: report.deleted.iter().map(|path| path.to_string()).collect(),
            cleared: false,
        })
    }

    pub fn prune_all(&self, sink: &dyn ProgressSink) -> Result<PruneResult, CacheError> {
        sink.event(ProgressEvent {
            message: "phase=Prune; clearing cache root".to_string(),
            elapsed: None,
        });
        self.cache.prune_all()?;
        Ok(PruneResult {
            level: None,
            deleted: Vec::new(),
            cleared: true,
        })
    }
}
