use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, File};
use std::iter;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray,
    new_null_array,
};
use arrow::compute::kernels::cmp::lt_eq;
use arrow::compute::{and, cast, filter_record_batch, not};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{debug, warn};

use crate::config::QualityColumns;
use crate::domain::{AggregationLevel, ExperimentSet};
use crate::error::CacheError;
use crate::store::{CACHE_FILE_EXTENSION, Cache};

pub const LOCAL_FILE_PATH_COLUMN: &str = "local_file_path";
pub const INTERNAL_PARTITION_COLUMNS: [&str; 2] = ["organization_uuid", "account_uuid"];

pub const DEFAULT_MAX_Q_VALUE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewOptions {
    pub max_q_value: Option<f64>,
    pub max_global_q_value: Option<f64>,
    pub include_decoys: bool,
    pub include_columns: Option<Vec<String>>,
    pub exclude_columns: Vec<String>,
    pub exclude_array_columns: bool,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            max_q_value: Some(DEFAULT_MAX_Q_VALUE),
            max_global_q_value: Some(DEFAULT_MAX_Q_VALUE),
            include_decoys: false,
            include_columns: None,
            exclude_columns: Vec::new(),
            exclude_array_columns: false,
        }
    }
}

impl ViewOptions {
    pub fn unfiltered() -> Self {
        Self {
            max_q_value: None,
            max_global_q_value: None,
            include_decoys: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct PartitionFile {
    path: Utf8PathBuf,
    partitions: Vec<(String, String)>,
    schema: SchemaRef,
    rows: i64,
}

impl PartitionFile {
    fn partition_value(&self, key: &str) -> Option<&str> {
        self.partitions
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn has_data_column(&self, name: &str) -> bool {
        self.schema.field_with_name(name).is_ok()
    }
}

#[derive(Debug, Clone)]
enum Predicate {
    NotDecoy { column: String },
    AtMost { column: String, threshold: f64 },
    InSet { column: String, values: BTreeSet<String> },
}

impl Predicate {
    fn column(&self) -> &str {
        match self {
            Predicate::NotDecoy { column }
            | Predicate::AtMost { column, .. }
            | Predicate::InSet { column, .. } => column,
        }
    }

    fn evaluate(&self, array: &ArrayRef) -> Result<BooleanArray, ArrowError> {
        match self {
            Predicate::NotDecoy { .. } => {
                let flags = cast(array, &DataType::Boolean)?;
                not(flags.as_boolean())
            }
            Predicate::AtMost { threshold, .. } => {
                let values = cast(array, &DataType::Float64)?;
                lt_eq(&values, &Float64Array::new_scalar(*threshold))
            }
            Predicate::InSet { values, .. } => {
                let strings = cast(array, &DataType::Utf8)?;
                Ok(strings
                    .as_string::<i32>()
                    .iter()
                    .map(|value| Some(value.is_some_and(|value| values.contains(value))))
                    .collect())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetView {
    level: AggregationLevel,
    files: Vec<PartitionFile>,
    schema: SchemaRef,
    partition_types: BTreeMap<String, DataType>,
    projection: Vec<usize>,
    projected: SchemaRef,
    predicates: Vec<Predicate>,
    experiment_column: String,
}

impl DatasetView {
    pub fn open(
        cache: &Cache,
        level: AggregationLevel,
        options: &ViewOptions,
    ) -> Result<Self, CacheError> {
        Self::build(cache, level, options, false)
    }

    pub fn open_tolerant(
        cache: &Cache,
        level: AggregationLevel,
        options: &ViewOptions,
    ) -> Result<Self, CacheError> {
        Self::build(cache, level, options, true)
    }

    fn empty(level: AggregationLevel, columns: &QualityColumns) -> Self {
        let schema = Arc::new(Schema::empty());
        Self {
            level,
            files: Vec::new(),
            schema: schema.clone(),
            partition_types: BTreeMap::new(),
            projection: Vec::new(),
            projected: schema,
            predicates: Vec::new(),
            experiment_column: columns.experiment.clone(),
        }
    }

    fn build(
        cache: &Cache,
        level: AggregationLevel,
        options: &ViewOptions,
        tolerant: bool,
    ) -> Result<Self, CacheError> {
        let columns = cache.columns();
        let mut files = Vec::new();
        for (path, partitions) in discover(&cache.level_dir(level))? {
            match read_footer(&path) {
                Ok((schema, rows)) => files.push(PartitionFile {
                    path,
                    partitions,
                    schema,
                    rows,
                }),
                Err(err) if tolerant => {
                    warn!(path = %path, error = %err, "skipping unreadable cached partition");
                }
                Err(err) => return Err(err),
            }
        }

        let total_rows: i64 = files.iter().map(|file| file.rows).sum();
        if total_rows == 0 {
            debug!(%level, files = files.len(), "cached dataset is empty");
            return Ok(Self::empty(level, columns));
        }

        let partition_types = partition_types(&files, &columns.experiment);
        let schema = unify_schema(&files, &partition_types);
        let names = resolve_columns(level, &schema, options)?;
        let projection = names
            .iter()
            .map(|name| schema.index_of(name))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| CacheError::Dataset(err.to_string()))?;
        let projected = Arc::new(
            schema
                .project(&projection)
                .map_err(|err| CacheError::Dataset(err.to_string()))?,
        );

        let mut predicates = Vec::new();
        if !options.include_decoys {
            predicates.push(Predicate::NotDecoy {
                column: columns.decoy.clone(),
            });
        }
        if let (true, Some(threshold)) = (level.is_per_run(), options.max_q_value) {
            predicates.push(Predicate::AtMost {
                column: columns.q_value.clone(),
                threshold,
            });
        }
        if let (true, Some(threshold)) = (level.has_global_q_value(), options.max_global_q_value)
        {
            predicates.push(Predicate::AtMost {
                column: columns.global_q_value_for(level).to_string(),
                threshold,
            });
        }
        for predicate in &predicates {
            require_column(level, &schema, predicate.column())?;
        }

        debug!(
            %level,
            files = files.len(),
            rows = total_rows,
            columns = projection.len(),
            "opened cached dataset"
        );
        Ok(Self {
            level,
            files,
            schema,
            partition_types,
            projection,
            projected,
            predicates,
            experiment_column: columns.experiment.clone(),
        })
    }

    pub fn level(&self) -> AggregationLevel {
        self.level
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn schema(&self) -> SchemaRef {
        self.projected.clone()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.projected
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect()
    }

    pub fn files(&self) -> impl Iterator<Item = &Utf8Path> {
        self.files.iter().map(|file| file.path.as_path())
    }

    pub fn restrict_to_experiments(
        mut self,
        experiments: &ExperimentSet,
    ) -> Result<Self, CacheError> {
        if self.is_empty() {
            return Ok(self);
        }
        require_column(self.level, &self.schema, &self.experiment_column)?;
        self.predicates.push(Predicate::InSet {
            column: self.experiment_column.clone(),
            values: experiments.clone(),
        });
        Ok(self)
    }

    pub fn collect(&self) -> Result<Vec<RecordBatch>, CacheError> {
        let mut batches = Vec::new();
        for file in &self.files {
            batches.extend(self.read_file(file)?);
        }
        Ok(batches)
    }

    pub fn collect_per_file(&self) -> Vec<(Utf8PathBuf, Result<Vec<RecordBatch>, CacheError>)> {
        self.files
            .iter()
            .map(|file| (file.path.clone(), self.read_file(file)))
            .collect()
    }

    pub fn row_count(&self) -> Result<usize, CacheError> {
        Ok(self.collect()?.iter().map(RecordBatch::num_rows).sum())
    }

    pub fn file_paths(&self) -> Result<BTreeSet<Utf8PathBuf>, CacheError> {
        local_file_paths(&self.collect()?)
    }

    fn read_file(&self, file: &PartitionFile) -> Result<Vec<RecordBatch>, CacheError> {
        if !self.may_match(file) {
            return Ok(Vec::new());
        }
        let handle = File::open(file.path.as_std_path())
            .map_err(|err| CacheError::Dataset(format!("open {}: {err}", file.path)))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(handle)
            .and_then(|builder| builder.build())
            .map_err(|err| CacheError::Dataset(format!("{}: {err}", file.path)))?;

        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|err| CacheError::Dataset(format!("{}: {err}", file.path)))?;
            let batch = self
                .select(&batch, file)
                .map_err(|err| CacheError::Dataset(format!("{}: {err}", file.path)))?;
            if batch.num_rows() > 0 {
                batches.push(batch);
            }
        }
        Ok(batches)
    }

    fn select(&self, batch: &RecordBatch, file: &PartitionFile) -> Result<RecordBatch, ArrowError> {
        let batch = self.conform(batch, file)?;
        let mut mask: Option<BooleanArray> = None;
        for predicate in &self.predicates {
            let column = batch
                .column_by_name(predicate.column())
                .ok_or_else(|| ArrowError::SchemaError(predicate.column().to_string()))?;
            let next = predicate.evaluate(column)?;
            mask = Some(match mask {
                Some(previous) => and(&previous, &next)?,
                None => next,
            });
        }
        let batch = match mask {
            Some(mask) => filter_record_batch(&batch, &mask)?,
            None => batch,
        };
        batch.project(&self.projection)
    }

    fn conform(&self, batch: &RecordBatch, file: &PartitionFile) -> Result<RecordBatch, ArrowError> {
        let rows = batch.num_rows();
        let columns = self
            .schema
            .fields()
            .iter()
            .map(|field| {
                let name = field.name().as_str();
                if name == LOCAL_FILE_PATH_COLUMN {
                    return Ok(repeat_string(file.path.as_str(), rows));
                }
                if let Some(column) = batch.column_by_name(name) {
                    if column.data_type() == field.data_type() {
                        return Ok(column.clone());
                    }
                    return cast(column, field.data_type());
                }
                match file.partition_value(name) {
                    Some(value) => partition_array(field.data_type(), value, rows),
                    None => Ok(new_null_array(field.data_type(), rows)),
                }
            })
            .collect::<Result<Vec<_>, ArrowError>>()?;
        RecordBatch::try_new(self.schema.clone(), columns)
    }

    fn may_match(&self, file: &PartitionFile) -> bool {
        self.predicates.iter().all(|predicate| {
            let Predicate::InSet { column, values } = predicate else {
                return true;
            };
            if file.has_data_column(column)
                || self.partition_types.get(column) != Some(&DataType::Utf8)
            {
                return true;
            }
            file.partition_value(column)
                .is_none_or(|value| values.contains(value))
        })
    }
}

pub fn local_file_paths(batches: &[RecordBatch]) -> Result<BTreeSet<Utf8PathBuf>, CacheError> {
    let mut paths = BTreeSet::new();
    for batch in batches {
        let column = batch
            .column_by_name(LOCAL_FILE_PATH_COLUMN)
            .and_then(|column| column.as_string_opt::<i32>())
            .ok_or_else(|| {
                CacheError::Dataset(format!("missing {LOCAL_FILE_PATH_COLUMN} column"))
            })?;
        paths.extend(column.iter().flatten().map(Utf8PathBuf::from));
    }
    Ok(paths)
}

pub fn resolve_columns(
    level: AggregationLevel,
    schema: &Schema,
    options: &ViewOptions,
) -> Result<Vec<String>, CacheError> {
    // Explicit includes re-admit array columns, never explicitly excluded ones.
    let explicit = options.include_columns.as_deref();
    let include: Vec<String> = match explicit {
        Some(columns) => columns.to_vec(),
        None => schema
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect(),
    };

    let mut array_columns: HashSet<&str> = HashSet::new();
    if options.exclude_array_columns {
        array_columns.extend(
            schema
                .fields()
                .iter()
                .filter(|field| is_array_type(field.data_type()))
                .map(|field| field.name().as_str()),
        );
    }
    if let Some(explicit) = explicit {
        for column in explicit {
            array_columns.remove(column.as_str());
        }
    }
    let excluded: HashSet<&str> = options.exclude_columns.iter().map(String::as_str).collect();

    let mut selected: Vec<String> = Vec::new();
    for column in &include {
        let name = column.as_str();
        if INTERNAL_PARTITION_COLUMNS.contains(&name) || name == LOCAL_FILE_PATH_COLUMN {
            continue;
        }
        require_column(level, schema, name)?;
        if excluded.contains(name) || array_columns.contains(name) {
            continue;
        }
        if !selected.iter().any(|existing| existing == name) {
            selected.push(column.clone());
        }
    }
    if schema.field_with_name(LOCAL_FILE_PATH_COLUMN).is_ok() {
        selected.push(LOCAL_FILE_PATH_COLUMN.to_string());
    }
    Ok(selected)
}

fn is_array_type(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _)
    )
}

fn require_column(level: AggregationLevel, schema: &Schema, column: &str) -> Result<(), CacheError> {
    if schema.field_with_name(column).is_err() {
        return Err(CacheError::MissingColumn {
            level: level.to_string(),
            column: column.to_string(),
        });
    }
    Ok(())
}

fn discover(level_dir: &Utf8Path) -> Result<Vec<(Utf8PathBuf, Vec<(String, String)>)>, CacheError> {
    let mut found = Vec::new();
    if !level_dir.as_std_path().is_dir() {
        return Ok(found);
    }
    let mut stack = vec![level_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| CacheError::Filesystem(format!("read {dir}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| CacheError::Filesystem(err.to_string()))?;
            let path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|path| CacheError::Filesystem(format!("non-utf8 path {}", path.display())))?;
            let file_type = entry
                .file_type()
                .map_err(|err| CacheError::Filesystem(err.to_string()))?;
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            let hidden = path.file_name().is_some_and(|name| name.starts_with('.'));
            if hidden || path.extension() != Some(CACHE_FILE_EXTENSION) {
                continue;
            }
            let partitions = hive_partitions(level_dir, &path);
            found.push((path, partitions));
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

fn hive_partitions(root: &Utf8Path, path: &Utf8Path) -> Vec<(String, String)> {
    let Ok(relative) = path.strip_prefix(root) else {
        return Vec::new();
    };
    let Some(dirs) = relative.parent() else {
        return Vec::new();
    };
    dirs.iter()
        .filter_map(|segment| segment.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn read_footer(path: &Utf8Path) -> Result<(SchemaRef, i64), CacheError> {
    let handle = File::open(path.as_std_path())
        .map_err(|err| CacheError::Dataset(format!("open {path}: {err}")))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(handle)
        .map_err(|err| CacheError::Dataset(format!("{path}: {err}")))?;
    let rows = builder.metadata().file_metadata().num_rows();
    Ok((builder.schema().clone(), rows))
}

fn partition_types(files: &[PartitionFile], experiment_column: &str) -> BTreeMap<String, DataType> {
    let mut types = BTreeMap::new();
    for file in files {
        for (key, value) in &file.partitions {
            let integer = !is_identity_key(key, experiment_column) && value.parse::<i64>().is_ok();
            types
                .entry(key.clone())
                .and_modify(|current| {
                    if !integer {
                        *current = DataType::Utf8;
                    }
                })
                .or_insert(if integer { DataType::Int64 } else { DataType::Utf8 });
        }
    }
    types
}

// Identifiers stay strings so `0042` keeps its leading zeros.
fn is_identity_key(key: &str, experiment_column: &str) -> bool {
    key == experiment_column || key.ends_with("_uuid")
}

fn unify_schema(files: &[PartitionFile], partition_types: &BTreeMap<String, DataType>) -> SchemaRef {
    let mut seen = HashSet::new();
    let mut fields: Vec<Field> = Vec::new();
    for file in files {
        for field in file.schema.fields() {
            if field.name() == LOCAL_FILE_PATH_COLUMN || !seen.insert(field.name().clone()) {
                continue;
            }
            fields.push(field.as_ref().clone().with_nullable(true));
        }
    }
    for file in files {
        for (key, _) in &file.partitions {
            if !seen.insert(key.clone()) {
                continue;
            }
            let data_type = partition_types.get(key).cloned().unwrap_or(DataType::Utf8);
            fields.push(Field::new(key, data_type, true));
        }
    }
    fields.push(Field::new(LOCAL_FILE_PATH_COLUMN, DataType::Utf8, false));
    Arc::new(Schema::new(fields))
}

fn partition_array(data_type: &DataType, value: &str, rows: usize) -> Result<ArrayRef, ArrowError> {
    match data_type {
        DataType::Int64 => {
            let parsed = value
                .parse::<i64>()
                .map_err(|err| ArrowError::ParseError(format!("{value}: {err}")))?;
            Ok(Arc::new(Int64Array::from(vec![parsed; rows])))
        }
        _ => Ok(repeat_string(value, rows)),
    }
}

fn repeat_string(value: &str, rows: usize) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(iter::repeat_n(value, rows)))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("peptide", DataType::Utf8, true),
            Field::new("q_value", DataType::Float64, true),
            Field::new(
                "intensities",
                DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
                true,
            ),
            Field::new(
                "charges",
                DataType::List(Arc::new(Field::new("item", DataType::Int32, true))),
                true,
            ),
            Field::new("organization_uuid", DataType::Utf8, true),
            Field::new("account_uuid", DataType::Utf8, true),
            Field::new("experiment_uuid", DataType::Utf8, true),
            Field::new(LOCAL_FILE_PATH_COLUMN, DataType::Utf8, false),
        ])
    }

    #[test]
    fn default_projection_drops_internal_columns() {
        let columns =
            resolve_columns(AggregationLevel::Peptides, &schema(), &ViewOptions::default())
                .unwrap();
        assert_eq!(
            columns,
            vec![
                "peptide",
                "q_value",
                "intensities",
                "charges",
                "experiment_uuid",
                LOCAL_FILE_PATH_COLUMN
            ]
        );
    }

    #[test]
    fn explicit_include_readmits_array_column() {
        let options = ViewOptions {
            include_columns: Some(vec!["peptide".to_string(), "charges".to_string()]),
            exclude_array_columns: true,
            ..ViewOptions::default()
        };
        let columns = resolve_columns(AggregationLevel::Peptides, &schema(), &options).unwrap();
        assert_eq!(columns, vec!["peptide", "charges", LOCAL_FILE_PATH_COLUMN]);
    }

    #[test]
    fn array_exclusion_without_explicit_include() {
        let options = ViewOptions {
            exclude_array_columns: true,
            ..ViewOptions::default()
        };
        let columns = resolve_columns(AggregationLevel::Peptides, &schema(), &options).unwrap();
        assert!(!columns.contains(&"intensities".to_string()));
        assert!(!columns.contains(&"charges".to_string()));
        assert!(columns.contains(&"peptide".to_string()));
    }

    #[test]
    fn explicit_exclude_beats_include() {
        let options = ViewOptions {
            include_columns: Some(vec![
                "peptide".to_string(),
                "charges".to_string(),
                "organization_uuid".to_string(),
            ]),
            exclude_columns: vec!["charges".to_string()],
            exclude_array_columns: true,
            ..ViewOptions::default()
        };
        let columns = resolve_columns(AggregationLevel::Peptides, &schema(), &options).unwrap();
        assert_eq!(columns, vec!["peptide", LOCAL_FILE_PATH_COLUMN]);
    }

    #[test]
    fn unknown_include_column_fails() {
        let options = ViewOptions {
            include_columns: Some(vec!["missing".to_string()]),
            ..ViewOptions::default()
        };
        let err = resolve_columns(AggregationLevel::Peptides, &schema(), &options).unwrap_err();
        assert_matches!(err, CacheError::MissingColumn { column, .. } if column == "missing");
    }

    #[test]
    fn hive_segments_become_partitions() {
        let root = Utf8Path::new("/cache/psms");
        let path = Utf8Path::new(
            "/cache/psms/result-db/v1/psms.parquet/experiment_uuid=e1/run=3/part-0.parquet",
        );
        assert_eq!(
            hive_partitions(root, path),
            vec![
                ("experiment_uuid".to_string(), "e1".to_string()),
                ("run".to_string(), "3".to_string())
            ]
        );
    }

    #[test]
    fn identity_partitions_stay_strings() {
        let file = PartitionFile {
            path: Utf8PathBuf::from("/cache/psms/experiment_uuid=0042/run=3/part-0.parquet"),
            partitions: vec![
                ("experiment_uuid".to_string(), "0042".to_string()),
                ("run".to_string(), "3".to_string()),
            ],
            schema: Arc::new(Schema::empty()),
            rows: 1,
        };
        let types = partition_types(&[file], "experiment_uuid");
        assert_eq!(types["experiment_uuid"], DataType::Utf8);
        assert_eq!(types["run"], DataType::Int64);
    }

    #[test]
    fn not_decoy_treats_null_flags_as_excluded() {
        let flags: ArrayRef = Arc::new(BooleanArray::from(vec![Some(true), Some(false), None]));
        let mask = Predicate::NotDecoy {
            column: "is_decoy".to_string(),
        }
        .evaluate(&flags)
        .unwrap();
        let kept: Vec<Option<bool>> = mask.iter().collect();
        assert_eq!(kept, vec![Some(false), Some(true), None]);
    }
}
