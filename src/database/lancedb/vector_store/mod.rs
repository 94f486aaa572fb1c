
use super::{EmbeddingRecord, NoteMetadata};
use crate::{VaultError, config::Config};
use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase, Select},
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const TABLE_NAME: &str = "notes";

/// Vector database store using LanceDB, one record per note
///
/// The store is shared between the indexing worker and the viewer. Writes are
/// serialized through the dimension lock; reads open the latest table version.
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    /// Dimension of the stored vectors, `None` until the table exists
    vector_dimension: Mutex<Option<usize>>,
}

/// A stored record returned by a similarity query
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub id: String,
    pub metadata: NoteMetadata,
    /// Cosine distance, 0 for identical direction
    pub distance: f32,
    /// `1 - distance`, higher is more similar
    pub similarity: f32,
}

impl VectorStore {
    /// Open the store under the configured data directory
    ///
    /// # Arguments
    /// * `config` - Application configuration containing the data directory
    ///
    /// # Returns
    /// * `Result<Self, VaultError>` - Opened store or `StoreUnavailable`
    #[inline]
    pub async fn new(config: &Config) -> Result<Self, VaultError> {
        Self::open(&config.vector_database_path()).await
    }

    /// Open (or create) a store at `db_path`
    #[inline]
    pub async fn open(db_path: &Path) -> Result<Self, VaultError> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            VaultError::StoreUnavailable(format!(
                "Failed to create vector database directory: {}",
                e
            ))
        })?;

        let uri = db_path.display().to_string();
        let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
            error!("Failed to connect to LanceDB: {}", e);
            VaultError::StoreUnavailable(format!("Failed to connect to LanceDB: {}", e))
        })?;

        let store = Self {
            connection,
            table_name: TABLE_NAME.to_string(),
            vector_dimension: Mutex::new(None),
        };

        let dimension = store.detect_existing_vector_dimension().await.map_err(|e| {
            VaultError::StoreUnavailable(format!("Failed to inspect notes table: {}", e))
        })?;
        if let Some(dim) = dimension {
            info!("Opened notes table with vector dimension {}", dim);
        } else {
            debug!("Notes table does not exist yet, it is created on first upsert");
        }
        *store.vector_dimension.lock().await = dimension;

        info!("Vector store initialized successfully");
        Ok(store)
    }

    async fn table_exists(&self) -> Result<bool, VaultError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| VaultError::Store(format!("Failed to list tables: {}", e)))?;
        Ok(table_names.contains(&self.table_name))
    }

    async fn open_table(&self) -> Result<lancedb::Table, VaultError> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| VaultError::Store(format!("Failed to open table: {}", e)))
    }

    /// Detect vector dimension from the existing table schema
    async fn detect_existing_vector_dimension(&self) -> Result<Option<usize>, VaultError> {
        if !self.table_exists().await? {
            return Ok(None);
        }

        let table = self.open_table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| VaultError::Store(format!("Failed to get table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(Some(*size as usize));
                }
            }
        }

        Err(VaultError::Store(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    fn create_schema(vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    vector_dim as i32,
                ),
                false,
            ),
            Field::new("path", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("content_hash", DataType::Utf8, false),
            Field::new("modified_at", DataType::Utf8, false),
            Field::new("indexed_at", DataType::Utf8, false),
        ]))
    }

    /// Insert or replace the record for `record.id`
    ///
    /// The first upsert fixes the table's vector dimension. A vector with a
    /// different dimension drops the table and recreates it, invalidating
    /// every stored vector.
    #[inline]
    pub async fn upsert(&self, record: EmbeddingRecord) -> Result<(), VaultError> {
        let vector_dim = record.vector.len();
        if vector_dim == 0 {
            return Err(VaultError::Store(format!(
                "Refusing to store an empty vector for {}",
                record.id
            )));
        }

        let mut dimension = self.vector_dimension.lock().await;
        match *dimension {
            Some(current) if current == vector_dim => {}
            Some(current) => {
                warn!(
                    "Vector dimension changed from {} to {}, recreating notes table; stored vectors are invalidated",
                    current, vector_dim
                );
                self.recreate_table_with_dimension(vector_dim).await?;
                *dimension = Some(vector_dim);
            }
            None => {
                self.recreate_table_with_dimension(vector_dim).await?;
                *dimension = Some(vector_dim);
            }
        }

        let table = self.open_table().await?;
        let record_batch = Self::create_record_batch(std::slice::from_ref(&record), vector_dim)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        // Replace in one commit so a failed write leaves the previous record in place
        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(reader))
            .await
            .map_err(|e| VaultError::Store(format!("Failed to store {}: {}", record.id, e)))?;

        debug!("Stored embedding for {}", record.id);
        Ok(())
    }

    async fn recreate_table_with_dimension(&self, vector_dim: usize) -> Result<(), VaultError> {
        info!("Creating notes table with vector dimension: {}", vector_dim);

        self.drop_table_if_exists().await?;

        self.connection
            .create_empty_table(&self.table_name, Self::create_schema(vector_dim))
            .execute()
            .await
            .map_err(|e| VaultError::Store(format!("Failed to create table: {}", e)))?;

        Ok(())
    }

    fn create_record_batch(
        records: &[EmbeddingRecord],
        vector_dim: usize,
    ) -> Result<RecordBatch, VaultError> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);
        let mut paths = Vec::with_capacity(len);
        let mut titles = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut hashes = Vec::with_capacity(len);
        let mut modified_ats = Vec::with_capacity(len);
        let mut indexed_ats = Vec::with_capacity(len);

        for record in records {
            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.vector);
            paths.push(record.metadata.path.as_str());
            titles.push(record.metadata.title.as_str());
            contents.push(record.metadata.content.as_str());
            hashes.push(record.metadata.content_hash.as_str());
            modified_ats.push(record.metadata.modified_at.as_str());
            indexed_ats.push(record.metadata.indexed_at.as_str());
        }

        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            vector_dim as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| VaultError::Store(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(paths)),
            Arc::new(StringArray::from(titles)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(hashes)),
            Arc::new(StringArray::from(modified_ats)),
            Arc::new(StringArray::from(indexed_ats)),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim), arrays)
            .map_err(|e| VaultError::Store(format!("Failed to create record batch: {}", e)))
    }

    /// Nearest records to `query_vector`, ascending cosine distance
    ///
    /// `k = 0`, a store without a table and an empty table all return an empty list.
    #[inline]
    pub async fn query(&self, query_vector: &[f32], k: usize) -> Result<Vec<StoredMatch>, VaultError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let Some(dimension) = *self.vector_dimension.lock().await else {
            debug!("Query against a store with no table");
            return Ok(Vec::new());
        };
        if query_vector.len() != dimension {
            return Err(VaultError::Store(format!(
                "Query vector has dimension {}, store holds {}",
                query_vector.len(),
                dimension
            )));
        }

        debug!("Searching for {} nearest notes", k);
        let table = self.open_table().await?;
        let mut results = table
            .vector_search(query_vector)
            .map_err(|e| VaultError::Store(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| VaultError::Store(format!("Failed to execute search: {}", e)))?;

        let mut matches = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| VaultError::Store(format!("Failed to read result stream: {}", e)))?
        {
            matches.extend(parse_match_batch(&batch)?);
        }

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        debug!("Query returned {} matches", matches.len());
        Ok(matches)
    }

    /// Remove the record for `id`; deleting an unknown id is a no-op
    #[inline]
    pub async fn delete(&self, id: &str) -> Result<(), VaultError> {
        let dimension = self.vector_dimension.lock().await;
        if dimension.is_none() {
            return Ok(());
        }

        let table = self.open_table().await?;
        table
            .delete(&id_predicate(id))
            .await
            .map_err(|e| VaultError::Store(format!("Failed to delete {}: {}", id, e)))?;

        debug!("Deleted embedding for {}", id);
        Ok(())
    }

    /// Remove every note stored under the folder `dir_id`
    ///
    /// Returns the removed ids. An empty `dir_id` (the vault root) removes nothing.
    #[inline]
    pub async fn delete_under(&self, dir_id: &str) -> Result<Vec<String>, VaultError> {
        let dir_id = dir_id.trim_matches('/');
        if dir_id.is_empty() {
            return Ok(Vec::new());
        }

        let prefix = format!("{}/", dir_id);
        let removed: Vec<String> = self
            .ids()
            .await?
            .into_iter()
            .filter(|id| id.starts_with(&prefix))
            .collect();
        for id in &removed {
            self.delete(id).await?;
        }

        debug!("Deleted {} embeddings under {}", removed.len(), dir_id);
        Ok(removed)
    }

    /// Every stored note id, sorted
    #[inline]
    pub async fn ids(&self) -> Result<Vec<String>, VaultError> {
        if self.vector_dimension.lock().await.is_none() {
            return Ok(Vec::new());
        }

        let table = self.open_table().await?;
        let total = table
            .count_rows(None)
            .await
            .map_err(|e| VaultError::Store(format!("Failed to count rows: {}", e)))?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::columns(&["id"]))
            .limit(total)
            .execute()
            .await
            .map_err(|e| VaultError::Store(format!("Failed to scan ids: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| VaultError::Store(format!("Failed to read id scan: {}", e)))?;

        let mut ids = Vec::with_capacity(total);
        for batch in &batches {
            let column = string_column(batch, "id")?;
            ids.extend((0..batch.num_rows()).map(|row| column.value(row).to_string()));
        }
        ids.sort();
        Ok(ids)
    }

    /// Number of stored records
    #[inline]
    pub async fn count(&self) -> Result<usize, VaultError> {
        if self.vector_dimension.lock().await.is_none() {
            return Ok(0);
        }

        let table = self.open_table().await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| VaultError::Store(format!("Failed to count rows: {}", e)))
    }

    /// Metadata stored for `id`, if any
    #[inline]
    pub async fn get(&self, id: &str) -> Result<Option<NoteMetadata>, VaultError> {
        if self.vector_dimension.lock().await.is_none() {
            return Ok(None);
        }

        let table = self.open_table().await?;
        let batches: Vec<RecordBatch> = table
            .query()
            .only_if(id_predicate(id))
            .limit(1)
            .execute()
            .await
            .map_err(|e| VaultError::Store(format!("Failed to look up {}: {}", id, e)))?
            .try_collect()
            .await
            .map_err(|e| VaultError::Store(format!("Failed to read lookup result: {}", e)))?;

        for batch in &batches {
            if let Some(record) = parse_record_batch(batch)?.into_iter().next() {
                return Ok(Some(record.metadata));
            }
        }
        Ok(None)
    }

    /// Every stored record with its vector, ordered by id
    #[inline]
    pub async fn list_all(&self) -> Result<Vec<EmbeddingRecord>, VaultError> {
        if self.vector_dimension.lock().await.is_none() {
            return Ok(Vec::new());
        }

        let table = self.open_table().await?;
        let total = table
            .count_rows(None)
            .await
            .map_err(|e| VaultError::Store(format!("Failed to count rows: {}", e)))?;
        if total == 0 {
            return Ok(Vec::new());
        }

        let batches: Vec<RecordBatch> = table
            .query()
            .limit(total)
            .execute()
            .await
            .map_err(|e| VaultError::Store(format!("Failed to scan table: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| VaultError::Store(format!("Failed to read scan result: {}", e)))?;

        let mut records = Vec::with_capacity(total);
        for batch in &batches {
            records.extend(parse_record_batch(batch)?);
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    /// Compact the table after bulk writes
    #[inline]
    pub async fn optimize(&self) -> Result<(), VaultError> {
        let dimension = self.vector_dimension.lock().await;
        if dimension.is_none() {
            return Ok(());
        }

        debug!("Optimizing vector database");
        let table = self.open_table().await?;
        table
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| VaultError::Store(format!("Failed to optimize table: {}", e)))?;

        info!("Vector database optimization completed");
        Ok(())
    }

    /// Check that the table can be opened and counted
    ///
    /// # Returns
    /// * `Result<bool, VaultError>` - True if healthy or not yet created
    #[inline]
    pub async fn validate_integrity(&self) -> Result<bool, VaultError> {
        debug!("Validating database integrity");

        if self.vector_dimension.lock().await.is_none() {
            return Ok(true);
        }

        match self.open_table().await {
            Ok(table) => match table.count_rows(None).await {
                Ok(count) => {
                    debug!("Database integrity check passed, {} rows found", count);
                    Ok(true)
                }
                Err(e) => {
                    error!("Failed to count rows during integrity check: {}", e);
                    Ok(false)
                }
            },
            Err(e) => {
                error!("Failed to open table during integrity check: {}", e);
                Ok(false)
            }
        }
    }

    /// Vector dimension of the table, if it exists
    #[inline]
    pub async fn dimension(&self) -> Option<usize> {
        *self.vector_dimension.lock().await
    }

    async fn drop_table_if_exists(&self) -> Result<(), VaultError> {
        if self.table_exists().await? {
            info!("Dropping existing notes table");
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| VaultError::Store(format!("Failed to drop table: {}", e)))?;
        }
        Ok(())
    }
}

/// SQL filter selecting one note id
fn id_predicate(id: &str) -> String {
    format!("id = '{}'", id.replace('\'', "''"))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, VaultError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| VaultError::Store(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| VaultError::Store(format!("Invalid {} column type", name)))
}

fn parse_metadata(batch: &RecordBatch) -> Result<Vec<(String, NoteMetadata)>, VaultError> {
    let ids = string_column(batch, "id")?;
    let paths = string_column(batch, "path")?;
    let titles = string_column(batch, "title")?;
    let contents = string_column(batch, "content")?;
    let hashes = string_column(batch, "content_hash")?;
    let modified_ats = string_column(batch, "modified_at")?;
    let indexed_ats = string_column(batch, "indexed_at")?;

    Ok((0..batch.num_rows())
        .map(|row| {
            (
                ids.value(row).to_string(),
                NoteMetadata {
                    path: paths.value(row).to_string(),
                    title: titles.value(row).to_string(),
                    content: contents.value(row).to_string(),
                    content_hash: hashes.value(row).to_string(),
                    modified_at: modified_ats.value(row).to_string(),
                    indexed_at: indexed_ats.value(row).to_string(),
                },
            )
        })
        .collect())
}

fn parse_match_batch(batch: &RecordBatch) -> Result<Vec<StoredMatch>, VaultError> {
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    Ok(parse_metadata(batch)?
        .into_iter()
        .enumerate()
        .map(|(row, (id, metadata))| {
            let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });
            StoredMatch {
                id,
                metadata,
                distance,
                similarity: 1.0 - distance,
            }
        })
        .collect())
}

fn parse_record_batch(batch: &RecordBatch) -> Result<Vec<EmbeddingRecord>, VaultError> {
    let vectors = batch
        .column_by_name("vector")
        .ok_or_else(|| VaultError::Store("Missing vector column".to_string()))?
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| VaultError::Store("Invalid vector column type".to_string()))?;

    parse_metadata(batch)?
        .into_iter()
        .enumerate()
        .map(|(row, (id, metadata))| {
            let values = vectors.value(row);
            let floats = values
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| VaultError::Store("Invalid vector item type".to_string()))?;
            Ok(EmbeddingRecord {
                id,
                vector: floats.values().to_vec(),
                metadata,
            })
        })
        .collect()
}
