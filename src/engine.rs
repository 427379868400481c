//! Wires the components from a [`Config`]

use crate::config::Config;
use crate::coverage::{create_generator, CoverageEngine, Generator};
use crate::embed::{create_embedder, Embedder, EmbeddingPipeline};
use crate::error::Result;
use crate::index::IndexSynchronizer;
use crate::meta::MetaDb;
use crate::rank::FusionRanker;
use crate::retrieve::Retriever;
use crate::sparse::SparseIndex;
use crate::store::{DenseIndex, QdrantIndex};
use crate::tasks::{IndexTaskHandler, Scheduler, VacuumTaskHandler, INDEX_TASK, VACUUM_TASK};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct Engine {
    config: Config,
    db: MetaDb,
    sync: Arc<IndexSynchronizer>,
    retriever: Retriever,
    coverage: CoverageEngine,
}

impl Engine {
    /// Open the metadata database and connect the configured backends.
    ///
    /// Backends are contacted lazily, so this succeeds while Qdrant or the
    /// embedding service are down.
    pub async fn open(config: Config) -> Result<Self> {
        let db = MetaDb::connect(&config).await?;
        let dense: Arc<dyn DenseIndex> = Arc::new(QdrantIndex::connect(&config)?);
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config)?;
        debug!(
            qdrant = %config.qdrant_url,
            model = %config.embedding.model,
            "Engine components created"
        );
        Ok(Self::with_components(config, db, dense, embedder, generator))
    }

    /// Assemble an engine around explicit backends
    pub fn with_components(
        config: Config,
        db: MetaDb,
        dense: Arc<dyn DenseIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let sparse = SparseIndex::new(config.paths.sparse_dir.clone());

        let mut pipeline = EmbeddingPipeline::new(embedder, config.embedding.batch_size)
            .with_concurrency(config.embedding.concurrency);
        if config.embedding.cache {
            pipeline = pipeline.with_cache(db.clone());
        }

        let sync = Arc::new(IndexSynchronizer::new(
            db.clone(),
            dense.clone(),
            sparse.clone(),
            pipeline.clone(),
            config.index.batch_size,
        ));
        let retriever = Retriever::new(
            db.clone(),
            dense,
            sparse,
            pipeline,
            FusionRanker::new(config.retrieval.vector_weight, config.retrieval.bm25_weight),
            config.retrieval.candidate_multiplier,
        );
        let coverage = CoverageEngine::new(db.clone(), generator, config.coverage.chars_per_token);

        Self {
            config,
            db,
            sync,
            retriever,
            coverage,
        }
    }

    /// Start a scheduler with the built-in task types.
    ///
    /// Starting marks tasks left `running` by an earlier process as failed,
    /// so only commands that execute tasks call this.
    pub async fn start_scheduler(&self) -> Result<Scheduler> {
        Scheduler::builder(self.db.clone())
            .register(INDEX_TASK, Arc::new(IndexTaskHandler::new(self.sync.clone())))
            .register(VACUUM_TASK, Arc::new(VacuumTaskHandler::new(self.sync.clone())))
            .pool_size(self.config.tasks.worker_pool_size)
            .heartbeat_interval(Duration::from_secs(self.config.tasks.heartbeat_secs))
            .start()
            .await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &MetaDb {
        &self.db
    }

    pub fn sync(&self) -> &Arc<IndexSynchronizer> {
        &self.sync
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn coverage(&self) -> &CoverageEngine {
        &self.coverage
    }
}
