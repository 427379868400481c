//! Default values for configuration

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default environment variable name for Qdrant API key
pub fn default_qdrant_api_key_env() -> String {
    "".to_string()
}

/// Default prefix for per-workspace collections
pub fn default_collection_prefix() -> String {
    "stacks".to_string()
}

/// Default embedding model (BAAI/bge-small-en-v1.5)
pub fn default_embedding_model() -> String {
    "BAAI/bge-small-en-v1.5".to_string()
}

/// Default embedding dimension (matches the default model)
pub fn default_embedding_dimension() -> usize {
    384
}

/// Default embedding backend URL
pub fn default_embedding_backend_url() -> String {
    std::env::var("STACKS_EMBEDDING_BACKEND_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:7997".to_string())
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default number of embedding batches in flight
pub fn default_embedding_concurrency() -> usize {
    2
}

/// Default: cache embeddings by content hash
pub fn default_embedding_cache() -> bool {
    true
}

/// Default embedding request timeout in seconds
pub fn default_embedding_timeout() -> u64 {
    30
}

/// Default retries after the first failed embedding request
pub fn default_embedding_max_retries() -> usize {
    2
}

/// Default base delay between embedding retries
pub fn default_embedding_retry_base_delay_ms() -> u64 {
    200
}

/// Default retrieval mode
pub fn default_retrieval_mode() -> String {
    "hybrid".to_string()
}

/// Default number of hits
pub fn default_retrieval_top_k() -> usize {
    8
}

/// Default dense weight in hybrid fusion
pub fn default_vector_weight() -> f32 {
    0.55
}

/// Default BM25 weight in hybrid fusion
pub fn default_bm25_weight() -> f32 {
    0.45
}

/// Default candidate depth multiplier for fusion and diversity
pub fn default_candidate_multiplier() -> usize {
    3
}

/// Default per-document cap for the diversity filter
pub fn default_max_per_doc() -> usize {
    2
}

/// Default number of distinct documents the diversity filter aims for
pub fn default_min_docs() -> usize {
    3
}

/// Default chunk batch size for index builds
pub fn default_index_batch_size() -> usize {
    64
}

/// Default number of concurrently running tasks
pub fn default_worker_pool_size() -> usize {
    2
}

/// Seconds between liveness marks on running tasks
pub fn default_heartbeat_secs() -> u64 {
    5
}

/// Default generation model name
pub fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Default environment variable holding the generation API key
pub fn default_generation_api_key_env() -> String {
    "STACKS_GENERATION_API_KEY".to_string()
}

/// Default generation request timeout in seconds
pub fn default_generation_timeout() -> u64 {
    60
}

/// Default token budget for one evidence note
pub fn default_map_token_budget() -> usize {
    160
}

/// Default token budget for the final coverage answer
pub fn default_reduce_token_budget() -> usize {
    900
}

/// Queries with at least this many words are treated as scope-wide
pub fn default_global_word_threshold() -> usize {
    25
}

/// Approximate characters per token when truncating text to a budget
pub fn default_chars_per_token() -> usize {
    4
}
