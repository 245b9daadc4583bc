/// Job identifiers are caller-supplied strings (UUID v4 when generated here).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// An embedding vector as returned by the embedding model.
pub type Embedding = Vec<f32>;
