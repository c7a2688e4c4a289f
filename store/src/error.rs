#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("store io error: {0}")]
	Io(String),

	#[error("store corruption: {0}")]
	Corruption(String),
}
