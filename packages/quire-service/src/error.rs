pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Pipeline error: {message}")]
	Pipeline { message: String },
	#[error("Serialization error: {message}")]
	Serialization { message: String },
}
impl From<quire_storage::Error> for Error {
	fn from(err: quire_storage::Error) -> Self {
		match err {
			quire_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			quire_storage::Error::NotFound(message) => Self::NotFound { message },
			quire_storage::Error::Conflict(message) => Self::Conflict { message },
			other => Self::Storage { message: other.to_string() },
		}
	}
}
impl From<quire_providers::Error> for Error {
	fn from(err: quire_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::Serialization { message: err.to_string() }
	}
}
