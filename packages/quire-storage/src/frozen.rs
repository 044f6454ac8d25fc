use std::{
	collections::BTreeMap,
	fs,
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
	sync::Mutex,
};

use tempfile::NamedTempFile;

use crate::{BoxFuture, Error, Result};
use quire_domain::FrozenTrace;

/// Write-once storage for frozen traces keyed by `trace_id`.
pub trait FrozenTraceStore
where
	Self: Send + Sync,
{
	/// Persists a frozen trace atomically. Fails with [`Error::Conflict`] when the id exists.
	fn put<'a>(&'a self, frozen: &'a FrozenTrace) -> BoxFuture<'a, Result<()>>;

	fn get<'a>(&'a self, trace_id: &'a str) -> BoxFuture<'a, Result<Option<FrozenTrace>>>;

	fn list<'a>(&'a self) -> BoxFuture<'a, Result<Vec<String>>>;
}

/// One pretty-printed JSON file per trace under a directory.
pub struct FsFreezeStore {
	dir: PathBuf,
}
impl FsFreezeStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, trace_id: &str) -> Result<PathBuf> {
		validate_trace_id(trace_id)?;

		Ok(self.dir.join(format!("{trace_id}.json")))
	}
}
impl FrozenTraceStore for FsFreezeStore {
	fn put<'a>(&'a self, frozen: &'a FrozenTrace) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let path = self.path_for(&frozen.trace_id)?;
			let dir = self.dir.clone();
			let payload = serde_json::to_vec_pretty(frozen)?;
			let trace_id = frozen.trace_id.clone();

			tokio::task::spawn_blocking(move || write_new_file(&dir, &path, &payload, &trace_id))
				.await??;

			tracing::info!(trace_id = %frozen.trace_id, dir = %self.dir.display(), "Frozen trace written.");

			Ok(())
		})
	}

	fn get<'a>(&'a self, trace_id: &'a str) -> BoxFuture<'a, Result<Option<FrozenTrace>>> {
		Box::pin(async move {
			let path = self.path_for(trace_id)?;
			let raw = tokio::task::spawn_blocking(move || match fs::read(&path) {
				Ok(raw) => Ok(Some(raw)),
				Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
				Err(err) => Err(err),
			})
			.await??;
			let Some(raw) = raw else {
				return Ok(None);
			};

			Ok(Some(serde_json::from_slice(&raw)?))
		})
	}

	fn list<'a>(&'a self) -> BoxFuture<'a, Result<Vec<String>>> {
		Box::pin(async move {
			let dir = self.dir.clone();

			tokio::task::spawn_blocking(move || list_ids(&dir)).await?
		})
	}
}

#[derive(Default)]
pub struct MemoryFreezeStore {
	traces: Mutex<BTreeMap<String, FrozenTrace>>,
}
impl FrozenTraceStore for MemoryFreezeStore {
	fn put<'a>(&'a self, frozen: &'a FrozenTrace) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			validate_trace_id(&frozen.trace_id)?;

			let mut traces = self.traces.lock().unwrap_or_else(|err| err.into_inner());

			if traces.contains_key(&frozen.trace_id) {
				return Err(Error::Conflict(format!(
					"Frozen trace {} already exists.",
					frozen.trace_id
				)));
			}

			traces.insert(frozen.trace_id.clone(), frozen.clone());

			Ok(())
		})
	}

	fn get<'a>(&'a self, trace_id: &'a str) -> BoxFuture<'a, Result<Option<FrozenTrace>>> {
		Box::pin(async move {
			let traces = self.traces.lock().unwrap_or_else(|err| err.into_inner());

			Ok(traces.get(trace_id).cloned())
		})
	}

	fn list<'a>(&'a self) -> BoxFuture<'a, Result<Vec<String>>> {
		Box::pin(async move {
			let traces = self.traces.lock().unwrap_or_else(|err| err.into_inner());

			Ok(traces.keys().cloned().collect())
		})
	}
}

/// Trace ids become file names, so only a conservative character set is accepted.
pub fn validate_trace_id(trace_id: &str) -> Result<()> {
	let valid = !trace_id.is_empty()
		&& trace_id.len() <= 128
		&& !trace_id.starts_with('.')
		&& trace_id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

	if !valid {
		return Err(Error::InvalidArgument(format!("Invalid trace id {trace_id:?}.")));
	}

	Ok(())
}

fn write_new_file(dir: &Path, path: &Path, payload: &[u8], trace_id: &str) -> Result<()> {
	fs::create_dir_all(dir)?;

	let mut tmp = NamedTempFile::new_in(dir)?;

	tmp.write_all(payload)?;
	tmp.as_file().sync_all()?;
	tmp.persist_noclobber(path).map_err(|err| {
		if err.error.kind() == ErrorKind::AlreadyExists {
			Error::Conflict(format!("Frozen trace {trace_id} already exists."))
		} else {
			Error::Io(err.error)
		}
	})?;

	Ok(())
}

fn list_ids(dir: &Path) -> Result<Vec<String>> {
	let entries = match fs::read_dir(dir) {
		Ok(entries) => entries,
		Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
		Err(err) => return Err(err.into()),
	};
	let mut ids = Vec::new();

	for entry in entries {
		let path = entry?.path();

		if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
			continue;
		}
		if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
			ids.push(stem.to_string());
		}
	}

	ids.sort();

	Ok(ids)
}
