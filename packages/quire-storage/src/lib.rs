pub mod db;
pub mod frozen;
pub mod graph;
pub mod ledger;
pub mod models;
pub mod schema;

mod error;

pub use error::Error;

use std::{future::Future, pin::Pin};

pub type Result<T, E = Error> = std::result::Result<T, E>;
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
