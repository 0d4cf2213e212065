// Library module
// This module holds the catalog model and client-side directory checks

pub mod models;
pub mod scanner;

pub use models::{MediaFilter, MediaItem, MediaType};
pub use scanner::{DirectoryScanner, DirectorySummary, ValidationError};
