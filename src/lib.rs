pub mod config;
pub mod database;
pub mod dates;
pub mod demo;
pub mod error;
pub mod export;
pub mod filter;
pub mod middleware;
pub mod params;
pub mod serializer;
pub mod views;

pub use error::{ApiError, ErrorTree};
pub use middleware::{ApiResponse, ApiResult};
pub use views::{resource_router, AppState, CollectionView, DetailView};
