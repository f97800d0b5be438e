pub mod identity;
pub mod response;

pub use identity::identity_headers_middleware;
pub use response::{ApiResponse, ApiResult, ResponseBody};
