pub mod error;
pub mod handlers;
pub mod jobs;
pub mod media;
pub mod middleware;
pub mod routes;
pub mod torrents;
pub mod ws;

pub use error::{ApiError, ErrorResponse};
pub use routes::create_router;
pub use ws::WsMessage;
