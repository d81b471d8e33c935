pub mod analytics_handlers;
pub mod file_handlers;
pub mod health_handlers;
pub mod sync_handlers;
