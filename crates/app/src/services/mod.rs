pub mod app_service;
pub mod bulk_operations;
pub mod operation_queue;
pub mod status_poller;
