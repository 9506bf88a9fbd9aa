mod service;

pub use service::IngestionDispatcher;
