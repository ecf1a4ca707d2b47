mod manager;

pub use manager::ContextManager;
