pub mod index;
pub mod knowledge_base;
pub mod types;
