pub mod ask;
pub mod cache;
pub mod pages;
pub mod probes;
pub mod transcribe;
