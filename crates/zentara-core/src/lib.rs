pub mod config;
pub mod hashing;
pub mod snippet;
pub mod text_edit;
