pub mod assembler;
pub mod config;
pub mod error_codes;
pub mod extract;
pub mod generator;
pub mod llm;
pub mod player;
pub mod translator;
pub mod validate;
pub mod vocabulary;
#[cfg(feature = "web")]
pub mod web;
