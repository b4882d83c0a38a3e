// src/core/mod.rs

pub mod context;
pub mod env;
pub mod runnable;
pub mod tokenizer;
