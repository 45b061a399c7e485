//! Symbol normalization and the shared quote cache

pub mod cache;
pub mod symbol_mapper;

pub use cache::{CacheEntry, QuoteCache};
pub use symbol_mapper::{CanonicalSymbol, SymbolMapper};
