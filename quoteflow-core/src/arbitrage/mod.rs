//! Cross-provider arbitrage detection

pub mod opportunity;
pub mod scanner;

pub use opportunity::{Opportunity, OpportunityHistory};
pub use scanner::ArbitrageScanner;
