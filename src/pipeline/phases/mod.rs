pub mod export;
pub mod filter;
pub mod generate;
pub mod optimize;
