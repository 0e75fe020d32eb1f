pub mod migrate;
pub mod operation;
pub mod serve;
