//! File-backed adapters: the shared rules file and canary subsets.

pub mod canary_subset;
pub mod rules_repository;

pub use canary_subset::CsvCanarySubsetBuilder;
pub use rules_repository::FileRulesRepository;
