mod rate_table;

pub use rate_table::{ModelRate, RateTable, DEFAULT_MODEL_KEY};
