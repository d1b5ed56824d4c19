mod index;

pub use index::HistoryIndex;
