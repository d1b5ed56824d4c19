mod recorder;

pub use recorder::{
    summarize, TraceRecorder, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_PERSISTED_TRACES,
};
