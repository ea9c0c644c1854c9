pub mod audio;
pub mod config;
pub mod corrector;
pub mod finalizer;
pub mod logging;
pub mod pipeline;
pub mod playback;
pub mod recognition;
pub mod telemetry;
pub mod tts;

pub use logging::{init_logging, log_debug, log_debug_content, log_panic};
pub use pipeline::{
    FinalizedUtterance, PipelineState, ResponseHandle, UtteranceGuard, VoicePipeline,
};
pub use recognition::{EngineErrorKind, EngineEvent, RecognitionEngine, TranscriptAlternative};
