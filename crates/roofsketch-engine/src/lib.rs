mod export;
mod gemini;
mod session;
mod validator;

pub use export::{latest_download_name, write_download, write_history_entry, LATEST_DOWNLOAD_STEM};
pub use gemini::{
    classify_failure, extract_inline_image, GeminiSketchProvider, GeminiTransport,
    GenerationError, HttpTransport, ServiceError, SketchProvider, SketchRequest, API_BASE_ENV,
    DEFAULT_API_BASE, SKETCH_MODEL,
};
pub use session::{
    GenerateOutcome, GenerationAttempt, ImageValidator, SketchSession, UploadState,
    UploadValidator,
};
pub use validator::{validate, RawFile, ValidationError, MIN_DIMENSION};
