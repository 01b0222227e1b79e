use thiserror::Error;

/// Failures the media path hands back as values. Translation, reply and
/// header failures never become errors; those stages degrade in place and
/// only terminal delivery failures abort an event.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Media fetch failed: {0}")]
    MediaFetchFailed(String),

    #[error("Transcode error: {0}")]
    Transcode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
