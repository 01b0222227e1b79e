pub mod error;
pub mod formatting;
pub mod geo;
pub mod logging;
pub mod pastebin;

pub use self::error::AppError;
pub use self::pastebin::{DiagnosticSink, PastebinClient};
