use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::content::MediaSource;
use crate::telegram::TelegramFileRef;
use crate::utils::AppError;

/// Telegram rejects photos with an extreme aspect ratio or oversized edges;
/// such images stay remote so Telegram fetches them server-side.
const MAX_PHOTO_ASPECT: f64 = 20.0;
const MAX_PHOTO_EDGE_SUM: u32 = 10_000;
/// Images above this are sent as documents to avoid recompression limits.
const FORCE_DOCUMENT_SIZE: u64 = 10 * 1024 * 1024;
/// Videos above this are not transferred at all.
pub const MAX_VIDEO_SIZE: u64 = 200 * 1024 * 1024;
/// Files above this are left on the source platform.
pub const MAX_FILE_PROXY_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeKind {
    /// silk voice → ogg/opus for Telegram.
    SilkDecode,
    /// ogg/opus voice → silk for QQ.
    SilkEncode,
    WebmToGif,
    TgsToGif,
}

/// External codec collaborator. Errors come back typed so the pipeline can
/// degrade instead of failing the event.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, kind: TranscodeKind, data: Vec<u8>) -> Result<PathBuf, AppError>;
}

/// Remote transcoding collaborator reached over HTTP. The response body is
/// the converted media, written to a kept temp file the caller adopts into
/// its scope.
pub struct GatewayTranscoder {
    client: Client,
    base_url: String,
}

impl GatewayTranscoder {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Transcoder for GatewayTranscoder {
    async fn transcode(&self, kind: TranscodeKind, data: Vec<u8>) -> Result<PathBuf, AppError> {
        let (endpoint, suffix) = match kind {
            TranscodeKind::SilkDecode => ("silk/decode", ".ogg"),
            TranscodeKind::SilkEncode => ("silk/encode", ".silk"),
            TranscodeKind::WebmToGif => ("gif/webm", ".gif"),
            TranscodeKind::TgsToGif => ("gif/tgs", ".gif"),
        };
        let response = self
            .client
            .post(format!("{}/{endpoint}", self.base_url))
            .body(data)
            .send()
            .await
            .map_err(|e| AppError::Transcode(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AppError::Transcode(format!(
                "{endpoint} returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Transcode(e.to_string()))?;

        let file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .map_err(AppError::Io)?;
        tokio::fs::write(file.path(), &bytes)
            .await
            .map_err(AppError::Io)?;
        file.into_temp_path()
            .keep()
            .map_err(|e| AppError::Io(e.error))
    }
}

/// Stands in when no transcoding service is configured; every conversion
/// degrades to its placeholder.
pub struct DisabledTranscoder;

#[async_trait]
impl Transcoder for DisabledTranscoder {
    async fn transcode(&self, kind: TranscodeKind, _data: Vec<u8>) -> Result<PathBuf, AppError> {
        Err(AppError::Transcode(format!(
            "{kind:?} needs a transcoding service, none configured"
        )))
    }
}

enum TempHandle {
    /// Deleted when the handle drops.
    Managed(TempPath),
    /// A path some collaborator created for us; unlinked on drop.
    Foreign(PathBuf),
}

/// Scoped ownership of temporary media files for one delivery attempt.
/// Dropping the scope releases every file, on success and failure alike.
#[derive(Default)]
pub struct TempScope {
    handles: Vec<TempHandle>,
}

impl TempScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty temp file and returns its path; the file lives as
    /// long as the scope.
    pub fn create(&mut self, suffix: &str) -> std::io::Result<PathBuf> {
        let file = tempfile::Builder::new().suffix(suffix).tempfile()?;
        let path = file.path().to_path_buf();
        self.handles.push(TempHandle::Managed(file.into_temp_path()));
        Ok(path)
    }

    /// Adopts a file created elsewhere (e.g. returned by the transcoder).
    pub fn adopt(&mut self, path: PathBuf) {
        self.handles.push(TempHandle::Foreign(path));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for TempScope {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            if let TempHandle::Foreign(path) = handle {
                if let Err(e) = std::fs::remove_file(&path) {
                    debug!("temp cleanup of {} failed: {}", path.display(), e);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub data: Vec<u8>,
    pub content_type: String,
    pub filename: String,
    pub size: u64,
}

/// Image readied for Telegram, with the document-mode decision made.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    pub file: TelegramFileRef,
    pub force_document: bool,
}

pub struct MediaPipeline {
    client: Client,
    transcoder: std::sync::Arc<dyn Transcoder>,
}

impl MediaPipeline {
    pub fn new(transcoder: std::sync::Arc<dyn Transcoder>) -> Self {
        Self {
            client: Client::new(),
            transcoder,
        }
    }

    pub async fn download(&self, url: &str) -> Result<MediaInfo> {
        // The QQ client sometimes hands back a local path instead of a URL.
        if !url.starts_with("http://") && !url.starts_with("https://") {
            let data = tokio::fs::read(url).await?;
            let size = data.len() as u64;
            let filename = filename_from_url(url).unwrap_or_else(|| "attachment".to_string());
            let content_type = normalize_content_type(None, &filename, &data);
            let filename = ensure_filename_extension(&filename, &content_type);
            return Ok(MediaInfo {
                data,
                content_type,
                filename,
                size,
            });
        }

        debug!("downloading media from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("failed to download from {}: {}", url, e))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to download from {}: status {}",
                url,
                response.status()
            ));
        }

        let headers = response.headers().clone();
        let raw_content_type = headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let content_disposition = headers
            .get("content-disposition")
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);

        let data = response
            .bytes()
            .await
            .map_err(|e| anyhow!("failed to read response body: {}", e))?
            .to_vec();

        let size = data.len() as u64;
        let mut filename = content_disposition
            .as_deref()
            .and_then(filename_from_content_disposition)
            .or_else(|| filename_from_url(url))
            .unwrap_or_else(|| "attachment".to_string());
        let content_type = normalize_content_type(raw_content_type.as_deref(), &filename, &data);
        filename = ensure_filename_extension(&filename, &content_type);

        debug!("downloaded {} bytes from {}", size, url);

        Ok(MediaInfo {
            data,
            content_type,
            filename,
            size,
        })
    }

    /// Fetches an image for Telegram. Never fails: download errors and
    /// Telegram photo-constraint violations both fall back to handing the
    /// remote URL over uncopied.
    pub async fn prepare_image(&self, url: &str, keep_webp: bool) -> PreparedImage {
        let media = match self.download(url).await {
            Ok(media) => media,
            Err(e) => {
                warn!("media download failed, passing remote url through: {}", e);
                return PreparedImage {
                    file: TelegramFileRef::Url(url.to_string()),
                    force_document: false,
                };
            }
        };

        if matches!(media.content_type.as_str(), "image/png" | "image/jpeg")
            && let Some((width, height)) = image_dimensions(&media.data)
            && exceeds_photo_limits(width, height)
        {
            debug!(
                "image {}x{} exceeds photo limits, passing remote url through",
                width, height
            );
            return PreparedImage {
                file: TelegramFileRef::Url(url.to_string()),
                force_document: false,
            };
        }

        let force_document = media.size > FORCE_DOCUMENT_SIZE;
        if force_document {
            info!("image of {} bytes forced to document mode", media.size);
        }

        // webp uploads double as stickers and drop the caption; re-label
        // unless the caller wants sticker semantics.
        let mut filename = media.filename;
        if !keep_webp && media.content_type == "image/webp" {
            filename = format!(
                "{}.png",
                Path::new(&filename)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("image")
            );
        }

        PreparedImage {
            file: TelegramFileRef::Bytes {
                name: filename,
                data: media.data,
            },
            force_document,
        }
    }

    /// Fetches a named file for Telegram, same fallback policy as images.
    pub async fn prepare_file(&self, url: &str, name: &str) -> PreparedImage {
        match self.download(url).await {
            Ok(media) => PreparedImage {
                force_document: media.size > FORCE_DOCUMENT_SIZE,
                file: TelegramFileRef::Bytes {
                    name: name.to_string(),
                    data: media.data,
                },
            },
            Err(e) => {
                warn!("file download failed, passing remote url through: {}", e);
                PreparedImage {
                    file: TelegramFileRef::Url(url.to_string()),
                    force_document: false,
                }
            }
        }
    }

    /// QQ voice → local ogg for Telegram. `None` when no playable source
    /// could be obtained; the caller degrades to a text placeholder.
    pub async fn prepare_voice_for_telegram(
        &self,
        url: Option<&str>,
        scope: &mut TempScope,
    ) -> Result<Option<TelegramFileRef>, AppError> {
        let Some(url) = url else {
            return Ok(None);
        };
        let media = self
            .download(url)
            .await
            .map_err(|e| AppError::MediaFetchFailed(e.to_string()))?;
        let ogg = self
            .transcoder
            .transcode(TranscodeKind::SilkDecode, media.data)
            .await?;
        scope.adopt(ogg.clone());
        Ok(Some(TelegramFileRef::Local(ogg)))
    }

    /// Telegram voice → silk for QQ.
    pub async fn prepare_voice_for_qq(
        &self,
        url: &str,
        scope: &mut TempScope,
    ) -> Result<MediaSource, AppError> {
        let media = self
            .download(url)
            .await
            .map_err(|e| AppError::MediaFetchFailed(e.to_string()))?;
        let silk = self
            .transcoder
            .transcode(TranscodeKind::SilkEncode, media.data)
            .await?;
        scope.adopt(silk.clone());
        Ok(MediaSource::Local(silk))
    }

    /// webm/gif sources become an animated-friendly gif image; regular video
    /// is downloaded into the scope.
    pub async fn prepare_video_for_qq(
        &self,
        url: &str,
        size: u64,
        mime: &str,
        is_gif: bool,
        scope: &mut TempScope,
    ) -> Result<crate::qq::QqSendElement, AppError> {
        if size > MAX_VIDEO_SIZE {
            return Err(AppError::MediaFetchFailed(format!(
                "video of {} bytes exceeds transfer cap",
                size
            )));
        }
        let media = self
            .download(url)
            .await
            .map_err(|e| AppError::MediaFetchFailed(e.to_string()))?;
        if mime == "video/webm" || is_gif {
            let gif = self
                .transcoder
                .transcode(TranscodeKind::WebmToGif, media.data)
                .await?;
            scope.adopt(gif.clone());
            return Ok(crate::qq::QqSendElement::Image {
                source: MediaSource::Local(gif),
                as_sticker: true,
            });
        }
        let path = scope.create(".mp4").map_err(AppError::Io)?;
        tokio::fs::write(&path, &media.data)
            .await
            .map_err(AppError::Io)?;
        Ok(crate::qq::QqSendElement::Video { path })
    }

    /// Lottie sticker → gif image for QQ.
    pub async fn prepare_animated_sticker(
        &self,
        url: &str,
        scope: &mut TempScope,
    ) -> Result<MediaSource, AppError> {
        let media = self
            .download(url)
            .await
            .map_err(|e| AppError::MediaFetchFailed(e.to_string()))?;
        let gif = self
            .transcoder
            .transcode(TranscodeKind::TgsToGif, media.data)
            .await?;
        scope.adopt(gif.clone());
        Ok(MediaSource::Local(gif))
    }
}

/// Telegram photo constraint: width/height ratio at most 20, edge sum at
/// most 10000.
pub fn exceeds_photo_limits(width: u32, height: u32) -> bool {
    if width == 0 || height == 0 {
        return true;
    }
    let aspect = width as f64 / height as f64;
    aspect > MAX_PHOTO_ASPECT
        || aspect < 1.0 / MAX_PHOTO_ASPECT
        || width + height > MAX_PHOTO_EDGE_SUM
}

/// Reads dimensions straight from PNG/JPEG headers.
pub fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    png_dimensions(data).or_else(|| jpeg_dimensions(data))
}

fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 24 || data[..8] != [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
        return None;
    }
    if &data[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
    Some((width, height))
}

fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 4 || data[..3] != [0xFF, 0xD8, 0xFF] {
        return None;
    }
    let mut i = 2;
    while i + 9 < data.len() {
        if data[i] != 0xFF {
            return None;
        }
        // Markers may be preceded by any number of 0xFF fill bytes.
        while i + 9 < data.len() && data[i + 1] == 0xFF {
            i += 1;
        }
        let marker = data[i + 1];
        // SOF markers carry dimensions; DHT/DNL/DAC do not.
        if (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            let height = u32::from(data[i + 5]) << 8 | u32::from(data[i + 6]);
            let width = u32::from(data[i + 7]) << 8 | u32::from(data[i + 8]);
            return Some((width, height));
        }
        let segment_len = usize::from(data[i + 2]) << 8 | usize::from(data[i + 3]);
        i += 2 + segment_len;
    }
    None
}

fn filename_from_content_disposition(value: &str) -> Option<String> {
    for part in value.split(';').map(str::trim) {
        if let Some(raw) = part.strip_prefix("filename*=") {
            let raw = trim_wrapping_quotes(raw.trim());
            let encoded = raw.rsplit("''").next().unwrap_or(raw);
            if let Some(name) = percent_decode(encoded)
                .as_deref()
                .and_then(sanitize_filename)
            {
                return Some(name);
            }
        }
    }

    for part in value.split(';').map(str::trim) {
        if let Some(raw) = part.strip_prefix("filename=")
            && let Some(name) = sanitize_filename(trim_wrapping_quotes(raw.trim()))
        {
            return Some(name);
        }
    }

    None
}

fn filename_from_url(url: &str) -> Option<String> {
    if let Ok(parsed) = reqwest::Url::parse(url)
        && let Some(segment) = parsed.path_segments().and_then(|mut s| s.next_back())
        && let Some(name) = sanitize_filename(segment)
    {
        return Some(name);
    }

    let without_query = url.split('?').next().unwrap_or(url);
    let tail = without_query.rsplit('/').next().unwrap_or(without_query);
    sanitize_filename(tail)
}

fn sanitize_filename(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let basename = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    let basename = basename.trim();
    if basename.is_empty() {
        return None;
    }

    let cleaned: String = basename.chars().filter(|c| !c.is_control()).collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn trim_wrapping_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn percent_decode(value: &str) -> Option<String> {
    let mut out = Vec::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &value[i + 1..i + 3];
            let parsed = u8::from_str_radix(hex, 16).ok()?;
            out.push(parsed);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).ok()
}

fn normalize_content_type(header_value: Option<&str>, filename: &str, data: &[u8]) -> String {
    let header_value = header_value
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .unwrap_or("application/octet-stream");

    if !header_value.is_empty() && header_value != "application/octet-stream" {
        return header_value.to_string();
    }

    guess_mime_from_filename(filename)
        .or_else(|| sniff_mime(data))
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn ensure_filename_extension(filename: &str, content_type: &str) -> String {
    if Path::new(filename).extension().is_some() {
        return filename.to_string();
    }

    if let Some(ext) = extension_from_mime(content_type) {
        return format!("{}.{}", filename, ext);
    }

    filename.to_string()
}

fn guess_mime_from_filename(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "mp4" => Some("video/mp4"),
        "webm" => Some("video/webm"),
        "ogg" => Some("audio/ogg"),
        "silk" | "slk" => Some("audio/silk"),
        "amr" => Some("audio/amr"),
        _ => None,
    }
}

fn extension_from_mime(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "audio/ogg" => Some("ogg"),
        "audio/silk" => Some("silk"),
        _ => None,
    }
}

fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    if data.len() >= 8 && data[..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some("image/png");
    }
    if data.len() >= 3 && data[..3] == [0xFF, 0xD8, 0xFF] {
        return Some("image/jpeg");
    }
    if data.len() >= 6 && (&data[..6] == b"GIF87a" || &data[..6] == b"GIF89a") {
        return Some("image/gif");
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if data.len() >= 4 && &data[..4] == b"OggS" {
        return Some("audio/ogg");
    }

    None
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data
    }

    #[test]
    fn reads_png_dimensions_from_header() {
        assert_eq!(image_dimensions(&png_header(640, 480)), Some((640, 480)));
    }

    #[test]
    fn reads_jpeg_dimensions_from_sof_marker() {
        // SOI, APP0 (placeholder), SOF0 with 480x640
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00];
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x01, 0xE0, 0x02, 0x80, 0x03, 0x00]);
        assert_eq!(image_dimensions(&data), Some((640, 480)));
    }

    #[test]
    fn reads_jpeg_dimensions_past_fill_bytes() {
        // SOI, then SOF0 padded with 0xFF fill bytes, 12000x50
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xFF, 0xFF];
        data.extend_from_slice(&[0xC0, 0x00, 0x0B, 0x08, 0x00, 0x32, 0x2E, 0xE0, 0x03, 0x00]);
        assert_eq!(image_dimensions(&data), Some((12_000, 50)));
    }

    #[test_case(12_000, 50, true; "aspect above twenty")]
    #[test_case(50, 12_000, true; "inverse aspect above twenty")]
    #[test_case(6_000, 5_000, true; "edge sum above limit")]
    #[test_case(1_920, 1_080, false; "normal photo")]
    fn photo_limit_gate(width: u32, height: u32, expected: bool) {
        assert_eq!(exceeds_photo_limits(width, height), expected);
    }

    #[test]
    fn picks_filename_from_content_disposition_filename_star() {
        let header = "attachment; filename*=UTF-8''voice-note.ogg";
        let filename = filename_from_content_disposition(header).unwrap();
        assert_eq!(filename, "voice-note.ogg");
    }

    #[test]
    fn strips_query_from_url_filename() {
        let url = "https://gchat.qpic.cn/gchatpic_new/0/0-0-ABCD/0?term=2";
        let filename = filename_from_url(url).unwrap();
        assert_eq!(filename, "0");
    }

    #[test]
    fn infers_png_type_and_extension_when_header_is_octet_stream() {
        let body = png_header(1, 1);
        let content_type =
            normalize_content_type(Some("application/octet-stream"), "attachment", &body);
        assert_eq!(content_type, "image/png");

        let filename = ensure_filename_extension("attachment", &content_type);
        assert_eq!(filename, "attachment.png");
    }

    #[test]
    fn temp_scope_removes_adopted_files_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("left-behind.gif");
        std::fs::write(&path, b"gif").unwrap();

        {
            let mut scope = TempScope::new();
            scope.adopt(path.clone());
            assert_eq!(scope.len(), 1);
        }

        assert!(!path.exists());
    }

    #[test]
    fn temp_scope_created_files_vanish_with_the_scope() {
        let path = {
            let mut scope = TempScope::new();
            scope.create(".ogg").unwrap()
        };
        assert!(!path.exists());
    }
}
