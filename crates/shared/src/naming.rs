//! Generated file names and opaque tokens.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Random alphanumeric token, used for task ids and upload names.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Unique stored-file name: `<yyyyMMddHHmmss>_<8 chars><ext>`.
/// `ext` keeps its leading dot (or is empty).
pub fn timestamped_name(ext: &str) -> String {
    format!(
        "{}_{}{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        random_token(8),
        ext
    )
}

/// Coarse file-type bucket derived from the extension, used for the upload
/// directory layout and the stored record.
pub fn file_type_for_extension(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" => "image",
        "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "pdf" | "txt" => "document",
        "mp4" | "avi" | "mov" | "wmv" | "flv" | "mkv" => "video",
        "mp3" | "wav" | "ogg" | "flac" | "aac" => "audio",
        "zip" | "rar" | "7z" | "tar" | "gz" => "archive",
        "apk" | "ipa" | "exe" | "dmg" => "app",
        _ => "other",
    }
}
