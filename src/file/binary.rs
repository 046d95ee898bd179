use std::path::Path;

/// Bytes inspected when sniffing content
const SNIFF_LEN: usize = 8192;

/// Check if a path carries a known binary or generated-artifact extension
pub fn has_binary_extension(path: &Path) -> bool {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();
    if name.ends_with(".min.js") || name.ends_with(".bundle.js") || name.ends_with(".map") {
        return true;
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            // Executables and libraries
            "exe" | "dll" | "so" | "dylib" | "a" | "o" | "lib" | "bin"
            // Archives
            | "zip" | "tar" | "gz" | "bz2" | "xz" | "7z" | "rar" | "tgz"
            // Media
            | "png" | "jpg" | "jpeg" | "gif" | "bmp" | "ico" | "svg" | "webp"
            | "mp4" | "mov" | "mkv" | "webm" | "mp3" | "wav" | "ogg" | "flac"
            // Documents (binary formats)
            | "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx"
            // Other binary formats and lock files
            | "wasm" | "pyc" | "class" | "jar" | "lock"
        ),
        None => false,
    }
}

/// Decide from the leading bytes whether content is binary.
///
/// Null bytes are conclusive. Otherwise a high share of non-printable bytes
/// marks the buffer binary unless it is valid UTF-8 with mostly text.
pub fn looks_binary(data: &[u8]) -> bool {
    let data = &data[..data.len().min(SNIFF_LEN)];
    if data.is_empty() {
        return false;
    }
    if data.contains(&0) {
        return true;
    }

    let non_printable = data
        .iter()
        .filter(|&&b| !is_printable_or_whitespace(b))
        .count();
    let ratio = non_printable as f64 / data.len() as f64;

    if ratio > 0.30 {
        // A cut in the middle of a multibyte char at SNIFF_LEN is still text
        let valid_utf8 = match std::str::from_utf8(data) {
            Ok(_) => true,
            Err(e) => e.error_len().is_none(),
        };
        return !valid_utf8 || ratio > 0.80;
    }

    false
}

#[inline]
fn is_printable_or_whitespace(byte: u8) -> bool {
    matches!(byte, 0x09 | 0x0A | 0x0D | 0x20..=0x7E)
}
