use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_LENGTH};

/// Name used when the response does not carry one
pub const DEFAULT_FILENAME: &str = "downloaded_file";

/// Pull the file name out of a `content-disposition` value.
///
/// Quoted `filename="..."` wins over unquoted `filename=...`.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    const KEY: &str = "filename=";

    let start = value.find(KEY)? + KEY.len();
    let rest = &value[start..];

    let name = match rest.strip_prefix('"') {
        Some(quoted) => {
            let end = quoted.find('"')?;
            &quoted[..end]
        }
        None => rest.split(';').next().unwrap_or(""),
    };

    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Reduce a server-supplied name to a bare file name
pub fn sanitize_filename(name: &str) -> Option<String> {
    let name = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim()
        .trim_matches(char::is_control);

    if name.is_empty() || name.chars().all(|c| c == '.') {
        return None;
    }
    Some(name.to_string())
}

/// File name for a download response, falling back to [`DEFAULT_FILENAME`]
pub fn resolve_filename(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition)
        .and_then(|name| sanitize_filename(&name))
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

/// Declared body length; absent, non-numeric or zero means unknown
pub fn resolve_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&len| len > 0)
}
