//! Filename and path helpers for saved results

use crate::config::FileCollisionAction;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Get a unique path for a file, handling collisions according to the specified action
///
/// For `Rename`, `photo.png` becomes `photo (1).png`, then `photo (2).png`, and so on.
/// For `Skip`, an existing file is an error. For `Overwrite`, the path is returned unchanged.
///
/// ```
/// use jobwatch::utils::get_unique_path;
/// use jobwatch::config::FileCollisionAction;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/jobwatch-doc/result.png");
/// let unique = get_unique_path(path, FileCollisionAction::Rename).unwrap();
/// assert_eq!(unique, path);
/// ```
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if path.exists() {
                return Err(Error::FileCollision(path.to_path_buf()));
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| Error::Other(format!("invalid path: {}", path.display())))?;
            let extension = path.extension().and_then(|e| e.to_str());
            let parent = path
                .parent()
                .ok_or_else(|| Error::Other(format!("invalid path: {}", path.display())))?;

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{} ({}).{}", stem, i, ext),
                    None => format!("{} ({})", stem, i),
                };
                let new_path = parent.join(new_name);
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            Err(Error::FileCollision(path.to_path_buf()))
        }
    }
}

/// Filename from a `Content-Disposition` header value
///
/// Handles `filename="a.zip"`, `filename=a.zip` and RFC 5987 `filename*=UTF-8''a%20b.zip`;
/// the encoded form wins when both are present. The result is passed through
/// [`sanitize_filename`].
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut encoded = None;

    for part in value.split(';') {
        let part = part.trim();
        if let Some(raw) = part.strip_prefix("filename*=") {
            // Format is: charset'lang'encoded-filename
            if let Some(idx) = raw.rfind('\'')
                && let Ok(decoded) = urlencoding::decode(raw[idx + 1..].trim_matches('"'))
            {
                encoded = Some(decoded.into_owned());
            }
        } else if let Some(raw) = part.strip_prefix("filename=") {
            plain = Some(raw.trim_matches('"').to_string());
        }
    }

    encoded
        .or(plain)
        .map(|name| sanitize_filename(&name))
        .filter(|name| !name.is_empty())
}

/// Extension of the last path segment of a URL, lowercased
///
/// Query strings and fragments are ignored. Returns `None` for relative
/// references that do not parse, for empty segments and for names without a dot.
pub fn url_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(last).ok()?;
    let ext = Path::new(decoded.as_ref()).extension()?.to_str()?;
    let valid = !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

/// Strip directory components and characters that are unsafe in filenames
///
/// Keeps only the final component so a backend-supplied name can never escape
/// the target directory.
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() || cleaned == ".." {
        String::new()
    } else {
        cleaned
    }
}
