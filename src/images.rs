//! Image URL candidates for the client: the stored URL first, then guesses.
//!
//! Product images come from admin uploads (`/images/<uuid>.jpg`), from CSV
//! imports (anything: absolute URLs, bare file names, protocol-relative
//! links) or are missing entirely. The client tries the candidates in order
//! and shows the first one that loads.

use anyhow::{Context, Result};
use std::path::Path;
use uuid::Uuid;

const EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];
const FALLBACK_EXTENSIONS: [&str; 3] = ["jpg", "png", "webp"];

fn join_public(public_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        public_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn has_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    last.rsplit_once('.')
        .map(|(stem, ext)| !stem.is_empty() && !ext.is_empty() && ext.len() <= 5)
        .unwrap_or(false)
}

/// Resolve a stored image reference to an absolute URL.
pub fn resolve(image_url: &str, public_url: &str) -> Option<String> {
    let trimmed = image_url.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(trimmed.to_string());
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if trimmed.starts_with('/') {
        return Some(join_public(public_url, trimmed));
    }
    Some(join_public(public_url, &format!("images/{trimmed}")))
}

/// Ordered, de-duplicated list of URLs to try for a product image.
pub fn candidates(image_url: Option<&str>, product_id: &str, public_url: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |url: String| {
        if !out.contains(&url) {
            out.push(url);
        }
    };

    if let Some(primary) = image_url.and_then(|u| resolve(u, public_url)) {
        let bare = !has_extension(&primary);
        push(primary.clone());
        if bare {
            for ext in EXTENSIONS {
                push(format!("{primary}.{ext}"));
            }
        }
    }

    let id = product_id.trim();
    if !id.is_empty() {
        for ext in FALLBACK_EXTENSIONS {
            push(join_public(public_url, &format!("images/{id}.{ext}")));
        }
    }
    out
}

/// File extension for an accepted image content type.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Extension matching the file signature of `bytes`, for JPEG, PNG and WebP.
pub fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("png")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}

/// Write `bytes` under `dir` with a fresh UUID name and return the public
/// path (`/images/<name>`).
pub async fn store_image(dir: &Path, bytes: &[u8], ext: &str) -> Result<String> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let name = format!("{}.{ext}", Uuid::new_v4());
    let path = dir.join(&name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(format!("/images/{name}"))
}
