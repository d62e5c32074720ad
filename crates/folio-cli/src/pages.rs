//! 📂 Page discovery: turn a directory of rendered page images into ordered items.
//!
//! 🔢 Lexical order puts `page_10` before `page_2`, which is how a book ends up
//! reading like a ransom note. So the number after `page_` is the sort key.
//! Files without one go first, ties fall back to the file name.

use std::path::{Path, PathBuf};

use anyhow::Context;
use folio::InputItem;
use tracing::{debug, info};

/// 🖼️ Extensions we hand to the model, with the content type each one implies.
const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
];

fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, content_type)| *content_type)
}

/// 🔍 The digits of the first `page_<digits>` in a file name, leading zeros trimmed.
/// Kept as text so a thirty-digit page number still sorts after page 2.
pub(crate) fn page_number(name: &str) -> Option<&str> {
    name.match_indices("page_").find_map(|(at, marker)| {
        let rest = &name[at + marker.len()..];
        let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let digits = &rest[..digits_end];
        if digits.is_empty() {
            return None;
        }
        // -- "0000" is still page zero, not page nothing
        let trimmed = digits.trim_start_matches('0');
        Some(if trimmed.is_empty() { "0" } else { trimmed })
    })
}

/// 🔢 Numeric order on digit strings: fewer digits is smaller, same length compares as text.
/// Names without a page number get `None`, which sorts before every `Some`.
fn page_sort_key(name: &str) -> Option<(usize, String)> {
    page_number(name).map(|digits| (digits.len(), digits.to_string()))
}

/// 📚 Every image in `dir` (not recursive), file-backed, in reading order.
/// The id of each item is its file stem.
pub async fn discover_pages(dir: &Path) -> anyhow::Result<Vec<InputItem>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("💀 Could not open the pages directory '{}'", dir.display()))?;

    let mut found: Vec<(Option<(usize, String)>, String, PathBuf, &'static str)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("💀 Failed while listing '{}'", dir.display()))?
    {
        let path = entry.path();
        if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let Some(content_type) = content_type_for(&path) else {
            debug!("🙈 skipping non-image file '{}'", path.display());
            continue;
        };
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            debug!("🙈 skipping file with a non-UTF-8 name '{}'", path.display());
            continue;
        };
        found.push((page_sort_key(&name), name, path, content_type));
    }

    found.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    info!("📚 Found {} page images in '{}'", found.len(), dir.display());

    Ok(found
        .into_iter()
        .map(|(_, name, path, content_type)| {
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .unwrap_or(name);
            InputItem::from_file(id, path).with_content_type(content_type)
        })
        .collect())
}
