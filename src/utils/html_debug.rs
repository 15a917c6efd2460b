// src/utils/html_debug.rs
use regex::Regex;
use std::fs;
use std::path::Path;
use crate::utils::error::StorageError;

/// Patterns highlighted in dumped search pages, keyed by the signal they represent.
pub const ORG_ID_DEBUG_PATTERNS: &[(&str, &str)] = &[
    (r"orgId=\d+", "url"),
    (r#"(?i)data-orgid=["']?\d+"#, "attr"),
    (r#"(?i)orgId["\s:=]+\d+"#, "source"),
    (r"(?i)orgid", "mention"),
];

const DEBUG_STYLE: &str = "<style>\n\
    .hl-url { background: #90EE90; }\n\
    .hl-attr { background: #ADD8E6; }\n\
    .hl-source { background: #FFFF00; }\n\
    .hl-mention { background: #FFC0CB; }\n\
    </style>\n";

/// Wraps each highlighted byte range of `html` in a tagged `<span>`.
/// Highlights are `(start, end, kind)`; a range overlapping an earlier one is dropped.
fn annotate(html: &str, highlights: &[(usize, usize, &str)]) -> String {
    let mut ordered = highlights.to_vec();
    ordered.sort_by_key(|&(start, _, _)| start);

    let mut out = String::with_capacity(html.len() + DEBUG_STYLE.len() + 64 * ordered.len());
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n");
    out.push_str(DEBUG_STYLE);
    out.push_str("</head>\n<body>\n");

    let mut cursor = 0;
    for (start, end, kind) in ordered {
        if start < cursor || end > html.len() || !html.is_char_boundary(start) || !html.is_char_boundary(end) {
            continue;
        }
        out.push_str(&html[cursor..start]);
        out.push_str(&format!("<span class=\"hl-{}\" title=\"{}..{} {}\">", kind, start, end, kind));
        out.push_str(&html[start..end]);
        out.push_str("</span>");
        cursor = end;
    }
    out.push_str(&html[cursor..]);
    out.push_str("\n</body>\n</html>");
    out
}

/// Writes the annotated page to `path`, creating parent directories.
pub fn save_debug_html(html: &str, path: &Path, highlights: &[(usize, usize, &str)]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, annotate(html, highlights))?;

    tracing::info!("Saved debug HTML to {}", path.display());
    Ok(())
}

/// Highlights every match of each `(regex, kind)` pattern and saves the page.
pub fn create_debug_html(html: &str, path: &Path, patterns: &[(&str, &str)]) -> Result<(), StorageError> {
    let mut highlights = Vec::new();
    for &(pattern, kind) in patterns {
        let re = Regex::new(pattern)
            .map_err(|e| StorageError::SerializationError(format!("bad debug pattern {:?}: {}", pattern, e)))?;
        highlights.extend(re.find_iter(html).map(|m| (m.start(), m.end(), kind)));
    }

    save_debug_html(html, path, &highlights)
}
