//! Directory listing rendering (§4.8 `DirectoryListing` strategy).
//!
//! Grounded in the reference server's `directory_list_tpl_str` mustache
//! template: a parent-directory link plus one row per entry with a
//! type-specific icon, name, type label, and human-sized file size.
//! Dotfiles are excluded, matching the reference generator's `d_name[0] != '.'`
//! filter.

use askama::Template;

use crate::error::ServeError;
use crate::fd::RootDir;

/// One row in a rendered directory listing.
struct ListingEntry {
    icon: &'static str,
    icon_alt: &'static str,
    name: String,
    type_label: &'static str,
    size: String,
    unit: &'static str,
}

#[derive(Template)]
#[template(path = "listing.html")]
struct ListingTemplate<'a> {
    rel_path: &'a str,
    entries: Vec<ListingEntry>,
}

/// Renders a directory listing for `relative_path` (empty for the document
/// root itself) into an HTML body.
///
/// # Errors
///
/// Returns [`ServeError::Internal`] if the directory can't be read or the
/// template fails to render.
pub fn render(root: &RootDir, relative_path: &str, key: &str) -> Result<Vec<u8>, ServeError> {
    let absolute = if relative_path.is_empty() {
        root.path().to_path_buf()
    } else {
        root.path().join(relative_path)
    };

    let mut entries = Vec::new();
    let dir = std::fs::read_dir(&absolute)
        .map_err(|e| ServeError::internal(key, format!("read_dir failed: {e}")))?;

    for item in dir {
        let item = item.map_err(|e| ServeError::internal(key, format!("read_dir entry: {e}")))?;
        let name = item.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let Ok(metadata) = item.metadata() else {
            // A stat failure (e.g. the entry vanished between readdir and
            // stat) just drops that row instead of failing the whole listing.
            continue;
        };
        let is_dir = metadata.is_dir();
        let (size, unit) = human_size(metadata.len());

        entries.push(ListingEntry {
            icon: if is_dir { "folder" } else { "file" },
            icon_alt: if is_dir { "DIR" } else { "FILE" },
            name,
            type_label: if is_dir { "directory" } else { "file" },
            size,
            unit,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let rendered = ListingTemplate {
        rel_path: key,
        entries,
    }
    .render()
    .map_err(|e| ServeError::internal(key, format!("template render failed: {e}")))?;

    Ok(rendered.into_bytes())
}

/// Formats a byte count the way the reference generator does: a whole-number
/// magnitude plus a unit suffix, picking the largest unit under which the
/// value is still `< 1024`.
fn human_size(bytes: u64) -> (String, &'static str) {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit_index = 0;
    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }
    if unit_index == 0 {
        (format!("{bytes}"), UNITS[0])
    } else {
        (format!("{value:.1}"), UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_sizes_render_as_bytes() {
        assert_eq!(human_size(512), ("512".to_string(), "B"));
    }

    #[test]
    fn large_sizes_pick_the_right_unit() {
        let (value, unit) = human_size(20_000);
        assert_eq!(unit, "KiB");
        assert!(value.starts_with("19."));
    }

    #[test]
    fn dotfiles_and_parent_link_behavior() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("visible.txt"), b"hi").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"secret").unwrap();
        std::fs::create_dir(dir.path().join("child")).unwrap();

        let root = RootDir::open(dir.path()).unwrap();
        let rendered = render(&root, "", "/").unwrap();
        let html = String::from_utf8(rendered).unwrap();

        assert!(html.contains("Index of /"));
        assert!(html.contains("visible.txt"));
        assert!(html.contains("child"));
        assert!(!html.contains(".hidden"));
        assert!(html.contains(r#"href="..">Parent directory"#));
    }
}
