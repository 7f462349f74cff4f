//! Path helpers shared by the parsers and the hierarchy builder
//!
//! All paths handled by the importer are normalized absolute paths: they
//! start with `/`, have no trailing slash and no empty, `.` or `..`
//! components. `/` itself is the scan root at depth 0.

/// The scan root
pub const ROOT: &str = "/";

/// Normalize a raw path from a scan log
///
/// Returns `None` for relative paths and paths that climb with `..`.
pub fn normalize(raw: &str) -> Option<String> {
    if !raw.starts_with('/') {
        return None;
    }

    let mut out = String::with_capacity(raw.len());
    for component in raw.split('/') {
        match component {
            "" | "." => continue,
            ".." => return None,
            name => {
                out.push('/');
                out.push_str(name);
            }
        }
    }

    if out.is_empty() {
        out.push('/');
    }
    Some(out)
}

/// Parent of a normalized path, `None` for the root
pub fn parent_of(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Depth of a normalized path (root = 0, `/a` = 1, `/a/b` = 2)
pub fn depth_of(path: &str) -> u32 {
    if path == ROOT {
        0
    } else {
        path.bytes().filter(|&b| b == b'/').count() as u32
    }
}

/// Last component of a normalized path; the root is named `/`
pub fn name_of(path: &str) -> &str {
    if path == ROOT {
        return ROOT;
    }
    path.rsplit('/').next().unwrap_or(path)
}
