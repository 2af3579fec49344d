//! Key path normalization.
//!
//! Keys live in a flat namespace with `/` as the hierarchy separator.
//! Normalization collapses repeated separators, ensures a leading
//! separator, and strips trailing ones (except for the root itself).

/// The namespace separator.
pub const PATH_SEPARATOR: char = '/';

/// Normalize a key or table path to canonical absolute form.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push(PATH_SEPARATOR);
    let mut last_was_sep = true;
    for c in path.chars() {
        if c == PATH_SEPARATOR {
            if !last_was_sep {
                out.push(c);
            }
            last_was_sep = true;
        } else {
            out.push(c);
            last_was_sep = false;
        }
    }
    if out.len() > 1 && out.ends_with(PATH_SEPARATOR) {
        out.pop();
    }
    out
}

/// Join a normalized prefix with a relative (or absolute) key.
pub fn join(prefix: &str, key: &str) -> String {
    if prefix == "/" {
        normalize(key)
    } else {
        normalize(&format!("{}{}{}", prefix, PATH_SEPARATOR, key))
    }
}
