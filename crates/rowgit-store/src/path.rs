//! Virtual path normalization.
//!
//! Paths are plain strings; `.` is the implicit, permanent root. All store
//! entry points normalize their inputs here, so the chunk table only ever
//! sees canonical keys.

/// The root path.
pub const ROOT: &str = ".";

/// Normalizes a virtual path to its canonical form.
///
/// Strips leading slashes and `.` components, collapses repeated
/// separators, resolves `..` against the components seen so far, and
/// returns `"."` for anything that resolves to the root.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        ROOT.to_string()
    } else {
        parts.join("/")
    }
}

/// The parent of a normalized path; the root is its own parent.
pub fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => ROOT.to_string(),
    }
}
