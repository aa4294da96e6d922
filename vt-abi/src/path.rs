//! Namespace and registry path utilities.
//!
//! Kernel object paths are backslash-separated, case-sensitive, and rooted
//! at `\` (for example `\Device\vtty0`). Registry paths are rooted at the
//! `@VT` hive (for example `@VT\DEV\tty`).

/// Check whether an object path is in canonical form.
///
/// A canonical object path:
/// - starts with `\`
/// - has no empty components (no `\\`)
/// - does not end with `\` (unless it is exactly `\`)
pub fn is_canonical(path: &str) -> bool {
    let bytes = path.as_bytes();

    if bytes.first() != Some(&b'\\') {
        return false;
    }

    // Root path is canonical.
    if bytes.len() == 1 {
        return true;
    }

    if bytes.last() == Some(&b'\\') {
        return false;
    }

    let mut i = 1; // skip leading backslash
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i] != b'\\' {
            i += 1;
        }
        if start == i {
            // Empty component means a doubled separator.
            return false;
        }
        i += 1;
    }

    true
}

/// Iterate the components of a canonical object path.
///
/// `\Device\vtty0` yields `"Device"`, `"vtty0"`. The root path yields
/// nothing.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.strip_prefix('\\')
        .unwrap_or(path)
        .split('\\')
        .filter(|c| !c.is_empty())
}

/// Split a canonical path into `(parent, leaf)`.
///
/// Returns `None` for the root path.
pub fn split_leaf(path: &str) -> Option<(&str, &str)> {
    if path == "\\" {
        return None;
    }
    let idx = path.rfind('\\')?;
    let leaf = &path[idx + 1..];
    if leaf.is_empty() {
        return None;
    }
    let parent = if idx == 0 { "\\" } else { &path[..idx] };
    Some((parent, leaf))
}

/// Join a canonical directory path and a single component.
pub fn join(dir: &str, leaf: &str) -> String {
    if dir == "\\" {
        format!("\\{leaf}")
    } else {
        format!("{dir}\\{leaf}")
    }
}

/// The registry hive prefix.
pub const REGISTRY_ROOT: &str = "@VT";

/// Parse a registry path into its key components.
///
/// `@VT\DEV\tty` yields `["DEV", "tty"]`. Returns `None` when the path is
/// not rooted at `@VT` or contains empty components.
pub fn registry_components(path: &str) -> Option<Vec<&str>> {
    let rest = path.strip_prefix(REGISTRY_ROOT)?;
    if rest.is_empty() {
        return Some(Vec::new());
    }
    let rest = rest.strip_prefix('\\')?;
    if rest.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    for part in rest.split('\\') {
        if part.is_empty() {
            return None;
        }
        parts.push(part);
    }
    Some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_paths() {
        assert!(is_canonical("\\"));
        assert!(is_canonical("\\Device"));
        assert!(is_canonical("\\Device\\vtty0"));
        assert!(!is_canonical("Device"));
        assert!(!is_canonical("\\Device\\"));
        assert!(!is_canonical("\\Device\\\\vtty0"));
        assert!(!is_canonical(""));
    }

    #[test]
    fn component_iteration() {
        let parts: Vec<&str> = components("\\Device\\vtty0").collect();
        assert_eq!(parts, vec!["Device", "vtty0"]);
        assert_eq!(components("\\").count(), 0);
    }

    #[test]
    fn split_and_join() {
        assert_eq!(split_leaf("\\Device\\vtty0"), Some(("\\Device", "vtty0")));
        assert_eq!(split_leaf("\\Device"), Some(("\\", "Device")));
        assert_eq!(split_leaf("\\"), None);
        assert_eq!(join("\\", "Device"), "\\Device");
        assert_eq!(join("\\Device", "vtty0"), "\\Device\\vtty0");
    }

    #[test]
    fn registry_paths() {
        assert_eq!(
            registry_components("@VT\\DEV\\tty"),
            Some(vec!["DEV", "tty"])
        );
        assert_eq!(registry_components("@VT"), Some(vec![]));
        assert_eq!(registry_components("@VT\\"), None);
        assert_eq!(registry_components("@VT\\A\\\\B"), None);
        assert_eq!(registry_components("\\Device"), None);
    }

    #[test]
    fn paths_are_case_sensitive() {
        // Case matters: these are different keys and the helpers must not
        // normalise them.
        let a: Vec<&str> = components("\\Device\\TTY").collect();
        let b: Vec<&str> = components("\\Device\\tty").collect();
        assert_ne!(a, b);
    }
}
