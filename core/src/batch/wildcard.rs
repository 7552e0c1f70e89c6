//! Replay name wildcard expansion

use std::path::Path;
use walkdir::WalkDir;

/// Whether `name` contains `*` or `?`.
pub fn has_wildcards(name: &str) -> bool {
    name.contains(['*', '?'])
}

/// Expand wildcard entries against `replay_dir`.
///
/// Only the last path component may hold wildcards; matches are listed from
/// that one directory, sorted, and returned relative to `replay_dir`. Names
/// without wildcards are passed through untouched.
pub fn resolve_wildcards(names: &[String], replay_dir: &Path) -> Vec<String> {
    let mut resolved = Vec::with_capacity(names.len());
    for name in names {
        if !has_wildcards(name) {
            resolved.push(name.clone());
            continue;
        }

        let (dir, pattern) = match name.rfind(['/', '\\']) {
            Some(index) => (&name[..=index], &name[index + 1..]),
            None => ("", name.as_str()),
        };

        let mut matches: Vec<String> = WalkDir::new(replay_dir.join(dir))
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_owned))
            .filter(|file| wildcard_match(pattern, file))
            .map(|file| format!("{dir}{file}"))
            .collect();
        matches.sort();

        if matches.is_empty() {
            tracing::warn!(pattern = %name, dir = %replay_dir.display(), "no replays match");
        }
        resolved.extend(matches);
    }
    resolved
}

/// Glob match supporting `*` (any run) and `?` (any one character).
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` and the text index it currently covers up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, covered)) => {
                    p = star + 1;
                    t = covered + 1;
                    backtrack = Some((star, covered + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*.rep", "game.rep"));
        assert!(wildcard_match("*.rep", ".rep"));
        assert!(wildcard_match("g?me.rep", "game.rep"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(wildcard_match("a*b*c", "abbbc"));
        assert!(!wildcard_match("*.rep", "game.rep.bak"));
        assert!(!wildcard_match("g?me.rep", "gme.rep"));
        assert!(!wildcard_match("a*b*c", "aXXbYY"));
        assert!(wildcard_match("exact", "exact"));
    }

    #[test]
    fn test_resolve_in_replay_dir() {
        let dir = TempDir::new().unwrap();
        for name in ["b.rep", "a.rep", "c.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("nested.rep")).unwrap();

        let names = vec!["first.rep".to_string(), "*.rep".to_string()];
        assert_eq!(
            resolve_wildcards(&names, dir.path()),
            vec!["first.rep", "a.rep", "b.rep"]
        );
    }

    #[test]
    fn test_resolve_subdirectory() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("ladder")).unwrap();
        for name in ["m01.rep", "m02.rep", "m10.rep"] {
            fs::write(dir.path().join("ladder").join(name), b"").unwrap();
        }

        let names = vec!["ladder/m0?.rep".to_string()];
        assert_eq!(
            resolve_wildcards(&names, dir.path()),
            vec!["ladder/m01.rep", "ladder/m02.rep"]
        );
    }

    #[test]
    fn test_no_match_resolves_to_nothing() {
        let dir = TempDir::new().unwrap();
        let names = vec!["missing/*.rep".to_string()];
        assert!(resolve_wildcards(&names, dir.path()).is_empty());
    }
}
