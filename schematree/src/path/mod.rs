//! Path addressing: schema paths (pure collection ids) and document paths
//! (collection ids interleaved with document ids).

/// Split a `/`-separated path into trimmed, non-empty segments.
///
/// Leading, trailing, and repeated separators collapse, and whitespace
/// around each segment is dropped: `" /foo//bar/ "` yields `["foo", "bar"]`.
pub fn normalize(input: &str) -> Vec<String> {
    input
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalize a path for collection creation: ids are stored lowercase.
pub fn normalize_lowercase(input: &str) -> Vec<String> {
    normalize(&input.to_lowercase())
}

/// Translate a document path (`foo/1/bar/3/baz`) into its schema path
/// (`["foo", "bar", "baz"]`) by dropping every odd-indexed segment.
pub fn schema_path_from_document_path(input: &str) -> Vec<String> {
    normalize(input)
        .into_iter()
        .enumerate()
        .filter(|(i, _)| i % 2 == 0)
        .map(|(_, segment)| segment)
        .collect()
}

/// Join segments into their `/`-separated path string
pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    let mut path = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            path.push('/');
        }
        path.push_str(segment.as_ref());
    }
    path
}

/// Path of the parent of `path`, `None` for a root path
pub fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}
