//! Public/protected path classification.
//!
//! [`PathClassifier::requires_auth`] is evaluated in order, first match wins:
//!
//! 1. the path is normalized with [`normalize_path`]: percent-decoded per
//!    segment, dot segments resolved, lowercased
//! 2. the exact root `/` and any always-public prefix are public for every method
//! 3. a `GET` matching one of the public read patterns is public
//! 4. everything else requires an identity
//!
//! Read patterns are matched segment by segment. `{name}` captures exactly one
//! non-empty segment, and [`PathPattern::excluding`] rejects specific values
//! for it, so `/user/userprofile/{id}` can be public while
//! `/user/userprofile/me` stays protected.

use http::Method;

/// Prefixes that are public for every method.
pub const DEFAULT_PUBLIC_PREFIXES: &[&str] = &["/auth/", "/gateway/", "/health", "/swagger", "/alive"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

/// A structured path template such as `/post/{id}/comments`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    template: String,
    segments: Vec<Segment>,
    excluded: Vec<String>,
}

impl PathPattern {
    /// Parses a template. Segments written as `{name}` match any single
    /// non-empty segment; everything else matches literally.
    pub fn new(template: &str) -> Self {
        let template = template.to_ascii_lowercase();
        let segments = split(&template)
            .map(|segment| {
                if segment.starts_with('{') && segment.ends_with('}') {
                    Segment::Param
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();

        Self {
            template,
            segments,
            excluded: Vec::new(),
        }
    }

    /// Rejects the given values in parameter segments.
    #[must_use]
    pub fn excluding(mut self, values: &[&str]) -> Self {
        self.excluded
            .extend(values.iter().map(|v| v.to_ascii_lowercase()));
        self
    }

    /// The template this pattern was built from.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Matches a raw request path.
    pub fn matches(&self, path: &str) -> bool {
        self.matches_normalized(&normalize_path(path))
    }

    fn matches_normalized(&self, path: &str) -> bool {
        let mut actual = split(path);
        for expected in &self.segments {
            let Some(segment) = actual.next() else {
                return false;
            };
            match expected {
                Segment::Literal(literal) if literal != segment => return false,
                Segment::Param if self.excluded.iter().any(|e| e == segment) => return false,
                _ => {}
            }
        }
        actual.next().is_none()
    }
}

/// Rewrites a request path into the form downstream servers route on.
///
/// Each segment is percent-decoded and lowercased. A decoded `/` is written
/// back as `%2f` so it never introduces a segment boundary. `.` segments are
/// dropped and `..` removes the segment before it. A trailing slash is kept.
///
/// ```
/// use vibes_core::classifier::normalize_path;
///
/// assert_eq!(normalize_path("/Post/%66eed"), "/post/feed");
/// assert_eq!(normalize_path("/auth/../user/a%2Fb/"), "/user/a%2fb/");
/// ```
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<String> = Vec::new();
    for raw in path.split('/') {
        let segment = urlencoding::decode(raw)
            .map_or_else(|_| raw.to_string(), |decoded| decoded.replace('/', "%2F"))
            .to_ascii_lowercase();
        match segment.as_str() {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    let mut normalized = String::with_capacity(path.len());
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() || path.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty())
}

/// The read-only endpoints downstream services expose without a token.
pub fn default_public_reads() -> Vec<PathPattern> {
    vec![
        PathPattern::new("/user/userprofile/{userId}").excluding(&["me"]),
        PathPattern::new("/user/follow/{userId}/stats"),
        PathPattern::new("/user/follow/{userId}/followers"),
        PathPattern::new("/user/follow/{userId}/following"),
        PathPattern::new("/post/{postId}").excluding(&["feed", "media", "user", "hashtag", "comment"]),
        PathPattern::new("/post/user/{userId}"),
        PathPattern::new("/post/{postId}/comments"),
        PathPattern::new("/post/comment/{commentId}/replies"),
        PathPattern::new("/post/hashtag/trending"),
        PathPattern::new("/post/hashtag/search"),
        PathPattern::new("/post/hashtag/{name}/posts"),
    ]
}

/// Decides whether a request needs an authenticated identity.
///
/// Rules are static and immutable after construction.
#[derive(Debug, Clone)]
pub struct PathClassifier {
    public_prefixes: Vec<String>,
    public_reads: Vec<PathPattern>,
}

impl Default for PathClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLIC_PREFIXES.iter().copied())
    }
}

impl PathClassifier {
    /// Creates a classifier with the given public prefixes and the default
    /// read patterns.
    pub fn new<I, S>(public_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            public_prefixes: public_prefixes
                .into_iter()
                .map(|p| p.as_ref().to_ascii_lowercase())
                .collect(),
            public_reads: default_public_reads(),
        }
    }

    /// Replaces the GET-only public patterns.
    #[must_use]
    pub fn with_public_reads(mut self, patterns: Vec<PathPattern>) -> Self {
        self.public_reads = patterns;
        self
    }

    /// Always-public prefixes.
    pub fn public_prefixes(&self) -> &[String] {
        &self.public_prefixes
    }

    /// GET-only public patterns.
    pub fn public_reads(&self) -> &[PathPattern] {
        &self.public_reads
    }

    /// Returns `true` when the request must carry a valid identity.
    pub fn requires_auth(&self, method: &Method, path: &str) -> bool {
        let path = normalize_path(path);

        if path == "/" {
            return false;
        }
        if self.public_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return false;
        }
        if *method == Method::GET && self.public_reads.iter().any(|p| p.matches_normalized(&path)) {
            return false;
        }

        true
    }
}
