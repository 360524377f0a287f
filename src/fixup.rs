//! String classification and repair for URL-shaped input.
//!
//! The address bar receives free-form text that may be a URL, an origin, a
//! keyword search, or garbage. These helpers decide which, strip display
//! prefixes, and repair common scheme typos before the heuristic cascade
//! commits to a match.

use url::Url;

/// Splits a scheme prefix ("scheme:" plus "//" when present) from a string.
/// Returns `("", input)` when the input does not start with a scheme, or when
/// the character right after the prefix is a space (then it is likely a
/// keyword search such as "mailto: hello").
pub fn split_prefix(input: &str) -> (&str, &str) {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    if i == 0 || i >= bytes.len() || bytes[i] != b':' {
        return ("", input);
    }
    let mut end = i + 1;
    if input[end..].starts_with("//") {
        end += 2;
    }
    if end < input.len() && bytes[end] == b' ' {
        return ("", input);
    }
    (&input[..end], &input[end..])
}

/// Strips "http://", a trailing "?" and optionally the trailing slash from a
/// spec. Used both for display and to build dedup keys, so two spellings of
/// the same page compare equal.
pub fn strip_http_and_trim(spec: &str, trim_slash: bool) -> String {
    let mut s = spec.strip_prefix("http://").unwrap_or(spec);
    s = s.strip_suffix('?').unwrap_or(s);
    if trim_slash {
        s = s.strip_suffix('/').unwrap_or(s);
    }
    s.to_string()
}

/// Whether a string is a single word that looks like a URL. With
/// `ignore_alphanumeric_hosts` only strings with at least three dotted parts
/// qualify on the dot criterion, so plain hostnames don't count.
pub fn looks_like_url(s: &str, ignore_alphanumeric_hosts: bool) -> bool {
    if s.chars().any(|c| c.is_whitespace()) {
        return false;
    }
    if ['/', '@', ':', '['].iter().any(|c| s.contains(*c)) {
        return true;
    }
    if ignore_alphanumeric_hosts {
        s.split('.').count() >= 4
    } else {
        s.contains('.')
    }
}

/// Whether a string could be an origin: a single word with no path, query or
/// fragment delimiters.
pub fn looks_like_origin(s: &str) -> bool {
    !s.is_empty()
        && !s
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '?' || c == '#')
}

/// Single-word hostname check, used to whitelist hosts before fetching
/// search suggestions.
pub fn is_single_word_host(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Reversed-host form used by the places schema ("moc.elpmaxe." for
/// "example.com").
pub fn reverse_host(host: &str) -> String {
    let mut rev: String = host.chars().rev().collect();
    rev.push('.');
    rev
}

/// Percent-decodes a string for display when the result is valid UTF-8,
/// otherwise returns the input unchanged.
pub fn unescape_for_display(s: &str) -> String {
    if !s.contains('%') {
        return s.to_string();
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        // Both hex digits must be ASCII before slicing, or a multibyte
        // character after the percent sign lands mid-char.
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            if let Ok(b) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    match String::from_utf8(out) {
        Ok(decoded) => decoded,
        Err(_) => s.to_string(),
    }
}

/// Percent-encodes a string for use as a query component in a keyword URL.
pub fn encode_query_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Outcome of trying to turn raw input into something navigable.
#[derive(Debug, Clone, PartialEq)]
pub struct FixupInfo {
    /// The repaired URL, when one could be built.
    pub fixed_uri: Option<Url>,
    /// Whether the input would be handed to a search engine as a keyword
    /// query instead of being navigated to.
    pub keyword_as_sent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixupError;

const SCHEME_TYPOS: &[(&str, &str)] = &[
    ("ttp", "http"),
    ("htp", "http"),
    ("ttps", "https"),
    ("tps", "https"),
    ("ps", "https"),
    ("htps", "https"),
    ("ile", "file"),
    ("le", "file"),
];

/// Schemes for which a URL without a host is useless to us.
pub fn scheme_expects_host(scheme: &str) -> bool {
    matches!(scheme, "http" | "https" | "ftp")
}

fn repair_scheme(scheme: &str) -> &str {
    for (typo, fixed) in SCHEME_TYPOS {
        if scheme.eq_ignore_ascii_case(typo) {
            return fixed;
        }
    }
    scheme
}

/// Attempts to repair free-form input into a URL, mirroring the platform URI
/// fixup service. Scheme typos like "ttps://" are corrected when
/// `fix_scheme_typos` is set. When `allow_keyword_lookup` is set and keyword
/// searching is enabled, input that does not plausibly name a host is
/// classified as a keyword query instead of being forced into a URL.
pub fn fixup_uri_info(
    input: &str,
    fix_scheme_typos: bool,
    allow_keyword_lookup: bool,
    keyword_enabled: bool,
) -> Result<FixupInfo, FixupError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(FixupError);
    }

    let (prefix, remainder) = split_prefix(trimmed);
    if !prefix.is_empty() {
        let scheme_end = prefix.find(':').unwrap_or(prefix.len());
        let scheme = &prefix[..scheme_end];
        let fixed_scheme = if fix_scheme_typos {
            repair_scheme(scheme)
        } else {
            scheme
        };
        let rebuilt = format!("{}:{}{}", fixed_scheme, &prefix[scheme_end + 1..], remainder);
        // A scheme with no authority slashes and no host-like remainder is
        // not parseable as an absolute URL.
        return match Url::parse(&rebuilt) {
            Ok(url) => Ok(FixupInfo { fixed_uri: Some(url), keyword_as_sent: false }),
            Err(_) => Err(FixupError),
        };
    }

    let host_like = !trimmed.chars().any(|c| c.is_whitespace())
        && (trimmed.contains('.') || trimmed.contains(':') || trimmed.contains('/'));
    if allow_keyword_lookup && keyword_enabled && !host_like {
        return Ok(FixupInfo { fixed_uri: None, keyword_as_sent: true });
    }
    if !host_like {
        // Spaces make this unusable as a URL, and keyword search is off.
        if trimmed.chars().any(|c| c.is_whitespace()) {
            return Err(FixupError);
        }
    }

    match Url::parse(&format!("http://{}", trimmed)) {
        Ok(url) => Ok(FixupInfo { fixed_uri: Some(url), keyword_as_sent: false }),
        Err(_) => Err(FixupError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_prefix_scheme_with_slashes() {
        assert_eq!(split_prefix("http://example.com"), ("http://", "example.com"));
        assert_eq!(split_prefix("ftp://host"), ("ftp://", "host"));
    }

    #[test]
    fn test_split_prefix_scheme_without_slashes() {
        assert_eq!(split_prefix("mailto:foo@bar.com"), ("mailto:", "foo@bar.com"));
    }

    #[test]
    fn test_split_prefix_not_a_url() {
        assert_eq!(split_prefix("hello world"), ("", "hello world"));
        assert_eq!(split_prefix("example.com"), ("", "example.com"));
        // A space right after the colon means keyword search, not URL.
        assert_eq!(split_prefix("mailto: hello"), ("", "mailto: hello"));
    }

    #[test]
    fn test_strip_http_and_trim() {
        assert_eq!(strip_http_and_trim("http://example.com/", true), "example.com");
        assert_eq!(strip_http_and_trim("http://example.com/", false), "example.com/");
        assert_eq!(strip_http_and_trim("https://example.com/", true), "https://example.com");
        assert_eq!(strip_http_and_trim("http://example.com/?", true), "example.com");
    }

    #[test]
    fn test_looks_like_url() {
        assert!(looks_like_url("example.com", false));
        assert!(looks_like_url("example.com/path", false));
        assert!(looks_like_url("user@host", false));
        assert!(looks_like_url("host:8080", false));
        assert!(!looks_like_url("two words", false));
        assert!(!looks_like_url("noseparators", false));
        // Alphanumeric host exemption: needs >= 4 dotted parts.
        assert!(!looks_like_url("example.com", true));
        assert!(looks_like_url("a.b.c.d", true));
    }

    #[test]
    fn test_looks_like_origin() {
        assert!(looks_like_origin("example.com"));
        assert!(looks_like_origin("example.com:8080"));
        assert!(!looks_like_origin("example.com/path"));
        assert!(!looks_like_origin("has space"));
        assert!(!looks_like_origin("query?x"));
        assert!(!looks_like_origin(""));
    }

    #[test]
    fn test_reverse_host() {
        assert_eq!(reverse_host("example.com"), "moc.elpmaxe.");
    }

    #[test]
    fn test_unescape_for_display() {
        assert_eq!(unescape_for_display("caff%C3%A8"), "caffè");
        assert_eq!(unescape_for_display("plain"), "plain");
        // Invalid UTF-8 after decoding leaves the input untouched.
        assert_eq!(unescape_for_display("%FF%FE"), "%FF%FE");
    }

    #[test]
    fn test_unescape_percent_before_multibyte_char() {
        // A percent sign directly followed by a multibyte character must
        // pass through rather than panic on a mid-char slice.
        assert_eq!(unescape_for_display("%€"), "%€");
        assert_eq!(unescape_for_display("50%€ off"), "50%€ off");
        assert_eq!(unescape_for_display("%e€"), "%e€");
    }

    #[test]
    fn test_fixup_scheme_typos() {
        let info = fixup_uri_info("ttps://example.com", true, true, true).unwrap();
        assert_eq!(info.fixed_uri.unwrap().as_str(), "https://example.com/");
        let info = fixup_uri_info("ttp://example.com", true, true, true).unwrap();
        assert_eq!(info.fixed_uri.unwrap().scheme(), "http");
    }

    #[test]
    fn test_fixup_keyword_lookup() {
        let info = fixup_uri_info("coffee near me", true, true, true).unwrap();
        assert!(info.keyword_as_sent);
        assert!(info.fixed_uri.is_none());
    }

    #[test]
    fn test_fixup_keyword_disabled_spaces_is_malformed() {
        assert_eq!(
            fixup_uri_info("coffee near me", true, true, false),
            Err(FixupError)
        );
    }

    #[test]
    fn test_fixup_bare_host_gets_scheme() {
        let info = fixup_uri_info("example.com/foo", true, true, true).unwrap();
        assert!(!info.keyword_as_sent);
        assert_eq!(info.fixed_uri.unwrap().as_str(), "http://example.com/foo");
    }

    #[test]
    fn test_fixup_single_word_without_keyword_lookup() {
        // A dotless single word with keywords off still becomes a host guess.
        let info = fixup_uri_info("localhost", true, false, false).unwrap();
        assert_eq!(info.fixed_uri.unwrap().as_str(), "http://localhost/");
    }

    #[test]
    fn test_encode_query_component() {
        assert_eq!(encode_query_component("caffè latte"), "caff%C3%A8+latte");
        assert_eq!(encode_query_component("plain-text_1.2~"), "plain-text_1.2~");
    }
}
