use once_cell::sync::Lazy;
use regex::Regex;

/// Sentences at or below this many characters are dropped by [`summarize`].
/// Feeds often repeat the title or a dateline as a short leading fragment.
pub const MIN_SENTENCE_CHARS: usize = 20;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>]*>").expect("valid tag regex"));

static NUMERIC_ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("valid entity regex"));

/// Strip markup tags and collapse whitespace runs into single spaces.
///
/// Tags are removed repeatedly until none remain, so fragments such as
/// `<<b>b>` do not reassemble into a new tag. The result is idempotent.
pub fn normalize(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut text = raw.to_string();
    while TAG_RE.is_match(&text) {
        text = TAG_RE.replace_all(&text, " ").into_owned();
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build a summary of at most `max_length` characters out of whole sentences.
///
/// The first sentence that survives the length filter is always kept, even
/// when it alone exceeds `max_length`.
pub fn summarize(raw: &str, max_length: usize) -> String {
    let text = normalize(raw);
    let mut summary = String::new();
    let mut length = 0;

    for sentence in text.split(['.', '!', '?']) {
        let sentence = sentence.trim();
        let chars = sentence.chars().count();
        if chars <= MIN_SENTENCE_CHARS {
            continue;
        }

        let separator = usize::from(!summary.is_empty());
        let added = separator + chars + 1;
        if !summary.is_empty() && length + added > max_length {
            break;
        }

        if separator == 1 {
            summary.push(' ');
        }
        summary.push_str(sentence);
        summary.push('.');
        length += added;
    }

    summary
}

/// Description policy for articles: short text is kept as-is, long text is
/// summarized, and text made only of short fragments is truncated.
pub fn bounded_description(raw: &str, max_length: usize) -> String {
    let text = normalize(raw);
    if text.chars().count() <= max_length {
        return text;
    }

    let summary = summarize(&text, max_length);
    if !summary.is_empty() {
        return summary;
    }

    let mut truncated: String = text.chars().take(max_length).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push_str("...");
    truncated
}

/// Decode XML entities in text taken straight from raw feed markup.
pub fn decode_entities(raw: &str) -> String {
    let numeric = NUMERIC_ENTITY_RE.replace_all(raw, |caps: &regex::Captures| {
        let code = &caps[1];
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    numeric
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
