use super::inline::normalize_inline_text;

pub(crate) fn image_label_text(attrs: &kuchiki::Attributes) -> Option<String> {
    let label = attrs
        .get("alt")
        .or_else(|| attrs.get("title"))
        .or_else(|| attrs.get("aria-label"));
    label
        .map(normalize_inline_text)
        .filter(|label| !label.is_empty())
}

pub(crate) fn image_dimensions(attrs: &kuchiki::Attributes) -> (Option<u32>, Option<u32>) {
    (
        parse_dimension(attrs.get("width")),
        parse_dimension(attrs.get("height")),
    )
}

pub(crate) fn image_src(attrs: &kuchiki::Attributes) -> Option<String> {
    let raw = attrs
        .get("src")
        .or_else(|| attrs.get("xlink:href"))
        .or_else(|| attrs.get("data-src"))?;
    let mut s = raw.trim().to_string();
    if let Some(pos) = s.find(['#', '?']) {
        s.truncate(pos);
    }
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Leading digits of an attribute such as `"320"` or `"320px"`; zero is unknown.
fn parse_dimension(value: Option<&str>) -> Option<u32> {
    let digits: String = value?
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u32>().ok().filter(|v| *v > 0)
}
