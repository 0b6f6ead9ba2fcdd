//! HTML escaping for rendered values.
//!
//! The five markup-significant ASCII characters and the Latin-1 range
//! U+00A0..=U+00F7 map to named entities; anything above U+00FF becomes a
//! numeric character reference, except the Euro sign which keeps its
//! name. A second pass over already-escaped text re-escapes the
//! ampersands; no attempt is made to detect that.

/// Named entities for U+00A0 (`nbsp`) through U+00F7 (`divide`).
const LATIN1_NAMES: [&str; 88] = [
    "nbsp", "iexcl", "cent", "pound", "curren", "yen", "brvbar", "sect", "uml", "copy", "ordf",
    "laquo", "not", "shy", "reg", "macr", "deg", "plusmn", "sup2", "sup3", "acute", "micro",
    "para", "middot", "cedil", "sup1", "ordm", "raquo", "frac14", "frac12", "frac34", "iquest",
    "Agrave", "Aacute", "Acirc", "Atilde", "Auml", "Aring", "AElig", "Ccedil", "Egrave", "Eacute",
    "Ecirc", "Euml", "Igrave", "Iacute", "Icirc", "Iuml", "ETH", "Ntilde", "Ograve", "Oacute",
    "Ocirc", "Otilde", "Ouml", "times", "Oslash", "Ugrave", "Uacute", "Ucirc", "Uuml", "Yacute",
    "THORN", "szlig", "agrave", "aacute", "acirc", "atilde", "auml", "aring", "aelig", "ccedil",
    "egrave", "eacute", "ecirc", "euml", "igrave", "iacute", "icirc", "iuml", "eth", "ntilde",
    "ograve", "oacute", "ocirc", "otilde", "ouml", "divide",
];

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\u{20AC}' => out.push_str("&euro;"),
            '\u{A0}'..='\u{F7}' => {
                out.push('&');
                out.push_str(LATIN1_NAMES[ch as usize - 0xA0]);
                out.push(';');
            }
            c if (c as u32) > 0xFF => {
                out.push_str(&format!("&#{};", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// JSON string-body escaping (no surrounding quotes).
pub fn escape_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_alphanumerics_pass_through() {
        assert_eq!(escape_html("abcXYZ019"), "abcXYZ019");
    }

    #[test]
    fn markup_characters_are_named() {
        assert_eq!(escape_html("<b href=\"x\">&'"), "&lt;b href=&quot;x&quot;&gt;&amp;&apos;");
    }

    #[test]
    fn latin1_table_boundaries() {
        assert_eq!(escape_html("\u{A0}"), "&nbsp;");
        assert_eq!(escape_html("\u{F7}"), "&divide;");
        // past the curated table: copied through verbatim
        assert_eq!(escape_html("\u{F8}"), "\u{F8}");
        assert_eq!(escape_html("\u{FF}"), "\u{FF}");
    }

    #[test]
    fn high_code_points_are_numeric_except_euro() {
        assert_eq!(escape_html("\u{20AC}"), "&euro;");
        assert_eq!(escape_html("\u{0142}"), "&#322;");
        // astral plane re-encodes as the UTF-32 scalar
        assert_eq!(escape_html("\u{1F600}"), "&#128512;");
    }

    #[test]
    fn double_escape_is_not_detected() {
        assert_eq!(escape_html(escape_html("<").as_str()), "&amp;lt;");
    }

    #[test]
    fn json_escaping() {
        assert_eq!(escape_json("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
        assert_eq!(escape_json("\u{01}"), "\\u0001");
    }
}
