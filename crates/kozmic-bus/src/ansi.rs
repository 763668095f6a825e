//! ANSI escape sequence to HTML translation.
//!
//! Stateless per line: identical input yields identical output. Recognized
//! SGR codes open `<span class="ansi<code>">` elements; resets close them.
//! A selective reset (24/39/49) closes every span from the most recent one
//! of its kind upward, which keeps the markup well-formed. All other escape
//! sequences are dropped silently and HTML-dangerous characters are
//! entity-escaped.

/// Translate one log line (without trailing newline) into marked-up HTML.
pub fn ansi_to_html(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut open: Vec<u16> = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    let mut params = String::new();
                    let mut final_byte = None;
                    while let Some(&p) = chars.peek() {
                        chars.next();
                        if ('\x40'..='\x7e').contains(&p) {
                            final_byte = Some(p);
                            break;
                        }
                        params.push(p);
                    }
                    if final_byte == Some('m') {
                        apply_sgr(&params, &mut open, &mut out);
                    }
                }
                // Non-CSI escapes: drop the next byte, plus one more when
                // it is an intermediate (e.g. charset selection ESC ( B).
                Some(&n) => {
                    chars.next();
                    if ('\x20'..='\x2f').contains(&n) {
                        chars.next();
                    }
                }
                None => {}
            }
        } else {
            escape_into(c, &mut out);
        }
    }

    for _ in &open {
        out.push_str("</span>");
    }
    out
}

fn apply_sgr(params: &str, open: &mut Vec<u16>, out: &mut String) {
    for param in params.split(';') {
        // An empty parameter means 0 (ESC[m is a full reset).
        let code: u16 = param.parse().unwrap_or(0);
        match code {
            0 => close_from(0, open, out),
            1 | 4 | 30..=37 | 40..=47 | 90..=97 => {
                out.push_str(&format!("<span class=\"ansi{code}\">"));
                open.push(code);
            }
            24 => close_kind(open, out, |c| c == 4),
            39 => close_kind(open, out, |c| matches!(c, 30..=37 | 90..=97)),
            49 => close_kind(open, out, |c| matches!(c, 40..=47)),
            _ => {}
        }
    }
}

fn close_kind(open: &mut Vec<u16>, out: &mut String, kind: impl Fn(u16) -> bool) {
    if let Some(pos) = open.iter().rposition(|&c| kind(c)) {
        close_from(pos, open, out);
    }
}

fn close_from(pos: usize, open: &mut Vec<u16>, out: &mut String) {
    for _ in pos..open.len() {
        out.push_str("</span>");
    }
    open.truncate(pos);
}

fn escape_into(c: char, out: &mut String) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        '\'' => out.push_str("&#x27;"),
        _ => out.push(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(ansi_to_html("plain text"), "plain text");
        assert_eq!(ansi_to_html(""), "");
    }

    #[test]
    fn translation_is_deterministic() {
        let line = "\x1b[1mbold\x1b[0m and \x1b[32mgreen\x1b[0m";
        assert_eq!(ansi_to_html(line), ansi_to_html(line));
    }

    #[test]
    fn sgr_codes_become_spans() {
        assert_eq!(
            ansi_to_html("\x1b[1mhi\x1b[0m"),
            "<span class=\"ansi1\">hi</span>"
        );
        assert_eq!(
            ansi_to_html("\x1b[32mok\x1b[0m rest"),
            "<span class=\"ansi32\">ok</span> rest"
        );
        assert_eq!(
            ansi_to_html("\x1b[41mbg\x1b[49m."),
            "<span class=\"ansi41\">bg</span>."
        );
        assert_eq!(
            ansi_to_html("\x1b[97mbright\x1b[39m"),
            "<span class=\"ansi97\">bright</span>"
        );
    }

    #[test]
    fn compound_parameters_open_nested_spans() {
        assert_eq!(
            ansi_to_html("\x1b[1;4mx\x1b[0m"),
            "<span class=\"ansi1\"><span class=\"ansi4\">x</span></span>"
        );
    }

    #[test]
    fn unclosed_spans_are_closed_at_end_of_line() {
        assert_eq!(
            ansi_to_html("\x1b[31mred forever"),
            "<span class=\"ansi31\">red forever</span>"
        );
    }

    #[test]
    fn selective_underline_reset() {
        assert_eq!(
            ansi_to_html("\x1b[4mu\x1b[24mplain"),
            "<span class=\"ansi4\">u</span>plain"
        );
    }

    #[test]
    fn unknown_sequences_are_dropped() {
        // Cursor movement and erase sequences carry no markup.
        assert_eq!(ansi_to_html("a\x1b[2Jb"), "ab");
        assert_eq!(ansi_to_html("a\x1b[10;20Hb"), "ab");
        // Unknown SGR parameters are elided, known ones kept.
        assert_eq!(
            ansi_to_html("\x1b[3;31mx\x1b[0m"),
            "<span class=\"ansi31\">x</span>"
        );
        // A charset-selection escape disappears entirely.
        assert_eq!(ansi_to_html("a\x1b(Bb"), "ab");
    }

    #[test]
    fn html_is_entity_escaped() {
        assert_eq!(
            ansi_to_html("<script>&\"'"),
            "&lt;script&gt;&amp;&quot;&#x27;"
        );
    }

    #[test]
    fn translating_translated_plain_output_is_a_noop() {
        let once = ansi_to_html("just a line with no markup");
        assert_eq!(ansi_to_html(&once), once);
    }
}
