/// Parses a stat cell into a number.
///
/// Percent signs, thousands separators and surrounding whitespace are dropped;
/// the decimal point is always `.`. Anything that still fails to parse (dashes,
/// `N/A`, stray text) becomes `None` so a bad cell never sinks its row.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, '%' | ',' | '\u{a0}') && !ch.is_whitespace())
        .collect();
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    if cleaned.is_empty() || cleaned.chars().all(|ch| ch == '-') {
        return None;
    }
    // Leading-dot rates like ".312" are common in batting tables.
    let value = if let Some(rest) = cleaned.strip_prefix("-.") {
        format!("-0.{rest}").parse::<f64>().ok()?
    } else if cleaned.starts_with('.') {
        format!("0{cleaned}").parse::<f64>().ok()?
    } else {
        cleaned.parse::<f64>().ok()?
    };
    value.is_finite().then_some(value)
}

/// Decodes entities, collapses whitespace runs to one space and trims.
pub fn clean_text(raw: &str) -> String {
    let decoded = decode_entities(raw);
    let mut out = String::with_capacity(decoded.len());
    let mut prev_space = true;
    for ch in decoded.chars() {
        if ch.is_whitespace() || ch == '\u{a0}' {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        // Entity names we care about are short; anything longer is literal text.
        let semi = tail
            .char_indices()
            .take(12)
            .find(|(_, ch)| *ch == ';')
            .map(|(idx, _)| idx);
        let decoded = semi.and_then(|end| decode_entity(&tail[1..end]).map(|ch| (ch, end)));
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        _ => return None,
    };
    Some(ch)
}

#[cfg(test)]
mod tests {
    use super::{clean_text, parse_number};

    #[test]
    fn parse_number_strips_separators_and_percent() {
        assert_eq!(parse_number("5,000"), Some(5000.0));
        assert_eq!(parse_number(" 45.2% "), Some(45.2));
        assert_eq!(parse_number(".312"), Some(0.312));
        assert_eq!(parse_number("-.5"), Some(-0.5));
        assert_eq!(parse_number("+3"), Some(3.0));
    }

    #[test]
    fn parse_number_degrades_to_none() {
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("--"), None);
        assert_eq!(parse_number("N/A"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn clean_text_decodes_and_collapses() {
        assert_eq!(clean_text("  St.&nbsp;Louis \n Cardinals "), "St. Louis Cardinals");
        assert_eq!(clean_text("A&amp;M &#38; &#x41;"), "A&M & A");
        assert_eq!(clean_text("R&D; & co"), "R&D; & co");
    }
}
