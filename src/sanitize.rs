//! Text clean-up applied before user-provided strings reach moderator messages.

use std::net::IpAddr;

const FRENCH_LETTERS: &str = "àâäéèêëïîôùûüÿçÀÂÄÉÈÊËÏÎÔÙÛÜŸÇ";

/// HTML-escapes free text. Edges are trimmed, control characters other than
/// newline and tab are dropped, inner whitespace is kept as typed.
pub fn sanitize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.trim().chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            '\n' | '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Keeps ASCII letters and digits, French accented letters, space, hyphen and
/// underscore. Runs of whitespace collapse to one space.
pub fn sanitize_username(input: &str) -> String {
    let kept: String = input
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|&c| {
            c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_') || FRENCH_LETTERS.contains(c)
        })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns the trimmed address when it parses as IPv4 or IPv6.
pub fn sanitize_ip(input: &str) -> Option<String> {
    let trimmed = input.trim();
    trimmed.parse::<IpAddr>().ok().map(|_| trimmed.to_owned())
}

/// Trims and lowercases a contact address. Rejects anything that is not a
/// single `local@domain.tld` without spaces or markup characters.
pub fn sanitize_email(input: &str) -> Option<String> {
    let email = input.trim().to_lowercase();
    if email.len() > 254 {
        return None;
    }
    let (local, domain) = email.split_once('@')?;
    let allowed = |c: char| c.is_ascii_alphanumeric() || "._%+-".contains(c);
    let local_ok = !local.is_empty() && local.len() <= 64 && local.chars().all(allowed);
    let domain_ok = domain.contains('.')
        && domain
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    (local_ok && domain_ok).then_some(email)
}

/// Cuts `text` to at most `max` characters.
pub fn excerpt(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_is_escaped_and_whitespace_kept() {
        assert_eq!(
            sanitize_text("  <b>Générique</b>  à  01:52  "),
            "&lt;b&gt;Générique&lt;&#x2F;b&gt;  à  01:52"
        );
        assert_eq!(sanitize_text("line one\nline\ttwo"), "line one\nline\ttwo");
        assert_eq!(sanitize_text("a\0b\u{7}c"), "abc");
        assert_eq!(sanitize_text("l'équipe"), "l&#x27;équipe");
    }

    #[test]
    fn test_username_whitelist() {
        assert_eq!(sanitize_username("  Zoé_du-35 "), "Zoé_du-35");
        assert_eq!(sanitize_username("<script>alert(1)</script>"), "scriptalert1script");
        assert_eq!(sanitize_username("jean   \t claude"), "jean claude");
        assert_eq!(sanitize_username("François 🎬"), "François");
    }

    #[test]
    fn test_ip_validation() {
        assert_eq!(sanitize_ip(" 192.168.1.10 ").as_deref(), Some("192.168.1.10"));
        assert_eq!(sanitize_ip("2001:db8::1").as_deref(), Some("2001:db8::1"));
        assert_eq!(sanitize_ip("999.1.1.1"), None);
        assert_eq!(sanitize_ip("'; DROP TABLE"), None);
    }

    #[test]
    fn test_email_validation() {
        assert_eq!(sanitize_email(" Zoe.M+cine@Example.FR ").as_deref(), Some("zoe.m+cine@example.fr"));
        assert_eq!(sanitize_email("no-at-sign.fr"), None);
        assert_eq!(sanitize_email("a@b@c.fr"), None);
        assert_eq!(sanitize_email("a@localhost"), None);
        assert_eq!(sanitize_email("a@example..fr"), None);
        assert_eq!(sanitize_email("<script>@x.fr"), None);
        assert_eq!(sanitize_email("a b@x.fr"), None);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("éééé", 2), "éé");
        assert_eq!(excerpt("short", 500), "short");
    }
}
