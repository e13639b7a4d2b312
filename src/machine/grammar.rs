//! HTTP/1.x の行レベル文法
//!
//! リクエストライン / ステータスライン / ヘッダー行 / チャンクサイズ行の
//! 解釈を担当する。行の切り出し (CRLF 検出) は呼び出し側の責務。

use crate::buffer::latin1_string;

/// RFC 9110 の tchar
pub(crate) fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~'
        | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

/// フィールド内容として許すバイト (HTAB または非制御文字)
fn is_field_byte(b: u8) -> bool {
    b == b'\t' || b >= 0x20
}

fn trim_lws(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map(|p| p + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

fn trim_trailing_lws(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map(|p| p + 1)
        .unwrap_or(0);
    &bytes[..end]
}

/// `HTTP/x.y` (8 バイト) を解釈する
fn parse_http_version(bytes: &[u8]) -> Option<(u8, u8)> {
    if bytes.len() != 8 || &bytes[..5] != b"HTTP/" || bytes[6] != b'.' {
        return None;
    }
    let major = bytes[5];
    let minor = bytes[7];
    if !major.is_ascii_digit() || !minor.is_ascii_digit() {
        return None;
    }
    Some((major - b'0', minor - b'0'))
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RequestLine {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) major: u8,
    pub(crate) minor: u8,
}

/// リクエストライン `METHOD SP target SP HTTP/x.y` を解釈する
///
/// target はバージョン部分を右端から切り離した残り全体で、
/// HTAB と非制御文字からなる限り内部の SP も許す (送信側互換のため)。
pub(crate) fn parse_request_line(line: &[u8]) -> Option<RequestLine> {
    let line = trim_trailing_lws(line);
    let sp = line.iter().position(|&b| b == b' ')?;
    let method = &line[..sp];
    if method.is_empty() || !method.iter().all(|&b| is_tchar(b)) {
        return None;
    }
    let rest = &line[sp + 1..];
    if rest.len() < 10 {
        // 最短でも "t HTTP/x.y"
        return None;
    }
    let (head, version) = rest.split_at(rest.len() - 8);
    let (major, minor) = parse_http_version(version)?;
    let target = head.strip_suffix(b" ")?;
    if target.is_empty() || !target.iter().all(|&b| is_field_byte(b)) {
        return None;
    }
    Some(RequestLine {
        method: latin1_string(method),
        target: latin1_string(target),
        major,
        minor,
    })
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct StatusLine {
    pub(crate) major: u8,
    pub(crate) minor: u8,
    pub(crate) status: u16,
    pub(crate) reason: Option<String>,
}

/// ステータスライン `HTTP/x.y SP status [SP reason]` を解釈する
pub(crate) fn parse_status_line(line: &[u8]) -> Option<StatusLine> {
    let line = trim_trailing_lws(line);
    if line.len() < 9 || line[8] != b' ' {
        return None;
    }
    let (major, minor) = parse_http_version(&line[..8])?;
    let rest = &line[9..];
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    // u16 に収まらない桁数は不正として扱う
    let status: u16 = latin1_string(&rest[..digits]).parse().ok()?;
    let reason_part = &rest[digits..];
    let reason = if reason_part.is_empty() {
        None
    } else {
        let text = reason_part.strip_prefix(b" ")?;
        if !text.iter().all(|&b| is_field_byte(b)) {
            return None;
        }
        Some(latin1_string(text))
    };
    Some(StatusLine {
        major,
        minor,
        status,
        reason,
    })
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HeaderLine {
    /// `name: value` 形式の新しいヘッダー
    Field { name: String, value: String },
    /// LWS で始まる継続行 (RFC 2616 の折り返し)。
    /// 前後の LWS を除いた値を直前のヘッダー値へ連結する
    Continuation { value: String },
}

/// 空でないヘッダー行 1 行を解釈する
pub(crate) fn parse_header_line(line: &[u8]) -> Option<HeaderLine> {
    if line[0] == b' ' || line[0] == b'\t' {
        let value = trim_lws(line);
        if !value.iter().all(|&b| is_field_byte(b)) {
            return None;
        }
        return Some(HeaderLine::Continuation {
            value: latin1_string(value),
        });
    }
    let colon = line.iter().position(|&b| b == b':')?;
    let name = &line[..colon];
    if name.is_empty() || !name.iter().all(|&b| is_tchar(b)) {
        return None;
    }
    let value = trim_lws(&line[colon + 1..]);
    if !value.iter().all(|&b| is_field_byte(b)) {
        return None;
    }
    Some(HeaderLine::Field {
        name: latin1_string(name),
        value: latin1_string(value),
    })
}

/// チャンクサイズ行 `hexLength[;ext]` を解釈する
pub(crate) fn parse_chunk_size(line: &[u8]) -> Option<u64> {
    let size_part = match line.iter().position(|&b| b == b';') {
        Some(i) => &line[..i],
        None => line,
    };
    let size_part = trim_lws(size_part);
    if size_part.is_empty() {
        return None;
    }
    u64::from_str_radix(&latin1_string(size_part), 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_basic() {
        let rl = parse_request_line(b"GET /a HTTP/1.1").unwrap();
        assert_eq!(rl.method, "GET");
        assert_eq!(rl.target, "/a");
        assert_eq!((rl.major, rl.minor), (1, 1));
    }

    #[test]
    fn request_line_trailing_lws() {
        let rl = parse_request_line(b"POST /x HTTP/1.0  \t").unwrap();
        assert_eq!(rl.method, "POST");
        assert_eq!((rl.major, rl.minor), (1, 0));
    }

    #[test]
    fn request_line_target_with_space() {
        // 歴史的な送信側との互換: target 内の SP はバージョン部を
        // 右端に固定して救済する
        let rl = parse_request_line(b"GET /a b HTTP/1.1").unwrap();
        assert_eq!(rl.target, "/a b");
    }

    #[test]
    fn request_line_rejects() {
        assert!(parse_request_line(b"").is_none());
        assert!(parse_request_line(b"GET").is_none());
        assert!(parse_request_line(b"GET /a").is_none());
        assert!(parse_request_line(b"GET /a HTTP/11").is_none());
        assert!(parse_request_line(b"GET /a HTTP/1.1x").is_none());
        assert!(parse_request_line(b"G@T /a HTTP/1.1").is_none());
        assert!(parse_request_line(b"GET  HTTP/1.1").is_none());
        assert!(parse_request_line(b"HTTP/1.1 200 OK").is_none());
    }

    #[test]
    fn status_line_basic() {
        let sl = parse_status_line(b"HTTP/1.1 200 OK").unwrap();
        assert_eq!(sl.status, 200);
        assert_eq!(sl.reason.as_deref(), Some("OK"));
        assert_eq!((sl.major, sl.minor), (1, 1));
    }

    #[test]
    fn status_line_without_reason() {
        let sl = parse_status_line(b"HTTP/1.0 404").unwrap();
        assert_eq!(sl.status, 404);
        assert_eq!(sl.reason, None);
        // 末尾 LWS のみの reason は存在しない扱い
        let sl = parse_status_line(b"HTTP/1.1 204 ").unwrap();
        assert_eq!(sl.status, 204);
        assert_eq!(sl.reason, None);
    }

    #[test]
    fn status_line_multiword_reason() {
        let sl = parse_status_line(b"HTTP/1.1 500 Internal Server Error").unwrap();
        assert_eq!(sl.reason.as_deref(), Some("Internal Server Error"));
    }

    #[test]
    fn status_line_rejects() {
        assert!(parse_status_line(b"HTTP/1.1 abc").is_none());
        assert!(parse_status_line(b"HTTP/1.1").is_none());
        assert!(parse_status_line(b"HTTP/1.1 200OK").is_none());
        assert!(parse_status_line(b"HTTP/1.1 99999").is_none());
        assert!(parse_status_line(b"GET /a HTTP/1.1").is_none());
    }

    #[test]
    fn header_field() {
        let h = parse_header_line(b"Host: example.com").unwrap();
        assert_eq!(
            h,
            HeaderLine::Field {
                name: "Host".to_string(),
                value: "example.com".to_string()
            }
        );
    }

    #[test]
    fn header_field_empty_value() {
        let h = parse_header_line(b"X-Empty:").unwrap();
        assert_eq!(
            h,
            HeaderLine::Field {
                name: "X-Empty".to_string(),
                value: String::new()
            }
        );
    }

    #[test]
    fn header_value_lws_trimmed() {
        let h = parse_header_line(b"Accept:   text/plain \t").unwrap();
        assert_eq!(
            h,
            HeaderLine::Field {
                name: "Accept".to_string(),
                value: "text/plain".to_string()
            }
        );
    }

    #[test]
    fn header_continuation() {
        let h = parse_header_line(b"  folded part ").unwrap();
        assert_eq!(
            h,
            HeaderLine::Continuation {
                value: "folded part".to_string()
            }
        );
    }

    #[test]
    fn header_rejects() {
        // 名前の前後の SP は token に含まれないため不正
        assert!(parse_header_line(b"Bad Header: x").is_none());
        assert!(parse_header_line(b"Host : x").is_none());
        assert!(parse_header_line(b"no-colon-here").is_none());
        assert!(parse_header_line(b": empty-name").is_none());
        // 値の制御文字は不正
        assert!(parse_header_line(b"X: a\x01b").is_none());
    }

    #[test]
    fn chunk_size_lines() {
        assert_eq!(parse_chunk_size(b"5"), Some(5));
        assert_eq!(parse_chunk_size(b"1A"), Some(26));
        assert_eq!(parse_chunk_size(b"ff"), Some(255));
        assert_eq!(parse_chunk_size(b"0"), Some(0));
        assert_eq!(parse_chunk_size(b"5; ext=1"), Some(5));
        assert_eq!(parse_chunk_size(b"  5  "), Some(5));
        assert_eq!(parse_chunk_size(b""), None);
        assert_eq!(parse_chunk_size(b"xyz"), None);
        assert_eq!(parse_chunk_size(b";5"), None);
    }
}
