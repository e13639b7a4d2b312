//! パースマシンの結合テスト
//!
//! 任意の位置で分割されたチャンク投入 (ネットワーク I/O の断片化シナリオ) と、
//! 接続クローズ・パイプライン化をまたぐ再開動作を確認する。
//!
//! ## なぜ PBT (Property-Based Testing) と別にテストするのか
//!
//! PBT は「有効なメッセージをどう分割しても結果が変わらない」という性質を
//! ランダムな分割点で検証する。ここでは PBT の生成器では自然に出てこない
//! 固定シナリオをテストする：
//!
//! - CRLF のちょうど境界での分割 (キャリーオーバーの CR/LF またぎ検出)
//! - close-delimited なレスポンスが `parse(None)` まで完了しないこと
//!   (バッファが空になった時点で誤って完了させる回帰の検出)
//! - HEAD レスポンスの `set_ignore_body` フロー
//! - Complete・Error 到達後の呼び出しが冪等であること
//!
//! これらは「デコーダーの正しさ」よりも「呼び出し側プロトコル」の期待動作を
//! 固定するテストであり、アプリケーションコードが参照すべき使い方を示す。

use shiguredo_nodewire::{ParseError, ParsingMachine, ParsingMode};

/// 入力を全分割点で 2 分割して投入しても結果が変わらないことを確認する
#[test]
fn request_survives_every_split_point() {
    let input =
        b"POST /upload HTTP/1.1\r\nHost: example.com\r\nContent-Length: 11\r\n\r\nhello world";
    for split in 0..=input.len() {
        let mut m = ParsingMachine::new(ParsingMode::Request);
        let mut body = Vec::new();
        let mut headers = None;
        let mut complete = false;
        for part in [&input[..split], &input[split..]] {
            let mut rest = part;
            while !rest.is_empty() {
                let mut r = m.parse(Some(rest)).unwrap();
                if let Some(b) = r.body() {
                    body.extend_from_slice(b);
                }
                if let Some(h) = r.take_headers() {
                    headers = Some(h);
                }
                complete = r.is_complete();
                rest = &rest[r.consumed()..];
                if complete {
                    break;
                }
            }
        }
        assert!(complete, "split at {split} did not complete");
        assert_eq!(body, b"hello world", "split at {split}");
        assert_eq!(headers.as_ref().map(|h| h.len()), Some(2), "split at {split}");
    }
}

/// chunked ボディも全分割点で同じ結果になる
#[test]
fn chunked_request_survives_every_split_point() {
    let input = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                  4\r\nwiki\r\n5\r\npedia\r\n0\r\nX-Trail: yes\r\n\r\n";
    for split in 0..=input.len() {
        let mut m = ParsingMachine::new(ParsingMode::Request);
        let mut body = Vec::new();
        let mut trailers = None;
        let mut complete = false;
        for part in [&input[..split], &input[split..]] {
            let mut rest = part;
            while !rest.is_empty() {
                let mut r = m.parse(Some(rest)).unwrap();
                if let Some(b) = r.body() {
                    body.extend_from_slice(b);
                }
                if let Some(t) = r.take_trailers() {
                    trailers = Some(t);
                }
                complete = r.is_complete();
                rest = &rest[r.consumed()..];
                if complete {
                    break;
                }
            }
        }
        assert!(complete, "split at {split} did not complete");
        assert_eq!(body, b"wikipedia", "split at {split}");
        assert_eq!(
            trailers,
            Some(vec![("X-Trail".to_string(), "yes".to_string())]),
            "split at {split}"
        );
    }
}

/// 1 バイトずつの投入でも状態を失わない
#[test]
fn byte_at_a_time_parsing() {
    let input = b"GET /slow HTTP/1.1\r\nHost: h\r\nContent-Length: 3\r\n\r\nabc";
    let mut m = ParsingMachine::new(ParsingMode::Request);
    let mut body = Vec::new();
    let mut complete = false;
    for byte in input {
        let r = m.parse(Some(std::slice::from_ref(byte))).unwrap();
        assert_eq!(r.consumed(), 1);
        if let Some(b) = r.body() {
            body.extend_from_slice(b);
        }
        complete = r.is_complete();
    }
    assert!(complete);
    assert_eq!(body, b"abc");
}

/// パイプライン化された 2 リクエストを reset を挟んで処理する
#[test]
fn pipelined_requests_with_reset() {
    let input = b"GET /first HTTP/1.1\r\nHost: h\r\n\r\n\
                  POST /second HTTP/1.1\r\nHost: h\r\nContent-Length: 2\r\n\r\nok";
    let mut m = ParsingMachine::new(ParsingMode::Request);

    let r = m.parse(Some(input)).unwrap();
    assert!(r.is_complete());
    assert_eq!(r.uri(), Some("/first"));
    // 完了後の未消費バイトは次のメッセージの先頭
    let rest = &input[r.consumed()..];
    assert!(rest.starts_with(b"POST"));

    m.reset();
    let r = m.parse(Some(rest)).unwrap();
    assert!(r.is_complete());
    assert_eq!(r.uri(), Some("/second"));
    assert_eq!(r.body(), Some(&b"ok"[..]));
    assert_eq!(r.consumed(), rest.len());
}

/// close-delimited なレスポンスはバッファが尽きても完了しない
///
/// 「入力が空になった時点でボディ完了とみなす」誤実装への回帰テスト。
/// 完了を引き起こせるのは `parse(None)` だけである。
#[test]
fn undelimited_response_stays_open_until_eof() {
    let mut m = ParsingMachine::new(ParsingMode::Response);
    let r = m.parse(Some(b"HTTP/1.0 200 OK\r\nServer: s\r\n\r\n")).unwrap();
    assert!(r.is_headers_complete());
    assert!(!r.is_complete());

    // 空のチャンクを何度投入しても完了しない
    for _ in 0..3 {
        let r = m.parse(Some(b"")).unwrap();
        assert!(!r.is_complete());
    }

    let r = m.parse(Some(b"tail")).unwrap();
    assert_eq!(r.body(), Some(&b"tail"[..]));
    assert!(!r.is_complete());

    let r = m.parse(None).unwrap();
    assert!(r.is_complete());
}

/// HEAD リクエストへのレスポンス: ヘッダー完了後に set_ignore_body で畳む
#[test]
fn head_response_flow() {
    let mut m = ParsingMachine::new(ParsingMode::Response);
    let input = b"HTTP/1.1 200 OK\r\nContent-Length: 1234\r\nContent-Type: text/html\r\n\r\n";
    let r = m.parse(Some(input)).unwrap();
    assert!(r.is_headers_complete());
    assert!(!r.is_complete());
    assert_eq!(r.consumed(), input.len());

    // 呼び出し側が HEAD と知っているのでボディは来ない
    m.set_ignore_body(true);
    assert!(m.is_complete());

    // 次のレスポンスに備えて reset すれば再利用できる
    m.reset();
    let r = m.parse(Some(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")).unwrap();
    assert_eq!(r.status_code(), Some(404));
    assert!(r.is_complete());
}

/// Complete 到達後の parse は何も消費しない冪等な呼び出しになる
#[test]
fn complete_state_is_idempotent() {
    let mut m = ParsingMachine::new(ParsingMode::Request);
    m.parse(Some(b"GET / HTTP/1.1\r\n\r\n")).unwrap();
    for _ in 0..3 {
        let r = m.parse(Some(b"more bytes")).unwrap();
        assert!(r.is_complete());
        assert_eq!(r.consumed(), 0);
    }
    // Complete 後の EOF も正常
    let r = m.parse(None).unwrap();
    assert!(r.is_complete());
}

/// Error 到達後の parse は同じエラーを返し続ける
#[test]
fn error_state_is_sticky_across_calls() {
    let mut m = ParsingMachine::new(ParsingMode::Request);
    let err = m.parse(Some(b"NOT A REQUEST\r\n\r\n")).unwrap_err();
    assert!(matches!(err, ParseError::InvalidStartLine(_)));
    for _ in 0..3 {
        assert_eq!(m.parse(Some(b"GET / HTTP/1.1\r\n\r\n")).unwrap_err(), err);
        assert_eq!(m.parse(None).unwrap_err(), err);
    }
}

/// CRLF がチャンク境界で割れても行終端として認識される
#[test]
fn crlf_split_across_chunks() {
    let mut m = ParsingMachine::new(ParsingMode::Request);
    let r = m.parse(Some(b"GET / HTTP/1.1\r")).unwrap();
    assert_eq!(r.consumed(), 15);
    assert!(!r.is_headers_complete());
    let r = m.parse(Some(b"\nHost: h\r\n\r\n")).unwrap();
    assert!(r.is_complete());
    assert_eq!(r.uri(), Some("/"));
}

/// 裸の LF は行終端ではなく、CR は行の内容として残る
#[test]
fn bare_lf_is_not_a_terminator() {
    let mut m = ParsingMachine::new(ParsingMode::Request);
    // LF のみの「空行」ではヘッダーは終わらない
    let r = m.parse(Some(b"GET / HTTP/1.1\r\nHost: h\n")).unwrap();
    assert!(!r.is_headers_complete());
    assert_eq!(r.consumed(), 24);
}

/// アップグレード確定後の残りバイトは消費されず呼び出し側に残る
#[test]
fn upgrade_leaves_remaining_bytes_for_caller() {
    let mut m = ParsingMachine::new(ParsingMode::Request);
    let input = b"GET /chat HTTP/1.1\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\r\n\x81\x05hello";
    let r = m.parse(Some(input)).unwrap();
    assert!(r.is_upgrade_requested());
    assert!(r.is_complete());
    let leftover = &input[r.consumed()..];
    assert_eq!(leftover, b"\x81\x05hello");
}
