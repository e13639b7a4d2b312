//! パースマシンのプロパティテスト: パイプライン化
//!
//! 連結された複数メッセージを `reset()` を挟んで処理すると、
//! 個別に処理した場合と同じ結果になる。

use pbt::{encode_request, request_spec, RequestSpec};
use proptest::prelude::*;
use shiguredo_nodewire::{ParsingMachine, ParsingMode};

struct Parsed {
    method: String,
    target: String,
    body: Vec<u8>,
}

/// 1 メッセージ分をパースし、消費しなかった残りを返す
fn parse_one<'a>(machine: &mut ParsingMachine, mut rest: &'a [u8]) -> (Parsed, &'a [u8]) {
    let mut method = String::new();
    let mut target = String::new();
    let mut body = Vec::new();
    loop {
        let r = machine.parse(Some(rest)).unwrap();
        if let Some(m) = r.method() {
            method = m.to_string();
        }
        if let Some(u) = r.uri() {
            target = u.to_string();
        }
        if let Some(b) = r.body() {
            body.extend_from_slice(b);
        }
        rest = &rest[r.consumed()..];
        if r.is_complete() {
            break;
        }
        assert!(!rest.is_empty(), "parser stalled");
    }
    (
        Parsed {
            method,
            target,
            body,
        },
        rest,
    )
}

proptest! {
    #[test]
    fn pipelined_messages_parse_like_individual_ones(
        specs in proptest::collection::vec(request_spec(), 1..4),
    ) {
        let mut wire = Vec::new();
        for spec in &specs {
            wire.extend_from_slice(&encode_request(spec));
        }

        let mut machine = ParsingMachine::new(ParsingMode::Request);
        let mut rest: &[u8] = &wire;
        for (i, spec) in specs.iter().enumerate() {
            if i > 0 {
                machine.reset();
            }
            let (parsed, remaining) = parse_one(&mut machine, rest);
            rest = remaining;
            prop_assert_eq!(&parsed.method, &spec.method);
            prop_assert_eq!(&parsed.target, &spec.target);
            prop_assert_eq!(&parsed.body, &spec.body);
            // Connection ヘッダーがなければ HTTP/1.1 のデフォルトは keep-alive
            prop_assert!(machine.should_keep_alive());
        }
        prop_assert!(rest.is_empty());
    }

    /// reset 後のマシンは新品のマシンと同じ結果を出す
    #[test]
    fn reset_behaves_like_fresh_machine(first in request_spec(), second in request_spec()) {
        let wire_first = encode_request(&first);
        let wire_second = encode_request(&second);

        let mut reused = ParsingMachine::new(ParsingMode::Request);
        let (_, rest) = parse_one(&mut reused, &wire_first);
        prop_assert!(rest.is_empty());
        reused.reset();
        let (via_reuse, _) = parse_one(&mut reused, &wire_second);

        let mut fresh = ParsingMachine::new(ParsingMode::Request);
        let (via_fresh, _) = parse_one(&mut fresh, &wire_second);

        prop_assert_eq!(via_reuse.method, via_fresh.method);
        prop_assert_eq!(via_reuse.target, via_fresh.target);
        prop_assert_eq!(via_reuse.body, via_fresh.body);
    }
}
