//! パースマシンのプロパティテスト: chunked ボディ
//!
//! 任意のチャンク構成・トレーラー・断片化に対して、ボディは
//! チャンクの連結と一致し、トレーラーはちょうど 1 回届く。

use pbt::{chunked_spec, cut_points, encode_chunked_request, fragment, ChunkedSpec};
use proptest::prelude::*;
use shiguredo_nodewire::{BodyMode, Header, ParsingMachine, ParsingMode};

fn drive(
    machine: &mut ParsingMachine,
    fragments: &[Vec<u8>],
) -> (Vec<u8>, Vec<Vec<Header>>, bool) {
    let mut body = Vec::new();
    let mut trailer_deliveries = Vec::new();
    let mut complete = false;
    for frag in fragments {
        let mut rest: &[u8] = frag;
        loop {
            let mut r = machine.parse(Some(rest)).unwrap();
            if let Some(b) = r.body() {
                body.extend_from_slice(b);
            }
            if let Some(t) = r.take_trailers() {
                trailer_deliveries.push(t);
            }
            complete = r.is_complete();
            rest = &rest[r.consumed()..];
            if rest.is_empty() || complete {
                break;
            }
        }
        if complete {
            break;
        }
    }
    (body, trailer_deliveries, complete)
}

fn fragmented_chunked() -> impl Strategy<Value = (ChunkedSpec, Vec<usize>)> {
    chunked_spec().prop_flat_map(|spec| {
        let len = encode_chunked_request(&spec).len();
        (Just(spec), cut_points(len))
    })
}

proptest! {
    #[test]
    fn chunked_body_is_chunk_concatenation((spec, cuts) in fragmented_chunked()) {
        let wire = encode_chunked_request(&spec);
        let fragments = fragment(&wire, &cuts);

        let mut machine = ParsingMachine::new(ParsingMode::Request);
        let (body, trailer_deliveries, complete) = drive(&mut machine, &fragments);

        prop_assert!(complete);
        prop_assert_eq!(machine.body_mode(), BodyMode::Chunked);

        let expected: Vec<u8> = spec.chunks.concat();
        prop_assert_eq!(body, expected);

        // トレーラーはちょうど 1 回、終端の空行を読んだ呼び出しで届く
        prop_assert_eq!(trailer_deliveries.len(), 1);
        prop_assert_eq!(&trailer_deliveries[0], &spec.trailers);
    }

    /// チャンクサイズ拡張の有無は結果に影響しない
    #[test]
    fn chunk_extensions_are_transparent(spec in chunked_spec()) {
        let with = ChunkedSpec { extensions: true, ..spec.clone() };
        let without = ChunkedSpec { extensions: false, ..spec };

        let mut m1 = ParsingMachine::new(ParsingMode::Request);
        let (body1, trailers1, complete1) = drive(&mut m1, &[encode_chunked_request(&with)]);
        let mut m2 = ParsingMachine::new(ParsingMode::Request);
        let (body2, trailers2, complete2) = drive(&mut m2, &[encode_chunked_request(&without)]);

        prop_assert_eq!(complete1, complete2);
        prop_assert_eq!(body1, body2);
        prop_assert_eq!(trailers1, trailers2);
    }

    /// 終端チャンクの前で入力が尽きても Complete に到達しない
    #[test]
    fn truncated_chunked_body_never_completes(spec in chunked_spec()) {
        let wire = encode_chunked_request(&spec);
        // 終端の "0\r\n...\r\n\r\n" を削る
        let trailer_len = 5 + spec
            .trailers
            .iter()
            .map(|(n, v)| n.len() + v.len() + 4)
            .sum::<usize>();
        let truncated = &wire[..wire.len() - trailer_len];

        let mut machine = ParsingMachine::new(ParsingMode::Request);
        let (_, trailer_deliveries, complete) = drive(&mut machine, &[truncated.to_vec()]);
        prop_assert!(!complete);
        prop_assert!(trailer_deliveries.is_empty());
    }
}
