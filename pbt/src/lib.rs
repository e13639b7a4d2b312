//! PBT テスト共通ユーティリティ
//!
//! パースマシンに投入する有効な HTTP メッセージの生成器と、
//! バイト列を任意の位置で断片化するためのヘルパー。

use proptest::prelude::*;

// ========================================
// ヘッダー生成
// ========================================

/// フレーミングに影響するため生成から除外するヘッダー名
const RESERVED_HEADERS: &[&str] = &[
    "content-length",
    "transfer-encoding",
    "connection",
    "upgrade",
];

/// ヘッダー名: token (フレーミングヘッダーは除外)
pub fn header_name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9-]{0,24}"
        .prop_filter("framing headers are generated separately", |name| {
            !RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str())
        })
}

/// ヘッダー値: OWS トリムの影響を受けない文字だけで構成する
pub fn header_value() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.;=/-]{1,32}".prop_map(|s| s)
}

/// ヘッダーリスト
pub fn header_list(max: usize) -> impl Strategy<Value = Vec<(String, String)>> {
    proptest::collection::vec((header_name(), header_value()), 0..=max)
}

// ========================================
// リクエスト生成
// ========================================

pub fn http_method() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("GET".to_string()),
        Just("POST".to_string()),
        Just("PUT".to_string()),
        Just("DELETE".to_string()),
        Just("PATCH".to_string()),
        Just("OPTIONS".to_string()),
    ]
}

pub fn request_target() -> impl Strategy<Value = String> {
    "/[a-z0-9/._-]{0,24}".prop_map(|s| s)
}

/// Content-Length フレーミングのリクエスト仕様
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

pub fn request_spec() -> impl Strategy<Value = RequestSpec> {
    (
        http_method(),
        request_target(),
        header_list(4),
        proptest::collection::vec(any::<u8>(), 0..256),
    )
        .prop_map(|(method, target, headers, body)| RequestSpec {
            method,
            target,
            headers,
            body,
        })
}

/// リクエストをワイヤ形式にエンコードする
pub fn encode_request(spec: &RequestSpec) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", spec.method, spec.target).as_bytes());
    for (name, value) in &spec.headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", spec.body.len()).as_bytes());
    out.extend_from_slice(&spec.body);
    out
}

// ========================================
// chunked リクエスト生成
// ========================================

/// chunked フレーミングのリクエスト仕様
#[derive(Debug, Clone)]
pub struct ChunkedSpec {
    pub target: String,
    pub chunks: Vec<Vec<u8>>,
    pub trailers: Vec<(String, String)>,
    /// チャンクサイズ行に拡張を付けるかどうか
    pub extensions: bool,
}

pub fn chunked_spec() -> impl Strategy<Value = ChunkedSpec> {
    (
        request_target(),
        proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..64), 0..6),
        header_list(2),
        any::<bool>(),
    )
        .prop_map(|(target, chunks, trailers, extensions)| ChunkedSpec {
            target,
            chunks,
            trailers,
            extensions,
        })
}

pub fn encode_chunked_request(spec: &ChunkedSpec) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("POST {} HTTP/1.1\r\n", spec.target).as_bytes());
    out.extend_from_slice(b"Transfer-Encoding: chunked\r\n\r\n");
    for chunk in &spec.chunks {
        if spec.extensions {
            out.extend_from_slice(format!("{:x};ext=1\r\n", chunk.len()).as_bytes());
        } else {
            out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        }
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n");
    for (name, value) in &spec.trailers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

// ========================================
// 断片化
// ========================================

/// 0..=len の範囲の切断点リスト (ソート済み)
pub fn cut_points(len: usize) -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(0..=len, 0..8).prop_map(|mut cuts| {
        cuts.sort_unstable();
        cuts
    })
}

/// バイト列を切断点で複数フラグメントに分割する (空フラグメントも許す)
pub fn fragment(bytes: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut fragments = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for &cut in cuts {
        fragments.push(bytes[start..cut].to_vec());
        start = cut;
    }
    fragments.push(bytes[start..].to_vec());
    fragments
}
