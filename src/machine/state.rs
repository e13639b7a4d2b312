/// パース対象のメッセージ種別
///
/// 構築時に固定され、以後変更されない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsingMode {
    /// リクエスト (リクエストラインから始まる)
    Request,
    /// レスポンス (ステータスラインから始まる)
    Response,
}

/// パースマシンの状態
///
/// 常にちょうど 1 つがアクティブ。`Complete` と `Error` は終端状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseState {
    /// スタートライン待ち
    Start,
    /// ヘッダー行待ち
    Headers,
    /// ボディ読み取り中 (Undelimited / Length)
    Body,
    /// チャンクサイズ行待ち
    ChunkHeader,
    /// チャンクデータ読み取り中
    ChunkBody,
    /// チャンクデータ直後の CRLF 待ち
    ChunkTrailer,
    /// トレーラー行待ち
    Trailers,
    /// メッセージ完了
    Complete,
    /// パースエラー (再開不能)
    Error,
}

/// ボディ長の決定方法
///
/// ヘッダーの内容から導出される。Transfer-Encoding と Content-Length が
/// 両方存在する場合は Transfer-Encoding が優先される (RFC 9112 Section 6.3)。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// 長さ指定なし。リクエストではボディなし、
    /// レスポンスでは接続クローズまで読み続ける
    Undelimited,
    /// Content-Length による固定長
    Length,
    /// Transfer-Encoding: chunked
    Chunked,
}
