//! HTTP/1.x パースマシン
//!
//! Sans I/O 設計に基づく再開可能なメッセージフレーミングパーサーを提供。
//! 任意サイズのバイトチャンクを `parse()` に渡すと、デコードできた分だけを
//! [`ParseResult`] として返す。メッセージ全体のバッファリングは不要。
//!
//! ## 使い方
//!
//! ```rust
//! use shiguredo_nodewire::{ParsingMachine, ParsingMode};
//!
//! let mut machine = ParsingMachine::new(ParsingMode::Request);
//! let input = b"GET /a HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello";
//!
//! let result = machine.parse(Some(input)).unwrap();
//! assert_eq!(result.method(), Some("GET"));
//! assert_eq!(result.uri(), Some("/a"));
//! assert_eq!(result.body(), Some(&b"hello"[..]));
//! assert!(result.is_complete());
//! ```
//!
//! ## ゼロコピーの制約
//!
//! `parse()` が返すボディは呼び出し側の入力バッファへのスライス。
//! 次の `parse()` 呼び出しまでに消費しなければならない (借用チェッカーが強制する)。
//!
//! ## パイプライン化されたメッセージ
//!
//! `ParseResult::consumed()` は今回の呼び出しで消費したバイト数。
//! メッセージ完了後に未消費バイトが残っている場合、それは次のメッセージの
//! 先頭なので、`reset()` を呼んでから残りを再投入する。

mod grammar;
mod state;

pub use state::{BodyMode, ParsingMode};

use crate::buffer::{latin1_string, LineBuffer, LineScan};
use crate::error::ParseError;
use crate::limits::MachineLimits;
use state::ParseState;

use grammar::HeaderLine;

/// ヘッダー 1 件 (名前, 値)。重複も出現順に保持される
pub type Header = (String, String);

/// `parse()` 1 回分の結果
///
/// ヘッダーリストとトレーラーリストはそれぞれ 1 度だけ
/// (空行を読んだ呼び出しで) 返される。ボディは 1 呼び出しにつき
/// 最大 1 スライスで、入力バッファの寿命に束縛される。
#[derive(Debug, Default)]
pub struct ParseResult<'a> {
    consumed: usize,
    headers: Option<Vec<Header>>,
    trailers: Option<Vec<Header>>,
    body: Option<&'a [u8]>,
    method: Option<String>,
    uri: Option<String>,
    version: Option<(u8, u8)>,
    status_code: Option<u16>,
    reason_phrase: Option<String>,
    headers_complete: bool,
    complete: bool,
    keep_alive: bool,
    upgrade_requested: bool,
}

impl<'a> ParseResult<'a> {
    /// 今回の呼び出しで入力バッファから消費したバイト数
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// ヘッダーリスト (空行を読んだ呼び出しでのみ `Some`)
    pub fn headers(&self) -> Option<&[Header]> {
        self.headers.as_deref()
    }

    /// ヘッダーリストの所有権を取り出す
    pub fn take_headers(&mut self) -> Option<Vec<Header>> {
        self.headers.take()
    }

    /// トレーラーリスト (終端の空行を読んだ呼び出しでのみ `Some`)
    pub fn trailers(&self) -> Option<&[Header]> {
        self.trailers.as_deref()
    }

    /// トレーラーリストの所有権を取り出す
    pub fn take_trailers(&mut self) -> Option<Vec<Header>> {
        self.trailers.take()
    }

    /// ボディのスライス (入力バッファへのビュー)
    pub fn body(&self) -> Option<&'a [u8]> {
        self.body
    }

    /// ボディが返されたかどうか
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// リクエストメソッド (ヘッダー完了後)
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// リクエストターゲット (ヘッダー完了後)
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// HTTP バージョン (major, minor)
    pub fn version(&self) -> Option<(u8, u8)> {
        self.version
    }

    /// ステータスコード (レスポンスのヘッダー完了後)
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// リーズンフレーズ
    pub fn reason_phrase(&self) -> Option<&str> {
        self.reason_phrase.as_deref()
    }

    /// ヘッダーまで読み終えたかどうか
    pub fn is_headers_complete(&self) -> bool {
        self.headers_complete
    }

    /// メッセージ全体を読み終えたかどうか
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// 接続を維持すべきかどうか
    pub fn should_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// プロトコルアップグレードが要求されたかどうか
    ///
    /// `Upgrade` ヘッダーと `Connection: upgrade` の両方が揃った場合のみ真
    pub fn is_upgrade_requested(&self) -> bool {
        self.upgrade_requested
    }
}

/// HTTP/1.x メッセージフレーミングの状態機械
///
/// 接続ごとに 1 つ作成し、受信順にバイトを投入する。並行・順序入れ替えの
/// `parse()` 呼び出しは想定しない (単一所有・`&mut` 前提)。
/// `reset()` でフィールドを初期状態に戻し、アロケーションを保持したまま
/// パイプライン化された次のメッセージに再利用できる。
#[derive(Debug)]
pub struct ParsingMachine {
    mode: ParsingMode,
    limits: MachineLimits,
    state: ParseState,
    body_mode: BodyMode,
    /// 未完の行のキャリーオーバー。呼び出し側のバッファとは独立に所有する
    odd: LineBuffer,
    headers: Vec<Header>,
    trailers: Vec<Header>,
    method: Option<String>,
    uri: Option<String>,
    major: u8,
    minor: u8,
    status_code: u16,
    reason_phrase: Option<String>,
    should_keep_alive: bool,
    upgrade_header: bool,
    connection_upgrade: bool,
    connection_close: bool,
    content_length: u64,
    content_length_set: bool,
    chunked: bool,
    bytes_read: u64,
    error: Option<ParseError>,
}

impl ParsingMachine {
    /// デフォルトの制限でパースマシンを作成
    pub fn new(mode: ParsingMode) -> Self {
        Self::with_limits(mode, MachineLimits::default())
    }

    /// 制限を指定してパースマシンを作成
    pub fn with_limits(mode: ParsingMode, limits: MachineLimits) -> Self {
        Self {
            mode,
            limits,
            state: ParseState::Start,
            body_mode: BodyMode::Undelimited,
            odd: LineBuffer::new(),
            headers: Vec::new(),
            trailers: Vec::new(),
            method: None,
            uri: None,
            major: 0,
            minor: 0,
            status_code: 0,
            reason_phrase: None,
            should_keep_alive: false,
            upgrade_header: false,
            connection_upgrade: false,
            connection_close: false,
            content_length: 0,
            content_length_set: false,
            chunked: false,
            bytes_read: 0,
            error: None,
        }
    }

    /// バイトチャンクを投入してパースを進める
    ///
    /// `None` は入力の終端 (接続クローズ) を意味する。close-delimited な
    /// レスポンスボディはそこで完了し、メッセージ途中であれば
    /// [`ParseError::UnexpectedEof`] になる。
    ///
    /// エラーはすべて終端的で、以後の呼び出しは同じエラーを返し続ける。
    /// `Complete` 到達後の呼び出しは何も消費せず完了済みの結果を返す。
    pub fn parse<'a>(&mut self, input: Option<&'a [u8]>) -> Result<ParseResult<'a>, ParseError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let Some(buf) = input else {
            return self.parse_eof();
        };

        let mut r = ParseResult::default();
        let mut pos = 0;
        loop {
            let step = match self.state {
                ParseState::Start => self.process_start(buf, &mut pos),
                ParseState::Headers => self.process_headers(buf, &mut pos, &mut r),
                ParseState::Body => self.process_body(buf, &mut pos, &mut r),
                ParseState::ChunkHeader => self.process_chunk_header(buf, &mut pos),
                ParseState::ChunkBody => self.process_chunk_body(buf, &mut pos, &mut r),
                ParseState::ChunkTrailer => self.process_chunk_trailer(buf, &mut pos),
                ParseState::Trailers => self.process_trailers(buf, &mut pos, &mut r),
                ParseState::Complete | ParseState::Error => break,
            };
            match step {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => return Err(self.fail(err)),
            }
        }
        r.consumed = pos;
        self.snapshot(&mut r);
        Ok(r)
    }

    /// ボディを読み飛ばす指示 (HEAD レスポンス用)
    ///
    /// `Body` 状態にあるときだけ `Complete` へ直行する。それ以外の状態では
    /// 何もしない (フラグとして記憶もしない)。
    pub fn set_ignore_body(&mut self, ignore: bool) {
        if ignore && self.state == ParseState::Body {
            self.state = ParseState::Complete;
        }
    }

    /// 全フィールドを初期状態へ戻す
    ///
    /// アロケーションは保持されるため、同一接続上のパイプライン化された
    /// メッセージを再アロケーションなしで処理できる。
    pub fn reset(&mut self) {
        self.state = ParseState::Start;
        self.body_mode = BodyMode::Undelimited;
        self.odd.clear();
        self.headers.clear();
        self.trailers.clear();
        self.method = None;
        self.uri = None;
        self.major = 0;
        self.minor = 0;
        self.status_code = 0;
        self.reason_phrase = None;
        self.should_keep_alive = false;
        self.upgrade_header = false;
        self.connection_upgrade = false;
        self.connection_close = false;
        self.content_length = 0;
        self.content_length_set = false;
        self.chunked = false;
        self.bytes_read = 0;
        self.error = None;
    }

    /// パース対象のメッセージ種別
    pub fn mode(&self) -> ParsingMode {
        self.mode
    }

    /// 現在のボディモード (ヘッダー完了後に確定)
    pub fn body_mode(&self) -> BodyMode {
        self.body_mode
    }

    /// メッセージ全体を読み終えたかどうか
    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Complete
    }

    /// 終端エラー状態かどうか
    pub fn is_error(&self) -> bool {
        self.state == ParseState::Error
    }

    /// ヘッダーまで読み終えたかどうか
    pub fn is_headers_complete(&self) -> bool {
        !matches!(
            self.state,
            ParseState::Start | ParseState::Headers | ParseState::Error
        )
    }

    /// 接続を維持すべきかどうか
    pub fn should_keep_alive(&self) -> bool {
        self.should_keep_alive
    }

    /// プロトコルアップグレードが要求されたかどうか
    pub fn is_upgrade_requested(&self) -> bool {
        self.upgrade_header && self.connection_upgrade
    }

    fn fail(&mut self, err: ParseError) -> ParseError {
        self.state = ParseState::Error;
        self.error = Some(err.clone());
        err
    }

    /// 入力終端の処理
    ///
    /// close-delimited なレスポンスボディはここで初めて完了する
    /// (バッファが空になっても自動完了はしない)。
    fn parse_eof<'a>(&mut self) -> Result<ParseResult<'a>, ParseError> {
        match self.state {
            ParseState::Complete => {}
            // 次のメッセージが始まる前の EOF は正常なクローズ
            ParseState::Start if self.odd.is_empty() => {}
            ParseState::Body
                if self.body_mode == BodyMode::Undelimited
                    && self.mode == ParsingMode::Response =>
            {
                self.state = ParseState::Complete;
            }
            _ => return Err(self.fail(ParseError::UnexpectedEof)),
        }
        let mut r = ParseResult::default();
        self.snapshot(&mut r);
        Ok(r)
    }

    fn snapshot(&self, r: &mut ParseResult<'_>) {
        r.headers_complete = self.is_headers_complete();
        r.complete = self.state == ParseState::Complete;
        r.keep_alive = self.should_keep_alive;
        r.upgrade_requested = self.is_upgrade_requested();
        if r.headers_complete {
            r.method = self.method.clone();
            r.uri = self.uri.clone();
            r.version = Some((self.major, self.minor));
            if self.mode == ParsingMode::Response {
                r.status_code = Some(self.status_code);
                r.reason_phrase = self.reason_phrase.clone();
            }
        }
    }

    /// キャリーオーバーと入力から次の行を切り出す
    ///
    /// 行が完成しない場合は入力全体を取り込んで `None` を返す。
    /// 組み立て済みの行長が上限を超えたらエラー。
    fn read_line(&mut self, buf: &[u8], pos: &mut usize) -> Result<Option<Vec<u8>>, ParseError> {
        match self.odd.split_line(&buf[*pos..]) {
            LineScan::Found { line, consumed } => {
                *pos += consumed;
                if line.len() > self.limits.max_line_length {
                    return Err(ParseError::LineTooLong {
                        size: line.len(),
                        limit: self.limits.max_line_length,
                    });
                }
                Ok(Some(line))
            }
            LineScan::Partial => {
                *pos = buf.len();
                if self.odd.len() > self.limits.max_line_length {
                    return Err(ParseError::LineTooLong {
                        size: self.odd.len(),
                        limit: self.limits.max_line_length,
                    });
                }
                Ok(None)
            }
        }
    }

    fn process_start(&mut self, buf: &[u8], pos: &mut usize) -> Result<bool, ParseError> {
        let Some(line) = self.read_line(buf, pos)? else {
            return Ok(false);
        };
        match self.mode {
            ParsingMode::Request => {
                let rl = grammar::parse_request_line(&line)
                    .ok_or_else(|| ParseError::InvalidStartLine(latin1_string(&line)))?;
                self.method = Some(rl.method);
                self.uri = Some(rl.target);
                self.major = rl.major;
                self.minor = rl.minor;
            }
            ParsingMode::Response => {
                let sl = grammar::parse_status_line(&line)
                    .ok_or_else(|| ParseError::InvalidStartLine(latin1_string(&line)))?;
                self.major = sl.major;
                self.minor = sl.minor;
                self.status_code = sl.status;
                self.reason_phrase = sl.reason;
            }
        }
        // Connection ヘッダーで上書きされるまでの初期値
        self.should_keep_alive = self.major == 1 && self.minor == 1;
        self.state = ParseState::Headers;
        Ok(true)
    }

    fn process_headers<'a>(
        &mut self,
        buf: &'a [u8],
        pos: &mut usize,
        r: &mut ParseResult<'a>,
    ) -> Result<bool, ParseError> {
        while let Some(line) = self.read_line(buf, pos)? {
            if line.is_empty() {
                self.finish_headers(r);
                return Ok(true);
            }
            self.handle_header_line(&line, false)?;
        }
        Ok(false)
    }

    /// ヘッダー行 1 行の処理 (ヘッダーとトレーラーで共用)
    fn handle_header_line(&mut self, line: &[u8], trailer: bool) -> Result<(), ParseError> {
        match grammar::parse_header_line(line) {
            Some(HeaderLine::Field { name, value }) => {
                let count = if trailer {
                    self.trailers.len()
                } else {
                    self.headers.len()
                };
                if count >= self.limits.max_headers {
                    return Err(ParseError::TooManyHeaders {
                        count: count + 1,
                        limit: self.limits.max_headers,
                    });
                }
                if !trailer {
                    self.inspect_header(&name, &value)?;
                }
                if trailer {
                    self.trailers.push((name, value));
                } else {
                    self.headers.push((name, value));
                }
                Ok(())
            }
            Some(HeaderLine::Continuation { value }) => {
                let list = if trailer {
                    &mut self.trailers
                } else {
                    &mut self.headers
                };
                // 先行するヘッダーのない継続行は不正
                let Some(last) = list.last_mut() else {
                    return Err(ParseError::InvalidHeaderLine(latin1_string(line)));
                };
                last.1.push_str(&value);
                Ok(())
            }
            None => Err(ParseError::InvalidHeaderLine(latin1_string(line))),
        }
    }

    /// フレーミングに影響するヘッダーの検査
    fn inspect_header(&mut self, name: &str, value: &str) -> Result<(), ParseError> {
        if name.eq_ignore_ascii_case("content-length") {
            let n = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::InvalidContentLength(value.to_string()))?;
            self.content_length = n;
            self.content_length_set = true;
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            if !value.trim().eq_ignore_ascii_case("identity") {
                self.chunked = true;
            }
        } else if name.eq_ignore_ascii_case("connection") {
            for token in value.split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("close") {
                    self.connection_close = true;
                    self.should_keep_alive = false;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    // close が先に現れていたらそちらを優先する
                    if !self.connection_close {
                        self.should_keep_alive = true;
                    }
                } else if token.eq_ignore_ascii_case("upgrade") {
                    self.connection_upgrade = true;
                }
            }
        } else if name.eq_ignore_ascii_case("upgrade") {
            self.upgrade_header = true;
        }
        Ok(())
    }

    /// 空行を読んだ時点でのボディモード確定と状態遷移
    ///
    /// Transfer-Encoding と Content-Length が両方あった場合は
    /// Transfer-Encoding が勝つ (RFC 9112 Section 6.3)。
    fn finish_headers<'a>(&mut self, r: &mut ParseResult<'a>) {
        self.body_mode = if self.chunked {
            BodyMode::Chunked
        } else if self.content_length_set {
            BodyMode::Length
        } else {
            BodyMode::Undelimited
        };
        r.headers = Some(std::mem::take(&mut self.headers));

        // CONNECT と確定済みアップグレードは以降のバイトを生のまま
        // 引き渡すため、ボディ処理を行わずここで完了する
        let connect = self
            .method
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("CONNECT"));
        if connect || self.is_upgrade_requested() {
            self.state = ParseState::Complete;
        } else {
            self.state = ParseState::Body;
        }
    }

    fn process_body<'a>(
        &mut self,
        buf: &'a [u8],
        pos: &mut usize,
        r: &mut ParseResult<'a>,
    ) -> Result<bool, ParseError> {
        match self.body_mode {
            BodyMode::Undelimited => match self.mode {
                // Content-Length も Transfer-Encoding もないリクエストの
                // ボディ長は 0 (RFC 9112 Section 6.3)
                ParsingMode::Request => {
                    self.state = ParseState::Complete;
                    Ok(true)
                }
                // レスポンスは接続クローズまでがボディ。完了は parse(None)
                // だけが引き起こす (バッファが空でも自動完了しない)
                ParsingMode::Response => {
                    if *pos < buf.len() {
                        r.body = Some(&buf[*pos..]);
                        *pos = buf.len();
                    }
                    Ok(false)
                }
            },
            BodyMode::Length => {
                let remaining = self.content_length - self.bytes_read;
                if remaining == 0 {
                    self.state = ParseState::Complete;
                    return Ok(true);
                }
                let avail = buf.len() - *pos;
                if avail == 0 {
                    return Ok(false);
                }
                let n = (avail as u64).min(remaining) as usize;
                r.body = Some(&buf[*pos..*pos + n]);
                *pos += n;
                self.bytes_read += n as u64;
                if self.bytes_read == self.content_length {
                    self.state = ParseState::Complete;
                }
                // ボディスライスは 1 呼び出しにつき 1 つ
                Ok(false)
            }
            BodyMode::Chunked => {
                self.state = ParseState::ChunkHeader;
                Ok(true)
            }
        }
    }

    fn process_chunk_header(&mut self, buf: &[u8], pos: &mut usize) -> Result<bool, ParseError> {
        let Some(line) = self.read_line(buf, pos)? else {
            return Ok(false);
        };
        let size = grammar::parse_chunk_size(&line)
            .ok_or_else(|| ParseError::InvalidChunkSize(latin1_string(&line)))?;
        self.content_length = size;
        self.bytes_read = 0;
        self.state = if size == 0 {
            ParseState::Trailers
        } else {
            ParseState::ChunkBody
        };
        Ok(true)
    }

    fn process_chunk_body<'a>(
        &mut self,
        buf: &'a [u8],
        pos: &mut usize,
        r: &mut ParseResult<'a>,
    ) -> Result<bool, ParseError> {
        let remaining = self.content_length - self.bytes_read;
        let avail = buf.len() - *pos;
        if avail == 0 {
            return Ok(false);
        }
        let n = (avail as u64).min(remaining) as usize;
        r.body = Some(&buf[*pos..*pos + n]);
        *pos += n;
        self.bytes_read += n as u64;
        if self.bytes_read == self.content_length {
            self.state = ParseState::ChunkTrailer;
        }
        Ok(false)
    }

    /// チャンクデータ直後の CRLF。CRLF 以外はエラー
    fn process_chunk_trailer(&mut self, buf: &[u8], pos: &mut usize) -> Result<bool, ParseError> {
        let Some(line) = self.read_line(buf, pos)? else {
            return Ok(false);
        };
        if !line.is_empty() {
            return Err(ParseError::InvalidChunkTerminator(latin1_string(&line)));
        }
        self.state = ParseState::ChunkHeader;
        Ok(true)
    }

    fn process_trailers<'a>(
        &mut self,
        buf: &'a [u8],
        pos: &mut usize,
        r: &mut ParseResult<'a>,
    ) -> Result<bool, ParseError> {
        while let Some(line) = self.read_line(buf, pos)? {
            if line.is_empty() {
                r.trailers = Some(std::mem::take(&mut self.trailers));
                self.state = ParseState::Complete;
                return Ok(true);
            }
            self.handle_header_line(&line, true)?;
        }
        Ok(false)
    }
}
