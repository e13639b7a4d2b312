use std::fmt;

/// HTTP パースエラー
///
/// どのエラーも終端状態で、発生後の `parse()` は同じエラーを返し続ける。
/// 呼び出し側は接続を閉じる以外に回復手段を持たない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// 不正なスタートライン (リクエストライン / ステータスライン)
    InvalidStartLine(String),
    /// 不正なヘッダー行
    InvalidHeaderLine(String),
    /// Content-Length が整数として解釈できない
    InvalidContentLength(String),
    /// チャンクサイズが 16 進数として解釈できない
    InvalidChunkSize(String),
    /// チャンクデータ直後に CRLF 以外が現れた
    InvalidChunkTerminator(String),
    /// メッセージ途中で入力が終端した
    UnexpectedEof,
    /// 行が長すぎる
    LineTooLong { size: usize, limit: usize },
    /// ヘッダー数超過
    TooManyHeaders { count: usize, limit: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidStartLine(line) => write!(f, "invalid start line: {}", line),
            ParseError::InvalidHeaderLine(line) => write!(f, "invalid header line: {}", line),
            ParseError::InvalidContentLength(value) => {
                write!(f, "invalid content length: {}", value)
            }
            ParseError::InvalidChunkSize(line) => write!(f, "invalid chunk size: {}", line),
            ParseError::InvalidChunkTerminator(line) => {
                write!(f, "invalid chunk terminator: {}", line)
            }
            ParseError::UnexpectedEof => write!(f, "unexpected end of input"),
            ParseError::LineTooLong { size, limit } => {
                write!(f, "line too long: {} > {}", size, limit)
            }
            ParseError::TooManyHeaders { count, limit } => {
                write!(f, "too many headers: {} > {}", count, limit)
            }
        }
    }
}

impl std::error::Error for ParseError {}
