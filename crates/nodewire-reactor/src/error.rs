//! OS 風エラーコード
//!
//! コールバックの第 1 引数として届く整数コード (0 = 成功、負値 = エラー) の
//! 閉じた一覧。値は Node が使う BSD 系の番号に合わせてある。

use std::fmt;
use std::io;

/// ハンドル系 API が配達するエラーコード
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// 許可されていない操作
    Perm = -1,
    /// 対象が存在しない (アドレス解決失敗を含む)
    NoEnt = -2,
    /// 入出力エラー
    Io = -5,
    /// 不正なハンドル
    BadF = -9,
    /// アクセス拒否 (ネットワークポリシーによる却下)
    Acces = -13,
    /// 不正な引数
    Inval = -22,
    /// パイプ破壊
    Pipe = -32,
    /// 一時的に処理できない
    Again = -35,
    /// アドレスは使用中
    AddrInUse = -48,
    /// 接続がリセットされた
    ConnReset = -54,
    /// 接続が拒否された
    ConnRefused = -61,
    /// クローズにより破棄された書き込み
    Canceled = -89,
    /// 入力の終端
    Eof = -99,
    /// 未実装の操作
    NotImp = -200,
    /// タイムアウト
    Timeout = -201,
}

impl ErrorCode {
    /// コールバックに渡す整数値
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Node 互換のエラー名
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Perm => "EPERM",
            ErrorCode::NoEnt => "ENOENT",
            ErrorCode::Io => "EIO",
            ErrorCode::BadF => "EBADF",
            ErrorCode::Acces => "EACCES",
            ErrorCode::Inval => "EINVAL",
            ErrorCode::Pipe => "EPIPE",
            ErrorCode::Again => "EAGAIN",
            ErrorCode::AddrInUse => "EADDRINUSE",
            ErrorCode::ConnReset => "ECONNRESET",
            ErrorCode::ConnRefused => "ECONNREFUSED",
            ErrorCode::Canceled => "ECANCELED",
            ErrorCode::Eof => "EOF",
            ErrorCode::NotImp => "ENOTIMP",
            ErrorCode::Timeout => "ETIMEOUT",
        }
    }

    /// 整数値からの逆引き
    pub fn from_code(code: i32) -> Option<ErrorCode> {
        match code {
            -1 => Some(ErrorCode::Perm),
            -2 => Some(ErrorCode::NoEnt),
            -5 => Some(ErrorCode::Io),
            -9 => Some(ErrorCode::BadF),
            -13 => Some(ErrorCode::Acces),
            -22 => Some(ErrorCode::Inval),
            -32 => Some(ErrorCode::Pipe),
            -35 => Some(ErrorCode::Again),
            -48 => Some(ErrorCode::AddrInUse),
            -54 => Some(ErrorCode::ConnReset),
            -61 => Some(ErrorCode::ConnRefused),
            -89 => Some(ErrorCode::Canceled),
            -99 => Some(ErrorCode::Eof),
            -200 => Some(ErrorCode::NotImp),
            -201 => Some(ErrorCode::Timeout),
            _ => None,
        }
    }

    /// I/O エラーからの変換
    pub fn from_io_error(err: &io::Error) -> ErrorCode {
        match err.kind() {
            io::ErrorKind::NotFound => ErrorCode::NoEnt,
            io::ErrorKind::PermissionDenied => ErrorCode::Acces,
            io::ErrorKind::ConnectionRefused => ErrorCode::ConnRefused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                ErrorCode::ConnReset
            }
            io::ErrorKind::BrokenPipe => ErrorCode::Pipe,
            io::ErrorKind::AddrInUse => ErrorCode::AddrInUse,
            io::ErrorKind::WouldBlock => ErrorCode::Again,
            io::ErrorKind::InvalidInput => ErrorCode::Inval,
            io::ErrorKind::UnexpectedEof => ErrorCode::Eof,
            _ => ErrorCode::Io,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

impl std::error::Error for ErrorCode {}

impl From<&io::Error> for ErrorCode {
    fn from(err: &io::Error) -> Self {
        ErrorCode::from_io_error(err)
    }
}
