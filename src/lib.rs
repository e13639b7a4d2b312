//! # shiguredo_nodewire
//!
//! 依存なしの HTTP/1.x ワイヤープロトコルライブラリ (Sans I/O)
//!
//! ## 特徴
//!
//! - **依存なし**: 標準ライブラリのみ使用
//! - **Sans I/O**: I/O を完全に分離した設計
//! - **インクリメンタル**: 任意サイズのチャンクを投入でき、ゼロコピーで
//!   ボディのスライスを返す
//!
//! ## 使い方
//!
//! ### リクエストのパース (サーバー側)
//!
//! ```rust
//! use shiguredo_nodewire::{ParsingMachine, ParsingMode};
//!
//! let mut machine = ParsingMachine::new(ParsingMode::Request);
//! let result = machine
//!     .parse(Some(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n"))
//!     .unwrap();
//! assert_eq!(result.method(), Some("GET"));
//! assert!(result.is_complete());
//! ```
//!
//! ### レスポンスのパース (クライアント側)
//!
//! ```rust
//! use shiguredo_nodewire::{ParsingMachine, ParsingMode};
//!
//! let mut machine = ParsingMachine::new(ParsingMode::Response);
//! let result = machine
//!     .parse(Some(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"))
//!     .unwrap();
//! assert_eq!(result.status_code(), Some(200));
//! assert_eq!(result.body(), Some(&b"ok"[..]));
//!
//! // 接続クローズは parse(None) で通知する
//! let result = machine.parse(None).unwrap();
//! assert!(result.is_complete());
//! ```
//!
//! ソケット層・イベントループ・TLS デコレーターは `nodewire_reactor`
//! クレートが提供する。

pub mod buffer;
mod error;
mod limits;
mod machine;

pub use error::ParseError;
pub use limits::MachineLimits;
pub use machine::{BodyMode, Header, ParseResult, ParsingMachine, ParsingMode};
