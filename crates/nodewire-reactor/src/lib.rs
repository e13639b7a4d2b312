//! nodewire の非ブロッキング I/O ランタイム
//!
//! [`mio`] のセレクターを単一スレッドで回すイベントループと、その上に乗る
//! ハンドル群 (TCP ソケット・プロセス内パイプ・TLS デコレーター) を提供する。
//! コアのパースレイヤー (`shiguredo_nodewire`) は Sans I/O で、このクレートが
//! ワイヤへの接続を担う。
//!
//! ## 設計
//!
//! - ハンドルはアリーナ上の整数 ID を運ぶだけの値で、実体は [`Runtime`] が
//!   所有する。コールバックには常に `&mut Runtime` が渡り直すため、
//!   循環参照や `Rc<RefCell<...>>` の網は発生しない
//! - スクリプトに見える状態変更はすべてループを回すスレッド上で行う。
//!   ワーカースレッドは [`RuntimeHandle::execute`] でタスクを投入して再入する
//! - ループは「ピンされた未完了作業」が残る限り回り続け、尽きると終了する
//!
//! ## 例
//!
//! ```no_run
//! use nodewire_reactor::{create_server_handle, Handle, Runtime, SocketHandle};
//!
//! let mut rt = Runtime::new()?;
//! let server = create_server_handle(&mut rt);
//! server.bind(&mut rt, "127.0.0.1", 8080)?;
//! server.listen(&mut rt, 128, Box::new(|rt, err, accepted| {
//!     if err != 0 {
//!         return;
//!     }
//!     let sock = accepted.unwrap();
//!     sock.start_reading(rt, Box::new(move |rt, err, data| {
//!         if let Some(data) = data {
//!             sock.write(rt, data, Box::new(|_, _, _| {}));
//!         }
//!     }));
//! }))?;
//! rt.run()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;
mod handle;
mod pipe;
mod policy;
mod runtime;
mod socket;
mod tls;

pub use error::ErrorCode;
pub use handle::{
    AcceptCallback, ConnectCallback, Handle, ReadCallback, SocketHandle, TimeoutCallback,
    WriteCallback,
};
pub use pipe::{create_pipe_pair, PipeHandle};
pub use policy::{AllowAll, NetworkPolicy};
pub use runtime::{HandleId, Runtime, RuntimeHandle, Task, TimerId, READ_BUFFER_SIZE};
pub use socket::{create_client_handle, create_server_handle, TcpHandle};
pub use tls::{NullTlsEngine, RustlsEngine, TlsEngine, TlsHandle, TlsRecords};
