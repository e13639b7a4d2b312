//! ハンドルのトレイト定義
//!
//! 非ブロッキング I/O エンドポイント (ソケット・パイプ・TLS デコレーター) が
//! 共通して実装するインターフェース。すべてのコールバックは
//! `(ランタイム, エラーコード, 値)` を受け取る。エラーコードは 0 が成功、
//! 負値が [`crate::ErrorCode`] の値。

use std::net::SocketAddr;

use crate::error::ErrorCode;
use crate::runtime::{HandleId, Runtime};
use crate::socket::TcpHandle;

/// 接続完了コールバック
pub type ConnectCallback = Box<dyn FnOnce(&mut Runtime, i32)>;

/// 書き込み・シャットダウン完了コールバック。値は書き込んだバイト数。
/// ちょうど 1 回だけ呼ばれる (即時完了なら同期、それ以外はキュー排出後)
pub type WriteCallback = Box<dyn FnOnce(&mut Runtime, i32, usize)>;

/// 読み取りデータコールバック。EOF はエラーコード `EOF` とデータなしで届く
pub type ReadCallback = Box<dyn FnMut(&mut Runtime, i32, Option<Vec<u8>>)>;

/// 接続受け入れコールバック。成功時は新しいハンドルが届く
pub type AcceptCallback = Box<dyn FnMut(&mut Runtime, i32, Option<TcpHandle>)>;

/// アイドルタイムアウトコールバック
pub type TimeoutCallback = Box<dyn FnMut(&mut Runtime)>;

/// 非同期 read/write/close を備えたエンドポイント
pub trait Handle {
    /// アリーナ上の識別子
    fn id(&self) -> HandleId;

    /// バッファを書き込む。完了コールバックは投入順に発火する。
    /// 戻り値はキューへ積んだ (または即時書き込んだ) バイト数
    fn write(&self, rt: &mut Runtime, data: Vec<u8>, on_complete: WriteCallback) -> usize;

    /// 送信方向をシャットダウンする。先行する書き込みがすべて掃けてから
    /// 処理されるよう、書き込みキューに番兵として積まれる
    fn shutdown(&self, rt: &mut Runtime, on_complete: WriteCallback);

    /// 読み取りを開始する。「一時停止」はセレクターへの read 関心の
    /// 付け外しであり、スレッドをブロックしない
    fn start_reading(&self, rt: &mut Runtime, on_data: ReadCallback);

    /// 読み取りを停止する
    fn stop_reading(&self, rt: &mut Runtime);

    /// 未送信のキュー済みバイト数
    fn writes_outstanding(&self, rt: &Runtime) -> usize;

    /// ハンドルを閉じる。readiness 登録とタイマーは取り消され、
    /// 未処理の書き込みは `ECANCELED` で完了する。二重クローズは無害
    fn close(&self, rt: &mut Runtime);
}

/// ソケット的な操作を備えたエンドポイント
pub trait SocketHandle: Handle {
    /// ローカルアドレスを束縛する (listen 用)
    fn bind(&self, rt: &mut Runtime, host: &str, port: u16) -> Result<(), ErrorCode>;

    /// 待ち受けを開始する。ポリシー却下・アドレス使用中は同期エラーで返り、
    /// 部分適用は起こらない
    fn listen(
        &self,
        rt: &mut Runtime,
        backlog: u32,
        on_accept: AcceptCallback,
    ) -> Result<(), ErrorCode>;

    /// 接続を開始する。完了はコールバックで通知される
    fn connect(
        &self,
        rt: &mut Runtime,
        host: &str,
        port: u16,
        on_connect: ConnectCallback,
    ) -> Result<(), ErrorCode>;

    /// ローカル側のアドレス
    fn sock_name(&self, rt: &Runtime) -> Option<SocketAddr>;

    /// 相手側のアドレス
    fn peer_name(&self, rt: &Runtime) -> Option<SocketAddr>;

    /// TCP_NODELAY の設定
    fn set_no_delay(&self, rt: &mut Runtime, no_delay: bool) -> Result<(), ErrorCode>;
}
