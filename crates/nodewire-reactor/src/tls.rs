//! TLS デコレーター
//!
//! 任意の [`SocketHandle`] を包み、同じ read/write インターフェースのまま
//! 暗号化を差し込む。ソケット層は TLS を知らず、TLS 層はセレクターを知らない。
//!
//! 変換は同期的な [`TlsEngine`] に委ね、I/O は内側のハンドルがすべて担う:
//!
//! - 書き込み: 平文をエンジンで暗号化して内側へ流す。ハンドシェイク中の
//!   書き込みは完了通知を保留キューに退避し、ハンドシェイク完了後に
//!   バッファ済み平文ごとまとめて流してから発火する
//! - 読み取り: 受信した暗号文をエンジンへ通し、復号された平文だけを
//!   上位へ転送する。エンジンが返す応答レコード (ハンドシェイクの応酬) は
//!   そのまま内側へ書き戻す
//! - シャットダウン: close_notify を先に書き込みキューへ積んでから内側を
//!   シャットダウンするので、FIFO 順で必ず相手に届く

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::ErrorCode;
use crate::handle::{
    AcceptCallback, ConnectCallback, Handle, ReadCallback, SocketHandle, WriteCallback,
};
use crate::runtime::{HandleId, Runtime};

/// [`TlsEngine::unwrap_records`] の結果
#[derive(Debug, Default)]
pub struct TlsRecords {
    /// 復号された平文
    pub plaintext: Vec<u8>,
    /// 相手へ書き戻すべきレコード (ハンドシェイクの応酬)
    pub outbound: Vec<u8>,
    /// 相手が close_notify を送ってきたかどうか
    pub peer_closed: bool,
}

/// 同期的な TLS レコード変換エンジン
///
/// I/O は一切行わない。バイト列を受け取りバイト列を返すだけの
/// 純粋な変換器で、ハンドルから呼ばれる。
pub trait TlsEngine {
    /// 平文を暗号化してワイヤレコードにする。ハンドシェイク中は平文を
    /// 内部にバッファし、送出可能なハンドシェイクレコードだけを返す。
    /// 空の入力はバッファ済みデータの排出要求として扱う
    fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ErrorCode>;

    /// 受信したワイヤレコードを復号する
    fn unwrap_records(&mut self, ciphertext: &[u8]) -> Result<TlsRecords, ErrorCode>;

    /// close_notify レコードを生成する
    fn shutdown_records(&mut self) -> Vec<u8>;

    /// トランスポートのエラーをエンジンに通知する
    fn inbound_error(&mut self, _code: i32) {}

    /// ハンドシェイクが完了していないか
    fn is_handshaking(&self) -> bool;
}

/// [`rustls`] ベースのエンジン
pub struct RustlsEngine {
    conn: rustls::Connection,
}

impl RustlsEngine {
    /// クライアント側のエンジンを作る
    pub fn client(config: Arc<rustls::ClientConfig>, server_name: &str) -> Result<Self, ErrorCode> {
        let name = rustls_pki_types::ServerName::try_from(server_name.to_string())
            .map_err(|_| ErrorCode::Inval)?;
        let conn = rustls::ClientConnection::new(config, name).map_err(|err| {
            debug!(%err, "failed to create client TLS session");
            ErrorCode::Io
        })?;
        Ok(Self {
            conn: rustls::Connection::Client(conn),
        })
    }

    /// サーバー側のエンジンを作る
    pub fn server(config: Arc<rustls::ServerConfig>) -> Result<Self, ErrorCode> {
        let conn = rustls::ServerConnection::new(config).map_err(|err| {
            debug!(%err, "failed to create server TLS session");
            ErrorCode::Io
        })?;
        Ok(Self {
            conn: rustls::Connection::Server(conn),
        })
    }

    fn drain_outbound(&mut self) -> Result<Vec<u8>, ErrorCode> {
        let mut out = Vec::new();
        while self.conn.wants_write() {
            self.conn.write_tls(&mut out).map_err(|err| {
                debug!(%err, "error draining TLS records");
                ErrorCode::Io
            })?;
        }
        Ok(out)
    }
}

impl TlsEngine for RustlsEngine {
    fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ErrorCode> {
        if !plaintext.is_empty() {
            self.conn
                .writer()
                .write_all(plaintext)
                .map_err(|_| ErrorCode::Io)?;
        }
        self.drain_outbound()
    }

    fn unwrap_records(&mut self, ciphertext: &[u8]) -> Result<TlsRecords, ErrorCode> {
        let mut records = TlsRecords::default();
        let mut input = ciphertext;
        while !input.is_empty() {
            let n = self.conn.read_tls(&mut input).map_err(|err| {
                debug!(%err, "error feeding TLS records");
                ErrorCode::Io
            })?;
            if n == 0 {
                break;
            }
            let state = self.conn.process_new_packets().map_err(|err| {
                debug!(%err, "TLS protocol error");
                ErrorCode::Io
            })?;
            if state.peer_has_closed() {
                records.peer_closed = true;
            }
        }
        let mut buf = [0u8; 4096];
        loop {
            match self.conn.reader().read(&mut buf) {
                Ok(0) => break,
                Ok(n) => records.plaintext.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        records.outbound = self.drain_outbound()?;
        Ok(records)
    }

    fn shutdown_records(&mut self) -> Vec<u8> {
        self.conn.send_close_notify();
        self.drain_outbound().unwrap_or_default()
    }

    fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }
}

/// 暗号化しない素通しエンジン
///
/// デコレーターの配管をエンジン抜きで検証するためのもの。
#[derive(Debug, Default)]
pub struct NullTlsEngine;

impl TlsEngine for NullTlsEngine {
    fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ErrorCode> {
        Ok(plaintext.to_vec())
    }

    fn unwrap_records(&mut self, ciphertext: &[u8]) -> Result<TlsRecords, ErrorCode> {
        Ok(TlsRecords {
            plaintext: ciphertext.to_vec(),
            outbound: Vec::new(),
            peer_closed: false,
        })
    }

    fn shutdown_records(&mut self) -> Vec<u8> {
        Vec::new()
    }

    fn is_handshaking(&self) -> bool {
        false
    }
}

struct TlsShared {
    engine: Box<dyn TlsEngine>,
    /// ハンドシェイク完了まで保留された書き込み完了通知 (平文長と一緒に)
    parked: VecDeque<(usize, WriteCallback)>,
}

/// TLS デコレーターハンドル
///
/// `Clone` で複製してもセッション状態は共有される。
pub struct TlsHandle<H> {
    inner: H,
    shared: Rc<RefCell<TlsShared>>,
}

impl<H> Clone for TlsHandle<H>
where
    H: Copy,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner,
            shared: self.shared.clone(),
        }
    }
}

impl<H> TlsHandle<H>
where
    H: Handle + Copy + 'static,
{
    /// 既存のハンドルをエンジンで包む
    pub fn new(inner: H, engine: Box<dyn TlsEngine>) -> Self {
        Self {
            inner,
            shared: Rc::new(RefCell::new(TlsShared {
                engine,
                parked: VecDeque::new(),
            })),
        }
    }

    /// エンジンが送出したい初回レコード (クライアントの first flight) を流す
    ///
    /// クライアント側は接続確立後に 1 回呼ぶ。サーバー側は受信駆動なので不要。
    pub fn start_handshake(&self, rt: &mut Runtime) {
        let initial = {
            let mut shared = self.shared.borrow_mut();
            match shared.engine.wrap(&[]) {
                Ok(records) => records,
                Err(code) => {
                    debug!(id = self.inner.id(), %code, "could not produce first flight");
                    return;
                }
            }
        };
        if !initial.is_empty() {
            trace!(id = self.inner.id(), len = initial.len(), "sending first flight");
            self.inner.write(rt, initial, Box::new(|_, _, _| {}));
        }
    }
}

/// ハンドシェイク完了後にバッファ済み平文を排出し、保留中の完了通知を発火する
fn flush_parked<H>(rt: &mut Runtime, inner: H, shared: &Rc<RefCell<TlsShared>>)
where
    H: Handle + Copy + 'static,
{
    let (pending, parked) = {
        let mut sh = shared.borrow_mut();
        if sh.engine.is_handshaking() {
            return;
        }
        if sh.parked.is_empty() {
            return;
        }
        let pending = sh.engine.wrap(&[]).unwrap_or_default();
        let parked: Vec<_> = sh.parked.drain(..).collect();
        (pending, parked)
    };
    debug!(id = inner.id(), completions = parked.len(), "handshake complete, flushing");
    if !pending.is_empty() {
        inner.write(rt, pending, Box::new(|_, _, _| {}));
    }
    for (len, cb) in parked {
        cb(rt, 0, len);
    }
}

impl<H> Handle for TlsHandle<H>
where
    H: Handle + Copy + 'static,
{
    fn id(&self) -> HandleId {
        self.inner.id()
    }

    fn write(&self, rt: &mut Runtime, data: Vec<u8>, on_complete: WriteCallback) -> usize {
        let len = data.len();
        let (wrapped, handshaking) = {
            let mut shared = self.shared.borrow_mut();
            let handshaking = shared.engine.is_handshaking();
            match shared.engine.wrap(&data) {
                Ok(wrapped) => (wrapped, handshaking),
                Err(code) => {
                    drop(shared);
                    on_complete(rt, code.code(), 0);
                    return len;
                }
            }
        };
        if handshaking {
            // 平文はエンジン側に滞留している。完了通知はハンドシェイク後まで保留
            self.shared.borrow_mut().parked.push_back((len, on_complete));
            if !wrapped.is_empty() {
                self.inner.write(rt, wrapped, Box::new(|_, _, _| {}));
            }
        } else if wrapped.is_empty() {
            on_complete(rt, 0, len);
        } else {
            self.inner.write(
                rt,
                wrapped,
                Box::new(move |rt, err, _| {
                    // 上位には暗号化前の平文長で報告する
                    let written = if err == 0 { len } else { 0 };
                    on_complete(rt, err, written);
                }),
            );
        }
        len
    }

    fn shutdown(&self, rt: &mut Runtime, on_complete: WriteCallback) {
        let notify = self.shared.borrow_mut().engine.shutdown_records();
        if !notify.is_empty() {
            // close_notify を先に積むことで shutdown より前に必ず送られる
            self.inner.write(rt, notify, Box::new(|_, _, _| {}));
        }
        self.inner.shutdown(rt, on_complete);
    }

    fn start_reading(&self, rt: &mut Runtime, mut on_data: ReadCallback) {
        let inner = self.inner;
        let shared = self.shared.clone();
        self.inner.start_reading(
            rt,
            Box::new(move |rt, err, data| {
                if err != 0 {
                    shared.borrow_mut().engine.inbound_error(err);
                    on_data(rt, err, None);
                    return;
                }
                let Some(ciphertext) = data else {
                    on_data(rt, 0, None);
                    return;
                };
                let result = shared.borrow_mut().engine.unwrap_records(&ciphertext);
                match result {
                    Ok(records) => {
                        if !records.outbound.is_empty() {
                            inner.write(rt, records.outbound, Box::new(|_, _, _| {}));
                        }
                        flush_parked(rt, inner, &shared);
                        if !records.plaintext.is_empty() {
                            on_data(rt, 0, Some(records.plaintext));
                        }
                        if records.peer_closed {
                            on_data(rt, ErrorCode::Eof.code(), None);
                        }
                    }
                    Err(code) => {
                        trace!(id = inner.id(), %code, "TLS unwrap failed");
                        on_data(rt, code.code(), None);
                    }
                }
            }),
        );
    }

    fn stop_reading(&self, rt: &mut Runtime) {
        self.inner.stop_reading(rt);
    }

    fn writes_outstanding(&self, rt: &Runtime) -> usize {
        self.inner.writes_outstanding(rt)
    }

    fn close(&self, rt: &mut Runtime) {
        self.inner.close(rt);
    }
}

impl<H> SocketHandle for TlsHandle<H>
where
    H: SocketHandle + Copy + 'static,
{
    fn bind(&self, rt: &mut Runtime, host: &str, port: u16) -> Result<(), ErrorCode> {
        self.inner.bind(rt, host, port)
    }

    fn listen(
        &self,
        _rt: &mut Runtime,
        _backlog: u32,
        _on_accept: AcceptCallback,
    ) -> Result<(), ErrorCode> {
        // 待ち受けは内側のハンドルで行い、accept 後にデコレーターを被せる
        Err(ErrorCode::NotImp)
    }

    fn connect(
        &self,
        rt: &mut Runtime,
        host: &str,
        port: u16,
        on_connect: ConnectCallback,
    ) -> Result<(), ErrorCode> {
        self.inner.connect(rt, host, port, on_connect)
    }

    fn sock_name(&self, rt: &Runtime) -> Option<SocketAddr> {
        self.inner.sock_name(rt)
    }

    fn peer_name(&self, rt: &Runtime) -> Option<SocketAddr> {
        self.inner.peer_name(rt)
    }

    fn set_no_delay(&self, rt: &mut Runtime, no_delay: bool) -> Result<(), ErrorCode> {
        self.inner.set_no_delay(rt, no_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::create_pipe_pair;
    use std::time::Duration;

    fn drain(rt: &mut Runtime) {
        for _ in 0..8 {
            rt.run_once(Some(Duration::ZERO)).unwrap();
        }
    }

    #[test]
    fn null_engine_passes_bytes_through() {
        let mut rt = Runtime::new().unwrap();
        let (client, server) = create_pipe_pair(&mut rt);
        let tls_client = TlsHandle::new(client, Box::new(NullTlsEngine));
        let tls_server = TlsHandle::new(server, Box::new(NullTlsEngine));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        tls_server.start_reading(
            &mut rt,
            Box::new(move |_, err, data| {
                assert_eq!(err, 0);
                sink.borrow_mut().extend_from_slice(&data.unwrap());
            }),
        );
        tls_client.write(&mut rt, b"secret".to_vec(), Box::new(|_, err, n| {
            assert_eq!(err, 0);
            assert_eq!(n, 6);
        }));
        drain(&mut rt);
        assert_eq!(*seen.borrow(), b"secret");
    }

    #[test]
    fn shutdown_reaches_partner_as_eof() {
        let mut rt = Runtime::new().unwrap();
        let (client, server) = create_pipe_pair(&mut rt);
        let tls_client = TlsHandle::new(client, Box::new(NullTlsEngine));
        let eof = Rc::new(RefCell::new(false));
        let flag = eof.clone();
        server.start_reading(
            &mut rt,
            Box::new(move |_, err, _| {
                if err == ErrorCode::Eof.code() {
                    *flag.borrow_mut() = true;
                }
            }),
        );
        tls_client.shutdown(&mut rt, Box::new(|_, err, _| assert_eq!(err, 0)));
        drain(&mut rt);
        assert!(*eof.borrow());
    }

    struct HandshakeEngine {
        handshaking: bool,
    }

    // 最初の受信レコードでハンドシェイクが完了する擬似エンジン
    impl TlsEngine for HandshakeEngine {
        fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ErrorCode> {
            if self.handshaking {
                Ok(Vec::new())
            } else {
                Ok(plaintext.to_vec())
            }
        }

        fn unwrap_records(&mut self, ciphertext: &[u8]) -> Result<TlsRecords, ErrorCode> {
            self.handshaking = false;
            Ok(TlsRecords {
                plaintext: ciphertext.to_vec(),
                outbound: Vec::new(),
                peer_closed: false,
            })
        }

        fn shutdown_records(&mut self) -> Vec<u8> {
            Vec::new()
        }

        fn is_handshaking(&self) -> bool {
            self.handshaking
        }
    }

    struct NotifyEngine;

    // 素通しだが close_notify として固定レコードを吐く擬似エンジン
    impl TlsEngine for NotifyEngine {
        fn wrap(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ErrorCode> {
            Ok(plaintext.to_vec())
        }

        fn unwrap_records(&mut self, ciphertext: &[u8]) -> Result<TlsRecords, ErrorCode> {
            Ok(TlsRecords {
                plaintext: ciphertext.to_vec(),
                outbound: Vec::new(),
                peer_closed: false,
            })
        }

        fn shutdown_records(&mut self) -> Vec<u8> {
            b"close-notify".to_vec()
        }

        fn is_handshaking(&self) -> bool {
            false
        }
    }

    #[test]
    fn close_notify_is_flushed_before_shutdown() {
        let mut rt = Runtime::new().unwrap();
        let (client, server) = create_pipe_pair(&mut rt);
        let tls_client = TlsHandle::new(client, Box::new(NotifyEngine));
        let deliveries: Rc<RefCell<Vec<Option<Vec<u8>>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = deliveries.clone();
        server.start_reading(
            &mut rt,
            Box::new(move |_, err, data| {
                if err == ErrorCode::Eof.code() {
                    sink.borrow_mut().push(None);
                } else {
                    assert_eq!(err, 0);
                    sink.borrow_mut().push(data);
                }
            }),
        );
        tls_client.write(&mut rt, b"payload".to_vec(), Box::new(|_, err, _| assert_eq!(err, 0)));
        tls_client.shutdown(&mut rt, Box::new(|_, err, _| assert_eq!(err, 0)));
        drain(&mut rt);
        // close_notify は shutdown の EOF より必ず先に届く
        assert_eq!(
            *deliveries.borrow(),
            vec![
                Some(b"payload".to_vec()),
                Some(b"close-notify".to_vec()),
                None,
            ]
        );
    }

    struct BrokenEngine;

    impl TlsEngine for BrokenEngine {
        fn wrap(&mut self, _plaintext: &[u8]) -> Result<Vec<u8>, ErrorCode> {
            Err(ErrorCode::Io)
        }

        fn unwrap_records(&mut self, _ciphertext: &[u8]) -> Result<TlsRecords, ErrorCode> {
            Err(ErrorCode::Io)
        }

        fn shutdown_records(&mut self) -> Vec<u8> {
            Vec::new()
        }

        fn is_handshaking(&self) -> bool {
            true
        }
    }

    #[test]
    fn failed_first_flight_sends_nothing() {
        let mut rt = Runtime::new().unwrap();
        let (client, server) = create_pipe_pair(&mut rt);
        let tls_client = TlsHandle::new(client, Box::new(BrokenEngine));
        let seen = Rc::new(RefCell::new(0usize));
        let count = seen.clone();
        server.start_reading(
            &mut rt,
            Box::new(move |_, _, _| {
                *count.borrow_mut() += 1;
            }),
        );
        tls_client.start_handshake(&mut rt);
        drain(&mut rt);
        assert_eq!(*seen.borrow(), 0);
    }

    #[test]
    fn writes_during_handshake_complete_after_it() {
        let mut rt = Runtime::new().unwrap();
        let (client, server) = create_pipe_pair(&mut rt);
        let tls_client = TlsHandle::new(client, Box::new(HandshakeEngine { handshaking: true }));
        tls_client.start_reading(&mut rt, Box::new(|_, _, _| {}));
        let completed = Rc::new(RefCell::new(false));
        let flag = completed.clone();
        tls_client.write(&mut rt, b"early".to_vec(), Box::new(move |_, err, n| {
            assert_eq!(err, 0);
            assert_eq!(n, 5);
            *flag.borrow_mut() = true;
        }));
        drain(&mut rt);
        // ハンドシェイクが終わっていないので完了通知は保留されたまま
        assert!(!*completed.borrow());
        // 相手からのレコード受信でハンドシェイク完了、保留分が発火する
        server.write(&mut rt, b"server flight".to_vec(), Box::new(|_, _, _| {}));
        drain(&mut rt);
        assert!(*completed.borrow());
    }
}
