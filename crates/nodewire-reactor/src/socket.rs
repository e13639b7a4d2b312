//! 非ブロッキング TCP ソケットハンドル
//!
//! [`mio`] のチャネルをラップし、キュー化された書き込み・読み取りコールバック・
//! connect/listen/accept を提供する。スクリプトエンジンからは独立しており、
//! [`Runtime`] のセレクターに readiness 関心を登録して駆動される。
//!
//! - 書き込み: キューが空で書き込み可能なら即時書き込みを試み、全量書けたら
//!   同一ターンで完了コールバックを呼ぶ。部分書き込みは残りをキューに積み、
//!   write 関心を登録して後続の readiness で排出する
//! - 読み取り: read-ready のたびに再利用バッファへ読めるだけ読み、
//!   読み取りごとに新しいバッファのコピーをコールバックへ渡す
//! - accept: 接続ごとに新しいハンドルを作って同じセレクターに登録する。
//!   個別接続のセットアップ失敗でリスナーは止めない

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::Interest;
use tracing::{debug, error, trace};

use crate::error::ErrorCode;
use crate::handle::{
    AcceptCallback, ConnectCallback, Handle, ReadCallback, SocketHandle, TimeoutCallback,
    WriteCallback,
};
use crate::runtime::{HandleId, Runtime, SlotEntry};

/// キュー上の書き込み 1 件。`shutdown` が立っているものは half-close の番兵
pub(crate) struct QueuedWrite {
    data: Vec<u8>,
    offset: usize,
    shutdown: bool,
    cb: Option<WriteCallback>,
}

pub(crate) struct StreamState {
    stream: TcpStream,
    registered: Option<Interest>,
    connecting: bool,
    connect_cb: Option<ConnectCallback>,
    read_started: bool,
    read_cb: Option<ReadCallback>,
    write_ready: bool,
    write_queue: std::collections::VecDeque<QueuedWrite>,
    queued_bytes: usize,
}

impl StreamState {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            registered: None,
            connecting: false,
            connect_cb: None,
            read_started: false,
            read_cb: None,
            write_ready: false,
            write_queue: std::collections::VecDeque::new(),
            queued_bytes: 0,
        }
    }
}

pub(crate) struct ListenerState {
    listener: TcpListener,
    accept_cb: Option<AcceptCallback>,
}

pub(crate) enum TcpChannel {
    Unopened,
    Listening(ListenerState),
    Stream(StreamState),
}

struct IdleState {
    duration: Duration,
    last_activity: Instant,
    cb: Option<TimeoutCallback>,
}

pub(crate) struct TcpState {
    bound: Option<SocketAddr>,
    chan: TcpChannel,
    pinned: bool,
    idle: Option<IdleState>,
    idle_epoch: u64,
}

impl TcpState {
    fn unopened() -> Self {
        Self {
            bound: None,
            chan: TcpChannel::Unopened,
            pinned: false,
            idle: None,
            idle_epoch: 0,
        }
    }

    fn stream(stream: TcpStream) -> Self {
        Self {
            bound: None,
            chan: TcpChannel::Stream(StreamState::new(stream)),
            pinned: false,
            idle: None,
            idle_epoch: 0,
        }
    }
}

/// TCP ソケットハンドル
///
/// アリーナ上の ID を運ぶだけの薄い値。実体は [`Runtime`] が所有する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHandle {
    id: HandleId,
}

/// サーバー用 (listen する側) の TCP ハンドルを作る
pub fn create_server_handle(rt: &mut Runtime) -> TcpHandle {
    TcpHandle {
        id: rt.allocate_slot(SlotEntry::Tcp(TcpState::unopened())),
    }
}

/// クライアント用 (connect する側) の TCP ハンドルを作る
pub fn create_client_handle(rt: &mut Runtime) -> TcpHandle {
    TcpHandle {
        id: rt.allocate_slot(SlotEntry::Tcp(TcpState::unopened())),
    }
}

fn tcp_mut(rt: &mut Runtime, id: HandleId) -> Option<&mut TcpState> {
    match rt.slots.get_mut(id) {
        Some(Some(SlotEntry::Tcp(st))) => Some(st),
        _ => None,
    }
}

fn tcp_ref(rt: &Runtime, id: HandleId) -> Option<&TcpState> {
    match rt.slots.get(id) {
        Some(Some(SlotEntry::Tcp(st))) => Some(st),
        _ => None,
    }
}

fn stream_mut(rt: &mut Runtime, id: HandleId) -> Option<&mut StreamState> {
    match tcp_mut(rt, id)?.chan {
        TcpChannel::Stream(ref mut ss) => Some(ss),
        _ => None,
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ErrorCode> {
    (host, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or(ErrorCode::NoEnt)
}

/// 現在のストリーム状態から必要な関心を計算して登録し直す
fn update_interest(rt: &mut Runtime, id: HandleId) {
    let token = Runtime::token_for(id);
    let Some(Some(SlotEntry::Tcp(st))) = rt.slots.get_mut(id) else {
        return;
    };
    let TcpChannel::Stream(ss) = &mut st.chan else {
        return;
    };
    let mut want: Option<Interest> = None;
    if ss.read_started {
        want = Some(Interest::READABLE);
    }
    if ss.connecting || !ss.write_queue.is_empty() {
        want = Some(match want {
            Some(w) => w | Interest::WRITABLE,
            None => Interest::WRITABLE,
        });
    }
    if want == ss.registered {
        return;
    }
    let registry = rt.poll.registry();
    let result = match (want, ss.registered) {
        (Some(interest), Some(_)) => registry.reregister(&mut ss.stream, token, interest),
        (Some(interest), None) => registry.register(&mut ss.stream, token, interest),
        (None, Some(_)) => registry.deregister(&mut ss.stream),
        (None, None) => Ok(()),
    };
    match result {
        Ok(()) => {
            ss.registered = want;
            trace!(id, interest = ?want, "interest updated");
        }
        Err(err) => error!(id, %err, "failed to update selector interest"),
    }
}

fn touch_activity(rt: &mut Runtime, id: HandleId) {
    if let Some(st) = tcp_mut(rt, id) {
        if let Some(idle) = &mut st.idle {
            idle.last_activity = Instant::now();
        }
    }
}

/// セレクターからの readiness ディスパッチ入口
pub(crate) fn tcp_event(rt: &mut Runtime, id: HandleId, readable: bool, writable: bool) {
    let is_listener = matches!(
        tcp_mut(rt, id).map(|st| &st.chan),
        Some(TcpChannel::Listening(_))
    );
    if is_listener {
        if readable {
            process_accept(rt, id);
        }
        return;
    }
    if writable {
        let connecting = stream_mut(rt, id).is_some_and(|ss| ss.connecting);
        if connecting {
            process_connect(rt, id);
        }
        process_writes(rt, id);
    }
    if readable {
        process_reads(rt, id);
    }
    touch_activity(rt, id);
}

fn process_accept(rt: &mut Runtime, id: HandleId) {
    loop {
        let accepted = {
            let Some(st) = tcp_mut(rt, id) else { return };
            let TcpChannel::Listening(ls) = &mut st.chan else {
                return;
            };
            ls.listener.accept()
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(id, %peer, "accepted new socket");
                match init_accepted(rt, stream) {
                    Ok(child) => deliver_accept(rt, id, 0, Some(child)),
                    // 接続ごとのセットアップ失敗はその接続だけを落とす
                    Err(err) => error!(id, %err, "error setting up accepted socket"),
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                error!(id, %err, "error accepting a new socket");
                return;
            }
        }
    }
}

fn init_accepted(rt: &mut Runtime, stream: TcpStream) -> io::Result<TcpHandle> {
    stream.set_nodelay(true)?;
    let mut state = TcpState::stream(stream);
    state.pinned = true;
    let id = rt.allocate_slot(SlotEntry::Tcp(state));
    let token = Runtime::token_for(id);
    let registered = {
        let Some(Some(SlotEntry::Tcp(st))) = rt.slots.get_mut(id) else {
            unreachable!("slot just allocated");
        };
        let TcpChannel::Stream(ss) = &mut st.chan else {
            unreachable!("slot just allocated as a stream");
        };
        // 最初の writable イベントで write_ready を立てるために WRITABLE で登録する
        let result = rt.poll.registry().register(&mut ss.stream, token, Interest::WRITABLE);
        if result.is_ok() {
            ss.registered = Some(Interest::WRITABLE);
        }
        result
    };
    if let Err(err) = registered {
        rt.take_slot(id);
        return Err(err);
    }
    rt.pin();
    Ok(TcpHandle { id })
}

fn deliver_accept(rt: &mut Runtime, id: HandleId, err: i32, child: Option<TcpHandle>) {
    let cb = match tcp_mut(rt, id) {
        Some(TcpState {
            chan: TcpChannel::Listening(ls),
            ..
        }) => ls.accept_cb.take(),
        _ => None,
    };
    let Some(mut cb) = cb else { return };
    cb(rt, err, child);
    if let Some(TcpState {
        chan: TcpChannel::Listening(ls),
        ..
    }) = tcp_mut(rt, id)
    {
        if ls.accept_cb.is_none() {
            ls.accept_cb = Some(cb);
        }
    }
}

fn process_connect(rt: &mut Runtime, id: HandleId) {
    enum Outcome {
        NotYet,
        Done(i32),
    }
    let outcome = {
        let Some(ss) = stream_mut(rt, id) else { return };
        match ss.stream.take_error() {
            Ok(Some(err)) => Outcome::Done(ErrorCode::from_io_error(&err).code()),
            Ok(None) => match ss.stream.peer_addr() {
                Ok(_) => Outcome::Done(0),
                Err(err)
                    if err.kind() == io::ErrorKind::NotConnected
                        || err.kind() == io::ErrorKind::WouldBlock =>
                {
                    Outcome::NotYet
                }
                Err(err) => Outcome::Done(ErrorCode::from_io_error(&err).code()),
            },
            Err(err) => Outcome::Done(ErrorCode::from_io_error(&err).code()),
        }
    };
    match outcome {
        Outcome::NotYet => {}
        Outcome::Done(err) => {
            let cb = {
                let Some(ss) = stream_mut(rt, id) else { return };
                ss.connecting = false;
                ss.connect_cb.take()
            };
            debug!(id, err, "connect finished");
            if let Some(cb) = cb {
                cb(rt, err);
            }
        }
    }
}

fn process_writes(rt: &mut Runtime, id: HandleId) {
    enum Step {
        Complete(Option<WriteCallback>, i32, usize),
        Stalled,
        Empty,
    }
    loop {
        let step = {
            let Some(ss) = stream_mut(rt, id) else { return };
            ss.write_ready = true;
            match ss.write_queue.pop_front() {
                None => Step::Empty,
                Some(mut qw) if qw.shutdown => {
                    debug!(id, "sending shutdown");
                    let err = match ss.stream.shutdown(Shutdown::Write) {
                        Ok(()) => 0,
                        Err(e) => ErrorCode::from_io_error(&e).code(),
                    };
                    Step::Complete(qw.cb.take(), err, 0)
                }
                Some(mut qw) => match ss.stream.write(&qw.data[qw.offset..]) {
                    Ok(n) => {
                        trace!(id, n, "wrote queued bytes");
                        qw.offset += n;
                        ss.queued_bytes -= n;
                        if qw.offset == qw.data.len() {
                            let len = qw.data.len();
                            Step::Complete(qw.cb.take(), 0, len)
                        } else {
                            ss.write_ready = false;
                            ss.write_queue.push_front(qw);
                            Step::Stalled
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        ss.write_ready = false;
                        ss.write_queue.push_front(qw);
                        Step::Stalled
                    }
                    Err(e) => {
                        debug!(id, err = %e, "error on write");
                        ss.queued_bytes -= qw.data.len() - qw.offset;
                        Step::Complete(qw.cb.take(), ErrorCode::from_io_error(&e).code(), 0)
                    }
                },
            }
        };
        match step {
            Step::Complete(cb, err, n) => {
                if let Some(cb) = cb {
                    cb(rt, err, n);
                }
            }
            Step::Stalled | Step::Empty => break,
        }
    }
    update_interest(rt, id);
    touch_activity(rt, id);
}

fn process_reads(rt: &mut Runtime, id: HandleId) {
    let mut scratch = std::mem::take(&mut rt.read_buf);
    if scratch.len() != rt.read_buffer_size {
        scratch.resize(rt.read_buffer_size, 0);
    }
    loop {
        let started = match stream_mut(rt, id) {
            Some(ss) => ss.read_started,
            None => break,
        };
        if !started {
            break;
        }
        let result = {
            let Some(ss) = stream_mut(rt, id) else { break };
            ss.stream.read(&mut scratch)
        };
        match result {
            Ok(0) => {
                trace!(id, "read EOF");
                if let Some(ss) = stream_mut(rt, id) {
                    ss.read_started = false;
                }
                update_interest(rt, id);
                deliver_read(rt, id, ErrorCode::Eof.code(), None);
                break;
            }
            Ok(n) => {
                trace!(id, n, "read bytes");
                // 受信バッファは次の read で再利用するため、コピーを渡す
                let data = scratch[..n].to_vec();
                deliver_read(rt, id, 0, Some(data));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(id, err = %e, "error reading from channel");
                deliver_read(rt, id, ErrorCode::from_io_error(&e).code(), None);
                break;
            }
        }
    }
    rt.read_buf = scratch;
    touch_activity(rt, id);
}

fn deliver_read(rt: &mut Runtime, id: HandleId, err: i32, data: Option<Vec<u8>>) {
    let cb = stream_mut(rt, id).and_then(|ss| ss.read_cb.take());
    let Some(mut cb) = cb else { return };
    cb(rt, err, data);
    if let Some(ss) = stream_mut(rt, id) {
        if ss.read_cb.is_none() {
            ss.read_cb = Some(cb);
        }
    }
}

fn idle_fired(rt: &mut Runtime, id: HandleId, epoch: u64) {
    enum Action {
        Fire(TimeoutCallback),
        Rearm(Duration),
        Stale,
    }
    let action = {
        match tcp_mut(rt, id) {
            Some(st) if st.idle_epoch == epoch => match &mut st.idle {
                Some(idle) => {
                    let now = Instant::now();
                    let deadline = idle.last_activity + idle.duration;
                    if now >= deadline {
                        idle.last_activity = now;
                        match idle.cb.take() {
                            Some(cb) => Action::Fire(cb),
                            None => Action::Stale,
                        }
                    } else {
                        // スケジュール後に活動があったので残り時間で再設定する
                        Action::Rearm(deadline - now)
                    }
                }
                None => Action::Stale,
            },
            _ => Action::Stale,
        }
    };
    match action {
        Action::Fire(mut cb) => {
            debug!(id, "idle timeout fired");
            cb(rt);
            let rearm = match tcp_mut(rt, id) {
                Some(st) if st.idle_epoch == epoch => match &mut st.idle {
                    Some(idle) => {
                        if idle.cb.is_none() {
                            idle.cb = Some(cb);
                        }
                        Some(idle.duration)
                    }
                    None => None,
                },
                _ => None,
            };
            if let Some(duration) = rearm {
                rt.set_timer_inner(duration, false, Box::new(move |rt| idle_fired(rt, id, epoch)));
            }
        }
        Action::Rearm(remaining) => {
            rt.set_timer_inner(
                remaining,
                false,
                Box::new(move |rt| idle_fired(rt, id, epoch)),
            );
        }
        Action::Stale => {}
    }
}

impl TcpHandle {
    /// アイドルタイムアウトを設定する
    ///
    /// タイマー発火時に最後の活動からの経過を再計算し、まだアイドル期間が
    /// 満了していなければ残り時間で再設定する。発火後も自動で再アームされる。
    /// このタイマーはループをピンしない (ソケット自身が既にピンしている)
    pub fn set_idle_timeout(&self, rt: &mut Runtime, duration: Duration, on_timeout: TimeoutCallback) {
        let id = self.id;
        let epoch = {
            let Some(st) = tcp_mut(rt, id) else { return };
            st.idle_epoch += 1;
            st.idle = Some(IdleState {
                duration,
                last_activity: Instant::now(),
                cb: Some(on_timeout),
            });
            st.idle_epoch
        };
        rt.set_timer_inner(duration, false, Box::new(move |rt| idle_fired(rt, id, epoch)));
    }

    /// アイドルタイムアウトを解除する
    pub fn clear_idle_timeout(&self, rt: &mut Runtime) {
        if let Some(st) = tcp_mut(rt, self.id) {
            st.idle_epoch += 1;
            st.idle = None;
        }
    }
}

impl Handle for TcpHandle {
    fn id(&self) -> HandleId {
        self.id
    }

    fn write(&self, rt: &mut Runtime, data: Vec<u8>, on_complete: WriteCallback) -> usize {
        let len = data.len();
        let mut cb = Some(on_complete);
        let mut sync: Option<(i32, usize)> = None;
        let mut need_interest = false;
        match stream_mut(rt, self.id) {
            None => sync = Some((ErrorCode::BadF.code(), 0)),
            Some(ss) => {
                if ss.write_queue.is_empty() && ss.write_ready && !ss.connecting {
                    match ss.stream.write(&data) {
                        Ok(n) if n == len => {
                            trace!(id = self.id, n, "immediate write drained");
                            sync = Some((0, len));
                        }
                        Ok(n) => {
                            trace!(id = self.id, n, len, "partial immediate write");
                            ss.write_ready = false;
                            ss.queued_bytes += len - n;
                            ss.write_queue.push_back(QueuedWrite {
                                data,
                                offset: n,
                                shutdown: false,
                                cb: cb.take(),
                            });
                            need_interest = true;
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            ss.write_ready = false;
                            ss.queued_bytes += len;
                            ss.write_queue.push_back(QueuedWrite {
                                data,
                                offset: 0,
                                shutdown: false,
                                cb: cb.take(),
                            });
                            need_interest = true;
                        }
                        Err(e) => {
                            debug!(id = self.id, err = %e, "write error");
                            sync = Some((ErrorCode::from_io_error(&e).code(), 0));
                        }
                    }
                } else {
                    // 先行する書き込みがある間は順序を守るため常にキューへ積む
                    ss.queued_bytes += len;
                    ss.write_queue.push_back(QueuedWrite {
                        data,
                        offset: 0,
                        shutdown: false,
                        cb: cb.take(),
                    });
                    need_interest = true;
                }
            }
        }
        if need_interest {
            update_interest(rt, self.id);
        }
        if let (Some((err, n)), Some(cb)) = (sync, cb.take()) {
            cb(rt, err, n);
        }
        len
    }

    fn shutdown(&self, rt: &mut Runtime, on_complete: WriteCallback) {
        let mut cb = Some(on_complete);
        let queued = match stream_mut(rt, self.id) {
            None => false,
            Some(ss) => {
                // 番兵としてキューに積み、先行する書き込みが掃けてから処理する
                ss.write_queue.push_back(QueuedWrite {
                    data: Vec::new(),
                    offset: 0,
                    shutdown: true,
                    cb: cb.take(),
                });
                true
            }
        };
        if queued {
            update_interest(rt, self.id);
        } else if let Some(cb) = cb {
            cb(rt, ErrorCode::BadF.code(), 0);
        }
    }

    fn start_reading(&self, rt: &mut Runtime, on_data: ReadCallback) {
        let changed = match stream_mut(rt, self.id) {
            Some(ss) if !ss.read_started => {
                ss.read_started = true;
                ss.read_cb = Some(on_data);
                true
            }
            _ => false,
        };
        if changed {
            update_interest(rt, self.id);
        }
    }

    fn stop_reading(&self, rt: &mut Runtime) {
        let changed = match stream_mut(rt, self.id) {
            Some(ss) if ss.read_started => {
                ss.read_started = false;
                true
            }
            _ => false,
        };
        if changed {
            update_interest(rt, self.id);
        }
    }

    fn writes_outstanding(&self, rt: &Runtime) -> usize {
        match tcp_ref(rt, self.id) {
            Some(TcpState {
                chan: TcpChannel::Stream(ss),
                ..
            }) => ss.queued_bytes,
            _ => 0,
        }
    }

    fn close(&self, rt: &mut Runtime) {
        let Some(entry) = rt.take_slot(self.id) else {
            // 二重クローズは無害
            return;
        };
        let SlotEntry::Tcp(mut st) = entry else {
            return;
        };
        match &mut st.chan {
            TcpChannel::Stream(ss) => {
                if ss.registered.is_some() {
                    let _ = rt.poll.registry().deregister(&mut ss.stream);
                }
            }
            TcpChannel::Listening(ls) => {
                let _ = rt.poll.registry().deregister(&mut ls.listener);
            }
            TcpChannel::Unopened => {}
        }
        debug!(id = self.id, "closing handle");
        // タイムアウトはエポックごと破棄される (スロットが消えるため)
        if let TcpChannel::Stream(ss) = st.chan {
            for qw in ss.write_queue {
                if let Some(cb) = qw.cb {
                    cb(rt, ErrorCode::Canceled.code(), 0);
                }
            }
        }
        if st.pinned {
            rt.unpin();
        }
    }
}

impl SocketHandle for TcpHandle {
    fn bind(&self, rt: &mut Runtime, host: &str, port: u16) -> Result<(), ErrorCode> {
        let addr = resolve(host, port)?;
        let Some(st) = tcp_mut(rt, self.id) else {
            return Err(ErrorCode::BadF);
        };
        st.bound = Some(addr);
        Ok(())
    }

    fn listen(
        &self,
        rt: &mut Runtime,
        backlog: u32,
        on_accept: AcceptCallback,
    ) -> Result<(), ErrorCode> {
        let bound = match tcp_mut(rt, self.id) {
            None => return Err(ErrorCode::BadF),
            Some(st) => {
                if !matches!(st.chan, TcpChannel::Unopened) {
                    return Err(ErrorCode::Inval);
                }
                st.bound.ok_or(ErrorCode::Inval)?
            }
        };
        if !rt.policy.allow_listening(&bound) {
            debug!(address = %bound, "listening not allowed by network policy");
            return Err(ErrorCode::Acces);
        }
        // backlog は mio が固定値で bind するため指定できない
        let _ = backlog;
        let mut listener = TcpListener::bind(bound).map_err(|e| {
            debug!(address = %bound, err = %e, "error listening");
            ErrorCode::from_io_error(&e)
        })?;
        let token = Runtime::token_for(self.id);
        rt.poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)
            .map_err(|e| ErrorCode::from_io_error(&e))?;
        debug!(id = self.id, address = %bound, "server listening");
        let Some(st) = tcp_mut(rt, self.id) else {
            return Err(ErrorCode::BadF);
        };
        st.chan = TcpChannel::Listening(ListenerState {
            listener,
            accept_cb: Some(on_accept),
        });
        st.pinned = true;
        rt.pin();
        Ok(())
    }

    fn connect(
        &self,
        rt: &mut Runtime,
        host: &str,
        port: u16,
        on_connect: ConnectCallback,
    ) -> Result<(), ErrorCode> {
        let addr = resolve(host, port)?;
        if !rt.policy.allow_connection(&addr) {
            debug!(address = %addr, "connection not allowed by network policy");
            return Err(ErrorCode::Acces);
        }
        match tcp_mut(rt, self.id) {
            None => return Err(ErrorCode::BadF),
            Some(st) => {
                if !matches!(st.chan, TcpChannel::Unopened) {
                    return Err(ErrorCode::Inval);
                }
                if st.bound.is_some() {
                    // mio は接続前のローカル束縛を公開していない
                    return Err(ErrorCode::NotImp);
                }
            }
        }
        debug!(id = self.id, address = %addr, "client connecting");
        let mut stream = TcpStream::connect(addr).map_err(|e| ErrorCode::from_io_error(&e))?;
        if let Err(err) = stream.set_nodelay(true) {
            trace!(id = self.id, %err, "could not set TCP_NODELAY");
        }
        let token = Runtime::token_for(self.id);
        rt.poll
            .registry()
            .register(&mut stream, token, Interest::WRITABLE)
            .map_err(|e| ErrorCode::from_io_error(&e))?;
        let Some(st) = tcp_mut(rt, self.id) else {
            return Err(ErrorCode::BadF);
        };
        let mut ss = StreamState::new(stream);
        ss.connecting = true;
        ss.connect_cb = Some(on_connect);
        ss.registered = Some(Interest::WRITABLE);
        st.chan = TcpChannel::Stream(ss);
        st.pinned = true;
        rt.pin();
        Ok(())
    }

    fn sock_name(&self, rt: &Runtime) -> Option<SocketAddr> {
        let st = tcp_ref(rt, self.id)?;
        match &st.chan {
            TcpChannel::Listening(ls) => ls.listener.local_addr().ok(),
            TcpChannel::Stream(ss) => ss.stream.local_addr().ok(),
            TcpChannel::Unopened => st.bound,
        }
    }

    fn peer_name(&self, rt: &Runtime) -> Option<SocketAddr> {
        match &tcp_ref(rt, self.id)?.chan {
            TcpChannel::Stream(ss) => ss.stream.peer_addr().ok(),
            _ => None,
        }
    }

    fn set_no_delay(&self, rt: &mut Runtime, no_delay: bool) -> Result<(), ErrorCode> {
        match stream_mut(rt, self.id) {
            Some(ss) => ss
                .stream
                .set_nodelay(no_delay)
                .map_err(|e| ErrorCode::from_io_error(&e)),
            None => Err(ErrorCode::BadF),
        }
    }
}
