//! プロセス内パイプ
//!
//! カーネルのソケットを介さずに 2 つのハンドルを直結するペア。書き込みは
//! 相手側ハンドルの受信キューへ積まれ、タスクキュー経由で読み取り
//! コールバックに配達される。readiness セレクターには一切登録されない。
//!
//! TCP ハンドルと同じ [`Handle`] インターフェースを実装するため、
//! 上位層はソケットとパイプを区別せずに扱える。アドレス系の操作は
//! `ENOTIMP` で拒否する。

use std::collections::VecDeque;
use std::net::SocketAddr;

use tracing::{debug, trace};

use crate::error::ErrorCode;
use crate::handle::{
    AcceptCallback, ConnectCallback, Handle, ReadCallback, SocketHandle, WriteCallback,
};
use crate::runtime::{HandleId, Runtime, SlotEntry};

/// 受信キューの 1 件。`None` は EOF の番兵
type PipeMessage = Option<Vec<u8>>;

pub(crate) struct PipeState {
    partner: Option<HandleId>,
    reading: bool,
    read_cb: Option<ReadCallback>,
    inbox: VecDeque<PipeMessage>,
    drain_scheduled: bool,
    shut: bool,
}

impl PipeState {
    fn new() -> Self {
        Self {
            partner: None,
            reading: false,
            read_cb: None,
            inbox: VecDeque::new(),
            drain_scheduled: false,
            shut: false,
        }
    }
}

/// パイプの片端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeHandle {
    id: HandleId,
}

/// 直結されたパイプのペアを作る
///
/// 戻り値は (クライアント側, サーバー側)。区別は呼び出し側の慣習で、
/// 両端の能力は同一。
pub fn create_pipe_pair(rt: &mut Runtime) -> (PipeHandle, PipeHandle) {
    let a = rt.allocate_slot(SlotEntry::Pipe(PipeState::new()));
    let b = rt.allocate_slot(SlotEntry::Pipe(PipeState::new()));
    if let Some(st) = pipe_mut(rt, a) {
        st.partner = Some(b);
    }
    if let Some(st) = pipe_mut(rt, b) {
        st.partner = Some(a);
    }
    debug!(client = a, server = b, "pipe pair created");
    (PipeHandle { id: a }, PipeHandle { id: b })
}

fn pipe_mut(rt: &mut Runtime, id: HandleId) -> Option<&mut PipeState> {
    match rt.slots.get_mut(id) {
        Some(Some(SlotEntry::Pipe(st))) => Some(st),
        _ => None,
    }
}

/// 相手側の受信キューへメッセージを積み、配達タスクを仕込む
fn push_to_partner(rt: &mut Runtime, from: HandleId, message: PipeMessage) -> Result<(), ErrorCode> {
    let partner = match pipe_mut(rt, from) {
        Some(st) => st.partner.ok_or(ErrorCode::Pipe)?,
        None => return Err(ErrorCode::BadF),
    };
    let Some(st) = pipe_mut(rt, partner) else {
        return Err(ErrorCode::Pipe);
    };
    st.inbox.push_back(message);
    schedule_drain(rt, partner);
    Ok(())
}

fn schedule_drain(rt: &mut Runtime, id: HandleId) {
    let Some(st) = pipe_mut(rt, id) else { return };
    if st.drain_scheduled || !st.reading {
        return;
    }
    st.drain_scheduled = true;
    rt.enqueue_task(move |rt| drain_inbox(rt, id));
}

fn drain_inbox(rt: &mut Runtime, id: HandleId) {
    if let Some(st) = pipe_mut(rt, id) {
        st.drain_scheduled = false;
    }
    loop {
        let message = {
            let Some(st) = pipe_mut(rt, id) else { return };
            if !st.reading {
                // 一時停止中は受信キューに残し、再開時に続きから配達する
                return;
            }
            match st.inbox.pop_front() {
                Some(m) => m,
                None => return,
            }
        };
        match message {
            Some(data) => {
                trace!(id, len = data.len(), "pipe delivering bytes");
                deliver_read(rt, id, 0, Some(data));
            }
            None => {
                trace!(id, "pipe delivering EOF");
                if let Some(st) = pipe_mut(rt, id) {
                    st.reading = false;
                }
                deliver_read(rt, id, ErrorCode::Eof.code(), None);
                return;
            }
        }
    }
}

fn deliver_read(rt: &mut Runtime, id: HandleId, err: i32, data: Option<Vec<u8>>) {
    let cb = pipe_mut(rt, id).and_then(|st| st.read_cb.take());
    let Some(mut cb) = cb else { return };
    cb(rt, err, data);
    if let Some(st) = pipe_mut(rt, id) {
        if st.read_cb.is_none() {
            st.read_cb = Some(cb);
        }
    }
}

impl Handle for PipeHandle {
    fn id(&self) -> HandleId {
        self.id
    }

    fn write(&self, rt: &mut Runtime, data: Vec<u8>, on_complete: WriteCallback) -> usize {
        let len = data.len();
        let shut = pipe_mut(rt, self.id).map(|st| st.shut);
        match shut {
            None => {
                on_complete(rt, ErrorCode::BadF.code(), 0);
                return len;
            }
            Some(true) => {
                on_complete(rt, ErrorCode::Pipe.code(), 0);
                return len;
            }
            Some(false) => {}
        }
        match push_to_partner(rt, self.id, Some(data)) {
            Ok(()) => {
                // 完了通知も配達と同じくタスクキュー経由で非同期に届ける
                rt.enqueue_task(move |rt| on_complete(rt, 0, len));
            }
            Err(code) => on_complete(rt, code.code(), 0),
        }
        len
    }

    fn shutdown(&self, rt: &mut Runtime, on_complete: WriteCallback) {
        let already_shut = pipe_mut(rt, self.id).map(|st| std::mem::replace(&mut st.shut, true));
        match already_shut {
            None => {
                on_complete(rt, ErrorCode::BadF.code(), 0);
                return;
            }
            Some(true) => {
                on_complete(rt, ErrorCode::Pipe.code(), 0);
                return;
            }
            Some(false) => {}
        }
        match push_to_partner(rt, self.id, None) {
            Ok(()) => rt.enqueue_task(move |rt| on_complete(rt, 0, 0)),
            Err(code) => on_complete(rt, code.code(), 0),
        }
    }

    fn start_reading(&self, rt: &mut Runtime, on_data: ReadCallback) {
        let Some(st) = pipe_mut(rt, self.id) else { return };
        st.reading = true;
        st.read_cb = Some(on_data);
        schedule_drain(rt, self.id);
    }

    fn stop_reading(&self, rt: &mut Runtime) {
        if let Some(st) = pipe_mut(rt, self.id) {
            st.reading = false;
        }
    }

    fn writes_outstanding(&self, _rt: &Runtime) -> usize {
        // パイプの書き込みは即座に相手のキューへ移るため滞留しない
        0
    }

    fn close(&self, rt: &mut Runtime) {
        let Some(entry) = rt.take_slot(self.id) else {
            return;
        };
        let SlotEntry::Pipe(st) = entry else { return };
        debug!(id = self.id, "closing pipe");
        // 相手側には EOF を届けてからリンクを断つ
        if let Some(partner) = st.partner {
            if let Some(ps) = pipe_mut(rt, partner) {
                ps.partner = None;
                ps.inbox.push_back(None);
            }
            schedule_drain(rt, partner);
        }
    }
}

impl SocketHandle for PipeHandle {
    fn bind(&self, _rt: &mut Runtime, _host: &str, _port: u16) -> Result<(), ErrorCode> {
        Err(ErrorCode::NotImp)
    }

    fn listen(
        &self,
        _rt: &mut Runtime,
        _backlog: u32,
        _on_accept: AcceptCallback,
    ) -> Result<(), ErrorCode> {
        Err(ErrorCode::NotImp)
    }

    fn connect(
        &self,
        _rt: &mut Runtime,
        _host: &str,
        _port: u16,
        _on_connect: ConnectCallback,
    ) -> Result<(), ErrorCode> {
        Err(ErrorCode::NotImp)
    }

    fn sock_name(&self, _rt: &Runtime) -> Option<SocketAddr> {
        None
    }

    fn peer_name(&self, _rt: &Runtime) -> Option<SocketAddr> {
        None
    }

    fn set_no_delay(&self, _rt: &mut Runtime, _no_delay: bool) -> Result<(), ErrorCode> {
        Ok(())
    }
}
