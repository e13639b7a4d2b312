//! セレクター駆動イベントループ
//!
//! ランタイムインスタンスごとに 1 つの [`mio::Poll`] を持ち、登録された
//! 全ハンドルの readiness をここで多重化する。スクリプトから見えるオブジェクトの
//! 状態変更はすべてこのループを回す単一論理スレッド上で行われ、ワーカースレッドは
//! [`RuntimeHandle::execute`] によるタスク投入でのみ再入できる。
//!
//! ループの 1 イテレーション: タスクキューを 1 回排出 → タイマーから導出した
//! タイムアウトで poll → ready になったハンドルへイベント順にディスパッチ →
//! 期限切れタイマーの発火。

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token, Waker};
use tracing::{debug, trace, warn};

use crate::pipe::PipeState;
use crate::policy::{AllowAll, NetworkPolicy};
use crate::socket::{self, TcpState};

/// ハンドルのアリーナ上の識別子
///
/// パートナー参照 (パイプ) やコールバックの再入はすべてこの整数 ID を介して
/// 行い、ハンドル同士の直接参照 (循環参照) を作らない。
pub type HandleId = usize;

/// 読み取りバッファのデフォルトサイズ
pub const READ_BUFFER_SIZE: usize = 32767;

/// イベントループ上で実行されるタスク
pub type Task = Box<dyn FnOnce(&mut Runtime)>;

/// ワーカースレッドから投入されるタスク
pub type SendTask = Box<dyn FnOnce(&mut Runtime) + Send>;

/// タイマーの識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

const WAKER_TOKEN: Token = Token(0);

/// アリーナの 1 スロット
pub(crate) enum SlotEntry {
    Tcp(TcpState),
    Pipe(PipeState),
}

/// タイマーヒープのエントリー (deadline の早い順に取り出す)
struct TimerEntry {
    deadline: Instant,
    seq: u64,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap は最大ヒープなので逆順にする
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.seq.cmp(&self.seq))
    }
}

struct TimerRecord {
    cb: Task,
    /// 発火またはキャンセルまでループの終了を防ぐかどうか
    pin: bool,
}

/// ランタイムコンテキスト
///
/// セレクター・ハンドルアリーナ・タスクキュー・タイマーキュー・ピンカウント・
/// ネットワークポリシーを 1 つのオブジェクトにまとめ、必要とするコンポーネントへ
/// 参照で渡す。グローバルな状態は持たない。
pub struct Runtime {
    pub(crate) poll: Poll,
    waker: Arc<Waker>,
    pub(crate) slots: Vec<Option<SlotEntry>>,
    free: Vec<HandleId>,
    /// ディスパッチ中に解放されたスロット。遅れて届いた readiness イベントが
    /// 再利用済みスロットに触れないよう、バッチ終了後にのみ再利用へ回す
    pending_free: Vec<HandleId>,
    in_dispatch: bool,
    tasks: VecDeque<Task>,
    tx: Sender<SendTask>,
    rx: Receiver<SendTask>,
    timers: BinaryHeap<TimerEntry>,
    timer_records: HashMap<u64, TimerRecord>,
    next_timer_seq: u64,
    pins: usize,
    pub(crate) policy: Box<dyn NetworkPolicy>,
    pub(crate) read_buf: Vec<u8>,
    pub(crate) read_buffer_size: usize,
    events: Events,
}

/// ワーカースレッドに渡す再入用ハンドル
///
/// ブロッキング I/O や DNS 解決を担うスレッドは、結果をここ経由で
/// スクリプトスレッドへ運ぶ。共有可変参照は一切渡らない。
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: Sender<SendTask>,
    waker: Arc<Waker>,
}

impl RuntimeHandle {
    /// タスクをスクリプトスレッドのキューへ投入してループを起こす
    pub fn execute(&self, task: impl FnOnce(&mut Runtime) + Send + 'static) {
        // 受信側が先に終了していても worker 側は気にしない
        let _ = self.tx.send(Box::new(task));
        let _ = self.waker.wake();
    }
}

impl Runtime {
    /// ランタイムを作成する
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (tx, rx) = mpsc::channel();
        Ok(Self {
            poll,
            waker,
            slots: Vec::new(),
            free: Vec::new(),
            pending_free: Vec::new(),
            in_dispatch: false,
            tasks: VecDeque::new(),
            tx,
            rx,
            timers: BinaryHeap::new(),
            timer_records: HashMap::new(),
            next_timer_seq: 1,
            pins: 0,
            policy: Box::new(AllowAll),
            read_buf: Vec::new(),
            read_buffer_size: READ_BUFFER_SIZE,
            events: Events::with_capacity(256),
        })
    }

    /// 読み取りバッファのサイズを変更する (全ソケットで共用)
    pub fn set_read_buffer_size(&mut self, size: usize) {
        self.read_buffer_size = size;
        self.read_buf.clear();
    }

    /// ネットワークポリシーを設定する
    pub fn set_network_policy(&mut self, policy: Box<dyn NetworkPolicy>) {
        self.policy = policy;
    }

    /// ワーカースレッド用の再入ハンドルを作る
    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            tx: self.tx.clone(),
            waker: self.waker.clone(),
        }
    }

    /// タスクをループの次の排出タイミングで実行する
    pub fn enqueue_task(&mut self, task: impl FnOnce(&mut Runtime) + 'static) {
        self.tasks.push_back(Box::new(task));
    }

    /// ループの終了を防ぐ未完了作業を 1 つ増やす
    pub fn pin(&mut self) {
        self.pins += 1;
        trace!(pins = self.pins, "pinned");
    }

    /// [`Runtime::pin`] の対
    pub fn unpin(&mut self) {
        debug_assert!(self.pins > 0);
        self.pins = self.pins.saturating_sub(1);
        trace!(pins = self.pins, "unpinned");
    }

    /// 現在のピンカウント
    pub fn pin_count(&self) -> usize {
        self.pins
    }

    /// ワンショットタイマーを登録する (発火かクリアまでループをピンする)
    pub fn set_timer(
        &mut self,
        delay: Duration,
        cb: impl FnOnce(&mut Runtime) + 'static,
    ) -> TimerId {
        self.set_timer_inner(delay, true, Box::new(cb))
    }

    pub(crate) fn set_timer_inner(&mut self, delay: Duration, pin: bool, cb: Task) -> TimerId {
        let seq = self.next_timer_seq;
        self.next_timer_seq += 1;
        self.timers.push(TimerEntry {
            deadline: Instant::now() + delay,
            seq,
        });
        self.timer_records.insert(seq, TimerRecord { cb, pin });
        if pin {
            self.pin();
        }
        trace!(seq, ?delay, pin, "timer set");
        TimerId(seq)
    }

    /// タイマーを取り消す。既に発火・取り消し済みなら何もしない
    pub fn clear_timer(&mut self, id: TimerId) {
        if let Some(record) = self.timer_records.remove(&id.0) {
            if record.pin {
                self.unpin();
            }
            trace!(seq = id.0, "timer cleared");
        }
    }

    /// ピンされた作業が残っている限りループを回す
    ///
    /// セレクター自体の失敗は回復不能で、そのままエラーを返して終了する。
    pub fn run(&mut self) -> io::Result<()> {
        while self.pins > 0 || !self.tasks.is_empty() {
            self.run_once(None)?;
        }
        debug!("event loop drained");
        Ok(())
    }

    /// ループを 1 イテレーションだけ回す
    ///
    /// `timeout` は poll の待ち時間の上限。タスクが残っている場合は待たない。
    pub fn run_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        // ワーカースレッドからのタスクを取り込み、ローカルキューを 1 回排出する
        while let Ok(task) = self.rx.try_recv() {
            self.tasks.push_back(task);
        }
        self.run_tasks();

        let poll_timeout = if self.tasks.is_empty() {
            match (timeout, self.next_timer_delay()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        } else {
            // タスクが積まれている間は poll でブロックしない
            Some(Duration::ZERO)
        };

        let mut events = std::mem::replace(&mut self.events, Events::with_capacity(0));
        match self.poll.poll(&mut events, poll_timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                self.events = events;
                return Err(err);
            }
        }

        self.in_dispatch = true;
        for event in events.iter() {
            let token = event.token();
            if token == WAKER_TOKEN {
                continue;
            }
            let id = token.0 - 1;
            trace!(
                id,
                readable = event.is_readable(),
                writable = event.is_writable(),
                "dispatch"
            );
            match self.slots.get(id) {
                Some(Some(SlotEntry::Tcp(_))) => {
                    socket::tcp_event(self, id, event.is_readable(), event.is_writable());
                }
                Some(Some(SlotEntry::Pipe(_))) => {
                    // パイプはセレクターに登録されない
                    warn!(id, "unexpected readiness event for a pipe handle");
                }
                _ => {
                    // ディスパッチバッチ中にクローズされたハンドルの残響
                    trace!(id, "stale readiness event ignored");
                }
            }
        }
        self.in_dispatch = false;
        self.events = events;
        self.free.append(&mut self.pending_free);

        self.fire_timers();
        Ok(())
    }

    fn run_tasks(&mut self) {
        let count = self.tasks.len();
        for _ in 0..count {
            let Some(task) = self.tasks.pop_front() else {
                break;
            };
            task(self);
        }
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        while let Some(top) = self.timers.peek() {
            if top.deadline > now {
                break;
            }
            let seq = top.seq;
            self.timers.pop();
            if let Some(record) = self.timer_records.remove(&seq) {
                if record.pin {
                    self.unpin();
                }
                trace!(seq, "timer fired");
                (record.cb)(self);
            }
        }
    }

    /// 次のタイマーまでの残り時間。キャンセル済みエントリーはここで破棄する
    fn next_timer_delay(&mut self) -> Option<Duration> {
        let now = Instant::now();
        while let Some(top) = self.timers.peek() {
            if !self.timer_records.contains_key(&top.seq) {
                self.timers.pop();
                continue;
            }
            return Some(top.deadline.saturating_duration_since(now));
        }
        None
    }

    pub(crate) fn allocate_slot(&mut self, entry: SlotEntry) -> HandleId {
        if let Some(id) = self.free.pop() {
            self.slots[id] = Some(entry);
            id
        } else {
            self.slots.push(Some(entry));
            self.slots.len() - 1
        }
    }

    pub(crate) fn take_slot(&mut self, id: HandleId) -> Option<SlotEntry> {
        let entry = self.slots.get_mut(id)?.take()?;
        if self.in_dispatch {
            self.pending_free.push(id);
        } else {
            self.free.push(id);
        }
        Some(entry)
    }

    pub(crate) fn token_for(id: HandleId) -> Token {
        Token(id + 1)
    }
}
