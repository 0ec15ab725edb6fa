use crate::core::CompressedUnit;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// 队列统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueState {
    pub nb_packets: i32,
    /// 累计字节数（含结构体开销）
    pub size: i64,
    /// 累计时长（流时间基单位）
    pub duration: i64,
    pub abort_req: bool,
}

struct QueueInner {
    state: QueueState,
    units: VecDeque<CompressedUnit>,
}

/// 有界 packet 队列
///
/// - 容量固定，与时长无关，用来限制内存
/// - `put` 在队列满或已中止时返回 `Err(unit)`，数据包归还给调用方
/// - `get` 从不阻塞：空队列或已中止时返回 `None`，调用方自己轮询
/// - `abort`/`start` 只控制准入，不清除内容（切换流时使用）
///
/// 背压策略由 Demuxer 线程实现，这里只提供统计。
pub struct PacketQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
}

impl PacketQueue {
    /// 新建的队列处于中止状态，需要 `start()` 之后才接收数据
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                state: QueueState {
                    abort_req: true,
                    ..QueueState::default()
                },
                units: VecDeque::with_capacity(capacity),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn start(&self) {
        self.inner.lock().state.abort_req = false;
    }

    pub fn abort(&self) {
        self.inner.lock().state.abort_req = true;
    }

    /// 清空内容并重置统计（保留中止标志）
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        let abort_req = inner.state.abort_req;
        inner.units.clear();
        inner.state = QueueState {
            abort_req,
            ..QueueState::default()
        };
    }

    pub fn put(&self, unit: CompressedUnit) -> std::result::Result<(), CompressedUnit> {
        let mut inner = self.inner.lock();
        if inner.state.abort_req || inner.units.len() >= self.capacity {
            return Err(unit);
        }
        inner.state.nb_packets += 1;
        inner.state.size += unit.size_plus_sizeof();
        inner.state.duration += unit.duration;
        inner.units.push_back(unit);
        Ok(())
    }

    /// 推入 flush/EOF 哨兵；流索引无效时不推入
    pub fn put_null_unit(&self, stream_index: i32, eof: bool) -> bool {
        if stream_index < 0 {
            return false;
        }
        self.put(CompressedUnit::null_unit(stream_index, eof)).is_ok()
    }

    pub fn get(&self) -> Option<CompressedUnit> {
        let mut inner = self.inner.lock();
        if inner.state.abort_req {
            return None;
        }
        let unit = inner.units.pop_front()?;
        inner.state.nb_packets -= 1;
        inner.state.size -= unit.size_plus_sizeof();
        inner.state.duration -= unit.duration;
        Some(unit)
    }

    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().units.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().units.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().units.len()
    }
}
