use parking_lot::Mutex;
use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// 单生产者/单消费者 f32 环形缓冲区
///
/// 底层是 `ringbuf::HeapRb`，拆成生产端和消费端分别加锁：
/// 音频线程只碰生产端，设备回调只碰消费端，两把锁之间没有竞争。
/// 写入/读取都是全有或全无：空间或数据不足时直接失败，不做部分传输。
pub struct SampleRingBuffer {
    capacity: usize,
    producer: Mutex<HeapProd<f32>>,
    consumer: Mutex<HeapCons<f32>>,
}

impl SampleRingBuffer {
    pub fn new(capacity: usize) -> Self {
        // HeapRb 至少需要一个槽位，可用容量由 `capacity` 限制
        let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();
        Self {
            capacity,
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
        }
    }

    /// 可用容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 丢弃所有已缓冲的采样
    pub fn clear(&self) {
        self.consumer.lock().clear();
    }

    pub fn available_write(&self) -> usize {
        let producer = self.producer.lock();
        self.capacity.saturating_sub(producer.occupied_len())
    }

    pub fn available_read(&self) -> usize {
        self.consumer.lock().occupied_len()
    }

    /// 已缓冲的采样数（写端视角）
    pub fn buffered(&self) -> usize {
        self.producer.lock().occupied_len()
    }

    /// 写端视角的“空”
    pub fn is_empty(&self) -> bool {
        self.buffered() == 0
    }

    /// 写入全部 `samples`，空间不足时返回 false 且不写入任何数据
    pub fn write(&self, samples: &[f32]) -> bool {
        let mut producer = self.producer.lock();
        let vacant = producer.vacant_len().min(self.capacity.saturating_sub(producer.occupied_len()));
        if samples.len() > vacant {
            return false;
        }
        producer.push_slice(samples) == samples.len()
    }

    /// 读出 `count` 个采样；`out` 为 None 时只丢弃（静音时使用）。
    /// 数据不足时返回 false 且不移动读指针。
    pub fn read(&self, out: Option<&mut [f32]>, count: usize) -> bool {
        let mut consumer = self.consumer.lock();
        if count > consumer.occupied_len() {
            return false;
        }
        match out {
            Some(out) if out.len() < count => false,
            Some(out) => consumer.pop_slice(&mut out[..count]) == count,
            None => consumer.skip(count) == count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_invariant() {
        let rb = SampleRingBuffer::new(8);
        assert_eq!(rb.capacity(), 8);
        assert_eq!(rb.available_write() + rb.available_read(), 8);
        assert!(rb.write(&[1.0, 2.0, 3.0]));
        assert_eq!(rb.available_write() + rb.available_read(), 8);
        assert!(rb.read(None, 2));
        assert_eq!(rb.available_write() + rb.available_read(), 8);
        assert!(rb.write(&[0.5; 7]));
        assert_eq!(rb.available_read(), 8);
        assert_eq!(rb.available_write(), 0);
    }

    #[test]
    fn test_all_or_nothing() {
        let rb = SampleRingBuffer::new(4);
        assert!(rb.write(&[1.0, 2.0, 3.0]));
        assert!(!rb.write(&[4.0, 5.0]));
        assert_eq!(rb.available_read(), 3);

        let mut out = [0.0f32; 4];
        assert!(!rb.read(Some(&mut out), 4));
        assert_eq!(out, [0.0; 4]);
        assert_eq!(rb.available_read(), 3);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let rb = SampleRingBuffer::new(5);
        let mut out = [0.0f32; 4];
        assert!(rb.write(&[1.0, 2.0, 3.0, 4.0]));
        assert!(rb.read(Some(&mut out), 3));
        assert_eq!(&out[..3], &[1.0, 2.0, 3.0]);
        assert!(rb.write(&[5.0, 6.0, 7.0, 8.0]));
        assert!(rb.read(Some(&mut out), 4));
        assert_eq!(out, [4.0, 5.0, 6.0, 7.0]);
        assert!(rb.read(Some(&mut out[..1]), 1));
        assert_eq!(out[0], 8.0);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_drop_without_copy_and_clear() {
        let rb = SampleRingBuffer::new(6);
        assert!(rb.write(&[1.0; 6]));
        assert!(rb.read(None, 4));
        assert_eq!(rb.buffered(), 2);
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.available_write(), 6);
    }

    #[test]
    fn test_zero_capacity_accepts_nothing() {
        let rb = SampleRingBuffer::new(0);
        assert_eq!(rb.capacity(), 0);
        assert_eq!(rb.available_write(), 0);
        assert!(!rb.write(&[1.0]));
        assert!(rb.write(&[]));
        assert!(rb.is_empty());
    }

    #[test]
    fn test_spsc_threads_transfer_in_order() {
        let rb = Arc::new(SampleRingBuffer::new(64));
        let total = 10_000usize;

        let writer = {
            let rb = rb.clone();
            thread::spawn(move || {
                let mut next = 0usize;
                while next < total {
                    let chunk: Vec<f32> = (next..(next + 7).min(total)).map(|v| v as f32).collect();
                    if rb.write(&chunk) {
                        next += chunk.len();
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut expected = 0usize;
        let mut buf = [0.0f32; 5];
        while expected < total {
            let n = rb.available_read().min(buf.len()).min(total - expected);
            if n > 0 && rb.read(Some(&mut buf[..n]), n) {
                for v in &buf[..n] {
                    assert_eq!(*v, expected as f32);
                    expected += 1;
                }
            } else {
                thread::yield_now();
            }
        }
        writer.join().unwrap();
        assert!(rb.is_empty());
    }
}
