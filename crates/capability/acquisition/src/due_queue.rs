//! 按到期时间排序的点位队列。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::point::ScheduledPoint;

/// 排序键：入队时的到期时间 + 入队序号（同一时间的点位之间无顺序要求）。
type DueKey = (i64, u64);

/// 到期队列。
///
/// 以入队时刻的 `next_due_ms` 作为排序键，保证读取时的顺序与键一致；
/// 同一点位（按 id）重复入队会先移除旧条目，队列中每个点位最多出现一次。
/// 所有操作为 O(log n)，`take_due_before` 为 O(k + log n)。
pub struct DueQueue<P> {
    order: BTreeMap<DueKey, Arc<P>>,
    index: HashMap<String, DueKey>,
    seq: u64,
}

impl<P: ScheduledPoint> DueQueue<P> {
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
            index: HashMap::new(),
            seq: 0,
        }
    }

    /// 入队。返回 `true` 表示替换了同 id 的旧条目。
    pub fn insert(&mut self, point: Arc<P>) -> bool {
        let replaced = self.remove(point.id()).is_some();
        self.seq = self.seq.wrapping_add(1);
        let key = (point.next_due_ms(), self.seq);
        self.index.insert(point.id().to_string(), key);
        self.order.insert(key, point);
        replaced
    }

    pub fn remove(&mut self, point_id: &str) -> Option<Arc<P>> {
        let key = self.index.remove(point_id)?;
        self.order.remove(&key)
    }

    pub fn contains(&self, point_id: &str) -> bool {
        self.index.contains_key(point_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn peek_earliest(&self) -> Option<&Arc<P>> {
        self.order.values().next()
    }

    /// 最早条目的到期时间（入队时的值）。
    pub fn earliest_due_ms(&self) -> Option<i64> {
        self.order.keys().next().map(|(due_ms, _)| *due_ms)
    }

    /// 取出所有到期时间 `<= cutoff_ms` 的点位，按到期时间升序返回。
    pub fn take_due_before(&mut self, cutoff_ms: i64) -> Vec<Arc<P>> {
        let due = if cutoff_ms == i64::MAX {
            std::mem::take(&mut self.order)
        } else {
            let later = self.order.split_off(&(cutoff_ms + 1, 0));
            std::mem::replace(&mut self.order, later)
        };
        due.into_values()
            .inspect(|point| {
                self.index.remove(point.id());
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.index.clear();
    }
}

impl<P: ScheduledPoint> Default for DueQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}
