//! Fixed arena of reusable column buffers.
//!
//! Every buffer cycles Filling -> Done -> Recycled -> Filling. Each arena cell
//! carries its state as an atomic tag next to the lock guarding its data; the
//! hand-off lists (done order and recycled stack) live behind one coarse lock.
//! Lock order is buffer lock, then hand-off lock. The hand-off path only locks
//! buffers that no filler or consumer can be holding for long.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use tracing::trace;

use crate::batch::{Matrix, TrainingBatch};
use crate::config::BufferPoolConfig;
use crate::dataset::SchemaSizes;

const VACANT: u8 = 0;
const FILLING: u8 = 1;
const DONE: u8 = 2;
const RECYCLED: u8 = 3;

/// Staging area for `rows` complete training rows.
#[derive(Debug, Default)]
struct PooledBuffer {
    fill: usize,
    platts: Vec<f32>,
    formulas: Vec<f32>,
    labels: Vec<f32>,
}

impl PooledBuffer {
    fn allocate(&mut self, rows: usize, schema: &SchemaSizes) {
        self.fill = 0;
        self.platts.resize(rows * schema.platts, 0.0);
        self.formulas.resize(rows * schema.formulas, 0.0);
        self.labels.resize(rows * schema.labels, 0.0);
    }

    fn write_row(&mut self, platts: &[f32], formulas: &[f32], labels: &[f32]) {
        let row = self.fill;
        copy_row(&mut self.platts, row, platts);
        copy_row(&mut self.formulas, row, formulas);
        copy_row(&mut self.labels, row, labels);
        self.fill += 1;
    }
}

fn copy_row(column: &mut [f32], row: usize, values: &[f32]) {
    let width = values.len();
    column[row * width..(row + 1) * width].copy_from_slice(values);
}

struct Cell {
    state: AtomicU8,
    buffer: Mutex<PooledBuffer>,
}

/// Internal hand-off lists guarded by the coarse pool lock.
struct Handoff {
    /// Done cells, oldest first.
    done: VecDeque<usize>,
    recycled: Vec<usize>,
    allocated: usize,
}

/// Counts of arena cells per state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferPoolSnapshot {
    /// Cells currently receiving rows; always the slot count.
    pub filling: usize,
    /// Completed cells waiting for a consumer.
    pub done: usize,
    /// Cells returned by consumers and ready for reuse.
    pub recycled: usize,
    /// Cells that have left the vacant state.
    pub allocated: usize,
}

/// Pool of staging buffers shared by concurrent fillers and one consumer.
pub struct BufferPool {
    schema: SchemaSizes,
    rows: usize,
    cells: Vec<Cell>,
    /// Cell currently receiving rows for each filling slot.
    filling: Vec<AtomicUsize>,
    handoff: Mutex<Handoff>,
}

impl BufferPool {
    /// Arena of `slots` filling buffers plus at least one spare for hand-off.
    pub fn new(config: &BufferPoolConfig, schema: SchemaSizes) -> Self {
        let slots = config.slots.max(1);
        let rows = config.rows.max(1);
        let cells: Vec<Cell> = (0..slots + config.spare.max(1))
            .map(|_| Cell {
                state: AtomicU8::new(VACANT),
                buffer: Mutex::new(PooledBuffer::default()),
            })
            .collect();
        for cell in &cells[..slots] {
            cell.buffer
                .lock()
                .expect("pooled buffer poisoned")
                .allocate(rows, &schema);
            cell.state.store(FILLING, Ordering::Release);
        }
        Self {
            schema,
            rows,
            cells,
            filling: (0..slots).map(AtomicUsize::new).collect(),
            handoff: Mutex::new(Handoff {
                done: VecDeque::new(),
                recycled: Vec::new(),
                allocated: slots,
            }),
        }
    }

    /// Number of buffers filled concurrently.
    pub fn slots(&self) -> usize {
        self.filling.len()
    }

    /// Rows per completed buffer.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Column widths of every buffer.
    pub fn schema(&self) -> SchemaSizes {
        self.schema
    }

    /// Append one row to the buffer filling `slot` (taken modulo the slot count).
    ///
    /// Returns `true` when this row completed the buffer, which is then moved
    /// to Done and replaced in its slot.
    pub fn fill(&self, slot: usize, platts: &[f32], formulas: &[f32], labels: &[f32]) -> bool {
        let slot = slot % self.filling.len();
        loop {
            let cell_index = self.filling[slot].load(Ordering::Acquire);
            let cell = &self.cells[cell_index];
            let mut buffer = cell.buffer.lock().expect("pooled buffer poisoned");
            // the slot only changes cells under the current cell's lock
            if self.filling[slot].load(Ordering::Acquire) != cell_index
                || cell.state.load(Ordering::Acquire) != FILLING
            {
                continue;
            }
            if buffer.fill >= self.rows {
                trace!(slot, "pooled buffer already full; row dropped");
                return false;
            }
            buffer.write_row(platts, formulas, labels);
            if buffer.fill < self.rows {
                return false;
            }
            self.hand_off(slot, cell_index, &mut buffer);
            return true;
        }
    }

    fn hand_off(&self, slot: usize, cell_index: usize, current: &mut PooledBuffer) {
        let mut handoff = self.handoff.lock().expect("buffer pool hand-off poisoned");
        let replacement = if let Some(index) = handoff.recycled.pop() {
            Some(index)
        } else if handoff.allocated < self.cells.len() {
            let index = handoff.allocated;
            handoff.allocated += 1;
            self.cells[index]
                .buffer
                .lock()
                .expect("pooled buffer poisoned")
                .allocate(self.rows, &self.schema);
            Some(index)
        } else if let Some(index) = handoff.done.pop_front() {
            trace!(cell = index, "arena exhausted; evicting oldest done buffer");
            self.cells[index]
                .buffer
                .lock()
                .expect("pooled buffer poisoned")
                .fill = 0;
            Some(index)
        } else {
            None
        };

        let Some(replacement) = replacement else {
            trace!(slot, rows = self.rows, "no buffer available; dropping filled rows");
            current.fill = 0;
            return;
        };
        self.cells[cell_index].state.store(DONE, Ordering::Release);
        handoff.done.push_back(cell_index);
        self.cells[replacement]
            .state
            .store(FILLING, Ordering::Release);
        self.filling[slot].store(replacement, Ordering::Release);
    }

    /// Most recently completed buffer, if any.
    pub fn pop(&self) -> Option<DoneBuffer<'_>> {
        let cell = self
            .handoff
            .lock()
            .expect("buffer pool hand-off poisoned")
            .done
            .pop_back()?;
        Some(DoneBuffer { pool: self, cell })
    }

    /// Count cells per state. Racy while fillers run.
    pub fn snapshot(&self) -> BufferPoolSnapshot {
        let mut snapshot = BufferPoolSnapshot {
            filling: 0,
            done: 0,
            recycled: 0,
            allocated: 0,
        };
        for cell in &self.cells {
            match cell.state.load(Ordering::Acquire) {
                FILLING => snapshot.filling += 1,
                DONE => snapshot.done += 1,
                RECYCLED => snapshot.recycled += 1,
                _ => continue,
            }
            snapshot.allocated += 1;
        }
        snapshot
    }

    /// Fill counter of every allocated cell; used to check recycling.
    pub fn fill_levels(&self) -> Vec<usize> {
        self.cells
            .iter()
            .filter(|cell| cell.state.load(Ordering::Acquire) != VACANT)
            .map(|cell| cell.buffer.lock().expect("pooled buffer poisoned").fill)
            .collect()
    }

    fn recycle(&self, cell_index: usize) {
        self.cells[cell_index]
            .buffer
            .lock()
            .expect("pooled buffer poisoned")
            .fill = 0;
        let mut handoff = self.handoff.lock().expect("buffer pool hand-off poisoned");
        self.cells[cell_index]
            .state
            .store(RECYCLED, Ordering::Release);
        handoff.recycled.push(cell_index);
    }
}

/// A completed buffer taken from the pool; returned to Recycled when dropped.
pub struct DoneBuffer<'a> {
    pool: &'a BufferPool,
    cell: usize,
}

impl DoneBuffer<'_> {
    /// Copy the staged rows into a batch and recycle the buffer.
    pub fn materialize(self) -> TrainingBatch {
        let schema = self.pool.schema;
        let buffer = self.pool.cells[self.cell]
            .buffer
            .lock()
            .expect("pooled buffer poisoned");
        let rows = buffer.fill;
        let batch = TrainingBatch {
            platts: Matrix::from_rows(rows, schema.platts, &buffer.platts),
            formulas: Matrix::from_rows(rows, schema.formulas, &buffer.formulas),
            labels: Matrix::from_rows(rows, schema.labels, &buffer.labels),
            aux_labels: None,
        };
        drop(buffer);
        batch
    }
}

impl Drop for DoneBuffer<'_> {
    fn drop(&mut self) {
        self.pool.recycle(self.cell);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> SchemaSizes {
        SchemaSizes {
            platts: 3,
            formulas: 2,
            labels: 1,
            aux_labels: None,
        }
    }

    fn pool(slots: usize, rows: usize, spare: usize) -> BufferPool {
        BufferPool::new(&BufferPoolConfig { slots, rows, spare }, schema())
    }

    fn fill_row(pool: &BufferPool, slot: usize, value: f32) -> bool {
        pool.fill(slot, &[value; 3], &[value; 2], &[value])
    }

    fn assert_partition(pool: &BufferPool) {
        let snapshot = pool.snapshot();
        assert_eq!(
            snapshot.filling + snapshot.done + snapshot.recycled,
            snapshot.allocated
        );
        assert_eq!(snapshot.filling, pool.slots());
    }

    #[test]
    fn full_buffer_moves_to_done_and_materializes() {
        let pool = pool(1, 2, 2);
        assert!(!fill_row(&pool, 0, 1.0));
        assert!(pool.pop().is_none());
        assert!(fill_row(&pool, 0, 2.0));
        assert_partition(&pool);
        assert_eq!(pool.snapshot().done, 1);

        let batch = pool.pop().unwrap().materialize();
        assert_eq!(batch.rows(), 2);
        assert_eq!(batch.platts.as_slice(), &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        assert_eq!(batch.labels.as_slice(), &[1.0, 2.0]);

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.recycled, 1);
        assert_eq!(snapshot.done, 0);
        assert_partition(&pool);
        assert!(pool.fill_levels().iter().all(|&fill| fill <= 1));
    }

    #[test]
    fn pop_returns_most_recent_first() {
        let pool = pool(1, 1, 3);
        fill_row(&pool, 0, 1.0);
        fill_row(&pool, 0, 2.0);
        assert_eq!(pool.pop().unwrap().materialize().labels.as_slice(), &[2.0]);
        assert_eq!(pool.pop().unwrap().materialize().labels.as_slice(), &[1.0]);
        assert!(pool.pop().is_none());
    }

    #[test]
    fn exhausted_arena_evicts_oldest_done() {
        let pool = pool(1, 1, 1);
        for value in 1..=4 {
            fill_row(&pool, 0, value as f32);
            assert_partition(&pool);
        }
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.allocated, 2);
        assert_eq!(pool.pop().unwrap().materialize().labels.as_slice(), &[4.0]);
        assert!(pool.pop().is_none());
    }

    #[test]
    fn dropped_done_buffer_is_recycled_with_zero_fill() {
        let pool = pool(2, 1, 2);
        fill_row(&pool, 0, 1.0);
        fill_row(&pool, 1, 2.0);
        drop(pool.pop());
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.recycled, 1);
        assert_eq!(snapshot.done, 1);
        assert_partition(&pool);
        assert!(pool.fill_levels().iter().all(|&fill| fill <= 1));
    }
}
