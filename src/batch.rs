use crate::dataset::SchemaSizes;

/// Dense row-major `f32` matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Zero-filled matrix of the given shape.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wrap row-major data; `None` when the length does not match the shape.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == rows * cols).then_some(Self { rows, cols, data })
    }

    /// Copy the first `rows` rows out of a larger row-major column buffer.
    pub fn from_rows(rows: usize, cols: usize, data: &[f32]) -> Self {
        Self {
            rows,
            cols,
            data: data[..rows * cols].to_vec(),
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Borrow one row.
    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Mutably borrow one row.
    pub fn row_mut(&mut self, row: usize) -> &mut [f32] {
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Row-major backing storage.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Consume into the row-major storage.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// Row-aligned training matrices; row `i` of every matrix belongs to the same compound.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingBatch {
    /// Sampled probabilistic fingerprints, one row per compound.
    pub platts: Matrix,
    /// Formula feature columns.
    pub formulas: Matrix,
    /// Class labels written by the dataset.
    pub labels: Matrix,
    /// Auxiliary labels, present only when the schema declares them.
    pub aux_labels: Option<Matrix>,
}

impl TrainingBatch {
    /// Zero-filled batch shaped by `schema`.
    pub fn zeros(rows: usize, schema: &SchemaSizes) -> Self {
        Self {
            platts: Matrix::zeros(rows, schema.platts),
            formulas: Matrix::zeros(rows, schema.formulas),
            labels: Matrix::zeros(rows, schema.labels),
            aux_labels: schema.aux_labels.map(|cols| Matrix::zeros(rows, cols)),
        }
    }

    /// Number of compounds in the batch.
    pub fn rows(&self) -> usize {
        self.platts.rows()
    }

    /// Consume the batch and free its buffers.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_contiguous_slices() {
        let mut matrix = Matrix::zeros(3, 2);
        matrix.row_mut(1).copy_from_slice(&[4.0, 5.0]);
        assert_eq!(matrix.as_slice(), &[0.0, 0.0, 4.0, 5.0, 0.0, 0.0]);
        assert_eq!(matrix.row(1), &[4.0, 5.0]);
        assert!(Matrix::from_vec(2, 2, vec![1.0; 3]).is_none());
    }

    #[test]
    fn zeros_follows_schema() {
        let schema = SchemaSizes {
            platts: 5,
            formulas: 2,
            labels: 3,
            aux_labels: Some(4),
        };
        let batch = TrainingBatch::zeros(7, &schema);
        assert_eq!(batch.rows(), 7);
        assert_eq!(batch.platts.cols(), 5);
        assert_eq!(batch.aux_labels.as_ref().map(Matrix::cols), Some(4));
    }
}
