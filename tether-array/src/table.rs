use std::fmt::Debug;
use std::sync::Arc;

use itertools::Itertools;
use log::debug;
use tether_dtype::DType;
use tether_error::{TetherResult, tether_bail, tether_err};

use crate::Array;

/// Columns of one type, stored together for block-wise iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBlock {
    dtype: DType,
    columns: Vec<usize>,
}

impl ColumnBlock {
    /// The type shared by every column in the block.
    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    /// Logical indices of the block's columns, in block order.
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }
}

/// The column types of a table and their grouping into blocks.
///
/// Blocks are formed from identical types in order of first appearance, so the mapping from a
/// logical column index to its `(block, offset)` location is a pure function of the types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    dtypes: Vec<DType>,
    blocks: Vec<ColumnBlock>,
    locations: Vec<(usize, usize)>,
}

impl TableSchema {
    /// Group `dtypes` into blocks.
    pub fn new(dtypes: Vec<DType>) -> Self {
        let mut blocks: Vec<ColumnBlock> = Vec::new();
        let mut locations = Vec::with_capacity(dtypes.len());
        for (i, dtype) in dtypes.iter().enumerate() {
            let block = match blocks.iter().position(|b| &b.dtype == dtype) {
                Some(block) => block,
                None => {
                    blocks.push(ColumnBlock {
                        dtype: dtype.clone(),
                        columns: Vec::new(),
                    });
                    blocks.len() - 1
                }
            };
            locations.push((block, blocks[block].columns.len()));
            blocks[block].columns.push(i);
        }
        Self {
            dtypes,
            blocks,
            locations,
        }
    }

    /// Number of logical columns.
    pub fn ncols(&self) -> usize {
        self.dtypes.len()
    }

    /// Every column type, in logical order.
    pub fn dtypes(&self) -> &[DType] {
        &self.dtypes
    }

    /// Type of column `index`.
    pub fn dtype(&self, index: usize) -> &DType {
        &self.dtypes[index]
    }

    /// The `(block, offset)` location of column `index`.
    pub fn block_of(&self, index: usize) -> (usize, usize) {
        self.locations[index]
    }

    /// The column blocks.
    pub fn blocks(&self) -> &[ColumnBlock] {
        &self.blocks
    }
}

/// A column stored in some compressed or blocked form, unboxed on first access.
pub trait ColumnSource: Debug + Send + Sync {
    /// Produce the conventional array for this column.
    fn materialize(&self) -> TetherResult<Array>;
}

/// One slot of a [`LogicalTable`].
#[derive(Debug, Clone)]
pub enum Column {
    /// A conventional array, ready to encode.
    Materialized(Array),
    /// Not yet unboxed.
    Deferred(Arc<dyn ColumnSource>),
    /// Placeholder for a column no value was produced for. Its type is the schema's; it holds
    /// no rows and cannot be encoded.
    Missing,
}

/// An ordered set of columns sharing one row count.
#[derive(Debug, Clone)]
pub struct LogicalTable {
    schema: Arc<TableSchema>,
    columns: Vec<Column>,
    len: usize,
}

impl LogicalTable {
    /// Assemble a table, checking materialized columns against the schema and the row count.
    pub fn try_new(schema: Arc<TableSchema>, columns: Vec<Column>, len: usize) -> TetherResult<Self> {
        if columns.len() != schema.ncols() {
            tether_bail!(
                "schema has {} columns but {} were given",
                schema.ncols(),
                columns.len()
            );
        }
        for (i, column) in columns.iter().enumerate() {
            if let Column::Materialized(array) = column {
                check_column(&schema, i, array, len)?;
            }
        }
        Ok(Self {
            schema,
            columns,
            len,
        })
    }

    /// A table with no rows whose every column is [`Column::Missing`].
    pub fn empty(schema: Arc<TableSchema>) -> Self {
        let columns = (0..schema.ncols()).map(|_| Column::Missing).collect_vec();
        Self {
            schema,
            columns,
            len: 0,
        }
    }

    /// A table of already materialized columns, typed by their values.
    pub fn from_arrays(arrays: Vec<Array>) -> TetherResult<Self> {
        let len = arrays.first().map_or(0, Array::len);
        let schema = Arc::new(TableSchema::new(arrays.iter().map(Array::dtype).collect()));
        Self::try_new(
            schema,
            arrays.into_iter().map(Column::Materialized).collect(),
            len,
        )
    }

    /// The schema.
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Number of logical columns.
    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Override the row count.
    pub fn set_len(&mut self, len: usize) {
        self.len = len;
    }

    /// The slot of column `index`.
    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    /// Whether column `index` holds a conventional array.
    pub fn is_materialized(&self, index: usize) -> bool {
        matches!(self.columns[index], Column::Materialized(_))
    }

    /// Unbox column `index` if it is deferred and return its array.
    pub fn materialize(&mut self, index: usize) -> TetherResult<&Array> {
        if index >= self.columns.len() {
            tether_bail!(OutOfBounds: index, 0, self.columns.len());
        }
        if let Column::Deferred(source) = &self.columns[index] {
            let array = source.materialize()?;
            check_column(&self.schema, index, &array, self.len)?;
            debug!(
                "materialized column {} as {} ({} rows)",
                index,
                array.dtype(),
                array.len()
            );
            self.columns[index] = Column::Materialized(array);
        }
        match &self.columns[index] {
            Column::Materialized(array) => Ok(array),
            _ => Err(tether_err!(
                "column {} is a placeholder of type {} with no value to encode",
                index,
                self.schema.dtype(index)
            )),
        }
    }

    /// Store a decoded array in column `index`. The table takes its row count from it.
    pub fn set_column(&mut self, index: usize, array: Array) -> TetherResult<()> {
        if index >= self.columns.len() {
            tether_bail!(OutOfBounds: index, 0, self.columns.len());
        }
        if &array.dtype() != self.schema.dtype(index) {
            tether_bail!(MismatchedTypes: self.schema.dtype(index), array.dtype());
        }
        self.len = array.len();
        self.columns[index] = Column::Materialized(array);
        Ok(())
    }

    /// The materialized array of column `index`, if any.
    pub fn array(&self, index: usize) -> Option<&Array> {
        match &self.columns[index] {
            Column::Materialized(array) => Some(array),
            _ => None,
        }
    }

    /// The columns of `block`, in block order.
    pub fn block(&self, block: usize) -> impl Iterator<Item = &Column> + '_ {
        self.schema.blocks()[block]
            .columns()
            .iter()
            .map(|&i| &self.columns[i])
    }
}

fn check_column(schema: &TableSchema, index: usize, array: &Array, len: usize) -> TetherResult<()> {
    if &array.dtype() != schema.dtype(index) {
        tether_bail!(MismatchedTypes: schema.dtype(index), array.dtype());
    }
    if array.len() != len {
        tether_bail!(
            "column {} has {} rows, table has {}",
            index,
            array.len(),
            len
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tether_dtype::PType;

    use super::*;
    use crate::IntoArray;
    use crate::arrays::{PrimitiveArray, VarBinArray};

    #[derive(Debug, Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    impl ColumnSource for CountingSource {
        fn materialize(&self) -> TetherResult<Array> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PrimitiveArray::from(vec![1.5f64, 2.5]).into_array())
        }
    }

    fn schema() -> Arc<TableSchema> {
        Arc::new(TableSchema::new(vec![
            DType::Primitive(PType::I64),
            DType::Utf8,
            DType::Primitive(PType::F64),
            DType::Primitive(PType::I64),
        ]))
    }

    #[test]
    fn blocks_group_identical_types() {
        let schema = schema();
        assert_eq!(schema.blocks().len(), 3);
        assert_eq!(schema.blocks()[0].columns(), &[0, 3]);
        assert_eq!(schema.block_of(3), (0, 1));
        assert_eq!(schema.block_of(2), (2, 0));
    }

    #[test]
    fn materializes_once() {
        let source = Arc::new(CountingSource::default());
        let mut table = LogicalTable::try_new(
            schema(),
            vec![
                Column::Materialized(PrimitiveArray::from(vec![1i64, 2]).into_array()),
                Column::Materialized(VarBinArray::from_strs([Some("a"), None]).into_array()),
                Column::Deferred(source.clone()),
                Column::Materialized(PrimitiveArray::from(vec![3i64, 4]).into_array()),
            ],
            2,
        )
        .unwrap();

        assert!(!table.is_materialized(2));
        assert_eq!(table.materialize(2).unwrap().len(), 2);
        assert_eq!(table.materialize(2).unwrap().len(), 2);
        assert!(table.is_materialized(2));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(table.block(0).count(), 2);
    }

    #[test]
    fn rejects_wrong_type() {
        let mut table = LogicalTable::empty(schema());
        assert!(
            table
                .set_column(0, VarBinArray::from_strs([Some("x")]).into_array())
                .is_err()
        );
        assert!(table.materialize(1).is_err());
        table
            .set_column(1, VarBinArray::from_strs([Some("x")]).into_array())
            .unwrap();
        assert_eq!(table.len(), 1);
    }
}
