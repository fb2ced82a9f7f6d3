//! Arrow conversion for [`Table`].
//!
//! The timeline becomes a non-null `Timestamp(Second, "UTC")` column named
//! [`TIMESTAMP_COLUMN`], followed by one nullable `Float64` column per table
//! column, in table order.

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, RecordBatch, TimestampSecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::error::ArrowError;

use super::Table;

/// Name of the leading timestamp column in exported batches.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

const UTC: &str = "UTC";

impl Table {
    /// Convert the table into a single Arrow `RecordBatch`.
    pub fn to_record_batch(&self) -> Result<RecordBatch, ArrowError> {
        let mut fields = Vec::with_capacity(self.columns.len() + 1);
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len() + 1);

        fields.push(Field::new(
            TIMESTAMP_COLUMN,
            DataType::Timestamp(TimeUnit::Second, Some(UTC.into())),
            false,
        ));
        let secs: Vec<i64> = self.timeline.iter().map(|ts| ts.timestamp()).collect();
        arrays.push(Arc::new(TimestampSecondArray::from(secs).with_timezone(UTC)));

        for column in &self.columns {
            fields.push(Field::new(column.name(), DataType::Float64, true));
            arrays.push(Arc::new(Float64Array::from(column.values().to_vec())));
        }

        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::Array;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::table::Column;

    #[test]
    fn exports_timestamp_then_value_columns() {
        let t = |s| Utc.timestamp_opt(s, 0).single().unwrap();
        let table = Table::new(
            vec![t(0), t(300)],
            vec![
                Column::new("yield", vec![Some(1.0), None]),
                Column::new("level", vec![Some(50.0), Some(51.0)]),
            ],
        )
        .unwrap();

        let batch = table.to_record_batch().unwrap();

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 3);
        let schema = batch.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec![TIMESTAMP_COLUMN, "yield", "level"]);

        let yields = batch
            .column(1)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(yields.value(0), 1.0);
        assert!(yields.is_null(1));

        let stamps = batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampSecondArray>()
            .unwrap();
        assert_eq!(stamps.value(1), 300);
    }

    #[test]
    fn empty_table_exports_empty_batch() {
        let batch = Table::empty().to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 1);
    }
}
