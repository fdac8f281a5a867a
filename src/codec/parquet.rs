//! Tables as Parquet files, one Arrow record batch per write.

use std::fs::File;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType as ArrowType, Field, Schema};
use arrow::record_batch::RecordBatch;
use camino::Utf8Path;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::{decode_error, encode_error};
use crate::error::ExpdbError;
use crate::format::{Column, ColumnValues, Table};

pub fn write(table: &Table, destination: &Utf8Path) -> Result<(), ExpdbError> {
    if table.columns().is_empty() {
        return Err(ExpdbError::Shape("table has no columns".to_string()));
    }
    let fields: Vec<Field> = table
        .columns()
        .iter()
        .map(|column| Field::new(&column.name, arrow_type(&column.values), false))
        .collect();
    let arrays: Vec<ArrayRef> = table
        .columns()
        .iter()
        .map(|column| to_arrow(&column.values))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|err| encode_error(destination, err.to_string()))?;

    let file = File::create(destination.as_std_path())
        .map_err(|err| encode_error(destination, err.to_string()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)
        .map_err(|err| encode_error(destination, err.to_string()))?;
    writer
        .write(&batch)
        .map_err(|err| encode_error(destination, err.to_string()))?;
    writer
        .close()
        .map_err(|err| encode_error(destination, err.to_string()))?;
    Ok(())
}

pub fn read(source: &Utf8Path) -> Result<Table, ExpdbError> {
    let file = File::open(source.as_std_path())
        .map_err(|err| ExpdbError::Filesystem(format!("open {source}: {err}")))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|err| decode_error(source, err.to_string()))?;
    let mut columns = builder
        .schema()
        .fields()
        .iter()
        .map(|field| {
            let values = match field.data_type() {
                ArrowType::Float64 => ColumnValues::Float64(Vec::new()),
                ArrowType::Int64 => ColumnValues::Int64(Vec::new()),
                ArrowType::Utf8 => ColumnValues::Utf8(Vec::new()),
                ArrowType::Boolean => ColumnValues::Bool(Vec::new()),
                other => {
                    return Err(decode_error(
                        source,
                        format!("column {} has unsupported type {other}", field.name()),
                    ));
                }
            };
            Ok(Column::new(field.name().clone(), values))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let reader = builder
        .build()
        .map_err(|err| decode_error(source, err.to_string()))?;
    for batch in reader {
        let batch = batch.map_err(|err| decode_error(source, err.to_string()))?;
        for (column, array) in columns.iter_mut().zip(batch.columns()) {
            append(&mut column.values, array.as_ref())
                .map_err(|message| decode_error(source, format!("{}: {message}", column.name)))?;
        }
    }
    Table::new(columns).map_err(|err| decode_error(source, err.to_string()))
}

fn arrow_type(values: &ColumnValues) -> ArrowType {
    match values {
        ColumnValues::Float64(_) => ArrowType::Float64,
        ColumnValues::Int64(_) => ArrowType::Int64,
        ColumnValues::Utf8(_) => ArrowType::Utf8,
        ColumnValues::Bool(_) => ArrowType::Boolean,
    }
}

fn to_arrow(values: &ColumnValues) -> ArrayRef {
    match values {
        ColumnValues::Float64(values) => Arc::new(Float64Array::from(values.clone())),
        ColumnValues::Int64(values) => Arc::new(Int64Array::from(values.clone())),
        ColumnValues::Utf8(values) => Arc::new(StringArray::from(values.clone())),
        ColumnValues::Bool(values) => Arc::new(BooleanArray::from(values.clone())),
    }
}

fn append(values: &mut ColumnValues, array: &dyn Array) -> Result<(), String> {
    if array.null_count() > 0 {
        return Err("null values are not supported".to_string());
    }
    let mismatch = || format!("unexpected array type {}", array.data_type());
    match values {
        ColumnValues::Float64(out) => {
            let array = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(mismatch)?;
            out.extend(array.values().iter().copied());
        }
        ColumnValues::Int64(out) => {
            let array = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(mismatch)?;
            out.extend(array.values().iter().copied());
        }
        ColumnValues::Utf8(out) => {
            let array = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(mismatch)?;
            out.extend((0..array.len()).map(|index| array.value(index).to_string()));
        }
        ColumnValues::Bool(out) => {
            let array = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(mismatch)?;
            out.extend((0..array.len()).map(|index| array.value(index)));
        }
    }
    Ok(())
}
