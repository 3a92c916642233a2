//! Arrow array to host vector conversion
//!
//! Writes exactly `count` values from source offset `offset` into the
//! vector, marking nulls invalid and skipping their value write. The
//! caller guarantees `count` fits the chunk; nested kinds recurse into
//! child vectors, and anything without a native host form goes through
//! Arrow's printable representation.

use crate::chunk::{ListEntry, ValidityMask, Vector, VectorData};
use arrow::array::{
    Array, BinaryArray, BooleanArray, Date64Array, Decimal256Array, FixedSizeBinaryArray,
    LargeBinaryArray, LargeListArray, LargeStringArray, ListArray, MapArray, PrimitiveArray,
    StringArray, StructArray, Time32MillisecondArray, Time32SecondArray, Time64MicrosecondArray,
    Time64NanosecondArray, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Date32Type, Decimal128Type, Float32Type, Float64Type, Int16Type,
    Int32Type, Int64Type, Int8Type, TimeUnit, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use duckarrow_common::{DuckArrowError, LogicalType, Result};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Convert one output column: rows `[offset, offset + count)` of `array`
/// land in rows `[0, count)` of `vector`.
pub fn convert_column(
    array: &dyn Array,
    vector: &mut Vector,
    offset: usize,
    count: usize,
) -> Result<()> {
    convert_into(array, vector, offset, count, 0)
}

fn mismatch(expected: &LogicalType, actual: &DataType) -> DuckArrowError {
    DuckArrowError::Remote(format!(
        "column type mismatch: host vector {expected} cannot accept arrow {actual}"
    ))
}

fn convert_into(
    array: &dyn Array,
    vector: &mut Vector,
    offset: usize,
    count: usize,
    dst: usize,
) -> Result<()> {
    vector.ensure_capacity(dst + count);
    let logical = vector.logical_type().clone();

    {
        let (data, validity) = vector.parts_mut();
        match (&logical, data) {
            (LogicalType::Date, VectorData::Int32(values)) => {
                write_date(array, values, validity, offset, count, dst)?
            }
            (LogicalType::Time, VectorData::Int64(values)) => {
                write_time(array, values, validity, offset, count, dst)?
            }
            (
                LogicalType::Timestamp | LogicalType::TimestampTz,
                VectorData::Int64(values),
            ) => write_timestamp(array, values, validity, offset, count, dst)?,
            (logical, VectorData::Int128(values)) => {
                write_decimal(logical, array, values, validity, offset, count, dst)?
            }
            (_, VectorData::Boolean(values)) => {
                write_boolean(array, values, validity, offset, count, dst)?
            }
            (logical, VectorData::Int8(values)) => {
                write_primitive::<Int8Type>(logical, array, values, validity, offset, count, dst)?
            }
            (logical, VectorData::Int16(values)) => {
                write_primitive::<Int16Type>(logical, array, values, validity, offset, count, dst)?
            }
            (logical, VectorData::Int32(values)) => {
                write_primitive::<Int32Type>(logical, array, values, validity, offset, count, dst)?
            }
            (logical, VectorData::Int64(values)) => {
                write_primitive::<Int64Type>(logical, array, values, validity, offset, count, dst)?
            }
            (logical, VectorData::UInt8(values)) => {
                write_primitive::<UInt8Type>(logical, array, values, validity, offset, count, dst)?
            }
            (logical, VectorData::UInt16(values)) => {
                write_primitive::<UInt16Type>(logical, array, values, validity, offset, count, dst)?
            }
            (logical, VectorData::UInt32(values)) => {
                write_primitive::<UInt32Type>(logical, array, values, validity, offset, count, dst)?
            }
            (logical, VectorData::UInt64(values)) => {
                write_primitive::<UInt64Type>(logical, array, values, validity, offset, count, dst)?
            }
            (logical, VectorData::Float32(values)) => {
                write_primitive::<Float32Type>(logical, array, values, validity, offset, count, dst)?
            }
            (logical, VectorData::Float64(values)) => {
                write_primitive::<Float64Type>(logical, array, values, validity, offset, count, dst)?
            }
            (_, VectorData::Varchar(values)) => {
                write_varchar(array, values, validity, offset, count, dst)?
            }
            (logical, VectorData::Blob(values)) => {
                write_blob(logical, array, values, validity, offset, count, dst)?
            }
            (logical, VectorData::List { entries, child }) => {
                write_list(logical, array, entries, child, validity, offset, count, dst)?
            }
            (logical, VectorData::Struct { children }) => {
                write_struct(logical, array, children, validity, offset, count, dst)?
            }
        }
    }

    if dst + count > vector.len() {
        vector.set_len(dst + count);
    }
    Ok(())
}

fn write_primitive<T: ArrowPrimitiveType>(
    logical: &LogicalType,
    array: &dyn Array,
    values: &mut [T::Native],
    validity: &mut ValidityMask,
    offset: usize,
    count: usize,
    dst: usize,
) -> Result<()> {
    let array = array
        .as_any()
        .downcast_ref::<PrimitiveArray<T>>()
        .ok_or_else(|| mismatch(logical, array.data_type()))?;
    for i in 0..count {
        let src = offset + i;
        if array.is_null(src) {
            validity.set_invalid(dst + i);
        } else {
            values[dst + i] = array.value(src);
        }
    }
    Ok(())
}

fn write_boolean(
    array: &dyn Array,
    values: &mut [u8],
    validity: &mut ValidityMask,
    offset: usize,
    count: usize,
    dst: usize,
) -> Result<()> {
    let array = array
        .as_any()
        .downcast_ref::<BooleanArray>()
        .ok_or_else(|| mismatch(&LogicalType::Boolean, array.data_type()))?;
    for i in 0..count {
        let src = offset + i;
        if array.is_null(src) {
            validity.set_invalid(dst + i);
        } else {
            values[dst + i] = u8::from(array.value(src));
        }
    }
    Ok(())
}

fn write_varchar(
    array: &dyn Array,
    values: &mut [String],
    validity: &mut ValidityMask,
    offset: usize,
    count: usize,
    dst: usize,
) -> Result<()> {
    if let Some(strings) = array.as_any().downcast_ref::<StringArray>() {
        for i in 0..count {
            let src = offset + i;
            if strings.is_null(src) {
                validity.set_invalid(dst + i);
            } else {
                values[dst + i] = strings.value(src).to_string();
            }
        }
        return Ok(());
    }
    if let Some(strings) = array.as_any().downcast_ref::<LargeStringArray>() {
        for i in 0..count {
            let src = offset + i;
            if strings.is_null(src) {
                validity.set_invalid(dst + i);
            } else {
                values[dst + i] = strings.value(src).to_string();
            }
        }
        return Ok(());
    }

    // Printable fallback for kinds without a native host form.
    let options = FormatOptions::default();
    let formatter = ArrayFormatter::try_new(array, &options)
        .map_err(|e| DuckArrowError::Remote(format!("format column: {e}")))?;
    for i in 0..count {
        let src = offset + i;
        if array.is_null(src) {
            validity.set_invalid(dst + i);
        } else {
            values[dst + i] = formatter
                .value(src)
                .try_to_string()
                .map_err(|e| DuckArrowError::Remote(format!("format value: {e}")))?;
        }
    }
    Ok(())
}

fn write_blob(
    logical: &LogicalType,
    array: &dyn Array,
    values: &mut [Vec<u8>],
    validity: &mut ValidityMask,
    offset: usize,
    count: usize,
    dst: usize,
) -> Result<()> {
    macro_rules! copy_binary {
        ($arr:expr) => {{
            for i in 0..count {
                let src = offset + i;
                if $arr.is_null(src) {
                    validity.set_invalid(dst + i);
                } else {
                    values[dst + i] = $arr.value(src).to_vec();
                }
            }
            Ok(())
        }};
    }

    if let Some(bytes) = array.as_any().downcast_ref::<BinaryArray>() {
        return copy_binary!(bytes);
    }
    if let Some(bytes) = array.as_any().downcast_ref::<LargeBinaryArray>() {
        return copy_binary!(bytes);
    }
    if let Some(bytes) = array.as_any().downcast_ref::<FixedSizeBinaryArray>() {
        return copy_binary!(bytes);
    }
    Err(mismatch(logical, array.data_type()))
}

fn write_date(
    array: &dyn Array,
    values: &mut [i32],
    validity: &mut ValidityMask,
    offset: usize,
    count: usize,
    dst: usize,
) -> Result<()> {
    match array.data_type() {
        DataType::Date32 => {
            write_primitive::<Date32Type>(&LogicalType::Date, array, values, validity, offset, count, dst)
        }
        DataType::Date64 => {
            let array = array
                .as_any()
                .downcast_ref::<Date64Array>()
                .ok_or_else(|| mismatch(&LogicalType::Date, array.data_type()))?;
            for i in 0..count {
                let src = offset + i;
                if array.is_null(src) {
                    validity.set_invalid(dst + i);
                } else {
                    values[dst + i] = (array.value(src) / MILLIS_PER_DAY) as i32;
                }
            }
            Ok(())
        }
        other => Err(mismatch(&LogicalType::Date, other)),
    }
}

fn write_time(
    array: &dyn Array,
    values: &mut [i64],
    validity: &mut ValidityMask,
    offset: usize,
    count: usize,
    dst: usize,
) -> Result<()> {
    macro_rules! copy_time {
        ($arr:expr, $to_micros:expr) => {{
            for i in 0..count {
                let src = offset + i;
                if $arr.is_null(src) {
                    validity.set_invalid(dst + i);
                } else {
                    let value = $arr.value(src) as i64;
                    values[dst + i] = $to_micros(value);
                }
            }
            Ok(())
        }};
    }

    match array.data_type() {
        DataType::Time32(TimeUnit::Second) => {
            let arr = array
                .as_any()
                .downcast_ref::<Time32SecondArray>()
                .ok_or_else(|| mismatch(&LogicalType::Time, array.data_type()))?;
            copy_time!(arr, |v: i64| v * 1_000_000)
        }
        DataType::Time32(TimeUnit::Millisecond) => {
            let arr = array
                .as_any()
                .downcast_ref::<Time32MillisecondArray>()
                .ok_or_else(|| mismatch(&LogicalType::Time, array.data_type()))?;
            copy_time!(arr, |v: i64| v * 1_000)
        }
        DataType::Time64(TimeUnit::Microsecond) => {
            let arr = array
                .as_any()
                .downcast_ref::<Time64MicrosecondArray>()
                .ok_or_else(|| mismatch(&LogicalType::Time, array.data_type()))?;
            copy_time!(arr, |v: i64| v)
        }
        DataType::Time64(TimeUnit::Nanosecond) => {
            let arr = array
                .as_any()
                .downcast_ref::<Time64NanosecondArray>()
                .ok_or_else(|| mismatch(&LogicalType::Time, array.data_type()))?;
            copy_time!(arr, |v: i64| v / 1_000)
        }
        other => Err(mismatch(&LogicalType::Time, other)),
    }
}

fn write_timestamp(
    array: &dyn Array,
    values: &mut [i64],
    validity: &mut ValidityMask,
    offset: usize,
    count: usize,
    dst: usize,
) -> Result<()> {
    macro_rules! copy_timestamp {
        ($arr:expr, $to_micros:expr) => {{
            for i in 0..count {
                let src = offset + i;
                if $arr.is_null(src) {
                    validity.set_invalid(dst + i);
                } else {
                    let value = $arr.value(src);
                    values[dst + i] = $to_micros(value);
                }
            }
            Ok(())
        }};
    }

    match array.data_type() {
        DataType::Timestamp(TimeUnit::Second, _) => {
            let arr = array
                .as_any()
                .downcast_ref::<TimestampSecondArray>()
                .ok_or_else(|| mismatch(&LogicalType::Timestamp, array.data_type()))?;
            copy_timestamp!(arr, |v: i64| v * 1_000_000)
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            let arr = array
                .as_any()
                .downcast_ref::<TimestampMillisecondArray>()
                .ok_or_else(|| mismatch(&LogicalType::Timestamp, array.data_type()))?;
            copy_timestamp!(arr, |v: i64| v * 1_000)
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            let arr = array
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .ok_or_else(|| mismatch(&LogicalType::Timestamp, array.data_type()))?;
            copy_timestamp!(arr, |v: i64| v)
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            let arr = array
                .as_any()
                .downcast_ref::<TimestampNanosecondArray>()
                .ok_or_else(|| mismatch(&LogicalType::Timestamp, array.data_type()))?;
            copy_timestamp!(arr, |v: i64| v / 1_000)
        }
        other => Err(mismatch(&LogicalType::Timestamp, other)),
    }
}

fn write_decimal(
    logical: &LogicalType,
    array: &dyn Array,
    values: &mut [i128],
    validity: &mut ValidityMask,
    offset: usize,
    count: usize,
    dst: usize,
) -> Result<()> {
    match array.data_type() {
        DataType::Decimal128(..) => {
            write_primitive::<Decimal128Type>(logical, array, values, validity, offset, count, dst)
        }
        DataType::Decimal256(..) => {
            let array = array
                .as_any()
                .downcast_ref::<Decimal256Array>()
                .ok_or_else(|| mismatch(logical, array.data_type()))?;
            for i in 0..count {
                let src = offset + i;
                if array.is_null(src) {
                    validity.set_invalid(dst + i);
                    continue;
                }
                // 256-bit values outside the host's 128-bit range become
                // NULL rather than wrapping.
                match array.value(src).to_i128() {
                    Some(value) => values[dst + i] = value,
                    None => validity.set_invalid(dst + i),
                }
            }
            Ok(())
        }
        other => Err(mismatch(logical, other)),
    }
}

#[allow(clippy::too_many_arguments)]
fn write_list(
    logical: &LogicalType,
    array: &dyn Array,
    entries: &mut [ListEntry],
    child: &mut Vector,
    validity: &mut ValidityMask,
    offset: usize,
    count: usize,
    dst: usize,
) -> Result<()> {
    let (offsets, child_values): (Vec<i64>, &dyn Array) = match array.data_type() {
        DataType::List(_) => {
            let list = array
                .as_any()
                .downcast_ref::<ListArray>()
                .ok_or_else(|| mismatch(logical, array.data_type()))?;
            (
                list.value_offsets().iter().map(|&o| o as i64).collect(),
                list.values().as_ref(),
            )
        }
        DataType::LargeList(_) => {
            let list = array
                .as_any()
                .downcast_ref::<LargeListArray>()
                .ok_or_else(|| mismatch(logical, array.data_type()))?;
            (list.value_offsets().to_vec(), list.values().as_ref())
        }
        DataType::Map(..) => {
            let map = array
                .as_any()
                .downcast_ref::<MapArray>()
                .ok_or_else(|| mismatch(logical, array.data_type()))?;
            (
                map.value_offsets().iter().map(|&o| o as i64).collect(),
                map.entries() as &dyn Array,
            )
        }
        other => return Err(mismatch(logical, other)),
    };

    if count == 0 {
        return Ok(());
    }

    let start = offsets[offset] as usize;
    let end = offsets[offset + count] as usize;
    let child_base = child.len();
    convert_into(child_values, child, start, end - start, child_base)?;

    for i in 0..count {
        let src = offset + i;
        if array.is_null(src) {
            validity.set_invalid(dst + i);
            entries[dst + i] = ListEntry::default();
            continue;
        }
        let row_start = offsets[src] as usize;
        let row_end = offsets[src + 1] as usize;
        entries[dst + i] = ListEntry {
            offset: child_base + (row_start - start),
            length: row_end - row_start,
        };
    }
    Ok(())
}

fn write_struct(
    logical: &LogicalType,
    array: &dyn Array,
    children: &mut [Vector],
    validity: &mut ValidityMask,
    offset: usize,
    count: usize,
    dst: usize,
) -> Result<()> {
    let array = array
        .as_any()
        .downcast_ref::<StructArray>()
        .ok_or_else(|| mismatch(logical, array.data_type()))?;
    if array.num_columns() != children.len() {
        return Err(DuckArrowError::Remote(format!(
            "struct field count mismatch: arrow has {}, host vector has {}",
            array.num_columns(),
            children.len()
        )));
    }

    for (child, column) in children.iter_mut().zip(array.columns()) {
        convert_into(column.as_ref(), child, offset, count, dst)?;
    }
    for i in 0..count {
        if array.is_null(offset + i) {
            validity.set_invalid(dst + i);
        }
    }
    Ok(())
}
