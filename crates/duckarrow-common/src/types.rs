//! Host-facing logical types and column metadata
//!
//! Two independent mappings feed the host: Arrow fields from a live
//! result stream (used by scans), and remote type strings from metadata
//! queries (used only to advertise catalog columns).

use arrow::datatypes::{DataType, TimeUnit};
use std::fmt;

/// Maximum decimal precision the host supports.
pub const MAX_DECIMAL_PRECISION: u8 = 38;

/// Fallback when a DECIMAL type string cannot be parsed.
const DEFAULT_DECIMAL: (u8, i8) = (18, 3);

/// The host's logical column types.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    UTinyInt,
    USmallInt,
    UInteger,
    UBigInt,
    Float,
    Double,
    Varchar,
    Blob,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Decimal { precision: u8, scale: i8 },
    HugeInt,
    Uuid,
    List(Box<LogicalType>),
    Struct(Vec<(String, LogicalType)>),
    Map {
        key: Box<LogicalType>,
        value: Box<LogicalType>,
    },
}

impl LogicalType {
    /// Map an Arrow data type onto the host type used for scan output.
    /// Anything without a native host form decodes through the string
    /// fallback, so it maps to `Varchar` here.
    pub fn from_arrow(data_type: &DataType) -> LogicalType {
        match data_type {
            DataType::Boolean => LogicalType::Boolean,
            DataType::Int8 => LogicalType::TinyInt,
            DataType::Int16 => LogicalType::SmallInt,
            DataType::Int32 => LogicalType::Integer,
            DataType::Int64 => LogicalType::BigInt,
            DataType::UInt8 => LogicalType::UTinyInt,
            DataType::UInt16 => LogicalType::USmallInt,
            DataType::UInt32 => LogicalType::UInteger,
            DataType::UInt64 => LogicalType::UBigInt,
            DataType::Float32 => LogicalType::Float,
            DataType::Float64 => LogicalType::Double,
            DataType::Utf8 | DataType::LargeUtf8 => LogicalType::Varchar,
            DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => {
                LogicalType::Blob
            }
            DataType::Date32 | DataType::Date64 => LogicalType::Date,
            DataType::Time32(_) | DataType::Time64(_) => LogicalType::Time,
            DataType::Timestamp(_, tz) => {
                if tz.is_some() {
                    LogicalType::TimestampTz
                } else {
                    LogicalType::Timestamp
                }
            }
            DataType::Decimal128(precision, scale) | DataType::Decimal256(precision, scale) => {
                LogicalType::Decimal {
                    precision: (*precision).min(MAX_DECIMAL_PRECISION),
                    scale: *scale,
                }
            }
            DataType::List(field) | DataType::LargeList(field) => {
                LogicalType::List(Box::new(LogicalType::from_arrow(field.data_type())))
            }
            DataType::Struct(fields) => LogicalType::Struct(
                fields
                    .iter()
                    .map(|f| (f.name().clone(), LogicalType::from_arrow(f.data_type())))
                    .collect(),
            ),
            DataType::Map(entries, _) => match entries.data_type() {
                DataType::Struct(kv) if kv.len() == 2 => LogicalType::Map {
                    key: Box::new(LogicalType::from_arrow(kv[0].data_type())),
                    value: Box::new(LogicalType::from_arrow(kv[1].data_type())),
                },
                _ => LogicalType::Varchar,
            },
            _ => LogicalType::Varchar,
        }
    }

    /// Map a remote type string onto a host type, case-insensitively and
    /// accepting common synonyms. Used for catalog advertisement only.
    pub fn from_type_string(raw: &str) -> LogicalType {
        let upper = raw.trim().to_ascii_uppercase();

        if upper.starts_with("DECIMAL") || upper.starts_with("NUMERIC") {
            return parse_decimal(&upper);
        }

        match upper.as_str() {
            "VARCHAR" | "STRING" | "TEXT" | "CHAR" | "BPCHAR" | "NAME" => LogicalType::Varchar,
            "BIGINT" | "INT8" | "INT64" | "LONG" => LogicalType::BigInt,
            "INTEGER" | "INT" | "INT4" | "INT32" => LogicalType::Integer,
            "SMALLINT" | "INT2" | "INT16" | "SHORT" => LogicalType::SmallInt,
            "TINYINT" | "INT1" => LogicalType::TinyInt,
            "UBIGINT" | "UINT8" | "UINT64" | "ULONG" => LogicalType::UBigInt,
            "UINTEGER" | "UINT" | "UINT4" | "UINT32" => LogicalType::UInteger,
            "USMALLINT" | "UINT2" | "UINT16" | "USHORT" => LogicalType::USmallInt,
            "UTINYINT" | "UINT1" => LogicalType::UTinyInt,
            "DOUBLE" | "FLOAT8" | "DOUBLE PRECISION" | "REAL8" => LogicalType::Double,
            "FLOAT" | "FLOAT4" | "REAL" => LogicalType::Float,
            "BOOLEAN" | "BOOL" => LogicalType::Boolean,
            "DATE" => LogicalType::Date,
            "TIME" | "TIME WITHOUT TIME ZONE" => LogicalType::Time,
            "TIMESTAMP" | "DATETIME" | "TIMESTAMP WITHOUT TIME ZONE" => LogicalType::Timestamp,
            "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => LogicalType::TimestampTz,
            "BLOB" | "BYTEA" | "BINARY" | "VARBINARY" | "BYTES" => LogicalType::Blob,
            "UUID" => LogicalType::Uuid,
            "JSON" | "JSONB" => LogicalType::Varchar,
            "HUGEINT" | "INT128" => LogicalType::HugeInt,
            _ => LogicalType::Varchar,
        }
    }
}

/// Parse `DECIMAL(p[,s])` / `NUMERIC(p[,s])`, clamping precision to the
/// host maximum and falling back to DECIMAL(18,3) on malformed input.
fn parse_decimal(upper: &str) -> LogicalType {
    let (default_precision, default_scale) = DEFAULT_DECIMAL;

    let inner = upper
        .find('(')
        .and_then(|start| upper[start + 1..].find(')').map(|end| &upper[start + 1..start + 1 + end]));

    let Some(inner) = inner else {
        return LogicalType::Decimal {
            precision: default_precision,
            scale: default_scale,
        };
    };

    let mut parts = inner.splitn(2, ',');
    let precision = parts.next().and_then(|p| p.trim().parse::<u32>().ok());
    let scale = match parts.next() {
        Some(s) => s.trim().parse::<i8>().ok(),
        None => Some(0),
    };

    match (precision, scale) {
        (Some(precision), Some(scale)) => LogicalType::Decimal {
            precision: precision.min(MAX_DECIMAL_PRECISION as u32) as u8,
            scale,
        },
        _ => LogicalType::Decimal {
            precision: default_precision,
            scale: default_scale,
        },
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Boolean => write!(f, "BOOLEAN"),
            LogicalType::TinyInt => write!(f, "TINYINT"),
            LogicalType::SmallInt => write!(f, "SMALLINT"),
            LogicalType::Integer => write!(f, "INTEGER"),
            LogicalType::BigInt => write!(f, "BIGINT"),
            LogicalType::UTinyInt => write!(f, "UTINYINT"),
            LogicalType::USmallInt => write!(f, "USMALLINT"),
            LogicalType::UInteger => write!(f, "UINTEGER"),
            LogicalType::UBigInt => write!(f, "UBIGINT"),
            LogicalType::Float => write!(f, "FLOAT"),
            LogicalType::Double => write!(f, "DOUBLE"),
            LogicalType::Varchar => write!(f, "VARCHAR"),
            LogicalType::Blob => write!(f, "BLOB"),
            LogicalType::Date => write!(f, "DATE"),
            LogicalType::Time => write!(f, "TIME"),
            LogicalType::Timestamp => write!(f, "TIMESTAMP"),
            LogicalType::TimestampTz => write!(f, "TIMESTAMP WITH TIME ZONE"),
            LogicalType::Decimal { precision, scale } => {
                write!(f, "DECIMAL({precision},{scale})")
            }
            LogicalType::HugeInt => write!(f, "HUGEINT"),
            LogicalType::Uuid => write!(f, "UUID"),
            LogicalType::List(inner) => write!(f, "{inner}[]"),
            LogicalType::Struct(fields) => {
                write!(f, "STRUCT(")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} {ty}")?;
                }
                write!(f, ")")
            }
            LogicalType::Map { key, value } => write!(f, "MAP({key}, {value})"),
        }
    }
}

/// Ordered column descriptor captured at scan bind time.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub logical_type: LogicalType,
}

impl ColumnDescriptor {
    pub fn type_name(&self) -> String {
        self.logical_type.to_string()
    }
}

/// A column as reported by remote metadata discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
    pub ordinal_position: i32,
}

/// A table as reported by remote metadata discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
}
