use crate::catalog::schema::DataType;
use crate::catalog::{ValidationError, ValidationResult};

/// Type and collation of one side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub data_type: DataType,
    pub collation: Option<String>,
}

impl TypeInfo {
    pub fn new(data_type: DataType, collation: Option<String>) -> Self {
        TypeInfo { data_type, collation }
    }
}

/// Check that `left = right` can be evaluated. Returns the type the
/// comparison is performed in.
pub fn check_equality_compatibility(left: &TypeInfo, right: &TypeInfo) -> ValidationResult<DataType> {
    let compare_type = match (&left.data_type, &right.data_type) {
        (l, r) if l == r => l.clone(),
        (DataType::Integer, DataType::Float) | (DataType::Float, DataType::Integer) => DataType::Float,
        (DataType::Date, DataType::Timestamp) | (DataType::Timestamp, DataType::Date) => DataType::Timestamp,
        _ => {
            return Err(ValidationError::IncompatibleTypes(
                left.data_type.to_string(),
                "=".to_string(),
                right.data_type.to_string(),
            ))
        }
    };

    if compare_type == DataType::Text {
        if let (Some(l), Some(r)) = (&left.collation, &right.collation) {
            if l != r {
                return Err(ValidationError::CollationMismatch(l.clone(), r.clone()));
            }
        }
    }
    Ok(compare_type)
}

/// Check that a value compared as `left = right` can be stored in a
/// temporary-table key without changing the comparison result.
pub fn check_materialization_key(left: &TypeInfo, right: &TypeInfo) -> bool {
    match check_equality_compatibility(left, right) {
        Ok(compare_type) => compare_type.is_keyable() && left.data_type == right.data_type,
        Err(_) => false,
    }
}
