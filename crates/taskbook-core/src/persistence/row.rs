// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed field extraction from store rows.

use sqlx::sqlite::SqliteRow;
use sqlx::{Decode, Row, Sqlite, Type};

use crate::error::TaskStoreError;

/// Decode column `field` of `row` as `T`.
///
/// A missing column yields [`TaskStoreError::FieldNotFound`]; a column whose
/// value cannot be decoded as `T` yields [`TaskStoreError::TypeMismatch`].
pub fn typed_field<'r, T>(row: &'r SqliteRow, field: &str) -> Result<T, TaskStoreError>
where
    T: Decode<'r, Sqlite> + Type<Sqlite>,
{
    match row.try_get::<T, _>(field) {
        Ok(value) => Ok(value),
        Err(sqlx::Error::ColumnNotFound(_)) => Err(TaskStoreError::FieldNotFound {
            field: field.to_string(),
        }),
        Err(sqlx::Error::ColumnDecode { source, .. }) => Err(TaskStoreError::TypeMismatch {
            field: field.to_string(),
            expected: std::any::type_name::<T>(),
            details: source.to_string(),
        }),
        Err(other) => Err(TaskStoreError::from_sqlx("decode row", other)),
    }
}
