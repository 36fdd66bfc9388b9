//! Data-access commands.
//!
//! Features:
//! - Select, insert, replace, update, delete, and upsert against a space
//! - Server-side call and eval
//! - Symbolic space and index names, resolved through the `_space` and
//!   `_index` system spaces and cached until the schema version changes
//! - Scalar keys wrapped into single-element arrays before encoding

use rmpv::Value;

use tnt_wire::{request, system, IteratorType, RequestCode};

use crate::client::Client;
use crate::correlation::next_request_id;
use crate::error::DriverError;

/// A space, addressed by numeric id or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceRef {
    /// Numeric space id, used as-is.
    Id(u32),
    /// Space name, resolved through `_space` on first use.
    Name(String),
}

impl From<u32> for SpaceRef {
    fn from(id: u32) -> Self {
        SpaceRef::Id(id)
    }
}

impl From<&str> for SpaceRef {
    fn from(name: &str) -> Self {
        SpaceRef::Name(name.to_string())
    }
}

impl From<String> for SpaceRef {
    fn from(name: String) -> Self {
        SpaceRef::Name(name)
    }
}

/// An index within a space, addressed by numeric id or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRef {
    /// Numeric index id, used as-is.
    Id(u32),
    /// Index name, resolved through `_index` on first use.
    Name(String),
}

impl From<u32> for IndexRef {
    fn from(id: u32) -> Self {
        IndexRef::Id(id)
    }
}

impl From<&str> for IndexRef {
    fn from(name: &str) -> Self {
        IndexRef::Name(name.to_string())
    }
}

impl From<String> for IndexRef {
    fn from(name: String) -> Self {
        IndexRef::Name(name)
    }
}

impl Client {
    /// Select tuples from `space` through `index`.
    ///
    /// A scalar `key` is wrapped into a single-element array; `Value::Nil`
    /// becomes the empty key, which with [`IteratorType::All`] scans the
    /// whole space.
    pub async fn select(
        &self,
        space: impl Into<SpaceRef>,
        index: impl Into<IndexRef>,
        limit: u32,
        offset: u32,
        iterator: IteratorType,
        key: Value,
    ) -> Result<Value, DriverError> {
        let space_id = self.resolve_space(space.into()).await?;
        let index_id = self.resolve_index(space_id, index.into()).await?;
        let sync = next_request_id(&self.ids);
        let frame = request::select(
            sync,
            space_id,
            index_id,
            limit,
            offset,
            iterator,
            normalize_key(key),
        )?;
        self.issue(RequestCode::Select, sync, frame).await
    }

    /// Insert `tuple` into `space`, failing on a primary-key conflict.
    pub async fn insert(
        &self,
        space: impl Into<SpaceRef>,
        tuple: Value,
    ) -> Result<Value, DriverError> {
        let space_id = self.resolve_space(space.into()).await?;
        let tuple = ensure_array(tuple, "tuple")?;
        let sync = next_request_id(&self.ids);
        let frame = request::insert(sync, space_id, tuple)?;
        self.issue(RequestCode::Insert, sync, frame).await
    }

    /// Insert `tuple` into `space`, overwriting any existing tuple with
    /// the same primary key.
    pub async fn replace(
        &self,
        space: impl Into<SpaceRef>,
        tuple: Value,
    ) -> Result<Value, DriverError> {
        let space_id = self.resolve_space(space.into()).await?;
        let tuple = ensure_array(tuple, "tuple")?;
        let sync = next_request_id(&self.ids);
        let frame = request::replace(sync, space_id, tuple)?;
        self.issue(RequestCode::Replace, sync, frame).await
    }

    /// Apply update operations to the tuple matching `key`.
    ///
    /// `ops` is an array of operation triples such as `["+", 2, 1]`.
    pub async fn update(
        &self,
        space: impl Into<SpaceRef>,
        index: impl Into<IndexRef>,
        key: Value,
        ops: Value,
    ) -> Result<Value, DriverError> {
        let space_id = self.resolve_space(space.into()).await?;
        let index_id = self.resolve_index(space_id, index.into()).await?;
        let ops = ensure_array(ops, "ops")?;
        let sync = next_request_id(&self.ids);
        let frame = request::update(sync, space_id, index_id, normalize_key(key), ops)?;
        self.issue(RequestCode::Update, sync, frame).await
    }

    /// Delete the tuple matching `key`.
    pub async fn delete(
        &self,
        space: impl Into<SpaceRef>,
        index: impl Into<IndexRef>,
        key: Value,
    ) -> Result<Value, DriverError> {
        let space_id = self.resolve_space(space.into()).await?;
        let index_id = self.resolve_index(space_id, index.into()).await?;
        let sync = next_request_id(&self.ids);
        let frame = request::delete(sync, space_id, index_id, normalize_key(key))?;
        self.issue(RequestCode::Delete, sync, frame).await
    }

    /// Update the tuple matching the primary key of `tuple`, inserting
    /// `tuple` when no match exists.
    pub async fn upsert(
        &self,
        space: impl Into<SpaceRef>,
        ops: Value,
        tuple: Value,
    ) -> Result<Value, DriverError> {
        let space_id = self.resolve_space(space.into()).await?;
        let ops = ensure_array(ops, "ops")?;
        let tuple = ensure_array(tuple, "tuple")?;
        let sync = next_request_id(&self.ids);
        let frame = request::upsert(sync, space_id, tuple, ops)?;
        self.issue(RequestCode::Upsert, sync, frame).await
    }

    /// Invoke a stored server-side function.
    ///
    /// A scalar `args` is wrapped into a single-element array;
    /// `Value::Nil` calls with no arguments.
    pub async fn call(&self, function: &str, args: Value) -> Result<Value, DriverError> {
        let sync = next_request_id(&self.ids);
        let frame = request::call(sync, function, normalize_key(args))?;
        self.issue(RequestCode::Call, sync, frame).await
    }

    /// Evaluate an expression on the server.
    pub async fn eval(&self, expression: &str, args: Value) -> Result<Value, DriverError> {
        let sync = next_request_id(&self.ids);
        let frame = request::eval(sync, expression, normalize_key(args))?;
        self.issue(RequestCode::Eval, sync, frame).await
    }

    /// Liveness probe; resolves to `true` on any successful reply.
    pub async fn ping(&self) -> Result<bool, DriverError> {
        let sync = next_request_id(&self.ids);
        let frame = request::ping(sync)?;
        match self.issue(RequestCode::Ping, sync, frame).await? {
            Value::Boolean(ok) => Ok(ok),
            _ => Ok(true),
        }
    }

    async fn resolve_space(&self, space: SpaceRef) -> Result<u32, DriverError> {
        let name = match space {
            SpaceRef::Id(id) => return Ok(id),
            SpaceRef::Name(name) => name,
        };
        if let Some(id) = self.cached_space_id(&name).await {
            return Ok(id);
        }

        let sync = next_request_id(&self.ids);
        let frame = request::select(
            sync,
            system::SPACE_SPACE,
            system::INDEX_SPACE_NAME,
            1,
            0,
            IteratorType::Eq,
            Value::Array(vec![Value::from(name.as_str())]),
        )?;
        let data = self.issue(RequestCode::Select, sync, frame).await?;
        let id = row_field_u32(&data, 0, 0).ok_or_else(|| {
            DriverError::InvalidArgument(format!("space '{name}' does not exist"))
        })?;
        self.store_space(&name, id);
        Ok(id)
    }

    async fn resolve_index(
        &self,
        space_id: u32,
        index: IndexRef,
    ) -> Result<u32, DriverError> {
        let name = match index {
            IndexRef::Id(id) => return Ok(id),
            IndexRef::Name(name) => name,
        };
        if let Some(id) = self.cached_index_id(space_id, &name).await {
            return Ok(id);
        }

        let sync = next_request_id(&self.ids);
        let frame = request::select(
            sync,
            system::SPACE_INDEX,
            system::INDEX_INDEX_NAME,
            1,
            0,
            IteratorType::Eq,
            Value::Array(vec![Value::from(space_id), Value::from(name.as_str())]),
        )?;
        let data = self.issue(RequestCode::Select, sync, frame).await?;
        // An index row is [space_id, index_id, name, ...].
        let id = row_field_u32(&data, 0, 1).ok_or_else(|| {
            DriverError::InvalidArgument(format!("index '{name}' does not exist"))
        })?;
        self.store_index(space_id, &name, id);
        Ok(id)
    }
}

/// Wrap a scalar key into a one-element array; `Nil` is the empty key.
fn normalize_key(key: Value) -> Value {
    match key {
        Value::Nil => Value::Array(Vec::new()),
        Value::Array(items) => Value::Array(items),
        scalar => Value::Array(vec![scalar]),
    }
}

fn ensure_array(value: Value, what: &str) -> Result<Value, DriverError> {
    match value {
        Value::Array(items) => Ok(Value::Array(items)),
        _ => Err(DriverError::InvalidArgument(format!(
            "{what} must be an array"
        ))),
    }
}

fn row_field_u32(data: &Value, row: usize, field: usize) -> Option<u32> {
    let value = data.as_array()?.get(row)?.as_array()?.get(field)?;
    u32::try_from(value.as_u64()?).ok()
}
