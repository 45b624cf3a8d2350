//! Query builder
//!
//! `QueryBuilder` is the query descriptor: it accumulates the schema, field
//! projection, filter, expansions and entity target of one DSIS query and
//! renders them as `<path>?<query>`.
//!
//! Every step consumes the builder and returns the updated value, so a query
//! is never shared between writers. Clone a builder to branch a query.
//!
//! ```
//! use dsis_client::QueryBuilder;
//!
//! let query = QueryBuilder::new("OpenWorks_OW_SV4TSTA_SingleSource-OW_SV4TSTA", "SNORRE")
//!     .schema("Fault")
//!     .select("id,type")
//!     .filter("type eq 'NORMAL'");
//!
//! assert_eq!(
//!     query.render().unwrap(),
//!     "Fault?$select=id,type&$filter=type%20eq%20%27NORMAL%27"
//! );
//! ```

use super::encode::{encode_key, encode_segment};
use crate::error::DsisError;
use crate::models::{ModelRef, NativeUid};
use std::fmt;

/// Data field used for bulk data when none is given
pub const DEFAULT_DATA_FIELD: &str = "data";

/// Schema (table) of a query: a plain name or a typed model
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaRef {
    Name(String),
    Model(ModelRef),
}

impl SchemaRef {
    pub fn name(&self) -> &str {
        match self {
            SchemaRef::Name(name) => name,
            SchemaRef::Model(model) => model.name(),
        }
    }

    /// The typed model, if the schema was given as one
    pub fn model(&self) -> Option<&ModelRef> {
        match self {
            SchemaRef::Model(model) => Some(model),
            SchemaRef::Name(_) => None,
        }
    }
}

impl From<&str> for SchemaRef {
    fn from(name: &str) -> Self {
        SchemaRef::Name(name.to_string())
    }
}

impl From<String> for SchemaRef {
    fn from(name: String) -> Self {
        SchemaRef::Name(name)
    }
}

impl From<ModelRef> for SchemaRef {
    fn from(model: ModelRef) -> Self {
        SchemaRef::Model(model)
    }
}

impl From<&ModelRef> for SchemaRef {
    fn from(model: &ModelRef) -> Self {
        SchemaRef::Model(model.clone())
    }
}

/// Single entity whose binary data is being addressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityTarget {
    /// `/{Schema}('{native_uid}')/{data_field}`
    Field {
        native_uid: String,
        data_field: String,
    },
    /// Media link read from a previous metadata response
    MediaLink(String),
}

/// Field or relation names accepted by `select` and `expand`
///
/// Every item may itself be a comma-separated list.
pub trait IntoFieldList {
    fn into_field_list(self) -> Vec<String>;
}

fn split_fields(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(String::from)
}

impl IntoFieldList for &str {
    fn into_field_list(self) -> Vec<String> {
        split_fields(self).collect()
    }
}

impl IntoFieldList for String {
    fn into_field_list(self) -> Vec<String> {
        self.as_str().into_field_list()
    }
}

impl IntoFieldList for &String {
    fn into_field_list(self) -> Vec<String> {
        self.as_str().into_field_list()
    }
}

impl<S: AsRef<str>> IntoFieldList for &[S] {
    fn into_field_list(self) -> Vec<String> {
        self.iter().flat_map(|s| split_fields(s.as_ref())).collect()
    }
}

impl<S: AsRef<str>, const N: usize> IntoFieldList for [S; N] {
    fn into_field_list(self) -> Vec<String> {
        self.as_slice().into_field_list()
    }
}

impl<S: AsRef<str>> IntoFieldList for Vec<S> {
    fn into_field_list(self) -> Vec<String> {
        self.as_slice().into_field_list()
    }
}

/// Fluent DSIS query builder
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    district_id: String,
    project: String,
    schema: Option<SchemaRef>,
    select: Vec<String>,
    expand: Vec<String>,
    filter: Option<String>,
    format: Option<String>,
    extra: Vec<(String, String)>,
    entity: Option<EntityTarget>,
}

impl QueryBuilder {
    /// Create a builder for a district and project
    pub fn new(district_id: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            district_id: district_id.into(),
            project: project.into(),
            schema: None,
            select: Vec::new(),
            expand: Vec::new(),
            filter: None,
            format: None,
            extra: Vec::new(),
            entity: None,
        }
    }

    /// Set the schema by name or typed model
    pub fn schema(mut self, schema: impl Into<SchemaRef>) -> Self {
        let schema = schema.into();
        tracing::debug!("Set schema: {}", schema.name());
        self.schema = Some(schema);
        self
    }

    /// Append fields to `$select`
    pub fn select(mut self, fields: impl IntoFieldList) -> Self {
        self.select.extend(fields.into_field_list());
        self
    }

    /// Append relations to `$expand`
    pub fn expand(mut self, relations: impl IntoFieldList) -> Self {
        self.expand.extend(relations.into_field_list());
        self
    }

    /// Set `$filter`, replacing any earlier filter
    pub fn filter(mut self, expr: impl Into<String>) -> Self {
        self.filter = Some(expr.into());
        self
    }

    /// Set `$format`; an empty value or `None` omits the parameter
    pub fn format<'a>(mut self, value: impl Into<Option<&'a str>>) -> Self {
        self.format = value
            .into()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from);
        self
    }

    /// Add a pass-through query parameter, rendered after the OData options
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    /// Target an entity's `data` field for bulk retrieval
    pub fn entity<E: NativeUid + ?Sized>(self, entity: &E) -> Result<Self, DsisError> {
        self.entity_with_field(entity, DEFAULT_DATA_FIELD)
    }

    /// Target a named binary field (e.g. `$value`) of an entity
    pub fn entity_with_field<E: NativeUid + ?Sized>(
        mut self,
        entity: &E,
        data_field: &str,
    ) -> Result<Self, DsisError> {
        self.require_schema("targeting an entity")?;
        let native_uid = entity
            .native_uid()
            .ok_or_else(|| DsisError::configuration("entity has no native_uid"))?;
        let data_field = match data_field.trim() {
            "" => DEFAULT_DATA_FIELD,
            field => field,
        };

        self.entity = Some(EntityTarget::Field {
            native_uid,
            data_field: data_field.to_string(),
        });
        Ok(self)
    }

    /// Target an entity through a media link taken from a metadata response
    pub fn media_link(mut self, link: impl Into<String>) -> Result<Self, DsisError> {
        self.require_schema("targeting a media link")?;
        let link = link.into();
        if link.trim().is_empty() {
            return Err(DsisError::configuration("media link is empty"));
        }
        self.entity = Some(EntityTarget::MediaLink(link));
        Ok(self)
    }

    /// Drop the entity target, going back to a collection query
    pub fn clear_entity(mut self) -> Self {
        self.entity = None;
        self
    }

    /// Clear everything except district and project
    pub fn reset(self) -> Self {
        tracing::debug!("Reset builder");
        Self::new(self.district_id, self.project)
    }

    pub fn district_id(&self) -> &str {
        &self.district_id
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn schema_ref(&self) -> Option<&SchemaRef> {
        self.schema.as_ref()
    }

    pub fn schema_name(&self) -> Option<&str> {
        self.schema.as_ref().map(SchemaRef::name)
    }

    /// Typed model of the schema, if any
    pub fn model(&self) -> Option<&ModelRef> {
        self.schema.as_ref().and_then(SchemaRef::model)
    }

    pub fn select_fields(&self) -> &[String] {
        &self.select
    }

    pub fn expand_list(&self) -> &[String] {
        &self.expand
    }

    pub fn filter_expr(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn format_type(&self) -> Option<&str> {
        self.format.as_deref()
    }

    pub fn extra_params(&self) -> &[(String, String)] {
        &self.extra
    }

    pub fn entity_target(&self) -> Option<&EntityTarget> {
        self.entity.as_ref()
    }

    fn require_schema(&self, action: &str) -> Result<&SchemaRef, DsisError> {
        self.schema.as_ref().ok_or_else(|| {
            DsisError::configuration(format!("schema must be set before {}", action))
        })
    }

    /// Query parameters in rendering order, unencoded
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();

        if let Some(ref format) = self.format {
            params.push(("$format".to_string(), format.clone()));
        }
        if !self.select.is_empty() {
            params.push(("$select".to_string(), self.select.join(",")));
        }
        if let Some(ref filter) = self.filter {
            params.push(("$filter".to_string(), filter.clone()));
        }
        if !self.expand.is_empty() {
            params.push(("$expand".to_string(), self.expand.join(",")));
        }
        params.extend(self.extra.iter().cloned());

        params
    }

    /// Encoded query string without the leading `?`
    pub fn query_string(&self) -> String {
        self.query_params()
            .iter()
            .map(|(key, value)| format!("{}={}", encode_key(key), encode_segment(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Schema or entity path, relative to the project
    pub fn path(&self) -> Result<String, DsisError> {
        let schema = self.require_schema("rendering a query")?;
        let schema = encode_segment(schema.name());

        let path = match &self.entity {
            None => schema,
            Some(EntityTarget::Field {
                native_uid,
                data_field,
            }) => format!("{}('{}')/{}", schema, encode_segment(native_uid), data_field),
            Some(EntityTarget::MediaLink(link)) => link.clone(),
        };
        Ok(path)
    }

    /// Render `<path>?<query>`; the `?` is left out when there are no parameters
    pub fn render(&self) -> Result<String, DsisError> {
        let path = self.path()?;
        let query = self.query_string();

        let rendered = if query.is_empty() {
            path
        } else if path.contains('?') {
            format!("{}&{}", path, query)
        } else {
            format!("{}?{}", path, query)
        };

        tracing::debug!("Built query string: {}", rendered);
        Ok(rendered)
    }
}

impl fmt::Display for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Ok(rendered) => f.write_str(&rendered),
            Err(_) => write!(
                f,
                "QueryBuilder(district_id={}, project={}, schema=None)",
                self.district_id, self.project
            ),
        }
    }
}
