//! Response envelope and result-value normalization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};

use spatia_core::access::AccessLevel;
use spatia_core::anchor::Architype;
use spatia_core::error::{Result, SpatiaError};
use spatia_core::id::RefId;
use spatia_core::value::Value;

use crate::context::ExecutionContext;

/// Transport-neutral result of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports: Option<Vec<Json>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Vec<Json>>,
}

impl Response {
    /// Envelope for a request that failed before producing results.
    pub fn error(err: &SpatiaError) -> Self {
        let mut body = Map::new();
        body.insert("error".into(), Json::String(err.to_string()));
        Self {
            status: err.status(),
            reports: Some(vec![Json::Object(body)]),
            returns: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).unwrap_or(Json::Null)
    }
}

/// Visitor turning [`Value`] trees into JSON.
///
/// Entity handles become report projections resolved against the context's
/// principal; no reference is ever emitted with more than its id unless the
/// principal can READ it.
pub struct Projector<'a> {
    ctx: &'a mut ExecutionContext,
}

impl<'a> Projector<'a> {
    pub fn new(ctx: &'a mut ExecutionContext) -> Self {
        Self { ctx }
    }

    pub fn list(&mut self, values: &[Value]) -> Result<Vec<Json>> {
        values.iter().map(|v| self.value(v)).collect()
    }

    pub fn value(&mut self, value: &Value) -> Result<Json> {
        Ok(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(self.list(items)?),
            Value::Map(entries) => {
                let mut out = Map::new();
                for (key, v) in entries {
                    out.insert(key.clone(), self.value(v)?);
                }
                Json::Object(out)
            }
            Value::Record(record) => {
                let mut out = Map::new();
                for (key, v) in &record.fields {
                    out.insert(key.clone(), self.value(v)?);
                }
                Json::Object(out)
            }
            Value::Entity(id) => self.entity(id)?,
        })
    }

    fn readable(&mut self, id: &RefId, principal: &RefId) -> Result<bool> {
        if !self.ctx.materialize(id)? {
            return Ok(false);
        }
        Ok(self
            .ctx
            .cached(id)
            .map(|a| a.access_for(principal) >= AccessLevel::Read)
            .unwrap_or(false))
    }

    /// Report projection of one entity.
    fn entity(&mut self, id: &RefId) -> Result<Json> {
        let principal = self.ctx.principal();
        let mut out = Map::new();
        out.insert("id".into(), Json::String(id.to_string()));
        if !self.readable(id, &principal)? {
            return Ok(Json::Object(out));
        }
        let Some(anchor) = self.ctx.cached(id) else {
            return Ok(Json::Object(out));
        };

        out.insert(
            "type".into(),
            Json::String(anchor.architype.type_name().to_string()),
        );
        out.insert(
            "context".into(),
            Json::Object(anchor.architype.payload().fields.clone()),
        );

        match &anchor.architype {
            Architype::Root(node) | Architype::Node(node) => {
                let attached = node.edges.clone();
                let mut edges = Vec::new();
                for edge in attached {
                    if self.readable(&edge, &principal)? {
                        edges.push(Json::String(edge.to_string()));
                    }
                }
                out.insert("edges".into(), Json::Array(edges));
            }
            Architype::Edge(edge) => {
                let ends = [("source", edge.source), ("target", edge.target)];
                for (key, end) in ends {
                    if self.readable(&end, &principal)? {
                        out.insert(key.into(), Json::String(end.to_string()));
                    }
                }
            }
            Architype::Walker(_) | Architype::Object(_) => {}
        }
        Ok(Json::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_fields_are_omitted() {
        let response = Response {
            status: 200,
            reports: None,
            returns: None,
        };
        assert_eq!(serde_json::to_string(&response).unwrap(), r#"{"status":200}"#);
    }

    #[test]
    fn test_error_envelope() {
        let response = Response::error(&SpatiaError::NotFound("n::01".into()));
        assert_eq!(response.status, 404);
        assert!(!response.is_success());
        let json = response.to_json();
        assert!(json["reports"][0]["error"]
            .as_str()
            .unwrap()
            .contains("n::01"));
        assert!(json.get("returns").is_none());
    }
}
