use std::fmt;
use std::sync::Arc;

use spatia_core::anchor::{EdgeArchitype, Payload};
use spatia_core::id::RefId;

/// Which attached edges an edge query considers, relative to the origin node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Out,
    In,
    Any,
}

type Predicate = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// Edge selection: direction, optional edge type and attribute predicate.
#[derive(Clone, Default)]
pub struct EdgeFilter {
    pub direction: Direction,
    pub type_name: Option<String>,
    predicate: Option<Predicate>,
}

impl EdgeFilter {
    pub fn outgoing() -> Self {
        Self::default()
    }

    pub fn incoming() -> Self {
        Self {
            direction: Direction::In,
            ..Default::default()
        }
    }

    pub fn any() -> Self {
        Self {
            direction: Direction::Any,
            ..Default::default()
        }
    }

    /// Only edges whose payload type is `name`.
    pub fn of_type(mut self, name: impl Into<String>) -> Self {
        self.type_name = Some(name.into());
        self
    }

    /// Only edges whose payload satisfies `predicate`.
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Whether `edge`, seen from `origin`, passes this filter.
    pub fn admits(&self, edge: &EdgeArchitype, origin: &RefId) -> bool {
        let outgoing = edge.source == *origin || (edge.undirected && edge.target == *origin);
        let incoming = edge.target == *origin || (edge.undirected && edge.source == *origin);
        let direction_ok = match self.direction {
            Direction::Out => outgoing,
            Direction::In => incoming,
            Direction::Any => outgoing || incoming,
        };
        if !direction_ok {
            return false;
        }
        if let Some(name) = &self.type_name {
            if edge.payload.type_name != *name {
                return false;
            }
        }
        self.predicate.as_ref().map_or(true, |p| p(&edge.payload))
    }
}

impl fmt::Debug for EdgeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeFilter")
            .field("direction", &self.direction)
            .field("type_name", &self.type_name)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Payload and shape of an edge created by `connect`.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSpec {
    pub payload: Payload,
    pub undirected: bool,
}

impl EdgeSpec {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            payload: Payload::new(type_name),
            undirected: false,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.set(key, value);
        self
    }

    pub fn undirected(mut self) -> Self {
        self.undirected = true;
        self
    }
}

impl Default for EdgeSpec {
    fn default() -> Self {
        Self::new("Edge")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spatia_core::id::EntityKind;

    fn edge(type_name: &str, source: RefId, target: RefId) -> EdgeArchitype {
        EdgeArchitype {
            payload: Payload::new(type_name).with("km", 12),
            source,
            target,
            undirected: false,
        }
    }

    #[test]
    fn test_direction() {
        let a = RefId::generate(EntityKind::Node);
        let b = RefId::generate(EntityKind::Node);
        let road = edge("Road", a, b);

        assert!(EdgeFilter::outgoing().admits(&road, &a));
        assert!(!EdgeFilter::outgoing().admits(&road, &b));
        assert!(EdgeFilter::incoming().admits(&road, &b));
        assert!(EdgeFilter::any().admits(&road, &b));

        let mut lane = road.clone();
        lane.undirected = true;
        assert!(EdgeFilter::outgoing().admits(&lane, &b));
    }

    #[test]
    fn test_type_and_predicate() {
        let a = RefId::generate(EntityKind::Node);
        let b = RefId::generate(EntityKind::Node);
        let road = edge("Road", a, b);

        assert!(EdgeFilter::outgoing().of_type("Road").admits(&road, &a));
        assert!(!EdgeFilter::outgoing().of_type("Rail").admits(&road, &a));

        let short = EdgeFilter::outgoing()
            .matching(|p| p.get("km").and_then(|v| v.as_i64()).unwrap_or(0) < 10);
        assert!(!short.admits(&road, &a));
        let long = EdgeFilter::outgoing()
            .matching(|p| p.get("km").and_then(|v| v.as_i64()).unwrap_or(0) >= 10);
        assert!(long.admits(&road, &a));
    }
}
