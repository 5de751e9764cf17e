//! Design documents registered during a session.
//!
//! A design document's fields form a tree of named groups whose leaves are
//! function sources. Functions are compiled the first time a path is
//! resolved and cached until the document is registered again.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::error::{ServerError, ServerResult};
use crate::scripting::{Invocable, Runtimes};

/// Node of a design document's function tree
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionTree {
    /// Named children
    Group(BTreeMap<String, FunctionTree>),
    /// Function source text
    Source(String),
    /// Any other JSON value; never resolves to a function
    Data(Value),
}

impl FunctionTree {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(source) => FunctionTree::Source(source.clone()),
            Value::Object(map) => FunctionTree::Group(
                map.iter()
                    .map(|(key, value)| (key.clone(), FunctionTree::from_json(value)))
                    .collect(),
            ),
            other => FunctionTree::Data(other.clone()),
        }
    }

    /// Follow `path` from this node.
    pub fn walk(&self, path: &[String]) -> Option<&FunctionTree> {
        path.iter().try_fold(self, |node, segment| match node {
            FunctionTree::Group(children) => children.get(segment),
            _ => None,
        })
    }

    /// Source text at this node: a leaf, or a group with a single source entry
    /// such as a view's `{"map": "..."}`.
    pub fn source(&self) -> Option<&str> {
        match self {
            FunctionTree::Source(source) => Some(source),
            FunctionTree::Group(children) if children.len() == 1 => {
                match children.values().next() {
                    Some(FunctionTree::Source(source)) => Some(source),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// A registered design document
#[derive(Debug, Clone, PartialEq)]
pub struct DesignDocument {
    pub id: String,
    pub revision: Option<String>,
    pub language: String,
    pub functions: FunctionTree,
}

impl DesignDocument {
    /// Build from the registration payload. Underscore fields other than
    /// `_rev` and the `language` field are not part of the function tree.
    pub fn from_json(id: &str, document: &Map<String, Value>, default_language: &str) -> Self {
        let revision = document
            .get("_rev")
            .and_then(Value::as_str)
            .map(str::to_string);
        let language = document
            .get("language")
            .and_then(Value::as_str)
            .unwrap_or(default_language)
            .to_string();

        let functions = FunctionTree::Group(
            document
                .iter()
                .filter(|(key, _)| !key.starts_with('_') && key.as_str() != "language")
                .map(|(key, value)| (key.clone(), FunctionTree::from_json(value)))
                .collect(),
        );

        Self {
            id: id.to_string(),
            revision,
            language,
            functions,
        }
    }
}

type CompiledCache = HashMap<Vec<String>, Rc<dyn Invocable>>;

/// Design documents keyed by id, with their compiled functions
#[derive(Default)]
pub struct Registry {
    documents: HashMap<String, DesignDocument>,
    compiled: HashMap<String, CompiledCache>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace a design document, dropping its compiled functions.
    pub fn register(&mut self, document: DesignDocument) {
        tracing::info!(
            id = %document.id,
            revision = document.revision.as_deref().unwrap_or("-"),
            language = %document.language,
            "Registered design document"
        );
        self.compiled.remove(&document.id);
        self.documents.insert(document.id.clone(), document);
    }

    /// Find the function at `path` in document `id`, compiling it on first use.
    pub fn resolve(
        &mut self,
        id: &str,
        path: &[String],
        runtimes: &Runtimes,
    ) -> ServerResult<Rc<dyn Invocable>> {
        let document = self
            .documents
            .get(id)
            .ok_or_else(|| ServerError::NotFound(format!("unknown design document '{}'", id)))?;

        if let Some(function) = self.compiled.get(id).and_then(|cache| cache.get(path)) {
            return Ok(function.clone());
        }

        let source = document
            .functions
            .walk(path)
            .and_then(FunctionTree::source)
            .ok_or_else(|| {
                ServerError::NotFound(format!(
                    "no function at '{}' in design document '{}'",
                    path.join("/"),
                    id
                ))
            })?;

        let function = runtimes.compile(&document.language, source)?;
        self.compiled
            .entry(id.to_string())
            .or_default()
            .insert(path.to_vec(), function.clone());
        Ok(function)
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.compiled.clear();
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::log_channel::LogChannel;
    use serde_json::json;

    fn runtimes() -> Runtimes {
        Runtimes::new(&ServerConfig::default(), &LogChannel::new()).unwrap()
    }

    fn ddoc(id: &str, value: Value) -> DesignDocument {
        DesignDocument::from_json(id, value.as_object().unwrap(), "python")
    }

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_json_extracts_metadata() {
        let document = ddoc(
            "_design/foo",
            json!({
                "_id": "_design/foo",
                "_rev": "1-abc",
                "language": "lua",
                "updates": {"bar": "function(doc, req) return doc, {} end"},
                "version": 3
            }),
        );
        assert_eq!(document.revision.as_deref(), Some("1-abc"));
        assert_eq!(document.language, "lua");

        let expected = json!({
            "updates": {"bar": "function(doc, req) return doc, {} end"},
            "version": 3
        });
        assert_eq!(document.functions, FunctionTree::from_json(&expected));
    }

    #[test]
    fn test_walk_and_source() {
        let tree = FunctionTree::from_json(&json!({
            "updates": {"bar": "src-bar"},
            "views": {"all": {"map": "src-map"}, "both": {"map": "m", "reduce": "r"}},
            "options": {"local_seq": true}
        }));

        let leaf = tree.walk(&path(&["updates", "bar"])).unwrap();
        assert_eq!(leaf.source(), Some("src-bar"));

        let view = tree.walk(&path(&["views", "all"])).unwrap();
        assert_eq!(view.source(), Some("src-map"));

        let both = tree.walk(&path(&["views", "both"])).unwrap();
        assert_eq!(both.source(), None);

        assert!(tree.walk(&path(&["updates", "missing"])).is_none());
        assert!(tree.walk(&path(&["updates", "bar", "deeper"])).is_none());
        assert_eq!(
            tree.walk(&path(&["options", "local_seq"])).unwrap().source(),
            None
        );
    }

    #[test]
    fn test_resolve_caches_until_reregistered() {
        let runtimes = runtimes();
        let mut registry = Registry::new();
        registry.register(ddoc(
            "_design/foo",
            json!({"shows": {"hello": "def fun(doc, req): return 'v1'"}}),
        ));

        let first = registry
            .resolve("_design/foo", &path(&["shows", "hello"]), &runtimes)
            .unwrap();
        let second = registry
            .resolve("_design/foo", &path(&["shows", "hello"]), &runtimes)
            .unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(first.call(&[json!(null), json!({})]).unwrap(), json!("v1"));

        registry.register(ddoc(
            "_design/foo",
            json!({"shows": {"hello": "def fun(doc, req): return 'v2'"}}),
        ));
        let third = registry
            .resolve("_design/foo", &path(&["shows", "hello"]), &runtimes)
            .unwrap();
        assert_eq!(third.call(&[json!(null), json!({})]).unwrap(), json!("v2"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_errors() {
        let runtimes = runtimes();
        let mut registry = Registry::new();
        registry.register(ddoc(
            "_design/foo",
            json!({
                "updates": {"broken": "def fun(doc req): pass"},
                "shows": {"other": "def fun(doc, req): return 1"},
                "language": "cobol"
            }),
        ));

        let err = registry
            .resolve("_design/missing", &path(&["updates", "x"]), &runtimes)
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::NotFound(_)));

        let err = registry
            .resolve("_design/foo", &path(&["updates", "nope"]), &runtimes)
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "no function at 'updates/nope' in design document '_design/foo'"
        );

        let err = registry
            .resolve("_design/foo", &path(&["shows", "other"]), &runtimes)
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "unsupported language 'cobol'");

        registry.clear();
        assert!(registry.is_empty());
        let err = registry
            .resolve("_design/foo", &path(&["shows", "page"]), &runtimes)
            .err()
            .unwrap();
        assert_eq!(err.frame_id(), "not_found");
    }
}
