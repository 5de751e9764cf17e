//! Per-command handlers of the dispatcher.

use std::rc::Rc;

use serde_json::{Map, Value};

use super::QueryServer;
use crate::config::QueryConfig;
use crate::engine::HandlerGroup;
use crate::error::{ServerError, ServerResult};
use crate::protocol::to_spaced_string;
use crate::registry::DesignDocument;
use crate::scripting::Invocable;

/// Reduce output shorter than this never counts as overflow
const REDUCE_OVERFLOW_MIN_BYTES: usize = 200;
/// Characters of the offending output quoted in the overflow message
const REDUCE_OVERFLOW_PREVIEW: usize = 100;

impl QueryServer {
    pub(super) fn reset(&mut self, config: Option<Map<String, Value>>) -> ServerResult<Value> {
        self.session.map_functions.clear();
        if self.config.reset_clears_ddocs {
            self.session.registry.clear();
        }
        self.query_config = config.map(QueryConfig::from_map).unwrap_or_default();
        tracing::debug!(reduce_limit = ?self.query_config.reduce_limit, "Session reset");
        Ok(Value::Bool(true))
    }

    pub(super) fn add_fun(&mut self, source: &str) -> ServerResult<Value> {
        let function = self.runtimes.compile_default(source)?;
        self.session.map_functions.push(function);
        Ok(Value::Bool(true))
    }

    pub(super) fn map_doc(&mut self, document: &Value) -> ServerResult<Value> {
        self.engine
            .map_document(&self.session.map_functions, document)
    }

    pub(super) fn reduce(
        &mut self,
        sources: &[String],
        rows: &[(Value, Value)],
        line_len: usize,
    ) -> ServerResult<Value> {
        let functions = self.compile_all(sources)?;
        let result = self.engine.reduce(&functions, rows)?;
        self.check_reduce_overflow(&result, line_len)?;
        Ok(result)
    }

    pub(super) fn rereduce(
        &mut self,
        sources: &[String],
        values: &[Value],
        line_len: usize,
    ) -> ServerResult<Value> {
        let functions = self.compile_all(sources)?;
        let result = self.engine.rereduce(&functions, values)?;
        self.check_reduce_overflow(&result, line_len)?;
        Ok(result)
    }

    pub(super) fn ddoc_new(&mut self, id: &str, document: &Map<String, Value>) -> ServerResult<Value> {
        let document = DesignDocument::from_json(id, document, self.runtimes.default_language());
        self.session.registry.register(document);
        Ok(Value::Bool(true))
    }

    pub(super) fn ddoc_invoke(
        &mut self,
        id: &str,
        path: &[String],
        args: Vec<Value>,
    ) -> ServerResult<Value> {
        let group_name = path.first().map(String::as_str).unwrap_or_default();
        let group = HandlerGroup::parse(group_name)
            .ok_or_else(|| ServerError::UnsupportedHandler(group_name.to_string()))?;

        let function = self.session.registry.resolve(id, path, &self.runtimes)?;
        self.engine.invoke_handler(group, function.as_ref(), args)
    }

    // Reduce sources are compiled for each call and not retained.
    fn compile_all(&self, sources: &[String]) -> ServerResult<Vec<Rc<dyn Invocable>>> {
        sources
            .iter()
            .map(|source| self.runtimes.compile_default(source))
            .collect()
    }

    fn check_reduce_overflow(&self, result: &Value, line_len: usize) -> ServerResult<()> {
        if !self.query_config.reduce_limit(&self.config) {
            return Ok(());
        }

        let rendered = to_spaced_string(result)?;
        if rendered.len() > REDUCE_OVERFLOW_MIN_BYTES && rendered.len() * 2 > line_len {
            let preview: String = rendered.chars().take(REDUCE_OVERFLOW_PREVIEW).collect();
            return Err(ServerError::ReduceOverflow(format!(
                "Reduce output must shrink more rapidly: Current output: '{}'... ({} bytes)",
                preview,
                rendered.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ServerConfig;
    use crate::protocol::Frame;
    use crate::server::QueryServer;
    use serde_json::json;

    fn server(config: ServerConfig) -> QueryServer {
        QueryServer::new(config).unwrap()
    }

    fn result(server: &mut QueryServer, line: &str) -> Frame {
        server
            .handle_line(line)
            .unwrap()
            .pop()
            .unwrap()
    }

    #[test]
    fn test_reset_keeps_design_documents_by_default() {
        let mut server = server(ServerConfig::default());
        result(&mut server, r#"["add_fun", "def fun(doc): yield 1, 2"]"#);
        result(
            &mut server,
            r#"["ddoc", "new", "_design/a", {"shows": {"s": "def fun(doc, req): return 'hi'"}}]"#,
        );
        assert_eq!(server.session().map_functions.len(), 1);

        assert_eq!(result(&mut server, r#"["reset"]"#), Frame::ok());
        assert!(server.session().map_functions.is_empty());
        assert_eq!(server.session().registry.len(), 1);
    }

    #[test]
    fn test_reset_can_clear_design_documents() {
        let mut server = server(ServerConfig {
            reset_clears_ddocs: true,
            ..ServerConfig::default()
        });
        result(
            &mut server,
            r#"["ddoc", "new", "_design/a", {"shows": {"s": "def fun(doc, req): return 'hi'"}}]"#,
        );
        result(&mut server, r#"["reset", {"reduce_limit": true}]"#);
        assert!(server.session().registry.is_empty());
        assert_eq!(server.query_config().reduce_limit, Some(true));

        let frame = result(&mut server, r#"["ddoc", "_design/a", ["shows", "s"], [null, {}]]"#);
        assert!(matches!(frame, Frame::Error { ref id, .. } if id == "not_found"));
    }

    #[test]
    fn test_reduce_overflow() {
        let mut server = server(ServerConfig::default());
        let line = r#"["reduce", ["def fun(keys, values): return 'x' * 500"], [[null, 1]]]"#;

        // Off unless the session enables it
        let frame = result(&mut server, line);
        assert!(matches!(frame, Frame::Result(_)));

        result(&mut server, r#"["reset", {"reduce_limit": true}]"#);
        let frame = result(&mut server, line);
        match frame {
            Frame::Error { id, reason } => {
                assert_eq!(id, "reduce_overflow_error");
                assert!(reason.starts_with("Reduce output must shrink more rapidly"));
            }
            other => panic!("unexpected frame {:?}", other),
        }

        // Small results are always fine
        let frame = result(
            &mut server,
            r#"["rereduce", ["def fun(keys, values, rereduce): return sum(values)"], [1, 2]]"#,
        );
        assert_eq!(frame, Frame::result(json!([true, [3]])));
    }

    #[test]
    fn test_unsupported_handler_group() {
        let mut server = server(ServerConfig::default());
        result(
            &mut server,
            r#"["ddoc", "new", "_design/a", {"lists": {"l": "def fun(head, req): return 1"}}]"#,
        );
        let frame = result(&mut server, r#"["ddoc", "_design/a", ["lists", "l"], [{}, {}]]"#);
        assert_eq!(
            frame,
            Frame::error("unsupported_handler", "Unsupported handler group 'lists'")
        );
    }
}
