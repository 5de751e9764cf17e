//! Command dispatcher
//!
//! [`QueryServer`] owns the session state and processes one input line at a
//! time: the line is parsed, dispatched, and the log frames it produced are
//! written before its result frame.

mod handlers;

use std::io::{BufRead, Write};
use std::rc::Rc;

use crate::config::{QueryConfig, ServerConfig};
use crate::engine::ExecutionEngine;
use crate::error::{ServerError, ServerResult};
use crate::log_channel::LogChannel;
use crate::protocol::{read_line, Command, Frame, FrameWriter};
use crate::registry::Registry;
use crate::scripting::{Invocable, Runtimes};

/// Error id of the diagnostic written before a fatal exit
pub const FATAL_ERROR_ID: &str = "query_server_error";

/// State that lives across commands until `reset`
#[derive(Default)]
pub struct Session {
    pub map_functions: Vec<Rc<dyn Invocable>>,
    pub registry: Registry,
}

pub struct QueryServer {
    config: ServerConfig,
    query_config: QueryConfig,
    log: LogChannel,
    runtimes: Runtimes,
    engine: ExecutionEngine,
    session: Session,
}

impl QueryServer {
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let log = LogChannel::new();
        let runtimes = Runtimes::new(&config, &log)?;
        let engine = ExecutionEngine::new(log.clone());

        Ok(Self {
            config,
            query_config: QueryConfig::default(),
            log,
            runtimes,
            engine,
            session: Session::default(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn query_config(&self) -> &QueryConfig {
        &self.query_config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Serve commands from `reader` until end of input.
    ///
    /// A fatal error writes a diagnostic frame and is returned.
    pub fn run<R: BufRead, W: Write>(&mut self, mut reader: R, writer: W) -> ServerResult<()> {
        let mut writer = FrameWriter::new(writer);
        let mut handled = 0usize;

        loop {
            let line = match read_line(&mut reader) {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => return self.abort(&mut writer, err),
            };
            if line.trim().is_empty() {
                continue;
            }

            match self.handle_line(&line) {
                Ok(frames) => writer.write_frames(&frames)?,
                Err(err) => return self.abort(&mut writer, err),
            }
            handled += 1;
        }

        tracing::info!(commands = handled, "End of input");
        Ok(())
    }

    /// Process one input line and return the frames to write, logs first.
    ///
    /// Only fatal errors are returned as `Err`; any log messages buffered
    /// before the failure stay queued.
    pub fn handle_line(&mut self, line: &str) -> ServerResult<Vec<Frame>> {
        let command = Command::parse(line)?;
        tracing::debug!(command = command.name(), "Dispatching command");

        let frame = self.dispatch(command, line.len())?;
        let mut frames = self.log.drain();
        frames.push(frame);
        Ok(frames)
    }

    fn dispatch(&mut self, command: Command, line_len: usize) -> ServerResult<Frame> {
        match command {
            Command::Reset { config } => recover(self.reset(config), "compilation_error"),
            Command::AddFun { source } => recover(self.add_fun(&source), "map_compilation_error"),
            Command::MapDoc { document } => recover(self.map_doc(&document), "compilation_error"),
            Command::Reduce { sources, rows } => recover(
                self.reduce(&sources, &rows, line_len),
                "reduce_compilation_error",
            ),
            Command::Rereduce { sources, values } => recover(
                self.rereduce(&sources, &values, line_len),
                "reduce_compilation_error",
            ),
            Command::DdocNew { id, document } => {
                recover(self.ddoc_new(&id, &document), "compilation_error")
            }
            Command::DdocInvoke { id, path, args } => {
                recover(self.ddoc_invoke(&id, &path, args), "compilation_error")
            }
        }
    }

    fn abort<W: Write>(&mut self, writer: &mut FrameWriter<W>, err: ServerError) -> ServerResult<()> {
        tracing::error!("Fatal error, ending session: {}", err);
        let mut frames = self.log.drain();
        frames.push(Frame::error(FATAL_ERROR_ID, err.to_string()));
        if let Err(write_err) = writer.write_frames(&frames) {
            tracing::error!("Failed to write diagnostic frame: {}", write_err);
        }
        Err(err)
    }
}

/// Turn a non-fatal error into an error frame.
fn recover(result: ServerResult<serde_json::Value>, compile_id: &str) -> ServerResult<Frame> {
    match result {
        Ok(value) => Ok(Frame::result(value)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            let frame = err.to_frame_with_compile_id(compile_id);
            if let Frame::Error { id, .. } = &frame {
                tracing::warn!(%id, "Command failed: {}", err);
            }
            Ok(frame)
        }
    }
}
