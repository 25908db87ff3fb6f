//! One-way messages emitted over the course of a pass, and a runner that
//! executes a pass on its own task.

use crate::analyze::{analyze, AnalysisResult};
use crate::pass::PassContext;
use crate::request::{EngineConfig, PassRequest};
use crate::schema::Column;
use crate::script::ROW_VARIABLE;
use crate::views::{grade_tonnage, section, swath, GradeTonnageResult, SectionResult, SwathResult};
use crate::ScanResult;
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lets the caller route an error to the right surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Io,
    Format,
    /// Filter expression failed to compile
    Filter,
    /// Derived-column script failed to compile
    Script,
    Request,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderInfo {
    pub source: String,
    pub columns: Vec<Column>,
    pub row_variable: String,
    pub delimiter: char,
}

impl HeaderInfo {
    pub(crate) fn new(ctx: &PassContext) -> Self {
        Self {
            source: ctx.source.clone(),
            columns: ctx.schema.columns.clone(),
            row_variable: ROW_VARIABLE.to_string(),
            delimiter: ctx.delimiter as char,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Share of raw input bytes consumed, when the total is known.
    pub fraction: Option<f64>,
    pub rows: u64,
    pub bytes: u64,
}

impl Progress {
    pub(crate) fn new(rows: u64, bytes: u64, total: Option<u64>) -> Self {
        Self {
            fraction: total
                .filter(|t| *t > 0)
                .map(|t| (bytes as f64 / t as f64).min(1.0)),
            rows,
            bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    Header(HeaderInfo),
    Progress(Progress),
    Complete(Box<AnalysisResult>),
    SwathComplete(SwathResult),
    GradeTonnageComplete(GradeTonnageResult),
    SectionComplete(SectionResult),
    Error { kind: ErrorKind, message: String },
}

impl Message {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Message::Header(_) | Message::Progress(_))
    }
}

/// Sending side of a pass. A pass run without a channel emits nothing.
#[derive(Debug, Clone, Default)]
pub struct Events {
    tx: Option<mpsc::Sender<Message>>,
}

impl Events {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Waits for channel capacity; a dropped receiver is ignored.
    pub async fn emit(&self, message: Message) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(message).await;
        }
    }
}

/// Run any pass kind to completion and emit its completion message.
pub async fn execute(request: &PassRequest, config: &EngineConfig, events: &Events) -> ScanResult<()> {
    let done = match request {
        PassRequest::Analyze(r) => Message::Complete(Box::new(analyze(r, config, events).await?)),
        PassRequest::Swath(r) => Message::SwathComplete(swath(r, config, events).await?),
        PassRequest::GradeTonnage(r) => {
            Message::GradeTonnageComplete(grade_tonnage(r, config, events).await?)
        }
        PassRequest::Section(r) => Message::SectionComplete(section(r, config, events).await?),
    };
    events.emit(done).await;
    Ok(())
}

/// A pass running on its own task.
///
/// Dropping the handle or calling [`cancel`](PassHandle::cancel) aborts the
/// task and discards its state; there is no resumption.
pub struct PassHandle {
    rx: mpsc::Receiver<Message>,
    task: JoinHandle<()>,
}

impl PassHandle {
    /// Next message; `None` once the pass has finished or was cancelled.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn into_stream(self) -> impl Stream<Item = Message> {
        futures::stream::unfold(self, |mut handle| async move {
            handle.recv().await.map(|m| (m, handle))
        })
    }
}

impl Drop for PassHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start `request` on a new task. Fatal errors arrive as [`Message::Error`].
pub fn spawn_pass(request: PassRequest, config: EngineConfig) -> PassHandle {
    let (events, rx) = Events::channel(64);
    let task = tokio::spawn(async move {
        if let Err(e) = execute(&request, &config, &events).await {
            events
                .emit(Message::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                })
                .await;
        }
    });
    PassHandle { rx, task }
}
