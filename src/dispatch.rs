//! Command dispatcher: inbound request boxes in, answer boxes out.
//!
//! For each inbound request the dispatcher resolves the command spec,
//! decodes arguments against its schema, and runs the bound handler as an
//! independent spawned unit of work, so a suspended handler never blocks
//! the read loop. Handler results are encoded per the response schema;
//! handler failures are mapped to stable wire error names through the
//! spec's error table. The local cause is logged, never serialized.
//!
//! Answer policy: an answer (success or error) goes out only when the
//! spec's `answer_required` holds and the request carried an `_ask` id.
//! Choke and unchoke therefore never produce an answer box. The one
//! exception is an unknown command, which has no spec to consult and is
//! answered whenever `_ask` is present.
//!
//! Handlers are schema-free behavior: the registry stays pure data, and a
//! handler is a function from decoded arguments to a [`Reply`]. A reply may
//! carry a post-send hook, which the writer fires once the answer bytes are
//! handed to the transport; the virtual-channel handler uses this to start
//! its transport at exactly that moment.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::command::{
    decode_fields, encode_fields, ArgValue, ArgValues, CommandKind, CommandRegistry, CommandSpec,
};
use crate::error::{CommandFailure, Result, UNKNOWN_ERROR_NAME};
use crate::service::BoxFuture;
use crate::wire::{encode_box, WireBox};
use crate::writer::{OutboundBox, SentHook, WriterHandle};

/// Wire error name for a request whose command is not registered.
pub const UNKNOWN_COMMAND_ERROR_NAME: &str = "UnknownCommand";

/// Wire error name for a request with missing or malformed arguments.
pub const ARGUMENT_DECODE_ERROR_NAME: &str = "ArgumentDecodeError";

/// Default maximum concurrently running handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// A handler's successful result: response field values, plus an optional
/// hook to run once the answer box is handed off for sending.
pub struct Reply {
    pub(crate) fields: Vec<(&'static str, ArgValue)>,
    pub(crate) on_sent: Option<SentHook>,
}

impl Reply {
    /// A reply with no response fields.
    pub fn empty() -> Self {
        Self {
            fields: Vec::new(),
            on_sent: None,
        }
    }

    /// Add a response field value.
    pub fn field(mut self, name: &'static str, value: ArgValue) -> Self {
        self.fields.push((name, value));
        self
    }

    /// Attach a hook to run when the answer is handed to the write path.
    pub fn on_sent(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_sent = Some(Box::new(hook));
        self
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("fields", &self.fields)
            .field("has_hook", &self.on_sent.is_some())
            .finish()
    }
}

/// Future returned by a command handler.
pub type HandlerFuture = BoxFuture<'static, std::result::Result<Reply, CommandFailure>>;

/// A command handler bound to a registered spec, keyed by command kind.
pub trait CommandHandler: Send + Sync {
    fn call(&self, args: ArgValues) -> HandlerFuture;
}

impl<F> CommandHandler for F
where
    F: Fn(ArgValues) -> HandlerFuture + Send + Sync,
{
    fn call(&self, args: ArgValues) -> HandlerFuture {
        (self)(args)
    }
}

/// Resolves inbound request boxes and runs their handlers.
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
    writer: WriterHandle,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<CommandRegistry>,
        handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
        writer: WriterHandle,
        max_concurrent_handlers: usize,
    ) -> Self {
        Self {
            registry,
            handlers,
            writer,
            semaphore: Arc::new(Semaphore::new(max_concurrent_handlers)),
        }
    }

    /// Dispatch one inbound request box.
    ///
    /// Returns once the handler has been spawned (or the request rejected);
    /// it never waits for the handler itself.
    pub(crate) async fn dispatch(&self, bx: WireBox) {
        let Some(name) = bx.command() else {
            tracing::debug!("dropping box with no command key");
            return;
        };
        let ask = bx.ask_id();

        let spec = match self.registry.lookup(name) {
            Ok(spec) => *spec,
            Err(_) => {
                tracing::debug!(command = name, "unknown command");
                if let Some(ask) = ask {
                    send_error(&self.writer, ask, UNKNOWN_COMMAND_ERROR_NAME).await;
                }
                return;
            }
        };

        let args = match decode_fields(spec.arguments, &bx) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(command = spec.name, error = %e, "argument decode failed");
                if spec.answer_required {
                    if let Some(ask) = ask {
                        send_error(&self.writer, ask, ARGUMENT_DECODE_ERROR_NAME).await;
                    }
                }
                return;
            }
        };

        let Some(handler) = self.handlers.get(&spec.kind).cloned() else {
            tracing::error!(command = spec.name, "no handler bound");
            if spec.answer_required {
                if let Some(ask) = ask {
                    send_error(&self.writer, ask, UNKNOWN_ERROR_NAME).await;
                }
            }
            return;
        };

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    command = spec.name,
                    "handler capacity reached, dropping request"
                );
                return;
            }
        };

        let writer = self.writer.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let result = handler.call(args).await;
            finish_dispatch(writer, spec, ask, result).await;
        });
    }
}

/// Encode and send the handler's outcome, respecting the answer policy.
async fn finish_dispatch(
    writer: WriterHandle,
    spec: CommandSpec,
    ask: Option<u64>,
    result: std::result::Result<Reply, CommandFailure>,
) {
    let answer_to = match ask {
        Some(id) if spec.answer_required => Some(id),
        _ => None,
    };

    match result {
        Ok(reply) => {
            let Some(ask) = answer_to else {
                if reply.on_sent.is_some() {
                    tracing::debug!(command = spec.name, "no answer due, dropping post-send hook");
                }
                return;
            };
            match encode_answer(&spec, ask, &reply.fields) {
                Ok(data) => {
                    let outbound = match reply.on_sent {
                        Some(hook) => OutboundBox::with_hook(data, hook),
                        None => OutboundBox::new(data),
                    };
                    if let Err(e) = writer.send(outbound).await {
                        tracing::error!(command = spec.name, error = %e, "failed to send answer");
                    }
                }
                Err(e) => {
                    tracing::error!(command = spec.name, error = %e, "failed to encode answer");
                    send_error(&writer, ask, UNKNOWN_ERROR_NAME).await;
                }
            }
        }
        Err(failure) => {
            let wire_name = failure
                .fixed_wire_name()
                .or_else(|| spec.wire_error_name(failure.kind()))
                .unwrap_or(UNKNOWN_ERROR_NAME);
            tracing::warn!(
                command = spec.name,
                error = %failure,
                wire_name,
                "command handler failed"
            );
            if let Some(ask) = answer_to {
                send_error(&writer, ask, wire_name).await;
            }
        }
    }
}

fn encode_answer(
    spec: &CommandSpec,
    ask: u64,
    fields: &[(&'static str, ArgValue)],
) -> Result<Bytes> {
    let mut bx = WireBox::answer(ask);
    encode_fields(spec.response, fields, &mut bx)?;
    encode_box(&bx)
}

async fn send_error(writer: &WriterHandle, ask: u64, name: &str) {
    let bx = WireBox::error(ask, name);
    match encode_box(&bx) {
        Ok(data) => {
            if let Err(e) = writer.send(OutboundBox::new(data)).await {
                tracing::error!(error = %e, "failed to send error answer");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to encode error answer"),
    }
}
