//!
//! The delivery adapter registered with a transport as the callback for one subscription.
//!
//! The transport calls [`DeliveryAdapter::deliver`] once per message, strictly in order and
//! never concurrently. The adapter hands each message to the user handler, contains any
//! failure so the transport never sees it, and optionally keeps throughput statistics.
//!
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::error::Error as StdError;
use std::panic::{self, catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Once};
use thiserror::Error;
use tracing::{error, trace};

use crate::error::ConsumerError;
use crate::message::TransportMessage;
use crate::statistics::{Accumulator, Statistics, StatisticsHandle};
use crate::time::{Clock, SystemClock};
use crate::view::{Diagnostics, MessageView};

pub type HandlerError = Box<dyn StdError + Send + Sync>;

/// User processing logic for one subscription.
pub trait Handler<M: TransportMessage + ?Sized>: Send {
    fn on_message(&mut self, message: MessageView<'_, M>) -> Result<(), HandlerError>;
}

/// Adapts a closure into a [`Handler`]. See [`DeliveryAdapter::from_fn`].
pub struct FnHandler<F>(F);

impl<M, F> Handler<M> for FnHandler<F>
where
    M: TransportMessage + ?Sized,
    F: FnMut(MessageView<'_, M>) -> Result<(), HandlerError> + Send,
{
    fn on_message(&mut self, message: MessageView<'_, M>) -> Result<(), HandlerError> {
        (self.0)(message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListenerOptions {
    /// Track message count and throughput from construction onwards.
    pub capture_statistics: bool,
}

/// A handler failure, caught at the `deliver` boundary and reported instead of propagated.
#[derive(Debug, Error)]
#[error("message handler failed: {error}")]
pub struct HandlerFault {
    pub error: String,

    /// Source chain of the error, outermost first. For a panic, where it was raised.
    pub trace: Vec<String>,

    pub panicked: bool,

    /// `file:line:column` of a handler panic, when the panic hook could record it.
    pub location: Option<String>,

    pub diagnostics: Diagnostics,
}

impl HandlerFault {
    fn from_error(error: HandlerError, diagnostics: Diagnostics) -> Self {
        let mut trace = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            trace.push(cause.to_string());
            source = cause.source();
        }
        HandlerFault {
            error: error.to_string(),
            trace,
            panicked: false,
            location: None,
            diagnostics,
        }
    }

    fn from_panic(
        payload: Box<dyn Any + Send>,
        location: Option<String>,
        diagnostics: Diagnostics,
    ) -> Self {
        let text = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_owned()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        HandlerFault {
            error: format!("panicked: {}", text),
            trace: location
                .iter()
                .map(|location| format!("panicked at {}", location))
                .collect(),
            panicked: true,
            location,
            diagnostics,
        }
    }
}

thread_local! {
    // Set while this thread runs a handler inside `deliver`.
    static CONTAINING: Cell<bool> = const { Cell::new(false) };
    static PANIC_SITE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Installs, once per process, a panic hook that records where a handler panicked instead of
/// printing it, so contained panics reach the fault sink only. Panics raised outside a delivery
/// are passed to whichever hook was installed before. A hook set later by the application
/// replaces this one; faults then carry no location and panics print as usual.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CONTAINING.try_with(Cell::get).unwrap_or(false) {
                let site = info.location().map(|location| location.to_string());
                // Thread-locals already torn down: nothing to record.
                let _ = PANIC_SITE.try_with(|slot| *slot.borrow_mut() = site);
            } else {
                previous(info);
            }
        }));
    });
}

/// Where poison-message reports go. Injected at construction.
pub trait FaultSink: Send + Sync {
    fn report(&self, fault: &HandlerFault);
}

/// Reports each fault as one `tracing` error event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFaultSink;

impl FaultSink for TracingFaultSink {
    fn report(&self, fault: &HandlerFault) {
        let diagnostics = serde_json::to_string(&fault.diagnostics)
            .unwrap_or_else(|e| format!("<diagnostics unavailable: {}>", e));
        error!(
            message_id = fault.diagnostics.attributes.message_id.as_deref().unwrap_or("-"),
            error = %fault.error,
            trace = ?fault.trace,
            panicked = fault.panicked,
            location = fault.location.as_deref().unwrap_or("-"),
            diagnostics = %diagnostics,
            "message handler failed; continuing with next message"
        );
    }
}

pub struct DeliveryAdapter<M: TransportMessage + ?Sized> {
    handler: Box<dyn Handler<M>>,
    statistics: Option<Arc<Accumulator>>,
    sink: Arc<dyn FaultSink>,
}

impl<M: TransportMessage + ?Sized> DeliveryAdapter<M> {
    /// Build an adapter that logs faults through `tracing`.
    ///
    /// With `capture_statistics` set, the statistics clock starts now, not at the first delivery.
    pub fn new(handler: impl Handler<M> + 'static, options: ListenerOptions) -> Self {
        Self::with_collaborators(
            handler,
            options,
            Arc::new(TracingFaultSink),
            Arc::new(SystemClock),
        )
    }

    /// # Examples
    ///
    /// ```
    /// use mq_consumer::listener::{DeliveryAdapter, ListenerOptions};
    /// use mq_consumer::message::{Body, Message};
    ///
    /// let mut adapter = DeliveryAdapter::<Message>::from_fn(
    ///     |view| {
    ///         println!("{}", view);
    ///         Ok(())
    ///     },
    ///     ListenerOptions { capture_statistics: true },
    /// );
    /// adapter.deliver(&mut Message::new(Body::Text("hello".into())));
    /// assert_eq!(adapter.statistics().unwrap().message_count, 1);
    /// ```
    pub fn from_fn<F>(handler: F, options: ListenerOptions) -> Self
    where
        F: FnMut(MessageView<'_, M>) -> Result<(), HandlerError> + Send + 'static,
    {
        Self::new(FnHandler(handler), options)
    }

    pub fn with_collaborators(
        handler: impl Handler<M> + 'static,
        options: ListenerOptions,
        sink: Arc<dyn FaultSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        install_panic_hook();
        let statistics = if options.capture_statistics {
            Some(Arc::new(Accumulator::new(clock)))
        } else {
            None
        };
        DeliveryAdapter {
            handler: Box::new(handler),
            statistics,
            sink,
        }
    }

    /// Replace the fault sink, keeping everything else.
    pub fn with_sink(mut self, sink: Arc<dyn FaultSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Entry point invoked by the transport for each message.
    ///
    /// Statistics are recorded before the handler runs, so a handler that fails or never
    /// returns is still counted. Every handler error and panic is reported to the fault sink
    /// and swallowed; this call always returns normally so the transport moves on instead of
    /// redelivering a poison message forever. Aborting conditions such as allocation failure
    /// cannot be contained.
    pub fn deliver(&mut self, message: &mut M) {
        if let Some(statistics) = &self.statistics {
            statistics.record();
        }

        let handler = &mut self.handler;
        let containing = CONTAINING.with(|flag| flag.replace(true));
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handler.on_message(MessageView::new(&mut *message))
        }));
        CONTAINING.with(|flag| flag.set(containing));

        let fault = match outcome {
            Ok(Ok(())) => {
                trace!("message handled");
                return;
            }
            Ok(Err(e)) => HandlerFault::from_error(e, MessageView::new(message).diagnostics()),
            Err(payload) => {
                let location = PANIC_SITE.with(|slot| slot.borrow_mut().take());
                HandlerFault::from_panic(payload, location, MessageView::new(message).diagnostics())
            }
        };
        self.sink.report(&fault);
    }

    /// # Errors
    /// Raise ConsumerError::PreconditionViolation if statistics capture was not enabled.
    pub fn statistics(&self) -> Result<Statistics, ConsumerError> {
        self.statistics_handle().statistics()
    }

    /// Handle for reading statistics from another thread while this adapter keeps delivering.
    pub fn statistics_handle(&self) -> StatisticsHandle {
        StatisticsHandle::new(self.statistics.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{HeaderField, HeaderValue};
    use crate::message::{Body, Message};
    use crate::time::ManualClock;
    use std::fmt;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        faults: Mutex<Vec<HandlerFault>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<HandlerFault> {
            std::mem::take(&mut *self.faults.lock().unwrap())
        }
    }

    impl FaultSink for RecordingSink {
        fn report(&self, fault: &HandlerFault) {
            self.faults.lock().unwrap().push(HandlerFault {
                error: fault.error.clone(),
                trace: fault.trace.clone(),
                panicked: fault.panicked,
                location: fault.location.clone(),
                diagnostics: fault.diagnostics.clone(),
            });
        }
    }

    #[derive(Debug)]
    struct Wrapped(std::num::ParseIntError);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "order total unreadable")
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    fn message(id: &str) -> Message {
        Message::new(Body::Text(format!("body of {}", id)))
            .with_header(HeaderField::MessageId, HeaderValue::Text(id.to_owned()))
    }

    fn enabled() -> ListenerOptions {
        ListenerOptions {
            capture_statistics: true,
        }
    }

    fn clocked<F>(handler: F, clock: &ManualClock) -> DeliveryAdapter<Message>
    where
        F: FnMut(MessageView<'_, Message>) -> Result<(), HandlerError> + Send + 'static,
    {
        DeliveryAdapter::with_collaborators(
            FnHandler(handler),
            enabled(),
            Arc::new(RecordingSink::default()),
            Arc::new(clock.clone()),
        )
    }

    #[test]
    fn test_statistics_require_capture() {
        let adapter = DeliveryAdapter::<Message>::from_fn(|_| Ok(()), ListenerOptions::default());
        assert!(matches!(
            adapter.statistics(),
            Err(ConsumerError::PreconditionViolation(_))
        ));
        assert!(!adapter.statistics_handle().is_enabled());
    }

    #[test]
    fn test_statistics_before_first_delivery() -> Result<(), Box<dyn std::error::Error>> {
        let clock = ManualClock::new();
        let adapter = clocked(|_| Ok(()), &clock);
        clock.advance(Duration::from_secs(5));

        let stats = adapter.statistics()?;
        assert_eq!(stats.message_count, 0);
        assert_eq!(stats.duration_seconds, 5.0);
        assert_eq!(stats.messages_per_second, 0);
        Ok(())
    }

    #[test]
    fn test_count_tracks_each_delivery() -> Result<(), Box<dyn std::error::Error>> {
        let clock = ManualClock::new();
        let handler_clock = clock.clone();
        let mut adapter = clocked(
            move |_| {
                handler_clock.advance(Duration::from_millis(250));
                Ok(())
            },
            &clock,
        );

        clock.advance(Duration::from_secs(1));
        for k in 1..=6u64 {
            adapter.deliver(&mut message(&format!("ID:{}", k)));
            let stats = adapter.statistics()?;
            let expected_duration = 1.0 + 0.25 * (k - 1) as f64;
            assert_eq!(stats.message_count, k);
            assert_eq!(stats.duration_seconds, expected_duration);
            assert_eq!(
                stats.messages_per_second,
                (k as f64 / expected_duration).floor() as u64
            );
        }
        Ok(())
    }

    #[test]
    fn test_three_slow_messages() -> Result<(), Box<dyn std::error::Error>> {
        let clock = ManualClock::new();
        let handler_clock = clock.clone();
        let mut adapter = clocked(
            move |_| {
                handler_clock.advance(Duration::from_secs(1));
                Ok(())
            },
            &clock,
        );

        // The idle second before the first message counts; deliveries are marked at 1s, 2s and 3s.
        clock.advance(Duration::from_secs(1));
        for id in ["ID:1", "ID:2", "ID:3"] {
            adapter.deliver(&mut message(id));
        }

        let stats = adapter.statistics()?;
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.duration_seconds, 3.0);
        assert_eq!(stats.messages_per_second, 1);
        Ok(())
    }

    #[test]
    fn test_count_recorded_before_handler_runs() -> Result<(), Box<dyn std::error::Error>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle_slot: Arc<Mutex<Option<StatisticsHandle>>> = Arc::new(Mutex::new(None));

        let seen_in_handler = seen.clone();
        let slot_in_handler = handle_slot.clone();
        let mut adapter = DeliveryAdapter::<Message>::from_fn(
            move |_| {
                if let Some(handle) = slot_in_handler.lock().unwrap().as_ref() {
                    seen_in_handler
                        .lock()
                        .unwrap()
                        .push(handle.statistics()?.message_count);
                }
                Ok(())
            },
            enabled(),
        );
        *handle_slot.lock().unwrap() = Some(adapter.statistics_handle());

        adapter.deliver(&mut message("ID:1"));
        adapter.deliver(&mut message("ID:2"));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        Ok(())
    }

    #[test]
    fn test_handler_error_is_contained() -> Result<(), Box<dyn std::error::Error>> {
        let sink = Arc::new(RecordingSink::default());
        let handled = Arc::new(Mutex::new(Vec::new()));
        let handled_in_handler = handled.clone();
        let mut adapter = DeliveryAdapter::<Message>::from_fn(
            move |view| {
                let id = view.message_id().unwrap_or_default();
                if id == "ID:poison" {
                    let parse = "12x".parse::<i32>().map_err(Wrapped)?;
                    return Err(format!("unreachable {}", parse).into());
                }
                handled_in_handler.lock().unwrap().push(id);
                Ok(())
            },
            enabled(),
        )
        .with_sink(sink.clone());

        adapter.deliver(&mut message("ID:1"));
        adapter.deliver(&mut message("ID:poison").with_property("tenant", "acme"));
        adapter.deliver(&mut message("ID:2"));

        assert_eq!(*handled.lock().unwrap(), vec!["ID:1", "ID:2"]);
        assert_eq!(adapter.statistics()?.message_count, 3);

        let faults = sink.take();
        assert_eq!(faults.len(), 1);
        let fault = &faults[0];
        assert!(!fault.panicked);
        assert_eq!(fault.error, "order total unreadable");
        assert_eq!(fault.trace, vec!["invalid digit found in string".to_owned()]);
        assert_eq!(fault.diagnostics.attributes.message_id.as_deref(), Some("ID:poison"));
        assert_eq!(fault.diagnostics.body, "text(17 bytes)");
        assert!(fault.diagnostics.properties.contains_key("tenant"));
        Ok(())
    }

    #[test]
    fn test_handler_panic_is_contained() -> Result<(), Box<dyn std::error::Error>> {
        let sink = Arc::new(RecordingSink::default());
        let mut calls = 0;
        let mut adapter = DeliveryAdapter::<Message>::from_fn(
            move |_| {
                calls += 1;
                if calls == 1 {
                    panic!("handler blew up");
                }
                Ok(())
            },
            enabled(),
        )
        .with_sink(sink.clone());

        adapter.deliver(&mut message("ID:1"));
        adapter.deliver(&mut message("ID:2"));

        let faults = sink.take();
        assert_eq!(faults.len(), 1);
        assert!(faults[0].panicked);
        assert_eq!(faults[0].error, "panicked: handler blew up");
        let location = faults[0].location.clone().unwrap_or_default();
        assert!(location.starts_with("src/listener.rs:"), "location was {:?}", location);
        assert_eq!(faults[0].trace, vec![format!("panicked at {}", location)]);
        assert_eq!(adapter.statistics()?.message_count, 2);
        Ok(())
    }

    #[test]
    fn test_handler_mutations_write_through() {
        let mut adapter = DeliveryAdapter::<Message>::from_fn(
            |mut view| {
                view.set_property("seen", true)?;
                Ok(())
            },
            ListenerOptions::default(),
        );
        let mut message = message("ID:1");
        adapter.deliver(&mut message);
        assert_eq!(
            message.property("seen"),
            Some(crate::property::PropertyValue::Bool(true))
        );
    }

    #[test]
    fn test_statistics_read_from_another_thread() -> Result<(), Box<dyn std::error::Error>> {
        let mut adapter = DeliveryAdapter::<Message>::from_fn(|_| Ok(()), enabled());
        let handle = adapter.statistics_handle();

        let monitor = std::thread::spawn(move || {
            let mut last = 0;
            for _ in 0..1_000 {
                let count = handle.statistics().map(|s| s.message_count).unwrap_or(u64::MAX);
                assert!(count >= last, "count went backwards: {} < {}", count, last);
                last = count;
            }
            last
        });

        for k in 0..10_000 {
            adapter.deliver(&mut message(&format!("ID:{}", k)));
        }
        let observed = monitor.join().map_err(|_| "monitor thread panicked")?;
        assert!(observed <= 10_000);
        assert_eq!(adapter.statistics()?.message_count, 10_000);
        Ok(())
    }

    #[test]
    fn test_options_from_json() -> Result<(), Box<dyn std::error::Error>> {
        let options: ListenerOptions = serde_json::from_str(r#"{"captureStatistics": true}"#)?;
        assert!(options.capture_statistics);

        let options: ListenerOptions = serde_json::from_str("{}")?;
        assert_eq!(options, ListenerOptions::default());
        Ok(())
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_default_sink_logs_fault() {
        let mut adapter = DeliveryAdapter::<Message>::from_fn(
            |_| Err("downstream rejected order".into()),
            ListenerOptions::default(),
        );
        adapter.deliver(&mut message("ID:77"));

        assert!(logs_contain("message handler failed"));
        assert!(logs_contain("downstream rejected order"));
        assert!(logs_contain("ID:77"));
    }
}
