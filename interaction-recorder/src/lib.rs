//! In-page interaction recorder
//!
//! This crate records user interactions inside a web page (clicks, value changes and
//! scrolling) as operation logs whose targets carry an XPath, a CSS selector and a
//! snapshot of the element. The log is buffered per page, optionally mirrored into
//! durable storage, broadcast to same-frame consumers and exported on request over the
//! extension runtime or in-page messaging.

pub mod channel;
pub mod dom;
pub mod error;
pub mod events;
pub mod export;
pub mod locator;
pub mod page;
pub mod recorder;
pub mod storage;

pub use channel::{
    ChannelSource, ControlChannel, HostChannel, InboundMessage, MemoryHost, MemoryPort,
    MessagePort, OutboundMessage, TabIdResponse,
};
pub use dom::{ElementHandle, MemoryDocument, MemoryElement};
pub use error::*;
pub use events::{Action, ActionResult, AttributeMap, OperationRecord, PageContext, TargetInfo};
pub use export::{
    check_timeline, export_operation_logs, load_operation_logs, pretty_print_operation_logs,
    summarize, LogSummary,
};
pub use locator::{css_selector, locate, resolve_xpath, xpath_of};
pub use page::{
    ElementHandleExt, EventKind, Listener, ListenerId, MemoryPage, PageAccessor, PageEvent,
    ScrollOffset,
};
pub use recorder::*;
pub use storage::{JsonFileStorage, LogStorage, MemoryStorage};
