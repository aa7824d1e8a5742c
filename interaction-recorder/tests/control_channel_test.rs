use interaction_recorder::{
    ChannelSource, ControlChannel, InboundMessage, InteractionRecorder, MemoryElement, MemoryHost,
    MemoryPage, MemoryPort, OutboundMessage, RecorderConfig,
};
use std::sync::Arc;

struct Fixture {
    page: Arc<MemoryPage>,
    host: Arc<MemoryHost>,
    port: Arc<MemoryPort>,
    channel: ControlChannel,
}

fn fixture() -> Fixture {
    let page = Arc::new(MemoryPage::new("https://example.com/", "Example"));
    let host = Arc::new(MemoryHost::new(Some(7)));
    let port = Arc::new(MemoryPort::new());
    let recorder = InteractionRecorder::builder(page.clone())
        .config(RecorderConfig::ephemeral())
        .host(host.clone())
        .page_port(port.clone())
        .build()
        .unwrap();

    Fixture {
        page,
        host,
        port,
        channel: ControlChannel::new(Arc::new(recorder)),
    }
}

#[test]
fn test_duplicate_toggle_attaches_once() {
    let f = fixture();
    let button = f.page.document().body().append("button");

    let toggle = r#"{"type":"TOGGLE","enabled":true}"#;
    assert!(f.channel.handle_json(ChannelSource::Runtime, toggle).is_none());
    assert!(f.channel.handle_json(ChannelSource::Runtime, toggle).is_none());
    assert_eq!(f.page.listener_count(), 3);

    page_clicks(&f, &button, 2);
    assert_eq!(f.channel.recorder().records().len(), 2);
}

#[test]
fn test_same_toggle_on_both_channels() {
    let f = fixture();
    let button = f.page.document().body().append("button");

    f.channel
        .handle(ChannelSource::Runtime, InboundMessage::Toggle { enabled: true });
    f.channel
        .handle(ChannelSource::Page, InboundMessage::Toggle { enabled: true });
    assert!(f.channel.recorder().is_enabled());
    assert_eq!(f.page.listener_count(), 3);

    page_clicks(&f, &button, 1);
    assert_eq!(f.channel.recorder().records().len(), 1);

    f.channel
        .handle(ChannelSource::Page, InboundMessage::Toggle { enabled: false });
    f.channel
        .handle(ChannelSource::Runtime, InboundMessage::Toggle { enabled: false });
    assert!(!f.channel.recorder().is_enabled());
    assert_eq!(f.page.listener_count(), 0);
}

#[test]
fn test_legacy_toggle_names_are_accepted() {
    let f = fixture();
    f.channel.handle_json(
        ChannelSource::Page,
        r#"{"type":"NANO_RECORDER_TOGGLE","enabled":true}"#,
    );
    assert!(f.channel.recorder().is_enabled());
}

#[test]
fn test_page_export_replies_on_page_port_and_keeps_buffer() {
    let f = fixture();
    let button = f.page.document().body().append("button");
    f.channel
        .handle(ChannelSource::Page, InboundMessage::Toggle { enabled: true });
    page_clicks(&f, &button, 2);
    f.port.take_sent();

    let reply = f.channel.handle_json(ChannelSource::Page, r#"{"type":"EXPORT"}"#);
    let logs = match reply {
        Some(OutboundMessage::ExportResult { logs }) => logs,
        other => panic!("expected an export result, got {other:?}"),
    };
    assert_eq!(logs.len(), 2);
    assert_eq!(
        f.port.sent(),
        vec![OutboundMessage::ExportResult { logs: logs.clone() }]
    );
    assert!(f.host.sent().is_empty());
    assert_eq!(f.channel.recorder().records().len(), 2);
}

#[test]
fn test_runtime_export_hands_records_over_once() {
    let f = fixture();
    let button = f.page.document().body().append("button");
    f.channel
        .handle(ChannelSource::Runtime, InboundMessage::Toggle { enabled: true });
    page_clicks(&f, &button, 3);
    f.channel
        .handle(ChannelSource::Runtime, InboundMessage::Toggle { enabled: false });

    let first = f.channel.handle(ChannelSource::Runtime, InboundMessage::Export);
    let second = f.channel.handle(ChannelSource::Runtime, InboundMessage::Export);

    assert!(matches!(first, Some(OutboundMessage::ExportResult { ref logs }) if logs.len() == 3));
    assert!(matches!(second, Some(OutboundMessage::ExportResult { ref logs }) if logs.is_empty()));
    assert_eq!(f.host.sent().len(), 2);
    assert!(f.channel.recorder().records().is_empty());
}

#[test]
fn test_export_on_both_channels_depends_on_arrival_order() {
    for page_first in [true, false] {
        let f = fixture();
        let button = f.page.document().body().append("button");
        f.channel
            .handle(ChannelSource::Page, InboundMessage::Toggle { enabled: true });
        page_clicks(&f, &button, 2);

        let order = if page_first {
            [ChannelSource::Page, ChannelSource::Runtime]
        } else {
            [ChannelSource::Runtime, ChannelSource::Page]
        };
        let mut replies = Vec::new();
        for source in order {
            match f.channel.handle(source, InboundMessage::Export) {
                Some(OutboundMessage::ExportResult { logs }) => replies.push((source, logs.len())),
                other => panic!("expected an export result, got {other:?}"),
            }
        }

        let count = |wanted: ChannelSource| {
            replies
                .iter()
                .find(|(source, _)| *source == wanted)
                .map(|(_, len)| *len)
        };
        // The runtime always takes the records over; the page copy only sees them first
        assert_eq!(count(ChannelSource::Runtime), Some(2));
        assert_eq!(count(ChannelSource::Page), Some(if page_first { 2 } else { 0 }));
        assert!(f.channel.recorder().records().is_empty());
    }
}

#[test]
fn test_echoed_and_unknown_messages_are_ignored() {
    let f = fixture();
    let button = f.page.document().body().append("button");
    f.channel
        .handle(ChannelSource::Page, InboundMessage::Toggle { enabled: true });
    page_clicks(&f, &button, 1);

    // Our own LOG broadcast comes back on the page channel
    let echoed = serde_json::to_string(&f.port.sent()[0]).unwrap();
    assert!(f.channel.handle_json(ChannelSource::Page, &echoed).is_none());
    assert!(f
        .channel
        .handle_json(ChannelSource::Page, r#"{"type":"SOMETHING_ELSE"}"#)
        .is_none());
    assert!(f.channel.handle_json(ChannelSource::Page, "not json").is_none());
    assert!(f
        .channel
        .handle_json(ChannelSource::Page, r#"{"type":"TOGGLE"}"#)
        .is_none());

    assert!(f.channel.recorder().is_enabled());
    assert_eq!(f.channel.recorder().records().len(), 1);
}

#[test]
fn test_export_with_closed_channel_still_returns_result() {
    let f = fixture();
    f.port.set_closed(true);
    let reply = f
        .channel
        .handle(ChannelSource::Page, InboundMessage::Export);
    assert_eq!(reply, Some(OutboundMessage::ExportResult { logs: vec![] }));
}

#[test]
fn test_export_without_configured_channel() {
    let page = Arc::new(MemoryPage::new("https://example.com/", "Example"));
    let recorder = InteractionRecorder::builder(page)
        .config(RecorderConfig::ephemeral())
        .build()
        .unwrap();
    let channel = ControlChannel::new(Arc::new(recorder));

    let reply = channel.handle(ChannelSource::Runtime, InboundMessage::Export);
    assert_eq!(reply, Some(OutboundMessage::ExportResult { logs: vec![] }));
}

fn page_clicks(f: &Fixture, button: &MemoryElement, times: usize) {
    for _ in 0..times {
        f.page.click(button);
    }
}
