//! Unit tests for the tag vocabulary and tagged events.

use magma_proc::proc::{Line, Position, Tag, Tagged};

const ALL_TAGS: &[Tag] = &[
    Tag::Output,
    Tag::List,
    Tag::Signature,
    Tag::ErrorSyntax,
    Tag::ErrorInternal,
    Tag::ErrorUser,
    Tag::ErrorRuntime,
    Tag::Traceback,
    Tag::ErrorHistoryPosition,
    Tag::ErrorPosition,
    Tag::ReadPrompt,
    Tag::ReadInput,
    Tag::ReadIntPrompt,
    Tag::ReadIntInput,
    Tag::ReadIntError,
    Tag::Ready,
    Tag::InputReceived,
    Tag::Run,
    Tag::ErrorParse,
    Tag::Interrupt,
    Tag::Quit,
    Tag::Reset,
    Tag::DebugReady,
];

#[test]
fn every_tag_resolves_from_its_wire_name() {
    for &tag in ALL_TAGS {
        assert_eq!(Tag::from_name(tag.name()), Some(tag), "tag {tag}");
    }
}

#[test]
fn unknown_names_do_not_resolve() {
    assert_eq!(Tag::from_name("XYZ"), None);
    assert_eq!(Tag::from_name("out"), None);
    assert_eq!(Tag::from_name(""), None);
}

#[test]
fn status_tags_are_classified() {
    let status: Vec<&str> = ALL_TAGS
        .iter()
        .filter(|tag| tag.is_status())
        .map(|tag| tag.name())
        .collect();
    assert_eq!(status, vec!["RDY", "IR", "RUN", "ERP", "INT", "QUIT", "RES", "DRDY"]);
}

#[test]
fn error_tags_are_classified() {
    let errors: Vec<&str> = ALL_TAGS
        .iter()
        .filter(|tag| tag.is_error())
        .map(|tag| tag.name())
        .collect();
    assert_eq!(errors, vec!["ENE", "EI", "EU", "ER", "TB", "POS", "EPO", "RDI_ER"]);
}

#[test]
fn tagged_events_report_their_tag() {
    let line = Tagged::Line(Line {
        tag: Tag::ErrorRuntime,
        continuation: false,
        indent: 0,
        data: "Runtime error".into(),
    });
    assert_eq!(line.tag(), Tag::ErrorRuntime);
    assert!(line.is_error());
    assert_eq!(line.as_line().map(|l| l.data.as_str()), Some("Runtime error"));

    let position = Tagged::Position(Position { row: 0, column: 2 });
    assert_eq!(position.tag(), Tag::ErrorHistoryPosition);
    assert!(position.is_error());
    assert!(position.as_line().is_none());
}

#[test]
fn display_uses_wire_name() {
    assert_eq!(Tag::ReadIntPrompt.to_string(), "RDI_PR");
    assert_eq!(Tag::Quit.to_string(), "QUIT");
}
