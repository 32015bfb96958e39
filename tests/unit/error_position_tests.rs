//! Unit tests for the nested error-position parser.

use magma_proc::parse::{
    ErrorOrigin, ErrorPosition, ErrorPositionParser, LineConsumer, Parsed, TaggedParser,
};
use magma_proc::AppError;

async fn parse(lines: &[&str]) -> Vec<Parsed> {
    let mut rx = ErrorPositionParser.start(LineConsumer::from_lines(lines.iter().copied()));
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.push(item);
    }
    out
}

async fn parse_one(lines: &[&str]) -> ErrorPosition {
    let mut parsed = parse(lines).await;
    assert_eq!(parsed.len(), 1, "expected exactly one record: {parsed:?}");
    match parsed.remove(0) {
        Parsed::ErrorPosition(position) => position,
        other => panic!("expected an error position, got {other:?}"),
    }
}

fn eval(row: usize, column: usize, fragment: &str) -> ErrorPosition {
    ErrorPosition {
        origin: ErrorOrigin::Eval,
        row,
        column,
        source_fragment: fragment.to_owned(),
        located_in: None,
    }
}

#[tokio::test]
async fn nested_eval_chain_ends_in_unspecified_level() {
    let position = parse_one(&[
        "In eval expression, line 1, column 3:",
        ">> 3 mod 0;",
        "Located in enclosing eval expression, at line 1, column 1:",
        ">> eval \"3 mod 0;\";",
        "Located in:",
        ">> eval \"eval \\\"3 mod 0;\\\";\";",
    ])
    .await;

    let expected = ErrorPosition {
        located_in: Some(Box::new(ErrorPosition {
            located_in: Some(Box::new(ErrorPosition {
                source_fragment: "eval \"eval \\\"3 mod 0;\\\";\";".into(),
                ..ErrorPosition::default()
            })),
            ..eval(1, 1, "eval \"3 mod 0;\";")
        })),
        ..eval(1, 3, "3 mod 0;")
    };
    assert_eq!(position, expected);
    assert_eq!(position.depth(), 3);
    assert!(position.is_eval());
    assert_eq!(
        position.chain().last().map(|p| &p.origin),
        Some(&ErrorOrigin::Unspecified)
    );
}

#[tokio::test]
async fn eval_located_in_file() {
    let position = parse_one(&[
        "In eval expression, line 1, column 3:",
        ">> 3 mod 0;",
        "Located in file \"/tmp/2.m\", at line 2, column 5:",
        ">> eval \"3 mod 0;\";",
    ])
    .await;

    let enclosing = position.located_in.as_deref().expect("enclosing level");
    assert_eq!(enclosing.file(), Some("/tmp/2.m"));
    assert_eq!((enclosing.row, enclosing.column), (2, 5));
    assert_eq!(enclosing.source_fragment, "eval \"3 mod 0;\";");
    assert!(enclosing.located_in.is_none());
    assert_eq!(position.depth(), 2);
}

#[tokio::test]
async fn eval_in_eval_in_file() {
    let position = parse_one(&[
        "In eval expression, line 1, column 3:",
        ">> 3 mod 0;",
        "Located in enclosing eval expression, at line 1, column 1:",
        ">> eval \"3 mod 0;\";",
        "Located in file \"/tmp/1.m\", at line 2, column 5:",
        ">> eval \"eval \\\"3 mod 0;\\\"\";",
    ])
    .await;

    let origins: Vec<&ErrorOrigin> = position.chain().map(|p| &p.origin).collect();
    assert_eq!(
        origins,
        vec![
            &ErrorOrigin::Eval,
            &ErrorOrigin::Eval,
            &ErrorOrigin::File("/tmp/1.m".into())
        ]
    );
}

#[tokio::test]
async fn top_level_file_position() {
    let position = parse_one(&["In file \"/tmp/x.m\", line 4, column 9:", ">> x := ;"]).await;
    assert_eq!(position.file(), Some("/tmp/x.m"));
    assert_eq!((position.row, position.column), (4, 9));
    assert_eq!(position.source_fragment, "x := ;");
    assert_eq!(position.depth(), 1);
}

#[tokio::test]
async fn missing_source_fragment_is_an_error() {
    let parsed = parse(&["In eval expression, line 1, column 3:", "3 mod 0;"]).await;
    assert_eq!(parsed.len(), 1);
    assert!(matches!(parsed[0], Parsed::Error(AppError::Parse(_))));
}

#[tokio::test]
async fn unrecognised_located_in_suffix_is_an_error() {
    let parsed = parse(&[
        "In eval expression, line 1, column 3:",
        ">> 3 mod 0;",
        "Located in the void",
    ])
    .await;
    assert_eq!(parsed.len(), 1);
    assert!(matches!(parsed[0], Parsed::Error(AppError::Parse(_))));
}

#[tokio::test]
async fn unrelated_input_yields_nothing() {
    assert!(parse(&["Runtime error in 'mod': Division by zero"]).await.is_empty());
    assert!(parse(&[]).await.is_empty());
}
