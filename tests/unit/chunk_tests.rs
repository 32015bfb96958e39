//! Unit tests for resolving response chunks against the submitted command.

use magma_proc::proc::{Chunk, Position};

fn chunk(start: (usize, usize), end: (usize, usize)) -> Chunk {
    Chunk {
        start: Position {
            row: start.0,
            column: start.1,
        },
        end: Position {
            row: end.0,
            column: end.1,
        },
    }
}

#[test]
fn resolves_span_within_one_row() {
    let command = "a := 1; print a;";
    assert_eq!(chunk((0, 0), (0, 7)).resolve(command), Some("a := 1;"));
    assert_eq!(chunk((0, 8), (0, 16)).resolve(command), Some("print a;"));
}

#[test]
fn resolves_span_across_rows() {
    let command = "x := 2;\nprint x;\ny := 3;";
    assert_eq!(chunk((1, 0), (1, 8)).resolve(command), Some("print x;"));
    assert_eq!(
        chunk((0, 0), (2, 7)).resolve(command),
        Some("x := 2;\nprint x;\ny := 3;")
    );
}

#[test]
fn empty_span_resolves_to_empty_text() {
    assert_eq!(chunk((0, 3), (0, 3)).resolve("abcdef"), Some(""));
}

#[test]
fn out_of_range_positions_resolve_to_none() {
    let command = "print 1;";
    assert_eq!(chunk((0, 0), (0, 20)).resolve(command), None);
    assert_eq!(chunk((1, 0), (1, 1)).resolve(command), None);
}

#[test]
fn reversed_span_resolves_to_none() {
    assert_eq!(chunk((0, 5), (0, 2)).resolve("print 1;"), None);
}

#[test]
fn span_splitting_a_character_resolves_to_none() {
    // 'é' is two bytes; column 1 falls inside it.
    assert_eq!(chunk((0, 1), (0, 3)).resolve("éa"), None);
}
