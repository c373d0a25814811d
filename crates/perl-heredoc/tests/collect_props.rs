#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Property-based tests for heredoc collection.

use perl_heredoc::{collect_all, PendingHeredoc, QuoteKind};
use proptest::{collection, proptest};
use std::sync::Arc;

fn pending(label: &str, allow_indent: bool) -> PendingHeredoc {
    PendingHeredoc {
        label: Arc::from(label),
        allow_indent,
        quote: QuoteKind::Unquoted,
        decl_offset: 0,
    }
}

proptest! {
    /// Every push of a declaration is matched by exactly one collected
    /// body, in FIFO order, and scanning resumes after the last
    /// terminator.
    #[test]
    fn bodies_come_back_in_declaration_order(
        bodies in collection::vec(collection::vec("[a-z]{1,8}", 0..4), 1..4)
    ) {
        let mut src = String::new();
        let mut pendings = Vec::new();
        for (i, lines) in bodies.iter().enumerate() {
            let label = format!("END{i}");
            for line in lines {
                src.push_str(line);
                src.push('\n');
            }
            src.push_str(&label);
            src.push('\n');
            pendings.push(pending(&label, false));
        }
        src.push_str("rest");

        let result = collect_all(src.as_bytes(), 0, pendings.into());
        assert_eq!(result.bodies.len(), bodies.len());
        for (collected, lines) in result.bodies.iter().zip(&bodies) {
            assert!(collected.terminated);
            let expected: String = lines.iter().map(|l| format!("{l}\n")).collect();
            assert_eq!(collected.bytes, expected.as_bytes());
        }
        assert_eq!(&src[result.next_offset..], "rest");
    }

    /// Indent stripping removes exactly the terminator's leading
    /// whitespace from each line.
    #[test]
    fn tilde_strips_terminator_indent(
        indent in "[ ]{0,6}",
        lines in collection::vec("[a-z]{1,8}", 1..4)
    ) {
        let mut src = String::new();
        for line in &lines {
            src.push_str(&indent);
            src.push_str(line);
            src.push('\n');
        }
        src.push_str(&indent);
        src.push_str("EOT\n");

        let result = collect_all(src.as_bytes(), 0, vec![pending("EOT", true)].into());
        let body = &result.bodies[0];
        assert!(body.terminated);
        let expected: String = lines.iter().map(|l| format!("{l}\n")).collect();
        assert_eq!(body.bytes, expected.as_bytes());
    }
}
