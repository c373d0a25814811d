#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Property-based tests for `qw/.../` expressions and quoted strings.

use perl_parser::Parser;
use proptest::{collection, proptest};

proptest! {
    /// Any whitespace-separated word list survives tokenize+parse with
    /// the words intact, regardless of delimiter spacing.
    #[test]
    fn qw_preserves_words(words in collection::vec("[A-Za-z_][A-Za-z0-9_]{0,6}", 0..8)) {
        let src = format!("my @w = qw({});", words.join("  "));
        let ast = Parser::new(&src).parse().unwrap();
        let sexp = ast.to_sexp();
        let expected = format!("(qw {})", words.join(" "));
        assert!(sexp.contains(&expected), "sexp {sexp} missing {expected}");
    }

    /// Single-quoted strings round-trip arbitrary word content.
    #[test]
    fn single_quoted_literals(body in "[A-Za-z0-9 _.,!-]{0,24}") {
        let src = format!("my $s = '{body}';");
        let ast = Parser::new(&src).parse().unwrap();
        assert!(ast.to_sexp().contains(&format!("(lit {:?})", body)));
    }

    /// Deparse of a parsed expression reparses to the same tree.
    #[test]
    fn arith_roundtrip(a in 0i32..1000, b in 1i32..1000, c in 0i32..1000) {
        let src = format!("my $x = ({a} + {b}) * {c} - {a} / {b};");
        let first = Parser::new(&src).parse().unwrap();
        let printed = perl_ast::deparse(&first);
        let second = Parser::new(&printed).parse().unwrap();
        assert_eq!(first.to_sexp(), second.to_sexp());
    }
}
